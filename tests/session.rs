//! End-to-end connection tests: drive `run_session` over an in-memory duplex
//! pipe the way a real client would drive a socket, asserting on the exact
//! response lines that cross the wire.

use std::sync::Arc;
use std::time::Duration;

use imap_server::collaborators::{AccountStore, MailboxStore};
use imap_server::dispatch::Dispatcher;
use imap_server::memory::{MemoryAccountStore, MemoryMailboxStore};
use imap_server::registry::ConnectionRegistry;
use imap_server::session_loop::{run_session, SessionParams};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// One end of a `tokio::io::duplex` pipe, buffered for line reads, standing
/// in for a connected client.
struct Client {
    reader: BufReader<tokio::io::DuplexStream>,
}

impl Client {
    async fn send(&mut self, line: &str) {
        self.reader.get_mut().write_all(line.as_bytes()).await.unwrap();
        self.reader.get_mut().write_all(b"\r\n").await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.reader.get_mut().write_all(bytes).await.unwrap();
    }

    /// Reads one line, bounded so a protocol bug hangs the test instead of
    /// the whole suite.
    async fn line(&mut self) -> String {
        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), self.reader.read_until(b'\n', &mut buf))
            .await
            .expect("timed out waiting for a response line")
            .expect("read error");
        String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string()
    }

    /// Reads lines up to and including the first tagged completion.
    async fn response(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.line().await;
            let is_tagged = !line.starts_with('*') && !line.starts_with('+');
            lines.push(line);
            if is_tagged {
                return lines;
            }
        }
    }
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ConnectionRegistry>,
    mailboxes: Arc<MemoryMailboxStore>,
    next_id: u64,
}

impl Harness {
    async fn new() -> Self {
        let accounts: Arc<dyn AccountStore> =
            Arc::new(MemoryAccountStore::new([("alice".to_string(), "wonderland".to_string())]));
        let mailboxes = Arc::new(MemoryMailboxStore::new());
        mailboxes.provision_inbox("alice").await;
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(Dispatcher {
            accounts,
            mailboxes: mailboxes.clone() as Arc<dyn MailboxStore>,
            registry: registry.clone(),
            capabilities_unauthenticated: vec!["IMAP4rev1".into(), "AUTH=PLAIN".into()],
            capabilities_authenticated: vec!["IMAP4rev1".into(), "IDLE".into()],
            max_msg_size: 1024,
            starttls_available: false,
        });
        Harness {
            dispatcher,
            registry,
            mailboxes,
            next_id: 0,
        }
    }

    /// Spawns a new connection and returns the client end, past the greeting
    /// line.
    async fn connect(&mut self) -> Client {
        self.next_id += 1;
        let id = self.next_id;
        let (server_end, client_end) = tokio::io::duplex(64 * 1024);
        let params = SessionParams {
            id,
            dispatcher: self.dispatcher.clone(),
            registry: self.registry.clone(),
            tls: None,
            idle_timeout: Duration::from_secs(30),
        };
        tokio::spawn(async move {
            run_session(params, Box::new(server_end)).await;
        });
        let mut client = Client {
            reader: BufReader::new(client_end),
        };
        let greeting = client.line().await;
        assert!(greeting.starts_with("* OK"), "unexpected greeting: {greeting}");
        client
    }

    async fn login(&mut self, client: &mut Client) {
        client.send("a1 LOGIN alice wonderland").await;
        let resp = client.response().await;
        assert_eq!(resp, vec!["a1 OK LOGIN completed"]);
    }

    async fn select_inbox(&mut self, client: &mut Client) {
        client.send("a2 SELECT INBOX").await;
        let resp = client.response().await;
        assert_eq!(resp.last().unwrap(), &"a2 OK [READ-WRITE] SELECT completed".to_string());
    }
}

#[tokio::test]
async fn capability_is_available_before_login() {
    let mut h = Harness::new().await;
    let mut client = h.connect().await;

    client.send("a1 CAPABILITY").await;
    let resp = client.response().await;
    assert_eq!(resp[0], "* CAPABILITY IMAP4rev1 AUTH=PLAIN");
    assert_eq!(resp[1], "a1 OK CAPABILITY completed");
}

#[tokio::test]
async fn login_then_select_reports_mailbox_prelude_in_order() {
    let mut h = Harness::new().await;
    let mut client = h.connect().await;
    h.login(&mut client).await;

    client.send("a2 SELECT INBOX").await;
    let resp = client.response().await;
    assert_eq!(
        resp,
        vec![
            "* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)",
            "* OK [PERMANENTFLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)] Flags permitted",
            "* 0 EXISTS",
            "* 0 RECENT",
            "* OK [UIDVALIDITY 1] UIDs valid",
            "* OK [UIDNEXT 1] Predicted next UID",
            "a2 OK [READ-WRITE] SELECT completed",
        ]
    );
}

#[tokio::test]
async fn select_of_missing_mailbox_fails() {
    let mut h = Harness::new().await;
    let mut client = h.connect().await;
    h.login(&mut client).await;

    client.send("a2 SELECT Nonexistent").await;
    let resp = client.response().await;
    assert_eq!(resp, vec!["a2 NO mailbox does not exist"]);
}

#[tokio::test]
async fn commands_requiring_selected_state_are_rejected_before_select() {
    let mut h = Harness::new().await;
    let mut client = h.connect().await;
    h.login(&mut client).await;

    client.send("a2 FETCH 1 FLAGS").await;
    let resp = client.response().await;
    assert_eq!(resp, vec!["a2 BAD FETCH not allowed in this state"]);
}

#[tokio::test]
async fn append_then_fetch_round_trips_through_the_wire() {
    let mut h = Harness::new().await;
    let mut client = h.connect().await;
    h.login(&mut client).await;

    let body = b"Subject: hi\r\n\r\nhello";
    client.send(&format!("a2 APPEND INBOX {{{}}}", body.len())).await;
    let cont = client.line().await;
    assert_eq!(cont, "+ ");
    client.send_raw(body).await;
    client.send_raw(b"\r\n").await;
    let resp = client.response().await;
    assert_eq!(resp, vec!["a2 OK APPEND completed"]);

    h.select_inbox(&mut client).await;

    client.send("a3 FETCH 1 (UID FLAGS)").await;
    let resp = client.response().await;
    assert_eq!(resp, vec!["* 1 FETCH (UID 1 FLAGS ())", "a3 OK FETCH completed"]);
}

#[tokio::test]
async fn idle_delivers_a_notification_from_another_session_then_done_completes() {
    let mut h = Harness::new().await;

    let mut idler = h.connect().await;
    h.login(&mut idler).await;
    h.select_inbox(&mut idler).await;

    let mut actor = h.connect().await;
    h.login(&mut actor).await;
    h.select_inbox(&mut actor).await;

    idler.send("a4 IDLE").await;
    let cont = idler.line().await;
    assert_eq!(cont, "+ idling");

    // give the idle loop a moment to register its channel and start selecting
    tokio::time::sleep(Duration::from_millis(20)).await;

    let body = b"x";
    actor.send(&format!("a5 APPEND INBOX {{{}}}", body.len())).await;
    assert_eq!(actor.line().await, "+ ");
    actor.send_raw(body).await;
    actor.send_raw(b"\r\n").await;
    let resp = actor.response().await;
    assert_eq!(resp, vec!["a5 OK APPEND completed"]);

    assert_eq!(idler.line().await, "* 1 EXISTS");
    assert_eq!(idler.line().await, "* 0 RECENT");

    idler.send("DONE").await;
    let resp = idler.response().await;
    assert_eq!(resp, vec!["a4 OK IDLE completed"]);
}

#[tokio::test]
async fn non_done_input_while_idling_closes_the_connection() {
    let mut h = Harness::new().await;
    let mut client = h.connect().await;
    h.login(&mut client).await;
    h.select_inbox(&mut client).await;

    client.send("a4 IDLE").await;
    assert_eq!(client.line().await, "+ idling");

    client.send("NOT DONE").await;
    assert_eq!(client.line().await, "a4 BAD Expected DONE");

    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(1), client.reader.read_until(b'\n', &mut buf))
        .await
        .expect("timed out waiting for EOF")
        .unwrap();
    assert_eq!(n, 0, "expected EOF after the fatal IDLE rejection");
}

#[tokio::test]
async fn oversized_literal_is_rejected_without_killing_the_connection() {
    let mut h = Harness::new().await;
    let mut client = h.connect().await;
    h.login(&mut client).await;

    client.send("a2 FETCH 1 {20000}").await;
    let line = client.line().await;
    assert!(line.starts_with("* BAD"), "unexpected: {line}");

    client.send("a3 NOOP").await;
    let resp = client.response().await;
    assert_eq!(resp, vec!["a3 OK NOOP completed"]);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let mut h = Harness::new().await;
    let mut client = h.connect().await;

    client.send("a1 LOGOUT").await;
    let resp = client.response().await;
    assert_eq!(resp, vec!["* BYE logging out", "a1 OK LOGOUT completed"]);

    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(1), client.reader.read_until(b'\n', &mut buf))
        .await
        .expect("timed out waiting for EOF")
        .unwrap();
    assert_eq!(n, 0, "expected EOF after LOGOUT");
}

#[tokio::test]
async fn store_notifies_other_sessions_on_the_same_mailbox() {
    let mut h = Harness::new().await;
    let mut body = std::io::Cursor::new(b"x".to_vec());
    h.mailboxes.append("alice", "INBOX", &[], &mut body, 1).await;

    let mut watcher = h.connect().await;
    h.login(&mut watcher).await;
    h.select_inbox(&mut watcher).await;

    let mut actor = h.connect().await;
    h.login(&mut actor).await;
    h.select_inbox(&mut actor).await;

    watcher.send("a4 IDLE").await;
    assert_eq!(watcher.line().await, "+ idling");
    tokio::time::sleep(Duration::from_millis(20)).await;

    actor.send("a5 UID STORE 1 +FLAGS (\\Seen)").await;
    let resp = actor.response().await;
    assert_eq!(
        resp,
        vec!["* 1 FETCH (FLAGS (\\Seen))", "a5 OK STORE completed"]
    );

    let notification = watcher.line().await;
    assert_eq!(notification, "* 1 FETCH (FLAGS (\\Seen))");

    watcher.send("DONE").await;
    let resp = watcher.response().await;
    assert_eq!(resp, vec!["a4 OK IDLE completed"]);
}
