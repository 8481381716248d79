//! In-memory reference implementations of the storage collaborators, for the
//! binary's default configuration and for the integration tests. Not a
//! production mailbox format -- no persistence, no real MIME parsing.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use imap_server_types::{Flag, MailboxHeader, SearchAtom, SearchKey, SequenceSet, StoreOp};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

use crate::collaborators::{
    AccountStore, AppendOutcome, FetchedMessage, MailboxStore, MutationOutcome, SelectOutcome,
};

pub struct MemoryAccountStore {
    accounts: HashMap<String, String>,
}

impl MemoryAccountStore {
    pub fn new(accounts: impl IntoIterator<Item = (String, String)>) -> Self {
        MemoryAccountStore {
            accounts: accounts.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn authenticate(&self, username: &str, password: &str) -> bool {
        self.accounts.get(username).map(|p| p == password).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    uid: u32,
    flags: Vec<Flag>,
    bytes: Vec<u8>,
    internal_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct Mailbox {
    messages: Vec<StoredMessage>,
    uidvalidity: u32,
    uidnext: u32,
    subscribed: bool,
}

impl Mailbox {
    fn header(&self) -> MailboxHeader {
        MailboxHeader {
            count: self.messages.len() as u32,
            recent: 0,
            nunseen: self.messages.iter().filter(|m| !m.flags.contains(&Flag::Seen)).count() as u32,
            uidnext: self.uidnext,
            uidvalidity: self.uidvalidity.to_string(),
        }
    }
}

/// Keyed by `(user, mailbox name)`. A single mutex is enough at this scale;
/// real backends would shard per mailbox.
#[derive(Default)]
pub struct MemoryMailboxStore {
    mailboxes: Mutex<HashMap<(String, String), Mailbox>>,
    next_uidvalidity: Mutex<u32>,
}

impl MemoryMailboxStore {
    pub fn new() -> Self {
        MemoryMailboxStore {
            mailboxes: Mutex::new(HashMap::new()),
            next_uidvalidity: Mutex::new(1),
        }
    }

    /// Seeds `mailbox` with `INBOX` pre-created, the way a fresh account
    /// would look. Used by the binary's startup and by tests.
    pub async fn provision_inbox(&self, user: &str) {
        let _ = self.create(user, "INBOX").await;
    }

    async fn fresh_uidvalidity(&self) -> u32 {
        let mut n = self.next_uidvalidity.lock().await;
        let v = *n;
        *n += 1;
        v
    }
}

#[async_trait]
impl MailboxStore for MemoryMailboxStore {
    async fn select(&self, user: &str, mailbox: &str) -> SelectOutcome {
        let mailboxes = self.mailboxes.lock().await;
        match mailboxes.get(&(user.to_string(), mailbox.to_string())) {
            Some(m) => SelectOutcome::Ok {
                header: m.header(),
                read_write: true,
            },
            None => SelectOutcome::NotExists,
        }
    }

    async fn status(&self, user: &str, mailbox: &str) -> SelectOutcome {
        self.select(user, mailbox).await
    }

    async fn create(&self, user: &str, mailbox: &str) -> MutationOutcome {
        let key = (user.to_string(), mailbox.to_string());
        if self.mailboxes.lock().await.contains_key(&key) {
            return MutationOutcome::Error("mailbox already exists".into());
        }
        let uidvalidity = self.fresh_uidvalidity().await;
        self.mailboxes.lock().await.insert(
            key,
            Mailbox {
                messages: Vec::new(),
                uidvalidity,
                uidnext: 1,
                subscribed: false,
            },
        );
        MutationOutcome::Ok
    }

    async fn delete(&self, user: &str, mailbox: &str) -> MutationOutcome {
        let mut mailboxes = self.mailboxes.lock().await;
        match mailboxes.remove(&(user.to_string(), mailbox.to_string())) {
            Some(_) => MutationOutcome::Ok,
            None => MutationOutcome::NotExists,
        }
    }

    async fn rename(&self, user: &str, from: &str, to: &str) -> MutationOutcome {
        let mut mailboxes = self.mailboxes.lock().await;
        let from_key = (user.to_string(), from.to_string());
        match mailboxes.remove(&from_key) {
            Some(data) => {
                mailboxes.insert((user.to_string(), to.to_string()), data);
                MutationOutcome::Ok
            }
            None => MutationOutcome::NotExists,
        }
    }

    async fn subscribe(&self, user: &str, mailbox: &str) -> MutationOutcome {
        self.set_subscribed(user, mailbox, true).await
    }

    async fn unsubscribe(&self, user: &str, mailbox: &str) -> MutationOutcome {
        self.set_subscribed(user, mailbox, false).await
    }

    async fn list(&self, user: &str, _reference: &str, pattern: &str) -> Vec<String> {
        let mailboxes = self.mailboxes.lock().await;
        mailboxes
            .keys()
            .filter(|(u, _)| u == user)
            .map(|(_, name)| name.clone())
            .filter(|name| mailbox_glob_matches(pattern, name))
            .collect()
    }

    // `reference` scoping (relative mailbox hierarchies) is out of scope for
    // this demo backend; only `pattern` is applied.
    async fn lsub(&self, user: &str, _reference: &str, pattern: &str) -> Vec<String> {
        let mailboxes = self.mailboxes.lock().await;
        mailboxes
            .iter()
            .filter(|((u, _), m)| u == user && m.subscribed)
            .map(|((_, name), _)| name.clone())
            .filter(|name| mailbox_glob_matches(pattern, name))
            .collect()
    }

    async fn append(
        &self,
        user: &str,
        mailbox: &str,
        flags: &[Flag],
        source: &mut (dyn AsyncRead + Send + Unpin),
        len: u32,
    ) -> AppendOutcome {
        let mut bytes = vec![0u8; len as usize];
        if source.read_exact(&mut bytes).await.is_err() {
            return AppendOutcome::Eof;
        }
        let mut mailboxes = self.mailboxes.lock().await;
        match mailboxes.get_mut(&(user.to_string(), mailbox.to_string())) {
            Some(m) => {
                let uid = m.uidnext;
                m.uidnext += 1;
                m.messages.push(StoredMessage {
                    uid,
                    flags: flags.to_vec(),
                    bytes,
                    internal_date: Utc::now(),
                });
                AppendOutcome::Ok { uid }
            }
            None => AppendOutcome::NotExists,
        }
    }

    async fn check(&self, _user: &str, _mailbox: &str) -> MutationOutcome {
        MutationOutcome::Ok
    }

    async fn close(&self, user: &str, mailbox: &str) -> MutationOutcome {
        let _ = self.expunge(user, mailbox).await;
        MutationOutcome::Ok
    }

    async fn expunge(&self, user: &str, mailbox: &str) -> Vec<u32> {
        let mut mailboxes = self.mailboxes.lock().await;
        let Some(m) = mailboxes.get_mut(&(user.to_string(), mailbox.to_string())) else {
            return Vec::new();
        };
        let mut expunged_seqs = Vec::new();
        let mut kept = Vec::new();
        for (i, msg) in m.messages.drain(..).enumerate() {
            if msg.flags.contains(&Flag::Deleted) {
                expunged_seqs.push((i + 1) as u32);
            } else {
                kept.push(msg);
            }
        }
        m.messages = kept;
        expunged_seqs
    }

    async fn search(&self, user: &str, mailbox: &str, tree: &SearchKey, by_uid: bool) -> Vec<u32> {
        let mailboxes = self.mailboxes.lock().await;
        let Some(m) = mailboxes.get(&(user.to_string(), mailbox.to_string())) else {
            return Vec::new();
        };
        m.messages
            .iter()
            .enumerate()
            .filter(|(i, msg)| matches_key(tree, *i as u32 + 1, msg))
            .map(|(i, msg)| if by_uid { msg.uid } else { i as u32 + 1 })
            .collect()
    }

    async fn fetch(
        &self,
        user: &str,
        mailbox: &str,
        sequence_set: &SequenceSet,
        attributes: &[imap_server_types::FetchAttr],
        by_uid: bool,
    ) -> Vec<FetchedMessage> {
        let mailboxes = self.mailboxes.lock().await;
        let Some(m) = mailboxes.get(&(user.to_string(), mailbox.to_string())) else {
            return Vec::new();
        };
        let largest = m.messages.last().map(|msg| if by_uid { msg.uid } else { m.messages.len() as u32 }).unwrap_or(0);
        let wanted = sequence_set.resolve(largest);
        m.messages
            .iter()
            .enumerate()
            .filter(|(i, msg)| {
                let key = if by_uid { msg.uid } else { *i as u32 + 1 };
                wanted.contains(&key)
            })
            .map(|(i, msg)| FetchedMessage {
                seq: i as u32 + 1,
                uid: msg.uid,
                rendered_items: attributes.iter().map(|a| render_fetch_attr(a, msg)).collect(),
            })
            .collect()
    }

    async fn store(
        &self,
        user: &str,
        mailbox: &str,
        sequence_set: &SequenceSet,
        op: StoreOp,
        flags: &[Flag],
        by_uid: bool,
    ) -> Vec<(u32, Vec<Flag>)> {
        let mut mailboxes = self.mailboxes.lock().await;
        let Some(m) = mailboxes.get_mut(&(user.to_string(), mailbox.to_string())) else {
            return Vec::new();
        };
        let largest = m.messages.last().map(|msg| if by_uid { msg.uid } else { m.messages.len() as u32 }).unwrap_or(0);
        let wanted = sequence_set.resolve(largest);
        let mut out = Vec::new();
        for (i, msg) in m.messages.iter_mut().enumerate() {
            let key = if by_uid { msg.uid } else { i as u32 + 1 };
            if !wanted.contains(&key) {
                continue;
            }
            match op {
                StoreOp::Add => {
                    for f in flags {
                        if !msg.flags.contains(f) {
                            msg.flags.push(f.clone());
                        }
                    }
                }
                StoreOp::Remove => msg.flags.retain(|f| !flags.contains(f)),
                StoreOp::Replace => msg.flags = flags.to_vec(),
            }
            out.push((i as u32 + 1, msg.flags.clone()));
        }
        out
    }

    async fn copy(
        &self,
        user: &str,
        mailbox: &str,
        sequence_set: &SequenceSet,
        target: &str,
        by_uid: bool,
    ) -> MutationOutcome {
        let mut mailboxes = self.mailboxes.lock().await;
        let source_key = (user.to_string(), mailbox.to_string());
        let target_key = (user.to_string(), target.to_string());
        if !mailboxes.contains_key(&target_key) {
            return MutationOutcome::NotExists;
        }
        let Some(source) = mailboxes.get(&source_key) else {
            return MutationOutcome::NotExists;
        };
        let largest = source
            .messages
            .last()
            .map(|msg| if by_uid { msg.uid } else { source.messages.len() as u32 })
            .unwrap_or(0);
        let wanted = sequence_set.resolve(largest);
        let to_copy: Vec<StoredMessage> = source
            .messages
            .iter()
            .enumerate()
            .filter(|(i, msg)| {
                let key = if by_uid { msg.uid } else { *i as u32 + 1 };
                wanted.contains(&key)
            })
            .map(|(_, msg)| msg.clone())
            .collect();
        let target_mailbox = mailboxes.get_mut(&target_key).unwrap();
        for mut msg in to_copy {
            msg.uid = target_mailbox.uidnext;
            target_mailbox.uidnext += 1;
            target_mailbox.messages.push(msg);
        }
        MutationOutcome::Ok
    }
}

impl MemoryMailboxStore {
    async fn set_subscribed(&self, user: &str, mailbox: &str, subscribed: bool) -> MutationOutcome {
        let mut mailboxes = self.mailboxes.lock().await;
        match mailboxes.get_mut(&(user.to_string(), mailbox.to_string())) {
            Some(m) => {
                m.subscribed = subscribed;
                MutationOutcome::Ok
            }
            None => MutationOutcome::NotExists,
        }
    }
}

/// `*`/`%` glob matching against a single mailbox name component. Hierarchy
/// delimiters are out of scope for this demo backend, so `%` behaves like `*`.
fn mailbox_glob_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" || pattern == "%" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*').or_else(|| pattern.strip_suffix('%')) {
        return name.starts_with(prefix);
    }
    pattern.eq_ignore_ascii_case(name)
}

fn matches_key(key: &SearchKey, seq: u32, msg: &StoredMessage) -> bool {
    match key {
        SearchKey::KeyList(keys) => keys.iter().all(|k| matches_key(k, seq, msg)),
        SearchKey::Not(inner) => !matches_key(inner, seq, msg),
        SearchKey::Or(a, b) => matches_key(a, seq, msg) || matches_key(b, seq, msg),
        SearchKey::Key(atom) => match atom {
            SearchAtom::All => true,
            SearchAtom::Seen => msg.flags.contains(&Flag::Seen),
            SearchAtom::Unseen => !msg.flags.contains(&Flag::Seen),
            SearchAtom::Answered => msg.flags.contains(&Flag::Answered),
            SearchAtom::Unanswered => !msg.flags.contains(&Flag::Answered),
            SearchAtom::Deleted => msg.flags.contains(&Flag::Deleted),
            SearchAtom::Undeleted => !msg.flags.contains(&Flag::Deleted),
            SearchAtom::Flagged => msg.flags.contains(&Flag::Flagged),
            SearchAtom::Unflagged => !msg.flags.contains(&Flag::Flagged),
            SearchAtom::Draft => msg.flags.contains(&Flag::Draft),
            SearchAtom::Undraft => !msg.flags.contains(&Flag::Draft),
            SearchAtom::Uid(set) => set.resolve(msg.uid).contains(&msg.uid),
            SearchAtom::SequenceSet(set) => set.resolve(seq).contains(&seq),
            // There's no separate "date sent" header parsed out of the body,
            // so SENTSINCE/SENTBEFORE/SENTON fall back to the internal date.
            SearchAtom::Since(s) | SearchAtom::SentSince(s) => {
                parse_search_date(s).is_some_and(|d| msg.internal_date.date_naive() >= d)
            }
            SearchAtom::Before(s) | SearchAtom::SentBefore(s) => {
                parse_search_date(s).is_some_and(|d| msg.internal_date.date_naive() < d)
            }
            SearchAtom::On(s) | SearchAtom::SentOn(s) => {
                parse_search_date(s).is_some_and(|d| msg.internal_date.date_naive() == d)
            }
            SearchAtom::Larger(n) => msg.bytes.len() as u32 > *n,
            SearchAtom::Smaller(n) => (msg.bytes.len() as u32) < *n,
            // Header/body-text search needs real message parsing, which this
            // in-memory demo backend does not do.
            _ => false,
        },
    }
}

/// IMAP date arguments (`SINCE`, `BEFORE`, ...) are `date-day-fixed "-" date-month "-" date-year`,
/// e.g. `1-Jan-2026`.
fn parse_search_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%e-%b-%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d-%b-%Y"))
        .ok()
}

fn render_fetch_attr(attr: &imap_server_types::FetchAttr, msg: &StoredMessage) -> String {
    use imap_server_types::FetchAttr::*;
    match attr {
        Flags => format!(
            "FLAGS ({})",
            msg.flags.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(" ")
        ),
        Uid => format!("UID {}", msg.uid),
        InternalDate => format!(
            "INTERNALDATE \"{}\"",
            msg.internal_date.format("%d-%b-%Y %H:%M:%S %z")
        ),
        Rfc822Size => format!("RFC822.SIZE {}", msg.bytes.len()),
        Rfc822 => format!("RFC822 {{{}}}\r\n{}", msg.bytes.len(), String::from_utf8_lossy(&msg.bytes)),
        Rfc822Header => "RFC822.HEADER \"\"".to_string(),
        Rfc822Text => format!("RFC822.TEXT {{{}}}\r\n{}", msg.bytes.len(), String::from_utf8_lossy(&msg.bytes)),
        Envelope => "ENVELOPE NIL".to_string(),
        BodyStructure => "BODYSTRUCTURE NIL".to_string(),
        Body { section, .. } => format!(
            "BODY[{section}] {{{}}}\r\n{}",
            msg.bytes.len(),
            String::from_utf8_lossy(&msg.bytes)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imap_server_types::FetchAttr;
    use std::io::Cursor;

    #[tokio::test]
    async fn append_then_select_reports_message_count() {
        let store = MemoryMailboxStore::new();
        store.provision_inbox("alice").await;
        let mut body = Cursor::new(b"Subject: hi\r\n\r\nhello".to_vec());
        let outcome = store.append("alice", "INBOX", &[Flag::Seen], &mut body, 21).await;
        assert!(matches!(outcome, AppendOutcome::Ok { .. }));

        match store.select("alice", "INBOX").await {
            SelectOutcome::Ok { header, .. } => assert_eq!(header.count, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn append_to_missing_mailbox_fails() {
        let store = MemoryMailboxStore::new();
        let mut body = Cursor::new(b"x".to_vec());
        let outcome = store.append("alice", "Nonexistent", &[], &mut body, 1).await;
        assert!(matches!(outcome, AppendOutcome::NotExists));
    }

    #[tokio::test]
    async fn search_seen_and_unseen() {
        let store = MemoryMailboxStore::new();
        store.provision_inbox("alice").await;
        let mut a = Cursor::new(b"a".to_vec());
        let mut b = Cursor::new(b"b".to_vec());
        store.append("alice", "INBOX", &[Flag::Seen], &mut a, 1).await;
        store.append("alice", "INBOX", &[], &mut b, 1).await;

        let seen = store
            .search("alice", "INBOX", &SearchKey::Key(SearchAtom::Seen), false)
            .await;
        assert_eq!(seen, vec![1]);
        let unseen = store
            .search("alice", "INBOX", &SearchKey::Key(SearchAtom::Unseen), false)
            .await;
        assert_eq!(unseen, vec![2]);
    }

    #[tokio::test]
    async fn expunge_removes_deleted_and_renumbers() {
        let store = MemoryMailboxStore::new();
        store.provision_inbox("alice").await;
        for _ in 0..3 {
            let mut body = Cursor::new(b"x".to_vec());
            store.append("alice", "INBOX", &[], &mut body, 1).await;
        }
        store
            .store(
                "alice",
                "INBOX",
                &"2".parse().unwrap(),
                StoreOp::Add,
                &[Flag::Deleted],
                false,
            )
            .await;
        let expunged = store.expunge("alice", "INBOX").await;
        assert_eq!(expunged, vec![2]);
        match store.select("alice", "INBOX").await {
            SelectOutcome::Ok { header, .. } => assert_eq!(header.count, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_renders_flags_and_uid() {
        let store = MemoryMailboxStore::new();
        store.provision_inbox("alice").await;
        let mut body = Cursor::new(b"hi".to_vec());
        store.append("alice", "INBOX", &[Flag::Seen], &mut body, 2).await;
        let rows = store
            .fetch(
                "alice",
                "INBOX",
                &"1".parse().unwrap(),
                &[FetchAttr::Flags, FetchAttr::Uid],
                false,
            )
            .await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rendered_items, vec!["FLAGS (\\Seen)".to_string(), "UID 1".to_string()]);
    }
}
