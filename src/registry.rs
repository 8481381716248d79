//! Cross-connection notification fan-out: the piece that lets an `APPEND` on
//! one connection wake an `IDLE` sitting on another. Deliberately the only
//! piece of shared mutable state in the whole server; everything else is
//! local to one connection's task.
//!
//! Entries exist only while a connection is inside its `IDLE` wait --
//! registered when it enters IDLE (with the user and mailbox it had selected
//! at that moment), removed on `DONE`, disconnect, or error. A connection
//! that isn't idling can't be pushed to, so it isn't in this map.

use std::collections::HashMap;

use imap_server_types::Response;
use tokio::sync::{mpsc, Mutex};

/// What the registry knows about one idling connection: whose session it is,
/// which mailbox (if any) it had selected, and a channel the registry can
/// push untagged responses into without touching that connection's socket
/// directly.
struct Entry {
    user: String,
    mailbox: Option<String>,
    sender: mpsc::UnboundedSender<Response>,
}

/// Process-wide map from connection id to its `Entry`. Never held across an
/// await on a socket write -- only ever locked for the HashMap operation
/// itself, then released before the send.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<u64, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry::default()
    }

    pub async fn register(
        &self,
        id: u64,
        user: String,
        mailbox: Option<String>,
        sender: mpsc::UnboundedSender<Response>,
    ) {
        self.entries.lock().await.insert(id, Entry { user, mailbox, sender });
    }

    pub async fn unregister(&self, id: u64) {
        self.entries.lock().await.remove(&id);
    }

    /// Pushes `response` to every *other* connection belonging to `user`
    /// with `mailbox` selected (`except` is the connection whose command
    /// caused this notification -- it learns the new state from its own
    /// tagged response instead). Scoping on `user` as well as `mailbox` name
    /// matters: different users' mailboxes of the same name (e.g. every
    /// account's "INBOX") are unrelated.
    pub async fn notify_mailbox(&self, user: &str, mailbox: &str, except: u64, response: Response) {
        let entries = self.entries.lock().await;
        for (id, entry) in entries.iter() {
            if *id == except {
                continue;
            }
            if entry.user == user && entry.mailbox.as_deref() == Some(mailbox) {
                // An unbounded send only fails if the receiver (the
                // connection's own write task) is gone; that connection is
                // tearing down, so dropping the notification is correct.
                let _ = entry.sender.send(response.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imap_server_types::Response;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn notifies_other_sessions_of_the_same_user_and_mailbox_only() {
        let registry = ConnectionRegistry::new();

        let (tx1, mut rx1) = unbounded_channel();
        let (tx2, mut rx2) = unbounded_channel();
        let (tx3, mut rx3) = unbounded_channel();
        registry.register(1, "alice".into(), Some("INBOX".into()), tx1).await;
        registry.register(2, "alice".into(), Some("INBOX".into()), tx2).await;
        registry.register(3, "alice".into(), Some("Archive".into()), tx3).await;

        registry
            .notify_mailbox("alice", "INBOX", 1, Response::untagged("5 EXISTS"))
            .await;

        assert!(rx1.try_recv().is_err(), "acting connection is not notified");
        assert_eq!(rx2.try_recv().unwrap(), Response::untagged("5 EXISTS"));
        assert!(rx3.try_recv().is_err(), "different mailbox is not notified");
    }

    #[tokio::test]
    async fn different_users_selecting_the_same_mailbox_name_do_not_cross_notify() {
        let registry = ConnectionRegistry::new();

        let (tx_alice, mut rx_alice) = unbounded_channel();
        let (tx_bob, mut rx_bob) = unbounded_channel();
        registry.register(1, "alice".into(), Some("INBOX".into()), tx_alice).await;
        registry.register(2, "bob".into(), Some("INBOX".into()), tx_bob).await;

        registry
            .notify_mailbox("alice", "INBOX", 1, Response::untagged("5 EXISTS"))
            .await;

        assert_eq!(rx_alice.try_recv().unwrap(), Response::untagged("5 EXISTS"));
        assert!(rx_bob.try_recv().is_err(), "bob's INBOX is a different mailbox than alice's");
    }

    #[tokio::test]
    async fn unregistered_connection_receives_nothing() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = unbounded_channel();
        registry.register(1, "alice".into(), Some("INBOX".into()), tx).await;
        registry.unregister(1).await;

        registry
            .notify_mailbox("alice", "INBOX", 99, Response::untagged("1 EXISTS"))
            .await;
        assert!(rx.try_recv().is_err());
    }
}
