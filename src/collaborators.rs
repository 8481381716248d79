//! External interfaces the dispatcher talks to: authentication, mailbox
//! storage, and the STARTTLS upgrade. These are trait objects on purpose --
//! the session loop and dispatcher are written against them, never against
//! [`crate::memory`]'s concrete in-memory reference implementation.

use async_trait::async_trait;
use imap_server_types::{Flag, MailboxHeader, SearchKey, SequenceSet};
use tokio::io::{AsyncRead, AsyncWrite};

/// Verifies credentials. `LOGIN` and the `PLAIN`/`LOGIN` SASL mechanisms both
/// funnel into this.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    Ok { header: MailboxHeader, read_write: bool },
    NotExists,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Ok,
    NotExists,
    NotSelectable,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Ok { uid: u32 },
    NotExists,
    NotSelectable,
    Eof,
    Error(String),
}

/// One FETCH result row: the attributes rendered as the already-formatted
/// data-item text a `* n FETCH (...)` response needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub seq: u32,
    pub uid: u32,
    pub rendered_items: Vec<String>,
}

/// A running mailbox's per-message metadata and bytes. The backend owns the
/// actual message storage; the dispatcher only ever asks for rendered FETCH
/// items, never raw bytes directly.
#[async_trait]
pub trait MailboxStore: Send + Sync {
    async fn select(&self, user: &str, mailbox: &str) -> SelectOutcome;
    async fn create(&self, user: &str, mailbox: &str) -> MutationOutcome;
    async fn delete(&self, user: &str, mailbox: &str) -> MutationOutcome;
    async fn rename(&self, user: &str, from: &str, to: &str) -> MutationOutcome;
    async fn subscribe(&self, user: &str, mailbox: &str) -> MutationOutcome;
    async fn unsubscribe(&self, user: &str, mailbox: &str) -> MutationOutcome;
    async fn list(&self, user: &str, reference: &str, pattern: &str) -> Vec<String>;
    async fn lsub(&self, user: &str, reference: &str, pattern: &str) -> Vec<String>;
    async fn status(&self, user: &str, mailbox: &str) -> SelectOutcome;

    /// Streams `len` bytes of message literal directly out of `source`
    /// (the connection's own reader) into storage, without ever buffering
    /// the whole message in the dispatcher. See SPEC_FULL.md §4.3 "APPEND".
    async fn append(
        &self,
        user: &str,
        mailbox: &str,
        flags: &[Flag],
        source: &mut (dyn AsyncRead + Send + Unpin),
        len: u32,
    ) -> AppendOutcome;

    async fn check(&self, user: &str, mailbox: &str) -> MutationOutcome;
    async fn close(&self, user: &str, mailbox: &str) -> MutationOutcome;
    async fn expunge(&self, user: &str, mailbox: &str) -> Vec<u32>;
    async fn search(&self, user: &str, mailbox: &str, tree: &SearchKey, by_uid: bool) -> Vec<u32>;
    async fn fetch(
        &self,
        user: &str,
        mailbox: &str,
        sequence_set: &SequenceSet,
        attributes: &[imap_server_types::FetchAttr],
        by_uid: bool,
    ) -> Vec<FetchedMessage>;
    async fn store(
        &self,
        user: &str,
        mailbox: &str,
        sequence_set: &SequenceSet,
        op: imap_server_types::StoreOp,
        flags: &[Flag],
        by_uid: bool,
    ) -> Vec<(u32, Vec<Flag>)>;
    async fn copy(
        &self,
        user: &str,
        mailbox: &str,
        sequence_set: &SequenceSet,
        target: &str,
        by_uid: bool,
    ) -> MutationOutcome;
}

/// Upgrades a plain connection to TLS after `STARTTLS`. Boxed so the session
/// loop can hold either a plain `TcpStream` or a `TlsStream` behind the same
/// `AsyncRead + AsyncWrite` handle.
#[async_trait]
pub trait TlsUpgrade: Send + Sync {
    async fn upgrade(
        &self,
        stream: Box<dyn AsyncReadWrite>,
    ) -> std::io::Result<Box<dyn AsyncReadWrite>>;
}

/// Object-safe union of `AsyncRead + AsyncWrite`, needed because a plain
/// `TcpStream` and a `tokio_rustls::server::TlsStream<TcpStream>` are
/// otherwise unrelated concrete types.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncReadWrite for T {}
