//! Misuse-resistant data structures for the IMAP4rev1 command-processing core.
//!
//! This crate intentionally knows nothing about sockets, timeouts, or parsing: it only
//! defines the `Command`/`Response` vocabulary the wire parser produces and the
//! dispatcher consumes, plus the small value types (`Flag`, `SearchKey`, `SequenceSet`, ...)
//! those messages are built from.

pub mod command;
pub mod flag;
pub mod mailbox;
pub mod response;
pub mod sequence;

pub use command::{
    Command, CommandBody, CommandGroup, FetchAttr, SearchAtom, SearchKey, StatusItem, StoreOp,
};
pub use flag::Flag;
pub use mailbox::MailboxHeader;
pub use response::{Response, ResponseCode, Status, TaggedResponse};
pub use sequence::{SeqNum, SequenceSet};
