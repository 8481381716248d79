//! Core of an async IMAP4rev1 server: a literal-aware wire reader, a
//! grammar parser, a session state machine, a command dispatcher, and the
//! cross-connection notification registry IDLE depends on. Mailbox storage,
//! account auth, and TLS termination are collaborator traits in
//! [`collaborators`]; [`memory`] is the in-process reference implementation
//! used by the default binary configuration and by the test suite.

pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod parser;
pub mod registry;
pub mod response_writer;
pub mod session;
pub mod session_loop;
pub mod wire;

pub use error::SessionError;
