use thiserror::Error;

/// The error taxonomy the core raises. Everything here is recoverable at the
/// session-loop boundary: a `SessionError` turns into a `Bad`/`No` response
/// and the loop continues, except where noted.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Parse(#[from] crate::parser::ParseError),

    #[error("command too long")]
    CommandTooLong,

    #[error("timed out waiting for literal")]
    LiteralTimeout,

    #[error("Expected DONE")]
    ExpectedDone,

    #[error("Bad Command")]
    StateViolation,

    #[error("mailbox does not exist")]
    BackendNotExists,

    #[error("mailbox is not selectable")]
    BackendNotSelectable,

    #[error("{0}")]
    BackendError(String),

    #[error("truncated message")]
    AppendTruncated,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
