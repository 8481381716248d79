use crate::flag::Flag;

/// The three completion statuses a tagged response can carry, plus the two
/// kinds of untagged status response (`BYE`, `PREAUTH`) that never carry a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
    Bye,
    PreAuth,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::No => "NO",
            Status::Bad => "BAD",
            Status::Bye => "BYE",
            Status::PreAuth => "PREAUTH",
        }
    }
}

/// An optional bracketed response code, e.g. `[READ-WRITE]` or `[UIDNEXT 5]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    Alert,
    Capability(Vec<String>),
    Permanentflags(Vec<Flag>),
    Uidvalidity(String),
    Uidnext(u32),
    ReadWrite,
    ReadOnly,
    TryCreate,
}

impl ResponseCode {
    pub fn render(&self) -> String {
        match self {
            ResponseCode::Alert => "ALERT".to_string(),
            ResponseCode::Capability(caps) => format!("CAPABILITY {}", caps.join(" ")),
            ResponseCode::Permanentflags(flags) => {
                let rendered = flags.iter().map(|f| f.to_string()).collect::<Vec<_>>();
                format!("PERMANENTFLAGS ({})", rendered.join(" "))
            }
            ResponseCode::Uidvalidity(v) => format!("UIDVALIDITY {v}"),
            ResponseCode::Uidnext(v) => format!("UIDNEXT {v}"),
            ResponseCode::ReadWrite => "READ-WRITE".to_string(),
            ResponseCode::ReadOnly => "READ-ONLY".to_string(),
            ResponseCode::TryCreate => "TRYCREATE".to_string(),
        }
    }
}

/// A tagged completion response: the final word on a client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedResponse {
    pub tag: String,
    pub status: Status,
    pub code: Option<ResponseCode>,
    pub text: String,
}

impl TaggedResponse {
    pub fn ok(tag: impl Into<String>, text: impl Into<String>) -> Self {
        TaggedResponse {
            tag: tag.into(),
            status: Status::Ok,
            code: None,
            text: text.into(),
        }
    }

    pub fn no(tag: impl Into<String>, text: impl Into<String>) -> Self {
        TaggedResponse {
            tag: tag.into(),
            status: Status::No,
            code: None,
            text: text.into(),
        }
    }

    pub fn bad(tag: impl Into<String>, text: impl Into<String>) -> Self {
        TaggedResponse {
            tag: tag.into(),
            status: Status::Bad,
            code: None,
            text: text.into(),
        }
    }

    pub fn with_code(mut self, code: ResponseCode) -> Self {
        self.code = Some(code);
        self
    }
}

/// Everything a server connection can write, at the granularity the
/// dispatcher thinks in. `ResponseWriter` (in the core crate) turns these
/// into wire bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Tagged(TaggedResponse),
    /// `* [code] text`, e.g. `* 23 EXISTS`, `* FLAGS (...)`, or
    /// `* OK [UIDVALIDITY 1] UIDs valid`.
    Untagged { code: Option<ResponseCode>, text: String },
    /// `+ [text]`.
    Continuation(Option<String>),
}

impl Response {
    pub fn untagged(text: impl Into<String>) -> Self {
        Response::Untagged {
            code: None,
            text: text.into(),
        }
    }
}
