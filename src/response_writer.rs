//! Formats [`Response`] values onto the wire. The inverse of [`crate::wire`]
//! and [`crate::parser`]: those turn bytes into typed commands, this turns
//! typed responses back into bytes.

use imap_server_types::{Response, TaggedResponse};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::SessionError;

/// Writes one response line (or, for `Continuation`, the raw `+` prompt) and
/// flushes. Flushing per-response keeps IDLE notifications (written from a
/// different task than the session loop) from sitting in a buffer.
pub async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let line = render(response);
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

pub fn render(response: &Response) -> String {
    match response {
        Response::Tagged(TaggedResponse {
            tag,
            status,
            code,
            text,
        }) => {
            let mut s = format!("{tag} {}", status.as_str());
            if let Some(code) = code {
                s.push_str(" [");
                s.push_str(&code.render());
                s.push(']');
            }
            s.push(' ');
            s.push_str(text);
            s.push_str("\r\n");
            s
        }
        Response::Untagged { code, text } => {
            let mut s = "* ".to_string();
            if let Some(code) = code {
                // Every untagged response code this crate produces
                // (UIDVALIDITY, UIDNEXT) rides on an implicit untagged OK,
                // per RFC 3501 §7.1: `* OK [UIDVALIDITY 1] UIDs valid`.
                s.push_str("OK [");
                s.push_str(&code.render());
                s.push_str("] ");
            }
            s.push_str(text);
            s.push_str("\r\n");
            s
        }
        Response::Continuation(text) => match text {
            Some(text) => format!("+ {text}\r\n"),
            None => "+ \r\n".to_string(),
        },
    }
}

pub fn ok(tag: &str, text: impl Into<String>) -> Response {
    Response::Tagged(TaggedResponse::ok(tag, text))
}

pub fn no(tag: &str, text: impl Into<String>) -> Response {
    Response::Tagged(TaggedResponse::no(tag, text))
}

pub fn bad(tag: &str, text: impl Into<String>) -> Response {
    Response::Tagged(TaggedResponse::bad(tag, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use imap_server_types::ResponseCode;

    #[test]
    fn renders_tagged_ok() {
        let r = ok("a001", "LOGIN completed");
        assert_eq!(render(&r), "a001 OK LOGIN completed\r\n");
    }

    #[test]
    fn renders_untagged_with_code() {
        let r = Response::Untagged {
            code: Some(ResponseCode::Uidnext(5)),
            text: "Predicted next UID".into(),
        };
        assert_eq!(render(&r), "* OK [UIDNEXT 5] Predicted next UID\r\n");
    }

    #[test]
    fn renders_tagged_with_code() {
        let r = Response::Tagged(TaggedResponse::ok("a1", "SELECT completed").with_code(ResponseCode::ReadWrite));
        assert_eq!(render(&r), "a1 OK [READ-WRITE] SELECT completed\r\n");
    }

    #[test]
    fn renders_continuation() {
        assert_eq!(render(&Response::Continuation(None)), "+ \r\n");
        assert_eq!(
            render(&Response::Continuation(Some("idling".into()))),
            "+ idling\r\n"
        );
    }
}
