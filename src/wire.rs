//! Splices `{N}`/`{N+}` IMAP literals into a logical command buffer.
//!
//! Literal detection stays here, at the byte layer, on purpose: the grammar
//! parser in [`crate::parser`] only ever sees an already-spliced
//! [`RawCommand`], so it can stay a context-free recursive-descent parser
//! instead of a stateful one. See SPEC_FULL.md §4.1 and §9 ("Literal framing
//! in the lexer").

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SessionError;

/// Default cap on a command line, excluding an APPEND/LAPPEND literal
/// payload (which is bounded by `max_msg_size` instead). SPEC_FULL.md §6.
pub const MAX_COMMAND_SIZE: usize = 10 * 1024;

/// Per-chunk read timeout while a literal is in flight. SPEC_FULL.md §5.
pub const LITERAL_CHUNK_TIMEOUT: Duration = Duration::from_secs(5);

/// One piece of a logical command: either plain text (a command line with
/// literal markers stripped) or the raw bytes of a spliced-in literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Text(String),
    Literal(Vec<u8>),
}

/// A literal declared on an APPEND/LAPPEND command line. The reader does not
/// consume these bytes itself -- the storage backend streams them directly
/// out of the connection's reader. See SPEC_FULL.md §4.1, §4.3 "APPEND".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingLiteral {
    pub len: u32,
    pub non_synchronizing: bool,
}

/// One logical command as handed to the parser: a sequence of text/literal
/// chunks, plus an optional trailing APPEND/LAPPEND literal that the caller
/// must stream separately.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawCommand {
    pub chunks: Vec<Chunk>,
    pub pending_literal: Option<PendingLiteral>,
}

impl RawCommand {
    /// Concatenates the text chunks (not literals) for prefix matching and
    /// for handing to the parser's tag/verb tokenizer. Literal chunks are
    /// threaded through separately; see `parser::parse`.
    pub fn text_only(&self) -> String {
        self.chunks
            .iter()
            .filter_map(|c| match c {
                Chunk::Text(t) => Some(t.as_str()),
                Chunk::Literal(_) => None,
            })
            .collect()
    }
}

fn strip_crlf(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parses a trailing `{<digits>[+]?}` off a line, returning the prefix text,
/// the declared length, and whether it was the non-synchronizing (`+`)
/// variant.
fn match_literal_suffix(line: &str) -> Option<(&str, u32, bool)> {
    let line = line.strip_suffix('}')?;
    let (prefix, digits) = line.rsplit_once('{')?;
    let (digits, non_sync) = match digits.strip_suffix('+') {
        Some(d) => (d, true),
        None => (digits, false),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u32 = digits.parse().ok()?;
    Some((prefix, n, non_sync))
}

fn looks_like_append(text_so_far: &str) -> bool {
    let mut words = text_so_far.split_whitespace();
    let _tag = words.next();
    match words.next() {
        Some(verb) => verb.eq_ignore_ascii_case("APPEND") || verb.eq_ignore_ascii_case("LAPPEND"),
        None => false,
    }
}

/// Reads one logical command off `stream`, splicing in any literals per
/// SPEC_FULL.md §4.1. Returns `Ok(None)` on a clean EOF with nothing
/// half-read (not an error: the session simply ends). Takes a single
/// read+write handle, not a separate reader/writer pair, so callers can pass
/// one `BufReader<S>` without fighting the borrow checker over two `&mut`s
/// into the same object.
pub async fn read_logical_command<RW>(stream: &mut RW) -> Result<Option<RawCommand>, SessionError>
where
    RW: AsyncBufRead + AsyncWrite + Unpin,
{
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut total_len: usize = 0;

    loop {
        let mut line_bytes = Vec::new();
        let n = stream.read_until(b'\n', &mut line_bytes).await?;
        if n == 0 {
            return Ok(if chunks.is_empty() {
                None
            } else {
                Some(RawCommand {
                    chunks,
                    pending_literal: None,
                })
            });
        }

        let line = String::from_utf8_lossy(strip_crlf(&line_bytes)).into_owned();
        total_len += line.len();
        if total_len > MAX_COMMAND_SIZE {
            return Err(SessionError::CommandTooLong);
        }

        match match_literal_suffix(&line) {
            None => {
                chunks.push(Chunk::Text(line));
                return Ok(Some(RawCommand {
                    chunks,
                    pending_literal: None,
                }));
            }
            Some((prefix, needed, non_sync)) => {
                let so_far = {
                    let mut joined = chunks
                        .iter()
                        .filter_map(|c| match c {
                            Chunk::Text(t) => Some(t.as_str()),
                            Chunk::Literal(_) => None,
                        })
                        .collect::<String>();
                    joined.push_str(prefix);
                    joined
                };

                if chunks.is_empty() && looks_like_append(&so_far) {
                    chunks.push(Chunk::Text(prefix.to_string()));
                    return Ok(Some(RawCommand {
                        chunks,
                        pending_literal: Some(PendingLiteral {
                            len: needed,
                            non_synchronizing: non_sync,
                        }),
                    }));
                }

                if total_len + needed as usize > MAX_COMMAND_SIZE {
                    return Err(SessionError::CommandTooLong);
                }

                chunks.push(Chunk::Text(prefix.to_string()));

                if !non_sync {
                    stream.write_all(b"+ \r\n").await?;
                    stream.flush().await?;
                }

                let mut literal = vec![0u8; needed as usize];
                read_literal_with_timeout(stream, &mut literal).await?;
                total_len += literal.len();
                chunks.push(Chunk::Literal(literal));
                // Loop again: more trailing text (and maybe another literal)
                // may follow on the next line.
            }
        }
    }
}

async fn read_literal_with_timeout<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), SessionError>
where
    R: AsyncBufRead + Unpin,
{
    tokio::time::timeout(LITERAL_CHUNK_TIMEOUT, reader.read_exact(buf))
        .await
        .map_err(|_| SessionError::LiteralTimeout)?
        .map_err(SessionError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, BufReader, ReadBuf};

    /// A fixed input buffer plus an output sink, combined into one
    /// `AsyncBufRead + AsyncWrite` object the way a real socket would be.
    struct FakeStream {
        input: std::io::Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl AsyncRead for FakeStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let mut tmp = vec![0u8; buf.remaining()];
            let n = std::io::Read::read(&mut self.input, &mut tmp).unwrap_or(0);
            buf.put_slice(&tmp[..n]);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for FakeStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.output.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn read_one(input: &[u8]) -> (Option<RawCommand>, Vec<u8>) {
        let mut stream = BufReader::new(FakeStream {
            input: std::io::Cursor::new(input.to_vec()),
            output: Vec::new(),
        });
        let result = read_logical_command(&mut stream).await.unwrap();
        (result, stream.into_inner().output)
    }

    #[tokio::test]
    async fn plain_line_with_no_literal() {
        let (cmd, written) = read_one(b"a001 NOOP\r\n").await;
        let cmd = cmd.unwrap();
        assert_eq!(cmd.text_only(), "a001 NOOP");
        assert!(cmd.pending_literal.is_none());
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn synchronizing_literal_is_spliced_and_acked() {
        let (cmd, written) = read_one(b"a001 LOGIN {5}\r\nalice {6}\r\nsecret\r\n").await;
        let cmd = cmd.unwrap();
        assert_eq!(
            cmd.chunks,
            vec![
                Chunk::Text("a001 LOGIN ".to_string()),
                Chunk::Literal(b"alice".to_vec()),
                Chunk::Text(" ".to_string()),
                Chunk::Literal(b"secret".to_vec()),
                Chunk::Text(String::new()),
            ]
        );
        // Two literals, so two continuation prompts.
        assert_eq!(written, b"+ \r\n+ \r\n");
    }

    #[tokio::test]
    async fn non_synchronizing_literal_is_not_acked() {
        let (cmd, written) = read_one(b"a001 LOGIN {5+}\r\nalice {1+}\r\nx\r\n").await;
        assert!(cmd.is_some());
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn append_literal_is_not_consumed_by_the_reader() {
        let (cmd, written) = read_one(b"a001 APPEND INBOX {5}\r\n").await;
        let cmd = cmd.unwrap();
        assert_eq!(cmd.text_only(), "a001 APPEND INBOX ");
        assert_eq!(
            cmd.pending_literal,
            Some(PendingLiteral {
                len: 5,
                non_synchronizing: false
            })
        );
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn lappend_literal_is_also_exempt() {
        let (cmd, _) = read_one(b"a001 lappend bob INBOX {3}\r\n").await;
        let cmd = cmd.unwrap();
        assert!(cmd.pending_literal.is_some());
    }

    #[tokio::test]
    async fn oversized_literal_is_rejected() {
        let mut stream = BufReader::new(FakeStream {
            input: std::io::Cursor::new(b"a001 FOO {20000}\r\n".to_vec()),
            output: Vec::new(),
        });
        let err = read_logical_command(&mut stream).await.unwrap_err();
        assert!(matches!(err, SessionError::CommandTooLong));
    }

    #[tokio::test]
    async fn clean_eof_with_nothing_buffered_is_not_an_error() {
        let (cmd, _) = read_one(b"").await;
        assert!(cmd.is_none());
    }
}
