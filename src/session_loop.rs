//! Drives one connection end to end: read a logical command, parse it,
//! dispatch it, write the responses, repeat until `LOGOUT` or EOF. Also
//! implements the one piece of real concurrency on a connection -- the
//! `IDLE` wait, which must watch the socket (for `DONE`) and the
//! [`crate::registry::ConnectionRegistry`] (for notifications) at once.

use std::sync::Arc;
use std::time::Duration;

use imap_server_types::{CommandBody, Response, Status, TaggedResponse};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::collaborators::{AsyncReadWrite, TlsUpgrade};
use crate::dispatch::Dispatcher;
use crate::error::SessionError;
use crate::registry::ConnectionRegistry;
use crate::response_writer::write_response;
use crate::session::{IdleState, SessionContext, SessionState};
use crate::wire::read_logical_command;

pub struct SessionParams {
    pub id: u64,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<ConnectionRegistry>,
    pub tls: Option<Arc<dyn TlsUpgrade>>,
    pub idle_timeout: Duration,
}

/// Runs one connection. Logs and swallows I/O errors at this boundary --
/// there's no client left to report them to once the socket is dead.
pub async fn run_session(params: SessionParams, stream: Box<dyn AsyncReadWrite>) {
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();

    if let Err(e) = drive(&params, stream, &notify_tx, notify_rx).await {
        log::warn!("connection {} ended with error: {e}", params.id);
    }
}

async fn drive(
    params: &SessionParams,
    stream: Box<dyn AsyncReadWrite>,
    notify_tx: &mpsc::UnboundedSender<Response>,
    mut notify_rx: mpsc::UnboundedReceiver<Response>,
) -> Result<(), SessionError> {
    let mut ctx = SessionContext::new(params.id);
    let mut reader = BufReader::new(stream);

    write_response(&mut reader, &Response::untagged("OK IMAP4rev1 ready")).await?;

    loop {
        let cmd_result = tokio::time::timeout(params.idle_timeout, read_logical_command(&mut reader)).await;
        let raw = match cmd_result {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                // No command tag was readable yet -- "*" is the untagged
                // marker, not a real tag, the same convention used for
                // parse errors below.
                write_response(&mut reader, &crate::response_writer::bad("*", e.to_string())).await?;
                if matches!(e, SessionError::CommandTooLong) {
                    continue;
                }
                break;
            }
            Err(_) => break, // idle_timeout elapsed with nothing read: drop the connection
        };

        let cmd = match crate::parser::parse(&raw) {
            Ok(cmd) => cmd,
            Err(e) => {
                write_response(&mut reader, &crate::response_writer::bad("*", e.to_string())).await?;
                continue;
            }
        };

        drain_notifications(&mut reader, &mut notify_rx).await?;

        let is_starttls = matches!(cmd.body, CommandBody::StartTls);
        let responses = params.dispatcher.dispatch(&mut ctx, cmd, &mut reader).await;
        for response in &responses {
            write_response(&mut reader, response).await?;
        }

        if ctx.state == SessionState::Logout {
            break;
        }

        if is_starttls && succeeded(&responses) {
            match &params.tls {
                Some(tls) => {
                    // Any bytes already buffered past the STARTTLS line would
                    // be a pipelining violation (RFC 3501 §6.2.1); a
                    // compliant client never sends more until it sees this
                    // response, so dropping the (empty) buffer is safe.
                    let inner = reader.into_inner();
                    let upgraded = tls.upgrade(inner).await?;
                    reader = BufReader::new(upgraded);
                }
                // The dispatcher only emits a successful STARTTLS response
                // when a TLS backend is configured, so this is unreachable
                // in practice; bail out defensively rather than pretend the
                // upgrade happened.
                None => break,
            }
        }

        if matches!(ctx.idle, IdleState::Idling { .. }) {
            run_idle(params, &mut reader, &mut ctx, notify_tx, &mut notify_rx).await?;
            if ctx.state == SessionState::Logout {
                break;
            }
        }
    }

    Ok(())
}

fn succeeded(responses: &[Response]) -> bool {
    matches!(
        responses.last(),
        Some(Response::Tagged(TaggedResponse { status: Status::Ok, .. }))
    )
}

/// Delivers any notifications queued since the last command without
/// blocking -- real servers interleave these as untagged data ahead of a
/// command's tagged completion.
async fn drain_notifications<W>(
    writer: &mut W,
    notify_rx: &mut mpsc::UnboundedReceiver<Response>,
) -> Result<(), SessionError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Ok(response) = notify_rx.try_recv() {
        write_response(writer, &response).await?;
    }
    Ok(())
}

/// Waits for `DONE` (from the client) or a notification (from another
/// connection's task), whichever comes first. Only the read-half future
/// borrows `reader` at any moment, so this needs no separate read/write
/// halves despite running two futures over the same stream.
///
/// The connection is only visible to [`ConnectionRegistry`] for the
/// duration of this call -- registered with the user/mailbox it had
/// selected at the moment it entered IDLE, and removed again no matter how
/// the wait ends (`DONE`, a protocol violation, or an I/O error).
async fn run_idle<S>(
    params: &SessionParams,
    reader: &mut BufReader<S>,
    ctx: &mut SessionContext,
    notify_tx: &mpsc::UnboundedSender<Response>,
    notify_rx: &mut mpsc::UnboundedReceiver<Response>,
) -> Result<(), SessionError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    let user = ctx.username.clone().unwrap_or_default();
    let mailbox = ctx.selected_mailbox.clone();
    params.registry.register(params.id, user, mailbox, notify_tx.clone()).await;

    let result = run_idle_wait(params, reader, ctx, notify_rx).await;

    params.registry.unregister(params.id).await;
    result
}

async fn run_idle_wait<S>(
    params: &SessionParams,
    reader: &mut BufReader<S>,
    ctx: &mut SessionContext,
    notify_rx: &mut mpsc::UnboundedReceiver<Response>,
) -> Result<(), SessionError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    loop {
        let mut line = Vec::new();
        tokio::select! {
            n = reader.read_until(b'\n', &mut line) => {
                let n = n?;
                if n == 0 {
                    return Err(SessionError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof during idle")));
                }
                let text = String::from_utf8_lossy(&line);
                if text.trim_end().eq_ignore_ascii_case("DONE") {
                    let raw = crate::wire::RawCommand {
                        chunks: vec![crate::wire::Chunk::Text(text.trim_end().to_string())],
                        pending_literal: None,
                    };
                    let cmd = crate::parser::parse(&raw).map_err(SessionError::Parse)?;
                    let responses = params.dispatcher.dispatch(ctx, cmd, reader).await;
                    for response in &responses {
                        write_response(reader, response).await?;
                    }
                    return Ok(());
                }
                // Any input other than DONE while idling is a fatal protocol
                // violation (SPEC_FULL.md §3 Invariants): reject it tagged
                // with the pending IDLE's own tag and tear the session down,
                // rather than keep waiting.
                let idle_tag = match &ctx.idle {
                    IdleState::Idling { tag } => tag.clone(),
                    IdleState::NotIdling => unreachable!("run_idle only runs while idling"),
                };
                write_response(reader, &crate::response_writer::bad(&idle_tag, "Expected DONE")).await?;
                ctx.idle = IdleState::NotIdling;
                return Err(SessionError::ExpectedDone);
            }
            Some(notification) = notify_rx.recv() => {
                write_response(reader, &notification).await?;
            }
        }
    }
}
