//! Turns one parsed [`Command`] into the sequence of [`Response`]s it
//! produces, against the [`AccountStore`]/[`MailboxStore`] collaborators.
//! State transitions (`ctx.state`, `ctx.idle`) are the dispatcher's to make;
//! the actual IDLE wait loop and LOGOUT teardown live in
//! [`crate::session_loop`], which reads `ctx` back after each call.

use std::sync::Arc;

use imap_server_types::{Command, CommandBody, Response, ResponseCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::collaborators::{AccountStore, AppendOutcome, MailboxStore, MutationOutcome, SelectOutcome};
use crate::error::SessionError;
use crate::registry::ConnectionRegistry;
use crate::response_writer::{bad, no, ok};
use crate::session::{IdleState, SessionContext, SessionState};

pub struct Dispatcher {
    pub accounts: Arc<dyn AccountStore>,
    pub mailboxes: Arc<dyn MailboxStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub capabilities_unauthenticated: Vec<String>,
    pub capabilities_authenticated: Vec<String>,
    pub max_msg_size: u32,
    /// Whether a `TlsUpgrade` backend was configured for this server. STARTTLS
    /// must not advertise an upgrade it can't actually perform.
    pub starttls_available: bool,
}

impl Dispatcher {
    fn capabilities_for(&self, ctx: &SessionContext) -> Vec<String> {
        match ctx.state {
            SessionState::NotAuthenticated => self.capabilities_unauthenticated.clone(),
            _ => self.capabilities_authenticated.clone(),
        }
    }

    pub async fn dispatch<R>(
        &self,
        ctx: &mut SessionContext,
        cmd: Command,
        reader: &mut R,
    ) -> Vec<Response>
    where
        R: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let tag = cmd.tag.clone();

        if matches!(cmd.body, CommandBody::Done) {
            return self.dispatch_done(ctx);
        }

        if !ctx.state.permits(cmd.body.group()) {
            return vec![bad(&tag, format!("{} not allowed in this state", cmd.body.name()))];
        }

        match cmd.body {
            CommandBody::Capability => {
                let caps = self.capabilities_for(ctx);
                vec![
                    Response::untagged(format!("CAPABILITY {}", caps.join(" "))),
                    ok(&tag, "CAPABILITY completed"),
                ]
            }
            CommandBody::Noop => vec![ok(&tag, "NOOP completed")],
            CommandBody::Id(_) => vec![
                Response::untagged("ID NIL"),
                ok(&tag, "ID completed"),
            ],
            CommandBody::Logout => {
                ctx.state = SessionState::Logout;
                vec![
                    Response::Untagged {
                        code: None,
                        text: "BYE logging out".into(),
                    },
                    ok(&tag, "LOGOUT completed"),
                ]
            }

            CommandBody::StartTls => {
                if !self.starttls_available {
                    vec![bad(&tag, "STARTTLS not available")]
                } else {
                    // The actual socket upgrade happens in the session loop,
                    // which owns the stream; the dispatcher only confirms.
                    vec![ok(&tag, "begin TLS negotiation now")]
                }
            }
            CommandBody::Authenticate { mechanism, initial_response } => {
                self.dispatch_authenticate(ctx, &tag, &mechanism, initial_response).await
            }
            CommandBody::Login { username, password } => {
                if self.accounts.authenticate(&username, &password).await {
                    ctx.state = SessionState::Authenticated;
                    ctx.username = Some(username);
                    vec![ok(&tag, "LOGIN completed")]
                } else {
                    vec![no(&tag, "LOGIN failed")]
                }
            }
            CommandBody::LAppend { user, mailbox, flags, literal_len, non_synchronizing, .. } => {
                self.dispatch_append(ctx, &tag, &user, &mailbox, &flags, literal_len, non_synchronizing, reader)
                    .await
            }

            CommandBody::Select(mailbox) => self.dispatch_select_examine(ctx, &tag, &mailbox, true).await,
            CommandBody::Examine(mailbox) => self.dispatch_select_examine(ctx, &tag, &mailbox, false).await,
            CommandBody::Create(mailbox) => {
                let user = ctx.username.clone().unwrap_or_default();
                self.mutation_response(&tag, "CREATE", self.mailboxes.create(&user, &mailbox).await)
            }
            CommandBody::Delete(mailbox) => {
                let user = ctx.username.clone().unwrap_or_default();
                self.mutation_response(&tag, "DELETE", self.mailboxes.delete(&user, &mailbox).await)
            }
            CommandBody::Rename { from, to } => {
                let user = ctx.username.clone().unwrap_or_default();
                self.mutation_response(&tag, "RENAME", self.mailboxes.rename(&user, &from, &to).await)
            }
            CommandBody::Subscribe(mailbox) => {
                let user = ctx.username.clone().unwrap_or_default();
                self.mutation_response(&tag, "SUBSCRIBE", self.mailboxes.subscribe(&user, &mailbox).await)
            }
            CommandBody::Unsubscribe(mailbox) => {
                let user = ctx.username.clone().unwrap_or_default();
                self.mutation_response(&tag, "UNSUBSCRIBE", self.mailboxes.unsubscribe(&user, &mailbox).await)
            }
            CommandBody::List { reference, pattern } => {
                let user = ctx.username.clone().unwrap_or_default();
                let names = self.mailboxes.list(&user, &reference, &pattern).await;
                let mut out: Vec<Response> = names
                    .into_iter()
                    .map(|n| Response::untagged(format!("LIST () \"/\" {n}")))
                    .collect();
                out.push(ok(&tag, "LIST completed"));
                out
            }
            CommandBody::Lsub { reference, pattern } => {
                let user = ctx.username.clone().unwrap_or_default();
                let names = self.mailboxes.lsub(&user, &reference, &pattern).await;
                let mut out: Vec<Response> = names
                    .into_iter()
                    .map(|n| Response::untagged(format!("LSUB () \"/\" {n}")))
                    .collect();
                out.push(ok(&tag, "LSUB completed"));
                out
            }
            CommandBody::Status { mailbox, items } => {
                let user = ctx.username.clone().unwrap_or_default();
                match self.mailboxes.status(&user, &mailbox).await {
                    SelectOutcome::Ok { header, .. } => {
                        let rendered = items
                            .iter()
                            .map(|item| render_status_item(*item, &header))
                            .collect::<Vec<_>>()
                            .join(" ");
                        vec![
                            Response::untagged(format!("STATUS {mailbox} ({rendered})")),
                            ok(&tag, "STATUS completed"),
                        ]
                    }
                    SelectOutcome::NotExists => vec![no(&tag, "mailbox does not exist")],
                    SelectOutcome::Error(e) => vec![no(&tag, e)],
                }
            }
            CommandBody::Append { mailbox, flags, literal_len, non_synchronizing, .. } => {
                let user = ctx.username.clone().unwrap_or_default();
                self.dispatch_append(ctx, &tag, &user, &mailbox, &flags, literal_len, non_synchronizing, reader)
                    .await
            }
            CommandBody::Idle => {
                ctx.idle = IdleState::Idling { tag };
                vec![Response::Continuation(Some("idling".into()))]
            }
            CommandBody::Done => unreachable!("handled above"),

            CommandBody::Check => {
                let user = ctx.username.clone().unwrap_or_default();
                let mailbox = ctx.selected_mailbox.clone().unwrap_or_default();
                self.mutation_response(&tag, "CHECK", self.mailboxes.check(&user, &mailbox).await)
            }
            CommandBody::Close => {
                let user = ctx.username.clone().unwrap_or_default();
                let mailbox = ctx.selected_mailbox.clone().unwrap_or_default();
                let result = self.mailboxes.close(&user, &mailbox).await;
                ctx.state = SessionState::Authenticated;
                ctx.selected_mailbox = None;
                self.mutation_response(&tag, "CLOSE", result)
            }
            CommandBody::Expunge => {
                let user = ctx.username.clone().unwrap_or_default();
                let mailbox = ctx.selected_mailbox.clone().unwrap_or_default();
                let expunged = self.mailboxes.expunge(&user, &mailbox).await;
                let mut out: Vec<Response> = expunged
                    .iter()
                    .map(|seq| Response::untagged(format!("{seq} EXPUNGE")))
                    .collect();
                for seq in &expunged {
                    self.registry
                        .notify_mailbox(&user, &mailbox, ctx.id, Response::untagged(format!("{seq} EXPUNGE")))
                        .await;
                }
                out.push(ok(&tag, "EXPUNGE completed"));
                out
            }
            CommandBody::Search { tree, by_uid, .. } => {
                let user = ctx.username.clone().unwrap_or_default();
                let mailbox = ctx.selected_mailbox.clone().unwrap_or_default();
                let hits = self.mailboxes.search(&user, &mailbox, &tree, by_uid).await;
                let rendered = hits.iter().map(u32::to_string).collect::<Vec<_>>().join(" ");
                vec![
                    Response::untagged(format!("SEARCH {rendered}")),
                    ok(&tag, "SEARCH completed"),
                ]
            }
            CommandBody::Fetch { sequence_set, attributes, by_uid } => {
                let user = ctx.username.clone().unwrap_or_default();
                let mailbox = ctx.selected_mailbox.clone().unwrap_or_default();
                let rows = self
                    .mailboxes
                    .fetch(&user, &mailbox, &sequence_set, &attributes, by_uid)
                    .await;
                let mut out: Vec<Response> = rows
                    .iter()
                    .map(|row| {
                        Response::untagged(format!(
                            "{} FETCH ({})",
                            row.seq,
                            row.rendered_items.join(" ")
                        ))
                    })
                    .collect();
                out.push(ok(&tag, "FETCH completed"));
                out
            }
            CommandBody::Store { sequence_set, op, silent, flags, by_uid } => {
                let user = ctx.username.clone().unwrap_or_default();
                let mailbox = ctx.selected_mailbox.clone().unwrap_or_default();
                let results = self
                    .mailboxes
                    .store(&user, &mailbox, &sequence_set, op, &flags, by_uid)
                    .await;
                let mut out = Vec::new();
                if !silent {
                    for (seq, flags) in &results {
                        let rendered = flags.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(" ");
                        out.push(Response::untagged(format!("{seq} FETCH (FLAGS ({rendered}))")));
                    }
                }
                for (seq, flags) in &results {
                    let rendered = flags.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(" ");
                    self.registry
                        .notify_mailbox(
                            &user,
                            &mailbox,
                            ctx.id,
                            Response::untagged(format!("{seq} FETCH (FLAGS ({rendered}))")),
                        )
                        .await;
                }
                out.push(ok(&tag, "STORE completed"));
                out
            }
            CommandBody::Copy { sequence_set, mailbox: target, by_uid } => {
                let user = ctx.username.clone().unwrap_or_default();
                let mailbox = ctx.selected_mailbox.clone().unwrap_or_default();
                let result = self
                    .mailboxes
                    .copy(&user, &mailbox, &sequence_set, &target, by_uid)
                    .await;
                self.mutation_response(&tag, "COPY", result)
            }
        }
    }

    fn dispatch_done(&self, ctx: &mut SessionContext) -> Vec<Response> {
        match std::mem::replace(&mut ctx.idle, IdleState::NotIdling) {
            IdleState::Idling { tag } => vec![ok(&tag, "IDLE completed")],
            IdleState::NotIdling => vec![bad("*", "DONE without IDLE")],
        }
    }

    async fn dispatch_authenticate(
        &self,
        ctx: &mut SessionContext,
        tag: &str,
        mechanism: &str,
        initial_response: Option<Vec<u8>>,
    ) -> Vec<Response> {
        if !mechanism.eq_ignore_ascii_case("PLAIN") {
            return vec![no(tag, "unsupported SASL mechanism")];
        }
        let Some(payload) = initial_response else {
            return vec![no(tag, "SASL-IR required")];
        };
        let Some((username, password)) = parse_sasl_plain(&payload) else {
            return vec![bad(tag, "malformed PLAIN response")];
        };
        if self.accounts.authenticate(&username, &password).await {
            ctx.state = SessionState::Authenticated;
            ctx.username = Some(username);
            vec![ok(tag, "AUTHENTICATE completed")]
        } else {
            vec![no(tag, "AUTHENTICATE failed")]
        }
    }

    async fn dispatch_select_examine(
        &self,
        ctx: &mut SessionContext,
        tag: &str,
        mailbox: &str,
        writable_requested: bool,
    ) -> Vec<Response> {
        let user = ctx.username.clone().unwrap_or_default();
        match self.mailboxes.select(&user, mailbox).await {
            SelectOutcome::Ok { header, read_write } => {
                if !header.has_valid_uidvalidity() {
                    return vec![no(tag, "could not determine UIDVALIDITY")];
                }
                let read_write = read_write && writable_requested;
                ctx.state = SessionState::Selected;
                ctx.selected_mailbox = Some(mailbox.to_string());
                ctx.read_write = read_write;

                let verb = if writable_requested { "SELECT" } else { "EXAMINE" };
                let code = if read_write {
                    ResponseCode::ReadWrite
                } else {
                    ResponseCode::ReadOnly
                };
                vec![
                    Response::untagged(format!(
                        "FLAGS ({})",
                        selectable_flags().iter().map(|f| f.to_string()).collect::<Vec<_>>().join(" ")
                    )),
                    Response::Untagged {
                        code: Some(ResponseCode::Permanentflags(permanent_flags())),
                        text: "Flags permitted".into(),
                    },
                    Response::untagged(format!("{} EXISTS", header.count)),
                    Response::untagged(format!("{} RECENT", header.recent)),
                    Response::Untagged {
                        code: Some(ResponseCode::Uidvalidity(header.uidvalidity.clone())),
                        text: "UIDs valid".into(),
                    },
                    Response::Untagged {
                        code: Some(ResponseCode::Uidnext(header.uidnext)),
                        text: "Predicted next UID".into(),
                    },
                    Response::Tagged(imap_server_types::TaggedResponse::ok(
                        tag,
                        format!("{verb} completed"),
                    ))
                    .with_select_code(code),
                ]
            }
            SelectOutcome::NotExists => vec![no(tag, "mailbox does not exist")],
            SelectOutcome::Error(e) => vec![no(tag, e)],
        }
    }

    async fn dispatch_append<R>(
        &self,
        ctx: &mut SessionContext,
        tag: &str,
        user: &str,
        mailbox: &str,
        flags: &[imap_server_types::Flag],
        literal_len: u32,
        non_synchronizing: bool,
        reader: &mut R,
    ) -> Vec<Response>
    where
        R: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if literal_len > self.max_msg_size {
            return vec![no(tag, "message too large")];
        }
        if !non_synchronizing {
            // The wire reader leaves APPEND/LAPPEND literals unconsumed so
            // the bytes can stream straight into storage; that means this
            // call site, not the reader, owns sending the synchronizing
            // continuation the client is waiting on (RFC 3501 §7.5).
            if let Err(e) = reader.write_all(b"+ \r\n").await {
                return vec![bad(tag, SessionError::Io(e).to_string())];
            }
            if let Err(e) = reader.flush().await {
                return vec![bad(tag, SessionError::Io(e).to_string())];
            }
        }
        match self
            .mailboxes
            .append(user, mailbox, flags, reader, literal_len)
            .await
        {
            AppendOutcome::Ok { uid: _ } => {
                // The append changed EXISTS/RECENT for this mailbox; tell it
                // to every other idling connection of the same user, with
                // the actual post-append counts (SPEC_FULL.md §4.4), not a
                // bare marker.
                if let SelectOutcome::Ok { header, .. } = self.mailboxes.select(user, mailbox).await {
                    self.registry
                        .notify_mailbox(user, mailbox, ctx.id, Response::untagged(format!("{} EXISTS", header.count)))
                        .await;
                    self.registry
                        .notify_mailbox(user, mailbox, ctx.id, Response::untagged(format!("{} RECENT", header.recent)))
                        .await;
                }
                vec![ok(tag, "APPEND completed")]
            }
            AppendOutcome::NotExists => vec![Response::Tagged(
                imap_server_types::TaggedResponse::no(tag, "mailbox does not exist")
                    .with_code(ResponseCode::TryCreate),
            )],
            AppendOutcome::NotSelectable => vec![no(tag, "mailbox is not selectable")],
            AppendOutcome::Eof => {
                // The client stream went away mid-literal; there's nothing
                // left to read a further command from.
                ctx.state = SessionState::Logout;
                vec![no(tag, "Truncated Message")]
            }
            AppendOutcome::Error(e) => vec![no(tag, e)],
        }
    }

    fn mutation_response(&self, tag: &str, verb: &str, outcome: MutationOutcome) -> Vec<Response> {
        match outcome {
            MutationOutcome::Ok => vec![ok(tag, format!("{verb} completed"))],
            MutationOutcome::NotExists => vec![no(tag, "mailbox does not exist")],
            MutationOutcome::NotSelectable => vec![no(tag, "mailbox is not selectable")],
            MutationOutcome::Error(e) => vec![no(tag, e)],
        }
    }
}

/// The system flags every mailbox this server exposes accepts on STORE.
/// There's no per-mailbox flag schema in this implementation, so SELECT's
/// `FLAGS` and `PERMANENTFLAGS` preludes are this fixed set for every mailbox.
fn selectable_flags() -> Vec<imap_server_types::Flag> {
    use imap_server_types::Flag::*;
    vec![Seen, Answered, Flagged, Deleted, Draft]
}

fn permanent_flags() -> Vec<imap_server_types::Flag> {
    selectable_flags()
}

fn render_status_item(item: imap_server_types::StatusItem, header: &imap_server_types::MailboxHeader) -> String {
    use imap_server_types::StatusItem::*;
    match item {
        Messages => format!("MESSAGES {}", header.count),
        Recent => format!("RECENT {}", header.recent),
        Uidnext => format!("UIDNEXT {}", header.uidnext),
        Uidvalidity => format!("UIDVALIDITY {}", header.uidvalidity),
        Unseen => format!("UNSEEN {}", header.nunseen),
    }
}

/// Decodes a SASL PLAIN response: `authzid \0 authcid \0 password`.
fn parse_sasl_plain(payload: &[u8]) -> Option<(String, String)> {
    let mut parts = payload.split(|&b| b == 0);
    let _authzid = parts.next()?;
    let authcid = parts.next()?;
    let password = parts.next()?;
    Some((
        String::from_utf8(authcid.to_vec()).ok()?,
        String::from_utf8(password.to_vec()).ok()?,
    ))
}

trait TaggedResponseExt {
    fn with_select_code(self, code: ResponseCode) -> Response;
}

impl TaggedResponseExt for Response {
    fn with_select_code(self, code: ResponseCode) -> Response {
        match self {
            Response::Tagged(t) => Response::Tagged(t.with_code(code)),
            other => other,
        }
    }
}
