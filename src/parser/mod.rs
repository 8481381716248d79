//! Tokenizes and parses a spliced [`RawCommand`] into a [`Command`].
//!
//! Tokenization uses `nom` combinators (atoms, quoted strings, parenthesized
//! groups, `BODY[section]` specifiers); the per-verb grammar above that is a
//! straightforward token-stream walk, the same split duesee-imap-codec uses
//! between its `nom`-based lexer and its typed command builders.

mod lexer;
mod search;

use imap_server_types::{
    Command, CommandBody, FetchAttr, SequenceSet, StatusItem, StoreOp,
};
use thiserror::Error;

use crate::wire::{PendingLiteral, RawCommand};
use lexer::{tokenize, Tok};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("{0}")]
    SyntaxError(String),
    #[error("Bad Command")]
    BadCommand,
    #[error("invalid sequence set")]
    InvalidSequence,
    #[error("invalid date")]
    InvalidDate,
}

/// A cursor over the token stream. Every verb parser below consumes tokens
/// off the front and reports `SyntaxError`/`BadCommand` on mismatch.
struct Tokens<'a> {
    toks: &'a [Tok],
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(toks: &'a [Tok]) -> Self {
        Tokens { toks, pos: 0 }
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<&Tok> {
        let t = self.toks.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn expect_word(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Tok::Atom(s)) => Ok(s.clone()),
            Some(Tok::Str(s)) => Ok(s.clone()),
            _ => Err(ParseError::SyntaxError("expected a word".into())),
        }
    }

    fn expect_atom(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Tok::Atom(s)) => Ok(s.clone()),
            _ => Err(ParseError::SyntaxError("expected an atom".into())),
        }
    }

    fn expect_lparen(&mut self) -> Result<(), ParseError> {
        match self.next() {
            Some(Tok::LParen) => Ok(()),
            _ => Err(ParseError::SyntaxError("expected (".into())),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ParseError> {
        match self.next() {
            Some(Tok::RParen) => Ok(()),
            _ => Err(ParseError::SyntaxError("expected )".into())),
        }
    }

    fn eat_atom_ci(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Atom(a)) if a.eq_ignore_ascii_case(word)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

/// Parses one already-spliced command buffer. `pending_literal` carries the
/// length of an APPEND/LAPPEND literal the `WireReader` deliberately did not
/// consume.
pub fn parse(raw: &RawCommand) -> Result<Command, ParseError> {
    let toks = tokenize(raw)?;
    let mut t = Tokens::new(&toks);

    // DONE has no tag: the wire form is a bare "DONE\r\n" sent as a
    // continuation of a pending IDLE, not a new tagged command.
    if toks.len() == 1 {
        if let Tok::Atom(a) = &toks[0] {
            if a.eq_ignore_ascii_case("DONE") {
                return Ok(Command {
                    tag: String::new(),
                    body: CommandBody::Done,
                });
            }
        }
    }

    let tag = t.expect_atom().map_err(|_| ParseError::BadCommand)?;
    let mut verb = t.expect_atom().map_err(|_| ParseError::BadCommand)?;

    let mut by_uid = false;
    if verb.eq_ignore_ascii_case("UID") {
        by_uid = true;
        verb = t.expect_atom().map_err(|_| ParseError::BadCommand)?;
    }

    let body = parse_body(&verb, by_uid, &mut t, raw.pending_literal)?;

    if !t.at_end() {
        return Err(ParseError::SyntaxError(format!(
            "trailing input after {verb}"
        )));
    }

    Ok(Command { tag, body })
}

fn parse_body(
    verb: &str,
    by_uid: bool,
    t: &mut Tokens,
    pending_literal: Option<PendingLiteral>,
) -> Result<CommandBody, ParseError> {
    let v = verb.to_ascii_uppercase();
    match v.as_str() {
        "ID" => parse_id(t),
        "CAPABILITY" => Ok(CommandBody::Capability),
        "NOOP" => Ok(CommandBody::Noop),
        "LOGOUT" => Ok(CommandBody::Logout),

        "AUTHENTICATE" => {
            let mechanism = t.expect_word()?;
            let initial_response = if t.at_end() {
                None
            } else {
                let raw = t.expect_word()?;
                if raw.eq_ignore_ascii_case("=") {
                    None
                } else {
                    use base64::Engine;
                    Some(
                        base64::engine::general_purpose::STANDARD
                            .decode(raw)
                            .map_err(|e| ParseError::SyntaxError(e.to_string()))?,
                    )
                }
            };
            Ok(CommandBody::Authenticate {
                mechanism,
                initial_response,
            })
        }
        "LOGIN" => {
            let username = t.expect_word()?;
            let password = t.expect_word()?;
            Ok(CommandBody::Login { username, password })
        }
        "STARTTLS" => Ok(CommandBody::StartTls),
        "LAPPEND" => {
            let user = t.expect_word()?;
            let mailbox = t.expect_word()?;
            let flags = parse_optional_flag_list(t)?;
            let date = parse_optional_date(t)?;
            let (literal_len, non_synchronizing) = literal_info_or_err(pending_literal)?;
            Ok(CommandBody::LAppend {
                user,
                mailbox,
                flags,
                date,
                literal_len,
                non_synchronizing,
            })
        }

        "SELECT" => Ok(CommandBody::Select(t.expect_word()?)),
        "EXAMINE" => Ok(CommandBody::Examine(t.expect_word()?)),
        "CREATE" => Ok(CommandBody::Create(t.expect_word()?)),
        "DELETE" => Ok(CommandBody::Delete(t.expect_word()?)),
        "RENAME" => {
            let from = t.expect_word()?;
            let to = t.expect_word()?;
            Ok(CommandBody::Rename { from, to })
        }
        "SUBSCRIBE" => Ok(CommandBody::Subscribe(t.expect_word()?)),
        "UNSUBSCRIBE" => Ok(CommandBody::Unsubscribe(t.expect_word()?)),
        "LIST" => {
            let reference = t.expect_word()?;
            let pattern = t.expect_word()?;
            Ok(CommandBody::List { reference, pattern })
        }
        "LSUB" => {
            let reference = t.expect_word()?;
            let pattern = t.expect_word()?;
            Ok(CommandBody::Lsub { reference, pattern })
        }
        "STATUS" => {
            let mailbox = t.expect_word()?;
            t.expect_lparen()?;
            let mut items = Vec::new();
            while !matches!(t.peek(), Some(Tok::RParen)) {
                let item = t.expect_atom()?;
                items.push(parse_status_item(&item)?);
            }
            t.expect_rparen()?;
            Ok(CommandBody::Status { mailbox, items })
        }
        "APPEND" => {
            let mailbox = t.expect_word()?;
            let flags = parse_optional_flag_list(t)?;
            let date = parse_optional_date(t)?;
            let (literal_len, non_synchronizing) = literal_info_or_err(pending_literal)?;
            Ok(CommandBody::Append {
                mailbox,
                flags,
                date,
                literal_len,
                non_synchronizing,
            })
        }
        "IDLE" => Ok(CommandBody::Idle),
        "DONE" => Ok(CommandBody::Done),

        "CHECK" => Ok(CommandBody::Check),
        "CLOSE" => Ok(CommandBody::Close),
        "EXPUNGE" => Ok(CommandBody::Expunge),
        "SEARCH" => {
            let charset = if t.eat_atom_ci("CHARSET") {
                Some(t.expect_word()?)
            } else {
                None
            };
            let tree = search::parse_search_keys(t)?;
            Ok(CommandBody::Search {
                charset,
                tree,
                by_uid,
            })
        }
        "FETCH" => {
            let sequence_set = parse_sequence_set(&t.expect_word()?)?;
            let attributes = parse_fetch_attrs(t)?;
            Ok(CommandBody::Fetch {
                sequence_set,
                attributes,
                by_uid,
            })
        }
        "STORE" => {
            let sequence_set = parse_sequence_set(&t.expect_word()?)?;
            let op_word = t.expect_atom()?;
            let (op, silent) = parse_store_op(&op_word)?;
            let flags = parse_flag_list_required(t)?;
            Ok(CommandBody::Store {
                sequence_set,
                op,
                silent,
                flags,
                by_uid,
            })
        }
        "COPY" => {
            let sequence_set = parse_sequence_set(&t.expect_word()?)?;
            let mailbox = t.expect_word()?;
            Ok(CommandBody::Copy {
                sequence_set,
                mailbox,
                by_uid,
            })
        }
        _ => Err(ParseError::BadCommand),
    }
}

fn literal_info_or_err(pending: Option<PendingLiteral>) -> Result<(u32, bool), ParseError> {
    pending
        .map(|p| (p.len, p.non_synchronizing))
        .ok_or_else(|| ParseError::SyntaxError("expected a message literal".into()))
}

fn parse_id(t: &mut Tokens) -> Result<CommandBody, ParseError> {
    if t.eat_atom_ci("NIL") {
        return Ok(CommandBody::Id(None));
    }
    t.expect_lparen()?;
    let mut pairs = Vec::new();
    while !matches!(t.peek(), Some(Tok::RParen)) {
        let key = t.expect_word()?;
        let value = if t.eat_atom_ci("NIL") {
            None
        } else {
            Some(t.expect_word()?)
        };
        pairs.push((key, value));
    }
    t.expect_rparen()?;
    Ok(CommandBody::Id(Some(pairs)))
}

fn parse_status_item(word: &str) -> Result<StatusItem, ParseError> {
    match word.to_ascii_uppercase().as_str() {
        "MESSAGES" => Ok(StatusItem::Messages),
        "RECENT" => Ok(StatusItem::Recent),
        "UIDNEXT" => Ok(StatusItem::Uidnext),
        "UIDVALIDITY" => Ok(StatusItem::Uidvalidity),
        "UNSEEN" => Ok(StatusItem::Unseen),
        other => Err(ParseError::SyntaxError(format!("unknown status item {other}"))),
    }
}

fn parse_optional_flag_list(t: &mut Tokens) -> Result<Vec<imap_server_types::Flag>, ParseError> {
    if matches!(t.peek(), Some(Tok::LParen)) {
        parse_flag_list_required(t)
    } else {
        Ok(Vec::new())
    }
}

fn parse_flag_list_required(t: &mut Tokens) -> Result<Vec<imap_server_types::Flag>, ParseError> {
    t.expect_lparen()?;
    let mut flags = Vec::new();
    while !matches!(t.peek(), Some(Tok::RParen)) {
        flags.push(imap_server_types::Flag::parse(&t.expect_atom()?));
    }
    t.expect_rparen()?;
    Ok(flags)
}

fn parse_optional_date(t: &mut Tokens) -> Result<Option<String>, ParseError> {
    match t.peek() {
        Some(Tok::Str(_)) => Ok(Some(t.expect_word()?)),
        _ => Ok(None),
    }
}

fn parse_sequence_set(word: &str) -> Result<SequenceSet, ParseError> {
    word.parse().map_err(|_| ParseError::InvalidSequence)
}

fn parse_store_op(word: &str) -> Result<(StoreOp, bool), ParseError> {
    let (base, silent) = match word.strip_suffix(".SILENT").or_else(|| {
        word.to_ascii_uppercase()
            .strip_suffix(".SILENT")
            .map(|_| &word[..word.len() - ".SILENT".len()])
    }) {
        Some(base) => (base, true),
        None => (word, false),
    };
    let op = match base.to_ascii_uppercase().as_str() {
        "FLAGS" => StoreOp::Replace,
        "+FLAGS" => StoreOp::Add,
        "-FLAGS" => StoreOp::Remove,
        other => return Err(ParseError::SyntaxError(format!("unknown STORE op {other}"))),
    };
    Ok((op, silent))
}

fn parse_fetch_attrs(t: &mut Tokens) -> Result<Vec<FetchAttr>, ParseError> {
    if matches!(t.peek(), Some(Tok::LParen)) {
        t.expect_lparen()?;
        let mut attrs = Vec::new();
        while !matches!(t.peek(), Some(Tok::RParen)) {
            attrs.push(parse_one_fetch_attr(t)?);
        }
        t.expect_rparen()?;
        Ok(attrs)
    } else {
        parse_one_fetch_attr_or_macro(t)
    }
}

fn parse_one_fetch_attr_or_macro(t: &mut Tokens) -> Result<Vec<FetchAttr>, ParseError> {
    if let Some(Tok::Atom(a)) = t.peek() {
        match a.to_ascii_uppercase().as_str() {
            "ALL" => {
                t.next();
                return Ok(vec![
                    FetchAttr::Flags,
                    FetchAttr::InternalDate,
                    FetchAttr::Rfc822Size,
                    FetchAttr::Envelope,
                ]);
            }
            "FAST" => {
                t.next();
                return Ok(vec![FetchAttr::Flags, FetchAttr::InternalDate, FetchAttr::Rfc822Size]);
            }
            "FULL" => {
                t.next();
                return Ok(vec![
                    FetchAttr::Flags,
                    FetchAttr::InternalDate,
                    FetchAttr::Rfc822Size,
                    FetchAttr::Envelope,
                    FetchAttr::BodyStructure,
                ]);
            }
            _ => {}
        }
    }
    Ok(vec![parse_one_fetch_attr(t)?])
}

fn parse_one_fetch_attr(t: &mut Tokens) -> Result<FetchAttr, ParseError> {
    match t.next() {
        Some(Tok::BodySection { peek, section }) => Ok(FetchAttr::Body {
            section: section.clone(),
            peek: *peek,
        }),
        Some(Tok::Atom(a)) => match a.to_ascii_uppercase().as_str() {
            "FLAGS" => Ok(FetchAttr::Flags),
            "UID" => Ok(FetchAttr::Uid),
            "INTERNALDATE" => Ok(FetchAttr::InternalDate),
            "RFC822.SIZE" => Ok(FetchAttr::Rfc822Size),
            "RFC822" => Ok(FetchAttr::Rfc822),
            "RFC822.HEADER" => Ok(FetchAttr::Rfc822Header),
            "RFC822.TEXT" => Ok(FetchAttr::Rfc822Text),
            "ENVELOPE" => Ok(FetchAttr::Envelope),
            "BODYSTRUCTURE" => Ok(FetchAttr::BodyStructure),
            "BODY" => Ok(FetchAttr::Body {
                section: String::new(),
                peek: false,
            }),
            other => Err(ParseError::SyntaxError(format!("unknown FETCH attribute {other}"))),
        },
        _ => Err(ParseError::SyntaxError("expected a FETCH attribute".into())),
    }
}
