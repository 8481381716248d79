//! Recursive-descent grammar for the `SEARCH` key tree (RFC 3501 §6.4.4).
//! Multiple keys at the same nesting level are an implicit AND, which we
//! represent as `SearchKey::KeyList` the same way a parenthesized group does.

use imap_server_types::{SearchAtom, SearchKey, SequenceSet};

use super::{parse_sequence_set, ParseError, Tok, Tokens};

pub fn parse_search_keys(t: &mut Tokens) -> Result<SearchKey, ParseError> {
    let mut keys = Vec::new();
    while !t.at_end() && !matches!(t.peek(), Some(Tok::RParen)) {
        keys.push(parse_one_key(t)?);
    }
    if keys.is_empty() {
        return Err(ParseError::SyntaxError("empty SEARCH key".into()));
    }
    Ok(if keys.len() == 1 {
        keys.into_iter().next().unwrap()
    } else {
        SearchKey::KeyList(keys)
    })
}

fn parse_one_key(t: &mut Tokens) -> Result<SearchKey, ParseError> {
    match t.peek() {
        Some(Tok::LParen) => {
            t.expect_lparen()?;
            let inner = parse_search_keys(t)?;
            t.expect_rparen()?;
            Ok(match inner {
                SearchKey::KeyList(list) => SearchKey::KeyList(list),
                other => SearchKey::KeyList(vec![other]),
            })
        }
        Some(Tok::Atom(a)) if a.eq_ignore_ascii_case("NOT") => {
            t.next();
            Ok(SearchKey::Not(Box::new(parse_one_key(t)?)))
        }
        Some(Tok::Atom(a)) if a.eq_ignore_ascii_case("OR") => {
            t.next();
            let left = parse_one_key(t)?;
            let right = parse_one_key(t)?;
            Ok(SearchKey::Or(Box::new(left), Box::new(right)))
        }
        Some(Tok::Atom(_)) | Some(Tok::Str(_)) => parse_atom_key(t),
        _ => Err(ParseError::SyntaxError("expected a SEARCH key".into())),
    }
}

fn parse_atom_key(t: &mut Tokens) -> Result<SearchKey, ParseError> {
    let word = t.expect_word()?;
    let atom = match word.to_ascii_uppercase().as_str() {
        "ALL" => SearchAtom::All,
        "ANSWERED" => SearchAtom::Answered,
        "DELETED" => SearchAtom::Deleted,
        "FLAGGED" => SearchAtom::Flagged,
        "NEW" => SearchAtom::New,
        "OLD" => SearchAtom::Old,
        "RECENT" => SearchAtom::Recent,
        "SEEN" => SearchAtom::Seen,
        "UNANSWERED" => SearchAtom::Unanswered,
        "UNDELETED" => SearchAtom::Undeleted,
        "UNFLAGGED" => SearchAtom::Unflagged,
        "UNSEEN" => SearchAtom::Unseen,
        "DRAFT" => SearchAtom::Draft,
        "UNDRAFT" => SearchAtom::Undraft,
        "UID" => SearchAtom::Uid(parse_seq(t)?),
        "HEADER" => {
            let field = t.expect_word()?;
            let value = t.expect_word()?;
            SearchAtom::Header(field, value)
        }
        "SUBJECT" => SearchAtom::Subject(t.expect_word()?),
        "FROM" => SearchAtom::From(t.expect_word()?),
        "TO" => SearchAtom::To(t.expect_word()?),
        "CC" => SearchAtom::Cc(t.expect_word()?),
        "BCC" => SearchAtom::Bcc(t.expect_word()?),
        "BODY" => SearchAtom::Body(t.expect_word()?),
        "TEXT" => SearchAtom::Text(t.expect_word()?),
        "KEYWORD" => SearchAtom::Keyword(t.expect_word()?),
        "UNKEYWORD" => SearchAtom::Unkeyword(t.expect_word()?),
        "SINCE" => SearchAtom::Since(t.expect_word()?),
        "BEFORE" => SearchAtom::Before(t.expect_word()?),
        "ON" => SearchAtom::On(t.expect_word()?),
        "SENTSINCE" => SearchAtom::SentSince(t.expect_word()?),
        "SENTBEFORE" => SearchAtom::SentBefore(t.expect_word()?),
        "SENTON" => SearchAtom::SentOn(t.expect_word()?),
        "LARGER" => SearchAtom::Larger(parse_num(t)?),
        "SMALLER" => SearchAtom::Smaller(parse_num(t)?),
        _ => SearchAtom::SequenceSet(parse_sequence_set(&word)?),
    };
    Ok(SearchKey::Key(atom))
}

fn parse_seq(t: &mut Tokens) -> Result<SequenceSet, ParseError> {
    parse_sequence_set(&t.expect_word()?)
}

fn parse_num(t: &mut Tokens) -> Result<u32, ParseError> {
    t.expect_word()?
        .parse()
        .map_err(|_| ParseError::SyntaxError("expected a number".into()))
}
