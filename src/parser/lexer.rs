//! `nom`-based word lexer. Text chunks are tokenized with the grammar below;
//! literal chunks bypass it entirely and are pushed as a single [`Tok::Str`],
//! since a spliced literal is always one complete string argument.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag_no_case, take_until, take_while1},
    character::complete::{char, multispace0, none_of, one_of},
    combinator::{map, value},
    multi::many0,
    sequence::{delimited, preceded},
    IResult,
};

use crate::wire::{Chunk, RawCommand};
use super::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok {
    Atom(String),
    Str(String),
    LParen,
    RParen,
    BodySection { peek: bool, section: String },
}

fn atom(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != '(' && c != ')' && c != '"' && c != '[')(input)
}

fn quoted_string(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            nom::combinator::opt(escaped_transform(
                none_of("\"\\"),
                '\\',
                alt((value('"', char('"')), value('\\', char('\\')))),
            )),
            |s: Option<String>| s.unwrap_or_default(),
        ),
        char('"'),
    )(input)
}

fn body_section(input: &str) -> IResult<&str, Tok> {
    let (input, peek) = alt((
        value(true, tag_no_case("BODY.PEEK")),
        value(false, tag_no_case("BODY")),
    ))(input)?;
    let (input, section) = delimited(char('['), take_until("]"), char(']'))(input)?;
    Ok((
        input,
        Tok::BodySection {
            peek,
            section: section.to_string(),
        },
    ))
}

fn one_token(input: &str) -> IResult<&str, Tok> {
    alt((
        body_section,
        map(quoted_string, Tok::Str),
        value(Tok::LParen, char('(')),
        value(Tok::RParen, char(')')),
        map(atom, |a| Tok::Atom(a.to_string())),
    ))(input)
}

fn tokenize_text(input: &str) -> Result<Vec<Tok>, ParseError> {
    let (rest, toks) = many0(preceded(multispace0, one_token))(input)
        .map_err(|e| ParseError::SyntaxError(format!("{e}")))?;
    let rest = rest.trim();
    if !rest.is_empty() {
        return Err(ParseError::SyntaxError(format!("unparsed input: {rest:?}")));
    }
    Ok(toks)
}

/// Tokenizes a whole [`RawCommand`], threading spliced literals through as
/// atomic [`Tok::Str`] tokens in their original position.
pub fn tokenize(raw: &RawCommand) -> Result<Vec<Tok>, ParseError> {
    let mut out = Vec::new();
    for chunk in &raw.chunks {
        match chunk {
            Chunk::Text(t) => out.extend(tokenize_text(t)?),
            Chunk::Literal(bytes) => out.push(Tok::Str(String::from_utf8_lossy(bytes).into_owned())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> RawCommand {
        RawCommand {
            chunks: vec![Chunk::Text(s.to_string())],
            pending_literal: None,
        }
    }

    #[test]
    fn tokenizes_plain_words() {
        let toks = tokenize(&text("a001 LOGIN alice secret")).unwrap();
        assert_eq!(
            toks,
            vec![
                Tok::Atom("a001".into()),
                Tok::Atom("LOGIN".into()),
                Tok::Atom("alice".into()),
                Tok::Atom("secret".into()),
            ]
        );
    }

    #[test]
    fn tokenizes_quoted_string_with_escape() {
        let toks = tokenize(&text(r#"a001 RENAME "my box" "new \"box\"""#)).unwrap();
        assert_eq!(
            toks,
            vec![
                Tok::Atom("a001".into()),
                Tok::Atom("RENAME".into()),
                Tok::Str("my box".into()),
                Tok::Str("new \"box\"".into()),
            ]
        );
    }

    #[test]
    fn tokenizes_parens_and_body_section() {
        let toks = tokenize(&text("a001 FETCH 1 (FLAGS BODY.PEEK[HEADER])")).unwrap();
        assert_eq!(
            toks,
            vec![
                Tok::Atom("a001".into()),
                Tok::Atom("FETCH".into()),
                Tok::Atom("1".into()),
                Tok::LParen,
                Tok::Atom("FLAGS".into()),
                Tok::BodySection {
                    peek: true,
                    section: "HEADER".into()
                },
                Tok::RParen,
            ]
        );
    }
}
