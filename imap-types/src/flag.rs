use std::fmt;

/// An IMAP message or permanent flag.
///
/// `Custom` covers both keywords (`$Forwarded`) and any `\Extension` flag this
/// crate doesn't name explicitly; callers that need `\*` (allow-any-keyword in
/// PERMANENTFLAGS) should add it as `Flag::Custom("\\*".into())`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Recent,
    Custom(String),
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::Seen => write!(f, "\\Seen"),
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Draft => write!(f, "\\Draft"),
            Flag::Recent => write!(f, "\\Recent"),
            Flag::Custom(s) => write!(f, "{s}"),
        }
    }
}

impl Flag {
    /// Parses a single flag atom, e.g. `\Seen` or a bare keyword.
    pub fn parse(raw: &str) -> Flag {
        match raw.to_ascii_lowercase().as_str() {
            "\\seen" => Flag::Seen,
            "\\answered" => Flag::Answered,
            "\\flagged" => Flag::Flagged,
            "\\deleted" => Flag::Deleted,
            "\\draft" => Flag::Draft,
            "\\recent" => Flag::Recent,
            _ => Flag::Custom(raw.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip_for_system_flags() {
        for raw in ["\\Seen", "\\Answered", "\\Flagged", "\\Deleted", "\\Draft"] {
            let flag = Flag::parse(raw);
            assert_eq!(flag.to_string(), raw);
        }
    }

    #[test]
    fn unknown_atom_becomes_custom() {
        assert_eq!(Flag::parse("$Forwarded"), Flag::Custom("$Forwarded".into()));
    }
}
