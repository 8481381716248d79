use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// One end of a sequence range: either a literal number or `*` (the largest
/// sequence number / UID currently in the mailbox).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqNum {
    Value(u32),
    Largest,
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqNum::Value(v) => write!(f, "{v}"),
            SeqNum::Largest => write!(f, "*"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid sequence set")]
pub struct InvalidSequence;

/// A `sequence-set` per RFC 3501 §9: a comma-separated list of numbers and
/// `first:last` ranges, either of which may use `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSet(pub Vec<(SeqNum, SeqNum)>);

impl SequenceSet {
    pub fn single(n: u32) -> Self {
        SequenceSet(vec![(SeqNum::Value(n), SeqNum::Value(n))])
    }

    /// Resolves `*` against `largest` and expands every range into the
    /// matching sequence numbers, in the order the ranges were given,
    /// deduplicated while preserving first occurrence.
    pub fn resolve(&self, largest: u32) -> Vec<u32> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for (a, b) in &self.0 {
            let a = match a {
                SeqNum::Value(v) => *v,
                SeqNum::Largest => largest,
            };
            let b = match b {
                SeqNum::Value(v) => *v,
                SeqNum::Largest => largest,
            };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            for n in lo..=hi {
                if seen.insert(n) {
                    out.push(n);
                }
            }
        }
        out
    }
}

impl FromStr for SequenceSet {
    type Err = InvalidSequence;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(InvalidSequence);
        }
        let mut ranges = Vec::new();
        for part in s.split(',') {
            if part.is_empty() {
                return Err(InvalidSequence);
            }
            let parsed = if let Some((a, b)) = part.split_once(':') {
                (parse_seq_num(a)?, parse_seq_num(b)?)
            } else {
                let n = parse_seq_num(part)?;
                (n, n)
            };
            ranges.push(parsed);
        }
        Ok(SequenceSet(ranges))
    }
}

fn parse_seq_num(s: &str) -> Result<SeqNum, InvalidSequence> {
    if s == "*" {
        Ok(SeqNum::Largest)
    } else {
        s.parse::<u32>()
            .map(SeqNum::Value)
            .map_err(|_| InvalidSequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_ranges_and_star() {
        let set: SequenceSet = "1,3:5,7:*".parse().unwrap();
        assert_eq!(set.0.len(), 3);
        assert_eq!(set.resolve(8), vec![1, 3, 4, 5, 7, 8]);
    }

    #[test]
    fn rejects_empty_and_garbage() {
        assert!("".parse::<SequenceSet>().is_err());
        assert!("a".parse::<SequenceSet>().is_err());
        assert!("1,,2".parse::<SequenceSet>().is_err());
    }

    #[test]
    fn reversed_range_is_normalized() {
        let set: SequenceSet = "5:3".parse().unwrap();
        assert_eq!(set.resolve(10), vec![3, 4, 5]);
    }
}
