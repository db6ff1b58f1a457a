//! Quick-entry line grammar shared by the entry sheets.
//!
//! A line is `name`, `name score` or `name score count`. The name part is a
//! case-insensitive substring search over the roster; the trailing numbers
//! are only applied when exactly one member matches.

use regex::Regex;
use std::sync::LazyLock;

use crate::model::Member;

static NUMERIC_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+(\d+)(?:\s+(\d+))?$").unwrap_or_else(|e| panic!("numeric tail regex: {e}"))
});

/// Parsed line before roster matching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuickLine {
    /// Lowercased, trimmed name query.
    pub query: String,
    pub score: Option<i64>,
    pub count: Option<u32>,
}

pub fn parse_line(input: &str) -> QuickLine {
    if let Some(caps) = NUMERIC_TAIL.captures(input) {
        let score = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok());
        let count = match caps.get(2) {
            Some(m) => m.as_str().parse::<u32>().ok(),
            None => None,
        };
        let tail_ok = score.is_some() && (caps.get(2).is_none() || count.is_some());
        if tail_ok {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(input.len());
            return QuickLine {
                query: input[..start].trim().to_lowercase(),
                score,
                count,
            };
        }
    }
    QuickLine {
        query: input.trim().to_lowercase(),
        score: None,
        count: None,
    }
}

/// Target of a quick-entry line: a score sheet keyed by member id.
pub trait Sheet {
    fn contains(&self, member_id: &str) -> bool;
    fn add(&mut self, member: &Member);
    fn set_score(&mut self, member_id: &str, score: i64);

    /// Sheets that record entry counts override both of these.
    fn accepts_count(&self) -> bool {
        false
    }
    fn set_count(&mut self, _member_id: &str, _count: u32) {}
}

/// State of the entry line as the user types; drives `name?` previews.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Indicator {
    Idle,
    NoMatch,
    Searching,
    SingleResult,
    ReadyToSubmit,
}

#[derive(Debug, PartialEq)]
pub enum Outcome<'a> {
    Idle,
    NoMatch,
    Ambiguous(Vec<&'a Member>),
    /// One match, no score: the member is put on the sheet.
    Select { member: &'a Member, newly_added: bool },
    Commit {
        member: &'a Member,
        score: i64,
        count: Option<u32>,
        newly_added: bool,
    },
    Rejected(String),
}

pub struct QuickEntry<'a> {
    roster: &'a [Member],
    /// Edit mode also searches kicked members.
    edit_mode: bool,
}

impl<'a> QuickEntry<'a> {
    pub fn new(roster: &'a [Member]) -> Self {
        Self { roster, edit_mode: false }
    }

    pub fn edit_mode(mut self, on: bool) -> Self {
        self.edit_mode = on;
        self
    }

    pub fn candidates(&self, input: &str) -> Vec<&'a Member> {
        if input.trim().is_empty() {
            return Vec::new();
        }
        let line = parse_line(input);
        self.matching(&line.query)
    }

    fn matching(&self, query: &str) -> Vec<&'a Member> {
        self.roster
            .iter()
            .filter(|m| self.edit_mode || !m.kicked)
            .filter(|m| m.name.to_lowercase().contains(query))
            .collect()
    }

    pub fn indicator(&self, input: &str) -> Indicator {
        if input.trim().is_empty() {
            return Indicator::Idle;
        }
        let line = parse_line(input);
        match (self.matching(&line.query).len(), line.score) {
            (0, _) => Indicator::NoMatch,
            (1, Some(_)) => Indicator::ReadyToSubmit,
            (1, None) => Indicator::SingleResult,
            _ => Indicator::Searching,
        }
    }

    /// Resolve `input` and write the result onto `sheet`.
    pub fn apply<S: Sheet>(&self, input: &str, sheet: &mut S) -> Outcome<'a> {
        if input.trim().is_empty() {
            return Outcome::Idle;
        }
        let line = parse_line(input);
        let mut found = self.matching(&line.query);

        let member = match found.len() {
            0 => return Outcome::NoMatch,
            1 => found.remove(0),
            _ => return Outcome::Ambiguous(found),
        };

        if line.count.is_some() && !sheet.accepts_count() {
            return Outcome::Rejected(format!(
                "this sheet takes one number after the name, got \"{}\"",
                input.trim()
            ));
        }

        let newly_added = !sheet.contains(&member.id);
        if newly_added {
            sheet.add(member);
        }

        match line.score {
            Some(score) => {
                sheet.set_score(&member.id, score);
                if let Some(count) = line.count {
                    sheet.set_count(&member.id, count);
                }
                Outcome::Commit { member, score, count: line.count, newly_added }
            }
            None => Outcome::Select { member, newly_added },
        }
    }
}
