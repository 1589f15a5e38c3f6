//! Event directives attached to a subscription.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;
use crate::span::Span;

/// Which row changes a subscription wants reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventMode {
    /// Rows entering the result set.
    Add,
    /// Rows leaving the result set.
    Remove,
    /// Both directions.
    Both,
}

impl EventMode {
    pub fn reports_added(self) -> bool {
        matches!(self, EventMode::Add | EventMode::Both)
    }

    pub fn reports_removed(self) -> bool {
        matches!(self, EventMode::Remove | EventMode::Both)
    }

    /// Canonical directive text.
    pub fn as_str(self) -> &'static str {
        match self {
            EventMode::Add => "ADD",
            EventMode::Remove => "REMOVED",
            EventMode::Both => "BOTH",
        }
    }
}

impl FromStr for EventMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let directive = s.trim();
        let mode = if directive.eq_ignore_ascii_case("add")
            || directive.eq_ignore_ascii_case("added")
        {
            EventMode::Add
        } else if directive.eq_ignore_ascii_case("remove")
            || directive.eq_ignore_ascii_case("removed")
        {
            EventMode::Remove
        } else if directive.eq_ignore_ascii_case("both") {
            EventMode::Both
        } else {
            return Err(ParseError::new(
                format!(
                    "unknown event directive '{}', expected ADD, REMOVED or BOTH",
                    directive
                ),
                Span::new(0, s.len()),
            ));
        };
        Ok(mode)
    }
}

impl fmt::Display for EventMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
