//! Format compiler: `LogFormatSpec` -> reusable `LineMatcher`

use chrono::{DateTime, NaiveDateTime};
use regex_lite::Regex;

use super::{FieldRole, LogFormatSpec};
use crate::error::{LogError, Result};

/// Compiled line format. Cheap to share between ingestion workers.
#[derive(Debug, Clone)]
pub struct LineMatcher {
    regex: Regex,
    spec: LogFormatSpec,
    timestamp_slot: usize,
    /// Date format carries a UTC offset (`%z` and friends, or RFC 3339 `%+`)
    zoned: bool,
}

/// Compile a format; fails before any ingestion starts
pub fn compile(spec: &LogFormatSpec) -> Result<LineMatcher> {
    LineMatcher::new(spec)
}

impl LineMatcher {
    pub fn new(spec: &LogFormatSpec) -> Result<Self> {
        spec.validate()?;

        let pattern = spec.composite_pattern();
        let regex = Regex::new(&pattern)
            .map_err(|e| LogError::InvalidFormat(format!("pattern does not compile: {}", e)))?;

        // captures_len() counts the implicit whole-match group 0
        let groups = regex.captures_len() - 1;
        if let Some(&max) = spec.captures.iter().max() {
            if max > groups {
                return Err(LogError::InvalidFormat(format!(
                    "capture index {} exceeds the {} groups of the pattern",
                    max, groups
                )));
            }
        }

        let timestamp_slot = spec
            .slot(FieldRole::Timestamp)
            .ok_or_else(|| LogError::InvalidFormat("no timestamp slot".into()))?;
        let zoned = ["%z", "%:z", "%::z", "%#z", "%+"]
            .iter()
            .any(|z| spec.date_format.contains(z));

        tracing::debug!("Compiled log format: {} slots, pattern {}", spec.roles.len(), pattern);

        Ok(Self {
            regex,
            spec: spec.clone(),
            timestamp_slot,
            zoned,
        })
    }

    pub fn spec(&self) -> &LogFormatSpec {
        &self.spec
    }

    pub fn slot_count(&self) -> usize {
        self.spec.roles.len()
    }

    pub fn slot(&self, role: FieldRole) -> Option<usize> {
        if role == FieldRole::Timestamp {
            return Some(self.timestamp_slot);
        }
        self.spec.slot(role)
    }

    /// Match a line, returning slot values in slot order.
    /// Slots the layout lacks (capture index 0) or groups that did not
    /// participate yield an empty string.
    pub fn match_line<'l>(&self, line: &'l str) -> Option<Vec<&'l str>> {
        let caps = self.regex.captures(line)?;
        Some(
            self.spec
                .captures
                .iter()
                .map(|&idx| match idx {
                    0 => "",
                    idx => caps.get(idx).map_or("", |m| m.as_str()),
                })
                .collect(),
        )
    }

    /// Parse the timestamp slot with the configured date format.
    /// Zoned formats are normalized to UTC.
    pub fn parse_timestamp(&self, value: &str) -> Option<NaiveDateTime> {
        let format = self.spec.date_format.as_str();
        if self.zoned {
            DateTime::parse_from_str(value, format)
                .ok()
                .map(|dt| dt.naive_utc())
        } else {
            NaiveDateTime::parse_from_str(value, format).ok()
        }
    }

    pub fn strip_query<'a>(&self, s: &'a str) -> &'a str {
        if !self.spec.strip_query_string {
            return s;
        }
        match s.find('?') {
            Some(idx) => &s[..idx],
            None => s,
        }
    }
}
