//! Log line format definitions
//!
//! A format is a list of sub-patterns (one capture each) joined by
//! whitespace, the capture indices to keep and the semantic role of every
//! kept slot. The roles are a static contract of the layout: the standard
//! layout below fixes them once, callers only choose which layout to load.

pub mod compiler;

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};

pub use compiler::{compile, LineMatcher};

/// Semantic role of a capture slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    Timestamp,
    ClientKey,
    Path,
    Status,
    Bytes,
    Referrer,
    UserAgent,
    /// Kept in `raw_fields` only
    Opaque,
}

impl FieldRole {
    /// Roles that may be bound to at most one slot
    pub fn is_unique(self) -> bool {
        !matches!(self, FieldRole::Opaque)
    }
}

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One hour, the idle time after which a client starts a new session
pub const DEFAULT_SESSION_GAP_SECS: u64 = 60 * 60;

/// Sub-patterns of the standard layout, e.g.
///
/// ```text
/// 2021-05-01 02:16:15 "1.1.1.1" "HTTP/1.0" GET example.org "/img/home.png" 304 0 0 "https://example.org/" "Mozilla/5.0 ..." "-" 61647 "-" "-"
/// ```
pub const STANDARD_PATTERN: [&str; 15] = [
    r"(\d+-\d+-\d+ \d+:\d+:\d+)", // datetime
    r#""([^"]*)""#,               // client ip
    r#""([^"]*)""#,               // http version
    r"(\w+)",                     // method
    r"([\w\-.]+)",                // host
    r#""([^"]*)""#,               // path
    r"(\d+)",                     // status
    r"(\d+)",                     // size
    r"(\d+)",                     // unknown number
    r#""([^"]*)""#,               // referrer
    r#""([^"]*)""#,               // user agent
    r#""([^"]*)""#,               // unknown string
    r"(\d+)",                     // unknown number
    r#""([^"]*)""#,               // content type
    r#""([^"]*)""#,               // compression
];

/// Role of every slot of the standard layout. The two unlabelled numeric
/// fields and the unlabelled string stay opaque.
pub const STANDARD_ROLES: [FieldRole; 15] = [
    FieldRole::Timestamp,
    FieldRole::ClientKey,
    FieldRole::Opaque,
    FieldRole::Opaque,
    FieldRole::Opaque,
    FieldRole::Path,
    FieldRole::Status,
    FieldRole::Bytes,
    FieldRole::Opaque,
    FieldRole::Referrer,
    FieldRole::UserAgent,
    FieldRole::Opaque,
    FieldRole::Opaque,
    FieldRole::Opaque,
    FieldRole::Opaque,
];

/// Declarative line format, loaded once per dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFormatSpec {
    /// Sub-patterns, each yielding exactly one capture
    pub pattern: Vec<String>,

    /// 1-based capture index per slot, `0` marks a slot this layout lacks.
    /// Omitted in JSON: slot `i` takes capture `i + 1`.
    #[serde(default)]
    pub captures: Vec<usize>,

    /// Role per slot, same length as `captures`
    pub roles: Vec<FieldRole>,

    /// strftime format of the timestamp slot
    pub date_format: String,

    /// Drop `?query` from path and referrer
    pub strip_query_string: bool,

    pub session_gap_secs: u64,

    /// Identify clients by address and user agent together
    pub key_includes_user_agent: bool,

    /// Drop lines from crawlers and scripted clients
    pub skip_bots: bool,

    /// Drop requests for scripts, stylesheets, fonts and icons
    pub skip_static_assets: bool,

    /// Drop lines whose status is outside 2xx. No effect without a status slot.
    pub success_only: bool,

    /// Fold `/dir/index.html` and `/dir/` into `/dir`
    pub normalize_paths: bool,
}

impl Default for LogFormatSpec {
    fn default() -> Self {
        Self::standard()
    }
}

impl LogFormatSpec {
    /// Format with every sub-pattern captured in order and plain defaults
    pub fn new(pattern: Vec<String>, roles: Vec<FieldRole>) -> Self {
        let captures = (1..=roles.len()).collect();
        Self {
            pattern,
            captures,
            roles,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            strip_query_string: false,
            session_gap_secs: DEFAULT_SESSION_GAP_SECS,
            key_includes_user_agent: false,
            skip_bots: false,
            skip_static_assets: false,
            success_only: false,
            normalize_paths: false,
        }
    }

    /// The 15-field layout of the production access logs
    pub fn standard() -> Self {
        Self::new(
            STANDARD_PATTERN.iter().map(|p| p.to_string()).collect(),
            STANDARD_ROLES.to_vec(),
        )
        .strip_query_string(true)
        .key_includes_user_agent(true)
        .skip_bots(true)
        .success_only(true)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(json)?;
        Ok(spec.fill_captures())
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = fs::File::open(path)?;
        let spec: Self = serde_json::from_reader(io::BufReader::new(file))?;
        Ok(spec.fill_captures())
    }

    fn fill_captures(mut self) -> Self {
        if self.captures.is_empty() {
            self.captures = (1..=self.roles.len()).collect();
        }
        self
    }

    pub fn captures(mut self, captures: Vec<usize>) -> Self {
        self.captures = captures;
        self
    }

    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    pub fn strip_query_string(mut self, strip: bool) -> Self {
        self.strip_query_string = strip;
        self
    }

    pub fn session_gap(mut self, secs: u64) -> Self {
        self.session_gap_secs = secs;
        self
    }

    pub fn key_includes_user_agent(mut self, include: bool) -> Self {
        self.key_includes_user_agent = include;
        self
    }

    pub fn skip_bots(mut self, skip: bool) -> Self {
        self.skip_bots = skip;
        self
    }

    pub fn skip_static_assets(mut self, skip: bool) -> Self {
        self.skip_static_assets = skip;
        self
    }

    pub fn success_only(mut self, only: bool) -> Self {
        self.success_only = only;
        self
    }

    pub fn normalize_paths(mut self, normalize: bool) -> Self {
        self.normalize_paths = normalize;
        self
    }

    /// Composite pattern: sub-patterns joined by whitespace, anchored at line start
    pub fn composite_pattern(&self) -> String {
        format!(r"^\s*{}", self.pattern.join(r"\s+"))
    }

    /// Slot bound to `role`, if the layout has one
    pub fn slot(&self, role: FieldRole) -> Option<usize> {
        self.roles.iter().position(|&r| r == role)
    }

    /// Check the slot/role rules that do not need the compiled regex
    pub fn validate(&self) -> Result<()> {
        if self.captures.len() != self.roles.len() {
            return Err(LogError::InvalidFormat(format!(
                "{} capture indices but {} roles",
                self.captures.len(),
                self.roles.len()
            )));
        }

        let mut seen: Vec<FieldRole> = Vec::new();
        for &role in &self.roles {
            if role.is_unique() && seen.contains(&role) {
                return Err(LogError::InvalidFormat(format!(
                    "role {:?} is bound to more than one slot",
                    role
                )));
            }
            seen.push(role);
        }

        match self.slot(FieldRole::Timestamp) {
            None => Err(LogError::InvalidFormat("no timestamp slot".into())),
            Some(slot) if self.captures[slot] == 0 => Err(LogError::InvalidFormat(
                "timestamp slot is not captured".into(),
            )),
            Some(_) if self.date_format.is_empty() => {
                Err(LogError::InvalidFormat("empty date format".into()))
            }
            Some(_) => Ok(()),
        }
    }
}
