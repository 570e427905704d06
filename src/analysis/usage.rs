//! Bucketed usage series per category

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::sessions::reconstruct;
use crate::error::{LogError, Result};
use crate::storage::{LogRecord, RecordStore};

/// Record attribute the usage series are keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageCategory {
    #[default]
    Path,
    UserAgent,
    Referrer,
    Status,
}

impl UsageCategory {
    fn value<'r>(self, record: &'r LogRecord) -> std::borrow::Cow<'r, str> {
        match self {
            UsageCategory::Path => record.path.as_str().into(),
            UsageCategory::UserAgent => record.user_agent.as_str().into(),
            UsageCategory::Referrer => record.referrer.as_str().into(),
            UsageCategory::Status => record.status.to_string().into(),
        }
    }
}

impl FromStr for UsageCategory {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "path" => Ok(UsageCategory::Path),
            "ua" | "user_agent" | "user-agent" => Ok(UsageCategory::UserAgent),
            "referrer" | "referer" => Ok(UsageCategory::Referrer),
            "status" => Ok(UsageCategory::Status),
            other => Err(LogError::InvalidOptions(format!("unknown usage category: {}", other))),
        }
    }
}

/// Usage query parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageOptions {
    /// Bucket width in seconds, 0 puts everything into one bucket
    pub bucket_seconds: i64,
    /// Categories with fewer occurrences are omitted
    pub min_count: u32,
    pub max_categories: usize,
    /// Count only the first request of each session
    pub session_starts_only: bool,
    pub category: UsageCategory,
}

impl Default for UsageOptions {
    fn default() -> Self {
        Self {
            bucket_seconds: 3600,
            min_count: 0,
            max_categories: 300,
            session_starts_only: false,
            category: UsageCategory::Path,
        }
    }
}

impl UsageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket_seconds(mut self, secs: i64) -> Self {
        self.bucket_seconds = secs;
        self
    }

    pub fn min_count(mut self, count: u32) -> Self {
        self.min_count = count;
        self
    }

    pub fn max_categories(mut self, max: usize) -> Self {
        self.max_categories = max;
        self
    }

    pub fn session_starts_only(mut self, starts_only: bool) -> Self {
        self.session_starts_only = starts_only;
        self
    }

    pub fn category(mut self, category: UsageCategory) -> Self {
        self.category = category;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket_seconds < 0 {
            return Err(LogError::InvalidOptions(format!(
                "bucket width must not be negative, got {}",
                self.bucket_seconds
            )));
        }
        Ok(())
    }
}

/// Populated buckets of one category as parallel sequences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStatRow {
    pub category: String,
    pub count: Vec<u32>,
    /// Bucket start, unix seconds
    pub time: Vec<i64>,
}

impl UsageStatRow {
    pub fn total(&self) -> u64 {
        self.count.iter().map(|&c| c as u64).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub rows: Vec<UsageStatRow>,
    /// Earliest raw timestamp among retained rows, 0 when empty
    pub start_time: i64,
    /// Latest raw timestamp among retained rows, 0 when empty
    pub end_time: i64,
    pub session_starts_only: bool,
}

impl UsageStats {
    pub fn empty(session_starts_only: bool) -> Self {
        Self {
            session_starts_only,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug)]
struct CategoryAcc {
    buckets: BTreeMap<i64, u32>,
    total: u64,
    first: i64,
    last: i64,
}

impl CategoryAcc {
    fn new(ts: i64) -> Self {
        Self {
            buckets: BTreeMap::new(),
            total: 0,
            first: ts,
            last: ts,
        }
    }

    fn add(&mut self, bucket: i64, ts: i64) {
        let count = self.buckets.entry(bucket).or_insert(0);
        *count = count.saturating_add(1);
        self.total += 1;
        self.first = self.first.min(ts);
        self.last = self.last.max(ts);
    }
}

fn bucket_of(ts: i64, width: i64) -> i64 {
    if width == 0 {
        0
    } else {
        ts.div_euclid(width) * width
    }
}

/// Count requests per category and time bucket
pub fn usage_stats(store: &RecordStore, options: &UsageOptions) -> Result<UsageStats> {
    options.validate()?;
    if store.is_empty() {
        return Ok(UsageStats::empty(options.session_starts_only));
    }

    let width = options.bucket_seconds;
    let mut acc: HashMap<String, CategoryAcc> = HashMap::new();
    let mut add = |record: &LogRecord| {
        let category = options.category.value(record);
        // Records without a value for the category are not counted
        if category.is_empty() {
            return;
        }
        let ts = record.unix_time();
        let bucket = bucket_of(ts, width);
        if let Some(entry) = acc.get_mut(category.as_ref()) {
            entry.add(bucket, ts);
        } else {
            let mut entry = CategoryAcc::new(ts);
            entry.add(bucket, ts);
            acc.insert(category.into_owned(), entry);
        }
    };

    if options.session_starts_only {
        for session in reconstruct(store) {
            if let Some(first) = session.first() {
                add(&store.records()[first.record]);
            }
        }
    } else {
        store.records().iter().for_each(&mut add);
    }

    let mut ranked: Vec<(String, CategoryAcc)> = acc
        .into_iter()
        .filter(|(_, a)| a.total >= options.min_count as u64)
        .collect();
    ranked.sort_by(|(ca, a), (cb, b)| b.total.cmp(&a.total).then_with(|| ca.cmp(cb)));
    ranked.truncate(options.max_categories);

    let mut stats = UsageStats::empty(options.session_starts_only);
    if let Some(start) = ranked.iter().map(|(_, a)| a.first).min() {
        stats.start_time = start;
    }
    if let Some(end) = ranked.iter().map(|(_, a)| a.last).max() {
        stats.end_time = end;
    }

    stats.rows = ranked
        .into_iter()
        .map(|(category, a)| {
            let (time, count): (Vec<i64>, Vec<u32>) = if width == 0 {
                (vec![a.first], a.buckets.into_values().collect())
            } else {
                a.buckets.into_iter().unzip()
            };
            UsageStatRow { category, count, time }
        })
        .collect();

    tracing::debug!(
        "Usage stats: {} rows, bucket {}s, starts only {}",
        stats.rows.len(),
        width,
        stats.session_starts_only
    );
    Ok(stats)
}
