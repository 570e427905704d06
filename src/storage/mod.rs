//! In-memory record store
//!
//! Records live in one append-only arena. Grouping by client and by path
//! is index-based (record positions in the arena) and built lazily on the
//! first query after a load.

pub mod symbols;

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use rayon::prelude::*;

pub use symbols::SymbolTable;

/// One parsed access-log line
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Request time, UTC
    pub timestamp: NaiveDateTime,

    /// Client identity used for sessions (address, optionally with user agent)
    pub client_key: String,

    /// Request path, query string removed if the format asks for it
    pub path: String,

    pub status: u16,

    /// Response size
    pub bytes: u64,

    pub referrer: String,

    pub user_agent: String,

    /// Every slot value in slot order, including opaque ones
    pub raw_fields: Vec<String>,
}

impl LogRecord {
    /// Seconds since the Unix epoch
    pub fn unix_time(&self) -> i64 {
        self.timestamp.and_utc().timestamp()
    }
}

/// Arena of records plus lazily built grouping indices
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<LogRecord>,

    // Path symbol id per record, parallel to `records`
    path_ids: Vec<u32>,

    paths: SymbolTable,

    session_gap_secs: u64,

    // client_key -> record indices sorted by (timestamp, ingestion order)
    by_client: OnceLock<BTreeMap<String, Vec<usize>>>,

    // path id -> record indices in ingestion order
    by_path: OnceLock<Vec<Vec<usize>>>,
}

impl RecordStore {
    pub fn new(session_gap_secs: u64) -> Self {
        Self {
            session_gap_secs,
            ..Self::default()
        }
    }

    pub fn from_records(records: Vec<LogRecord>, session_gap_secs: u64) -> Self {
        let mut store = Self::new(session_gap_secs);
        store.extend(records);
        store
    }

    /// Append a record; invalidates the grouping indices
    pub fn push(&mut self, record: LogRecord) {
        let path_id = self.paths.intern(&record.path);
        self.path_ids.push(path_id);
        self.records.push(record);
        self.invalidate();
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = LogRecord>) {
        let records = records.into_iter();
        self.records.reserve(records.size_hint().0);
        for record in records {
            let path_id = self.paths.intern(&record.path);
            self.path_ids.push(path_id);
            self.records.push(record);
        }
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.by_client = OnceLock::new();
        self.by_path = OnceLock::new();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn session_gap_secs(&self) -> u64 {
        self.session_gap_secs
    }

    /// All records in ingestion order
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn get(&self, idx: usize) -> Option<&LogRecord> {
        self.records.get(idx)
    }

    /// Path symbol id of the record at `idx`
    pub fn record_path_id(&self, idx: usize) -> u32 {
        self.path_ids[idx]
    }

    pub fn paths(&self) -> &SymbolTable {
        &self.paths
    }

    pub fn path_id(&self, path: &str) -> Option<u32> {
        self.paths.id(path)
    }

    pub fn path_name(&self, id: u32) -> Option<&str> {
        self.paths.get(id)
    }

    /// Records grouped by client, each group ordered by timestamp.
    /// Equal timestamps keep ingestion order.
    pub fn by_client(&self) -> &BTreeMap<String, Vec<usize>> {
        self.by_client.get_or_init(|| {
            let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
            for (idx, record) in self.records.iter().enumerate() {
                match groups.get_mut(record.client_key.as_str()) {
                    Some(group) => group.push(idx),
                    None => {
                        groups.insert(record.client_key.clone(), vec![idx]);
                    }
                }
            }

            // Stable sort: indices are already ascending within a group
            groups
                .par_iter_mut()
                .for_each(|(_, group)| group.sort_by_key(|&idx| self.records[idx].timestamp));

            tracing::debug!("Built client index: {} clients", groups.len());
            groups
        })
    }

    pub fn client(&self, client_key: &str) -> Option<&[usize]> {
        self.by_client().get(client_key).map(Vec::as_slice)
    }

    pub fn client_count(&self) -> usize {
        self.by_client().len()
    }

    /// Records grouped by path id, ingestion order
    pub fn by_path(&self) -> &[Vec<usize>] {
        self.by_path.get_or_init(|| {
            let mut groups = vec![Vec::new(); self.paths.len()];
            for (idx, &path_id) in self.path_ids.iter().enumerate() {
                groups[path_id as usize].push(idx);
            }
            tracing::debug!("Built path index: {} paths", groups.len());
            groups
        })
    }

    pub fn path_records(&self, path: &str) -> &[usize] {
        match self.paths.id(path) {
            Some(id) => &self.by_path()[id as usize],
            None => &[],
        }
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;

    #[test]
    fn test_client_index_sorted_by_time() {
        let store = RecordStore::from_records(
            vec![
                record("c1", "/b", 20),
                record("c2", "/a", 5),
                record("c1", "/a", 10),
            ],
            3600,
        );

        assert_eq!(store.client("c1"), Some(&[2, 0][..]));
        assert_eq!(store.client("c2"), Some(&[1][..]));
        assert_eq!(store.client("c3"), None);
        assert_eq!(store.client_count(), 2);
    }

    #[test]
    fn test_equal_timestamps_keep_ingestion_order() {
        let store = RecordStore::from_records(
            vec![
                record("c1", "/x", 10),
                record("c1", "/y", 10),
                record("c1", "/w", 5),
                record("c1", "/z", 10),
            ],
            3600,
        );
        assert_eq!(store.client("c1"), Some(&[2, 0, 1, 3][..]));
    }

    #[test]
    fn test_path_index_and_ids() {
        let store = RecordStore::from_records(
            vec![
                record("c1", "/a", 1),
                record("c2", "/b", 2),
                record("c3", "/a", 3),
            ],
            3600,
        );

        assert_eq!(store.path_count(), 2);
        assert_eq!(store.path_id("/a"), Some(0));
        assert_eq!(store.path_name(1), Some("/b"));
        assert_eq!(store.path_records("/a"), &[0, 2]);
        assert_eq!(store.path_records("/missing"), &[] as &[usize]);
        assert_eq!(store.record_path_id(1), 1);
    }

    #[test]
    fn test_push_rebuilds_indices() {
        let mut store = RecordStore::new(3600);
        store.push(record("c1", "/a", 10));
        assert_eq!(store.client("c1"), Some(&[0][..]));

        store.push(record("c1", "/b", 5));
        assert_eq!(store.client("c1"), Some(&[1, 0][..]));
        assert_eq!(store.path_records("/b"), &[1]);
    }

    #[test]
    fn test_empty_store() {
        let store = RecordStore::new(60);
        assert!(store.is_empty());
        assert_eq!(store.client_count(), 0);
        assert!(store.by_path().is_empty());
        assert_eq!(store.session_gap_secs(), 60);
    }
}
