//! Session reconstruction
//!
//! Sessions are views over the record store, recomputed on demand. A
//! client's time-ordered records are cut wherever two consecutive requests
//! are further apart than the store's session gap.

use crate::storage::RecordStore;

/// One request inside a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStep<'s> {
    /// Position of the record in the store
    pub record: usize,
    pub path: &'s str,
    pub path_id: u32,
    /// Unix seconds
    pub timestamp: i64,
}

/// A maximal run of one client's requests with no gap above the threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session<'s> {
    pub client_key: &'s str,
    pub steps: Vec<SessionStep<'s>>,
}

impl<'s> Session<'s> {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn first(&self) -> Option<&SessionStep<'s>> {
        self.steps.first()
    }

    pub fn start_time(&self) -> Option<i64> {
        self.steps.first().map(|s| s.timestamp)
    }

    pub fn end_time(&self) -> Option<i64> {
        self.steps.last().map(|s| s.timestamp)
    }

    /// Time spent on step `i` before the next request; `None` for the last step
    pub fn view_time(&self, i: usize) -> Option<i64> {
        let next = self.steps.get(i + 1)?;
        Some(next.timestamp - self.steps[i].timestamp)
    }

    /// Same session with consecutive requests for one path merged into the first
    pub fn collapse_repeats(&self) -> Session<'s> {
        let mut steps = self.steps.clone();
        steps.dedup_by_key(|s| s.path_id);
        Session {
            client_key: self.client_key,
            steps,
        }
    }
}

/// Split one client's records (already time-ordered) into sessions
fn split_client<'s>(store: &'s RecordStore, client_key: &'s str, records: &[usize]) -> Vec<Session<'s>> {
    let gap = i64::try_from(store.session_gap_secs()).unwrap_or(i64::MAX);
    let mut sessions = Vec::new();
    let mut current: Vec<SessionStep<'s>> = Vec::new();

    for &idx in records {
        let record = &store.records()[idx];
        let step = SessionStep {
            record: idx,
            path: record.path.as_str(),
            path_id: store.record_path_id(idx),
            timestamp: record.unix_time(),
        };

        if let Some(prev) = current.last() {
            if step.timestamp - prev.timestamp > gap {
                sessions.push(Session {
                    client_key,
                    steps: std::mem::take(&mut current),
                });
            }
        }
        current.push(step);
    }

    if !current.is_empty() {
        sessions.push(Session { client_key, steps: current });
    }
    sessions
}

/// Sessions of every client, clients in key order, sessions in time order
pub fn reconstruct(store: &RecordStore) -> Vec<Session<'_>> {
    store
        .by_client()
        .iter()
        .flat_map(|(client_key, records)| split_client(store, client_key.as_str(), records))
        .collect()
}

/// Sessions of one client; empty if the client is unknown
pub fn client_sessions<'s>(store: &'s RecordStore, client_key: &str) -> Vec<Session<'s>> {
    match store.by_client().get_key_value(client_key) {
        Some((key, records)) => split_client(store, key.as_str(), records),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::record;

    const T: i64 = 1_700_000_000;

    fn paths<'a>(session: &Session<'a>) -> Vec<&'a str> {
        session.steps.iter().map(|s| s.path).collect()
    }

    #[test]
    fn test_gap_splits_sessions() {
        let store = RecordStore::from_records(
            vec![
                record("c1", "/a", T),
                record("c1", "/b", T + 10),
                record("c1", "/c", T + 4000),
            ],
            3600,
        );

        let sessions = reconstruct(&store);
        assert_eq!(sessions.len(), 2);
        assert_eq!(paths(&sessions[0]), vec!["/a", "/b"]);
        assert_eq!(sessions[0].steps[1].timestamp, T + 10);
        assert_eq!(paths(&sessions[1]), vec!["/c"]);
        assert_eq!(sessions[1].start_time(), Some(T + 4000));
    }

    #[test]
    fn test_gap_equal_to_threshold_stays_in_session() {
        let store = RecordStore::from_records(
            vec![record("c1", "/a", T), record("c1", "/b", T + 3600)],
            3600,
        );
        assert_eq!(reconstruct(&store).len(), 1);
    }

    #[test]
    fn test_out_of_order_input_is_sorted() {
        let store = RecordStore::from_records(
            vec![
                record("c1", "/late", T + 50),
                record("c1", "/early", T),
            ],
            3600,
        );
        let sessions = reconstruct(&store);
        assert_eq!(paths(&sessions[0]), vec!["/early", "/late"]);
        assert_eq!(sessions[0].steps[0].record, 1);
    }

    #[test]
    fn test_sessions_partition_client_records() {
        let mut records = Vec::new();
        for i in 0..50 {
            let client = if i % 3 == 0 { "c1" } else { "c2" };
            // irregular gaps, some above the threshold
            records.push(record(client, &format!("/p{}", i % 7), T + i * i * 17));
        }
        let store = RecordStore::from_records(records, 600);

        for (client, idxs) in store.by_client() {
            let sessions = client_sessions(&store, client);
            let covered: Vec<usize> = sessions
                .iter()
                .flat_map(|s| s.steps.iter().map(|st| st.record))
                .collect();
            assert_eq!(&covered, idxs);

            for session in &sessions {
                assert!(!session.is_empty());
                assert!(session.steps.windows(2).all(|w| {
                    w[0].timestamp <= w[1].timestamp && w[1].timestamp - w[0].timestamp <= 600
                }));
            }
            for pair in sessions.windows(2) {
                assert!(pair[1].start_time().unwrap() - pair[0].end_time().unwrap() > 600);
            }
        }
    }

    #[test]
    fn test_reconstruction_is_deterministic() {
        let store = RecordStore::from_records(
            vec![
                record("b", "/x", T),
                record("a", "/y", T + 5),
                record("b", "/z", T + 9000),
                record("a", "/y", T + 5),
            ],
            3600,
        );
        let first = reconstruct(&store);
        let second = reconstruct(&store);
        assert_eq!(first, second);
        assert_eq!(first[0].client_key, "a");
    }

    #[test]
    fn test_view_time() {
        let store = RecordStore::from_records(
            vec![record("c1", "/a", T), record("c1", "/b", T + 42)],
            3600,
        );
        let sessions = reconstruct(&store);
        assert_eq!(sessions[0].view_time(0), Some(42));
        assert_eq!(sessions[0].view_time(1), None);
    }

    #[test]
    fn test_collapse_repeats() {
        let store = RecordStore::from_records(
            vec![
                record("c1", "/a", T),
                record("c1", "/a", T + 1),
                record("c1", "/b", T + 2),
                record("c1", "/a", T + 3),
            ],
            3600,
        );
        let session = reconstruct(&store).remove(0).collapse_repeats();
        assert_eq!(paths(&session), vec!["/a", "/b", "/a"]);
        assert_eq!(session.view_time(0), Some(2));
    }

    #[test]
    fn test_unknown_client() {
        let store = RecordStore::from_records(vec![record("c1", "/a", T)], 3600);
        assert!(client_sessions(&store, "nobody").is_empty());
        assert!(reconstruct(&RecordStore::new(3600)).is_empty());
    }
}
