//! Layered page-to-page transition graph
//!
//! Built in two passes over the sessions:
//!
//! 1. Accumulation: every session walks at most `max_steps` steps; each step
//!    whose path passes the filters becomes a visit of the node for that path
//!    in the step's layer. The visit either transfers to the next step's node
//!    or counts as a drop.
//! 2. Pruning: each layer keeps its top nodes by session count; transfers to
//!    a node that did not survive are folded into the source's drop count.
//!
//! For every node `sum(transfer_count) + drop_count == session_count`.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::sessions::{reconstruct, Session};
use crate::error::{LogError, Result};
use crate::storage::RecordStore;

/// Transition graph query parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOptions {
    /// Steps walked per session, one layer per step
    pub max_steps: usize,
    /// Nodes visited by fewer sessions are dropped
    pub min_session_count: u32,
    pub max_nodes_per_layer: usize,
    /// Only paths containing this substring become nodes (empty = any)
    pub must_contain: String,
    /// Only paths with this prefix become nodes (empty = any)
    pub must_start_with: String,
    /// Sessions with fewer steps are ignored
    pub min_session_steps: usize,
    /// Sessions with more steps are ignored
    pub max_session_steps: Option<usize>,
    /// Merge consecutive requests for the same path into one step
    pub collapse_repeats: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            max_steps: 8,
            min_session_count: 3,
            max_nodes_per_layer: 30,
            must_contain: String::new(),
            must_start_with: String::new(),
            min_session_steps: 1,
            max_session_steps: None,
            collapse_repeats: false,
        }
    }
}

impl GraphOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn min_session_count(mut self, count: u32) -> Self {
        self.min_session_count = count;
        self
    }

    pub fn max_nodes_per_layer(mut self, nodes: usize) -> Self {
        self.max_nodes_per_layer = nodes;
        self
    }

    pub fn must_contain(mut self, needle: impl Into<String>) -> Self {
        self.must_contain = needle.into();
        self
    }

    pub fn must_start_with(mut self, prefix: impl Into<String>) -> Self {
        self.must_start_with = prefix.into();
        self
    }

    pub fn min_session_steps(mut self, steps: usize) -> Self {
        self.min_session_steps = steps;
        self
    }

    pub fn max_session_steps(mut self, steps: Option<usize>) -> Self {
        self.max_session_steps = steps;
        self
    }

    pub fn collapse_repeats(mut self, collapse: bool) -> Self {
        self.collapse_repeats = collapse;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_nodes_per_layer == 0 {
            return Err(LogError::InvalidOptions(
                "max nodes per layer must be at least 1".to_string(),
            ));
        }
        if let Some(max) = self.max_session_steps {
            if self.min_session_steps > max {
                return Err(LogError::InvalidOptions(format!(
                    "min session steps ({}) exceeds max session steps ({})",
                    self.min_session_steps, max
                )));
            }
        }
        Ok(())
    }

    fn accepts_path(&self, path: &str) -> bool {
        path.contains(self.must_contain.as_str()) && path.starts_with(self.must_start_with.as_str())
    }

    fn accepts_session(&self, session: &Session<'_>) -> bool {
        session.len() >= self.min_session_steps
            && self.max_session_steps.map_or(true, |max| session.len() <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionGraphNode {
    pub path: String,
    /// Symbol id of the path, identical in every layer
    pub path_id: u32,
    pub session_count: u32,
    /// Seconds, 0 when no session continued from this node
    pub median_view_time: u64,
    /// Sessions that ended here or went somewhere not in the next layer
    pub drop_count: u32,
    /// Next-layer path id -> sessions that went there
    pub transfer_count: BTreeMap<u32, u32>,
}

impl TransitionGraphNode {
    pub fn transfer_total(&self) -> u32 {
        self.transfer_count.values().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionGraphLayer {
    pub nodes: Vec<TransitionGraphNode>,
}

impl TransitionGraphLayer {
    pub fn node(&self, path_id: u32) -> Option<&TransitionGraphNode> {
        self.nodes.iter().find(|n| n.path_id == path_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionGraph {
    pub layers: Vec<TransitionGraphLayer>,
}

impl TransitionGraph {
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.layers.iter().map(|l| l.nodes.len()).sum()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (usize, &TransitionGraphNode)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| layer.nodes.iter().map(move |n| (i, n)))
    }
}

/// Node statistics before pruning
#[derive(Debug)]
struct NodeAcc<'s> {
    path: &'s str,
    session_count: u32,
    view_times: Vec<i64>,
    drop_count: u32,
    transfers: BTreeMap<u32, u32>,
}

impl<'s> NodeAcc<'s> {
    fn new(path: &'s str) -> Self {
        Self {
            path,
            session_count: 0,
            view_times: Vec::new(),
            drop_count: 0,
            transfers: BTreeMap::new(),
        }
    }

    fn median_view_time(&mut self) -> u64 {
        if self.view_times.is_empty() {
            return 0;
        }
        self.view_times.sort_unstable();
        let mid = self.view_times[self.view_times.len() / 2];
        u64::try_from(mid).unwrap_or(0)
    }
}

type Layer<'s> = HashMap<u32, NodeAcc<'s>>;

fn accumulate<'s>(sessions: &[Session<'s>], options: &GraphOptions) -> Vec<Layer<'s>> {
    // No session walks past its own length, whatever max_steps says
    let longest = sessions.iter().map(Session::len).max().unwrap_or(0);
    let depth = options.max_steps.min(longest);
    let mut layers: Vec<Layer<'s>> = (0..depth).map(|_| HashMap::new()).collect();

    for session in sessions {
        let walk = session.len().min(options.max_steps);
        for i in 0..walk {
            let step = &session.steps[i];
            if !options.accepts_path(step.path) {
                continue;
            }

            let node = layers[i]
                .entry(step.path_id)
                .or_insert_with(|| NodeAcc::new(step.path));
            node.session_count += 1;
            if let Some(view_time) = session.view_time(i) {
                node.view_times.push(view_time);
            }

            match session.steps.get(i + 1) {
                Some(next) if i + 1 < options.max_steps && options.accepts_path(next.path) => {
                    *node.transfers.entry(next.path_id).or_insert(0) += 1;
                }
                _ => node.drop_count += 1,
            }
        }
    }

    layers
}

/// Ids kept in one layer: above the threshold, top N by count, ties by path
fn survivors(layer: &Layer<'_>, options: &GraphOptions) -> Vec<u32> {
    let mut ranked: Vec<(&u32, &NodeAcc<'_>)> = layer
        .iter()
        .filter(|(_, node)| node.session_count >= options.min_session_count)
        .collect();
    ranked.sort_by(|(_, a), (_, b)| {
        b.session_count
            .cmp(&a.session_count)
            .then_with(|| a.path.cmp(b.path))
    });
    ranked.truncate(options.max_nodes_per_layer);
    ranked.into_iter().map(|(&id, _)| id).collect()
}

fn prune(mut layers: Vec<Layer<'_>>, options: &GraphOptions) -> TransitionGraph {
    let kept: Vec<Vec<u32>> = layers.iter().map(|layer| survivors(layer, options)).collect();
    let kept_sets: Vec<HashSet<u32>> = kept.iter().map(|ids| ids.iter().copied().collect()).collect();
    let empty = HashSet::new();

    let mut graph = TransitionGraph::default();
    for (i, ids) in kept.iter().enumerate() {
        let next_layer = kept_sets.get(i + 1).unwrap_or(&empty);
        let mut nodes = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(mut acc) = layers[i].remove(id) else {
                continue;
            };
            let mut drop_count = acc.drop_count;
            let mut transfer_count = BTreeMap::new();
            for (target, count) in std::mem::take(&mut acc.transfers) {
                if next_layer.contains(&target) {
                    transfer_count.insert(target, count);
                } else {
                    drop_count += count;
                }
            }

            let node = TransitionGraphNode {
                path: acc.path.to_string(),
                path_id: *id,
                session_count: acc.session_count,
                median_view_time: acc.median_view_time(),
                drop_count,
                transfer_count,
            };
            debug_assert_eq!(
                node.transfer_total() + node.drop_count,
                node.session_count,
                "transfer/drop accounting broken for {} in layer {}",
                node.path,
                i
            );
            nodes.push(node);
        }
        graph.layers.push(TransitionGraphLayer { nodes });
    }

    while graph.layers.last().is_some_and(|l| l.nodes.is_empty()) {
        graph.layers.pop();
    }
    graph
}

/// Build the transition graph of all sessions in the store
pub fn transfer_graph(store: &RecordStore, options: &GraphOptions) -> Result<TransitionGraph> {
    options.validate()?;
    if store.is_empty() || options.max_steps == 0 {
        return Ok(TransitionGraph::default());
    }

    let sessions: Vec<Session<'_>> = reconstruct(store)
        .into_iter()
        .map(|s| if options.collapse_repeats { s.collapse_repeats() } else { s })
        .filter(|s| options.accepts_session(s))
        .collect();

    let layers = accumulate(&sessions, options);
    let graph = prune(layers, options);

    tracing::debug!(
        "Transition graph: {} sessions, {} layers, {} nodes",
        sessions.len(),
        graph.layers.len(),
        graph.node_count()
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::record;
    use crate::storage::LogRecord;

    const T: i64 = 1_700_000_000;

    /// One session per entry, steps 10s apart
    fn store_of(sessions: &[&[&str]]) -> RecordStore {
        let mut records: Vec<LogRecord> = Vec::new();
        for (n, paths) in sessions.iter().enumerate() {
            let client = format!("c{}", n);
            for (i, path) in paths.iter().enumerate() {
                records.push(record(&client, path, T + i as i64 * 10));
            }
        }
        RecordStore::from_records(records, 3600)
    }

    fn open() -> GraphOptions {
        GraphOptions::new().min_session_count(1)
    }

    fn assert_conserved(graph: &TransitionGraph) {
        for (layer, node) in graph.nodes() {
            assert_eq!(
                node.transfer_total() + node.drop_count,
                node.session_count,
                "layer {} node {}",
                layer,
                node.path
            );
        }
    }

    #[test]
    fn test_basic_layers() {
        let store = store_of(&[&["/a", "/b"], &["/a", "/c"], &["/a"]]);
        let graph = transfer_graph(&store, &open()).unwrap();

        assert_eq!(graph.layers.len(), 2);
        let a = &graph.layers[0].nodes[0];
        assert_eq!(a.path, "/a");
        assert_eq!(a.session_count, 3);
        assert_eq!(a.drop_count, 1);
        assert_eq!(a.transfer_count.len(), 2);
        assert_eq!(a.median_view_time, 10);

        let b_id = store.path_id("/b").unwrap();
        assert_eq!(a.transfer_count[&b_id], 1);
        let b = graph.layers[1].node(b_id).unwrap();
        assert_eq!(b.drop_count, 1);
        assert_eq!(b.median_view_time, 0);
        assert_conserved(&graph);
    }

    #[test]
    fn test_path_id_stable_across_layers() {
        let store = store_of(&[&["/a", "/b", "/a"], &["/b", "/a", "/b"]]);
        let graph = transfer_graph(&store, &open()).unwrap();

        let a_id = store.path_id("/a").unwrap();
        for (_, node) in graph.nodes() {
            if node.path == "/a" {
                assert_eq!(node.path_id, a_id);
            }
        }
        assert!(graph.layers[0].node(a_id).is_some());
        assert!(graph.layers[1].node(a_id).is_some());
        assert!(graph.layers[2].node(a_id).is_some());
    }

    #[test]
    fn test_max_steps_turns_continuation_into_drop() {
        let store = store_of(&[&["/a", "/b", "/c"]]);
        let graph = transfer_graph(&store, &open().max_steps(2)).unwrap();

        assert_eq!(graph.layers.len(), 2);
        let b = &graph.layers[1].nodes[0];
        assert_eq!(b.drop_count, 1);
        assert!(b.transfer_count.is_empty());
        // the session still continued, so the view time is sampled
        assert_eq!(b.median_view_time, 10);
    }

    #[test]
    fn test_top_n_pruning_folds_into_drops() {
        let store = store_of(&[
            &["/a", "/x"],
            &["/a", "/x"],
            &["/a", "/x"],
            &["/a", "/y"],
            &["/a", "/y"],
            &["/a", "/z"],
            &["/a", "/w"],
        ]);
        let graph = transfer_graph(&store, &open().max_nodes_per_layer(2)).unwrap();

        let layer1: Vec<&str> = graph.layers[1].nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(layer1, vec!["/x", "/y"]);

        let a = &graph.layers[0].nodes[0];
        assert_eq!(a.session_count, 7);
        assert_eq!(a.transfer_total(), 5);
        assert_eq!(a.drop_count, 2);
        assert_conserved(&graph);
    }

    #[test]
    fn test_ties_break_by_path() {
        let store = store_of(&[&["/b"], &["/c"], &["/a"]]);
        let graph = transfer_graph(&store, &open().max_nodes_per_layer(2)).unwrap();
        let layer0: Vec<&str> = graph.layers[0].nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(layer0, vec!["/a", "/b"]);
    }

    #[test]
    fn test_threshold_removes_rare_nodes() {
        let store = store_of(&[&["/a", "/b"], &["/a", "/b"], &["/a", "/c"]]);
        let graph = transfer_graph(&store, &GraphOptions::new().min_session_count(2)).unwrap();

        assert!(graph.layers[1].nodes.iter().all(|n| n.path != "/c"));
        let a = &graph.layers[0].nodes[0];
        assert_eq!(a.transfer_total(), 2);
        assert_eq!(a.drop_count, 1);
        assert_conserved(&graph);
    }

    #[test]
    fn test_filters() {
        let store = store_of(&[&["/docs/a", "/blog/x", "/docs/b"], &["/docs/a", "/docs/b"]]);
        let graph = transfer_graph(&store, &open().must_start_with("/docs")).unwrap();

        assert!(graph.nodes().all(|(_, n)| n.path.starts_with("/docs")));
        let a = &graph.layers[0].nodes[0];
        assert_eq!(a.session_count, 2);
        assert_eq!(a.transfer_total(), 1);
        assert_eq!(a.drop_count, 1);
        assert_conserved(&graph);

        let graph = transfer_graph(&store, &open().must_contain("blog")).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.layers.len(), 2);
        assert!(graph.layers[0].nodes.is_empty());
    }

    #[test]
    fn test_upper_median() {
        let mut records = Vec::new();
        for (n, gap) in [10, 20, 30, 40].iter().enumerate() {
            let client = format!("c{}", n);
            records.push(record(&client, "/a", T));
            records.push(record(&client, "/b", T + gap));
        }
        let store = RecordStore::from_records(records, 3600);
        let graph = transfer_graph(&store, &open()).unwrap();
        assert_eq!(graph.layers[0].nodes[0].median_view_time, 30);
    }

    #[test]
    fn test_session_length_bounds() {
        let store = store_of(&[&["/a"], &["/a", "/b"], &["/a", "/b", "/c", "/d"]]);

        let graph = transfer_graph(&store, &open().min_session_steps(2)).unwrap();
        assert_eq!(graph.layers[0].nodes[0].session_count, 2);

        let graph = transfer_graph(&store, &open().max_session_steps(Some(2))).unwrap();
        assert_eq!(graph.layers[0].nodes[0].session_count, 2);
        assert_eq!(graph.layers.len(), 2);
    }

    #[test]
    fn test_collapse_repeats() {
        let store = store_of(&[&["/a", "/a", "/a", "/b"]]);
        let graph = transfer_graph(&store, &open().collapse_repeats(true)).unwrap();

        assert_eq!(graph.layers.len(), 2);
        assert_eq!(graph.layers[0].nodes[0].median_view_time, 30);
        assert_eq!(graph.layers[1].nodes[0].path, "/b");
    }

    #[test]
    fn test_invalid_options() {
        let store = store_of(&[&["/a"]]);
        assert!(matches!(
            transfer_graph(&store, &open().max_nodes_per_layer(0)),
            Err(LogError::InvalidOptions(_))
        ));
        assert!(matches!(
            transfer_graph(&store, &open().min_session_steps(3).max_session_steps(Some(2))),
            Err(LogError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_unbounded_max_steps() {
        let store = store_of(&[&["/a", "/b"], &["/a"]]);
        let graph = transfer_graph(&store, &open().max_steps(usize::MAX)).unwrap();

        assert_eq!(graph.layers.len(), 2);
        let a = &graph.layers[0].nodes[0];
        assert_eq!(a.session_count, 2);
        assert_eq!(a.transfer_total(), 1);
        assert_eq!(a.drop_count, 1);
        assert_conserved(&graph);
    }

    #[test]
    fn test_empty_store_has_no_layers() {
        let graph = transfer_graph(&RecordStore::new(3600), &GraphOptions::new()).unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn test_conservation_on_mixed_sessions() {
        let paths = ["/", "/a", "/b", "/c", "/d"];
        let mut records = Vec::new();
        for c in 0..40i64 {
            let client = format!("c{}", c);
            for s in 0..(c % 9) {
                let path = paths[((c * 7 + s * 3) % 5) as usize];
                records.push(record(&client, path, T + s * 15 + (c % 4) * 5000));
            }
        }
        let store = RecordStore::from_records(records, 3600);
        let options = GraphOptions::new()
            .max_steps(5)
            .min_session_count(2)
            .max_nodes_per_layer(3);

        let graph = transfer_graph(&store, &options).unwrap();
        assert!(!graph.is_empty());
        assert_conserved(&graph);
        for layer in &graph.layers {
            assert!(layer.nodes.len() <= 3);
        }
    }
}
