//! In-memory session analytics engine

use crate::analysis::{self, GraphOptions, Session, TransitionGraph, UsageOptions, UsageStats};
use crate::error::Result;
use crate::format::{compile, LogFormatSpec, DEFAULT_SESSION_GAP_SECS};
use crate::ingest::{self, LoadOptions, LoadSummary, LogSource};
use crate::storage::RecordStore;

use super::SessionAnalytics;

/// Owns the loaded dataset and answers queries over it.
///
/// Loading needs `&mut self` and queries `&self`, so a query can never
/// observe a half-loaded store. Share across threads with
/// `Arc<RwLock<LogEngine>>`.
#[derive(Debug)]
pub struct LogEngine {
    store: RecordStore,
    last_summary: Option<LoadSummary>,
}

impl Default for LogEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LogEngine {
    /// Engine with nothing loaded
    pub fn new() -> Self {
        Self {
            store: RecordStore::new(DEFAULT_SESSION_GAP_SECS),
            last_summary: None,
        }
    }

    /// Load with default options (global worker pool, no cancellation)
    pub fn load<F>(
        &mut self,
        sources: Vec<Box<dyn LogSource>>,
        format: &LogFormatSpec,
        on_progress: F,
    ) -> Result<LoadSummary>
    where
        F: FnMut(u64, u64),
    {
        self.load_with(sources, format, &LoadOptions::default(), on_progress)
    }

    /// Parse `sources` into a new store and swap it in.
    ///
    /// The format is compiled before any source is touched. The current
    /// store is replaced only once every source parsed successfully.
    pub fn load_with<F>(
        &mut self,
        sources: Vec<Box<dyn LogSource>>,
        format: &LogFormatSpec,
        options: &LoadOptions,
        on_progress: F,
    ) -> Result<LoadSummary>
    where
        F: FnMut(u64, u64),
    {
        let matcher = compile(format)?;
        let source_count = sources.len();

        let (store, summary) = match ingest::ingest(sources, &matcher, options, on_progress) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!("Load of {} sources failed, keeping previous dataset: {}", source_count, e);
                return Err(e);
            }
        };

        tracing::info!(
            "Loaded {} records from {} sources ({} bytes, {} malformed, {} filtered) in {}ms",
            summary.records,
            summary.sources,
            summary.bytes_read,
            summary.malformed_lines,
            summary.filtered_lines,
            summary.elapsed_ms
        );

        self.store = store;
        self.last_summary = Some(summary.clone());
        Ok(summary)
    }

    pub fn usage_stats(&self, options: &UsageOptions) -> Result<UsageStats> {
        analysis::usage_stats(&self.store, options)
    }

    pub fn transfer_graph(&self, options: &GraphOptions) -> Result<TransitionGraph> {
        analysis::transfer_graph(&self.store, options)
    }

    /// Drop the loaded dataset
    pub fn clear(&mut self) {
        let records = self.store.len();
        self.store = RecordStore::new(self.store.session_gap_secs());
        self.last_summary = None;
        tracing::info!("Dataset cleared ({} records)", records);
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn sessions(&self) -> Vec<Session<'_>> {
        analysis::reconstruct(&self.store)
    }

    pub fn last_summary(&self) -> Option<&LoadSummary> {
        self.last_summary.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.last_summary.is_some()
    }
}

impl SessionAnalytics for LogEngine {
    fn load(
        &mut self,
        sources: Vec<Box<dyn LogSource>>,
        format: &LogFormatSpec,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<LoadSummary> {
        self.load_with(sources, format, &LoadOptions::default(), on_progress)
    }

    fn usage_stats(&self, options: &UsageOptions) -> Result<UsageStats> {
        LogEngine::usage_stats(self, options)
    }

    fn transfer_graph(&self, options: &GraphOptions) -> Result<TransitionGraph> {
        LogEngine::transfer_graph(self, options)
    }
}
