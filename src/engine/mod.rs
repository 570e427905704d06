//! Engine API and implementation

mod log_engine;

pub use log_engine::LogEngine;

use crate::analysis::{GraphOptions, TransitionGraph, UsageOptions, UsageStats};
use crate::error::Result;
use crate::format::LogFormatSpec;
use crate::ingest::{LoadSummary, LogSource};

/// The three operations a front end drives
pub trait SessionAnalytics {
    /// Replace the current dataset with the parsed contents of `sources`.
    ///
    /// On error the previous dataset stays loaded.
    fn load(
        &mut self,
        sources: Vec<Box<dyn LogSource>>,
        format: &LogFormatSpec,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<LoadSummary>;

    /// Bucketed usage series; empty when nothing is loaded
    fn usage_stats(&self, options: &UsageOptions) -> Result<UsageStats>;

    /// Layered transition graph; zero layers when nothing is loaded
    fn transfer_graph(&self, options: &GraphOptions) -> Result<TransitionGraph>;
}
