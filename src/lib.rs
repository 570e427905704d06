//! logbase - access-log ingestion and session analytics
//!
//! # Architecture
//!
//! - **Format**: declarative line layout compiled once into a `LineMatcher`
//! - **Ingestion**: sources parsed in parallel, merged in source order
//! - **Record store**: arena of records with lazy per-client / per-path indices
//! - **Analysis**: sessions derived on demand, usage series, transition graph
//!
//! # Usage example
//!
//! ```no_run
//! use logbase::{file_sources, GraphOptions, LogEngine, LogFormatSpec, UsageOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = LogEngine::new();
//! let summary = engine.load(
//!     file_sources(["access.log"]),
//!     &LogFormatSpec::standard(),
//!     |done, total| eprintln!("{}/{} bytes", done, total),
//! )?;
//! println!("{} records, {} malformed", summary.records, summary.malformed_lines);
//!
//! let usage = engine.usage_stats(&UsageOptions::new().bucket_seconds(86400))?;
//! let graph = engine.transfer_graph(&GraphOptions::new().must_start_with("/docs"))?;
//! println!("{} usage rows, {} graph layers", usage.rows.len(), graph.layers.len());
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod engine;
pub mod error;
pub mod format;
pub mod ingest;
pub mod storage;

pub use analysis::{
    GraphOptions, Session, SessionStep, TransitionGraph, TransitionGraphLayer, TransitionGraphNode,
    UsageCategory, UsageOptions, UsageStatRow, UsageStats,
};
pub use engine::{LogEngine, SessionAnalytics};
pub use error::{LogError, Result};
pub use format::{compile, FieldRole, LineMatcher, LogFormatSpec};
pub use ingest::{
    file_sources, BytesSource, CancelToken, FileSource, LoadOptions, LoadSummary, LogSource,
    ReaderSource,
};
pub use storage::{LogRecord, RecordStore};
