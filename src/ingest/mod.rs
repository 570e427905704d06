//! Stream ingestion
//!
//! Sources are parsed in parallel, one rayon task per source, each into a
//! local buffer. Buffers are merged into a fresh `RecordStore` in source
//! order once every worker has finished, so the caller only ever sees a
//! complete store or an error.
//!
//! ```text
//! Worker(s)               Channel               Caller thread
//!     │                      │                        │
//!     ├─ chunk parsed ──────►│ bytes consumed ───────►│ on_progress(done, total)
//!     ├─ stream done         │                        │
//!     └─ StreamOutput ──────────────────────────────►│ merge in source order
//! ```

pub mod filter;
pub mod lines;
pub mod parser;

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{unbounded, Sender};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};
use crate::format::LineMatcher;
use crate::storage::RecordStore;
use parser::StreamOutput;

pub use parser::{parse_line, LineOutcome};

/// A byte stream holding one log file
pub trait LogSource: Send {
    /// Name used in errors and logs
    fn name(&self) -> &str;

    /// Total size announced up front, used for progress math
    fn declared_size(&self) -> u64;

    /// Open the stream. Called on the worker thread.
    fn into_reader(self: Box<Self>) -> io::Result<Box<dyn Read + Send>>;
}

/// Log file on disk, opened lazily by the worker
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    size: u64,
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        // Unreadable metadata surfaces as a load error once the file is opened
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self {
            name: path.display().to_string(),
            path,
            size,
        }
    }
}

impl LogSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_size(&self) -> u64 {
        self.size
    }

    fn into_reader(self: Box<Self>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(&self.path)?))
    }
}

/// Log content already in memory
#[derive(Debug, Clone)]
pub struct BytesSource {
    name: String,
    data: Vec<u8>,
}

impl BytesSource {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self { name: name.into(), data }
    }
}

impl LogSource for BytesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn into_reader(self: Box<Self>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.data)))
    }
}

/// Any reader with a size known in advance
pub struct ReaderSource<R> {
    name: String,
    reader: R,
    size: u64,
}

impl<R: Read + Send + 'static> ReaderSource<R> {
    pub fn new(name: impl Into<String>, reader: R, size: u64) -> Self {
        Self { name: name.into(), reader, size }
    }
}

impl<R: Read + Send + 'static> LogSource for ReaderSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_size(&self) -> u64 {
        self.size
    }

    fn into_reader(self: Box<Self>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.reader))
    }
}

/// Boxed file sources for a list of paths
pub fn file_sources<I, P>(paths: I) -> Vec<Box<dyn LogSource>>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    paths
        .into_iter()
        .map(|p| Box::new(FileSource::new(p)) as Box<dyn LogSource>)
        .collect()
}

/// Shared flag for cooperative cancellation, checked between chunks
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag (e.g. one registered with `signal_hook::flag`)
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Knobs for one load
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Worker threads; `None` uses the global rayon pool
    pub workers: Option<usize>,
    pub cancel: CancelToken,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = Some(n);
        self
    }

    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Statistics of a completed load
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub sources: usize,
    pub bytes_read: u64,
    pub records: usize,
    /// Lines that did not match or had an unparseable timestamp / number
    pub malformed_lines: u64,
    /// Well-formed lines dropped by the bot / static-asset filters
    pub filtered_lines: u64,
    pub clients: usize,
    pub paths: usize,
    pub elapsed_ms: u64,
}

/// Parse all sources into a new store.
///
/// `on_progress(done, total)` runs on the calling thread after every chunk
/// of every source; `done` never decreases and never exceeds `total`.
pub fn ingest<F>(
    sources: Vec<Box<dyn LogSource>>,
    matcher: &LineMatcher,
    options: &LoadOptions,
    mut on_progress: F,
) -> Result<(RecordStore, LoadSummary)>
where
    F: FnMut(u64, u64),
{
    let started = Instant::now();
    let source_count = sources.len();
    let total: u64 = sources.iter().map(|s| s.declared_size()).sum();
    let (progress_tx, progress_rx) = unbounded::<u64>();

    let joined = thread::scope(|scope| {
        let cancel = options.cancel.clone();
        let workers = options.workers;
        let worker = scope.spawn(move || run_workers(sources, matcher, &cancel, progress_tx, workers));

        // Ends once every worker has dropped its sender
        let mut done = 0u64;
        for delta in progress_rx.iter() {
            done += delta;
            on_progress(done, total);
        }

        worker.join()
    });

    let outputs = match joined {
        Ok(outputs) => outputs?,
        Err(panic) => std::panic::resume_unwind(panic),
    };

    let mut store = RecordStore::new(matcher.spec().session_gap_secs);
    let mut summary = LoadSummary {
        sources: source_count,
        ..LoadSummary::default()
    };
    for output in outputs {
        summary.bytes_read += output.bytes_read;
        summary.malformed_lines += output.malformed_lines;
        summary.filtered_lines += output.filtered_lines;
        store.extend(output.records);
    }
    summary.records = store.len();
    summary.clients = store.client_count();
    summary.paths = store.path_count();
    summary.elapsed_ms = started.elapsed().as_millis() as u64;

    Ok((store, summary))
}

fn run_workers(
    sources: Vec<Box<dyn LogSource>>,
    matcher: &LineMatcher,
    cancel: &CancelToken,
    progress: Sender<u64>,
    workers: Option<usize>,
) -> Result<Vec<StreamOutput>> {
    // All sources finish; the first failure in source order is reported
    let job = move || {
        sources
            .into_par_iter()
            .map_with(progress, |tx, source| parser::parse_source(source, matcher, cancel, tx))
            .collect::<Vec<Result<StreamOutput>>>()
            .into_iter()
            .collect::<Result<Vec<_>>>()
    };

    match workers {
        None => job(),
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .thread_name(|i| format!("logbase-ingest-{}", i))
                .build()
                .map_err(|e| LogError::InvalidOptions(format!("cannot start {} workers: {}", n, e)))?;
            pool.install(job)
        }
    }
}
