//! Per-stream worker: bytes -> lines -> records

use std::io::{ErrorKind, Read};

use crossbeam_channel::Sender;

use super::filter::{is_bot_user_agent, is_static_asset, is_success, normalize_path};
use super::lines::LineSplitter;
use super::{CancelToken, LogSource};
use crate::error::{LogError, Result};
use crate::format::{FieldRole, LineMatcher};
use crate::storage::LogRecord;

/// Bytes read from a source per chunk
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Malformed lines logged per stream before going quiet
const MALFORMED_LOG_LIMIT: u64 = 10;

/// Result of matching one line
#[derive(Debug, PartialEq)]
pub enum LineOutcome {
    Record(LogRecord),
    /// Line is well-formed but excluded by a format filter
    Filtered,
    Malformed(&'static str),
}

/// Everything one stream contributed to a load
#[derive(Debug, Default)]
pub struct StreamOutput {
    pub records: Vec<LogRecord>,
    pub malformed_lines: u64,
    pub filtered_lines: u64,
    pub bytes_read: u64,
}

impl StreamOutput {
    fn consume(&mut self, matcher: &LineMatcher, source_name: &str, line: &[u8]) {
        let Ok(line) = std::str::from_utf8(line) else {
            self.malformed(source_name, "invalid UTF-8", "<binary>");
            return;
        };
        if line.trim().is_empty() {
            return;
        }

        match parse_line(matcher, line) {
            LineOutcome::Record(record) => self.records.push(record),
            LineOutcome::Filtered => self.filtered_lines += 1,
            LineOutcome::Malformed(reason) => self.malformed(source_name, reason, line),
        }
    }

    fn malformed(&mut self, source_name: &str, reason: &str, line: &str) {
        self.malformed_lines += 1;
        if self.malformed_lines <= MALFORMED_LOG_LIMIT {
            tracing::debug!("{}: skipping malformed line ({}): {}", source_name, reason, line);
        }
    }
}

/// Match one line against the compiled format and build a record
pub fn parse_line(matcher: &LineMatcher, line: &str) -> LineOutcome {
    let Some(fields) = matcher.match_line(line) else {
        return LineOutcome::Malformed("no match");
    };
    let spec = matcher.spec();
    let field = |role: FieldRole| matcher.slot(role).map_or("", |slot| fields[slot]);

    let Some(timestamp) = matcher.parse_timestamp(field(FieldRole::Timestamp)) else {
        return LineOutcome::Malformed("bad timestamp");
    };
    let Some(status) = parse_number::<u16>(field(FieldRole::Status)) else {
        return LineOutcome::Malformed("bad status");
    };
    let Some(bytes) = parse_number::<u64>(field(FieldRole::Bytes)) else {
        return LineOutcome::Malformed("bad size");
    };
    if spec.success_only && matcher.slot(FieldRole::Status).is_some() && !is_success(status) {
        return LineOutcome::Filtered;
    }

    let user_agent = field(FieldRole::UserAgent);
    if spec.skip_bots && is_bot_user_agent(user_agent) {
        return LineOutcome::Filtered;
    }

    let mut path = matcher.strip_query(field(FieldRole::Path));
    if spec.normalize_paths {
        path = normalize_path(path);
    }
    if spec.skip_static_assets && is_static_asset(path) {
        return LineOutcome::Filtered;
    }

    let client = field(FieldRole::ClientKey);
    let client_key = if spec.key_includes_user_agent && !user_agent.is_empty() {
        format!("{} {}", client, user_agent)
    } else {
        client.to_string()
    };

    LineOutcome::Record(LogRecord {
        timestamp,
        client_key,
        path: path.to_string(),
        status,
        bytes,
        referrer: matcher.strip_query(field(FieldRole::Referrer)).to_string(),
        user_agent: user_agent.to_string(),
        raw_fields: fields.iter().map(|f| f.to_string()).collect(),
    })
}

/// Empty and "-" (common log format for "none") read as zero
fn parse_number<T: std::str::FromStr + Default>(value: &str) -> Option<T> {
    match value {
        "" | "-" => Some(T::default()),
        v => v.parse().ok(),
    }
}

/// Read one source to the end.
///
/// Sends the number of newly consumed bytes (clamped to the declared size)
/// after every chunk, checks for cancellation between chunks.
pub fn parse_source(
    source: Box<dyn LogSource>,
    matcher: &LineMatcher,
    cancel: &CancelToken,
    progress: &Sender<u64>,
) -> Result<StreamOutput> {
    let name = source.name().to_string();
    let declared = source.declared_size();
    let mut reader = source.into_reader().map_err(|e| LogError::load(&name, e))?;

    let mut output = StreamOutput::default();
    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut reported = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(LogError::Cancelled);
        }

        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!("Read failed for {}: {}", name, e);
                return Err(LogError::load(&name, e));
            }
        };

        output.bytes_read += n as u64;
        splitter.push(&buf[..n], |line| output.consume(matcher, &name, line));

        let done = output.bytes_read.min(declared);
        // Receiver only goes away when the load itself is torn down
        let _ = progress.send(done - reported);
        reported = done;
    }

    splitter.finish(|line| output.consume(matcher, &name, line));

    tracing::debug!(
        "{}: {} records, {} malformed, {} filtered, {} bytes",
        name,
        output.records.len(),
        output.malformed_lines,
        output.filtered_lines,
        output.bytes_read
    );

    Ok(output)
}
