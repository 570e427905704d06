//! logbase - load access logs and print session analytics as JSON
//!
//! Usage:
//!   logbase [OPTIONS] <FILE>...
//!
//! Output (stdout):
//!   { "summary": {...}, "usage": {...}, "graph": {...} }
//!
//! Progress and logs go to stderr. Ctrl-C stops a running load.

use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use serde::Serialize;
use tracing::Level;

use logbase::{
    file_sources, CancelToken, GraphOptions, LoadOptions, LoadSummary, LogEngine, LogFormatSpec,
    TransitionGraph, UsageCategory, UsageOptions, UsageStats,
};

#[derive(Debug, Parser)]
#[command(name = "logbase")]
#[command(about = "Load access logs and print session analytics as JSON")]
#[command(after_help = "Environment:\n  LOGBASE_LOG  Log level (error, warn, info, debug, trace)")]
#[command(version)]
struct Args {
    /// Access log files, loaded in the given order
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    /// Line format definition, inline JSON or a file (default: standard layout)
    #[arg(long, value_name = "JSON|PATH")]
    format: Option<String>,

    /// Session gap in seconds, overrides the format's value
    #[arg(long, value_name = "SECS")]
    gap: Option<u64>,

    /// Keep requests that did not succeed (non-2xx)
    #[arg(long)]
    keep_failed: bool,

    /// Treat /dir/, /dir/index.html and /dir as one page
    #[arg(long)]
    normalize_paths: bool,

    /// Print usage statistics only (default: usage and graph)
    #[arg(long)]
    usage: bool,

    /// Print the transition graph only
    #[arg(long)]
    graph: bool,

    /// Parser threads (default: one per core)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// More logging, repeat for trace
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors, no progress
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Usage category: path, ua, referrer or status
    #[arg(
        long = "by",
        value_name = "CATEGORY",
        value_parser = UsageCategory::from_str,
        help_heading = "Usage statistics"
    )]
    category: Option<UsageCategory>,

    /// Bucket width in seconds, 0 for a single bucket (default: 3600)
    #[arg(long, value_name = "SECS", help_heading = "Usage statistics")]
    bucket: Option<i64>,

    /// Drop categories seen fewer times (default: 0)
    #[arg(long, value_name = "N", help_heading = "Usage statistics")]
    min_count: Option<u32>,

    /// Keep at most N categories (default: 300)
    #[arg(long, value_name = "N", help_heading = "Usage statistics")]
    max_categories: Option<usize>,

    /// Count only session entry requests
    #[arg(long, help_heading = "Usage statistics")]
    starts_only: bool,

    /// Layers to build (default: 8)
    #[arg(long, value_name = "N", help_heading = "Transition graph")]
    steps: Option<usize>,

    /// Nodes kept per layer (default: 30)
    #[arg(long, value_name = "N", help_heading = "Transition graph")]
    max_nodes: Option<usize>,

    /// Minimum sessions per node (default: 3)
    #[arg(long, value_name = "N", help_heading = "Transition graph")]
    threshold: Option<u32>,

    /// Only paths containing this substring
    #[arg(long, value_name = "S", help_heading = "Transition graph")]
    contains: Option<String>,

    /// Only paths starting with this prefix
    #[arg(long, value_name = "S", help_heading = "Transition graph")]
    starts_with: Option<String>,

    /// Ignore shorter sessions (default: 1)
    #[arg(long, value_name = "N", help_heading = "Transition graph")]
    min_session_steps: Option<usize>,

    /// Ignore longer sessions
    #[arg(long, value_name = "N", help_heading = "Transition graph")]
    max_session_steps: Option<usize>,

    /// Merge repeated requests for the same path
    #[arg(long, help_heading = "Transition graph")]
    collapse_repeats: bool,
}

impl Args {
    /// Neither --usage nor --graph prints both
    fn wants_usage(&self) -> bool {
        self.usage || !self.graph
    }

    fn wants_graph(&self) -> bool {
        self.graph || !self.usage
    }

    fn log_level(&self) -> Level {
        if let Some(level) = std::env::var("LOGBASE_LOG")
            .ok()
            .and_then(|v| Level::from_str(v.trim()).ok())
        {
            return level;
        }
        if self.quiet {
            return Level::WARN;
        }
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    fn format_spec(&self) -> Result<LogFormatSpec> {
        let mut spec = match self.format.as_deref() {
            None => LogFormatSpec::standard(),
            Some(inline) if inline.trim_start().starts_with('{') => {
                LogFormatSpec::from_json_str(inline).context("parsing inline --format")?
            }
            Some(path) => LogFormatSpec::from_json_file(path)
                .with_context(|| format!("reading format file {}", path))?,
        };
        if let Some(secs) = self.gap {
            spec = spec.session_gap(secs);
        }
        if self.keep_failed {
            spec = spec.success_only(false);
        }
        if self.normalize_paths {
            spec = spec.normalize_paths(true);
        }
        Ok(spec)
    }

    fn usage_options(&self) -> UsageOptions {
        let mut options = UsageOptions::default().session_starts_only(self.starts_only);
        if let Some(category) = self.category {
            options = options.category(category);
        }
        if let Some(secs) = self.bucket {
            options = options.bucket_seconds(secs);
        }
        if let Some(n) = self.min_count {
            options = options.min_count(n);
        }
        if let Some(n) = self.max_categories {
            options = options.max_categories(n);
        }
        options
    }

    fn graph_options(&self) -> GraphOptions {
        let mut options = GraphOptions::default()
            .max_session_steps(self.max_session_steps)
            .collapse_repeats(self.collapse_repeats);
        if let Some(n) = self.steps {
            options = options.max_steps(n);
        }
        if let Some(n) = self.max_nodes {
            options = options.max_nodes_per_layer(n);
        }
        if let Some(n) = self.threshold {
            options = options.min_session_count(n);
        }
        if let Some(needle) = &self.contains {
            options = options.must_contain(needle.as_str());
        }
        if let Some(prefix) = &self.starts_with {
            options = options.must_start_with(prefix.as_str());
        }
        if let Some(n) = self.min_session_steps {
            options = options.min_session_steps(n);
        }
        options
    }
}

#[derive(Serialize)]
struct Report<'a> {
    summary: &'a LoadSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<UsageStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    graph: Option<TransitionGraph>,
}

/// First SIGINT/SIGTERM cancels the load, a second one exits
fn install_signal_handler(cancel: CancelToken) -> Result<()> {
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("registering signal handlers")?;

    thread::Builder::new()
        .name("logbase-signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                if cancel.is_cancelled() {
                    eprintln!("[logbase] Received signal {} again, exiting", sig);
                    std::process::exit(130);
                }
                eprintln!("[logbase] Received signal {}, stopping load...", sig);
                cancel.cancel();
            }
        })
        .context("spawning signal thread")?;
    Ok(())
}

/// Progress line on stderr, redrawn when the percentage changes
fn progress_printer(quiet: bool) -> impl FnMut(u64, u64) {
    let mut last = None;
    move |done, total| {
        if quiet || total == 0 {
            return;
        }
        let percent = done * 100 / total;
        if last != Some(percent) {
            last = Some(percent);
            eprint!("\r[logbase] Loading... {:3}%", percent);
            if done == total {
                eprintln!();
            }
        }
    }
}

fn run(args: Args) -> Result<()> {
    let format = args.format_spec()?;

    let cancel = CancelToken::new();
    install_signal_handler(cancel.clone())?;

    let mut options = LoadOptions::new().cancel(cancel);
    if let Some(n) = args.workers {
        options = options.workers(n);
    }

    let mut engine = LogEngine::new();
    let summary = engine
        .load_with(
            file_sources(&args.files),
            &format,
            &options,
            progress_printer(args.quiet),
        )
        .context("loading logs")?;

    let usage = if args.wants_usage() {
        Some(engine.usage_stats(&args.usage_options())?)
    } else {
        None
    };
    let graph = if args.wants_graph() {
        Some(engine.transfer_graph(&args.graph_options())?)
    } else {
        None
    };

    let report = Report {
        summary: &summary,
        usage,
        graph,
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &report)?;
    writeln!(out)?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_writer(std::io::stderr)
        .init();

    run(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("logbase").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cli_defaults_print_both_reports() {
        let args = parse(&["a.log", "b.log"]);
        assert_eq!(args.files, vec![PathBuf::from("a.log"), PathBuf::from("b.log")]);
        assert!(args.wants_usage());
        assert!(args.wants_graph());
        assert_eq!(args.usage_options(), UsageOptions::default());
        assert_eq!(args.graph_options(), GraphOptions::default());
        assert_eq!(args.format_spec().unwrap(), LogFormatSpec::standard());
    }

    #[test]
    fn cli_requires_files() {
        let err = Args::try_parse_from(["logbase"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn cli_single_report() {
        let args = parse(&["--usage", "a.log"]);
        assert!(args.wants_usage());
        assert!(!args.wants_graph());

        let args = parse(&["--graph", "a.log"]);
        assert!(!args.wants_usage());
        assert!(args.wants_graph());
    }

    #[test]
    fn cli_verbosity_counts() {
        assert_eq!(parse(&["a.log"]).verbose, 0);
        assert_eq!(parse(&["-v", "a.log"]).verbose, 1);
        assert_eq!(parse(&["-vv", "a.log"]).verbose, 2);
        assert_eq!(parse(&["-v", "--verbose", "-v", "a.log"]).verbose, 3);
        assert!(parse(&["-q", "a.log"]).quiet);

        let err = Args::try_parse_from(["logbase", "-q", "-v", "a.log"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn cli_usage_category() {
        let args = parse(&["--by", "ua", "--bucket", "0", "--max-categories", "5", "a.log"]);
        let options = args.usage_options();
        assert_eq!(options.category, UsageCategory::UserAgent);
        assert_eq!(options.bucket_seconds, 0);
        assert_eq!(options.max_categories, 5);

        let err = Args::try_parse_from(["logbase", "--by", "country", "a.log"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn cli_graph_options() {
        let args = parse(&[
            "--steps",
            "4",
            "--threshold",
            "1",
            "--starts-with",
            "/docs",
            "--max-session-steps",
            "20",
            "--collapse-repeats",
            "a.log",
        ]);
        let options = args.graph_options();
        assert_eq!(options.max_steps, 4);
        assert_eq!(options.min_session_count, 1);
        assert_eq!(options.must_start_with, "/docs");
        assert_eq!(options.max_session_steps, Some(20));
        assert!(options.collapse_repeats);
        assert_eq!(options.max_nodes_per_layer, GraphOptions::default().max_nodes_per_layer);
    }

    #[test]
    fn cli_rejects_bad_numbers() {
        let err = Args::try_parse_from(["logbase", "--steps", "many", "a.log"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn cli_inline_format_with_overrides() {
        let args = parse(&[
            "--format",
            r#"{ "session_gap_secs": 600 }"#,
            "--gap",
            "120",
            "--keep-failed",
            "--normalize-paths",
            "a.log",
        ]);
        let spec = args.format_spec().unwrap();
        assert_eq!(spec.session_gap_secs, 120);
        assert!(!spec.success_only);
        assert!(spec.normalize_paths);
        assert_eq!(spec.roles, LogFormatSpec::standard().roles);
    }

    #[test]
    fn cli_format_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("format.json");
        std::fs::write(&path, r#"{ "date_format": "%d/%b/%Y:%H:%M:%S %z" }"#).unwrap();

        let args = parse(&["--format", path.to_str().unwrap(), "a.log"]);
        assert_eq!(args.format_spec().unwrap().date_format, "%d/%b/%Y:%H:%M:%S %z");

        let missing = dir.path().join("missing.json");
        let args = parse(&["--format", missing.to_str().unwrap(), "a.log"]);
        assert!(args.format_spec().is_err());
    }
}
