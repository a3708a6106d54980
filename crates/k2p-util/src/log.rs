use slog::{o, Drain};

use crate::config::LogLevel;

/// Output format for the root logger. JSON lines are meant for production
/// (consumed by a log collector); `term` is for interactive use, matching
/// the split `maelstrom-run` makes between its file-backed client log and
/// its terminal progress output.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Term,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "term" => Ok(Self::Term),
            other => Err(format!("unknown log format {other:?}, expected json|term")),
        }
    }
}

/// Builds the process-wide root `slog::Logger`, constructed once at boot
/// and threaded down through constructors from there — never a global
/// logger macro, per SPEC_FULL.md's ambient-stack notes.
pub fn root_logger(format: LogFormat, level: LogLevel) -> slog::Logger {
    let min_level = level.as_slog_level();
    match format {
        LogFormat::Json => {
            let drain = slog_json::Json::default(std::io::stdout()).fuse();
            let drain = slog::LevelFilter::new(drain, min_level).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            slog::Logger::root(drain, o!("component" => "k2pweb"))
        }
        LogFormat::Term => {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            let drain = slog::LevelFilter::new(drain, min_level).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            slog::Logger::root(drain, o!("component" => "k2pweb"))
        }
    }
}
