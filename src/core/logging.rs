use std::collections::HashMap;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::shared::paths::ensure_dir;

/// Targets that get a log file of their own. Anything else lands in `system.log`.
pub const FILE_TARGETS: [&str; 2] = ["capture", "segments"];

pub const SYSTEM_LOG: &str = "system.log";

/// Keeps the background writers alive. Dropping it flushes and closes the log files.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Routes each event to the file of its target.
struct TargetWriter {
    writers: HashMap<&'static str, NonBlocking>,
    system_writer: NonBlocking,
}

impl<'a> MakeWriter<'a> for TargetWriter {
    type Writer = Box<dyn std::io::Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        Box::new(self.system_writer.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        match file_target(meta.target()).and_then(|t| self.writers.get(t)) {
            Some(writer) => Box::new(writer.clone()),
            None => Box::new(self.system_writer.clone()),
        }
    }
}

/// Which dedicated log file an event target belongs to, if any.
/// `capture` and `capture::drain` both map to `capture`.
pub fn file_target(target: &str) -> Option<&'static str> {
    FILE_TARGETS.iter().copied().find(|name| {
        target == *name
            || target
                .strip_prefix(*name)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

/// Installs the global subscriber: daily-rolling files under `log_dir` plus stderr.
///
/// The level comes from `RUST_LOG`, defaulting to `info`.
pub fn init_logging(log_dir: &Path) -> std::io::Result<LoggingGuards> {
    ensure_dir(log_dir)?;

    let mut guards = Vec::new();
    let mut writers = HashMap::new();

    for target in FILE_TARGETS {
        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, log_dir, format!("{}.log", target));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        writers.insert(target, non_blocking);
        guards.push(guard);
    }

    let system_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, SYSTEM_LOG);
    let (system_writer, system_guard) = tracing_appender::non_blocking(system_appender);
    guards.push(system_guard);

    let file_writer = TargetWriter {
        writers,
        system_writer,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        );

    tracing::subscriber::set_global_default(subscriber).map_err(std::io::Error::other)?;

    tracing::info!(target: "system", "Logging initialized at {:?}", log_dir);

    Ok(LoggingGuards { _guards: guards })
}
