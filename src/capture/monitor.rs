//! CaptureMonitor - single owner of the capture process and the drain loop.
//!
//! The monitor drives its lifecycle through the pure state machine in
//! `state.rs` and executes the returned side effects in order.
//!
//! Architecture:
//! - `start()` purges stale chunks, spawns the capture process and a drain thread
//! - The drain thread polls the working directory every `drain_interval`,
//!   remuxes every chunk except the newest and hands it to the subscribers
//! - `stop()` moves the session out, disconnects the stop channel, then kills
//!   and reaps the capture process
//! - The drain thread and `check_process()` both watch the shared child; an
//!   exit nobody asked for ends the session and is reported as a process error

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::chunks::{list_chunks, purge_chunks, CHUNK_PATTERN};
use super::errors::CaptureError;
use super::ffmpeg::{FfmpegRemuxer, Remuxer};
use super::source::{CaptureConfig, CaptureSource};
use super::state::{transition, MonitorEvent, MonitorState, SideEffect};
use super::Subscriber;
use crate::shared::paths::ensure_dir;

/// Default pause between two drain passes.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Directory the capture process writes raw chunks into.
    pub work_dir: PathBuf,
    pub capture: CaptureConfig,
    pub drain_interval: Duration,
}

impl MonitorConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            capture: CaptureConfig::default(),
            drain_interval: DEFAULT_DRAIN_INTERVAL,
        }
    }
}

/// One drain pass worth of state: where chunks live and who receives them.
pub struct ChunkDrainer {
    work_dir: PathBuf,
    segment_duration: Duration,
    remuxer: Arc<dyn Remuxer>,
    subscribers: Vec<Arc<dyn Subscriber>>,
}

impl ChunkDrainer {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        segment_duration: Duration,
        remuxer: Arc<dyn Remuxer>,
        subscribers: Vec<Arc<dyn Subscriber>>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            segment_duration,
            remuxer,
            subscribers,
        }
    }

    /// Converts and publishes every finished chunk, oldest first.
    ///
    /// The newest chunk is still being written and is never touched. A
    /// conversion failure stops the pass; later chunks wait for the next one.
    /// Returns the number of chunks published.
    pub fn drain_once(&self) -> Result<usize, CaptureError> {
        let chunks = list_chunks(&self.work_dir)?;
        if chunks.len() < 2 {
            return Ok(0);
        }

        let mut published = 0;
        for chunk in &chunks[..chunks.len() - 1] {
            let started = Instant::now();
            let converted = self.remuxer.remux(chunk)?;

            // The raw chunk goes first so a failed delete can never publish it twice.
            if let Err(e) = fs::remove_file(chunk) {
                let _ = fs::remove_file(&converted);
                return Err(e.into());
            }

            tracing::debug!(
                target: "capture",
                "[DRAIN] Created {:?} in {} ms",
                converted,
                started.elapsed().as_millis()
            );

            // Capture start time is not recorded by the camera process, so the
            // duration is assumed to be nominal.
            let created_at = Utc::now();
            let modified_at = created_at + self.nominal_duration();
            for subscriber in &self.subscribers {
                subscriber.video_recorded(&converted, created_at, modified_at);
            }

            fs::remove_file(&converted)?;
            published += 1;
        }

        Ok(published)
    }

    fn nominal_duration(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.segment_duration).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

type SharedChild = Arc<Mutex<Child>>;

fn lock_child(child: &SharedChild) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the exit status if the capture process is no longer running.
fn exited(child: &SharedChild) -> Result<Option<ExitStatus>, CaptureError> {
    Ok(lock_child(child).try_wait()?)
}

fn unexpected_exit(status: ExitStatus) -> CaptureError {
    CaptureError::process(format!("capture process exited unexpectedly: {}", status))
}

fn run_drain_loop(drainer: ChunkDrainer, child: SharedChild, interval: Duration, stop_rx: Receiver<()>) {
    tracing::info!(target: "capture", "[DRAIN] Loop started");

    loop {
        match stop_rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => break,
        }

        match exited(&child) {
            Ok(None) => {}
            Ok(Some(status)) => {
                tracing::error!(target: "capture", "[DRAIN] {}", unexpected_exit(status));
                break;
            }
            Err(e) => tracing::warn!(target: "capture", "[DRAIN] Failed to poll capture process: {}", e),
        }

        if let Err(e) = drainer.drain_once() {
            tracing::error!(target: "capture", "[DRAIN] Error when checking files: {}", e);
        }

        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
    }

    tracing::info!(target: "capture", "[DRAIN] Loop stopped");
}

/// Handles owned by a live capture session.
struct CaptureSession {
    /// Shared with the drain thread, which polls it for an early exit.
    child: SharedChild,
    /// Dropping the sender disconnects the channel and stops the drain loop.
    stop_tx: Option<Sender<()>>,
    /// Detached on stop; the loop finishes its current pass on its own.
    drain_handle: Option<JoinHandle<()>>,
}

pub struct CaptureMonitor {
    config: MonitorConfig,
    source: Box<dyn CaptureSource>,
    remuxer: Arc<dyn Remuxer>,
    subscribers: Vec<Arc<dyn Subscriber>>,
    state: MonitorState,
    session: Option<CaptureSession>,
    /// Session being torn down between `ClearSession` and `AwaitExit`.
    stopping: Option<CaptureSession>,
    last_error: Option<String>,
}

impl CaptureMonitor {
    pub fn new(config: MonitorConfig, source: Box<dyn CaptureSource>) -> Self {
        Self {
            config,
            source,
            remuxer: Arc::new(FfmpegRemuxer::new()),
            subscribers: Vec::new(),
            state: MonitorState::Idle,
            session: None,
            stopping: None,
            last_error: None,
        }
    }

    pub fn with_remuxer(mut self, remuxer: Arc<dyn Remuxer>) -> Self {
        self.remuxer = remuxer;
        self
    }

    /// Registers a subscriber. Subscribers added after `start()` only see
    /// chunks from the next session.
    pub fn add_subscriber(&mut self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Swaps the capture source, e.g. for a test pattern when no camera is present.
    pub fn set_source(&mut self, source: Box<dyn CaptureSource>) -> Result<(), CaptureError> {
        if self.state.is_active() {
            return Err(CaptureError::AlreadyRunning);
        }
        self.source = source;
        Ok(())
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn segment_duration(&self) -> Duration {
        self.config.capture.segment_duration
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn work_dir(&self) -> &Path {
        &self.config.work_dir
    }

    /// Why the last session ended on its own, if it did.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Ends the session if the capture process has exited on its own.
    ///
    /// Returns the process error in that case and leaves the monitor idle, so
    /// the caller can restart it or swap sources. No-op unless running.
    pub fn check_process(&mut self) -> Result<(), CaptureError> {
        let status = match self.session.as_ref() {
            Some(session) if self.state.is_running() => exited(&session.child)?,
            _ => None,
        };
        let Some(status) = status else {
            return Ok(());
        };

        let error = unexpected_exit(status);
        tracing::error!(target: "capture", "[MONITOR] {}", error);
        self.last_error = Some(error.to_string());

        if let Err(e) = self.teardown() {
            tracing::debug!(target: "capture", "[MONITOR] Teardown after exit: {}", e);
        }
        Err(error)
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.state.is_active() {
            return Err(CaptureError::AlreadyRunning);
        }
        self.last_error = None;

        for effect in self.apply(MonitorEvent::StartRequested) {
            if let Err(e) = self.execute(effect) {
                tracing::error!(target: "capture", "[MONITOR] Start failed: {}", e);
                self.apply(MonitorEvent::LaunchFailed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        }

        for effect in self.apply(MonitorEvent::Launched) {
            if let Err(e) = self.execute(effect) {
                tracing::error!(target: "capture", "[MONITOR] Drain loop failed to start: {}", e);
                if let Err(stop_err) = self.stop() {
                    tracing::warn!(target: "capture", "[MONITOR] Failed to stop capture after start failure: {}", stop_err);
                }
                return Err(e);
            }
        }

        tracing::info!(
            target: "capture",
            "[MONITOR] Capture started with {} into {:?}",
            self.source.name(),
            self.config.work_dir
        );
        Ok(())
    }

    /// Stops the capture process and waits for it to exit. No-op unless running.
    ///
    /// Fails with a process error when the process had already exited with a
    /// failure status before it was asked to stop.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.state.is_running() {
            return Ok(());
        }
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), CaptureError> {
        let mut result = Ok(());
        for effect in self.apply(MonitorEvent::StopRequested) {
            if let Err(e) = self.execute(effect) {
                tracing::error!(target: "capture", "[MONITOR] Stop failed: {}", e);
                result = Err(e);
            }
        }

        self.apply(MonitorEvent::Exited);
        result
    }

    fn apply(&mut self, event: MonitorEvent) -> Vec<SideEffect> {
        let (new_state, effects) = transition(std::mem::take(&mut self.state), event);
        self.state = new_state;
        effects
    }

    fn execute(&mut self, effect: SideEffect) -> Result<(), CaptureError> {
        match effect {
            SideEffect::PurgeChunks => {
                ensure_dir(&self.config.work_dir)?;
                purge_chunks(&self.config.work_dir)?;
            }
            SideEffect::SpawnCapture => {
                self.spawn_capture()?;
            }
            SideEffect::StartDrain => {
                self.start_drain()?;
            }
            SideEffect::ClearSession => {
                self.stopping = self.session.take();
            }
            SideEffect::SignalStop => {
                tracing::info!(target: "capture", "[MONITOR] Signaling stop...");
                if let Some(session) = self.stopping.as_mut() {
                    session.stop_tx.take();
                }
            }
            SideEffect::AwaitExit => {
                if let Some(mut session) = self.stopping.take() {
                    let status = terminate(&mut lock_child(&session.child))?;
                    tracing::info!(target: "capture", "[MONITOR] Capture process exited: {}", status);
                    drop(session.drain_handle.take());
                }
            }
        }
        Ok(())
    }

    fn spawn_capture(&mut self) -> Result<(), CaptureError> {
        let pattern = self.config.work_dir.join(CHUNK_PATTERN);
        let child = self
            .source
            .command(&pattern, &self.config.capture)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                CaptureError::process(format!("failed to launch {}: {}", self.source.name(), e))
            })?;

        tracing::debug!(target: "capture", "[MONITOR] Spawned {} (pid {})", self.source.name(), child.id());

        self.session = Some(CaptureSession {
            child: Arc::new(Mutex::new(child)),
            stop_tx: None,
            drain_handle: None,
        });
        Ok(())
    }

    fn start_drain(&mut self) -> Result<(), CaptureError> {
        let Some(session) = self.session.as_mut() else {
            return Err(CaptureError::process("no capture session to drain"));
        };

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let child = session.child.clone();
        let drainer = ChunkDrainer::new(
            self.config.work_dir.clone(),
            self.config.capture.segment_duration,
            self.remuxer.clone(),
            self.subscribers.clone(),
        );
        let interval = self.config.drain_interval;

        let handle = std::thread::Builder::new()
            .name("capture-drain".to_string())
            .spawn(move || run_drain_loop(drainer, child, interval, stop_rx))?;

        session.stop_tx = Some(stop_tx);
        session.drain_handle = Some(handle);
        Ok(())
    }
}

impl Drop for CaptureMonitor {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(target: "capture", "[MONITOR] Failed to stop capture on drop: {}", e);
        }
    }
}

/// Kills the child if it is still alive and reaps it.
///
/// A child that had already exited with a failure status is an error: it
/// died on its own before the stop.
fn terminate(child: &mut Child) -> Result<ExitStatus, CaptureError> {
    if let Some(status) = child.try_wait()? {
        if !status.success() {
            return Err(unexpected_exit(status));
        }
        return Ok(status);
    }

    if let Err(e) = child.kill() {
        tracing::warn!(target: "capture", "[MONITOR] Failed to kill capture process: {}", e);
    }
    Ok(child.wait()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::chunks::chunk_file_name;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    /// Copies the chunk to a `.ts` file, failing on names listed in `fail_on`.
    struct CopyRemuxer {
        fail_on: Vec<String>,
    }

    impl Remuxer for CopyRemuxer {
        fn remux(&self, input: &Path) -> Result<PathBuf, CaptureError> {
            let name = input.file_name().unwrap().to_string_lossy().into_owned();
            if self.fail_on.contains(&name) {
                return Err(CaptureError::ConversionFailed {
                    exit_code: 1,
                    stderr: "invalid data".to_string(),
                });
            }
            let out = input.with_extension("ts");
            fs::copy(input, &out)?;
            Ok(out)
        }
    }

    #[derive(Default)]
    struct Collector {
        seen: Mutex<Vec<(Vec<u8>, DateTime<Utc>, DateTime<Utc>)>>,
    }

    impl Subscriber for Collector {
        fn video_recorded(&self, path: &Path, created_at: DateTime<Utc>, modified_at: DateTime<Utc>) {
            let bytes = fs::read(path).unwrap();
            self.seen.lock().unwrap().push((bytes, created_at, modified_at));
        }
    }

    fn write_chunks(dir: &Path, count: u64) {
        for seq in 0..count {
            fs::write(dir.join(chunk_file_name(seq)), format!("chunk-{}", seq)).unwrap();
        }
    }

    fn drainer(dir: &Path, fail_on: &[&str], collector: Arc<Collector>) -> ChunkDrainer {
        let subscriber: Arc<dyn Subscriber> = collector;
        ChunkDrainer::new(
            dir,
            Duration::from_secs(5),
            Arc::new(CopyRemuxer {
                fail_on: fail_on.iter().map(|s| s.to_string()).collect(),
            }),
            vec![subscriber],
        )
    }

    #[test]
    fn test_single_chunk_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunks(tmp.path(), 1);
        let collector = Arc::new(Collector::default());

        let published = drainer(tmp.path(), &[], collector.clone()).drain_once().unwrap();

        assert_eq!(published, 0);
        assert!(collector.seen.lock().unwrap().is_empty());
        assert!(tmp.path().join(chunk_file_name(0)).exists());
    }

    #[test]
    fn test_modified_at_is_nominal_duration_after_created_at() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunks(tmp.path(), 2);
        let collector = Arc::new(Collector::default());

        drainer(tmp.path(), &[], collector.clone()).drain_once().unwrap();

        let seen = collector.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, b"chunk-0");
        assert_eq!(seen[0].2 - seen[0].1, chrono::Duration::seconds(5));
    }

    #[test]
    fn test_conversion_failure_aborts_rest_of_pass() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunks(tmp.path(), 4);
        let collector = Arc::new(Collector::default());
        let failing = chunk_file_name(1);

        let result = drainer(tmp.path(), &[failing.as_str()], collector.clone()).drain_once();

        assert!(matches!(result, Err(CaptureError::ConversionFailed { .. })));
        assert_eq!(collector.seen.lock().unwrap().len(), 1);
        assert!(!tmp.path().join(chunk_file_name(0)).exists());
        for seq in 1..4 {
            assert!(tmp.path().join(chunk_file_name(seq)).exists());
        }
    }

    #[test]
    fn test_subscribers_called_in_registration_order() {
        struct Tagged {
            tag: &'static str,
            log: Arc<Mutex<Vec<&'static str>>>,
        }

        impl Subscriber for Tagged {
            fn video_recorded(&self, _: &Path, _: DateTime<Utc>, _: DateTime<Utc>) {
                self.log.lock().unwrap().push(self.tag);
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        write_chunks(tmp.path(), 2);
        let log = Arc::new(Mutex::new(Vec::new()));
        let first: Arc<dyn Subscriber> = Arc::new(Tagged { tag: "first", log: log.clone() });
        let second: Arc<dyn Subscriber> = Arc::new(Tagged { tag: "second", log: log.clone() });

        let drainer = ChunkDrainer::new(
            tmp.path(),
            Duration::from_secs(5),
            Arc::new(CopyRemuxer { fail_on: vec![] }),
            vec![first, second],
        );
        drainer.drain_once().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[cfg(unix)]
    struct SleepSource;

    #[cfg(unix)]
    impl CaptureSource for SleepSource {
        fn name(&self) -> &str {
            "sleep"
        }

        fn command(&self, _: &Path, _: &CaptureConfig) -> std::process::Command {
            let mut cmd = std::process::Command::new("sleep");
            cmd.arg("30");
            cmd
        }
    }

    /// Launches fine, then exits with status 3 straight away.
    #[cfg(unix)]
    struct ExitingSource;

    #[cfg(unix)]
    impl CaptureSource for ExitingSource {
        fn name(&self) -> &str {
            "exiting"
        }

        fn command(&self, _: &Path, _: &CaptureConfig) -> std::process::Command {
            let mut cmd = std::process::Command::new("sh");
            cmd.args(["-c", "exit 3"]);
            cmd
        }
    }

    struct MissingSource;

    impl CaptureSource for MissingSource {
        fn name(&self) -> &str {
            "missing"
        }

        fn command(&self, _: &Path, _: &CaptureConfig) -> std::process::Command {
            std::process::Command::new("/nonexistent/camera-binary-for-tests")
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_start_purges_and_stop_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunks(tmp.path(), 3);

        let mut monitor = CaptureMonitor::new(MonitorConfig::new(tmp.path()), Box::new(SleepSource))
            .with_remuxer(Arc::new(CopyRemuxer { fail_on: vec![] }));

        monitor.start().unwrap();
        assert!(monitor.state().is_running());
        assert!(list_chunks(tmp.path()).unwrap().is_empty());
        assert!(matches!(monitor.start(), Err(CaptureError::AlreadyRunning)));

        monitor.stop().unwrap();
        assert_eq!(*monitor.state(), MonitorState::Idle);

        monitor.stop().unwrap();
        assert_eq!(*monitor.state(), MonitorState::Idle);
    }

    #[cfg(unix)]
    #[test]
    fn test_restart_after_stop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut monitor = CaptureMonitor::new(MonitorConfig::new(tmp.path()), Box::new(SleepSource));

        monitor.start().unwrap();
        monitor.stop().unwrap();
        monitor.start().unwrap();
        assert!(monitor.state().is_running());
        monitor.stop().unwrap();
    }

    #[test]
    fn test_launch_failure_stays_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let mut monitor = CaptureMonitor::new(MonitorConfig::new(tmp.path()), Box::new(MissingSource));

        let err = monitor.start().unwrap_err();

        assert!(err.is_launch_failure());
        assert_eq!(*monitor.state(), MonitorState::Idle);
    }

    #[cfg(unix)]
    #[test]
    fn test_source_swap_only_while_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let mut monitor = CaptureMonitor::new(MonitorConfig::new(tmp.path()), Box::new(MissingSource));

        assert!(monitor.start().is_err());
        monitor.set_source(Box::new(SleepSource)).unwrap();
        assert_eq!(monitor.source_name(), "sleep");

        monitor.start().unwrap();
        assert!(matches!(
            monitor.set_source(Box::new(MissingSource)),
            Err(CaptureError::AlreadyRunning)
        ));
        monitor.stop().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_early_exit_is_reported_and_leaves_monitor_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let mut monitor = CaptureMonitor::new(MonitorConfig::new(tmp.path()), Box::new(ExitingSource));

        monitor.start().unwrap();

        let mut result = Ok(());
        for _ in 0..50 {
            result = monitor.check_process();
            if result.is_err() {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        assert!(matches!(result, Err(CaptureError::Process(_))));
        assert_eq!(*monitor.state(), MonitorState::Idle);
        assert!(monitor.last_error().unwrap().contains("exited unexpectedly"));

        // Already torn down, so there is nothing left to stop.
        monitor.stop().unwrap();
        monitor.check_process().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_after_early_exit_is_process_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut monitor = CaptureMonitor::new(MonitorConfig::new(tmp.path()), Box::new(ExitingSource));

        monitor.start().unwrap();
        std::thread::sleep(Duration::from_millis(500));

        let err = monitor.stop().unwrap_err();

        assert!(matches!(err, CaptureError::Process(_)));
        assert_eq!(*monitor.state(), MonitorState::Idle);
    }

    #[cfg(unix)]
    #[test]
    fn test_running_process_passes_check() {
        let tmp = tempfile::tempdir().unwrap();
        let mut monitor = CaptureMonitor::new(MonitorConfig::new(tmp.path()), Box::new(SleepSource));

        monitor.start().unwrap();
        monitor.check_process().unwrap();
        assert!(monitor.state().is_running());
        assert!(monitor.last_error().is_none());

        monitor.stop().unwrap();
    }
}
