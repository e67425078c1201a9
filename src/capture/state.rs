//! Pure state machine for the capture lifecycle.
//!
//! This module implements the state machine as a pure function:
//! `(State, Event) -> (NewState, Vec<SideEffect>)`
//!
//! Invalid transitions return the current state with empty effects.
//! The monitor executes the effects in the order they are returned.

use std::time::Instant;

/// Capture lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorState {
    /// No capture process, ready to start.
    Idle,

    /// Start requested, capture process being launched.
    Starting { requested_at: Instant },

    /// Capture process alive and the drain loop polling.
    Running { started_at: Instant },

    /// Stop requested, waiting for the capture process to exit.
    Stopping {
        started_at: Instant,
        stop_requested_at: Instant,
    },
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::Idle
    }
}

impl MonitorState {
    /// Returns true in Starting, Running or Stopping.
    pub fn is_active(&self) -> bool {
        !matches!(self, MonitorState::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, MonitorState::Running { .. })
    }

    /// Short lowercase label for status reporting.
    pub fn label(&self) -> &'static str {
        match self {
            MonitorState::Idle => "idle",
            MonitorState::Starting { .. } => "starting",
            MonitorState::Running { .. } => "running",
            MonitorState::Stopping { .. } => "stopping",
        }
    }

    /// Time since the capture process came up, if it is up.
    pub fn uptime(&self) -> Option<std::time::Duration> {
        match self {
            MonitorState::Running { started_at } | MonitorState::Stopping { started_at, .. } => {
                Some(started_at.elapsed())
            }
            _ => None,
        }
    }
}

/// Events that can trigger state transitions.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    StartRequested,

    /// The capture process was spawned.
    Launched,

    /// The capture process could not be spawned.
    LaunchFailed { error: String },

    StopRequested,

    /// The capture process has been reaped.
    Exited,
}

/// Side effects triggered by state transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Delete raw chunks left behind by an earlier session.
    PurgeChunks,

    /// Spawn the capture subprocess.
    SpawnCapture,

    /// Start the drain loop for the live session.
    StartDrain,

    /// Move the session handle out of the monitor.
    ClearSession,

    /// Tell the drain loop to exit after its current pass.
    SignalStop,

    /// Kill the capture process and wait until it exits.
    AwaitExit,
}

/// Pure state transition function.
pub fn transition(state: MonitorState, event: MonitorEvent) -> (MonitorState, Vec<SideEffect>) {
    match (&state, event) {
        (MonitorState::Idle, MonitorEvent::StartRequested) => (
            MonitorState::Starting {
                requested_at: Instant::now(),
            },
            vec![SideEffect::PurgeChunks, SideEffect::SpawnCapture],
        ),

        (MonitorState::Starting { .. }, MonitorEvent::Launched) => (
            MonitorState::Running {
                started_at: Instant::now(),
            },
            vec![SideEffect::StartDrain],
        ),

        (MonitorState::Starting { .. }, MonitorEvent::LaunchFailed { error }) => {
            tracing::debug!(target: "capture", "[STATE] Launch failed: {}", error);
            (MonitorState::Idle, vec![])
        }

        // The handle is cleared before the stop signal goes out.
        (MonitorState::Running { started_at }, MonitorEvent::StopRequested) => (
            MonitorState::Stopping {
                started_at: *started_at,
                stop_requested_at: Instant::now(),
            },
            vec![
                SideEffect::ClearSession,
                SideEffect::SignalStop,
                SideEffect::AwaitExit,
            ],
        ),

        (MonitorState::Stopping { .. }, MonitorEvent::Exited) => (MonitorState::Idle, vec![]),

        _ => (state, vec![]),
    }
}
