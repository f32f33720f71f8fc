//! # Apnea Detector
//!
//! Counts breathing pauses as runs of consecutive near-silent loudness
//! windows. The detector is a reducer: a small `Copy` state plus a pure
//! `step` function, folded over the window series in chronological order.
//!
//! ## Per-window step (always both parts, always in this order):
//! 1. **Accumulate**: `rms < silence_threshold` increments the run length,
//!    anything louder resets it to 0
//! 2. **Emit**: when the run length reaches `min_silence_windows`, emit one
//!    event; what happens to the counter afterwards is the [`ApneaPolicy`]
//!
//! With the default policy a 12 s silent clip and a 5 window threshold gives
//! exactly 2 events; the 2 leftover seconds never form a third.

use crate::analysis::loudness::LoudnessWindow;
use crate::analysis::AnalysisError;
use serde::{Deserialize, Serialize};

/// What the counter does once a run reaches the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApneaPolicy {
    /// Emit, then reset the counter: a run of `k * min` windows counts `k`
    #[default]
    ResetAfterEmit,
    /// Emit once when the run first reaches the threshold; longer runs
    /// still count once
    OncePerRun,
    /// Emit on every window at or past the threshold (overlapping events)
    Retrigger,
}

impl std::str::FromStr for ApneaPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "reset_after_emit" | "reset" => Ok(ApneaPolicy::ResetAfterEmit),
            "once_per_run" | "once" => Ok(ApneaPolicy::OncePerRun),
            "retrigger" | "overlapping" => Ok(ApneaPolicy::Retrigger),
            _ => Err(format!("Unknown apnea policy: {}", s)),
        }
    }
}

impl std::fmt::Display for ApneaPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ApneaPolicy::ResetAfterEmit => "reset_after_emit",
            ApneaPolicy::OncePerRun => "once_per_run",
            ApneaPolicy::Retrigger => "retrigger",
        };
        write!(f, "{}", name)
    }
}

/// One detected breathing pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApneaEvent {
    /// Index of the loudness window on which the run reached the threshold
    pub window_index: usize,
}

/// Detector state between two windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApneaState {
    /// Consecutive silent windows seen so far
    pub run_length: usize,
}

/// Silence-run state machine configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApneaDetector {
    silence_threshold: f64,
    min_silence_windows: usize,
    policy: ApneaPolicy,
}

impl ApneaDetector {
    /// Create a detector.
    ///
    /// `min_silence_windows` must be at least 1 and `silence_threshold`
    /// must be a finite, non-negative RMS level.
    pub fn new(
        silence_threshold: f64,
        min_silence_windows: usize,
        policy: ApneaPolicy,
    ) -> Result<Self, AnalysisError> {
        if min_silence_windows == 0 {
            return Err(AnalysisError::InvalidConfig(
                "min_silence_windows must be at least 1".to_string(),
            ));
        }
        if !silence_threshold.is_finite() || silence_threshold < 0.0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "silence_threshold must be a non-negative RMS level, got {}",
                silence_threshold
            )));
        }
        Ok(Self {
            silence_threshold,
            min_silence_windows,
            policy,
        })
    }

    pub fn policy(&self) -> ApneaPolicy {
        self.policy
    }

    /// Advance the state machine by one window.
    pub fn step(&self, state: ApneaState, window: &LoudnessWindow) -> (ApneaState, Option<ApneaEvent>) {
        // 1. accumulate or reset
        let run_length = if window.rms < self.silence_threshold {
            state.run_length + 1
        } else {
            0
        };

        // 2. emit
        let reached = match self.policy {
            ApneaPolicy::ResetAfterEmit | ApneaPolicy::Retrigger => {
                run_length >= self.min_silence_windows
            }
            ApneaPolicy::OncePerRun => run_length == self.min_silence_windows,
        };
        if !reached {
            return (ApneaState { run_length }, None);
        }

        let event = ApneaEvent {
            window_index: window.index,
        };
        let run_length = match self.policy {
            ApneaPolicy::ResetAfterEmit => 0,
            ApneaPolicy::OncePerRun | ApneaPolicy::Retrigger => run_length,
        };
        (ApneaState { run_length }, Some(event))
    }

    /// Run the detector over a full window series.
    pub fn detect<'a, I>(&self, windows: I) -> Vec<ApneaEvent>
    where
        I: IntoIterator<Item = &'a LoudnessWindow>,
    {
        let mut state = ApneaState::default();
        let mut events = Vec::new();
        for window in windows {
            let (next, event) = self.step(state, window);
            state = next;
            events.extend(event);
        }
        events
    }
}
