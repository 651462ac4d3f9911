// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for tracking how long a session's run takes.
//!
//! The run records a wall-clock start time for display and transcripts, and
//! measures its duration with a monotonic clock. Once the run ends the
//! duration is frozen.

use chrono::{DateTime, FixedOffset, Local};
use std::time::{Duration, Instant};

pub(crate) fn stopwatch() -> Stopwatch {
    Stopwatch::new()
}

#[derive(Clone, Debug)]
pub(crate) struct Stopwatch {
    start_time: DateTime<FixedOffset>,
    instant: Instant,
    state: StopwatchState,
}

#[derive(Copy, Clone, Debug)]
enum StopwatchState {
    Running,
    Stopped { duration: Duration },
}

impl Stopwatch {
    fn new() -> Self {
        Self {
            // These two syscalls happen close enough to each other.
            start_time: Local::now().fixed_offset(),
            instant: Instant::now(),
            state: StopwatchState::Running,
        }
    }

    pub(crate) fn start_time(&self) -> DateTime<FixedOffset> {
        self.start_time
    }

    /// Freezes the elapsed time. Stopping twice keeps the first duration.
    pub(crate) fn stop(&mut self) {
        if let StopwatchState::Running = self.state {
            self.state = StopwatchState::Stopped {
                duration: self.instant.elapsed(),
            };
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        match self.state {
            StopwatchState::Running => self.instant.elapsed(),
            StopwatchState::Stopped { duration } => duration,
        }
    }
}
