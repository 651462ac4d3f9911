// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

/// Elapsed time of a test element, in seconds.
///
/// Internally this is a single `f64`: NaN means unset, a negative value is a
/// clock that is still running and holds `-start`, and anything else is the
/// finished duration. The encoding stays private to this type.
#[derive(Copy, Clone, Debug)]
pub(crate) struct ElapsedTime(f64);

impl ElapsedTime {
    pub(crate) const UNSET: Self = Self(f64::NAN);

    pub(crate) fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    pub(crate) fn seconds(self) -> Option<f64> {
        (self.0 >= 0.0).then_some(self.0)
    }

    pub(crate) fn is_running(self) -> bool {
        self.0 < 0.0
    }

    pub(crate) fn is_finished(self) -> bool {
        self.0 >= 0.0
    }

    /// Starts the clock unless a finished time is already recorded.
    pub(crate) fn start(&mut self, now: f64) {
        if !self.is_finished() {
            // A start time of exactly zero can't be told apart from a finished
            // zero-length run, so nudge it below zero.
            self.0 = if now > 0.0 { -now } else { -f64::MIN_POSITIVE };
        }
    }

    /// Stops a running clock; does nothing otherwise.
    pub(crate) fn finish(&mut self, now: f64) {
        if self.is_running() {
            self.0 = (now + self.0).max(0.0);
        }
    }
}

impl Default for ElapsedTime {
    fn default() -> Self {
        Self::UNSET
    }
}

/// Returns the current wall-clock time in seconds since the Unix epoch.
pub(crate) fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs_f64())
        .unwrap_or_default()
}
