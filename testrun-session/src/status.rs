// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The status algebra used to aggregate outcomes across the test tree.
//!
//! [`Status`] is a closed set with a fixed, total precedence order. Combining
//! two statuses always picks the one with the stronger (lower) precedence, so
//! a running error anywhere below a suite dominates everything else, and a
//! finished test dominates one that never ran.

use std::{cmp::Ordering, fmt};

/// The status of a single element in the test tree.
///
/// Variants are listed in precedence order: earlier variants win when two
/// statuses are [combined](Status::combine).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub enum Status {
    /// Running, and at least one descendant has errored.
    RunningError,

    /// Running, and at least one descendant has failed.
    RunningFailure,

    /// Running.
    Running,

    /// Finished with an error (an unexpected problem).
    Error,

    /// Finished with a failure (an assertion did not hold).
    Failure,

    /// Finished successfully.
    Ok,

    /// Not run yet.
    NotRun,
}

impl Status {
    /// All statuses, in precedence order.
    pub const PRECEDENCE: [Status; 7] = [
        Status::RunningError,
        Status::RunningFailure,
        Status::Running,
        Status::Error,
        Status::Failure,
        Status::Ok,
        Status::NotRun,
    ];

    /// The legacy status code for [`Status::Ok`].
    pub const LEGACY_OK: u8 = 0;

    /// The legacy status code for [`Status::Error`].
    pub const LEGACY_ERROR: u8 = 1;

    /// The legacy status code for [`Status::Failure`].
    pub const LEGACY_FAILURE: u8 = 2;

    /// Returns the precedence of this status. Lower values win when combining.
    pub fn precedence(self) -> u8 {
        match self {
            Status::RunningError => 0,
            Status::RunningFailure => 1,
            Status::Running => 2,
            Status::Error => 3,
            Status::Failure => 4,
            Status::Ok => 5,
            Status::NotRun => 6,
        }
    }

    /// Combines two statuses, returning whichever has the lower precedence value.
    pub fn combine(self, other: Status) -> Status {
        if other.precedence() < self.precedence() {
            other
        } else {
            self
        }
    }

    /// Returns the 3-valued code understood by older consumers.
    pub fn legacy_code(self) -> u8 {
        match self {
            Status::RunningError | Status::Error => Self::LEGACY_ERROR,
            Status::RunningFailure | Status::Failure => Self::LEGACY_FAILURE,
            Status::Running | Status::Ok | Status::NotRun => Self::LEGACY_OK,
        }
    }

    /// Converts a legacy status code into a finished status.
    ///
    /// Returns `None` for unknown codes.
    pub fn from_legacy_code(code: u8) -> Option<Status> {
        match code {
            Self::LEGACY_OK => Some(Status::Ok),
            Self::LEGACY_ERROR => Some(Status::Error),
            Self::LEGACY_FAILURE => Some(Status::Failure),
            _ => None,
        }
    }

    /// Returns true for the three running statuses.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Status::Running | Status::RunningError | Status::RunningFailure
        )
    }

    /// Returns true for [`Status::Error`] and [`Status::RunningError`].
    pub fn is_error(self) -> bool {
        matches!(self, Status::Error | Status::RunningError)
    }

    /// Returns true for [`Status::Failure`] and [`Status::RunningFailure`].
    pub fn is_failure(self) -> bool {
        matches!(self, Status::Failure | Status::RunningFailure)
    }

    /// Returns true if this status is any kind of error or failure.
    pub fn is_error_or_failure(self) -> bool {
        self.is_error() || self.is_failure()
    }

    /// Returns true for [`Status::Ok`].
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Returns true for [`Status::NotRun`].
    pub fn is_not_run(self) -> bool {
        self == Status::NotRun
    }

    /// Returns true if this status is terminal: neither running nor not run.
    pub fn is_done(self) -> bool {
        self.progress_state() == ProgressState::Completed
    }

    /// Maps this status to the coarse progress of the element.
    pub fn progress_state(self) -> ProgressState {
        if self.is_running() {
            ProgressState::Running
        } else if self.is_not_run() {
            ProgressState::NotStarted
        } else {
            ProgressState::Completed
        }
    }

    /// Maps this status to the result reported to collaborators.
    pub fn to_result(self) -> TestResult {
        match self {
            Status::NotRun | Status::Running => TestResult::Undefined,
            Status::Error | Status::RunningError => TestResult::Error,
            Status::Failure | Status::RunningFailure => TestResult::Failure,
            Status::Ok => TestResult::Ok,
        }
    }

    /// Parses a status word used by the rerun sub-protocol.
    pub fn from_rerun_word(word: &str) -> Option<Status> {
        match word {
            "OK" => Some(Status::Ok),
            "ERROR" => Some(Status::Error),
            "FAILURE" => Some(Status::Failure),
            _ => None,
        }
    }

    pub(crate) fn to_static_str(self) -> &'static str {
        match self {
            Status::RunningError => "RUNNING_ERROR",
            Status::RunningFailure => "RUNNING_FAILURE",
            Status::Running => "RUNNING",
            Status::Error => "ERROR",
            Status::Failure => "FAILURE",
            Status::Ok => "OK",
            Status::NotRun => "NOT_RUN",
        }
    }
}

impl PartialOrd for Status {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Statuses are ordered by precedence: `RunningError` is the least element.
impl Ord for Status {
    fn cmp(&self, other: &Self) -> Ordering {
        self.precedence().cmp(&other.precedence())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.to_static_str())
    }
}

/// The result of a test element, as reported to collaborators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TestResult {
    /// The element hasn't finished (or never started).
    Undefined,

    /// The element passed.
    Ok,

    /// The element failed.
    Failure,

    /// The element errored.
    Error,

    /// The element was ignored.
    Ignored,
}

impl TestResult {
    /// Returns true if this result is a failure or an error.
    pub fn is_failing(self) -> bool {
        matches!(self, TestResult::Failure | TestResult::Error)
    }
}

/// The coarse progress of a test element.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProgressState {
    /// The element hasn't started.
    NotStarted,

    /// The element is running.
    Running,

    /// The element has finished.
    Completed,

    /// The run was stopped before the element could finish.
    Stopped,
}
