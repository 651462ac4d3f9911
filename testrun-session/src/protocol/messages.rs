// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message tags used on the wire.
//!
//! Every message starts with a tag. When written, tags are padded to
//! [`HEADER_WIDTH`] characters; readers accept any amount of padding.

use std::fmt;

/// The width headers are padded to when written.
pub const HEADER_WIDTH: usize = 8;

/// `%TESTC <count>[ <version>]`: a run is starting.
pub const TEST_RUN_START: &str = "%TESTC";

/// `%TESTS <id>,<name>`: a test started.
pub const TEST_START: &str = "%TESTS";

/// `%TESTE <id>,<name>`: a test ended.
pub const TEST_END: &str = "%TESTE";

/// `%ERROR <id>,<name>`: a test errored. Followed by a trace block.
pub const TEST_ERROR: &str = "%ERROR";

/// `%FAILED <id>,<name>`: a test failed. Followed by a trace block.
pub const TEST_FAILED: &str = "%FAILED";

/// Start of a failure trace.
pub const TRACE_START: &str = "%TRACES";

/// End of a failure trace.
pub const TRACE_END: &str = "%TRACEE";

/// Start of the expected value of a comparison failure.
pub const EXPECTED_START: &str = "%EXPECTS";

/// End of the expected value of a comparison failure.
pub const EXPECTED_END: &str = "%EXPECTE";

/// Start of the actual value of a comparison failure.
pub const ACTUAL_START: &str = "%ACTUALS";

/// End of the actual value of a comparison failure.
pub const ACTUAL_END: &str = "%ACTUALE";

/// Start of the trace of a rerun test.
pub const RTRACE_START: &str = "%RTRACES";

/// End of the trace of a rerun test.
pub const RTRACE_END: &str = "%RTRACEE";

/// `%TSTTREE <entry>`: a node in the test tree was discovered.
pub const TEST_TREE: &str = "%TSTTREE";

/// `%RUNTIME <elapsed ms>`: the run ended.
pub const TEST_RUN_END: &str = "%RUNTIME";

/// `%TSTSTP <elapsed ms>`: the run stopped on request.
pub const TEST_STOPPED: &str = "%TSTSTP";

/// `%TESTRR <id> <class> <name> <STATUS>`: a test was rerun.
pub const TEST_RERAN: &str = "%TESTRR";

/// Sent to the runner: rerun a single test.
pub const RERUN: &str = "%RERUN";

/// Sent to the runner: stop the run.
pub const STOP: &str = "%STOP";

/// Test name prefix marking an ignored test on [`TEST_END`].
pub const IGNORED_PREFIX: &str = "@Ignore: ";

/// Test name prefix marking an assumption failure on [`TEST_FAILED`] and
/// [`TEST_ERROR`].
pub const ASSUMPTION_FAILED_PREFIX: &str = "@AssumptionFailure: ";

/// Writes a tag padded to [`HEADER_WIDTH`], followed by a payload.
pub fn format_message(tag: &str, payload: &str) -> String {
    format!("{tag:<HEADER_WIDTH$}{payload}")
}

/// A command sent from the session to the runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunnerCommand {
    /// Ask the runner to stop the run.
    Stop,

    /// Ask the runner to rerun a single test.
    Rerun {
        /// The test's id.
        test_id: String,
        /// The test's class name.
        class_name: String,
        /// The test's name.
        test_name: String,
    },
}

impl RunnerCommand {
    /// The line sent on the wire, including the trailing newline.
    pub fn to_wire(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for RunnerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerCommand::Stop => f.write_str(&format_message(STOP, "")),
            RunnerCommand::Rerun {
                test_id,
                class_name,
                test_name,
            } => f.write_str(&format_message(
                RERUN,
                &format!("{test_id} {class_name} {test_name}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_padded() {
        assert_eq!(format_message(TEST_START, "1,a"), "%TESTS  1,a");
        assert_eq!(format_message(TEST_TREE, "x"), "%TSTTREEx");
        assert_eq!(RunnerCommand::Stop.to_wire(), "%STOP   \n");
        assert_eq!(
            RunnerCommand::Rerun {
                test_id: "7".to_owned(),
                class_name: "pkg.Foo".to_owned(),
                test_name: "testBar".to_owned(),
            }
            .to_wire(),
            "%RERUN  7 pkg.Foo testBar\n"
        );
    }
}
