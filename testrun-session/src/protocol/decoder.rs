// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    FramedLine, LineDelimiter, LineFramer, ProtocolVersion, TreeEntry, messages::*,
};
use crate::status::Status;
use std::time::Duration;
use tracing::debug;

/// An event decoded from the runner's message stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// `%TESTC`: the run started.
    RunStarted {
        /// The number of tests announced.
        test_count: usize,
        /// The protocol version the runner speaks.
        version: ProtocolVersion,
    },

    /// `%TSTTREE`: a tree node was announced.
    TreeEntry(TreeEntry),

    /// `%TESTS`: a test started.
    TestStarted {
        /// The test's id.
        test_id: String,
        /// The test's name.
        test_name: String,
    },

    /// `%TESTE`: a test ended.
    TestEnded {
        /// The test's id.
        test_id: String,
        /// The test's name, without any ignore prefix.
        test_name: String,
        /// Whether the runner reported the test as ignored.
        ignored: bool,
    },

    /// `%ERROR` or `%FAILED`, completed by its trace block.
    TestFailed {
        /// [`Status::Error`] or [`Status::Failure`].
        status: Status,
        /// The test's id.
        test_id: String,
        /// The test's name, without any assumption prefix.
        test_name: String,
        /// Whether this was an assumption failure.
        assumption_failure: bool,
        /// The failure trace.
        trace: String,
        /// The expected value of a comparison failure.
        expected: Option<String>,
        /// The actual value of a comparison failure.
        actual: Option<String>,
    },

    /// `%TESTRR`: a test was rerun.
    TestReran {
        /// The test's id.
        test_id: String,
        /// The test's class.
        class_name: String,
        /// The test's name.
        test_name: String,
        /// The rerun's outcome.
        status: Status,
        /// The rerun trace, for failed reruns.
        trace: Option<String>,
        /// The expected value of a comparison failure.
        expected: Option<String>,
        /// The actual value of a comparison failure.
        actual: Option<String>,
    },

    /// `%RUNTIME`: the run ended.
    RunEnded {
        /// Elapsed time reported by the runner, if it could be parsed.
        elapsed: Option<Duration>,
    },

    /// `%TSTSTP`: the run stopped after a stop request.
    RunStopped {
        /// Elapsed time reported by the runner, if it could be parsed.
        elapsed: Option<Duration>,
    },

    /// The stream ended without the run ending or stopping.
    RunTerminated,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DecoderState {
    Default,
    Trace,
    Expected,
    Actual,
    RerunTrace,
}

impl DecoderState {
    fn end_tag(self) -> Option<&'static str> {
        match self {
            DecoderState::Default => None,
            DecoderState::Trace => Some(TRACE_END),
            DecoderState::Expected => Some(EXPECTED_END),
            DecoderState::Actual => Some(ACTUAL_END),
            DecoderState::RerunTrace => Some(RTRACE_END),
        }
    }
}

#[derive(Clone, Debug)]
struct PendingFailure {
    status: Status,
    test_id: String,
    test_name: String,
    assumption_failure: bool,
}

/// Turns protocol lines into [`ProtocolEvent`]s.
///
/// The decoder is independent of any tree or session: it only tracks the
/// protocol version and the multi-line blocks being accumulated.
#[derive(Debug)]
pub struct ProtocolDecoder {
    state: DecoderState,
    version: ProtocolVersion,
    trace: String,
    expected: Option<String>,
    actual: Option<String>,
    rerun_trace: Option<String>,
    pending_failure: Option<PendingFailure>,
    finished: bool,
}

impl Default for ProtocolDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDecoder {
    /// Creates a decoder in the default state.
    pub fn new() -> Self {
        Self {
            state: DecoderState::Default,
            version: ProtocolVersion::Legacy,
            trace: String::new(),
            expected: None,
            actual: None,
            rerun_trace: None,
            pending_failure: None,
            finished: false,
        }
    }

    /// The protocol version announced by the runner so far.
    pub fn version(&self) -> &ProtocolVersion {
        &self.version
    }

    /// Returns true once the run has ended or stopped.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decodes one line. Returns an event if the line completed one.
    pub fn decode_line(
        &mut self,
        line: &str,
        delimiter: Option<LineDelimiter>,
    ) -> Option<ProtocolEvent> {
        if let Some(end_tag) = self.state.end_tag() {
            if line.starts_with(end_tag) {
                let state = std::mem::replace(&mut self.state, DecoderState::Default);
                return self.complete_block(state);
            }
            let delimiter = delimiter.map_or("", LineDelimiter::as_str);
            let buffer = match self.state {
                DecoderState::Trace => &mut self.trace,
                DecoderState::Expected => self.expected.get_or_insert_default(),
                DecoderState::Actual => self.actual.get_or_insert_default(),
                DecoderState::RerunTrace => self.rerun_trace.get_or_insert_default(),
                DecoderState::Default => return None,
            };
            buffer.push_str(line);
            buffer.push_str(delimiter);
            return None;
        }

        self.decode_message(line)
    }

    /// Signals the end of the stream.
    ///
    /// Returns [`ProtocolEvent::RunTerminated`] unless the run already ended
    /// or stopped.
    pub fn finish(&mut self) -> Option<ProtocolEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(ProtocolEvent::RunTerminated)
    }

    fn decode_message(&mut self, line: &str) -> Option<ProtocolEvent> {
        if line.starts_with(TRACE_START) {
            self.trace.clear();
            self.state = DecoderState::Trace;
            return None;
        }
        if line.starts_with(EXPECTED_START) {
            self.expected = Some(String::new());
            self.state = DecoderState::Expected;
            return None;
        }
        if line.starts_with(ACTUAL_START) {
            self.actual = Some(String::new());
            self.state = DecoderState::Actual;
            return None;
        }
        if line.starts_with(RTRACE_START) {
            self.rerun_trace = Some(String::new());
            self.state = DecoderState::RerunTrace;
            return None;
        }

        if let Some(payload) = payload_of(line, TEST_RUN_START) {
            let (count, version) = match payload.split_once(' ') {
                Some((count, version)) => (count, Some(version)),
                None => (payload, None),
            };
            let test_count = count.trim().parse().unwrap_or_else(|error| {
                debug!("ignoring malformed test count {count:?}: {error}");
                0
            });
            self.version = ProtocolVersion::from_token(version);
            self.finished = false;
            return Some(ProtocolEvent::RunStarted {
                test_count,
                version: self.version.clone(),
            });
        }

        if let Some(payload) = payload_of(line, TEST_START) {
            let (test_id, test_name) = self.version.split_test_id(payload);
            return Some(ProtocolEvent::TestStarted {
                test_id: test_id.to_owned(),
                test_name: test_name.to_owned(),
            });
        }

        if let Some(payload) = payload_of(line, TEST_END) {
            let (test_id, test_name) = self.version.split_test_id(payload);
            let (test_name, ignored) = match test_name.strip_prefix(IGNORED_PREFIX) {
                Some(name) => (name, true),
                None => (test_name, false),
            };
            // Legacy ids are the test name, so strip the prefix there too.
            let test_id = test_id.strip_prefix(IGNORED_PREFIX).unwrap_or(test_id);
            return Some(ProtocolEvent::TestEnded {
                test_id: test_id.to_owned(),
                test_name: test_name.to_owned(),
                ignored,
            });
        }

        for (tag, status) in [(TEST_ERROR, Status::Error), (TEST_FAILED, Status::Failure)] {
            if let Some(payload) = payload_of(line, tag) {
                let (test_id, test_name) = self.version.split_test_id(payload);
                let (test_name, assumption_failure) =
                    match test_name.strip_prefix(ASSUMPTION_FAILED_PREFIX) {
                        Some(name) => (name, true),
                        None => (test_name, false),
                    };
                let test_id = test_id
                    .strip_prefix(ASSUMPTION_FAILED_PREFIX)
                    .unwrap_or(test_id);
                self.pending_failure = Some(PendingFailure {
                    status,
                    test_id: test_id.to_owned(),
                    test_name: test_name.to_owned(),
                    assumption_failure,
                });
                return None;
            }
        }

        if let Some(payload) = payload_of(line, TEST_TREE) {
            return self
                .version
                .parse_tree_entry(payload)
                .map(ProtocolEvent::TreeEntry);
        }

        if let Some(payload) = payload_of(line, TEST_RUN_END) {
            self.finished = true;
            return Some(ProtocolEvent::RunEnded {
                elapsed: parse_elapsed(payload),
            });
        }

        if let Some(payload) = payload_of(line, TEST_STOPPED) {
            self.finished = true;
            return Some(ProtocolEvent::RunStopped {
                elapsed: parse_elapsed(payload),
            });
        }

        if let Some(payload) = payload_of(line, TEST_RERAN) {
            let rerun = self.version.parse_rerun(payload)?;
            let rerun_trace = self.rerun_trace.take();
            let trace = if rerun.status.is_ok() {
                None
            } else {
                rerun_trace.filter(|trace| !trace.is_empty())
            };
            return Some(ProtocolEvent::TestReran {
                test_id: rerun.test_id,
                class_name: rerun.class_name,
                test_name: rerun.test_name,
                status: rerun.status,
                trace,
                expected: take_non_empty(&mut self.expected),
                actual: take_non_empty(&mut self.actual),
            });
        }

        if !line.trim().is_empty() {
            debug!("ignoring unrecognized protocol line {line:?}");
        }
        None
    }

    fn complete_block(&mut self, state: DecoderState) -> Option<ProtocolEvent> {
        if state != DecoderState::Trace {
            return None;
        }
        let trace = std::mem::take(&mut self.trace);
        let expected = take_non_empty(&mut self.expected);
        let actual = take_non_empty(&mut self.actual);
        let Some(failure) = &self.pending_failure else {
            debug!("ignoring trace without a preceding failure message");
            return None;
        };
        Some(ProtocolEvent::TestFailed {
            status: failure.status,
            test_id: failure.test_id.clone(),
            test_name: failure.test_name.clone(),
            assumption_failure: failure.assumption_failure,
            trace,
            expected,
            actual,
        })
    }
}

fn payload_of<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    line.strip_prefix(tag)
        .map(|payload| payload.trim_start_matches(' '))
}

fn parse_elapsed(payload: &str) -> Option<Duration> {
    match payload.trim().parse::<u64>() {
        Ok(millis) => Some(Duration::from_millis(millis)),
        Err(error) => {
            debug!("ignoring malformed elapsed time {payload:?}: {error}");
            None
        }
    }
}

fn take_non_empty(value: &mut Option<String>) -> Option<String> {
    value.take().filter(|value| !value.is_empty())
}

/// A framer and decoder combined: feed it bytes, get events.
#[derive(Debug, Default)]
pub struct ProtocolStream {
    framer: LineFramer,
    decoder: ProtocolDecoder,
}

impl ProtocolStream {
    /// Creates a new stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying decoder.
    pub fn decoder(&self) -> &ProtocolDecoder {
        &self.decoder
    }

    /// Feeds a chunk of bytes, passing every completed event to `sink`.
    pub fn feed(&mut self, bytes: &[u8], mut sink: impl FnMut(ProtocolEvent)) {
        self.framer.push(bytes);
        self.drain(&mut sink);
    }

    /// Ends the stream, flushing any final line and reporting termination if
    /// the run didn't end.
    pub fn finish(&mut self, mut sink: impl FnMut(ProtocolEvent)) {
        self.framer.finish();
        self.drain(&mut sink);
        if let Some(event) = self.decoder.finish() {
            sink(event);
        }
    }

    fn drain(&mut self, sink: &mut impl FnMut(ProtocolEvent)) {
        while let Some(FramedLine { text, delimiter }) = self.framer.next_line() {
            if let Some(event) = self.decoder.decode_line(&text, delimiter) {
                sink(event);
            }
        }
    }
}

/// Decodes a complete byte buffer into events.
pub fn decode_all(bytes: &[u8]) -> Vec<ProtocolEvent> {
    let mut events = Vec::new();
    let mut stream = ProtocolStream::new();
    stream.feed(bytes, |event| events.push(event));
    stream.finish(|event| events.push(event));
    events
}
