// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-module tests for testrun-session.

mod live_connection;
mod scenarios;
mod transcript_round_trip;

use camino::Utf8Path;
use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};
use testrun_session::{
    config::SessionConfig,
    protocol::ProtocolStream,
    session::{ShutdownFlag, TestRunSession, TestSessionListener},
    status::Status,
    tree::TestElement,
};

pub(crate) fn test_config(swap_dir: &Utf8Path) -> SessionConfig {
    let mut config = SessionConfig::default_config().expect("default config is valid");
    config.session.name = "integration".to_owned();
    config.swap.dir = Some(swap_dir.to_owned());
    config
}

pub(crate) fn new_session(config: &SessionConfig) -> TestRunSession {
    TestRunSession::with_shutdown_flag(config, ShutdownFlag::new())
}

/// Feeds `input` through a protocol stream, the way a connection would.
pub(crate) fn replay(session: &TestRunSession, input: &str) {
    let mut stream = ProtocolStream::new();
    stream.feed(input.as_bytes(), |event| session.handle_event(event));
    stream.finish(|event| session.handle_event(event));
}

/// Records every callback as a line of text.
#[derive(Debug, Default)]
pub(crate) struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, event: String) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl TestSessionListener for RecordingListener {
    fn session_started(&self) {
        self.push("session started".to_owned());
    }

    fn session_ended(&self, elapsed: Option<Duration>) {
        self.push(format!("session ended {elapsed:?}"));
    }

    fn session_stopped(&self, elapsed: Option<Duration>) {
        self.push(format!("session stopped {elapsed:?}"));
    }

    fn session_terminated(&self) {
        self.push("session terminated".to_owned());
    }

    fn test_added(&self, element: &TestElement) {
        self.push(format!("added {}", element.id()));
    }

    fn running_begins(&self) {
        self.push("running begins".to_owned());
    }

    fn test_started(&self, element: &TestElement) {
        self.push(format!("started {}", element.id()));
    }

    fn test_ended(&self, element: &TestElement) {
        self.push(format!("ended {}", element.id()));
    }

    fn test_failed(
        &self,
        element: &TestElement,
        status: Status,
        trace: &str,
        _expected: Option<&str>,
        _actual: Option<&str>,
    ) {
        self.push(format!("failed {} {status} {trace:?}", element.id()));
    }

    fn test_reran(
        &self,
        element: &TestElement,
        status: Status,
        trace: Option<&str>,
        _expected: Option<&str>,
        _actual: Option<&str>,
    ) {
        self.push(format!("reran {} {status} {trace:?}", element.id()));
    }
}
