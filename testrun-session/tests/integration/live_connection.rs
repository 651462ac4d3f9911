// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tests that drive a session through a real TCP connection, with the test
//! playing the part of the runner.

use crate::{RecordingListener, new_session, test_config};
use camino_tempfile::Utf8TempDir;
use pretty_assertions::assert_eq;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use testrun_session::{
    config::LaunchMode,
    errors::ConnectionError,
    session::{RunCounters, RunState, TestRunSession},
    status::{ProgressState, Status},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

fn localhost() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition was met in time");
}

struct FakeRunner {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FakeRunner {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connected to session");
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, text: &str) {
        self.writer
            .write_all(text.as_bytes())
            .await
            .expect("wrote to session");
    }

    async fn next_command(&mut self) -> String {
        self.lines
            .next_line()
            .await
            .expect("read from session")
            .expect("session sent a command")
    }
}

#[tokio::test]
async fn full_run_over_tcp() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session = new_session(&test_config(dir.path()));
    let connection = session.listen(localhost()).await.expect("listening");
    assert!(session.is_starting());

    let mut runner = FakeRunner::connect(connection.local_addr()).await;
    runner
        .send("%TESTC  1 v2\r\n%TSTTREE1,a(pkg.Foo),false,1,false,-1,,,\r\n%TESTS  1,a(pkg.Foo)\r\n")
        .await;
    runner.send("%TESTE  1,a(pkg.Foo)\r\n%RUNTIME7\r\n").await;
    drop(runner);
    connection.join().await;

    assert_eq!(session.run_state(), RunState::Ended);
    assert_eq!(
        session.counters(),
        RunCounters {
            started: 1,
            total: 1,
            ..Default::default()
        }
    );
    assert_eq!(session.elapsed_seconds(), Some(0.007));
    assert_eq!(session.progress_state(), ProgressState::Completed);
    assert!(!session.is_kept_alive());
}

#[tokio::test]
async fn graceful_stop_is_acknowledged() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session = new_session(&test_config(dir.path()));
    let listener = Arc::new(RecordingListener::default());
    session.add_listener(listener.clone());

    let connection = session.listen(localhost()).await.expect("listening");
    let mut runner = FakeRunner::connect(connection.local_addr()).await;
    runner.send("%TESTC  2 v2\n%TESTS  1,slow\n").await;
    wait_until(|| session.is_running()).await;

    assert!(session.stop_test_run());
    assert_eq!(runner.next_command().await, "%STOP   ");
    runner.send("%TSTSTP 5\n").await;
    drop(runner);
    connection.join().await;

    assert_eq!(session.run_state(), RunState::Stopped);
    let events = listener.events();
    assert_eq!(
        events.last().map(String::as_str),
        Some("session stopped Some(5ms)")
    );
    assert!(!events.iter().any(|event| event == "session terminated"));
}

#[tokio::test]
async fn kept_alive_runner_reruns_tests() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let mut config = test_config(dir.path());
    config.launch.mode = LaunchMode::Debug;
    config.launch.keep_alive = true;
    let session = new_session(&config);

    let connection = session.listen(localhost()).await.expect("listening");
    let mut runner = FakeRunner::connect(connection.local_addr()).await;
    runner
        .send(concat!(
            "%TESTC  1 v2\n",
            "%TSTTREE1,a(pkg.Foo),false,1,false,-1,,,\n",
            "%TESTS  1,a(pkg.Foo)\n",
            "%FAILED 1,a(pkg.Foo)\n",
            "%TRACES\n",
            "boom\n",
            "%TRACEE\n",
            "%TESTE  1,a(pkg.Foo)\n",
            "%RUNTIME5\n",
        ))
        .await;
    wait_until(|| session.run_state() == RunState::Ended).await;
    assert!(session.is_kept_alive());
    assert!(!session.swap_out(), "kept-alive sessions stay in memory");
    assert_eq!(session.counters().failures, 1);

    // The failure is taken back as soon as the rerun is requested.
    assert!(session.rerun("1", "pkg.Foo", "a"));
    assert_eq!(session.counters().failures, 0);
    assert_eq!(runner.next_command().await, "%RERUN  1 pkg.Foo a");

    runner.send("%TESTRR 1 pkg.Foo a OK\n").await;
    wait_until(|| {
        session
            .element_by_id("1")
            .is_some_and(|e| e.own_status() == Status::Ok)
    })
    .await;
    assert_eq!(session.counters().failures, 0);
    assert_eq!(session.element_by_id("1").and_then(|e| e.trace().map(str::to_owned)), None);

    assert!(session.rerun("1", "pkg.Foo", "a"));
    assert_eq!(runner.next_command().await, "%RERUN  1 pkg.Foo a");
    runner
        .send("%RTRACES\nboom again\n%RTRACEE\n%TESTRR 1 pkg.Foo a FAILURE\n")
        .await;
    wait_until(|| session.counters().failures == 1).await;
    assert_eq!(
        session.element_by_id("1").and_then(|e| e.trace().map(str::to_owned)),
        Some("boom again\n".to_owned())
    );

    drop(runner);
    connection.join().await;
    assert_eq!(session.run_state(), RunState::Ended);
    assert!(!session.is_kept_alive());
    assert!(!session.rerun("1", "pkg.Foo", "a"));
}

#[tokio::test]
async fn terminate_before_runner_connects() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session = new_session(&test_config(dir.path()));
    let listener = Arc::new(RecordingListener::default());
    session.add_listener(listener.clone());

    let connection = session.listen(localhost()).await.expect("listening");
    connection.terminate();
    connection.join().await;

    assert_eq!(session.run_state(), RunState::Terminated);
    assert_eq!(listener.events(), ["session terminated"]);
}

#[tokio::test]
async fn terminate_mid_run() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session = new_session(&test_config(dir.path()));
    let connection = session.listen(localhost()).await.expect("listening");

    let mut runner = FakeRunner::connect(connection.local_addr()).await;
    runner.send("%TESTC  3 v2\n%TESTS  1,a\n").await;
    wait_until(|| session.is_running()).await;

    session.terminate();
    connection.join().await;
    assert_eq!(session.run_state(), RunState::Terminated);
    assert!(session.is_stopped());
    assert_eq!(session.progress_state(), ProgressState::Stopped);
    assert!(!session.stop_test_run(), "no runner left to stop");
}

#[tokio::test]
async fn second_listen_is_rejected() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session: TestRunSession = new_session(&test_config(dir.path()));
    let connection = session.listen(localhost()).await.expect("listening");

    let err = session
        .listen(localhost())
        .await
        .expect_err("session already has a runner");
    assert!(
        matches!(err, ConnectionError::AlreadyConnected { ref session } if session == "integration"),
        "unexpected error: {err}"
    );

    connection.terminate();
    connection.join().await;
}

#[tokio::test]
async fn finished_session_cannot_run_again() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session = new_session(&test_config(dir.path()));
    let connection = session.listen(localhost()).await.expect("listening");

    let mut runner = FakeRunner::connect(connection.local_addr()).await;
    runner
        .send("%TESTC  1 v2\n%TSTTREE1,a(pkg.Foo),false,1,false,-1,,,\n%TESTS  1,a(pkg.Foo)\n")
        .await;
    runner.send("%TESTE  1,a(pkg.Foo)\n%RUNTIME3\n").await;
    drop(runner);
    connection.join().await;
    assert_eq!(session.run_state(), RunState::Ended);

    let err = session
        .listen(localhost())
        .await
        .expect_err("a finished session doesn't take another runner");
    assert!(
        matches!(err, ConnectionError::AlreadyRun { state: RunState::Ended, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(session.run_state(), RunState::Ended);
    assert_eq!(
        session.counters(),
        RunCounters {
            started: 1,
            total: 1,
            ..Default::default()
        }
    );
}

#[tokio::test]
async fn terminated_session_cannot_run_again() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session = new_session(&test_config(dir.path()));
    let connection = session.listen(localhost()).await.expect("listening");
    connection.terminate();
    connection.join().await;

    let err = session
        .listen(localhost())
        .await
        .expect_err("a terminated session doesn't take another runner");
    assert!(
        matches!(err, ConnectionError::AlreadyRun { state: RunState::Terminated, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(session.run_state(), RunState::Terminated);
}
