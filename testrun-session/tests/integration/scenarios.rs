// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{RecordingListener, new_session, replay, test_config};
use camino_tempfile::Utf8TempDir;
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use testrun_session::{
    session::{RunCounters, RunState, UNROOTED_SUITE_ID, UNROOTED_SUITE_NAME},
    status::{Status, TestResult},
    tree::ROOT_ID,
};

#[test]
fn unannounced_tests_run_to_completion() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session = new_session(&test_config(dir.path()));
    let listener = Arc::new(RecordingListener::default());
    session.add_listener(listener.clone());

    replay(
        &session,
        indoc! {"
            %TESTC  2 v2
            %TESTS  1,A
            %TESTE  1,A
            %TESTS  2,B
            %FAILED 2,B
            %TRACES
            boom
            %TRACEE
            %TESTE  2,B
            %RUNTIME10
        "},
    );

    assert_eq!(
        session.counters(),
        RunCounters {
            started: 2,
            failures: 1,
            total: 2,
            ..Default::default()
        }
    );
    assert_eq!(session.run_state(), RunState::Ended);

    let a = session.element_by_id("1").expect("A was added");
    assert_eq!(a.own_status(), Status::Ok);
    let b = session.element_by_id("2").expect("B was added");
    assert_eq!(b.own_status(), Status::Failure);
    assert_eq!(b.trace().map(str::trim_end), Some("boom"));
    assert_eq!(session.test_result(true), TestResult::Failure);

    assert_eq!(
        listener.events(),
        [
            "session started",
            "added -2",
            "added 1",
            "running begins",
            "started 1",
            "ended 1",
            "added 2",
            "started 2",
            "failed 2 FAILURE \"boom\\n\"",
            "ended 2",
            "session ended Some(10ms)",
        ]
    );
}

#[test]
fn unrooted_suite_collects_unknown_tests_once() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session = new_session(&test_config(dir.path()));
    replay(
        &session,
        indoc! {"
            %TESTC  1 v2
            %TSTTREE1,Known,false,1,false,-1,,,
            %TESTS  7,stray
            %TESTE  7,stray
            %TESTE  8,late
            %RUNTIME3
        "},
    );

    let roots: Vec<_> = session
        .children(ROOT_ID)
        .into_iter()
        .map(|e| e.id().to_owned())
        .collect();
    assert_eq!(roots, ["1", UNROOTED_SUITE_ID]);

    let unrooted = session.children(UNROOTED_SUITE_ID);
    let ids: Vec<_> = unrooted.iter().map(|e| e.id()).collect();
    assert_eq!(ids, ["7", "8"]);
    assert_eq!(
        session
            .element_by_id(UNROOTED_SUITE_ID)
            .map(|e| e.test_name().to_owned()),
        Some(UNROOTED_SUITE_NAME.to_owned())
    );

    // Ending a test that never started doesn't mark it as run.
    assert_eq!(unrooted[1].own_status(), Status::NotRun);
    assert_eq!(session.counters().started, 1);
}

#[test]
fn dynamic_tests_attach_to_their_factory() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session = new_session(&test_config(dir.path()));
    replay(
        &session,
        indoc! {r"
            %TESTC  1 v2
            %TSTTREE1,pkg.Params,true,1,false,-1,,,
            %TSTTREE2,cases(pkg.Params),true,0,false,-1,,[int\, String],
            %TSTTREE3,cases[1],false,1,true,2,first case,,[engine:x]/[case:1]
            %TESTS  3,cases[1]
            %TESTE  3,cases[1]
            %RUNTIME1
        "},
    );

    let tree = session.tree_snapshot();
    let factory = tree.element_by_id("2").expect("factory suite");
    assert_eq!(
        factory.parameter_types(),
        Some(&["int".to_owned(), "String".to_owned()][..])
    );
    assert_eq!(tree.parent(factory.index()).map(|p| p.id()), Some("1"));

    let dynamic = tree.element_by_id("3").expect("dynamic case");
    assert!(dynamic.is_dynamic_test());
    assert_eq!(dynamic.display_name(), Some("first case"));
    assert_eq!(dynamic.unique_id(), Some("[engine:x]/[case:1]"));
    assert_eq!(tree.parent(dynamic.index()).map(|p| p.id()), Some("2"));

    // The dynamic case wasn't part of the announced count.
    assert_eq!(session.counters().total, 2);
    assert_eq!(session.counters().started, 1);
}

const LEGACY_RUN: &str = indoc! {"
    %TESTC  many
    %TSTTREEpkg.Suite,true,lots
    %TSTTREEa(pkg.Suite),false,1
    %TESTS  a(pkg.Suite)
    %TESTE  a(pkg.Suite)
"};

#[test]
fn legacy_runner_with_malformed_numbers() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session = new_session(&test_config(dir.path()));
    replay(&session, &format!("{LEGACY_RUN}%RUNTIMEsoon\n"));

    assert_eq!(session.run_state(), RunState::Ended);
    assert_eq!(session.counters().total, 0);
    assert_eq!(session.counters().started, 1);

    let tree = session.tree_snapshot();
    let suite = tree.element_by_id("pkg.Suite").expect("legacy suite");
    assert_eq!(suite.as_suite().map(|s| s.test_count()), Some(0));
    let case = tree.element_by_id("a(pkg.Suite)").expect("legacy case");
    assert_eq!(tree.parent(case.index()).map(|p| p.id()), Some(ROOT_ID));
    assert_eq!(case.own_status(), Status::Ok);
    assert!(case.elapsed_seconds().is_some(), "case clock is measured locally");
    assert!(tree.element_by_id(UNROOTED_SUITE_ID).is_none());

    // %RUNTIME is the run's elapsed time, which lands on the root.
    assert_eq!(tree.root().elapsed_seconds(), None);
    assert_eq!(session.elapsed_seconds(), None);

    let well_formed = new_session(&test_config(dir.path()));
    replay(&well_formed, &format!("{LEGACY_RUN}%RUNTIME250\n"));
    assert_eq!(well_formed.elapsed_seconds(), Some(0.25));
}

#[test]
fn stream_cut_short_terminates_the_run() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session = new_session(&test_config(dir.path()));
    let listener = Arc::new(RecordingListener::default());
    session.add_listener(listener.clone());

    replay(&session, "%TESTC  1 v2\n%TESTS  1,a\n%FAILED 1,a\n%TRACES\npartial");

    assert_eq!(session.run_state(), RunState::Terminated);
    assert!(session.is_stopped());
    assert_eq!(
        listener.events().last().map(String::as_str),
        Some("session terminated")
    );
    // The trace never completed, so the failure wasn't recorded.
    assert_eq!(session.counters().failures, 0);
}

#[test]
fn suite_level_failure_is_kept_separately() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let session = new_session(&test_config(dir.path()));
    replay(
        &session,
        indoc! {"
            %TESTC  1 v2
            %TSTTREE1,pkg.Suite,true,1,false,-1,,,
            %TSTTREE2,a(pkg.Suite),false,1,false,1,,,
            %TESTS  2,a(pkg.Suite)
            %TESTE  2,a(pkg.Suite)
            %ERROR  1,pkg.Suite
            %TRACES
            teardown failed
            %TRACEE
            %RUNTIME2
        "},
    );

    let suite = session.element_by_id("1").expect("suite");
    assert_eq!(suite.own_status(), Status::Error);
    assert_eq!(
        suite.as_suite().and_then(|s| s.children_status()),
        Some(Status::Ok)
    );
    assert_eq!(suite.status(), Status::Error);
    assert_eq!(session.counters().errors, 1);
    let failed: Vec<_> = session
        .failed_test_elements()
        .into_iter()
        .map(|e| e.id().to_owned())
        .collect();
    assert_eq!(failed, ["1"]);
}
