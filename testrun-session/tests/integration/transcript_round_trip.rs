// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{new_session, replay, test_config};
use camino_tempfile::Utf8TempDir;
use indoc::indoc;
use pretty_assertions::assert_eq;
use testrun_session::{
    errors::{TranscriptExportError, TranscriptImportError},
    session::{RunState, TestRunSession, UNROOTED_SUITE_ID},
    status::Status,
    transcript::NoopMonitor,
    tree::{ROOT_ID, TestTree},
};

const RUN: &str = indoc! {"
    %TESTC  4 v2
    %TSTTREE1,pkg.Suite,true,2,false,-1,,,
    %TSTTREE2,ok(pkg.Suite),false,1,false,1,,,
    %TSTTREE3,compare(pkg.Suite),false,1,false,1,Compares things,,
    %TSTTREE4,Other,true,2,false,-1,,,
    %TSTTREE5,assumes(Other),false,1,false,4,,,
    %TSTTREE6,skipped(Other),false,1,false,4,,,
    %TESTS  2,ok(pkg.Suite)
    %TESTE  2,ok(pkg.Suite)
    %TESTS  3,compare(pkg.Suite)
    %FAILED 3,compare(pkg.Suite)
    %EXPECTS
    <1>
    %EXPECTE
    %ACTUALS
    <2>
    %ACTUALE
    %TRACES
    expected <1> but was <2>
    \tat pkg.Suite.compare
    %TRACEE
    %TESTE  3,compare(pkg.Suite)
    %TESTS  5,assumes(Other)
    %FAILED 5,@AssumptionFailure: assumes(Other)
    %TRACES
    not on this platform
    %TRACEE
    %TESTE  5,assumes(Other)
    %TESTS  6,@Ignore: skipped(Other)
    %TESTE  6,@Ignore: skipped(Other)
    %RUNTIME42
"};

/// Suites nested two deep, a factory suite with a dynamic case, and a test
/// nobody announced.
const NESTED_RUN: &str = indoc! {"
    %TESTC  3 v2
    %TSTTREE1,Outer,true,2,false,-1,,,
    %TSTTREE2,Inner,true,1,false,1,,,
    %TSTTREE3,a(Inner),false,1,false,2,,,
    %TSTTREE4,b(Outer),false,1,false,1,,,
    %TSTTREE5,factory(Gen),true,0,false,-1,,,
    %TSTTREE6,d1,false,1,true,5,first,,
    %TESTS  3,a(Inner)
    %TESTE  3,a(Inner)
    %TESTS  4,b(Outer)
    %FAILED 4,b(Outer)
    %TRACES
    boom
    %TRACEE
    %TESTE  4,b(Outer)
    %TESTS  6,d1
    %TESTE  6,d1
    %TESTS  9,lost
    %TESTE  9,lost
    %RUNTIME20
"};

/// Everything a transcript is expected to preserve about an element.
#[derive(Debug, PartialEq)]
struct ElementSummary {
    id: String,
    parent: Option<String>,
    label: String,
    status: Status,
    elapsed: Option<String>,
    ignored: bool,
    assumption_failure: bool,
}

fn summary(tree: &TestTree) -> Vec<ElementSummary> {
    tree.iter()
        .map(|e| ElementSummary {
            id: e.id().to_owned(),
            parent: tree.parent(e.index()).map(|p| p.id().to_owned()),
            label: e.label().to_owned(),
            status: e.status(),
            elapsed: e.elapsed_seconds().map(|time| format!("{time:.3}")),
            ignored: e.is_ignored(),
            assumption_failure: e.is_assumption_failure(),
        })
        .collect()
}

#[test]
fn export_then_import() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let mut config = test_config(dir.path());
    config.session.project = Some("demo".to_owned());
    config.session.include_tags = Some("fast".to_owned());
    let session = new_session(&config);
    replay(&session, RUN);
    assert_eq!(session.run_state(), RunState::Ended);

    let path = dir.path().join("export.xml");
    session.export_to_file(&path).expect("exported");

    let imported =
        TestRunSession::import_from_file(&path, &config, &NoopMonitor).expect("imported");
    assert_eq!(imported.name(), "integration");
    assert_eq!(imported.project(), Some("demo"));
    assert_eq!(imported.include_tags().as_deref(), Some("fast"));
    assert_eq!(imported.run_state(), RunState::Ended);
    assert_eq!(imported.counters(), session.counters());
    assert_eq!(imported.elapsed_seconds(), Some(0.042));
    assert_eq!(
        summary(&imported.tree_snapshot()),
        summary(&session.tree_snapshot())
    );

    let compare = imported.element_by_id("3").expect("compare");
    assert_eq!(compare.display_name(), Some("Compares things"));
    assert_eq!(compare.expected(), Some("<1>\n"));
    assert_eq!(compare.actual(), Some("<2>\n"));
    assert_eq!(
        compare.trace(),
        Some("expected <1> but was <2>\n\tat pkg.Suite.compare\n")
    );
    assert_eq!(
        imported.element_by_id("5").and_then(|e| e.trace().map(str::to_owned)),
        Some("not on this platform\n".to_owned())
    );
}

#[test]
fn nested_tree_keeps_its_shape() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let config = test_config(dir.path());
    let session = new_session(&config);
    replay(&session, NESTED_RUN);

    let live = summary(&session.tree_snapshot());
    let parents: Vec<_> = live
        .iter()
        .map(|e| (e.id.as_str(), e.parent.as_deref()))
        .collect();
    assert_eq!(
        parents,
        [
            (ROOT_ID, None),
            ("1", Some(ROOT_ID)),
            ("2", Some("1")),
            ("3", Some("2")),
            ("4", Some("1")),
            ("5", Some(ROOT_ID)),
            ("6", Some("5")),
            (UNROOTED_SUITE_ID, Some(ROOT_ID)),
            ("9", Some(UNROOTED_SUITE_ID)),
        ]
    );

    let path = dir.path().join("nested.xml");
    session.export_to_file(&path).expect("exported");
    let imported =
        TestRunSession::import_from_file(&path, &config, &NoopMonitor).expect("imported");
    assert_eq!(summary(&imported.tree_snapshot()), live);
    assert!(
        imported
            .element_by_id("6")
            .is_some_and(|e| e.is_dynamic_test())
    );
}

#[test]
fn swapped_out_session_exports_its_tree() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let config = test_config(dir.path());
    let session = new_session(&config);
    replay(&session, RUN);
    let before = summary(&session.tree_snapshot());

    assert!(session.swap_out());
    let path = dir.path().join("after-swap.xml");
    session.export_to_file(&path).expect("exported");
    assert!(!session.is_swapped_out());

    let imported =
        TestRunSession::import_from_file(&path, &config, &NoopMonitor).expect("imported");
    assert_eq!(summary(&imported.tree_snapshot()), before);
}

#[test]
fn import_and_export_errors() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let config = test_config(dir.path());

    let missing = dir.path().join("missing.xml");
    let err = TestRunSession::import_from_file(&missing, &config, &NoopMonitor)
        .expect_err("file doesn't exist");
    assert!(
        matches!(err, TranscriptImportError::Read { ref path, .. } if *path == missing),
        "unexpected error: {err}"
    );

    let session = new_session(&config);
    replay(&session, "%TESTC  0 v2\n%RUNTIME1\n");
    let unwritable = dir.path().join("no-such-dir").join("out.xml");
    let err = session
        .export_to_file(&unwritable)
        .expect_err("parent directory doesn't exist");
    assert!(
        matches!(err, TranscriptExportError::Write { ref path, .. } if *path == unwritable),
        "unexpected error: {err}"
    );
}

#[test]
fn import_from_junit_report() {
    let dir = Utf8TempDir::new().expect("temp dir");
    let config = test_config(dir.path());
    let session = TestRunSession::import_from_str(
        indoc! {r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <testsuite name="Calc" package="org.example" tests="2" time="0.5">
                <testcase name="adds" classname="org.example.Calc" time="0.2"/>
                <testcase name="subtracts" classname="org.example.Calc" time="0.3">
                    <failure message="off by one">expected 1 but was 2</failure>
                </testcase>
            </testsuite>
        "#},
        "report.xml",
        &config,
        &NoopMonitor,
    )
    .expect("imported");

    assert_eq!(session.name(), "integration");
    assert_eq!(session.counters().failures, 1);
    assert_eq!(session.counters().total, 2);

    let tree = session.tree_snapshot();
    let suite = tree.element_by_id("1").expect("suite");
    assert_eq!(suite.test_name(), "org.example.Calc");
    assert_eq!(suite.elapsed_seconds(), Some(0.5));
    let subtracts = tree.element_by_id("3").expect("subtracts");
    assert_eq!(subtracts.test_name(), "subtracts(org.example.Calc)");
    // The element text wins over the message attribute.
    assert_eq!(subtracts.trace(), Some("expected 1 but was 2"));
    assert_eq!(subtracts.own_status(), Status::Failure);
}
