// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialize a test tree as a transcript.

use super::{TranscriptRun, tags::*};
use crate::{
    status::TestResult,
    tree::{ElementKind, TestElement, TestTree},
};
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use std::io;

pub(crate) fn serialize_run(
    run: &TranscriptRun<'_>,
    writer: impl io::Write,
) -> quick_xml::Result<()> {
    let mut writer = Writer::new_with_indent(writer, b' ', 4);

    let decl = BytesDecl::new("1.0", Some("UTF-8"), None);
    writer.write_event(Event::Decl(decl))?;

    serialize_run_impl(run, &mut writer)?;

    // Add a trailing newline.
    writer.write_indent()
}

fn serialize_run_impl(
    run: &TranscriptRun<'_>,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    // Use the destructuring syntax to ensure that all fields are handled.
    let TranscriptRun {
        name,
        project,
        counters,
        include_tags,
        exclude_tags,
        tree,
    } = run;

    let mut run_tag = BytesStart::new(TESTRUN_TAG);
    run_tag.push_attribute((NAME_ATTR, *name));
    if let Some(project) = project {
        run_tag.push_attribute((PROJECT_ATTR, *project));
    }
    run_tag.extend_attributes([
        (TESTS_ATTR, counters.total.to_string().as_str()),
        (STARTED_ATTR, counters.started.to_string().as_str()),
        (FAILURES_ATTR, counters.failures.to_string().as_str()),
        (ERRORS_ATTR, counters.errors.to_string().as_str()),
        (IGNORED_ATTR, counters.ignored.to_string().as_str()),
        (
            ASSUMPTION_FAILURES_ATTR,
            counters.assumption_failures.to_string().as_str(),
        ),
    ]);
    if let Some(time) = tree.root().elapsed_seconds() {
        run_tag.push_attribute((TIME_ATTR, serialize_time(time).as_str()));
    }
    if let Some(include_tags) = include_tags {
        run_tag.push_attribute((INCLUDE_TAGS_ATTR, *include_tags));
    }
    if let Some(exclude_tags) = exclude_tags {
        run_tag.push_attribute((EXCLUDE_TAGS_ATTR, *exclude_tags));
    }
    writer.write_event(Event::Start(run_tag))?;

    for child in tree.children(tree.root().index()) {
        serialize_element(tree, child, writer)?;
    }

    serialize_end_tag(TESTRUN_TAG, writer)?;
    writer.write_event(Event::Eof)?;

    Ok(())
}

fn serialize_element(
    tree: &TestTree,
    element: &TestElement,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    match element.kind() {
        ElementKind::Suite(_) => serialize_suite(tree, element, writer),
        ElementKind::Case(_) => serialize_case(element, writer),
    }
}

fn serialize_suite(
    tree: &TestTree,
    suite: &TestElement,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    let mut suite_tag = BytesStart::new(TESTSUITE_TAG);
    suite_tag.push_attribute((NAME_ATTR, suite.test_name()));
    push_common_attributes(&mut suite_tag, suite);
    if !suite.status().is_done() {
        suite_tag.push_attribute((INCOMPLETE_ATTR, "true"));
    }
    writer.write_event(Event::Start(suite_tag))?;

    serialize_outcome(suite, writer)?;
    for child in tree.children(suite.index()) {
        serialize_element(tree, child, writer)?;
    }

    serialize_end_tag(TESTSUITE_TAG, writer)
}

fn serialize_case(
    case: &TestElement,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    let mut case_tag = BytesStart::new(TESTCASE_TAG);

    // `method(pkg.Class)` names are split so that other JUnit tools can read
    // them; anything else is written as-is.
    let method_name = case.method_name();
    let class_name = case.class_name();
    if format!("{method_name}({class_name})") == case.test_name() {
        case_tag.push_attribute((NAME_ATTR, method_name));
        case_tag.push_attribute((CLASSNAME_ATTR, class_name));
    } else {
        case_tag.push_attribute((NAME_ATTR, case.test_name()));
    }
    push_common_attributes(&mut case_tag, case);

    let own_status = case.own_status();
    if !own_status.is_done() || own_status.to_result() == TestResult::Undefined {
        case_tag.push_attribute((INCOMPLETE_ATTR, "true"));
    }
    if case.is_ignored() {
        case_tag.push_attribute((IGNORED_ATTR, "true"));
    }
    if case.is_dynamic_test() {
        case_tag.push_attribute((DYNAMIC_TEST_ATTR, "true"));
    }

    if has_outcome(case) {
        writer.write_event(Event::Start(case_tag))?;
        serialize_outcome(case, writer)?;
        serialize_end_tag(TESTCASE_TAG, writer)
    } else {
        writer.write_event(Event::Empty(case_tag))
    }
}

fn push_common_attributes(tag: &mut BytesStart<'_>, element: &TestElement) {
    tag.push_attribute((ID_ATTR, element.id()));
    if let Some(display_name) = element.display_name() {
        tag.push_attribute((DISPLAY_NAME_ATTR, display_name));
    }
    if let Some(parameter_types) = element.parameter_types() {
        tag.push_attribute((PARAMETERS_ATTR, parameter_types.join(",").as_str()));
    }
    if let Some(unique_id) = element.unique_id() {
        tag.push_attribute((UNIQUE_ID_ATTR, unique_id));
    }
    if let Some(time) = element.elapsed_seconds() {
        tag.push_attribute((TIME_ATTR, serialize_time(time).as_str()));
    }
}

fn has_outcome(element: &TestElement) -> bool {
    element.own_status().is_error_or_failure() || element.is_assumption_failure()
}

fn serialize_outcome(
    element: &TestElement,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    let own_status = element.own_status();
    let tag_name = if own_status.is_error() {
        ERROR_TAG
    } else if own_status.is_failure() {
        FAILURE_TAG
    } else if element.is_assumption_failure() {
        return serialize_text_element(SKIPPED_TAG, element.trace().unwrap_or_default(), writer);
    } else {
        return Ok(());
    };

    writer.write_event(Event::Start(BytesStart::new(tag_name)))?;
    if let Some(trace) = element.trace() {
        writer.write_event(Event::Text(BytesText::new(trace)))?;
    }
    if let Some(expected) = element.expected() {
        serialize_text_element(EXPECTED_TAG, expected, writer)?;
    }
    if let Some(actual) = element.actual() {
        serialize_text_element(ACTUAL_TAG, actual, writer)?;
    }
    serialize_end_tag(tag_name, writer)
}

fn serialize_text_element(
    tag_name: &'static str,
    text: &str,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    let tag = BytesStart::new(tag_name);
    if text.is_empty() {
        return writer.write_event(Event::Empty(tag));
    }
    writer.write_event(Event::Start(tag))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    serialize_end_tag(tag_name, writer)
}

fn serialize_end_tag(
    tag_name: &'static str,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    let end_tag = BytesEnd::new(tag_name);
    writer.write_event(Event::End(end_tag))
}

// Serialize time as seconds with 3 decimal points.
fn serialize_time(seconds: f64) -> String {
    format!("{seconds:.3}")
}
