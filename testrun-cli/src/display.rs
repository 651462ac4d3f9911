// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-readable rendering of sessions and trees.

use crate::output::Styles;
use owo_colors::{OwoColorize, Style};
use std::{io, time::Duration};
use testrun_session::{
    session::TestRunSession,
    status::{Status, TestResult},
    tree::{TestElement, TestTree},
};

/// Writes a one-paragraph summary of a finished session.
pub(crate) fn write_summary(
    session: &TestRunSession,
    styles: &Styles,
    mut writer: impl io::Write,
) -> io::Result<()> {
    let counters = session.counters();
    let result = session.test_result(true);
    let (heading, style) = result_heading(result, styles);

    write!(writer, "{:>12} ", heading.style(style))?;
    write!(
        writer,
        "{} {}/{} tests run",
        session.name().style(styles.bold),
        counters.started,
        counters.total,
    )?;
    if let Some(duration) = session.run_duration() {
        write!(writer, " in {}", format_duration(duration))?;
    }
    writeln!(writer, " ({})", session.run_state())?;

    write!(
        writer,
        "{:>12} {} failed, {} errored, {} ignored",
        "",
        counters.failures.style(failure_style(counters.failures, styles)),
        counters.errors.style(failure_style(counters.errors, styles)),
        counters.ignored,
    )?;
    if counters.assumption_failures > 0 {
        write!(writer, ", {} assumptions failed", counters.assumption_failures)?;
    }
    writeln!(writer)?;

    for element in session.failed_test_elements() {
        write!(writer, "{:>12} ", element.status().style(styles.fail))?;
        writeln!(writer, "{}", element.label())?;
        if let Some(trace) = element.trace() {
            for line in trace.lines() {
                writeln!(writer, "{:>12}   {}", "", line.style(styles.dimmed))?;
            }
        }
    }

    Ok(())
}

/// Writes every element of the tree, indented by depth.
pub(crate) fn write_tree(
    tree: &TestTree,
    styles: &Styles,
    mut writer: impl io::Write,
) -> io::Result<()> {
    for element in tree.iter() {
        let depth = depth(tree, element);
        let status = element.status();
        write!(
            writer,
            "{:indent$}{} ",
            "",
            status.style(status_style(element, styles)),
            indent = depth * 2,
        )?;
        if element.is_suite() {
            write!(writer, "{}", element.label().style(styles.bold))?;
        } else {
            write!(writer, "{}", element.label())?;
        }
        if let Some(seconds) = element.elapsed_seconds() {
            let elapsed = format_duration(Duration::from_secs_f64(seconds));
            write!(writer, " {}", format!("[{elapsed}]").style(styles.dimmed))?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

fn depth(tree: &TestTree, element: &TestElement) -> usize {
    let mut depth = 0;
    let mut current = tree.parent(element.index());
    while let Some(parent) = current {
        depth += 1;
        current = tree.parent(parent.index());
    }
    depth
}

fn result_heading(result: TestResult, styles: &Styles) -> (&'static str, Style) {
    match result {
        TestResult::Ok => ("PASSED", styles.pass),
        TestResult::Failure => ("FAILED", styles.fail),
        TestResult::Error => ("ERRORED", styles.fail),
        TestResult::Ignored => ("IGNORED", styles.skip),
        TestResult::Undefined => ("INCOMPLETE", styles.skip),
    }
}

fn failure_style(count: usize, styles: &Styles) -> Style {
    if count > 0 { styles.fail } else { Style::new() }
}

fn status_style(element: &TestElement, styles: &Styles) -> Style {
    match element.status() {
        Status::Ok if element.is_ignored() => styles.skip,
        Status::Ok => styles.pass,
        status if status.is_error_or_failure() => styles.fail,
        status if status.is_running() => styles.running,
        _ => styles.dimmed,
    }
}

/// Formats a duration to millisecond precision.
pub(crate) fn format_duration(duration: Duration) -> String {
    let millis = Duration::from_millis(duration.as_millis().try_into().unwrap_or(u64::MAX));
    if millis.is_zero() {
        "0ms".to_owned()
    } else {
        humantime::format_duration(millis).to_string()
    }
}
