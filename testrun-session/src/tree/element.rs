// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::elapsed::ElapsedTime;
use crate::status::{ProgressState, Status, TestResult};
use std::fmt;

/// The index of an element within a [`TestTree`](super::TestTree).
///
/// Indexes are only meaningful for the tree that produced them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementIndex(pub(crate) usize);

impl ElementIndex {
    /// The index of the root suite in every tree.
    pub const ROOT: ElementIndex = ElementIndex(0);
}

impl fmt::Display for ElementIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A suite or case in the test tree.
///
/// Elements are owned by their [`TestTree`](super::TestTree). Collaborators
/// receive clones of them in listener callbacks.
#[derive(Clone, Debug)]
pub struct TestElement {
    pub(crate) index: ElementIndex,
    pub(crate) parent: Option<ElementIndex>,
    pub(crate) id: String,
    pub(crate) test_name: String,
    pub(crate) display_name: Option<String>,
    pub(crate) parameter_types: Option<Vec<String>>,
    pub(crate) unique_id: Option<String>,
    pub(crate) status: Status,
    pub(crate) trace: Option<String>,
    pub(crate) expected: Option<String>,
    pub(crate) actual: Option<String>,
    pub(crate) assumption_failed: bool,
    pub(crate) elapsed: ElapsedTime,
    pub(crate) kind: ElementKind,
}

/// Data specific to suites or cases.
#[derive(Clone, Debug)]
pub enum ElementKind {
    /// A suite, including the root.
    Suite(SuiteData),

    /// A test case.
    Case(CaseData),
}

/// Data stored for suites.
#[derive(Clone, Debug, Default)]
pub struct SuiteData {
    pub(crate) children: Vec<ElementIndex>,
    pub(crate) children_status: Option<Status>,
    pub(crate) test_count: usize,
}

impl SuiteData {
    /// The children of this suite, in discovery order.
    pub fn children(&self) -> &[ElementIndex] {
        &self.children
    }

    /// The aggregated status of this suite's children, if any child has reported.
    pub fn children_status(&self) -> Option<Status> {
        self.children_status
    }

    /// The number of direct children announced for this suite.
    pub fn test_count(&self) -> usize {
        self.test_count
    }
}

/// Data stored for test cases.
#[derive(Clone, Debug, Default)]
pub struct CaseData {
    pub(crate) ignored: bool,
    pub(crate) dynamic: bool,
}

impl CaseData {
    /// Whether the case was ignored by the runner.
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    /// Whether the case was generated at execution time.
    pub fn is_dynamic_test(&self) -> bool {
        self.dynamic
    }
}

impl TestElement {
    /// The index of this element within its tree.
    pub fn index(&self) -> ElementIndex {
        self.index
    }

    /// The index of the parent suite, or `None` for the root.
    pub fn parent(&self) -> Option<ElementIndex> {
        self.parent
    }

    /// The session-unique identifier of this element.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The test name as announced by the runner.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// The display name, if different from the test name.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// The display name if set, otherwise the test name.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.test_name)
    }

    /// Parameter types of a parameterized test.
    pub fn parameter_types(&self) -> Option<&[String]> {
        self.parameter_types.as_deref()
    }

    /// An external unique identifier assigned by the runner.
    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    /// The failure trace, if any.
    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }

    /// The expected value of a comparison failure.
    pub fn expected(&self) -> Option<&str> {
        self.expected.as_deref()
    }

    /// The actual value of a comparison failure.
    pub fn actual(&self) -> Option<&str> {
        self.actual.as_deref()
    }

    /// Whether an assumption failed for this element.
    pub fn is_assumption_failure(&self) -> bool {
        self.assumption_failed
    }

    /// Elapsed time in seconds, once the element has finished.
    pub fn elapsed_seconds(&self) -> Option<f64> {
        self.elapsed.seconds()
    }

    /// Whether the element's clock is still running.
    pub fn is_clock_running(&self) -> bool {
        self.elapsed.is_running()
    }

    /// Suite- or case-specific data.
    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    /// Whether this element is a suite.
    pub fn is_suite(&self) -> bool {
        matches!(self.kind, ElementKind::Suite(_))
    }

    /// Whether this is the root suite.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Suite data, if this is a suite.
    pub fn as_suite(&self) -> Option<&SuiteData> {
        match &self.kind {
            ElementKind::Suite(suite) => Some(suite),
            ElementKind::Case(_) => None,
        }
    }

    /// Case data, if this is a case.
    pub fn as_case(&self) -> Option<&CaseData> {
        match &self.kind {
            ElementKind::Suite(_) => None,
            ElementKind::Case(case) => Some(case),
        }
    }

    /// Children of a suite; empty for cases.
    pub fn children(&self) -> &[ElementIndex] {
        self.as_suite().map_or(&[], |suite| suite.children())
    }

    /// Whether this is an ignored case.
    pub fn is_ignored(&self) -> bool {
        self.as_case().is_some_and(|case| case.ignored)
    }

    /// Whether this is a dynamically generated case.
    pub fn is_dynamic_test(&self) -> bool {
        self.as_case().is_some_and(|case| case.dynamic)
    }

    /// The element's own status, ignoring children.
    pub fn own_status(&self) -> Status {
        self.status
    }

    /// The effective status: for suites, the own status combined with the
    /// aggregated status of the children.
    pub fn status(&self) -> Status {
        match &self.kind {
            ElementKind::Suite(SuiteData {
                children_status: Some(children_status),
                ..
            }) => children_status.combine(self.status),
            _ => self.status,
        }
    }

    /// Coarse progress derived from [`status`](Self::status).
    pub fn progress_state(&self) -> ProgressState {
        self.status().progress_state()
    }

    /// The result of this element.
    ///
    /// For suites, `include_children` selects between the aggregated status
    /// and the suite's own status. Ignored cases always report
    /// [`TestResult::Ignored`].
    pub fn result(&self, include_children: bool) -> TestResult {
        match &self.kind {
            ElementKind::Case(CaseData { ignored: true, .. }) => TestResult::Ignored,
            ElementKind::Case(_) => self.status.to_result(),
            ElementKind::Suite(_) if include_children => self.status().to_result(),
            ElementKind::Suite(_) => self.status.to_result(),
        }
    }

    /// The class name derived from the test name.
    ///
    /// For `method(pkg.Class)` this is `pkg.Class`; names without a
    /// parenthesized part are returned unchanged.
    pub fn class_name(&self) -> &str {
        extract_class_name(&self.test_name)
    }

    /// The method name of a case: the part of the test name before the last `(`.
    pub fn method_name(&self) -> &str {
        extract_method_name(&self.test_name)
    }
}

pub(crate) fn extract_class_name(test_name: &str) -> &str {
    let Some(open) = test_name.rfind('(') else {
        return test_name;
    };
    match test_name.rfind(')') {
        Some(close) if close > open => &test_name[open + 1..close],
        _ => &test_name[open + 1..],
    }
}

pub(crate) fn extract_method_name(test_name: &str) -> &str {
    match test_name.rfind('(') {
        Some(open) if open > 0 => &test_name[..open],
        _ => test_name,
    }
}
