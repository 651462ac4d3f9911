// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The tree of suites and cases for a single test run.
//!
//! The tree is an arena: elements live in a `Vec` and refer to each other by
//! [`ElementIndex`]. The root suite is always at [`ElementIndex::ROOT`] and
//! has the id `-1`.
//!
//! # Status aggregation
//!
//! A suite's status is its own status combined with a cached *children
//! status*. The cache is maintained incrementally as children change:
//!
//! 1. If the first child starts running, the suite copies its status.
//! 2. If the last child completes, the children status is recomputed from
//!    scratch.
//! 3. If some other child changes after the last child has already run (a
//!    rerun), the children status is recomputed from scratch.
//! 4. Otherwise a failing or erroring child turns the children status into
//!    `RUNNING_FAILURE` or `RUNNING_ERROR`, unless it is already at least that
//!    bad.
//!
//! Each change to a suite is propagated to its parent, stopping as soon as a
//! suite's children status doesn't change.

mod elapsed;
mod element;

pub(crate) use elapsed::{ElapsedTime, now_seconds};
pub use element::{CaseData, ElementIndex, ElementKind, SuiteData, TestElement};

use crate::status::Status;
use std::{collections::HashMap, ops::Index};
use tracing::warn;

/// The id of the root suite.
pub const ROOT_ID: &str = "-1";

/// Descriptive fields of an element about to be added to a tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewElement {
    /// The session-unique id.
    pub id: String,

    /// The test name.
    pub test_name: String,

    /// The display name, if different from the test name.
    pub display_name: Option<String>,

    /// Parameter types for parameterized tests.
    pub parameter_types: Option<Vec<String>>,

    /// An external unique id.
    pub unique_id: Option<String>,
}

impl NewElement {
    /// Creates a new element description with just an id and a name.
    pub fn new(id: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            test_name: test_name.into(),
            ..Default::default()
        }
    }
}

/// The tree of suites and cases for one session.
#[derive(Clone, Debug)]
pub struct TestTree {
    elements: Vec<TestElement>,
    ids: HashMap<String, ElementIndex>,
}

impl TestTree {
    /// Creates a tree that only contains a root suite with the given name.
    pub fn new(root_name: impl Into<String>) -> Self {
        let root = TestElement {
            index: ElementIndex::ROOT,
            parent: None,
            id: ROOT_ID.to_owned(),
            test_name: root_name.into(),
            display_name: None,
            parameter_types: None,
            unique_id: None,
            status: Status::NotRun,
            trace: None,
            expected: None,
            actual: None,
            assumption_failed: false,
            elapsed: ElapsedTime::UNSET,
            kind: ElementKind::Suite(SuiteData::default()),
        };
        let mut ids = HashMap::new();
        ids.insert(ROOT_ID.to_owned(), ElementIndex::ROOT);
        Self {
            elements: vec![root],
            ids,
        }
    }

    /// Returns the root suite.
    pub fn root(&self) -> &TestElement {
        &self.elements[ElementIndex::ROOT.0]
    }

    /// Returns the number of elements, including the root.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if the tree only contains the root.
    pub fn is_empty(&self) -> bool {
        self.elements.len() == 1
    }

    /// Returns the element at `index`, if it exists.
    pub fn get(&self, index: ElementIndex) -> Option<&TestElement> {
        self.elements.get(index.0)
    }

    /// Looks up the index of an element by id.
    pub fn index_of(&self, id: &str) -> Option<ElementIndex> {
        self.ids.get(id).copied()
    }

    /// Looks up an element by id.
    pub fn element_by_id(&self, id: &str) -> Option<&TestElement> {
        self.index_of(id).map(|index| &self[index])
    }

    /// Returns the parent of an element.
    pub fn parent(&self, index: ElementIndex) -> Option<&TestElement> {
        self.get(index)?.parent.map(|parent| &self[parent])
    }

    /// Iterates over the direct children of an element.
    pub fn children(&self, index: ElementIndex) -> impl Iterator<Item = &TestElement> + '_ {
        self.get(index)
            .map(|element| element.children())
            .unwrap_or_default()
            .iter()
            .map(|&child| &self[child])
    }

    /// Iterates over `start` and all its descendants in pre-order.
    pub fn walk(&self, start: ElementIndex) -> Walk<'_> {
        let stack = if start.0 < self.elements.len() {
            vec![start]
        } else {
            Vec::new()
        };
        Walk { tree: self, stack }
    }

    /// Iterates over all descendants of `start` in pre-order, excluding `start`.
    pub fn descendants(&self, start: ElementIndex) -> impl Iterator<Item = &TestElement> + '_ {
        self.walk(start).skip(1)
    }

    /// Iterates over every element in pre-order, starting at the root.
    pub fn iter(&self) -> Walk<'_> {
        self.walk(ElementIndex::ROOT)
    }

    /// Returns every element whose own result is a failure or an error, in
    /// pre-order.
    pub fn failed_elements(&self) -> Vec<&TestElement> {
        self.iter()
            .filter(|element| element.result(false).is_failing())
            .collect()
    }

    /// Adds a suite under `parent`.
    pub(crate) fn add_suite(
        &mut self,
        parent: ElementIndex,
        new: NewElement,
        test_count: usize,
    ) -> ElementIndex {
        self.push_element(
            parent,
            new,
            ElementKind::Suite(SuiteData {
                test_count,
                ..Default::default()
            }),
        )
    }

    /// Adds a case under `parent`.
    pub(crate) fn add_case(
        &mut self,
        parent: ElementIndex,
        new: NewElement,
        dynamic: bool,
    ) -> ElementIndex {
        self.push_element(
            parent,
            new,
            ElementKind::Case(CaseData {
                ignored: false,
                dynamic,
            }),
        )
    }

    fn push_element(
        &mut self,
        parent: ElementIndex,
        new: NewElement,
        kind: ElementKind,
    ) -> ElementIndex {
        let index = ElementIndex(self.elements.len());
        let NewElement {
            id,
            test_name,
            display_name,
            parameter_types,
            unique_id,
        } = new;

        if let Some(previous) = self.ids.insert(id.clone(), index) {
            warn!("duplicate test id {id} (previously {previous}), replacing lookup entry");
        }

        self.elements.push(TestElement {
            index,
            parent: Some(parent),
            id,
            test_name,
            display_name,
            parameter_types,
            unique_id,
            status: Status::NotRun,
            trace: None,
            expected: None,
            actual: None,
            assumption_failed: false,
            elapsed: ElapsedTime::UNSET,
            kind,
        });

        match &mut self.elements[parent.0].kind {
            ElementKind::Suite(suite) => suite.children.push(index),
            ElementKind::Case(_) => {
                // The builder only ever attaches to suites.
                warn!("attempted to add child {index} to test case {parent}");
            }
        }
        index
    }

    /// Sets an element's own status and propagates the change upwards.
    ///
    /// `now` is the current time in seconds and drives the element clocks.
    pub(crate) fn set_status_at(&mut self, index: ElementIndex, status: Status, now: f64) {
        let Some(element) = self.elements.get_mut(index.0) else {
            return;
        };
        element.status = status;
        update_clock(&mut element.elapsed, status, now);
        self.propagate(index, now);
    }

    /// Records a failure and sets the status.
    ///
    /// If the element already has a trace and a new one is given, the new
    /// trace is appended and expected/actual are left alone. Otherwise all
    /// three fields are replaced.
    pub(crate) fn set_failure(
        &mut self,
        index: ElementIndex,
        status: Status,
        trace: Option<String>,
        expected: Option<String>,
        actual: Option<String>,
        now: f64,
    ) {
        let Some(element) = self.elements.get_mut(index.0) else {
            return;
        };
        match (element.trace.is_some(), trace) {
            (true, Some(trace)) => element.trace.get_or_insert_default().push_str(&trace),
            (_, trace) => {
                element.trace = trace;
                element.expected = expected;
                element.actual = actual;
            }
        }
        self.set_status_at(index, status, now);
    }

    pub(crate) fn set_ignored(&mut self, index: ElementIndex, ignored: bool) {
        if let Some(TestElement {
            kind: ElementKind::Case(case),
            ..
        }) = self.elements.get_mut(index.0)
        {
            case.ignored = ignored;
        }
    }

    pub(crate) fn set_dynamic(&mut self, index: ElementIndex, dynamic: bool) {
        if let Some(TestElement {
            kind: ElementKind::Case(case),
            ..
        }) = self.elements.get_mut(index.0)
        {
            case.dynamic = dynamic;
        }
    }

    pub(crate) fn set_assumption_failed(&mut self, index: ElementIndex, failed: bool) {
        if let Some(element) = self.elements.get_mut(index.0) {
            element.assumption_failed = failed;
        }
    }

    pub(crate) fn set_elapsed_seconds(&mut self, index: ElementIndex, seconds: f64) {
        if let Some(element) = self.elements.get_mut(index.0) {
            element.elapsed = ElapsedTime::from_seconds(seconds);
        }
    }

    fn propagate(&mut self, mut child: ElementIndex, now: f64) {
        while let Some(parent) = self.elements[child.0].parent {
            let child_status = self.elements[child.0].status();
            let Some(children_status) = self.next_children_status(parent, child, child_status)
            else {
                break;
            };
            if !self.set_children_status(parent, children_status, now) {
                break;
            }
            child = parent;
        }
    }

    /// Works out the new children status of `suite` after `child` changed to
    /// `child_status`. Returns `None` if it doesn't change.
    fn next_children_status(
        &self,
        suite: ElementIndex,
        child: ElementIndex,
        child_status: Status,
    ) -> Option<Status> {
        let ElementKind::Suite(data) = &self.elements[suite.0].kind else {
            return None;
        };
        let first = *data.children.first()?;
        let last = *data.children.last()?;

        if child == first && child_status.is_running() {
            return Some(child_status);
        }

        if child == last {
            if child_status.is_done() {
                return Some(self.cumulated_status(data));
            }
            // A suite child can still be running with a failure below it.
        } else if !self.elements[last.0].status().is_not_run() {
            // The last child already ran, so this one is being rerun.
            return Some(self.cumulated_status(data));
        }

        let current = data.children_status;
        if child_status.is_failure() {
            if !current.is_some_and(Status::is_error_or_failure) {
                return Some(Status::RunningFailure);
            }
        } else if child_status.is_error() && !current.is_some_and(Status::is_error) {
            return Some(Status::RunningError);
        }
        None
    }

    fn cumulated_status(&self, suite: &SuiteData) -> Status {
        suite
            .children
            .iter()
            .map(|&child| self.elements[child.0].status())
            .reduce(Status::combine)
            .unwrap_or(Status::NotRun)
    }

    /// Returns false if the children status was already `status`.
    fn set_children_status(&mut self, suite: ElementIndex, status: Status, now: f64) -> bool {
        let element = &mut self.elements[suite.0];
        let ElementKind::Suite(data) = &mut element.kind else {
            return false;
        };
        if data.children_status == Some(status) {
            return false;
        }
        data.children_status = Some(status);
        update_clock(&mut element.elapsed, status, now);
        true
    }
}

fn update_clock(elapsed: &mut ElapsedTime, status: Status, now: f64) {
    if status == Status::Running {
        elapsed.start(now);
    } else if status.is_done() {
        elapsed.finish(now);
    }
}

impl Index<ElementIndex> for TestTree {
    type Output = TestElement;

    fn index(&self, index: ElementIndex) -> &Self::Output {
        &self.elements[index.0]
    }
}

impl<'a> IntoIterator for &'a TestTree {
    type Item = &'a TestElement;
    type IntoIter = Walk<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A pre-order iterator over part of a [`TestTree`].
#[derive(Clone, Debug)]
pub struct Walk<'a> {
    tree: &'a TestTree,
    stack: Vec<ElementIndex>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a TestElement;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.stack.pop()?;
        let element = &self.tree[index];
        self.stack.extend(element.children().iter().rev());
        Some(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::TestResult;
    use pretty_assertions::assert_eq;

    /// Builds root -> suite -> [a, b].
    fn two_case_tree() -> (TestTree, ElementIndex, ElementIndex, ElementIndex) {
        let mut tree = TestTree::new("session");
        let suite = tree.add_suite(ElementIndex::ROOT, NewElement::new("1", "Suite"), 2);
        let a = tree.add_case(suite, NewElement::new("2", "a(Suite)"), false);
        let b = tree.add_case(suite, NewElement::new("3", "b(Suite)"), false);
        (tree, suite, a, b)
    }

    fn statuses(tree: &TestTree) -> Vec<(&str, Status)> {
        tree.iter()
            .map(|element| (element.id(), element.status()))
            .collect()
    }

    #[test]
    fn new_tree_has_root() {
        let tree = TestTree::new("my session");
        assert_eq!(tree.root().id(), ROOT_ID);
        assert_eq!(tree.root().test_name(), "my session");
        assert!(tree.root().is_root());
        assert!(tree.is_empty());
        assert_eq!(tree.root().status(), Status::NotRun);
        assert_eq!(tree.root().result(true), TestResult::Undefined);
    }

    #[test]
    fn all_ok_settles_to_ok() {
        let (mut tree, suite, a, b) = two_case_tree();

        tree.set_status_at(a, Status::Running, 10.0);
        assert_eq!(tree[suite].status(), Status::Running);
        assert_eq!(tree.root().status(), Status::Running);
        assert!(tree[suite].is_clock_running());

        tree.set_status_at(a, Status::Ok, 11.0);
        assert_eq!(tree[suite].status(), Status::Running);

        tree.set_status_at(b, Status::Running, 11.0);
        tree.set_status_at(b, Status::Ok, 12.5);

        assert_eq!(
            statuses(&tree),
            vec![
                ("-1", Status::Ok),
                ("1", Status::Ok),
                ("2", Status::Ok),
                ("3", Status::Ok),
            ]
        );
        assert_eq!(tree[a].elapsed_seconds(), Some(1.0));
        assert_eq!(tree[b].elapsed_seconds(), Some(1.5));
        assert_eq!(tree[suite].elapsed_seconds(), Some(2.5));
        assert_eq!(tree.root().elapsed_seconds(), Some(2.5));
    }

    #[test]
    fn failure_reported_while_running() {
        let (mut tree, suite, a, b) = two_case_tree();

        tree.set_status_at(a, Status::Running, 0.5);
        tree.set_status_at(a, Status::Failure, 1.0);
        assert_eq!(tree[suite].status(), Status::RunningFailure);
        assert_eq!(tree.root().status(), Status::RunningFailure);

        tree.set_status_at(b, Status::Running, 1.0);
        tree.set_status_at(b, Status::Ok, 2.0);
        assert_eq!(tree[suite].status(), Status::Failure);
        assert_eq!(tree.root().status(), Status::Failure);
        assert_eq!(tree.root().result(true), TestResult::Failure);
        assert_eq!(tree.root().result(false), TestResult::Undefined);
    }

    #[test]
    fn error_upgrades_running_failure() {
        let mut tree = TestTree::new("session");
        let suite = tree.add_suite(ElementIndex::ROOT, NewElement::new("1", "Suite"), 3);
        let a = tree.add_case(suite, NewElement::new("2", "a"), false);
        let b = tree.add_case(suite, NewElement::new("3", "b"), false);
        tree.add_case(suite, NewElement::new("4", "c"), false);

        tree.set_status_at(a, Status::Running, 1.0);
        tree.set_status_at(a, Status::Failure, 1.0);
        assert_eq!(tree[suite].status(), Status::RunningFailure);

        tree.set_status_at(b, Status::Running, 1.0);
        tree.set_status_at(b, Status::Error, 1.0);
        assert_eq!(tree[suite].status(), Status::RunningError);
    }

    #[test]
    fn rerun_recomputes_children_status() {
        let (mut tree, suite, a, b) = two_case_tree();

        tree.set_status_at(a, Status::Running, 1.0);
        tree.set_failure(a, Status::Failure, Some("boom".to_owned()), None, None, 2.0);
        tree.set_status_at(b, Status::Running, 2.0);
        tree.set_status_at(b, Status::Ok, 3.0);
        assert_eq!(tree[suite].status(), Status::Failure);

        // Rerunning a (not the last child) after b ran triggers a recompute.
        tree.set_status_at(a, Status::Ok, 10.0);
        assert_eq!(tree[suite].status(), Status::Ok);
        assert_eq!(tree.root().status(), Status::Ok);
        // Reruns keep the original elapsed time.
        assert_eq!(tree[a].elapsed_seconds(), Some(1.0));
    }

    #[test]
    fn nested_suites_propagate() {
        let mut tree = TestTree::new("session");
        let outer = tree.add_suite(ElementIndex::ROOT, NewElement::new("1", "Outer"), 1);
        let inner = tree.add_suite(outer, NewElement::new("2", "Inner"), 1);
        let case = tree.add_case(inner, NewElement::new("3", "t"), false);

        tree.set_status_at(case, Status::Running, 1.0);
        assert_eq!(tree[outer].status(), Status::Running);
        tree.set_status_at(case, Status::Error, 2.0);
        assert_eq!(
            statuses(&tree),
            vec![
                ("-1", Status::Error),
                ("1", Status::Error),
                ("2", Status::Error),
                ("3", Status::Error),
            ]
        );
    }

    #[test]
    fn suite_own_failure_combines_with_children() {
        let (mut tree, suite, a, b) = two_case_tree();
        tree.set_status_at(a, Status::Ok, 1.0);
        tree.set_status_at(b, Status::Ok, 1.0);
        assert_eq!(tree[suite].status(), Status::Ok);

        tree.set_failure(
            suite,
            Status::Error,
            Some("setup failed".to_owned()),
            None,
            None,
            1.0,
        );
        assert_eq!(tree[suite].own_status(), Status::Error);
        assert_eq!(tree[suite].status(), Status::Error);
        assert_eq!(tree[suite].result(false), TestResult::Error);
    }

    #[test]
    fn second_trace_is_appended() {
        let (mut tree, _, a, _) = two_case_tree();
        tree.set_failure(
            a,
            Status::Failure,
            Some("first\n".to_owned()),
            Some("1".to_owned()),
            Some("2".to_owned()),
            1.0,
        );
        tree.set_failure(
            a,
            Status::Error,
            Some("second\n".to_owned()),
            Some("3".to_owned()),
            None,
            1.0,
        );
        assert_eq!(tree[a].trace(), Some("first\nsecond\n"));
        assert_eq!(tree[a].expected(), Some("1"));
        assert_eq!(tree[a].actual(), Some("2"));
        assert_eq!(tree[a].own_status(), Status::Error);
    }

    #[test]
    fn queries() {
        let (mut tree, suite, a, b) = two_case_tree();
        tree.set_status_at(a, Status::Failure, 1.0);
        tree.set_ignored(b, true);

        assert_eq!(tree.index_of("3"), Some(b));
        assert_eq!(tree.element_by_id("2").map(|e| e.index()), Some(a));
        assert_eq!(tree.parent(a).map(|e| e.id()), Some("1"));
        assert_eq!(
            tree.children(suite).map(|e| e.id()).collect::<Vec<_>>(),
            vec!["2", "3"]
        );
        assert_eq!(
            tree.descendants(ElementIndex::ROOT)
                .map(|e| e.id())
                .collect::<Vec<_>>(),
            vec!["1", "2", "3"]
        );
        assert_eq!(
            tree.failed_elements()
                .iter()
                .map(|e| e.id())
                .collect::<Vec<_>>(),
            vec!["2"]
        );
        assert_eq!(tree[b].result(true), TestResult::Ignored);
        assert_eq!(tree[a].class_name(), "Suite");
        assert_eq!(tree[a].method_name(), "a");
    }

    #[test]
    fn duplicate_ids_replace_lookup() {
        let mut tree = TestTree::new("session");
        tree.add_case(ElementIndex::ROOT, NewElement::new("1", "first"), false);
        let second = tree.add_case(ElementIndex::ROOT, NewElement::new("1", "second"), false);
        assert_eq!(tree.index_of("1"), Some(second));
        assert_eq!(tree.len(), 3);
    }
}
