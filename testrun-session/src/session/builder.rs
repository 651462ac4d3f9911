// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconstructs the tree hierarchy from a flat, pre-order list of
//! announcements.
//!
//! Each suite announces how many direct children it has. While a suite still
//! expects children it sits on the incomplete-suite stack, and every new
//! announcement attaches to the top of that stack. Suites announced with no
//! children are *factory* suites: dynamic tests generated at execution time
//! attach to them by parent id.

use crate::{
    protocol::TreeEntry,
    tree::{ElementIndex, NewElement, TestTree},
};
use tracing::debug;

/// The id of the suite that collects tests nobody announced.
pub const UNROOTED_SUITE_ID: &str = "-2";

/// The name of the suite that collects tests nobody announced.
pub const UNROOTED_SUITE_NAME: &str = "Unrooted Tests";

#[derive(Copy, Clone, Debug)]
struct IncompleteSuite {
    index: ElementIndex,
    remaining: usize,
}

/// Construction-time state for a [`TestTree`].
#[derive(Clone, Debug, Default)]
pub(crate) struct TreeBuilder {
    incomplete_suites: Vec<IncompleteSuite>,
    factory_suites: Vec<ElementIndex>,
    unrooted_suite: Option<ElementIndex>,
}

/// What the builder created for an announcement.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Added {
    pub(crate) index: ElementIndex,
    /// The unrooted suite, if it had to be created as well.
    pub(crate) unrooted_suite: Option<ElementIndex>,
}

impl TreeBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds an entry announced by the runner.
    pub(crate) fn add_entry(&mut self, tree: &mut TestTree, entry: TreeEntry) -> Added {
        let TreeEntry {
            test_id,
            test_name,
            is_suite,
            test_count,
            is_dynamic_test,
            parent_id,
            display_name,
            parameter_types,
            unique_id,
            legacy,
        } = entry;
        let new = NewElement {
            id: test_id,
            test_name,
            display_name,
            parameter_types,
            unique_id,
        };

        if legacy {
            // Legacy runners send no structure, so everything is top-level.
            let index = if is_suite {
                tree.add_suite(ElementIndex::ROOT, new, test_count)
            } else {
                tree.add_case(ElementIndex::ROOT, new, false)
            };
            return Added {
                index,
                unrooted_suite: None,
            };
        }

        if is_dynamic_test {
            let factory = parent_id.as_deref().and_then(|parent_id| {
                self.factory_suites
                    .iter()
                    .rev()
                    .copied()
                    .find(|&suite| tree[suite].id() == parent_id)
            });
            return match factory {
                Some(parent) => Added {
                    index: self.create_element(tree, parent, new, is_suite, test_count, true),
                    unrooted_suite: None,
                },
                None => {
                    debug!(
                        "no factory suite {:?} for dynamic test {}, adding to unrooted tests",
                        parent_id, new.id,
                    );
                    let (parent, unrooted_suite) = self.unrooted_suite(tree);
                    Added {
                        index: self.create_element(tree, parent, new, is_suite, test_count, true),
                        unrooted_suite,
                    }
                }
            };
        }

        Added {
            index: self.add_announced(tree, new, is_suite, test_count),
            unrooted_suite: None,
        }
    }

    /// Adds an element through the incomplete-suite stack.
    pub(crate) fn add_announced(
        &mut self,
        tree: &mut TestTree,
        new: NewElement,
        is_suite: bool,
        test_count: usize,
    ) -> ElementIndex {
        let parent = self.next_parent();
        self.create_element(tree, parent, new, is_suite, test_count, false)
    }

    /// Adds a case that nobody announced under the unrooted suite.
    pub(crate) fn add_unrooted_case(
        &mut self,
        tree: &mut TestTree,
        test_id: &str,
        test_name: &str,
    ) -> Added {
        let (parent, unrooted_suite) = self.unrooted_suite(tree);
        let index = tree.add_case(parent, NewElement::new(test_id, test_name), false);
        Added {
            index,
            unrooted_suite,
        }
    }

    /// Drops the incomplete-suite stack once construction is over.
    pub(crate) fn finish(&mut self) {
        if !self.incomplete_suites.is_empty() {
            debug!(
                "{} suites were still expecting children at the end of the run",
                self.incomplete_suites.len(),
            );
        }
        self.incomplete_suites = Vec::new();
    }

    fn next_parent(&mut self) -> ElementIndex {
        let Some(top) = self.incomplete_suites.last_mut() else {
            return ElementIndex::ROOT;
        };
        let parent = top.index;
        top.remaining -= 1;
        if top.remaining == 0 {
            self.incomplete_suites.pop();
        }
        parent
    }

    fn create_element(
        &mut self,
        tree: &mut TestTree,
        parent: ElementIndex,
        new: NewElement,
        is_suite: bool,
        test_count: usize,
        dynamic: bool,
    ) -> ElementIndex {
        if !is_suite {
            return tree.add_case(parent, new, dynamic);
        }
        let index = tree.add_suite(parent, new, test_count);
        if test_count > 0 {
            self.incomplete_suites.push(IncompleteSuite {
                index,
                remaining: test_count,
            });
        } else {
            self.factory_suites.push(index);
        }
        index
    }

    /// Returns the unrooted suite, and whether it was just created.
    fn unrooted_suite(&mut self, tree: &mut TestTree) -> (ElementIndex, Option<ElementIndex>) {
        if let Some(index) = self.unrooted_suite {
            return (index, None);
        }
        let index = tree.add_suite(
            ElementIndex::ROOT,
            NewElement::new(UNROOTED_SUITE_ID, UNROOTED_SUITE_NAME),
            0,
        );
        self.unrooted_suite = Some(index);
        (index, Some(index))
    }
}
