// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use tracing::debug;

/// A node of the test tree announced by the runner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeEntry {
    /// The id of the node. For legacy runners this is the test name.
    pub test_id: String,

    /// The test name.
    pub test_name: String,

    /// Whether the node is a suite.
    pub is_suite: bool,

    /// The number of direct children a suite announces.
    pub test_count: usize,

    /// Whether the node is a test generated at execution time.
    pub is_dynamic_test: bool,

    /// The id of the parent node for dynamic tests.
    pub parent_id: Option<String>,

    /// The display name, if different from the test name.
    pub display_name: Option<String>,

    /// The parameter types of a parameterized test.
    pub parameter_types: Option<Vec<String>>,

    /// An external unique id.
    pub unique_id: Option<String>,

    /// Whether the entry came from a legacy runner that doesn't send ids.
    pub legacy: bool,
}

impl TreeEntry {
    /// Parses an entry in the current layout:
    ///
    /// `testId,testName,isSuite,testCount,isDynamicTest,parentId,displayName,parameterTypes,uniqueId`
    ///
    /// Only the first four fields are required. `\` escapes the next
    /// character in the name, display name, parameter types and unique id.
    pub fn parse(payload: &str) -> Option<Self> {
        let mut scanner = FieldScanner::new(payload);
        let test_id = scanner.plain()?.to_owned();
        let test_name = scanner.escaped()?;
        let is_suite = parse_bool(scanner.plain()?);
        let test_count = parse_count(scanner.plain()?);
        let is_dynamic_test = scanner.plain().is_some_and(parse_bool);
        let parent_id = scanner
            .plain()
            .filter(|id| !id.is_empty() && *id != "-1")
            .map(str::to_owned);
        let display_name = scanner
            .escaped()
            .filter(|name| !name.is_empty() && *name != test_name);
        let parameter_types = scanner
            .escaped()
            .and_then(|types| parse_parameter_types(&types));
        let unique_id = scanner.escaped().filter(|id| !id.is_empty());

        Some(Self {
            test_id,
            test_name,
            is_suite,
            test_count,
            is_dynamic_test,
            parent_id,
            display_name,
            parameter_types,
            unique_id,
            legacy: false,
        })
    }

    /// Parses an entry from a legacy runner: `testName,isSuite,testCount`.
    ///
    /// The test name doubles as the id.
    pub fn parse_legacy(payload: &str) -> Option<Self> {
        let mut scanner = FieldScanner::new(payload);
        let test_name = scanner.escaped()?;
        let is_suite = parse_bool(scanner.plain()?);
        let test_count = parse_count(scanner.plain()?);
        Some(Self {
            test_id: test_name.clone(),
            test_name,
            is_suite,
            test_count,
            legacy: true,
            ..Default::default()
        })
    }
}

fn parse_bool(field: &str) -> bool {
    field.trim() == "true"
}

fn parse_count(field: &str) -> usize {
    field.trim().parse().unwrap_or_else(|error| {
        debug!("ignoring malformed test count {field:?}: {error}");
        0
    })
}

fn parse_parameter_types(field: &str) -> Option<Vec<String>> {
    let field = field.trim();
    let field = field
        .strip_prefix('[')
        .and_then(|field| field.strip_suffix(']'))
        .unwrap_or(field);
    if field.is_empty() {
        return None;
    }
    Some(field.split(',').map(|ty| ty.trim().to_owned()).collect())
}

/// Splits a comma-separated record where some fields may contain `\,`.
struct FieldScanner<'a> {
    rest: Option<&'a str>,
}

impl<'a> FieldScanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: Some(input) }
    }

    /// Returns the next field verbatim.
    fn plain(&mut self) -> Option<&'a str> {
        let rest = self.rest?;
        match rest.split_once(',') {
            Some((field, rest)) => {
                self.rest = Some(rest);
                Some(field)
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }

    /// Returns the next field with `\` escapes resolved.
    fn escaped(&mut self) -> Option<String> {
        let rest = self.rest?;
        let mut field = String::new();
        let mut in_escape = false;
        for (pos, c) in rest.char_indices() {
            if in_escape {
                in_escape = false;
                field.push(c);
            } else if c == '\\' {
                in_escape = true;
            } else if c == ',' {
                self.rest = Some(&rest[pos + 1..]);
                return Some(field);
            } else {
                field.push(c);
            }
        }
        self.rest = None;
        Some(field)
    }
}
