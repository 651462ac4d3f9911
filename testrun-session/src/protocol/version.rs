// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TreeEntry;
use crate::status::Status;
use std::fmt;
use tracing::{debug, warn};

/// The protocol flavor spoken by the runner, chosen once from `%TESTC`.
///
/// All differences between legacy and current runners are decided here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// A runner that doesn't send a version: test names double as ids.
    #[default]
    Legacy,

    /// A runner that sends a version token and separate ids.
    Versioned(String),
}

/// The parsed tail of a `%TESTRR` message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RerunLine {
    /// The id of the rerun test.
    pub test_id: String,

    /// The class the test belongs to.
    pub class_name: String,

    /// The name of the test.
    pub test_name: String,

    /// The rerun's outcome.
    pub status: Status,
}

const RERUN_STATUS_SUFFIXES: [(&str, Status); 3] = [
    (" ERROR", Status::Error),
    (" FAILURE", Status::Failure),
    (" OK", Status::Ok),
];

impl ProtocolVersion {
    /// Picks a version from the optional token after the test count.
    pub fn from_token(token: Option<&str>) -> Self {
        match token.map(str::trim) {
            Some(token) if !token.is_empty() => ProtocolVersion::Versioned(token.to_owned()),
            _ => ProtocolVersion::Legacy,
        }
    }

    /// Returns true for [`ProtocolVersion::Legacy`].
    pub fn is_legacy(&self) -> bool {
        matches!(self, ProtocolVersion::Legacy)
    }

    /// Splits an `<id>,<name>` payload into its id and name.
    pub fn split_test_id<'a>(&self, payload: &'a str) -> (&'a str, &'a str) {
        match self {
            ProtocolVersion::Legacy => (payload, payload),
            ProtocolVersion::Versioned(_) => payload.split_once(',').unwrap_or((payload, payload)),
        }
    }

    /// Parses a `%TSTTREE` payload.
    pub fn parse_tree_entry(&self, payload: &str) -> Option<TreeEntry> {
        let entry = match self {
            ProtocolVersion::Legacy => TreeEntry::parse_legacy(payload),
            ProtocolVersion::Versioned(_) => TreeEntry::parse(payload),
        };
        if entry.is_none() {
            debug!("ignoring truncated tree entry {payload:?}");
        }
        entry
    }

    /// Parses a `%TESTRR` payload.
    ///
    /// Test names may contain spaces, so the known status words are matched
    /// as suffixes before falling back to splitting at the last space.
    pub fn parse_rerun(&self, payload: &str) -> Option<RerunLine> {
        let (rest, status) = RERUN_STATUS_SUFFIXES
            .iter()
            .find_map(|(suffix, status)| {
                payload
                    .strip_suffix(suffix)
                    .map(|rest| (rest, *status))
            })
            .or_else(|| {
                let (rest, word) = payload.rsplit_once(' ')?;
                let status = Status::from_rerun_word(word).unwrap_or_else(|| {
                    warn!("unknown rerun status {word:?}, treating as OK");
                    Status::Ok
                });
                Some((rest, status))
            })?;

        let parsed = match self {
            ProtocolVersion::Legacy => rest.split_once(' ').map(|(class_name, test_name)| {
                (test_name, class_name, test_name)
            }),
            ProtocolVersion::Versioned(_) => rest.split_once(' ').and_then(|(test_id, rest)| {
                rest.split_once(' ')
                    .map(|(class_name, test_name)| (test_id, class_name, test_name))
            }),
        };
        let Some((test_id, class_name, test_name)) = parsed else {
            debug!("ignoring malformed rerun message {payload:?}");
            return None;
        };

        Some(RerunLine {
            test_id: test_id.to_owned(),
            class_name: class_name.to_owned(),
            test_name: test_name.to_owned(),
            status,
        })
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Legacy => f.write_str("v1"),
            ProtocolVersion::Versioned(version) => f.write_str(version),
        }
    }
}
