// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! XML transcripts of test runs.
//!
//! A transcript is a JUnit-flavored XML document with a `<testrun>` root that
//! captures a whole [`TestTree`] along with the run counters. The same format
//! is used for user-facing export and import, and for swapping idle sessions
//! out to disk.
//!
//! Reading is lenient: plain JUnit reports with a `<testsuites>` or
//! `<testsuite>` root are accepted too, and unknown elements and attributes
//! are skipped.

mod deserialize;
mod serialize;

use crate::{
    errors::{TranscriptExportError, TranscriptImportError},
    session::RunCounters,
    tree::TestTree,
};
use camino::Utf8Path;
use std::io::{self, Write};

pub(crate) mod tags {
    pub(crate) const TESTRUN_TAG: &str = "testrun";
    pub(crate) const TESTSUITES_TAG: &str = "testsuites";
    pub(crate) const TESTSUITE_TAG: &str = "testsuite";
    pub(crate) const TESTCASE_TAG: &str = "testcase";
    pub(crate) const FAILURE_TAG: &str = "failure";
    pub(crate) const ERROR_TAG: &str = "error";
    pub(crate) const SKIPPED_TAG: &str = "skipped";
    pub(crate) const ABORTED_TAG: &str = "aborted";
    pub(crate) const EXPECTED_TAG: &str = "expected";
    pub(crate) const ACTUAL_TAG: &str = "actual";

    pub(crate) const NAME_ATTR: &str = "name";
    pub(crate) const PROJECT_ATTR: &str = "project";
    pub(crate) const TESTS_ATTR: &str = "tests";
    pub(crate) const STARTED_ATTR: &str = "started";
    pub(crate) const FAILURES_ATTR: &str = "failures";
    pub(crate) const ERRORS_ATTR: &str = "errors";
    pub(crate) const IGNORED_ATTR: &str = "ignored";
    pub(crate) const ASSUMPTION_FAILURES_ATTR: &str = "assumptionFailures";
    pub(crate) const TIME_ATTR: &str = "time";
    pub(crate) const INCLUDE_TAGS_ATTR: &str = "include_tags";
    pub(crate) const EXCLUDE_TAGS_ATTR: &str = "exclude_tags";
    pub(crate) const CLASSNAME_ATTR: &str = "classname";
    pub(crate) const PACKAGE_ATTR: &str = "package";
    pub(crate) const MESSAGE_ATTR: &str = "message";
    pub(crate) const ID_ATTR: &str = "id";
    pub(crate) const DISPLAY_NAME_ATTR: &str = "displayname";
    pub(crate) const PARAMETERS_ATTR: &str = "parameters";
    pub(crate) const UNIQUE_ID_ATTR: &str = "uniqueId";
    pub(crate) const INCOMPLETE_ATTR: &str = "incomplete";
    pub(crate) const DYNAMIC_TEST_ATTR: &str = "dynamicTest";
}

/// A borrowed view of a run, ready to be written out.
#[derive(Copy, Clone, Debug)]
pub struct TranscriptRun<'a> {
    /// The session name.
    pub name: &'a str,

    /// The project, if any.
    pub project: Option<&'a str>,

    /// The run counters.
    pub counters: RunCounters,

    /// The include-tag expression, if any.
    pub include_tags: Option<&'a str>,

    /// The exclude-tag expression, if any.
    pub exclude_tags: Option<&'a str>,

    /// The tree.
    pub tree: &'a TestTree,
}

impl TranscriptRun<'_> {
    /// Writes the transcript to `writer`.
    pub fn serialize(&self, writer: impl io::Write) -> Result<(), TranscriptExportError> {
        serialize::serialize_run(self, writer).map_err(TranscriptExportError::Serialize)
    }

    /// Writes the transcript to memory.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TranscriptExportError> {
        let mut buf = Vec::new();
        self.serialize(&mut buf)?;
        Ok(buf)
    }

    /// Atomically writes the transcript to `path`.
    pub fn write_to_file(&self, path: &Utf8Path) -> Result<(), TranscriptExportError> {
        let bytes = self.to_bytes()?;
        write_file(path, &bytes)
    }
}

/// A run read back from a transcript.
#[derive(Clone, Debug)]
pub struct ImportedRun {
    /// The name recorded in the transcript, if any.
    pub name: Option<String>,

    /// The project recorded in the transcript, if any.
    pub project: Option<String>,

    /// The include-tag expression, if any.
    pub include_tags: Option<String>,

    /// The exclude-tag expression, if any.
    pub exclude_tags: Option<String>,

    /// The reconstructed tree.
    pub tree: TestTree,

    /// Counters recomputed from the tree.
    pub counters: RunCounters,
}

/// Options for reading a transcript.
#[derive(Clone, Debug)]
pub struct ImportOptions {
    /// Source lines between progress reports.
    pub progress_interval: usize,

    /// The root name to use if the transcript doesn't record one.
    pub root_name: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            progress_interval: 20,
            root_name: "imported".to_owned(),
        }
    }
}

/// Observes a transcript import.
pub trait ImportMonitor: Send + Sync {
    /// Called with the number of source lines read since the last call.
    fn worked(&self, lines: usize) {
        let _ = lines;
    }

    /// Returns true to abandon the import.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// An [`ImportMonitor`] that never cancels and ignores progress.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopMonitor;

impl ImportMonitor for NoopMonitor {}

/// Reads a transcript from a string. `location` names the source in errors.
pub fn read_transcript(
    text: &str,
    location: &str,
    options: &ImportOptions,
    monitor: &dyn ImportMonitor,
) -> Result<ImportedRun, TranscriptImportError> {
    deserialize::deserialize_run(text, location, options, monitor)
}

/// Reads a transcript from a file.
pub fn read_transcript_file(
    path: &Utf8Path,
    options: &ImportOptions,
    monitor: &dyn ImportMonitor,
) -> Result<ImportedRun, TranscriptImportError> {
    let text = std::fs::read_to_string(path).map_err(|error| TranscriptImportError::Read {
        path: path.to_owned(),
        error,
    })?;
    read_transcript(&text, path.as_str(), options, monitor)
}

pub(crate) fn write_file(path: &Utf8Path, bytes: &[u8]) -> Result<(), TranscriptExportError> {
    atomicwrites::AtomicFile::new(path, atomicwrites::AllowOverwrite)
        .write(|f| f.write_all(bytes))
        .map_err(|error| TranscriptExportError::Write {
            path: path.to_owned(),
            error,
        })
}
