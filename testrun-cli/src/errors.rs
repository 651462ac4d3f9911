// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, Styles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use std::error::Error;
use testrun_session::errors::{
    ConfigParseError, ConnectionError, TranscriptExportError, TranscriptImportError,
};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// Exit codes returned by `testrun`.
pub enum TestrunExitCode {}

impl TestrunExitCode {
    /// The run passed, or nothing was run.
    pub const OK: i32 = 0;

    /// At least one test failed or errored.
    pub const TEST_RUN_FAILED: i32 = 1;

    /// `testrun` itself failed: bad arguments, config, I/O or transcripts.
    pub const TOOL_ERROR: i32 = 2;
}

// The #[error()] strings are short placeholders: display_to_stderr is the
// expected way to print these.

/// An error that `testrun` reports to the user.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("failed to start async runtime")]
    RuntimeCreateError {
        #[source]
        err: std::io::Error,
    },
    #[error("runner connection error")]
    ConnectionError {
        #[from]
        err: ConnectionError,
    },
    #[error("failed to read protocol log")]
    LogReadError {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("transcript import error")]
    TranscriptImportError {
        #[from]
        err: TranscriptImportError,
    },
    #[error("transcript export error")]
    TranscriptExportError {
        #[from]
        err: TranscriptExportError,
    },
    #[error("failed to write output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        TestrunExitCode::TOOL_ERROR
    }

    /// Logs this error, followed by its chain of causes.
    pub fn display_to_stderr(&self, styles: &Styles) {
        let mut next_error = match self {
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::RuntimeCreateError { err } => {
                error!("failed to start the async runtime");
                Some(err as &dyn Error)
            }
            Self::ConnectionError { err } => {
                error!("{err}");
                err.source()
            }
            Self::LogReadError { path, err } => {
                error!("failed to read protocol log `{}`", path.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::TranscriptImportError { err } => {
                error!("{err}");
                err.source()
            }
            Self::TranscriptExportError { err } => {
                error!("{err}");
                err.source()
            }
            Self::WriteOutputError { err } => {
                error!("failed to write output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {err}");
            next_error = err.source();
        }
    }
}
