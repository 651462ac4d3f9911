// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testrun-session.

use crate::session::RunState;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error, fmt, io, net::SocketAddr};
use thiserror::Error;

/// An error that occurred while parsing a session config file.
#[derive(Debug, Error)]
#[error("failed to parse testrun config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// The config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }
}

/// An error that occurred while writing a transcript.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TranscriptExportError {
    /// Serializing the tree to XML failed.
    #[error("failed to serialize transcript")]
    Serialize(#[source] quick_xml::Error),

    /// Writing the transcript file failed.
    #[error("failed to write transcript to `{path}`")]
    Write {
        /// The destination path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<io::Error>,
    },
}

/// An error that occurred while reading a transcript.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TranscriptImportError {
    /// Reading the transcript file failed.
    #[error("failed to read transcript from `{path}`")]
    Read {
        /// The source path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The transcript is not well-formed XML.
    #[error("invalid XML in transcript `{location}` at byte {position}")]
    Xml {
        /// Where the transcript came from.
        location: String,

        /// The byte offset of the error.
        position: usize,

        /// The underlying error.
        #[source]
        error: quick_xml::Error,
    },

    /// The XML is well-formed but isn't a transcript.
    #[error("malformed transcript `{location}`: {message}")]
    Malformed {
        /// Where the transcript came from.
        location: String,

        /// What was wrong.
        message: String,
    },

    /// The import was cancelled by its monitor.
    #[error("import of transcript `{location}` was cancelled")]
    Cancelled {
        /// Where the transcript came from.
        location: String,
    },
}

/// An error that occurred while setting up a runner connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Binding the listening socket failed.
    #[error("failed to bind runner listener on {addr}")]
    Bind {
        /// The address that couldn't be bound.
        addr: SocketAddr,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The bound socket's local address couldn't be determined.
    #[error("failed to get local address of runner listener")]
    LocalAddr(#[source] io::Error),

    /// The session is already connected to a runner.
    #[error("session `{session}` is already connected to a runner")]
    AlreadyConnected {
        /// The session's name.
        session: String,
    },

    /// The session already has a run. A fresh run needs a new session.
    #[error("session `{session}` has already run ({state}); start a new session")]
    AlreadyRun {
        /// The session's name.
        session: String,

        /// The session's state when the connection was attempted.
        state: RunState,
    },
}

/// Displays an error along with its chain of sources.
///
/// ```text
/// top-level message
///   caused by:
///   - first source
///   - second source
/// ```
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new chain display for `error`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        if source.is_some() {
            write!(f, "\n  caused by:")?;
        }
        while let Some(error) = source {
            write!(f, "\n  - {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

impl<E: error::Error> fmt::Debug for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn error_chain() {
        let error = TranscriptImportError::Read {
            path: "run.xml".into(),
            error: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(
            DisplayErrorChain::new(error).to_string(),
            indoc! {"
                failed to read transcript from `run.xml`
                  caused by:
                  - no such file"
            }
        );
    }

    #[test]
    fn error_without_source() {
        let error = TranscriptImportError::Cancelled {
            location: "run.xml".to_owned(),
        };
        assert_eq!(
            DisplayErrorChain::new(&error).to_string(),
            "import of transcript `run.xml` was cancelled"
        );
    }
}
