// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use bstr::ByteSlice;

/// The delimiter that ended a line.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LineDelimiter {
    /// `\n`
    Lf,

    /// `\r\n`
    CrLf,

    /// `\r`
    Cr,
}

impl LineDelimiter {
    /// The delimiter as a string.
    pub fn as_str(self) -> &'static str {
        match self {
            LineDelimiter::Lf => "\n",
            LineDelimiter::CrLf => "\r\n",
            LineDelimiter::Cr => "\r",
        }
    }

    fn len(self) -> usize {
        self.as_str().len()
    }
}

/// A single line produced by [`LineFramer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramedLine {
    /// The line's text, without the delimiter.
    pub text: String,

    /// The delimiter that ended the line, or `None` for a final line at end
    /// of stream.
    pub delimiter: Option<LineDelimiter>,
}

/// Splits a byte stream into lines, remembering each line's delimiter.
///
/// Bytes can arrive in arbitrary chunks. A `\r` at the very end of the
/// buffered bytes is held back until the next chunk shows whether it is
/// followed by `\n`, or until [`finish`](Self::finish) is called.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    consumed: usize,
    eof: bool,
}

impl LineFramer {
    /// Creates a new, empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.consumed > 0 {
            self.buf.drain(..self.consumed);
            self.consumed = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Marks the end of the stream. Any remaining bytes become a final line.
    pub fn finish(&mut self) {
        self.eof = true;
    }

    /// Returns the next complete line, if there is one.
    pub fn next_line(&mut self) -> Option<FramedLine> {
        let pending = &self.buf[self.consumed..];
        let Some(pos) = pending.find_byteset(b"\r\n") else {
            if self.eof && !pending.is_empty() {
                let text = String::from_utf8_lossy(pending).into_owned();
                self.consumed = self.buf.len();
                return Some(FramedLine {
                    text,
                    delimiter: None,
                });
            }
            return None;
        };

        let delimiter = if pending[pos] == b'\n' {
            LineDelimiter::Lf
        } else {
            match pending.get(pos + 1) {
                Some(b'\n') => LineDelimiter::CrLf,
                Some(_) => LineDelimiter::Cr,
                None if self.eof => LineDelimiter::Cr,
                None => return None,
            }
        };

        let text = String::from_utf8_lossy(&pending[..pos]).into_owned();
        self.consumed += pos + delimiter.len();
        Some(FramedLine {
            text,
            delimiter: Some(delimiter),
        })
    }
}
