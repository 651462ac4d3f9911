// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The line-oriented wire protocol spoken by test runners.
//!
//! [`LineFramer`] splits raw bytes into lines, [`ProtocolDecoder`] turns lines
//! into [`ProtocolEvent`]s, and [`ProtocolStream`] combines the two. Nothing
//! in this module knows about the test tree.

mod decoder;
mod framing;
pub mod messages;
mod tree_entry;
mod version;

pub use decoder::{ProtocolDecoder, ProtocolEvent, ProtocolStream, decode_all};
pub use framing::{FramedLine, LineDelimiter, LineFramer};
pub use messages::RunnerCommand;
pub use tree_entry::TreeEntry;
pub use version::{ProtocolVersion, RerunLine};
