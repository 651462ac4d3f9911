// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core model for a test run driven by a remote test-runner process.
//!
//! The flow of data through this crate is:
//!
//! ```text
//! runner process -> bytes -> protocol::ProtocolStream -> ProtocolEvent
//!     -> session::TestRunSession -> tree::TestTree -> TestSessionListener
//! ```
//!
//! The [`transcript`] module reads and writes the same tree as XML, both for
//! export/import and for swapping idle sessions out of memory.

pub mod config;
pub mod errors;
pub mod protocol;
pub mod session;
pub mod status;
mod stopwatch;
pub mod transcript;
pub mod tree;
