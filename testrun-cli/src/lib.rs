// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `testrun` command-line tool.
//!
//! `testrun` listens for a remote test runner, follows its run through a
//! [`TestRunSession`](testrun_session::session::TestRunSession), and prints a
//! summary. Captured protocol logs can be replayed and transcripts inspected
//! without a runner.

#![warn(missing_docs)]

mod dispatch;
mod display;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::TestrunApp;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, Styles};
