// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The session controller.
//!
//! A [`TestRunSession`] owns one [`TestTree`](crate::tree::TestTree) and keeps
//! it in sync with a runner: it consumes
//! [`ProtocolEvent`](crate::protocol::ProtocolEvent)s, maintains counters and
//! the run lifecycle, and fans changes out to [`TestSessionListener`]s.
//!
//! Sessions that are finished can be swapped out to disk to save memory. The
//! tree is read back transparently the next time it's needed.

pub(crate) mod builder;
mod connection;
mod imp;
mod listener;

pub use builder::{UNROOTED_SUITE_ID, UNROOTED_SUITE_NAME};
pub use connection::RunnerConnection;
pub use imp::{RunCounters, RunState, SessionKind, SessionUuid, ShutdownFlag, TestRunSession};
pub use listener::{ListenerId, TestSessionListener};
