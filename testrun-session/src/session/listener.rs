// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{status::Status, tree::TestElement};
use std::{fmt, sync::Arc, time::Duration};

/// Receives notifications about a [`TestRunSession`](super::TestRunSession).
///
/// All methods have empty default implementations. Callbacks run on the task
/// that reads from the runner, with no session lock held, so they may call
/// back into the session.
pub trait TestSessionListener: Send + Sync {
    /// The runner announced the start of the run.
    fn session_started(&self) {}

    /// The run ended. `elapsed` is the time reported by the runner.
    fn session_ended(&self, elapsed: Option<Duration>) {
        let _ = elapsed;
    }

    /// The run stopped after a stop request.
    fn session_stopped(&self, elapsed: Option<Duration>) {
        let _ = elapsed;
    }

    /// The connection to the runner went away before the run finished.
    fn session_terminated(&self) {}

    /// A test or suite was added to the tree.
    fn test_added(&self, element: &TestElement) {
        let _ = element;
    }

    /// The first test of the run is about to start.
    fn running_begins(&self) {}

    /// A test started.
    fn test_started(&self, element: &TestElement) {
        let _ = element;
    }

    /// A test ended.
    fn test_ended(&self, element: &TestElement) {
        let _ = element;
    }

    /// A test or suite failed.
    fn test_failed(
        &self,
        element: &TestElement,
        status: Status,
        trace: &str,
        expected: Option<&str>,
        actual: Option<&str>,
    ) {
        let _ = (element, status, trace, expected, actual);
    }

    /// A test was rerun.
    fn test_reran(
        &self,
        element: &TestElement,
        status: Status,
        trace: Option<&str>,
        expected: Option<&str>,
        actual: Option<&str>,
    ) {
        let _ = (element, status, trace, expected, actual);
    }

    /// Whether the session may be swapped out to disk while this listener is
    /// registered.
    fn accepts_swap_to_disk(&self) -> bool {
        true
    }
}

/// Identifies a registered listener, for removal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

pub(crate) type ListenerSnapshot = Vec<Arc<dyn TestSessionListener>>;

/// A notification collected while the session lock was held, delivered after
/// it is released.
#[derive(Clone, Debug)]
pub(crate) enum Notification {
    SessionStarted,
    SessionEnded(Option<Duration>),
    SessionStopped(Option<Duration>),
    SessionTerminated,
    TestAdded(TestElement),
    RunningBegins,
    TestStarted(TestElement),
    TestEnded(TestElement),
    TestFailed {
        element: TestElement,
        status: Status,
        trace: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    TestReran {
        element: TestElement,
        status: Status,
        trace: Option<String>,
        expected: Option<String>,
        actual: Option<String>,
    },
}

impl Notification {
    fn deliver_to(&self, listener: &dyn TestSessionListener) {
        match self {
            Notification::SessionStarted => listener.session_started(),
            Notification::SessionEnded(elapsed) => listener.session_ended(*elapsed),
            Notification::SessionStopped(elapsed) => listener.session_stopped(*elapsed),
            Notification::SessionTerminated => listener.session_terminated(),
            Notification::TestAdded(element) => listener.test_added(element),
            Notification::RunningBegins => listener.running_begins(),
            Notification::TestStarted(element) => listener.test_started(element),
            Notification::TestEnded(element) => listener.test_ended(element),
            Notification::TestFailed {
                element,
                status,
                trace,
                expected,
                actual,
            } => listener.test_failed(
                element,
                *status,
                trace,
                expected.as_deref(),
                actual.as_deref(),
            ),
            Notification::TestReran {
                element,
                status,
                trace,
                expected,
                actual,
            } => listener.test_reran(
                element,
                *status,
                trace.as_deref(),
                expected.as_deref(),
                actual.as_deref(),
            ),
        }
    }
}

pub(crate) fn deliver(listeners: &ListenerSnapshot, notifications: Vec<Notification>) {
    if listeners.is_empty() {
        return;
    }
    for notification in &notifications {
        for listener in listeners {
            notification.deliver_to(listener.as_ref());
        }
    }
}
