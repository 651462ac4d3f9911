// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    builder::TreeBuilder,
    connection::RunnerHandle,
    listener::{ListenerId, ListenerSnapshot, Notification, TestSessionListener, deliver},
};
use crate::{
    config::{LaunchConfig, LaunchMode, SessionConfig},
    errors::{ConnectionError, DisplayErrorChain, TranscriptExportError, TranscriptImportError},
    protocol::{ProtocolEvent, RunnerCommand, TreeEntry},
    status::{ProgressState, Status, TestResult},
    stopwatch::{Stopwatch, stopwatch},
    transcript::{
        ImportMonitor, ImportOptions, ImportedRun, NoopMonitor, TranscriptRun, read_transcript,
        read_transcript_file, write_file,
    },
    tree::{ElementIndex, TestElement, TestTree, now_seconds},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, FixedOffset};
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::{debug, info, warn};

/// The kind of [`SessionUuid`]s.
pub enum SessionKind {}

impl TypedUuidKind for SessionKind {
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("session");
        TAG
    }
}

/// A unique identifier for a session. Also names the session's swap file.
pub type SessionUuid = TypedUuid<SessionKind>;

/// Counters for a run.
///
/// Counters only ever go down through rerun compensation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RunCounters {
    /// Tests that started.
    pub started: usize,

    /// Tests that were ignored.
    pub ignored: usize,

    /// Tests that errored.
    pub errors: usize,

    /// Tests that failed.
    pub failures: usize,

    /// Tests whose assumptions failed.
    pub assumption_failures: usize,

    /// Tests announced, plus dynamic tests as they start.
    pub total: usize,
}

impl RunCounters {
    /// Counts a failure or error, unless the element's assumption failed.
    pub(crate) fn count_failure(&mut self, element: &TestElement, status: Status) {
        if element.is_assumption_failure() {
            return;
        }
        if status.is_error() {
            self.errors += 1;
        } else if status.is_failure() {
            self.failures += 1;
        }
    }

    /// Takes back a failure or error before its test is rerun.
    fn uncount_failure(&mut self, status: Status) {
        if status == Status::Error {
            self.errors = self.errors.saturating_sub(1);
        } else if status == Status::Failure {
            self.failures = self.failures.saturating_sub(1);
        }
    }

    /// Returns true if any test failed or errored.
    pub fn has_failures(&self) -> bool {
        self.errors > 0 || self.failures > 0
    }
}

/// Where a session is in its lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Nothing has happened yet.
    NotStarted,

    /// Waiting for the runner to connect and announce the run.
    Starting,

    /// The runner announced the run.
    Running,

    /// The run ended normally.
    Ended,

    /// The run stopped after a stop request.
    Stopped,

    /// The connection went away before the run finished.
    Terminated,
}

impl RunState {
    /// Returns true for the three terminal states.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            RunState::Ended | RunState::Stopped | RunState::Terminated
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::NotStarted => "not started",
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Ended => "ended",
            RunState::Stopped => "stopped",
            RunState::Terminated => "terminated",
        };
        f.pad(s)
    }
}

/// A process-wide flag that suppresses event delivery once the host is
/// shutting down.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// Creates a new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// The flag shared by every session that doesn't bring its own.
    pub fn global() -> &'static ShutdownFlag {
        static GLOBAL: OnceLock<ShutdownFlag> = OnceLock::new();
        GLOBAL.get_or_init(ShutdownFlag::new)
    }

    /// Sets the flag. There is no way to unset it.
    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once the flag has been set.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A single test run, fed by a runner connection or a transcript.
///
/// This is a cheap handle: clones refer to the same session. Every method
/// takes the session lock for a short, non-blocking section. The lock is
/// never held while talking to the runner or calling listeners.
#[derive(Clone)]
pub struct TestRunSession {
    shared: Arc<SessionShared>,
}

struct SessionShared {
    id: SessionUuid,
    name: String,
    project: Option<String>,
    launch: LaunchConfig,
    swap_dir: Utf8PathBuf,
    progress_interval: usize,
    shutdown: ShutdownFlag,
    state: Mutex<SessionState>,
}

struct SessionState {
    tree: TreeSlot,
    counters: RunCounters,
    run_state: RunState,
    stopwatch: Option<Stopwatch>,
    include_tags: Option<String>,
    exclude_tags: Option<String>,
    listeners: Vec<(ListenerId, Arc<dyn TestSessionListener>)>,
    next_listener_id: u64,
    client: Option<RunnerHandle>,
    // Bumped on every mutation, so that a swap-out can tell whether the tree
    // changed while it was being written.
    revision: u64,
}

enum TreeSlot {
    Live(LiveTree),
    SwappedOut { result: TestResult },
}

struct LiveTree {
    tree: TestTree,
    builder: TreeBuilder,
}

impl LiveTree {
    fn new(tree: TestTree) -> Self {
        Self {
            tree,
            builder: TreeBuilder::new(),
        }
    }
}

impl TestRunSession {
    /// Creates a session for a live run.
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_shutdown_flag(config, ShutdownFlag::global().clone())
    }

    /// Creates a session that watches the given shutdown flag instead of the
    /// global one.
    pub fn with_shutdown_flag(config: &SessionConfig, shutdown: ShutdownFlag) -> Self {
        let session = &config.session;
        Self::from_parts(
            config,
            session.name.clone(),
            session.project.clone(),
            TestTree::new(session.name.clone()),
            shutdown,
            |state| {
                state.include_tags = session.include_tags.clone();
                state.exclude_tags = session.exclude_tags.clone();
            },
        )
    }

    /// Reads a transcript file into a new, finished session.
    pub fn import_from_file(
        path: &Utf8Path,
        config: &SessionConfig,
        monitor: &dyn ImportMonitor,
    ) -> Result<Self, TranscriptImportError> {
        let imported = read_transcript_file(path, &import_options(config), monitor)?;
        info!("imported {} elements from {path}", imported.tree.len());
        Ok(Self::from_imported(config, imported))
    }

    /// Reads a transcript held in memory into a new, finished session.
    pub fn import_from_str(
        text: &str,
        location: &str,
        config: &SessionConfig,
        monitor: &dyn ImportMonitor,
    ) -> Result<Self, TranscriptImportError> {
        let imported = read_transcript(text, location, &import_options(config), monitor)?;
        Ok(Self::from_imported(config, imported))
    }

    fn from_imported(config: &SessionConfig, imported: ImportedRun) -> Self {
        let ImportedRun {
            name,
            project,
            include_tags,
            exclude_tags,
            tree,
            counters,
        } = imported;
        Self::from_parts(
            config,
            name.unwrap_or_else(|| config.session.name.clone()),
            project.or_else(|| config.session.project.clone()),
            tree,
            ShutdownFlag::global().clone(),
            |state| {
                state.counters = counters;
                state.run_state = RunState::Ended;
                state.include_tags = include_tags;
                state.exclude_tags = exclude_tags;
            },
        )
    }

    fn from_parts(
        config: &SessionConfig,
        name: String,
        project: Option<String>,
        tree: TestTree,
        shutdown: ShutdownFlag,
        init: impl FnOnce(&mut SessionState),
    ) -> Self {
        let mut state = SessionState {
            tree: TreeSlot::Live(LiveTree::new(tree)),
            counters: RunCounters::default(),
            run_state: RunState::NotStarted,
            stopwatch: None,
            include_tags: None,
            exclude_tags: None,
            listeners: Vec::new(),
            next_listener_id: 0,
            client: None,
            revision: 0,
        };
        init(&mut state);

        Self {
            shared: Arc::new(SessionShared {
                id: SessionUuid::new_v4(),
                name,
                project,
                launch: config.launch.clone(),
                swap_dir: config.swap.resolved_dir(),
                progress_interval: config.import.progress_interval,
                shutdown,
                state: Mutex::new(state),
            }),
        }
    }

    /// The session's unique id.
    pub fn session_id(&self) -> SessionUuid {
        self.shared.id
    }

    /// The session name, which is also the name of the tree root.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The project the run belongs to, if any.
    pub fn project(&self) -> Option<&str> {
        self.shared.project.as_deref()
    }

    /// How the runner was launched.
    pub fn launch_config(&self) -> &LaunchConfig {
        &self.shared.launch
    }

    /// The include-tag expression the runner was launched with.
    pub fn include_tags(&self) -> Option<String> {
        self.lock().include_tags.clone()
    }

    /// The exclude-tag expression the runner was launched with.
    pub fn exclude_tags(&self) -> Option<String> {
        self.lock().exclude_tags.clone()
    }

    // ---
    // Listeners
    // ---

    /// Registers a listener and returns its id.
    pub fn add_listener(&self, listener: Arc<dyn TestSessionListener>) -> ListenerId {
        let mut state = self.lock();
        let id = ListenerId(state.next_listener_id);
        state.next_listener_id += 1;
        state.listeners.push((id, listener));
        id
    }

    /// Removes a listener. Returns false if it wasn't registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
        state.listeners.len() != before
    }

    // ---
    // Events
    // ---

    /// Applies one protocol event to the tree and notifies listeners.
    pub fn handle_event(&self, event: ProtocolEvent) {
        if self.shared.shutdown.is_set() {
            debug!("shutting down, dropping event {event:?}");
            return;
        }
        self.ensure_swapped_in();

        let now = now_seconds();
        let (listeners, notifications) = {
            let mut state = self.lock();
            let notifications = state.apply_event(event, now);
            (state.listener_snapshot(), notifications)
        };
        deliver(&listeners, notifications);
    }

    // ---
    // Runner commands
    // ---

    /// Asks a kept-alive runner to rerun a test.
    ///
    /// Returns false if the runner isn't kept alive or the command couldn't be
    /// queued.
    pub fn rerun(&self, test_id: &str, class_name: &str, test_name: &str) -> bool {
        let mut state = self.lock();
        if !state.is_kept_alive(&self.shared.launch) {
            debug!("not rerunning {test_id}: runner isn't kept alive");
            return false;
        }

        let SessionState {
            tree,
            counters,
            client,
            ..
        } = &mut *state;
        let sent = client.as_ref().is_some_and(|client| {
            client.send(RunnerCommand::Rerun {
                test_id: test_id.to_owned(),
                class_name: class_name.to_owned(),
                test_name: test_name.to_owned(),
            })
        });
        if sent
            && let TreeSlot::Live(live) = tree
            && let Some(element) = live.tree.element_by_id(test_id)
        {
            counters.uncount_failure(element.status());
        }
        sent
    }

    /// Asks the runner to stop. The run is marked stopped once the runner
    /// acknowledges.
    ///
    /// Returns false if there is no connected runner.
    pub fn stop_test_run(&self) -> bool {
        let state = self.lock();
        match &state.client {
            Some(client) if client.is_connected() => client.send(RunnerCommand::Stop),
            _ => false,
        }
    }

    /// Drops the runner connection without waiting for it. Listeners see the
    /// session as terminated if the run hadn't finished.
    pub fn terminate(&self) {
        if let Some(client) = &self.lock().client {
            client.force_close();
        }
    }

    pub(crate) fn attach_client(&self, handle: RunnerHandle) -> Result<(), ConnectionError> {
        let mut state = self.lock();
        if state.client.is_some() {
            return Err(ConnectionError::AlreadyConnected {
                session: self.shared.name.clone(),
            });
        }
        if state.run_state != RunState::NotStarted {
            return Err(ConnectionError::AlreadyRun {
                session: self.shared.name.clone(),
                state: state.run_state,
            });
        }
        state.client = Some(handle);
        state.run_state = RunState::Starting;
        state.revision += 1;
        Ok(())
    }

    pub(crate) fn detach_client(&self) {
        self.lock().client = None;
    }

    // ---
    // Lifecycle queries
    // ---

    /// The session's lifecycle state.
    pub fn run_state(&self) -> RunState {
        self.lock().run_state
    }

    /// Returns true while waiting for the runner.
    pub fn is_starting(&self) -> bool {
        self.run_state() == RunState::Starting
    }

    /// Returns true while the run is in progress.
    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }

    /// Returns true if the run was stopped or terminated.
    pub fn is_stopped(&self) -> bool {
        matches!(self.run_state(), RunState::Stopped | RunState::Terminated)
    }

    /// Returns true while a debug-mode runner configured to stay alive is
    /// still connected. Only kept-alive sessions can rerun tests.
    pub fn is_kept_alive(&self) -> bool {
        self.lock().is_kept_alive(&self.shared.launch)
    }

    /// The run counters.
    pub fn counters(&self) -> RunCounters {
        self.lock().counters
    }

    /// When the run started, if it has.
    pub fn start_time(&self) -> Option<DateTime<FixedOffset>> {
        self.lock().stopwatch.as_ref().map(Stopwatch::start_time)
    }

    /// How long the run took, measured locally. Still ticking while the run is
    /// in progress.
    pub fn run_duration(&self) -> Option<Duration> {
        self.lock().stopwatch.as_ref().map(Stopwatch::elapsed)
    }

    // ---
    // Tree queries
    // ---

    /// The result of the root.
    ///
    /// With `include_children` this can be answered without swapping the tree
    /// back in.
    pub fn test_result(&self, include_children: bool) -> TestResult {
        if include_children
            && let TreeSlot::SwappedOut { result } = &self.lock().tree
        {
            return *result;
        }
        self.with_tree(|tree| tree.root().result(include_children))
    }

    /// The status of the root.
    pub fn status(&self) -> Status {
        self.with_tree(|tree| tree.root().status())
    }

    /// The progress of the run: [`ProgressState::Stopped`] once the run was
    /// stopped or terminated, otherwise the progress of the root.
    pub fn progress_state(&self) -> ProgressState {
        if self.is_stopped() {
            return ProgressState::Stopped;
        }
        self.with_tree(|tree| tree.root().progress_state())
    }

    /// The elapsed time of the whole run in seconds, once known.
    pub fn elapsed_seconds(&self) -> Option<f64> {
        self.with_tree(|tree| tree.root().elapsed_seconds())
    }

    /// A copy of the root element.
    pub fn test_root(&self) -> TestElement {
        self.with_tree(|tree| tree.root().clone())
    }

    /// A copy of the whole tree.
    pub fn tree_snapshot(&self) -> TestTree {
        self.with_tree(TestTree::clone)
    }

    /// Runs `f` against the tree, swapping it in first if needed.
    ///
    /// The session lock is held while `f` runs, so `f` must not call back into
    /// the session.
    pub fn with_tree<R>(&self, f: impl FnOnce(&TestTree) -> R) -> R {
        self.with_live_tree(|_, tree| f(tree))
    }

    /// Copies of the children of the element with the given id.
    pub fn children(&self, id: &str) -> Vec<TestElement> {
        self.with_tree(|tree| match tree.index_of(id) {
            Some(index) => tree.children(index).cloned().collect(),
            None => Vec::new(),
        })
    }

    /// A copy of the element with the given id.
    pub fn element_by_id(&self, id: &str) -> Option<TestElement> {
        self.with_tree(|tree| tree.element_by_id(id).cloned())
    }

    /// Copies of every element that failed or errored, in pre-order.
    pub fn failed_test_elements(&self) -> Vec<TestElement> {
        self.with_tree(|tree| tree.failed_elements().into_iter().cloned().collect())
    }

    // ---
    // Transcripts and swapping
    // ---

    /// Writes the session to a transcript file.
    pub fn export_to_file(&self, path: &Utf8Path) -> Result<(), TranscriptExportError> {
        let bytes =
            self.with_live_tree(|state, tree| self.transcript_run(state, tree).to_bytes())?;
        write_file(path, &bytes)?;
        info!("exported session {} to {path}", self.shared.name);
        Ok(())
    }

    /// The file the tree is written to while swapped out.
    pub fn swap_file_path(&self) -> Utf8PathBuf {
        self.shared.swap_dir.join(format!("{}.xml", self.shared.id))
    }

    /// Returns true if the tree is currently on disk.
    pub fn is_swapped_out(&self) -> bool {
        matches!(self.lock().tree, TreeSlot::SwappedOut { .. })
    }

    /// Writes the tree to disk and drops it from memory.
    ///
    /// Returns false without doing anything if the run is in progress, the
    /// runner is kept alive, or a listener objects. Failures are logged and
    /// leave the tree in memory.
    pub fn swap_out(&self) -> bool {
        let listeners = {
            let state = self.lock();
            if !state.can_swap_out(&self.shared.launch) {
                return false;
            }
            state.listener_snapshot()
        };
        if !listeners.iter().all(|listener| listener.accepts_swap_to_disk()) {
            debug!("a listener vetoed swapping out session {}", self.shared.name);
            return false;
        }

        let (bytes, revision, result) = {
            let state = self.lock();
            if !state.can_swap_out(&self.shared.launch) {
                return false;
            }
            let TreeSlot::Live(live) = &state.tree else {
                return false;
            };
            match self.transcript_run(&state, &live.tree).to_bytes() {
                Ok(bytes) => (bytes, state.revision, live.tree.root().result(true)),
                Err(error) => {
                    warn!(
                        "failed to swap out session {}: {}",
                        self.shared.name,
                        DisplayErrorChain::new(error),
                    );
                    return false;
                }
            }
        };

        let path = self.swap_file_path();
        if let Err(error) = std::fs::create_dir_all(&self.shared.swap_dir) {
            warn!(
                "failed to create swap directory {}: {error}",
                self.shared.swap_dir,
            );
            return false;
        }
        if let Err(error) = write_file(&path, &bytes) {
            warn!(
                "failed to swap out session {}: {}",
                self.shared.name,
                DisplayErrorChain::new(error),
            );
            return false;
        }

        let mut state = self.lock();
        if state.revision != revision || !state.can_swap_out(&self.shared.launch) {
            drop(state);
            debug!("session {} changed while swapping out", self.shared.name);
            remove_swap_file(&path);
            return false;
        }
        state.tree = TreeSlot::SwappedOut { result };
        debug!("swapped out session {} to {path}", self.shared.name);
        true
    }

    fn ensure_swapped_in(&self) {
        if !self.is_swapped_out() {
            return;
        }

        let path = self.swap_file_path();
        let options = ImportOptions {
            progress_interval: self.shared.progress_interval,
            root_name: self.shared.name.clone(),
        };
        let tree = match read_transcript_file(&path, &options, &NoopMonitor) {
            Ok(imported) => imported.tree,
            Err(error) => {
                warn!(
                    "failed to swap in session {}, starting from an empty tree: {}",
                    self.shared.name,
                    DisplayErrorChain::new(error),
                );
                TestTree::new(self.shared.name.clone())
            }
        };

        let mut state = self.lock();
        if let TreeSlot::SwappedOut { .. } = state.tree {
            state.tree = TreeSlot::Live(LiveTree::new(tree));
            drop(state);
            debug!("swapped in session {} from {path}", self.shared.name);
            remove_swap_file(&path);
        }
    }

    fn with_live_tree<R>(&self, f: impl FnOnce(&SessionState, &TestTree) -> R) -> R {
        self.ensure_swapped_in();
        let state = self.lock();
        match &state.tree {
            TreeSlot::Live(live) => f(&state, &live.tree),
            // Swapped out again since the check above.
            TreeSlot::SwappedOut { .. } => f(&state, &TestTree::new(self.shared.name.clone())),
        }
    }

    fn transcript_run<'a>(
        &'a self,
        state: &'a SessionState,
        tree: &'a TestTree,
    ) -> TranscriptRun<'a> {
        TranscriptRun {
            name: &self.shared.name,
            project: self.shared.project.as_deref(),
            counters: state.counters,
            include_tags: state.include_tags.as_deref(),
            exclude_tags: state.exclude_tags.as_deref(),
            tree,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TestRunSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRunSession")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

fn import_options(config: &SessionConfig) -> ImportOptions {
    ImportOptions {
        progress_interval: config.import.progress_interval,
        root_name: config.session.name.clone(),
    }
}

fn remove_swap_file(path: &Utf8Path) {
    if let Err(error) = std::fs::remove_file(path) {
        debug!("failed to remove swap file {path}: {error}");
    }
}

impl SessionState {
    fn listener_snapshot(&self) -> ListenerSnapshot {
        self.listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    fn is_kept_alive(&self, launch: &LaunchConfig) -> bool {
        self.client.as_ref().is_some_and(RunnerHandle::is_connected)
            && launch.mode == LaunchMode::Debug
            && launch.keep_alive
    }

    fn can_swap_out(&self, launch: &LaunchConfig) -> bool {
        matches!(self.tree, TreeSlot::Live(_))
            && !matches!(self.run_state, RunState::Starting | RunState::Running)
            && !self.is_kept_alive(launch)
    }

    fn apply_event(&mut self, event: ProtocolEvent, now: f64) -> Vec<Notification> {
        self.revision += 1;
        match event {
            ProtocolEvent::RunStarted {
                test_count,
                version,
            } => {
                debug!("run started with {test_count} tests, protocol {version}");
                self.counters = RunCounters {
                    total: test_count,
                    ..Default::default()
                };
                self.run_state = RunState::Running;
                self.stopwatch = Some(stopwatch());
                vec![Notification::SessionStarted]
            }
            ProtocolEvent::RunEnded { elapsed } => {
                self.finish_run(RunState::Ended, elapsed);
                vec![Notification::SessionEnded(elapsed)]
            }
            ProtocolEvent::RunStopped { elapsed } => {
                self.finish_run(RunState::Stopped, elapsed);
                vec![Notification::SessionStopped(elapsed)]
            }
            ProtocolEvent::RunTerminated => {
                if !matches!(self.run_state, RunState::Starting | RunState::Running) {
                    debug!("connection closed after the run {}", self.run_state);
                    return Vec::new();
                }
                self.finish_run(RunState::Terminated, None);
                vec![Notification::SessionTerminated]
            }
            event => {
                let TreeSlot::Live(LiveTree { tree, builder }) = &mut self.tree else {
                    warn!("session is swapped out, ignoring {event:?}");
                    return Vec::new();
                };
                let mut cx = EventContext {
                    tree,
                    builder,
                    counters: &mut self.counters,
                    now,
                    notifications: Vec::new(),
                };
                cx.apply(event);
                cx.notifications
            }
        }
    }

    fn finish_run(&mut self, run_state: RunState, elapsed: Option<Duration>) {
        self.run_state = run_state;
        if let Some(stopwatch) = &mut self.stopwatch {
            stopwatch.stop();
        }
        if let TreeSlot::Live(live) = &mut self.tree {
            live.builder.finish();
            if let Some(elapsed) = elapsed {
                live.tree
                    .set_elapsed_seconds(ElementIndex::ROOT, elapsed.as_secs_f64());
            }
        }
    }
}

/// Per-event view of the parts of the session state that events mutate.
struct EventContext<'a> {
    tree: &'a mut TestTree,
    builder: &'a mut TreeBuilder,
    counters: &'a mut RunCounters,
    now: f64,
    notifications: Vec<Notification>,
}

impl EventContext<'_> {
    fn apply(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::TreeEntry(entry) => self.tree_entry(entry),
            ProtocolEvent::TestStarted { test_id, test_name } => {
                self.test_started(&test_id, &test_name)
            }
            ProtocolEvent::TestEnded {
                test_id,
                test_name,
                ignored,
            } => self.test_ended(&test_id, &test_name, ignored),
            ProtocolEvent::TestFailed {
                status,
                test_id,
                test_name,
                assumption_failure,
                trace,
                expected,
                actual,
            } => {
                let index = self.element_or_unrooted(&test_id, &test_name);
                let status = if assumption_failure {
                    self.tree.set_assumption_failed(index, true);
                    self.counters.assumption_failures += 1;
                    Status::Ok
                } else {
                    status
                };
                self.register_failure(
                    index,
                    status,
                    Some(trace.clone()),
                    expected.clone(),
                    actual.clone(),
                );
                self.notifications.push(Notification::TestFailed {
                    element: self.tree[index].clone(),
                    status,
                    trace,
                    expected,
                    actual,
                });
            }
            ProtocolEvent::TestReran {
                test_id,
                class_name,
                test_name,
                status,
                trace,
                expected,
                actual,
            } => {
                let Some(index) = self.case_index(&test_id) else {
                    warn!("rerun of unknown test {test_id} ({class_name} {test_name})");
                    return;
                };
                self.register_failure(
                    index,
                    status,
                    trace.clone(),
                    expected.clone(),
                    actual.clone(),
                );
                self.notifications.push(Notification::TestReran {
                    element: self.tree[index].clone(),
                    status,
                    trace,
                    expected,
                    actual,
                });
            }
            ProtocolEvent::RunStarted { .. }
            | ProtocolEvent::RunEnded { .. }
            | ProtocolEvent::RunStopped { .. }
            | ProtocolEvent::RunTerminated => {}
        }
    }

    fn tree_entry(&mut self, entry: TreeEntry) {
        let added = self.builder.add_entry(self.tree, entry);
        if let Some(suite) = added.unrooted_suite {
            self.notifications
                .push(Notification::TestAdded(self.tree[suite].clone()));
        }
        self.notifications
            .push(Notification::TestAdded(self.tree[added.index].clone()));
    }

    fn test_started(&mut self, test_id: &str, test_name: &str) {
        let index = self.element_or_unrooted(test_id, test_name);
        if self.counters.started == 0 {
            self.notifications.push(Notification::RunningBegins);
        }
        let element = &self.tree[index];
        if element.is_suite() {
            warn!("runner started suite {test_id} as if it were a test");
            return;
        }
        let dynamic = element.is_dynamic_test();

        self.tree.set_status_at(index, Status::Running, self.now);
        self.counters.started += 1;
        if dynamic {
            self.counters.total += 1;
        }
        self.notifications
            .push(Notification::TestStarted(self.tree[index].clone()));
    }

    fn test_ended(&mut self, test_id: &str, test_name: &str, ignored: bool) {
        let index = self.element_or_unrooted(test_id, test_name);
        if self.tree[index].is_suite() {
            warn!("runner ended suite {test_id} as if it were a test");
            return;
        }
        if ignored {
            self.tree.set_ignored(index, true);
            self.counters.ignored += 1;
        }
        if self.tree[index].own_status() == Status::Running {
            self.tree.set_status_at(index, Status::Ok, self.now);
        }
        self.notifications
            .push(Notification::TestEnded(self.tree[index].clone()));
    }

    fn register_failure(
        &mut self,
        index: ElementIndex,
        status: Status,
        trace: Option<String>,
        expected: Option<String>,
        actual: Option<String>,
    ) {
        self.tree
            .set_failure(index, status, trace, expected, actual, self.now);
        self.counters.count_failure(&self.tree[index], status);
    }

    fn case_index(&self, test_id: &str) -> Option<ElementIndex> {
        let index = self.tree.index_of(test_id)?;
        if self.tree[index].is_suite() {
            warn!("expected {test_id} to be a test, found a suite");
            return None;
        }
        Some(index)
    }

    /// Looks up an element, creating an unrooted case if nobody announced it.
    fn element_or_unrooted(&mut self, test_id: &str, test_name: &str) -> ElementIndex {
        if let Some(index) = self.tree.index_of(test_id) {
            return index;
        }
        debug!("test {test_id} ({test_name}) wasn't announced, adding it as unrooted");
        let added = self.builder.add_unrooted_case(self.tree, test_id, test_name);
        if let Some(suite) = added.unrooted_suite {
            self.notifications
                .push(Notification::TestAdded(self.tree[suite].clone()));
        }
        self.notifications
            .push(Notification::TestAdded(self.tree[added.index].clone()));
        added.index
    }
}
