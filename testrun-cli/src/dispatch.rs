// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command dispatch and execution.

use crate::{
    ExpectedError, Result, TestrunExitCode,
    display::{write_summary, write_tree},
    output::{OutputContext, OutputOpts},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Subcommand};
use std::{
    io::{self, BufWriter, Write},
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use testrun_session::{
    config::SessionConfig,
    protocol::ProtocolStream,
    session::{TestRunSession, TestSessionListener},
    status::Status,
    transcript::ImportMonitor,
    tree::TestElement,
};
use tracing::{debug, info, warn};

/// Listen for, replay and inspect remote test runs.
#[derive(Debug, clap::Parser)]
#[command(
    name = "testrun",
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100
)]
pub struct TestrunApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl TestrunApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        match self.command {
            Command::Listen(opts) => opts.exec(output),
            Command::Replay(opts) => opts.exec(output),
            Command::Show(opts) => opts.exec(output),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Wait for a runner to connect and follow its test run
    Listen(ListenOpts),

    /// Decode a captured protocol log as if a runner had sent it
    Replay(ReplayOpts),

    /// Print the tree stored in a transcript
    Show(ShowOpts),
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Session config file
    #[arg(long, value_name = "PATH", env = "TESTRUN_CONFIG")]
    config: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn load(&self) -> Result<SessionConfig> {
        let config = SessionConfig::from_sources(self.config.as_deref())?;
        debug!(
            "loaded session config {:?} (launch mode {:?})",
            config.session.name, config.launch.mode
        );
        Ok(config)
    }
}

#[derive(Debug, Args)]
struct ListenOpts {
    #[clap(flatten)]
    config: ConfigOpts,

    /// Port to listen on [default: from config, 0 picks a free port]
    #[arg(long, short)]
    port: Option<u16>,

    /// Write a transcript of the run to this file
    #[arg(long, short, value_name = "PATH")]
    output: Option<Utf8PathBuf>,
}

impl ListenOpts {
    fn exec(self, output: OutputContext) -> Result<i32> {
        let mut config = self.config.load()?;
        if let Some(port) = self.port {
            config.launch.port = port;
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| ExpectedError::RuntimeCreateError { err })?;

        let session = TestRunSession::new(&config);
        session.add_listener(Arc::new(ProgressListener::new(output.verbose)));

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.launch.port));
        runtime.block_on(async {
            let connection = session.listen(addr).await?;
            info!("waiting for runner on {}", connection.local_addr());
            debug!("session id: {}", session.session_id());

            let interrupt = tokio::spawn({
                let session = session.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupted, terminating test run");
                        session.terminate();
                    }
                }
            });
            connection.join().await;
            interrupt.abort();
            Ok::<_, ExpectedError>(())
        })?;

        finish_session(&session, self.output.as_deref(), output)
    }
}

#[derive(Debug, Args)]
struct ReplayOpts {
    #[clap(flatten)]
    config: ConfigOpts,

    /// Captured protocol log, as sent by a runner
    #[arg(value_name = "LOG")]
    log: Utf8PathBuf,

    /// Write a transcript of the run to this file
    #[arg(long, short, value_name = "PATH")]
    output: Option<Utf8PathBuf>,
}

impl ReplayOpts {
    fn exec(self, output: OutputContext) -> Result<i32> {
        let config = self.config.load()?;
        let bytes = std::fs::read(&self.log).map_err(|err| ExpectedError::LogReadError {
            path: self.log.clone(),
            err,
        })?;

        let session = TestRunSession::new(&config);
        session.add_listener(Arc::new(ProgressListener::new(output.verbose)));
        replay_bytes(&session, &bytes);

        finish_session(&session, self.output.as_deref(), output)
    }
}

#[derive(Debug, Args)]
struct ShowOpts {
    #[clap(flatten)]
    config: ConfigOpts,

    /// Transcript to show
    #[arg(value_name = "TRANSCRIPT")]
    transcript: Utf8PathBuf,
}

impl ShowOpts {
    fn exec(self, output: OutputContext) -> Result<i32> {
        let config = self.config.load()?;
        let monitor = LineCounter::default();
        let session = TestRunSession::import_from_file(&self.transcript, &config, &monitor)?;
        debug!(
            "read {} lines from {}",
            monitor.lines.load(Ordering::Relaxed),
            self.transcript
        );

        let styles = output.stdout_styles();
        let mut writer = BufWriter::new(io::stdout().lock());
        session
            .with_tree(|tree| write_tree(tree, &styles, &mut writer))
            .and_then(|()| writeln!(writer))
            .and_then(|()| write_summary(&session, &styles, &mut writer))
            .and_then(|()| writer.flush())
            .map_err(|err| ExpectedError::WriteOutputError { err })?;

        Ok(exit_code(&session))
    }
}

/// Feeds a captured byte stream through a session, in chunks like a socket
/// would deliver them.
fn replay_bytes(session: &TestRunSession, bytes: &[u8]) {
    const CHUNK_SIZE: usize = 8192;

    let mut stream = ProtocolStream::new();
    for chunk in bytes.chunks(CHUNK_SIZE) {
        stream.feed(chunk, |event| session.handle_event(event));
    }
    stream.finish(|event| session.handle_event(event));
}

fn finish_session(
    session: &TestRunSession,
    transcript: Option<&Utf8Path>,
    output: OutputContext,
) -> Result<i32> {
    let styles = output.stdout_styles();
    let mut writer = BufWriter::new(io::stdout().lock());
    write_summary(session, &styles, &mut writer)
        .and_then(|()| writer.flush())
        .map_err(|err| ExpectedError::WriteOutputError { err })?;

    if let Some(path) = transcript {
        session.export_to_file(path)?;
        info!("wrote transcript to {path}");
    }

    Ok(exit_code(session))
}

fn exit_code(session: &TestRunSession) -> i32 {
    if session.test_result(true).is_failing() {
        TestrunExitCode::TEST_RUN_FAILED
    } else {
        TestrunExitCode::OK
    }
}

/// Logs test progress as the session reports it.
#[derive(Debug)]
struct ProgressListener {
    verbose: bool,
}

impl ProgressListener {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TestSessionListener for ProgressListener {
    fn session_started(&self) {
        info!("test run started");
    }

    fn session_ended(&self, elapsed: Option<Duration>) {
        match elapsed {
            Some(elapsed) => debug!("runner reported {}ms", elapsed.as_millis()),
            None => debug!("runner didn't report an elapsed time"),
        }
    }

    fn session_stopped(&self, _elapsed: Option<Duration>) {
        warn!("test run was stopped");
    }

    fn session_terminated(&self) {
        warn!("runner went away before the test run ended");
    }

    fn test_ended(&self, element: &TestElement) {
        if self.verbose {
            info!("{} {}", element.own_status(), element.label());
        }
    }

    fn test_failed(
        &self,
        element: &TestElement,
        status: Status,
        _trace: &str,
        _expected: Option<&str>,
        _actual: Option<&str>,
    ) {
        if status.is_error_or_failure() {
            info!("{status} {}", element.label());
        }
    }

    fn test_reran(
        &self,
        element: &TestElement,
        status: Status,
        _trace: Option<&str>,
        _expected: Option<&str>,
        _actual: Option<&str>,
    ) {
        info!("reran {}: {status}", element.label());
    }
}

/// Counts transcript lines as they're read.
#[derive(Debug, Default)]
struct LineCounter {
    lines: AtomicUsize,
}

impl ImportMonitor for LineCounter {
    fn worked(&self, lines: usize) {
        self.lines.fetch_add(lines, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use clap::Parser;
    use indoc::indoc;

    #[test]
    fn parses_subcommands() {
        let app =
            TestrunApp::try_parse_from(["testrun", "listen", "--port", "4040", "-o", "out.xml"])
                .expect("valid arguments");
        let opts = match app.command {
            Command::Listen(opts) => opts,
            other => panic!("expected listen, got {other:?}"),
        };
        assert_eq!(opts.port, Some(4040));
        assert_eq!(opts.output.as_deref(), Some(Utf8Path::new("out.xml")));

        let app = TestrunApp::try_parse_from(["testrun", "--color", "never", "show", "run.xml"])
            .expect("valid arguments");
        assert!(matches!(app.command, Command::Show(ref opts) if opts.transcript == "run.xml"));

        TestrunApp::try_parse_from(["testrun", "replay"]).expect_err("replay needs a log");
        TestrunApp::try_parse_from(["testrun", "listen", "--port", "http"])
            .expect_err("port must be a number");
    }

    #[test]
    fn replay_then_show() {
        let dir = Utf8TempDir::new().expect("temp dir");
        let log = dir.path().join("run.log");
        std::fs::write(
            &log,
            indoc! {"
                %TESTC  2 v2
                %TSTTREE1,a(pkg.Foo),false,1,false,-1,,,
                %TSTTREE2,b(pkg.Foo),false,1,false,-1,,,
                %TESTS  1,a(pkg.Foo)
                %TESTE  1,a(pkg.Foo)
                %TESTS  2,b(pkg.Foo)
                %FAILED 2,b(pkg.Foo)
                %TRACES
                boom
                %TRACEE
                %TESTE  2,b(pkg.Foo)
                %RUNTIME12
            "},
        )
        .expect("wrote log");

        let bytes = std::fs::read(&log).expect("read log");
        let config = SessionConfig::default_config().expect("default config is valid");
        let session = TestRunSession::new(&config);
        replay_bytes(&session, &bytes);
        assert_eq!(exit_code(&session), TestrunExitCode::TEST_RUN_FAILED);

        let transcript = dir.path().join("run.xml");
        session.export_to_file(&transcript).expect("exported");
        let imported = TestRunSession::import_from_file(
            &transcript,
            &config,
            &LineCounter::default(),
        )
        .expect("imported");
        assert_eq!(imported.counters(), session.counters());
        assert_eq!(exit_code(&imported), TestrunExitCode::TEST_RUN_FAILED);
    }

    #[test]
    fn line_counter_sees_every_line() {
        let config = SessionConfig::default_config().expect("default config is valid");
        let monitor = LineCounter::default();
        let text = "<testrun name=\"x\">\n<testcase name=\"a\"/>\n</testrun>\n";
        TestRunSession::import_from_str(text, "inline", &config, &monitor).expect("imported");
        assert_eq!(monitor.lines.load(Ordering::Relaxed), 3);
    }
}
