// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The TCP connection to a runner process.
//!
//! A single task accepts the runner's connection and then reads from it,
//! feeding every decoded event to the session on that same task. Commands
//! for the runner go through an unbounded channel to a separate writer task,
//! so that they can be sent from synchronous code.

use super::TestRunSession;
use crate::{
    errors::ConnectionError,
    protocol::{ProtocolStream, RunnerCommand},
};
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 8192;

/// The session's side of a runner connection.
#[derive(Debug)]
pub(crate) struct RunnerHandle {
    commands: mpsc::UnboundedSender<RunnerCommand>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl RunnerHandle {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queues a command. Returns false if the connection is gone.
    pub(crate) fn send(&self, command: RunnerCommand) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.commands.send(command).is_ok()
    }

    pub(crate) fn force_close(&self) {
        self.shutdown.send_replace(true);
    }
}

/// A runner connection being served in the background.
///
/// Dropping this doesn't close the connection; use
/// [`terminate`](Self::terminate) for that.
#[derive(Debug)]
pub struct RunnerConnection {
    local_addr: SocketAddr,
    shutdown: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

impl RunnerConnection {
    /// The address the runner should connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Drops the connection without waiting for the runner. Also stops
    /// waiting if the runner hasn't connected yet.
    pub fn terminate(&self) {
        self.shutdown.send_replace(true);
    }

    /// Waits until the connection is closed and the session has seen the
    /// last event.
    pub async fn join(self) {
        if let Err(error) = self.task.await {
            warn!("runner connection task failed: {error}");
        }
    }
}

impl TestRunSession {
    /// Listens on `addr` for a single runner connection and serves it in the
    /// background.
    ///
    /// The session moves to [`RunState::Starting`](super::RunState::Starting)
    /// right away. Fails if the session already has a runner or has already
    /// run. Must be called from within a Tokio runtime.
    pub async fn listen(&self, addr: SocketAddr) -> Result<RunnerConnection, ConnectionError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|error| ConnectionError::Bind { addr, error })?;
        let local_addr = listener.local_addr().map_err(ConnectionError::LocalAddr)?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);
        let connected = Arc::new(AtomicBool::new(false));

        self.attach_client(RunnerHandle {
            commands: commands_tx,
            connected: connected.clone(),
            shutdown: shutdown.clone(),
        })?;
        info!("session {} listening for runner on {local_addr}", self.name());

        let task = tokio::spawn(serve_connection(
            self.clone(),
            listener,
            commands_rx,
            shutdown_rx,
            connected,
        ));
        Ok(RunnerConnection {
            local_addr,
            shutdown,
            task,
        })
    }
}

async fn serve_connection(
    session: TestRunSession,
    listener: TcpListener,
    commands: mpsc::UnboundedReceiver<RunnerCommand>,
    mut shutdown: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
) {
    let mut protocol = ProtocolStream::new();

    let accepted = tokio::select! {
        accepted = listener.accept() => match accepted {
            Ok((stream, peer)) => {
                info!("runner connected from {peer}");
                Some(stream)
            }
            Err(error) => {
                warn!("failed to accept runner connection: {error}");
                None
            }
        },
        () = shutdown_requested(&mut shutdown) => {
            info!("stopped waiting for runner");
            None
        }
    };
    drop(listener);

    let writer_task = match accepted {
        Some(stream) => {
            connected.store(true, Ordering::SeqCst);
            Some(read_events(&session, stream, commands, &mut shutdown, &mut protocol).await)
        }
        None => None,
    };

    // Each release runs regardless of whether the previous ones did anything.
    connected.store(false, Ordering::SeqCst);
    protocol.finish(|event| session.handle_event(event));
    if let Some(writer_task) = writer_task {
        writer_task.abort();
    }
    session.detach_client();
    debug!("runner connection for session {} closed", session.name());
}

/// Reads until the runner goes away or termination is requested. Returns the
/// writer task so the caller can tear it down.
async fn read_events(
    session: &TestRunSession,
    stream: TcpStream,
    commands: mpsc::UnboundedReceiver<RunnerCommand>,
    shutdown: &mut watch::Receiver<bool>,
    protocol: &mut ProtocolStream,
) -> JoinHandle<()> {
    let (mut reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(write_commands(writer, commands));

    let mut buf = vec![0; READ_BUFFER_SIZE];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("runner closed the connection");
                    break;
                }
                Ok(n) => protocol.feed(&buf[..n], |event| session.handle_event(event)),
                Err(error) => {
                    warn!("failed to read from runner: {error}");
                    break;
                }
            },
            () = shutdown_requested(shutdown) => {
                info!("terminating runner connection");
                break;
            }
        }
    }
    writer_task
}

async fn write_commands(
    mut writer: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<RunnerCommand>,
) {
    while let Some(command) = commands.recv().await {
        debug!("sending {command} to runner");
        let result = async {
            writer.write_all(command.to_wire().as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(error) = result {
            warn!("failed to send {command} to runner: {error}");
            break;
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|&requested| requested).await.is_err() {
        // Every sender is gone, so termination can't be requested anymore.
        std::future::pending::<()>().await;
    }
}
