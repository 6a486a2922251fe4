//! Worker thread and its control channel
//!
//! The session runs on a dedicated OS thread. Commands reach it through a
//! bounded tokio channel (capacity [`COMMAND_QUEUE_CAPACITY`]); events come
//! back on an unbounded one so the worker never blocks on reporting.

pub mod protocol;
pub mod server;
pub mod session;

#[cfg(test)]
mod tests;

use anyhow::{anyhow, Context, Result};
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info};

pub use protocol::{Command, Event, ProtocolError, Status};
pub use session::{Control, RunState, Session};

pub const COMMAND_QUEUE_CAPACITY: usize = 2;

/// Async side of a running worker
pub struct WorkerHandle {
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedReceiver<Event>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Queue a command; waits while the queue is full
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("worker has shut down"))
    }

    /// Next event, `None` once the worker has exited
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Close the command queue and wait for the thread to exit
    pub async fn shutdown(self) -> Result<()> {
        let WorkerHandle {
            commands, thread, ..
        } = self;
        drop(commands);
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .context("Failed to join worker thread")?
            .map_err(|_| anyhow!("worker thread panicked"))
    }
}

/// Control backed by the worker's channels
struct ChannelControl<'a> {
    commands: &'a mut mpsc::Receiver<Command>,
    events: &'a mpsc::UnboundedSender<Event>,
}

impl Control for ChannelControl<'_> {
    fn poll(&mut self) -> Option<Command> {
        match self.commands.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) => None,
            // Nobody left to resume us
            Err(TryRecvError::Disconnected) => Some(Command::Stop),
        }
    }

    fn emit(&mut self, event: Event) {
        // The receiver only goes away on shutdown
        let _ = self.events.send(event);
    }
}

/// Move `session` onto its own thread and return the handle driving it
pub fn spawn_worker(session: Session) -> Result<WorkerHandle> {
    let (command_tx, mut command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let name = format!("stepscript-{}", session.id());
    let thread = std::thread::Builder::new()
        .name(name)
        .spawn(move || worker_loop(session, &mut command_rx, &event_tx))
        .context("Failed to spawn worker thread")?;

    Ok(WorkerHandle {
        commands: command_tx,
        events: event_rx,
        thread,
    })
}

fn worker_loop(
    mut session: Session,
    commands: &mut mpsc::Receiver<Command>,
    events: &mpsc::UnboundedSender<Event>,
) {
    info!(session = %session.id(), "worker started");
    while let Some(command) = commands.blocking_recv() {
        let mut control = ChannelControl {
            commands: &mut *commands,
            events,
        };
        session.handle(command, &mut control);
        while let Some(deferred) = session.next_deferred() {
            debug!(session = %session.id(), command = %deferred, "running deferred command");
            session.handle(deferred, &mut control);
        }
    }
    info!(session = %session.id(), "worker exited");
}
