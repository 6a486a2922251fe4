//! TCP front end
//!
//! Clients are served one at a time: each line read from the socket is
//! parsed into a [`Command`] and queued for the worker, and every worker
//! event is written back as a line.

use anyhow::{Context, Result};
use std::future::Future;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::protocol::{Command, Event, ProtocolError, Status};
use super::WorkerHandle;

/// Accept clients until `shutdown` completes, then stop the worker
pub async fn serve<F>(listener: TcpListener, mut worker: WorkerHandle, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let addr = listener.local_addr().context("Failed to read listener address")?;
    info!(%addr, "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("Failed to accept connection")?;
                info!(%peer, "client connected");
                match handle_client(stream, &mut worker).await {
                    Ok(()) => info!(%peer, "client disconnected"),
                    Err(err) => warn!(%peer, error = %err, "client failed"),
                }
            }
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    worker.shutdown().await
}

async fn handle_client(stream: TcpStream, worker: &mut WorkerHandle) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from client")? else {
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => {
                        debug!(%command, "received");
                        worker.send(command).await?;
                    }
                    Err(err) => {
                        let reply = Event::Status(rejection(err));
                        write_line(&mut write, &reply).await?;
                    }
                }
            }
            event = worker.recv() => {
                let Some(event) = event else {
                    warn!("worker exited");
                    return Ok(());
                };
                write_line(&mut write, &event).await?;
            }
        }
    }
}

fn rejection(err: ProtocolError) -> Status {
    match err {
        ProtocolError::Breakpoint(_) => Status::BreakpointInvalid,
        other => Status::Error(other.to_string()),
    }
}

async fn write_line<W>(write: &mut W, event: &Event) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let mut line = event.to_string();
    line.push('\n');
    write
        .write_all(line.as_bytes())
        .await
        .context("Failed to write to client")
}
