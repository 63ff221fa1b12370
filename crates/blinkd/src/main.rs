//! BLINK daemon - RESP key-value server over TCP
//!
//! One listener task accepting connections, one task per connection running
//! a read/parse/dispatch/reply loop against the shared storage engine.

mod handler;
mod resp;

use anyhow::{Context, Result};
use blinkcache::BlinkCache;
use bytes::BytesMut;
use clap::Parser;
use socket2::SockRef;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::handler::CommandHandler;
use crate::resp::RespValue;

/// Maximum concurrent connections - prevents fd exhaustion under flooding
const MAX_CONNECTIONS: usize = 10_000;

/// Initial per-connection buffer size
const READ_CHUNK: usize = 4096;

/// Send buffer size applied to accepted sockets
const SEND_BUFFER: usize = 64 * 1024;

/// Attempts before giving up on a busy listen address
const BIND_ATTEMPTS: u32 = 5;

/// Grace period for connections to finish their replies at shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1:9001")]
    bind: String,

    /// Storage directory (default: disk_storage next to the executable)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Cache capacity (number of entries)
    #[arg(short, long, default_value_t = 10_000)]
    capacity: usize,

    /// Write-behind queue depth
    #[arg(long, default_value_t = 1024)]
    queue_depth: usize,

    /// Fsync the data file on every rewrite
    #[arg(long)]
    fsync: bool,
}

fn default_data_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("disk_storage")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let data_dir = args.data.clone().unwrap_or_else(default_data_dir);

    info!("starting blinkd v{}", env!("CARGO_PKG_VERSION"));
    info!("data directory: {}", data_dir.display());
    info!("cache capacity: {} entries", args.capacity);

    let engine = Arc::new(
        BlinkCache::with_options(&data_dir, args.capacity, args.queue_depth, args.fsync)
            .context("failed to open storage")?,
    );
    let handler = Arc::new(CommandHandler::new(Arc::clone(&engine)));

    let listener = bind_with_retry(&args.bind).await?;
    info!("listening on {}", args.bind);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let exit_requested = Arc::new(Notify::new());
    let limiter = Arc::new(Semaphore::new(MAX_CONNECTIONS));

    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        _ = exit_requested.notified() => info!("EXIT command received, shutting down"),
        _ = accept_loop(&listener, &handler, &limiter, &shutdown_rx, &exit_requested) => {}
    }

    // Stop accepting, then let live connections finish their current reply.
    drop(listener);
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(
        SHUTDOWN_GRACE,
        Arc::clone(&limiter).acquire_many_owned(MAX_CONNECTIONS as u32),
    )
    .await
    .is_err()
    {
        warn!("connections still open after grace period, closing anyway");
    }

    engine.shutdown().context("engine shutdown failed")?;
    info!("shutdown complete");
    Ok(())
}

async fn bind_with_retry(addr: &str) -> Result<TcpListener> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if attempt < BIND_ATTEMPTS => {
                warn!("bind attempt {attempt} failed: {e}, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to bind {addr} after {BIND_ATTEMPTS} attempts")
                })
            }
        }
    }
}

async fn accept_loop(
    listener: &TcpListener,
    handler: &Arc<CommandHandler>,
    limiter: &Arc<Semaphore>,
    shutdown_rx: &watch::Receiver<bool>,
    exit_requested: &Arc<Notify>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let permit = match Arc::clone(limiter).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("connection limit reached, rejecting {addr}");
                        continue;
                    }
                };

                let handler = Arc::clone(handler);
                let shutdown_rx = shutdown_rx.clone();
                let exit_requested = Arc::clone(exit_requested);

                tokio::spawn(async move {
                    let _permit = permit;
                    debug!("connection opened: {addr}");
                    if let Err(e) =
                        handle_client(stream, handler, shutdown_rx, exit_requested).await
                    {
                        debug!("connection {addr} closed with error: {e}");
                    }
                    debug!("connection closed: {addr}");
                });
            }
            Err(e) => error!("accept failed: {e}"),
        }
    }
}

async fn handle_client(
    mut stream: TcpStream,
    handler: Arc<CommandHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
    exit_requested: Arc<Notify>,
) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    if let Err(e) = SockRef::from(&stream).set_send_buffer_size(SEND_BUFFER) {
        warn!("failed to set send buffer size: {e}");
    }

    let mut buffer = BytesMut::with_capacity(READ_CHUNK);
    let mut out = BytesMut::with_capacity(READ_CHUNK);

    loop {
        let n = tokio::select! {
            res = stream.read_buf(&mut buffer) => res?,
            _ = shutdown_rx.changed() => return stream.shutdown().await,
        };
        if n == 0 {
            return Ok(());
        }

        // Drain every complete frame; a trailing partial frame stays in the
        // buffer for the next readiness event.
        loop {
            match RespValue::parse(&mut buffer) {
                Ok(Some(frame)) => {
                    let reply = handler.handle(frame);
                    out.clear();
                    reply.value.encode(&mut out);
                    stream.write_all(&out).await?;

                    if reply.shutdown {
                        exit_requested.notify_one();
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    out.clear();
                    RespValue::Error(format!("ERR {e}")).encode(&mut out);
                    stream.write_all(&out).await?;
                    // The rest of the buffer cannot be trusted after a
                    // malformed frame.
                    buffer.clear();
                    break;
                }
            }
        }
    }
}
