//! The relay itself: accept loop, per-connection session state machine, and
//! command dispatch.
//!
//! Every accepted socket gets its own task that drives one connection through
//! verification, the active read loop, and close. Sessions share nothing but
//! the [`Registry`]; a failure inside one session never reaches another
//! session or the accept loop.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    select,
    time::{Instant, timeout_at},
};
use tracing::{debug, info, warn};

use crate::{
    command::Command,
    frame::read_message,
    registry::{ConnectionHandle, Registry},
};

/// First handshake token a client must send.
pub const VERIFY_KEYWORD: &str = "CONNECT";
/// Reply sent once a connection is verified and registered.
pub const SUCCESS_REPLY: &str = "SUCCESS";
/// Display identity used when the handshake carries no username.
pub const DEFAULT_IDENTITY: &str = "anonymous";

/// Idle window applied when the caller does not configure one.
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(300);

type RelayRegistry = Registry<OwnedWriteHalf>;
type SessionHandle = ConnectionHandle<OwnedWriteHalf>;

pub struct Relay {
    listener: TcpListener,
    registry: Arc<RelayRegistry>,
    idle_window: Duration,
}

impl Relay {
    pub fn new(listener: TcpListener, idle_window: Duration) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new()),
            idle_window,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay {
            listener,
            registry,
            idle_window,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry, idle_window);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<RelayRegistry>,
    idle_window: Duration,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, registry, idle_window),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &Arc<RelayRegistry>,
    idle_window: Duration,
) {
    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        info!(%peer, "connection request received");
        run_session(stream, peer, registry, idle_window).await;
    });
}

/// Drives one connection from first byte to close: verification, the active
/// loop, then idempotent teardown.
async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<RelayRegistry>,
    idle_window: Duration,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let identity = match verify(&mut reader).await {
        Some(identity) => identity,
        None => {
            // The peer gets no explanation, just a closed socket.
            info!(%peer, "verification failed, closing connection");
            if let Err(error) = writer.shutdown().await {
                debug!(%peer, ?error, "failed to shut down unverified connection");
            }
            return;
        }
    };

    let handle = Arc::new(ConnectionHandle::new(
        registry.next_id(),
        identity,
        peer,
        writer,
    ));
    registry.register(Arc::clone(&handle)).await;
    info!(peer = %handle, "connection verified and registered");

    if let Err(error) = handle.send(SUCCESS_REPLY).await {
        warn!(peer = %handle, ?error, "failed to send verification reply");
    }

    run_active_loop(&mut reader, &handle, &registry, idle_window).await;
    close(&registry, &handle).await;
}

/// Reads the one-shot handshake. `None` means the connection is closed
/// without registering and without a reply.
async fn verify<R>(reader: &mut R) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let message = match read_message(reader).await {
        Ok(Some(message)) => message,
        Ok(None) => return None,
        Err(error) => {
            debug!(?error, "read failed during verification");
            return None;
        }
    };

    let mut tokens = message.split_whitespace();
    if tokens.next() != Some(VERIFY_KEYWORD) {
        return None;
    }
    // Tokens after the username are ignored.
    Some(tokens.next().unwrap_or(DEFAULT_IDENTITY).to_string())
}

#[derive(Debug, PartialEq, Eq)]
enum SessionControl {
    Continue,
    Terminate,
}

async fn run_active_loop<R>(
    reader: &mut R,
    handle: &SessionHandle,
    registry: &RelayRegistry,
    idle_window: Duration,
) where
    R: AsyncBufRead + Unpin,
{
    let mut deadline = Instant::now() + idle_window;

    loop {
        let message = match timeout_at(deadline, read_message(reader)).await {
            Err(_elapsed) => {
                info!(peer = %handle, "idle deadline expired, closing connection");
                break;
            }
            Ok(Ok(Some(message))) => message,
            Ok(Ok(None)) => break,
            Ok(Err(error)) => {
                debug!(peer = %handle, ?error, "read failed, closing connection");
                break;
            }
        };

        match Command::parse(&message) {
            Some(command) => {
                // Commands never extend the idle deadline; only real traffic
                // counts as activity.
                if dispatch(command, handle, registry).await == SessionControl::Terminate {
                    break;
                }
            }
            None => {
                deadline = Instant::now() + idle_window;
                registry.broadcast(handle.id(), &message).await;
            }
        }
    }
}

async fn dispatch(
    command: Command,
    handle: &SessionHandle,
    registry: &RelayRegistry,
) -> SessionControl {
    match command {
        Command::Exit => {
            debug!(peer = %handle, "exit command received");
            SessionControl::Terminate
        }
        Command::Clients => {
            let listing = format!("CLIENTS: {}", registry.list_identities().await.join(", "));
            reply(handle, &listing).await;
            SessionControl::Continue
        }
        Command::Ping => SessionControl::Continue,
        Command::Unknown(name) => {
            debug!(peer = %handle, command = %name, "unknown command");
            reply(handle, &format!("UNKNOWN COMMAND: {name}")).await;
            SessionControl::Continue
        }
    }
}

/// Direct replies share the broadcast engine's failure policy: log and move
/// on, the peer's own read loop notices a dead socket.
async fn reply(handle: &SessionHandle, message: &str) {
    if let Err(error) = handle.send(message).await {
        warn!(peer = %handle, ?error, "failed to send reply");
    }
}

async fn close(registry: &RelayRegistry, handle: &SessionHandle) {
    if registry.remove(handle.id()).await.is_some() {
        info!(peer = %handle, "connection closed");
    }
    if let Err(error) = handle.shutdown().await {
        debug!(peer = %handle, ?error, "failed to shut down connection writer");
    }
}
