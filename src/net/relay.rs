//! Gaze relay: fans samples from Source participants out to Sink participants.
//!
//! # Architecture
//!
//! ```text
//! client A (source) ──gaze──▶ relay ──gaze{from:A}──▶ client B (sink)
//!                               │ ──gaze{from:A}──▶ client C (sink)
//!                               └─ assigns ids, announces peer_left
//! ```
//!
//! Each connection gets a reader (on the accepting task) and a writer task
//! fed by a bounded queue. A slow sink loses samples rather than stalling
//! everyone else.

use crate::net::client::DEFAULT_RELAY_PORT;
use crate::net::protocol::{
    decode_line, encode_line, ClientMessage, ClientRole, ConnectionId, Frame, LineCodec,
    RelayMessage,
};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub host: String,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Per-peer outbound queue length
    pub peer_queue: usize,
    /// Time a new connection has to say hello
    pub handshake_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_RELAY_PORT,
            peer_queue: 256,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl RelayConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }
}

struct Peer {
    name: String,
    role: ClientRole,
    outbound: mpsc::Sender<RelayMessage>,
}

/// Shared relay state
struct RelayState {
    peers: RwLock<HashMap<ConnectionId, Peer>>,
    peer_queue: usize,
    handshake_timeout: Duration,
}

impl RelayState {
    /// Deliver `message` to every sink except `except`. Full queues drop it.
    async fn fan_out(&self, except: &ConnectionId, message: RelayMessage) {
        let peers = self.peers.read().await;
        for (id, peer) in peers.iter() {
            if id == except || !peer.role.includes_sink() {
                continue;
            }
            if peer.outbound.try_send(message.clone()).is_err() {
                debug!(peer = %id, "Peer queue full; dropping sample");
            }
        }
    }
}

/// Run the relay.
///
/// Returns the bound address and a sender that shuts the relay down,
/// closing every peer connection.
pub async fn run(config: RelayConfig) -> anyhow::Result<(SocketAddr, oneshot::Sender<()>)> {
    let state = Arc::new(RelayState {
        peers: RwLock::new(HashMap::new()),
        peer_queue: config.peer_queue.max(1),
        handshake_timeout: config.handshake_timeout,
    });

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let actual_addr = listener.local_addr()?;

    info!("Gaze relay listening on {}", actual_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (closing_tx, closing_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::select! {
            _ = accept_loop(listener, state, closing_rx) => {}
            _ = shutdown_rx => {
                info!("Relay shutdown signal received");
            }
        }
        let _ = closing_tx.send(true);
    });

    Ok((actual_addr, shutdown_tx))
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<RelayState>,
    closing: watch::Receiver<bool>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = state.clone();
                let closing = closing.clone();
                tokio::spawn(async move {
                    handle_peer(stream, addr, state, closing).await;
                });
            }
            Err(e) => {
                warn!("Relay accept failed: {}", e);
                // Typically descriptor exhaustion; back off instead of spinning.
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_peer(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<RelayState>,
    mut closing: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let (read, write) = stream.into_split();
    let mut frames = FramedRead::new(read, LineCodec::new());

    let (role, name) = match timeout(state.handshake_timeout, frames.next()).await {
        Ok(Some(Ok(Frame::Line(line)))) => match decode_line::<ClientMessage>(&line) {
            Ok(ClientMessage::Hello { role, name, .. }) => (role, name),
            Ok(_) | Err(_) => {
                warn!(%addr, "Peer did not open with hello; closing");
                return;
            }
        },
        Ok(Some(Ok(Frame::Oversized))) => {
            warn!(%addr, "Peer opened with an oversized line; closing");
            return;
        }
        Ok(None) => return,
        Ok(Some(Err(e))) => {
            debug!(%addr, "Peer read failed during handshake: {}", e);
            return;
        }
        Err(_) => {
            warn!(%addr, "Peer handshake timed out");
            return;
        }
    };

    let id = ConnectionId::generate();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.peer_queue);
    if outbound_tx
        .try_send(RelayMessage::Welcome { id: id.clone() })
        .is_err()
    {
        return;
    }

    info!(peer = %id, %addr, %name, %role, "Peer joined");
    state.peers.write().await.insert(
        id.clone(),
        Peer {
            name,
            role,
            outbound: outbound_tx,
        },
    );

    // Started only once the peer is registered, so a client that has seen
    // its welcome is already receiving fan-out.
    tokio::spawn(write_task(write, outbound_rx));

    loop {
        tokio::select! {
            frame = frames.next() => {
                match frame {
                    Some(Ok(Frame::Line(line))) => handle_line(&state, &id, role, &line).await,
                    Some(Ok(Frame::Oversized)) => {
                        debug!(peer = %id, "Dropping oversized message");
                    }
                    None => break,
                    Some(Err(e)) => {
                        debug!(peer = %id, "Peer read failed: {}", e);
                        break;
                    }
                }
            }
            _ = closing.changed() => break,
        }
    }

    // Dropping the peer drops its queue sender, which ends the writer and
    // closes the socket.
    if let Some(peer) = state.peers.write().await.remove(&id) {
        info!(peer = %id, name = %peer.name, "Peer left");
    }
    state
        .fan_out(&id, RelayMessage::PeerLeft { id: id.clone() })
        .await;
}

async fn handle_line(state: &RelayState, id: &ConnectionId, role: ClientRole, line: &str) {
    match decode_line::<ClientMessage>(line) {
        Ok(ClientMessage::Gaze { x, y }) => {
            if !role.includes_source() {
                debug!(peer = %id, "Dropping gaze from a peer without source role");
                return;
            }
            state
                .fan_out(
                    id,
                    RelayMessage::Gaze {
                        from: id.clone(),
                        x,
                        y,
                    },
                )
                .await;
        }
        Ok(ClientMessage::Hello { .. }) => debug!(peer = %id, "Ignoring repeated hello"),
        Err(e) => debug!(peer = %id, "Dropping malformed message: {}", e),
    }
}

async fn write_task(mut write: OwnedWriteHalf, mut rx: mpsc::Receiver<RelayMessage>) {
    while let Some(message) = rx.recv().await {
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize relay message: {}", e);
                continue;
            }
        };

        if let Err(e) = write.write_all(line.as_bytes()).await {
            debug!("Peer write failed: {}", e);
            break;
        }
    }
    let _ = write.shutdown().await;
}
