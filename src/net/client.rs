//! Distribution client: the participant's side of the relay link.
//!
//! One connection attempt per [`DistributionClient::start`]. Every attempt
//! ends in exactly one [`LinkEvent::Closed`], whether the connect failed, the
//! relay dropped us, or [`DistributionClient::stop`] was called; every
//! completed handshake raises exactly one [`LinkEvent::Connected`]. There is
//! no automatic reconnect.

use crate::net::protocol::{
    decode_line, encode_line, ClientMessage, ClientRole, ConnectionId, Frame, GazeEvent,
    LineCodec, Location, RelayMessage,
};
use crate::stats::SharedSessionStats;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

/// Default relay port.
pub const DEFAULT_RELAY_PORT: u16 = 7455;

/// Relay target and role for one participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Relay host name or address
    pub host: String,
    /// Relay port
    pub port: u16,
    /// Directions of gaze traffic this participant takes part in
    pub role: ClientRole,
    /// Bound on connection establishment and on waiting for the welcome
    #[serde(with = "crate::config::duration_serde")]
    pub connect_timeout: Duration,
    /// Outbound queue length; samples beyond it are dropped
    pub send_queue: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_RELAY_PORT,
            role: ClientRole::BOTH,
            connect_timeout: Duration::from_secs(5),
            send_queue: 64,
        }
    }
}

impl LinkConfig {
    pub fn new(host: impl Into<String>, port: u16, role: ClientRole) -> Self {
        Self {
            host: host.into(),
            port,
            role,
            ..Self::default()
        }
    }

    /// `host:port` of the relay.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Notifications raised by the client, on the network context.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Handshake completed; `id` is this connection's relay identity
    Connected { id: ConnectionId },
    /// The connection attempt or connection ended
    Closed,
    /// A remote participant's gaze sample
    SampleReceived {
        from: ConnectionId,
        location: Location,
    },
    /// A remote participant disconnected
    PeerLeft { id: ConnectionId },
}

/// Callback receiving [`LinkEvent`]s.
pub type LinkNotifier = Arc<dyn Fn(LinkEvent) + Send + Sync>;

/// Link errors. Only configuration errors reach callers; the rest end a
/// connection and are logged before the `Closed` notification.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Link configuration can only change while disconnected")]
    Busy,
    #[error("Failed to create network runtime: {0}")]
    Runtime(String),
    #[error("Connection to {0} timed out")]
    Timeout(String),
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Relay closed the connection")]
    ClosedByPeer,
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The network side of the orchestrator.
pub trait GazeLink {
    /// Role advertised on the next (or current) connection.
    fn role(&self) -> ClientRole;

    /// Begin a connection attempt. Completion is signalled asynchronously.
    fn start(&mut self);

    /// Tear down the connection, if any. Idempotent.
    fn stop(&mut self);

    /// Publish a local gaze sample. Never blocks; dropped when it cannot be sent.
    fn send(&self, event: GazeEvent);

    fn is_connected(&self) -> bool;

    /// Whether an attempt or connection is live, so a `Closed` is still to come.
    fn is_busy(&self) -> bool;
}

struct Session {
    outbound: mpsc::Sender<ClientMessage>,
    connected: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Session {
    fn is_live(&self) -> bool {
        !self.finished.load(Ordering::SeqCst)
    }
}

/// Client for publishing to and subscribing from a gaze relay.
pub struct DistributionClient {
    config: LinkConfig,
    notify: LinkNotifier,
    stats: Option<SharedSessionStats>,
    session: Option<Session>,
    /// Task of a stopped session that may still be reporting `Closed`
    retiring: Option<JoinHandle<()>>,
    runtime: tokio::runtime::Runtime,
}

impl DistributionClient {
    /// Create a disconnected client.
    ///
    /// `notify` runs on the client's network thread and must not block.
    pub fn new<F>(config: LinkConfig, notify: F) -> Result<Self, LinkError>
    where
        F: Fn(LinkEvent) + Send + Sync + 'static,
    {
        Self::with_notifier(config, Arc::new(notify))
    }

    /// Create a disconnected client reporting through a shared notifier.
    pub fn with_notifier(config: LinkConfig, notify: LinkNotifier) -> Result<Self, LinkError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("gazecast-link")
            .enable_all()
            .build()
            .map_err(|e| LinkError::Runtime(e.to_string()))?;

        Ok(Self {
            config,
            notify,
            stats: None,
            session: None,
            retiring: None,
            runtime,
        })
    }

    /// Count sent, dropped and received samples into `stats`.
    pub fn with_stats(mut self, stats: SharedSessionStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Set the relay target and role, effective on the next `start`.
    ///
    /// Rejected while a connection attempt or connection is live: the network
    /// context reads these values for the lifetime of a connection.
    pub fn configure(
        &mut self,
        host: impl Into<String>,
        port: u16,
        role: ClientRole,
    ) -> Result<(), LinkError> {
        if self.is_busy() {
            return Err(LinkError::Busy);
        }
        self.config.host = host.into();
        self.config.port = port;
        self.config.role = role;
        Ok(())
    }

    /// Initiate a connection attempt. No-op if one is already live.
    pub fn start(&mut self) {
        if self.is_busy() {
            warn!("Link already started; ignoring start");
            return;
        }

        // The previous session may not have reported `Closed` yet, and must
        // before we report `Connected` for the new one.
        let previous = self
            .session
            .take()
            .map(|session| session.task)
            .or_else(|| self.retiring.take());

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.send_queue.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        info!("Connecting to relay at {}", self.config.address());

        let task = self.runtime.spawn(run_session(
            SessionContext {
                config: self.config.clone(),
                notify: self.notify.clone(),
                stats: self.stats.clone(),
                connected: connected.clone(),
                finished: finished.clone(),
            },
            previous,
            outbound_rx,
            shutdown_rx,
        ));

        self.session = Some(Session {
            outbound: outbound_tx,
            connected,
            finished,
            shutdown: Some(shutdown_tx),
            task,
        });
    }

    /// Tear down the current connection or connection attempt.
    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Some(shutdown) = session.shutdown.take() {
                let _ = shutdown.send(());
            }
            self.retiring = Some(session.task);
        }
    }

    /// Queue a gaze sample for the relay.
    ///
    /// Dropped without error when disconnected, when the role does not include
    /// Source, or when the outbound queue is full (newest sample is dropped).
    pub fn send(&self, event: GazeEvent) {
        let delivered = self.config.role.includes_source()
            && match &self.session {
                Some(session) if session.connected.load(Ordering::SeqCst) => {
                    session.outbound.try_send(event.into()).is_ok()
                }
                _ => false,
            };

        if let Some(ref stats) = self.stats {
            if delivered {
                stats.record_sample_sent();
            } else {
                stats.record_sample_dropped();
            }
        }
    }

    /// Whether a handshake has completed and the connection is still up.
    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.connected.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Whether an attempt or connection is live.
    pub fn is_busy(&self) -> bool {
        self.session.as_ref().map(Session::is_live).unwrap_or(false)
    }
}

impl GazeLink for DistributionClient {
    fn role(&self) -> ClientRole {
        self.config.role
    }

    fn start(&mut self) {
        DistributionClient::start(self)
    }

    fn stop(&mut self) {
        DistributionClient::stop(self)
    }

    fn send(&self, event: GazeEvent) {
        DistributionClient::send(self, event)
    }

    fn is_connected(&self) -> bool {
        DistributionClient::is_connected(self)
    }

    fn is_busy(&self) -> bool {
        DistributionClient::is_busy(self)
    }
}

impl Drop for DistributionClient {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SessionContext {
    config: LinkConfig,
    notify: LinkNotifier,
    stats: Option<SharedSessionStats>,
    connected: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

async fn run_session(
    ctx: SessionContext,
    previous: Option<JoinHandle<()>>,
    outbound: mpsc::Receiver<ClientMessage>,
    shutdown: oneshot::Receiver<()>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let address = ctx.config.address();
    let outcome = tokio::select! {
        result = drive(&ctx, outbound) => result,
        _ = shutdown => {
            debug!("Link stop requested");
            Ok(())
        }
    };

    match outcome {
        Ok(()) => info!("Link to {address} closed"),
        Err(e) => warn!("Link to {address} closed: {e}"),
    }

    ctx.connected.store(false, Ordering::SeqCst);
    ctx.finished.store(true, Ordering::SeqCst);
    (ctx.notify)(LinkEvent::Closed);
}

async fn drive(
    ctx: &SessionContext,
    mut outbound: mpsc::Receiver<ClientMessage>,
) -> Result<(), LinkError> {
    let config = &ctx.config;
    let address = config.address();

    let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| LinkError::Timeout(address.clone()))??;
    stream.set_nodelay(true)?;

    let (read, mut write) = stream.into_split();
    let mut frames = FramedRead::new(read, LineCodec::new());

    let hello = ClientMessage::Hello {
        role: config.role,
        name: local_name(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    write.write_all(encode_line(&hello)?.as_bytes()).await?;

    let id = timeout(config.connect_timeout, await_welcome(&mut frames))
        .await
        .map_err(|_| LinkError::Handshake("no welcome from relay".to_string()))??;

    ctx.connected.store(true, Ordering::SeqCst);
    if let Some(ref stats) = ctx.stats {
        stats.record_connection();
    }
    info!(%id, role = %config.role, "Connected to relay at {address}");
    (ctx.notify)(LinkEvent::Connected { id });

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    return Ok(());
                };
                write.write_all(encode_line(&message)?.as_bytes()).await?;
            }
            frame = frames.next() => {
                match frame {
                    Some(Ok(Frame::Line(line))) => handle_inbound(ctx, &line),
                    Some(Ok(Frame::Oversized)) => debug!("Dropping oversized relay message"),
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(LinkError::ClosedByPeer),
                }
            }
        }
    }
}

async fn await_welcome<R>(
    frames: &mut FramedRead<R, LineCodec>,
) -> Result<ConnectionId, LinkError>
where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = frames.next().await {
        let Frame::Line(line) = frame? else {
            debug!("Dropping oversized handshake line");
            continue;
        };
        match decode_line::<RelayMessage>(&line) {
            Ok(RelayMessage::Welcome { id }) => return Ok(id),
            Ok(other) => debug!(?other, "Ignoring relay message before welcome"),
            Err(e) => debug!("Dropping malformed handshake line: {e}"),
        }
    }
    Err(LinkError::ClosedByPeer)
}

fn handle_inbound(ctx: &SessionContext, line: &str) {
    match decode_line::<RelayMessage>(line) {
        Ok(RelayMessage::Gaze { from, x, y }) => {
            if !ctx.config.role.includes_sink() {
                debug!(%from, "Dropping gaze sample: role does not include sink");
                return;
            }
            if let Some(ref stats) = ctx.stats {
                stats.record_sample_received();
            }
            (ctx.notify)(LinkEvent::SampleReceived {
                from,
                location: Location::new(x, y),
            });
        }
        Ok(RelayMessage::PeerLeft { id }) => (ctx.notify)(LinkEvent::PeerLeft { id }),
        Ok(RelayMessage::Welcome { .. }) => debug!("Ignoring repeated welcome"),
        Err(e) => debug!("Dropping malformed relay message: {e}"),
    }
}

/// Name advertised to the relay.
fn local_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
