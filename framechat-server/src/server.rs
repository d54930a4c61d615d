//! TCP server implementation.

use crate::config::Config;
use crate::error::ServerError;
use crate::event::{EventReceiver, EventSender, ServerEvent};
use crate::metrics::Metrics;
use crate::registry::{PeerInfo, PeerRegistry};
use crate::routing::{Destination, RouteReport, Router, DEFAULT_WRITE_TIMEOUT};
use bytes::Bytes;
use framechat_protocol::{
    default_save_path, AttachmentOffer, Connection, Decoder, Disposition, Frame, FrameKind,
    FrameReader, OfferId, PeerId, PendingAttachments, ReadOutcome, Resolution,
    DEFAULT_MAX_PAYLOAD, DEFAULT_PORT, DEFAULT_READ_BUFFER_SIZE,
};
use std::borrow::Cow;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Size of each socket read.
    pub read_buffer_size: usize,
    /// Largest accepted frame body, in bytes.
    pub max_payload: u64,
    /// Attachments one peer may have waiting for a disposition.
    pub max_pending_attachments: usize,
    /// How long one peer may take to accept an outbound frame.
    pub write_timeout: Duration,
    /// Directory for accepted attachments without an explicit path.
    pub download_dir: PathBuf,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("max_payload", &self.max_payload)
            .field("max_pending_attachments", &self.max_pending_attachments)
            .field("write_timeout", &self.write_timeout)
            .field("download_dir", &self.download_dir)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 1000,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_payload: DEFAULT_MAX_PAYLOAD,
            max_pending_attachments: DEFAULT_MAX_PENDING_ATTACHMENTS,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            download_dir: PathBuf::from("./downloads"),
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds the runtime configuration from loaded settings.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.network.bind_addr)
            .with_max_connections(config.network.max_connections)
            .with_read_buffer_size(config.network.read_buffer_size)
            .with_max_payload(config.limits.max_payload())
            .with_max_pending_attachments(config.limits.max_pending_attachments)
            .with_write_timeout(config.network.write_timeout())
            .with_download_dir(config.attachments.download_dir.clone())
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_max_payload(mut self, max: u64) -> Self {
        self.max_payload = max;
        self
    }

    pub fn with_max_pending_attachments(mut self, max: usize) -> Self {
        self.max_pending_attachments = max;
        self
    }

    pub fn with_write_timeout(mut self, limit: Duration) -> Self {
        self.write_timeout = limit;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Default number of attachments one peer may have waiting.
pub const DEFAULT_MAX_PENDING_ATTACHMENTS: usize = 16;

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,
    pub errors_total: AtomicU64,
}

/// State shared between the server handle and every reader task.
struct Shared {
    registry: Arc<PeerRegistry>,
    pending: PendingAttachments,
    max_pending: usize,
    events: EventSender,
    stats: ServerStats,
    metrics: Option<Arc<Metrics>>,
}

impl Shared {
    fn emit(&self, event: ServerEvent) {
        // Nobody listening is not an error
        let _ = self.events.send(event);
    }

    fn update_pending_gauge(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.pending_attachments.set(self.pending.len() as f64);
        }
    }

    fn on_frame(&self, id: PeerId, frame: Frame) {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        if let Some(ref metrics) = self.metrics {
            metrics
                .frames_received_total
                .with_label_values(&[frame.kind.tag()])
                .inc();
        }

        if let Err(e) = frame.validate() {
            tracing::warn!("[peer {}] {}", id, e);
        }

        match frame.kind {
            FrameKind::Message => {
                let text = frame.text();
                if let Cow::Owned(_) = text {
                    tracing::warn!("[peer {}] Message is not valid UTF-8, decoded lossily", id);
                }
                tracing::debug!("[peer {}] Message ({} bytes)", id, frame.payload.len());
                let text = text.into_owned();
                self.emit(ServerEvent::MessageReceived { from: id, text });
            }
            FrameKind::Attachment => {
                let file_name = frame.name.clone().unwrap_or_default();
                let size = frame.declared_size;
                let offer = match self.pending.park_limited(id, frame, self.max_pending) {
                    Ok(offer) => offer,
                    Err(e) => {
                        tracing::warn!("[peer {}] Dropping attachment {}: {}", id, file_name, e);
                        self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                        self.emit(ServerEvent::AttachmentRejected {
                            from: id,
                            file_name,
                            size,
                        });
                        return;
                    }
                };
                tracing::info!(
                    "[peer {}] Attachment offered as #{}: {} ({} bytes)",
                    id,
                    offer.id,
                    offer.file_name,
                    offer.size
                );
                self.update_pending_gauge();
                self.emit(ServerEvent::AttachmentOffered(offer));
            }
            FrameKind::Descriptor => {
                tracing::warn!("[peer {}] Ignoring descriptor frame from client", id);
            }
        }
    }

    /// Reports how a connection ended and evicts it.
    fn finish(&self, id: PeerId, outcome: ReadOutcome) {
        match outcome.error_kind() {
            Some(kind) => {
                tracing::warn!("[peer {}] Connection error ({}): {}", id, kind, outcome);
                self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                if let Some(ref metrics) = self.metrics {
                    metrics
                        .errors_total
                        .with_label_values(&[&kind.to_string()])
                        .inc();
                }
                self.emit(ServerEvent::ConnectionError {
                    id,
                    kind,
                    message: outcome.to_string(),
                });
            }
            None => tracing::debug!("[peer {}] Connection {}", id, outcome),
        }

        self.emit(ServerEvent::Disconnected { id });

        if self.registry.remove(id).is_some() {
            self.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            if let Some(ref metrics) = self.metrics {
                metrics.connections_active.dec();
            }
            let dropped = self.pending.discard_from(id);
            if dropped > 0 {
                tracing::info!("[peer {}] Dropped {} unresolved attachment(s)", id, dropped);
                self.update_pending_gauge();
            }
            tracing::info!("[peer {}] Left", id);
            self.emit(ServerEvent::PeerLeft { id });
        }
    }
}

/// TCP server for framechat.
pub struct Server {
    config: ServerConfig,
    shared: Arc<Shared>,
    router: Router,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server and the receiver for its events.
    pub fn new(config: ServerConfig) -> (Self, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let registry = Arc::new(PeerRegistry::new());
        let shared = Arc::new(Shared {
            registry: registry.clone(),
            pending: PendingAttachments::new(),
            max_pending: config.max_pending_attachments,
            events,
            stats: ServerStats::default(),
            metrics: config.metrics.clone(),
        });
        let router = Router::new(registry).with_write_timeout(config.write_timeout);
        let server = Self {
            config,
            shared,
            router,
            shutdown,
            running: AtomicBool::new(false),
        };
        (server, receiver)
    }

    /// Binds the configured listening address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr,
                source,
            })
    }

    /// Runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accepts connections from `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", local_addr);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!("[{}] Failed to set TCP_NODELAY: {}", addr, e);
                            }
                            if let Err(e) = self.accept_connection(stream, addr).await {
                                tracing::warn!("[{}] Connection rejected: {}", addr, e);
                            }
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {}
            }
        }

        tracing::info!("Server shutting down");
        self.close_all().await;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Registers a newly accepted stream.
    ///
    /// Assigns the next identity, sends it to the peer in a descriptor frame,
    /// registers the connection and starts its reader task.
    pub async fn accept_connection<S>(&self, stream: S, addr: SocketAddr) -> Result<PeerId, ServerError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if *self.shutdown.borrow() {
            return Err(ServerError::ShuttingDown);
        }
        if self.shared.registry.len() >= self.config.max_connections {
            self.shared.stats.errors_total.fetch_add(1, Ordering::Relaxed);
            return Err(ServerError::ConnectionLimit(addr));
        }

        let (connection, read_half) = Connection::split(stream);
        let id = self.shared.registry.allocate_id();

        if let Err(e) = connection.send(&Frame::descriptor(id)).await {
            connection.close().await;
            return Err(e.into());
        }
        self.shared.registry.insert(id, connection.clone(), addr);

        self.shared.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.shared.stats.connections_active.fetch_add(1, Ordering::Relaxed);
        if let Some(ref metrics) = self.config.metrics {
            metrics.connections_total.inc();
            metrics.connections_active.inc();
        }

        tracing::info!("[peer {}] Joined from {}", id, addr);
        self.shared.emit(ServerEvent::PeerJoined { id, addr });

        let shared = self.shared.clone();
        let reader = FrameReader::new(Decoder::new().with_max_payload(self.config.max_payload));
        let buffer_size = self.config.read_buffer_size;
        tokio::spawn(async move {
            let outcome = connection
                .read_frames(read_half, reader, buffer_size, |frame| {
                    shared.on_frame(id, frame)
                })
                .await;
            shared.finish(id, outcome);
        });

        Ok(id)
    }

    /// Sends a text message.
    pub async fn send_message(
        &self,
        destination: Destination,
        text: &str,
    ) -> Result<RouteReport, ServerError> {
        self.send_frame(destination, &Frame::message(text)).await
    }

    /// Sends an attachment.
    pub async fn send_attachment(
        &self,
        destination: Destination,
        file_name: &str,
        payload: Bytes,
    ) -> Result<RouteReport, ServerError> {
        let frame = Frame::attachment(file_name, payload)?;
        self.send_frame(destination, &frame).await
    }

    /// Reads a file and sends it as an attachment named after its final
    /// path component.
    pub async fn send_file(
        &self,
        destination: Destination,
        path: &Path,
    ) -> Result<RouteReport, ServerError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("'{}' has no usable file name", path.display()),
                )
            })?;
        let payload = tokio::fs::read(path).await?;
        self.send_attachment(destination, file_name, Bytes::from(payload))
            .await
    }

    async fn send_frame(
        &self,
        destination: Destination,
        frame: &Frame,
    ) -> Result<RouteReport, ServerError> {
        let report = self.router.route(destination, frame).await?;

        let sent = report.delivered.len() as u64;
        self.shared.stats.frames_sent.fetch_add(sent, Ordering::Relaxed);
        if let Some(ref metrics) = self.config.metrics {
            metrics
                .frames_sent_total
                .with_label_values(&[frame.kind.tag()])
                .inc_by(sent as f64);
            metrics
                .route_failures_total
                .inc_by(report.failed.len() as f64);
        }

        Ok(report)
    }

    /// Forcibly closes a peer's connection. Its reader task evicts it.
    pub async fn disconnect(&self, id: PeerId) -> Result<(), ServerError> {
        let connection = self
            .shared
            .registry
            .get(id)
            .ok_or(ServerError::PeerNotFound(id))?;
        tracing::info!("[peer {}] Disconnecting", id);
        connection.close().await;
        Ok(())
    }

    /// Returns a parked attachment.
    pub fn pending_offer(&self, id: OfferId) -> Option<AttachmentOffer> {
        self.shared.pending.get(id)
    }

    /// Returns where an accepted attachment lands by default.
    pub fn save_path_for(&self, offer: &AttachmentOffer) -> PathBuf {
        default_save_path(&self.config.download_dir, &offer.file_name)
    }

    /// Accepts or discards a parked attachment.
    pub async fn resolve_attachment(
        &self,
        id: OfferId,
        disposition: Disposition,
    ) -> Result<Resolution, ServerError> {
        let result = self.shared.pending.resolve(id, disposition).await;
        self.shared.update_pending_gauge();
        Ok(result?)
    }

    /// Lists registered peers.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.shared.registry.list()
    }

    /// Closes every live connection.
    pub async fn close_all(&self) {
        for (id, connection) in self.shared.registry.snapshot() {
            tracing::debug!("[peer {}] Closing", id);
            connection.close().await;
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns a receiver that flips to `true` on shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.shared.stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
