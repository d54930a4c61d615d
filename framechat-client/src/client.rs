//! Client session controller.
//!
//! A [`Client`] drives at most one outbound connection. The server announces
//! the identity it assigned in a descriptor frame; messages and attachments
//! that follow are surfaced as [`ClientEvent`]s, with attachments parked until
//! the caller accepts or discards them.

use crate::connection::ConnectionConfig;
use crate::error::ClientError;
use bytes::Bytes;
use framechat_protocol::{
    default_save_path, AttachmentOffer, Connection, Decoder, Disposition, ErrorKind, Frame,
    FrameKind, FrameReader, OfferId, PeerId, PendingAttachments, ProtocolError, ReadOutcome,
    Resolution,
};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

/// Something that happened on the client's connection.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The server told us our identity.
    IdentityAssigned(PeerId),
    MessageReceived { text: String },
    /// An attachment is parked until accepted or discarded.
    AttachmentOffered(AttachmentOffer),
    /// The connection failed and is being closed.
    ConnectionError { kind: ErrorKind, message: String },
    Disconnected,
}

pub type ClientEventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

struct Inner {
    config: ConnectionConfig,
    connection: Mutex<Option<Connection>>,
    identity: watch::Sender<Option<PeerId>>,
    pending: PendingAttachments,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn on_frame(&self, frame: Frame) {
        if let Err(e) = frame.validate() {
            tracing::warn!("{}", e);
        }

        match frame.kind {
            FrameKind::Descriptor => match frame.descriptor_id() {
                Ok(id) => {
                    tracing::info!("Assigned identity {}", id);
                    self.identity.send_replace(Some(id));
                    self.emit(ClientEvent::IdentityAssigned(id));
                }
                Err(e) => tracing::warn!("Ignoring descriptor: {}", e),
            },
            FrameKind::Message => {
                let text = frame.text();
                if let Cow::Owned(_) = text {
                    tracing::warn!("Message is not valid UTF-8, decoded lossily");
                }
                let text = text.into_owned();
                self.emit(ClientEvent::MessageReceived { text });
            }
            FrameKind::Attachment => {
                let offer = self.pending.park(None, frame);
                tracing::info!(
                    "Attachment offered as #{}: {} ({} bytes)",
                    offer.id,
                    offer.file_name,
                    offer.size
                );
                self.emit(ClientEvent::AttachmentOffered(offer));
            }
        }
    }

    fn finish(&self, connection: &Connection, outcome: ReadOutcome) {
        if let Some(kind) = outcome.error_kind() {
            tracing::warn!("Connection error ({}): {}", kind, outcome);
            self.emit(ClientEvent::ConnectionError {
                kind,
                message: outcome.to_string(),
            });
        } else {
            tracing::info!("Connection {}", outcome);
        }

        {
            let mut current = self.connection.lock();
            if current.as_ref().is_some_and(|c| c.same_as(connection)) {
                *current = None;
            }
        }
        self.identity.send_replace(None);
        self.emit(ClientEvent::Disconnected);
    }
}

/// Client for a framechat server.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Creates a new client (not yet connected) and the receiver for its events.
    pub fn new(config: ConnectionConfig) -> (Self, ClientEventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (identity, _) = watch::channel(None);
        let client = Self {
            inner: Arc::new(Inner {
                config,
                connection: Mutex::new(None),
                identity,
                pending: PendingAttachments::new(),
                events,
            }),
        };
        (client, receiver)
    }

    /// Connects to the configured server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        let addr = self.inner.config.address();
        let timeout = self.inner.config.connect_timeout;
        tracing::debug!("Connecting to {}...", addr);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| ClientError::ConnectTimeout {
                addr: addr.clone(),
                timeout,
            })?
            .map_err(|source| ClientError::ConnectFailed {
                addr: addr.clone(),
                source,
            })?;

        stream.set_nodelay(true).ok();
        tracing::info!("Connected to {}", addr);
        self.attach(stream)
    }

    /// Starts a session over an already-established stream.
    pub fn attach<S>(&self, stream: S) -> Result<(), ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (connection, read_half) = Connection::split(stream);
        {
            let mut current = self.inner.connection.lock();
            if current.as_ref().is_some_and(|c| c.is_open()) {
                return Err(ClientError::AlreadyConnected);
            }
            *current = Some(connection.clone());
        }

        let inner = self.inner.clone();
        let reader = FrameReader::new(Decoder::new().with_max_payload(inner.config.max_payload));
        let buffer_size = inner.config.read_buffer_size;
        tokio::spawn(async move {
            let outcome = connection
                .read_frames(read_half, reader, buffer_size, |frame| inner.on_frame(frame))
                .await;
            inner.finish(&connection, outcome);
        });
        Ok(())
    }

    /// Returns whether a connection is open.
    pub fn is_connected(&self) -> bool {
        self.inner
            .connection
            .lock()
            .as_ref()
            .is_some_and(|c| c.is_open())
    }

    /// Returns the identity the server assigned, once known.
    pub fn identity(&self) -> Option<PeerId> {
        *self.inner.identity.borrow()
    }

    /// Waits until the server has assigned an identity.
    pub async fn wait_for_identity(&self, timeout: Duration) -> Option<PeerId> {
        let mut rx = self.inner.identity.subscribe();
        let wait = async {
            rx.wait_for(|id| id.is_some())
                .await
                .ok()
                .and_then(|id| *id)
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    fn open_connection(&self) -> Result<Connection, ClientError> {
        self.inner
            .connection
            .lock()
            .as_ref()
            .filter(|c| c.is_open())
            .cloned()
            .ok_or(ClientError::NotConnected)
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        let connection = self.open_connection()?;
        match connection.send(frame).await {
            Ok(()) => {
                tracing::debug!("Sent {} frame ({} bytes)", frame.kind, frame.payload.len());
                Ok(())
            }
            Err(ProtocolError::NotOpen) => Err(ClientError::NotConnected),
            Err(e) => Err(e.into()),
        }
    }

    /// Sends a text message.
    pub async fn send_message(&self, text: &str) -> Result<(), ClientError> {
        self.send_frame(&Frame::message(text)).await
    }

    /// Sends an attachment.
    pub async fn send_attachment(&self, file_name: &str, payload: Bytes) -> Result<(), ClientError> {
        let frame = Frame::attachment(file_name, payload)?;
        self.send_frame(&frame).await
    }

    /// Reads a file and sends it as an attachment named after its final
    /// path component.
    pub async fn send_file(&self, path: &Path) -> Result<(), ClientError> {
        // Fail before reading a possibly large file
        self.open_connection()?;

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
        self.send_attachment(file_name, Bytes::from(payload)).await
    }

    /// Returns a parked attachment.
    pub fn pending_offer(&self, id: OfferId) -> Option<AttachmentOffer> {
        self.inner.pending.get(id)
    }

    /// Returns where an accepted attachment lands by default.
    pub fn save_path_for(&self, offer: &AttachmentOffer) -> PathBuf {
        default_save_path(&self.inner.config.download_dir, &offer.file_name)
    }

    /// Accepts or discards a parked attachment.
    pub async fn resolve_attachment(
        &self,
        id: OfferId,
        disposition: Disposition,
    ) -> Result<Resolution, ClientError> {
        Ok(self.inner.pending.resolve(id, disposition).await?)
    }

    /// Closes the connection.
    pub async fn close(&self) {
        let connection = self.inner.connection.lock().clone();
        if let Some(connection) = connection {
            tracing::debug!("Closing connection...");
            connection.close().await;
        }
    }
}
