//! One live stream endpoint: buffered frame reading and serialized writes.
//!
//! A [`Connection`] is a cheap, cloneable handle to the write half and the
//! lifecycle state of a stream. The read half is driven by exactly one task
//! through [`Connection::read_frames`], which owns the [`FrameReader`] and
//! therefore all in-flight decode state for the stream.

use crate::codec::Decoder;
use crate::error::{ErrorKind, ProtocolError};
use crate::frame::Frame;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::{watch, Mutex};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Boxed write half of a transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Turns a byte stream into frames.
pub struct FrameReader {
    decoder: Decoder,
    corrupted: bool,
}

impl FrameReader {
    pub fn new(decoder: Decoder) -> Self {
        Self {
            decoder,
            corrupted: false,
        }
    }

    /// Appends `chunk` and hands every complete frame to `emit`, in order.
    ///
    /// Returns the number of frames emitted. Partial frames stay buffered.
    /// A malformed header poisons the reader: the buffer is dropped and every
    /// later call fails with [`ProtocolError::StreamCorrupted`].
    pub fn on_bytes_received<F>(&mut self, chunk: &[u8], mut emit: F) -> Result<usize, ProtocolError>
    where
        F: FnMut(Frame),
    {
        if self.corrupted {
            return Err(ProtocolError::StreamCorrupted);
        }

        self.decoder.extend(chunk);
        let mut emitted = 0;
        loop {
            match self.decoder.decode_frame() {
                Ok(Some(frame)) => {
                    emit(frame);
                    emitted += 1;
                }
                Ok(None) => return Ok(emitted),
                Err(e) => {
                    self.corrupted = true;
                    self.decoder.clear();
                    return Err(e);
                }
            }
        }
    }

    /// Returns the number of bytes waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(Decoder::new())
    }
}

/// How a read loop ended.
#[derive(Debug)]
pub enum ReadOutcome {
    /// The peer closed the stream.
    RemoteClosed,
    /// The connection was closed from this side.
    LocalClose,
    /// A write on this connection failed and closed it.
    WriteFailed,
    /// The inbound stream failed (malformed frame or I/O error).
    Failed(ProtocolError),
}

impl ReadOutcome {
    /// Returns the error kind to surface, or `None` for an orderly close.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ReadOutcome::RemoteClosed | ReadOutcome::LocalClose => None,
            ReadOutcome::WriteFailed => Some(ErrorKind::Transport),
            ReadOutcome::Failed(e) => Some(e.kind()),
        }
    }
}

impl std::fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadOutcome::RemoteClosed => write!(f, "closed by peer"),
            ReadOutcome::LocalClose => write!(f, "closed locally"),
            ReadOutcome::WriteFailed => write!(f, "write failed"),
            ReadOutcome::Failed(e) => write!(f, "{}", e),
        }
    }
}

struct Inner {
    writer: Mutex<Option<BoxedWriter>>,
    state: AtomicU8,
    close_tx: watch::Sender<bool>,
    write_failed: OnceLock<()>,
}

/// Shared handle to one connection's write path and lifecycle.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Wraps the write half of an established transport.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (close_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                writer: Mutex::new(Some(Box::new(writer))),
                state: AtomicU8::new(ConnectionState::Open as u8),
                close_tx,
                write_failed: OnceLock::new(),
            }),
        }
    }

    /// Splits a bidirectional stream into a connection handle and its read half.
    pub fn split<S>(stream: S) -> (Self, ReadHalf<S>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        (Self::new(write_half), read_half)
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Returns whether sends are currently accepted.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns whether two handles refer to the same connection.
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Encodes and writes one frame.
    pub async fn send(&self, frame: &Frame) -> Result<(), ProtocolError> {
        let encoded = frame.encode()?;
        self.send_encoded(&encoded).await
    }

    /// Writes an already-encoded frame.
    ///
    /// Writes are serialized: bytes of two concurrent sends never interleave.
    /// A send waiting on the writer, or stuck writing to a peer that stopped
    /// reading, gives way to [`close`](Self::close) and fails with
    /// [`ProtocolError::NotOpen`].
    pub async fn send_encoded(&self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let mut closed = self.inner.close_tx.subscribe();
        if !self.is_open() {
            return Err(ProtocolError::NotOpen);
        }

        let mut guard = tokio::select! {
            guard = self.inner.writer.lock() => guard,
            _ = closed.wait_for(|closed| *closed) => return Err(ProtocolError::NotOpen),
        };
        let writer = guard.as_mut().ok_or(ProtocolError::NotOpen)?;

        let result = tokio::select! {
            result = async {
                match writer.write_all(bytes).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                }
            } => result,
            _ = closed.wait_for(|closed| *closed) => return Err(ProtocolError::NotOpen),
        };
        if let Err(e) = result {
            drop(guard);
            let _ = self.inner.write_failed.set(());
            self.begin_close();
            return Err(ProtocolError::Io(e));
        }
        Ok(())
    }

    /// Writes an already-encoded frame, giving up after `limit`.
    ///
    /// A frame may be half written when the limit passes, so the connection
    /// is treated as failed and begins closing.
    pub async fn send_encoded_within(
        &self,
        bytes: &[u8],
        limit: Duration,
    ) -> Result<(), ProtocolError> {
        match tokio::time::timeout(limit, self.send_encoded(bytes)).await {
            Ok(result) => result,
            Err(_) => {
                let _ = self.inner.write_failed.set(());
                self.begin_close();
                Err(ProtocolError::WriteTimeout(limit))
            }
        }
    }

    /// Moves an open connection to `Closing` and wakes its read loop and any
    /// pending sends.
    pub fn begin_close(&self) {
        let _ = self.inner.state.compare_exchange(
            ConnectionState::Open as u8,
            ConnectionState::Closing as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.inner.close_tx.send_replace(true);
    }

    /// Closes the connection: stops the read loop and shuts the writer down.
    ///
    /// Never waits on a peer: sends in flight abandon the writer as soon as
    /// the close signal is raised.
    pub async fn close(&self) {
        self.begin_close();
        let writer = self.inner.writer.lock().await.take();
        self.inner
            .state
            .store(ConnectionState::Closed as u8, Ordering::SeqCst);
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
    }

    /// Runs the read loop until the stream ends, fails, or is closed locally.
    ///
    /// Every decoded frame is passed to `on_frame` in arrival order. When this
    /// returns the connection is `Closed` and the reader's buffered bytes are
    /// gone.
    pub async fn read_frames<R, F>(
        &self,
        mut reader: R,
        mut frames: FrameReader,
        buffer_size: usize,
        mut on_frame: F,
    ) -> ReadOutcome
    where
        R: AsyncRead + Unpin,
        F: FnMut(Frame),
    {
        let mut closed = self.inner.close_tx.subscribe();
        let mut buf = vec![0u8; buffer_size.max(1)];

        let outcome = loop {
            if *closed.borrow_and_update() {
                break ReadOutcome::LocalClose;
            }

            tokio::select! {
                result = reader.read(&mut buf) => match result {
                    Ok(0) => break ReadOutcome::RemoteClosed,
                    Ok(n) => {
                        tracing::trace!("Received {} bytes", n);
                        if let Err(e) = frames.on_bytes_received(&buf[..n], &mut on_frame) {
                            self.begin_close();
                            break ReadOutcome::Failed(e);
                        }
                    }
                    Err(e) => break ReadOutcome::Failed(ProtocolError::Io(e)),
                },
                _ = closed.changed() => {}
            }
        };

        self.close().await;

        match outcome {
            ReadOutcome::LocalClose if self.inner.write_failed.get().is_some() => {
                ReadOutcome::WriteFailed
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish()
    }
}
