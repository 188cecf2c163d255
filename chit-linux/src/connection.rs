//! One peer transport: a line reader driven by its owning task, and a
//! shareable handle that queues lines for the connection's own writer task.
//! A peer that stops reading only backs up its own queue.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::registry::BroadcastRegistry;

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// How long a closing connection may spend flushing queued lines.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection id. Ids are never reused, and order by creation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Error sending on, or reading from, a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a read loop ended.
#[derive(Debug)]
pub enum CloseReason {
    /// Peer closed its side.
    Eof,
    /// `close()`, session stop, or a failed write.
    Stopped,
    Failed(std::io::Error),
}

/// Cloneable write side of a connection. Safe to use from any task while the
/// read loop runs.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    name: Arc<str>,
    outbound: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
    /// Cancelled once the writer task has let go of the transport.
    writer_done: CancellationToken,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Peer display name once handshaked, its address before that.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed for any reason.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Queue one line for the writer task, which writes it plus newline and
    /// flushes. Never waits on the socket. Lines go out whole and in queue
    /// order. A write failure closes the connection, after which `send`
    /// returns `Closed`.
    pub fn send(&self, line: &str) -> Result<(), ConnectionError> {
        if self.closed.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        self.outbound
            .send(line.to_string())
            .map_err(|_| ConnectionError::Closed)
    }

    /// Stop the read loop, flush what is queued (bounded), shut down the write
    /// side and wait for the writer to finish. Idempotent.
    pub async fn close(&self) {
        self.closed.cancel();
        self.writer_done.cancelled().await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn write_line(writer: &mut Writer, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Drain `rx` into `writer` until the connection closes or every handle is
/// dropped. The transport is released when this returns.
async fn write_loop(
    mut writer: Writer,
    mut rx: mpsc::UnboundedReceiver<String>,
    closed: CancellationToken,
    id: ConnectionId,
    _done: DropGuard,
) {
    loop {
        let line = tokio::select! {
            _ = closed.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        let written = {
            let write = write_line(&mut writer, &line);
            tokio::pin!(write);
            tokio::select! {
                r = &mut write => r,
                _ = closed.cancelled() => match tokio::time::timeout(CLOSE_GRACE, &mut write).await {
                    Ok(r) => r,
                    // Stuck mid-line: anything more would corrupt the stream.
                    Err(_) => return,
                },
            }
        };
        if let Err(e) = written {
            warn!(%id, error = %e, "write failed, closing connection");
            closed.cancel();
            return;
        }
    }
    let flush = async {
        while let Ok(line) = rx.try_recv() {
            write_line(&mut writer, &line).await?;
        }
        writer.shutdown().await
    };
    match tokio::time::timeout(CLOSE_GRACE, flush).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(%id, error = %e, "shutdown on close failed"),
        Err(_) => debug!(%id, "peer not reading, dropping unsent lines"),
    }
}

/// An open transport. Owned by the task that reads it; the write side is
/// shared through [`ConnectionHandle`].
pub struct Connection {
    handle: ConnectionHandle,
    reader: Reader,
    registry: Option<Arc<BroadcastRegistry>>,
}

impl Connection {
    /// Wrap any duplex byte stream. `shutdown` cancels the read loop. Spawns
    /// the writer task, so it must be called inside a tokio runtime.
    pub fn open<T>(transport: T, label: &str, shutdown: CancellationToken) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (r, w) = tokio::io::split(transport);
        Self::from_halves(Box::new(r), Box::new(w), label, shutdown)
    }

    /// Wrap a TCP stream with Nagle disabled so chat lines go out immediately.
    pub fn from_tcp(stream: TcpStream, shutdown: CancellationToken) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        let label = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (r, w) = stream.into_split();
        Ok(Self::from_halves(Box::new(r), Box::new(w), &label, shutdown))
    }

    fn from_halves(
        reader: Box<dyn AsyncRead + Send + Unpin>,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
        label: &str,
        shutdown: CancellationToken,
    ) -> Self {
        let id = ConnectionId::next();
        let (outbound, rx) = mpsc::unbounded_channel();
        let writer_done = CancellationToken::new();
        tokio::spawn(write_loop(
            BufWriter::new(writer),
            rx,
            shutdown.clone(),
            id,
            writer_done.clone().drop_guard(),
        ));
        Self {
            handle: ConnectionHandle {
                id,
                name: Arc::from(label),
                outbound,
                closed: shutdown,
                writer_done,
            },
            reader: BufReader::new(reader),
            registry: None,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    /// Rename the peer. Only handles cloned afterwards see the new name.
    pub fn set_peer_name(&mut self, name: &str) {
        self.handle.name = Arc::from(name);
    }

    /// Register in `registry`; the connection removes itself again on close.
    pub async fn join(&mut self, registry: &Arc<BroadcastRegistry>) -> bool {
        self.registry = Some(Arc::clone(registry));
        registry.register(self.handle.clone()).await
    }

    /// Read one line without its `\n` / `\r\n`. Invalid UTF-8 is replaced with
    /// U+FFFD rather than failing the connection. `Ok(None)` on end of stream,
    /// `Err(Closed)` once cancelled.
    pub async fn next_line(&mut self) -> Result<Option<String>, ConnectionError> {
        let mut buf = Vec::new();
        let n = tokio::select! {
            _ = self.handle.closed.cancelled() => return Err(ConnectionError::Closed),
            r = self.reader.read_until(b'\n', &mut buf) => r?,
        };
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        let line = match String::from_utf8(buf) {
            Ok(line) => line,
            Err(e) => {
                let line = String::from_utf8_lossy(e.as_bytes()).into_owned();
                warn!(peer = %self.handle.name, id = %self.handle.id, "line is not valid UTF-8, replacing bad bytes");
                line
            }
        };
        Ok(Some(line))
    }

    /// Deliver every non-blank line to `on_line`, in order, until end of stream,
    /// an I/O error, or cancellation. Cleanup runs exactly once on the way out.
    pub async fn read_loop<F, Fut>(mut self, mut on_line: F) -> CloseReason
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        let reason = loop {
            match self.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    on_line(line).await;
                }
                Ok(None) => break CloseReason::Eof,
                Err(ConnectionError::Closed) => break CloseReason::Stopped,
                Err(ConnectionError::Io(e)) => break CloseReason::Failed(e),
            }
        };
        match &reason {
            CloseReason::Failed(e) => {
                warn!(peer = %self.handle.name, id = %self.handle.id, error = %e, "read failed")
            }
            other => debug!(peer = %self.handle.name, id = %self.handle.id, reason = ?other, "read loop ended"),
        }
        self.close().await;
        reason
    }

    /// Leave the registry, shut the writer, drop the reader. Best-effort.
    pub async fn close(self) {
        if let Some(registry) = &self.registry {
            registry.unregister(self.handle.id).await;
        }
        self.handle.close().await;
        drop(self.reader);
    }
}
