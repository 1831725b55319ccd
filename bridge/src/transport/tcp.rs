//! Newline-delimited JSON frames over TCP.
//!
//! The source listens and accepts any number of peer connections; rejections
//! are written back on the connection a frame arrived on as one JSON `Nack`
//! per line. The sink keeps one outgoing connection, reconnecting on the next
//! publish after a failure, until it is closed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use weft_core::{BridgeError, Message, Result};

use super::{TransportFactory, TransportRecord};
use crate::sink::MessageSink;
use crate::source::{FrameStream, InboundFrame, MessageSource, Nack};

#[derive(Debug, Clone, Deserialize)]
pub struct TcpSourceConfig {
    /// Listen address, e.g. `0.0.0.0:7400`
    pub bind: String,
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpSinkConfig {
    /// Peer address, e.g. `broker.internal:7400`
    pub addr: String,
    /// Flush interval; 0 flushes after every frame.
    ///
    /// With a linger, `publish` succeeds once the frame is buffered. Frames
    /// still buffered when a background flush fails are lost with the
    /// connection, and only logged. Use 0 to get a per-frame error instead.
    #[serde(default)]
    pub linger_ms: u64,
}

pub struct TcpSource {
    name: String,
    config: TcpSourceConfig,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TcpSource {
    pub fn new(name: &str, config: TcpSourceConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            local_addr: Mutex::new(None),
        }
    }

    /// Bound address once subscribed.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MessageSource for TcpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn origin(&self) -> Option<&str> {
        self.config.origin.as_deref()
    }

    async fn subscribe(&self) -> Result<FrameStream> {
        let listener = TcpListener::bind(&self.config.bind).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(addr);
        info!(source = %self.name, %addr, "TCP source listening");

        // One slot: a connection reader waits until the bridge took the previous frame
        let (tx, rx) = mpsc::channel::<InboundFrame>(1);
        tokio::spawn(accept_loop(listener, tx, Arc::new(AtomicU64::new(0))));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<InboundFrame>,
    sequence: Arc<AtomicU64>,
) {
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "TCP source accepted connection");
                    tokio::spawn(read_connection(stream, peer, tx.clone(), Arc::clone(&sequence)));
                }
                Err(e) => warn!(error = %e, "TCP accept failed"),
            }
        }
    }
    debug!("TCP source accept loop finished");
}

async fn read_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<InboundFrame>,
    sequence: Arc<AtomicU64>,
) {
    let (read_half, mut write_half) = stream.into_split();

    let (nack_tx, mut nack_rx) = mpsc::unbounded_channel::<Nack>();
    tokio::spawn(async move {
        while let Some(nack) = nack_rx.recv().await {
            let mut line = match serde_json::to_vec(&nack) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to encode nack");
                    continue;
                }
            };
            line.push(b'\n');
            if write_half.write_all(&line).await.is_err() {
                break;
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let data = buf.trim_ascii();
                if data.is_empty() {
                    continue;
                }
                let frame = InboundFrame::new(sequence.fetch_add(1, Ordering::Relaxed), data)
                    .with_nack(nack_tx.clone());
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(%peer, error = %e, "TCP source read failed");
                break;
            }
        }
    }
    debug!(%peer, "TCP source connection closed");
}

type Connection = Option<BufWriter<TcpStream>>;

pub struct TcpSink {
    name: String,
    config: TcpSinkConfig,
    // Fair lock: publishes reach the wire in submission order
    conn: Arc<AsyncMutex<Connection>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TcpSink {
    pub fn new(name: &str, config: TcpSinkConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            conn: Arc::new(AsyncMutex::new(None)),
            flusher: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn linger(&self) -> Option<Duration> {
        (self.config.linger_ms > 0).then(|| Duration::from_millis(self.config.linger_ms))
    }
}

async fn write_frame(
    writer: &mut BufWriter<TcpStream>,
    frame: &[u8],
    flush: bool,
) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    if flush {
        writer.flush().await?;
    }
    Ok(())
}

#[async_trait]
impl MessageSink for TcpSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        self.closed.store(false, Ordering::SeqCst);
        let Some(linger) = self.linger() else {
            return Ok(());
        };
        let conn = Arc::clone(&self.conn);
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(linger);
            loop {
                ticker.tick().await;
                let mut guard = conn.lock().await;
                if let Some(writer) = guard.as_mut() {
                    if let Err(e) = writer.flush().await {
                        warn!(sink = %name, error = %e, "Linger flush failed; dropping connection");
                        *guard = None;
                    }
                }
            }
        });
        *self.flusher.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        Ok(())
    }

    async fn publish(&self, msg: &Message) -> Result<()> {
        let mut frame = msg.to_frame()?;
        frame.push(b'\n');

        let mut guard = self.conn.lock().await;
        // Checked under the lock so no publish reconnects behind close()
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Publish(format!(
                "sink '{}' is closed",
                self.name
            )));
        }
        if guard.is_none() {
            let stream = TcpStream::connect(&self.config.addr).await.map_err(|e| {
                BridgeError::Publish(format!("connect to {}: {e}", self.config.addr))
            })?;
            debug!(sink = %self.name, addr = %self.config.addr, "TCP sink connected");
            *guard = Some(BufWriter::new(stream));
        }
        let Some(writer) = guard.as_mut() else {
            return Err(BridgeError::Publish("not connected".into()));
        };
        if let Err(e) = write_frame(writer, &frame, self.linger().is_none()).await {
            *guard = None;
            return Err(BridgeError::Publish(format!(
                "write to {}: {e}",
                self.config.addr
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self
            .flusher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        let mut guard = self.conn.lock().await;
        if let Some(mut writer) = guard.take() {
            writer.shutdown().await?;
            debug!(sink = %self.name, "TCP sink closed");
        }
        Ok(())
    }
}

/// Factory for the `tcp` transport tag.
pub struct TcpTransport;

impl TransportFactory for TcpTransport {
    fn kind(&self) -> &str {
        "tcp"
    }

    fn build_source(&self, name: &str, record: &TransportRecord) -> Result<Arc<dyn MessageSource>> {
        let config: TcpSourceConfig = record.parse_args()?;
        Ok(Arc::new(TcpSource::new(name, config)))
    }

    fn build_sink(&self, name: &str, record: &TransportRecord) -> Result<Arc<dyn MessageSink>> {
        let config: TcpSinkConfig = record.parse_args()?;
        Ok(Arc::new(TcpSink::new(name, config)))
    }
}
