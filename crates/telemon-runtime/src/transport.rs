//! TCP transport
//!
//! Every link, inbound or outbound, runs one task that splits the socket,
//! forwards each received line to the engine as a [`TransportEvent`] and
//! writes whatever the engine pushes into the link's outbound channel. The
//! engine never touches a socket; it only ever does non-blocking channel
//! sends.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use telemon_core::ConnectionId;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound half of a link as seen by the engine
pub type LinkSender = mpsc::UnboundedSender<String>;

/// Longest line accepted from a link, in bytes
pub const MAX_LINE_LEN: usize = 64 * 1024;

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// How a link came to exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// A peer connected to our listener
    Inbound,
    /// We dialed a configured protocol peer
    Peer(String),
    /// We dialed a configured hardware device
    Device(String),
}

/// Events delivered from link tasks to the engine
#[derive(Debug)]
pub enum TransportEvent {
    Connected {
        id: ConnectionId,
        addr: SocketAddr,
        kind: LinkKind,
        outbound: LinkSender,
    },
    Line {
        id: ConnectionId,
        line: String,
    },
    Disconnected {
        id: ConnectionId,
        reason: String,
    },
}

// ----------------------------------------------------------------------------
// Connection Identifiers
// ----------------------------------------------------------------------------

/// Hands out monotonically increasing connection identifiers
#[derive(Debug, Clone, Default)]
pub struct ConnectionIds(Arc<AtomicU64>);

impl ConnectionIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId::new(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

// ----------------------------------------------------------------------------
// Line Reader
// ----------------------------------------------------------------------------

/// Splits a byte stream into lines of at most `max_len` bytes
///
/// Longer lines are dropped whole and invalid UTF-8 is replaced, so a
/// misbehaving peer costs a warning instead of its link. Partial input stays
/// buffered between calls, which keeps [`LineReader::next_line`] usable as a
/// `tokio::select!` branch.
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_len: usize,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            max_len,
            discarding: false,
        }
    }

    /// Next line without its terminator, `None` at end of stream
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.discarding || self.buf.is_empty() {
                    self.discarding = false;
                    self.buf.clear();
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let end = newline.unwrap_or(available.len());
            if !self.discarding {
                if self.buf.len() + end > self.max_len {
                    warn!("Discarding a line longer than {} bytes", self.max_len);
                    self.discarding = true;
                    self.buf.clear();
                } else {
                    self.buf.extend_from_slice(&available[..end]);
                }
            }
            self.reader.consume(newline.map_or(end, |i| i + 1));

            if newline.is_some() {
                if mem::take(&mut self.discarding) {
                    continue;
                }
                return Ok(Some(self.take_line()));
            }
        }
    }

    fn take_line(&mut self) -> String {
        let mut bytes = mem::take(&mut self.buf);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        String::from_utf8(bytes).unwrap_or_else(|e| {
            debug!("Replacing invalid UTF-8 in a received line");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        })
    }
}

// ----------------------------------------------------------------------------
// Link Task
// ----------------------------------------------------------------------------

/// Drive one established link until either side closes it
pub async fn run_link(
    stream: TcpStream,
    id: ConnectionId,
    kind: LinkKind,
    events: mpsc::Sender<TransportEvent>,
) {
    let addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Dropping link {} without peer address: {}", id, e);
            return;
        }
    };

    let (reader, mut writer) = stream.into_split();
    let mut lines = LineReader::new(reader, MAX_LINE_LEN);
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    let connected = TransportEvent::Connected {
        id,
        addr,
        kind,
        outbound,
    };
    if events.send(connected).await.is_err() {
        return;
    }

    let reason = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    debug!("{} >> {}", id, line);
                    if events.send(TransportEvent::Line { id, line }).await.is_err() {
                        break "engine stopped".to_string();
                    }
                }
                Ok(None) => break "closed by peer".to_string(),
                Err(e) => break e.to_string(),
            },
            out = outbound_rx.recv() => match out {
                Some(mut line) => {
                    debug!("{} << {}", id, line);
                    line.push('\n');
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        break e.to_string();
                    }
                }
                None => break "closed by engine".to_string(),
            },
        }
    };

    let _ = events.send(TransportEvent::Disconnected { id, reason }).await;
}

// ----------------------------------------------------------------------------
// Listener and Dialer
// ----------------------------------------------------------------------------

/// Accept inbound links forever, one task per connection
pub async fn serve(listener: TcpListener, ids: ConnectionIds, events: mpsc::Sender<TransportEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let id = ids.next();
                info!("Accepted connection {} from {}", id, addr);
                tokio::spawn(run_link(stream, id, LinkKind::Inbound, events.clone()));
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        if events.is_closed() {
            break;
        }
    }
}

/// Keep an outbound link up, redialing after `reconnect_interval`
pub async fn dial(
    host: String,
    port: u16,
    kind: LinkKind,
    reconnect_interval: Duration,
    ids: ConnectionIds,
    events: mpsc::Sender<TransportEvent>,
) {
    let target = format!("{host}:{port}");

    while !events.is_closed() {
        match TcpStream::connect(&target).await {
            Ok(stream) => {
                let id = ids.next();
                info!("Connected {} to {:?} at {}", id, kind, target);
                run_link(stream, id, kind.clone(), events.clone()).await;
            }
            Err(e) => debug!("Cannot reach {:?} at {}: {}", kind, target, e),
        }

        tokio::time::sleep(reconnect_interval).await;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
