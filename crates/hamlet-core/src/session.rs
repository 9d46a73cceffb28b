//! Transport session — one websocket to the broker, typed frames in and out.
//!
//! Writes go through a single writer task fed by an unbounded channel, so
//! frames from concurrent callers are never interleaved on the wire. Reads are
//! driven by [`receive_loop`], which hands `message` frames to the inbox and
//! drops everything else.

use futures_util::stream::SplitStream;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ConnectionError, DecodeError};
use crate::inbox::InboxSender;
use crate::types::{InboundFrame, OutboundFrame};

pub type BrokerStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type FrameSource = SplitStream<BrokerStream>;

/// Send handle for one broker connection. Cheap to clone; every clone feeds
/// the same writer task. The default value is an unconnected session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    tx: Option<mpsc::UnboundedSender<OutboundFrame>>,
}

/// Everything `connect` produces: the send handle, the read half for the
/// receive loop, and the writer task.
pub struct Connection {
    pub session: Session,
    pub frames: FrameSource,
    pub writer: JoinHandle<()>,
}

/// Why a receive loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEnd {
    /// The broker closed the connection (close frame or end of stream).
    Closed,
    /// Transport fault.
    Failed(String),
    /// The consumer side of the inbox is gone.
    InboxDropped,
    Cancelled,
}

impl std::fmt::Display for ReceiveEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiveEnd::Closed => write!(f, "broker closed the connection"),
            ReceiveEnd::Failed(e) => write!(f, "transport error: {}", e),
            ReceiveEnd::InboxDropped => write!(f, "inbox consumer gone"),
            ReceiveEnd::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Open a websocket to the broker. No retry.
pub async fn connect(address: &str) -> Result<Connection, ConnectionError> {
    let (stream, _response) =
        connect_async(address)
            .await
            .map_err(|source| ConnectionError::Connect {
                address: address.to_string(),
                source,
            })?;
    info!("Connected to broker at {}", address);

    let (sink, frames) = stream.split();
    let (session, writer) = spawn_writer(sink);
    Ok(Connection {
        session,
        frames,
        writer,
    })
}

/// Start the task that owns the write half. Frames are JSON-encoded and sent
/// one at a time in the order they were queued.
pub fn spawn_writer<W>(mut sink: W) -> (Session, JoinHandle<()>)
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode {} frame: {}", frame.topic(), e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(json.into())).await {
                error!("Broker write failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
        debug!("Writer task finished");
    });

    (Session { tx: Some(tx) }, writer)
}

impl Session {
    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Queue a `subscribe` frame.
    pub fn subscribe(&self, topic: &str) -> bool {
        self.send(OutboundFrame::subscribe(topic))
    }

    /// Queue a `publish` frame. Fire-and-forget; no-op when unconnected.
    pub fn publish(&self, topic: &str, content: &str, sender: &str) -> bool {
        self.send(OutboundFrame::publish(topic, content, sender))
    }

    /// Returns whether the frame was handed to the writer.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        let Some(tx) = &self.tx else {
            debug!("No broker session; dropping frame for {}", frame.topic());
            return false;
        };
        match tx.send(frame) {
            Ok(()) => true,
            Err(e) => {
                debug!("Broker session closed; dropping frame for {}", e.0.topic());
                false
            }
        }
    }

    /// Stop accepting frames. The writer flushes what is queued, then closes
    /// the socket once every clone of this session has been closed or dropped.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// A session whose frames land in a channel instead of a socket.
    #[cfg(test)]
    pub(crate) fn capture() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }
}

pub fn decode_frame(raw: &str) -> Result<InboundFrame, DecodeError> {
    serde_json::from_str(raw).map_err(|e| DecodeError::new(raw, e))
}

/// Pump inbound frames into the inbox until the connection ends or `cancel`
/// fires. A bad frame is logged and skipped; it never ends the loop.
pub async fn receive_loop<S>(
    mut frames: S,
    inbox: InboxSender,
    cancel: CancellationToken,
) -> ReceiveEnd
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return ReceiveEnd::Cancelled,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => match decode_frame(text.as_str()) {
                Ok(InboundFrame::Message(message)) => {
                    debug!("Received on {} from {}", message.topic, message.origin());
                    if inbox.enqueue(message).is_err() {
                        warn!("Inbox consumer gone, stopping receive loop");
                        return ReceiveEnd::InboxDropped;
                    }
                }
                Ok(InboundFrame::System { payload }) => {
                    debug!("Broker notice: {}", payload);
                }
                Ok(InboundFrame::Other) => {}
                Err(e) => warn!("{}", e),
            },
            Some(Ok(Message::Close(frame))) => {
                info!("Broker closed the connection: {:?}", frame);
                return ReceiveEnd::Closed;
            }
            // Binary, ping/pong and raw frames carry nothing for us.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!("Listen error: {}", e);
                return ReceiveEnd::Failed(e.to_string());
            }
            None => {
                info!("Broker stream ended");
                return ReceiveEnd::Closed;
            }
        }
    }
}
