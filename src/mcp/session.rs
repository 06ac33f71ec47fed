//! A single logical connection layered on a transport.
//!
//! The session frames envelopes onto the transport's byte streams, allocates
//! request ids (starting at 1, never reused) and correlates each request with
//! its response. All I/O goes through one lock, so at most one request is in
//! flight per session and responses arrive in request order.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mcp::codec::{Frame, JsonCodec};
use crate::mcp::protocol::{
    InvalidMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId,
};
use crate::mcp::transport::{BoxedReader, BoxedWriter, Transport};

/// One item read from the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A well-formed envelope.
    Message(Message),
    /// Valid JSON that is not an envelope.
    Invalid(InvalidMessage),
    /// Bytes that were not valid JSON.
    Malformed(String),
}

struct SessionIo {
    reader: Option<FramedRead<BoxedReader, JsonCodec>>,
    writer: Option<FramedWrite<BoxedWriter, JsonCodec>>,
    transport: Box<dyn Transport>,
    next_id: i64,
    /// Set while a request awaits its response. Left set if the exchange is
    /// abandoned or breaks protocol; cleared when the peer goes away.
    pending: Option<String>,
    closed: bool,
}

impl SessionIo {
    /// Drop both halves once the peer is gone, so every later call reports
    /// the disconnect instead of a stuck exchange.
    fn disconnect(&mut self) {
        self.reader = None;
        self.writer = None;
        self.pending = None;
    }

    async fn write(&mut self, message: &Message, context: &str) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::PeerDisconnected(format!("session closed before {}", context)))?;

        writer.send(message).await.map_err(|e| {
            if e.is_disconnect() {
                Error::PeerDisconnected(format!("{} while sending {}", e, context))
            } else {
                e
            }
        })
    }

    async fn read(&mut self) -> Result<Option<Incoming>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        match reader.next().await {
            None => Ok(None),
            Some(Err(e)) if e.is_disconnect() => {
                debug!("Treating read failure as disconnect: {}", e);
                Ok(None)
            }
            Some(Err(e)) => Err(e),
            Some(Ok(Frame::Malformed(reason))) => Ok(Some(Incoming::Malformed(reason))),
            Some(Ok(Frame::Value(value))) => Ok(Some(match Message::from_value(value) {
                Ok(message) => Incoming::Message(message),
                Err(invalid) => Incoming::Invalid(invalid),
            })),
        }
    }
}

/// A framed, id-correlating conversation over one transport.
pub struct Session {
    io: Mutex<SessionIo>,
    label: String,
}

impl Session {
    /// Bind a session to `transport`. The transport's halves can only be
    /// bound once.
    pub fn new<T: Transport + 'static>(mut transport: T) -> Result<Self> {
        let (reader, writer) = transport.take_io().ok_or_else(|| {
            Error::InvalidState(format!(
                "{} is already bound to a session",
                transport.describe()
            ))
        })?;
        let label = transport.describe();

        Ok(Self {
            io: Mutex::new(SessionIo {
                reader: Some(FramedRead::new(reader, JsonCodec::new())),
                writer: Some(FramedWrite::new(writer, JsonCodec::new())),
                transport: Box::new(transport),
                next_id: 1,
                pending: None,
                closed: false,
            }),
            label,
        })
    }

    /// Description of the underlying transport.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Send a request and wait for the response bearing the same id.
    ///
    /// Notifications that arrive while waiting are skipped. A response with a
    /// different id, an invalid envelope, or undecodable bytes fail with
    /// [`Error::Protocol`] and leave the session unusable; end of stream fails
    /// with [`Error::PeerDisconnected`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let mut io = self.io.lock().await;

        if let Some(previous) = &io.pending {
            return Err(Error::Protocol(format!(
                "session unusable: {} never completed",
                previous
            )));
        }

        let id = RequestId::Number(io.next_id);
        io.next_id += 1;
        let context = format!("{} (id {})", method, id);

        io.pending = Some(context.clone());
        let request = Message::Request(JsonRpcRequest::new(id.clone(), method, params));
        if let Err(e) = io.write(&request, &context).await {
            if e.is_disconnect() {
                io.disconnect();
            }
            return Err(e);
        }
        debug!("Sent {} on {}", context, self.label);

        loop {
            match io.read().await? {
                None => {
                    io.disconnect();
                    return Err(Error::PeerDisconnected(format!(
                        "connection closed while awaiting response to {}",
                        context
                    )))
                }
                Some(Incoming::Message(Message::Response(response))) => {
                    if response.id.is_none() && response.error.is_some() {
                        warn!("Peer answered {} with an id-less error", context);
                    } else if response.id.as_ref() != Some(&id) {
                        return Err(Error::Protocol(format!(
                            "response id {:?} does not match {}",
                            response.id, context
                        )));
                    }
                    io.pending = None;
                    return Ok(JsonRpcResponse {
                        id: Some(id),
                        ..response
                    });
                }
                Some(Incoming::Message(Message::Notification(notif))) => {
                    debug!("Skipping notification {} while awaiting {}", notif.method, context);
                }
                Some(Incoming::Message(Message::Request(req))) => {
                    return Err(Error::Protocol(format!(
                        "unexpected request {} while awaiting response to {}",
                        req.method, context
                    )))
                }
                Some(Incoming::Invalid(invalid)) => {
                    return Err(Error::Protocol(format!(
                        "invalid envelope in response to {}: {}",
                        context, invalid.error
                    )))
                }
                Some(Incoming::Malformed(reason)) => {
                    return Err(Error::Protocol(format!(
                        "undecodable response to {}: {}",
                        context, reason
                    )))
                }
            }
        }
    }

    /// Send a notification. Nothing is awaited.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let mut io = self.io.lock().await;
        let notification = Message::Notification(JsonRpcNotification::new(method, params));
        io.write(&notification, method).await
    }

    /// Read the next item from the peer. `Ok(None)` means the peer closed the
    /// stream cleanly.
    pub async fn receive(&self) -> Result<Option<Incoming>> {
        self.io.lock().await.read().await
    }

    /// Write one envelope, typically a response from the dispatch loop.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let mut io = self.io.lock().await;
        io.write(message, "response").await
    }

    /// Close the write side, then the read side, then release the transport.
    /// Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        if io.closed {
            return Ok(());
        }
        io.closed = true;

        if let Some(mut writer) = io.writer.take() {
            if let Err(e) = SinkExt::<&Message>::close(&mut writer).await {
                debug!("Error closing writer on {}: {}", self.label, e);
            }
        }
        io.reader.take();

        debug!("Closing transport {}", self.label);
        io.transport.close().await
    }
}
