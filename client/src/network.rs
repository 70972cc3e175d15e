//! Client connection to the room server
//!
//! A [`Connection`] owns three background tasks: a writer draining outgoing
//! packets into the socket, a reader turning incoming frames into
//! [`ConnectionEvent`]s and a heartbeat keeping the session alive. The frame
//! loop only touches channels, so it never blocks on the network.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{
    decode, encode, timestamp_ms, CodecError, Packet, HEARTBEAT_INTERVAL_MS, PROTOCOL_VERSION,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A packet from the server and when it arrived
    Packet(Packet, Instant),
    /// The server closed the connection or it failed
    Closed,
}

pub struct Connection {
    outbound: mpsc::UnboundedSender<Packet>,
    inbound: mpsc::UnboundedReceiver<ConnectionEvent>,
    writer: Option<JoinHandle<()>>,
    heartbeat: JoinHandle<()>,
    closed: bool,
}

impl Connection {
    /// Opens a WebSocket to `url` and asks to join `room`
    pub async fn connect(url: &str, room: &str) -> Result<Self, ClientError> {
        Self::connect_with_version(url, room, PROTOCOL_VERSION).await
    }

    pub async fn connect_with_version(
        url: &str,
        room: &str,
        client_version: u32,
    ) -> Result<Self, ClientError> {
        info!("Connecting to {}", url);
        let (socket, _) = connect_async(url).await?;
        let (mut sink, mut stream) = socket.split();

        let join = Packet::Join {
            client_version,
            room: room.to_string(),
        };
        sink.send(Message::Binary(encode(&join)?)).await?;
        info!("Requested room {}", room);

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Packet>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(packet) = outbound_rx.recv().await {
                let leaving = matches!(packet, Packet::Leave);
                let bytes = match encode(&packet) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("Failed to encode {}: {}", packet.kind(), e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Binary(bytes)).await {
                    debug!("Send failed: {}", e);
                    break;
                }
                if leaving {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Binary(bytes)) => match decode(&bytes) {
                        Ok(packet) => {
                            if inbound_tx
                                .send(ConnectionEvent::Packet(packet, Instant::now()))
                                .is_err()
                            {
                                return;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Read failed: {}", e);
                        break;
                    }
                }
            }
            info!("Connection closed by server");
            let _ = inbound_tx.send(ConnectionEvent::Closed);
        });

        let heartbeat_tx = outbound.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
            loop {
                ticker.tick().await;
                let packet = Packet::Heartbeat {
                    timestamp: timestamp_ms(),
                };
                if heartbeat_tx.send(packet).is_err() {
                    break;
                }
            }
        });

        Ok(Connection {
            outbound,
            inbound,
            writer: Some(writer),
            heartbeat,
            closed: false,
        })
    }

    /// Queues a packet; delivery failures surface later as `Closed`
    pub fn send(&self, packet: Packet) {
        if self.outbound.send(packet).is_err() {
            debug!("Dropping packet, writer is gone");
        }
    }

    /// Next event if one is already waiting
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        if self.closed {
            return None;
        }
        let event = self.inbound.try_recv().ok()?;
        if event == ConnectionEvent::Closed {
            self.closed = true;
        }
        Some(event)
    }

    /// Waits for the next event; `None` once the connection is closed
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        if self.closed {
            return None;
        }
        let event = self.inbound.recv().await?;
        if event == ConnectionEvent::Closed {
            self.closed = true;
        }
        Some(event)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sends `Leave` and waits briefly for the writer to close the socket
    pub async fn leave(mut self) {
        self.send(Packet::Leave);
        self.heartbeat.abort();
        if let Some(writer) = self.writer.take() {
            if timeout(Duration::from_secs(1), writer).await.is_err() {
                debug!("Writer still busy after leave");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The heartbeat holds a sender; stopping it lets the writer finish
        self.heartbeat.abort();
    }
}
