//! Server network layer: WebSocket accept loop and per-connection tasks

use crate::lobby::Lobby;
use crate::room::{JoinError, RoomConfig};
use futures_util::{SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use shared::{decode, encode, Packet, DEFAULT_PORT, PROTOCOL_VERSION, SESSION_TIMEOUT_MS};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long a fresh connection may take to send `Join`
    pub join_timeout: Duration,
    pub room: RoomConfig,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            join_timeout: Duration::from_millis(SESSION_TIMEOUT_MS),
            room: RoomConfig::default(),
        }
    }
}

/// Accepts WebSocket connections and routes them into rooms
pub struct Server {
    listener: TcpListener,
    lobby: Arc<Lobby>,
    join_timeout: Duration,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(config.address()).await?;
        info!("Server listening on ws://{}", listener.local_addr()?);

        Ok(Server {
            listener,
            lobby: Arc::new(Lobby::new(config.room)),
            join_timeout: config.join_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn lobby(&self) -> Arc<Lobby> {
        Arc::clone(&self.lobby)
    }

    /// Main accept loop; each connection gets its own task
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Server started successfully");

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let lobby = Arc::clone(&self.lobby);
                    let join_timeout = self.join_timeout;
                    tokio::spawn(async move {
                        handle_connection(stream, addr, lobby, join_timeout).await;
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    lobby: Arc<Lobby>,
    join_timeout: Duration,
) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    debug!("WebSocket connection from {}", addr);

    let (mut sink, mut incoming) = socket.split();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Packet>();
    let (finished, writer_done) = oneshot::channel();

    // Writer: drains the outbox until every sender is gone
    let writer = tokio::spawn(async move {
        while let Some(packet) = outbox_rx.recv().await {
            let bytes = match encode(&packet) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Failed to encode {} for {}: {}", packet.kind(), addr, e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Binary(bytes)).await {
                debug!("Send to {} failed: {}", addr, e);
                break;
            }
        }
        let _ = sink.close().await;
        let _ = finished.send(());
    });

    serve_session(&mut incoming, addr, &lobby, outbox, writer_done, join_timeout).await;

    if writer.await.is_err() {
        error!("Writer task for {} panicked", addr);
    }
    debug!("Connection from {} closed", addr);
}

/// Runs one session from `Join` to leave
///
/// Socket close and read errors count as an ungraceful leave; the room drops
/// the record either way. Reading also stops once `writer_done` fires, which
/// happens after the room let go of the session (for example on timeout) and
/// the writer sent its close frame. A peer that never answers that close
/// cannot hold the connection open.
async fn serve_session<S>(
    incoming: &mut S,
    addr: SocketAddr,
    lobby: &Lobby,
    outbox: mpsc::UnboundedSender<Packet>,
    mut writer_done: oneshot::Receiver<()>,
    join_timeout: Duration,
) where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let (client_version, room_name) = match timeout(join_timeout, wait_for_join(incoming, addr)).await
    {
        Ok(Some(join)) => join,
        Ok(None) => return,
        Err(_) => {
            warn!("{} did not join within {:?}", addr, join_timeout);
            return;
        }
    };

    if client_version != PROTOCOL_VERSION {
        let reason = JoinError::Version(client_version).to_string();
        warn!("Rejecting {}: {}", addr, reason);
        let _ = outbox.send(Packet::Rejected { reason });
        return;
    }

    let session_id = lobby.allocate_session_id();
    let room = match lobby.join(&room_name, session_id, addr, outbox.clone()).await {
        Ok((room, _)) => room,
        Err(e) => {
            warn!("Rejecting {} from room {}: {}", addr, room_name, e);
            let _ = outbox.send(Packet::Rejected {
                reason: e.to_string(),
            });
            return;
        }
    };
    // The room now holds the only long-lived sender
    drop(outbox);

    let mut consented = false;
    loop {
        let packet = tokio::select! {
            packet = next_packet(incoming, addr) => packet,
            _ = &mut writer_done => {
                debug!("Session {} was closed by its room", session_id);
                None
            }
        };

        match packet {
            Some(Packet::Leave) => {
                consented = true;
                break;
            }
            Some(Packet::Join { .. }) => {
                warn!("Session {} sent a second join", session_id);
            }
            Some(packet) => room.forward(session_id, packet),
            None => break,
        }
    }

    room.leave(session_id, consented);
}

async fn wait_for_join<S>(incoming: &mut S, addr: SocketAddr) -> Option<(u32, String)>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(packet) = next_packet(incoming, addr).await {
        match packet {
            Packet::Join {
                client_version,
                room,
            } => return Some((client_version, room)),
            other => debug!("Dropping {} from {} before join", other.kind(), addr),
        }
    }
    None
}

/// Reads until a decodable packet arrives or the connection ends
///
/// Undecodable frames are logged and skipped; they never end the session.
async fn next_packet<S>(incoming: &mut S, addr: SocketAddr) -> Option<Packet>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(message) = incoming.next().await {
        match message {
            Ok(Message::Binary(bytes)) => match decode(&bytes) {
                Ok(packet) => return Some(packet),
                Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
            },
            Ok(Message::Close(_)) => return None,
            Ok(Message::Text(_)) => warn!("Ignoring text frame from {}", addr),
            Ok(_) => {}
            Err(e) => {
                debug!("Read from {} failed: {}", addr, e);
                return None;
            }
        }
    }
    None
}
