//! Room tasks and the registry that creates them on demand
//!
//! Every room runs as its own tokio task that owns a [`Room`] and a
//! [`SessionManager`]. Connection handlers talk to it only through a
//! [`RoomHandle`], so all mutation of one room is serialized on one task and
//! different rooms never share state.
//!
//! A room task exits once its last session leaves. Joins that race with the
//! shutdown are answered with [`JoinError::Closed`] and the [`Lobby`] retries
//! them against a fresh room.

use crate::room::{JoinError, Room, RoomConfig};
use crate::session_manager::SessionManager;
use log::{debug, info, warn};
use shared::{Packet, PlayerRecord, SessionId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval, MissedTickBehavior};

const JOIN_ATTEMPTS: usize = 3;
const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Messages sent from connection handlers to a room task
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        session_id: SessionId,
        addr: SocketAddr,
        outbox: mpsc::UnboundedSender<Packet>,
        reply: oneshot::Sender<Result<PlayerRecord, JoinError>>,
    },
    Packet {
        session_id: SessionId,
        packet: Packet,
    },
    Leave {
        session_id: SessionId,
        consented: bool,
    },
}

/// Cheap, cloneable address of a running room task
#[derive(Debug, Clone)]
pub struct RoomHandle {
    name: String,
    generation: u64,
    commands: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Joins the room and waits for the record it allocated
    ///
    /// On success the room has already queued `Welcome` on `outbox`, ahead of
    /// any snapshot.
    pub async fn join(
        &self,
        session_id: SessionId,
        addr: SocketAddr,
        outbox: mpsc::UnboundedSender<Packet>,
    ) -> Result<PlayerRecord, JoinError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(RoomCommand::Join {
                session_id,
                addr,
                outbox,
                reply,
            })
            .map_err(|_| JoinError::Closed)?;
        response.await.unwrap_or(Err(JoinError::Closed))
    }

    /// Hands a client packet to the room. Best effort: a closed room drops it.
    pub fn forward(&self, session_id: SessionId, packet: Packet) {
        if self
            .commands
            .send(RoomCommand::Packet { session_id, packet })
            .is_err()
        {
            debug!("Room {} is gone, dropping packet from {}", self.name, session_id);
        }
    }

    pub fn leave(&self, session_id: SessionId, consented: bool) {
        let _ = self.commands.send(RoomCommand::Leave {
            session_id,
            consented,
        });
    }
}

/// The task side of a room
pub struct RoomTask {
    room: Room,
    sessions: SessionManager,
    config: RoomConfig,
    commands: mpsc::UnboundedReceiver<RoomCommand>,
    /// Set once a join has been answered; an empty room before that is still
    /// starting up
    join_answered: bool,
}

impl RoomTask {
    pub fn new(room: Room, config: RoomConfig, commands: mpsc::UnboundedReceiver<RoomCommand>) -> Self {
        Self {
            room,
            sessions: SessionManager::new(),
            config,
            commands,
            join_answered: false,
        }
    }

    /// Runs until the room is empty after a join, or every handle is dropped.
    ///
    /// A room whose first join is refused has nobody to serve and exits too.
    pub async fn run(mut self) {
        let tick_rate = self.config.tick_rate.max(1);
        let mut broadcast_timer = interval(Duration::from_secs_f64(1.0 / tick_rate as f64));
        broadcast_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut timeout_timer = interval(TIMEOUT_CHECK_INTERVAL);
        timeout_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Room {} created", self.room.name());

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                },
                _ = broadcast_timer.tick() => self.flush(),
                _ = timeout_timer.tick() => self.expire_sessions(),
            }

            if self.join_answered && self.room.is_empty() {
                break;
            }
        }

        self.shut_down().await;
    }

    fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join {
                session_id,
                addr,
                outbox,
                reply,
            } => {
                let result = self.join(session_id, addr, outbox);
                self.join_answered = true;
                if result.is_err() && self.room.is_empty() {
                    // Closed before replying, so the lobby sees a dead handle
                    self.commands.close();
                }
                let _ = reply.send(result);
            }
            RoomCommand::Packet { session_id, packet } => self.handle_packet(session_id, packet),
            RoomCommand::Leave {
                session_id,
                consented,
            } => self.remove_session(session_id, consented),
        }
    }

    fn join(
        &mut self,
        session_id: SessionId,
        addr: SocketAddr,
        outbox: mpsc::UnboundedSender<Packet>,
    ) -> Result<PlayerRecord, JoinError> {
        let record = self.room.on_join(session_id)?;

        // Welcome goes out before this session can appear in any broadcast
        let _ = outbox.send(Packet::Welcome {
            session_id,
            model: record.model.clone(),
            room: self.room.name().to_string(),
        });
        self.sessions.add_session(session_id, addr, outbox);
        Ok(record)
    }

    fn handle_packet(&mut self, session_id: SessionId, packet: Packet) {
        if !self.sessions.touch(session_id) {
            debug!(
                "Dropping {} from session {} without a record",
                packet.kind(),
                session_id
            );
            return;
        }

        match packet {
            Packet::Move {
                sequence,
                position,
                rotation,
            } => {
                if !self.sessions.is_newer_sequence(session_id, sequence) {
                    debug!("Dropping stale move {} from session {}", sequence, session_id);
                    return;
                }
                match self.room.on_move(session_id, &position, &rotation) {
                    Ok(()) => self.sessions.record_sequence(session_id, sequence),
                    Err(e) => warn!("Rejected move from session {}: {}", session_id, e),
                }
            }
            Packet::Animation { locomotion } => {
                if let Err(e) = self.room.on_animation(session_id, &locomotion) {
                    warn!("Rejected animation from session {}: {}", session_id, e);
                }
            }
            Packet::Heartbeat { .. } => {}
            Packet::Leave => self.remove_session(session_id, true),
            other => {
                warn!(
                    "Unexpected {} packet from session {}",
                    other.kind(),
                    session_id
                );
            }
        }
    }

    fn remove_session(&mut self, session_id: SessionId, consented: bool) {
        self.sessions.remove_session(&session_id);
        self.room.on_leave(session_id, consented);
    }

    fn flush(&mut self) {
        if let Some(snapshot) = self.room.take_snapshot() {
            let delivered = self.sessions.broadcast(&snapshot);
            debug!(
                "Room {} broadcast snapshot to {} sessions",
                self.room.name(),
                delivered
            );
        }
    }

    fn expire_sessions(&mut self) {
        for session_id in self.sessions.check_timeouts(self.config.session_timeout) {
            warn!("Session {} timed out", session_id);
            self.room.on_leave(session_id, false);
        }
    }

    async fn shut_down(mut self) {
        self.commands.close();
        while let Some(command) = self.commands.recv().await {
            if let RoomCommand::Join { reply, .. } = command {
                let _ = reply.send(Err(JoinError::Closed));
            }
        }
        info!("Room {} disposed", self.room.name());
    }
}

/// Registry of live rooms, keyed by name
pub struct Lobby {
    rooms: Mutex<HashMap<String, RoomHandle>>,
    config: RoomConfig,
    next_session_id: AtomicU32,
    next_generation: AtomicU64,
}

impl Lobby {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            config,
            next_session_id: AtomicU32::new(1),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Returns an id no other session of this server has used.
    pub fn allocate_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Joins `room_name`, creating the room if needed
    pub async fn join(
        &self,
        room_name: &str,
        session_id: SessionId,
        addr: SocketAddr,
        outbox: mpsc::UnboundedSender<Packet>,
    ) -> Result<(RoomHandle, PlayerRecord), JoinError> {
        for _ in 0..JOIN_ATTEMPTS {
            let handle = self.room_handle(room_name).await;
            match handle.join(session_id, addr, outbox.clone()).await {
                Ok(record) => return Ok((handle, record)),
                Err(JoinError::Closed) => self.forget(&handle).await,
                Err(e) => {
                    if handle.is_closed() {
                        self.forget(&handle).await;
                    }
                    return Err(e);
                }
            }
        }
        Err(JoinError::Closed)
    }

    /// Number of rooms whose task is still running.
    pub async fn room_count(&self) -> usize {
        let mut rooms = self.rooms.lock().await;
        rooms.retain(|_, handle| !handle.is_closed());
        rooms.len()
    }

    async fn room_handle(&self, room_name: &str) -> RoomHandle {
        let mut rooms = self.rooms.lock().await;
        rooms.retain(|_, handle| !handle.is_closed());
        if let Some(handle) = rooms.get(room_name) {
            return handle.clone();
        }

        let (commands, receiver) = mpsc::unbounded_channel();
        let handle = RoomHandle {
            name: room_name.to_string(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            commands,
        };
        let room = Room::new(room_name, &self.config);
        tokio::spawn(RoomTask::new(room, self.config.clone(), receiver).run());

        rooms.insert(room_name.to_string(), handle.clone());
        handle
    }

    async fn forget(&self, handle: &RoomHandle) {
        let mut rooms = self.rooms.lock().await;
        if rooms.get(&handle.name).map(|current| current.generation) == Some(handle.generation) {
            rooms.remove(&handle.name);
        }
    }
}
