//! Connection bookkeeping for the sessions of one room
//!
//! This module tracks everything about a session that is not player state:
//! - Where to send packets (the connection's outbox channel)
//! - Liveness (last time any packet arrived) for heartbeat timeouts
//! - The highest `Move` sequence applied, so stale moves are dropped
//!
//! Player state itself lives in [`crate::room::Room`]; the room task keeps
//! both tables in step.

use log::{debug, info};
use shared::{Packet, SessionId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// A joined connection and its delivery channel
///
/// Each session maintains:
/// - Connection metadata (ID, address, last activity)
/// - The last applied move sequence
/// - An outbox drained by the connection's writer task
#[derive(Debug)]
pub struct Session {
    /// Identifier assigned by the server at connect
    pub id: SessionId,
    /// Remote address, for logging
    pub addr: SocketAddr,
    /// Last time we received any packet from this session
    pub last_seen: Instant,
    /// Highest move sequence applied so far
    pub last_sequence: u32,
    outbox: mpsc::UnboundedSender<Packet>,
}

impl Session {
    pub fn new(id: SessionId, addr: SocketAddr, outbox: mpsc::UnboundedSender<Packet>) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            last_sequence: 0,
            outbox,
        }
    }

    /// Queues a packet for this session's writer task
    ///
    /// Returns false if the writer has already gone away.
    pub fn send(&self, packet: Packet) -> bool {
        self.outbox.send(packet).is_ok()
    }

    /// Returns true if no packet arrived within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// All sessions joined to one room, keyed by session id
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<SessionId, Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Registers a joined session. An existing entry for the same id is replaced.
    pub fn add_session(
        &mut self,
        id: SessionId,
        addr: SocketAddr,
        outbox: mpsc::UnboundedSender<Packet>,
    ) {
        info!("Session {} connected from {}", id, addr);
        self.sessions.insert(id, Session::new(id, addr, outbox));
    }

    /// Removes a session
    ///
    /// Returns true if the session was found and removed, false if it was
    /// already gone. Dropping the session drops its outbox sender, which lets
    /// the writer task finish once the connection handler lets go as well.
    pub fn remove_session(&mut self, id: &SessionId) -> bool {
        if let Some(session) = self.sessions.remove(id) {
            info!("Session {} disconnected", session.id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Marks the session as alive. Returns false for unknown sessions.
    pub fn touch(&mut self, id: SessionId) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Returns true if `sequence` advances past the last move applied for
    /// this session. Unknown sessions never accept a move.
    pub fn is_newer_sequence(&self, id: SessionId, sequence: u32) -> bool {
        self.sessions
            .get(&id)
            .map(|session| sequence > session.last_sequence)
            .unwrap_or(false)
    }

    /// Records the sequence of a move that was applied
    ///
    /// Only call this once the move has been validated and written; a
    /// rejected move must leave the counter where it was.
    pub fn record_sequence(&mut self, id: SessionId, sequence: u32) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.last_sequence = session.last_sequence.max(sequence);
        }
    }

    pub fn send_to(&self, id: SessionId, packet: Packet) -> bool {
        self.sessions
            .get(&id)
            .map(|session| session.send(packet))
            .unwrap_or(false)
    }

    /// Queues a copy of `packet` for every session. Returns how many accepted it.
    pub fn broadcast(&self, packet: &Packet) -> usize {
        let mut delivered = 0;
        for session in self.sessions.values() {
            if session.send(packet.clone()) {
                delivered += 1;
            } else {
                debug!("Outbox of session {} is closed", session.id);
            }
        }
        delivered
    }

    /// Removes sessions that stayed silent longer than `timeout`
    ///
    /// Returns the removed ids so the caller can drop their player records.
    /// This is the fallback for connections that vanish without a close.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<SessionId> {
        let timed_out: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for id in &timed_out {
            self.remove_session(id);
        }

        timed_out
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
