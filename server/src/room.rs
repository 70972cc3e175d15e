//! Authoritative player state for one room
//!
//! [`Room`] is the single source of truth for every player in a room. It is a
//! plain synchronous store: the room task in [`crate::lobby`] owns it and
//! feeds it join/move/animation/leave events one at a time, so no locking is
//! needed here.
//!
//! Mutations only mark the room dirty. The room task flushes one snapshot per
//! broadcast tick via [`Room::take_snapshot`].

use crate::validation::{validate_animation, validate_move, PayloadError};
use glam::Vec3;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    timestamp_ms, Packet, PlayerRecord, SessionId, DEFAULT_TICK_RATE, SESSION_TIMEOUT_MS,
};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Half-width of the square around the origin where players spawn
pub const SPAWN_SPREAD: f32 = 1.0;

pub const DEFAULT_MAX_PLAYERS: usize = 32;

pub fn default_models() -> Vec<String> {
    ["WomanSkirtCharacter", "ManCasualCharacter", "RobotCharacter"]
        .iter()
        .map(|model| model.to_string())
        .collect()
}

/// Settings shared by every room a server creates
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Joins beyond this many players are rejected
    pub max_players: usize,
    /// Snapshot flushes per second
    pub tick_rate: u32,
    /// Silence after which a session is treated as gone
    pub session_timeout: Duration,
    /// Visual models handed out round-robin at join
    pub models: Vec<String>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_players: DEFAULT_MAX_PLAYERS,
            tick_rate: DEFAULT_TICK_RATE,
            session_timeout: Duration::from_millis(SESSION_TIMEOUT_MS),
            models: default_models(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("session {0} already joined")]
    Duplicate(SessionId),

    #[error("room is full")]
    Full,

    #[error("room is closing")]
    Closed,

    #[error("unsupported client version {0}")]
    Version(u32),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum UpdateError {
    #[error("no record for session {0}")]
    UnknownSession(SessionId),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Hands out model identifiers in a fixed rotation.
#[derive(Debug, Clone)]
pub struct ModelPool {
    models: Vec<String>,
    next: usize,
}

impl ModelPool {
    pub const FALLBACK: &'static str = "default";

    pub fn new(models: Vec<String>) -> Self {
        Self { models, next: 0 }
    }

    pub fn assign(&mut self) -> String {
        if self.models.is_empty() {
            return Self::FALLBACK.to_string();
        }
        let model = self.models[self.next % self.models.len()].clone();
        self.next = (self.next + 1) % self.models.len();
        model
    }
}

pub struct Room {
    name: String,
    players: HashMap<SessionId, PlayerRecord>,
    models: ModelPool,
    rng: StdRng,
    max_players: usize,
    tick: u32,
    dirty: bool,
}

impl Room {
    pub fn new(name: impl Into<String>, config: &RoomConfig) -> Self {
        Self::with_rng(name, config, StdRng::from_entropy())
    }

    /// Creates a room with a caller-provided spawn RNG.
    pub fn with_rng(name: impl Into<String>, config: &RoomConfig, rng: StdRng) -> Self {
        Self {
            name: name.into(),
            players: HashMap::new(),
            models: ModelPool::new(config.models.clone()),
            rng,
            max_players: config.max_players,
            tick: 0,
            dirty: false,
        }
    }

    /// Creates the record for a newly joined session
    ///
    /// The player spawns at a small random offset around the origin, idle,
    /// with the next model from the pool.
    pub fn on_join(&mut self, session_id: SessionId) -> Result<PlayerRecord, JoinError> {
        if self.players.contains_key(&session_id) {
            return Err(JoinError::Duplicate(session_id));
        }
        if self.players.len() >= self.max_players {
            return Err(JoinError::Full);
        }

        let position = Vec3::new(
            self.rng.gen_range(-SPAWN_SPREAD..SPAWN_SPREAD),
            0.0,
            self.rng.gen_range(-SPAWN_SPREAD..SPAWN_SPREAD),
        );
        let record = PlayerRecord::new(position, self.models.assign());

        info!(
            "Player {} joined {} at {:?} as {}",
            session_id, self.name, record.position, record.model
        );
        self.players.insert(session_id, record.clone());
        self.dirty = true;
        info!("Total players in {}: {}", self.name, self.players.len());

        Ok(record)
    }

    /// Applies a `Move` payload to the session's own record
    ///
    /// Position and rotation are validated together and written together, so a
    /// rejected payload leaves the previous pose untouched.
    pub fn on_move(
        &mut self,
        session_id: SessionId,
        position: &[f32],
        rotation: &[f32],
    ) -> Result<(), UpdateError> {
        let player = self
            .players
            .get_mut(&session_id)
            .ok_or(UpdateError::UnknownSession(session_id))?;
        let transform = validate_move(position, rotation)?;

        player.position = transform.position;
        player.rotation = transform.rotation;
        self.dirty = true;
        Ok(())
    }

    pub fn on_animation(&mut self, session_id: SessionId, tag: &str) -> Result<(), UpdateError> {
        let player = self
            .players
            .get_mut(&session_id)
            .ok_or(UpdateError::UnknownSession(session_id))?;
        let locomotion = validate_animation(tag)?;

        if player.locomotion != locomotion {
            debug!("Player {} is now {}", session_id, locomotion.as_tag());
            player.locomotion = locomotion;
            self.dirty = true;
        }
        Ok(())
    }

    /// Drops the session's record
    ///
    /// Returns false if there was nothing to remove; a repeated leave is a
    /// no-op.
    pub fn on_leave(&mut self, session_id: SessionId, consented: bool) -> bool {
        if self.players.remove(&session_id).is_none() {
            return false;
        }
        info!(
            "Player {} left {} ({})",
            session_id,
            self.name,
            if consented { "graceful" } else { "dropped" }
        );
        info!("Total players in {}: {}", self.name, self.players.len());
        self.dirty = true;
        true
    }

    /// Builds a snapshot packet from a copy of the current state.
    pub fn snapshot(&self) -> Packet {
        Packet::Snapshot {
            tick: self.tick,
            timestamp: timestamp_ms(),
            players: self.players.clone(),
        }
    }

    /// Returns a snapshot if anything changed since the last one.
    pub fn take_snapshot(&mut self) -> Option<Packet> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        self.tick = self.tick.wrapping_add(1);
        Some(self.snapshot())
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&PlayerRecord> {
        self.players.get(session_id)
    }

    pub fn players(&self) -> &HashMap<SessionId, PlayerRecord> {
        &self.players
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
