//! Client reconciliation loop
//!
//! Binds the local identity from `Welcome`, mirrors the room from snapshots
//! and decides once per frame which updates are worth sending. Moves pass a
//! dead-reckoning gate; locomotion changes are sent on the edge only.

use crate::remote::{RemotePlayers, RemotePose};
use glam::{Quat, Vec3};
use log::{debug, info, warn};
use shared::{
    Locomotion, Packet, PlayerRecord, SessionId, Transform, POSITION_EPSILON_SQ,
    ROTATION_EPSILON_RAD,
};
use std::collections::HashMap;
use std::time::Instant;

/// Angle of the minimal rotation between two unit quaternions
///
/// Measured through the relative rotation's vector part, which keeps
/// sub-milliradian differences distinguishable in `f32`.
pub fn rotation_delta(from: Quat, to: Quat) -> f32 {
    let relative = from.conjugate() * to;
    2.0 * relative.xyz().length().atan2(relative.w.abs())
}

/// Suppresses moves that would not visibly change the remote view
#[derive(Debug, Clone)]
pub struct DeadReckoningGate {
    position_epsilon_sq: f32,
    rotation_epsilon: f32,
    last_sent: Option<Transform>,
}

impl DeadReckoningGate {
    pub fn new(position_epsilon_sq: f32, rotation_epsilon: f32) -> Self {
        Self {
            position_epsilon_sq,
            rotation_epsilon,
            last_sent: None,
        }
    }

    /// True before anything was sent, or when `current` drifted past either
    /// threshold from the last transmitted transform.
    pub fn should_emit(&self, current: &Transform) -> bool {
        match &self.last_sent {
            None => true,
            Some(last) => {
                current.position.distance_squared(last.position) > self.position_epsilon_sq
                    || rotation_delta(last.rotation, current.rotation) > self.rotation_epsilon
            }
        }
    }

    pub fn record_sent(&mut self, transform: Transform) {
        self.last_sent = Some(transform);
    }

    pub fn last_sent(&self) -> Option<&Transform> {
        self.last_sent.as_ref()
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

impl Default for DeadReckoningGate {
    fn default() -> Self {
        Self::new(POSITION_EPSILON_SQ, ROTATION_EPSILON_RAD)
    }
}

/// Identity handed out by the server in `Welcome`
#[derive(Debug, Clone, PartialEq)]
pub struct LocalIdentity {
    pub session_id: SessionId,
    pub model: String,
    pub room: String,
}

pub struct Reconciler {
    identity: Option<LocalIdentity>,
    gate: DeadReckoningGate,
    last_locomotion: Locomotion,
    next_sequence: u32,

    /// Our own record as the server last reported it
    local_record: Option<PlayerRecord>,
    /// Set once the first snapshot containing us arrived
    spawned: bool,
    spawn_point: Option<Vec3>,

    remote: RemotePlayers,
    last_tick: Option<u32>,
    last_snapshot_at: Option<Instant>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::with_gate(DeadReckoningGate::default())
    }

    pub fn with_gate(gate: DeadReckoningGate) -> Self {
        Self {
            identity: None,
            gate,
            last_locomotion: Locomotion::Idle,
            next_sequence: 1,
            local_record: None,
            spawned: false,
            spawn_point: None,
            remote: RemotePlayers::new(),
            last_tick: None,
            last_snapshot_at: None,
        }
    }

    pub fn handle_packet(&mut self, packet: Packet, received_at: Instant) {
        match packet {
            Packet::Welcome {
                session_id,
                model,
                room,
            } => self.on_welcome(LocalIdentity {
                session_id,
                model,
                room,
            }),
            Packet::Snapshot { tick, players, .. } => self.on_snapshot(tick, &players, received_at),
            Packet::Rejected { reason } => {
                warn!("Server rejected us: {}", reason);
                self.reset();
            }
            other => debug!("Ignoring {} from server", other.kind()),
        }
    }

    fn on_welcome(&mut self, identity: LocalIdentity) {
        info!(
            "Joined room {} as session {} with model {}",
            identity.room, identity.session_id, identity.model
        );
        self.reset();
        self.identity = Some(identity);
    }

    fn on_snapshot(
        &mut self,
        tick: u32,
        players: &HashMap<SessionId, PlayerRecord>,
        received_at: Instant,
    ) {
        if let Some(last) = self.last_tick {
            if tick <= last {
                debug!("Dropping out-of-order snapshot {} (have {})", tick, last);
                return;
            }
        }
        self.last_tick = Some(tick);
        self.last_snapshot_at = Some(received_at);

        let local_id = self.session_id();
        self.local_record = local_id.and_then(|id| players.get(&id).cloned());
        self.remote.replace(players, local_id, received_at);

        if !self.spawned {
            if let Some(record) = &self.local_record {
                self.spawned = true;
                self.spawn_point = Some(record.position);
            }
        }
    }

    /// Server-chosen spawn position, handed out once after joining
    pub fn take_spawn_point(&mut self) -> Option<Vec3> {
        self.spawn_point.take()
    }

    /// Move packet for `transform` if it passes the gate
    pub fn gate_move(&mut self, transform: &Transform) -> Option<Packet> {
        if !self.spawned || !self.gate.should_emit(transform) {
            return None;
        }
        let packet = Packet::moved(self.next_sequence, transform);
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.gate.record_sent(*transform);
        Some(packet)
    }

    /// Animation packet if `locomotion` differs from the last one sent
    pub fn gate_animation(&mut self, locomotion: Locomotion) -> Option<Packet> {
        if !self.spawned || locomotion == self.last_locomotion {
            return None;
        }
        self.last_locomotion = locomotion;
        Some(Packet::animation(locomotion))
    }

    /// Everything the local player needs to send this frame
    ///
    /// Sends nothing until the server has placed us in a snapshot.
    pub fn tick(&mut self, transform: &Transform, locomotion: Locomotion) -> Vec<Packet> {
        self.gate_move(transform)
            .into_iter()
            .chain(self.gate_animation(locomotion))
            .collect()
    }

    /// Forget the session after the connection dropped
    pub fn disconnected(&mut self) {
        if let Some(identity) = &self.identity {
            info!("Session {} disconnected", identity.session_id);
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.identity = None;
        self.gate.reset();
        self.last_locomotion = Locomotion::Idle;
        self.next_sequence = 1;
        self.local_record = None;
        self.spawned = false;
        self.spawn_point = None;
        self.remote.clear();
        self.last_tick = None;
        self.last_snapshot_at = None;
    }

    pub fn identity(&self) -> Option<&LocalIdentity> {
        self.identity.as_ref()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.identity.as_ref().map(|identity| identity.session_id)
    }

    pub fn is_joined(&self) -> bool {
        self.identity.is_some()
    }

    pub fn is_spawned(&self) -> bool {
        self.spawned
    }

    pub fn local_record(&self) -> Option<&PlayerRecord> {
        self.local_record.as_ref()
    }

    pub fn remote(&self) -> &RemotePlayers {
        &self.remote
    }

    pub fn remote_poses(&self, now: Instant, interpolate: bool) -> Vec<RemotePose> {
        self.remote.poses(now, interpolate)
    }

    pub fn last_tick(&self) -> Option<u32> {
        self.last_tick
    }

    pub fn last_snapshot_at(&self) -> Option<Instant> {
        self.last_snapshot_at
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}
