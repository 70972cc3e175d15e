//! Wire protocol shared by the room server and the avatar client.
//!
//! Every packet travels as one binary WebSocket message encoded with
//! [`encode`]/[`decode`]. Client payloads carry raw component lists so the
//! server can reject malformed shapes instead of failing to decode them.

use bincode::Options;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_ROOM: &str = "my_room";
pub const DEFAULT_PORT: u16 = 2567;

/// Squared positional change that justifies a `Move`.
pub const POSITION_EPSILON_SQ: f32 = 1e-4;
/// Angular change (radians) that justifies a `Move`.
pub const ROTATION_EPSILON_RAD: f32 = 1e-3;

pub const DEFAULT_TICK_RATE: u32 = 20;
pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;
pub const SESSION_TIMEOUT_MS: u64 = 5000;

/// Upper bound for a single encoded packet.
pub const MAX_FRAME_BYTES: u64 = 256 * 1024;

pub type SessionId = u32;

/// Coarse movement state driving animation selection.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locomotion {
    #[default]
    Idle,
    Walk,
    Run,
}

impl Locomotion {
    pub const ALL: [Locomotion; 3] = [Locomotion::Idle, Locomotion::Walk, Locomotion::Run];

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "idle" => Some(Locomotion::Idle),
            "walk" => Some(Locomotion::Walk),
            "run" => Some(Locomotion::Run),
            _ => None,
        }
    }

    pub fn as_tag(self) -> &'static str {
        match self {
            Locomotion::Idle => "idle",
            Locomotion::Walk => "walk",
            Locomotion::Run => "run",
        }
    }
}

/// World-space pose of an avatar root.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Heading around the vertical axis, in radians.
    pub fn yaw(&self) -> f32 {
        let forward = self.rotation * Vec3::Z;
        forward.x.atan2(forward.z)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Authoritative state of one connected player.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerRecord {
    pub position: Vec3,
    pub rotation: Quat,
    pub locomotion: Locomotion,
    pub model: String,
}

impl PlayerRecord {
    pub fn new(position: Vec3, model: String) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            locomotion: Locomotion::Idle,
            model,
        }
    }

    pub fn transform(&self) -> Transform {
        Transform::new(self.position, self.rotation)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client -> server
    Join {
        client_version: u32,
        room: String,
    },
    Move {
        sequence: u32,
        position: Vec<f32>,
        rotation: Vec<f32>,
    },
    Animation {
        locomotion: String,
    },
    Heartbeat {
        timestamp: u64,
    },
    Leave,

    // Server -> client
    Welcome {
        session_id: SessionId,
        model: String,
        room: String,
    },
    Snapshot {
        tick: u32,
        timestamp: u64,
        players: HashMap<SessionId, PlayerRecord>,
    },
    Rejected {
        reason: String,
    },
}

impl Packet {
    /// Builds a `Move` from a typed transform.
    pub fn moved(sequence: u32, transform: &Transform) -> Self {
        Packet::Move {
            sequence,
            position: transform.position.to_array().to_vec(),
            rotation: transform.rotation.to_array().to_vec(),
        }
    }

    pub fn animation(locomotion: Locomotion) -> Self {
        Packet::Animation {
            locomotion: locomotion.as_tag().to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Join { .. } => "join",
            Packet::Move { .. } => "move",
            Packet::Animation { .. } => "animation",
            Packet::Heartbeat { .. } => "heartbeat",
            Packet::Leave => "leave",
            Packet::Welcome { .. } => "welcome",
            Packet::Snapshot { .. } => "snapshot",
            Packet::Rejected { .. } => "rejected",
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(bincode::Error),

    #[error("decode error: {0}")]
    Decode(bincode::Error),
}

fn codec_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_FRAME_BYTES)
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    codec_options().serialize(packet).map_err(CodecError::Encode)
}

pub fn decode(data: &[u8]) -> Result<Packet, CodecError> {
    codec_options().deserialize(data).map_err(CodecError::Decode)
}

/// Milliseconds since the Unix epoch.
pub fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_locomotion_tags() {
        for locomotion in Locomotion::ALL {
            assert_eq!(Locomotion::from_tag(locomotion.as_tag()), Some(locomotion));
        }
        assert_eq!(Locomotion::from_tag("jump"), None);
        assert_eq!(Locomotion::from_tag("Walk"), None);
        assert_eq!(Locomotion::default(), Locomotion::Idle);
    }

    #[test]
    fn test_player_record_creation() {
        let record = PlayerRecord::new(Vec3::new(0.5, 0.0, -0.25), "Robot".to_string());
        assert_eq!(record.rotation, Quat::IDENTITY);
        assert_eq!(record.locomotion, Locomotion::Idle);
        assert_eq!(record.model, "Robot");
        assert_eq!(record.transform().position, Vec3::new(0.5, 0.0, -0.25));
    }

    #[test]
    fn test_transform_yaw() {
        let facing_x = Transform::new(Vec3::ZERO, Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        assert_approx_eq!(facing_x.yaw(), std::f32::consts::FRAC_PI_2, 1e-5);
        assert_approx_eq!(Transform::IDENTITY.yaw(), 0.0, 1e-6);
    }

    #[test]
    fn test_move_packet_from_transform() {
        let transform = Transform::new(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY);
        match Packet::moved(7, &transform) {
            Packet::Move {
                sequence,
                position,
                rotation,
            } => {
                assert_eq!(sequence, 7);
                assert_eq!(position, vec![1.0, 2.0, 3.0]);
                assert_eq!(rotation, vec![0.0, 0.0, 0.0, 1.0]);
            }
            other => panic!("Wrong packet: {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut players = HashMap::new();
        players.insert(1, PlayerRecord::new(Vec3::new(1.0, 2.0, 3.0), "A".to_string()));
        let mut running = PlayerRecord::new(Vec3::ZERO, "B".to_string());
        running.locomotion = Locomotion::Run;
        running.rotation = Quat::from_rotation_y(1.0);
        players.insert(2, running.clone());

        let packet = Packet::Snapshot {
            tick: 42,
            timestamp: 123456789,
            players,
        };

        let decoded = decode(&encode(&packet).unwrap()).unwrap();
        match decoded {
            Packet::Snapshot { tick, players, .. } => {
                assert_eq!(tick, 42);
                assert_eq!(players.len(), 2);
                assert_eq!(players[&1].position, Vec3::new(1.0, 2.0, 3.0));
                assert_eq!(players[&2], running);
            }
            other => panic!("Wrong packet type after deserialization: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = encode(&Packet::Leave).unwrap();
        bytes.push(0);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_packet_kind() {
        assert_eq!(Packet::Leave.kind(), "leave");
        assert_eq!(Packet::animation(Locomotion::Run).kind(), "animation");
        assert_eq!(
            Packet::animation(Locomotion::Walk),
            Packet::Animation {
                locomotion: "walk".to_string()
            }
        );
    }

    #[test]
    fn test_timestamp_is_monotonic_enough() {
        let first = timestamp_ms();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(timestamp_ms() > first);
    }
}
