//! Client-side view of every other player in the room
//!
//! The view is rebuilt from each snapshot as a whole; a player missing from
//! the latest snapshot is gone from the view. For optional smoothing the
//! previous sample of each player is kept next to the latest one.

use glam::Quat;
use shared::{Locomotion, PlayerRecord, SessionId, Transform};
use std::collections::HashMap;
use std::time::Instant;

/// What the renderer needs to draw one remote player
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePose {
    pub session_id: SessionId,
    pub transform: Transform,
    pub locomotion: Locomotion,
    pub model: String,
}

#[derive(Debug, Clone)]
struct Sample {
    record: PlayerRecord,
    received_at: Instant,
}

#[derive(Debug, Clone)]
struct RemoteEntry {
    previous: Option<Sample>,
    latest: Sample,
}

impl RemoteEntry {
    /// Blends from the previous sample to the latest one over the interval
    /// that separated them, starting when the latest one arrived.
    fn interpolated(&self, now: Instant) -> Transform {
        let latest = self.latest.record.transform();
        let previous = match &self.previous {
            Some(previous) => previous,
            None => return latest,
        };

        let span = self
            .latest
            .received_at
            .saturating_duration_since(previous.received_at)
            .as_secs_f32();
        if span <= f32::EPSILON {
            return latest;
        }

        let elapsed = now
            .saturating_duration_since(self.latest.received_at)
            .as_secs_f32();
        let alpha = (elapsed / span).clamp(0.0, 1.0);

        let from = previous.record.transform();
        Transform::new(
            from.position.lerp(latest.position, alpha),
            slerp(from.rotation, latest.rotation, alpha),
        )
    }
}

fn slerp(from: Quat, to: Quat, alpha: f32) -> Quat {
    if alpha >= 1.0 {
        to
    } else {
        from.slerp(to, alpha).normalize()
    }
}

#[derive(Debug, Default)]
pub struct RemotePlayers {
    entries: HashMap<SessionId, RemoteEntry>,
}

impl RemotePlayers {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Replaces the view with `players`, skipping the local session
    ///
    /// The new map is built on the side and swapped in, so readers never see
    /// half of one snapshot and half of another.
    pub fn replace(
        &mut self,
        players: &HashMap<SessionId, PlayerRecord>,
        local: Option<SessionId>,
        received_at: Instant,
    ) {
        let mut previous = std::mem::take(&mut self.entries);
        let entries = players
            .iter()
            .filter(|(id, _)| Some(**id) != local)
            .map(|(id, record)| {
                let entry = RemoteEntry {
                    previous: previous.remove(id).map(|entry| entry.latest),
                    latest: Sample {
                        record: record.clone(),
                        received_at,
                    },
                };
                (*id, entry)
            })
            .collect();
        self.entries = entries;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&PlayerRecord> {
        self.entries.get(session_id).map(|entry| &entry.latest.record)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.entries.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Poses to draw this frame, ordered by session id
    ///
    /// Without interpolation each player sits exactly at its latest snapshot
    /// pose.
    pub fn poses(&self, now: Instant, interpolate: bool) -> Vec<RemotePose> {
        let mut poses: Vec<RemotePose> = self
            .entries
            .iter()
            .map(|(id, entry)| RemotePose {
                session_id: *id,
                transform: if interpolate {
                    entry.interpolated(now)
                } else {
                    entry.latest.record.transform()
                },
                locomotion: entry.latest.record.locomotion,
                model: entry.latest.record.model.clone(),
            })
            .collect();
        poses.sort_by_key(|pose| pose.session_id);
        poses
    }
}
