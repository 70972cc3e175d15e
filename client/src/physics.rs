//! Local character physics
//!
//! The avatar is a kinematic body on the ground plane. A controller steers it
//! toward the speed of the current locomotion state by applying impulses, and
//! turns it to face where it is going.

use crate::input::MovementIntent;
use glam::{Quat, Vec3};
use shared::{Locomotion, Transform};

pub const WALK_SPEED: f32 = 2.0;
pub const RUN_SPEED: f32 = 5.0;
/// How quickly velocity converges on the target, per second
pub const ACCELERATION: f32 = 12.0;

pub fn target_speed(locomotion: Locomotion) -> f32 {
    match locomotion {
        Locomotion::Idle => 0.0,
        Locomotion::Walk => WALK_SPEED,
        Locomotion::Run => RUN_SPEED,
    }
}

/// The small surface a character controller needs from a physics body
pub trait PhysicsBody {
    fn position(&self) -> Vec3;
    fn linear_velocity(&self) -> Vec3;
    fn mass(&self) -> f32;
    fn apply_impulse(&mut self, impulse: Vec3);
}

#[derive(Debug, Clone)]
pub struct KinematicBody {
    position: Vec3,
    velocity: Vec3,
    mass: f32,
}

impl KinematicBody {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            mass: 1.0,
        }
    }

    /// Moves the body without carrying momentum along
    pub fn teleport(&mut self, position: Vec3) {
        self.position = position;
        self.velocity = Vec3::ZERO;
    }

    pub fn step(&mut self, dt: f32) {
        self.position += self.velocity * dt;
    }
}

impl PhysicsBody for KinematicBody {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn linear_velocity(&self) -> Vec3 {
        self.velocity
    }

    fn mass(&self) -> f32 {
        self.mass
    }

    fn apply_impulse(&mut self, impulse: Vec3) {
        self.velocity += impulse / self.mass;
    }
}

/// Drives a body from movement intent and tracks which way it faces
#[derive(Debug, Clone)]
pub struct CharacterController {
    facing: Quat,
}

impl CharacterController {
    pub fn new() -> Self {
        Self {
            facing: Quat::IDENTITY,
        }
    }

    pub fn update<B: PhysicsBody>(&mut self, body: &mut B, intent: &MovementIntent, dt: f32) {
        let velocity = body.linear_velocity();
        let horizontal = Vec3::new(velocity.x, 0.0, velocity.z);
        let target = intent.direction * target_speed(intent.locomotion);

        let blend = (ACCELERATION * dt).clamp(0.0, 1.0);
        let impulse = (target - horizontal) * blend * body.mass();
        body.apply_impulse(impulse);

        if intent.direction.length_squared() > 0.0 {
            self.facing = Quat::from_rotation_y(intent.direction.x.atan2(intent.direction.z));
        }
    }

    pub fn facing(&self) -> Quat {
        self.facing
    }

    pub fn transform<B: PhysicsBody>(&self, body: &B) -> Transform {
        Transform::new(body.position(), self.facing)
    }
}

impl Default for CharacterController {
    fn default() -> Self {
        Self::new()
    }
}
