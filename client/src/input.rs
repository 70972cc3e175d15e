//! Keyboard and mouse input mapped to movement intent

use glam::Vec3;
use macroquad::prelude::{
    is_key_down, is_mouse_button_down, mouse_position, KeyCode, MouseButton,
};
use shared::Locomotion;
use std::collections::HashSet;
use std::f32::consts::FRAC_PI_2;

/// Radians of camera turn per pixel of mouse drag
pub const MOUSE_SENSITIVITY: f32 = 0.005;
/// Keeps the orbit camera from flipping over the poles
pub const MAX_VERTICAL_ANGLE: f32 = FRAC_PI_2 - 0.1;
pub const MIN_VERTICAL_ANGLE: f32 = 0.1;

/// Movement keys the character controller understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Forward,
    Back,
    Left,
    Right,
    Sprint,
}

/// What the player wants to do this frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementIntent {
    /// Horizontal unit vector, or zero when standing still
    pub direction: Vec3,
    pub locomotion: Locomotion,
}

impl MovementIntent {
    pub const IDLE: MovementIntent = MovementIntent {
        direction: Vec3::ZERO,
        locomotion: Locomotion::Idle,
    };
}

/// Maps held keys to a camera-relative direction
///
/// Forward points away from the camera on the ground plane; opposite keys
/// cancel out. Sprint only matters while moving.
pub fn movement_intent(pressed: &HashSet<Key>, camera_yaw: f32) -> MovementIntent {
    let (sin, cos) = camera_yaw.sin_cos();
    let forward = Vec3::new(-sin, 0.0, -cos);
    let right = Vec3::new(cos, 0.0, -sin);

    let mut direction = Vec3::ZERO;
    if pressed.contains(&Key::Forward) {
        direction += forward;
    }
    if pressed.contains(&Key::Back) {
        direction -= forward;
    }
    if pressed.contains(&Key::Right) {
        direction += right;
    }
    if pressed.contains(&Key::Left) {
        direction -= right;
    }

    let direction = direction.normalize_or_zero();
    if direction == Vec3::ZERO {
        return MovementIntent::IDLE;
    }

    let locomotion = if pressed.contains(&Key::Sprint) {
        Locomotion::Run
    } else {
        Locomotion::Walk
    };
    MovementIntent {
        direction,
        locomotion,
    }
}

/// Orbit camera angles driven by mouse drag
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraAngle {
    /// Rotation around the vertical axis
    pub horizontal: f32,
    /// Elevation above the ground plane
    pub vertical: f32,
}

impl CameraAngle {
    pub fn new() -> Self {
        Self {
            horizontal: 0.0,
            vertical: std::f32::consts::FRAC_PI_4,
        }
    }

    pub fn apply_mouse_delta(&mut self, dx: f32, dy: f32) {
        self.horizontal -= dx * MOUSE_SENSITIVITY;
        self.vertical = (self.vertical + dy * MOUSE_SENSITIVITY)
            .clamp(MIN_VERTICAL_ANGLE, MAX_VERTICAL_ANGLE);
    }
}

impl Default for CameraAngle {
    fn default() -> Self {
        Self::new()
    }
}

/// One frame of sampled input
#[derive(Debug, Clone)]
pub struct FrameInput {
    pub intent: MovementIntent,
    pub toggle_interpolation: bool,
    pub quit: bool,
}

/// Samples macroquad's keyboard and mouse state once per frame
pub struct InputManager {
    camera: CameraAngle,
    last_mouse: Option<(f32, f32)>,

    // Previous frame key state for edge detection
    prev_key_i: bool,
}

impl InputManager {
    pub fn new() -> Self {
        Self {
            camera: CameraAngle::new(),
            last_mouse: None,
            prev_key_i: false,
        }
    }

    pub fn update(&mut self) -> FrameInput {
        let mut pressed = HashSet::new();
        if is_key_down(KeyCode::W) || is_key_down(KeyCode::Up) {
            pressed.insert(Key::Forward);
        }
        if is_key_down(KeyCode::S) || is_key_down(KeyCode::Down) {
            pressed.insert(Key::Back);
        }
        if is_key_down(KeyCode::A) || is_key_down(KeyCode::Left) {
            pressed.insert(Key::Left);
        }
        if is_key_down(KeyCode::D) || is_key_down(KeyCode::Right) {
            pressed.insert(Key::Right);
        }
        if is_key_down(KeyCode::LeftShift) || is_key_down(KeyCode::RightShift) {
            pressed.insert(Key::Sprint);
        }

        // Camera turns only while the left button is held
        let mouse = mouse_position();
        if is_mouse_button_down(MouseButton::Left) {
            if let Some((last_x, last_y)) = self.last_mouse {
                self.camera.apply_mouse_delta(mouse.0 - last_x, mouse.1 - last_y);
            }
            self.last_mouse = Some(mouse);
        } else {
            self.last_mouse = None;
        }

        let key_i = is_key_down(KeyCode::I);
        let toggle_interpolation = key_i && !self.prev_key_i;
        self.prev_key_i = key_i;

        FrameInput {
            intent: movement_intent(&pressed, self.camera.horizontal),
            toggle_interpolation,
            quit: is_key_down(KeyCode::Escape),
        }
    }

    pub fn camera(&self) -> CameraAngle {
        self.camera
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}
