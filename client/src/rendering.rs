use crate::remote::RemotePose;
use macroquad::prelude::{
    clear_background, draw_circle, draw_circle_lines, draw_line, draw_rectangle,
    draw_rectangle_lines, draw_text, screen_height, screen_width, Color, GREEN, RED, WHITE,
    YELLOW,
};
use shared::{Locomotion, SessionId, Transform};

pub const PIXELS_PER_METER: f32 = 40.0;
const AVATAR_RADIUS: f32 = 0.35;
const GRID_SPACING: f32 = 1.0;

/// Projects a ground-plane offset into screen space, rotated so that the
/// camera's forward direction points up the screen.
pub fn world_to_screen(dx: f32, dz: f32, camera_yaw: f32, scale: f32) -> (f32, f32) {
    let (sin, cos) = camera_yaw.sin_cos();
    let x = dx * cos - dz * sin;
    let y = dx * sin + dz * cos;
    (x * scale, y * scale)
}

/// Stable colour per model identifier
pub fn model_color(model: &str) -> Color {
    const PALETTE: [(u8, u8, u8); 6] = [
        (255, 99, 132),
        (54, 162, 235),
        (255, 206, 86),
        (75, 192, 192),
        (153, 102, 255),
        (255, 159, 64),
    ];
    let index = model
        .bytes()
        .fold(0usize, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte as usize))
        % PALETTE.len();
    let (r, g, b) = PALETTE[index];
    Color::from_rgba(r, g, b, 255)
}

#[derive(Debug, Clone)]
pub struct LocalView {
    pub session_id: SessionId,
    pub transform: Transform,
    pub locomotion: Locomotion,
    pub model: String,
}

#[derive(Debug, Clone, Default)]
pub struct HudInfo {
    pub connected: bool,
    pub room: Option<String>,
    pub session_id: Option<SessionId>,
    pub interpolation_enabled: bool,
    pub snapshot_tick: Option<u32>,
    pub snapshot_age_ms: Option<u128>,
}

pub struct Renderer {
    scale: f32,
}

impl Renderer {
    pub fn new() -> Self {
        Renderer {
            scale: PIXELS_PER_METER,
        }
    }

    pub fn render(
        &mut self,
        local: Option<&LocalView>,
        remotes: &[RemotePose],
        camera_yaw: f32,
        hud: &HudInfo,
    ) {
        clear_background(Color::from_rgba(26, 26, 26, 255));

        let focus = local
            .map(|view| (view.transform.position.x, view.transform.position.z))
            .unwrap_or((0.0, 0.0));
        let center = (screen_width() / 2.0, screen_height() / 2.0);

        self.draw_grid(focus, center, camera_yaw);

        for remote in remotes {
            self.draw_avatar(
                &remote.transform,
                remote.locomotion,
                &remote.model,
                remote.session_id,
                focus,
                center,
                camera_yaw,
                false,
            );
        }

        if let Some(view) = local {
            self.draw_avatar(
                &view.transform,
                view.locomotion,
                &view.model,
                view.session_id,
                focus,
                center,
                camera_yaw,
                true,
            );
        }

        self.draw_ui(hud, remotes.len() + usize::from(local.is_some()));
    }

    fn draw_grid(&self, focus: (f32, f32), center: (f32, f32), camera_yaw: f32) {
        let color = Color::from_rgba(51, 51, 51, 255);
        let reach = (screen_width().max(screen_height()) / self.scale).ceil() + 1.0;
        let start_x = (focus.0 / GRID_SPACING).floor() * GRID_SPACING - reach;
        let start_z = (focus.1 / GRID_SPACING).floor() * GRID_SPACING - reach;
        let lines = (2.0 * reach / GRID_SPACING) as usize;

        for i in 0..=lines {
            let offset = i as f32 * GRID_SPACING;

            let (ax, ay) = self.project(start_x + offset, start_z, focus, center, camera_yaw);
            let (bx, by) =
                self.project(start_x + offset, start_z + 2.0 * reach, focus, center, camera_yaw);
            draw_line(ax, ay, bx, by, 1.0, color);

            let (ax, ay) = self.project(start_x, start_z + offset, focus, center, camera_yaw);
            let (bx, by) =
                self.project(start_x + 2.0 * reach, start_z + offset, focus, center, camera_yaw);
            draw_line(ax, ay, bx, by, 1.0, color);
        }
    }

    fn project(
        &self,
        x: f32,
        z: f32,
        focus: (f32, f32),
        center: (f32, f32),
        camera_yaw: f32,
    ) -> (f32, f32) {
        let (sx, sy) = world_to_screen(x - focus.0, z - focus.1, camera_yaw, self.scale);
        (center.0 + sx, center.1 + sy)
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_avatar(
        &self,
        transform: &Transform,
        locomotion: Locomotion,
        model: &str,
        session_id: SessionId,
        focus: (f32, f32),
        center: (f32, f32),
        camera_yaw: f32,
        is_local: bool,
    ) {
        let position = transform.position;
        let (x, y) = self.project(position.x, position.z, focus, center, camera_yaw);
        let radius = AVATAR_RADIUS * self.scale;

        draw_circle(x, y, radius, model_color(model));
        let outline = if is_local { GREEN } else { WHITE };
        draw_circle_lines(x, y, radius, 2.0, outline);

        // Heading tick
        let yaw = transform.yaw();
        let (hx, hy) = self.project(
            position.x + yaw.sin() * AVATAR_RADIUS * 1.6,
            position.z + yaw.cos() * AVATAR_RADIUS * 1.6,
            focus,
            center,
            camera_yaw,
        );
        draw_line(x, y, hx, hy, 2.0, YELLOW);

        let label = format!("#{} {}", session_id, locomotion.as_tag());
        draw_text(&label, x - radius, y - radius - 6.0, 14.0, WHITE);
    }

    fn draw_ui(&self, hud: &HudInfo, player_count: usize) {
        let y_start = 10.0;
        let indicator_size = 12.0;

        let color = if hud.interpolation_enabled { GREEN } else { RED };
        draw_rectangle(10.0, y_start, indicator_size, indicator_size, color);
        draw_rectangle_lines(10.0, y_start, indicator_size, indicator_size, 1.0, WHITE);
        draw_text("I", 13.0, y_start + indicator_size + 12.0, 12.0, WHITE);

        let connection_color = if hud.connected && hud.session_id.is_some() {
            GREEN
        } else {
            RED
        };
        draw_rectangle(10.0, y_start + 35.0, 8.0, 8.0, connection_color);
        let status = match (&hud.room, hud.session_id) {
            (Some(room), Some(id)) => format!("{} #{}", room, id),
            _ if hud.connected => "joining".to_string(),
            _ => "offline".to_string(),
        };
        draw_text(&status, 22.0, y_start + 43.0, 14.0, WHITE);

        let snapshot = match (hud.snapshot_tick, hud.snapshot_age_ms) {
            (Some(tick), Some(age)) => format!("tick {} ({}ms ago)", tick, age),
            _ => "no snapshot".to_string(),
        };
        draw_text(&snapshot, 10.0, y_start + 60.0, 14.0, WHITE);

        let players = format!("{} players", player_count);
        draw_text(&players, 10.0, y_start + 76.0, 14.0, WHITE);
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}
