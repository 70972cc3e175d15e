use clap::Parser;
use client::input::InputManager;
use client::network::{Connection, ConnectionEvent};
use client::physics::{CharacterController, KinematicBody};
use client::reconcile::Reconciler;
use client::rendering::{HudInfo, LocalView, Renderer};
use log::{error, info};
use macroquad::prelude::{get_frame_time, next_frame, Conf};
use shared::DEFAULT_ROOM;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Room server WebSocket URL
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:2567")]
    server: String,

    /// Room to join
    #[arg(short = 'r', long, default_value = DEFAULT_ROOM)]
    room: String,

    /// Start with remote interpolation enabled (toggle with I)
    #[arg(short = 'i', long)]
    interpolate: bool,

    /// Window width
    #[arg(short = 'w', long, default_value = "1024")]
    width: i32,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "768")]
    height: i32,
}

fn window_conf() -> Conf {
    let args = Args::parse();
    Conf {
        window_title: "Avatar Sandbox".to_owned(),
        window_width: args.width,
        window_height: args.height,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    if let Err(e) = run(Args::parse()).await {
        error!("Client error: {}", e);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting client...");
    info!("Controls: WASD to move, Shift to run, drag to turn the camera, I toggles interpolation");

    // Network tasks live on their own runtime; the frame loop belongs to macroquad
    let runtime = tokio::runtime::Runtime::new()?;
    let mut connection = runtime.block_on(Connection::connect(&args.server, &args.room))?;

    let mut reconciler = Reconciler::new();
    let mut input = InputManager::new();
    let mut body = KinematicBody::new(glam::Vec3::ZERO);
    let mut controller = CharacterController::new();
    let mut renderer = Renderer::new();
    let mut interpolation_enabled = args.interpolate;
    let mut connected = true;

    loop {
        while let Some(event) = connection.try_recv() {
            match event {
                ConnectionEvent::Packet(packet, received_at) => {
                    reconciler.handle_packet(packet, received_at)
                }
                ConnectionEvent::Closed => {
                    reconciler.disconnected();
                    connected = false;
                }
            }
        }

        if let Some(spawn) = reconciler.take_spawn_point() {
            body.teleport(spawn);
        }

        let frame = input.update();
        if frame.quit {
            break;
        }
        if frame.toggle_interpolation {
            interpolation_enabled = !interpolation_enabled;
            info!(
                "Interpolation {}",
                if interpolation_enabled { "enabled" } else { "disabled" }
            );
        }

        let dt = get_frame_time();
        controller.update(&mut body, &frame.intent, dt);
        body.step(dt);
        let transform = controller.transform(&body);

        if connected {
            for packet in reconciler.tick(&transform, frame.intent.locomotion) {
                connection.send(packet);
            }
        }

        let now = Instant::now();
        let local = reconciler.identity().map(|identity| LocalView {
            session_id: identity.session_id,
            transform,
            locomotion: frame.intent.locomotion,
            model: identity.model.clone(),
        });
        let hud = HudInfo {
            connected,
            room: reconciler.identity().map(|identity| identity.room.clone()),
            session_id: reconciler.session_id(),
            interpolation_enabled,
            snapshot_tick: reconciler.last_tick(),
            snapshot_age_ms: reconciler
                .last_snapshot_at()
                .map(|at| now.saturating_duration_since(at).as_millis()),
        };
        let remotes = reconciler.remote_poses(now, interpolation_enabled);
        renderer.render(local.as_ref(), &remotes, input.camera().horizontal, &hud);

        next_frame().await;
    }

    if connected {
        info!("Leaving room");
        runtime.block_on(connection.leave());
    }
    runtime.shutdown_timeout(Duration::from_millis(250));

    Ok(())
}
