//! Headless load generator: bots that join a room and wander around

use clap::Parser;
use client::input::MovementIntent;
use client::network::{Connection, ConnectionEvent};
use client::physics::{CharacterController, KinematicBody};
use client::reconcile::Reconciler;
use glam::Vec3;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Locomotion, DEFAULT_ROOM};
use std::time::{Duration, Instant};
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Room server WebSocket URL
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:2567")]
    server: String,

    /// Room to join
    #[arg(short = 'r', long, default_value = DEFAULT_ROOM)]
    room: String,

    /// Number of bots to spawn
    #[arg(short = 'n', long, default_value_t = 4)]
    bots: usize,

    /// How long each bot stays in the room
    #[arg(long, default_value_t = 30)]
    seconds: u64,
}

#[derive(Debug, Default)]
struct BotStats {
    packets_sent: usize,
    snapshots: usize,
    peak_remote: usize,
}

fn random_intent(rng: &mut StdRng) -> MovementIntent {
    let locomotion = match rng.gen_range(0..10) {
        0..=2 => Locomotion::Idle,
        3..=7 => Locomotion::Walk,
        _ => Locomotion::Run,
    };
    if locomotion == Locomotion::Idle {
        return MovementIntent::IDLE;
    }
    let heading = rng.gen_range(0.0..std::f32::consts::TAU);
    MovementIntent {
        direction: Vec3::new(heading.sin(), 0.0, heading.cos()),
        locomotion,
    }
}

async fn run_bot(
    index: usize,
    server: String,
    room: String,
    lifetime: Duration,
) -> Result<BotStats, Box<dyn std::error::Error + Send + Sync>> {
    let mut connection = Connection::connect(&server, &room).await?;
    let mut reconciler = Reconciler::new();
    let mut body = KinematicBody::new(Vec3::ZERO);
    let mut controller = CharacterController::new();
    let mut rng = StdRng::from_entropy();
    let mut stats = BotStats::default();

    let dt = 1.0 / 60.0;
    let mut ticker = interval(Duration::from_secs_f32(dt));
    let mut intent = MovementIntent::IDLE;
    let mut next_decision = Instant::now();
    let started = Instant::now();

    while started.elapsed() < lifetime {
        ticker.tick().await;

        while let Some(event) = connection.try_recv() {
            match event {
                ConnectionEvent::Packet(packet, received_at) => {
                    if matches!(packet, shared::Packet::Snapshot { .. }) {
                        stats.snapshots += 1;
                    }
                    reconciler.handle_packet(packet, received_at);
                }
                ConnectionEvent::Closed => {
                    warn!("Bot {} lost its connection", index);
                    return Ok(stats);
                }
            }
        }
        stats.peak_remote = stats.peak_remote.max(reconciler.remote().len());

        if let Some(spawn) = reconciler.take_spawn_point() {
            body.teleport(spawn);
        }

        if Instant::now() >= next_decision {
            intent = random_intent(&mut rng);
            next_decision = Instant::now() + Duration::from_millis(rng.gen_range(500..2500));
        }

        controller.update(&mut body, &intent, dt);
        body.step(dt);

        for packet in reconciler.tick(&controller.transform(&body), intent.locomotion) {
            connection.send(packet);
            stats.packets_sent += 1;
        }
    }

    connection.leave().await;
    Ok(stats)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    info!(
        "Spawning {} bots in room {} on {} for {}s",
        args.bots, args.room, args.server, args.seconds
    );

    let lifetime = Duration::from_secs(args.seconds);
    let handles: Vec<_> = (0..args.bots)
        .map(|index| {
            let server = args.server.clone();
            let room = args.room.clone();
            tokio::spawn(async move { (index, run_bot(index, server, room, lifetime).await) })
        })
        .collect();

    for handle in handles {
        match handle.await? {
            (index, Ok(stats)) => info!(
                "Bot {}: {} packets sent, {} snapshots, up to {} others seen",
                index, stats.packets_sent, stats.snapshots, stats.peak_remote
            ),
            (index, Err(e)) => warn!("Bot {} failed: {}", index, e),
        }
    }

    Ok(())
}
