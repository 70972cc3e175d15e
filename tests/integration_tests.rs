//! Integration tests for the room server and the client reconciliation loop
//!
//! Every test starts a real server on an ephemeral port and talks to it over
//! WebSocket, either through the client library or with raw frames.

use client::network::{Connection, ConnectionEvent};
use client::reconcile::Reconciler;
use futures_util::{SinkExt, StreamExt};
use glam::{Quat, Vec3};
use server::network::{Server, ServerConfig};
use server::room::{default_models, RoomConfig};
use shared::{decode, encode, Locomotion, Packet, SessionId, Transform, PROTOCOL_VERSION};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

type RawSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(room: RoomConfig) -> String {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        join_timeout: Duration::from_secs(2),
        room,
    };
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    format!("ws://{}", addr)
}

/// A client library session driven by hand
struct TestClient {
    connection: Connection,
    reconciler: Reconciler,
}

impl TestClient {
    async fn join(url: &str, room: &str) -> Self {
        let connection = Connection::connect(url, room).await.unwrap();
        let mut client = TestClient {
            connection,
            reconciler: Reconciler::new(),
        };
        client.wait_until(|reconciler| reconciler.is_spawned()).await;
        client
    }

    fn id(&self) -> SessionId {
        self.reconciler.session_id().unwrap()
    }

    /// Feeds events into the reconciler until `done` holds
    async fn wait_until<F>(&mut self, done: F)
    where
        F: Fn(&Reconciler) -> bool,
    {
        let result = timeout(WAIT, async {
            while !done(&self.reconciler) {
                match self.connection.recv().await {
                    Some(ConnectionEvent::Packet(packet, at)) => {
                        self.reconciler.handle_packet(packet, at)
                    }
                    Some(ConnectionEvent::Closed) | None => panic!("Connection closed early"),
                }
            }
        })
        .await;
        assert!(result.is_ok(), "Timed out waiting for room state");
    }

    /// Applies whatever already arrived without waiting for more
    fn drain(&mut self) {
        while let Some(ConnectionEvent::Packet(packet, at)) = self.connection.try_recv() {
            self.reconciler.handle_packet(packet, at);
        }
    }

    fn send_tick(&mut self, transform: Transform, locomotion: Locomotion) -> usize {
        let packets = self.reconciler.tick(&transform, locomotion);
        let count = packets.len();
        for packet in packets {
            self.connection.send(packet);
        }
        count
    }
}

async fn raw_join(url: &str, room: &str) -> (RawSocket, SessionId) {
    let (mut socket, _) = connect_async(url).await.unwrap();
    send_raw(
        &mut socket,
        &Packet::Join {
            client_version: PROTOCOL_VERSION,
            room: room.to_string(),
        },
    )
    .await;
    match next_raw(&mut socket).await {
        Packet::Welcome { session_id, .. } => (socket, session_id),
        other => panic!("Expected welcome, got {:?}", other),
    }
}

async fn send_raw(socket: &mut RawSocket, packet: &Packet) {
    socket
        .send(Message::Binary(encode(packet).unwrap()))
        .await
        .unwrap();
}

async fn next_raw(socket: &mut RawSocket) -> Packet {
    timeout(WAIT, async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Binary(bytes))) => return decode(&bytes).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("Socket ended: {:?}", other),
            }
        }
    })
    .await
    .expect("Timed out waiting for a packet")
}

/// SESSION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Two clients see each other, one moves, then one disconnects
    #[tokio::test]
    async fn two_clients_share_a_room() {
        let url = start_server(RoomConfig::default()).await;

        let mut a = TestClient::join(&url, "my_room").await;
        let model = a.reconciler.identity().unwrap().model.clone();
        assert!(default_models().contains(&model));
        assert_eq!(a.reconciler.local_record().unwrap().model, model);

        let mut b = TestClient::join(&url, "my_room").await;
        let (a_id, b_id) = (a.id(), b.id());
        assert_ne!(a_id, b_id);

        b.wait_until(|r| r.remote().contains(&a_id)).await;
        a.wait_until(|r| r.remote().contains(&b_id)).await;
        assert_eq!(b.reconciler.remote().get(&a_id).unwrap().model, model);

        let target = Transform::new(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY);
        assert_eq!(a.send_tick(target, Locomotion::Idle), 1);
        b.wait_until(|r| {
            r.remote()
                .get(&a_id)
                .map(|record| record.position == Vec3::new(1.0, 2.0, 3.0))
                .unwrap_or(false)
        })
        .await;

        drop(a);
        b.wait_until(|r| !r.remote().contains(&a_id)).await;
        assert!(b.reconciler.remote().is_empty());
    }

    /// Locomotion changes reach other clients
    #[tokio::test]
    async fn locomotion_is_relayed() {
        let url = start_server(RoomConfig::default()).await;
        let mut a = TestClient::join(&url, "my_room").await;
        let mut b = TestClient::join(&url, "my_room").await;
        let a_id = a.id();
        b.wait_until(|r| r.remote().contains(&a_id)).await;

        a.send_tick(Transform::IDENTITY, Locomotion::Run);
        b.wait_until(|r| {
            r.remote()
                .get(&a_id)
                .map(|record| record.locomotion == Locomotion::Run)
                .unwrap_or(false)
        })
        .await;
    }

    /// An explicit leave removes the player for everyone else
    #[tokio::test]
    async fn explicit_leave_removes_player() {
        let url = start_server(RoomConfig::default()).await;
        let a = TestClient::join(&url, "my_room").await;
        let mut b = TestClient::join(&url, "my_room").await;
        let a_id = a.id();
        b.wait_until(|r| r.remote().contains(&a_id)).await;

        a.connection.leave().await;
        b.wait_until(|r| !r.remote().contains(&a_id)).await;
    }

    /// A silent connection is dropped after the session timeout
    #[tokio::test]
    async fn silent_session_times_out() {
        let url = start_server(RoomConfig {
            session_timeout: Duration::from_millis(1500),
            ..RoomConfig::default()
        })
        .await;

        let mut watcher = TestClient::join(&url, "my_room").await;
        let (_silent, silent_id) = raw_join(&url, "my_room").await;
        watcher.wait_until(|r| r.remote().contains(&silent_id)).await;

        watcher.wait_until(|r| !r.remote().contains(&silent_id)).await;
        assert!(watcher.reconciler.is_joined());
    }

    /// Heartbeats alone keep an idle client in the room
    #[tokio::test]
    async fn heartbeating_session_stays_in_room() {
        let session_timeout = Duration::from_millis(1500);
        let url = start_server(RoomConfig {
            session_timeout,
            ..RoomConfig::default()
        })
        .await;

        let mut idle = TestClient::join(&url, "my_room").await;
        let mut watcher = TestClient::join(&url, "my_room").await;
        let idle_id = idle.id();
        watcher.wait_until(|r| r.remote().contains(&idle_id)).await;

        let start = Instant::now();
        while start.elapsed() < session_timeout * 2 + Duration::from_millis(500) {
            idle.drain();
            watcher.drain();
            sleep(Duration::from_millis(50)).await;
        }

        watcher.drain();
        assert!(watcher.reconciler.remote().contains(&idle_id));
        assert!(!idle.connection.is_closed());

        // Still served, not just still listed
        idle.send_tick(Transform::IDENTITY, Locomotion::Walk);
        watcher
            .wait_until(|r| {
                r.remote()
                    .get(&idle_id)
                    .map(|record| record.locomotion == Locomotion::Walk)
                    .unwrap_or(false)
            })
            .await;
    }

    /// The server hangs up on a timed-out peer that never answers the close
    #[tokio::test]
    async fn timed_out_connection_is_closed() {
        let url = start_server(RoomConfig {
            session_timeout: Duration::from_millis(500),
            ..RoomConfig::default()
        })
        .await;
        let (mut socket, _) = raw_join(&url, "my_room").await;

        // Read the TCP stream underneath so no close reply is ever sent
        let stream = socket.get_mut();
        let mut buf = [0u8; 1024];
        let closed = timeout(Duration::from_secs(4), async {
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "Server kept the timed-out connection open");
    }
}

/// PROTOCOL ROBUSTNESS TESTS
mod protocol_tests {
    use super::*;

    /// Malformed payloads are ignored and the session stays usable
    #[tokio::test]
    async fn malformed_move_is_ignored() {
        let url = start_server(RoomConfig::default()).await;
        let (mut socket, id) = raw_join(&url, "my_room").await;

        send_raw(
            &mut socket,
            &Packet::Move {
                sequence: 1,
                position: vec![9.0, 9.0],
                rotation: vec![0.0, 0.0, 0.0, 1.0],
            },
        )
        .await;
        socket
            .send(Message::Binary(vec![0xde, 0xad, 0xbe, 0xef]))
            .await
            .unwrap();
        send_raw(&mut socket, &Packet::animation(Locomotion::Walk)).await;

        loop {
            if let Packet::Snapshot { players, .. } = next_raw(&mut socket).await {
                let record = &players[&id];
                assert_ne!(record.position, Vec3::new(9.0, 9.0, 0.0));
                if record.locomotion == Locomotion::Walk {
                    assert!(record.position.x.abs() <= 1.0);
                    break;
                }
            }
        }
    }

    /// A move older than the last accepted one never overwrites it
    #[tokio::test]
    async fn stale_move_is_dropped() {
        let url = start_server(RoomConfig::default()).await;
        let (mut socket, id) = raw_join(&url, "my_room").await;

        let newer = Transform::new(Vec3::new(5.0, 0.0, 0.0), Quat::IDENTITY);
        let older = Transform::new(Vec3::new(-5.0, 0.0, 0.0), Quat::IDENTITY);
        send_raw(&mut socket, &Packet::moved(2, &newer)).await;
        send_raw(&mut socket, &Packet::moved(1, &older)).await;
        send_raw(&mut socket, &Packet::animation(Locomotion::Run)).await;

        loop {
            if let Packet::Snapshot { players, .. } = next_raw(&mut socket).await {
                if players[&id].locomotion == Locomotion::Run {
                    assert_eq!(players[&id].position, Vec3::new(5.0, 0.0, 0.0));
                    break;
                }
            }
        }
    }

    /// The first frame a client sees is its welcome
    #[tokio::test]
    async fn welcome_precedes_snapshots() {
        let url = start_server(RoomConfig::default()).await;
        let _busy = TestClient::join(&url, "my_room").await;

        let (mut socket, _) = connect_async(&url).await.unwrap();
        send_raw(
            &mut socket,
            &Packet::Join {
                client_version: PROTOCOL_VERSION,
                room: "my_room".to_string(),
            },
        )
        .await;
        assert!(matches!(next_raw(&mut socket).await, Packet::Welcome { .. }));
    }

    #[tokio::test]
    async fn version_mismatch_is_rejected() {
        let url = start_server(RoomConfig::default()).await;
        let mut connection = Connection::connect_with_version(&url, "my_room", PROTOCOL_VERSION + 1)
            .await
            .unwrap();

        let event = timeout(WAIT, connection.recv()).await.unwrap();
        assert!(matches!(
            event,
            Some(ConnectionEvent::Packet(Packet::Rejected { .. }, _))
        ));
    }

    #[tokio::test]
    async fn full_room_rejects_join() {
        let url = start_server(RoomConfig {
            max_players: 1,
            ..RoomConfig::default()
        })
        .await;
        let _first = TestClient::join(&url, "my_room").await;

        let mut second = Connection::connect(&url, "my_room").await.unwrap();
        let event = timeout(WAIT, second.recv()).await.unwrap();
        assert!(matches!(
            event,
            Some(ConnectionEvent::Packet(Packet::Rejected { .. }, _))
        ));
    }
}

/// ROOM ISOLATION TESTS
mod room_tests {
    use super::*;

    /// Players in different rooms never see each other
    #[tokio::test]
    async fn rooms_are_isolated() {
        let url = start_server(RoomConfig::default()).await;
        let mut a = TestClient::join(&url, "alpha").await;
        let mut b = TestClient::join(&url, "beta").await;

        let start = Instant::now();
        a.send_tick(Transform::new(Vec3::X, Quat::IDENTITY), Locomotion::Walk);
        b.send_tick(Transform::new(Vec3::Z, Quat::IDENTITY), Locomotion::Walk);

        // Let a few broadcast ticks pass
        while start.elapsed() < Duration::from_millis(300) {
            a.drain();
            b.drain();
            sleep(Duration::from_millis(20)).await;
        }

        assert!(a.reconciler.remote().is_empty());
        assert!(b.reconciler.remote().is_empty());
        assert_eq!(a.reconciler.identity().unwrap().room, "alpha");
        assert_eq!(b.reconciler.identity().unwrap().room, "beta");
    }

    /// A room emptied by its last player is recreated on the next join
    #[tokio::test]
    async fn room_is_recreated_after_emptying() {
        let url = start_server(RoomConfig::default()).await;

        let first = TestClient::join(&url, "my_room").await;
        first.connection.leave().await;
        sleep(Duration::from_millis(100)).await;

        let second = TestClient::join(&url, "my_room").await;
        assert!(second.reconciler.remote().is_empty());
        assert!(second.reconciler.local_record().is_some());
    }
}
