//! # Avatar Client Library
//!
//! This library provides the client side of the avatar sandbox: it moves the
//! local character, tells the room server about it, and shows everyone else
//! where the server says they are.
//!
//! ## Architecture Overview
//!
//! The client owns exactly one thing, its own character. Everything else it
//! draws comes from the room snapshots the server broadcasts at a fixed rate.
//!
//! ### Dead Reckoning
//! Moves are only sent once the character drifted far enough from the last
//! transmitted pose, either in position or in orientation. A player standing
//! still costs no bandwidth.
//!
//! ### Edge-Triggered Locomotion
//! Idle/walk/run changes are sent when they happen and never repeated, so
//! the server always holds the latest state without per-frame chatter.
//!
//! ### Snapshot Replacement
//! Each snapshot replaces the remote view as a whole. Players missing from a
//! snapshot disappear; new ones appear with the model the server assigned.
//! Optional interpolation blends between the last two snapshots per player.
//!
//! ## Module Organization
//!
//! ### Reconcile Module (`reconcile`)
//! The per-frame loop: identity binding from `Welcome`, spawn adoption, the
//! dead-reckoning gate and edge-triggered animation updates.
//!
//! ### Remote Module (`remote`)
//! The view of other players built from snapshots, with optional smoothing.
//!
//! ### Input Module (`input`)
//! Keyboard and mouse sampling mapped to camera-relative movement intent.
//!
//! ### Physics Module (`physics`)
//! A kinematic body and the controller that steers it with impulses.
//!
//! ### Network Module (`network`)
//! WebSocket connection with background reader, writer and heartbeat tasks.
//!
//! ### Rendering Module (`rendering`)
//! Top-down debug view drawn with macroquad.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Connection, ConnectionEvent};
//! use client::reconcile::Reconciler;
//! use shared::{Locomotion, Transform};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut connection = Connection::connect("ws://127.0.0.1:2567", "my_room").await?;
//!     let mut reconciler = Reconciler::new();
//!
//!     while let Some(ConnectionEvent::Packet(packet, at)) = connection.recv().await {
//!         reconciler.handle_packet(packet, at);
//!         for packet in reconciler.tick(&Transform::IDENTITY, Locomotion::Idle) {
//!             connection.send(packet);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod input;
pub mod network;
pub mod physics;
pub mod reconcile;
pub mod remote;
pub mod rendering;
