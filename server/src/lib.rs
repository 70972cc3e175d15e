//! # Room Server Library
//!
//! This library provides the authoritative room server for the avatar
//! sandbox. It owns every player's transform, locomotion state and visual
//! model, accepts updates from the owning connection only, and relays the
//! resulting room state to everyone in the room.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Player State
//! Each room keeps exactly one [`shared::PlayerRecord`] per open session. The
//! record is created when the session joins, mutated only by that session's
//! own `Move`/`Animation` packets and removed when it leaves. Clients never
//! name the session they write to; the connection decides.
//!
//! ### Session Lifecycle
//! - Join: the first packet on a connection picks a room and receives a
//!   `Welcome` with the session id and the model assigned by the server
//! - Active: any number of moves and locomotion changes, in any order
//! - Leave: explicit `Leave`, socket close, or heartbeat timeout; all three
//!   remove the record and a repeated leave is a no-op
//!
//! ### State Broadcasting
//! Accepted mutations mark the room dirty. A fixed-rate room tick (20 Hz by
//! default) sends one full snapshot to every session whenever something
//! changed, which bounds bandwidth no matter how many clients move at once.
//!
//! ## Architecture Design
//!
//! ### One Task Per Room
//! Every room is a tokio task that serializes all joins, updates, leaves and
//! broadcasts for its sessions, so room state needs no locking. Rooms are
//! created on first join, disposed when their last session leaves, and never
//! share state with each other.
//!
//! ### Reliable Ordered Transport
//! Clients connect over WebSocket. Per-connection ordering comes from TCP;
//! moves additionally carry a sequence number so a stale move can never
//! overwrite a newer one.
//!
//! ### Fault Isolation
//! Malformed payloads are logged and dropped. Nothing a single client sends
//! can crash its room or touch another session's record.
//!
//! ## Module Organization
//!
//! ### Room Module (`room`)
//! The synchronous store: join/move/animation/leave operations, model pool,
//! dirty tracking and snapshots.
//!
//! ### Validation Module (`validation`)
//! Turns raw client payloads into typed transforms and locomotion states.
//!
//! ### Session Manager Module (`session_manager`)
//! Connection bookkeeping per room: outboxes, liveness, move sequences.
//!
//! ### Lobby Module (`lobby`)
//! Room tasks and the registry that creates and retires them.
//!
//! ### Network Module (`network`)
//! WebSocket accept loop, packet framing and per-connection reader/writer
//! tasks.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     println!("listening on {}", server.local_addr()?);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod lobby;
pub mod network;
pub mod room;
pub mod session_manager;
pub mod validation;
