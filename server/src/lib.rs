//! # World Sync Hub
//!
//! The server side of the replication engine: a hub that holds one shared
//! world and relays it between every connected client.
//!
//! ## Module Organization
//!
//! ### Game Server Module (`game_server`)
//! Owns one `WorldSyncer` per client against the shared broadcast world:
//! - Metadata handshake and per-client echo filters
//! - Bidirectional refresh when a client joins
//! - Ownership-based cleanup when a client leaves
//!
//! ### Network Module (`network`)
//! TCP transport for the hub. Connection tasks only move newline-delimited
//! JSON frames; the main loop owns the `GameServer` and drives its syncers
//! from a tick interval.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::{GameWorld, SyncOptions};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let world = Rc::new(RefCell::new(GameWorld::new("server")));
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         world,
//!         SyncOptions::default().with_update_interval(50.0),
//!         Duration::from_millis(16),
//!         32,
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod game_server;
pub mod network;

pub use error::ServerError;
pub use game_server::{ClientId, GameServer};
