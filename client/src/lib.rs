//! # World Sync Client
//!
//! A peer that owns a handful of moving objects, publishes them to a hub and
//! mirrors everything the hub relays back.
//!
//! ## Module Organization
//!
//! ### Simulation Module (`simulation`)
//! Moves the objects this peer owns along circular orbits:
//! - Random orbit parameters per spawned object
//! - One batched world change per simulation step
//! - Fast-forwarding when the socket cleaner reports late data
//!
//! ### Display Module (`display`)
//! A `BaseBinding` that mirrors every world object, local or remote, as a
//! sprite and draws them onto a character grid for the status log.
//!
//! ### Network Module (`network`)
//! TCP connection to the hub. Socket tasks move newline-delimited JSON frames;
//! the client loop owns the world and drives the `WorldSyncer`.
//!
//! ## Usage Example
//!
//! ```rust
//! use client::display::{display_binding, sprites};
//! use client::simulation::Simulation;
//! use shared::GameWorld;
//!
//! let mut world = GameWorld::new("demo");
//! world.add_binding(Box::new(display_binding()));
//!
//! let mut simulation = Simulation::seeded(7);
//! simulation.spawn(&mut world, 3).unwrap();
//! simulation.step(&mut world, 16.0);
//!
//! assert_eq!(sprites(&world).len(), 3);
//! ```

pub mod display;
pub mod network;
pub mod simulation;
