//! # World Sync Engine
//!
//! Replicates a collection of objects ("a world") between peers connected by
//! message-passing transports, so each peer's copy converges on the same
//! state without a central authority dictating every mutation.
//!
//! ## Ownership Model
//!
//! Every object has exactly one writer: the world (or proxy) that created it.
//! A world only announces changes to objects it owns, which is what keeps a
//! change from bouncing back and forth across a link. Hubs replace that
//! filter to relay everything, and install per-link filters that block a
//! client's own identifiers.
//!
//! ## Module Organization
//!
//! - `world` / `game_object`: the local object store, its change events and
//!   the deferred-apply queue used to batch inbound changes
//! - `binding`: adapters that mirror objects into rendering or physics state
//! - `change_queue`: per-object coalescing for outbound batching
//! - `syncer` / `protocol` / `transport`: the per-link wire protocol
//! - `socket_cleaner`, `rolling_variance`, `timers`: jitter-driven rate control
//!
//! ## Scheduling
//!
//! Everything is single-threaded and cooperative. Worlds are shared as
//! `Rc<RefCell<_>>`, and timers are plain deadlines advanced by calling
//! [`WorldSyncer::tick`] from the owner's event loop.
//!
//! ## Usage Example
//!
//! ```rust
//! use serde_json::json;
//! use shared::{GameWorld, LocalLink, SyncOptions, WorldSyncer};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let a = Rc::new(RefCell::new(GameWorld::new("A")));
//! let b = Rc::new(RefCell::new(GameWorld::new("B")));
//! let (link_a, link_b) = LocalLink::pair();
//!
//! let sync_a = WorldSyncer::new(Rc::clone(&a));
//! let sync_b = WorldSyncer::new(Rc::clone(&b));
//! sync_a.connect(link_a.clone(), SyncOptions::default());
//! sync_b.connect(link_b.clone(), SyncOptions::default());
//!
//! let props = json!({ "name": "hello" }).as_object().cloned().unwrap();
//! a.borrow_mut().add(props, None, None).unwrap();
//!
//! link_b.pump().unwrap();
//! assert_eq!(b.borrow().object_count(), 1);
//! ```

pub mod binding;
pub mod change;
pub mod change_queue;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod game_object;
pub mod id;
pub mod protocol;
pub mod rolling_variance;
pub mod socket_cleaner;
pub mod syncer;
pub mod timers;
pub mod transport;
pub mod world;

pub use binding::{BaseBinding, Binding};
pub use change::{merge_properties, ChangeKind, ChangeRecord, Owned, Properties};
pub use change_queue::ChangeQueue;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{CleanerConfig, SyncOptions};
pub use error::SyncError;
pub use events::{EventEmitter, ListenerId};
pub use game_object::{GameObject, GameObjectMut, UpdateHints};
pub use id::{IdGenerator, RandomIdGenerator, SequentialIdGenerator};
pub use protocol::WireMessage;
pub use rolling_variance::RollingVariance;
pub use socket_cleaner::{CleanerEvent, SocketCleaner};
pub use syncer::{SharedWorld, WorldSyncer};
pub use timers::{InterruptableWait, LimitedCaller};
pub use transport::{pump_all, ChannelTransport, LocalLink, MessageHandler, Transport};
pub use world::{GameWorld, WorldEvent, WorldFilter, WorldMetadata};
