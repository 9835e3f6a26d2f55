//! Binds one world to one transport and runs the sync protocol over it

use crate::change::{ChangeRecord, Owned};
use crate::change_queue::ChangeQueue;
use crate::clock::{SharedClock, SystemClock};
use crate::config::{SyncOptions, RATE_ADJUSTMENT};
use crate::error::SyncError;
use crate::events::ListenerId;
use crate::game_object::UpdateHints;
use crate::protocol::WireMessage;
use crate::socket_cleaner::{CleanerEvent, SocketCleaner};
use crate::transport::Transport;
use crate::world::{GameWorld, WorldEvent, WorldMetadata};
use log::{debug, error, info, trace, warn};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// A world shared between the application, its syncers and bindings
pub type SharedWorld = Rc<RefCell<GameWorld>>;

type RecordFilter = Rc<dyn Fn(&ChangeRecord) -> bool>;
type MetadataCallback = Box<dyn FnOnce(&WorldMetadata)>;
type Extrapolator = Box<dyn FnMut(f64)>;

/// Outbound coalescing state for interval mode
struct OutboundQueue {
    queue: ChangeQueue,
    interval: f64,
    next_flush: u64,
}

impl OutboundQueue {
    fn new(interval: f64, now: u64) -> Self {
        Self {
            queue: ChangeQueue::new(),
            interval,
            next_flush: now.saturating_add(period(interval)),
        }
    }
}

/// Flush period in whole ms, at least 1. Intervals too large for `u64`
/// saturate.
fn period(interval: f64) -> u64 {
    if !interval.is_finite() {
        return u64::MAX;
    }
    interval.round().max(1.0) as u64
}

struct SyncerInner {
    world: SharedWorld,
    clock: SharedClock,
    filter: RefCell<RecordFilter>,
    transport: RefCell<Option<Rc<dyn Transport>>>,
    world_listener: Cell<Option<ListenerId>>,
    outbound: RefCell<Option<OutboundQueue>>,
    cleaner: RefCell<Option<SocketCleaner>>,
    extrapolator: RefCell<Option<Extrapolator>>,
    metadata: RefCell<Option<WorldMetadata>>,
    metadata_callbacks: RefCell<Vec<MetadataCallback>>,
}

/// Synchronises a [`GameWorld`] with one peer.
///
/// Local changes accepted by the syncer's filter are shipped as
/// `worldChange` messages, immediately or coalesced per update interval.
/// Inbound changes are staged into the world and flushed once per message so
/// a burst surfaces as a single local event. The syncer is a cheap handle;
/// clones share state.
///
/// Nothing here owns a timer. The event loop calls [`tick`](Self::tick)
/// often enough for the update interval and the speed-up alarm to fire.
#[derive(Clone)]
pub struct WorldSyncer {
    inner: Rc<SyncerInner>,
}

impl WorldSyncer {
    pub fn new(world: SharedWorld) -> Self {
        Self::with_clock(world, Rc::new(SystemClock))
    }

    pub fn with_clock(world: SharedWorld, clock: SharedClock) -> Self {
        let own_identifier = world.borrow().identifier().to_string();
        let filter: RecordFilter =
            Rc::new(move |record: &ChangeRecord| record.owner() == Some(own_identifier.as_str()));

        Self {
            inner: Rc::new(SyncerInner {
                world,
                clock,
                filter: RefCell::new(filter),
                transport: RefCell::new(None),
                world_listener: Cell::new(None),
                outbound: RefCell::new(None),
                cleaner: RefCell::new(None),
                extrapolator: RefCell::new(None),
                metadata: RefCell::new(None),
                metadata_callbacks: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn world(&self) -> SharedWorld {
        Rc::clone(&self.inner.world)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.borrow().is_some()
    }

    /// Attaches the syncer to `transport`. A syncer connects once; later
    /// calls are reported and ignored.
    pub fn connect(&self, transport: Rc<dyn Transport>, options: SyncOptions) {
        if self.is_connected() {
            error!("Cannot make a second connect() call on a WorldSyncer, use another WorldSyncer");
            return;
        }
        let now = self.inner.clock.now_ms();

        let weak = Rc::downgrade(&self.inner);
        transport.add_message_handler(Box::new(move |payload: &str| match upgrade(&weak) {
            Some(syncer) => syncer.handle_message(payload),
            None => Ok(()),
        }));

        *self.inner.outbound.borrow_mut() = options
            .update_interval
            .filter(|interval| *interval > 0.0)
            .map(|interval| OutboundQueue::new(interval, now));

        if options.socket_cleaner {
            let mut cleaner = SocketCleaner::new(options.cleaner.clone(), Rc::clone(&self.inner.clock));
            let slow = Rc::clone(&transport);
            cleaner.on(CleanerEvent::SlowDown, move || {
                post(&*slow, &WireMessage::RequestLessData)
            });
            let fast = Rc::clone(&transport);
            cleaner.on(CleanerEvent::SpeedUp, move || {
                post(&*fast, &WireMessage::RequestMoreData)
            });
            if let Some(extrapolator) = self.inner.extrapolator.borrow_mut().take() {
                cleaner.set_extrapolator(extrapolator);
            }
            *self.inner.cleaner.borrow_mut() = Some(cleaner);
        }

        let weak = Rc::downgrade(&self.inner);
        let listener = self
            .inner
            .world
            .borrow_mut()
            .on(WorldEvent::WorldChange, move |batch| {
                if let Some(syncer) = upgrade(&weak) {
                    syncer.outbound_batch(batch);
                }
            });
        self.inner.world_listener.set(Some(listener));
        *self.inner.transport.borrow_mut() = Some(transport);

        info!(
            "WorldSyncer for {} connected ({})",
            self.inner.world.borrow().identifier(),
            match options.update_interval {
                Some(interval) => format!("flushing every {}ms", interval),
                None => "immediate".to_string(),
            }
        );
    }

    /// Tears down the world subscription, the transport handler, the flush
    /// timer and the socket cleaner. Pending `get_metadata` callbacks are
    /// dropped. Calling it when not connected is a logged no-op.
    pub fn disconnect(&self) {
        let Some(transport) = self.inner.transport.borrow_mut().take() else {
            warn!("disconnect() called on a WorldSyncer that is not connected");
            return;
        };

        if let Some(listener) = self.inner.world_listener.take() {
            self.inner.world.borrow_mut().off(listener);
        }
        transport.remove_message_handler();
        self.inner.outbound.borrow_mut().take();
        if let Some(mut cleaner) = self.inner.cleaner.borrow_mut().take() {
            cleaner.stop();
        }
        // Unanswered metadata requests can no longer be resolved
        self.inner.metadata_callbacks.borrow_mut().clear();
        info!("WorldSyncer for {} disconnected", self.inner.world.borrow().identifier());
    }

    /// Decodes and applies one inbound frame
    pub fn handle_message(&self, payload: &str) -> Result<(), SyncError> {
        match WireMessage::decode(payload)? {
            WireMessage::WorldChange { changes, timestamp } => {
                self.apply_world_change(changes, timestamp)
            }
            WireMessage::RequestRefresh => {
                self.send_refresh();
                Ok(())
            }
            WireMessage::RequestMetadata => {
                info!("Sending metadata");
                let metadata = self.inner.world.borrow().metadata();
                self.post_message(&WireMessage::MetadataChange(metadata))
            }
            WireMessage::MetadataChange(metadata) => {
                info!("Received metadata from {}", metadata.identifier);
                self.set_metadata(metadata);
                Ok(())
            }
            WireMessage::RequestLessData => {
                self.adjust_interval(RATE_ADJUSTMENT);
                Ok(())
            }
            WireMessage::RequestMoreData => {
                self.adjust_interval(1.0 / RATE_ADJUSTMENT);
                Ok(())
            }
        }
    }

    fn apply_world_change(&self, changes: Vec<ChangeRecord>, timestamp: u64) -> Result<(), SyncError> {
        debug!("Applying {} inbound changes", changes.len());
        {
            let mut world = self.inner.world.borrow_mut();
            for record in changes {
                match record {
                    ChangeRecord::Add { id, owner, properties } => {
                        world.queue_add(Some(id), properties, Some(owner));
                    }
                    ChangeRecord::Update { id, properties, .. } => {
                        if world.has_object(&id) {
                            world.queue_update(id, properties, UpdateHints::default());
                        } else {
                            trace!("Dropping update for unknown object {}", id);
                        }
                    }
                    ChangeRecord::Remove { id, .. } => match world.object_mut(&id) {
                        Some(object) => object.delete()?,
                        None => warn!("Ignoring remove of unknown object {}", id),
                    },
                }
            }
        }

        if let Some(cleaner) = self.inner.cleaner.borrow_mut().as_mut() {
            cleaner.log_time(timestamp, None);
        }

        self.inner.world.borrow_mut().flush_queue()
    }

    fn adjust_interval(&self, factor: f64) {
        let mut outbound = self.inner.outbound.borrow_mut();
        match outbound.as_mut() {
            Some(outbound) => {
                outbound.interval *= factor;
                info!("Update interval now {:.1}ms", outbound.interval);
            }
            None => debug!("Ignoring rate change, syncer sends immediately"),
        }
    }

    /// Flushes the outbound queue when its interval has elapsed and polls
    /// the socket cleaner's speed-up alarm
    pub fn tick(&self) {
        let now = self.inner.clock.now_ms();

        let due = {
            let mut outbound = self.inner.outbound.borrow_mut();
            match outbound.as_mut() {
                Some(outbound) if now >= outbound.next_flush => {
                    outbound.next_flush = now.saturating_add(period(outbound.interval));
                    outbound.queue.flush_queue()
                }
                _ => Vec::new(),
            }
        };
        if let Err(err) = self.send_changes(due) {
            error!("Failed to send queued changes: {}", err);
        }

        if let Some(cleaner) = self.inner.cleaner.borrow_mut().as_mut() {
            cleaner.poll();
        }
    }

    /// Replaces the outbound filter. The default only forwards records owned
    /// by this syncer's world.
    pub fn set_change_record_filter(&self, filter: impl Fn(&ChangeRecord) -> bool + 'static) {
        *self.inner.filter.borrow_mut() = Rc::new(filter);
    }

    /// Installs a callback that fast-forwards local simulation by the given
    /// number of milliseconds when inbound data arrives late
    pub fn set_extrapolator(&self, extrapolator: impl FnMut(f64) + 'static) {
        match self.inner.cleaner.borrow_mut().as_mut() {
            Some(cleaner) => cleaner.set_extrapolator(extrapolator),
            None => *self.inner.extrapolator.borrow_mut() = Some(Box::new(extrapolator)),
        }
    }

    /// Calls `callback` with the peer's metadata, requesting it first if it
    /// has not arrived yet
    pub fn get_metadata(&self, callback: impl FnOnce(&WorldMetadata) + 'static) -> Result<(), SyncError> {
        let cached = self.inner.metadata.borrow().clone();
        if let Some(metadata) = cached {
            callback(&metadata);
            return Ok(());
        }
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        self.inner
            .metadata_callbacks
            .borrow_mut()
            .push(Box::new(callback));
        info!("Requesting metadata");
        self.post_message(&WireMessage::RequestMetadata)
    }

    pub fn metadata(&self) -> Option<WorldMetadata> {
        self.inner.metadata.borrow().clone()
    }

    fn set_metadata(&self, metadata: WorldMetadata) {
        *self.inner.metadata.borrow_mut() = Some(metadata.clone());
        let callbacks = std::mem::take(&mut *self.inner.metadata_callbacks.borrow_mut());
        for callback in callbacks {
            callback(&metadata);
        }
    }

    /// Asks the peer to send everything it has
    pub fn request_refresh(&self) -> Result<(), SyncError> {
        self.post_message(&WireMessage::RequestRefresh)
    }

    /// Emits creation records for every object the world's filter accepts,
    /// as one batch
    pub fn send_refresh(&self) {
        let batch: Vec<Option<ChangeRecord>> = {
            let world = self.inner.world.borrow();
            world
                .objects()
                .map(|object| world.batch_create(object.id()))
                .collect()
        };
        info!(
            "Sending refresh of {} objects",
            batch.iter().filter(|record| record.is_some()).count()
        );
        self.inner
            .world
            .borrow_mut()
            .send_batched_world_changes(batch);
    }

    /// Current flush interval in ms, `None` in immediate mode
    pub fn update_interval(&self) -> Option<f64> {
        self.inner
            .outbound
            .borrow()
            .as_ref()
            .map(|outbound| outbound.interval)
    }

    /// Records waiting for the next interval flush
    pub fn queued_changes(&self) -> usize {
        self.inner
            .outbound
            .borrow()
            .as_ref()
            .map_or(0, |outbound| outbound.queue.len())
    }

    fn outbound_batch(&self, batch: &[ChangeRecord]) {
        let filter = Rc::clone(&*self.inner.filter.borrow());
        let accepted: Vec<ChangeRecord> = batch.iter().filter(|record| filter(record)).cloned().collect();
        if accepted.is_empty() {
            return;
        }

        {
            let mut outbound = self.inner.outbound.borrow_mut();
            if let Some(outbound) = outbound.as_mut() {
                outbound.queue.push_list(accepted);
                return;
            }
        }

        if let Err(err) = self.send_changes(accepted) {
            error!("Failed to send changes: {}", err);
        }
    }

    fn send_changes(&self, changes: Vec<ChangeRecord>) -> Result<(), SyncError> {
        if changes.is_empty() {
            return Ok(());
        }
        trace!("Sending {} changes", changes.len());
        self.post_message(&WireMessage::WorldChange {
            changes,
            timestamp: self.inner.clock.now_ms(),
        })
    }

    fn post_message(&self, message: &WireMessage) -> Result<(), SyncError> {
        let transport = self
            .inner
            .transport
            .borrow()
            .clone()
            .ok_or(SyncError::NotConnected)?;
        transport.post_message(message.encode()?)
    }
}

fn upgrade(weak: &Weak<SyncerInner>) -> Option<WorldSyncer> {
    weak.upgrade().map(|inner| WorldSyncer { inner })
}

fn post(transport: &dyn Transport, message: &WireMessage) {
    let result = message.encode().and_then(|payload| transport.post_message(payload));
    match result {
        Ok(()) => info!("Sent {}", message.tag()),
        Err(err) => error!("Failed to send {}: {}", message.tag(), err),
    }
}
