//! Hub that relays one shared world between many clients
//!
//! The hub world broadcasts every change it sees. Each client gets its own
//! [`WorldSyncer`] whose filter blocks records owned by any identifier in
//! that client's chain, so nobody hears their own changes echoed back. When
//! a client leaves, the objects it owned are deleted from the hub.

use crate::error::ServerError;
use log::{error, info, warn};
use shared::{
    Owned, SharedClock, SharedWorld, SyncOptions, SystemClock, Transport, WorldSyncer,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type ClientId = u32;

/// Default cap on simultaneously attached clients
pub const DEFAULT_MAX_CLIENTS: usize = 64;

struct ClientEntry {
    syncer: WorldSyncer,
    /// Filled in once the client's metadata arrives
    identifier_chain: Rc<RefCell<Option<Vec<String>>>>,
}

pub struct GameServer {
    world: SharedWorld,
    clock: SharedClock,
    options: SyncOptions,
    clients: HashMap<ClientId, ClientEntry>,
    next_client_id: ClientId,
    max_clients: usize,
}

impl GameServer {
    pub fn new(world: SharedWorld) -> Self {
        Self::with_options(
            world,
            SyncOptions::default(),
            Rc::new(SystemClock),
            DEFAULT_MAX_CLIENTS,
        )
    }

    /// Turns `world` into a broadcast hub. `options` apply to every client
    /// syncer.
    pub fn with_options(
        world: SharedWorld,
        options: SyncOptions,
        clock: SharedClock,
        max_clients: usize,
    ) -> Self {
        world.borrow_mut().set_change_record_filter(|_| true);

        Self {
            world,
            clock,
            options,
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    pub fn world(&self) -> SharedWorld {
        Rc::clone(&self.world)
    }

    /// Attaches a client. Its metadata is requested straight away; once it
    /// arrives the echo filter is installed and both sides exchange a
    /// refresh.
    pub fn add_client(&mut self, transport: Rc<dyn Transport>) -> Result<ClientId, ServerError> {
        if self.clients.len() >= self.max_clients {
            warn!("Rejecting client, server full ({} clients)", self.max_clients);
            return Err(ServerError::ServerFull {
                max: self.max_clients,
            });
        }

        let client_id = self.next_client_id;
        let syncer = WorldSyncer::with_clock(Rc::clone(&self.world), Rc::clone(&self.clock));
        syncer.connect(transport, self.options.clone());

        let identifier_chain = Rc::new(RefCell::new(None));
        let chain_slot = Rc::clone(&identifier_chain);
        let handle = syncer.clone();
        let pending = syncer.get_metadata(move |metadata| {
            let blocked = metadata.identifier_chain.clone();
            info!("Client {} identified as {}", client_id, metadata.identifier);
            *chain_slot.borrow_mut() = Some(blocked.clone());

            handle.set_change_record_filter(move |record| {
                record
                    .owner()
                    .map_or(false, |owner| !blocked.iter().any(|identifier| identifier == owner))
            });

            if let Err(err) = handle.request_refresh() {
                error!("Failed to request refresh from client {}: {}", client_id, err);
            }
            handle.send_refresh();
        });
        if let Err(err) = pending {
            syncer.disconnect();
            return Err(err.into());
        }

        self.next_client_id += 1;
        self.clients.insert(
            client_id,
            ClientEntry {
                syncer,
                identifier_chain,
            },
        );
        info!("Client {} connected. Total clients: {}", client_id, self.clients.len());
        Ok(client_id)
    }

    /// Disconnects a client and deletes every object owned by an identifier
    /// in its chain. Returns false for unknown ids.
    pub fn remove_client(&mut self, client_id: ClientId) -> bool {
        let Some(entry) = self.clients.remove(&client_id) else {
            return false;
        };
        entry.syncer.disconnect();

        let chain = entry.identifier_chain.borrow().clone();
        let removed = match chain {
            Some(chain) => self.remove_owned_objects(&chain),
            None => 0,
        };
        info!(
            "Client {} disconnected, removed {} objects. Total clients: {}",
            client_id,
            removed,
            self.clients.len()
        );
        true
    }

    fn remove_owned_objects(&self, chain: &[String]) -> usize {
        let owned: Vec<String> = self
            .world
            .borrow()
            .objects()
            .filter(|object| chain.iter().any(|identifier| identifier == object.owner()))
            .map(|object| object.id().to_string())
            .collect();

        let mut batch = Vec::new();
        let mut world = self.world.borrow_mut();
        for id in &owned {
            if let Some(object) = world.object_mut(id) {
                if let Err(err) = object.delete_into(&mut batch) {
                    error!("Failed to remove object {}: {}", id, err);
                }
            }
        }
        world.send_batched_world_changes(batch.into_iter().map(Some));
        owned.len()
    }

    /// Advances every client syncer's timers
    pub fn tick(&self) {
        for entry in self.clients.values() {
            entry.syncer.tick();
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn syncer(&self, client_id: ClientId) -> Option<&WorldSyncer> {
        self.clients.get(&client_id).map(|entry| &entry.syncer)
    }

    /// The client's identifier chain, once its metadata has arrived
    pub fn client_identifier_chain(&self, client_id: ClientId) -> Option<Vec<String>> {
        self.clients
            .get(&client_id)
            .and_then(|entry| entry.identifier_chain.borrow().clone())
    }
}
