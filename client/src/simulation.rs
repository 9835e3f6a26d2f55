//! A toy simulation of objects orbiting the origin
//!
//! Each step moves every owned object along its circle and publishes the
//! new positions as one batched world change.

use log::{debug, error};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use shared::{GameWorld, Properties, SyncError, UpdateHints};
use std::collections::HashMap;
use std::f64::consts::TAU;

pub const MIN_RADIUS: f64 = 50.0;
pub const MAX_RADIUS: f64 = 250.0;
/// Angular speed bounds in radians per second
pub const MIN_SPEED: f64 = 0.2;
pub const MAX_SPEED: f64 = 1.5;

const APPEARANCES: [&str; 2] = ["circle", "square"];

#[derive(Debug, Clone, PartialEq)]
pub struct Orbit {
    pub radius: f64,
    pub angle: f64,
    pub speed: f64,
}

impl Orbit {
    pub fn position(&self) -> (f64, f64) {
        (self.radius * self.angle.cos(), self.radius * self.angle.sin())
    }

    fn advance(&mut self, dt_ms: f64) {
        self.angle = (self.angle + self.speed * dt_ms / 1000.0).rem_euclid(TAU);
    }
}

fn position_properties(orbit: &Orbit) -> Properties {
    let (x, y) = orbit.position();
    let mut properties = Properties::new();
    properties.insert("x".to_string(), json!(x));
    properties.insert("y".to_string(), json!(y));
    properties
}

/// Moves the objects this peer owns
pub struct Simulation {
    rng: StdRng,
    orbits: HashMap<String, Orbit>,
    order: Vec<String>,
    elapsed_ms: f64,
}

impl Simulation {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            orbits: HashMap::new(),
            order: Vec::new(),
            elapsed_ms: 0.0,
        }
    }

    /// Adds `count` orbiting objects owned by `world`
    pub fn spawn(&mut self, world: &mut GameWorld, count: usize) -> Result<Vec<String>, SyncError> {
        let mut spawned = Vec::with_capacity(count);
        for index in 0..count {
            let orbit = Orbit {
                radius: self.rng.gen_range(MIN_RADIUS..MAX_RADIUS),
                angle: self.rng.gen_range(0.0..TAU),
                speed: self.rng.gen_range(MIN_SPEED..MAX_SPEED),
            };
            let appearance = APPEARANCES[index % APPEARANCES.len()];

            let mut properties = position_properties(&orbit);
            properties.insert("type".to_string(), json!("orbiter"));
            properties.insert("name".to_string(), json!(format!("orbiter-{}", index)));
            properties.insert("appearance".to_string(), json!({ "type": appearance }));

            let Some(object) = world.add(properties, None, None)? else {
                continue;
            };
            let id = object.id().to_string();
            self.orbits.insert(id.clone(), orbit);
            self.order.push(id.clone());
            spawned.push(id);
        }
        debug!("Spawned {} orbiters", spawned.len());
        Ok(spawned)
    }

    /// Advances every orbit by `dt_ms` and publishes one batch of updates.
    /// Objects deleted from the world are forgotten.
    pub fn step(&mut self, world: &mut GameWorld, dt_ms: f64) {
        self.elapsed_ms += dt_ms;
        self.order.retain(|id| world.has_object(id));
        self.orbits.retain(|id, _| world.has_object(id));

        let mut batch = Vec::with_capacity(self.order.len());
        for id in &self.order {
            let Some(orbit) = self.orbits.get_mut(id) else {
                continue;
            };
            orbit.advance(dt_ms);

            if let Some(mut object) = world.object_mut(id) {
                let properties = position_properties(orbit);
                if let Err(e) = object.update_into(properties, &UpdateHints::default(), &mut batch) {
                    error!("Failed to move {}: {}", id, e);
                }
            }
        }
        world.send_batched_world_changes(batch.into_iter().map(Some));
    }

    /// Catches up after late data: runs the simulation `ms` ahead in one go
    pub fn fast_forward(&mut self, world: &mut GameWorld, ms: f64) {
        debug!("Fast-forwarding simulation by {:.1}ms", ms);
        self.step(world, ms);
    }

    pub fn orbit(&self, id: &str) -> Option<&Orbit> {
        self.orbits.get(id)
    }

    pub fn object_count(&self) -> usize {
        self.order.len()
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a numeric property, defaulting to zero
pub fn coordinate(properties: &Properties, key: &str) -> f64 {
    properties.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}
