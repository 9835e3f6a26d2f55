//! TCP client: runs a local simulation and keeps its world in sync with a hub

use crate::display::{display_binding, render_ascii, sprites};
use crate::simulation::Simulation;
use log::{debug, error, info, warn};
use shared::{ChannelTransport, GameWorld, SharedWorld, SyncOptions, WorldSyncer};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// How often the syncer's timers are polled
const SYNC_POLL: Duration = Duration::from_millis(5);
const STATUS_INTERVAL: Duration = Duration::from_secs(5);
const MAP_COLS: usize = 48;
const MAP_ROWS: usize = 16;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub name: String,
    pub objects: usize,
    pub sim_rate: u32,
    pub sync: SyncOptions,
}

pub struct Client {
    world: SharedWorld,
    syncer: WorldSyncer,
    simulation: Rc<RefCell<Simulation>>,
    transport: Rc<ChannelTransport>,
    inbound_rx: mpsc::UnboundedReceiver<String>,
    config: ClientConfig,
}

impl Client {
    /// Connects to the hub and wires the world, display binding and syncer
    pub async fn connect(config: ClientConfig) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Connecting to {}...", config.server_addr);
        let stream = TcpStream::connect(&config.server_addr).await?;
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write_line(&mut writer, &frame).await {
                    warn!("Failed to write to server: {}", e);
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if inbound_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Error reading from server: {}", e);
                        break;
                    }
                }
            }
        });

        let mut world = GameWorld::new(&config.name);
        world.add_binding(Box::new(display_binding()));
        info!("Local world is {}", world.identifier());
        let world: SharedWorld = Rc::new(RefCell::new(world));

        let simulation = Rc::new(RefCell::new(Simulation::new()));
        let syncer = WorldSyncer::new(Rc::clone(&world));

        let sim = Rc::downgrade(&simulation);
        let extrapolated_world = Rc::downgrade(&world);
        syncer.set_extrapolator(move |ms| {
            if let (Some(sim), Some(world)) = (sim.upgrade(), extrapolated_world.upgrade()) {
                sim.borrow_mut().fast_forward(&mut world.borrow_mut(), ms);
            }
        });

        let transport = Rc::new(ChannelTransport::new(outbound_tx));
        syncer.connect(transport.clone(), config.sync.clone());

        Ok(Client {
            world,
            syncer,
            simulation,
            transport,
            inbound_rx,
            config,
        })
    }

    pub fn world(&self) -> SharedWorld {
        Rc::clone(&self.world)
    }

    pub fn syncer(&self) -> &WorldSyncer {
        &self.syncer
    }

    fn handle_frame(&self, frame: &str) {
        if let Err(e) = self.transport.deliver(frame) {
            error!("Failed to apply frame from server: {}", e);
        }
    }

    fn step_simulation(&self, dt_ms: f64) {
        self.simulation
            .borrow_mut()
            .step(&mut self.world.borrow_mut(), dt_ms);
    }

    fn log_status(&self) {
        let world = self.world.borrow();
        let own = world
            .objects()
            .filter(|object| object.owner() == world.identifier())
            .count();
        info!(
            "{} objects ({} local, {} displayed), update interval {}",
            world.object_count(),
            own,
            sprites(&world).len(),
            match self.syncer.update_interval() {
                Some(interval) => format!("{:.1}ms", interval),
                None => "immediate".to_string(),
            }
        );
        debug!("\n{}", render_ascii(&world, MAP_COLS, MAP_ROWS));
    }

    /// Spawns the local objects, then runs until the server hangs up
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.simulation
            .borrow_mut()
            .spawn(&mut self.world.borrow_mut(), self.config.objects)?;
        self.syncer.request_refresh()?;

        let frame = Duration::from_secs_f64(1.0 / f64::from(self.config.sim_rate.max(1)));
        let mut sim_interval = interval(frame);
        sim_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sync_interval = interval(SYNC_POLL);
        sync_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut status_interval = interval(STATUS_INTERVAL);

        let mut last_step = Instant::now();
        info!("Client running at {} steps per second", self.config.sim_rate);

        loop {
            tokio::select! {
                frame = self.inbound_rx.recv() => {
                    match frame {
                        Some(frame) => self.handle_frame(&frame),
                        None => {
                            info!("Server closed the connection");
                            break;
                        }
                    }
                },

                _ = sim_interval.tick() => {
                    let now = Instant::now();
                    let dt_ms = now.duration_since(last_step).as_secs_f64() * 1000.0;
                    last_step = now;
                    self.step_simulation(dt_ms);
                },

                _ = sync_interval.tick() => {
                    self.syncer.tick();
                    if self.transport.is_closed() {
                        warn!("Writer task stopped");
                        break;
                    }
                },

                _ = status_interval.tick() => {
                    self.log_status();
                },
            }
        }

        self.syncer.disconnect();
        Ok(())
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, frame: &str) -> std::io::Result<()> {
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::WireMessage;
    use tokio::net::TcpListener;

    fn config(addr: String) -> ClientConfig {
        ClientConfig {
            server_addr: addr,
            name: "tester".to_string(),
            objects: 2,
            sim_rate: 60,
            sync: SyncOptions::default().without_socket_cleaner(),
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(Client::connect(config(addr)).await.is_err());
    }

    #[tokio::test]
    async fn test_client_sends_objects_and_refresh_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let mut client = Client::connect(config(addr)).await.unwrap();
                let (stream, _) = listener.accept().await.unwrap();

                tokio::task::spawn_local(async move {
                    let _ = client.run().await;
                });

                let (reader, _writer) = stream.into_split();
                let mut lines = BufReader::new(reader).lines();

                let mut added = 0;
                let mut saw_refresh = false;
                while !(added == 2 && saw_refresh) {
                    let line = lines.next_line().await.unwrap().unwrap();
                    match WireMessage::decode(&line).unwrap() {
                        WireMessage::WorldChange { changes, .. } => {
                            added += changes
                                .iter()
                                .filter(|record| record.kind() == shared::ChangeKind::Add)
                                .count();
                        }
                        WireMessage::RequestRefresh => saw_refresh = true,
                        _ => {}
                    }
                }
                assert_eq!(added, 2);
            })
            .await;
    }
}
