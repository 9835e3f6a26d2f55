//! Server network layer: TCP connections feeding a single-threaded hub loop
//!
//! Socket I/O runs in spawned tasks that only move text frames. All world
//! state lives in the main loop, which owns the [`GameServer`] and is the
//! only place syncers run.

use crate::error::ServerError;
use crate::game_server::{ClientId, GameServer};
use log::{debug, error, info, warn};
use shared::{ChannelTransport, SharedWorld, SyncOptions, SystemClock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    ClientConnected {
        conn_id: u32,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<String>,
    },
    FrameReceived {
        conn_id: u32,
        payload: String,
    },
    ClientDisconnected {
        conn_id: u32,
    },
}

struct Connection {
    client_id: ClientId,
    transport: Rc<ChannelTransport>,
}

/// Hub server relaying one world between TCP clients
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    game_server: GameServer,
    connections: HashMap<u32, Connection>,
    tick_duration: Duration,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        world: SharedWorld,
        options: SyncOptions,
        tick_duration: Duration,
        max_clients: usize,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            game_server: GameServer::with_options(world, options, Rc::new(SystemClock), max_clients),
            connections: HashMap::new(),
            tick_duration,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn game_server(&self) -> &GameServer {
        &self.game_server
    }

    /// Spawns the task accepting new connections
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut next_conn_id: u32 = 1;
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let conn_id = next_conn_id;
                        next_conn_id = next_conn_id.wrapping_add(1);
                        if !spawn_connection(stream, addr, conn_id, server_tx.clone()) {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::ClientConnected {
                conn_id,
                addr,
                outbound,
            } => {
                let transport = Rc::new(ChannelTransport::new(outbound));
                match self.game_server.add_client(transport.clone()) {
                    Ok(client_id) => {
                        info!("Connection {} from {} is client {}", conn_id, addr, client_id);
                        self.connections.insert(
                            conn_id,
                            Connection {
                                client_id,
                                transport,
                            },
                        );
                    }
                    Err(e) => warn!("Refusing connection {} from {}: {}", conn_id, addr, e),
                }
            }

            ServerMessage::FrameReceived { conn_id, payload } => {
                match self.connections.get(&conn_id) {
                    Some(connection) => {
                        if let Err(e) = connection.transport.deliver(&payload) {
                            error!("Dropping frame from client {}: {}", connection.client_id, e);
                        }
                    }
                    None => debug!("Frame from unregistered connection {}", conn_id),
                }
            }

            ServerMessage::ClientDisconnected { conn_id } => {
                if let Some(connection) = self.connections.remove(&conn_id) {
                    self.game_server.remove_client(connection.client_id);
                }
            }
        }
    }

    /// Main server loop: network events and syncer ticks, one at a time
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.spawn_acceptor();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.game_server.tick();
                },
            }
        }

        Ok(())
    }
}

/// Spawns reader and writer tasks for one connection. Returns false if the
/// main loop has gone away.
fn spawn_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn_id: u32,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) -> bool {
    let (reader, mut writer) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    if let Err(e) = server_tx.send(ServerMessage::ClientConnected {
        conn_id,
        addr,
        outbound: outbound_tx,
    }) {
        error!("Failed to register connection with main loop: {}", e);
        return false;
    }

    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                warn!("Failed to write to {}: {}", addr, e);
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(payload)) => {
                    if payload.trim().is_empty() {
                        continue;
                    }
                    if server_tx
                        .send(ServerMessage::FrameReceived { conn_id, payload })
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Error reading from {}: {}", addr, e);
                    break;
                }
            }
        }
        info!("Connection {} from {} closed", conn_id, addr);
        let _ = server_tx.send(ServerMessage::ClientDisconnected { conn_id });
    });

    true
}

/// Writes one newline-terminated frame
pub async fn write_frame<W>(writer: &mut W, frame: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{GameWorld, WireMessage, WorldMetadata};
    use std::cell::RefCell;

    #[test]
    fn test_server_message_creation() {
        let (outbound, _rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();

        match (ServerMessage::ClientConnected {
            conn_id: 7,
            addr,
            outbound,
        }) {
            ServerMessage::ClientConnected { conn_id, addr: a, .. } => {
                assert_eq!(conn_id, 7);
                assert_eq!(a, addr);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_write_frame_appends_newline() {
        let mut buffer: Vec<u8> = Vec::new();
        write_frame(&mut buffer, r#"["requestRefresh"]"#).await.unwrap();
        assert_eq!(buffer, b"[\"requestRefresh\"]\n");
    }

    #[tokio::test]
    async fn test_frames_route_to_game_server() {
        let world = Rc::new(RefCell::new(GameWorld::new("hub")));
        let mut server = Server::new(
            "127.0.0.1:0",
            world,
            SyncOptions::default(),
            Duration::from_millis(10),
            4,
        )
        .await
        .unwrap();

        let (outbound, mut frames) = mpsc::unbounded_channel();
        server.handle_message(ServerMessage::ClientConnected {
            conn_id: 1,
            addr: "127.0.0.1:5000".parse().unwrap(),
            outbound,
        });
        assert_eq!(server.game_server().client_count(), 1);

        // The hub asks for the client's metadata first
        let first = frames.recv().await.unwrap();
        assert_eq!(WireMessage::decode(&first).unwrap(), WireMessage::RequestMetadata);

        let metadata = WireMessage::MetadataChange(WorldMetadata {
            identifier: "client-1".into(),
            identifier_chain: vec!["client-1".into()],
        });
        server.handle_message(ServerMessage::FrameReceived {
            conn_id: 1,
            payload: metadata.encode().unwrap(),
        });
        let refresh = frames.recv().await.unwrap();
        assert_eq!(WireMessage::decode(&refresh).unwrap(), WireMessage::RequestRefresh);

        server.handle_message(ServerMessage::ClientDisconnected { conn_id: 1 });
        assert_eq!(server.game_server().client_count(), 0);
    }

    #[tokio::test]
    async fn test_tcp_client_gets_metadata_request() {
        let world = Rc::new(RefCell::new(GameWorld::new("hub")));
        let mut server = Server::new(
            "127.0.0.1:0",
            world,
            SyncOptions::default(),
            Duration::from_millis(10),
            4,
        )
        .await
        .unwrap();
        let addr = server.local_addr();

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                tokio::task::spawn_local(async move {
                    let _ = server.run().await;
                });

                let stream = TcpStream::connect(addr).await.unwrap();
                let (reader, _writer) = stream.into_split();
                let mut lines = BufReader::new(reader).lines();
                let first = lines.next_line().await.unwrap().unwrap();
                assert_eq!(WireMessage::decode(&first).unwrap(), WireMessage::RequestMetadata);
            })
            .await;
    }
}
