//! Per-connection protocol handler
//!
//! The only wire-format-aware piece on the server side. One bidirectional
//! QUIC stream carries length-prefixed frames both ways: a read loop decodes
//! inbound frames into typed commands for the engine, a command loop writes
//! queued server events back out, and a ping loop keeps the heartbeat
//! flowing. Malformed input is logged and skipped; the connection stays open.

use std::sync::Arc;
use std::time::Duration;

use quinn::{Connection, RecvStream, SendStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::current_timestamp;
use crate::error::{EngineError, Result};
use crate::protocol::{ClientCommand, FrameCodec, Ping, ServerEvent};

/// Commands the engine can send to a connection's handler
#[derive(Debug)]
pub enum ConnectionCommand {
    /// Write this event to the peer
    Deliver(ServerEvent),
    /// Close the underlying connection
    Close(String),
}

/// Handles one client connection for its whole lifetime
pub struct ConnectionHandler {
    connection: Connection,
    heartbeat_interval: Duration,
    /// Decoded inbound commands, consumed by the engine
    event_tx: mpsc::UnboundedSender<ClientCommand>,
    /// Outbound commands from the engine; taken by the command loop
    command_rx: RwLock<Option<mpsc::UnboundedReceiver<ConnectionCommand>>>,
    /// Send half of the control stream, shared by command and ping loops
    send: RwLock<Option<SendStream>>,
}

impl ConnectionHandler {
    pub fn new(
        connection: Connection,
        heartbeat_interval: Duration,
        event_tx: mpsc::UnboundedSender<ClientCommand>,
        command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> Self {
        Self {
            connection,
            heartbeat_interval,
            event_tx,
            command_rx: RwLock::new(Some(command_rx)),
            send: RwLock::new(None),
        }
    }

    /// Get the remote address
    pub fn remote_address(&self) -> std::net::SocketAddr {
        self.connection.remote_address()
    }

    /// Run the handler until the connection dies.
    /// This is the main entry point that should be spawned as a task.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        // The client opens the control stream right after connecting
        let (send, recv) = self
            .connection
            .accept_bi()
            .await
            .map_err(|e| EngineError::connection(format!("Failed to accept control stream: {}", e)))?;

        {
            let mut guard = self.send.write().await;
            *guard = Some(send);
        }

        debug!("control stream accepted from {}", self.remote_address());

        let read_handle = {
            let handler = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = handler.read_loop(recv).await {
                    debug!("read loop ended: {}", e);
                }
            })
        };

        let command_handle = {
            let handler = Arc::clone(&self);
            tokio::spawn(async move {
                handler.command_loop().await;
            })
        };

        let ping_handle = {
            let handler = Arc::clone(&self);
            tokio::spawn(async move {
                handler.ping_loop().await;
            })
        };

        // Any loop ending means the connection is done
        tokio::select! {
            _ = read_handle => {}
            _ = command_handle => {}
            _ = ping_handle => {}
        }

        Ok(())
    }

    /// Decode inbound frames into commands for the engine
    async fn read_loop(self: &Arc<Self>, mut recv: RecvStream) -> Result<()> {
        let mut codec = FrameCodec::new();
        let mut buf = vec![0u8; 4096];

        loop {
            match recv.read(&mut buf).await {
                Ok(Some(n)) => {
                    codec.feed(&buf[..n]);

                    loop {
                        match codec.decode_next() {
                            Ok(Some(frame)) => match ClientCommand::decode(&frame) {
                                Ok(command) => {
                                    if self.event_tx.send(command).is_err() {
                                        // Engine side is gone; stop reading
                                        return Ok(());
                                    }
                                }
                                Err(e) => {
                                    // Malformed payload is not fatal
                                    warn!(
                                        "ignoring malformed {:?} frame from {}: {}",
                                        frame.frame_type,
                                        self.remote_address(),
                                        e
                                    );
                                }
                            },
                            Ok(None) => break,
                            Err(e) => {
                                return Err(EngineError::protocol(format!(
                                    "frame decode error: {}",
                                    e
                                )));
                            }
                        }
                    }
                }
                Ok(None) => {
                    debug!("control stream finished");
                    return Ok(());
                }
                Err(e) => {
                    return Err(EngineError::network(format!(
                        "control stream read error: {}",
                        e
                    )));
                }
            }
        }
    }

    /// Drain engine commands onto the wire
    async fn command_loop(self: &Arc<Self>) {
        let rx = self.command_rx.write().await.take();
        let Some(mut rx) = rx else {
            return;
        };

        while let Some(command) = rx.recv().await {
            match command {
                ConnectionCommand::Deliver(event) => {
                    if let Err(e) = self.send_event(&event).await {
                        debug!("delivery to {} failed: {}", self.remote_address(), e);
                        return;
                    }
                }
                ConnectionCommand::Close(reason) => {
                    self.connection.close(0u32.into(), reason.as_bytes());
                    return;
                }
            }
        }
    }

    /// Keepalive pings on a fixed interval
    async fn ping_loop(self: &Arc<Self>) {
        let mut interval = tokio::time::interval(self.heartbeat_interval);
        // The first tick fires immediately; skip it so pings start one
        // interval in
        interval.tick().await;

        loop {
            interval.tick().await;

            let ping = ServerEvent::Ping(Ping {
                timestamp: current_timestamp(),
            });

            if let Err(e) = self.send_event(&ping).await {
                debug!("ping to {} failed: {}", self.remote_address(), e);
                return;
            }
        }
    }

    /// Encode and write one event on the control stream
    async fn send_event(&self, event: &ServerEvent) -> Result<()> {
        let frame = event
            .encode()
            .map_err(|e| EngineError::serialization(format!("failed to encode event: {}", e)))?;

        let mut guard = self.send.write().await;
        let send = guard
            .as_mut()
            .ok_or_else(|| EngineError::connection("control stream not open"))?;

        let data = frame.encode_to_bytes();
        send.write_all(&data)
            .await
            .map_err(|e| EngineError::network(format!("control stream write error: {}", e)))?;

        Ok(())
    }
}
