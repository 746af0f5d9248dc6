//! Engine composition and the QUIC server around it
//!
//! [`Engine`] owns the registries and processes one typed command at a time
//! per connection; [`Server`] owns the QUIC endpoint, accepts connections,
//! and wires each one to the engine through channels. Scheduled work (room
//! deletion, heartbeat sweep, retention sweep) runs in background tasks fed
//! by the same dispatch paths, so room state only ever changes through the
//! engine.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::Endpoint;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::current_timestamp;
use crate::engine::broadcast::Broadcaster;
use crate::engine::connections::ConnectionRegistry;
use crate::engine::handler::{ConnectionCommand, ConnectionHandler};
use crate::engine::lifecycle::{Expiry, LifecycleManager};
use crate::engine::rooms::RoomRegistry;
use crate::engine::stats::StatsAggregator;
use crate::error::{EngineError, Result};
use crate::protocol::{
    truncate_chars, ClientCommand, ConnectedInfo, CreateRoomRequest, ErrorNotice, JoinRoom,
    LeaveRoom, Pong, PresenceNotice, ProfileUpdate, RoomActivity, RoomDeletedNotice,
    RoomJoinedInfo, SendChat, ServerEvent, ShutdownNotice, StatsSnapshot, StoredMessage,
    TypingNotice, TypingUpdate, MAX_MESSAGE_CHARS,
};
use crate::{generate_message_id, EngineConfig, Identity};

/// The room & presence engine: registries plus the event dispatch that
/// mutates them
pub struct Engine {
    config: EngineConfig,
    connections: Arc<ConnectionRegistry>,
    rooms: Arc<RoomRegistry>,
    lifecycle: LifecycleManager,
    broadcast: Broadcaster,
    stats: StatsAggregator,
    /// Taken by the expiry loop
    expired_rx: Mutex<Option<mpsc::UnboundedReceiver<Expiry>>>,
    /// Taken by the dead-peer loop
    dead_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let connections = Arc::new(ConnectionRegistry::new(config.max_connections));
        let rooms = Arc::new(RoomRegistry::new(
            &config.permanent_rooms,
            config.message_retention.as_millis() as u64,
            config.max_retained_messages,
            current_timestamp(),
        ));
        let (lifecycle, expired_rx) = LifecycleManager::new(config.room_inactivity_timeout);
        let (broadcast, dead_rx) = Broadcaster::new(Arc::clone(&connections), Arc::clone(&rooms));

        Arc::new(Self {
            config,
            connections,
            rooms,
            lifecycle,
            broadcast,
            stats: StatsAggregator::new(),
            expired_rx: Mutex::new(Some(expired_rx)),
            dead_rx: Mutex::new(Some(dead_rx)),
        })
    }

    /// Register a new connection and send it the `connected` bootstrap
    pub async fn attach(
        &self,
        command_tx: mpsc::UnboundedSender<ConnectionCommand>,
        remote_addr: SocketAddr,
    ) -> Result<String> {
        let conn_id = self.connections.register(command_tx, remote_addr).await?;
        self.stats.on_connect().await;

        let info = ConnectedInfo {
            rooms: self.rooms.list().await,
            stats: self.stats_snapshot().await,
        };
        self.broadcast
            .to_connection(&conn_id, ServerEvent::Connected(info))
            .await;

        info!("client {} connected from {}", conn_id, remote_addr);
        Ok(conn_id)
    }

    /// Process one inbound command from a connection
    pub async fn handle_command(&self, conn_id: &str, command: ClientCommand) {
        // Any inbound frame counts as a heartbeat
        self.connections.mark_heartbeat(conn_id).await;

        let result = match command {
            ClientCommand::Join(join) => {
                self.handle_join(conn_id, join).await;
                Ok(())
            }
            ClientCommand::Leave(leave) => {
                self.handle_leave(conn_id, leave).await;
                Ok(())
            }
            ClientCommand::Send(send) => self.handle_send(conn_id, send).await,
            ClientCommand::CreateRoom(req) => self.handle_create_room(conn_id, req).await,
            ClientCommand::Profile(update) => {
                self.handle_profile(conn_id, update).await;
                Ok(())
            }
            ClientCommand::Typing(update) => {
                self.handle_typing(conn_id, update).await;
                Ok(())
            }
            ClientCommand::GetStats => {
                let snapshot = self.stats_snapshot().await;
                self.broadcast
                    .to_connection(conn_id, ServerEvent::StatsUpdate(snapshot))
                    .await;
                Ok(())
            }
            ClientCommand::Ping(ping) => {
                self.broadcast
                    .to_connection(
                        conn_id,
                        ServerEvent::Pong(Pong {
                            timestamp: ping.timestamp,
                        }),
                    )
                    .await;
                Ok(())
            }
            // The heartbeat mark above is all a pong is for
            ClientCommand::Pong(_) => Ok(()),
            ClientCommand::Goodbye(goodbye) => {
                let _ = self
                    .connections
                    .deliver(conn_id, ConnectionCommand::Close("goodbye".to_string()))
                    .await;
                self.disconnect(conn_id, &goodbye.reason).await;
                Ok(())
            }
        };

        if let Err(err) = result {
            if err.is_validation() {
                self.send_error(conn_id, &err).await;
            } else {
                warn!("command from {} failed: {}", conn_id, err);
            }
        }
    }

    /// Join a room, implicitly leaving the current one first
    async fn handle_join(&self, conn_id: &str, join: JoinRoom) {
        // Unknown room ids fall back to the default room rather than erroring
        let room = self.rooms.get_or_default(&join.room).await;

        let existing = self.connections.identity(conn_id).await;
        let identity = resolve_identity(conn_id, &join, existing.as_ref());

        if let Some(prev_id) = self.connections.room(conn_id).await {
            // Leave the old room on a switch, and also on a same-room rejoin
            // under a different token, so presence never holds this
            // connection under two identities
            let token_changed =
                existing.as_ref().map(|i| i.token.as_str()) != Some(identity.token.as_str());
            if prev_id != room.id || token_changed {
                if let Some(old) = &existing {
                    self.leave_room(conn_id, &prev_id, old).await;
                }
                self.connections.set_room(conn_id, None).await;
            }
        }

        self.connections.set_identity(conn_id, identity.clone()).await;
        self.connections
            .set_room(conn_id, Some(room.id.clone()))
            .await;

        let outcome = room.join(&identity.token, conn_id).await;
        // Draining -> Active: a pending deletion no longer applies
        self.lifecycle.cancel(&room.id).await;

        let now = current_timestamp();
        room.touch(now).await;

        info!(
            "{} joined room {} ({} present)",
            identity.nickname, room.id, outcome.unique_count
        );

        if outcome.is_new_identity {
            self.broadcast
                .to_room(
                    &room.id,
                    ServerEvent::UserJoined(PresenceNotice {
                        room: room.id.clone(),
                        nickname: identity.nickname.clone(),
                        user_id: identity.token.clone(),
                        count: outcome.unique_count,
                        timestamp: now,
                    }),
                    Some(conn_id),
                )
                .await;
        }

        self.broadcast_room_update(&room.id).await;

        let messages = room.message_snapshot(now).await;
        self.broadcast
            .to_connection(
                conn_id,
                ServerEvent::RoomJoined(RoomJoinedInfo {
                    room: room.id.clone(),
                    room_name: room.name.clone(),
                    messages,
                    member_count: outcome.unique_count,
                }),
            )
            .await;

        self.broadcast_stats().await;
    }

    /// Explicit leave; only honored for the room the connection is actually in
    async fn handle_leave(&self, conn_id: &str, leave: LeaveRoom) {
        let current = self.connections.room(conn_id).await;
        if current.as_deref() != Some(leave.room.as_str()) {
            debug!(
                "{} sent leave for {} but is in {:?}",
                conn_id, leave.room, current
            );
            return;
        }

        if let Some(identity) = self.connections.identity(conn_id).await {
            self.leave_room(conn_id, &leave.room, &identity).await;
        }
        self.connections.set_room(conn_id, None).await;
    }

    /// Shared leave path for explicit leaves, room switches and disconnects
    async fn leave_room(&self, conn_id: &str, room_id: &str, identity: &Identity) {
        let Some(room) = self.rooms.get(room_id).await else {
            return;
        };

        let outcome = room.leave(&identity.token, conn_id).await;
        let now = current_timestamp();

        info!(
            "{} left room {} ({} present)",
            identity.nickname, room.id, outcome.unique_count
        );

        if outcome.is_last_connection {
            self.broadcast
                .to_room(
                    &room.id,
                    ServerEvent::UserLeft(PresenceNotice {
                        room: room.id.clone(),
                        nickname: identity.nickname.clone(),
                        user_id: identity.token.clone(),
                        count: outcome.unique_count,
                        timestamp: now,
                    }),
                    None,
                )
                .await;
        }

        self.broadcast_room_update(&room.id).await;

        if !room.permanent && outcome.unique_count == 0 {
            // Active -> Draining
            self.lifecycle.arm(&room.id).await;
        }

        self.broadcast_stats().await;
    }

    /// Append a chat message and fan it out to the room
    async fn handle_send(&self, conn_id: &str, send: SendChat) -> Result<()> {
        let identity = self
            .connections
            .identity(conn_id)
            .await
            .ok_or_else(|| EngineError::not_in_room("join a room before sending"))?;
        let room_id = self
            .connections
            .room(conn_id)
            .await
            .ok_or_else(|| EngineError::not_in_room("join a room before sending"))?;
        let room = self
            .rooms
            .get(&room_id)
            .await
            .ok_or_else(|| EngineError::not_in_room("join a room before sending"))?;

        let text = truncate_chars(&send.text, MAX_MESSAGE_CHARS);
        if text.trim().is_empty() {
            debug!("dropping empty message from {}", conn_id);
            return Ok(());
        }

        let now = current_timestamp();
        let nickname = send.nickname.unwrap_or_else(|| identity.nickname.clone());
        let avatar = send
            .avatar
            .or_else(|| nickname.chars().next().map(|c| c.to_string()))
            .unwrap_or_else(|| "?".to_string());

        let message = StoredMessage {
            id: generate_message_id(),
            room: room.id.clone(),
            text,
            nickname,
            avatar,
            user_id: identity.token.clone(),
            timestamp: now,
        };

        room.append_message(message.clone()).await;
        room.touch(now).await;

        let total = self.stats.on_message().await;

        self.broadcast
            .to_room(&room.id, ServerEvent::Message(message), None)
            .await;

        let every = self.config.stats_broadcast_every;
        if every != 0 && total % every == 0 {
            self.broadcast_stats().await;
        }

        Ok(())
    }

    /// Create an ephemeral room and put the creator in it
    async fn handle_create_room(&self, conn_id: &str, req: CreateRoomRequest) -> Result<()> {
        let identity = self
            .connections
            .identity(conn_id)
            .await
            .ok_or_else(|| EngineError::not_in_room("join a room before creating one"))?;

        let now = current_timestamp();
        let room = self
            .rooms
            .create(
                &req.name,
                req.description,
                req.icon,
                req.private,
                identity.clone(),
                now,
            )
            .await?;

        self.stats.on_room_created().await;

        info!("room {} ({}) created by {}", room.id, room.name, identity.nickname);

        self.broadcast
            .to_all(ServerEvent::RoomCreated(room.summary().await))
            .await;

        // The creator moves into the new room right away
        self.handle_join(
            conn_id,
            JoinRoom {
                room: room.id.clone(),
                nickname: Some(identity.nickname),
                user_id: Some(identity.token),
                level: identity.level,
            },
        )
        .await;

        Ok(())
    }

    /// Update identity display fields on an already-identified connection.
    /// The token is stable and presence is keyed on it; only display fields
    /// change here.
    async fn handle_profile(&self, conn_id: &str, update: ProfileUpdate) {
        let Some(mut identity) = self.connections.identity(conn_id).await else {
            debug!("profile update from {} before any join", conn_id);
            return;
        };

        if let Some(nickname) = update.nickname {
            identity.nickname = nickname;
        }
        identity.anonymous = update.anonymous;
        if let Some(level) = update.level {
            identity.level = Some(level);
        }

        debug!("profile updated for {}: {}", conn_id, identity.nickname);
        self.connections.set_identity(conn_id, identity).await;
    }

    /// Relay a typing indicator to the room; never stored
    async fn handle_typing(&self, conn_id: &str, update: TypingUpdate) {
        let (Some(identity), Some(room_id)) = (
            self.connections.identity(conn_id).await,
            self.connections.room(conn_id).await,
        ) else {
            return;
        };

        self.broadcast
            .to_room(
                &room_id,
                ServerEvent::Typing(TypingNotice {
                    room: room_id.clone(),
                    nickname: identity.nickname,
                    is_typing: update.is_typing,
                }),
                Some(conn_id),
            )
            .await;
    }

    /// Run the full disconnect path for a connection; safe to call from
    /// every death signal (stream end, send failure, heartbeat timeout,
    /// goodbye) — only the first caller does the work
    pub async fn disconnect(&self, conn_id: &str, reason: &str) {
        let Some(info) = self.connections.begin_close(conn_id).await else {
            return;
        };

        // Leave logic runs before the record is dropped, so presence never
        // observes a dangling member
        if let (Some(identity), Some(room_id)) = (info.identity, info.room) {
            self.leave_room(conn_id, &room_id, &identity).await;
        }

        self.connections.unregister(conn_id).await;
        self.stats.on_disconnect().await;

        info!("connection {} closed: {}", conn_id, reason);
    }

    /// Delete an expired ephemeral room if its timer is still the current one
    async fn process_expiry(&self, expiry: Expiry) {
        if !self.lifecycle.take_if_current(&expiry).await {
            return;
        }

        // Re-check the room state: the timer firing is only a hint
        let Some(room) = self.rooms.get(&expiry.room_id).await else {
            return;
        };
        if room.permanent || !room.is_vacant().await {
            return;
        }

        if self.rooms.delete(&expiry.room_id).await.is_some() {
            let minutes = self.config.room_inactivity_timeout.as_secs() / 60;
            info!("deleted inactive room {}", expiry.room_id);

            self.broadcast
                .to_all(ServerEvent::RoomDeleted(RoomDeletedNotice {
                    room: expiry.room_id,
                    reason: format!("inactive for {} minutes", minutes),
                }))
                .await;
        }
    }

    /// Spawn the scheduled work: expiry processing, dead-peer cleanup,
    /// heartbeat sweep, retention sweep
    pub fn start_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        {
            let engine = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let rx = engine.expired_rx.lock().await.take();
                let Some(mut rx) = rx else { return };
                while let Some(expiry) = rx.recv().await {
                    engine.process_expiry(expiry).await;
                }
            }));
        }

        {
            let engine = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let rx = engine.dead_rx.lock().await.take();
                let Some(mut rx) = rx else { return };
                while let Some(conn_id) = rx.recv().await {
                    engine.disconnect(&conn_id, "send failure").await;
                }
            }));
        }

        {
            let engine = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(engine.config.heartbeat_interval);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let dead = engine
                        .connections
                        .sweep_dead(engine.config.heartbeat_timeout)
                        .await;
                    for conn_id in dead {
                        let _ = engine
                            .connections
                            .deliver(&conn_id, ConnectionCommand::Close("heartbeat timeout".to_string()))
                            .await;
                        engine.disconnect(&conn_id, "heartbeat timeout").await;
                    }
                }
            }));
        }

        {
            let engine = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(engine.config.retention_sweep_interval);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let removed = engine.rooms.sweep_messages(current_timestamp()).await;
                    if removed > 0 {
                        info!("retention sweep removed {} stale messages", removed);
                    }
                }
            }));
        }

        tasks
    }

    /// Announce shutdown to every connection, then tell handlers to close
    pub async fn shutdown(&self) {
        self.broadcast
            .to_all(ServerEvent::Shutdown(ShutdownNotice {
                message: "server is restarting, reconnect shortly".to_string(),
            }))
            .await;

        for conn_id in self.connections.ids().await {
            let _ = self
                .connections
                .deliver(&conn_id, ConnectionCommand::Close("server shutdown".to_string()))
                .await;
        }

        self.lifecycle.shutdown().await;
    }

    /// Current stats, with the live room count folded in
    pub async fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.rooms.count().await).await
    }

    async fn broadcast_stats(&self) {
        let snapshot = self.stats_snapshot().await;
        self.broadcast
            .to_all(ServerEvent::StatsUpdate(snapshot))
            .await;
    }

    async fn broadcast_room_update(&self, room_id: &str) {
        let Some(room) = self.rooms.get(room_id).await else {
            return;
        };
        self.broadcast
            .to_all(ServerEvent::RoomUpdate(RoomActivity {
                room: room.id.clone(),
                member_count: room.unique_count().await,
                last_activity: room.last_activity().await,
            }))
            .await;
    }

    async fn send_error(&self, conn_id: &str, err: &EngineError) {
        self.broadcast
            .to_connection(
                conn_id,
                ServerEvent::Error(ErrorNotice {
                    code: err.code(),
                    message: err.message().to_string(),
                }),
            )
            .await;
    }
}

/// Resolve the identity for a join: payload fields win, then whatever the
/// connection already carries, then generated fallbacks
fn resolve_identity(conn_id: &str, join: &JoinRoom, existing: Option<&Identity>) -> Identity {
    let token = join
        .user_id
        .clone()
        .or_else(|| existing.map(|i| i.token.clone()))
        .unwrap_or_else(|| conn_id.to_string());

    let nickname = join
        .nickname
        .clone()
        .or_else(|| existing.map(|i| i.nickname.clone()))
        .unwrap_or_else(|| {
            let suffix: String = token.chars().take(6).collect();
            format!("runner_{}", suffix)
        });

    Identity {
        nickname,
        token,
        anonymous: existing.map(|i| i.anonymous).unwrap_or(false),
        level: join.level.or(existing.and_then(|i| i.level)),
    }
}

/// QUIC server wrapping the engine
pub struct Server {
    config: EngineConfig,
    engine: Arc<Engine>,
    endpoint: Option<Endpoint>,
    background: Vec<JoinHandle<()>>,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        let engine = Engine::new(config.clone());
        Self {
            config,
            engine,
            endpoint: None,
            background: Vec::new(),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    /// The engine behind this server
    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    /// Start the server and accept connections until the endpoint closes
    pub async fn start(&mut self) -> Result<()> {
        info!("starting presence engine on {}", self.config.bind_addr);

        // Self-signed certificate for development deployments
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| EngineError::config(format!("Failed to generate certificate: {}", e)))?;

        let cert_der = CertificateDer::from(
            cert.serialize_der()
                .map_err(|e| EngineError::config(format!("Failed to serialize certificate: {}", e)))?,
        );
        let key_der =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));

        let mut tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .map_err(|e| EngineError::config(format!("Failed to configure TLS: {}", e)))?;

        tls_config.alpn_protocols = vec![b"pacer".to_vec()];
        tls_config.max_early_data_size = 0;

        let mut transport_config = quinn::TransportConfig::default();
        // QUIC's own idle timeout sits behind the application heartbeat so
        // the sweep, not the transport, decides when a peer is gone
        let idle = 2 * self.config.heartbeat_timeout;
        transport_config.max_idle_timeout(Some(idle.try_into().map_err(|_| {
            EngineError::config("idle timeout out of range")
        })?));

        let mut quic_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
                .map_err(|e| EngineError::config(format!("Failed to create QUIC config: {}", e)))?,
        ));
        quic_config.transport_config(Arc::new(transport_config));

        let endpoint = Endpoint::server(quic_config, self.config.bind_addr)
            .map_err(|e| EngineError::network(format!("Failed to create endpoint: {}", e)))?;

        info!("listening on {}", endpoint.local_addr()?);

        self.endpoint = Some(endpoint.clone());
        self.background = self.engine.start_background_tasks();

        self.accept_connections(endpoint).await
    }

    /// Accept and handle incoming connections
    async fn accept_connections(&self, endpoint: Endpoint) -> Result<()> {
        loop {
            match endpoint.accept().await {
                Some(incoming) => {
                    let engine = Arc::clone(&self.engine);
                    let heartbeat_interval = self.config.heartbeat_interval;
                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_incoming(engine, heartbeat_interval, incoming).await
                        {
                            error!("connection handling failed: {}", e);
                        }
                    });
                }
                None => {
                    warn!("endpoint stopped accepting connections");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Wire one accepted connection to the engine
    async fn handle_incoming(
        engine: Arc<Engine>,
        heartbeat_interval: std::time::Duration,
        incoming: quinn::Incoming,
    ) -> Result<()> {
        let connection = incoming.await?;
        let remote_addr = connection.remote_address();

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let conn_id = match engine.attach(command_tx, remote_addr).await {
            Ok(conn_id) => conn_id,
            Err(e) => {
                warn!("rejecting connection from {}: {}", remote_addr, e);
                connection.close(0u32.into(), b"server full");
                return Ok(());
            }
        };

        let handler = Arc::new(ConnectionHandler::new(
            connection,
            heartbeat_interval,
            event_tx,
            command_rx,
        ));

        let handler_task = tokio::spawn(handler.run());

        // One task per connection drains its commands in order, so all
        // mutations from one client are serialized
        let event_engine = Arc::clone(&engine);
        let event_conn_id = conn_id.clone();
        let event_task = tokio::spawn(async move {
            while let Some(command) = event_rx.recv().await {
                event_engine.handle_command(&event_conn_id, command).await;
            }
        });

        tokio::select! {
            result = handler_task => {
                if let Ok(Err(e)) = result {
                    debug!("handler for {} ended: {}", conn_id, e);
                }
            }
            _ = event_task => {}
        }

        engine.disconnect(&conn_id, "connection closed").await;
        Ok(())
    }

    /// Gracefully shut the server down
    pub async fn shutdown(&mut self) -> Result<()> {
        self.engine.shutdown().await;

        for task in self.background.drain(..) {
            task.abort();
        }

        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"server shutdown");
            info!("server shutdown complete");
        }
        Ok(())
    }
}
