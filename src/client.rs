//! Connecting client for the presence engine
//!
//! Opens the control stream, speaks the frame protocol, and surfaces server
//! events on a channel. Accepts the server's self-signed development
//! certificate.

use quinn::{ClientConfig as QuinnClientConfig, Connection, Endpoint, SendStream};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

use crate::error::{EngineError, Result};
use crate::protocol::{
    ClientCommand, CreateRoomRequest, FrameCodec, Goodbye, JoinRoom, LeaveRoom, Pong,
    ProfileUpdate, SendChat, ServerEvent, TypingUpdate,
};

/// Client configuration
#[derive(Clone, Debug)]
pub struct PacerClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Client bind address (use 0.0.0.0:0 for auto)
    pub bind_addr: SocketAddr,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for PacerClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4433".parse().unwrap(),
            bind_addr: "0.0.0.0:0".parse().unwrap(),
            connect_timeout_secs: 10,
        }
    }
}

/// Events surfaced to the client's consumer
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Transport is up and the control stream is open
    Connected,
    /// Disconnected from the server
    Disconnected(String),
    /// A server event arrived
    Event(ServerEvent),
}

/// A connected chat client
pub struct PacerClient {
    config: PacerClientConfig,
    connection: Option<Connection>,
    endpoint: Option<Endpoint>,
    send: Arc<Mutex<Option<SendStream>>>,
}

impl PacerClient {
    pub fn new(config: PacerClientConfig) -> Self {
        Self {
            config,
            connection: None,
            endpoint: None,
            send: Arc::new(Mutex::new(None)),
        }
    }

    /// Connect and open the control stream; returns the event channel
    pub async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<ClientEvent>> {
        info!("connecting to {}", self.config.server_addr);

        let client_config = self.configure_client()?;

        let mut endpoint = Endpoint::client(self.config.bind_addr)
            .map_err(|e| EngineError::network(format!("Failed to create endpoint: {}", e)))?;
        endpoint.set_default_client_config(client_config);
        self.endpoint = Some(endpoint.clone());

        let connecting = endpoint
            .connect(self.config.server_addr, "localhost")
            .map_err(|e| EngineError::connection(format!("Failed to initiate connection: {}", e)))?;

        let connection = tokio::time::timeout(
            std::time::Duration::from_secs(self.config.connect_timeout_secs),
            connecting,
        )
        .await
        .map_err(|_| EngineError::timeout("Connection timeout"))??;

        self.connection = Some(connection.clone());

        // The client opens the control stream; the server is waiting on it
        let (send, recv) = connection.open_bi().await?;
        {
            let mut guard = self.send.lock().await;
            *guard = Some(send);
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let _ = event_tx.send(ClientEvent::Connected);

        self.spawn_reader(recv, event_tx);

        info!("connected to {}", self.config.server_addr);
        Ok(event_rx)
    }

    /// Accept the server's self-signed certificate.
    /// WARNING: development/testing only.
    fn configure_client(&self) -> Result<QuinnClientConfig> {
        let mut crypto = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();

        crypto.alpn_protocols = vec![b"pacer".to_vec()];

        Ok(QuinnClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| EngineError::config(format!("Failed to create QUIC config: {}", e)))?,
        )))
    }

    /// Read frames off the control stream and surface them as events.
    /// Server pings are answered inline so the consumer never has to care
    /// about heartbeats.
    fn spawn_reader(
        &self,
        mut recv: quinn::RecvStream,
        event_tx: mpsc::UnboundedSender<ClientEvent>,
    ) {
        let send = Arc::clone(&self.send);

        tokio::spawn(async move {
            let mut codec = FrameCodec::new();
            let mut buf = vec![0u8; 4096];

            loop {
                match recv.read(&mut buf).await {
                    Ok(Some(n)) => {
                        codec.feed(&buf[..n]);
                        loop {
                            match codec.decode_next() {
                                Ok(Some(frame)) => match ServerEvent::decode(&frame) {
                                    Ok(ServerEvent::Ping(ping)) => {
                                        let pong = ClientCommand::Pong(Pong {
                                            timestamp: ping.timestamp,
                                        });
                                        if write_command(&send, &pong).await.is_err() {
                                            return;
                                        }
                                    }
                                    Ok(event) => {
                                        if event_tx.send(ClientEvent::Event(event)).is_err() {
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        error!("failed to decode server event: {}", e);
                                    }
                                },
                                Ok(None) => break,
                                Err(e) => {
                                    let _ = event_tx.send(ClientEvent::Disconnected(format!(
                                        "stream corrupt: {}",
                                        e
                                    )));
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        let _ = event_tx
                            .send(ClientEvent::Disconnected("stream finished".to_string()));
                        return;
                    }
                    Err(e) => {
                        let _ = event_tx
                            .send(ClientEvent::Disconnected(format!("connection lost: {}", e)));
                        return;
                    }
                }
            }
        });
    }

    /// Join a room
    pub async fn join(
        &self,
        room: impl Into<String>,
        nickname: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<()> {
        self.send_command(&ClientCommand::Join(JoinRoom {
            room: room.into(),
            nickname: Some(nickname.into()),
            user_id: Some(user_id.into()),
            level: None,
        }))
        .await
    }

    /// Leave a room explicitly
    pub async fn leave(&self, room: impl Into<String>) -> Result<()> {
        self.send_command(&ClientCommand::Leave(LeaveRoom { room: room.into() }))
            .await
    }

    /// Send a chat message to the current room
    pub async fn send_message(&self, text: impl Into<String>) -> Result<()> {
        self.send_command(&ClientCommand::Send(SendChat {
            text: text.into(),
            nickname: None,
            avatar: None,
        }))
        .await
    }

    /// Create an ephemeral room
    pub async fn create_room(&self, request: CreateRoomRequest) -> Result<()> {
        self.send_command(&ClientCommand::CreateRoom(request)).await
    }

    /// Update identity display fields
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<()> {
        self.send_command(&ClientCommand::Profile(update)).await
    }

    /// Send a typing indicator
    pub async fn typing(&self, is_typing: bool) -> Result<()> {
        self.send_command(&ClientCommand::Typing(TypingUpdate { is_typing }))
            .await
    }

    /// Ask for a stats snapshot (answered to this connection only)
    pub async fn request_stats(&self) -> Result<()> {
        self.send_command(&ClientCommand::GetStats).await
    }

    async fn send_command(&self, command: &ClientCommand) -> Result<()> {
        if self.connection.is_none() {
            return Err(EngineError::connection("not connected"));
        }
        write_command(&self.send, command).await?;
        debug!("sent {:?}", command.frame_type());
        Ok(())
    }

    /// Say goodbye and close the connection
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            let goodbye = ClientCommand::Goodbye(Goodbye {
                reason: "client disconnect".to_string(),
            });
            let _ = write_command(&self.send, &goodbye).await;
        }

        if let Some(connection) = self.connection.take() {
            connection.close(0u32.into(), b"client disconnect");
        }
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"client shutdown");
        }
        {
            let mut guard = self.send.lock().await;
            *guard = None;
        }

        info!("disconnected from server");
        Ok(())
    }

    /// Check if connected to the server
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

/// Encode and write one command on the shared control stream
async fn write_command(
    send: &Arc<Mutex<Option<SendStream>>>,
    command: &ClientCommand,
) -> Result<()> {
    let frame = command
        .encode()
        .map_err(|e| EngineError::serialization(format!("failed to encode command: {}", e)))?;

    let mut guard = send.lock().await;
    let stream = guard
        .as_mut()
        .ok_or_else(|| EngineError::connection("control stream not open"))?;

    stream.write_all(&frame.encode_to_bytes()).await?;
    Ok(())
}

/// Certificate verifier that accepts any certificate (INSECURE - for
/// development only)
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = PacerClientConfig::default();
        assert_eq!(config.server_addr.port(), 4433);
        assert_eq!(config.bind_addr.port(), 0);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_client_creation() {
        let client = PacerClient::new(PacerClientConfig::default());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected() {
        let mut client = PacerClient::new(PacerClientConfig::default());
        assert!(client.disconnect().await.is_ok());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let client = PacerClient::new(PacerClientConfig::default());
        assert!(client.send_message("hi").await.is_err());
        assert!(client.join("main", "runner", "tok-1").await.is_err());
    }
}
