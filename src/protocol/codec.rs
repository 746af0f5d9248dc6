//! Codec between typed events and binary frames
//!
//! Every inbound frame becomes a [`ClientCommand`] and every outbound frame
//! is produced from a [`ServerEvent`]; nothing outside the protocol layer
//! touches raw frames.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Error as IoError, ErrorKind};

use super::frame::{Frame, FrameType};
use super::messages::*;

fn encode_payload<T: Serialize>(value: &T) -> io::Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, e))
}

fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> io::Result<T> {
    serde_json::from_slice(payload).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
}

/// Everything a client can ask of the engine
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Join(JoinRoom),
    Leave(LeaveRoom),
    Send(SendChat),
    CreateRoom(CreateRoomRequest),
    Profile(ProfileUpdate),
    Typing(TypingUpdate),
    GetStats,
    Ping(Ping),
    Pong(Pong),
    Goodbye(Goodbye),
}

impl ClientCommand {
    /// The frame type carrying this command
    pub fn frame_type(&self) -> FrameType {
        match self {
            ClientCommand::Join(_) => FrameType::Join,
            ClientCommand::Leave(_) => FrameType::Leave,
            ClientCommand::Send(_) => FrameType::Send,
            ClientCommand::CreateRoom(_) => FrameType::CreateRoom,
            ClientCommand::Profile(_) => FrameType::ProfileUpdate,
            ClientCommand::Typing(_) => FrameType::Typing,
            ClientCommand::GetStats => FrameType::GetStats,
            ClientCommand::Ping(_) => FrameType::Ping,
            ClientCommand::Pong(_) => FrameType::Pong,
            ClientCommand::Goodbye(_) => FrameType::Goodbye,
        }
    }

    /// Encode into a frame
    pub fn encode(&self) -> io::Result<Frame> {
        let payload = match self {
            ClientCommand::Join(v) => encode_payload(v)?,
            ClientCommand::Leave(v) => encode_payload(v)?,
            ClientCommand::Send(v) => encode_payload(v)?,
            ClientCommand::CreateRoom(v) => encode_payload(v)?,
            ClientCommand::Profile(v) => encode_payload(v)?,
            ClientCommand::Typing(v) => encode_payload(v)?,
            ClientCommand::GetStats => Bytes::new(),
            ClientCommand::Ping(v) => encode_payload(v)?,
            ClientCommand::Pong(v) => encode_payload(v)?,
            ClientCommand::Goodbye(v) => encode_payload(v)?,
        };
        Ok(Frame::new(self.frame_type(), payload))
    }

    /// Decode from a frame; errors on server-to-client frame types and on
    /// malformed payloads
    pub fn decode(frame: &Frame) -> io::Result<ClientCommand> {
        let cmd = match frame.frame_type {
            FrameType::Join => ClientCommand::Join(decode_payload(&frame.payload)?),
            FrameType::Leave => ClientCommand::Leave(decode_payload(&frame.payload)?),
            FrameType::Send => ClientCommand::Send(decode_payload(&frame.payload)?),
            FrameType::CreateRoom => ClientCommand::CreateRoom(decode_payload(&frame.payload)?),
            FrameType::ProfileUpdate => ClientCommand::Profile(decode_payload(&frame.payload)?),
            FrameType::Typing => ClientCommand::Typing(decode_payload(&frame.payload)?),
            FrameType::GetStats => ClientCommand::GetStats,
            FrameType::Ping => ClientCommand::Ping(decode_payload(&frame.payload)?),
            FrameType::Pong => ClientCommand::Pong(decode_payload(&frame.payload)?),
            FrameType::Goodbye => ClientCommand::Goodbye(decode_payload(&frame.payload)?),
            other => {
                return Err(IoError::new(
                    ErrorKind::InvalidData,
                    format!("not a client frame: {:?}", other),
                ));
            }
        };
        Ok(cmd)
    }
}

/// Everything the engine can tell a client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected(ConnectedInfo),
    RoomJoined(RoomJoinedInfo),
    UserJoined(PresenceNotice),
    UserLeft(PresenceNotice),
    Message(StoredMessage),
    RoomUpdate(RoomActivity),
    RoomCreated(RoomSummary),
    RoomDeleted(RoomDeletedNotice),
    StatsUpdate(StatsSnapshot),
    Typing(TypingNotice),
    Error(ErrorNotice),
    Shutdown(ShutdownNotice),
    Ping(Ping),
    Pong(Pong),
}

impl ServerEvent {
    /// The frame type carrying this event
    pub fn frame_type(&self) -> FrameType {
        match self {
            ServerEvent::Connected(_) => FrameType::Connected,
            ServerEvent::RoomJoined(_) => FrameType::RoomJoined,
            ServerEvent::UserJoined(_) => FrameType::UserJoined,
            ServerEvent::UserLeft(_) => FrameType::UserLeft,
            ServerEvent::Message(_) => FrameType::Message,
            ServerEvent::RoomUpdate(_) => FrameType::RoomUpdate,
            ServerEvent::RoomCreated(_) => FrameType::RoomCreated,
            ServerEvent::RoomDeleted(_) => FrameType::RoomDeleted,
            ServerEvent::StatsUpdate(_) => FrameType::StatsUpdate,
            ServerEvent::Typing(_) => FrameType::UserTyping,
            ServerEvent::Error(_) => FrameType::Error,
            ServerEvent::Shutdown(_) => FrameType::Shutdown,
            ServerEvent::Ping(_) => FrameType::Ping,
            ServerEvent::Pong(_) => FrameType::Pong,
        }
    }

    /// Encode into a frame
    pub fn encode(&self) -> io::Result<Frame> {
        let payload = match self {
            ServerEvent::Connected(v) => encode_payload(v)?,
            ServerEvent::RoomJoined(v) => encode_payload(v)?,
            ServerEvent::UserJoined(v) => encode_payload(v)?,
            ServerEvent::UserLeft(v) => encode_payload(v)?,
            ServerEvent::Message(v) => encode_payload(v)?,
            ServerEvent::RoomUpdate(v) => encode_payload(v)?,
            ServerEvent::RoomCreated(v) => encode_payload(v)?,
            ServerEvent::RoomDeleted(v) => encode_payload(v)?,
            ServerEvent::StatsUpdate(v) => encode_payload(v)?,
            ServerEvent::Typing(v) => encode_payload(v)?,
            ServerEvent::Error(v) => encode_payload(v)?,
            ServerEvent::Shutdown(v) => encode_payload(v)?,
            ServerEvent::Ping(v) => encode_payload(v)?,
            ServerEvent::Pong(v) => encode_payload(v)?,
        };
        Ok(Frame::new(self.frame_type(), payload))
    }

    /// Decode from a frame; errors on client-to-server frame types and on
    /// malformed payloads
    pub fn decode(frame: &Frame) -> io::Result<ServerEvent> {
        let event = match frame.frame_type {
            FrameType::Connected => ServerEvent::Connected(decode_payload(&frame.payload)?),
            FrameType::RoomJoined => ServerEvent::RoomJoined(decode_payload(&frame.payload)?),
            FrameType::UserJoined => ServerEvent::UserJoined(decode_payload(&frame.payload)?),
            FrameType::UserLeft => ServerEvent::UserLeft(decode_payload(&frame.payload)?),
            FrameType::Message => ServerEvent::Message(decode_payload(&frame.payload)?),
            FrameType::RoomUpdate => ServerEvent::RoomUpdate(decode_payload(&frame.payload)?),
            FrameType::RoomCreated => ServerEvent::RoomCreated(decode_payload(&frame.payload)?),
            FrameType::RoomDeleted => ServerEvent::RoomDeleted(decode_payload(&frame.payload)?),
            FrameType::StatsUpdate => ServerEvent::StatsUpdate(decode_payload(&frame.payload)?),
            FrameType::UserTyping => ServerEvent::Typing(decode_payload(&frame.payload)?),
            FrameType::Error => ServerEvent::Error(decode_payload(&frame.payload)?),
            FrameType::Shutdown => ServerEvent::Shutdown(decode_payload(&frame.payload)?),
            FrameType::Ping => ServerEvent::Ping(decode_payload(&frame.payload)?),
            FrameType::Pong => ServerEvent::Pong(decode_payload(&frame.payload)?),
            other => {
                return Err(IoError::new(
                    ErrorKind::InvalidData,
                    format!("not a server frame: {:?}", other),
                ));
            }
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_command_roundtrip() {
        let cmd = ClientCommand::Join(JoinRoom {
            room: "main".to_string(),
            nickname: Some("runner".to_string()),
            user_id: Some("tok-1".to_string()),
            level: None,
        });

        let frame = cmd.encode().unwrap();
        assert_eq!(frame.frame_type, FrameType::Join);
        let decoded = ClientCommand::decode(&frame).unwrap();
        assert_eq!(cmd, decoded);
    }

    #[test]
    fn test_get_stats_has_no_payload() {
        let frame = ClientCommand::GetStats.encode().unwrap();
        assert!(frame.payload.is_empty());
        assert_eq!(
            ClientCommand::decode(&frame).unwrap(),
            ClientCommand::GetStats
        );
    }

    #[test]
    fn test_server_event_roundtrip() {
        let event = ServerEvent::UserLeft(PresenceNotice {
            room: "main".to_string(),
            nickname: "runner".to_string(),
            user_id: "tok-1".to_string(),
            count: 2,
            timestamp: 42,
        });

        let frame = event.encode().unwrap();
        assert_eq!(frame.frame_type, FrameType::UserLeft);
        assert_eq!(ServerEvent::decode(&frame).unwrap(), event);
    }

    #[test]
    fn test_decode_rejects_wrong_direction() {
        let frame = ClientCommand::GetStats.encode().unwrap();
        assert!(ServerEvent::decode(&frame).is_err());

        let notice = ServerEvent::Error(ErrorNotice {
            code: 1005,
            message: "bad name".to_string(),
        });
        assert!(ClientCommand::decode(&notice.encode().unwrap()).is_err());
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        let frame = Frame::new(FrameType::Join, "not json");
        assert!(ClientCommand::decode(&frame).is_err());
    }
}
