//! Error handling for the presence engine

use std::fmt;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error types
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Network-related errors
    Network(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Wire protocol errors (bad frame, unexpected payload)
    Protocol(String),
    /// Connection errors
    Connection(String),
    /// Configuration error
    Config(String),
    /// Room name is empty or over the length cap
    InvalidName(String),
    /// A room with the same display name already exists
    DuplicateName(String),
    /// Connection tried to act on a room it has not joined
    NotInRoom(String),
    /// Timeout error
    Timeout(String),
    /// Resource limit exceeded
    ResourceLimit(String),
    /// Server internal error
    Internal(String),
}

impl EngineError {
    /// Get error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            EngineError::Network(_) => 1000,
            EngineError::Serialization(_) => 1001,
            EngineError::Protocol(_) => 1002,
            EngineError::Connection(_) => 1003,
            EngineError::Config(_) => 1004,
            EngineError::InvalidName(_) => 1005,
            EngineError::DuplicateName(_) => 1006,
            EngineError::NotInRoom(_) => 1007,
            EngineError::Timeout(_) => 1008,
            EngineError::ResourceLimit(_) => 1009,
            EngineError::Internal(_) => 1010,
        }
    }

    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            EngineError::Network(msg)
            | EngineError::Serialization(msg)
            | EngineError::Protocol(msg)
            | EngineError::Connection(msg)
            | EngineError::Config(msg)
            | EngineError::InvalidName(msg)
            | EngineError::DuplicateName(msg)
            | EngineError::NotInRoom(msg)
            | EngineError::Timeout(msg)
            | EngineError::ResourceLimit(msg)
            | EngineError::Internal(msg) => msg,
        }
    }

    /// Validation errors are surfaced to the offending connection only;
    /// everything else is handled out of band.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidName(_)
                | EngineError::DuplicateName(_)
                | EngineError::NotInRoom(_)
        )
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        EngineError::Network(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        EngineError::Serialization(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        EngineError::Protocol(msg.into())
    }

    /// Create a connection error
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        EngineError::Connection(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        EngineError::Config(msg.into())
    }

    /// Create an invalid-name validation error
    pub fn invalid_name<T: Into<String>>(msg: T) -> Self {
        EngineError::InvalidName(msg.into())
    }

    /// Create a duplicate-name validation error
    pub fn duplicate_name<T: Into<String>>(msg: T) -> Self {
        EngineError::DuplicateName(msg.into())
    }

    /// Create a not-in-room validation error
    pub fn not_in_room<T: Into<String>>(msg: T) -> Self {
        EngineError::NotInRoom(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        EngineError::Timeout(msg.into())
    }

    /// Create a resource limit error
    pub fn resource_limit<T: Into<String>>(msg: T) -> Self {
        EngineError::ResourceLimit(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        EngineError::Internal(msg.into())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Network(msg) => write!(f, "Network error: {}", msg),
            EngineError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            EngineError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            EngineError::Connection(msg) => write!(f, "Connection error: {}", msg),
            EngineError::Config(msg) => write!(f, "Configuration error: {}", msg),
            EngineError::InvalidName(msg) => write!(f, "Invalid room name: {}", msg),
            EngineError::DuplicateName(msg) => write!(f, "Duplicate room name: {}", msg),
            EngineError::NotInRoom(msg) => write!(f, "Not in a room: {}", msg),
            EngineError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            EngineError::ResourceLimit(msg) => write!(f, "Resource limit exceeded: {}", msg),
            EngineError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Network(format!("IO error: {}", err))
    }
}

impl From<quinn::ConnectError> for EngineError {
    fn from(err: quinn::ConnectError) -> Self {
        EngineError::Connection(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ConnectionError> for EngineError {
    fn from(err: quinn::ConnectionError) -> Self {
        EngineError::Connection(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ReadError> for EngineError {
    fn from(err: quinn::ReadError) -> Self {
        EngineError::Network(format!("QUIC read error: {}", err))
    }
}

impl From<quinn::WriteError> for EngineError {
    fn from(err: quinn::WriteError) -> Self {
        EngineError::Network(format!("QUIC write error: {}", err))
    }
}

impl From<quinn::ClosedStream> for EngineError {
    fn from(err: quinn::ClosedStream) -> Self {
        EngineError::Connection(format!("Stream closed: {}", err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_distinct() {
        let errors = [
            EngineError::network("a"),
            EngineError::serialization("b"),
            EngineError::protocol("c"),
            EngineError::connection("d"),
            EngineError::config("e"),
            EngineError::invalid_name("f"),
            EngineError::duplicate_name("g"),
            EngineError::not_in_room("h"),
            EngineError::timeout("i"),
            EngineError::resource_limit("j"),
            EngineError::internal("k"),
        ];
        let codes: std::collections::HashSet<u32> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_validation_routing() {
        assert!(EngineError::invalid_name("empty").is_validation());
        assert!(EngineError::duplicate_name("taken").is_validation());
        assert!(EngineError::not_in_room("join first").is_validation());
        assert!(!EngineError::network("down").is_validation());
        assert!(!EngineError::protocol("bad frame").is_validation());
    }

    #[test]
    fn test_message_preserved() {
        let err = EngineError::duplicate_name("러너스");
        assert_eq!(err.message(), "러너스");
        assert_eq!(err.code(), 1006);
    }
}
