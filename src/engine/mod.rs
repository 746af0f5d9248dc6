//! The room & presence engine
//!
//! Components, leaf first: connection registry, presence tracker, message
//! store, room registry, lifecycle manager, broadcast engine, stats
//! aggregator, and the per-connection protocol handler. `server` composes
//! them and owns the QUIC endpoint.

pub mod broadcast;
pub mod connections;
pub mod handler;
pub mod history;
pub mod lifecycle;
pub mod presence;
pub mod rooms;
pub mod server;
pub mod stats;

pub use broadcast::Broadcaster;
pub use connections::ConnectionRegistry;
pub use handler::{ConnectionCommand, ConnectionHandler};
pub use lifecycle::LifecycleManager;
pub use rooms::{Room, RoomRegistry};
pub use server::{Engine, Server};
pub use stats::StatsAggregator;
