//! Wire protocol for the presence engine
//!
//! This module provides:
//! - Binary frame encoding/decoding
//! - Event payload definitions
//! - The typed command/event codec

pub mod codec;
pub mod frame;
pub mod messages;

// Re-export commonly used types
pub use codec::{ClientCommand, ServerEvent};
pub use frame::{FRAME_HEADER_SIZE, Frame, FrameCodec, FrameType, MAX_FRAME_SIZE};
pub use messages::*;
