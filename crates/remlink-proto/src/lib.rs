//! # Remlink Protocol
//!
//! Wire vocabulary for the remlink remote protocol: message type codes,
//! greeting options, control frame layouts and the length-prefixed transport
//! framer.

#![warn(missing_docs)]

/// Message type codes and dispatch
pub mod message;

/// Greeting frame options
pub mod greeting;

/// Control and request frame layouts
pub mod frame;

/// Length-prefixed transport framing
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use codec::{FrameCodec, HEADER_LEN, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use frame::Frame;
pub use greeting::{Greeting, GreetingOption, PROTOCOL_VERSION};
pub use message::MessageType;
