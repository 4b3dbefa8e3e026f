//! Protocol module - Defines the wire format for FrameLink requests
//!
//! Every request is a single fixed-size frame:
//! - 1 byte start marker (`$`)
//! - 2 bytes message type (big-endian)
//! - 4 bytes address (big-endian, reserved)
//! - 4 bytes payload length (big-endian, reserved)
//! - 1 byte end marker (`#`)

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Default port of the frame server
pub const DEFAULT_PORT: u16 = 9877;

/// Default host of the frame server
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// First byte of every frame
pub const START_MARKER: u8 = b'$';

/// Last byte of every frame
pub const END_MARKER: u8 = b'#';

/// Total frame size on the wire, in bytes
pub const FRAME_SIZE: usize = 11;
