//! # acsim Wire Protocol
//!
//! Message records exchanged between replicas and with the controller, and
//! the fixed-size frame codec they travel in. Every record is UTF-8 JSON
//! right-padded with spaces to exactly 1024 bytes, which keeps both the UDP
//! datagram path and the TCP stream path trivially self-framing.

pub mod frame;
pub mod messages;

pub use frame::{decode_frame, encode_frame, WireError, FRAME_LEN};
pub use messages::{ControllerCommand, PeerMessage, RegisterHello, StateReport};
