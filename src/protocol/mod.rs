//! Tracker command protocol
//!
//! ASCII commands and replies framed with a CRC-16 and a carriage return,
//! the binary-as-hex TX tracking reply, and the codec that runs one
//! command/reply exchange over a session.

pub mod codec;
pub mod command;
pub mod crc;
pub mod reply;
pub mod tx;

pub use codec::CommandCodec;
pub use command::{BaudRate, Command, Handshake, ReplyOptions, TrackingPriority, VersionTarget};
pub use crc::{calculate_crc, verify_crc};
pub use reply::Reply;
pub use tx::{HandleRecord, PortStatus, TxReply};
