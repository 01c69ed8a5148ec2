//! # convoy-protocol
//!
//! Wire protocol definitions for the Convoy presence and notification core.
//!
//! This crate defines the frames exchanged between connected clients and the
//! server, the shared vocabulary they carry (user types, recipient groups,
//! notification payloads), and the codecs used to put them on the wire.
//!
//! ## Frame Types
//!
//! - `Join` - Register the identity behind a connection
//! - `SendDirectMessage` / `SendBroadcast` - Chat addressing
//! - `ReceiveMessage` / `NewNotification` / `DriversUpdate` - Server pushes
//! - `Ack` / `Error` - Acknowledgments and errors
//!
//! ## Example
//!
//! ```rust
//! use convoy_protocol::{codec, Frame, UserType};
//!
//! let frame = Frame::join("d-17", UserType::Driver, "Dana");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod types;

pub use codec::{decode, encode, Encoded, Encoding, FrameCodec, ProtocolError};
pub use frames::{codes, Frame, FrameType};
pub use types::{
    Category, NotificationPayload, OnlineDriver, Priority, ReadReceipt, RecipientType, SenderInfo,
    UserType,
};
