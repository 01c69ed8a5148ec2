//! Frame types for the Convoy protocol.
//!
//! Frames are the fundamental unit of communication between a client
//! connection and the server. Binary clients receive them as MessagePack,
//! text clients as JSON; the shape is the same either way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{NotificationPayload, OnlineDriver, SenderInfo, UserType};

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// The frame could not be decoded or is not valid in this direction.
    pub const INVALID_FRAME: u16 = 1001;
    /// A chat frame arrived before `join`.
    pub const NOT_JOINED: u16 = 1002;
    /// The request was rejected by validation.
    pub const VALIDATION_FAILED: u16 = 1003;
    /// The server failed while handling the request.
    pub const INTERNAL: u16 = 1500;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Join,
    SendDirectMessage,
    SendBroadcast,
    Ping,
    Connected,
    Joined,
    ReceiveMessage,
    NewNotification,
    DriversUpdate,
    Ack,
    Error,
    Pong,
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Frame {
    /// Announce the identity behind this connection.
    Join {
        user_id: String,
        user_type: UserType,
        display_name: String,
    },

    /// Chat message to every connection of one user.
    SendDirectMessage {
        /// Request ID for acknowledgment.
        id: u64,
        to_user_id: String,
        body: String,
    },

    /// Chat message to every connection of one user type.
    SendBroadcast {
        /// Request ID for acknowledgment.
        id: u64,
        to_user_type: UserType,
        body: String,
    },

    /// Keepalive ping.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Transport session established.
    Connected {
        connection_id: String,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Presence registered for this connection.
    Joined { connection_id: String },

    /// A chat message pushed to this connection.
    ReceiveMessage {
        sender: SenderInfo,
        body: String,
        timestamp: DateTime<Utc>,
        broadcast: bool,
    },

    /// A persisted notification pushed to this connection.
    NewNotification { notification: NotificationPayload },

    /// Complete list of online drivers. Only sent to admins.
    DriversUpdate { drivers: Vec<OnlineDriver> },

    /// Acknowledgment of a chat request.
    Ack {
        id: u64,
        /// Number of live connections the message was pushed to.
        delivered: u32,
    },

    /// Error response.
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        code: u16,
        message: String,
    },

    /// Keepalive pong.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Join { .. } => FrameType::Join,
            Frame::SendDirectMessage { .. } => FrameType::SendDirectMessage,
            Frame::SendBroadcast { .. } => FrameType::SendBroadcast,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Joined { .. } => FrameType::Joined,
            Frame::ReceiveMessage { .. } => FrameType::ReceiveMessage,
            Frame::NewNotification { .. } => FrameType::NewNotification,
            Frame::DriversUpdate { .. } => FrameType::DriversUpdate,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Whether clients are allowed to send this frame.
    #[must_use]
    pub fn is_client_frame(&self) -> bool {
        matches!(
            self,
            Frame::Join { .. }
                | Frame::SendDirectMessage { .. }
                | Frame::SendBroadcast { .. }
                | Frame::Ping { .. }
        )
    }

    /// Create a new Join frame.
    #[must_use]
    pub fn join(
        user_id: impl Into<String>,
        user_type: UserType,
        display_name: impl Into<String>,
    ) -> Self {
        Frame::Join {
            user_id: user_id.into(),
            user_type,
            display_name: display_name.into(),
        }
    }

    /// Create a new SendDirectMessage frame.
    #[must_use]
    pub fn direct(id: u64, to_user_id: impl Into<String>, body: impl Into<String>) -> Self {
        Frame::SendDirectMessage {
            id,
            to_user_id: to_user_id.into(),
            body: body.into(),
        }
    }

    /// Create a new SendBroadcast frame.
    #[must_use]
    pub fn broadcast(id: u64, to_user_type: UserType, body: impl Into<String>) -> Self {
        Frame::SendBroadcast {
            id,
            to_user_type,
            body: body.into(),
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            heartbeat,
        }
    }

    /// Create a new Joined frame.
    #[must_use]
    pub fn joined(connection_id: impl Into<String>) -> Self {
        Frame::Joined {
            connection_id: connection_id.into(),
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64, delivered: u32) -> Self {
        Frame::Ack { id, delivered }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
