//! Messages pushed from the core to live connections.
//!
//! Every connection owns an unbounded FIFO outbox. Pushes are wrapped in
//! `Arc` so one fan-out shares a single payload across all recipients.

use chrono::{DateTime, Utc};
use convoy_protocol::{Frame, NotificationPayload, OnlineDriver, SenderInfo, UserType};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sending half of a connection's outbox.
pub type Outbox = mpsc::UnboundedSender<Arc<Push>>;

/// Receiving half of a connection's outbox, drained by the transport task.
pub type Inbox = mpsc::UnboundedReceiver<Arc<Push>>;

/// Create a new outbox pair for a connection.
#[must_use]
pub fn outbox() -> (Outbox, Inbox) {
    mpsc::unbounded_channel()
}

/// How a chat message is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// Every connection of one user.
    Direct(String),
    /// Every connection of one user type.
    Broadcast(UserType),
}

/// An ephemeral chat message. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub sender: SenderInfo,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub addressing: Addressing,
}

impl ChatMessage {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new(sender: SenderInfo, addressing: Addressing, body: impl Into<String>) -> Self {
        Self {
            sender,
            body: body.into(),
            timestamp: Utc::now(),
            addressing,
        }
    }

    /// Whether the message targets a whole user type.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        matches!(self.addressing, Addressing::Broadcast(_))
    }
}

/// A payload delivered to a single connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Push {
    /// `receive_message`
    Message(ChatMessage),
    /// `new_notification`
    Notification(NotificationPayload),
    /// `drivers_update`
    DriversUpdate(Vec<OnlineDriver>),
}

impl Push {
    /// Convert to the outbound wire frame.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        match self {
            Push::Message(msg) => Frame::ReceiveMessage {
                sender: msg.sender.clone(),
                body: msg.body.clone(),
                timestamp: msg.timestamp,
                broadcast: msg.is_broadcast(),
            },
            Push::Notification(notification) => Frame::NewNotification {
                notification: notification.clone(),
            },
            Push::DriversUpdate(drivers) => Frame::DriversUpdate {
                drivers: drivers.clone(),
            },
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Push::Message(_) => "receive_message",
            Push::Notification(_) => "new_notification",
            Push::DriversUpdate(_) => "drivers_update",
        }
    }
}
