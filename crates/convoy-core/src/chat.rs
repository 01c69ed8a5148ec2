//! Chat sessions.
//!
//! A session wraps the delivery router for one sender with the two chat
//! addressing modes. Messages are never persisted: a direct message to an
//! offline user is acknowledged as sent and is lost, since there is no
//! offline mailbox.

use crate::message::{Addressing, ChatMessage};
use crate::router::{DeliveryError, DeliveryRouter, Intent};
use convoy_protocol::{SenderInfo, UserType};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Delivery state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No delivery in flight.
    Idle,
    /// Audience resolution and push in progress.
    Delivering,
}

/// Result of a chat send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatReceipt {
    /// Connections the message was pushed to. Zero means it was dropped.
    pub delivered: usize,
    /// Recipients that disconnected between resolution and push.
    pub dropped: usize,
}

/// One in-flight send. Released however the delivery ends.
struct Delivering<'a>(&'a AtomicUsize);

impl<'a> Delivering<'a> {
    fn enter(in_flight: &'a AtomicUsize) -> Self {
        in_flight.fetch_add(1, Ordering::AcqRel);
        Self(in_flight)
    }
}

impl Drop for Delivering<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Chat for one sender.
pub struct ChatSession {
    router: DeliveryRouter,
    sender: SenderInfo,
    in_flight: AtomicUsize,
}

impl ChatSession {
    #[must_use]
    pub fn new(router: DeliveryRouter, sender: SenderInfo) -> Self {
        Self {
            router,
            sender,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// The identity messages are sent as.
    #[must_use]
    pub fn sender(&self) -> &SenderInfo {
        &self.sender
    }

    /// `Delivering` while any send on this session is in progress.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match self.in_flight.load(Ordering::Acquire) {
            0 => SessionState::Idle,
            _ => SessionState::Delivering,
        }
    }

    /// Send to every connection of one user.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Validation`] for an empty body or target.
    pub async fn send_direct(
        &self,
        to_user_id: &str,
        body: &str,
    ) -> Result<ChatReceipt, DeliveryError> {
        let receipt = self
            .send(Addressing::Direct(to_user_id.to_string()), body)
            .await?;
        if receipt.delivered == 0 {
            debug!(
                sender = %self.sender.user_id,
                recipient = %to_user_id,
                "Direct message dropped, recipient offline"
            );
        }
        Ok(receipt)
    }

    /// Send to every connection of one user type.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Validation`] for an empty body.
    pub async fn send_broadcast(
        &self,
        to_user_type: UserType,
        body: &str,
    ) -> Result<ChatReceipt, DeliveryError> {
        self.send(Addressing::Broadcast(to_user_type), body).await
    }

    async fn send(&self, addressing: Addressing, body: &str) -> Result<ChatReceipt, DeliveryError> {
        let _delivering = Delivering::enter(&self.in_flight);
        let message = ChatMessage::new(self.sender.clone(), addressing, body);
        let report = self.router.deliver(Intent::Chat(message)).await?;
        Ok(ChatReceipt {
            delivered: report.pushed,
            dropped: report.dropped(),
        })
    }
}
