//! Delivery routing for Convoy.
//!
//! The router persists durable intents, resolves the audience, and pushes the
//! payload to each resolved connection at most once. Pushes are best-effort:
//! a recipient that disconnected mid fan-out is skipped silently, since the
//! durable copy stays available through the query path.

use crate::audience::{AudienceResolver, Recipients};
use crate::events::SystemEvent;
use crate::message::{Addressing, ChatMessage, Push};
use crate::notification::{NewNotification, Notification, NotificationId};
use crate::presence::PresenceRegistry;
use crate::store::{NotificationStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Delivery errors.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The intent is malformed.
    #[error("Invalid message: {0}")]
    Validation(String),

    /// Persisting the notification failed; nothing was pushed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Something to deliver.
#[derive(Debug, Clone)]
pub enum Intent {
    /// An admin-authored notification. Durable.
    Notify(NewNotification),
    /// A backend business event. Durable.
    Event(SystemEvent),
    /// A chat message. Ephemeral.
    Chat(ChatMessage),
}

impl Intent {
    /// Whether the intent is persisted before fan-out.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        !matches!(self, Intent::Chat(_))
    }
}

/// Outcome of a delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// The stored notification, for durable intents.
    pub persisted: Option<Notification>,
    /// Connections the audience resolved to.
    pub audience: usize,
    /// Number of connections the payload was pushed to.
    pub pushed: usize,
}

impl DeliveryReport {
    #[must_use]
    pub fn persisted_id(&self) -> Option<NotificationId> {
        self.persisted.as_ref().map(|n| n.id)
    }

    /// Resolved connections that had gone away before the push landed.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.audience.saturating_sub(self.pushed)
    }
}

/// The delivery router.
#[derive(Clone)]
pub struct DeliveryRouter {
    store: Arc<NotificationStore>,
    resolver: AudienceResolver,
}

impl DeliveryRouter {
    /// Create a router over a store and a presence registry.
    #[must_use]
    pub fn new(store: Arc<NotificationStore>, registry: Arc<PresenceRegistry>) -> Self {
        Self {
            store,
            resolver: AudienceResolver::new(registry),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        self.resolver.registry()
    }

    /// Deliver an intent.
    ///
    /// # Errors
    ///
    /// Returns an error if the intent is invalid or cannot be persisted. Push
    /// failures to individual recipients are never errors.
    pub async fn deliver(&self, intent: Intent) -> Result<DeliveryReport, DeliveryError> {
        match intent {
            Intent::Notify(draft) => self.deliver_notification(draft).await,
            Intent::Event(event) => {
                debug!(event = event.kind(), "Delivering system event");
                self.deliver_notification(event.to_notification()).await
            }
            Intent::Chat(message) => self.deliver_chat(message),
        }
    }

    async fn deliver_notification(
        &self,
        draft: NewNotification,
    ) -> Result<DeliveryReport, DeliveryError> {
        let notification = self.store.create(draft).await.map_err(|e| {
            warn!(error = %e, "Notification not delivered");
            e
        })?;

        let audience = self.resolver.resolve_for(
            notification.recipient_type,
            notification.recipient_id.as_deref(),
        );
        let pushed = audience.push(Arc::new(Push::Notification(notification.to_payload())));

        debug!(
            id = %notification.id,
            audience = audience.len(),
            recipients = pushed,
            "Notification delivered"
        );
        Ok(DeliveryReport {
            audience: audience.len(),
            persisted: Some(notification),
            pushed,
        })
    }

    fn deliver_chat(&self, message: ChatMessage) -> Result<DeliveryReport, DeliveryError> {
        if message.body.trim().is_empty() {
            return Err(DeliveryError::Validation("body is required".to_string()));
        }
        let recipients = match &message.addressing {
            Addressing::Direct(user_id) if user_id.trim().is_empty() => {
                return Err(DeliveryError::Validation("toUserId is required".to_string()));
            }
            Addressing::Direct(user_id) => Recipients::user(user_id.clone()),
            Addressing::Broadcast(user_type) => Recipients::Type(*user_type),
        };

        let audience = self.resolver.resolve(&recipients);
        let sender = message.sender.user_id.clone();
        let pushed = audience.push(Arc::new(Push::Message(message)));

        debug!(
            sender = %sender,
            recipients = ?recipients,
            delivered = pushed,
            "Chat message routed"
        );
        Ok(DeliveryReport {
            audience: audience.len(),
            persisted: None,
            pushed,
        })
    }
}
