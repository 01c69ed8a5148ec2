//! Audience resolution.
//!
//! Turns a delivery intent into the set of live connections that should
//! receive it. Audiences are point-in-time snapshots and are recomputed on
//! every delivery.

use crate::message::Push;
use crate::presence::{Connection, PresenceRegistry};
use convoy_protocol::{RecipientType, UserType};
use std::sync::Arc;
use tracing::trace;

/// Who a delivery is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    /// One user's connections, limited to user types the group admits.
    User {
        user_id: String,
        within: RecipientType,
    },
    /// Every connection of one user type.
    Type(UserType),
    /// Every connection.
    Everyone,
}

impl Recipients {
    /// Addressing of a notification with the given recipient fields.
    #[must_use]
    pub fn for_notification(recipient_type: RecipientType, recipient_id: Option<&str>) -> Self {
        match (recipient_id, recipient_type) {
            (Some(user_id), within) => Recipients::User {
                user_id: user_id.to_string(),
                within,
            },
            (None, RecipientType::All) => Recipients::Everyone,
            (None, RecipientType::Driver) => Recipients::Type(UserType::Driver),
            (None, RecipientType::Passenger) => Recipients::Type(UserType::Passenger),
        }
    }

    /// One user regardless of user type.
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Recipients::User {
            user_id: user_id.into(),
            within: RecipientType::All,
        }
    }
}

/// A resolved set of connections. Each connection appears once.
#[derive(Debug, Clone, Default)]
pub struct Audience {
    connections: Vec<Connection>,
}

impl Audience {
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Connection IDs in the audience.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.id.as_str()).collect()
    }

    /// Push one payload to every member, once each.
    ///
    /// Members that disconnected since resolution are skipped without
    /// affecting the others. Returns the number of successful pushes.
    pub fn push(&self, payload: Arc<Push>) -> usize {
        let delivered = self
            .connections
            .iter()
            .filter(|conn| conn.push(Arc::clone(&payload)))
            .count();
        trace!(
            kind = payload.kind(),
            audience = self.connections.len(),
            delivered,
            "Pushed to audience"
        );
        delivered
    }
}

/// Resolves recipients against the presence registry.
#[derive(Clone)]
pub struct AudienceResolver {
    registry: Arc<PresenceRegistry>,
}

impl AudienceResolver {
    #[must_use]
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this resolver reads from.
    #[must_use]
    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    /// Resolve recipients to live connections.
    ///
    /// An offline user yields an empty audience, never an error.
    #[must_use]
    pub fn resolve(&self, recipients: &Recipients) -> Audience {
        let connections = match recipients {
            Recipients::User { user_id, within } => self
                .registry
                .connections_for_user(user_id)
                .into_iter()
                .filter(|conn| within.admits(conn.user_type))
                .collect(),
            Recipients::Type(user_type) => self.registry.connections_for_type(*user_type),
            Recipients::Everyone => self.registry.all_connections(),
        };
        Audience { connections }
    }

    /// Resolve a notification's recipient fields.
    #[must_use]
    pub fn resolve_for(&self, recipient_type: RecipientType, recipient_id: Option<&str>) -> Audience {
        self.resolve(&Recipients::for_notification(recipient_type, recipient_id))
    }
}
