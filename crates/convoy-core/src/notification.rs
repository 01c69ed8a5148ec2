//! Notification records and their visibility rules.

use chrono::{DateTime, Utc};
use convoy_protocol::{
    Category, NotificationPayload, Priority, ReadReceipt, RecipientType, UserType,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique notification identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(Uuid);

impl NotificationId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NotificationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The user a query is evaluated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: String,
    pub user_type: UserType,
}

impl Viewer {
    #[must_use]
    pub fn new(user_id: impl Into<String>, user_type: UserType) -> Self {
        Self {
            user_id: user_id.into(),
            user_type,
        }
    }
}

/// A notification draft, as submitted by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    #[serde(default)]
    pub recipient_type: Option<RecipientType>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewNotification {
    /// Create a draft addressed to a recipient group.
    #[must_use]
    pub fn new(
        recipient_type: RecipientType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_type: Some(recipient_type),
            recipient_id: None,
            title: title.into(),
            message: message.into(),
            category: Category::default(),
            priority: Priority::default(),
            expires_at: None,
        }
    }

    /// Restrict delivery to a single user.
    #[must_use]
    pub fn to_user(mut self, user_id: impl Into<String>) -> Self {
        self.recipient_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing field.
    pub fn validate(&self) -> Result<RecipientType, String> {
        let recipient_type = self
            .recipient_type
            .ok_or_else(|| "recipientType is required".to_string())?;
        if self.title.trim().is_empty() {
            return Err("title is required".to_string());
        }
        if self.message.trim().is_empty() {
            return Err("message is required".to_string());
        }
        Ok(recipient_type)
    }
}

/// A persisted notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_type: RecipientType,
    pub recipient_id: Option<String>,
    pub title: String,
    pub message: String,
    pub category: Category,
    pub priority: Priority,
    /// At most one read time per user.
    read_by: HashMap<String, DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Build a record from a validated draft.
    ///
    /// # Errors
    ///
    /// Returns the validation failure if the draft is incomplete.
    pub fn from_draft(draft: NewNotification, now: DateTime<Utc>) -> Result<Self, String> {
        let recipient_type = draft.validate()?;
        Ok(Self {
            id: NotificationId::generate(),
            recipient_type,
            recipient_id: draft.recipient_id.filter(|id| !id.trim().is_empty()),
            title: draft.title,
            message: draft.message,
            category: draft.category,
            priority: draft.priority,
            read_by: HashMap::new(),
            created_at: now,
            expires_at: draft.expires_at,
        })
    }

    /// Whether the notification is past its expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether `viewer` is a recipient.
    ///
    /// A notification with a recipient id belongs to that one user,
    /// whatever the user type. Otherwise the recipient type decides.
    #[must_use]
    pub fn is_addressed_to(&self, viewer: &Viewer) -> bool {
        match &self.recipient_id {
            Some(id) => *id == viewer.user_id,
            None => self.recipient_type.admits(viewer.user_type),
        }
    }

    /// Whether `viewer` should see this notification at `now`.
    #[must_use]
    pub fn is_visible_to(&self, viewer: &Viewer, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && self.is_addressed_to(viewer)
    }

    #[must_use]
    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.contains_key(user_id)
    }

    #[must_use]
    pub fn read_at(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.read_by.get(user_id).copied()
    }

    #[must_use]
    pub fn read_count(&self) -> usize {
        self.read_by.len()
    }

    /// Record that `user_id` read this notification.
    ///
    /// Returns `false` if the user had already read it; the original read
    /// time is kept.
    pub fn mark_read(&mut self, user_id: &str, at: DateTime<Utc>) -> bool {
        if self.read_by.contains_key(user_id) {
            return false;
        }
        self.read_by.insert(user_id.to_string(), at);
        true
    }

    /// Convert to the persisted/pushed layout.
    #[must_use]
    pub fn to_payload(&self) -> NotificationPayload {
        let mut read_by: Vec<ReadReceipt> = self
            .read_by
            .iter()
            .map(|(user_id, read_at)| ReadReceipt {
                user_id: user_id.clone(),
                read_at: *read_at,
            })
            .collect();
        read_by.sort_by(|a, b| {
            a.read_at
                .cmp(&b.read_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        NotificationPayload {
            id: self.id.to_string(),
            recipient_type: self.recipient_type,
            recipient_id: self.recipient_id.clone(),
            title: self.title.clone(),
            message: self.message.clone(),
            category: self.category,
            priority: self.priority,
            read_by,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

impl TryFrom<NotificationPayload> for Notification {
    type Error = String;

    /// Rebuild a record from its persisted layout. Duplicate read receipts
    /// for one user collapse to the earliest.
    fn try_from(payload: NotificationPayload) -> Result<Self, Self::Error> {
        let id = payload
            .id
            .parse()
            .map_err(|e| format!("invalid notification id {}: {}", payload.id, e))?;

        let mut read_by: HashMap<String, DateTime<Utc>> = HashMap::new();
        for receipt in payload.read_by {
            read_by
                .entry(receipt.user_id)
                .and_modify(|at| *at = (*at).min(receipt.read_at))
                .or_insert(receipt.read_at);
        }

        Ok(Self {
            id,
            recipient_type: payload.recipient_type,
            recipient_id: payload.recipient_id,
            title: payload.title,
            message: payload.message,
            category: payload.category,
            priority: payload.priority,
            read_by,
            created_at: payload.created_at,
            expires_at: payload.expires_at,
        })
    }
}
