//! Shared vocabulary for Convoy frames.
//!
//! These types appear on the wire and in the persisted notification layout,
//! so their serialized names are part of the protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The audience a connected user belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Driver,
    Passenger,
    Admin,
}

impl UserType {
    /// All user types, in a stable order.
    pub const ALL: [UserType; 3] = [UserType::Driver, UserType::Passenger, UserType::Admin];

    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Driver => "driver",
            UserType::Passenger => "passenger",
            UserType::Admin => "admin",
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserType {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "driver" => Ok(UserType::Driver),
            "passenger" => Ok(UserType::Passenger),
            "admin" => Ok(UserType::Admin),
            _ => Err("Invalid user type"),
        }
    }
}

/// Who a notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    Driver,
    Passenger,
    All,
}

impl RecipientType {
    /// Whether a user of `user_type` falls inside this recipient group.
    #[must_use]
    pub fn admits(&self, user_type: UserType) -> bool {
        match self {
            RecipientType::All => true,
            RecipientType::Driver => user_type == UserType::Driver,
            RecipientType::Passenger => user_type == UserType::Passenger,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientType::Driver => "driver",
            RecipientType::Passenger => "passenger",
            RecipientType::All => "all",
        }
    }
}

impl fmt::Display for RecipientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display category of a notification. Has no routing effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Info,
    Warning,
    Success,
    Error,
    Announcement,
}

/// Display priority of a notification. Has no routing effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// A single `(userId, readAt)` entry of a notification's read log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

/// A notification as stored and as pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: String,
    pub recipient_type: RecipientType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// One entry of the `drivers_update` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineDriver {
    pub user_id: String,
    pub display_name: String,
    /// Number of live connections the driver currently holds.
    pub connections: u32,
}

/// Identity of a chat message author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    pub user_id: String,
    pub user_type: UserType,
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_type_admits() {
        assert!(RecipientType::All.admits(UserType::Admin));
        assert!(RecipientType::Driver.admits(UserType::Driver));
        assert!(!RecipientType::Driver.admits(UserType::Passenger));
        assert!(!RecipientType::Passenger.admits(UserType::Admin));
    }

    #[test]
    fn test_user_type_parse() {
        assert_eq!("driver".parse::<UserType>(), Ok(UserType::Driver));
        assert_eq!(UserType::Passenger.to_string(), "passenger");
        assert!("bus".parse::<UserType>().is_err());
    }

    #[test]
    fn test_payload_layout_uses_camel_case() {
        let payload = NotificationPayload {
            id: "n-1".into(),
            recipient_type: RecipientType::Passenger,
            recipient_id: Some("p-42".into()),
            title: "Booking Confirmed".into(),
            message: "Seat 4A".into(),
            category: Category::Success,
            priority: Priority::High,
            read_by: vec![],
            created_at: Utc::now(),
            expires_at: None,
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["recipientType"], "passenger");
        assert_eq!(value["recipientId"], "p-42");
        assert_eq!(value["priority"], "high");
        assert!(value["readBy"].as_array().unwrap().is_empty());
        assert!(value.get("expiresAt").is_none());
    }

    #[test]
    fn test_defaults_when_fields_missing() {
        let value = serde_json::json!({
            "id": "n-2",
            "recipientType": "all",
            "title": "Hello",
            "message": "World",
            "createdAt": "2026-01-01T00:00:00Z"
        });

        let payload: NotificationPayload = serde_json::from_value(value).unwrap();
        assert_eq!(payload.category, Category::Info);
        assert_eq!(payload.priority, Priority::Medium);
        assert!(payload.recipient_id.is_none());
    }
}
