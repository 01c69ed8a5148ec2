//! # convoy-core
//!
//! Presence-aware notification and messaging core for Convoy.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Presence** - Which users are connected, and as which audience
//! - **Audience** - Resolve a delivery intent to live connections
//! - **Store** - Durable notifications with per-user read state and expiry
//! - **Router** - Persist, resolve, and push, at most once per connection
//! - **Chat** - Direct and broadcast chat on top of the router
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Chat     │────▶│   Router    │────▶│    Store    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │  Audience   │────▶│  Presence   │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod audience;
pub mod chat;
pub mod events;
pub mod message;
pub mod notification;
pub mod presence;
pub mod router;
pub mod store;

pub use audience::{Audience, AudienceResolver, Recipients};
pub use chat::{ChatReceipt, ChatSession, SessionState};
pub use events::SystemEvent;
pub use message::{outbox, Addressing, ChatMessage, Inbox, Outbox, Push};
pub use notification::{NewNotification, Notification, NotificationId, Viewer};
pub use presence::{Connection, ConnectionId, PresenceRegistry, PresenceStats};
pub use router::{DeliveryError, DeliveryReport, DeliveryRouter, Intent};
pub use store::{
    MemoryBackend, NotificationBackend, NotificationPage, NotificationStore, Page, ReadOutcome,
    StoreConfig, StoreError,
};
