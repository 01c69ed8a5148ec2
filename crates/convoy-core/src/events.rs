//! Backend business events that produce durable notifications.

use crate::notification::NewNotification;
use chrono::{DateTime, Utc};
use convoy_protocol::{Category, Priority, RecipientType};

/// A business event raised outside any client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    /// A passenger's booking was confirmed.
    BookingConfirmed {
        passenger_id: String,
        booking_ref: String,
        route_name: String,
    },
    /// A passenger's booking was cancelled.
    BookingCancelled {
        passenger_id: String,
        booking_ref: String,
        reason: Option<String>,
    },
    /// A route is running late. Everyone is told.
    RouteDelayed {
        route_name: String,
        delay_minutes: u32,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Traffic conditions drivers should know about.
    TrafficAlert {
        area: String,
        details: String,
        expires_at: Option<DateTime<Utc>>,
    },
}

impl SystemEvent {
    /// Short label used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SystemEvent::BookingConfirmed { .. } => "booking_confirmed",
            SystemEvent::BookingCancelled { .. } => "booking_cancelled",
            SystemEvent::RouteDelayed { .. } => "route_delayed",
            SystemEvent::TrafficAlert { .. } => "traffic_alert",
        }
    }

    /// The notification this event produces.
    #[must_use]
    pub fn to_notification(&self) -> NewNotification {
        match self {
            SystemEvent::BookingConfirmed {
                passenger_id,
                booking_ref,
                route_name,
            } => NewNotification::new(
                RecipientType::Passenger,
                "Booking Confirmed",
                format!("Your booking {} on {} is confirmed.", booking_ref, route_name),
            )
            .to_user(passenger_id.clone())
            .with_category(Category::Success)
            .with_priority(Priority::High),

            SystemEvent::BookingCancelled {
                passenger_id,
                booking_ref,
                reason,
            } => {
                let message = match reason {
                    Some(reason) => format!("Your booking {} was cancelled: {}", booking_ref, reason),
                    None => format!("Your booking {} was cancelled.", booking_ref),
                };
                NewNotification::new(RecipientType::Passenger, "Booking Cancelled", message)
                    .to_user(passenger_id.clone())
                    .with_category(Category::Warning)
                    .with_priority(Priority::High)
            }

            SystemEvent::RouteDelayed {
                route_name,
                delay_minutes,
                expires_at,
            } => with_expiry(
                NewNotification::new(
                    RecipientType::All,
                    "Route Delayed",
                    format!("{} is running {} minutes late.", route_name, delay_minutes),
                )
                .with_category(Category::Warning)
                .with_priority(Priority::Medium),
                *expires_at,
            ),

            SystemEvent::TrafficAlert {
                area,
                details,
                expires_at,
            } => with_expiry(
                NewNotification::new(
                    RecipientType::Driver,
                    format!("Traffic Alert: {}", area),
                    details.clone(),
                )
                .with_category(Category::Warning)
                .with_priority(Priority::High),
                *expires_at,
            ),
        }
    }
}

fn with_expiry(draft: NewNotification, expires_at: Option<DateTime<Utc>>) -> NewNotification {
    match expires_at {
        Some(at) => draft.expires_at(at),
        None => draft,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_events_target_the_passenger() {
        let event = SystemEvent::BookingConfirmed {
            passenger_id: "p-42".into(),
            booking_ref: "BK-1001".into(),
            route_name: "Route 12".into(),
        };
        let draft = event.to_notification();
        assert_eq!(draft.recipient_type, Some(RecipientType::Passenger));
        assert_eq!(draft.recipient_id.as_deref(), Some("p-42"));
        assert_eq!(draft.priority, Priority::High);
        assert!(draft.validate().is_ok());

        let cancelled = SystemEvent::BookingCancelled {
            passenger_id: "p-42".into(),
            booking_ref: "BK-1001".into(),
            reason: Some("bus out of service".into()),
        }
        .to_notification();
        assert!(cancelled.message.contains("bus out of service"));
        assert_eq!(cancelled.category, Category::Warning);
    }

    #[test]
    fn test_broadcast_events() {
        let delayed = SystemEvent::RouteDelayed {
            route_name: "Route 7".into(),
            delay_minutes: 15,
            expires_at: None,
        }
        .to_notification();
        assert_eq!(delayed.recipient_type, Some(RecipientType::All));
        assert!(delayed.recipient_id.is_none());

        let until = Utc::now();
        let traffic = SystemEvent::TrafficAlert {
            area: "Main St".into(),
            details: "Lane closed".into(),
            expires_at: Some(until),
        }
        .to_notification();
        assert_eq!(traffic.recipient_type, Some(RecipientType::Driver));
        assert_eq!(traffic.expires_at, Some(until));
    }
}
