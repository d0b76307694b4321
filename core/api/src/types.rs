//! Wire types for the event registration backend.
//!
//! The backend speaks camelCase JSON; everything here round-trips through
//! the cache registry as well, so each type derives both halves of serde.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use usher_common::{EventId, UserId};

/// A registrable event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub capacity: Option<u32>,
    pub active: bool,
}

/// Access level attached to a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    User,
}

/// A user account as the backend reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An event the current user is subscribed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedEvent {
    #[serde(flatten)]
    pub event: Event,
    pub subscribed_at: DateTime<Utc>,
}

/// Attendance for one user at one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub user_id: UserId,
    pub event_id: EventId,
    pub present: bool,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// One row of an event's registration list, as admins see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRegistration {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub subscribed_at: DateTime<Utc>,
    pub present: bool,
}

/// An audit log entry for the current user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: i64,
    pub action: String,
    #[serde(default)]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A page of results in the backend's paging envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub total_elements: u64,
    pub total_pages: u32,
    pub size: u32,
    pub number: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_deserializes_backend_json() {
        let raw = r#"{
            "id": 42,
            "title": "Rust meetup",
            "category": "tech",
            "startsAt": "2026-03-01T18:00:00Z",
            "active": true
        }"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event.id, EventId::new(42));
        assert_eq!(event.title, "Rust meetup");
        assert_eq!(event.category.as_deref(), Some("tech"));
        assert!(event.description.is_none());
        assert!(event.ends_at.is_none());
    }

    #[test]
    fn test_subscribed_event_flattens_event_fields() {
        let raw = r#"{
            "id": 7,
            "title": "Workshop",
            "startsAt": "2026-04-01T09:00:00Z",
            "active": true,
            "subscribedAt": "2026-03-20T10:30:00Z"
        }"#;
        let sub: SubscribedEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(sub.event.id, EventId::new(7));

        let back = serde_json::to_value(&sub).unwrap();
        assert_eq!(back["title"], "Workshop");
        assert_eq!(back["subscribedAt"], "2026-03-20T10:30:00Z");
    }

    #[test]
    fn test_page_envelope() {
        let raw = r#"{
            "content": [{"id": 1, "action": "LOGIN", "createdAt": "2026-01-01T00:00:00Z"}],
            "totalElements": 31,
            "totalPages": 4,
            "size": 10,
            "number": 0
        }"#;
        let page: Page<LogEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.total_elements, 31);
        assert_eq!(page.content[0].action, "LOGIN");
    }

    #[test]
    fn test_role_wire_format() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"ADMIN\"");
        let role: Role = serde_json::from_str("\"USER\"").unwrap();
        assert_eq!(role, Role::User);
    }
}
