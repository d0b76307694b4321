//! Locally synthesized results for queued mutations.
//!
//! When a mutation is parked in the queue the caller still gets a response
//! shaped like the backend's, so screens can render immediately. Synthesized
//! users carry negative ids; the real ids arrive with the next refresh after
//! replay.

use chrono::{DateTime, Utc};
use serde_json::Value;

use usher_api::types::{AttendanceRecord, Event, Role, User};
use usher_common::{EventId, UserId};

use crate::queue::MutationRequest;

/// Stand-in user for a quick-register that has not reached the backend.
pub fn placeholder_user(name: &str, email: &str, now: DateTime<Utc>) -> User {
    User {
        id: UserId::new(-now.timestamp_millis()),
        name: name.to_string(),
        email: email.to_string(),
        role: Role::User,
        active: true,
        created_at: now,
        updated_at: now,
    }
}

/// Stand-in event for a subscription that has not reached the backend.
/// Callers that hold a cached copy of the real event should prefer it.
pub fn placeholder_event(event_id: EventId, now: DateTime<Utc>) -> Event {
    Event {
        id: event_id,
        title: String::new(),
        description: None,
        category: None,
        location: None,
        starts_at: now,
        ends_at: None,
        capacity: None,
        active: true,
    }
}

/// Stand-in attendance record. `confirmed_at` stays empty until the backend
/// confirms.
pub fn placeholder_attendance(
    user_id: UserId,
    event_id: EventId,
    present: bool,
) -> AttendanceRecord {
    AttendanceRecord {
        user_id,
        event_id,
        present,
        confirmed_at: None,
    }
}

/// The response the caller would have received had the mutation landed.
pub fn synthesize_result(request: &MutationRequest, now: DateTime<Utc>) -> Value {
    let result = match request {
        MutationRequest::Subscribe { event_id } => {
            serde_json::to_value(placeholder_event(*event_id, now))
        }
        MutationRequest::QuickRegister { name, email, .. } => {
            serde_json::to_value(placeholder_user(name, email, now))
        }
        MutationRequest::MarkAttendance {
            user_id,
            event_id,
            present,
        } => serde_json::to_value(placeholder_attendance(*user_id, *event_id, *present)),
    };
    result.unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_user_id_is_provisional() {
        let user = placeholder_user("Ana", "ana@example.com", Utc::now());
        assert!(user.id.is_placeholder());
        assert_eq!(user.role, Role::User);
    }

    #[test]
    fn test_synthesized_subscribe_keeps_the_real_event_id() {
        let request = MutationRequest::Subscribe {
            event_id: EventId::new(42),
        };
        let value = synthesize_result(&request, Utc::now());
        assert_eq!(value["id"], 42);
        assert_eq!(value["active"], true);
    }

    #[test]
    fn test_synthesized_attendance_is_unconfirmed() {
        let request = MutationRequest::MarkAttendance {
            user_id: UserId::new(3),
            event_id: EventId::new(9),
            present: true,
        };
        let value = synthesize_result(&request, Utc::now());
        assert_eq!(value["present"], true);
        assert_eq!(value["confirmedAt"], Value::Null);
    }
}
