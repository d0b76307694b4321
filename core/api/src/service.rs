//! The service seam the sync layer is written against.

use async_trait::async_trait;
use usher_common::{EventId, Result, UserId};

use crate::types::{
    AttendanceRecord, Event, EventRegistration, LogEntry, Page, SubscribedEvent, User,
};

/// Everything the client can ask of the registration backend.
///
/// [`HttpEventService`](crate::http::HttpEventService) is the production
/// implementation; tests use
/// [`MemoryEventService`](crate::memory::MemoryEventService). The sync layer
/// only ever sees this trait, so fetches and queued replays exercise the
/// same code path in both worlds.
#[async_trait]
pub trait EventService: Send + Sync {
    /// Every event, past and future.
    async fn list_events(&self) -> Result<Vec<Event>>;

    /// One event by id.
    async fn get_event(&self, id: EventId) -> Result<Event>;

    /// Events that have not started yet.
    async fn upcoming_events(&self) -> Result<Vec<Event>>;

    /// Events filtered by category.
    async fn events_by_category(&self, category: &str) -> Result<Vec<Event>>;

    /// Events the current user is subscribed to.
    async fn my_subscriptions(&self) -> Result<Vec<SubscribedEvent>>;

    /// The current user's attendance history.
    async fn my_attendances(&self) -> Result<Vec<AttendanceRecord>>;

    /// The authenticated account.
    async fn current_user(&self) -> Result<User>;

    /// A page of the current user's audit log.
    async fn my_logs(&self, page: u32, size: u32) -> Result<Page<LogEntry>>;

    /// All user accounts. Admin only.
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Who is registered for an event. Admin only.
    async fn event_registrations(&self, event_id: EventId) -> Result<Vec<EventRegistration>>;

    /// Subscribe the current user to an event.
    async fn subscribe(&self, event_id: EventId) -> Result<Event>;

    /// Drop the current user's subscription to an event.
    async fn cancel_subscription(&self, event_id: EventId) -> Result<()>;

    /// Create an account on the spot and register it for an event,
    /// marking it present. Admin only.
    async fn quick_register(&self, name: &str, email: &str, event_id: EventId) -> Result<User>;

    /// Record whether a user showed up. Admin only.
    async fn mark_attendance(
        &self,
        user_id: UserId,
        event_id: EventId,
        present: bool,
    ) -> Result<AttendanceRecord>;
}

/// Supplies the bearer token attached to backend requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The current access token, or `None` for anonymous requests.
    async fn access_token(&self) -> Option<String>;
}

/// A fixed token, handed over at construction.
pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// No token; requests go out unauthenticated.
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.token.clone()
    }
}
