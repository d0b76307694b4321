//! In-memory event service for tests and demos.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use usher_common::{Error, EventId, Result, UserId};

use crate::service::EventService;
use crate::types::{
    AttendanceRecord, Event, EventRegistration, LogEntry, Page, Role, SubscribedEvent, User,
};

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
    users: Vec<User>,
    subscriptions: Vec<(UserId, EventId, chrono::DateTime<Utc>)>,
    attendances: Vec<AttendanceRecord>,
    logs: Vec<LogEntry>,
    current_user: Option<UserId>,
    offline: bool,
    latency: Duration,
    next_log_id: i64,
    mutation_calls: u32,
}

/// [`EventService`] held entirely in memory.
///
/// Behaves like the real backend down to its rejection messages, so
/// duplicate detection and replay logic can be exercised without a server.
/// Can be flipped "offline" (every call fails with a transport error) and
/// given artificial latency.
#[derive(Clone, Default)]
pub struct MemoryEventService {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryEventService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an upcoming, active event with the given id and title.
    pub fn seed_event(&self, id: i64, title: &str) -> Event {
        let event = Event {
            id: EventId::new(id),
            title: title.to_string(),
            description: None,
            category: None,
            location: None,
            starts_at: Utc::now() + ChronoDuration::days(7),
            ends_at: None,
            capacity: None,
            active: true,
        };
        self.push_event(event.clone());
        event
    }

    /// Add an event exactly as given.
    pub fn push_event(&self, event: Event) {
        self.inner.write().unwrap().events.push(event);
    }

    /// Add a user account.
    pub fn seed_user(&self, id: i64, name: &str, email: &str, role: Role) -> User {
        let now = Utc::now();
        let user = User {
            id: UserId::new(id),
            name: name.to_string(),
            email: email.to_string(),
            role,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.inner.write().unwrap().users.push(user.clone());
        user
    }

    /// Add an audit log entry for whoever is logged in.
    pub fn seed_log(&self, action: &str) -> LogEntry {
        let mut inner = self.inner.write().unwrap();
        inner.next_log_id += 1;
        let entry = LogEntry {
            id: inner.next_log_id,
            action: action.to_string(),
            detail: None,
            created_at: Utc::now(),
        };
        inner.logs.push(entry.clone());
        entry
    }

    /// Authenticate as a seeded user.
    pub fn login_as(&self, user_id: UserId) {
        self.inner.write().unwrap().current_user = Some(user_id);
    }

    /// Make every call fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.inner.write().unwrap().offline = offline;
    }

    /// Delay every call by `latency` before it runs.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.write().unwrap().latency = latency;
    }

    /// How many mutating calls reached the service, duplicates included.
    pub fn mutation_calls(&self) -> u32 {
        self.inner.read().unwrap().mutation_calls
    }

    /// How many subscriptions exist across all users.
    pub fn subscription_count(&self) -> usize {
        self.inner.read().unwrap().subscriptions.len()
    }

    /// Latency and offline flags live behind the lock, but the sleep must
    /// not.
    async fn simulate_io(&self) -> Result<()> {
        let (latency, offline) = {
            let inner = self.inner.read().unwrap();
            (inner.latency, inner.offline)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if offline {
            return Err(Error::Transport("simulated offline".to_string()));
        }
        Ok(())
    }
}

fn require_login(inner: &Inner) -> Result<UserId> {
    inner.current_user.ok_or_else(|| Error::Remote {
        status: 401,
        message: "authentication required".to_string(),
    })
}

fn require_admin(inner: &Inner) -> Result<UserId> {
    let id = require_login(inner)?;
    match inner.users.iter().find(|u| u.id == id) {
        Some(user) if user.role == Role::Admin => Ok(id),
        _ => Err(Error::Remote {
            status: 403,
            message: "admin privileges required".to_string(),
        }),
    }
}

fn find_event(inner: &Inner, id: EventId) -> Result<Event> {
    inner
        .events
        .iter()
        .find(|e| e.id == id)
        .cloned()
        .ok_or_else(|| Error::Remote {
            status: 404,
            message: "event not found".to_string(),
        })
}

#[async_trait]
impl EventService for MemoryEventService {
    async fn list_events(&self) -> Result<Vec<Event>> {
        self.simulate_io().await?;
        Ok(self.inner.read().unwrap().events.clone())
    }

    async fn get_event(&self, id: EventId) -> Result<Event> {
        self.simulate_io().await?;
        let inner = self.inner.read().unwrap();
        find_event(&inner, id)
    }

    async fn upcoming_events(&self) -> Result<Vec<Event>> {
        self.simulate_io().await?;
        let now = Utc::now();
        let inner = self.inner.read().unwrap();
        Ok(inner
            .events
            .iter()
            .filter(|e| e.active && e.starts_at > now)
            .cloned()
            .collect())
    }

    async fn events_by_category(&self, category: &str) -> Result<Vec<Event>> {
        self.simulate_io().await?;
        let inner = self.inner.read().unwrap();
        Ok(inner
            .events
            .iter()
            .filter(|e| e.category.as_deref() == Some(category))
            .cloned()
            .collect())
    }

    async fn my_subscriptions(&self) -> Result<Vec<SubscribedEvent>> {
        self.simulate_io().await?;
        let inner = self.inner.read().unwrap();
        let user = require_login(&inner)?;
        let mut subscribed = Vec::new();
        for (uid, eid, at) in &inner.subscriptions {
            if *uid == user {
                subscribed.push(SubscribedEvent {
                    event: find_event(&inner, *eid)?,
                    subscribed_at: *at,
                });
            }
        }
        Ok(subscribed)
    }

    async fn my_attendances(&self) -> Result<Vec<AttendanceRecord>> {
        self.simulate_io().await?;
        let inner = self.inner.read().unwrap();
        let user = require_login(&inner)?;
        Ok(inner
            .attendances
            .iter()
            .filter(|a| a.user_id == user)
            .cloned()
            .collect())
    }

    async fn current_user(&self) -> Result<User> {
        self.simulate_io().await?;
        let inner = self.inner.read().unwrap();
        let id = require_login(&inner)?;
        inner
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| Error::Remote {
                status: 401,
                message: "authentication required".to_string(),
            })
    }

    async fn my_logs(&self, page: u32, size: u32) -> Result<Page<LogEntry>> {
        self.simulate_io().await?;
        if size == 0 {
            return Err(Error::Remote {
                status: 400,
                message: "page size must be positive".to_string(),
            });
        }
        let inner = self.inner.read().unwrap();
        require_login(&inner)?;
        let total = inner.logs.len();
        let start = (page as usize) * (size as usize);
        let end = (start + size as usize).min(total);
        let content = if start < total {
            inner.logs[start..end].to_vec()
        } else {
            Vec::new()
        };
        Ok(Page {
            content,
            total_elements: total as u64,
            total_pages: total.div_ceil(size as usize) as u32,
            size,
            number: page,
        })
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        self.simulate_io().await?;
        let inner = self.inner.read().unwrap();
        require_admin(&inner)?;
        Ok(inner.users.clone())
    }

    async fn event_registrations(&self, event_id: EventId) -> Result<Vec<EventRegistration>> {
        self.simulate_io().await?;
        let inner = self.inner.read().unwrap();
        require_admin(&inner)?;
        find_event(&inner, event_id)?;
        let mut rows = Vec::new();
        for (uid, eid, at) in &inner.subscriptions {
            if *eid != event_id {
                continue;
            }
            if let Some(user) = inner.users.iter().find(|u| u.id == *uid) {
                let present = inner
                    .attendances
                    .iter()
                    .any(|a| a.user_id == *uid && a.event_id == event_id && a.present);
                rows.push(EventRegistration {
                    user_id: *uid,
                    name: user.name.clone(),
                    email: user.email.clone(),
                    subscribed_at: *at,
                    present,
                });
            }
        }
        Ok(rows)
    }

    async fn subscribe(&self, event_id: EventId) -> Result<Event> {
        self.simulate_io().await?;
        let mut inner = self.inner.write().unwrap();
        inner.mutation_calls += 1;
        let user = require_login(&inner)?;
        let event = find_event(&inner, event_id)?;
        if inner
            .subscriptions
            .iter()
            .any(|(uid, eid, _)| *uid == user && *eid == event_id)
        {
            return Err(Error::Remote {
                status: 400,
                message: "user already subscribed to this event".to_string(),
            });
        }
        inner.subscriptions.push((user, event_id, Utc::now()));
        Ok(event)
    }

    async fn cancel_subscription(&self, event_id: EventId) -> Result<()> {
        self.simulate_io().await?;
        let mut inner = self.inner.write().unwrap();
        inner.mutation_calls += 1;
        let user = require_login(&inner)?;
        let before = inner.subscriptions.len();
        inner
            .subscriptions
            .retain(|(uid, eid, _)| !(*uid == user && *eid == event_id));
        if inner.subscriptions.len() == before {
            return Err(Error::Remote {
                status: 404,
                message: "subscription not found".to_string(),
            });
        }
        Ok(())
    }

    async fn quick_register(&self, name: &str, email: &str, event_id: EventId) -> Result<User> {
        self.simulate_io().await?;
        let mut inner = self.inner.write().unwrap();
        inner.mutation_calls += 1;
        require_admin(&inner)?;
        find_event(&inner, event_id)?;
        if inner.users.iter().any(|u| u.email == email) {
            return Err(Error::Remote {
                status: 400,
                message: "email already registered".to_string(),
            });
        }
        let next_id = inner
            .users
            .iter()
            .map(|u| u.id.as_i64())
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now();
        let user = User {
            id: UserId::new(next_id),
            name: name.to_string(),
            email: email.to_string(),
            role: Role::User,
            active: true,
            created_at: now,
            updated_at: now,
        };
        inner.users.push(user.clone());
        inner.subscriptions.push((user.id, event_id, now));
        inner.attendances.push(AttendanceRecord {
            user_id: user.id,
            event_id,
            present: true,
            confirmed_at: Some(now),
        });
        Ok(user)
    }

    async fn mark_attendance(
        &self,
        user_id: UserId,
        event_id: EventId,
        present: bool,
    ) -> Result<AttendanceRecord> {
        self.simulate_io().await?;
        let mut inner = self.inner.write().unwrap();
        inner.mutation_calls += 1;
        require_admin(&inner)?;
        find_event(&inner, event_id)?;
        if !inner.users.iter().any(|u| u.id == user_id) {
            return Err(Error::Remote {
                status: 404,
                message: "user not found".to_string(),
            });
        }
        if inner
            .attendances
            .iter()
            .any(|a| a.user_id == user_id && a.event_id == event_id)
        {
            return Err(Error::Remote {
                status: 400,
                message: "attendance already recorded".to_string(),
            });
        }
        let record = AttendanceRecord {
            user_id,
            event_id,
            present,
            confirmed_at: Some(Utc::now()),
        };
        inner.attendances.push(record.clone());
        Ok(record)
    }
}
