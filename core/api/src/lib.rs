//! Event registration API surface.
//!
//! [`EventService`] is the seam between the sync layer and the backend.
//! [`HttpEventService`] implements it over the real REST API,
//! [`MemoryEventService`] implements it in memory for tests and demos.

pub mod http;
pub mod memory;
pub mod service;
pub mod types;

pub use http::HttpEventService;
pub use memory::MemoryEventService;
pub use service::{EventService, StaticToken, TokenProvider};
pub use types::{
    AttendanceRecord, Event, EventRegistration, LogEntry, Page, Role, SubscribedEvent, User,
};
