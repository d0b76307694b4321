//! HTTP implementation of the event service.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

use usher_common::{Error, EventId, Result, UserId};

use crate::service::{EventService, TokenProvider};
use crate::types::{
    AttendanceRecord, Event, EventRegistration, LogEntry, Page, SubscribedEvent, User,
};

/// User agent presented to the backend.
const USER_AGENT: &str = "Usher/0.1";

/// Error payload shape the backend uses for rejections.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// [`EventService`] backed by the real registration API.
///
/// Requests that never produce a response map to [`Error::Transport`];
/// anything the backend answered, success or rejection, does not.
pub struct HttpEventService {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpEventService {
    /// Create a client for the API rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.tokens.access_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn dispatch(&self, path: &str, request: RequestBuilder) -> Result<Response> {
        self.authorize(request)
            .await
            .send()
            .await
            .map_err(|e| Error::Transport(format!("request to {} failed: {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.http.get(self.url(path));
        let response = self.dispatch(path, request).await?;
        handle_response(response).await
    }

    async fn get_json_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let request = self.http.get(self.url(path)).query(query);
        let response = self.dispatch(path, request).await?;
        handle_response(response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let mut request = self.http.post(self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = self.dispatch(path, request).await?;
        handle_response(response).await
    }

    async fn delete_empty(&self, path: &str) -> Result<()> {
        let request = self.http.delete(self.url(path));
        let response = self.dispatch(path, request).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(remote_error(response).await)
        }
    }
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    if response.status().is_success() {
        // A malformed body on a successful response is a decoding problem,
        // not a transport failure.
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("invalid response body: {}", e)))
    } else {
        Err(remote_error(response).await)
    }
}

/// Build an [`Error::Remote`] out of a rejection, preferring the backend's
/// own `message` field when the body carries one.
async fn remote_error(response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.message,
        Err(_) if body.is_empty() => format!("HTTP {}", status),
        Err(_) => body,
    };
    Error::Remote { status, message }
}

#[async_trait]
impl EventService for HttpEventService {
    async fn list_events(&self) -> Result<Vec<Event>> {
        self.get_json("/api/events").await
    }

    async fn get_event(&self, id: EventId) -> Result<Event> {
        self.get_json(&format!("/api/events/{}", id)).await
    }

    async fn upcoming_events(&self) -> Result<Vec<Event>> {
        self.get_json("/api/events/upcoming").await
    }

    async fn events_by_category(&self, category: &str) -> Result<Vec<Event>> {
        self.get_json(&format!("/api/events/category/{}", category))
            .await
    }

    async fn my_subscriptions(&self) -> Result<Vec<SubscribedEvent>> {
        self.get_json("/api/events/subscriptions").await
    }

    async fn my_attendances(&self) -> Result<Vec<AttendanceRecord>> {
        self.get_json("/api/events/attendances").await
    }

    async fn current_user(&self) -> Result<User> {
        self.get_json("/api/auth/me").await
    }

    async fn my_logs(&self, page: u32, size: u32) -> Result<Page<LogEntry>> {
        self.get_json_query(
            "/api/logs/mine",
            &[("page", page.to_string()), ("size", size.to_string())],
        )
        .await
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        self.get_json("/api/admin/users").await
    }

    async fn event_registrations(&self, event_id: EventId) -> Result<Vec<EventRegistration>> {
        self.get_json(&format!("/api/admin/events/{}/registrations", event_id))
            .await
    }

    async fn subscribe(&self, event_id: EventId) -> Result<Event> {
        self.post_json(&format!("/api/events/{}/subscription", event_id), None)
            .await
    }

    async fn cancel_subscription(&self, event_id: EventId) -> Result<()> {
        self.delete_empty(&format!("/api/events/{}/subscription", event_id))
            .await
    }

    async fn quick_register(&self, name: &str, email: &str, event_id: EventId) -> Result<User> {
        let body = serde_json::json!({
            "name": name,
            "email": email,
            "eventId": event_id,
        });
        self.post_json("/api/admin/quick-register", Some(body)).await
    }

    async fn mark_attendance(
        &self,
        user_id: UserId,
        event_id: EventId,
        present: bool,
    ) -> Result<AttendanceRecord> {
        let body = serde_json::json!({
            "userId": user_id,
            "eventId": event_id,
            "present": present,
        });
        self.post_json("/api/admin/attendance", Some(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::StaticToken;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let service =
            HttpEventService::new("http://localhost:8080/", Arc::new(StaticToken::anonymous()));
        assert_eq!(
            service.url("/api/events"),
            "http://localhost:8080/api/events"
        );
    }
}
