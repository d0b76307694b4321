//! Offline-first façade over the event service.
//!
//! Reads go through the cache with a time-bounded freshness policy; writes
//! go to the network and fall back to the pending queue when there is no
//! connectivity, answering with an optimistic placeholder. Screens built on
//! this client keep working through an outage and catch up when it ends.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use usher_api::types::{
    AttendanceRecord, Event, EventRegistration, LogEntry, Page, SubscribedEvent, User,
};
use usher_api::EventService;
use usher_cache::{keys, CacheStore};
use usher_common::{Error, EventId, Result, UserId};
use usher_net::ConnectivityMonitor;
use usher_sync::{
    synthesize_result, MutationRequest, OperationQueue, PendingOperation, SyncConfig,
    SyncCoordinator, SyncReport,
};

/// How much staleness a read tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Serve cached data when present and refresh it in the background.
    #[default]
    CachePreferred,
    /// Go to the network first; fall back to cache only if that fails.
    ForceRefresh,
}

/// Outcome of warming the cache.
#[derive(Debug, Clone, Default)]
pub struct PreloadReport {
    pub loaded: usize,
    pub failed: usize,
}

/// The application-facing client.
pub struct EventClient<S: EventService + ?Sized> {
    service: Arc<S>,
    cache: Arc<RwLock<CacheStore>>,
    queue: Arc<RwLock<OperationQueue>>,
    monitor: ConnectivityMonitor,
    coordinator: SyncCoordinator<S>,
}

impl<S: EventService + ?Sized> Clone for EventClient<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            cache: self.cache.clone(),
            queue: self.queue.clone(),
            monitor: self.monitor.clone(),
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: EventService + ?Sized + 'static> EventClient<S> {
    /// Open the client with its cache and queue registries under
    /// `data_dir`.
    pub async fn new(
        service: Arc<S>,
        monitor: ConnectivityMonitor,
        data_dir: impl AsRef<Path>,
        config: SyncConfig,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let cache = Arc::new(RwLock::new(CacheStore::open(data_dir).await?));
        let queue = Arc::new(RwLock::new(OperationQueue::open(data_dir).await?));
        let coordinator =
            SyncCoordinator::new(service.clone(), queue.clone(), cache.clone(), config);

        Ok(Self {
            service,
            cache,
            queue,
            monitor,
            coordinator,
        })
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    // ---- reads ----

    pub async fn events(&self, freshness: Freshness) -> Result<Vec<Event>> {
        let service = self.service.clone();
        self.fetch_cached(&keys::events(), freshness, move || async move {
            service.list_events().await
        })
        .await
    }

    pub async fn event(&self, id: EventId, freshness: Freshness) -> Result<Event> {
        let service = self.service.clone();
        self.fetch_cached(&keys::event(id), freshness, move || async move {
            service.get_event(id).await
        })
        .await
    }

    pub async fn upcoming_events(&self, freshness: Freshness) -> Result<Vec<Event>> {
        let service = self.service.clone();
        self.fetch_cached(&keys::upcoming_events(), freshness, move || async move {
            service.upcoming_events().await
        })
        .await
    }

    pub async fn events_by_category(
        &self,
        category: &str,
        freshness: Freshness,
    ) -> Result<Vec<Event>> {
        let service = self.service.clone();
        let category_owned = category.to_string();
        self.fetch_cached(
            &keys::events_by_category(category),
            freshness,
            move || async move { service.events_by_category(&category_owned).await },
        )
        .await
    }

    pub async fn my_subscriptions(&self, freshness: Freshness) -> Result<Vec<SubscribedEvent>> {
        let service = self.service.clone();
        self.fetch_cached(&keys::my_subscriptions(), freshness, move || async move {
            service.my_subscriptions().await
        })
        .await
    }

    pub async fn my_attendances(&self, freshness: Freshness) -> Result<Vec<AttendanceRecord>> {
        let service = self.service.clone();
        self.fetch_cached(&keys::my_attendances(), freshness, move || async move {
            service.my_attendances().await
        })
        .await
    }

    pub async fn current_user(&self, freshness: Freshness) -> Result<User> {
        let service = self.service.clone();
        self.fetch_cached(&keys::current_user(), freshness, move || async move {
            service.current_user().await
        })
        .await
    }

    pub async fn my_logs(
        &self,
        page: u32,
        size: u32,
        freshness: Freshness,
    ) -> Result<Page<LogEntry>> {
        let service = self.service.clone();
        self.fetch_cached(&keys::my_logs(page, size), freshness, move || async move {
            service.my_logs(page, size).await
        })
        .await
    }

    pub async fn users(&self, freshness: Freshness) -> Result<Vec<User>> {
        let service = self.service.clone();
        self.fetch_cached(&keys::users(), freshness, move || async move {
            service.list_users().await
        })
        .await
    }

    pub async fn registrations(
        &self,
        event_id: EventId,
        freshness: Freshness,
    ) -> Result<Vec<EventRegistration>> {
        let service = self.service.clone();
        self.fetch_cached(
            &keys::registrations(event_id),
            freshness,
            move || async move { service.event_registrations(event_id).await },
        )
        .await
    }

    // ---- writes ----

    pub async fn subscribe(&self, event_id: EventId) -> Result<Event> {
        let service = self.service.clone();
        self.mutate(MutationRequest::Subscribe { event_id }, async move {
            service.subscribe(event_id).await
        })
        .await
    }

    /// Cancelling is the one write that is never queued: replaying a stale
    /// cancellation later could undo a registration the user has redone in
    /// the meantime.
    pub async fn cancel_subscription(&self, event_id: EventId) -> Result<()> {
        self.service.cancel_subscription(event_id).await?;
        self.invalidate(&[keys::my_subscriptions()]).await;
        Ok(())
    }

    pub async fn quick_register(&self, name: &str, email: &str, event_id: EventId) -> Result<User> {
        let service = self.service.clone();
        let request = MutationRequest::QuickRegister {
            name: name.to_string(),
            email: email.to_string(),
            event_id,
        };
        let name_owned = name.to_string();
        let email_owned = email.to_string();
        self.mutate(request, async move {
            service
                .quick_register(&name_owned, &email_owned, event_id)
                .await
        })
        .await
    }

    pub async fn mark_attendance(
        &self,
        user_id: UserId,
        event_id: EventId,
        present: bool,
    ) -> Result<AttendanceRecord> {
        let service = self.service.clone();
        let request = MutationRequest::MarkAttendance {
            user_id,
            event_id,
            present,
        };
        self.mutate(request, async move {
            service.mark_attendance(user_id, event_id, present).await
        })
        .await
    }

    // ---- pending queue ----

    pub async fn pending_count(&self) -> usize {
        self.queue.read().await.count()
    }

    pub async fn pending_operations(&self) -> Vec<PendingOperation> {
        self.queue.read().await.list().to_vec()
    }

    /// Watch the pending queue depth, e.g. for a badge in the UI.
    pub async fn pending_depth(&self) -> watch::Receiver<usize> {
        self.queue.read().await.depth()
    }

    pub async fn clear_pending(&self) -> Result<usize> {
        self.queue.write().await.clear().await
    }

    // ---- sync ----

    /// Replay the pending queue now, or join a pass already running.
    pub async fn sync_now(&self) -> SyncReport {
        self.coordinator.sync().await
    }

    /// Replay the queue automatically whenever connectivity returns.
    pub fn spawn_auto_sync(&self) -> JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        let states = self.monitor.subscribe();
        tokio::spawn(coordinator.drain_when_reachable(states))
    }

    /// Warm the cache with the reads every screen needs.
    pub async fn preload(&self) -> PreloadReport {
        let mut report = PreloadReport::default();
        let outcomes = [
            self.events(Freshness::ForceRefresh).await.map(|_| ()),
            self.upcoming_events(Freshness::ForceRefresh).await.map(|_| ()),
            self.my_subscriptions(Freshness::ForceRefresh)
                .await
                .map(|_| ()),
            self.my_attendances(Freshness::ForceRefresh)
                .await
                .map(|_| ()),
            self.current_user(Freshness::ForceRefresh).await.map(|_| ()),
        ];
        for outcome in outcomes {
            match outcome {
                Ok(()) => report.loaded += 1,
                Err(e) => {
                    debug!("preload fetch failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        info!(
            loaded = report.loaded,
            failed = report.failed,
            "preload finished"
        );
        report
    }

    // ---- cache admin ----

    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn cache_keys(&self) -> Vec<String> {
        self.cache.read().await.keys()
    }

    pub async fn clear_expired_cache(&self) -> Result<usize> {
        self.cache.write().await.clear_expired().await
    }

    pub async fn clear_cache(&self) -> Result<usize> {
        self.cache.write().await.clear_all().await
    }

    // ---- internals ----

    /// Read-through cache with stale-while-revalidate.
    async fn fetch_cached<T, F, Fut>(&self, key: &str, freshness: Freshness, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if freshness == Freshness::ForceRefresh {
            return self.refresh(key, fetch()).await;
        }

        if !self.monitor.is_reachable() {
            let cached = self.cache.write().await.get(key);
            return match cached.and_then(decode::<T>) {
                Some(value) => {
                    debug!(key, "serving cached value while offline");
                    Ok(value)
                }
                None => Err(Error::OfflineNoCache(key.to_string())),
            };
        }

        let cached = self.cache.write().await.get(key);
        if let Some(value) = cached.and_then(decode::<T>) {
            debug!(key, "cache hit, refreshing in background");
            self.spawn_refresh(key, fetch());
            return Ok(value);
        }

        match fetch().await {
            Ok(value) => {
                self.store(key, &value).await;
                Ok(value)
            }
            Err(e) if e.is_transport() => {
                // A concurrent fill may have landed while this fetch was
                // timing out.
                let cached = self.cache.write().await.get(key);
                match cached.and_then(decode::<T>) {
                    Some(value) => {
                        debug!(key, "fetch failed but the cache has caught up");
                        Ok(value)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Network-first read. Falls back to the cache when the fetch fails.
    async fn refresh<T, Fut>(&self, key: &str, fetch: Fut) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T>>,
    {
        match fetch.await {
            Ok(value) => {
                self.store(key, &value).await;
                Ok(value)
            }
            Err(e) => {
                let cached = self.cache.write().await.get(key);
                match cached.and_then(decode::<T>) {
                    Some(value) => {
                        warn!(key, "refresh failed, serving cached value: {}", e);
                        Ok(value)
                    }
                    None => Err(e),
                }
            }
        }
    }

    fn spawn_refresh<T, Fut>(&self, key: &str, fetch: Fut)
    where
        T: Serialize + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let cache = self.cache.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            match fetch.await {
                Ok(value) => match serde_json::to_value(&value) {
                    Ok(raw) => cache.write().await.insert(key, raw).await,
                    Err(e) => debug!("background refresh result not cacheable: {}", e),
                },
                Err(e) => debug!(key = %key, "background refresh failed: {}", e),
            }
        });
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(raw) => self.cache.write().await.insert(key, raw).await,
            Err(e) => debug!(key, "value not cacheable: {}", e),
        }
    }

    /// Run a mutation, queueing it for replay when transport fails.
    async fn mutate<T, Fut>(&self, request: MutationRequest, call: Fut) -> Result<T>
    where
        T: DeserializeOwned,
        Fut: Future<Output = Result<T>>,
    {
        match call.await {
            Ok(value) => {
                self.invalidate(&request.invalidates()).await;
                Ok(value)
            }
            Err(e) if e.is_transport() => {
                info!(kind = %request.kind(), "mutation queued for replay: {}", e);
                self.queue.write().await.enqueue(request.clone()).await?;

                let now = Utc::now();
                let mut value = synthesize_result(&request, now);
                if let MutationRequest::Subscribe { event_id } = &request {
                    // Prefer the cached copy of the real event over the
                    // bare placeholder.
                    if let Some(cached) = self.cache.write().await.get(&keys::event(*event_id)) {
                        value = cached;
                    }
                }
                self.apply_optimistic(&request, &value, now).await;
                serde_json::from_value(value).map_err(|e| Error::Serialization(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn invalidate(&self, stale_keys: &[String]) {
        let mut cache = self.cache.write().await;
        for key in stale_keys {
            if let Err(e) = cache.remove(key).await {
                warn!(key = %key, "failed to invalidate cache entry: {}", e);
            }
        }
    }

    /// Best-effort edit of cached lists so screens reflect the queued
    /// mutation right away. Skips silently when a list is absent or shaped
    /// unexpectedly; replay invalidation will straighten it out.
    async fn apply_optimistic(&self, request: &MutationRequest, value: &Value, now: DateTime<Utc>) {
        let mut cache = self.cache.write().await;
        match request {
            MutationRequest::Subscribe { .. } => {
                let key = keys::my_subscriptions();
                let Some(mut list) = cache.get(&key) else {
                    return;
                };
                let Some(entries) = list.as_array_mut() else {
                    debug!(key = %key, "cached subscriptions are not a list, skipping");
                    return;
                };
                let mut entry = value.clone();
                if let Some(fields) = entry.as_object_mut() {
                    fields.insert("subscribedAt".to_string(), json!(now));
                }
                entries.push(entry);
                cache.insert(key, list).await;
            }
            MutationRequest::QuickRegister { .. } => {
                let key = keys::users();
                let Some(mut list) = cache.get(&key) else {
                    return;
                };
                let Some(entries) = list.as_array_mut() else {
                    debug!(key = %key, "cached users are not a list, skipping");
                    return;
                };
                entries.push(value.clone());
                cache.insert(key, list).await;
            }
            MutationRequest::MarkAttendance {
                user_id, present, ..
            } => {
                let key = keys::registrations(request.event_id());
                let Some(mut list) = cache.get(&key) else {
                    return;
                };
                let Some(entries) = list.as_array_mut() else {
                    debug!(key = %key, "cached registrations are not a list, skipping");
                    return;
                };
                let target = json!(user_id);
                for row in entries.iter_mut() {
                    if row.get("userId") == Some(&target) {
                        if let Some(fields) = row.as_object_mut() {
                            fields.insert("present".to_string(), json!(present));
                        }
                    }
                }
                cache.insert(key, list).await;
            }
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(typed) => Some(typed),
        Err(e) => {
            debug!("cached value does not match the expected shape: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use usher_api::{MemoryEventService, Role};
    use usher_net::{ManualProbe, MonitorConfig, NetworkHint};

    async fn setup(
        reachable: bool,
    ) -> (
        TempDir,
        MemoryEventService,
        Arc<ManualProbe>,
        EventClient<MemoryEventService>,
    ) {
        let dir = TempDir::new().unwrap();
        let service = MemoryEventService::new();
        let probe = Arc::new(ManualProbe::new(reachable));
        let config = MonitorConfig {
            debounce_window: Duration::from_millis(10),
            ..MonitorConfig::default()
        };
        let (monitor, driver) = ConnectivityMonitor::new(probe.clone(), config);
        tokio::spawn(driver.run());
        // Settle the monitor state before the test runs.
        monitor.probe_now().await.unwrap();

        let client = EventClient::new(
            Arc::new(service.clone()),
            monitor,
            dir.path(),
            SyncConfig::default(),
        )
        .await
        .unwrap();
        (dir, service, probe, client)
    }

    async fn setup_offline() -> (
        TempDir,
        MemoryEventService,
        Arc<ManualProbe>,
        EventClient<MemoryEventService>,
    ) {
        let (dir, service, probe, client) = setup(false).await;
        service.set_offline(true);
        (dir, service, probe, client)
    }

    #[tokio::test]
    async fn test_miss_fetches_and_fills_the_cache() {
        let (_dir, service, _probe, client) = setup(true).await;
        service.seed_event(1, "First");

        let events = client.events(Freshness::CachePreferred).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(client.cache_len().await, 1);
    }

    #[tokio::test]
    async fn test_cached_read_refreshes_in_background() {
        let (_dir, service, _probe, client) = setup(true).await;
        service.seed_event(1, "First");
        client.events(Freshness::CachePreferred).await.unwrap();

        service.seed_event(2, "Second");
        let stale = client.events(Freshness::CachePreferred).await.unwrap();
        assert_eq!(stale.len(), 1, "cached value is served as-is");

        let mut latest = stale;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            latest = client.events(Freshness::CachePreferred).await.unwrap();
            if latest.len() == 2 {
                break;
            }
        }
        assert_eq!(latest.len(), 2, "background refresh landed");
    }

    #[tokio::test]
    async fn test_offline_reads_serve_cache_or_fail() {
        let (_dir, service, probe, client) = setup(true).await;
        let user = service.seed_user(1, "Ana", "ana@example.com", Role::User);
        service.login_as(user.id);
        service.seed_event(1, "First");
        client.events(Freshness::CachePreferred).await.unwrap();

        service.set_offline(true);
        probe.set_reachable(false);
        client.monitor().probe_now().await.unwrap();
        assert!(!client.monitor().is_reachable());

        let events = client.events(Freshness::CachePreferred).await.unwrap();
        assert_eq!(events.len(), 1);

        let err = client
            .my_subscriptions(Freshness::CachePreferred)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OfflineNoCache(_)));
    }

    #[tokio::test]
    async fn test_force_refresh_falls_back_to_cache() {
        let (_dir, service, _probe, client) = setup(true).await;
        service.seed_event(1, "First");
        client.events(Freshness::ForceRefresh).await.unwrap();

        // Backend breaks, monitor has not noticed yet.
        service.set_offline(true);
        let events = client.events(Freshness::ForceRefresh).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_rechecks_cache_for_concurrent_fill() {
        let (_dir, service, _probe, client) = setup(true).await;
        let event = service.seed_event(1, "Hidden");
        service.set_offline(true);
        service.set_latency(Duration::from_millis(100));

        let reader = {
            let client = client.clone();
            tokio::spawn(async move { client.events(Freshness::CachePreferred).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        client
            .cache
            .write()
            .await
            .insert(keys::events(), serde_json::to_value(vec![event]).unwrap())
            .await;

        let events = reader.await.unwrap().unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_subscribe_queues_and_synthesizes() {
        let (_dir, _service, _probe, client) = setup_offline().await;

        let event = client.subscribe(EventId::new(5)).await.unwrap();
        assert_eq!(event.id, EventId::new(5));
        assert_eq!(client.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_offline_subscribe_prefers_cached_event() {
        let (_dir, service, _probe, client) = setup_offline().await;
        let real = service.seed_event(5, "Cached title");
        client
            .cache
            .write()
            .await
            .insert(keys::event(real.id), serde_json::to_value(&real).unwrap())
            .await;

        let event = client.subscribe(real.id).await.unwrap();
        assert_eq!(event.title, "Cached title");
    }

    #[tokio::test]
    async fn test_offline_quick_register_returns_placeholder_user() {
        let (_dir, _service, _probe, client) = setup_offline().await;

        let user = client
            .quick_register("Ana", "ana@example.com", EventId::new(3))
            .await
            .unwrap();
        assert!(user.id.is_placeholder());
        assert_eq!(user.email, "ana@example.com");
        assert_eq!(client.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_offline_mark_attendance_patches_cached_registrations() {
        let (_dir, _service, _probe, client) = setup_offline().await;
        client
            .cache
            .write()
            .await
            .insert(
                keys::registrations(EventId::new(7)),
                json!([{"userId": 3, "name": "Ana", "present": false}]),
            )
            .await;

        let record = client
            .mark_attendance(UserId::new(3), EventId::new(7), true)
            .await
            .unwrap();
        assert!(record.present);
        assert!(record.confirmed_at.is_none());

        let cached = client
            .cache
            .write()
            .await
            .get(&keys::registrations(EventId::new(7)))
            .unwrap();
        assert_eq!(cached[0]["present"], true);
    }

    #[tokio::test]
    async fn test_cancel_subscription_is_never_queued() {
        let (_dir, _service, _probe, client) = setup_offline().await;

        let err = client.cancel_subscription(EventId::new(5)).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_remote_rejection_is_not_queued() {
        let (_dir, service, _probe, client) = setup(true).await;
        let user = service.seed_user(1, "Ana", "ana@example.com", Role::User);
        service.login_as(user.id);

        // Event 42 does not exist; the backend answers 404.
        let err = client.subscribe(EventId::new(42)).await.unwrap_err();
        assert!(matches!(err, Error::Remote { status: 404, .. }));
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_queued_mutation_replays_when_connectivity_returns() {
        let (_dir, service, probe, client) = setup_offline().await;
        let user = service.seed_user(1, "Ana", "ana@example.com", Role::User);
        service.login_as(user.id);
        let event = service.seed_event(1, "Meetup");
        let _auto = client.spawn_auto_sync();

        client.subscribe(event.id).await.unwrap();
        assert_eq!(client.pending_count().await, 1);

        service.set_offline(false);
        probe.set_reachable(true);
        client.monitor().hint(NetworkHint::CameOnline).await;

        for _ in 0..200 {
            if client.pending_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(client.pending_count().await, 0);
        assert_eq!(service.subscription_count(), 1);
        assert_eq!(service.mutation_calls(), 1);
    }

    #[tokio::test]
    async fn test_preload_warms_the_standard_set() {
        let (_dir, service, probe, client) = setup(true).await;
        let user = service.seed_user(1, "Ana", "ana@example.com", Role::User);
        service.login_as(user.id);
        service.seed_event(1, "Meetup");

        let report = client.preload().await;
        assert_eq!(report.loaded, 5);
        assert_eq!(report.failed, 0);

        service.set_offline(true);
        probe.set_reachable(false);
        client.monitor().probe_now().await.unwrap();

        let events = client.events(Freshness::CachePreferred).await.unwrap();
        assert_eq!(events.len(), 1);
        let me = client.current_user(Freshness::CachePreferred).await.unwrap();
        assert_eq!(me.id, user.id);
    }
}
