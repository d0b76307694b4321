//! Deterministic cache key derivation.

use usher_common::EventId;

/// Derive a cache key from a request's identity.
///
/// The key is a pure function of method, path and the significant query
/// parameters: the same request always yields the same key, and parameter
/// order does not matter. Path segments are joined with `_` after stripping
/// any base-URL noise (`scheme://host`, leading slashes, an `api/` prefix),
/// and parameters are appended sorted by name. GET contributes nothing to
/// the key since only GET responses are ever cached; other methods are
/// prefixed to keep them from aliasing a cached read.
pub fn cache_key(method: &str, path: &str, params: &[(&str, &str)]) -> String {
    let mut key = String::new();

    let method = method.to_ascii_lowercase();
    if !method.is_empty() && method != "get" {
        key.push_str(&method);
    }

    let path = match path.find("://") {
        Some(idx) => path[idx + 3..].split_once('/').map(|(_, rest)| rest).unwrap_or(""),
        None => path,
    };
    let path = path.trim_matches('/');
    let path = path.strip_prefix("api/").unwrap_or(path);

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !key.is_empty() {
            key.push('_');
        }
        key.push_str(segment);
    }

    let mut params: Vec<&(&str, &str)> = params.iter().collect();
    params.sort_by_key(|(name, _)| *name);
    for (name, value) in params {
        if !key.is_empty() {
            key.push('_');
        }
        key.push_str(name);
        key.push('_');
        key.push_str(value);
    }

    key
}

/// Canonical keys for the resources the client caches.
///
/// Short keys pin the TTL class directly (see `TtlPolicy`); the rest derive
/// from their request path.
pub mod keys {
    use super::*;

    pub fn events() -> String {
        cache_key("get", "/api/events", &[])
    }

    pub fn event(id: EventId) -> String {
        cache_key("get", &format!("/api/events/{}", id), &[])
    }

    pub fn upcoming_events() -> String {
        cache_key("get", "/api/events/upcoming", &[])
    }

    pub fn events_by_category(category: &str) -> String {
        cache_key("get", &format!("/api/events/category/{}", category), &[])
    }

    pub fn my_subscriptions() -> String {
        "subscriptions".to_string()
    }

    pub fn my_attendances() -> String {
        "attendances".to_string()
    }

    pub fn current_user() -> String {
        cache_key("get", "/api/auth/me", &[])
    }

    pub fn my_logs(page: u32, size: u32) -> String {
        let page = page.to_string();
        let size = size.to_string();
        cache_key("get", "/api/logs/mine", &[("page", &page), ("size", &size)])
    }

    pub fn users() -> String {
        "users".to_string()
    }

    pub fn registrations(event_id: EventId) -> String {
        format!("registrations_{}", event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_path_normalization() {
        assert_eq!(cache_key("get", "/api/events", &[]), "events");
        assert_eq!(cache_key("GET", "/api/events/5", &[]), "events_5");
        assert_eq!(
            cache_key("get", "https://example.com/api/events/upcoming", &[]),
            "events_upcoming"
        );
        assert_eq!(cache_key("get", "api/auth/me", &[]), "auth_me");
    }

    #[test]
    fn test_params_sorted_by_name() {
        let a = cache_key("get", "/api/logs/mine", &[("size", "20"), ("page", "0")]);
        let b = cache_key("get", "/api/logs/mine", &[("page", "0"), ("size", "20")]);
        assert_eq!(a, b);
        assert_eq!(a, "logs_mine_page_0_size_20");
    }

    #[test]
    fn test_non_get_methods_are_prefixed() {
        assert_ne!(
            cache_key("post", "/api/events", &[]),
            cache_key("get", "/api/events", &[])
        );
    }

    #[test]
    fn test_well_known_keys() {
        assert_eq!(keys::events(), "events");
        assert_eq!(keys::event(EventId::new(12)), "events_12");
        assert_eq!(keys::registrations(EventId::new(3)), "registrations_3");
        assert_eq!(keys::my_logs(1, 50), "logs_mine_page_1_size_50");
    }

    proptest! {
        #[test]
        fn prop_key_is_deterministic(path in "[a-z]{1,8}(/[a-z0-9]{1,8}){0,3}") {
            prop_assert_eq!(
                cache_key("get", &path, &[]),
                cache_key("get", &path, &[])
            );
        }

        #[test]
        fn prop_param_order_is_insignificant(
            a in "[a-z]{1,6}", av in "[a-z0-9]{1,6}",
            b in "[a-z]{1,6}", bv in "[a-z0-9]{1,6}",
        ) {
            prop_assume!(a != b);
            let forward = cache_key("get", "events", &[(&a, &av), (&b, &bv)]);
            let reverse = cache_key("get", "events", &[(&b, &bv), (&a, &av)]);
            prop_assert_eq!(forward, reverse);
        }
    }
}
