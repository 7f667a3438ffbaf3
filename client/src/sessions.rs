//! Client-side session cache.
//!
//! No client is authoritative over session state: the agent's
//! `sessions_list` always wins. Cached entries absent from an
//! authoritative list are evicted once they are older than five minutes;
//! younger absentees are kept, since they may have started after the list
//! was assembled.

use std::collections::HashMap;

use serde_json::Value;

/// Cached sessions absent from an authoritative list are evicted past
/// this age.
pub const STALE_AFTER_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedSession {
    pub session_id: String,
    pub project_id: String,
    /// When this entry was last confirmed or observed, ms since epoch.
    pub last_seen_ms: i64,
}

#[derive(Debug, Default)]
pub struct SessionCache {
    entries: HashMap<String, CachedSession>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session observed outside a full list (e.g. from a
    /// `session_started` status).
    pub fn observe(&mut self, session_id: &str, project_id: &str, now_ms: i64) {
        self.entries.insert(
            session_id.to_string(),
            CachedSession {
                session_id: session_id.to_string(),
                project_id: project_id.to_string(),
                last_seen_ms: now_ms,
            },
        );
    }

    pub fn remove(&mut self, session_id: &str) {
        self.entries.remove(session_id);
    }

    pub fn get(&self, session_id: &str) -> Option<&CachedSession> {
        self.entries.get(session_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reconcile with an authoritative `sessions_list`: refresh every
    /// listed session and evict stale absentees.
    pub fn apply_authoritative(&mut self, listed: &[(String, String)], now_ms: i64) {
        for (session_id, project_id) in listed {
            self.observe(session_id, project_id, now_ms);
        }
        self.entries.retain(|id, entry| {
            listed.iter().any(|(sid, _)| sid == id)
                || now_ms - entry.last_seen_ms < STALE_AFTER_MS
        });
    }

    /// Reconcile from a `sessions_list` status payload.
    ///
    /// Only the wrapped form `{sessions: […]}` is accepted; anything else
    /// (including a bare array) is rejected.
    pub fn apply_sessions_list(&mut self, data: &Value, now_ms: i64) -> bool {
        let Some(sessions) = data.get("sessions").and_then(Value::as_array) else {
            return false;
        };
        let listed: Vec<(String, String)> = sessions
            .iter()
            .filter_map(|s| {
                Some((
                    s.get("sessionId")?.as_str()?.to_string(),
                    s.get("projectId")?.as_str()?.to_string(),
                ))
            })
            .collect();
        self.apply_authoritative(&listed, now_ms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn observe_and_get() {
        let mut cache = SessionCache::new();
        cache.observe("s-1", "demo", 1000);
        assert_eq!(cache.get("s-1").unwrap().project_id, "demo");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn listed_sessions_are_refreshed() {
        let mut cache = SessionCache::new();
        cache.observe("s-1", "demo", 0);

        cache.apply_authoritative(&[("s-1".into(), "demo".into())], 10_000_000);
        assert_eq!(cache.get("s-1").unwrap().last_seen_ms, 10_000_000);
    }

    #[test]
    fn stale_absentees_are_evicted() {
        let mut cache = SessionCache::new();
        cache.observe("old", "demo", 0);

        cache.apply_authoritative(&[], STALE_AFTER_MS + 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn fresh_absentees_survive() {
        let mut cache = SessionCache::new();
        cache.observe("young", "demo", 1000);

        cache.apply_authoritative(&[], 1000 + STALE_AFTER_MS - 1);
        assert!(cache.get("young").is_some());
    }

    #[test]
    fn wrapped_sessions_list_is_accepted() {
        let mut cache = SessionCache::new();
        let data = json!({
            "sessions": [
                {"sessionId": "s-1", "projectId": "demo", "status": "active"},
                {"sessionId": "s-2", "projectId": "api", "status": "idle"},
            ]
        });
        assert!(cache.apply_sessions_list(&data, 5000));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("s-2").unwrap().project_id, "api");
    }

    #[test]
    fn unwrapped_list_form_is_rejected() {
        let mut cache = SessionCache::new();
        cache.observe("keep", "demo", 1000);

        let bare = json!([{"sessionId": "s-1", "projectId": "demo"}]);
        assert!(!cache.apply_sessions_list(&bare, 2000));
        // Rejected lists change nothing.
        assert_eq!(cache.len(), 1);
        assert!(cache.get("keep").is_some());
    }

    #[test]
    fn remove_clears_an_entry() {
        let mut cache = SessionCache::new();
        cache.observe("s-1", "demo", 0);
        cache.remove("s-1");
        assert!(cache.is_empty());
    }
}
