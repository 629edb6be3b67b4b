use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Metadata about one active session.
///
/// A session maps an opaque token to one (context, page) pair; the session
/// id doubles as the page id in the registry.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub context_id: String,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub request_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub total_requests: u64,
}

/// Tracks session metadata: creation, last activity, request counts.
///
/// Mutating operations (create, touch, remove) serialize on the write lock;
/// read-only lookups run concurrently. Engine-side teardown of expired
/// sessions is the caller's job — the tracker only reports them.
#[derive(Clone, Default)]
pub struct SessionTracker {
    sessions: Arc<RwLock<HashMap<String, SessionInfo>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session owning `context_id`. Returns the generated
    /// session token; tokens are never reused.
    pub async fn create(&self, context_id: String) -> String {
        let session_id = Uuid::new_v4().to_string();
        let now = Instant::now();
        let info = SessionInfo {
            session_id: session_id.clone(),
            context_id,
            created_at: now,
            last_used_at: now,
            request_count: 0,
        };

        self.sessions.write().await.insert(session_id.clone(), info);
        session_id
    }

    /// Look up a session and refresh its last-activity timestamp.
    pub async fn touch(&self, session_id: &str) -> Option<SessionInfo> {
        let mut sessions = self.sessions.write().await;

        let session = sessions.get_mut(session_id)?;
        session.last_used_at = Instant::now();
        session.request_count += 1;
        Some(session.clone())
    }

    /// Look up a session without refreshing activity.
    pub async fn peek(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.write().await.remove(session_id)
    }

    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// The most recently created session, if any. Used to pick the stream
    /// target when the previous one goes away.
    pub async fn most_recent(&self) -> Option<SessionInfo> {
        self.sessions
            .read()
            .await
            .values()
            .max_by_key(|s| s.created_at)
            .cloned()
    }

    /// Sessions idle for longer than `ttl`. The caller closes their engine
    /// resources and then removes them.
    pub async fn expired(&self, ttl: Duration) -> Vec<SessionInfo> {
        let now = Instant::now();
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| now.duration_since(s.last_used_at) >= ttl)
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read().await;

        SessionStats {
            total_sessions: sessions.len(),
            total_requests: sessions.values().map(|s| s.request_count).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Lifecycle Tests ====================

    #[tokio::test]
    async fn test_create_and_touch() {
        let tracker = SessionTracker::new();

        let session_id = tracker.create("ctx-1".to_string()).await;
        assert!(!session_id.is_empty());

        let info = tracker.touch(&session_id).await.unwrap();
        assert_eq!(info.context_id, "ctx-1");
        assert_eq!(info.request_count, 1);

        let info = tracker.touch(&session_id).await.unwrap();
        assert_eq!(info.request_count, 2);
    }

    #[tokio::test]
    async fn test_touch_nonexistent() {
        let tracker = SessionTracker::new();
        assert!(tracker.touch("no-such-session").await.is_none());
    }

    #[tokio::test]
    async fn test_peek_does_not_bump_request_count() {
        let tracker = SessionTracker::new();
        let session_id = tracker.create("ctx".to_string()).await;

        tracker.peek(&session_id).await.unwrap();
        let info = tracker.peek(&session_id).await.unwrap();
        assert_eq!(info.request_count, 0);
    }

    #[tokio::test]
    async fn test_remove() {
        let tracker = SessionTracker::new();
        let session_id = tracker.create("ctx".to_string()).await;

        assert!(tracker.remove(&session_id).await.is_some());
        assert!(tracker.peek(&session_id).await.is_none());
        assert!(tracker.remove(&session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let tracker = SessionTracker::new();
        let a = tracker.create("ctx".to_string()).await;
        let b = tracker.create("ctx".to_string()).await;
        assert_ne!(a, b);
        assert_eq!(tracker.len().await, 2);
    }

    // ==================== Expiry Tests ====================

    #[tokio::test]
    async fn test_expired_only_reports_idle_sessions() {
        let tracker = SessionTracker::new();
        let stale = tracker.create("ctx-a".to_string()).await;
        let fresh = tracker.create("ctx-b".to_string()).await;

        // Backdate the stale session's activity.
        {
            let mut sessions = tracker.sessions.write().await;
            let entry = sessions.get_mut(&stale).unwrap();
            entry.last_used_at = Instant::now() - Duration::from_secs(600);
        }

        let expired = tracker.expired(Duration::from_secs(300)).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].session_id, stale);
        assert_ne!(expired[0].session_id, fresh);
    }

    #[tokio::test]
    async fn test_touch_rescues_session_from_expiry() {
        let tracker = SessionTracker::new();
        let session_id = tracker.create("ctx".to_string()).await;

        {
            let mut sessions = tracker.sessions.write().await;
            sessions.get_mut(&session_id).unwrap().last_used_at =
                Instant::now() - Duration::from_secs(600);
        }

        tracker.touch(&session_id).await.unwrap();
        assert!(tracker.expired(Duration::from_secs(300)).await.is_empty());
    }

    // ==================== Stats Tests ====================

    #[tokio::test]
    async fn test_stats() {
        let tracker = SessionTracker::new();
        let a = tracker.create("ctx-a".to_string()).await;
        let _b = tracker.create("ctx-b".to_string()).await;

        tracker.touch(&a).await;
        tracker.touch(&a).await;

        let stats = tracker.stats().await;
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.total_requests, 2);
    }

    #[tokio::test]
    async fn test_most_recent() {
        let tracker = SessionTracker::new();
        assert!(tracker.most_recent().await.is_none());

        let _a = tracker.create("ctx-a".to_string()).await;
        let b = {
            // Instant has coarse resolution on some platforms; force ordering.
            let id = tracker.create("ctx-b".to_string()).await;
            let mut sessions = tracker.sessions.write().await;
            sessions.get_mut(&id).unwrap().created_at = Instant::now() + Duration::from_secs(1);
            id
        };

        assert_eq!(tracker.most_recent().await.unwrap().session_id, b);
    }
}
