use std::sync::Arc;
use tokio::sync::RwLock;

use super::persistence::SessionPersistence;
use super::types::Session;

/// Result of a conditional rotation
#[derive(Debug, Clone, PartialEq)]
pub enum Rotation {
    /// The expected session was replaced
    Rotated(Arc<Session>),
    /// The session changed (or ended) while the rotation was prepared
    Superseded(Option<Arc<Session>>),
}

/// Result of a conditional revocation
#[derive(Debug, Clone, PartialEq)]
pub enum Revocation {
    /// The expected session was cleared
    Revoked(Arc<Session>),
    /// A different session is current and was left alone
    Superseded(Arc<Session>),
    /// No session existed
    Absent,
}

/// Process-wide holder of the current session
///
/// Every read and mutation goes through one lock, so readers never observe a
/// half-applied update. Persistence is a side effect of mutations and its
/// failures are only logged.
#[derive(Clone)]
pub struct SessionStore {
    current: Arc<RwLock<Option<Arc<Session>>>>,
    persistence: Option<Arc<dyn SessionPersistence>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Empty, memory-only store
    pub fn new() -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            persistence: None,
        }
    }

    /// Store backed by `persistence`, pre-loaded with whatever it holds
    pub fn restore(persistence: Arc<dyn SessionPersistence>) -> Self {
        let session = match persistence.load() {
            Ok(Some(session)) if session.access_token.is_empty() => {
                tracing::warn!("Discarding persisted session without an access token");
                None
            }
            Ok(Some(session)) => {
                tracing::info!("Restored persisted session");
                Some(Arc::new(session))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to load persisted session: {:#}", e);
                None
            }
        };

        Self {
            current: Arc::new(RwLock::new(session)),
            persistence: Some(persistence),
        }
    }

    pub async fn current(&self) -> Option<Arc<Session>> {
        self.current.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Replace the session unconditionally
    pub async fn set(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        let mut current = self.current.write().await;
        *current = Some(session.clone());
        self.persist(Some(session.as_ref()));
        session
    }

    /// Clear the session, returning the one that was removed
    pub async fn clear(&self) -> Option<Arc<Session>> {
        let mut current = self.current.write().await;
        let previous = current.take();
        if previous.is_some() {
            self.persist(None);
        }
        previous
    }

    /// Replace the session only if it still carries `expected_refresh_token`
    pub async fn rotate(&self, expected_refresh_token: &str, next: Session) -> Rotation {
        let mut current = self.current.write().await;
        let unchanged = current
            .as_ref()
            .is_some_and(|existing| existing.refresh_token == expected_refresh_token);
        if !unchanged {
            return Rotation::Superseded(current.clone());
        }

        let next = Arc::new(next);
        *current = Some(next.clone());
        self.persist(Some(next.as_ref()));
        Rotation::Rotated(next)
    }

    /// Clear the session only if it still carries `expected_refresh_token`
    pub async fn revoke(&self, expected_refresh_token: &str) -> Revocation {
        let mut current = self.current.write().await;
        match current.take() {
            Some(existing) if existing.refresh_token == expected_refresh_token => {
                self.persist(None);
                Revocation::Revoked(existing)
            }
            Some(other) => {
                *current = Some(other.clone());
                Revocation::Superseded(other)
            }
            None => Revocation::Absent,
        }
    }

    fn persist(&self, session: Option<&Session>) {
        let Some(ref persistence) = self.persistence else {
            return;
        };

        let result = match session {
            Some(session) => persistence.save(session),
            None => persistence.erase(),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to persist session change: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SqlitePersistence;
    use serde_json::json;

    fn session(access: &str, refresh: &str) -> Session {
        Session {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            identity: json!({"id": 1}),
            issued_at: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_set_and_clear() {
        let store = SessionStore::new();
        assert!(store.current().await.is_none());

        store.set(session("A1", "R1")).await;
        assert_eq!(store.current().await.unwrap().access_token, "A1");
        assert!(store.is_authenticated().await);

        let removed = store.clear().await;
        assert_eq!(removed.unwrap().access_token, "A1");
        assert!(store.clear().await.is_none());
        assert!(!store.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_rotate_requires_matching_refresh_token() {
        let store = SessionStore::new();
        store.set(session("A1", "R1")).await;

        let outcome = store.rotate("R0", session("A2", "R2")).await;
        assert!(matches!(outcome, Rotation::Superseded(Some(ref s)) if s.access_token == "A1"));

        let outcome = store.rotate("R1", session("A2", "R2")).await;
        assert!(matches!(outcome, Rotation::Rotated(ref s) if s.access_token == "A2"));
        assert_eq!(store.current().await.unwrap().refresh_token, "R2");
    }

    #[tokio::test]
    async fn test_rotate_after_clear_is_superseded() {
        let store = SessionStore::new();
        let outcome = store.rotate("R1", session("A2", "R2")).await;
        assert_eq!(outcome, Rotation::Superseded(None));
        assert!(store.current().await.is_none());
    }

    #[tokio::test]
    async fn test_revoke_leaves_newer_session_alone() {
        let store = SessionStore::new();
        assert_eq!(store.revoke("R1").await, Revocation::Absent);

        store.set(session("B1", "S1")).await;
        assert!(matches!(store.revoke("R1").await, Revocation::Superseded(_)));
        assert_eq!(store.current().await.unwrap().access_token, "B1");

        assert!(matches!(store.revoke("S1").await, Revocation::Revoked(_)));
        assert!(store.current().await.is_none());
    }

    #[tokio::test]
    async fn test_mutations_reach_persistence() {
        let db = Arc::new(SqlitePersistence::in_memory().unwrap());
        let store = SessionStore::restore(db.clone());
        assert!(store.current().await.is_none());

        store.set(session("A1", "R1")).await;
        assert_eq!(db.load().unwrap().unwrap().access_token, "A1");

        store.rotate("R1", session("A2", "R2")).await;
        assert_eq!(db.load().unwrap().unwrap().access_token, "A2");

        let restored = SessionStore::restore(db.clone());
        assert_eq!(restored.current().await.unwrap().refresh_token, "R2");

        store.clear().await;
        assert!(db.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_discards_session_without_access_token() {
        let db = Arc::new(SqlitePersistence::in_memory().unwrap());
        db.save(&session("", "R1")).unwrap();

        let store = SessionStore::restore(db);
        assert!(store.current().await.is_none());
    }
}
