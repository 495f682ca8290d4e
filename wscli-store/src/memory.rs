//! In-memory [`SessionStore`] for tests.
//!
//! Mirrors the Postgres semantics, including expired-row absence and the
//! at-most-one-`true` guarantee of [`SessionStore::consume_token_id`]
//! (here provided by the mutex).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use wscli_types::session::SessionRecord;
use wscli_types::{SessionId, TokenId};

use crate::{SessionStore, StoreError};

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionRecord>,
    token_ids: HashMap<TokenId, (SessionId, OffsetDateTime)>,
}

/// Map-backed store for other crates' test setups.
#[derive(Default, Clone)]
pub struct MemorySessionStore(Arc<Mutex<Inner>>);

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: reports whether a token-id row is currently present.
    pub fn token_id_exists(&self, token_id: TokenId) -> bool {
        self.0.lock().token_ids.contains_key(&token_id)
    }

    /// Test helper: number of live token-id rows.
    pub fn token_count(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        self.0
            .lock()
            .token_ids
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    /// Test helper: number of live session rows.
    pub fn session_count(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        self.0
            .lock()
            .sessions
            .values()
            .filter(|record| !record.is_expired(now))
            .count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let mut inner = self.0.lock();
        let duplicate_id = inner.sessions.contains_key(&record.session_id);
        let duplicate_job = inner
            .sessions
            .values()
            .any(|existing| existing.job_name == record.job_name);
        if duplicate_id || duplicate_job {
            return Err(StoreError::Duplicate { entity: "session" });
        }
        inner.sessions.insert(record.session_id, record.clone());
        Ok(())
    }

    async fn update_session_pod(
        &self,
        session_id: SessionId,
        pod_ip: IpAddr,
        pod_name: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.0.lock();
        match inner.sessions.get_mut(&session_id) {
            Some(record) if record.pod_ip.is_none() => {
                record.pod_ip = Some(pod_ip);
                record.pod_name = Some(pod_name.to_owned());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .0
            .lock()
            .sessions
            .get(&session_id)
            .filter(|record| !record.is_expired(now))
            .cloned())
    }

    async fn insert_token_id(
        &self,
        token_id: TokenId,
        session_id: SessionId,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut inner = self.0.lock();
        if inner.token_ids.contains_key(&token_id) {
            return Err(StoreError::Duplicate { entity: "token id" });
        }
        inner.token_ids.insert(token_id, (session_id, expires_at));
        Ok(())
    }

    async fn consume_token_id(&self, token_id: TokenId) -> Result<bool, StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.0.lock();
        // expired rows stay behind for the sweep, as in the SQL delete
        match inner.token_ids.get(&token_id) {
            Some((_, expires_at)) if *expires_at > now => {
                inner.token_ids.remove(&token_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.0.lock();
        let before = inner.sessions.len() + inner.token_ids.len();
        inner.sessions.retain(|_, record| !record.is_expired(now));
        inner.token_ids.retain(|_, (_, expires_at)| *expires_at > now);
        let after = inner.sessions.len() + inner.token_ids.len();
        Ok((before - after) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wscli_types::OwnerId;

    use super::*;

    fn record(expires_in: Duration) -> SessionRecord {
        let now = OffsetDateTime::now_utc();
        SessionRecord::new(
            SessionId::generate(),
            OwnerId::new("caller-1"),
            now,
            now + expires_in,
        )
    }

    #[tokio::test]
    async fn duplicate_session_insert_fails() {
        let store = MemorySessionStore::new();
        let session = record(Duration::from_secs(60));
        store.insert_session(&session).await.unwrap();
        let err = store.insert_session(&session).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "session" }));
    }

    #[tokio::test]
    async fn pod_update_is_monotonic() {
        let store = MemorySessionStore::new();
        let session = record(Duration::from_secs(60));
        store.insert_session(&session).await.unwrap();

        let first_ip: IpAddr = "10.0.0.5".parse().unwrap();
        assert!(
            store
                .update_session_pod(session.session_id, first_ip, "pod-a")
                .await
                .unwrap()
        );
        // second placement attempt must not overwrite
        assert!(
            !store
                .update_session_pod(session.session_id, "10.0.0.9".parse().unwrap(), "pod-b")
                .await
                .unwrap()
        );
        let stored = store.get_session(session.session_id).await.unwrap().unwrap();
        assert_eq!(stored.pod_ip, Some(first_ip));
        assert_eq!(stored.pod_name.as_deref(), Some("pod-a"));
    }

    #[tokio::test]
    async fn expired_session_reads_as_absent() {
        let store = MemorySessionStore::new();
        let now = OffsetDateTime::now_utc();
        let session = SessionRecord::new(
            SessionId::generate(),
            OwnerId::new("caller-1"),
            now - Duration::from_secs(120),
            now - Duration::from_secs(1),
        );
        store.insert_session(&session).await.unwrap();
        assert!(store.get_session(session.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_token_id_cannot_be_consumed() {
        let store = MemorySessionStore::new();
        let token_id = TokenId::generate();
        store
            .insert_token_id(
                token_id,
                SessionId::generate(),
                OffsetDateTime::now_utc() - Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(!store.consume_token_id(token_id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consume_yields_exactly_one_true() {
        let store = Arc::new(MemorySessionStore::new());
        let token_id = TokenId::generate();
        store
            .insert_token_id(
                token_id,
                SessionId::generate(),
                OffsetDateTime::now_utc() + Duration::from_secs(60),
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.consume_token_id(token_id).await.unwrap()
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn purge_removes_only_expired_rows() {
        let store = MemorySessionStore::new();
        let live = record(Duration::from_secs(60));
        store.insert_session(&live).await.unwrap();
        let now = OffsetDateTime::now_utc();
        let dead = SessionRecord::new(
            SessionId::generate(),
            OwnerId::new("caller-2"),
            now - Duration::from_secs(120),
            now - Duration::from_secs(1),
        );
        store.insert_session(&dead).await.unwrap();

        let purged = store.purge_expired().await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_session(live.session_id).await.unwrap().is_some());
    }
}
