//! In-process signaling store
//!
//! Session documents live in a `DashMap`; every mutation is fanned out to the
//! document's subscribers while the entry's shard lock is held, which keeps
//! per-document delivery in write order.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{SignalingStore, Subscription};
use crate::config::SignalingConfig;
use crate::models::{
    now_millis, CandidateOrigin, CastSession, IceCandidate, IceCandidateRecord, SessionId,
    SessionPatch,
};
use crate::{Error, Result};

struct Subscriber<T> {
    id: u64,
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Clone> Subscriber<T> {
    fn deliver(&self, item: &T) -> bool {
        self.tx.send(item.clone()).is_ok()
    }
}

struct SessionEntry {
    doc: CastSession,
    updated_at: i64,
    doc_subscribers: Vec<Subscriber<Option<CastSession>>>,
    sender_candidates: Vec<IceCandidateRecord>,
    receiver_candidates: Vec<IceCandidateRecord>,
    sender_subscribers: Vec<Subscriber<IceCandidateRecord>>,
    receiver_subscribers: Vec<Subscriber<IceCandidateRecord>>,
}

impl SessionEntry {
    fn new(doc: CastSession) -> Self {
        Self {
            doc,
            updated_at: now_millis(),
            doc_subscribers: Vec::new(),
            sender_candidates: Vec::new(),
            receiver_candidates: Vec::new(),
            sender_subscribers: Vec::new(),
            receiver_subscribers: Vec::new(),
        }
    }

    fn candidates_mut(
        &mut self,
        origin: CandidateOrigin,
    ) -> (&mut Vec<IceCandidateRecord>, &mut Vec<Subscriber<IceCandidateRecord>>) {
        match origin {
            CandidateOrigin::Sender => (&mut self.sender_candidates, &mut self.sender_subscribers),
            CandidateOrigin::Receiver => {
                (&mut self.receiver_candidates, &mut self.receiver_subscribers)
            }
        }
    }

    fn publish_doc(&mut self) {
        let snapshot = Some(self.doc.clone());
        self.doc_subscribers.retain(|sub| sub.deliver(&snapshot));
    }

    fn subscriber_count(&self) -> usize {
        self.doc_subscribers.len() + self.sender_subscribers.len() + self.receiver_subscribers.len()
    }
}

struct Inner {
    sessions: DashMap<SessionId, SessionEntry>,
    next_subscriber_id: AtomicU64,
    max_sessions: usize,
}

impl Inner {
    fn remove_doc_subscriber(&self, session_id: &SessionId, subscriber_id: u64) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.doc_subscribers.retain(|sub| sub.id != subscriber_id);
            debug!(session_id = %session_id, subscriber_id, "Session subscriber detached");
        }
    }

    fn remove_candidate_subscriber(
        &self,
        session_id: &SessionId,
        origin: CandidateOrigin,
        subscriber_id: u64,
    ) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            let (_, subscribers) = entry.candidates_mut(origin);
            subscribers.retain(|sub| sub.id != subscriber_id);
            debug!(
                session_id = %session_id,
                origin = origin.as_str(),
                subscriber_id,
                "Candidate subscriber detached"
            );
        }
    }
}

/// Store statistics (for health/monitoring)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub sessions: usize,
    pub live_sessions: usize,
    pub subscribers: usize,
}

/// In-memory [`SignalingStore`]
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create a store without a session limit
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(0)
    }

    /// Create a store holding at most `max_sessions` documents (0 = unlimited)
    #[must_use]
    pub fn with_limit(max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                next_subscriber_id: AtomicU64::new(1),
                max_sessions,
            }),
        }
    }

    #[must_use]
    pub fn from_config(config: &SignalingConfig) -> Self {
        Self::with_limit(config.max_sessions)
    }

    fn next_subscriber_id(&self) -> u64 {
        self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of session documents currently held
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Snapshot of store statistics
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            sessions: self.inner.sessions.len(),
            ..StoreStats::default()
        };
        for entry in self.inner.sessions.iter() {
            if !entry.doc.status.is_terminal() {
                stats.live_sessions += 1;
            }
            stats.subscribers += entry.subscriber_count();
        }
        stats
    }

    /// Remove terminal sessions not touched for longer than `ttl`.
    ///
    /// Document subscribers of a removed session receive `None` and their feed
    /// is closed.
    pub fn sweep_expired(&self, ttl: Duration) -> Vec<SessionId> {
        let cutoff = now_millis() - i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expired: Vec<SessionId> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.doc.status.is_terminal() && entry.updated_at < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        for id in &expired {
            if let Some((_, entry)) = self.inner.sessions.remove(id) {
                for sub in &entry.doc_subscribers {
                    let _ = sub.tx.send(None);
                }
            }
        }

        if !expired.is_empty() {
            info!(removed = expired.len(), "Swept expired cast sessions");
        }
        expired
    }

    /// Spawn the periodic sweep; the task ends when the store is dropped
    pub fn start_cleanup_task(&self, interval: Duration, ttl: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("Signaling store dropped, cleanup task exiting");
                    break;
                };
                let store = Self { inner };
                store.sweep_expired(ttl);
            }
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("sessions", &self.inner.sessions.len())
            .field("max_sessions", &self.inner.max_sessions)
            .finish()
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_session(&self, session: CastSession) -> Result<SessionId> {
        if self.inner.max_sessions > 0 && self.inner.sessions.len() >= self.inner.max_sessions {
            warn!(
                current = self.inner.sessions.len(),
                max = self.inner.max_sessions,
                "Session limit reached"
            );
            return Err(Error::StoreUnavailable(
                "maximum number of cast sessions reached".to_string(),
            ));
        }

        let id = SessionId::new();
        self.inner
            .sessions
            .insert(id.clone(), SessionEntry::new(session));
        debug!(session_id = %id, "Cast session document created");
        Ok(id)
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<CastSession>> {
        Ok(self.inner.sessions.get(id).map(|entry| entry.doc.clone()))
    }

    async fn update_session(&self, id: &SessionId, patch: SessionPatch) -> Result<CastSession> {
        let mut entry = self
            .inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("cast session {id}")))?;

        entry.doc.apply(patch);
        entry.updated_at = now_millis();
        entry.publish_doc();
        Ok(entry.doc.clone())
    }

    async fn subscribe_session(&self, id: &SessionId) -> Result<Subscription<Option<CastSession>>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let Some(mut entry) = self.inner.sessions.get_mut(id) else {
            // Missing document: deliver `None` once and close the feed
            let _ = tx.send(None);
            return Ok(Subscription::detached(rx));
        };

        let subscriber_id = self.next_subscriber_id();
        let _ = tx.send(Some(entry.doc.clone()));
        entry.doc_subscribers.push(Subscriber {
            id: subscriber_id,
            tx,
        });
        drop(entry);

        let weak = Arc::downgrade(&self.inner);
        let session_id = id.clone();
        Ok(Subscription::new(rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_doc_subscriber(&session_id, subscriber_id);
            }
        }))
    }

    async fn append_candidate(
        &self,
        id: &SessionId,
        origin: CandidateOrigin,
        candidate: IceCandidate,
    ) -> Result<IceCandidateRecord> {
        let mut entry = self
            .inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("cast session {id}")))?;

        let (records, subscribers) = entry.candidates_mut(origin);
        let record = IceCandidateRecord {
            session_id: id.clone(),
            origin,
            sequence: records.len() as u64,
            candidate,
        };
        records.push(record.clone());
        subscribers.retain(|sub| sub.deliver(&record));
        entry.updated_at = now_millis();

        Ok(record)
    }

    async fn subscribe_candidates(
        &self,
        id: &SessionId,
        origin: CandidateOrigin,
    ) -> Result<Subscription<IceCandidateRecord>> {
        let mut entry = self
            .inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("cast session {id}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber_id = self.next_subscriber_id();

        let (records, subscribers) = entry.candidates_mut(origin);
        // Replay under the same lock so nothing is missed or doubled
        for record in records.iter() {
            let _ = tx.send(record.clone());
        }
        subscribers.push(Subscriber {
            id: subscriber_id,
            tx,
        });
        drop(entry);

        let weak = Arc::downgrade(&self.inner);
        let session_id = id.clone();
        Ok(Subscription::new(rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_candidate_subscriber(&session_id, origin, subscriber_id);
            }
        }))
    }
}
