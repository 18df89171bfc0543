//! Signaling store
//!
//! The real-time document store that both sides of a cast session write to.
//! One document per session plus two append-only candidate collections
//! (sender-origin and receiver-origin).

mod memory;

pub use memory::{MemoryStore, StoreStats};

use async_trait::async_trait;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::models::{
    CandidateOrigin, CastSession, IceCandidate, IceCandidateRecord, SessionId, SessionPatch,
};
use crate::Result;

/// Document store primitives used for cast signaling
#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Insert a new session document and return its generated ID
    async fn create_session(&self, session: CastSession) -> Result<SessionId>;

    /// Read the current document, `None` if it does not exist
    async fn get_session(&self, id: &SessionId) -> Result<Option<CastSession>>;

    /// Merge fields into an existing document and return the merged result
    async fn update_session(&self, id: &SessionId, patch: SessionPatch) -> Result<CastSession>;

    /// Subscribe to a document.
    ///
    /// The current document (or `None`) is delivered immediately, then the
    /// full document again after every mutation, in write order.
    async fn subscribe_session(&self, id: &SessionId) -> Result<Subscription<Option<CastSession>>>;

    /// Append a candidate to one origin's collection
    async fn append_candidate(
        &self,
        id: &SessionId,
        origin: CandidateOrigin,
        candidate: IceCandidate,
    ) -> Result<IceCandidateRecord>;

    /// Subscribe to one origin's candidates.
    ///
    /// Candidates already appended are replayed first, then new ones follow in
    /// append order. Each candidate is delivered exactly once per subscription.
    async fn subscribe_candidates(
        &self,
        id: &SessionId,
        origin: CandidateOrigin,
    ) -> Result<Subscription<IceCandidateRecord>>;
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Live subscription handle.
///
/// Dropping the handle (or calling [`Subscription::unsubscribe`]) detaches it
/// from the store.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    cancel: Option<CancelFn>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription with nothing to detach from
    #[must_use]
    pub const fn detached(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx, cancel: None }
    }

    /// Wait for the next delivery; `None` once the store closed the feed
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Detach from the store
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        self.rx.close();
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T> Unpin for Subscription<T> {}

impl<T> futures::Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.cancel.is_some())
            .finish()
    }
}
