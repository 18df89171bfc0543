//! Remote candidate queue
//!
//! Remote ICE candidates cannot be applied before the remote description is
//! set. Candidates arriving earlier wait here and are released, in arrival
//! order, once the description is in place.

use std::collections::VecDeque;
use tracing::warn;

use crate::models::IceCandidate;
use crate::{Error, Result};

#[derive(Debug)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
    remote_description_set: bool,
    limit: usize,
    rejected: u64,
}

impl CandidateQueue {
    /// Queue holding at most `limit` pending candidates
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            remote_description_set: false,
            limit: limit.max(1),
            rejected: 0,
        }
    }

    /// Hand a candidate to the queue.
    ///
    /// Returns it back when it can be applied right away, otherwise holds it.
    /// A full queue rejects the candidate with `InvalidState`.
    pub fn push(&mut self, candidate: IceCandidate) -> Result<Option<IceCandidate>> {
        if self.remote_description_set {
            return Ok(Some(candidate));
        }

        if self.pending.len() >= self.limit {
            self.rejected += 1;
            warn!(
                limit = self.limit,
                rejected = self.rejected,
                "Pending candidate queue full, rejecting candidate"
            );
            return Err(Error::InvalidState(format!(
                "pending candidate queue full ({} held)",
                self.limit
            )));
        }

        self.pending.push_back(candidate);
        Ok(None)
    }

    /// Record that the remote description is set and drain held candidates
    pub fn mark_remote_description_set(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        self.pending.drain(..).collect()
    }

    /// Forget the remote description (renegotiation or teardown)
    pub fn reset(&mut self) {
        self.remote_description_set = false;
        self.pending.clear();
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.remote_description_set
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub const fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl Default for CandidateQueue {
    fn default() -> Self {
        Self::new(256)
    }
}
