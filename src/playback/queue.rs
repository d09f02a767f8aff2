//! Bounded per-call track queue and radio bookkeeping.

use crate::error::{HuddleError, Result};
use crate::pipeline::messages::UserId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// A pending track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedTrack {
    /// What the user asked for.
    pub query: String,
    /// Playable or resolvable source reference.
    pub url: String,
    /// Display title.
    pub title: String,
    /// Who asked, when known.
    pub requester: Option<UserId>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedTrack {
    pub fn new(query: &str, url: &str, title: &str, requester: Option<UserId>) -> Self {
        Self {
            query: query.to_owned(),
            url: url.to_owned(),
            title: title.to_owned(),
            requester,
            enqueued_at: Utc::now(),
        }
    }
}

/// FIFO queue that rejects pushes beyond its capacity.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<QueuedTrack>,
    capacity: usize,
}

impl TrackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Append a track.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Rejected`] when the queue is full; the queue is
    /// left unchanged.
    pub fn push(&mut self, track: QueuedTrack) -> Result<usize> {
        if self.is_full() {
            return Err(HuddleError::Rejected(format!(
                "queue is full ({} tracks)",
                self.capacity
            )));
        }
        self.items.push_back(track);
        Ok(self.items.len())
    }

    pub fn pop(&mut self) -> Option<QueuedTrack> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Free slots left.
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.items.len())
    }

    pub fn snapshot(&self) -> Vec<QueuedTrack> {
        self.items.iter().cloned().collect()
    }
}

/// Present only while a call is in radio mode.
#[derive(Debug, Clone)]
pub struct RadioState {
    pub seed: String,
    pub requester: Option<UserId>,
    pub last_refill: Option<DateTime<Utc>>,
    /// Number of refills done so far, including the seeding batch.
    pub refills: u32,
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
    history_limit: usize,
}

impl RadioState {
    pub fn new(seed: &str, requester: Option<UserId>, history_limit: usize) -> Self {
        Self {
            seed: seed.to_owned(),
            requester,
            last_refill: None,
            refills: 0,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Record a canonical URL. Returns `false` if it was already seen.
    pub fn remember(&mut self, canonical: String) -> bool {
        if self.seen.contains(&canonical) {
            return false;
        }
        self.seen.insert(canonical.clone());
        self.seen_order.push_back(canonical);
        while self.seen_order.len() > self.history_limit {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn has_seen(&self, canonical: &str) -> bool {
        self.seen.contains(canonical)
    }
}
