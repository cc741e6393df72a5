//! Per-session settings agreed on when a session starts.
//!
//! A start request records the beacon size and compression threshold that the client was told to
//! use. Push requests of the same session read them back to size their body ceiling. Sessions
//! without an entry, including sessions started on another instance, get the configured
//! defaults.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hashbrown::HashMap;
use parking_lot::RwLock;
use priority_queue::PriorityQueue;
use reel_ids::SessionId;
use reel_statsd::metric;
use serde::Serialize;

use crate::statsd::{ReelCounters, ReelGauges};

const SHARDS: usize = 16;

/// Settings a client negotiated for its session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiatedSettings {
    /// Maximum size of a single batch pushed by the client.
    pub beacon_size_limit: usize,
    /// Batches larger than this are compressed by the client.
    pub compression_threshold: usize,
}

/// Sessions of one shard, indexed by id and by expiry.
#[derive(Debug, Default)]
struct Shard {
    settings: HashMap<SessionId, NegotiatedSettings>,
    expiry: PriorityQueue<SessionId, Reverse<i64>>,
}

impl Shard {
    fn len(&self) -> usize {
        self.settings.len()
    }

    fn insert(&mut self, id: SessionId, settings: NegotiatedSettings, expires_at: i64) {
        self.settings.insert(id, settings);
        self.expiry.push(id, Reverse(expires_at));
    }

    /// Removes the session expiring first.
    fn pop_oldest(&mut self) -> Option<SessionId> {
        let (id, _) = self.expiry.pop()?;
        self.settings.remove(&id);
        Some(id)
    }

    /// Removes all sessions expired at `now`.
    fn purge(&mut self, now: i64) -> usize {
        let mut removed = 0;
        while self
            .expiry
            .peek()
            .is_some_and(|(_, Reverse(expires_at))| *expires_at <= now)
        {
            self.pop_oldest();
            removed += 1;
        }
        removed
    }
}

/// A bounded, sharded map from session to [`NegotiatedSettings`].
#[derive(Debug)]
pub struct NegotiationStore {
    shards: Box<[RwLock<Shard>]>,
    shard_capacity: usize,
    default: NegotiatedSettings,
}

impl NegotiationStore {
    /// Creates a store holding up to roughly `capacity` sessions.
    pub fn new(default: NegotiatedSettings, capacity: usize) -> Self {
        let shards = (0..SHARDS).map(|_| RwLock::default()).collect();

        Self {
            shards,
            shard_capacity: capacity.div_ceil(SHARDS).max(1),
            default,
        }
    }

    /// The settings of sessions without an entry.
    pub fn default_settings(&self) -> NegotiatedSettings {
        self.default
    }

    fn shard(&self, id: SessionId) -> &RwLock<Shard> {
        // Mix the timestamp into the sequence, which is zero for most sessions.
        let value = id.value();
        let index = ((value >> 22) ^ value) as usize % SHARDS;
        &self.shards[index]
    }

    /// Returns the settings of a session, or the defaults.
    pub fn get(&self, id: SessionId) -> NegotiatedSettings {
        self.shard(id)
            .read()
            .settings
            .get(&id)
            .copied()
            .unwrap_or(self.default)
    }

    /// Records the settings of a session until `expires_at` (unix milliseconds).
    pub fn set(&self, id: SessionId, settings: NegotiatedSettings, expires_at: i64) {
        self.set_at(id, settings, expires_at, Utc::now().timestamp_millis());
    }

    fn set_at(&self, id: SessionId, settings: NegotiatedSettings, expires_at: i64, now: i64) {
        let mut shard = self.shard(id).write();

        if !shard.settings.contains_key(&id) && shard.len() >= self.shard_capacity {
            shard.purge(now);

            if shard.len() >= self.shard_capacity && shard.pop_oldest().is_some() {
                metric!(counter(ReelCounters::NegotiationEvicted) += 1);
            }
        }

        shard.insert(id, settings, expires_at);
    }

    /// Number of sessions with recorded settings.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all entries that expired at `now` and returns how many were removed.
    pub fn purge_expired(&self, now: i64) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            removed += shard.write().purge(now);
        }

        metric!(gauge(ReelGauges::NegotiationSize) = self.len() as u64);
        removed
    }

    /// Purges expired entries every `interval` until the runtime shuts down.
    pub async fn purge_periodically(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let removed = self.purge_expired(Utc::now().timestamp_millis());
            if removed > 0 {
                reel_log::debug!(removed, "purged expired negotiation entries");
            }
        }
    }
}
