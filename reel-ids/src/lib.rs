//! Clock-ordered 64-bit session identifiers.
//!
//! Every session gets a [`SessionId`] minted by an [`IdGenerator`]. Identifiers minted by the same
//! generator strictly increase, and the millisecond at which an identifier was minted can be
//! recovered from the identifier alone with [`extract_timestamp`]. No coordination between
//! processes is needed as long as every process runs with its own shard.
//!
//! # Layout
//!
//! ```text
//!  63                                  22 21        14 13             0
//! +--------------------------------------+------------+----------------+
//! | milliseconds since 2020-01-01 (42 b) | shard (8 b)| sequence (14 b)|
//! +--------------------------------------+------------+----------------+
//! ```
//!
//! The layout is persisted in tokens, partition keys and downstream storage. It must never change.
//!
//! # Example
//!
//! ```
//! use reel_ids::{IdGenerator, extract_timestamp};
//!
//! let generator = IdGenerator::new(3);
//! let id = generator.mint_at(1_700_000_000_000).unwrap();
//!
//! assert_eq!(extract_timestamp(id), 1_700_000_000_000);
//! assert_eq!(id.shard(), 3);
//! ```
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::cmp::Ordering;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Start of the identifier epoch, `2020-01-01T00:00:00Z` in unix milliseconds.
pub const EPOCH_MILLIS: i64 = 1_577_836_800_000;

const TIMESTAMP_BITS: u32 = 42;
const SHARD_BITS: u32 = 8;
const SEQUENCE_BITS: u32 = 14;

const SHARD_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + SHARD_BITS;

const SHARD_MASK: u64 = (1 << SHARD_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const MAX_OFFSET: i64 = (1 << TIMESTAMP_BITS) - 1;

/// Identifier of a session, unique across all generators with distinct shards.
///
/// Rendered as a decimal number wherever it is exposed to clients.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Wraps a raw identifier value.
    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier value.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns the unix timestamp in milliseconds at which this identifier was minted.
    pub fn timestamp(self) -> i64 {
        extract_timestamp(self)
    }

    /// Returns the shard of the generator that minted this identifier.
    pub fn shard(self) -> u8 {
        ((self.0 >> SHARD_SHIFT) & SHARD_MASK) as u8
    }

    /// Returns the per-millisecond sequence number of this identifier.
    pub fn sequence(self) -> u16 {
        (self.0 & SEQUENCE_MASK) as u16
    }

    /// Big-endian bytes, used as partition key.
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Returns the unix timestamp in milliseconds embedded in the given identifier.
///
/// This is the exact inverse of the encoding done by [`IdGenerator::mint_at`].
pub fn extract_timestamp(id: SessionId) -> i64 {
    (id.0 >> TIMESTAMP_SHIFT) as i64 + EPOCH_MILLIS
}

/// A source of wall-clock time in unix milliseconds.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current unix timestamp in milliseconds.
    fn now_millis(&self) -> i64;
}

/// The system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// An error returned when minting an identifier fails.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum IdError {
    /// The wall clock is behind the last minted timestamp.
    #[error("clock moved backwards from {last} to {now}")]
    ClockRegression {
        /// Timestamp of the last minted identifier.
        last: i64,
        /// The timestamp observed now.
        now: i64,
    },
    /// The timestamp lies before the epoch or beyond the 42 bit range.
    #[error("timestamp {0} cannot be encoded in a session id")]
    TimestampOutOfRange(i64),
    /// All sequence numbers of this millisecond have been handed out.
    #[error("sequence space exhausted at {0}")]
    SequenceExhausted(i64),
}

#[derive(Debug)]
struct State {
    last_timestamp: i64,
    sequence: u64,
}

/// Mints clock-ordered [`SessionId`]s.
///
/// The generator is safe to share between threads. Construct one per process and shard.
#[derive(Debug)]
pub struct IdGenerator<C = SystemClock> {
    shard: u8,
    clock: C,
    state: Mutex<State>,
}

impl IdGenerator {
    /// Creates a generator on the system clock.
    pub fn new(shard: u8) -> Self {
        Self::with_clock(shard, SystemClock)
    }
}

impl<C: Clock> IdGenerator<C> {
    /// Creates a generator reading time from the given clock.
    pub fn with_clock(shard: u8, clock: C) -> Self {
        Self {
            shard,
            clock,
            state: Mutex::new(State {
                last_timestamp: i64::MIN,
                sequence: 0,
            }),
        }
    }

    /// Returns the shard encoded into all identifiers of this generator.
    pub fn shard(&self) -> u8 {
        self.shard
    }

    /// Mints an identifier for the given unix timestamp in milliseconds.
    ///
    /// Fails with [`IdError::SequenceExhausted`] instead of wrapping when the millisecond has no
    /// sequence numbers left, and with [`IdError::ClockRegression`] when `now_millis` is smaller
    /// than the timestamp of the previously minted identifier.
    pub fn mint_at(&self, now_millis: i64) -> Result<SessionId, IdError> {
        let mut state = self.state.lock();
        self.next_id(&mut state, now_millis)
    }

    /// Mints an identifier for the current time of the clock.
    ///
    /// The clock is read while holding the generator state, so concurrent callers observe
    /// non-decreasing timestamps. Waits for the next millisecond if the current one is exhausted.
    pub fn mint(&self) -> Result<SessionId, IdError> {
        loop {
            let result = {
                let mut state = self.state.lock();
                let now_millis = self.clock.now_millis();
                self.next_id(&mut state, now_millis)
            };

            match result {
                Err(IdError::SequenceExhausted(exhausted)) => {
                    while self.clock.now_millis() <= exhausted {
                        std::thread::yield_now();
                    }
                }
                result => return result,
            }
        }
    }

    fn next_id(&self, state: &mut State, now_millis: i64) -> Result<SessionId, IdError> {
        let offset = now_millis
            .checked_sub(EPOCH_MILLIS)
            .filter(|offset| (0..=MAX_OFFSET).contains(offset))
            .ok_or(IdError::TimestampOutOfRange(now_millis))?;

        let sequence = match now_millis.cmp(&state.last_timestamp) {
            Ordering::Less => {
                return Err(IdError::ClockRegression {
                    last: state.last_timestamp,
                    now: now_millis,
                });
            }
            Ordering::Equal if state.sequence >= SEQUENCE_MASK => {
                return Err(IdError::SequenceExhausted(now_millis));
            }
            Ordering::Equal => state.sequence + 1,
            Ordering::Greater => 0,
        };

        state.last_timestamp = now_millis;
        state.sequence = sequence;

        Ok(SessionId(
            ((offset as u64) << TIMESTAMP_SHIFT) | (u64::from(self.shard) << SHARD_SHIFT) | sequence,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    /// Clock that advances by one millisecond every `step` reads.
    #[derive(Debug)]
    struct SteppingClock {
        reads: AtomicI64,
        step: i64,
    }

    impl Clock for SteppingClock {
        fn now_millis(&self) -> i64 {
            NOW + self.reads.fetch_add(1, Ordering::Relaxed) / self.step
        }
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let generator = IdGenerator::new(0);
        for ts in [EPOCH_MILLIS, NOW, NOW + 1, EPOCH_MILLIS + MAX_OFFSET] {
            let id = generator.mint_at(ts).unwrap();
            assert_eq!(extract_timestamp(id), ts);
        }
    }

    #[test]
    fn test_same_millisecond_increments_sequence() {
        let generator = IdGenerator::new(7);
        let first = generator.mint_at(NOW).unwrap();
        let second = generator.mint_at(NOW).unwrap();

        assert!(second > first);
        assert_eq!(first.sequence(), 0);
        assert_eq!(second.sequence(), 1);
        assert_eq!(second.shard(), 7);
        assert_eq!(second.timestamp(), NOW);
    }

    #[test]
    fn test_sequence_resets_on_new_millisecond() {
        let generator = IdGenerator::new(0);
        generator.mint_at(NOW).unwrap();
        generator.mint_at(NOW).unwrap();
        let next = generator.mint_at(NOW + 1).unwrap();
        assert_eq!(next.sequence(), 0);
    }

    #[test]
    fn test_sequence_exhaustion() {
        let generator = IdGenerator::new(0);
        for _ in 0..=SEQUENCE_MASK {
            generator.mint_at(NOW).unwrap();
        }
        assert_eq!(
            generator.mint_at(NOW),
            Err(IdError::SequenceExhausted(NOW))
        );
        // The next millisecond is available again.
        assert!(generator.mint_at(NOW + 1).is_ok());
    }

    #[test]
    fn test_mint_waits_for_next_millisecond() {
        let clock = SteppingClock {
            reads: AtomicI64::new(0),
            step: 20_000,
        };
        let generator = IdGenerator::with_clock(0, clock);

        let mut last = None;
        for _ in 0..(SEQUENCE_MASK + 10) {
            let id = generator.mint().unwrap();
            assert!(Some(id) > last);
            last = Some(id);
        }
        assert!(last.unwrap().timestamp() > NOW);
    }

    #[test]
    fn test_clock_regression() {
        let generator = IdGenerator::new(0);
        generator.mint_at(NOW).unwrap();
        assert_eq!(
            generator.mint_at(NOW - 1),
            Err(IdError::ClockRegression {
                last: NOW,
                now: NOW - 1
            })
        );
    }

    #[test]
    fn test_out_of_range() {
        let generator = IdGenerator::new(0);
        assert_eq!(
            generator.mint_at(EPOCH_MILLIS - 1),
            Err(IdError::TimestampOutOfRange(EPOCH_MILLIS - 1))
        );
        assert!(generator.mint_at(EPOCH_MILLIS + MAX_OFFSET + 1).is_err());
    }

    #[test]
    fn test_shards_never_collide() {
        let a = IdGenerator::new(1).mint_at(NOW).unwrap();
        let b = IdGenerator::new(2).mint_at(NOW).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.timestamp(), b.timestamp());
    }

    #[test]
    fn test_concurrent_minting_is_unique_and_ordered() {
        const THREADS: usize = 16;
        const PER_THREAD: usize = 50_000;

        let generator = Arc::new(IdGenerator::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let generator = Arc::clone(&generator);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let ids: Vec<_> = (0..PER_THREAD).map(|_| generator.mint()).collect();
                    ids.into_iter().collect::<Result<Vec<_>, _>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let ids = handle.join().unwrap().unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in ids {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), THREADS * PER_THREAD);
    }

    #[test]
    fn test_contended_clock_never_regresses() {
        // Every read advances the clock, so any read taken outside the lock would be stale by
        // the time another thread minted.
        let clock = SteppingClock {
            reads: AtomicI64::new(0),
            step: 1,
        };
        let generator = Arc::new(IdGenerator::with_clock(0, clock));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || (0..20_000).try_for_each(|_| generator.mint().map(drop)))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(()));
        }
    }

    #[test]
    fn test_display_and_parse() {
        let id = SessionId::from_u64(7_123_456_789_012_345_678);
        assert_eq!(id.to_string(), "7123456789012345678");
        assert_eq!("7123456789012345678".parse::<SessionId>().unwrap(), id);
        assert_eq!(serde_json::to_string(&id).unwrap(), "7123456789012345678");
    }
}
