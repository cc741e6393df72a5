//! Admission sampling for new sessions.
//!
//! Every project configures a [`SampleRate`] between 0 and 100. When a client attempts to start a
//! new session, the gateway asks an [`Admission`] whether the session should be captured. The
//! decision is made once per session birth and never per event.
//!
//! A rejected session is not an error. It is a regular outcome that callers report to the client
//! as "not sampled".

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::fmt;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

/// The upper bound of the sample rate, admitting every session.
const MAX_RATE: u8 = 100;

/// Percentage of new sessions that are admitted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SampleRate(u8);

impl SampleRate {
    /// Admits no sessions.
    pub const NONE: Self = Self(0);
    /// Admits all sessions.
    pub const ALL: Self = Self(MAX_RATE);

    /// Creates a sample rate from a percentage in `0..=100`.
    pub fn new(percent: u8) -> Result<Self, InvalidSampleRate> {
        if percent > MAX_RATE {
            return Err(InvalidSampleRate(percent));
        }
        Ok(Self(percent))
    }

    /// Returns the percentage of admitted sessions.
    pub fn percent(self) -> u8 {
        self.0
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::ALL
    }
}

impl TryFrom<u8> for SampleRate {
    type Error = InvalidSampleRate;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SampleRate> for u8 {
    fn from(value: SampleRate) -> Self {
        value.0
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Error returned for sample rates above 100.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("sample rate must be between 0 and 100, got {0}")]
pub struct InvalidSampleRate(u8);

/// Decides whether a new session is captured.
pub trait Admission: Send + Sync + fmt::Debug {
    /// Returns `true` if a session under the given rate is admitted.
    fn admit(&self, rate: SampleRate) -> bool;
}

/// Draws a number in `[0, 100)` and admits iff it is below the rate.
fn sampling_match<R: Rng>(rng: &mut R, rate: SampleRate) -> bool {
    let random_number = rng.random_range(0..MAX_RATE);
    reel_log::trace!(
        sample_rate = rate.percent(),
        random_number,
        "applying sampling to new session"
    );

    if random_number >= rate.percent() {
        reel_log::trace!("dropping session outside of the sample rate");
        false
    } else {
        reel_log::trace!("keeping session within the sample rate");
        true
    }
}

/// Admission backed by the thread-local random number generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomAdmission;

impl Admission for RandomAdmission {
    fn admit(&self, rate: SampleRate) -> bool {
        sampling_match(&mut rand::rng(), rate)
    }
}

/// Admission backed by a seeded generator, producing reproducible decisions.
#[derive(Debug)]
pub struct SeededAdmission {
    rng: Mutex<Pcg32>,
}

impl SeededAdmission {
    /// Creates an admission gate from a fixed seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(Pcg32::seed_from_u64(seed)),
        }
    }
}

impl Admission for SeededAdmission {
    fn admit(&self, rate: SampleRate) -> bool {
        sampling_match(&mut *self.rng.lock(), rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIALS: usize = 10_000;

    fn count(admission: &dyn Admission, rate: SampleRate) -> usize {
        (0..TRIALS).filter(|_| admission.admit(rate)).count()
    }

    #[test]
    fn test_rate_bounds() {
        assert!(SampleRate::new(0).is_ok());
        assert!(SampleRate::new(100).is_ok());
        assert_eq!(SampleRate::new(101), Err(InvalidSampleRate(101)));
    }

    #[test]
    fn test_rate_serde() {
        let rate: SampleRate = serde_json::from_str("42").unwrap();
        assert_eq!(rate.percent(), 42);
        assert_eq!(serde_json::to_string(&rate).unwrap(), "42");
        assert!(serde_json::from_str::<SampleRate>("150").is_err());
    }

    #[test]
    fn test_never_admits_zero() {
        assert_eq!(count(&RandomAdmission, SampleRate::NONE), 0);
        assert_eq!(count(&SeededAdmission::new(7), SampleRate::NONE), 0);
    }

    #[test]
    fn test_always_admits_hundred() {
        assert_eq!(count(&RandomAdmission, SampleRate::ALL), TRIALS);
        assert_eq!(count(&SeededAdmission::new(7), SampleRate::ALL), TRIALS);
    }

    #[test]
    fn test_half_admits_about_half() {
        let rate = SampleRate::new(50).unwrap();
        for seed in [1, 2, 3, 42, 1337] {
            let admitted = count(&SeededAdmission::new(seed), rate);
            assert!((4500..=5500).contains(&admitted), "seed {seed}: {admitted}");
        }
    }

    #[test]
    fn test_seeded_reproducible() {
        let rate = SampleRate::new(30).unwrap();
        let first = SeededAdmission::new(99);
        let second = SeededAdmission::new(99);
        for _ in 0..1000 {
            assert_eq!(first.admit(rate), second.admit(rate));
        }
    }
}
