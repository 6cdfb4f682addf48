//! Rate-limit aware wrapper around a [`MetadataService`].
//!
//! Every throttled answer is followed by a sleep drawn uniformly from
//! `[1s, 60s)` and an identical retry. The loop ends on the first real answer,
//! on a hard error, when the [`RetryPolicy`] runs out, or when the user hits
//! Ctrl+C.

use rand::Rng;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::interrupt::Interrupt;
use crate::metadata::VideoMetadata;
use crate::service::{Lookup, MetadataService};

pub const MIN_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Bounds on how long a throttled request keeps being retried. `None` in a
/// field means that dimension is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub max_total_backoff: Option<Duration>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            max_total_backoff: None,
        }
    }
}

/// Draws one backoff delay from `[MIN_BACKOFF, MAX_BACKOFF)`.
pub fn backoff_delay<R: Rng>(rng: &mut R) -> Duration {
    Duration::from_secs_f64(rng.random_range(MIN_BACKOFF.as_secs_f64()..MAX_BACKOFF.as_secs_f64()))
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread, waking early once the interrupt is raised.
#[derive(Debug, Clone, Default)]
pub struct ThreadSleeper {
    interrupt: Interrupt,
}

impl ThreadSleeper {
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() && !self.interrupt.is_raised() {
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }
}

pub struct Fetcher<S, Z = ThreadSleeper> {
    service: S,
    sleeper: Z,
    policy: RetryPolicy,
    interrupt: Interrupt,
}

impl<S: MetadataService, Z: Sleeper> Fetcher<S, Z> {
    pub fn new(service: S, sleeper: Z, policy: RetryPolicy, interrupt: Interrupt) -> Self {
        Self {
            service,
            sleeper,
            policy,
            interrupt,
        }
    }

    /// Resolves one reference (URL or bare post id) to its metadata.
    pub fn fetch(&self, reference: &str) -> Result<VideoMetadata, FetchError> {
        let reference = reference.trim();
        self.with_retry(reference, |service| service.lookup_video(reference))
    }

    /// Runs `request` until the service stops answering with a rate limit.
    pub fn with_retry<T>(
        &self,
        label: &str,
        mut request: impl FnMut(&S) -> Result<Lookup<T>, FetchError>,
    ) -> Result<T, FetchError> {
        let mut attempts = 0u32;
        let mut slept = Duration::ZERO;
        loop {
            if self.interrupt.is_raised() {
                return Err(FetchError::Interrupted);
            }
            attempts += 1;
            debug!(reference = label, attempt = attempts, "metadata request");
            if let Lookup::Ready(value) = request(&self.service)? {
                return Ok(value);
            }

            if self
                .policy
                .max_attempts
                .is_some_and(|max| attempts >= max)
            {
                return Err(FetchError::RetriesExhausted { attempts });
            }
            let delay = backoff_delay(&mut rand::rng());
            if self
                .policy
                .max_total_backoff
                .is_some_and(|budget| slept + delay > budget)
            {
                return Err(FetchError::RetriesExhausted { attempts });
            }

            warn!(
                reference = label,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "rate limited, retrying"
            );
            self.sleeper.sleep(delay);
            slept += delay;
        }
    }
}
