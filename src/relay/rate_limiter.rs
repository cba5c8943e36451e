//! Admission throttling using the governor crate

use crate::config::RateLimitConfig;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    nanos::Nanos,
    state::{keyed::ShrinkableKeyedStateStore, StateStore},
    Quota, RateLimiter,
};
use parking_lot::Mutex;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

type KeyedLimiter = RateLimiter<BucketKey, BucketStore, DefaultClock>;

/// A rejected admission, with the time until a token is available
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimited {
    pub key: String,
    /// Configured requests per minute for the exhausted bucket
    pub limit: u32,
    pub retry_after: Duration,
}

/// Bucket lookup. A peek measures the bucket without spending from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    name: String,
    peek: bool,
}

/// Theoretical arrival times per bucket name
#[derive(Default)]
struct BucketStore(DashMap<String, Nanos>);

impl StateStore for BucketStore {
    type Key = BucketKey;

    fn measure_and_replace<T, F, E>(&self, key: &Self::Key, f: F) -> Result<T, E>
    where
        F: Fn(Option<Nanos>) -> Result<(T, Nanos), E>,
    {
        if key.peek {
            let tat = self.0.get(&key.name).map(|tat| *tat);
            return f(tat).map(|(outcome, _)| outcome);
        }

        // The entry holds its shard lock until the new state is written
        match self.0.entry(key.name.clone()) {
            Entry::Occupied(mut entry) => {
                let (outcome, tat) = f(Some(*entry.get()))?;
                entry.insert(tat);
                Ok(outcome)
            }
            Entry::Vacant(entry) => {
                let (outcome, tat) = f(None)?;
                entry.insert(tat);
                Ok(outcome)
            }
        }
    }
}

impl ShrinkableKeyedStateStore<BucketKey> for BucketStore {
    fn retain_recent(&self, drop_below: Nanos) {
        self.0.retain(|_, tat| *tat >= drop_below);
    }

    fn shrink_to_fit(&self) {
        self.0.shrink_to_fit();
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct Bucket {
    limiter: KeyedLimiter,
    per_minute: u32,
    scope: &'static str,
}

/// Token buckets keyed per peer and per recipient, plus a separate
/// per-recipient bucket for onward forwarding.
///
/// A push is admitted only when every bucket it draws from has a token;
/// a rejection spends nothing.
pub struct AdmissionLimiter {
    per_peer: Option<Bucket>,
    per_recipient: Option<Bucket>,
    forward: Option<Bucket>,
    admission: Mutex<()>,
    clock: DefaultClock,
}

impl AdmissionLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self::unlimited();
        }

        let clock = DefaultClock::default();
        let build = |per_minute: u32, scope: &'static str| -> Option<Bucket> {
            let rate = NonZeroU32::new(per_minute)?;
            let burst = NonZeroU32::new(config.burst.max(1)).unwrap_or(rate);
            let quota = Quota::per_minute(rate).allow_burst(burst);
            Some(Bucket {
                limiter: RateLimiter::new(quota, BucketStore::default(), &clock),
                per_minute,
                scope,
            })
        };

        let per_peer = build(config.per_peer_per_minute, "peer");
        let per_recipient = build(config.per_recipient_per_minute, "recipient");
        let forward = build(config.per_recipient_per_minute, "forward");

        Self {
            per_peer,
            per_recipient,
            forward,
            admission: Mutex::new(()),
            clock,
        }
    }

    /// Create a limiter that admits everything
    pub fn unlimited() -> Self {
        Self {
            per_peer: None,
            per_recipient: None,
            forward: None,
            admission: Mutex::new(()),
            clock: DefaultClock::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.per_peer.is_some() || self.per_recipient.is_some()
    }

    /// Take a token from the bucket of `peer`
    pub fn check_peer(&self, peer: &str) -> Result<(), RateLimited> {
        let _admission = self.admission.lock();
        self.take(self.per_peer.as_ref(), peer, false)
    }

    /// Take a token from the bucket of `recipient`
    pub fn check_recipient(&self, recipient: &str) -> Result<(), RateLimited> {
        let _admission = self.admission.lock();
        self.take(self.per_recipient.as_ref(), recipient, false)
    }

    /// Take a token from the forwarding bucket of `recipient`
    pub fn check_forward(&self, recipient: &str) -> Result<(), RateLimited> {
        let _admission = self.admission.lock();
        self.take(self.forward.as_ref(), recipient, false)
    }

    /// Admission for committing a push from `peer` addressed to `recipient`.
    ///
    /// Both buckets are peeked before either is charged.
    pub fn check_push(&self, peer: &str, recipient: &str) -> Result<(), RateLimited> {
        let _admission = self.admission.lock();
        self.take(self.per_recipient.as_ref(), recipient, true)?;
        self.take(self.per_peer.as_ref(), peer, true)?;
        self.take(self.per_recipient.as_ref(), recipient, false)?;
        self.take(self.per_peer.as_ref(), peer, false)
    }

    fn take(&self, bucket: Option<&Bucket>, key: &str, peek: bool) -> Result<(), RateLimited> {
        let Some(bucket) = bucket else {
            return Ok(());
        };

        let lookup = BucketKey {
            name: key.to_string(),
            peek,
        };
        match bucket.limiter.check_key(&lookup) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let retry_after = not_until.wait_time_from(self.clock.now());
                debug!(scope = bucket.scope, key, ?retry_after, "rate limit exceeded");
                Err(RateLimited {
                    key: format!("{}:{}", bucket.scope, key),
                    limit: bucket.per_minute,
                    retry_after,
                })
            }
        }
    }

    /// Forget buckets that have fully refilled
    pub fn shrink(&self) {
        for bucket in [&self.per_peer, &self.per_recipient, &self.forward]
            .into_iter()
            .flatten()
        {
            bucket.limiter.retain_recent();
            bucket.limiter.shrink_to_fit();
        }
    }
}

impl Default for AdmissionLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
