//! Two-tier request rate limiting built atop `governor`.
//!
//! Every request first draws from a single global token bucket, then from a
//! bucket owned by the calling client. Client buckets live in a bounded table
//! guarded by a mutex that is only held for the lookup, the insert and the
//! occasional sweep; it is never held across an await point.
//!
//! The table is swept opportunistically during `check` (no timer task):
//! * when it has reached `max_clients`, entries idle for longer than
//!   `client_idle` are dropped; if that is not enough the least recently seen
//!   entry is evicted so the table never grows past the ceiling;
//! * when `client_idle` has elapsed since the previous sweep.
use std::{
    collections::HashMap,
    net::SocketAddr,
    num::NonZeroU32,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock, Reference},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};
use http::HeaderMap;
use thiserror::Error;

type DirectLimiter<C> =
    RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Header consulted for the original client address behind a load balancer.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Errors raised while building a limiter from configuration.
#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum RateLimitError {
    #[error("Rate limit requests per second must be a positive number, got {0}")]
    InvalidRate(f64),

    #[error("Rate limit burst must be greater than 0")]
    ZeroBurst,

    #[error("Rate limit client table ceiling must be greater than 0")]
    ZeroMaxClients,
}

/// Refill rate and capacity of one token bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketShape {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl BucketShape {
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
        }
    }

    /// Governor quota for this shape. Rates whose refill period is zero or
    /// does not fit in a `Duration` are rejected.
    pub fn quota(&self) -> Result<Quota, RateLimitError> {
        let rps = self.requests_per_second;
        if !rps.is_finite() || rps <= 0.0 {
            return Err(RateLimitError::InvalidRate(rps));
        }
        let burst = NonZeroU32::new(self.burst).ok_or(RateLimitError::ZeroBurst)?;

        // One token is replenished every 1/rps seconds.
        let period =
            Duration::try_from_secs_f64(1.0 / rps).map_err(|_| RateLimitError::InvalidRate(rps))?;
        Quota::with_period(period)
            .map(|quota| quota.allow_burst(burst))
            .ok_or(RateLimitError::InvalidRate(rps))
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Bucket every request draws from.
    pub global: BucketShape,
    /// Bucket created for each distinct client.
    pub client: BucketShape,
    /// Table size at which idle clients are swept.
    pub max_clients: usize,
    /// Time without requests after which a client entry may be dropped.
    pub client_idle: Duration,
}

/// Which bucket rejected the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Global,
    Client,
}

impl LimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitScope::Global => "global",
            LimitScope::Client => "client",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited {
        scope: LimitScope,
        retry_after: Duration,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

struct ClientEntry<C: Clock> {
    limiter: DirectLimiter<C>,
    last_seen: C::Instant,
}

struct ClientTable<C: Clock> {
    entries: HashMap<String, ClientEntry<C>>,
    last_sweep: C::Instant,
}

impl<C: Clock> ClientTable<C> {
    fn sweep_idle(&mut self, now: C::Instant, client_idle: Duration) {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| elapsed(now, entry.last_seen) <= client_idle);
        self.last_sweep = now;

        let evicted = before - self.entries.len();
        if evicted > 0 {
            tracing::debug!(
                evicted,
                remaining = self.entries.len(),
                "Evicted idle rate limit clients"
            );
        }
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

fn elapsed<I: Reference>(now: I, earlier: I) -> Duration {
    Duration::from(now.duration_since(earlier))
}

/// Global + per-client token bucket limiter.
pub struct GatewayRateLimiter<C: Clock + Clone = DefaultClock> {
    client_quota: Quota,
    clock: C,
    global: DirectLimiter<C>,
    clients: Mutex<ClientTable<C>>,
    max_clients: usize,
    client_idle: Duration,
}

impl GatewayRateLimiter<DefaultClock> {
    pub fn new(settings: &RateLimitSettings) -> Result<Self, RateLimitError> {
        Self::with_clock(settings, DefaultClock::default())
    }
}

impl<C: Clock + Clone> GatewayRateLimiter<C> {
    /// Build a limiter reading time from `clock`.
    pub fn with_clock(settings: &RateLimitSettings, clock: C) -> Result<Self, RateLimitError> {
        let global_quota = settings.global.quota()?;
        let client_quota = settings.client.quota()?;
        if settings.max_clients == 0 {
            return Err(RateLimitError::ZeroMaxClients);
        }

        tracing::info!(
            global_rps = settings.global.requests_per_second,
            global_burst = settings.global.burst,
            client_rps = settings.client.requests_per_second,
            client_burst = settings.client.burst,
            max_clients = settings.max_clients,
            client_idle_secs = settings.client_idle.as_secs(),
            "Creating gateway rate limiter"
        );

        let now = clock.now();
        Ok(Self {
            client_quota,
            global: RateLimiter::direct_with_clock(global_quota, clock.clone()),
            clients: Mutex::new(ClientTable {
                entries: HashMap::new(),
                last_sweep: now,
            }),
            clock,
            max_clients: settings.max_clients,
            client_idle: settings.client_idle,
        })
    }

    /// Decide whether a request from `client` may proceed, consuming one
    /// token from each bucket that admits it.
    pub fn check(&self, client: &str) -> RateDecision {
        let now = self.clock.now();

        if let Err(not_until) = self.global.check() {
            return RateDecision::Limited {
                scope: LimitScope::Global,
                retry_after: not_until.wait_time_from(now),
            };
        }

        let mut table = self.clients.lock().unwrap_or_else(PoisonError::into_inner);

        if table.entries.len() >= self.max_clients
            || elapsed(now, table.last_sweep) >= self.client_idle
        {
            table.sweep_idle(now, self.client_idle);
        }
        if table.entries.len() >= self.max_clients && !table.entries.contains_key(client) {
            table.evict_least_recent();
        }

        let entry = table
            .entries
            .entry(client.to_string())
            .or_insert_with(|| ClientEntry {
                limiter: RateLimiter::direct_with_clock(self.client_quota, self.clock.clone()),
                last_seen: now,
            });
        entry.last_seen = now;

        match entry.limiter.check() {
            Ok(()) => RateDecision::Allowed,
            Err(not_until) => RateDecision::Limited {
                scope: LimitScope::Client,
                retry_after: not_until.wait_time_from(now),
            },
        }
    }

    /// Number of clients currently holding a bucket.
    pub fn tracked_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

/// Identity used for per-client limiting: the first `X-Forwarded-For` hop if
/// present and non-empty, otherwise the peer IP without its port.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty());

    match (forwarded, peer) {
        (Some(first), _) => first.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use governor::clock::FakeRelativeClock;
    use http::HeaderValue;

    use super::*;

    fn settings(rps: f64, burst: u32) -> RateLimitSettings {
        RateLimitSettings {
            global: BucketShape::new(rps, burst),
            client: BucketShape::new(rps, burst),
            max_clients: 1_000,
            client_idle: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_same_client_exhausts_burst() {
        let clock = FakeRelativeClock::default();
        let limiter = GatewayRateLimiter::with_clock(&settings(2.0, 2), clock).unwrap();

        assert!(limiter.check("10.0.0.1").is_allowed());
        assert!(limiter.check("10.0.0.1").is_allowed());
        assert!(matches!(
            limiter.check("10.0.0.1"),
            RateDecision::Limited { .. }
        ));
    }

    #[test]
    fn test_global_bucket_gates_other_clients() {
        let clock = FakeRelativeClock::default();
        let limiter = GatewayRateLimiter::with_clock(&settings(2.0, 2), clock).unwrap();

        assert!(limiter.check("10.0.0.1").is_allowed());
        assert!(limiter.check("10.0.0.1").is_allowed());
        match limiter.check("10.0.0.2") {
            RateDecision::Limited { scope, retry_after } => {
                assert_eq!(scope, LimitScope::Global);
                assert!(retry_after > Duration::ZERO);
            }
            RateDecision::Allowed => panic!("global bucket should be exhausted"),
        }
    }

    #[test]
    fn test_client_bucket_limits_single_client() {
        let clock = FakeRelativeClock::default();
        let limiter = GatewayRateLimiter::with_clock(
            &RateLimitSettings {
                global: BucketShape::new(100.0, 100),
                ..settings(2.0, 2)
            },
            clock,
        )
        .unwrap();

        assert!(limiter.check("10.0.0.9").is_allowed());
        assert!(limiter.check("10.0.0.9").is_allowed());
        match limiter.check("10.0.0.9") {
            RateDecision::Limited { scope, retry_after } => {
                assert_eq!(scope, LimitScope::Client);
                assert!(retry_after <= Duration::from_millis(500));
            }
            RateDecision::Allowed => panic!("client bucket should be exhausted"),
        }
        assert!(limiter.check("10.0.0.10").is_allowed());
    }

    #[test]
    fn test_tokens_refill_over_time() {
        let clock = FakeRelativeClock::default();
        let limiter = GatewayRateLimiter::with_clock(&settings(2.0, 2), clock.clone()).unwrap();

        assert!(limiter.check("c").is_allowed());
        assert!(limiter.check("c").is_allowed());
        assert!(!limiter.check("c").is_allowed());

        clock.advance(Duration::from_millis(500));
        assert!(limiter.check("c").is_allowed());
    }

    #[test]
    fn test_idle_clients_are_evicted_past_ceiling() {
        let clock = FakeRelativeClock::default();
        let limiter = GatewayRateLimiter::with_clock(
            &RateLimitSettings {
                max_clients: 4,
                client_idle: Duration::from_secs(1),
                ..settings(1_000.0, 1_000)
            },
            clock.clone(),
        )
        .unwrap();

        for i in 0..6 {
            assert!(limiter.check(&format!("10.0.0.{i}")).is_allowed());
        }
        assert!(limiter.tracked_clients() <= 4);

        clock.advance(Duration::from_secs(2));
        assert!(limiter.check("10.0.1.1").is_allowed());
        assert!(limiter.tracked_clients() < 4);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_periodic_sweep_below_ceiling() {
        let clock = FakeRelativeClock::default();
        let limiter = GatewayRateLimiter::with_clock(
            &RateLimitSettings {
                max_clients: 100,
                client_idle: Duration::from_secs(5),
                ..settings(1_000.0, 1_000)
            },
            clock.clone(),
        )
        .unwrap();

        limiter.check("a");
        limiter.check("b");
        clock.advance(Duration::from_secs(6));
        limiter.check("c");
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_invalid_settings() {
        assert_eq!(
            GatewayRateLimiter::new(&settings(0.0, 1)).err(),
            Some(RateLimitError::InvalidRate(0.0))
        );
        assert_eq!(
            GatewayRateLimiter::new(&settings(1.0, 0)).err(),
            Some(RateLimitError::ZeroBurst)
        );
        assert_eq!(
            GatewayRateLimiter::new(&settings(1e-20, 1)).err(),
            Some(RateLimitError::InvalidRate(1e-20))
        );
        assert_eq!(
            GatewayRateLimiter::new(&settings(1e20, 1)).err(),
            Some(RateLimitError::InvalidRate(1e20))
        );
        let mut cfg = settings(1.0, 1);
        cfg.max_clients = 0;
        assert_eq!(
            GatewayRateLimiter::new(&cfg).err(),
            Some(RateLimitError::ZeroMaxClients)
        );
    }

    #[test]
    fn test_client_key_prefers_forwarded_for() {
        let peer: SocketAddr = "192.168.1.20:53211".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, Some(peer)), "192.168.1.20");

        headers.insert(
            FORWARDED_FOR,
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.7");

        headers.insert(FORWARDED_FOR, HeaderValue::from_static(" , 10.0.0.1"));
        assert_eq!(client_key(&headers, Some(peer)), "192.168.1.20");

        assert_eq!(client_key(&HeaderMap::new(), None), "unknown");
    }
}
