//! Per-client sliding-window rate limiting

use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// One limit: at most `max_requests` in any `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

/// Sliding log of request instants per client address.
///
/// Check-and-record happens under one lock, so concurrent requests from the same
/// client can never both take the last slot.
pub struct RateLimiter {
    requests: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
    limits: Vec<RateLimit>,
    horizon: Duration,
}

impl RateLimiter {
    pub fn new(limits: Vec<RateLimit>) -> Self {
        let horizon = limits.iter().map(|l| l.window).max().unwrap_or(MINUTE);
        Self {
            requests: Mutex::new(HashMap::new()),
            limits,
            horizon,
        }
    }

    /// Per-minute limit plus an optional per-hour limit
    pub fn per_minute(requests_per_minute: u32, requests_per_hour: Option<u32>) -> Self {
        let mut limits = vec![RateLimit { max_requests: requests_per_minute, window: MINUTE }];
        if let Some(per_hour) = requests_per_hour {
            limits.push(RateLimit { max_requests: per_hour, window: HOUR });
        }
        Self::new(limits)
    }

    /// Record a request from `client` now, or reject it
    pub fn check(&self, client: IpAddr) -> Result<()> {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&self, client: IpAddr, now: Instant) -> Result<()> {
        let mut requests = self.lock();
        let history = requests.entry(client).or_default();

        let horizon = self.horizon;
        while let Some(oldest) = history.front() {
            if now.saturating_duration_since(*oldest) >= horizon {
                history.pop_front();
            } else {
                break;
            }
        }

        let mut retry_after: Option<Duration> = None;
        for limit in &self.limits {
            let in_window: Vec<&Instant> = history
                .iter()
                .filter(|t| now.saturating_duration_since(**t) < limit.window)
                .collect();

            if in_window.len() as u64 >= limit.max_requests as u64 {
                // The slot frees up once the oldest request in the window ages out
                let wait = in_window
                    .first()
                    .map(|oldest| limit.window.saturating_sub(now.saturating_duration_since(**oldest)))
                    .unwrap_or(limit.window);
                retry_after = Some(retry_after.map_or(wait, |current| current.max(wait)));
            }
        }

        if let Some(retry_after) = retry_after {
            if history.is_empty() {
                requests.remove(&client);
            }
            return Err(Error::RateLimited { retry_after });
        }

        history.push_back(now);
        Ok(())
    }

    /// Drop clients with no request inside the longest window; returns how many were dropped
    pub fn evict_stale(&self) -> usize {
        self.evict_stale_at(Instant::now())
    }

    pub fn evict_stale_at(&self, now: Instant) -> usize {
        let horizon = self.horizon;
        let mut requests = self.lock();
        let before = requests.len();
        requests.retain(|_, history| {
            history
                .back()
                .map(|latest| now.saturating_duration_since(*latest) < horizon)
                .unwrap_or(false)
        });
        before - requests.len()
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, VecDeque<Instant>>> {
        // A panic while holding the lock leaves the map usable
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
