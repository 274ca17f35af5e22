//! Per-peer outbound rate limiter.
//!
//! Each peer gets an independent fixed window: one accepted send, then
//! every further send to that peer is refused until the window has
//! elapsed since the accepted one. Refused sends do not move the
//! window. Idle entries are swept periodically.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use peerchat_types::{PeerChatError, PeerId, Result};

/// Minimum interval between cleanup sweeps.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Thread-safe per-peer window limiter.
pub struct RateLimiter {
    inner: Mutex<RateLimiterInner>,
    window: Duration,
}

/// Interior mutable state behind the mutex.
struct RateLimiterInner {
    last_accepted: HashMap<PeerId, Instant>,
    last_cleanup: Instant,
}

impl RateLimiter {
    /// Creates a limiter allowing one send per peer per `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            inner: Mutex::new(RateLimiterInner {
                last_accepted: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
            window,
        }
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Checks and records a send to `peer` now.
    pub fn check(&self, peer: &PeerId) -> Result<()> {
        self.check_at(peer, Instant::now())
    }

    /// Checks and records a send to `peer` at `now`.
    ///
    /// Returns [`PeerChatError::RateLimited`] if the previous accepted
    /// send to `peer` is less than one window old.
    pub fn check_at(&self, peer: &PeerId, now: Instant) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| PeerChatError::RateLimited {
            reason: "rate limiter lock poisoned".into(),
        })?;

        self.maybe_cleanup(&mut inner, now);

        if let Some(last) = inner.last_accepted.get(peer) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.window {
                return Err(PeerChatError::RateLimited {
                    reason: format!(
                        "{peer} was sent to {}ms ago (window {}ms)",
                        elapsed.as_millis(),
                        self.window.as_millis(),
                    ),
                });
            }
        }

        inner.last_accepted.insert(peer.clone(), now);
        Ok(())
    }

    /// Forgets `peer`, e.g. once its session is gone.
    pub fn forget(&self, peer: &PeerId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.last_accepted.remove(peer);
        }
    }

    /// Number of peers currently tracked.
    pub fn tracked_peers(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.last_accepted.len())
            .unwrap_or(0)
    }

    fn maybe_cleanup(&self, inner: &mut RateLimiterInner, now: Instant) {
        if now.saturating_duration_since(inner.last_cleanup) < CLEANUP_INTERVAL {
            return;
        }
        inner.last_cleanup = now;
        let window = self.window;
        inner
            .last_accepted
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
