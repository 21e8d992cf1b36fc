//! Short-TTL memoization of the executor readiness check.

use std::time::{Duration, Instant};

use crate::backend::PreflightReport;

#[derive(Debug, Clone)]
struct CachedPreflight {
    ready: bool,
    burner_role_granted: bool,
    message: String,
    expires_at: Instant,
}

/// Single-entry preflight cache with asymmetric TTL.
///
/// A ready executor is cached for the long TTL. A not-ready result is kept
/// only briefly so the check re-runs soon after remediation.
#[derive(Debug, Clone)]
pub struct PreflightCache {
    entry: Option<CachedPreflight>,
    ttl_ready: Duration,
    ttl_not_ready: Duration,
}

impl PreflightCache {
    pub fn new(ttl_ready: Duration, ttl_not_ready: Duration) -> Self {
        Self {
            entry: None,
            ttl_ready,
            ttl_not_ready,
        }
    }

    /// Cached result, if still fresh. The reconstructed report never
    /// carries a transaction hash.
    pub fn get(&self, now: Instant) -> Option<PreflightReport> {
        let entry = self.entry.as_ref()?;
        if now >= entry.expires_at {
            return None;
        }
        Some(PreflightReport {
            ready: entry.ready,
            burner_role_granted: entry.burner_role_granted,
            message: entry.message.clone(),
            tx_hash: None,
        })
    }

    /// Overwrite the entry with a fresh check.
    pub fn store(&mut self, report: &PreflightReport, now: Instant) {
        let ttl = if report.ready {
            self.ttl_ready
        } else {
            self.ttl_not_ready
        };
        self.entry = Some(CachedPreflight {
            ready: report.ready,
            burner_role_granted: report.burner_role_granted,
            message: report.message.clone(),
            expires_at: now + ttl,
        });
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}
