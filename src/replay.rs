//! Replay prevention for proof identifiers

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Store of proof identifiers already spent
///
/// `check_and_record` must be atomic: of several concurrent calls
/// presenting the same fresh `jti`, exactly one may answer `true`.
/// An implementation that cannot tell whether an identifier was seen
/// (a lost backend, say) must answer `false` and fail closed.
#[async_trait]
pub trait ReplayCache: Send + Sync + std::fmt::Debug {
    /// Record `jti` for `ttl`; answers `true` iff this is its first use
    async fn check_and_record(&self, jti: &str, ttl: Duration) -> bool;

    /// Drop expired entries, returning how many were removed
    async fn sweep(&self) -> usize;
}

/// In-process replay cache
///
/// Entries carry their expiry instant; an expired entry counts as
/// unseen, so a `jti` becomes usable again once its TTL has passed.
/// Suitable for a single verifier process; share one cache across
/// replicas through your own [`ReplayCache`] implementation instead.
#[derive(Debug, Default)]
pub struct MemoryReplayCache {
    seen: RwLock<HashMap<String, Instant>>,
}

// Opportunistic cleanup kicks in once the map reaches this size.
const SWEEP_THRESHOLD: usize = 1024;

impl MemoryReplayCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayCache for MemoryReplayCache {
    async fn check_and_record(&self, jti: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.write().await;

        if seen.len() >= SWEEP_THRESHOLD {
            seen.retain(|_, expires_at| *expires_at > now);
        }

        match seen.get(jti) {
            Some(expires_at) if *expires_at > now => false,
            _ => {
                seen.insert(jti.to_string(), now + ttl);
                true
            }
        }
    }

    async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut seen = self.seen.write().await;
        let before = seen.len();
        seen.retain(|_, expires_at| *expires_at > now);
        before - seen.len()
    }
}
