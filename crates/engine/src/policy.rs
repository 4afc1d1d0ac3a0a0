//! Retrieval budget policy.
//!
//! Consulted only before and after creating archive retrieval jobs. The
//! counters live in the configuration and roll over at UTC midnight.

use crate::error::{OpError, OpResult};
use icebox_core::config::{ConfigProvider, RetrievalConfig};
use time::OffsetDateTime;
use tracing::{debug, info};

/// Refuse a new retrieval when the free allowance is used up.
pub fn check(retrieval: &RetrievalConfig) -> OpResult<()> {
    if retrieval.free_tier_only && retrieval.consumed_bytes >= retrieval.daily_free_bytes {
        return Err(OpError::PolicyRefused(format!(
            "daily free allowance of {} bytes used up ({} bytes requested today); \
             disable free-tier-only to retrieve anyway",
            retrieval.daily_free_bytes, retrieval.consumed_bytes
        )));
    }
    Ok(())
}

/// Budget gate backed by a configuration provider.
pub struct RetrievalPolicy<'a> {
    provider: &'a dyn ConfigProvider,
}

impl<'a> RetrievalPolicy<'a> {
    pub fn new(provider: &'a dyn ConfigProvider) -> Self {
        Self { provider }
    }

    /// Check that a new retrieval job may be created at `now`.
    pub async fn admit(&self, now: OffsetDateTime) -> OpResult<()> {
        let mut config = self.provider.load().await?;
        if config.retrieval.roll_over(now) {
            debug!("retrieval budget reset for a new day");
            self.provider.save(&config).await?;
        }
        check(&config.retrieval)
    }

    /// Record `bytes` requested by a job created at `now`.
    pub async fn charge(&self, bytes: u64, now: OffsetDateTime) -> OpResult<()> {
        let mut config = self.provider.load().await?;
        config.retrieval.roll_over(now);
        config.retrieval.consumed_bytes = config.retrieval.consumed_bytes.saturating_add(bytes);
        self.provider.save(&config).await?;
        info!(
            bytes,
            consumed = config.retrieval.consumed_bytes,
            remaining = config.retrieval.remaining_free_bytes(),
            "charged retrieval against daily allowance"
        );
        Ok(())
    }
}
