//! Per-command session shared by all operations.

use icebox_core::config::{ConfigProvider, IceboxConfig, JobWaitConfig};
use icebox_metadata::CacheStore;
use icebox_remote::ArchiveStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bounds of a blocking wait on remote jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    pub interval: Duration,
    pub max_polls: u32,
}

impl WaitSettings {
    pub fn new(interval: Duration, max_polls: u32) -> Self {
        Self {
            interval,
            max_polls,
        }
    }

    /// Limit the total wait to `days`.
    pub fn capped_to_days(self, days: u32) -> Self {
        let limit = Duration::from_secs(u64::from(days) * 24 * 60 * 60);
        let interval_secs = self.interval.as_secs_f64().max(f64::EPSILON);
        let polls = (limit.as_secs_f64() / interval_secs).ceil();
        let max_polls = if polls >= f64::from(self.max_polls) {
            self.max_polls
        } else {
            (polls as u32).max(1)
        };
        Self { max_polls, ..self }
    }
}

impl From<&JobWaitConfig> for WaitSettings {
    fn from(config: &JobWaitConfig) -> Self {
        Self::new(config.poll_interval(), config.max_polls)
    }
}

/// Everything one command needs: the remote store, the cache, the
/// configuration, and the cancellation signal. Scoped to a single
/// invocation and passed explicitly to every operation.
#[derive(Clone)]
pub struct Session {
    remote: Arc<dyn ArchiveStore>,
    cache: Arc<dyn CacheStore>,
    config_provider: Arc<dyn ConfigProvider>,
    config: IceboxConfig,
    wait: WaitSettings,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        remote: Arc<dyn ArchiveStore>,
        cache: Arc<dyn CacheStore>,
        config_provider: Arc<dyn ConfigProvider>,
        config: IceboxConfig,
        cancel: CancellationToken,
    ) -> Self {
        let wait = WaitSettings::from(&config.jobs);
        Self {
            remote,
            cache,
            config_provider,
            config,
            wait,
            cancel,
        }
    }

    /// Override the wait bounds taken from the configuration.
    pub fn with_wait_settings(mut self, wait: WaitSettings) -> Self {
        self.wait = wait;
        self
    }

    pub fn remote(&self) -> &dyn ArchiveStore {
        self.remote.as_ref()
    }

    pub fn cache(&self) -> &dyn CacheStore {
        self.cache.as_ref()
    }

    pub fn config_provider(&self) -> &dyn ConfigProvider {
        self.config_provider.as_ref()
    }

    /// Configuration as loaded when the session started.
    pub fn config(&self) -> &IceboxConfig {
        &self.config
    }

    pub fn wait_settings(&self) -> WaitSettings {
        self.wait
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cache namespace of the remote account.
    pub fn account_key(&self) -> &str {
        self.remote.account_key()
    }

    pub fn region(&self) -> &str {
        self.remote.region()
    }
}
