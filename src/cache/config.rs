//! Refresh policy for one cached prefix.

use std::time::Duration;

const DEFAULT_REFRESH_INTERVAL_MS: u64 = 1000;
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

/// How often a prefix is rebuilt and how long each entry stays readable.
///
/// `entry_ttl` may be shorter than `refresh_interval`; entries then disappear between
/// refreshes and reappear on the next successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    refresh_interval: Duration,
    entry_ttl: Duration,
}

impl RefreshPolicy {
    /// A zero `refresh_interval` is raised to one millisecond; the refresh timer cannot
    /// tick at a zero period.
    pub fn new(refresh_interval: Duration, entry_ttl: Duration) -> Self {
        Self {
            refresh_interval: refresh_interval.max(MIN_REFRESH_INTERVAL),
            entry_ttl,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn entry_ttl(&self) -> Duration {
        self.entry_ttl
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        let interval = Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS);
        Self::new(interval, interval * 2)
    }
}

impl From<&crate::config::CollectionCacheSettings> for RefreshPolicy {
    fn from(settings: &crate::config::CollectionCacheSettings) -> Self {
        Self::new(settings.refresh_interval, settings.entry_ttl)
    }
}
