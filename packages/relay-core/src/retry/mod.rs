use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RelayerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run the operation again after this delay.
    Scheduled(Duration),
    /// A retry for the same identity is already waiting.
    Collapsed,
    /// The backoff budget for this identity is spent.
    GaveUp,
}

struct RetryEntry {
    backoff: ExponentialBackoff,
    pending_until: Option<Instant>,
}

/// Retry bookkeeping keyed by operation identity, kept apart from the
/// record store. Each identity owns its own exponential backoff; a retry
/// requested before the previous one is due collapses into it.
pub struct RetryTable {
    initial_interval: Duration,
    max_interval: Duration,
    max_elapsed_time: Duration,
    entries: Mutex<HashMap<String, RetryEntry>>,
}

impl RetryTable {
    pub fn new(initial_interval: Duration, max_interval: Duration, max_elapsed_time: Duration) -> Self {
        Self {
            initial_interval,
            max_interval,
            max_elapsed_time,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RelayerConfig) -> Self {
        Self::new(
            Duration::from_millis(config.retry_initial_interval_ms),
            Duration::from_millis(config.retry_max_interval_ms),
            Duration::from_millis(config.retry_max_elapsed_ms),
        )
    }

    fn new_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed_time),
            randomization_factor: 0.0,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }

    pub fn schedule(&self, key: &str) -> RetryDecision {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert_with(|| RetryEntry {
            backoff: self.new_backoff(),
            pending_until: None,
        });
        let now = Instant::now();
        if entry.pending_until.map(|until| now < until).unwrap_or(false) {
            debug!("Retry for {} already pending", key);
            return RetryDecision::Collapsed;
        }
        match entry.backoff.next_backoff() {
            Some(delay) => {
                entry.pending_until = Some(now + delay);
                debug!("Retrying {} in {:?}", key, delay);
                RetryDecision::Scheduled(delay)
            }
            None => {
                entries.remove(key);
                warn!("Giving up retrying {}", key);
                RetryDecision::GaveUp
            }
        }
    }

    pub fn succeed(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear_prefix(&self, prefix: &str) {
        self.entries.lock().retain(|key, _| !key.starts_with(prefix));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RetryTable {
        RetryTable::new(Duration::from_millis(100), Duration::from_millis(400), Duration::from_secs(60))
    }

    #[test]
    fn test_retries_collapse_while_pending() {
        let table = table();
        assert_eq!(table.schedule("partial:M1:0:0"), RetryDecision::Scheduled(Duration::from_millis(100)));
        assert_eq!(table.schedule("partial:M1:0:0"), RetryDecision::Collapsed);
        assert_eq!(table.schedule("partial:M2:0:0"), RetryDecision::Scheduled(Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_until_capped() {
        let table = table();
        let mut delays = Vec::new();
        for _ in 0..5 {
            match table.schedule("k") {
                RetryDecision::Scheduled(delay) => {
                    delays.push(delay.as_millis());
                    tokio::time::advance(delay).await;
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(delays, vec![100, 150, 225, 337, 400]);
    }

    #[test]
    fn test_success_and_prefix_clear() {
        let table = table();
        table.schedule("partial:M1:0:0");
        table.schedule("partial:M1:0:1");
        table.schedule("partial:M2:0:0");
        table.succeed("partial:M1:0:0");
        assert!(!table.contains("partial:M1:0:0"));
        table.clear_prefix("partial:M1:");
        assert!(!table.contains("partial:M1:0:1"));
        assert!(table.contains("partial:M2:0:0"));
    }

    #[test]
    fn test_gives_up_after_elapsed_budget() {
        let table = RetryTable::new(Duration::from_millis(1), Duration::from_millis(1), Duration::from_millis(20));
        assert!(matches!(table.schedule("k"), RetryDecision::Scheduled(_)));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(table.schedule("k"), RetryDecision::GaveUp);
        assert!(!table.contains("k"));
    }
}
