use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::{
    queue::{JobQueue, Priority},
    relayer::RelayJob,
    types::CrossChainRequestRecord,
};

/// Wall clock shared by round computation and timers.
///
/// Starts at local system time and runs on the tokio clock. Observed
/// block times can only move it forward, so round ids never go backwards.
pub struct BlockClock {
    origin_millis: u64,
    origin: Instant,
    offset_ms: AtomicI64,
}

impl BlockClock {
    pub fn new() -> Self {
        let origin_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            origin_millis,
            origin: Instant::now(),
            offset_ms: AtomicI64::new(0),
        }
    }

    fn local_millis(&self) -> u64 {
        self.origin_millis
            .saturating_add(self.origin.elapsed().as_millis() as u64)
    }

    pub fn now_millis(&self) -> u64 {
        let now = self.local_millis() as i64 + self.offset_ms.load(Ordering::SeqCst);
        now.max(0) as u64
    }

    pub fn update_block_time(&self, block_time_ms: u64) {
        let offset = block_time_ms as i64 - self.local_millis() as i64;
        self.offset_ms.fetch_max(offset, Ordering::SeqCst);
    }
}

impl Default for BlockClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerType {
    /// Forces a round change when no commit is observed within the window.
    CheckCommitted,
    /// Re-opens the commit phase once a resend's delay has passed.
    ResendPending,
}

impl SchedulerType {
    pub const ALL: [SchedulerType; 2] = [SchedulerType::CheckCommitted, SchedulerType::ResendPending];

    /// Absolute unix millis at which the timer for `record` expires.
    pub fn deadline(self, record: &CrossChainRequestRecord) -> u64 {
        match self {
            SchedulerType::CheckCommitted => {
                let rounds = u64::from(record.report_context.round_id) + 1;
                record
                    .request_receive_time
                    .saturating_add(rounds.saturating_mul(record.request_end_timeout_window))
            }
            SchedulerType::ResendPending => record
                .resend_transaction_block_time
                .saturating_add(record.next_commit_delay_time),
        }
    }
}

impl fmt::Display for SchedulerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Timers that re-drive the state machine. At most one live timer per
/// `(message id, type)`; arming again replaces the previous one.
#[cfg_attr(test, mockall::automock)]
pub trait SchedulerService: Send + Sync {
    fn start_scheduler(&self, record: &CrossChainRequestRecord, kind: SchedulerType);

    /// Safe on records with nothing armed.
    fn cancel_scheduler(&self, record: &CrossChainRequestRecord, kind: SchedulerType);

    fn cancel_all_schedule(&self, record: &CrossChainRequestRecord);

    fn update_block_time(&self, block_time_ms: u64);
}

type TimerKey = (String, SchedulerType);

struct Timer {
    deadline_ms: u64,
    generation: u64,
    handle: JoinHandle<()>,
}

/// `SchedulerService` on tokio timers. Expiry enqueues
/// `RelayJob::SchedulerExpired` at high priority.
pub struct TokioScheduler {
    clock: Arc<BlockClock>,
    queue: JobQueue<RelayJob>,
    timers: Arc<Mutex<HashMap<TimerKey, Timer>>>,
    generation: AtomicU64,
}

impl TokioScheduler {
    pub fn new(clock: Arc<BlockClock>, queue: JobQueue<RelayJob>) -> Self {
        Self {
            clock,
            queue,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn is_armed(&self, message_id: &str, kind: SchedulerType) -> bool {
        self.timers.lock().contains_key(&(message_id.to_string(), kind))
    }

    pub fn armed_count(&self) -> usize {
        self.timers.lock().len()
    }

    fn arm(&self, timers: &mut HashMap<TimerKey, Timer>, key: TimerKey, deadline_ms: u64) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let delay = Duration::from_millis(deadline_ms.saturating_sub(self.clock.now_millis()));
        let handle = tokio::spawn(expire(
            self.timers.clone(),
            self.queue.clone(),
            key.clone(),
            generation,
            delay,
        ));
        let timer = Timer {
            deadline_ms,
            generation,
            handle,
        };
        if let Some(previous) = timers.insert(key, timer) {
            previous.handle.abort();
        }
    }
}

async fn expire(
    timers: Arc<Mutex<HashMap<TimerKey, Timer>>>,
    queue: JobQueue<RelayJob>,
    key: TimerKey,
    generation: u64,
    delay: Duration,
) {
    sleep(delay).await;
    let live = {
        let mut timers = timers.lock();
        match timers.get(&key) {
            Some(timer) if timer.generation == generation => {
                timers.remove(&key);
                true
            }
            _ => false,
        }
    };
    if !live {
        return;
    }
    let (message_id, kind) = key;
    debug!("{} timer expired for message {}", kind, message_id);
    queue.enqueue_with(RelayJob::SchedulerExpired { message_id, kind }, Priority::High, None);
}

impl SchedulerService for TokioScheduler {
    fn start_scheduler(&self, record: &CrossChainRequestRecord, kind: SchedulerType) {
        let deadline_ms = kind.deadline(record);
        let mut timers = self.timers.lock();
        self.arm(&mut timers, (record.key().to_string(), kind), deadline_ms);
        debug!("[{}] {} timer armed, deadline {}", record.report_context, kind, deadline_ms);
    }

    fn cancel_scheduler(&self, record: &CrossChainRequestRecord, kind: SchedulerType) {
        if let Some(timer) = self.timers.lock().remove(&(record.key().to_string(), kind)) {
            timer.handle.abort();
            debug!("[{}] {} timer cancelled", record.report_context, kind);
        }
    }

    fn cancel_all_schedule(&self, record: &CrossChainRequestRecord) {
        for kind in SchedulerType::ALL {
            self.cancel_scheduler(record, kind);
        }
    }

    fn update_block_time(&self, block_time_ms: u64) {
        let before = self.clock.now_millis();
        self.clock.update_block_time(block_time_ms);
        if self.clock.now_millis() == before {
            return;
        }
        let mut timers = self.timers.lock();
        let live: Vec<(TimerKey, u64)> = timers
            .iter()
            .map(|(key, timer)| (key.clone(), timer.deadline_ms))
            .collect();
        for (key, deadline_ms) in live {
            self.arm(&mut timers, key, deadline_ms);
        }
        info!("Block time moved to {}, re-armed {} timers", block_time_ms, timers.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{job_queue, JobReceiver};
    use crate::types::ReportContext;
    use tokio::time::timeout;

    fn record(clock: &BlockClock, window: u64) -> CrossChainRequestRecord {
        let ctx = ReportContext {
            message_id: "M1".to_string(),
            sender: "a".to_string(),
            receiver: "b".to_string(),
            source_chain_id: 1,
            target_chain_id: 2,
            epoch: 0,
            round_id: 0,
        };
        CrossChainRequestRecord::new(ctx, vec![], None, clock.now_millis(), window)
    }

    fn scheduler() -> (TokioScheduler, JobReceiver<RelayJob>, Arc<BlockClock>) {
        let clock = Arc::new(BlockClock::new());
        let (queue, rx) = job_queue();
        (TokioScheduler::new(clock.clone(), queue), rx, clock)
    }

    fn expired(kind: SchedulerType) -> RelayJob {
        RelayJob::SchedulerExpired {
            message_id: "M1".to_string(),
            kind,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_round_end() {
        let (scheduler, mut rx, clock) = scheduler();
        scheduler.start_scheduler(&record(&clock, 1_000), SchedulerType::CheckCommitted);
        assert!(timeout(Duration::from_millis(500), rx.next()).await.is_err());
        assert_eq!(rx.next().await, Some(expired(SchedulerType::CheckCommitted)));
        assert!(!scheduler.is_armed("M1", SchedulerType::CheckCommitted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_timer() {
        let (scheduler, mut rx, clock) = scheduler();
        let record = record(&clock, 1_000);
        scheduler.start_scheduler(&record, SchedulerType::CheckCommitted);
        scheduler.start_scheduler(&record, SchedulerType::CheckCommitted);
        assert_eq!(scheduler.armed_count(), 1);
        assert_eq!(rx.next().await, Some(expired(SchedulerType::CheckCommitted)));
        assert!(timeout(Duration::from_secs(5), rx.next()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_is_idempotent() {
        let (scheduler, mut rx, clock) = scheduler();
        let mut record = record(&clock, 1_000);
        scheduler.cancel_all_schedule(&record);

        record.resend_transaction_block_time = clock.now_millis();
        record.next_commit_delay_time = 2_000;
        scheduler.start_scheduler(&record, SchedulerType::CheckCommitted);
        scheduler.start_scheduler(&record, SchedulerType::ResendPending);
        assert_eq!(scheduler.armed_count(), 2);

        scheduler.cancel_all_schedule(&record);
        scheduler.cancel_all_schedule(&record);
        assert_eq!(scheduler.armed_count(), 0);
        assert!(timeout(Duration::from_secs(5), rx.next()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_time_pulls_deadline_in() {
        let (scheduler, mut rx, clock) = scheduler();
        scheduler.start_scheduler(&record(&clock, 10_000), SchedulerType::CheckCommitted);
        scheduler.update_block_time(clock.now_millis() + 9_500);
        let job = timeout(Duration::from_secs(1), rx.next()).await;
        assert_eq!(job.ok().flatten(), Some(expired(SchedulerType::CheckCommitted)));
    }

    #[test]
    fn test_clock_never_moves_back() {
        let clock = BlockClock::new();
        let ahead = clock.now_millis() + 60_000;
        clock.update_block_time(ahead);
        clock.update_block_time(0);
        assert!(clock.now_millis() >= ahead);
    }
}
