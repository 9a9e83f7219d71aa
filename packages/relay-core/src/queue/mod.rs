use log::debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
}

/// Producer side of the work queue. Priority and delay are hints on the
/// submitted job: high jobs are drained first, delayed jobs become
/// visible once their delay elapses.
pub struct JobQueue<J> {
    high: mpsc::UnboundedSender<J>,
    normal: mpsc::UnboundedSender<J>,
}

impl<J> Clone for JobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            high: self.high.clone(),
            normal: self.normal.clone(),
        }
    }
}

pub struct JobReceiver<J> {
    high: mpsc::UnboundedReceiver<J>,
    normal: mpsc::UnboundedReceiver<J>,
}

pub fn job_queue<J: Send + 'static>() -> (JobQueue<J>, JobReceiver<J>) {
    let (high_tx, high_rx) = mpsc::unbounded_channel();
    let (normal_tx, normal_rx) = mpsc::unbounded_channel();
    (
        JobQueue {
            high: high_tx,
            normal: normal_tx,
        },
        JobReceiver {
            high: high_rx,
            normal: normal_rx,
        },
    )
}

impl<J: Send + 'static> JobQueue<J> {
    pub fn enqueue(&self, job: J) -> bool {
        self.enqueue_with(job, Priority::Normal, None)
    }

    /// Returns false when the receiving side is gone. Delayed jobs are
    /// accepted optimistically.
    pub fn enqueue_with(&self, job: J, priority: Priority, delay: Option<Duration>) -> bool {
        let sender = match priority {
            Priority::High => self.high.clone(),
            Priority::Normal => self.normal.clone(),
        };
        match delay {
            Some(delay) if !delay.is_zero() => {
                tokio::spawn(async move {
                    sleep(delay).await;
                    if sender.send(job).is_err() {
                        debug!("Work queue closed, dropping delayed job");
                    }
                });
                true
            }
            _ => sender.send(job).is_ok(),
        }
    }
}

impl<J> JobReceiver<J> {
    pub async fn next(&mut self) -> Option<J> {
        tokio::select! {
            biased;
            Some(job) = self.high.recv() => Some(job),
            Some(job) = self.normal.recv() => Some(job),
            else => None,
        }
    }
}
