//! Periodic reclamation sweeps
//!
//! One pass per queue per tick, decoupled from client connections. A
//! failing sweep on one queue is logged and the cycle moves on.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SqsError;
use crate::messages::MessageEngine;
use crate::model::QueueRecord;
use crate::store::QueueStore;

pub struct MessageReaper {
    queues: Arc<dyn QueueStore>,
    engine: Arc<MessageEngine>,
    interval: Duration,
}

impl MessageReaper {
    pub fn new(
        queues: Arc<dyn QueueStore>,
        engine: Arc<MessageEngine>,
        interval: Duration,
    ) -> Self {
        Self {
            queues,
            engine,
            interval,
        }
    }

    /// Run the sweeps on a timer until the task is aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }

    /// One pass over every queue
    pub async fn run_once(&self) {
        self.run_once_at(Utc::now()).await;
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) {
        let queues = match self.queues.list(None).await {
            Ok(queues) => queues,
            Err(err) => {
                warn!(error = %err, "sweep skipped: queue listing failed");
                return;
            }
        };

        for queue in queues {
            if let Err(err) = self.sweep_queue(&queue, now).await {
                warn!(queue = %queue.url, error = %err, "sweep failed for queue");
            }
        }
    }

    async fn sweep_queue(&self, queue: &QueueRecord, now: DateTime<Utc>) -> Result<(), SqsError> {
        let dropped = self.engine.expire_retained_at(&queue.url, now).await?;
        let released = self.engine.expire_invisible_at(&queue.url, now).await?;
        let awakened = self.engine.expire_delayed_at(&queue.url, now).await?;
        let redriven = match &queue.attributes.redrive_policy {
            Some(policy) => {
                self.engine
                    .redrive(
                        &queue.url,
                        &policy.dead_letter_target_arn,
                        policy.max_receive_count,
                    )
                    .await?
            }
            None => 0,
        };

        if dropped + released + awakened + redriven > 0 {
            debug!(
                queue = %queue.url,
                dropped,
                released,
                awakened,
                redriven,
                "sweep pass"
            );
        }
        Ok(())
    }
}
