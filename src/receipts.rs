//! Receipt emission
//!
//! Planning outcomes are recorded as receipts and delivered to an external
//! ledger at least once. The request path only pushes onto a channel;
//! delivery, retries and the retry queue live on the worker task.
//!
//! ```text
//!  service ──emit──► ReceiptEmitter ══mpsc══► ReceiptWorker ──deliver──► ReceiptSink
//!                                                 │    ▲
//!                                      exhausted  ▼    │ every retry_interval
//!                                              retry queue (bounded)
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ReceiptConfig;
use crate::plan::{EscalationReason, Plan, PlanScope};
use crate::request::Escalation;

/// Normalized planning fact carried by a receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fact", rename_all = "snake_case")]
pub enum PlanFact {
    PlanCreated {
        plan_id: String,
        delegate_id: String,
        intent_summary: String,
        step_count: usize,
        confidence: f64,
        scope: PlanScope,
        workers_used: Vec<String>,
    },
    PlanEscalated {
        reason: EscalationReason,
        message: String,
        #[serde(default)]
        context: Map<String, Value>,
    },
}

impl PlanFact {
    pub fn created(plan: &Plan) -> Self {
        let metadata = plan.metadata();
        Self::PlanCreated {
            plan_id: metadata.plan_id.clone(),
            delegate_id: metadata.delegate_id.clone(),
            intent_summary: metadata.intent_summary.clone(),
            step_count: plan.len(),
            confidence: metadata.confidence,
            scope: metadata.scope,
            workers_used: plan.worker_ids().into_iter().map(str::to_string).collect(),
        }
    }

    pub fn escalated(escalation: &Escalation) -> Self {
        Self::PlanEscalated {
            reason: escalation.reason,
            message: escalation.message.clone(),
            context: escalation.context.clone(),
        }
    }

    /// Ledger task type
    pub fn task_type(&self) -> &'static str {
        match self {
            Self::PlanCreated { .. } => "plan.create",
            Self::PlanEscalated { .. } => "plan.escalate",
        }
    }
}

/// One auditable record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: String,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fact: PlanFact,
}

impl Receipt {
    pub fn new(tenant_id: impl Into<String>, fact: PlanFact) -> Self {
        Self {
            receipt_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            created_at: Utc::now(),
            fact,
        }
    }
}

/// Outcome of one delivery attempt that did not store the receipt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Already stored downstream; counts as delivered
    #[error("Receipt already exists")]
    Duplicate,

    /// Refused as invalid; never retried
    #[error("Receipt rejected: {0}")]
    Rejected(String),

    /// Transient failure; retried with backoff
    #[error("Receipt sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for receipts
#[async_trait]
pub trait ReceiptSink: Send + Sync {
    async fn deliver(&self, receipt: &Receipt) -> Result<(), DeliveryError>;
}

/// Sink that writes receipts to the trace log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl ReceiptSink for LoggingSink {
    async fn deliver(&self, receipt: &Receipt) -> Result<(), DeliveryError> {
        info!(
            receipt_id = %receipt.receipt_id,
            tenant_id = %receipt.tenant_id,
            task_type = receipt.fact.task_type(),
            "Receipt recorded"
        );
        Ok(())
    }
}

/// Emitter closed errors
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("Receipt worker has stopped")]
    Closed,
}

/// Receiving half of the receipt channel, consumed by [`ReceiptWorker`]
pub struct ReceiptQueue {
    rx: mpsc::UnboundedReceiver<Receipt>,
}

/// Cloneable sending half handed to the request path
#[derive(Clone)]
pub struct ReceiptEmitter {
    tx: mpsc::UnboundedSender<Receipt>,
}

impl ReceiptEmitter {
    /// Create the emitter and the queue its worker drains
    pub fn new() -> (Self, ReceiptQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, ReceiptQueue { rx })
    }

    /// Hand a receipt to the worker without waiting for delivery
    pub fn emit(&self, receipt: Receipt) -> Result<(), EmitterError> {
        self.tx.send(receipt).map_err(|_| EmitterError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Exponential backoff between immediate delivery attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// ±25% random variation
    pub jitter: bool,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.initial_backoff.saturating_mul(factor).min(self.max_backoff);
        if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.75..=1.25);
            delay.mul_f64(jitter_factor)
        } else {
            delay
        }
    }
}

impl From<&ReceiptConfig> for RetryPolicy {
    fn from(config: &ReceiptConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            jitter: config.jitter,
        }
    }
}

/// Shortest retry interval accepted from configuration
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for [`ReceiptWorker`]
#[derive(Debug, Clone, PartialEq)]
pub struct DeliverySettings {
    pub retry: RetryPolicy,
    pub retry_queue_capacity: usize,
    pub max_requeues: u32,
    pub retry_interval: Duration,
    pub requeue_batch: usize,
}

impl From<&ReceiptConfig> for DeliverySettings {
    fn from(config: &ReceiptConfig) -> Self {
        Self {
            retry: RetryPolicy::from(config),
            retry_queue_capacity: config.retry_queue_capacity.max(1),
            max_requeues: config.max_requeues,
            retry_interval: config.retry_interval().max(MIN_RETRY_INTERVAL),
            requeue_batch: config.requeue_batch.max(1),
        }
    }
}

/// Delivery counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub delivered: u64,
    /// Delivered receipts the sink already held
    pub duplicates: u64,
    pub rejected: u64,
    /// Receipts moved to the retry queue
    pub queued_for_retry: u64,
    /// Dropped after `max_requeues` background retries
    pub abandoned: u64,
    /// Evicted because the retry queue was full
    pub evicted: u64,
    /// Current retry queue length
    pub pending_retries: usize,
}

/// Shared read-only view of a worker's counters
#[derive(Clone, Default)]
pub struct DeliveryStatsHandle {
    inner: Arc<RwLock<DeliveryStats>>,
}

impl DeliveryStatsHandle {
    pub fn snapshot(&self) -> DeliveryStats {
        self.inner.read().clone()
    }
}

enum Outcome {
    Delivered,
    Rejected,
    Exhausted,
}

struct QueuedReceipt {
    receipt: Receipt,
    requeues: u32,
}

/// Background task delivering receipts to a sink
pub struct ReceiptWorker {
    sink: Arc<dyn ReceiptSink>,
    queue: ReceiptQueue,
    settings: DeliverySettings,
    retry_queue: VecDeque<QueuedReceipt>,
    stats: DeliveryStatsHandle,
}

impl ReceiptWorker {
    pub fn new(
        sink: Arc<dyn ReceiptSink>,
        queue: ReceiptQueue,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            sink,
            queue,
            settings,
            retry_queue: VecDeque::new(),
            stats: DeliveryStatsHandle::default(),
        }
    }

    pub fn stats_handle(&self) -> DeliveryStatsHandle {
        self.stats.clone()
    }

    /// Deliver receipts until every emitter is dropped.
    ///
    /// Receipts still waiting in the retry queue at shutdown are logged and
    /// counted as pending.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> DeliveryStats {
        info!("Receipt worker started");

        let period = self.settings.retry_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                received = self.queue.rx.recv() => match received {
                    Some(receipt) => self.process(receipt).await,
                    None => break,
                },
                _ = ticker.tick() => self.drain_retry_queue().await,
            }
        }

        if !self.retry_queue.is_empty() {
            warn!(
                pending = self.retry_queue.len(),
                "Receipt worker stopping with undelivered receipts"
            );
        }
        info!("Receipt worker stopped");
        self.stats.snapshot()
    }

    async fn process(&mut self, receipt: Receipt) {
        match self.deliver_with_retry(&receipt).await {
            Outcome::Delivered | Outcome::Rejected => {}
            Outcome::Exhausted => self.enqueue_retry(QueuedReceipt { receipt, requeues: 0 }),
        }
    }

    /// Up to `max_attempts` tries with backoff between them
    async fn deliver_with_retry(&self, receipt: &Receipt) -> Outcome {
        let policy = &self.settings.retry;

        for attempt in 0..policy.max_attempts {
            match self.attempt(receipt).await {
                Some(outcome) => return outcome,
                None => {
                    warn!(
                        receipt_id = %receipt.receipt_id,
                        attempt = attempt + 1,
                        "Receipt delivery attempt failed"
                    );
                    if attempt + 1 < policy.max_attempts {
                        sleep(policy.delay(attempt)).await;
                    }
                }
            }
        }
        Outcome::Exhausted
    }

    /// One delivery; `None` means a transient failure
    async fn attempt(&self, receipt: &Receipt) -> Option<Outcome> {
        match self.sink.deliver(receipt).await {
            Ok(()) => {
                debug!(receipt_id = %receipt.receipt_id, "Receipt delivered");
                self.stats.inner.write().delivered += 1;
                Some(Outcome::Delivered)
            }
            Err(DeliveryError::Duplicate) => {
                warn!(receipt_id = %receipt.receipt_id, "Receipt already exists (duplicate)");
                let mut stats = self.stats.inner.write();
                stats.delivered += 1;
                stats.duplicates += 1;
                Some(Outcome::Delivered)
            }
            Err(DeliveryError::Rejected(reason)) => {
                error!(
                    receipt_id = %receipt.receipt_id,
                    reason = %reason,
                    "Receipt rejected, dropping"
                );
                self.stats.inner.write().rejected += 1;
                Some(Outcome::Rejected)
            }
            Err(DeliveryError::Unavailable(reason)) => {
                debug!(
                    receipt_id = %receipt.receipt_id,
                    reason = %reason,
                    "Receipt sink unavailable"
                );
                None
            }
        }
    }

    fn enqueue_retry(&mut self, queued: QueuedReceipt) {
        let mut stats = self.stats.inner.write();
        if self.retry_queue.len() >= self.settings.retry_queue_capacity {
            if let Some(evicted) = self.retry_queue.pop_front() {
                warn!(
                    receipt_id = %evicted.receipt.receipt_id,
                    "Retry queue full, evicting oldest receipt"
                );
                stats.evicted += 1;
            }
        }
        if queued.requeues == 0 {
            stats.queued_for_retry += 1;
            warn!(
                receipt_id = %queued.receipt.receipt_id,
                queue_size = self.retry_queue.len() + 1,
                "Receipt queued for background retry"
            );
        }
        self.retry_queue.push_back(queued);
        stats.pending_retries = self.retry_queue.len();
    }

    /// One attempt for up to `requeue_batch` queued receipts
    async fn drain_retry_queue(&mut self) {
        if self.retry_queue.is_empty() {
            return;
        }
        info!(queued = self.retry_queue.len(), "Processing queued receipts");

        let batch = self.settings.requeue_batch.min(self.retry_queue.len());
        for _ in 0..batch {
            let Some(mut queued) = self.retry_queue.pop_front() else { break };
            queued.requeues += 1;

            match self.attempt(&queued.receipt).await {
                Some(Outcome::Delivered) => {
                    info!(
                        receipt_id = %queued.receipt.receipt_id,
                        retry_count = queued.requeues,
                        "Queued receipt delivered"
                    );
                }
                Some(_) => {}
                None if queued.requeues < self.settings.max_requeues => {
                    warn!(
                        receipt_id = %queued.receipt.receipt_id,
                        retry_count = queued.requeues,
                        "Retry failed, re-queued"
                    );
                    self.enqueue_retry(queued);
                }
                None => {
                    error!(
                        receipt_id = %queued.receipt.receipt_id,
                        retry_count = queued.requeues,
                        "Giving up on receipt"
                    );
                    self.stats.inner.write().abandoned += 1;
                }
            }
        }
        self.stats.inner.write().pending_retries = self.retry_queue.len();
    }
}
