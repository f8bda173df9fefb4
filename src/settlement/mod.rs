//! At-least-once reporting of finished matches to the account service.
//!
//! The first post is spawned straight from `submit`; anything that fails
//! lands in an in-memory queue that a background loop drains on a fixed
//! interval. Tasks are retried until they succeed or the process exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::game::SeatSettlement;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementTask {
    pub room_id: String,
    pub game_type: String,
    pub settlements: Vec<SeatSettlement>,
}

#[derive(thiserror::Error, Debug)]
pub enum SettlementError {
    #[error("account service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("account service answered HTTP {0}")]
    Status(u16),
    #[error("account service rejected settlement with code {0}")]
    Rejected(i64),
    #[error("malformed account service response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait AccountClient: Send + Sync {
    async fn settle(&self, task: &SettlementTask) -> Result<(), SettlementError>;
}

/// Posts `{roomId, gameType, settlements}` to `{base}/game/settle`.
pub struct HttpAccountClient {
    client: reqwest::Client,
    settle_url: String,
}

impl HttpAccountClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SettlementError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, settle_url: format!("{}/game/settle", base_url.trim_end_matches('/')) })
    }
}

#[async_trait]
impl AccountClient for HttpAccountClient {
    async fn settle(&self, task: &SettlementTask) -> Result<(), SettlementError> {
        let resp = self.client.post(&self.settle_url).json(task).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SettlementError::Status(status.as_u16()));
        }
        let body: Value = resp.json().await.map_err(|e| SettlementError::Malformed(e.to_string()))?;
        match body.get("code").and_then(Value::as_i64) {
            Some(0) => Ok(()),
            Some(code) => Err(SettlementError::Rejected(code)),
            None => Err(SettlementError::Malformed(format!("no code in {body}"))),
        }
    }
}

struct Inner {
    client: Arc<dyn AccountClient>,
    queue: Mutex<Vec<SettlementTask>>,
    delivered: AtomicU64,
}

#[derive(Clone)]
pub struct SettlementReporter {
    inner: Arc<Inner>,
}

impl SettlementReporter {
    pub fn new(client: Arc<dyn AccountClient>) -> Self {
        Self {
            inner: Arc::new(Inner { client, queue: Mutex::new(Vec::new()), delivered: AtomicU64::new(0) }),
        }
    }

    /// Post a finished match in the background; never blocks the caller.
    pub fn submit(&self, room_id: &str, game_type: &str, settlements: Vec<SeatSettlement>) {
        let task = SettlementTask { room_id: room_id.to_string(), game_type: game_type.to_string(), settlements };
        let reporter = self.clone();
        tokio::spawn(async move {
            reporter.attempt(task).await;
        });
    }

    /// Drain the retry queue and re-post every task concurrently; returns
    /// how many went through this cycle.
    pub async fn retry_pending(&self) -> usize {
        let tasks = std::mem::take(&mut *self.inner.queue.lock());
        if tasks.is_empty() {
            return 0;
        }
        tracing::debug!(count = tasks.len(), "retrying settlements");
        let results = join_all(tasks.into_iter().map(|task| self.attempt(task))).await;
        results.into_iter().filter(|ok| *ok).count()
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Settlements confirmed by the account service since startup.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    pub fn spawn_retry_loop(&self, every: Duration, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        reporter.retry_pending().await;
                    }
                }
            }
            let left = reporter.pending();
            if left > 0 {
                tracing::warn!(pending = left, "settlement retry loop stopped with undelivered tasks");
            }
        })
    }

    async fn attempt(&self, task: SettlementTask) -> bool {
        match self.inner.client.settle(&task).await {
            Ok(()) => {
                self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(room_id = %task.room_id, game_type = %task.game_type, "settlement delivered");
                true
            }
            Err(err) => {
                tracing::warn!(room_id = %task.room_id, error = %err, "settlement failed, queued for retry");
                self.inner.queue.lock().push(task);
                false
            }
        }
    }
}
