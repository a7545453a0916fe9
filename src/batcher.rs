//! Micro-batching front of the accounting engine.
//!
//! Callers enqueue single transfers or linked chains and get a [`Ticket`]
//! back. A background task collects queued work and submits it as one
//! `create_transfers` call when either the batch is full or the flush timer
//! fires, then routes the sparse engine results back to each ticket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::engine::{AccountingEngine, CreateTransferResult, EngineError, Transfer, TransferFlags};

/// Shortest flush period; `interval_at` panics on zero.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Maximum number of transfers per engine call.
    pub batch_size: usize,
    pub flush_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatcherError {
    /// `index` is the position of the failing transfer inside its chain.
    #[error("engine rejected transfer {index} of the chain: {result}")]
    Rejected {
        index: usize,
        result: CreateTransferResult,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("engine reported index {index} for a batch of {len} transfers")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("chain of {len} transfers does not fit a batch of {batch_size}")]
    ChainTooLarge { len: usize, batch_size: usize },

    #[error("cannot enqueue an empty chain")]
    EmptyChain,

    #[error("batcher is closed")]
    Closed,
}

/// Queued chain with the channel its outcome goes back on.
struct Queued {
    transfers: Vec<Transfer>,
    reply: oneshot::Sender<Result<(), BatcherError>>,
}

/// Outcome of one enqueued chain, available once its batch is flushed.
#[must_use = "a ticket does nothing unless waited on"]
pub struct Ticket(oneshot::Receiver<Result<(), BatcherError>>);

impl Ticket {
    pub async fn wait(self) -> Result<(), BatcherError> {
        self.0.await.unwrap_or(Err(BatcherError::Closed))
    }
}

/// Handle to the batching task. Cloning is cheap; the task stops once every
/// handle is dropped and the queue is drained.
#[derive(Clone)]
pub struct Batcher {
    queue: mpsc::Sender<Queued>,
    batch_size: usize,
}

impl Batcher {
    /// Spawn the batching task on the current runtime.
    pub fn spawn(engine: Arc<dyn AccountingEngine>, config: BatcherConfig) -> Self {
        let (queue, rx) = mpsc::channel(config.batch_size.max(1));
        tokio::spawn(run(engine, config, rx));
        Self {
            queue,
            batch_size: config.batch_size,
        }
    }

    pub async fn enqueue(&self, transfer: Transfer) -> Result<Ticket, BatcherError> {
        self.enqueue_linked(vec![transfer]).await
    }

    /// Enqueue transfers that must apply together. The chain always lands in
    /// a single engine call; `LINKED` is set on every member but the last.
    pub async fn enqueue_linked(&self, mut chain: Vec<Transfer>) -> Result<Ticket, BatcherError> {
        if chain.is_empty() {
            return Err(BatcherError::EmptyChain);
        }
        if chain.len() > self.batch_size {
            return Err(BatcherError::ChainTooLarge {
                len: chain.len(),
                batch_size: self.batch_size,
            });
        }

        let last = chain.len() - 1;
        for (i, transfer) in chain.iter_mut().enumerate() {
            transfer.flags = if i < last {
                transfer.flags | TransferFlags::LINKED
            } else {
                transfer.flags.without(TransferFlags::LINKED)
            };
        }

        let (reply, ticket) = oneshot::channel();
        self.queue
            .send(Queued {
                transfers: chain,
                reply,
            })
            .await
            .map_err(|_| BatcherError::Closed)?;
        Ok(Ticket(ticket))
    }

    pub async fn submit(&self, transfer: Transfer) -> Result<(), BatcherError> {
        self.enqueue(transfer).await?.wait().await
    }

    pub async fn submit_linked(&self, chain: Vec<Transfer>) -> Result<(), BatcherError> {
        self.enqueue_linked(chain).await?.wait().await
    }
}

async fn run(engine: Arc<dyn AccountingEngine>, config: BatcherConfig, mut rx: mpsc::Receiver<Queued>) {
    let mut batch: Vec<Queued> = Vec::new();
    let mut queued = 0;
    let period = config.flush_interval.max(MIN_FLUSH_INTERVAL);
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(item) = received else {
                    flush(engine.as_ref(), std::mem::take(&mut batch)).await;
                    debug!("batcher closed");
                    return;
                };
                // chains are never split across calls
                if queued + item.transfers.len() > config.batch_size {
                    flush(engine.as_ref(), std::mem::take(&mut batch)).await;
                    queued = 0;
                }
                queued += item.transfers.len();
                batch.push(item);
                if queued >= config.batch_size {
                    flush(engine.as_ref(), std::mem::take(&mut batch)).await;
                    queued = 0;
                }
            }
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(engine.as_ref(), std::mem::take(&mut batch)).await;
                    queued = 0;
                }
            }
        }
    }
}

async fn flush(engine: &dyn AccountingEngine, batch: Vec<Queued>) {
    if batch.is_empty() {
        return;
    }
    let transfers: Vec<Transfer> = batch
        .iter()
        .flat_map(|item| item.transfers.iter().cloned())
        .collect();
    let len = transfers.len();

    let started = Instant::now();
    let outcome = engine.create_transfers(&transfers).await;
    debug!(
        chains = batch.len(),
        transfers = len,
        elapsed_us = started.elapsed().as_micros() as u64,
        "batch flushed"
    );

    let results = match outcome {
        Ok(results) => results,
        Err(e) => {
            warn!(transfers = len, reason = %e, "engine call failed");
            reply_all(batch, Err(BatcherError::Engine(e)));
            return;
        }
    };

    if let Some(bad) = results.iter().find(|r| r.index >= len) {
        error!(index = bad.index, transfers = len, "engine result outside batch");
        let failure = BatcherError::IndexOutOfRange {
            index: bad.index,
            len,
        };
        reply_all(batch, Err(failure));
        return;
    }

    let failures: HashMap<usize, CreateTransferResult> =
        results.into_iter().map(|r| (r.index, r.result)).collect();

    let mut offset = 0;
    for item in batch {
        let start = offset;
        offset += item.transfers.len();

        let chain_failures: Vec<(usize, CreateTransferResult)> = (start..offset)
            .filter_map(|i| failures.get(&i).map(|result| (i, *result)))
            .collect();
        // report the member that broke the chain, not the ones dragged along
        let culprit = chain_failures
            .iter()
            .find(|(_, result)| *result != CreateTransferResult::LinkedEventFailed)
            .or(chain_failures.first());

        let result = match culprit {
            None => Ok(()),
            Some((index, result)) => Err(BatcherError::Rejected {
                index: index - start,
                result: *result,
            }),
        };
        // the caller may have stopped waiting
        let _ = item.reply.send(result);
    }
}

fn reply_all(batch: Vec<Queued>, result: Result<(), BatcherError>) {
    for item in batch {
        let _ = item.reply.send(result.clone());
    }
}
