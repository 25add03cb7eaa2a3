//! Transaction sender with fee-bumping replacement and bounded inclusion waits
//!
//! One call to [`TransactionSender::submit_with_retry`] drives a single logical
//! transaction to inclusion. Attempts share one nonce and run strictly one
//! after another: attempt N+1 starts only once attempt N's wait has ended.
//! Every attempt after the first re-prices the replacement with [`boost_fees`].

use super::gas::{boost_fees, FeeParameters};
use super::intent::{CallOptions, TransactionIntent};
use crate::chain::{ChainRpc, Receipt};
use crate::config::SubmissionConfig;
use crate::error::{ToolError, ToolResult};

use ethers::types::H256;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// What happened to one physical submission
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptOutcome {
    /// The node refused it as a duplicate or an underpriced replacement
    Rejected(String),
    /// Broadcast, but not included before the deadline
    TimedOut,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Rejected(reason) => write!(f, "rejected ({})", reason),
            AttemptOutcome::TimedOut => write!(f, "not included in time"),
        }
    }
}

/// Attempt log kept for the duration of one engine invocation
#[derive(Debug, Clone)]
struct AttemptRecord {
    attempt: u32,
    tx_hash: Option<H256>,
    outcome: AttemptOutcome,
}

/// Submits transactions and escalates fees until they are included
pub struct TransactionSender<C: ?Sized> {
    /// Chain RPC capabilities
    chain: Arc<C>,
    /// Maximum number of physical submissions per intent
    max_attempts: u32,
    /// How long each attempt may wait for inclusion
    inclusion_timeout: Duration,
    /// Delay between receipt polls
    poll_interval: Duration,
    /// Flips to `true` when the caller wants the current wait abandoned
    cancel: Option<watch::Receiver<bool>>,
}

impl<C> TransactionSender<C>
where
    C: ChainRpc + ?Sized,
{
    /// Create a new transaction sender
    pub fn new(chain: Arc<C>, config: &SubmissionConfig) -> Self {
        Self {
            chain,
            max_attempts: config.max_attempts.max(1),
            inclusion_timeout: config.inclusion_timeout(),
            poll_interval: config.receipt_poll_interval(),
            cancel: None,
        }
    }

    /// Abort waits as soon as `cancel` holds `true`
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Get `intent` included on chain, starting from `initial` fees.
    ///
    /// Attempt 0 uses `initial` verbatim. Underpriced-replacement and
    /// already-known rejections use up an attempt without waiting. Any other
    /// submission error, and any error while waiting for inclusion, aborts.
    /// A returned receipt may still report a reverted execution.
    pub async fn submit_with_retry<F, Fut>(
        &self,
        mut intent: TransactionIntent<F>,
        initial: FeeParameters,
    ) -> ToolResult<Receipt>
    where
        F: FnMut(CallOptions) -> Fut,
        Fut: Future<Output = ToolResult<H256>>,
    {
        let mut fees = initial;
        let mut history: Vec<AttemptRecord> = Vec::new();

        for attempt in 0..self.max_attempts {
            if self.is_cancelled() {
                return Err(ToolError::Cancelled { attempt });
            }

            if attempt > 0 {
                info!(
                    "{} not included, boosting tip and base fee by 10% (attempt {}/{})",
                    intent.label(),
                    attempt + 1,
                    self.max_attempts
                );
                fees = boost_fees(self.chain.as_ref(), &fees).await?;
            }

            let tx_hash = match intent.submit(&fees).await {
                Ok(tx_hash) => tx_hash,
                Err(e) if e.is_soft_submission() => {
                    warn!(
                        "{} submission rejected on attempt {}: {}",
                        intent.label(),
                        attempt + 1,
                        e
                    );
                    history.push(AttemptRecord {
                        attempt,
                        tx_hash: None,
                        outcome: AttemptOutcome::Rejected(e.to_string()),
                    });
                    continue;
                }
                Err(e) if e.is_nonce_too_low() => {
                    return self.resolve_consumed_nonce(&history, fees.nonce(), e).await;
                }
                Err(e) => {
                    error!(
                        "{} submission failed on attempt {}: {}",
                        intent.label(),
                        attempt + 1,
                        e
                    );
                    return Err(ToolError::Submission {
                        attempt,
                        message: e.to_string(),
                    });
                }
            };

            info!(
                "{} sent: {:?} (attempt {}/{}, nonce {}, tip {}, fee cap {})",
                intent.label(),
                tx_hash,
                attempt + 1,
                self.max_attempts,
                fees.nonce(),
                fees.tip(),
                fees.fee_cap()
            );

            match self.await_inclusion(tx_hash, attempt).await? {
                Some(receipt) => {
                    info!(
                        "{} included in block {} ({}, gas used {:?})",
                        intent.label(),
                        receipt.block_number,
                        if receipt.success { "success" } else { "reverted" },
                        receipt.gas_used
                    );
                    return Ok(receipt);
                }
                None => {
                    warn!(
                        "{} not included within {:?}: {:?}",
                        intent.label(),
                        self.inclusion_timeout,
                        tx_hash
                    );
                    history.push(AttemptRecord {
                        attempt,
                        tx_hash: Some(tx_hash),
                        outcome: AttemptOutcome::TimedOut,
                    });
                }
            }
        }

        for record in &history {
            debug!(
                "{} attempt {}: {:?} {}",
                intent.label(),
                record.attempt + 1,
                record.tx_hash,
                record.outcome
            );
        }

        Err(ToolError::NotIncluded {
            attempts: self.max_attempts,
        })
    }

    /// Wait for `tx_hash` to be included, `None` once the deadline passes
    async fn await_inclusion(&self, tx_hash: H256, attempt: u32) -> ToolResult<Option<Receipt>> {
        tokio::select! {
            result = timeout(self.inclusion_timeout, self.poll_receipt(tx_hash)) => match result {
                Ok(Ok(receipt)) => Ok(Some(receipt)),
                Ok(Err(e)) => Err(ToolError::Confirmation {
                    tx_hash: format!("{:?}", tx_hash),
                    message: e.to_string(),
                }),
                Err(_) => Ok(None),
            },
            _ = self.cancelled() => {
                warn!("Wait for {:?} cancelled", tx_hash);
                Err(ToolError::Cancelled { attempt })
            }
        }
    }

    async fn poll_receipt(&self, tx_hash: H256) -> ToolResult<Receipt> {
        loop {
            if let Some(receipt) = self.chain.transaction_receipt(tx_hash).await? {
                return Ok(receipt);
            }
            sleep(self.poll_interval).await;
        }
    }

    /// A "nonce too low" rejection after earlier broadcasts usually means one
    /// of them was included meanwhile. Look for its real receipt.
    async fn resolve_consumed_nonce(
        &self,
        history: &[AttemptRecord],
        nonce: u64,
        cause: ToolError,
    ) -> ToolResult<Receipt> {
        let broadcast: Vec<H256> = history.iter().filter_map(|r| r.tx_hash).collect();
        warn!(
            "Nonce {} already used, checking {} earlier attempt(s) for inclusion",
            nonce,
            broadcast.len()
        );

        for tx_hash in broadcast.iter().rev() {
            let receipt = self
                .chain
                .transaction_receipt(*tx_hash)
                .await
                .map_err(|e| ToolError::Confirmation {
                    tx_hash: format!("{:?}", tx_hash),
                    message: e.to_string(),
                })?;

            if let Some(receipt) = receipt {
                info!(
                    "Earlier attempt {:?} was included in block {}",
                    tx_hash, receipt.block_number
                );
                return Ok(receipt);
            }
        }

        Err(ToolError::NonceConsumed {
            nonce,
            message: cause.to_string(),
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once cancellation is requested; never resolves without a receiver
    async fn cancelled(&self) {
        let Some(mut rx) = self.cancel.clone() else {
            return std::future::pending().await;
        };

        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone, nobody can cancel any more
                return std::future::pending().await;
            }
        }
    }
}
