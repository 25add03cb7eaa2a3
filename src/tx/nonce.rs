//! Nonce allocation for concurrent submissions
//!
//! Handles:
//! - One locally tracked counter per sending account
//! - Atomic hand-out of distinct nonces to concurrent callers
//! - Resynchronisation with the chain's pending nonce

use crate::chain::{ChainRpc, Receipt};
use crate::error::{ToolError, ToolResult};

use dashmap::DashMap;
use ethers::types::Address;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-account nonce state
struct AccountNonceState {
    /// Next nonce to hand out
    next: u64,
    /// Allocated nonces whose transactions are not known to be included
    in_flight: BTreeSet<u64>,
}

/// Hands out nonces so that concurrent engine invocations never collide
#[derive(Default)]
pub struct NonceManager {
    accounts: DashMap<Address, Arc<Mutex<AccountNonceState>>>,
}

impl NonceManager {
    /// Create a new nonce manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next nonce for `address`
    pub async fn allocate<C>(&self, chain: &C, address: Address) -> ToolResult<u64>
    where
        C: ChainRpc + ?Sized,
    {
        let state = self.account(chain, address).await?;
        let mut state = state.lock().await;

        let nonce = state.next;
        state.next += 1;
        state.in_flight.insert(nonce);

        debug!("Allocated nonce {} for {:?}", nonce, address);
        Ok(nonce)
    }

    /// Mark a nonce as included
    pub async fn confirm(&self, address: Address, nonce: u64) -> ToolResult<()> {
        let state = self.tracked(address)?;
        let mut state = state.lock().await;
        state.in_flight.remove(&nonce);
        Ok(())
    }

    /// Hand back a nonce whose transaction was never broadcast.
    ///
    /// Only the most recent allocation is reused; releasing an older nonce
    /// leaves a gap that `sync` will not close, so it is logged.
    pub async fn release(&self, address: Address, nonce: u64) -> ToolResult<()> {
        let state = self.tracked(address)?;
        let mut state = state.lock().await;
        state.in_flight.remove(&nonce);

        if nonce + 1 == state.next {
            state.next = nonce;
        } else {
            warn!(
                "Released nonce {} for {:?} is not the latest allocation ({}), leaving a gap",
                nonce,
                address,
                state.next.saturating_sub(1)
            );
        }
        Ok(())
    }

    /// Raise the local counter to the chain's pending nonce and drop included nonces
    pub async fn sync<C>(&self, chain: &C, address: Address) -> ToolResult<()>
    where
        C: ChainRpc + ?Sized,
    {
        let on_chain = chain.pending_nonce(address).await?;
        let state = self.tracked(address)?;
        let mut state = state.lock().await;

        state.in_flight.retain(|nonce| *nonce >= on_chain);
        if state.next < on_chain {
            warn!(
                "Nonce for {:?} behind chain: local {}, chain {}",
                address, state.next, on_chain
            );
            state.next = on_chain;
        }

        Ok(())
    }

    /// Bookkeeping for `nonce` once the engine is done with it.
    ///
    /// An included transaction confirms the nonce. A fatal error on the first
    /// attempt means nothing was broadcast, so the nonce is handed back. A
    /// consumed nonce resyncs with the chain. Anything else may still land and
    /// stays in flight.
    pub async fn settle<C>(
        &self,
        chain: &C,
        address: Address,
        nonce: u64,
        outcome: &ToolResult<Receipt>,
    ) -> ToolResult<()>
    where
        C: ChainRpc + ?Sized,
    {
        match outcome {
            Ok(_) => self.confirm(address, nonce).await,
            Err(ToolError::Submission { attempt: 0, .. }) => self.release(address, nonce).await,
            Err(ToolError::NonceConsumed { .. }) => self.sync(chain, address).await,
            Err(e) => {
                debug!("Nonce {} for {:?} left in flight: {}", nonce, address, e);
                Ok(())
            }
        }
    }

    /// Allocated nonces not yet known to be included, lowest first
    pub async fn unconfirmed(&self, address: Address) -> Vec<u64> {
        let Some(state) = self.accounts.get(&address).map(|s| s.value().clone()) else {
            return Vec::new();
        };
        let state = state.lock().await;
        state.in_flight.iter().copied().collect()
    }

    async fn account<C>(&self, chain: &C, address: Address) -> ToolResult<Arc<Mutex<AccountNonceState>>>
    where
        C: ChainRpc + ?Sized,
    {
        if let Some(state) = self.accounts.get(&address) {
            return Ok(state.value().clone());
        }

        let on_chain = chain.pending_nonce(address).await?;
        let state = self
            .accounts
            .entry(address)
            .or_insert_with(|| {
                debug!("Initialized nonce for {:?}: {}", address, on_chain);
                Arc::new(Mutex::new(AccountNonceState {
                    next: on_chain,
                    in_flight: BTreeSet::new(),
                }))
            })
            .value()
            .clone();

        Ok(state)
    }

    fn tracked(&self, address: Address) -> ToolResult<Arc<Mutex<AccountNonceState>>> {
        self.accounts
            .get(&address)
            .map(|s| s.value().clone())
            .ok_or_else(|| ToolError::Nonce {
                address: format!("{:?}", address),
                message: "Account not initialized".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainRpc;
    use ethers::types::H256;
    use std::collections::HashSet;

    fn chain_at(nonce: u64) -> MockChainRpc {
        let mut chain = MockChainRpc::new();
        chain.expect_pending_nonce().returning(move |_| Ok(nonce));
        chain
    }

    async fn next_of(manager: &NonceManager, address: Address) -> u64 {
        let state = manager.accounts.get(&address).map(|s| s.value().clone()).unwrap();
        let next = state.lock().await.next;
        next
    }

    fn receipt() -> Receipt {
        Receipt {
            tx_hash: H256::repeat_byte(1),
            block_number: 10,
            success: true,
            gas_used: None,
        }
    }

    #[tokio::test]
    async fn test_allocate_increments_from_chain_nonce() {
        let chain = chain_at(5);
        let manager = NonceManager::new();
        let sender = Address::repeat_byte(1);

        assert_eq!(manager.allocate(&chain, sender).await.unwrap(), 5);
        assert_eq!(manager.allocate(&chain, sender).await.unwrap(), 6);
        assert_eq!(next_of(&manager, sender).await, 7);
        assert_eq!(manager.unconfirmed(sender).await, vec![5, 6]);
    }

    #[tokio::test]
    async fn test_accounts_are_independent() {
        let chain = chain_at(0);
        let manager = NonceManager::new();

        assert_eq!(manager.allocate(&chain, Address::repeat_byte(1)).await.unwrap(), 0);
        assert_eq!(manager.allocate(&chain, Address::repeat_byte(2)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_distinct() {
        let chain = Arc::new(chain_at(100));
        let manager = Arc::new(NonceManager::new());
        let sender = Address::repeat_byte(9);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let chain = chain.clone();
                let manager = manager.clone();
                tokio::spawn(async move { manager.allocate(chain.as_ref(), sender).await })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let nonce = handle.await.unwrap().unwrap();
            assert!(seen.insert(nonce), "nonce {} handed out twice", nonce);
        }
        assert_eq!(seen.len(), 32);
        assert_eq!(seen.iter().min(), Some(&100));
        assert_eq!(seen.iter().max(), Some(&131));
    }

    #[tokio::test]
    async fn test_release_latest_reuses_nonce() {
        let chain = chain_at(3);
        let manager = NonceManager::new();
        let sender = Address::repeat_byte(1);

        let nonce = manager.allocate(&chain, sender).await.unwrap();
        manager.release(sender, nonce).await.unwrap();
        assert_eq!(manager.allocate(&chain, sender).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_release_older_nonce_keeps_counter() {
        let chain = chain_at(3);
        let manager = NonceManager::new();
        let sender = Address::repeat_byte(1);

        let first = manager.allocate(&chain, sender).await.unwrap();
        manager.allocate(&chain, sender).await.unwrap();
        manager.release(sender, first).await.unwrap();
        assert_eq!(next_of(&manager, sender).await, 5);
    }

    #[tokio::test]
    async fn test_sync_raises_counter_and_prunes() {
        let mut chain = MockChainRpc::new();
        let mut answers = vec![2u64, 10].into_iter();
        chain
            .expect_pending_nonce()
            .times(2)
            .returning(move |_| Ok(answers.next().unwrap_or(10)));
        let manager = NonceManager::new();
        let sender = Address::repeat_byte(1);

        manager.allocate(&chain, sender).await.unwrap();
        manager.allocate(&chain, sender).await.unwrap();
        manager.sync(&chain, sender).await.unwrap();

        assert_eq!(next_of(&manager, sender).await, 10);
        assert!(manager.unconfirmed(sender).await.is_empty());
    }

    #[tokio::test]
    async fn test_settle_included_confirms() {
        let chain = chain_at(4);
        let manager = NonceManager::new();
        let sender = Address::repeat_byte(1);

        let nonce = manager.allocate(&chain, sender).await.unwrap();
        manager.settle(&chain, sender, nonce, &Ok(receipt())).await.unwrap();

        assert!(manager.unconfirmed(sender).await.is_empty());
        assert_eq!(next_of(&manager, sender).await, 5);
    }

    #[tokio::test]
    async fn test_settle_first_attempt_failure_releases() {
        let chain = chain_at(4);
        let manager = NonceManager::new();
        let sender = Address::repeat_byte(1);

        let nonce = manager.allocate(&chain, sender).await.unwrap();
        let outcome = Err(ToolError::Submission {
            attempt: 0,
            message: "insufficient funds".to_string(),
        });
        manager.settle(&chain, sender, nonce, &outcome).await.unwrap();

        assert!(manager.unconfirmed(sender).await.is_empty());
        assert_eq!(manager.allocate(&chain, sender).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_settle_later_submission_failure_stays_in_flight() {
        let chain = chain_at(4);
        let manager = NonceManager::new();
        let sender = Address::repeat_byte(1);

        let nonce = manager.allocate(&chain, sender).await.unwrap();
        let outcome = Err(ToolError::Submission {
            attempt: 3,
            message: "insufficient funds".to_string(),
        });
        manager.settle(&chain, sender, nonce, &outcome).await.unwrap();

        assert_eq!(manager.unconfirmed(sender).await, vec![4]);
        assert_eq!(next_of(&manager, sender).await, 5);
    }

    #[tokio::test]
    async fn test_settle_consumed_nonce_resyncs() {
        let mut chain = MockChainRpc::new();
        let mut answers = vec![4u64, 9].into_iter();
        chain
            .expect_pending_nonce()
            .times(2)
            .returning(move |_| Ok(answers.next().unwrap_or(9)));
        let manager = NonceManager::new();
        let sender = Address::repeat_byte(1);

        let nonce = manager.allocate(&chain, sender).await.unwrap();
        let outcome = Err(ToolError::NonceConsumed {
            nonce,
            message: "nonce too low".to_string(),
        });
        manager.settle(&chain, sender, nonce, &outcome).await.unwrap();

        assert!(manager.unconfirmed(sender).await.is_empty());
        assert_eq!(next_of(&manager, sender).await, 9);
    }

    #[tokio::test]
    async fn test_settle_exhaustion_keeps_nonce_unconfirmed() {
        let chain = chain_at(4);
        let manager = NonceManager::new();
        let sender = Address::repeat_byte(1);

        let nonce = manager.allocate(&chain, sender).await.unwrap();
        let outcome = Err(ToolError::NotIncluded { attempts: 10 });
        manager.settle(&chain, sender, nonce, &outcome).await.unwrap();

        assert_eq!(manager.unconfirmed(sender).await, vec![4]);
    }

    #[tokio::test]
    async fn test_unconfirmed_for_unknown_account_is_empty() {
        let manager = NonceManager::new();
        assert!(manager.unconfirmed(Address::repeat_byte(3)).await.is_empty());
    }

    #[test]
    fn test_confirm_requires_tracked_account() {
        let manager = NonceManager::new();
        let err = tokio_test::block_on(manager.confirm(Address::repeat_byte(1), 0)).unwrap_err();
        assert!(matches!(err, ToolError::Nonce { .. }));
    }
}
