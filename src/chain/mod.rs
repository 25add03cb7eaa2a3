//! Chain module - the RPC capabilities the submission engine consumes
//!
//! The engine only ever talks to a chain through [`ChainRpc`], which keeps it
//! independent of the concrete client and lets tests drive it with mocks.

pub mod provider;

pub use provider::ChainClient;

use crate::error::{ToolError, ToolResult};

use async_trait::async_trait;
use ethers::types::{Address, TransactionReceipt, H256, U256};

/// Terminal result of a submission: where it landed and whether it executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: H256,
    pub block_number: u64,
    /// `true` when the transaction executed successfully, `false` when it reverted
    pub success: bool,
    pub gas_used: Option<U256>,
}

impl Receipt {
    pub fn reverted(&self) -> bool {
        !self.success
    }

    /// Error describing this receipt's revert
    pub fn revert_error(&self, reason: impl Into<String>) -> ToolError {
        ToolError::Reverted {
            tx_hash: format!("{:?}", self.tx_hash),
            block_number: self.block_number,
            reason: reason.into(),
        }
    }
}

impl From<TransactionReceipt> for Receipt {
    fn from(receipt: TransactionReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()).unwrap_or_default(),
            success: receipt.status == Some(1.into()),
            gas_used: receipt.gas_used,
        }
    }
}

/// Chain RPC capabilities used while submitting and confirming transactions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Next nonce for `address`, counting transactions still in the mempool
    async fn pending_nonce(&self, address: Address) -> ToolResult<u64>;

    /// Network-suggested priority fee per gas (the tip)
    async fn suggest_priority_fee(&self) -> ToolResult<U256>;

    /// Network-suggested fee cap per gas, inclusive of the current base fee
    async fn suggest_fee_cap(&self) -> ToolResult<U256>;

    /// Receipt for `tx_hash`, or `None` while it is not yet included
    async fn transaction_receipt(&self, tx_hash: H256) -> ToolResult<Option<Receipt>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U64;

    #[test]
    fn test_receipt_from_ethers_receipt() {
        let mut raw = TransactionReceipt::default();
        raw.transaction_hash = H256::repeat_byte(0x42);
        raw.block_number = Some(U64::from(19_000_000u64));
        raw.status = Some(U64::from(1));
        raw.gas_used = Some(U256::from(84_000));

        let receipt = Receipt::from(raw.clone());
        assert_eq!(receipt.tx_hash, H256::repeat_byte(0x42));
        assert_eq!(receipt.block_number, 19_000_000);
        assert!(!receipt.reverted());

        raw.status = Some(U64::zero());
        assert!(Receipt::from(raw).reverted());
    }

    #[test]
    fn test_revert_error_carries_receipt_location() {
        let receipt = Receipt {
            tx_hash: H256::repeat_byte(0x0a),
            block_number: 77,
            success: false,
            gas_used: None,
        };

        match receipt.revert_error("execution reverted: already staked") {
            ToolError::Reverted {
                tx_hash,
                block_number,
                reason,
            } => {
                assert_eq!(tx_hash, format!("{:?}", H256::repeat_byte(0x0a)));
                assert_eq!(block_number, 77);
                assert_eq!(reason, "execution reverted: already staked");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
