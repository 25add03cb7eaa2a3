//! Error types for the registry tools

use thiserror::Error;

/// Node messages that mean an equivalent or better-priced transaction is already pending.
const SOFT_SUBMISSION_MARKERS: [&str; 2] = ["replacement transaction underpriced", "already known"];

/// Node message that means the nonce has already been used by an included transaction.
const NONCE_TOO_LOW_MARKER: &str = "nonce too low";

/// Main error type for the registry tools
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Fee suggestion error: {0}")]
    FeeSuggestion(String),

    #[error("Invalid fee parameters: {0}")]
    InvalidFees(String),

    #[error("Transaction submission failed on attempt {attempt}: {message}")]
    Submission { attempt: u32, message: String },

    #[error("Failed waiting for inclusion of {tx_hash}: {message}")]
    Confirmation { tx_hash: String, message: String },

    #[error("Transaction not included after {attempts} attempts")]
    NotIncluded { attempts: u32 },

    #[error("Nonce {nonce} already consumed and no earlier attempt was found on chain: {message}")]
    NonceConsumed { nonce: u64, message: String },

    #[error("Submission cancelled during attempt {attempt}")]
    Cancelled { attempt: u32 },

    #[error("Nonce error for {address}: {message}")]
    Nonce { address: String, message: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Transaction {tx_hash} reverted in block {block_number}: {reason}")]
    Reverted {
        tx_hash: String,
        block_number: u64,
        reason: String,
    },

    #[error("Valset version changed during query: expected {expected}, got {actual}")]
    ValsetVersionMismatch { expected: String, actual: String },

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Insufficient balance for {address}: have {have} wei, need {need} wei")]
    InsufficientBalance {
        address: String,
        have: String,
        need: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ToolError {
    /// The network already holds an equivalent or better-priced transaction for the nonce.
    /// Such submissions are retried on the next attempt instead of aborting.
    pub fn is_soft_submission(&self) -> bool {
        let message = self.to_string().to_lowercase();
        SOFT_SUBMISSION_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    }

    /// The nonce was consumed, possibly by one of our own earlier attempts.
    pub fn is_nonce_too_low(&self) -> bool {
        self.to_string().to_lowercase().contains(NONCE_TOO_LOW_MARKER)
    }

    /// All attempts timed out; the last one may still confirm later.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, ToolError::NotIncluded { .. })
    }
}

/// Result type for registry tool operations
pub type ToolResult<T> = Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_submission_classification() {
        let underpriced = ToolError::Contract(
            "(code: -32000, message: replacement transaction underpriced, data: None)".to_string(),
        );
        let known = ToolError::Contract("Already Known".to_string());
        let fatal = ToolError::Contract("insufficient funds for gas * price + value".to_string());

        assert!(underpriced.is_soft_submission());
        assert!(known.is_soft_submission());
        assert!(!fatal.is_soft_submission());
        assert!(!fatal.is_nonce_too_low());
    }

    #[test]
    fn test_nonce_too_low_is_not_soft() {
        let err = ToolError::Contract("nonce too low: next nonce 8, tx nonce 7".to_string());
        assert!(err.is_nonce_too_low());
        assert!(!err.is_soft_submission());
    }

    #[test]
    fn test_exhaustion_is_distinct() {
        assert!(ToolError::NotIncluded { attempts: 10 }.is_exhaustion());
        assert!(!ToolError::Confirmation {
            tx_hash: "0x01".to_string(),
            message: "connection reset".to_string(),
        }
        .is_exhaustion());
    }
}
