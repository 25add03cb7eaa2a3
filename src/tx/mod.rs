//! Transaction submission: nonce allocation, fee escalation and inclusion waits

mod gas;
mod intent;
mod nonce;
mod sender;

pub use gas::FeeParameters;
pub use intent::{CallOptions, TransactionIntent};
pub use nonce::NonceManager;
pub use sender::TransactionSender;
