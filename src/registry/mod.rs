//! Validator registry contract: bindings, staked-set queries and events

pub mod artifacts;
pub mod events;

pub use artifacts::ArtifactStore;
pub use events::{EventKind, RegistryEvent};

use crate::error::{ToolError, ToolResult};

use async_trait::async_trait;
use ethers::prelude::*;
use tracing::{debug, info};

/// Page size for `getStakedValidators`
pub const QUERY_BATCH_SIZE: u64 = 1000;

abigen!(
    ValidatorRegistry,
    r#"[
        function stake(bytes[] valBLSPubKeys) external payable
        function unstake(bytes[] blsPubKeys) external
        function withdraw(bytes[] blsPubKeys) external
        function getNumberOfStakedValidators() external view returns (uint256, uint256)
        function getStakedValidators(uint256 start, uint256 end) external view returns (bytes[], uint256)
        event Staked(address indexed txOriginator, bytes valBLSPubKey, uint256 amount)
        event Unstaked(address indexed txOriginator, bytes valBLSPubKey, uint256 amount)
        event StakeWithdrawn(address indexed txOriginator, bytes valBLSPubKey, uint256 amount)
    ]"#
);

/// Read-only view of the registry's staked validator set
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryReader: Send + Sync {
    /// Number of staked validators and the current valset version
    async fn number_of_staked_validators(&self) -> ToolResult<(U256, U256)>;

    /// Staked validator keys in `[start, end)` and the valset version they were read at
    async fn staked_validators(&self, start: U256, end: U256) -> ToolResult<(Vec<Bytes>, U256)>;
}

#[async_trait]
impl<M> RegistryReader for ValidatorRegistry<M>
where
    M: Middleware + 'static,
{
    async fn number_of_staked_validators(&self) -> ToolResult<(U256, U256)> {
        self.get_number_of_staked_validators()
            .call()
            .await
            .map_err(|e| {
                ToolError::Contract(format!("Failed to get number of staked validators: {}", e))
            })
    }

    async fn staked_validators(&self, start: U256, end: U256) -> ToolResult<(Vec<Bytes>, U256)> {
        self.get_staked_validators(start, end)
            .call()
            .await
            .map_err(|e| ToolError::Contract(format!("Failed to get staked validators: {}", e)))
    }
}

/// Staked validator keys read at one valset version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakedValidatorSet {
    pub valset_version: U256,
    pub validators: Vec<Bytes>,
}

impl StakedValidatorSet {
    /// Keys as lowercase hex without a `0x` prefix
    pub fn hex_keys(&self) -> Vec<String> {
        self.validators.iter().map(|key| hex::encode(key.as_ref())).collect()
    }
}

/// Page through the full staked set, failing if it changes while being read
pub async fn collect_staked_validators<R>(reader: &R, batch_size: u64) -> ToolResult<StakedValidatorSet>
where
    R: RegistryReader + ?Sized,
{
    let batch_size = batch_size.max(1);
    let (count, valset_version) = reader.number_of_staked_validators().await?;
    let total = u64::try_from(count).map_err(|_| {
        ToolError::Contract(format!("Staked validator count {} does not fit in u64", count))
    })?;

    info!(
        "Querying {} staked validators at valset version {}",
        total, valset_version
    );

    let mut validators = Vec::new();
    let mut start = 0u64;
    while start < total {
        let end = std::cmp::min(start + batch_size, total);
        let (page, version) = reader
            .staked_validators(U256::from(start), U256::from(end))
            .await?;

        if version != valset_version {
            return Err(ToolError::ValsetVersionMismatch {
                expected: valset_version.to_string(),
                actual: version.to_string(),
            });
        }

        debug!("Fetched validators {}..{} ({} keys)", start, end, page.len());
        validators.extend(page);
        start = end;
    }

    if validators.len() as u64 != total {
        return Err(ToolError::Contract(format!(
            "Staked validator count {} does not match aggregated set length {}",
            total,
            validators.len()
        )));
    }

    Ok(StakedValidatorSet {
        valset_version,
        validators,
    })
}
