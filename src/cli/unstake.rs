//! Unstake every validator an originator currently owns

use super::Workspace;
use crate::registry::events::{active_owners, owned_by};
use crate::registry::{collect_staked_validators, EventKind, QUERY_BATCH_SIZE};
use crate::tx::NonceManager;

use anyhow::{Context, Result};
use clap::Args;
use ethers::types::{Address, Bytes, U256};
use tracing::{info, warn};

#[derive(Debug, Args)]
pub struct UnstakeArgs {
    /// Address that staked the validators
    #[clap(long)]
    pub originator: String,
}

pub async fn run(workspace: &Workspace, args: &UnstakeArgs) -> Result<()> {
    let originator: Address = args
        .originator
        .parse()
        .with_context(|| format!("Invalid originator address: {}", args.originator))?;

    let store = workspace.artifacts();
    let staked = store.read_latest(EventKind::Staked)?;
    let unstaked = store.read_latest(EventKind::Unstaked)?;
    let withdrawn = store.read_latest(EventKind::Withdraw)?;
    let owners = active_owners(&staked, &unstaked, &withdrawn);

    let reader = workspace.registry_reader()?;
    let live = collect_staked_validators(&reader, QUERY_BATCH_SIZE).await?;

    let to_remove = owned_by(&owners, &live.hex_keys(), originator)
        .iter()
        .map(|key| hex::decode(key).map(Bytes::from))
        .collect::<Result<Vec<_>, _>>()
        .context("Artifact contains a non-hex validator key")?;

    info!("Number of validators to unstake: {}", to_remove.len());
    if to_remove.is_empty() {
        return Ok(());
    }

    let (registry, from) = workspace.registry_writer()?;
    if from != originator {
        warn!(
            "Signing as {:?}, not the originator {:?}; the registry may reject the call",
            from, originator
        );
    }
    workspace.ensure_balance(from, &[U256::zero()]).await?;

    let nonces = NonceManager::new();
    let receipt = workspace
        .submit_call(
            &nonces,
            format!("unstake {} validators", to_remove.len()),
            from,
            U256::zero(),
            || registry.unstake(to_remove.clone()),
        )
        .await?;

    info!("Unstake tx included in block {}", receipt.block_number);
    Ok(())
}
