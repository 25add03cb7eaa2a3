//! Store registry events as artifacts and validate them against the chain

use super::Workspace;
use crate::registry::events::{reconstruct_stakes, stake_differences, EventScanner};
use crate::registry::EventKind;

use anyhow::{bail, Result};
use clap::Args;
use ethers::providers::{Http, Provider};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Args)]
pub struct StoreEventsArgs {
    /// First block to scan, defaults to the network's deploy block
    #[clap(long)]
    pub from_block: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ValidateEventsArgs {
    /// First block to scan, defaults to the network's deploy block
    #[clap(long)]
    pub from_block: Option<u64>,
}

fn scanner(workspace: &Workspace) -> Result<EventScanner<Provider<Http>>> {
    let network = workspace.network();
    Ok(EventScanner::new(
        network.registry()?,
        Arc::new(workspace.client.http().clone()),
        network.log_chunk_size,
    ))
}

pub async fn store(workspace: &Workspace, args: &StoreEventsArgs) -> Result<()> {
    let scanner = scanner(workspace)?;
    let store = workspace.artifacts();
    let from = args.from_block.unwrap_or(workspace.network().deploy_block);
    let head = workspace.client.block_number().await?;

    for kind in EventKind::ALL {
        let events = scanner.collect(kind, from, head).await?;
        store.write(kind, &events, head)?;
    }

    info!(
        "Events up to block {} have been serialized to {}",
        head,
        store.dir().display()
    );
    Ok(())
}

pub async fn validate(workspace: &Workspace, args: &ValidateEventsArgs) -> Result<()> {
    let store = workspace.artifacts();
    let staked = store.read_latest(EventKind::Staked)?;
    let withdrawn = store.read_latest(EventKind::Withdraw)?;
    let reconstructed = reconstruct_stakes(&staked, &withdrawn);

    let scanner = scanner(workspace)?;
    let from = args.from_block.unwrap_or(workspace.network().deploy_block);
    let head = workspace.client.block_number().await?;
    let (chain_staked, chain_withdrawn) = futures::try_join!(
        scanner.collect(EventKind::Staked, from, head),
        scanner.collect(EventKind::Withdraw, from, head),
    )?;
    let actual = reconstruct_stakes(&chain_staked, &chain_withdrawn);

    let differences = stake_differences(&reconstructed, &actual);
    if differences.is_empty() {
        info!("Validator lists match ({} validators)", actual.len());
        return Ok(());
    }

    warn!("Reconstructed list length: {}", reconstructed.len());
    warn!("Actual list length: {}", actual.len());
    for key in differences.iter().take(10) {
        warn!(
            "0x{}: artifacts {:?}, chain {:?}",
            key,
            reconstructed.get(key),
            actual.get(key)
        );
    }
    bail!("Validator lists do not match: {} keys differ", differences.len())
}
