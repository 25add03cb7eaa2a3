//! Print the staked validator set

use super::Workspace;
use crate::registry::{collect_staked_validators, RegistryReader, QUERY_BATCH_SIZE};

use anyhow::Result;
use clap::Args;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Number of most recent keys to print
    #[clap(long, default_value_t = 10)]
    pub last: usize,
}

pub async fn run(workspace: &Workspace, args: &QueryArgs) -> Result<()> {
    let reader = workspace.registry_reader()?;

    let started = Instant::now();
    let (count, version) = reader.number_of_staked_validators().await?;
    println!("Number of staked validators: {}", count);
    let count_elapsed = started.elapsed();

    let started = Instant::now();
    let set = collect_staked_validators(&reader, QUERY_BATCH_SIZE).await?;
    println!("Aggregated validator set length: {}", set.validators.len());
    if set.valset_version != version {
        info!(
            "Valset version moved from {} to {} between queries",
            version, set.valset_version
        );
    }

    println!("Up to last {} of staked validator BLS pubkeys:", args.last);
    for key in last_keys(&set.hex_keys(), args.last) {
        println!("  0x{}", key);
    }

    info!("Time to query number of staked validators: {:?}", count_elapsed);
    info!("Time to query all staked validator BLS pubkeys: {:?}", started.elapsed());
    Ok(())
}

fn last_keys(keys: &[String], n: usize) -> &[String] {
    &keys[keys.len().saturating_sub(n)..]
}
