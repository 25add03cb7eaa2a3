//! Stake validator keys in batches

use super::Workspace;
use crate::tx::NonceManager;

use anyhow::{bail, Context, Result};
use clap::Args;
use ethers::types::{Bytes, U256};
use std::path::{Path, PathBuf};
use tracing::info;

/// 3.1 ETH per validator
pub const DEFAULT_AMOUNT_WEI: u128 = 3_100_000_000_000_000_000;

/// Length of a compressed BLS12-381 public key
const BLS_PUBKEY_LEN: usize = 48;

#[derive(Debug, Args)]
pub struct StakeArgs {
    /// File with one hex BLS public key per line
    #[clap(long)]
    pub keys: PathBuf,

    /// Validators per stake transaction
    #[clap(long, default_value_t = 20)]
    pub batch_size: usize,

    /// Stake per validator in wei
    #[clap(long, default_value_t = DEFAULT_AMOUNT_WEI)]
    pub amount_wei: u128,
}

pub async fn run(workspace: &Workspace, args: &StakeArgs) -> Result<()> {
    if args.batch_size == 0 {
        bail!("--batch-size must be at least 1");
    }

    let keys = read_keys(&args.keys)?;
    if keys.is_empty() {
        bail!("No keys found in {}", args.keys.display());
    }

    let batches: Vec<&[Bytes]> = keys.chunks(args.batch_size).collect();
    let amount = U256::from(args.amount_wei);
    let values: Vec<U256> = batches
        .iter()
        .map(|batch| amount.saturating_mul(U256::from(batch.len())))
        .collect();

    info!(
        "Staking {} validators in {} batches of up to {}",
        keys.len(),
        batches.len(),
        args.batch_size
    );

    let (registry, from) = workspace.registry_writer()?;
    workspace.ensure_balance(from, &values).await?;

    let nonces = NonceManager::new();

    for (idx, (batch, value)) in batches.iter().zip(&values).enumerate() {
        let label = format!("stake batch {}/{}", idx + 1, batches.len());
        let receipt = workspace
            .submit_call(&nonces, label, from, *value, || registry.stake(batch.to_vec()))
            .await
            .with_context(|| format!("Batch {} failed", idx + 1))?;

        info!(
            "Batch {} completed in block {} ({} validators)",
            idx + 1,
            receipt.block_number,
            batch.len()
        );
    }

    info!("All staking batches completed");
    Ok(())
}

/// Read hex BLS public keys, one per line, `0x` optional, blank lines skipped
pub fn read_keys(path: &Path) -> Result<Vec<Bytes>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read keys file: {}", path.display()))?;
    parse_keys(&contents)
}

fn parse_keys(contents: &str) -> Result<Vec<Bytes>> {
    contents
        .lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(|(n, line)| -> Result<Bytes> {
            let raw = line.strip_prefix("0x").unwrap_or(line);
            let key = hex::decode(raw).with_context(|| format!("Line {}: invalid hex", n))?;
            if key.len() != BLS_PUBKEY_LEN {
                bail!(
                    "Line {}: expected {} byte BLS public key, got {} bytes",
                    n,
                    BLS_PUBKEY_LEN,
                    key.len()
                );
            }
            Ok(Bytes::from(key))
        })
        .collect()
}
