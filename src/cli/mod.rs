//! Command-line surface and the workflows behind each subcommand

mod events;
mod query;
mod stake;
mod unstake;

use crate::chain::{ChainClient, Receipt};
use crate::config::{NetworkConfig, Settings};
use crate::error::ToolError;
use crate::registry::{ArtifactStore, ValidatorRegistry};
use crate::tx::{CallOptions, FeeParameters, NonceManager, TransactionIntent, TransactionSender};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::contract::ContractCall;
use ethers::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub use self::events::{StoreEventsArgs, ValidateEventsArgs};
pub use self::query::QueryArgs;
pub use self::stake::StakeArgs;
pub use self::unstake::UnstakeArgs;

use crate::chain::provider::SignerClient;

#[derive(Debug, Parser)]
#[clap(name = "registry-tools", version, about = "Validator registry staking and event tools")]
pub struct Cli {
    /// Network profile from the configuration file
    #[clap(long, env = "REGISTRY_TOOLS_NETWORK")]
    pub network: String,

    /// Configuration file, defaults to $REGISTRY_TOOLS_CONFIG or config/default.toml
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[clap(long)]
    pub json_logs: bool,

    #[clap(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the staked validator count and the most recent keys
    Query(QueryArgs),
    /// Store all registry events as JSON artifacts
    StoreEvents(StoreEventsArgs),
    /// Compare stakes rebuilt from artifacts with a fresh scan of the chain
    ValidateEvents(ValidateEventsArgs),
    /// Stake validator keys in batches
    Stake(StakeArgs),
    /// Unstake every validator currently owned by an originator
    Unstake(UnstakeArgs),
}

impl Cli {
    pub async fn run(self, cancel: watch::Receiver<bool>) -> Result<()> {
        let workspace = Workspace::open(&self, cancel).await?;

        match &self.cmd {
            Command::Query(args) => query::run(&workspace, args).await,
            Command::StoreEvents(args) => events::store(&workspace, args).await,
            Command::ValidateEvents(args) => events::validate(&workspace, args).await,
            Command::Stake(args) => stake::run(&workspace, args).await,
            Command::Unstake(args) => unstake::run(&workspace, args).await,
        }
    }
}

/// Everything a command needs to talk to one network
pub struct Workspace {
    settings: Settings,
    client: Arc<ChainClient>,
    cancel: watch::Receiver<bool>,
}

impl Workspace {
    async fn open(cli: &Cli, cancel: watch::Receiver<bool>) -> Result<Self> {
        let settings = Settings::load(cli.config.as_deref())?;
        let network = settings.network(&cli.network)?.clone();

        let client = ChainClient::connect(network)
            .await
            .with_context(|| format!("Failed to connect to network {}", cli.network))?;

        info!(
            "Using network {} (chain {}, registry {})",
            cli.network,
            client.chain_id(),
            client.config().registry_address
        );

        Ok(Self {
            settings,
            client: Arc::new(client),
            cancel,
        })
    }

    fn network(&self) -> &NetworkConfig {
        self.client.config()
    }

    fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(self.settings.artifacts.dir.clone())
    }

    fn sender(&self) -> TransactionSender<ChainClient> {
        TransactionSender::new(self.client.clone(), &self.settings.submission)
            .with_cancellation(self.cancel.clone())
    }

    fn gas_limit(&self) -> U256 {
        U256::from(self.settings.submission.gas_limit)
    }

    /// Read-only registry bound to the plain provider
    fn registry_reader(&self) -> Result<ValidatorRegistry<Provider<Http>>> {
        Ok(ValidatorRegistry::new(
            self.network().registry()?,
            Arc::new(self.client.http().clone()),
        ))
    }

    /// Registry bound to the configured signer
    fn registry_writer(&self) -> Result<(ValidatorRegistry<SignerClient>, Address)> {
        let signer = self.client.signer()?;
        let from = signer.address();
        Ok((ValidatorRegistry::new(self.network().registry()?, signer), from))
    }

    /// Fail unless `from` can pay for every planned submission at current fees
    async fn ensure_balance(&self, from: Address, values: &[U256]) -> Result<()> {
        let estimate = FeeParameters::suggested(self.client.as_ref(), 0, self.gas_limit()).await?;
        let need = values
            .iter()
            .fold(U256::zero(), |acc, value| acc.saturating_add(estimate.max_cost(*value)));
        let have = self.client.balance(from).await?;

        info!("Balance of {:?}: {} wei, need up to {} wei", from, have, need);
        if have < need {
            return Err(ToolError::InsufficientBalance {
                address: format!("{:?}", from),
                have: have.to_string(),
                need: need.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Run one registry call through the retrying sender and require a successful receipt
    async fn submit_call<B>(
        &self,
        nonces: &NonceManager,
        label: String,
        from: Address,
        value: U256,
        build: B,
    ) -> Result<Receipt>
    where
        B: Fn() -> ContractCall<SignerClient, ()>,
    {
        let chain = self.client.as_ref();
        let nonce = nonces.allocate(chain, from).await?;

        let fees = match FeeParameters::suggested(chain, nonce, self.gas_limit()).await {
            Ok(fees) => fees,
            Err(e) => {
                nonces.release(from, nonce).await?;
                return Err(e.into());
            }
        };

        let intent = TransactionIntent::new(label, from, |opts: CallOptions| {
            let mut call = build();
            opts.apply(&mut call.tx);
            async move {
                let pending = call
                    .send()
                    .await
                    .map_err(|e| ToolError::Contract(e.to_string()))?;
                Ok::<_, ToolError>(pending.tx_hash())
            }
        })
        .with_value(value);

        let outcome = self.sender().submit_with_retry(intent, fees).await;
        nonces.settle(chain, from, nonce, &outcome).await?;

        let receipt = match outcome {
            Ok(receipt) => receipt,
            Err(e) => {
                if e.is_exhaustion() {
                    warn!(
                        "The last replacement for nonce {} may still be included, check {:?} before retrying",
                        nonce, from
                    );
                } else {
                    let unconfirmed = nonces.unconfirmed(from).await;
                    if !unconfirmed.is_empty() {
                        warn!("Nonces {:?} of {:?} were broadcast but never confirmed", unconfirmed, from);
                    }
                }
                return Err(e.into());
            }
        };

        if receipt.reverted() {
            let reason = match self.client.revert_reason(&receipt).await {
                Ok(reason) => reason,
                Err(e) => {
                    warn!("Could not replay {:?}: {}", receipt.tx_hash, e);
                    "unknown".to_string()
                }
            };
            return Err(receipt.revert_error(reason).into());
        }

        Ok(receipt)
    }
}
