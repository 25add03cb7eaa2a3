//! Chain client over an ethers HTTP provider

use super::{ChainRpc, Receipt};
use crate::config::NetworkConfig;
use crate::error::{ToolError, ToolResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Signing client used for contract writes
pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Connection to one configured network
pub struct ChainClient {
    /// Network configuration
    config: NetworkConfig,
    /// HTTP provider
    provider: Provider<Http>,
}

impl ChainClient {
    /// Connect to the network and check that the node serves the configured chain
    pub async fn connect(config: NetworkConfig) -> ToolResult<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| ToolError::ChainConnection {
                chain_id: config.chain_id,
                message: format!("Invalid RPC URL {}: {}", config.rpc_url, e),
            })?
            .interval(Duration::from_millis(100));

        let remote_chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| ToolError::ChainConnection {
                chain_id: config.chain_id,
                message: e.to_string(),
            })?
            .as_u64();

        if remote_chain_id != config.chain_id {
            return Err(ToolError::Config(format!(
                "RPC {} serves chain {}, expected {}",
                config.rpc_url, remote_chain_id, config.chain_id
            )));
        }

        info!("Connected to chain {} via {}", config.chain_id, config.rpc_url);

        Ok(Self { config, provider })
    }

    /// Get the HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        &self.provider
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Get network configuration
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Get current block number
    pub async fn block_number(&self) -> ToolResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(|e| self.connection_error(e))
    }

    /// Get balance of an account at the latest block
    pub async fn balance(&self, address: Address) -> ToolResult<U256> {
        self.provider
            .get_balance(address, None)
            .await
            .map_err(|e| self.connection_error(e))
    }

    /// Load the configured signing credential
    pub fn load_wallet(&self) -> ToolResult<LocalWallet> {
        let signer = &self.config.signer;

        let wallet = if let Some(key) = signer.private_key.as_deref().filter(|k| !k.is_empty()) {
            key.parse::<LocalWallet>()
                .map_err(|e| ToolError::Wallet(format!("Invalid private key: {}", e)))?
        } else if let Some(path) = signer
            .keystore_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
        {
            let password = signer.keystore_password.as_deref().unwrap_or_default();
            LocalWallet::decrypt_keystore(path, password).map_err(|e| {
                ToolError::Wallet(format!("Failed to decrypt keystore {:?}: {}", path, e))
            })?
        } else {
            return Err(ToolError::Wallet(
                "No signer configured. Set signer.private_key or signer.keystore_path".to_string(),
            ));
        };

        Ok(wallet.with_chain_id(self.config.chain_id))
    }

    /// Build a signing client for contract writes
    pub fn signer(&self) -> ToolResult<Arc<SignerClient>> {
        let wallet = self.load_wallet()?;
        info!("Signing as {:?} on chain {}", wallet.address(), self.config.chain_id);
        Ok(Arc::new(SignerMiddleware::new(self.provider.clone(), wallet)))
    }

    /// Replay a reverted transaction at its block and return the node's error message
    pub async fn revert_reason(&self, receipt: &Receipt) -> ToolResult<String> {
        let tx = self
            .provider
            .get_transaction(receipt.tx_hash)
            .await
            .map_err(|e| self.connection_error(e))?
            .ok_or_else(|| {
                ToolError::Contract(format!("Transaction {:?} not found", receipt.tx_hash))
            })?;

        let mut request = TransactionRequest::new()
            .from(tx.from)
            .gas(tx.gas)
            .value(tx.value)
            .data(tx.input.clone());
        if let Some(to) = tx.to {
            request = request.to(to);
        }
        let call: TypedTransaction = request.into();
        let block = BlockId::Number(BlockNumber::Number(receipt.block_number.into()));

        match self.provider.call(&call, Some(block)).await {
            Err(e) => Ok(e.to_string()),
            Ok(output) => {
                debug!("Replay of {:?} did not revert", receipt.tx_hash);
                Ok(format!(
                    "no error on replay, output 0x{}",
                    hex::encode(output.as_ref())
                ))
            }
        }
    }

    fn connection_error(&self, e: ProviderError) -> ToolError {
        ToolError::ChainConnection {
            chain_id: self.config.chain_id,
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl ChainRpc for ChainClient {
    async fn pending_nonce(&self, address: Address) -> ToolResult<u64> {
        let nonce = self
            .provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| ToolError::Nonce {
                address: format!("{:?}", address),
                message: e.to_string(),
            })?;

        Ok(nonce.as_u64())
    }

    async fn suggest_priority_fee(&self) -> ToolResult<U256> {
        self.provider
            .request::<_, U256>("eth_maxPriorityFeePerGas", ())
            .await
            .map_err(|e| ToolError::FeeSuggestion(format!("Failed to get gas tip cap: {}", e)))
    }

    async fn suggest_fee_cap(&self) -> ToolResult<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| ToolError::FeeSuggestion(format!("Failed to get gas price: {}", e)))
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> ToolResult<Option<Receipt>> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map(|receipt| receipt.map(Receipt::from))
            .map_err(|e| self.connection_error(e))
    }
}
