//! Registry events: chunked log scans and state reconstruction from them

use super::{StakeWithdrawnFilter, StakedFilter, UnstakedFilter, ValidatorRegistry};
use crate::error::{ToolError, ToolResult};

use ethers::contract::{EthEvent, Event};
use ethers::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry event kinds persisted as artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Staked,
    Unstaked,
    Withdraw,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Staked, EventKind::Unstaked, EventKind::Withdraw];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Staked => "staked",
            EventKind::Unstaked => "unstaked",
            EventKind::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registry event as stored in artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub tx_originator: Address,
    /// BLS public key, lowercase hex without `0x`
    pub val_bls_pub_key: String,
    #[serde(with = "decimal")]
    pub amount: U256,
    pub block: u64,
}

impl RegistryEvent {
    pub fn new(tx_originator: Address, val_bls_pub_key: &[u8], amount: U256, block: u64) -> Self {
        Self {
            tx_originator,
            val_bls_pub_key: hex::encode(val_bls_pub_key),
            amount,
            block,
        }
    }
}

/// `U256` written as a base-10 string.
///
/// Reading also accepts a bare JSON number of any length, which is how older
/// artifacts store amounts. The raw token is parsed so large values stay exact.
mod decimal {
    use ethers::types::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use serde_json::value::RawValue;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        let token = raw.get().trim();
        let digits = if token.starts_with('"') {
            serde_json::from_str::<String>(token).map_err(de::Error::custom)?
        } else {
            token.to_string()
        };
        U256::from_dec_str(&digits)
            .map_err(|e| de::Error::custom(format!("invalid decimal amount {}: {}", token, e)))
    }
}

/// Decoded registry logs that carry an originator, key and amount
trait IntoRegistryEvent {
    fn into_registry_event(self, block: u64) -> RegistryEvent;
}

macro_rules! impl_into_registry_event {
    ($($filter:ty),*) => {
        $(
            impl IntoRegistryEvent for $filter {
                fn into_registry_event(self, block: u64) -> RegistryEvent {
                    RegistryEvent::new(self.tx_originator, &self.val_bls_pub_key, self.amount, block)
                }
            }
        )*
    };
}

impl_into_registry_event!(StakedFilter, UnstakedFilter, StakeWithdrawnFilter);

/// Inclusive `[from, to]` windows of at most `chunk` blocks
pub fn block_windows(from: u64, to: u64, chunk: u64) -> Vec<(u64, u64)> {
    let chunk = chunk.max(1);
    let mut windows = Vec::new();
    let mut start = from;
    while start <= to {
        let end = std::cmp::min(to, start.saturating_add(chunk - 1));
        windows.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    windows
}

/// Scans registry logs over a block range
pub struct EventScanner<M> {
    registry: ValidatorRegistry<M>,
    chunk_size: u64,
}

impl<M> EventScanner<M>
where
    M: Middleware + 'static,
{
    pub fn new(address: Address, client: Arc<M>, chunk_size: u64) -> Self {
        Self {
            registry: ValidatorRegistry::new(address, client),
            chunk_size,
        }
    }

    /// All events of `kind` in `[from, to]`, in chain order
    pub async fn collect(&self, kind: EventKind, from: u64, to: u64) -> ToolResult<Vec<RegistryEvent>> {
        info!("Querying {} events from block {} to {}", kind, from, to);

        let events = match kind {
            EventKind::Staked => self.scan(kind, || self.registry.staked_filter(), from, to).await?,
            EventKind::Unstaked => {
                self.scan(kind, || self.registry.unstaked_filter(), from, to).await?
            }
            EventKind::Withdraw => {
                self.scan(kind, || self.registry.stake_withdrawn_filter(), from, to)
                    .await?
            }
        };

        info!("Found {} {} events", events.len(), kind);
        Ok(events)
    }

    async fn scan<D, F>(&self, kind: EventKind, filter: F, from: u64, to: u64) -> ToolResult<Vec<RegistryEvent>>
    where
        D: EthEvent + IntoRegistryEvent,
        F: Fn() -> Event<Arc<M>, M, D>,
    {
        let mut events = Vec::new();
        for (start, end) in block_windows(from, to, self.chunk_size) {
            let logs = filter()
                .from_block(start)
                .to_block(end)
                .query_with_meta()
                .await
                .map_err(|e| {
                    ToolError::Contract(format!(
                        "Failed to get {} events in blocks {}..={}: {}",
                        kind, start, end, e
                    ))
                })?;

            debug!("Blocks {}..={}: {} {} events", start, end, logs.len(), kind);
            events.extend(
                logs.into_iter()
                    .map(|(log, meta)| log.into_registry_event(meta.block_number.as_u64())),
            );
        }
        Ok(events)
    }
}

/// Net stake per key: staked amounts minus withdrawn amounts.
///
/// Withdrawals for keys that were never staked are ignored.
pub fn reconstruct_stakes(staked: &[RegistryEvent], withdrawn: &[RegistryEvent]) -> BTreeMap<String, U256> {
    let mut stakes: BTreeMap<String, U256> = BTreeMap::new();

    for event in staked {
        let entry = stakes.entry(event.val_bls_pub_key.clone()).or_default();
        *entry = entry.saturating_add(event.amount);
    }

    for event in withdrawn {
        if let Some(entry) = stakes.get_mut(&event.val_bls_pub_key) {
            *entry = entry.saturating_sub(event.amount);
        }
    }

    stakes
}

/// Keys present in only one of two reconstructions, or with different stakes
pub fn stake_differences(
    expected: &BTreeMap<String, U256>,
    actual: &BTreeMap<String, U256>,
) -> Vec<String> {
    let mut keys: Vec<String> = expected
        .keys()
        .chain(actual.keys())
        .filter(|key| expected.get(*key) != actual.get(*key))
        .cloned()
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Originator of every currently staked key.
///
/// The latest `Staked` event decides ownership; an unstake or withdrawal at
/// the same block or later removes it.
pub fn active_owners(
    staked: &[RegistryEvent],
    unstaked: &[RegistryEvent],
    withdrawn: &[RegistryEvent],
) -> HashMap<String, RegistryEvent> {
    let mut owners: HashMap<String, RegistryEvent> = HashMap::new();

    for event in staked {
        match owners.get(&event.val_bls_pub_key) {
            Some(current) if current.block > event.block => {}
            _ => {
                owners.insert(event.val_bls_pub_key.clone(), event.clone());
            }
        }
    }

    for event in unstaked.iter().chain(withdrawn) {
        let removed = owners
            .get(&event.val_bls_pub_key)
            .map(|owner| event.block >= owner.block)
            .unwrap_or(false);
        if removed {
            owners.remove(&event.val_bls_pub_key);
        }
    }

    owners
}

/// Keys from `staked_keys` whose current owner is `originator`, in input order
pub fn owned_by(
    owners: &HashMap<String, RegistryEvent>,
    staked_keys: &[String],
    originator: Address,
) -> Vec<String> {
    staked_keys
        .iter()
        .filter(|key| {
            owners
                .get(*key)
                .map(|owner| owner.tx_originator == originator)
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}
