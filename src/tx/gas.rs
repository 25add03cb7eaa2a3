//! EIP-1559 fee parameters and replacement fee boosting

use crate::chain::ChainRpc;
use crate::error::{ToolError, ToolResult};

use ethers::types::U256;
use tracing::debug;

/// Fee and ordering parameters for one physical submission.
///
/// `fee_cap >= tip` is enforced on construction, so `base_fee()` can never
/// underflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeParameters {
    tip: U256,
    fee_cap: U256,
    gas_limit: U256,
    nonce: u64,
}

impl FeeParameters {
    pub fn new(tip: U256, fee_cap: U256, gas_limit: U256, nonce: u64) -> ToolResult<Self> {
        if fee_cap < tip {
            return Err(ToolError::InvalidFees(format!(
                "fee cap {} is below tip {}",
                fee_cap, tip
            )));
        }

        Ok(Self {
            tip,
            fee_cap,
            gas_limit,
            nonce,
        })
    }

    /// Attempt-zero parameters from the network's current suggestions
    pub async fn suggested<C>(chain: &C, nonce: u64, gas_limit: U256) -> ToolResult<Self>
    where
        C: ChainRpc + ?Sized,
    {
        let (tip, fee_cap) = suggested_tip_and_fee_cap(chain).await?;
        debug!(
            "Suggested fees for nonce {}: tip {}, fee cap {}",
            nonce, tip, fee_cap
        );
        Self::new(tip, fee_cap, gas_limit, nonce)
    }

    /// Priority fee per gas
    pub fn tip(&self) -> U256 {
        self.tip
    }

    /// Maximum fee per gas, base fee included
    pub fn fee_cap(&self) -> U256 {
        self.fee_cap
    }

    pub fn gas_limit(&self) -> U256 {
        self.gas_limit
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Base fee component of the cap
    pub fn base_fee(&self) -> U256 {
        self.fee_cap - self.tip
    }

    /// Worst-case spend: every unit of gas at the fee cap, plus the transferred value
    pub fn max_cost(&self, value: U256) -> U256 {
        self.gas_limit.saturating_mul(self.fee_cap).saturating_add(value)
    }

    /// Parameters for a replacement of this submission at the same nonce.
    ///
    /// Takes the larger of the previous and suggested base fee, and of the
    /// previous and suggested tip, then raises each by 10% plus one wei.
    pub fn boosted(&self, suggested_tip: U256, suggested_fee_cap: U256) -> ToolResult<Self> {
        if suggested_fee_cap < suggested_tip {
            return Err(ToolError::InvalidFees(format!(
                "suggested fee cap {} is below suggested tip {}, base fee would be negative",
                suggested_fee_cap, suggested_tip
            )));
        }

        let suggested_base_fee = suggested_fee_cap - suggested_tip;
        let base_fee = std::cmp::max(suggested_base_fee, self.base_fee());
        let tip = std::cmp::max(suggested_tip, self.tip);

        let boosted_base_fee = boost(base_fee)?;
        let boosted_tip = boost(tip)?;
        let fee_cap = boosted_base_fee
            .checked_add(boosted_tip)
            .ok_or_else(|| ToolError::InvalidFees("boosted fee cap overflows".to_string()))?;

        Self::new(boosted_tip, fee_cap, self.gas_limit, self.nonce)
    }
}

/// Raise a fee by 10% plus one, so the result is strictly larger even at zero
pub fn boost(value: U256) -> ToolResult<U256> {
    value
        .checked_add(value / 10)
        .and_then(|v| v.checked_add(U256::one()))
        .ok_or_else(|| ToolError::InvalidFees(format!("boosting {} overflows", value)))
}

/// Query the network's tip and fee cap suggestions
pub async fn suggested_tip_and_fee_cap<C>(chain: &C) -> ToolResult<(U256, U256)>
where
    C: ChainRpc + ?Sized,
{
    let tip = chain.suggest_priority_fee().await?;
    let fee_cap = chain.suggest_fee_cap().await?;
    Ok((tip, fee_cap))
}

/// Fetch fresh suggestions and boost `previous` for the next attempt
pub async fn boost_fees<C>(chain: &C, previous: &FeeParameters) -> ToolResult<FeeParameters>
where
    C: ChainRpc + ?Sized,
{
    debug!(
        "Gas params for tx that was not included: tip {}, fee cap {}, base fee {}",
        previous.tip(),
        previous.fee_cap(),
        previous.base_fee()
    );

    let (tip, fee_cap) = suggested_tip_and_fee_cap(chain).await?;
    let boosted = previous.boosted(tip, fee_cap)?;

    debug!(
        "Boosted gas: tip {}, fee cap {}, base fee {}",
        boosted.tip(),
        boosted.fee_cap(),
        boosted.base_fee()
    );

    Ok(boosted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainRpc;

    fn params(tip: u64, fee_cap: u64) -> FeeParameters {
        FeeParameters::new(tip.into(), fee_cap.into(), 3_000_000u64.into(), 7).unwrap()
    }

    #[test]
    fn test_boost_never_stalls_at_zero() {
        assert_eq!(boost(U256::zero()).unwrap(), U256::one());
        assert_eq!(boost(U256::from(9)).unwrap(), U256::from(10));
        assert_eq!(boost(U256::from(100)).unwrap(), U256::from(111));
    }

    #[test]
    fn test_boost_overflow_is_an_error() {
        assert!(boost(U256::MAX).is_err());
    }

    #[test]
    fn test_rejects_fee_cap_below_tip() {
        let err = FeeParameters::new(10u64.into(), 9u64.into(), 21_000u64.into(), 0).unwrap_err();
        assert!(matches!(err, ToolError::InvalidFees(_)));
    }

    #[test]
    fn test_boosted_uses_previous_when_network_is_cheaper() {
        // previous: tip 100, base 1000; network: tip 50, base 500
        let previous = params(100, 1_100);
        let boosted = previous.boosted(50u64.into(), 550u64.into()).unwrap();

        assert_eq!(boosted.tip(), U256::from(111));
        assert_eq!(boosted.base_fee(), U256::from(1_101));
        assert_eq!(boosted.fee_cap(), U256::from(1_212));
        assert_eq!(boosted.nonce(), previous.nonce());
        assert_eq!(boosted.gas_limit(), previous.gas_limit());
    }

    #[test]
    fn test_boosted_follows_network_when_it_rises() {
        // previous: tip 10, base 100; network: tip 20, base 400
        let previous = params(10, 110);
        let boosted = previous.boosted(20u64.into(), 420u64.into()).unwrap();

        assert_eq!(boosted.tip(), U256::from(23));
        assert_eq!(boosted.base_fee(), U256::from(441));
        assert_eq!(boosted.fee_cap(), U256::from(464));
    }

    #[test]
    fn test_boosted_mixes_dimensions_independently() {
        // network tip higher, previous base fee higher
        let previous = params(5, 1_005);
        let boosted = previous.boosted(50u64.into(), 60u64.into()).unwrap();

        assert_eq!(boosted.tip(), U256::from(56));
        assert_eq!(boosted.base_fee(), U256::from(1_101));
    }

    #[test]
    fn test_repeated_boosts_strictly_increase() {
        let mut current = params(0, 0);
        for _ in 0..50 {
            let next = current.boosted(U256::zero(), U256::zero()).unwrap();
            assert!(next.fee_cap() >= next.tip());
            assert!(next.tip() > current.tip());
            assert!(next.base_fee() > current.base_fee());
            assert!(next.tip() >= current.tip() + current.tip() / 10 + 1);
            current = next;
        }
    }

    #[test]
    fn test_boosted_rejects_negative_suggested_base_fee() {
        let previous = params(10, 110);
        let err = previous.boosted(100u64.into(), 99u64.into()).unwrap_err();
        assert!(matches!(err, ToolError::InvalidFees(_)));
    }

    #[test]
    fn test_max_cost_includes_value() {
        let fees = FeeParameters::new(1u64.into(), 10u64.into(), 100u64.into(), 0).unwrap();
        assert_eq!(fees.max_cost(5u64.into()), U256::from(1_005));
    }

    #[tokio::test]
    async fn test_suggested_reads_tip_and_cap() {
        let mut chain = MockChainRpc::new();
        chain
            .expect_suggest_priority_fee()
            .returning(|| Ok(U256::from(2_000_000_000u64)));
        chain
            .expect_suggest_fee_cap()
            .returning(|| Ok(U256::from(12_000_000_000u64)));

        let fees = FeeParameters::suggested(&chain, 3, 3_000_000u64.into())
            .await
            .unwrap();

        assert_eq!(fees.tip(), U256::from(2_000_000_000u64));
        assert_eq!(fees.base_fee(), U256::from(10_000_000_000u64));
        assert_eq!(fees.nonce(), 3);
    }

    #[tokio::test]
    async fn test_boost_fees_queries_network() {
        let mut chain = MockChainRpc::new();
        chain
            .expect_suggest_priority_fee()
            .times(1)
            .returning(|| Ok(U256::from(30)));
        chain
            .expect_suggest_fee_cap()
            .times(1)
            .returning(|| Ok(U256::from(130)));

        let boosted = boost_fees(&chain, &params(10, 60)).await.unwrap();
        assert_eq!(boosted.tip(), U256::from(34));
        assert_eq!(boosted.base_fee(), U256::from(111));
    }
}
