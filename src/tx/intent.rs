//! Transaction intents: what to submit, independent of how it is priced

use super::gas::FeeParameters;
use crate::error::ToolResult;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Eip1559TransactionRequest, H256, U256};
use std::future::Future;

/// Options handed to an intent's callback for one physical submission
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub from: Address,
    pub value: U256,
    pub fees: FeeParameters,
}

impl CallOptions {
    /// Write sender, value, nonce, gas limit and EIP-1559 fees into `tx`.
    ///
    /// Non-1559 requests are rebuilt as EIP-1559 requests carrying the same
    /// recipient and calldata.
    pub fn apply(&self, tx: &mut TypedTransaction) {
        if !matches!(tx, TypedTransaction::Eip1559(_)) {
            let mut request = Eip1559TransactionRequest::new();
            request.to = tx.to().cloned();
            request.data = tx.data().cloned();
            request.chain_id = tx.chain_id();
            *tx = TypedTransaction::Eip1559(request);
        }

        tx.set_from(self.from);
        tx.set_value(self.value);
        tx.set_nonce(self.fees.nonce());
        tx.set_gas(self.fees.gas_limit());

        if let TypedTransaction::Eip1559(inner) = tx {
            inner.max_fee_per_gas = Some(self.fees.fee_cap());
            inner.max_priority_fee_per_gas = Some(self.fees.tip());
        }
    }
}

/// One logical operation to get on chain, e.g. "stake this batch".
///
/// The callback performs exactly one submission for the options it is given
/// and returns the broadcast transaction hash. The engine may call it several
/// times with increasing fees, always for the same nonce.
pub struct TransactionIntent<F> {
    label: String,
    from: Address,
    value: U256,
    submit: F,
}

impl<F, Fut> TransactionIntent<F>
where
    F: FnMut(CallOptions) -> Fut,
    Fut: Future<Output = ToolResult<H256>>,
{
    pub fn new(label: impl Into<String>, from: Address, submit: F) -> Self {
        Self {
            label: label.into(),
            from,
            value: U256::zero(),
            submit,
        }
    }

    /// Wei transferred with every submission of this intent
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) async fn submit(&mut self, fees: &FeeParameters) -> ToolResult<H256> {
        let options = CallOptions {
            from: self.from,
            value: self.value,
            fees: fees.clone(),
        };
        (self.submit)(options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use ethers::types::TransactionRequest;

    fn options() -> CallOptions {
        CallOptions {
            from: Address::repeat_byte(0x11),
            value: U256::from(62_000u64),
            fees: FeeParameters::new(2u64.into(), 30u64.into(), 3_000_000u64.into(), 42).unwrap(),
        }
    }

    #[test]
    fn test_apply_sets_eip1559_fields() {
        let mut tx = TypedTransaction::Eip1559(
            Eip1559TransactionRequest::new()
                .to(Address::repeat_byte(0x22))
                .data(vec![0xde, 0xad]),
        );
        options().apply(&mut tx);

        let TypedTransaction::Eip1559(inner) = tx else {
            panic!("expected eip1559 request");
        };
        assert_eq!(inner.from, Some(Address::repeat_byte(0x11)));
        assert_eq!(inner.nonce, Some(U256::from(42)));
        assert_eq!(inner.gas, Some(U256::from(3_000_000u64)));
        assert_eq!(inner.value, Some(U256::from(62_000u64)));
        assert_eq!(inner.max_fee_per_gas, Some(U256::from(30)));
        assert_eq!(inner.max_priority_fee_per_gas, Some(U256::from(2)));
    }

    #[test]
    fn test_apply_upgrades_legacy_request() {
        let mut tx: TypedTransaction = TransactionRequest::new()
            .to(Address::repeat_byte(0x22))
            .data(vec![0x01])
            .into();
        options().apply(&mut tx);

        assert!(matches!(tx, TypedTransaction::Eip1559(_)));
        assert_eq!(tx.data().map(|d| d.to_vec()), Some(vec![0x01]));
        assert_eq!(tx.nonce(), Some(&U256::from(42)));
    }

    #[tokio::test]
    async fn test_intent_passes_options_to_callback() {
        let fees = options().fees;
        let mut seen = Vec::new();
        let mut intent = TransactionIntent::new("stake batch 1", Address::repeat_byte(0x11), |opts: CallOptions| {
            seen.push(opts.value);
            async move { Ok::<_, ToolError>(H256::from_low_u64_be(opts.fees.nonce())) }
        })
        .with_value(U256::from(7));

        assert_eq!(intent.label(), "stake batch 1");
        let hash = intent.submit(&fees).await.unwrap();
        assert_eq!(hash, H256::from_low_u64_be(42));
        drop(intent);
        assert_eq!(seen, vec![U256::from(7)]);
    }
}
