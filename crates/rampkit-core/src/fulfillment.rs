//! Parameters needed to fulfil a signalled intent.

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};

/// Fulfilment parameters for one intent, whichever source produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentInputs {
    pub amount: U256,

    /// 32-byte fiat currency code hash.
    pub fiat_currency: B256,

    pub conversion_rate: U256,

    pub payee_details_hash: B256,

    pub payment_method_hash: B256,

    /// Intent signal time in milliseconds since the epoch.
    pub intent_timestamp_ms: u64,
}

/// Payment method registered on a deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositPaymentMethod {
    pub payment_method_hash: B256,
    pub payee_details_hash: B256,
}

/// Find the payee-details hash registered for `payment_method_hash`.
pub fn match_payee_details(
    methods: &[DepositPaymentMethod],
    payment_method_hash: &B256,
) -> Option<B256> {
    methods
        .iter()
        .find(|m| &m.payment_method_hash == payment_method_hash)
        .map(|m| m.payee_details_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_payee_details() {
        let methods = vec![
            DepositPaymentMethod {
                payment_method_hash: B256::repeat_byte(1),
                payee_details_hash: B256::repeat_byte(0xa1),
            },
            DepositPaymentMethod {
                payment_method_hash: B256::repeat_byte(2),
                payee_details_hash: B256::repeat_byte(0xa2),
            },
        ];
        assert_eq!(
            match_payee_details(&methods, &B256::repeat_byte(2)),
            Some(B256::repeat_byte(0xa2))
        );
        assert_eq!(match_payee_details(&methods, &B256::repeat_byte(3)), None);
    }
}
