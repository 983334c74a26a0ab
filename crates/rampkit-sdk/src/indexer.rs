//! GraphQL client for the indexed store.

use std::str::FromStr;

use async_trait::async_trait;
use rampkit_core::{DepositPaymentMethod, RampError, Result, B256, U256};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::resolver::{IndexedIntent, IndexedStore};
use crate::retry::{classify_reqwest, classify_status};

const INTENT_QUERY: &str = r#"query IntentByHash($intentHash: String!) {
  Intent(where: { intentHash: { _eq: $intentHash } }, limit: 1) {
    amount
    fiatCurrency
    conversionRate
    paymentMethodHash
    depositId
    signalTimestamp
  }
}"#;

const DEPOSIT_METHODS_QUERY: &str = r#"query DepositPaymentMethods($depositId: String!) {
  DepositPaymentMethod(where: { depositId: { _eq: $depositId } }) {
    paymentMethodHash
    payeeDetailsHash
  }
}"#;

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct IntentRows {
    #[serde(rename = "Intent", default)]
    intents: Vec<IntentRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntentRow {
    amount: String,
    fiat_currency: String,
    conversion_rate: String,
    payment_method_hash: String,
    deposit_id: String,
    signal_timestamp: String,
}

#[derive(Debug, Deserialize)]
struct MethodRows {
    #[serde(rename = "DepositPaymentMethod", default)]
    methods: Vec<MethodRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MethodRow {
    payment_method_hash: String,
    payee_details_hash: String,
}

/// [`IndexedStore`] backed by a GraphQL endpoint.
#[derive(Clone)]
pub struct GraphqlIndexer {
    endpoint: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl GraphqlIndexer {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: None,
            http_client: reqwest::Client::new(),
        }
    }

    /// Send `x-api-key` with every query.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: serde_json::Value) -> Result<T> {
        let mut request = self
            .http_client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "query": query, "variables": variables }));
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(classify_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), error_text));
        }

        let body: GraphqlResponse<T> = response.json().await.map_err(classify_reqwest)?;
        if !body.errors.is_empty() {
            let message = body
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RampError::Http {
                status: status.as_u16(),
                message,
            });
        }
        body.data
            .ok_or_else(|| RampError::Serialization("GraphQL response has no data".to_string()))
    }
}

#[async_trait]
impl IndexedStore for GraphqlIndexer {
    async fn intent(&self, intent_hash: B256) -> Result<Option<IndexedIntent>> {
        let rows: IntentRows = self
            .query(
                INTENT_QUERY,
                serde_json::json!({ "intentHash": intent_hash.to_string() }),
            )
            .await?;
        debug!(intent = %intent_hash, rows = rows.intents.len(), "indexed intent query");

        rows.intents
            .into_iter()
            .next()
            .map(|row| {
                Ok(IndexedIntent {
                    amount: parse_u256("amount", &row.amount)?,
                    fiat_currency: parse_b256("fiatCurrency", &row.fiat_currency)?,
                    conversion_rate: parse_u256("conversionRate", &row.conversion_rate)?,
                    payment_method_hash: parse_b256("paymentMethodHash", &row.payment_method_hash)?,
                    deposit_id: row.deposit_id,
                    signal_timestamp: row.signal_timestamp.parse().map_err(|_| {
                        RampError::Serialization(format!(
                            "signalTimestamp '{}' is not an integer",
                            row.signal_timestamp
                        ))
                    })?,
                })
            })
            .transpose()
    }

    async fn deposit_payment_methods(&self, deposit_id: &str) -> Result<Vec<DepositPaymentMethod>> {
        let rows: MethodRows = self
            .query(
                DEPOSIT_METHODS_QUERY,
                serde_json::json!({ "depositId": deposit_id }),
            )
            .await?;

        rows.methods
            .into_iter()
            .map(|row| {
                Ok(DepositPaymentMethod {
                    payment_method_hash: parse_b256("paymentMethodHash", &row.payment_method_hash)?,
                    payee_details_hash: parse_b256("payeeDetailsHash", &row.payee_details_hash)?,
                })
            })
            .collect()
    }
}

fn parse_u256(field: &str, value: &str) -> Result<U256> {
    U256::from_str(value)
        .map_err(|e| RampError::Serialization(format!("{} '{}' is not a uint256: {}", field, value, e)))
}

fn parse_b256(field: &str, value: &str) -> Result<B256> {
    B256::from_str(value)
        .map_err(|e| RampError::Serialization(format!("{} '{}' is not bytes32: {}", field, value, e)))
}
