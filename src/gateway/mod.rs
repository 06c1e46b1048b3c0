//! Payment gateway client
//!
//! Only the settlement-relevant part of the gateway contract: confirming a
//! transaction reference out of band, so callback bodies never have to be
//! trusted.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{LedgerError, LedgerResult};

/// Gateway-side status of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    Success,
    Pending,
    Declined,
}

impl GatewayStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, GatewayStatus::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountDetails {
    pub amount: Decimal,
    pub currency: String,
}

/// Authoritative answer about one transaction reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfirmation {
    pub status: GatewayStatus,
    pub amount_details: AmountDetails,
}

#[async_trait]
pub trait PaymentGatewayClient: Send + Sync {
    /// Look up a transaction at the gateway. Transport failures are
    /// `LedgerError::Gateway`.
    async fn confirm(&self, transaction_ref: &str) -> LedgerResult<GatewayConfirmation>;
}

#[async_trait]
impl<G> PaymentGatewayClient for Arc<G>
where
    G: PaymentGatewayClient + ?Sized,
{
    async fn confirm(&self, transaction_ref: &str) -> LedgerResult<GatewayConfirmation> {
        (**self).confirm(transaction_ref).await
    }
}

/// Gateway double answering from a table of known references.
///
/// Unknown references fail with a gateway error, like a real gateway that
/// cannot be reached for them.
#[derive(Debug, Default)]
pub struct StaticGateway {
    confirmations: Mutex<HashMap<String, GatewayConfirmation>>,
}

impl StaticGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, transaction_ref: impl Into<String>, confirmation: GatewayConfirmation) {
        if let Ok(mut table) = self.confirmations.lock() {
            table.insert(transaction_ref.into(), confirmation);
        }
    }

    /// Record a successful payment of `amount` in `currency`
    pub fn confirm_success(
        &self,
        transaction_ref: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
    ) {
        self.insert(
            transaction_ref,
            GatewayConfirmation {
                status: GatewayStatus::Success,
                amount_details: AmountDetails {
                    amount,
                    currency: currency.into(),
                },
            },
        );
    }
}

#[async_trait]
impl PaymentGatewayClient for StaticGateway {
    async fn confirm(&self, transaction_ref: &str) -> LedgerResult<GatewayConfirmation> {
        let table = self
            .confirmations
            .lock()
            .map_err(|_| LedgerError::internal("gateway table poisoned"))?;
        table
            .get(transaction_ref)
            .cloned()
            .ok_or_else(|| LedgerError::Gateway(format!("no answer for {transaction_ref}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_static_gateway() {
        let gateway = StaticGateway::new();
        gateway.confirm_success("TX-1", dec!(100), "USD");

        let confirmation = gateway.confirm("TX-1").await.unwrap();
        assert!(confirmation.status.is_success());
        assert_eq!(confirmation.amount_details.amount, dec!(100));

        let err = gateway.confirm("TX-2").await.unwrap_err();
        assert!(matches!(err, LedgerError::Gateway(_)));
    }
}
