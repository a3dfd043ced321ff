use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresCapture,
    Processing,
    Canceled,
    Succeeded,
}

impl TryFrom<i64> for PaymentIntentStatus {
    type Error = String;

    fn try_from(ordinal: i64) -> Result<Self, Self::Error> {
        match ordinal {
            0 => Ok(Self::RequiresPaymentMethod),
            1 => Ok(Self::RequiresConfirmation),
            2 => Ok(Self::RequiresCapture),
            3 => Ok(Self::Processing),
            4 => Ok(Self::Canceled),
            5 => Ok(Self::Succeeded),
            other => Err(format!("unknown payment intent status {other}")),
        }
    }
}

impl From<PaymentIntentStatus> for i64 {
    fn from(status: PaymentIntentStatus) -> Self {
        status as i64
    }
}

/// Readiness of the terminal to take a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum PaymentStatus {
    #[default]
    NotReady,
    Ready,
    WaitingForInput,
    Processing,
}

impl TryFrom<i64> for PaymentStatus {
    type Error = String;

    fn try_from(ordinal: i64) -> Result<Self, Self::Error> {
        match ordinal {
            0 => Ok(Self::NotReady),
            1 => Ok(Self::Ready),
            2 => Ok(Self::WaitingForInput),
            3 => Ok(Self::Processing),
            other => Err(format!("unknown payment status {other}")),
        }
    }
}

impl From<PaymentStatus> for i64 {
    fn from(status: PaymentStatus) -> Self {
        status as i64
    }
}

/// A payment intent as serialized by the subsystem.
///
/// `amount` is in the currency's minor unit (pence, cents).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub stripe_id: String,
    pub created: String,
    pub status: PaymentIntentStatus,
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntent {
    /// Amount in major units, assuming a two-decimal currency.
    pub fn amount_decimal(&self) -> Decimal {
        Decimal::new(self.amount, 2)
    }
}

/// A line shown on the reader display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
}

impl CartItem {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            quantity: None,
            value: None,
        }
    }
}
