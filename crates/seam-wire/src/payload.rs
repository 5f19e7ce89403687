//! Venue payload types and envelope builders.
//!
//! Field names follow the venue's JSON exactly (camelCase). Signatures are
//! opaque hex strings produced by an external signer; nothing here signs or
//! verifies anything.

use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, method};

/// A maker's signed response to a request-for-quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub asset_address: String,
    pub chain_id: u64,
    pub expiry: i64,
    pub is_put: bool,
    pub is_taker_buy: bool,
    pub maker: String,
    pub nonce: String,
    pub price: String,
    pub quantity: String,
    pub strike: String,
    pub signature: String,
    pub valid_until: i64,
}

/// A signed collateral movement (deposit or withdrawal).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub asset: String,
    pub chain_id: u64,
    pub amount: String,
    pub is_deposit: bool,
    pub nonce: String,
    pub signature: String,
}

/// An inbound request-for-quote, as the venue publishes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rfq {
    pub asset: String,
    pub asset_name: String,
    pub chain_id: u64,
    pub expiry: i64,
    pub is_put: bool,
    pub is_taker_buy: bool,
    pub quantity: String,
    pub strike: String,
    pub taker: String,
}

/// Params for the account-scoped queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountParams {
    pub account: String,
}

/// Errors from payload shaping.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Build a quote envelope keyed by the RFQ it answers.
///
/// # Errors
///
/// Returns [`WireError::Json`] if the payload cannot be serialized.
pub fn quote_envelope(rfq_id: &str, quote: &Quote) -> Result<Envelope, WireError> {
    Ok(Envelope::new(
        rfq_id,
        method::QUOTE,
        Some(serde_json::to_value(quote)?),
    ))
}

/// Build a transfer envelope keyed by its nonce.
///
/// # Errors
///
/// Returns [`WireError::Json`] if the payload cannot be serialized.
pub fn transfer_envelope(transfer: &Transfer) -> Result<Envelope, WireError> {
    Ok(Envelope::new(
        transfer.nonce.clone(),
        method::TRANSFER,
        Some(serde_json::to_value(transfer)?),
    ))
}

/// Build a balances query. Account addresses are lowercased; the venue
/// matches them case-sensitively.
///
/// # Errors
///
/// Returns [`WireError::Json`] if the params cannot be serialized.
pub fn balances_envelope(account: &str) -> Result<Envelope, WireError> {
    account_envelope(method::BALANCES, account)
}

/// Build a positions query.
///
/// # Errors
///
/// Returns [`WireError::Json`] if the params cannot be serialized.
pub fn positions_envelope(account: &str) -> Result<Envelope, WireError> {
    account_envelope(method::POSITIONS, account)
}

fn account_envelope(method: &str, account: &str) -> Result<Envelope, WireError> {
    let params = AccountParams {
        account: account.to_lowercase(),
    };
    Ok(Envelope::new(
        method,
        method,
        Some(serde_json::to_value(params)?),
    ))
}
