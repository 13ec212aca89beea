//! Inbound transfer validation.
//!
//! A permissive raw layer deserializes the JSON body; shape problems surface
//! as `InvalidRequest` (400). The checked [`TransferPayload`] then passes the
//! semantic rules (conservation and non-zero amounts), which surface as
//! `UnprocessableEntity` (422). Account existence is semantic too, but is
//! checked inside the upsert transaction where the engine already holds a
//! consistent view.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::error::EngineError;
use super::state::TransferState;
use crate::model::{DestinationFund, SourceFund};

// ============================================================================
// Raw wire shapes
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTransfer {
    id: Option<String>,
    source_funds: Option<Vec<RawFund>>,
    destination_funds: Option<Vec<RawFund>>,
    execution_condition: Option<Value>,
    execution_condition_fulfillment: Option<Value>,
    expires_at: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFund {
    account: Option<String>,
    amount: Option<String>,
    authorization: Option<Value>,
}

// ============================================================================
// Checked payload
// ============================================================================

/// A structurally valid transfer upsert body.
#[derive(Debug, Clone)]
pub struct TransferPayload {
    pub id: Uuid,
    pub source_funds: Vec<SourceFund>,
    pub destination_funds: Vec<DestinationFund>,
    pub execution_condition: Option<Value>,
    pub execution_condition_fulfillment: Option<Value>,
    pub expires_at: Option<DateTime<Utc>>,
    /// A `state` field in the body. Only `rejected` is ever acted on; other
    /// values participate in the idempotence comparison alone.
    pub requested_state: Option<TransferState>,
}

impl TransferPayload {
    /// Distinct account names referenced by either side.
    pub fn accounts(&self) -> BTreeSet<&str> {
        self.source_funds
            .iter()
            .map(|f| f.account.as_str())
            .chain(self.destination_funds.iter().map(|f| f.account.as_str()))
            .collect()
    }
}

/// Parse and validate a transfer upsert body against the path uuid.
pub fn parse_transfer(
    path_id: Uuid,
    body: Value,
    base_uri: &str,
) -> Result<TransferPayload, EngineError> {
    let raw: RawTransfer = serde_json::from_value(body)
        .map_err(|e| EngineError::InvalidRequest(format!("malformed transfer: {e}")))?;

    if let Some(id) = raw.id.as_deref() {
        let body_id = parse_transfer_id(id, base_uri)?;
        if body_id != path_id {
            return Err(EngineError::InvalidRequest(format!(
                "body id {body_id} does not match path id {path_id}"
            )));
        }
    }

    let source_funds = raw
        .source_funds
        .ok_or_else(|| EngineError::InvalidRequest("source_funds is required".into()))?;
    let destination_funds = raw
        .destination_funds
        .ok_or_else(|| EngineError::InvalidRequest("destination_funds is required".into()))?;
    if source_funds.is_empty() || destination_funds.is_empty() {
        return Err(EngineError::InvalidRequest(
            "source_funds and destination_funds must be non-empty".into(),
        ));
    }

    let source_funds = source_funds
        .into_iter()
        .map(|fund| {
            let (account, amount) = parse_fund_parts(&fund)?;
            Ok(SourceFund {
                account,
                amount,
                authorization: fund.authorization,
            })
        })
        .collect::<Result<Vec<_>, EngineError>>()?;

    let destination_funds = destination_funds
        .into_iter()
        .map(|fund| {
            if fund.authorization.is_some() {
                return Err(EngineError::InvalidRequest(
                    "destination funds cannot carry an authorization".into(),
                ));
            }
            let (account, amount) = parse_fund_parts(&fund)?;
            Ok(DestinationFund { account, amount })
        })
        .collect::<Result<Vec<_>, EngineError>>()?;

    let expires_at = raw
        .expires_at
        .as_deref()
        .map(parse_timestamp)
        .transpose()?;

    let requested_state = raw
        .state
        .as_deref()
        .map(|s| {
            TransferState::parse(s)
                .ok_or_else(|| EngineError::InvalidRequest(format!("unknown state '{s}'")))
        })
        .transpose()?;

    let payload = TransferPayload {
        id: path_id,
        source_funds,
        destination_funds,
        execution_condition: raw.execution_condition,
        execution_condition_fulfillment: raw.execution_condition_fulfillment,
        expires_at,
        requested_state,
    };
    validate_semantics(&payload)?;
    Ok(payload)
}

fn parse_fund_parts(fund: &RawFund) -> Result<(String, Decimal), EngineError> {
    let account = fund
        .account
        .clone()
        .ok_or_else(|| EngineError::InvalidRequest("fund account is required".into()))?;
    if account.is_empty() {
        return Err(EngineError::InvalidRequest("fund account is empty".into()));
    }
    let amount = fund
        .amount
        .as_deref()
        .ok_or_else(|| EngineError::InvalidRequest("fund amount is required".into()))?;
    Ok((account, parse_amount(amount)?))
}

/// Parse a wire amount: a non-negative fixed-point decimal string.
pub fn parse_amount(s: &str) -> Result<Decimal, EngineError> {
    let amount = Decimal::from_str(s.trim())
        .map_err(|_| EngineError::InvalidRequest(format!("'{s}' is not a decimal amount")))?;
    if amount.is_sign_negative() {
        return Err(EngineError::InvalidRequest(format!(
            "amount '{s}' must not be negative"
        )));
    }
    Ok(amount)
}

/// Parse a transfer id: a bare uuid, or an absolute URI under `base_uri`.
pub fn parse_transfer_id(s: &str, base_uri: &str) -> Result<Uuid, EngineError> {
    let prefix = format!("{base_uri}/transfers/");
    let tail = s.strip_prefix(&prefix).unwrap_or(s);
    Uuid::parse_str(tail)
        .map_err(|_| EngineError::InvalidRequest(format!("'{s}' is not a transfer id")))
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| EngineError::InvalidRequest(format!("'{s}' is not an RFC 3339 timestamp")))
}

/// A fulfillment body: any JSON value except null.
pub fn parse_fulfillment(body: Value) -> Result<Value, EngineError> {
    if body.is_null() {
        return Err(EngineError::InvalidRequest("fulfillment is required".into()));
    }
    Ok(body)
}

fn validate_semantics(payload: &TransferPayload) -> Result<(), EngineError> {
    for amount in payload
        .source_funds
        .iter()
        .map(|f| f.amount)
        .chain(payload.destination_funds.iter().map(|f| f.amount))
    {
        if amount.is_zero() {
            return Err(EngineError::UnprocessableEntity(
                "fund amounts must be greater than zero".into(),
            ));
        }
    }

    let debits: Decimal = payload.source_funds.iter().map(|f| f.amount).sum();
    let credits: Decimal = payload.destination_funds.iter().map(|f| f.amount).sum();
    if debits != credits {
        return Err(EngineError::UnprocessableEntity(format!(
            "source total {debits} does not equal destination total {credits}"
        )));
    }
    Ok(())
}
