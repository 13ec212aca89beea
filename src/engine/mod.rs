//! Transfer engine.
//!
//! Drives the transfer lifecycle: validate, compute the next state, apply
//! balance deltas, persist, and enqueue notification events, all inside a
//! single store transaction. A failure at any step leaves no partial
//! mutation behind.
//!
//! # Lifecycle
//!
//! A new transfer lands as `proposed` until every source fund carries an
//! authorization. A fully authorized transfer completes immediately when it
//! has no execution condition, or moves to `prepared` (debiting each source
//! into its `held` sub-account) when it has one. A prepared transfer
//! completes when a fulfillment arrives, and expires (releasing the hold)
//! when its deadline passes. Any non-terminal transfer can be rejected by a
//! source owner or admin.
//!
//! # Safety invariants
//!
//! 1. Balance deltas for a transfer are applied exactly once, at the
//!    transition that debits (`prepared` or direct `completed`).
//! 2. Sufficient funds are checked at that same transition.
//! 3. Idempotent replays return the stored record without balance effect.
//! 4. State never regresses; every observed sequence is a path in the
//!    lifecycle graph.

pub mod error;
pub mod state;
pub mod validation;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use error::EngineError;
pub use state::TransferState;
pub use validation::TransferPayload;

use crate::auth::Principal;
use crate::expiry::ExpiryEntry;
use crate::model::{
    paths, Notification, NotificationState, SourceFund, Subscription, Transfer,
    EVENT_TRANSFER_UPDATE,
};
use crate::store::{KeyPath, MemoryStore, Transaction};
use crate::websocket::{ConnectionManager, WsMessage};

/// Result of a transfer upsert.
#[derive(Debug)]
pub struct UpsertOutcome {
    pub transfer: Transfer,
    /// No prior record existed; surfaces as 201.
    pub created: bool,
    /// The stored record was modified (false for an idempotent replay).
    pub changed: bool,
    /// The lifecycle state changed, including initial creation.
    pub transitioned: bool,
}

/// Result of an expiry attempt.
#[derive(Debug)]
pub enum ExpiryOutcome {
    /// The transfer was transitioned to `expired`.
    Expired(Transfer),
    /// The stored deadline lies in the future (it changed since the timer
    /// was armed); retry then.
    NotDue(DateTime<Utc>),
    /// Nothing to do: missing, terminal, or no deadline.
    Skipped,
}

/// The transfer state machine and its post-commit fan-out.
pub struct TransferEngine {
    store: Arc<MemoryStore>,
    ws: Arc<ConnectionManager>,
    expiry_tx: mpsc::UnboundedSender<ExpiryEntry>,
    delivery_wake: Arc<Notify>,
    base_uri: String,
}

impl TransferEngine {
    pub fn new(
        store: Arc<MemoryStore>,
        ws: Arc<ConnectionManager>,
        expiry_tx: mpsc::UnboundedSender<ExpiryEntry>,
        delivery_wake: Arc<Notify>,
        base_uri: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ws,
            expiry_tx,
            delivery_wake,
            base_uri: base_uri.into(),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get_transfer(&self, id: Uuid) -> Result<Transfer, EngineError> {
        self.store.with_transaction(|tx| {
            tx.get_json_opt::<Transfer>(&paths::transfer(&id))?
                .ok_or_else(|| EngineError::NotFound(format!("transfer {id}")))
        })
    }

    pub fn get_fulfillment(&self, id: Uuid) -> Result<Value, EngineError> {
        let transfer = self.get_transfer(id)?;
        transfer
            .execution_condition_fulfillment
            .ok_or_else(|| EngineError::NotFound(format!("no fulfillment for transfer {id}")))
    }

    // ========================================================================
    // Upsert
    // ========================================================================

    /// Create or advance a transfer per the upsert semantics: no prior record
    /// creates one; a matching body is an idempotent replay; anything else
    /// either advances the state or fails with `InvalidTransition`.
    pub fn upsert(
        &self,
        principal: &Principal,
        payload: &TransferPayload,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, EngineError> {
        let outcome = self.store.with_transaction(|tx| {
            let stored: Option<Transfer> = tx.get_json_opt(&paths::transfer(&payload.id))?;
            match stored {
                None => self.create(tx, principal, payload, now),
                Some(existing) => self.advance(tx, principal, existing, payload, now),
            }
        })?;

        if outcome.transitioned {
            info!(
                transfer = %outcome.transfer.id,
                state = %outcome.transfer.state,
                created = outcome.created,
                "transfer transitioned"
            );
            self.after_commit(&outcome.transfer);
        }
        Ok(outcome)
    }

    fn create(
        &self,
        tx: &mut Transaction<'_>,
        principal: &Principal,
        payload: &TransferPayload,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, EngineError> {
        Self::screen_authorizations(principal, &payload.source_funds)?;
        Self::ensure_accounts_exist(tx, payload.accounts())?;

        if payload.execution_condition_fulfillment.is_some()
            && payload.execution_condition.is_none()
        {
            return Err(EngineError::UnprocessableEntity(
                "a fulfillment requires an execution condition".into(),
            ));
        }
        if let Some(expires_at) = payload.expires_at {
            if expires_at <= now {
                return Err(EngineError::UnprocessableEntity(
                    "expires_at must be in the future".into(),
                ));
            }
        }

        let mut transfer = Transfer {
            id: payload.id,
            source_funds: payload.source_funds.clone(),
            destination_funds: payload.destination_funds.clone(),
            execution_condition: payload.execution_condition.clone(),
            execution_condition_fulfillment: payload.execution_condition_fulfillment.clone(),
            expires_at: payload.expires_at,
            state: TransferState::Proposed,
            created_at: now,
            updated_at: now,
        };
        self.settle(tx, &mut transfer)?;
        tx.put_json(&paths::transfer(&transfer.id), &transfer)?;
        self.enqueue_notifications(tx, &transfer, now)?;

        Ok(UpsertOutcome {
            transfer,
            created: true,
            changed: true,
            transitioned: true,
        })
    }

    fn advance(
        &self,
        tx: &mut Transaction<'_>,
        principal: &Principal,
        stored: Transfer,
        payload: &TransferPayload,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, EngineError> {
        if Self::payload_matches(&stored, payload) {
            debug!(transfer = %stored.id, "idempotent replay");
            return Ok(UpsertOutcome {
                transfer: stored,
                created: false,
                changed: false,
                transitioned: false,
            });
        }

        if stored.state.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "transfer is already {}",
                stored.state
            )));
        }
        if let Some(expires_at) = stored.expires_at {
            if now >= expires_at {
                return Err(EngineError::InvalidTransition(
                    "transfer deadline has passed".into(),
                ));
            }
        }
        Self::ensure_same_shape(&stored, payload)?;

        if payload.requested_state == Some(TransferState::Rejected) {
            return self.reject(tx, principal, stored, now);
        }

        let mut transfer = stored;
        let mut touched = false;

        for (current, incoming) in transfer.source_funds.iter_mut().zip(&payload.source_funds) {
            if incoming.is_authorized() && !current.is_authorized() {
                if !principal.can_act_for(&current.account) {
                    return Err(EngineError::Forbidden(format!(
                        "cannot authorize debit of account {}",
                        current.account
                    )));
                }
                current.authorization = incoming.authorization.clone();
                touched = true;
            } else if !incoming.is_authorized() && current.is_authorized() {
                return Err(EngineError::InvalidTransition(
                    "authorization cannot be withdrawn".into(),
                ));
            }
        }

        match (
            &transfer.execution_condition_fulfillment,
            &payload.execution_condition_fulfillment,
        ) {
            (None, Some(fulfillment)) => {
                if transfer.execution_condition.is_none() {
                    return Err(EngineError::InvalidTransition(
                        "transfer has no execution condition".into(),
                    ));
                }
                transfer.execution_condition_fulfillment = Some(fulfillment.clone());
                touched = true;
            }
            (Some(current), Some(incoming)) if current != incoming => {
                return Err(EngineError::InvalidTransition(
                    "fulfillment cannot be replaced".into(),
                ));
            }
            _ => {}
        }

        if !touched {
            return Err(EngineError::InvalidTransition(
                "request does not advance the transfer".into(),
            ));
        }

        // Existence is re-verified at the moment of settlement.
        Self::ensure_accounts_exist(tx, transfer.accounts())?;

        let prior = transfer.state;
        self.settle(tx, &mut transfer)?;
        transfer.updated_at = now;
        tx.put_json(&paths::transfer(&transfer.id), &transfer)?;

        let transitioned = transfer.state != prior;
        if transitioned {
            self.enqueue_notifications(tx, &transfer, now)?;
        }
        Ok(UpsertOutcome {
            transfer,
            created: false,
            changed: true,
            transitioned,
        })
    }

    fn reject(
        &self,
        tx: &mut Transaction<'_>,
        principal: &Principal,
        mut transfer: Transfer,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, EngineError> {
        if !principal.is_admin && !transfer.has_source(&principal.name) {
            return Err(EngineError::Forbidden(
                "only a source account owner or admin may reject".into(),
            ));
        }
        if transfer.state.holds_funds() {
            Self::release_holds(tx, &transfer)?;
        }
        transfer.state = TransferState::Rejected;
        transfer.updated_at = now;
        tx.put_json(&paths::transfer(&transfer.id), &transfer)?;
        self.enqueue_notifications(tx, &transfer, now)?;
        Ok(UpsertOutcome {
            transfer,
            created: false,
            changed: true,
            transitioned: true,
        })
    }

    // ========================================================================
    // Fulfillment
    // ========================================================================

    /// Discharge a prepared transfer's execution condition. The fulfillment
    /// is opaque: its presence settles the hold; nothing is verified
    /// cryptographically.
    pub fn fulfill(
        &self,
        id: Uuid,
        fulfillment: &Value,
        now: DateTime<Utc>,
    ) -> Result<(Transfer, bool), EngineError> {
        let (transfer, changed) = self.store.with_transaction(|tx| {
            let mut transfer: Transfer = tx
                .get_json_opt(&paths::transfer(&id))?
                .ok_or_else(|| EngineError::NotFound(format!("transfer {id}")))?;

            if transfer.execution_condition.is_none() {
                return Err(EngineError::InvalidTransition(
                    "transfer has no execution condition".into(),
                ));
            }
            match transfer.state {
                TransferState::Completed => {
                    if transfer.execution_condition_fulfillment.as_ref() == Some(fulfillment) {
                        Ok((transfer, false))
                    } else {
                        Err(EngineError::InvalidTransition(
                            "transfer is already completed".into(),
                        ))
                    }
                }
                TransferState::Prepared => {
                    if let Some(expires_at) = transfer.expires_at {
                        if now >= expires_at {
                            return Err(EngineError::InvalidTransition(
                                "transfer deadline has passed".into(),
                            ));
                        }
                    }
                    transfer.execution_condition_fulfillment = Some(fulfillment.clone());
                    Self::apply_held_completion(tx, &transfer)?;
                    transfer.state = TransferState::Completed;
                    transfer.updated_at = now;
                    tx.put_json(&paths::transfer(&id), &transfer)?;
                    self.enqueue_notifications(tx, &transfer, now)?;
                    Ok((transfer, true))
                }
                TransferState::Proposed => Err(EngineError::InvalidTransition(
                    "transfer is not prepared".into(),
                )),
                other => Err(EngineError::InvalidTransition(format!(
                    "transfer is already {other}"
                ))),
            }
        })?;

        if changed {
            info!(transfer = %id, "transfer completed by fulfillment");
            self.after_commit(&transfer);
        }
        Ok((transfer, changed))
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    /// Expire a transfer whose deadline has passed, releasing any hold. The
    /// transition commits only if the transfer is still non-terminal; a
    /// concurrent completion wins by serialization.
    pub fn expire(&self, id: Uuid, now: DateTime<Utc>) -> Result<ExpiryOutcome, EngineError> {
        let outcome = self.store.with_transaction(|tx| -> Result<ExpiryOutcome, EngineError> {
            let Some(mut transfer) = tx.get_json_opt::<Transfer>(&paths::transfer(&id))? else {
                return Ok(ExpiryOutcome::Skipped);
            };
            if transfer.state.is_terminal() {
                return Ok(ExpiryOutcome::Skipped);
            }
            let Some(expires_at) = transfer.expires_at else {
                return Ok(ExpiryOutcome::Skipped);
            };
            if now < expires_at {
                return Ok(ExpiryOutcome::NotDue(expires_at));
            }

            if transfer.state.holds_funds() {
                Self::release_holds(tx, &transfer)?;
            }
            transfer.state = TransferState::Expired;
            transfer.updated_at = now;
            tx.put_json(&paths::transfer(&id), &transfer)?;
            self.enqueue_notifications(tx, &transfer, now)?;
            Ok(ExpiryOutcome::Expired(transfer))
        })?;

        if let ExpiryOutcome::Expired(transfer) = &outcome {
            info!(transfer = %id, "transfer expired");
            self.publish(transfer);
            self.delivery_wake.notify_waiters();
        }
        Ok(outcome)
    }

    // ========================================================================
    // State transitions & balance application
    // ========================================================================

    /// Advance as far as the transfer's facts allow, applying balance deltas
    /// for each transition taken. The tie-break of a fully authorized,
    /// conditioned, fulfilled body runs prepared then completed inside the
    /// same transaction: balances are applied once.
    fn settle(&self, tx: &mut Transaction<'_>, transfer: &mut Transfer) -> Result<(), EngineError> {
        if transfer.state == TransferState::Proposed && transfer.is_authorized() {
            if transfer.execution_condition.is_none() {
                Self::apply_direct_completion(tx, transfer)?;
                transfer.state = TransferState::Completed;
            } else {
                Self::apply_hold(tx, transfer)?;
                transfer.state = TransferState::Prepared;
            }
        }
        if transfer.state == TransferState::Prepared
            && transfer.execution_condition_fulfillment.is_some()
        {
            Self::apply_held_completion(tx, transfer)?;
            transfer.state = TransferState::Completed;
        }
        Ok(())
    }

    /// proposed -> completed: `source.balance -= amount; destination.balance += amount`.
    fn apply_direct_completion(
        tx: &mut Transaction<'_>,
        transfer: &Transfer,
    ) -> Result<(), EngineError> {
        for fund in &transfer.source_funds {
            Self::debit_balance(tx, &fund.account, fund.amount)?;
        }
        for fund in &transfer.destination_funds {
            Self::credit_balance(tx, &fund.account, fund.amount)?;
        }
        Ok(())
    }

    /// proposed -> prepared: `balance -= amount; held += amount` per source.
    fn apply_hold(tx: &mut Transaction<'_>, transfer: &Transfer) -> Result<(), EngineError> {
        for fund in &transfer.source_funds {
            Self::debit_balance(tx, &fund.account, fund.amount)?;
            Self::credit_held(tx, &fund.account, fund.amount)?;
        }
        Ok(())
    }

    /// prepared -> completed: `source.held -= amount; destination.balance += amount`.
    fn apply_held_completion(
        tx: &mut Transaction<'_>,
        transfer: &Transfer,
    ) -> Result<(), EngineError> {
        for fund in &transfer.source_funds {
            Self::debit_held(tx, &fund.account, fund.amount)?;
        }
        for fund in &transfer.destination_funds {
            Self::credit_balance(tx, &fund.account, fund.amount)?;
        }
        Ok(())
    }

    /// prepared -> expired | rejected: `held -= amount; balance += amount` per source.
    fn release_holds(tx: &mut Transaction<'_>, transfer: &Transfer) -> Result<(), EngineError> {
        for fund in &transfer.source_funds {
            Self::debit_held(tx, &fund.account, fund.amount)?;
            Self::credit_balance(tx, &fund.account, fund.amount)?;
        }
        Ok(())
    }

    fn read_decimal(tx: &mut Transaction<'_>, path: &KeyPath) -> Result<Decimal, EngineError> {
        match tx.get_opt(path) {
            None => Ok(Decimal::ZERO),
            Some(Value::String(s)) => Decimal::from_str(&s)
                .map_err(|e| EngineError::Internal(format!("bad decimal at {path}: {e}"))),
            Some(_) => Err(EngineError::Internal(format!(
                "non-string decimal at {path}"
            ))),
        }
    }

    fn write_decimal(tx: &mut Transaction<'_>, path: &KeyPath, value: Decimal) {
        tx.put(path, Value::String(value.to_string()));
    }

    /// The sufficient-funds check lives here, at the transition that debits.
    fn debit_balance(
        tx: &mut Transaction<'_>,
        account: &str,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        let path = paths::balance(account);
        let balance = Self::read_decimal(tx, &path)?;
        if balance < amount {
            return Err(EngineError::InsufficientFunds(account.to_string()));
        }
        Self::write_decimal(tx, &path, balance - amount);
        Ok(())
    }

    fn credit_balance(
        tx: &mut Transaction<'_>,
        account: &str,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        let path = paths::balance(account);
        let balance = Self::read_decimal(tx, &path)?;
        let next = balance
            .checked_add(amount)
            .ok_or_else(|| EngineError::Internal(format!("balance overflow on {account}")))?;
        Self::write_decimal(tx, &path, next);
        Ok(())
    }

    fn credit_held(
        tx: &mut Transaction<'_>,
        account: &str,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        let path = paths::held(account);
        let held = Self::read_decimal(tx, &path)?;
        let next = held
            .checked_add(amount)
            .ok_or_else(|| EngineError::Internal(format!("held overflow on {account}")))?;
        Self::write_decimal(tx, &path, next);
        Ok(())
    }

    fn debit_held(
        tx: &mut Transaction<'_>,
        account: &str,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        let path = paths::held(account);
        let held = Self::read_decimal(tx, &path)?;
        if held < amount {
            return Err(EngineError::Internal(format!(
                "held underflow on {account}: {held} < {amount}"
            )));
        }
        Self::write_decimal(tx, &path, held - amount);
        Ok(())
    }

    // ========================================================================
    // Checks & comparisons
    // ========================================================================

    /// Authorizations asserted for accounts the principal cannot act for are
    /// a hard failure on a mutating request.
    fn screen_authorizations(
        principal: &Principal,
        funds: &[SourceFund],
    ) -> Result<(), EngineError> {
        for fund in funds {
            if fund.is_authorized() && !principal.can_act_for(&fund.account) {
                return Err(EngineError::Forbidden(format!(
                    "cannot authorize debit of account {}",
                    fund.account
                )));
            }
        }
        Ok(())
    }

    fn ensure_accounts_exist<'n>(
        tx: &mut Transaction<'_>,
        accounts: impl IntoIterator<Item = &'n str>,
    ) -> Result<(), EngineError> {
        for account in accounts {
            if tx.get_opt(&paths::account(account)).is_none() {
                return Err(EngineError::UnprocessableEntity(format!(
                    "account {account} does not exist"
                )));
            }
        }
        Ok(())
    }

    /// Whether the body restates the stored record (modulo normalization):
    /// same funds with the same authorization presence, no new condition,
    /// fulfillment or deadline, and no different requested state. Fields the
    /// body omits are treated as restated.
    fn payload_matches(stored: &Transfer, payload: &TransferPayload) -> bool {
        if let Some(state) = payload.requested_state {
            if state != stored.state {
                return false;
            }
        }
        if stored.source_funds.len() != payload.source_funds.len()
            || stored.destination_funds.len() != payload.destination_funds.len()
        {
            return false;
        }
        let sources_match = stored
            .source_funds
            .iter()
            .zip(&payload.source_funds)
            .all(|(a, b)| {
                a.account == b.account
                    && a.amount == b.amount
                    && a.is_authorized() == b.is_authorized()
            });
        let destinations_match = stored
            .destination_funds
            .iter()
            .zip(&payload.destination_funds)
            .all(|(a, b)| a.account == b.account && a.amount == b.amount);
        let condition_matches = payload.execution_condition.is_none()
            || payload.execution_condition == stored.execution_condition;
        let fulfillment_matches = payload.execution_condition_fulfillment.is_none()
            || payload.execution_condition_fulfillment == stored.execution_condition_fulfillment;
        let expiry_matches =
            payload.expires_at.is_none() || payload.expires_at == stored.expires_at;

        sources_match
            && destinations_match
            && condition_matches
            && fulfillment_matches
            && expiry_matches
    }

    /// Funds, condition and deadline are immutable once created.
    fn ensure_same_shape(stored: &Transfer, payload: &TransferPayload) -> Result<(), EngineError> {
        let drift =
            |what: &str| EngineError::InvalidTransition(format!("{what} cannot change after creation"));

        if stored.source_funds.len() != payload.source_funds.len()
            || stored.destination_funds.len() != payload.destination_funds.len()
        {
            return Err(drift("funds"));
        }
        for (a, b) in stored.source_funds.iter().zip(&payload.source_funds) {
            if a.account != b.account || a.amount != b.amount {
                return Err(drift("source funds"));
            }
        }
        for (a, b) in stored
            .destination_funds
            .iter()
            .zip(&payload.destination_funds)
        {
            if a.account != b.account || a.amount != b.amount {
                return Err(drift("destination funds"));
            }
        }
        if let Some(condition) = &payload.execution_condition {
            if stored.execution_condition.as_ref() != Some(condition) {
                return Err(drift("execution condition"));
            }
        }
        if let Some(expires_at) = payload.expires_at {
            if stored.expires_at != Some(expires_at) {
                return Err(drift("expires_at"));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Post-commit fan-out
    // ========================================================================

    fn after_commit(&self, transfer: &Transfer) {
        if !transfer.state.is_terminal() {
            if let Some(expires_at) = transfer.expires_at {
                let _ = self.expiry_tx.send(ExpiryEntry {
                    id: transfer.id,
                    expires_at,
                });
            }
        }
        self.publish(transfer);
        self.delivery_wake.notify_waiters();
    }

    fn publish(&self, transfer: &Transfer) {
        let message = WsMessage::TransferUpdate {
            resource: transfer.external(&self.base_uri),
        };
        for account in transfer.accounts() {
            self.ws.send_to_account(account, message.clone());
        }
    }

    /// Insert one pending notification per matching subscription, inside the
    /// transition's own transaction.
    fn enqueue_notifications(
        &self,
        tx: &mut Transaction<'_>,
        transfer: &Transfer,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        for account in transfer.accounts() {
            for (path, value) in tx.scan_prefix(&paths::subscriptions(account)) {
                let subscription: Subscription = match serde_json::from_value(value) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(%path, error = %e, "skipping undecodable subscription");
                        continue;
                    }
                };
                if !subscription.matches(EVENT_TRANSFER_UPDATE) {
                    continue;
                }
                let notification = Notification {
                    id: Uuid::new_v4(),
                    subscription_id: subscription.id,
                    target_uri: subscription.target_uri.clone(),
                    event: EVENT_TRANSFER_UPDATE.to_string(),
                    transfer: transfer.clone(),
                    attempts: 0,
                    next_attempt_at: now,
                    state: NotificationState::Pending,
                    created_at: now,
                };
                tx.put_json(&paths::notification(&notification.id), &notification)?;
                debug!(
                    notification = %notification.id,
                    subscription = %subscription.id,
                    transfer = %transfer.id,
                    "notification enqueued"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fund(account: &str, amount: &str, authorized: bool) -> SourceFund {
        SourceFund {
            account: account.into(),
            amount: amount.parse().unwrap(),
            authorization: authorized.then(|| json!({})),
        }
    }

    fn transfer(sources: Vec<SourceFund>, state: TransferState) -> Transfer {
        let total: Decimal = sources.iter().map(|f| f.amount).sum();
        Transfer {
            id: Uuid::new_v4(),
            source_funds: sources,
            destination_funds: vec![crate::model::DestinationFund {
                account: "bob".into(),
                amount: total,
            }],
            execution_condition: None,
            execution_condition_fulfillment: None,
            expires_at: None,
            state,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn payload_of(t: &Transfer) -> TransferPayload {
        TransferPayload {
            id: t.id,
            source_funds: t.source_funds.clone(),
            destination_funds: t.destination_funds.clone(),
            execution_condition: t.execution_condition.clone(),
            execution_condition_fulfillment: t.execution_condition_fulfillment.clone(),
            expires_at: t.expires_at,
            requested_state: None,
        }
    }

    #[test]
    fn test_payload_matches_same_body() {
        let stored = transfer(vec![fund("alice", "10", true)], TransferState::Completed);
        let payload = payload_of(&stored);
        assert!(TransferEngine::payload_matches(&stored, &payload));
    }

    #[test]
    fn test_payload_differs_on_new_authorization() {
        let stored = transfer(vec![fund("alice", "10", false)], TransferState::Proposed);
        let mut payload = payload_of(&stored);
        payload.source_funds[0].authorization = Some(json!({}));
        assert!(!TransferEngine::payload_matches(&stored, &payload));
    }

    #[test]
    fn test_payload_differs_on_requested_state() {
        let stored = transfer(vec![fund("alice", "10", true)], TransferState::Completed);
        let mut payload = payload_of(&stored);
        payload.requested_state = Some(TransferState::Rejected);
        assert!(!TransferEngine::payload_matches(&stored, &payload));

        payload.requested_state = Some(TransferState::Completed);
        assert!(TransferEngine::payload_matches(&stored, &payload));
    }

    #[test]
    fn test_omitted_fields_are_treated_as_restated() {
        let mut stored = transfer(vec![fund("alice", "10", true)], TransferState::Prepared);
        stored.execution_condition = Some(json!({"signer": "s"}));
        stored.expires_at = Some(Utc::now());

        // A body that omits condition and deadline still matches.
        let mut payload = payload_of(&stored);
        payload.execution_condition = None;
        payload.expires_at = None;
        assert!(TransferEngine::payload_matches(&stored, &payload));
    }

    #[test]
    fn test_shape_drift_is_rejected() {
        let stored = transfer(vec![fund("alice", "10", true)], TransferState::Proposed);

        let mut payload = payload_of(&stored);
        payload.source_funds[0].amount = "11".parse().unwrap();
        assert!(TransferEngine::ensure_same_shape(&stored, &payload).is_err());

        let mut payload = payload_of(&stored);
        payload.destination_funds[0].account = "carol".into();
        assert!(TransferEngine::ensure_same_shape(&stored, &payload).is_err());

        let mut payload = payload_of(&stored);
        payload.execution_condition = Some(json!({"signer": "s"}));
        assert!(TransferEngine::ensure_same_shape(&stored, &payload).is_err());
    }

    #[test]
    fn test_screen_authorizations() {
        let alice = Principal::new("alice", false);
        let admin = Principal::new("root", true);

        let own = [fund("alice", "10", true)];
        assert!(TransferEngine::screen_authorizations(&alice, &own).is_ok());

        let foreign = [fund("bob", "10", true)];
        assert!(matches!(
            TransferEngine::screen_authorizations(&alice, &foreign),
            Err(EngineError::Forbidden(_))
        ));
        assert!(TransferEngine::screen_authorizations(&admin, &foreign).is_ok());

        // Unauthorized foreign entries are fine; presence is what is screened.
        let unauthorized = [fund("bob", "10", false)];
        assert!(TransferEngine::screen_authorizations(&alice, &unauthorized).is_ok());
    }
}
