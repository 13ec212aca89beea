//! Durable records and the key layout they live under.
//!
//! Relationships between records are lookups by id or name, never in-memory
//! references. The store layout:
//!
//! ```text
//! people/<name>                    -> AccountRecord
//! people/<name>/balance            -> decimal string
//! people/<name>/held               -> decimal string
//! people/<name>/subscriptions/<id> -> Subscription
//! transfers/<id>                   -> Transfer
//! notifications/<id>               -> Notification
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::TransferState;

/// Event name carried by transfer notifications.
pub const EVENT_TRANSFER_UPDATE: &str = "transfer.update";
/// Wildcard subscription event.
pub const EVENT_ANY: &str = "*";

// ============================================================================
// Accounts
// ============================================================================

/// Account record at `people/<name>`. Balance and held funds live at sibling
/// paths so settlement transactions touch the narrowest keys possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub name: String,
    #[serde(default)]
    pub is_admin: bool,
    /// Argon2 PHC string for HTTP Basic authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    /// Hex ed25519 public key for HTTP Signature authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Transfers
// ============================================================================

/// One debit leg of a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFund {
    pub account: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    /// Owner consent marker; opaque. Present and non-null means authorized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Value>,
}

impl SourceFund {
    pub fn is_authorized(&self) -> bool {
        matches!(&self.authorization, Some(v) if !v.is_null())
    }
}

/// One credit leg of a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationFund {
    pub account: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
}

/// Transfer record at `transfers/<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub source_funds: Vec<SourceFund>,
    pub destination_funds: Vec<DestinationFund>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_condition: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_condition_fulfillment: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub state: TransferState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// Every source fund carries an authorization.
    pub fn is_authorized(&self) -> bool {
        self.source_funds.iter().all(SourceFund::is_authorized)
    }

    /// Distinct account names referenced by either side.
    pub fn accounts(&self) -> BTreeSet<&str> {
        self.source_funds
            .iter()
            .map(|f| f.account.as_str())
            .chain(self.destination_funds.iter().map(|f| f.account.as_str()))
            .collect()
    }

    /// Whether `account` appears on the debit side.
    pub fn has_source(&self, account: &str) -> bool {
        self.source_funds.iter().any(|f| f.account == account)
    }

    /// Wire representation: the record with its `id` rendered as an absolute
    /// URI rooted at `base_uri`.
    pub fn external(&self, base_uri: &str) -> Value {
        let mut doc = serde_json::to_value(self)
            .expect("transfer records always serialize");
        doc["id"] = Value::String(transfer_uri(base_uri, &self.id));
        doc
    }
}

/// Absolute URI for a transfer id.
pub fn transfer_uri(base_uri: &str, id: &Uuid) -> String {
    format!("{base_uri}/transfers/{id}")
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Durable registration for event notifications, owned by an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub owner: String,
    pub event: String,
    pub target_uri: String,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn matches(&self, event: &str) -> bool {
        self.event == event || self.event == EVENT_ANY
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationState {
    /// Awaiting delivery (or retry once `next_attempt_at` is due).
    Pending,
    /// Claimed by a worker; the claim marker for the CAS handoff.
    InFlight,
    /// Terminal: the target acknowledged with a 2xx.
    Delivered,
    /// Terminal: attempts exhausted.
    Abandoned,
}

impl NotificationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationState::Delivered | NotificationState::Abandoned
        )
    }
}

/// One delivery record at `notifications/<id>`, created per matching
/// subscription at each transfer transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub target_uri: String,
    pub event: String,
    /// Snapshot of the transfer at the transition that triggered this.
    pub transfer: Transfer,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub state: NotificationState,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Key layout
// ============================================================================

pub mod paths {
    use uuid::Uuid;

    use crate::store::KeyPath;

    pub fn people() -> KeyPath {
        KeyPath::new(["people"])
    }

    pub fn account(name: &str) -> KeyPath {
        KeyPath::new(["people", name])
    }

    pub fn balance(name: &str) -> KeyPath {
        account(name).child("balance")
    }

    pub fn held(name: &str) -> KeyPath {
        account(name).child("held")
    }

    pub fn subscriptions(owner: &str) -> KeyPath {
        account(owner).child("subscriptions")
    }

    pub fn subscription(owner: &str, id: &Uuid) -> KeyPath {
        subscriptions(owner).child(id.to_string())
    }

    pub fn transfers() -> KeyPath {
        KeyPath::new(["transfers"])
    }

    pub fn transfer(id: &Uuid) -> KeyPath {
        transfers().child(id.to_string())
    }

    pub fn notifications() -> KeyPath {
        KeyPath::new(["notifications"])
    }

    pub fn notification(id: &Uuid) -> KeyPath {
        notifications().child(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fund(account: &str, amount: &str, authorized: bool) -> SourceFund {
        SourceFund {
            account: account.to_string(),
            amount: amount.parse().unwrap(),
            authorization: authorized.then(|| json!({})),
        }
    }

    #[test]
    fn test_authorization_presence() {
        assert!(fund("alice", "10", true).is_authorized());
        assert!(!fund("alice", "10", false).is_authorized());

        let null_auth = SourceFund {
            authorization: Some(Value::Null),
            ..fund("alice", "10", false)
        };
        assert!(!null_auth.is_authorized());
    }

    #[test]
    fn test_amount_wire_format_is_string() {
        let fund = fund("alice", "10.50", false);
        let doc = serde_json::to_value(&fund).unwrap();
        assert_eq!(doc["amount"], json!("10.50"));
    }

    #[test]
    fn test_accounts_are_deduplicated() {
        let transfer = Transfer {
            id: Uuid::new_v4(),
            source_funds: vec![fund("alice", "5", true), fund("alice", "5", true)],
            destination_funds: vec![DestinationFund {
                account: "bob".into(),
                amount: "10".parse().unwrap(),
            }],
            execution_condition: None,
            execution_condition_fulfillment: None,
            expires_at: None,
            state: TransferState::Proposed,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let accounts: Vec<&str> = transfer.accounts().into_iter().collect();
        assert_eq!(accounts, vec!["alice", "bob"]);
        assert!(transfer.has_source("alice"));
        assert!(!transfer.has_source("bob"));
    }

    #[test]
    fn test_external_id_is_absolute() {
        let id = Uuid::new_v4();
        let transfer = Transfer {
            id,
            source_funds: vec![],
            destination_funds: vec![],
            execution_condition: None,
            execution_condition_fulfillment: None,
            expires_at: None,
            state: TransferState::Proposed,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let doc = transfer.external("http://ledger.example");
        assert_eq!(
            doc["id"],
            json!(format!("http://ledger.example/transfers/{id}"))
        );
    }

    #[test]
    fn test_subscription_event_matching() {
        let mut sub = Subscription {
            id: Uuid::new_v4(),
            owner: "alice".into(),
            event: EVENT_TRANSFER_UPDATE.into(),
            target_uri: "http://example.com/hook".into(),
            created_at: Utc::now(),
        };
        assert!(sub.matches(EVENT_TRANSFER_UPDATE));
        assert!(!sub.matches("account.update"));

        sub.event = EVENT_ANY.into();
        assert!(sub.matches(EVENT_TRANSFER_UPDATE));
    }

    #[test]
    fn test_paths_match_layout() {
        let id = Uuid::nil();
        assert_eq!(paths::balance("alice").to_string(), "people/alice/balance");
        assert_eq!(paths::held("alice").to_string(), "people/alice/held");
        assert_eq!(
            paths::subscription("alice", &id).to_string(),
            format!("people/alice/subscriptions/{id}")
        );
        assert_eq!(paths::transfer(&id).to_string(), format!("transfers/{id}"));
        assert_eq!(
            paths::notification(&id).to_string(),
            format!("notifications/{id}")
        );
    }
}
