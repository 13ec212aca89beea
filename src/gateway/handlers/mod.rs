//! HTTP handlers, grouped by resource.

pub mod accounts;
pub mod subscriptions;
pub mod transfers;

pub use accounts::{get_account, list_accounts, put_account};
pub use subscriptions::{
    delete_subscription, get_notification, get_subscription, put_subscription,
};
pub use transfers::{
    get_fulfillment, get_transfer, get_transfer_state, put_fulfillment, put_transfer,
};
