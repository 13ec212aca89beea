//! OpenAPI document aggregation.

use utoipa::OpenApi;

use super::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ledgerd",
        description = "Authenticated transactional ledger with conditional transfers, holds and notifications"
    ),
    paths(
        handlers::transfers::get_transfer,
        handlers::transfers::put_transfer,
        handlers::transfers::get_fulfillment,
        handlers::transfers::put_fulfillment,
        handlers::transfers::get_transfer_state,
        handlers::accounts::list_accounts,
        handlers::accounts::get_account,
        handlers::accounts::put_account,
        handlers::subscriptions::get_subscription,
        handlers::subscriptions::put_subscription,
        handlers::subscriptions::delete_subscription,
        handlers::subscriptions::get_notification,
    ),
    tags(
        (name = "Transfers", description = "Transfer lifecycle"),
        (name = "Accounts", description = "Account provisioning and balances"),
        (name = "Subscriptions", description = "Notification subscriptions")
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> axum::Json<utoipa::openapi::OpenApi> {
    axum::Json(ApiDoc::openapi())
}
