pub mod depositories;
pub mod transfers;

use crate::error::AppError;
use crate::startup::AppState;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;

/// Routes for the transfer and depository CRUD surface.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route(
            "/transfers",
            get(transfers::get_user_transfers).post(transfers::create_user_transfers),
        )
        .route("/transfers/batch", post(transfers::create_user_transfers))
        .route(
            "/transfers/:transferId",
            get(transfers::get_user_transfer).delete(transfers::delete_user_transfer),
        )
        .route(
            "/depositories",
            get(depositories::get_user_depositories).post(depositories::create_user_depository),
        )
        .route(
            "/depositories/:depositoryId",
            get(depositories::get_user_depository)
                .patch(depositories::update_user_depository)
                .delete(depositories::delete_user_depository),
        )
}

/// Requests are scoped by the `x-user-id` header the auth proxy injects.
pub(crate) fn user_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("missing x-user-id header")))
}
