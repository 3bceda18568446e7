//! Transfer CRUD handlers.

use super::user_id;
use crate::error::AppError;
use crate::models::{TransferId, TransferRequest};
use crate::startup::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

/// A request body that is either one object or an array of them. The
/// response mirrors the shape: a bare object for a bare request, an array
/// element per request otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

pub async fn get_user_transfers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    let transfers = state.transfer_repo.get_user_transfers(&user_id).await?;
    Ok(Json(transfers).into_response())
}

pub async fn get_user_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(transfer_id): Path<TransferId>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    let transfer = state
        .transfer_repo
        .get_user_transfer(&transfer_id, &user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("transfer not found")))?;
    Ok(Json(transfer).into_response())
}

/// Serves both `POST /transfers` and `POST /transfers/batch`.
pub async fn create_user_transfers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<OneOrMany<TransferRequest>>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;

    let (requests, bare) = match payload {
        OneOrMany::One(req) => (vec![req], true),
        OneOrMany::Many(reqs) => (reqs, false),
    };
    if requests.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "no transfer requests provided"
        )));
    }

    tracing::info!(user_id = %user_id, count = requests.len(), "creating transfers");
    let mut transfers = state
        .transfer_repo
        .create_user_transfers(&user_id, requests)
        .await?;

    // don't render a surrounding array for a single bare request
    if bare {
        Ok(Json(transfers.remove(0)).into_response())
    } else {
        Ok(Json(transfers).into_response())
    }
}

pub async fn delete_user_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(transfer_id): Path<TransferId>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    state
        .transfer_repo
        .delete_user_transfer(&transfer_id, &user_id)
        .await?;
    Ok(().into_response())
}
