//! Depository CRUD handlers. Depositories are created Unverified; status
//! transitions happen through the micro-deposit flow (external) or return
//! handling, never through this surface.

use super::user_id;
use crate::error::AppError;
use crate::models::{AccountType, Depository, DepositoryId, DepositoryStatus, HolderType};
use crate::startup::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct DepositoryRequest {
    #[serde(rename = "bankName", default)]
    pub bank_name: String,
    #[serde(default)]
    pub holder: String,
    #[serde(rename = "holderType")]
    pub holder_type: Option<HolderType>,
    #[serde(rename = "type")]
    pub account_type: Option<AccountType>,
    #[serde(rename = "routingNumber", default)]
    pub routing_number: String,
    #[serde(rename = "accountNumber", default)]
    pub account_number: String,
    #[serde(default)]
    pub metadata: String,
}

impl DepositoryRequest {
    fn missing_fields(&self) -> bool {
        self.bank_name.is_empty()
            || self.holder.is_empty()
            || self.holder_type.is_none()
            || self.account_type.is_none()
            || self.routing_number.is_empty()
            || self.account_number.is_empty()
    }
}

pub async fn get_user_depositories(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    let depositories = state.dep_repo.get_user_depositories(&user_id).await?;
    Ok(Json(depositories).into_response())
}

pub async fn get_user_depository(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(depository_id): Path<DepositoryId>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    let depository = state
        .dep_repo
        .get_user_depository(&depository_id, &user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("depository not found")))?;
    Ok(Json(depository).into_response())
}

pub async fn create_user_depository(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DepositoryRequest>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    if req.missing_fields() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "missing required depository fields"
        )));
    }

    let now = Utc::now();
    let depository = Depository {
        id: Uuid::new_v4().to_string(),
        bank_name: req.bank_name,
        holder: req.holder,
        holder_type: req.holder_type.unwrap(),
        account_type: req.account_type.unwrap(),
        routing_number: req.routing_number,
        account_number: req.account_number,
        status: DepositoryStatus::Unverified,
        metadata: req.metadata,
        created: now,
        updated: now,
    };

    tracing::info!(depository_id = %depository.id, user_id = %user_id, "creating depository");
    state
        .dep_repo
        .upsert_user_depository(&user_id, &depository)
        .await?;
    Ok((StatusCode::CREATED, Json(depository)).into_response())
}

/// PATCH merges the non-empty request fields into the stored depository.
pub async fn update_user_depository(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(depository_id): Path<DepositoryId>,
    Json(req): Json<DepositoryRequest>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    let mut depository = state
        .dep_repo
        .get_user_depository(&depository_id, &user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("depository not found")))?;

    if !req.bank_name.is_empty() {
        depository.bank_name = req.bank_name;
    }
    if !req.holder.is_empty() {
        depository.holder = req.holder;
    }
    if let Some(holder_type) = req.holder_type {
        depository.holder_type = holder_type;
    }
    if let Some(account_type) = req.account_type {
        depository.account_type = account_type;
    }
    if !req.routing_number.is_empty() {
        depository.routing_number = req.routing_number;
    }
    if !req.account_number.is_empty() {
        depository.account_number = req.account_number;
    }
    if !req.metadata.is_empty() {
        depository.metadata = req.metadata;
    }
    depository.updated = Utc::now();

    state
        .dep_repo
        .upsert_user_depository(&user_id, &depository)
        .await?;
    Ok(Json(depository).into_response())
}

pub async fn delete_user_depository(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(depository_id): Path<DepositoryId>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    state
        .dep_repo
        .delete_user_depository(&depository_id, &user_id)
        .await?;
    Ok(().into_response())
}
