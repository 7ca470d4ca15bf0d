// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! MFA verification and enrollment routes.

use crate::error::{AppError, Result};
use crate::middleware::AuthUser;
use crate::models::FactorType;
use crate::services::mfa::{MfaVerifyResult, TotpEnrollment};
use crate::AppState;
use axum::{extract::rejection::JsonRejection, extract::State, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/mfa/verify", post(verify))
        .route("/api/mfa/totp/enroll", post(enroll_totp))
        .route("/api/mfa/backup-codes", post(backup_codes))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub factor_type: FactorType,
    pub code: String,
}

async fn verify(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: std::result::Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<MfaVerifyResult>> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    if request.code.trim().is_empty() {
        return Err(AppError::BadRequest("Code is required".to_string()));
    }

    let result = state
        .mfa
        .verify(&user.user_id, request.factor_type, &request.code)
        .await?;
    Ok(Json(result))
}

async fn enroll_totp(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<TotpEnrollment>> {
    let account = user.email.as_deref().unwrap_or(&user.user_id);
    let enrollment = state.mfa.enroll_totp(&user.user_id, account).await?;
    Ok(Json(enrollment))
}

#[derive(Serialize)]
pub struct BackupCodesResponse {
    pub codes: Vec<String>,
}

async fn backup_codes(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<BackupCodesResponse>> {
    let codes = state.mfa.generate_backup_codes(&user.user_id).await?;
    Ok(Json(BackupCodesResponse { codes }))
}
