// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Verification email route.

use crate::error::{AppError, Result};
use crate::AppState;
use axum::{extract::rejection::JsonRejection, extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/email/verification", post(send_verification))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerificationEmailRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
    #[validate(url(message = "Invalid redirect URL"))]
    pub redirect_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationEmailResponse {
    pub success: bool,
    pub message_id: String,
}

async fn send_verification(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<VerificationEmailRequest>, JsonRejection>,
) -> Result<Json<VerificationEmailResponse>> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    request
        .validate()
        .map_err(|e| AppError::BadRequest(first_validation_message(&e)))?;

    let message_id = state
        .email
        .send_verification(
            &request.email,
            request.name.trim(),
            &request.token,
            &request.redirect_url,
        )
        .await?;

    Ok(Json(VerificationEmailResponse {
        success: true,
        message_id,
    }))
}

fn first_validation_message(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "Invalid request".to_string())
}
