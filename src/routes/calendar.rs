// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Calendar integration routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::AuthUser;
use crate::models::{CalendarIntegration, CalendarProvider, ExternalEvent};
use crate::services::SyncReport;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Calendar routes (require authentication via JWT).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/calendar/integrations", get(list_integrations))
        .route("/api/calendar/integrations/{id}", delete(disconnect))
        .route("/api/calendar/{provider}/sync", post(sync))
        .route("/api/calendar/events", get(list_events))
}

#[derive(Serialize)]
pub struct IntegrationsResponse {
    pub integrations: Vec<CalendarIntegration>,
}

async fn list_integrations(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<IntegrationsResponse>> {
    let integrations = state.store.list_integrations(&user.user_id).await?;
    Ok(Json(IntegrationsResponse { integrations }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub integration_id: Option<String>,
}

#[derive(Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub results: Vec<SyncReport>,
}

/// Sync one integration, or every active one for the provider.
/// The body is optional.
async fn sync(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
    body: Bytes,
) -> Result<Json<SyncResponse>> {
    let provider = CalendarProvider::parse(&provider)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown calendar provider: {}", provider)))?;

    let request: SyncRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SyncRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    let results = state
        .calendar
        .sync_for_user(&user.user_id, provider, request.integration_id.as_deref())
        .await?;

    Ok(Json(SyncResponse {
        success: true,
        results,
    }))
}

#[derive(Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
    pub integration: CalendarIntegration,
}

async fn disconnect(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<DisconnectResponse>> {
    let integration = state.calendar.disconnect(&user.user_id, &id).await?;
    Ok(Json(DisconnectResponse {
        success: true,
        integration,
    }))
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub events: Vec<ExternalEvent>,
}

/// The user's synced events, earliest first.
async fn list_events(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<EventsResponse>> {
    let events = state.store.list_events_for_user(&user.user_id).await?;
    Ok(Json(EventsResponse { events }))
}
