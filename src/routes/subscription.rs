// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Subscription status route.

use crate::error::Result;
use crate::middleware::AuthUser;
use crate::services::SubscriptionCheck;
use crate::AppState;
use axum::{extract::State, routing::post, Extension, Json, Router};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/subscription/check", post(check_subscription))
}

/// Reconcile with Stripe and report the user's entitlement.
async fn check_subscription(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SubscriptionCheck>> {
    let email = user.require_email()?;
    let check = state.subscriptions.check(&user.user_id, email).await?;
    Ok(Json(check))
}
