// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Calendar OAuth routes: consent URL and provider callback.
//!
//! The user is identified by a signed `state` parameter because the callback
//! arrives as a browser redirect without the bearer token.

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    routing::{get, post},
    Extension, Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::middleware::AuthUser;
use crate::models::CalendarProvider;
use crate::AppState;

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

/// Maximum age of an OAuth state parameter.
const STATE_MAX_AGE_MS: i64 = 10 * 60 * 1000;
/// Allowed clock skew for states issued "in the future".
const STATE_CLOCK_SKEW_MS: i64 = 60 * 1000;

/// Callback route, reached by browser redirect without a bearer token.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/calendar/{provider}/callback", get(oauth_callback))
}

/// Routes that need an authenticated user.
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/calendar/{provider}/connect", post(connect))
}

#[derive(Deserialize)]
pub struct ConnectParams {
    /// Frontend origin to return to. Defaults to FRONTEND_URL.
    #[serde(default)]
    redirect_uri: Option<String>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ConnectResponse {
    pub url: String,
}

/// Decoded contents of a verified state parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthState {
    pub user_id: String,
    pub provider: CalendarProvider,
    pub frontend_url: String,
}

/// Provider callback URL registered with Google and Microsoft.
fn callback_url(config: &Config, provider: CalendarProvider) -> String {
    format!("{}/auth/calendar/{}/callback", config.api_url, provider)
}

/// Only the configured frontend and local dev servers may receive redirects.
fn is_allowed_frontend(config: &Config, url: &str) -> bool {
    if url == config.frontend_url {
        return true;
    }

    let Ok(parsed) = reqwest::Url::parse(url) else {
        return false;
    };
    parsed.scheme() == "http"
        && parsed.username().is_empty()
        && parsed.password().is_none()
        && matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1"))
}

/// Build the provider consent URL for the current user.
async fn connect(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
    Query(params): Query<ConnectParams>,
) -> Result<Json<ConnectResponse>> {
    let provider = CalendarProvider::parse(&provider)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown calendar provider: {}", provider)))?;
    let client = state.calendar.client(provider)?;

    let frontend_url = params
        .redirect_uri
        .unwrap_or_else(|| state.config.frontend_url.clone());
    if !is_allowed_frontend(&state.config, &frontend_url) {
        return Err(AppError::BadRequest("redirect_uri is not allowed".to_string()));
    }

    let oauth_state = sign_state(
        &OAuthState {
            user_id: user.user_id.clone(),
            provider,
            frontend_url,
        },
        chrono::Utc::now().timestamp_millis(),
        &state.config.oauth_state_key,
    )?;

    let url = client.authorize_url(&callback_url(&state.config, provider), &oauth_state)?;

    tracing::info!(user_id = %user.user_id, provider = %provider, "Starting calendar OAuth flow");

    Ok(Json(ConnectResponse { url }))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback - exchange code, store integration, return to the frontend.
async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let config = &state.config;
    let fail = |frontend: &str, reason: &str| {
        Redirect::temporary(&format!(
            "{}/calendar?error={}",
            frontend,
            urlencoding::encode(reason)
        ))
    };

    let verified = params.state.as_deref().and_then(|s| {
        verify_state(s, &config.oauth_state_key, chrono::Utc::now().timestamp_millis())
    });

    let Some(oauth_state) = verified else {
        tracing::warn!("Invalid, expired or tampered OAuth state parameter");
        return fail(&config.frontend_url, "invalid_state");
    };

    let frontend_url = if is_allowed_frontend(config, &oauth_state.frontend_url) {
        oauth_state.frontend_url.as_str()
    } else {
        config.frontend_url.as_str()
    };

    if CalendarProvider::parse(&provider) != Some(oauth_state.provider) {
        tracing::warn!(path_provider = %provider, "OAuth state provider mismatch");
        return fail(frontend_url, "invalid_state");
    }
    let provider = oauth_state.provider;

    if let Some(error) = params.error {
        tracing::warn!(provider = %provider, error = %error, "OAuth error from provider");
        return fail(frontend_url, &error);
    }

    let Some(code) = params.code else {
        return fail(frontend_url, "missing_code");
    };

    match state
        .calendar
        .handle_oauth_callback(
            &oauth_state.user_id,
            provider,
            &code,
            &callback_url(config, provider),
        )
        .await
    {
        Ok(integration) => {
            tracing::info!(
                user_id = %oauth_state.user_id,
                integration_id = %integration.id,
                "Calendar OAuth successful"
            );
            Redirect::temporary(&format!("{}/calendar?connected={}", frontend_url, provider))
        }
        Err(e) => {
            tracing::error!(provider = %provider, error = %e, "Calendar OAuth callback failed");
            fail(frontend_url, "connection_failed")
        }
    }
}

fn hmac_hex(payload: &str, secret: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Encode and sign: base64url("user|provider|ts_hex|frontend|signature_hex").
pub fn sign_state(state: &OAuthState, issued_at_ms: i64, secret: &[u8]) -> Result<String> {
    let payload = format!(
        "{}|{}|{:x}|{}",
        state.user_id, state.provider, issued_at_ms, state.frontend_url
    );
    let signature = hmac_hex(&payload, secret)?;
    Ok(URL_SAFE_NO_PAD.encode(format!("{}|{}", payload, signature)))
}

/// Verify signature and age of a state parameter and decode it.
pub fn verify_state(state: &str, secret: &[u8], now_ms: i64) -> Option<OAuthState> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    let (payload, signature_hex) = state_str.rsplit_once('|')?;
    let expected = hmac_hex(payload, secret).ok()?;

    if !bool::from(expected.as_bytes().ct_eq(signature_hex.as_bytes())) {
        tracing::error!("OAuth state signature mismatch! Potential tampering.");
        return None;
    }

    let mut parts = payload.splitn(4, '|');
    let user_id = parts.next()?;
    let provider = CalendarProvider::parse(parts.next()?)?;
    let issued_at = i64::from_str_radix(parts.next()?, 16).ok()?;
    let frontend_url = parts.next()?;

    let age = now_ms - issued_at;
    if age > STATE_MAX_AGE_MS || age < -STATE_CLOCK_SKEW_MS {
        tracing::warn!(age_ms = age, "OAuth state expired");
        return None;
    }

    if user_id.is_empty() {
        return None;
    }

    Some(OAuthState {
        user_id: user_id.to_string(),
        provider,
        frontend_url: frontend_url.to_string(),
    })
}
