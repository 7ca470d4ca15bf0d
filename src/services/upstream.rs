// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Response checks shared by the third-party HTTP clients.

use crate::error::AppError;
use serde::de::DeserializeOwned;

/// Map a transport error into an upstream error.
pub(crate) fn request_failed(service: &str, err: reqwest::Error) -> AppError {
    AppError::Upstream(format!("{} request failed: {}", service, err))
}

/// Return an error carrying the raw body unless the status is 2xx.
pub(crate) async fn check_status(
    service: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, AppError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::error!(service, status = %status, body = %body, "Upstream request rejected");

    Err(AppError::Upstream(format!(
        "{} returned HTTP {}: {}",
        service, status, body
    )))
}

/// Check the status, then parse the JSON body.
pub(crate) async fn check_json<T: DeserializeOwned>(
    service: &str,
    response: reqwest::Response,
) -> Result<T, AppError> {
    check_status(service, response)
        .await?
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("{} JSON parse error: {}", service, e)))
}
