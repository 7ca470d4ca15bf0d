// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Provider credentials are optional: a deployment without, say, Outlook
//! credentials still serves every other route and answers Outlook requests
//! with 503.

use std::env;

/// OAuth client credentials for one calendar provider.
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Which document store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    /// In-process store, for local runs without GCP.
    Memory,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL for OAuth redirects
    pub frontend_url: String,
    /// Public URL of this API (used to build OAuth callback URLs)
    pub api_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region (KMS key ring location)
    pub gcp_region: String,
    /// Server port
    pub port: u16,
    /// Sender for transactional email
    pub email_from: String,
    pub store_backend: StoreBackend,

    // --- Secrets ---
    /// Identity provider JWT secret (HS256) used to verify bearer tokens
    pub jwt_secret: Vec<u8>,
    /// HMAC key for signing OAuth state parameters
    pub oauth_state_key: Vec<u8>,
    pub google: Option<OAuthCredentials>,
    pub outlook: Option<OAuthCredentials>,
    pub stripe_secret_key: Option<String>,
    pub resend_api_key: Option<String>,
}

impl Config {
    /// Config for tests: every provider configured with dummy credentials.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            api_url: "http://localhost:8080".to_string(),
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-west1".to_string(),
            port: 8080,
            email_from: "MyRhythm <noreply@myrhythm.app>".to_string(),
            store_backend: StoreBackend::Memory,
            jwt_secret: b"test_jwt_secret_32_bytes_minimum!".to_vec(),
            oauth_state_key: b"test_oauth_state_key".to_vec(),
            google: Some(OAuthCredentials {
                client_id: "google_client_id".to_string(),
                client_secret: "google_client_secret".to_string(),
            }),
            outlook: Some(OAuthCredentials {
                client_id: "outlook_client_id".to_string(),
                client_secret: "outlook_client_secret".to_string(),
            }),
            stripe_secret_key: Some("sk_test_123".to_string()),
            resend_api_key: Some("re_test_123".to_string()),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let store_backend = match env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("firestore") | Err(_) => StoreBackend::Firestore,
            Ok(_) => return Err(ConfigError::Invalid("STORE_BACKEND")),
        };

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-west1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "MyRhythm <noreply@myrhythm.app>".to_string()),
            store_backend,

            jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .map_err(|_| ConfigError::Missing("SUPABASE_JWT_SECRET"))?
                .trim()
                .as_bytes()
                .to_vec(),
            oauth_state_key: env::var("OAUTH_STATE_KEY")
                .map_err(|_| ConfigError::Missing("OAUTH_STATE_KEY"))?
                .into_bytes(),
            google: credentials("GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_SECRET"),
            outlook: credentials("OUTLOOK_CLIENT_ID", "OUTLOOK_CLIENT_SECRET"),
            stripe_secret_key: optional_secret("STRIPE_SECRET_KEY"),
            resend_api_key: optional_secret("RESEND_API_KEY"),
        })
    }
}

/// Read a trimmed, non-empty secret.
fn optional_secret(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Credentials count only when both halves are present.
fn credentials(id_var: &str, secret_var: &str) -> Option<OAuthCredentials> {
    match (optional_secret(id_var), optional_secret(secret_var)) {
        (Some(client_id), Some(client_secret)) => Some(OAuthCredentials {
            client_id,
            client_secret,
        }),
        (Some(_), None) | (None, Some(_)) => {
            tracing::warn!(
                id_var,
                secret_var,
                "Only one half of OAuth credentials is set, provider disabled"
            );
            None
        }
        (None, None) => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
