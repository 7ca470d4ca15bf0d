// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Calendar sync: OAuth token lifecycle, event fetch and idempotent upsert.

use crate::config::{Config, OAuthCredentials};
use crate::db::Store;
use crate::error::AppError;
use crate::models::{
    CalendarIntegration, CalendarProvider, ExternalEvent, IntegrationTokens, NormalizedEvent,
};
use crate::services::google::{self, GoogleEvent};
use crate::services::kms::{encrypt_tokens, KmsService};
use crate::services::outlook::{self, OutlookEvent};
use crate::services::upstream::{check_json, request_failed};
use crate::time_utils::{format_utc_rfc3339, parse_utc_rfc3339};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Events are synced from now through this many days ahead.
pub const SYNC_WINDOW_DAYS: i64 = 30;

/// OAuth and API endpoints for one provider. Overridable for tests.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
}

impl ProviderEndpoints {
    pub fn google() -> Self {
        Self {
            authorize_url: google::AUTHORIZE_URL.to_string(),
            token_url: google::TOKEN_URL.to_string(),
            api_base: google::API_BASE.to_string(),
        }
    }

    pub fn outlook() -> Self {
        Self {
            authorize_url: outlook::AUTHORIZE_URL.to_string(),
            token_url: outlook::TOKEN_URL.to_string(),
            api_base: outlook::API_BASE.to_string(),
        }
    }

    /// Point every endpoint at one base URL (mock servers).
    pub fn at(base_url: &str) -> Self {
        Self {
            authorize_url: format!("{}/authorize", base_url),
            token_url: format!("{}/token", base_url),
            api_base: base_url.to_string(),
        }
    }
}

/// Token endpoint response, shared by code exchange and refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent when the provider keeps the existing refresh token.
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: i64,
    pub scope: Option<String>,
}

/// A provider event as fetched, before normalization.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    Google(GoogleEvent),
    Outlook(OutlookEvent),
}

impl RemoteEvent {
    pub fn normalize(self) -> Option<NormalizedEvent> {
        match self {
            RemoteEvent::Google(event) => event.normalize(),
            RemoteEvent::Outlook(event) => event.normalize(),
        }
    }
}

/// HTTP client for one calendar provider.
#[derive(Clone)]
pub struct CalendarClient {
    provider: CalendarProvider,
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    client_id: String,
    client_secret: String,
}

impl CalendarClient {
    pub fn new(provider: CalendarProvider, credentials: &OAuthCredentials) -> Self {
        let endpoints = match provider {
            CalendarProvider::Google => ProviderEndpoints::google(),
            CalendarProvider::Outlook => ProviderEndpoints::outlook(),
        };

        Self {
            provider,
            http: reqwest::Client::new(),
            endpoints,
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn provider(&self) -> CalendarProvider {
        self.provider
    }

    fn service_name(&self) -> &'static str {
        match self.provider {
            CalendarProvider::Google => "Google OAuth",
            CalendarProvider::Outlook => "Microsoft OAuth",
        }
    }

    fn scopes(&self) -> &'static str {
        match self.provider {
            CalendarProvider::Google => google::SCOPES,
            CalendarProvider::Outlook => outlook::SCOPES,
        }
    }

    /// Consent page URL the browser is sent to.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String, AppError> {
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", self.scopes()),
            ("state", state),
        ];
        match self.provider {
            CalendarProvider::Google => {
                params.push(("access_type", "offline"));
                params.push(("prompt", "consent"));
            }
            CalendarProvider::Outlook => params.push(("response_mode", "query")),
        }

        let url = reqwest::Url::parse_with_params(&self.endpoints.authorize_url, &params)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Bad authorize URL: {}", e)))?;
        Ok(url.into())
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, AppError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];
        if self.provider == CalendarProvider::Outlook {
            form.push(("scope", self.scopes()));
        }

        self.post_token_form(&form).await
    }

    /// Trade a refresh token for a new access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, AppError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if self.provider == CalendarProvider::Outlook {
            form.push(("scope", self.scopes()));
        }

        self.post_token_form(&form).await
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<TokenGrant, AppError> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| request_failed(self.service_name(), e))?;

        check_json(self.service_name(), response).await
    }

    pub async fn fetch_account_email(&self, access_token: &str) -> Result<String, AppError> {
        match self.provider {
            CalendarProvider::Google => {
                google::account_email(&self.http, &self.endpoints.api_base, access_token).await
            }
            CalendarProvider::Outlook => {
                outlook::account_email(&self.http, &self.endpoints.api_base, access_token).await
            }
        }
    }

    /// Fetch events in `[start, end]`, normalized. Events that cannot be
    /// normalized are dropped.
    pub async fn fetch_events(
        &self,
        access_token: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<NormalizedEvent>, AppError> {
        let api_base = &self.endpoints.api_base;
        let remote: Vec<RemoteEvent> = match self.provider {
            CalendarProvider::Google => {
                google::list_events(&self.http, api_base, access_token, start, end)
                    .await?
                    .into_iter()
                    .map(RemoteEvent::Google)
                    .collect()
            }
            CalendarProvider::Outlook => {
                outlook::list_events(&self.http, api_base, access_token, start, end)
                    .await?
                    .into_iter()
                    .map(RemoteEvent::Outlook)
                    .collect()
            }
        };

        let total = remote.len();
        let events: Vec<NormalizedEvent> =
            remote.into_iter().filter_map(RemoteEvent::normalize).collect();

        if events.len() < total {
            tracing::debug!(
                provider = %self.provider,
                skipped = total - events.len(),
                "Skipped events without a usable start"
            );
        }

        Ok(events)
    }
}

/// Cached access token with expiry information.
#[derive(Clone)]
pub struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Decrypted access tokens keyed by integration id.
pub type TokenCache = Arc<DashMap<String, CachedToken>>;

/// Per-integration refresh locks.
pub type RefreshLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Outcome of syncing one integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SyncReport {
    pub integration_id: String,
    pub provider: CalendarProvider,
    pub fetched: u32,
    pub upserted: u32,
    pub failed: u32,
    pub last_sync_at: String,
}

/// Calendar integrations for both providers.
///
/// Owns the token lifecycle:
/// - Token retrieval and decryption from the store
/// - Refresh once `now >= expires_at`, serialized per integration
/// - Re-encryption and storage of refreshed tokens
/// - In-memory caching of decrypted access tokens
#[derive(Clone)]
pub struct CalendarService {
    google: Option<CalendarClient>,
    outlook: Option<CalendarClient>,
    store: Arc<dyn Store>,
    kms: KmsService,
    token_cache: TokenCache,
    refresh_locks: RefreshLocks,
}

impl CalendarService {
    pub fn new(
        google: Option<CalendarClient>,
        outlook: Option<CalendarClient>,
        store: Arc<dyn Store>,
        kms: KmsService,
    ) -> Self {
        Self {
            google,
            outlook,
            store,
            kms,
            token_cache: Arc::new(DashMap::new()),
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    /// Build clients for every provider with credentials in `config`.
    pub fn from_config(config: &Config, store: Arc<dyn Store>, kms: KmsService) -> Self {
        let google = config
            .google
            .as_ref()
            .map(|c| CalendarClient::new(CalendarProvider::Google, c));
        let outlook = config
            .outlook
            .as_ref()
            .map(|c| CalendarClient::new(CalendarProvider::Outlook, c));

        Self::new(google, outlook, store, kms)
    }

    /// Client for `provider`, or 503 when its credentials are missing.
    pub fn client(&self, provider: CalendarProvider) -> Result<&CalendarClient, AppError> {
        match provider {
            CalendarProvider::Google => self
                .google
                .as_ref()
                .ok_or(AppError::NotConfigured("Google Calendar integration not configured")),
            CalendarProvider::Outlook => self
                .outlook
                .as_ref()
                .ok_or(AppError::NotConfigured("Outlook Calendar integration not configured")),
        }
    }

    // ─── Token Management ────────────────────────────────────────────────────

    /// Get a valid access token for `integration`, refreshing if expired.
    ///
    /// 1. Check the in-memory cache
    /// 2. Acquire the integration's refresh lock
    /// 3. Re-check the cache (a concurrent request may have refreshed)
    /// 4. Read and decrypt the stored access token
    /// 5. If expired, refresh, persist and cache the new pair
    pub async fn get_valid_access_token(
        &self,
        integration: &CalendarIntegration,
    ) -> Result<String, AppError> {
        let integration_id = integration.id.as_str();

        if let Some(token) = self.cached_token(integration_id) {
            return Ok(token);
        }

        let lock = self
            .refresh_locks
            .entry(integration_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock.lock().await;

        if let Some(token) = self.cached_token(integration_id) {
            return Ok(token);
        }

        let tokens = self.store.get_tokens(integration_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Tokens for integration {}", integration_id))
        })?;

        let aad = integration_id.as_bytes();
        let expires_at = parse_utc_rfc3339(&tokens.expires_at).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "Failed to parse token expiry: {}",
                tokens.expires_at
            ))
        })?;

        let now = Utc::now();
        if now < expires_at {
            let access_token = self.kms.decrypt(&tokens.access_token_encrypted, aad).await?;
            self.cache_token(integration_id, &access_token, expires_at);
            return Ok(access_token);
        }

        tracing::info!(
            integration_id,
            provider = %integration.provider,
            "Access token expired, refreshing"
        );

        let client = self.client(integration.provider)?;
        let refresh_token = self.kms.decrypt(&tokens.refresh_token_encrypted, aad).await?;
        let grant = client.refresh_token(&refresh_token).await?;

        let refresh_token = grant.refresh_token.unwrap_or(refresh_token);
        let new_expires_at = Utc::now() + Duration::seconds(grant.expires_in);

        let (enc_access, enc_refresh) =
            encrypt_tokens(&self.kms, &grant.access_token, &refresh_token, integration_id).await?;

        let updated = IntegrationTokens {
            access_token_encrypted: enc_access,
            refresh_token_encrypted: enc_refresh,
            expires_at: format_utc_rfc3339(new_expires_at),
            scopes: grant
                .scope
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or(tokens.scopes),
        };

        self.store.set_tokens(integration_id, &updated).await?;
        self.cache_token(integration_id, &grant.access_token, new_expires_at);

        tracing::info!(integration_id, "Token refreshed and cached");
        Ok(grant.access_token)
    }

    fn cached_token(&self, integration_id: &str) -> Option<String> {
        let cached = self.token_cache.get(integration_id)?;
        (Utc::now() < cached.expires_at).then(|| cached.access_token.clone())
    }

    fn cache_token(&self, integration_id: &str, access_token: &str, expires_at: DateTime<Utc>) {
        self.token_cache.insert(
            integration_id.to_string(),
            CachedToken {
                access_token: access_token.to_string(),
                expires_at,
            },
        );
    }

    // ─── OAuth Callback Handling ─────────────────────────────────────────────

    /// Exchange the code, resolve the account and store the integration with
    /// its encrypted tokens. Reconnecting an account reactivates its row.
    pub async fn handle_oauth_callback(
        &self,
        user_id: &str,
        provider: CalendarProvider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<CalendarIntegration, AppError> {
        let client = self.client(provider)?;
        let grant = client.exchange_code(code, redirect_uri).await?;
        let account_email = client.fetch_account_email(&grant.access_token).await?;

        let id = CalendarIntegration::make_id(user_id, provider, &account_email);
        let now = Utc::now();
        let now_str = format_utc_rfc3339(now);

        let existing = self.store.get_integration(&id).await?;

        let refresh_token = match grant.refresh_token {
            Some(token) => token,
            None => self.stored_refresh_token(&id).await?.ok_or_else(|| {
                AppError::Upstream(format!("{} did not return a refresh token", provider))
            })?,
        };

        let integration = CalendarIntegration {
            id: id.clone(),
            user_id: user_id.to_string(),
            provider,
            account_email,
            is_active: true,
            sync_enabled: true,
            last_sync_at: existing.as_ref().and_then(|i| i.last_sync_at.clone()),
            created_at: existing
                .map(|i| i.created_at)
                .unwrap_or_else(|| now_str.clone()),
            updated_at: now_str,
        };

        let expires_at = now + Duration::seconds(grant.expires_in);
        let (enc_access, enc_refresh) =
            encrypt_tokens(&self.kms, &grant.access_token, &refresh_token, &id).await?;

        let tokens = IntegrationTokens {
            access_token_encrypted: enc_access,
            refresh_token_encrypted: enc_refresh,
            expires_at: format_utc_rfc3339(expires_at),
            scopes: grant
                .scope
                .as_deref()
                .unwrap_or(client.scopes())
                .split_whitespace()
                .map(String::from)
                .collect(),
        };

        self.store.upsert_integration(&integration).await?;
        self.store.set_tokens(&id, &tokens).await?;
        self.cache_token(&id, &grant.access_token, expires_at);

        tracing::info!(
            user_id,
            provider = %provider,
            integration_id = %id,
            "Calendar connected, integration and tokens stored"
        );

        Ok(integration)
    }

    async fn stored_refresh_token(&self, integration_id: &str) -> Result<Option<String>, AppError> {
        match self.store.get_tokens(integration_id).await? {
            Some(tokens) => Ok(Some(
                self.kms
                    .decrypt(&tokens.refresh_token_encrypted, integration_id.as_bytes())
                    .await?,
            )),
            None => Ok(None),
        }
    }

    // ─── Sync ────────────────────────────────────────────────────────────────

    /// Sync one integration or all active, sync-enabled integrations of
    /// `provider` for the user. Any failure before the upsert stage aborts.
    pub async fn sync_for_user(
        &self,
        user_id: &str,
        provider: CalendarProvider,
        integration_id: Option<&str>,
    ) -> Result<Vec<SyncReport>, AppError> {
        self.client(provider)?;

        let integrations = match integration_id {
            Some(id) => {
                let integration = self
                    .owned_integration(user_id, id)
                    .await?
                    .filter(|i| i.provider == provider)
                    .ok_or_else(|| AppError::NotFound(format!("Integration {}", id)))?;
                if !integration.is_active {
                    return Err(AppError::BadRequest(
                        "Calendar integration is not active".to_string(),
                    ));
                }
                vec![integration]
            }
            None => self
                .store
                .list_integrations(user_id)
                .await?
                .into_iter()
                .filter(|i| i.provider == provider && i.is_active && i.sync_enabled)
                .collect(),
        };

        let mut reports = Vec::with_capacity(integrations.len());
        for integration in integrations {
            reports.push(self.sync_integration(integration).await?);
        }

        Ok(reports)
    }

    /// Fetch the next 30 days and upsert each event. Per-event failures are
    /// logged and counted; `last_sync_at` is stamped once at the end.
    pub async fn sync_integration(
        &self,
        mut integration: CalendarIntegration,
    ) -> Result<SyncReport, AppError> {
        let client = self.client(integration.provider)?;
        let access_token = self.get_valid_access_token(&integration).await?;

        let start = Utc::now();
        let end = start + Duration::days(SYNC_WINDOW_DAYS);
        let events = client.fetch_events(&access_token, start, end).await?;

        let synced_at = format_utc_rfc3339(Utc::now());
        let fetched = events.len() as u32;
        let mut upserted = 0u32;
        let mut failed = 0u32;

        for event in events {
            let record = ExternalEvent::from_normalized(&integration, event, &synced_at);
            match self.store.upsert_event(&record).await {
                Ok(()) => upserted += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        integration_id = %integration.id,
                        external_event_id = %record.external_event_id,
                        error = %e,
                        "Failed to upsert event, continuing"
                    );
                }
            }
        }

        let finished_at = format_utc_rfc3339(Utc::now());
        integration.last_sync_at = Some(finished_at.clone());
        integration.updated_at = finished_at.clone();
        self.store.upsert_integration(&integration).await?;

        tracing::info!(
            integration_id = %integration.id,
            provider = %integration.provider,
            fetched,
            upserted,
            failed,
            "Calendar sync complete"
        );

        Ok(SyncReport {
            integration_id: integration.id,
            provider: integration.provider,
            fetched,
            upserted,
            failed,
            last_sync_at: finished_at,
        })
    }

    // ─── Disconnect ──────────────────────────────────────────────────────────

    /// Deactivate an integration and delete its tokens.
    pub async fn disconnect(
        &self,
        user_id: &str,
        integration_id: &str,
    ) -> Result<CalendarIntegration, AppError> {
        let mut integration = self
            .owned_integration(user_id, integration_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Integration {}", integration_id)))?;

        integration.is_active = false;
        integration.sync_enabled = false;
        integration.updated_at = format_utc_rfc3339(Utc::now());

        self.store.upsert_integration(&integration).await?;
        self.store.delete_tokens(integration_id).await?;
        self.token_cache.remove(integration_id);

        tracing::info!(user_id, integration_id, "Calendar disconnected");
        Ok(integration)
    }

    /// Integration by id, hidden unless it belongs to `user_id`.
    async fn owned_integration(
        &self,
        user_id: &str,
        integration_id: &str,
    ) -> Result<Option<CalendarIntegration>, AppError> {
        Ok(self
            .store
            .get_integration(integration_id)
            .await?
            .filter(|i| i.user_id == user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(provider: CalendarProvider) -> CalendarClient {
        CalendarClient::new(
            provider,
            &OAuthCredentials {
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
            },
        )
    }

    #[test]
    fn test_google_authorize_url_requests_offline_access() {
        let url = client(CalendarProvider::Google)
            .authorize_url("http://localhost:8080/cb", "abc")
            .unwrap();

        assert!(url.starts_with(google::AUTHORIZE_URL));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("state=abc"));
        assert!(url.contains("calendar.readonly"));
    }

    #[test]
    fn test_outlook_authorize_url_requests_offline_scope() {
        let url = client(CalendarProvider::Outlook)
            .authorize_url("http://localhost:8080/cb", "abc")
            .unwrap();

        assert!(url.starts_with(outlook::AUTHORIZE_URL));
        assert!(url.contains("offline_access"));
        assert!(url.contains("response_mode=query"));
    }
}
