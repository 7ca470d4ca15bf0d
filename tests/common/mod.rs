// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use myrhythm_sync::config::Config;
use myrhythm_sync::db::{MemoryDb, Store};
use myrhythm_sync::models::{CalendarIntegration, CalendarProvider, IntegrationTokens};
use myrhythm_sync::routes::create_router;
use myrhythm_sync::services::{
    CalendarClient, CalendarService, EmailService, KmsService, MfaService, OtpVerifier,
    ProviderEndpoints, StripeClient, SubscriptionService, TotpVerifier,
};
use myrhythm_sync::time_utils::format_utc_rfc3339;
use myrhythm_sync::AppState;
use serde::Serialize;
use std::sync::Arc;
use wiremock::MockServer;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

pub const TEST_USER: &str = "2f1c9a4e-7b7d-4c1e-9a57-3d1f0c6b8e21";
pub const TEST_EMAIL: &str = "ann@example.com";

/// Router plus handles on everything a test may need to inspect.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub db: MemoryDb,
    pub kms: KmsService,
    /// Stands in for Google (`/google`), Microsoft (`/outlook`), Stripe
    /// (`/stripe`) and Resend (`/resend`).
    pub server: MockServer,
}

/// Create a test app on the in-memory store with every provider pointed at
/// one mock server.
#[allow(dead_code)]
pub async fn create_test_app() -> TestApp {
    create_test_app_with(Config::test_default(), Arc::new(TotpVerifier)).await
}

#[allow(dead_code)]
pub async fn create_test_app_with(config: Config, otp: Arc<dyn OtpVerifier>) -> TestApp {
    let server = MockServer::start().await;
    let uri = server.uri();

    let db = MemoryDb::new();
    let store: Arc<dyn Store> = Arc::new(db.clone());
    let kms = KmsService::new_mock();

    let google = config.google.as_ref().map(|c| {
        CalendarClient::new(CalendarProvider::Google, c)
            .with_endpoints(ProviderEndpoints::at(&format!("{}/google", uri)))
    });
    let outlook = config.outlook.as_ref().map(|c| {
        CalendarClient::new(CalendarProvider::Outlook, c)
            .with_endpoints(ProviderEndpoints::at(&format!("{}/outlook", uri)))
    });
    let calendar = CalendarService::new(google, outlook, store.clone(), kms.clone());

    let stripe = config
        .stripe_secret_key
        .clone()
        .map(|key| StripeClient::new(key).with_base_url(&format!("{}/stripe", uri)));
    let subscriptions = SubscriptionService::new(stripe, store.clone());

    let mfa = MfaService::new(store.clone(), kms.clone(), otp);
    let email = EmailService::new(config.resend_api_key.clone(), config.email_from.clone())
        .with_base_url(&format!("{}/resend", uri));

    let state = Arc::new(AppState {
        config,
        store,
        calendar,
        subscriptions,
        mfa,
        email,
    });

    TestApp {
        router: create_router(state.clone()),
        state,
        db,
        kms,
        server,
    }
}

/// Create a session JWT the way the identity provider does.
#[allow(dead_code)]
pub fn create_test_jwt(user_id: &str, email: Option<&str>, secret: &[u8]) -> String {
    #[derive(Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        email: Option<&'a str>,
        aud: &'a str,
        exp: usize,
        iat: usize,
    }

    let now = Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id,
        email,
        aud: "authenticated",
        exp: now + 3600,
        iat: now,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .unwrap()
}

/// Bearer header value for the default test user.
#[allow(dead_code)]
pub fn bearer(app: &TestApp) -> String {
    format!(
        "Bearer {}",
        create_test_jwt(TEST_USER, Some(TEST_EMAIL), &app.state.config.jwt_secret)
    )
}

/// Store an active integration whose access token expires at `expires_at`.
#[allow(dead_code)]
pub async fn seed_integration(
    app: &TestApp,
    provider: CalendarProvider,
    access_token: &str,
    expires_at: DateTime<Utc>,
) -> CalendarIntegration {
    let now = format_utc_rfc3339(Utc::now() - Duration::days(1));
    let account = format!("{}@example.com", provider);
    let integration = CalendarIntegration {
        id: CalendarIntegration::make_id(TEST_USER, provider, &account),
        user_id: TEST_USER.to_string(),
        provider,
        account_email: account,
        is_active: true,
        sync_enabled: true,
        last_sync_at: None,
        created_at: now.clone(),
        updated_at: now,
    };

    let aad = integration.id.as_bytes();
    let tokens = IntegrationTokens {
        access_token_encrypted: app.kms.encrypt(access_token, aad).await.unwrap(),
        refresh_token_encrypted: app.kms.encrypt("refresh-1", aad).await.unwrap(),
        expires_at: format_utc_rfc3339(expires_at),
        scopes: vec!["calendar".to_string()],
    };

    app.db.upsert_integration(&integration).await.unwrap();
    app.db.set_tokens(&integration.id, &tokens).await.unwrap();
    integration
}

/// Read a JSON response body.
#[allow(dead_code)]
pub async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
