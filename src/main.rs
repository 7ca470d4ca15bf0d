// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! MyRhythm Sync API Server
//!
//! Calendar sync, subscription status, MFA verification and verification
//! email for the MyRhythm app.

use myrhythm_sync::{
    config::{Config, StoreBackend},
    db::{FirestoreDb, MemoryDb, Store},
    services::{
        CalendarService, EmailService, KmsService, MfaService, StripeClient, SubscriptionService,
        TotpVerifier,
    },
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, backend = ?config.store_backend, "Starting MyRhythm Sync API");

    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Firestore => Arc::new(
            FirestoreDb::new(&config.gcp_project_id)
                .await
                .expect("Failed to connect to Firestore"),
        ),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Arc::new(MemoryDb::new())
        }
    };

    let kms = init_kms(&config).await;

    let calendar = CalendarService::from_config(&config, store.clone(), kms.clone());
    let subscriptions = SubscriptionService::new(
        config.stripe_secret_key.clone().map(StripeClient::new),
        store.clone(),
    );
    let mfa = MfaService::new(store.clone(), kms, Arc::new(TotpVerifier));
    let email = EmailService::new(config.resend_api_key.clone(), config.email_from.clone());

    tracing::info!(
        google = config.google.is_some(),
        outlook = config.outlook.is_some(),
        stripe = config.stripe_secret_key.is_some(),
        resend = config.resend_api_key.is_some(),
        "Providers configured"
    );

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        calendar,
        subscriptions,
        mfa,
        email,
    });

    // Build router
    let app = myrhythm_sync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Connect to Cloud KMS. Local debug runs on the in-memory store use the
/// offline mock instead.
async fn init_kms(config: &Config) -> KmsService {
    #[cfg(debug_assertions)]
    if config.store_backend == StoreBackend::Memory {
        tracing::warn!("Using mock KMS (debug build, memory store)");
        return KmsService::new_mock();
    }

    KmsService::new(
        &config.gcp_project_id,
        &config.gcp_region,
        "token-encryption",
    )
    .await
    .expect("Failed to initialize KMS service")
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("myrhythm_sync=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
