// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! Everything the service persists goes through [`Store`]. Tokens are only
//! reachable through the token operations and are never part of an
//! integration record.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::AppError;
use crate::models::{
    CalendarIntegration, ExternalEvent, IntegrationTokens, MfaAttempt, MfaFactor, Subscription,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Collection names as constants.
pub mod collections {
    pub const CALENDAR_INTEGRATIONS: &str = "calendar_integrations";
    /// Encrypted OAuth tokens (keyed by integration id)
    pub const INTEGRATION_TOKENS: &str = "integration_tokens";
    pub const EXTERNAL_EVENTS: &str = "external_calendar_events";
    /// One per user (keyed by user id)
    pub const SUBSCRIPTIONS: &str = "subscriptions";
    pub const MFA_FACTORS: &str = "mfa_factors";
    pub const MFA_ATTEMPTS: &str = "mfa_verification_attempts";
    pub const BACKUP_CODES: &str = "mfa_backup_codes";
}

/// Persistence operations used by the services.
#[async_trait]
pub trait Store: Send + Sync {
    // ─── Calendar Integrations ───────────────────────────────────

    async fn get_integration(&self, id: &str) -> Result<Option<CalendarIntegration>, AppError>;

    async fn upsert_integration(&self, integration: &CalendarIntegration)
        -> Result<(), AppError>;

    async fn list_integrations(&self, user_id: &str)
        -> Result<Vec<CalendarIntegration>, AppError>;

    // ─── Token Store ─────────────────────────────────────────────

    async fn get_tokens(&self, integration_id: &str)
        -> Result<Option<IntegrationTokens>, AppError>;

    async fn set_tokens(
        &self,
        integration_id: &str,
        tokens: &IntegrationTokens,
    ) -> Result<(), AppError>;

    async fn delete_tokens(&self, integration_id: &str) -> Result<(), AppError>;

    // ─── External Events ─────────────────────────────────────────

    /// Insert or update keyed on (external_event_id, source).
    async fn upsert_event(&self, event: &ExternalEvent) -> Result<(), AppError>;

    async fn list_events_for_integration(
        &self,
        integration_id: &str,
    ) -> Result<Vec<ExternalEvent>, AppError>;

    async fn list_events_for_user(&self, user_id: &str) -> Result<Vec<ExternalEvent>, AppError>;

    // ─── Subscriptions ───────────────────────────────────────────

    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, AppError>;

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), AppError>;

    /// Start a trial unless the user already had one. Returns the stored row.
    async fn create_trial_subscription(
        &self,
        user_id: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Subscription, AppError> {
        if let Some(existing) = self.get_subscription(user_id).await? {
            if existing.trial_start.is_some() {
                return Ok(existing);
            }
        }

        let trial = Subscription::new_trial(user_id, email, now);
        self.upsert_subscription(&trial).await?;
        tracing::info!(user_id, trial_end = ?trial.trial_end, "Trial subscription created");
        Ok(trial)
    }

    // ─── MFA ─────────────────────────────────────────────────────

    async fn get_mfa_factor(&self, user_id: &str) -> Result<Option<MfaFactor>, AppError>;

    async fn set_mfa_factor(&self, factor: &MfaFactor) -> Result<(), AppError>;

    async fn log_mfa_attempt(&self, attempt: &MfaAttempt) -> Result<(), AppError>;

    /// Failed attempts for `user_id` at or after `since`.
    async fn count_failed_mfa_attempts(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<usize, AppError>;

    /// Replace all backup codes for a user with the given hashes.
    async fn replace_backup_codes(&self, user_id: &str, hashes: &[String])
        -> Result<(), AppError>;

    /// Mark a backup code used. Returns `false` if it is unknown or already used.
    async fn consume_backup_code(
        &self,
        user_id: &str,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;
}
