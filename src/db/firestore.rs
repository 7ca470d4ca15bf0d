// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Calendar integrations and their encrypted tokens
//! - Synced external calendar events
//! - Subscriptions
//! - MFA factors, backup codes and the verification attempt log

use crate::db::{collections, Store};
use crate::error::AppError;
use crate::models::{
    BackupCode, CalendarIntegration, ExternalEvent, IntegrationTokens, MfaAttempt, MfaFactor,
    Subscription,
};
use crate::time_utils::format_utc_rfc3339;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline Firestore client for testing.
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Fetch one document by ID.
    async fn get_doc<T>(&self, collection: &str, id: &str) -> Result<Option<T>, AppError>
    where
        T: for<'de> serde::Deserialize<'de> + Send,
    {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or replace one document.
    async fn put_doc<T>(&self, collection: &str, id: &str, value: &T) -> Result<(), AppError>
    where
        T: serde::Serialize + for<'de> serde::Deserialize<'de> + Sync + Send,
    {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collection)
            .document_id(id)
            .object(value)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Delete documents in transactions of at most `BATCH_SIZE`.
    async fn batch_delete(&self, collection: &str, ids: &[String]) -> Result<(), AppError> {
        let client = self.get_client()?;

        for chunk in ids.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for doc_id in chunk {
                client
                    .fluent()
                    .delete()
                    .from(collection)
                    .document_id(doc_id)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add deletion to transaction for {}: {}",
                            collection, e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit batch deletion: {}", e))
            })?;
        }

        Ok(())
    }
}

#[async_trait]
impl Store for FirestoreDb {
    // ─── Calendar Integrations ───────────────────────────────────

    async fn get_integration(&self, id: &str) -> Result<Option<CalendarIntegration>, AppError> {
        self.get_doc(collections::CALENDAR_INTEGRATIONS, id).await
    }

    async fn upsert_integration(
        &self,
        integration: &CalendarIntegration,
    ) -> Result<(), AppError> {
        self.put_doc(
            collections::CALENDAR_INTEGRATIONS,
            &integration.id,
            integration,
        )
        .await
    }

    async fn list_integrations(
        &self,
        user_id: &str,
    ) -> Result<Vec<CalendarIntegration>, AppError> {
        let user_id = user_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::CALENDAR_INTEGRATIONS)
            .filter(move |q| q.for_all([q.field("user_id").eq(user_id.clone())]))
            .order_by([("created_at", firestore::FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Token Store ─────────────────────────────────────────────

    async fn get_tokens(
        &self,
        integration_id: &str,
    ) -> Result<Option<IntegrationTokens>, AppError> {
        self.get_doc(collections::INTEGRATION_TOKENS, integration_id)
            .await
    }

    async fn set_tokens(
        &self,
        integration_id: &str,
        tokens: &IntegrationTokens,
    ) -> Result<(), AppError> {
        self.put_doc(collections::INTEGRATION_TOKENS, integration_id, tokens)
            .await
    }

    async fn delete_tokens(&self, integration_id: &str) -> Result<(), AppError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::INTEGRATION_TOKENS)
            .document_id(integration_id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── External Events ─────────────────────────────────────────

    async fn upsert_event(&self, event: &ExternalEvent) -> Result<(), AppError> {
        self.put_doc(collections::EXTERNAL_EVENTS, &event.doc_id(), event)
            .await
    }

    async fn list_events_for_integration(
        &self,
        integration_id: &str,
    ) -> Result<Vec<ExternalEvent>, AppError> {
        let integration_id = integration_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::EXTERNAL_EVENTS)
            .filter(move |q| q.for_all([q.field("integration_id").eq(integration_id.clone())]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_events_for_user(&self, user_id: &str) -> Result<Vec<ExternalEvent>, AppError> {
        let user_id = user_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::EXTERNAL_EVENTS)
            .filter(move |q| q.for_all([q.field("user_id").eq(user_id.clone())]))
            .order_by([
                ("event_date", firestore::FirestoreQueryDirection::Ascending),
                ("start_time", firestore::FirestoreQueryDirection::Ascending),
            ])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Subscriptions ───────────────────────────────────────────

    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, AppError> {
        self.get_doc(collections::SUBSCRIPTIONS, user_id).await
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        self.put_doc(
            collections::SUBSCRIPTIONS,
            &subscription.user_id,
            subscription,
        )
        .await
    }

    // ─── MFA ─────────────────────────────────────────────────────

    async fn get_mfa_factor(&self, user_id: &str) -> Result<Option<MfaFactor>, AppError> {
        self.get_doc(collections::MFA_FACTORS, user_id).await
    }

    async fn set_mfa_factor(&self, factor: &MfaFactor) -> Result<(), AppError> {
        self.put_doc(collections::MFA_FACTORS, &factor.user_id, factor)
            .await
    }

    async fn log_mfa_attempt(&self, attempt: &MfaAttempt) -> Result<(), AppError> {
        let _: MfaAttempt = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::MFA_ATTEMPTS)
            .generate_document_id()
            .object(attempt)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn count_failed_mfa_attempts(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let user_id = user_id.to_string();
        // Timestamps are stored in one fixed format, so string order is time order.
        let since = format_utc_rfc3339(since);

        let attempts: Vec<MfaAttempt> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::MFA_ATTEMPTS)
            .filter(move |q| {
                q.for_all([
                    q.field("user_id").eq(user_id.clone()),
                    q.field("success").eq(false),
                    q.field("attempted_at").greater_than_or_equal(since.clone()),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(attempts.len())
    }

    async fn replace_backup_codes(
        &self,
        user_id: &str,
        hashes: &[String],
    ) -> Result<(), AppError> {
        let owner = user_id.to_string();
        let existing: Vec<BackupCode> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::BACKUP_CODES)
            .filter(move |q| q.for_all([q.field("user_id").eq(owner.clone())]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let stale_ids: Vec<String> = existing
            .iter()
            .map(|code| BackupCode::make_id(&code.user_id, &code.code_hash))
            .collect();
        self.batch_delete(collections::BACKUP_CODES, &stale_ids)
            .await?;

        for hash in hashes {
            let code = BackupCode {
                user_id: user_id.to_string(),
                code_hash: hash.clone(),
                used_at: None,
            };
            self.put_doc(
                collections::BACKUP_CODES,
                &BackupCode::make_id(user_id, hash),
                &code,
            )
            .await?;
        }

        tracing::debug!(
            user_id,
            replaced = stale_ids.len(),
            created = hashes.len(),
            "Backup codes replaced"
        );
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        user_id: &str,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let doc_id = BackupCode::make_id(user_id, code_hash);
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        // The read joins the transaction, so a concurrent consume of the same
        // code fails at commit instead of both succeeding.
        let tx_client = client.clone_with_consistency_selector(
            firestore::FirestoreConsistencySelector::Transaction(
                transaction.transaction_id().clone(),
            ),
        );
        let code: Option<BackupCode> = tx_client
            .fluent()
            .select()
            .by_id_in(collections::BACKUP_CODES)
            .obj()
            .one(&doc_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut code = match code {
            Some(code) if code.used_at.is_none() => code,
            _ => {
                let _ = transaction.rollback().await;
                return Ok(false);
            }
        };

        code.used_at = Some(format_utc_rfc3339(now));

        client
            .fluent()
            .update()
            .in_col(collections::BACKUP_CODES)
            .document_id(&doc_id)
            .object(&code)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add backup code to transaction: {}", e))
            })?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_client_reports_database_error() {
        let db = FirestoreDb::new_mock();

        let err = db.get_integration("u1_google_a%40b.c").await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        let err = db.list_events_for_user("u1").await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }
}
