// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process store for tests and local runs without GCP.

use crate::db::Store;
use crate::error::AppError;
use crate::models::{
    BackupCode, CalendarIntegration, ExternalEvent, IntegrationTokens, MfaAttempt, MfaFactor,
    Subscription,
};
use crate::time_utils::{format_utc_rfc3339, parse_utc_rfc3339};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

/// Store backed by concurrent maps. Cloning shares the same data.
#[derive(Default, Clone)]
pub struct MemoryDb {
    integrations: Arc<DashMap<String, CalendarIntegration>>,
    tokens: Arc<DashMap<String, IntegrationTokens>>,
    events: Arc<DashMap<String, ExternalEvent>>,
    subscriptions: Arc<DashMap<String, Subscription>>,
    mfa_factors: Arc<DashMap<String, MfaFactor>>,
    mfa_attempts: Arc<DashMap<String, Vec<MfaAttempt>>>,
    backup_codes: Arc<DashMap<String, BackupCode>>,
    /// External event ids whose writes fail, to exercise partial failures.
    failing_event_ids: Arc<DashSet<String>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upsert of the given external event id fail.
    pub fn fail_event_writes_for(&self, external_event_id: &str) {
        self.failing_event_ids.insert(external_event_id.to_string());
    }

    /// Number of stored events across all users.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl Store for MemoryDb {
    async fn get_integration(&self, id: &str) -> Result<Option<CalendarIntegration>, AppError> {
        Ok(self.integrations.get(id).map(|r| r.value().clone()))
    }

    async fn upsert_integration(
        &self,
        integration: &CalendarIntegration,
    ) -> Result<(), AppError> {
        self.integrations
            .insert(integration.id.clone(), integration.clone());
        Ok(())
    }

    async fn list_integrations(
        &self,
        user_id: &str,
    ) -> Result<Vec<CalendarIntegration>, AppError> {
        let mut list: Vec<CalendarIntegration> = self
            .integrations
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone())
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    async fn get_tokens(
        &self,
        integration_id: &str,
    ) -> Result<Option<IntegrationTokens>, AppError> {
        Ok(self.tokens.get(integration_id).map(|r| r.value().clone()))
    }

    async fn set_tokens(
        &self,
        integration_id: &str,
        tokens: &IntegrationTokens,
    ) -> Result<(), AppError> {
        self.tokens
            .insert(integration_id.to_string(), tokens.clone());
        Ok(())
    }

    async fn delete_tokens(&self, integration_id: &str) -> Result<(), AppError> {
        self.tokens.remove(integration_id);
        Ok(())
    }

    async fn upsert_event(&self, event: &ExternalEvent) -> Result<(), AppError> {
        if self.failing_event_ids.contains(&event.external_event_id) {
            return Err(AppError::Database(format!(
                "constraint violation writing event {}",
                event.external_event_id
            )));
        }
        self.events.insert(event.doc_id(), event.clone());
        Ok(())
    }

    async fn list_events_for_integration(
        &self,
        integration_id: &str,
    ) -> Result<Vec<ExternalEvent>, AppError> {
        Ok(self
            .events
            .iter()
            .filter(|r| r.integration_id == integration_id)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn list_events_for_user(&self, user_id: &str) -> Result<Vec<ExternalEvent>, AppError> {
        let mut events: Vec<ExternalEvent> = self
            .events
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone())
            .collect();
        events.sort_by(|a, b| {
            (&a.event_date, &a.start_time).cmp(&(&b.event_date, &b.start_time))
        });
        Ok(events)
    }

    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, AppError> {
        Ok(self.subscriptions.get(user_id).map(|r| r.value().clone()))
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        self.subscriptions
            .insert(subscription.user_id.clone(), subscription.clone());
        Ok(())
    }

    async fn get_mfa_factor(&self, user_id: &str) -> Result<Option<MfaFactor>, AppError> {
        Ok(self.mfa_factors.get(user_id).map(|r| r.value().clone()))
    }

    async fn set_mfa_factor(&self, factor: &MfaFactor) -> Result<(), AppError> {
        self.mfa_factors
            .insert(factor.user_id.clone(), factor.clone());
        Ok(())
    }

    async fn log_mfa_attempt(&self, attempt: &MfaAttempt) -> Result<(), AppError> {
        self.mfa_attempts
            .entry(attempt.user_id.clone())
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn count_failed_mfa_attempts(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        Ok(self
            .mfa_attempts
            .get(user_id)
            .map(|attempts| {
                attempts
                    .iter()
                    .filter(|a| !a.success)
                    .filter(|a| parse_utc_rfc3339(&a.attempted_at).is_some_and(|t| t >= since))
                    .count()
            })
            .unwrap_or(0))
    }

    async fn replace_backup_codes(
        &self,
        user_id: &str,
        hashes: &[String],
    ) -> Result<(), AppError> {
        self.backup_codes.retain(|_, code| code.user_id != user_id);
        for hash in hashes {
            self.backup_codes.insert(
                BackupCode::make_id(user_id, hash),
                BackupCode {
                    user_id: user_id.to_string(),
                    code_hash: hash.clone(),
                    used_at: None,
                },
            );
        }
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        user_id: &str,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        match self
            .backup_codes
            .get_mut(&BackupCode::make_id(user_id, code_hash))
        {
            Some(mut code) if code.used_at.is_none() => {
                code.used_at = Some(format_utc_rfc3339(now));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CalendarProvider, EventStatus, FactorType};
    use chrono::Duration;

    #[tokio::test]
    async fn test_backup_code_single_use() {
        let db = MemoryDb::new();
        let now = Utc::now();
        db.replace_backup_codes("u1", &["abc".to_string()])
            .await
            .unwrap();

        assert!(db.consume_backup_code("u1", "abc", now).await.unwrap());
        assert!(!db.consume_backup_code("u1", "abc", now).await.unwrap());
        assert!(!db.consume_backup_code("u2", "abc", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_attempt_window() {
        let db = MemoryDb::new();
        let now = Utc::now();
        for (minutes_ago, success) in [(20, false), (10, false), (5, true), (1, false)] {
            db.log_mfa_attempt(&MfaAttempt {
                user_id: "u1".to_string(),
                factor_type: FactorType::Totp,
                success,
                attempted_at: format_utc_rfc3339(now - Duration::minutes(minutes_ago)),
            })
            .await
            .unwrap();
        }

        let count = db
            .count_failed_mfa_attempts("u1", now - Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_events_listed_in_date_order() {
        let db = MemoryDb::new();
        for (id, date, start) in [
            ("late", "2026-05-06", None),
            ("afternoon", "2026-05-05", Some("15:30:00")),
            ("morning", "2026-05-05", Some("07:00:00")),
        ] {
            db.upsert_event(&ExternalEvent {
                external_event_id: id.to_string(),
                source: CalendarProvider::Google,
                integration_id: "u1_google_a%40b.c".to_string(),
                user_id: "u1".to_string(),
                title: id.to_string(),
                description: None,
                location: None,
                event_date: date.to_string(),
                start_time: start.map(str::to_string),
                end_time: None,
                is_all_day: start.is_none(),
                status: EventStatus::Confirmed,
                last_synced_at: "2026-05-01T00:00:00Z".to_string(),
            })
            .await
            .unwrap();
        }

        let ids: Vec<_> = db
            .list_events_for_user("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.external_event_id)
            .collect();
        assert_eq!(ids, ["morning", "afternoon", "late"]);
    }

    #[tokio::test]
    async fn test_create_trial_is_idempotent() {
        let db = MemoryDb::new();
        let first_check = Utc::now() - Duration::days(3);

        let first = db
            .create_trial_subscription("u1", "u1@example.com", first_check)
            .await
            .unwrap();
        let second = db
            .create_trial_subscription("u1", "u1@example.com", Utc::now())
            .await
            .unwrap();

        assert_eq!(first.trial_end, second.trial_end);
    }
}
