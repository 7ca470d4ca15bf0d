// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Calendar integration model for storage and API.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// External calendar provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum CalendarProvider {
    Google,
    Outlook,
}

impl CalendarProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarProvider::Google => "google",
            CalendarProvider::Outlook => "outlook",
        }
    }

    /// Parse a path segment such as `google` or `outlook`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "google" => Some(CalendarProvider::Google),
            "outlook" | "microsoft" => Some(CalendarProvider::Outlook),
            _ => None,
        }
    }
}

impl std::fmt::Display for CalendarProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected calendar account, one per (user, provider, account email).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarIntegration {
    /// Document ID, see [`CalendarIntegration::make_id`]
    pub id: String,
    pub user_id: String,
    pub provider: CalendarProvider,
    pub account_email: String,
    pub is_active: bool,
    pub sync_enabled: bool,
    /// Last completed sync (RFC3339)
    pub last_sync_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl CalendarIntegration {
    /// Deterministic document ID so reconnecting the same account reuses its row.
    pub fn make_id(user_id: &str, provider: CalendarProvider, account_email: &str) -> String {
        format!(
            "{}_{}_{}",
            user_id,
            provider,
            urlencoding::encode(&account_email.to_lowercase())
        )
    }
}

/// OAuth tokens for an integration (encrypted, never sent to clients).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationTokens {
    /// Encrypted access token (base64)
    pub access_token_encrypted: String,
    /// Encrypted refresh token (base64)
    pub refresh_token_encrypted: String,
    /// When the access token expires (RFC3339)
    pub expires_at: String,
    /// Granted OAuth scopes
    pub scopes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_id_is_case_insensitive_on_email() {
        let a = CalendarIntegration::make_id("u1", CalendarProvider::Google, "Ann@Example.com");
        let b = CalendarIntegration::make_id("u1", CalendarProvider::Google, "ann@example.com");
        assert_eq!(a, b);
        assert_eq!(a, "u1_google_ann%40example.com");
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(
            CalendarProvider::parse("outlook"),
            Some(CalendarProvider::Outlook)
        );
        assert_eq!(
            CalendarProvider::parse("microsoft"),
            Some(CalendarProvider::Outlook)
        );
        assert_eq!(CalendarProvider::parse("yahoo"), None);
    }
}
