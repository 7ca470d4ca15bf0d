// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! MFA factors, backup codes and the attempt log.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorType {
    Totp,
    Sms,
    BackupCode,
}

/// One verification attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaAttempt {
    pub user_id: String,
    pub factor_type: FactorType,
    pub success: bool,
    /// RFC3339, written with `format_utc_rfc3339`
    pub attempted_at: String,
}

/// Enrolled factors for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaFactor {
    pub user_id: String,
    /// KMS-encrypted base32 TOTP secret
    pub totp_secret_encrypted: Option<String>,
    /// Set once a code from the enrolled secret has been verified
    pub totp_enabled: bool,
    pub phone_number: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Hashed single-use backup code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupCode {
    pub user_id: String,
    /// Hex SHA-256 of the normalized code
    pub code_hash: String,
    pub used_at: Option<String>,
}

impl BackupCode {
    pub fn make_id(user_id: &str, code_hash: &str) -> String {
        format!("{}_{}", user_id, code_hash)
    }
}
