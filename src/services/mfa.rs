// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! MFA verification with a sliding-window limit on failed attempts.
//!
//! Every verification first counts the user's failures in the last
//! [`ATTEMPT_WINDOW_MINUTES`]. At [`MAX_FAILED_ATTEMPTS`] the request is
//! rejected without looking at the code.

use crate::db::Store;
use crate::error::AppError;
use crate::models::{FactorType, MfaAttempt, MfaFactor};
use crate::services::kms::KmsService;
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

pub const MAX_FAILED_ATTEMPTS: u32 = 3;
pub const ATTEMPT_WINDOW_MINUTES: i64 = 15;

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP_SECS: u64 = 30;
const TOTP_SECRET_BYTES: usize = 20;
const TOTP_ISSUER: &str = "MyRhythm";

const BACKUP_CODE_COUNT: usize = 10;
/// No 0/O or 1/I. 32 symbols, so `byte % 32` is unbiased.
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const TOO_MANY_ATTEMPTS: &str = "Too many attempts. Please try again in 15 minutes.";
const INVALID_CODE: &str = "Invalid verification code";

/// Checks a one-time password against a base32 secret.
pub trait OtpVerifier: Send + Sync {
    fn verify(&self, secret_base32: &str, code: &str, at: DateTime<Utc>) -> bool;
}

/// RFC 6238 TOTP: SHA-1, 6 digits, 30 s step, one step of skew.
pub struct TotpVerifier;

impl OtpVerifier for TotpVerifier {
    fn verify(&self, secret_base32: &str, code: &str, at: DateTime<Utc>) -> bool {
        let Ok(secret) = Secret::Encoded(secret_base32.to_string()).to_bytes() else {
            tracing::warn!("Stored TOTP secret is not valid base32");
            return false;
        };

        match TOTP::new(Algorithm::SHA1, TOTP_DIGITS, TOTP_SKEW, TOTP_STEP_SECS, secret) {
            Ok(totp) => totp.check(code, at.timestamp().max(0) as u64),
            Err(e) => {
                tracing::warn!(error = %e, "Stored TOTP secret rejected");
                false
            }
        }
    }
}

/// Verification outcome returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MfaVerifyResult {
    pub success: bool,
    pub remaining_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// New TOTP secret, shown to the user once.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TotpEnrollment {
    pub secret: String,
    pub otpauth_url: String,
}

#[derive(Clone)]
pub struct MfaService {
    store: Arc<dyn Store>,
    kms: KmsService,
    otp: Arc<dyn OtpVerifier>,
    rng: SystemRandom,
}

impl MfaService {
    pub fn new(store: Arc<dyn Store>, kms: KmsService, otp: Arc<dyn OtpVerifier>) -> Self {
        Self {
            store,
            kms,
            otp,
            rng: SystemRandom::new(),
        }
    }

    /// Verify `code` for `factor_type`, logging the attempt.
    pub async fn verify(
        &self,
        user_id: &str,
        factor_type: FactorType,
        code: &str,
    ) -> Result<MfaVerifyResult, AppError> {
        let now = Utc::now();
        let since = now - Duration::minutes(ATTEMPT_WINDOW_MINUTES);
        let failures = self.store.count_failed_mfa_attempts(user_id, since).await? as u32;

        if failures >= MAX_FAILED_ATTEMPTS {
            tracing::warn!(user_id, failures, "MFA rate limit reached");
            return Ok(MfaVerifyResult {
                success: false,
                remaining_attempts: 0,
                error: Some(TOO_MANY_ATTEMPTS.to_string()),
            });
        }

        let success = match factor_type {
            FactorType::Totp => self.verify_totp(user_id, code, now).await?,
            FactorType::Sms => is_six_digits(code),
            FactorType::BackupCode => {
                self.store
                    .consume_backup_code(user_id, &hash_backup_code(code), now)
                    .await?
            }
        };

        self.store
            .log_mfa_attempt(&MfaAttempt {
                user_id: user_id.to_string(),
                factor_type,
                success,
                attempted_at: format_utc_rfc3339(now),
            })
            .await?;

        tracing::info!(user_id, factor = ?factor_type, success, "MFA verification attempt");

        if success {
            Ok(MfaVerifyResult {
                success: true,
                remaining_attempts: MAX_FAILED_ATTEMPTS,
                error: None,
            })
        } else {
            Ok(MfaVerifyResult {
                success: false,
                remaining_attempts: MAX_FAILED_ATTEMPTS.saturating_sub(failures + 1),
                error: Some(INVALID_CODE.to_string()),
            })
        }
    }

    async fn verify_totp(
        &self,
        user_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let Some(mut factor) = self.store.get_mfa_factor(user_id).await? else {
            return Ok(false);
        };
        let Some(encrypted) = factor.totp_secret_encrypted.as_deref() else {
            return Ok(false);
        };

        let secret = self.kms.decrypt(encrypted, user_id.as_bytes()).await?;
        if !self.otp.verify(&secret, code.trim(), now) {
            return Ok(false);
        }

        // First successful code confirms enrollment.
        if !factor.totp_enabled {
            factor.totp_enabled = true;
            factor.updated_at = format_utc_rfc3339(now);
            self.store.set_mfa_factor(&factor).await?;
            tracing::info!(user_id, "TOTP enrollment confirmed");
        }

        Ok(true)
    }

    /// Generate and store a new TOTP secret. Replaces any pending or enabled
    /// secret; the factor is disabled until a code is verified.
    pub async fn enroll_totp(
        &self,
        user_id: &str,
        account_name: &str,
    ) -> Result<TotpEnrollment, AppError> {
        let mut raw = [0u8; TOTP_SECRET_BYTES];
        self.rng
            .fill(&mut raw)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Random generator failed")))?;

        let Secret::Encoded(secret) = Secret::Raw(raw.to_vec()).to_encoded() else {
            return Err(AppError::Internal(anyhow::anyhow!(
                "TOTP secret encoding failed"
            )));
        };

        let encrypted = self.kms.encrypt(&secret, user_id.as_bytes()).await?;
        let now = format_utc_rfc3339(Utc::now());
        let existing = self.store.get_mfa_factor(user_id).await?;

        let factor = MfaFactor {
            user_id: user_id.to_string(),
            totp_secret_encrypted: Some(encrypted),
            totp_enabled: false,
            phone_number: existing.as_ref().and_then(|f| f.phone_number.clone()),
            created_at: existing.map(|f| f.created_at).unwrap_or_else(|| now.clone()),
            updated_at: now,
        };
        self.store.set_mfa_factor(&factor).await?;

        tracing::info!(user_id, "TOTP secret generated");

        Ok(TotpEnrollment {
            otpauth_url: otpauth_url(&secret, account_name),
            secret,
        })
    }

    /// Replace the user's backup codes. The plain codes are returned once.
    pub async fn generate_backup_codes(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
        for _ in 0..BACKUP_CODE_COUNT {
            let mut bytes = [0u8; 8];
            self.rng
                .fill(&mut bytes)
                .map_err(|_| AppError::Internal(anyhow::anyhow!("Random generator failed")))?;
            codes.push(format_backup_code(&bytes));
        }

        let hashes: Vec<String> = codes.iter().map(|c| hash_backup_code(c)).collect();
        self.store.replace_backup_codes(user_id, &hashes).await?;

        tracing::info!(user_id, count = codes.len(), "Backup codes regenerated");
        Ok(codes)
    }
}

fn is_six_digits(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

fn format_backup_code(bytes: &[u8; 8]) -> String {
    let chars: String = bytes
        .iter()
        .map(|b| BACKUP_CODE_ALPHABET[(*b as usize) % BACKUP_CODE_ALPHABET.len()] as char)
        .collect();
    format!("{}-{}", &chars[..4], &chars[4..])
}

/// Hex SHA-256 of a backup code, ignoring case, dashes and whitespace.
pub fn hash_backup_code(code: &str) -> String {
    let normalized: String = code
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

fn otpauth_url(secret: &str, account_name: &str) -> String {
    let label = format!("{}:{}", TOTP_ISSUER, account_name);
    format!(
        "otpauth://totp/{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
        urlencoding::encode(&label),
        secret,
        urlencoding::encode(TOTP_ISSUER),
        TOTP_DIGITS,
        TOTP_STEP_SECS
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDb;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts a fixed code and counts how often it was asked.
    struct CountingVerifier {
        calls: AtomicUsize,
    }

    impl OtpVerifier for CountingVerifier {
        fn verify(&self, _secret: &str, code: &str, _at: DateTime<Utc>) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            code == "123456"
        }
    }

    async fn service() -> (MfaService, Arc<CountingVerifier>) {
        let verifier = Arc::new(CountingVerifier {
            calls: AtomicUsize::new(0),
        });
        let store: Arc<dyn Store> = Arc::new(MemoryDb::new());
        let service = MfaService::new(store, KmsService::new_mock(), verifier.clone());
        service.enroll_totp("u1", "ann@example.com").await.unwrap();
        (service, verifier)
    }

    #[tokio::test]
    async fn test_fourth_attempt_short_circuits() {
        let (service, verifier) = service().await;

        for expected_remaining in [2, 1, 0] {
            let result = service.verify("u1", FactorType::Totp, "000000").await.unwrap();
            assert!(!result.success);
            assert_eq!(result.remaining_attempts, expected_remaining);
        }
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 3);

        let result = service.verify("u1", FactorType::Totp, "123456").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.remaining_attempts, 0);
        assert_eq!(result.error.as_deref(), Some(TOO_MANY_ATTEMPTS));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_resets_remaining_and_enables_totp() {
        let (service, _) = service().await;

        let result = service.verify("u1", FactorType::Totp, "123456").await.unwrap();
        assert!(result.success);
        assert_eq!(result.remaining_attempts, MAX_FAILED_ATTEMPTS);
        assert_eq!(result.error, None);

        let factor = service.store.get_mfa_factor("u1").await.unwrap().unwrap();
        assert!(factor.totp_enabled);
    }

    #[tokio::test]
    async fn test_sms_placeholder_accepts_six_digits() {
        let (service, _) = service().await;

        assert!(service.verify("u1", FactorType::Sms, "042424").await.unwrap().success);
        assert!(!service.verify("u1", FactorType::Sms, "04242").await.unwrap().success);
        assert!(!service.verify("u1", FactorType::Sms, "04242a").await.unwrap().success);
    }

    #[tokio::test]
    async fn test_backup_code_is_single_use() {
        let (service, _) = service().await;
        let codes = service.generate_backup_codes("u1").await.unwrap();
        assert_eq!(codes.len(), BACKUP_CODE_COUNT);

        let code = codes[0].to_lowercase();
        assert!(service.verify("u1", FactorType::BackupCode, &code).await.unwrap().success);
        assert!(!service.verify("u1", FactorType::BackupCode, &code).await.unwrap().success);
    }

    #[test]
    fn test_backup_code_format() {
        let code = format_backup_code(&[0, 1, 2, 3, 31, 32, 255, 100]);
        assert_eq!(code.len(), 9);
        assert_eq!(&code[4..5], "-");
        assert_eq!(code, "ABCD-9A9E");
    }

    #[test]
    fn test_hash_ignores_formatting() {
        assert_eq!(hash_backup_code("abcd-efgh"), hash_backup_code("ABCDEFGH"));
        assert_eq!(hash_backup_code(" ABCD EFGH "), hash_backup_code("ABCD-EFGH"));
    }

    #[test]
    fn test_totp_verifier_against_generated_code() {
        let secret = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";
        let bytes = Secret::Encoded(secret.to_string()).to_bytes().unwrap();
        let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes).unwrap();

        let at = Utc::now();
        let code = totp.generate(at.timestamp() as u64);
        assert!(TotpVerifier.verify(secret, &code, at));
        assert!(!TotpVerifier.verify(secret, &code, at + Duration::minutes(5)));
    }
}
