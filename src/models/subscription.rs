// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Subscription state mirrored from Stripe.

use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Length of the trial granted on first check.
pub const TRIAL_DAYS: i64 = 7;

/// Local subscription status.
///
/// Transitions are driven by Stripe; locally only `None -> Trial` happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    None,
    Trial,
    Active,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
    Unknown,
}

impl SubscriptionStatus {
    /// Map a Stripe subscription status: `trialing` becomes `trial`,
    /// everything else passes through.
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "trialing" => SubscriptionStatus::Trial,
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "incomplete" => SubscriptionStatus::Incomplete,
            "incomplete_expired" => SubscriptionStatus::IncompleteExpired,
            "unpaid" => SubscriptionStatus::Unpaid,
            "paused" => SubscriptionStatus::Paused,
            other => {
                tracing::warn!(status = other, "Unrecognized Stripe subscription status");
                SubscriptionStatus::Unknown
            }
        }
    }

    /// Whether this status grants access.
    pub fn is_subscribed(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trial)
    }
}

/// Coarse plan tier derived from the price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum PlanTier {
    Basic,
    Premium,
    Family,
}

impl PlanTier {
    /// Band a unit price in minor units. Assumes the three known price points;
    /// anything else lands in the nearest band.
    pub fn from_unit_amount(amount: i64) -> Self {
        if amount <= 999 {
            PlanTier::Basic
        } else if amount <= 1499 {
            PlanTier::Premium
        } else {
            PlanTier::Family
        }
    }
}

/// Whole days left in a trial, floored and never negative.
pub fn trial_days_left(trial_end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (trial_end - now).num_days().max(0)
}

/// Subscription row, one per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Identity provider user ID (also used as document ID)
    pub user_id: String,
    pub email: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    /// Derived on every check, never taken from client input
    pub plan_tier: Option<PlanTier>,
    pub trial_start: Option<String>,
    pub trial_end: Option<String>,
    pub current_period_start: Option<String>,
    pub current_period_end: Option<String>,
    pub updated_at: String,
}

impl Subscription {
    /// A fresh trial starting at `now`.
    pub fn new_trial(user_id: &str, email: &str, now: DateTime<Utc>) -> Self {
        let now_str = format_utc_rfc3339(now);
        Self {
            user_id: user_id.to_string(),
            email: email.to_string(),
            stripe_customer_id: None,
            stripe_subscription_id: None,
            status: SubscriptionStatus::Trial,
            plan_tier: None,
            trial_start: Some(now_str.clone()),
            trial_end: Some(format_utc_rfc3339(now + Duration::days(TRIAL_DAYS))),
            current_period_start: None,
            current_period_end: None,
            updated_at: now_str,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tier_boundaries() {
        let cases = [
            (0, PlanTier::Basic),
            (999, PlanTier::Basic),
            (1000, PlanTier::Premium),
            (1499, PlanTier::Premium),
            (1500, PlanTier::Family),
            (2999, PlanTier::Family),
        ];
        for (amount, expected) in cases {
            assert_eq!(PlanTier::from_unit_amount(amount), expected, "amount {}", amount);
        }
    }

    #[test]
    fn test_trial_days_left_floors() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(trial_days_left(now + Duration::hours(71), now), 2);
        assert_eq!(trial_days_left(now + Duration::days(7), now), 7);
        assert_eq!(trial_days_left(now + Duration::hours(5), now), 0);
    }

    #[test]
    fn test_trial_days_left_never_negative() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(trial_days_left(now - Duration::days(3), now), 0);
        assert_eq!(trial_days_left(now - Duration::seconds(1), now), 0);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            SubscriptionStatus::from_stripe("trialing"),
            SubscriptionStatus::Trial
        );
        assert_eq!(
            SubscriptionStatus::from_stripe("past_due"),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            SubscriptionStatus::from_stripe("something_new"),
            SubscriptionStatus::Unknown
        );
        assert!(SubscriptionStatus::Trial.is_subscribed());
        assert!(!SubscriptionStatus::Canceled.is_subscribed());
    }

    #[test]
    fn test_new_trial_is_seven_days() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let trial = Subscription::new_trial("u1", "u1@example.com", now);
        assert_eq!(trial.status, SubscriptionStatus::Trial);
        assert_eq!(trial.trial_end.as_deref(), Some("2026-05-08T12:00:00Z"));
    }
}
