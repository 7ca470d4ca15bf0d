// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stripe client and subscription reconciliation.

use crate::db::Store;
use crate::error::AppError;
use crate::models::subscription::trial_days_left;
use crate::models::{PlanTier, Subscription, SubscriptionStatus};
use crate::services::upstream::{check_json, request_failed};
use crate::time_utils::{format_utc_rfc3339, parse_utc_rfc3339, unix_to_rfc3339};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

const SERVICE: &str = "Stripe";

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Stripe REST client (read-only).
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    pub trial_start: Option<i64>,
    pub trial_end: Option<i64>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub items: StripeItems,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeItems {
    pub data: Vec<StripeSubscriptionItem>,
}

/// Newer API versions carry the billing period on the item.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub price: StripePrice,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
    pub unit_amount: Option<i64>,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: STRIPE_API_BASE.to_string(),
            secret_key,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .query(query)
            .send()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;

        check_json(SERVICE, response).await
    }

    pub async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<StripeCustomer>, AppError> {
        let list: StripeList<StripeCustomer> = self
            .get_json("/v1/customers", &[("email", email), ("limit", "1")])
            .await?;
        Ok(list.data.into_iter().next())
    }

    /// Most recent subscription in any status.
    pub async fn latest_subscription(
        &self,
        customer_id: &str,
    ) -> Result<Option<StripeSubscription>, AppError> {
        let list: StripeList<StripeSubscription> = self
            .get_json(
                "/v1/subscriptions",
                &[("customer", customer_id), ("status", "all"), ("limit", "1")],
            )
            .await?;
        Ok(list.data.into_iter().next())
    }

    pub async fn get_price(&self, price_id: &str) -> Result<StripePrice, AppError> {
        self.get_json(&format!("/v1/prices/{}", urlencoding::encode(price_id)), &[])
            .await
    }
}

/// Entitlement summary returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SubscriptionCheck {
    pub subscribed: bool,
    pub trial_active: bool,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub trial_days_left: i64,
    pub subscription_tier: Option<PlanTier>,
    /// RFC3339
    pub subscription_end: Option<String>,
}

/// Reconciles local subscription rows with Stripe.
#[derive(Clone)]
pub struct SubscriptionService {
    stripe: Option<StripeClient>,
    store: Arc<dyn Store>,
}

impl SubscriptionService {
    pub fn new(stripe: Option<StripeClient>, store: Arc<dyn Store>) -> Self {
        Self { stripe, store }
    }

    /// Look the user up in Stripe and bring the local row up to date.
    pub async fn check(&self, user_id: &str, email: &str) -> Result<SubscriptionCheck, AppError> {
        let stripe = self
            .stripe
            .as_ref()
            .ok_or(AppError::NotConfigured("Stripe is not configured"))?;
        // Stored timestamps have whole-second precision.
        let now = Utc::now().trunc_subsecs(0);

        let Some(customer) = stripe.find_customer_by_email(email).await? else {
            let trial = self
                .store
                .create_trial_subscription(user_id, email, now)
                .await?;
            return Ok(trial_check(&trial, now));
        };

        let existing = self.store.get_subscription(user_id).await?;

        let Some(remote) = stripe.latest_subscription(&customer.id).await? else {
            let row = Subscription {
                user_id: user_id.to_string(),
                email: email.to_string(),
                stripe_customer_id: Some(customer.id.clone()),
                stripe_subscription_id: None,
                status: SubscriptionStatus::None,
                plan_tier: None,
                trial_start: existing.as_ref().and_then(|s| s.trial_start.clone()),
                trial_end: existing.as_ref().and_then(|s| s.trial_end.clone()),
                current_period_start: None,
                current_period_end: None,
                updated_at: format_utc_rfc3339(now),
            };
            self.store.upsert_subscription(&row).await?;

            tracing::info!(user_id, customer_id = %customer.id, "Stripe customer has no subscription");
            return Ok(SubscriptionCheck {
                subscribed: false,
                trial_active: false,
                trial_days_left: 0,
                subscription_tier: None,
                subscription_end: None,
            });
        };

        let status = SubscriptionStatus::from_stripe(&remote.status);
        let tier = self.plan_tier(stripe, &remote).await?;

        let item = remote.items.data.first();
        let period_start = remote
            .current_period_start
            .or_else(|| item.and_then(|i| i.current_period_start))
            .and_then(unix_to_rfc3339);
        let period_end = remote
            .current_period_end
            .or_else(|| item.and_then(|i| i.current_period_end))
            .and_then(unix_to_rfc3339);

        let trial_end_at = remote.trial_end.and_then(|t| DateTime::from_timestamp(t, 0));
        let days_left = trial_end_at.map(|end| trial_days_left(end, now)).unwrap_or(0);

        let row = Subscription {
            user_id: user_id.to_string(),
            email: email.to_string(),
            stripe_customer_id: Some(customer.id),
            stripe_subscription_id: Some(remote.id),
            status,
            plan_tier: tier,
            trial_start: remote
                .trial_start
                .and_then(unix_to_rfc3339)
                .or_else(|| existing.as_ref().and_then(|s| s.trial_start.clone())),
            trial_end: trial_end_at
                .map(format_utc_rfc3339)
                .or_else(|| existing.as_ref().and_then(|s| s.trial_end.clone())),
            current_period_start: period_start,
            current_period_end: period_end.clone(),
            updated_at: format_utc_rfc3339(now),
        };
        self.store.upsert_subscription(&row).await?;

        tracing::info!(
            user_id,
            status = ?status,
            tier = ?tier,
            "Subscription reconciled with Stripe"
        );

        Ok(SubscriptionCheck {
            subscribed: status.is_subscribed(),
            trial_active: status == SubscriptionStatus::Trial,
            trial_days_left: days_left,
            subscription_tier: tier,
            subscription_end: period_end,
        })
    }

    /// Tier from the first item's price, fetching the price if the embedded
    /// copy has no amount.
    async fn plan_tier(
        &self,
        stripe: &StripeClient,
        subscription: &StripeSubscription,
    ) -> Result<Option<PlanTier>, AppError> {
        let Some(item) = subscription.items.data.first() else {
            return Ok(None);
        };

        let amount = match item.price.unit_amount {
            Some(amount) => Some(amount),
            None => stripe.get_price(&item.price.id).await?.unit_amount,
        };

        Ok(amount.map(PlanTier::from_unit_amount))
    }
}

/// Response for a user who is on the local trial.
fn trial_check(trial: &Subscription, now: DateTime<Utc>) -> SubscriptionCheck {
    let trial_end = trial.trial_end.as_deref().and_then(parse_utc_rfc3339);

    SubscriptionCheck {
        subscribed: false,
        trial_active: trial_end.is_some_and(|end| end > now),
        trial_days_left: trial_end.map(|end| trial_days_left(end, now)).unwrap_or(0),
        subscription_tier: None,
        subscription_end: trial.trial_end.clone(),
    }
}
