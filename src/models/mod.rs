// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod event;
pub mod integration;
pub mod mfa;
pub mod subscription;

pub use event::{EventStatus, ExternalEvent, NormalizedEvent};
pub use integration::{CalendarIntegration, CalendarProvider, IntegrationTokens};
pub use mfa::{BackupCode, FactorType, MfaAttempt, MfaFactor};
pub use subscription::{PlanTier, Subscription, SubscriptionStatus};
