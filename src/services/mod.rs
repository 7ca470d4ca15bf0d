// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod calendar;
pub mod email;
pub mod google;
pub mod kms;
pub mod mfa;
pub mod outlook;
pub mod stripe;
mod upstream;

pub use calendar::{CalendarClient, CalendarService, ProviderEndpoints, SyncReport};
pub use email::EmailService;
pub use kms::KmsService;
pub use mfa::{MfaService, OtpVerifier, TotpVerifier};
pub use stripe::{StripeClient, SubscriptionCheck, SubscriptionService};
