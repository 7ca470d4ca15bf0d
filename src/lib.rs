// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! MyRhythm Sync: server-side integrations for the MyRhythm app
//!
//! This crate provides the backend API for syncing Google and Outlook
//! calendars, reconciling subscriptions with Stripe, verifying MFA codes
//! and sending verification email.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::Store;
use services::{CalendarService, EmailService, MfaService, SubscriptionService};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub calendar: CalendarService,
    pub subscriptions: SubscriptionService,
    pub mfa: MfaService,
    pub email: EmailService,
}
