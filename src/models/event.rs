// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Synced external calendar events.

use crate::models::{CalendarIntegration, CalendarProvider};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Confirmed,
    Cancelled,
}

/// Provider-neutral event produced at the fetch boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_all_day: bool,
    pub status: EventStatus,
}

/// Event stored locally, unique per (external_event_id, source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub external_event_id: String,
    pub source: CalendarProvider,
    /// Owning integration
    pub integration_id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    /// YYYY-MM-DD
    pub event_date: String,
    /// HH:MM:SS, absent for all-day events
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_all_day: bool,
    pub status: EventStatus,
    pub last_synced_at: String,
}

impl ExternalEvent {
    /// Build the stored record for an event fetched through `integration`.
    pub fn from_normalized(
        integration: &CalendarIntegration,
        event: NormalizedEvent,
        synced_at: &str,
    ) -> Self {
        Self {
            external_event_id: event.external_id,
            source: integration.provider,
            integration_id: integration.id.clone(),
            user_id: integration.user_id.clone(),
            title: event.title,
            description: event.description,
            location: event.location,
            event_date: event.date.format("%Y-%m-%d").to_string(),
            start_time: event.start_time.map(|t| t.format("%H:%M:%S").to_string()),
            end_time: event.end_time.map(|t| t.format("%H:%M:%S").to_string()),
            is_all_day: event.is_all_day,
            status: event.status,
            last_synced_at: synced_at.to_string(),
        }
    }

    /// Document ID derived from the uniqueness key.
    pub fn doc_id(&self) -> String {
        Self::make_id(self.source, &self.external_event_id)
    }

    /// Key is (source, external event id) only. Two users invited to the same
    /// provider event share one row, and the later sync overwrites its
    /// `user_id` and `integration_id`.
    pub fn make_id(source: CalendarProvider, external_event_id: &str) -> String {
        format!("{}_{}", source, urlencoding::encode(external_event_id))
    }
}
