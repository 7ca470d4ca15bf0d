// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google Calendar wire types and event listing.

use crate::error::AppError;
use crate::models::{EventStatus, NormalizedEvent};
use crate::services::upstream::{check_json, request_failed};
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

const SERVICE: &str = "Google Calendar";

pub const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const API_BASE: &str = "https://www.googleapis.com";
pub const SCOPES: &str = "openid email https://www.googleapis.com/auth/calendar.readonly";

#[derive(Debug, Deserialize)]
struct GoogleEventsResponse {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// Event as returned by `calendars/primary/events`.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleEvent {
    id: String,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    status: Option<String>,
    start: Option<GoogleEventTime>,
    end: Option<GoogleEventTime>,
}

/// Either `dateTime` (timed) or `date` (all-day) is set.
#[derive(Debug, Clone, Deserialize)]
struct GoogleEventTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: String,
}

/// List primary-calendar events in `[time_min, time_max]`, one page only.
pub(crate) async fn list_events(
    http: &reqwest::Client,
    api_base: &str,
    access_token: &str,
    time_min: DateTime<Utc>,
    time_max: DateTime<Utc>,
) -> Result<Vec<GoogleEvent>, AppError> {
    let url = format!("{}/calendar/v3/calendars/primary/events", api_base);

    let response = http
        .get(&url)
        .bearer_auth(access_token)
        .query(&[
            ("timeMin", format_utc_rfc3339(time_min)),
            ("timeMax", format_utc_rfc3339(time_max)),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ])
        .send()
        .await
        .map_err(|e| request_failed(SERVICE, e))?;

    let page: GoogleEventsResponse = check_json(SERVICE, response).await?;

    if page.next_page_token.is_some() {
        tracing::warn!(
            fetched = page.items.len(),
            "Google returned more pages; only the first page is synced"
        );
    }

    Ok(page.items)
}

/// Email of the account that granted access.
pub(crate) async fn account_email(
    http: &reqwest::Client,
    api_base: &str,
    access_token: &str,
) -> Result<String, AppError> {
    let response = http
        .get(format!("{}/oauth2/v3/userinfo", api_base))
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| request_failed(SERVICE, e))?;

    let info: GoogleUserInfo = check_json(SERVICE, response).await?;
    Ok(info.email)
}

impl GoogleEvent {
    /// Convert to the canonical shape. Returns `None` when the event has no
    /// usable start.
    pub fn normalize(self) -> Option<NormalizedEvent> {
        let start = self.start?;
        let end = self.end;

        let (date, start_time, end_time, is_all_day) = match (start.date_time, start.date) {
            (Some(start_dt), _) => {
                let start_dt = DateTime::parse_from_rfc3339(&start_dt).ok()?;
                let end_time = end
                    .and_then(|e| e.date_time)
                    .and_then(|e| DateTime::parse_from_rfc3339(&e).ok())
                    .map(|e| e.time());
                (start_dt.date_naive(), Some(start_dt.time()), end_time, false)
            }
            (None, Some(day)) => {
                let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d").ok()?;
                (date, None, None, true)
            }
            (None, None) => return None,
        };

        let status = match self.status.as_deref() {
            Some("cancelled") => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        };

        Some(NormalizedEvent {
            external_id: self.id,
            title: non_empty(self.summary).unwrap_or_else(|| "Untitled Event".to_string()),
            description: non_empty(self.description),
            location: non_empty(self.location),
            date,
            start_time,
            end_time,
            is_all_day,
            status,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn parse(json: serde_json::Value) -> GoogleEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_timed_event_keeps_local_wall_clock() {
        let event = parse(serde_json::json!({
            "id": "evt1",
            "summary": "Walk",
            "location": "Park",
            "status": "confirmed",
            "start": { "dateTime": "2026-04-02T09:30:00-07:00" },
            "end": { "dateTime": "2026-04-02T10:15:00-07:00" }
        }))
        .normalize()
        .unwrap();

        assert!(!event.is_all_day);
        assert_eq!(event.date, NaiveDate::from_ymd_opt(2026, 4, 2).unwrap());
        assert_eq!(event.start_time, NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(event.end_time, NaiveTime::from_hms_opt(10, 15, 0));
        assert_eq!(event.location.as_deref(), Some("Park"));
    }

    #[test]
    fn test_date_only_event_is_all_day() {
        let event = parse(serde_json::json!({
            "id": "evt2",
            "summary": "  ",
            "status": "cancelled",
            "start": { "date": "2026-04-03" },
            "end": { "date": "2026-04-04" }
        }))
        .normalize()
        .unwrap();

        assert!(event.is_all_day);
        assert_eq!(event.start_time, None);
        assert_eq!(event.title, "Untitled Event");
        assert_eq!(event.status, EventStatus::Cancelled);
    }

    #[test]
    fn test_event_without_start_is_skipped() {
        let event = parse(serde_json::json!({ "id": "evt3", "status": "cancelled" }));
        assert!(event.normalize().is_none());
    }
}
