// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outlook (Microsoft Graph) wire types and calendar view listing.

use crate::error::AppError;
use crate::models::{EventStatus, NormalizedEvent};
use crate::services::upstream::{check_json, request_failed};
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

const SERVICE: &str = "Microsoft Graph";

pub const AUTHORIZE_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
pub const TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
pub const API_BASE: &str = "https://graph.microsoft.com";
pub const SCOPES: &str = "openid profile email Calendars.Read Calendars.ReadWrite offline_access";

/// Page size for the calendar view. Nothing past the first page is fetched.
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct CalendarViewResponse {
    #[serde(default)]
    value: Vec<OutlookEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Event as returned by `me/calendarview`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlookEvent {
    id: String,
    subject: Option<String>,
    body_preview: Option<String>,
    location: Option<OutlookLocation>,
    start: OutlookDateTime,
    end: Option<OutlookDateTime>,
    #[serde(default)]
    is_all_day: bool,
    #[serde(default)]
    is_cancelled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutlookLocation {
    display_name: Option<String>,
}

/// Graph date-time: naive wall clock plus a time zone name.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutlookDateTime {
    date_time: String,
}

impl OutlookDateTime {
    fn parse(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.date_time, "%Y-%m-%dT%H:%M:%S%.f").ok()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    mail: Option<String>,
    user_principal_name: Option<String>,
}

/// List calendar view events in `[start, end]` with times in UTC.
pub(crate) async fn list_events(
    http: &reqwest::Client,
    api_base: &str,
    access_token: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<OutlookEvent>, AppError> {
    let url = format!("{}/v1.0/me/calendarview", api_base);

    let response = http
        .get(&url)
        .bearer_auth(access_token)
        .header("Prefer", r#"outlook.timezone="UTC""#)
        .query(&[
            ("startdatetime", format_utc_rfc3339(start)),
            ("enddatetime", format_utc_rfc3339(end)),
            ("$top", PAGE_SIZE.to_string()),
            ("$orderby", "start/dateTime".to_string()),
        ])
        .send()
        .await
        .map_err(|e| request_failed(SERVICE, e))?;

    let page: CalendarViewResponse = check_json(SERVICE, response).await?;

    if page.next_link.is_some() {
        tracing::warn!(
            fetched = page.value.len(),
            "Outlook returned more pages; only the first page is synced"
        );
    }

    Ok(page.value)
}

/// Email of the account that granted access.
pub(crate) async fn account_email(
    http: &reqwest::Client,
    api_base: &str,
    access_token: &str,
) -> Result<String, AppError> {
    let response = http
        .get(format!("{}/v1.0/me", api_base))
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| request_failed(SERVICE, e))?;

    let user: GraphUser = check_json(SERVICE, response).await?;
    user.mail
        .or(user.user_principal_name)
        .ok_or_else(|| AppError::Upstream("Microsoft account has no email address".to_string()))
}

impl OutlookEvent {
    /// Convert to the canonical shape. Returns `None` when the start time
    /// cannot be parsed.
    pub fn normalize(self) -> Option<NormalizedEvent> {
        let start = self.start.parse()?;

        let (start_time, end_time) = if self.is_all_day {
            (None, None)
        } else {
            let end_time = self.end.and_then(|e| e.parse()).map(|e| e.time());
            (Some(start.time()), end_time)
        };

        let status = if self.is_cancelled {
            EventStatus::Cancelled
        } else {
            EventStatus::Confirmed
        };

        Some(NormalizedEvent {
            external_id: self.id,
            title: self
                .subject
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "Untitled Event".to_string()),
            description: self.body_preview.filter(|s| !s.trim().is_empty()),
            location: self
                .location
                .and_then(|l| l.display_name)
                .filter(|s| !s.trim().is_empty()),
            date: start.date(),
            start_time,
            end_time,
            is_all_day: self.is_all_day,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    #[test]
    fn test_timed_event() {
        let event: OutlookEvent = serde_json::from_value(serde_json::json!({
            "id": "AAMkAD1",
            "subject": "Therapy",
            "bodyPreview": "",
            "location": { "displayName": "Room 4" },
            "start": { "dateTime": "2026-06-01T15:00:00.0000000", "timeZone": "UTC" },
            "end": { "dateTime": "2026-06-01T16:00:00.0000000", "timeZone": "UTC" },
            "isAllDay": false,
            "isCancelled": false
        }))
        .unwrap();

        let event = event.normalize().unwrap();
        assert_eq!(event.date, NaiveDate::from_ymd_opt(2026, 6, 1).unwrap());
        assert_eq!(event.start_time, NaiveTime::from_hms_opt(15, 0, 0));
        assert_eq!(event.end_time, NaiveTime::from_hms_opt(16, 0, 0));
        assert_eq!(event.description, None);
        assert_eq!(event.location.as_deref(), Some("Room 4"));
    }

    #[test]
    fn test_all_day_cancelled_event() {
        let event: OutlookEvent = serde_json::from_value(serde_json::json!({
            "id": "AAMkAD2",
            "subject": "Holiday",
            "start": { "dateTime": "2026-06-02T00:00:00.0000000", "timeZone": "UTC" },
            "end": { "dateTime": "2026-06-03T00:00:00.0000000", "timeZone": "UTC" },
            "isAllDay": true,
            "isCancelled": true
        }))
        .unwrap();

        let event = event.normalize().unwrap();
        assert!(event.is_all_day);
        assert_eq!(event.start_time, None);
        assert_eq!(event.end_time, None);
        assert_eq!(event.status, EventStatus::Cancelled);
    }
}
