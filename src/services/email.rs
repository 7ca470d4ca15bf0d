// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Transactional email through Resend.

use crate::error::AppError;
use crate::services::upstream::{check_json, request_failed};
use serde::{Deserialize, Serialize};

const SERVICE: &str = "Resend";

pub const RESEND_API_BASE: &str = "https://api.resend.com";

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: String,
}

#[derive(Deserialize)]
struct SendEmailResponse {
    id: String,
}

#[derive(Clone)]
pub struct EmailService {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    from: String,
}

impl EmailService {
    pub fn new(api_key: Option<String>, from: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: RESEND_API_BASE.to_string(),
            api_key,
            from,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Send the address-verification email. Returns the provider message id.
    pub async fn send_verification(
        &self,
        to: &str,
        name: &str,
        token: &str,
        redirect_url: &str,
    ) -> Result<String, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(AppError::NotConfigured("Email sending is not configured"))?;

        let link = verification_link(redirect_url, token, to);
        let request = SendEmailRequest {
            from: &self.from,
            to: [to],
            subject: "Verify your MyRhythm email address",
            html: verification_html(name, &link),
        };

        let response = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;

        let sent: SendEmailResponse = check_json(SERVICE, response).await?;
        tracing::info!(message_id = %sent.id, "Verification email sent");
        Ok(sent.id)
    }
}

/// `redirect_url` with `token` and `email` appended to its query.
pub fn verification_link(redirect_url: &str, token: &str, email: &str) -> String {
    let separator = if redirect_url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}token={}&email={}",
        redirect_url,
        separator,
        urlencoding::encode(token),
        urlencoding::encode(email)
    )
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn verification_html(name: &str, link: &str) -> String {
    let name = escape_html(name);
    let link = escape_html(link);
    format!(
        r#"<!DOCTYPE html>
<html>
  <body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; color: #1f2937;">
    <div style="max-width: 560px; margin: 0 auto; padding: 32px 24px;">
      <h1 style="font-size: 22px;">Welcome to MyRhythm, {name}!</h1>
      <p>Please confirm your email address to finish setting up your account.</p>
      <p style="margin: 32px 0;">
        <a href="{link}" style="background: #6366f1; color: #ffffff; padding: 12px 24px; border-radius: 6px; text-decoration: none;">Verify email</a>
      </p>
      <p style="font-size: 13px; color: #6b7280;">If the button does not work, open this link:<br>{link}</p>
      <p style="font-size: 13px; color: #6b7280;">If you did not create an account, you can ignore this email.</p>
    </div>
  </body>
</html>"#
    )
}
