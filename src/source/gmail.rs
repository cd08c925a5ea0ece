//! Gmail REST API mailbox.
//!
//! Talks to `gmail.googleapis.com` with a bearer token obtained elsewhere
//! (OAuth consent and refresh are not handled here). Status codes are mapped
//! onto the [`MailSource`] error contract:
//!
//! | HTTP                        | Error                                  |
//! |-----------------------------|----------------------------------------|
//! | 404                         | `MessageNotFound`                      |
//! | 429, 5xx, 403 rate-limit    | `SourceUnavailable { retryable: true }`|
//! | 401, other 403, other 4xx   | `SourceUnavailable { retryable: false }`|
//! | connect / timeout           | `SourceUnavailable { retryable: true }`|

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, SweepError};
use crate::model::{AttachmentMeta, EmailAddress, Header, Message, MessageBody};

use super::MailSource;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Largest page the list endpoint accepts.
const MAX_PAGE: usize = 500;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Gmail mailbox accessed over HTTPS.
pub struct GmailSource {
    client: Client,
    base_url: String,
    user: String,
    label: String,
    token: String,
}

impl std::fmt::Debug for GmailSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailSource")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl GmailSource {
    /// Create a source for `user` (usually `"me"`) scoped to `label`.
    pub fn new(token: impl Into<String>, user: impl Into<String>, label: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SweepError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            user: user.into(),
            label: label.into(),
            token: token.into(),
        })
    }

    /// Read the access token from the environment variable `var`.
    pub fn from_env(var: &str, user: &str, label: &str) -> Result<Self> {
        let token = std::env::var(var)
            .map_err(|_| SweepError::Config(format!("access token variable {var} is not set")))?;
        if token.trim().is_empty() {
            return Err(SweepError::Config(format!("access token variable {var} is empty")));
        }
        Self::new(token.trim(), user, label)
    }

    /// Point at a different endpoint (e.g. a local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/users/{}/messages", self.base_url, self.user)
    }

    fn send(&self, request: RequestBuilder, id: Option<&str>) -> Result<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| SweepError::transient(format!("request failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(classify(status.as_u16(), &body, id))
    }
}

impl MailSource for GmailSource {
    fn name(&self) -> &str {
        "gmail"
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(limit);
        let mut page_token: Option<String> = None;

        while ids.len() < limit {
            let page = (limit - ids.len()).min(MAX_PAGE);
            let mut query = vec![
                ("labelIds", self.label.clone()),
                ("maxResults", page.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let request = self.client.get(self.messages_url()).query(&query);
            let body = self
                .send(request, None)?
                .text()
                .map_err(|e| SweepError::transient(format!("list response interrupted: {e}")))?;
            let list = parse_list(&body)?;

            ids.extend(list.messages.into_iter().map(|m| m.id));
            debug!(count = ids.len(), "Listed message ids");
            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        ids.truncate(limit);
        Ok(ids)
    }

    fn fetch_full(&self, id: &str) -> Result<Message> {
        let url = format!("{}/{id}", self.messages_url());
        let request = self.client.get(url).query(&[("format", "full")]);
        let body = self
            .send(request, Some(id))?
            .text()
            .map_err(|e| SweepError::transient(format!("message response for {id} interrupted: {e}")))?;
        message_from_api(parse_message(id, &body)?)
    }

    fn move_to_trash(&self, id: &str) -> Result<()> {
        let url = format!("{}/{id}/trash", self.messages_url());
        self.send(self.client.post(url), Some(id))?;
        Ok(())
    }
}

/// Map a non-success status to the adapter error contract.
fn classify(status: u16, body: &str, id: Option<&str>) -> SweepError {
    match status {
        404 => SweepError::MessageNotFound(id.unwrap_or("mailbox").to_string()),
        429 | 500..=599 => SweepError::transient(format!("HTTP {status}")),
        403 if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") => {
            SweepError::transient(format!("HTTP {status} rate limit"))
        }
        _ => SweepError::permanent(format!("HTTP {status}: {}", first_line(body))),
    }
}

fn first_line(body: &str) -> &str {
    body.lines().next().unwrap_or_default().trim()
}

// ── API payloads ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    /// Milliseconds since the epoch, as a decimal string.
    internal_date: Option<String>,
    payload: Part,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Part {
    mime_type: String,
    filename: String,
    headers: Vec<PartHeader>,
    body: PartBody,
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct PartHeader {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartBody {
    size: u64,
    data: Option<String>,
}

/// Undecodable list bodies are permanent failures.
fn parse_list(body: &str) -> Result<ListResponse> {
    serde_json::from_str(body)
        .map_err(|e| SweepError::permanent(format!("invalid list response: {e}")))
}

fn parse_message(id: &str, body: &str) -> Result<GmailMessage> {
    serde_json::from_str(body)
        .map_err(|e| SweepError::InvalidMessage(format!("invalid message response for {id}: {e}")))
}

/// Convert an API message into the crate model.
fn message_from_api(raw: GmailMessage) -> Result<Message> {
    let headers: Vec<Header> = raw
        .payload
        .headers
        .iter()
        .map(|h| Header::new(&h.name, &h.value))
        .collect();

    let sender = headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("from"))
        .map(|h| EmailAddress::parse(&h.value))
        .unwrap_or_else(|| EmailAddress::new("", ""));

    let received_at = raw
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let mut body = MessageBody::default();
    let mut attachments = Vec::new();
    walk_parts(&raw.payload, &mut body, &mut attachments)?;

    Ok(Message {
        id: raw.id,
        sender,
        headers,
        body,
        attachments,
        received_at,
    })
}

/// Depth-first walk: first `text/plain` and `text/html` bodies win,
/// every named part is an attachment.
fn walk_parts(part: &Part, body: &mut MessageBody, attachments: &mut Vec<AttachmentMeta>) -> Result<()> {
    if !part.filename.is_empty() {
        attachments.push(AttachmentMeta {
            filename: part.filename.clone(),
            mime_type: part.mime_type.clone(),
            size: part.body.size,
        });
    } else if let Some(data) = &part.body.data {
        let slot = match part.mime_type.as_str() {
            "text/plain" => &mut body.text,
            "text/html" => &mut body.html,
            _ => return Ok(()),
        };
        if slot.is_none() {
            *slot = Some(decode_body(data)?);
        }
    }
    for child in &part.parts {
        walk_parts(child, body, attachments)?;
    }
    Ok(())
}

/// Decode a base64url body, with or without padding.
fn decode_body(data: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| SweepError::InvalidMessage(format!("body is not base64url: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
