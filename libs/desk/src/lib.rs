//! Reqwest implementation of the engagement-platform case API.
//!
//! Authentication uses a static `x-api-key` plus a short-lived bearer token
//! obtained from `/authenticate`; the token is cached here and dropped when a
//! call comes back 401. The reconciliation protocol never sees any of that.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use casebridge_core::{
    CaseApi, CaseApiError, CasePayload, CaseStatus, ContactRef, CreatedCase, OpenCaseConflict,
};
use metrics::{counter, histogram};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tokio::sync::Mutex;

/// Open-case lookups only consider cases created inside this window.
const OPEN_CASE_WINDOW_DAYS: i64 = 30;

const CONTACT_FIELDS: &str = "id,email,personal_id,phone,name";
const CASE_FIELDS: &str = "id,user_id,contact_id,status";

const DESK_DATETIME: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Bounded-timeout HTTP client suitable for the batch jobs. The protocol has
/// no retry budget beyond its single reconciliation retry, so every call must
/// return within seconds.
pub fn default_http_client() -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
}

pub struct DeskCaseApi {
    http: Client,
    base_url: Url,
    api_key: String,
    user: String,
    token: Mutex<Option<String>>,
}

impl DeskCaseApi {
    pub fn new(
        http: Client,
        base_url: &str,
        api_key: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<Self, CaseApiError> {
        // A trailing slash keeps the last path segment through joins.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let url = Url::parse(&normalized).map_err(|err| CaseApiError::Config(err.into()))?;
        Ok(Self {
            http,
            base_url: url,
            api_key: api_key.into(),
            user: user.into(),
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CaseApiError> {
        self.base_url
            .join(path)
            .map_err(|err| CaseApiError::Config(err.into()))
    }

    /// Fetches a fresh bearer token from `/authenticate`.
    pub async fn authenticate(&self) -> Result<String, CaseApiError> {
        let url = self.endpoint("authenticate")?;
        let started = Instant::now();
        let response = self
            .http
            .get(url)
            .query(&[("user", self.user.as_str())])
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|err| {
                counter!("desk_api_errors_total", "kind" => "transport", "endpoint" => "authenticate")
                    .increment(1);
                CaseApiError::Transport(err.into())
            })?;

        record_roundtrip("authenticate", response.status().as_u16(), started);
        let raw: RawTokenResponse = map_response("authenticate", response).await?;
        tracing::debug!("desk authentication succeeded");
        Ok(raw.token)
    }

    /// Returns the cached token, authenticating first if needed.
    async fn token(&self) -> Result<String, CaseApiError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.authenticate().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drops the cached token when the platform says it expired.
    async fn note_unauthorized(&self, err: &CaseApiError) {
        if let CaseApiError::Remote { status: 401, .. } = err {
            self.token.lock().await.take();
        }
    }
}

#[async_trait]
impl CaseApi for DeskCaseApi {
    async fn create_case(&self, payload: &CasePayload) -> Result<CreatedCase, CaseApiError> {
        let token = self.token().await?;
        let url = self.endpoint("cases")?;
        let started = Instant::now();
        let response = self
            .http
            .post(url)
            .header("x-api-key", &self.api_key)
            .bearer_auth(&token)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                counter!("desk_api_errors_total", "kind" => "transport", "endpoint" => "cases.create")
                    .increment(1);
                CaseApiError::Transport(err.into())
            })?;

        record_roundtrip("cases.create", response.status().as_u16(), started);
        let result = map_response::<RawCreateResponse>("cases.create", response).await;
        if let Err(err) = &result {
            self.note_unauthorized(err).await;
        }
        result.map(|raw| CreatedCase {
            case_id: raw.case_id.as_ref().and_then(id_string),
        })
    }

    async fn update_case_status(
        &self,
        case_id: &str,
        status: CaseStatus,
    ) -> Result<(), CaseApiError> {
        let token = self.token().await?;
        let url = self.endpoint(&format!("cases/{case_id}"))?;
        let started = Instant::now();
        let response = self
            .http
            .put(url)
            .header("x-api-key", &self.api_key)
            .bearer_auth(&token)
            .json(&json!({ "status": status.as_str() }))
            .send()
            .await
            .map_err(|err| {
                counter!("desk_api_errors_total", "kind" => "transport", "endpoint" => "cases.status")
                    .increment(1);
                CaseApiError::Transport(err.into())
            })?;

        record_roundtrip("cases.status", response.status().as_u16(), started);
        let result = ensure_success("cases.status", response).await;
        if let Err(err) = &result {
            self.note_unauthorized(err).await;
        }
        result
    }

    async fn find_contact_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<ContactRef>, CaseApiError> {
        self.find_contact(&contact_filter("contact.phone", phone))
            .await
    }

    async fn find_contact_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ContactRef>, CaseApiError> {
        self.find_contact(&contact_filter("contact.email", email))
            .await
    }

    async fn find_open_case_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Option<String>, CaseApiError> {
        let token = self.token().await?;
        let url = self.endpoint("cases")?;
        let filters = open_case_filter(contact_id, OffsetDateTime::now_utc());
        let started = Instant::now();
        let response = self
            .http
            .get(url)
            .header("x-api-key", &self.api_key)
            .bearer_auth(&token)
            .query(&[("filtering", filters.as_str()), ("fields", CASE_FIELDS)])
            .send()
            .await
            .map_err(|err| {
                counter!("desk_api_errors_total", "kind" => "transport", "endpoint" => "cases.find")
                    .increment(1);
                CaseApiError::Transport(err.into())
            })?;

        record_roundtrip("cases.find", response.status().as_u16(), started);
        let result = map_response::<RawListResponse<RawCase>>("cases.find", response).await;
        if let Err(err) = &result {
            self.note_unauthorized(err).await;
        }
        // The filter should already constrain this, but the platform has
        // returned loosely-filtered pages before; match defensively.
        Ok(result?.data.into_iter().find_map(|case| {
            let matches_contact = id_string(&case.contact_id).as_deref() == Some(contact_id);
            if matches_contact && case.status == "open" {
                id_string(&case.id)
            } else {
                None
            }
        }))
    }
}

impl DeskCaseApi {
    async fn find_contact(&self, filters: &str) -> Result<Option<ContactRef>, CaseApiError> {
        let token = self.token().await?;
        let url = self.endpoint("contacts")?;
        let started = Instant::now();
        let response = self
            .http
            .get(url)
            .header("x-api-key", &self.api_key)
            .bearer_auth(&token)
            .query(&[("filtering", filters), ("fields", CONTACT_FIELDS)])
            .send()
            .await
            .map_err(|err| {
                counter!("desk_api_errors_total", "kind" => "transport", "endpoint" => "contacts.find")
                    .increment(1);
                CaseApiError::Transport(err.into())
            })?;

        record_roundtrip("contacts.find", response.status().as_u16(), started);
        let result = map_response::<RawListResponse<RawContact>>("contacts.find", response).await;
        if let Err(err) = &result {
            self.note_unauthorized(err).await;
        }
        Ok(result?
            .data
            .into_iter()
            .next()
            .and_then(|contact| id_string(&contact.id))
            .map(|id| ContactRef { id }))
    }
}

async fn map_response<T>(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<T, CaseApiError>
where
    T: for<'de> Deserialize<'de>,
{
    if !response.status().is_success() {
        return Err(remote_error(endpoint, response).await);
    }

    response.json::<T>().await.map_err(|err| {
        counter!("desk_api_errors_total", "kind" => "decode", "endpoint" => endpoint).increment(1);
        CaseApiError::Decode(err.into())
    })
}

/// Like [`map_response`] for endpoints whose success body we never read.
async fn ensure_success(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<(), CaseApiError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(remote_error(endpoint, response).await)
    }
}

async fn remote_error(endpoint: &'static str, response: reqwest::Response) -> CaseApiError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable>".into());
    counter!(
        "desk_api_errors_total",
        "kind" => "remote",
        "endpoint" => endpoint,
        "status" => status.as_str().to_string()
    )
    .increment(1);
    let conflict = parse_conflict(&body);
    CaseApiError::Remote {
        status: status.as_u16(),
        message: truncate(body, 512),
        conflict,
    }
}

fn record_roundtrip(endpoint: &'static str, status: u16, started: Instant) {
    histogram!(
        "desk_api_roundtrip_seconds",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .record(started.elapsed().as_secs_f64());
}

fn truncate(body: String, max: usize) -> String {
    if body.len() > max {
        body.chars().take(max).collect()
    } else {
        body
    }
}

fn contact_filter(field: &str, value: &str) -> String {
    json!([{ "field": field, "operator": "EQUAL", "value": value }]).to_string()
}

fn open_case_filter(contact_id: &str, now: OffsetDateTime) -> String {
    let start = now - time::Duration::days(OPEN_CASE_WINDOW_DAYS);
    json!([
        { "field": "case.contact_id", "operator": "EQUAL", "value": contact_id },
        { "field": "case.status", "operator": "IN", "value": ["open"] },
        { "field": "case.created_at", "operator": "GREATER EQUAL", "value": fmt_datetime(start) },
        { "field": "case.created_at", "operator": "LOWER", "value": fmt_datetime(now) },
    ])
    .to_string()
}

fn fmt_datetime(ts: OffsetDateTime) -> String {
    ts.format(DESK_DATETIME).unwrap_or_default()
}

/// The platform is inconsistent about numeric vs string ids.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_conflict(body: &str) -> Option<OpenCaseConflict> {
    let raw: RawErrorBody = serde_json::from_str(body).ok()?;
    if raw.error.as_deref() != Some("OPEN_CASES_EXIST") {
        return None;
    }
    let opened_case_ids: Vec<String> = raw.opened_cases.iter().filter_map(id_string).collect();
    if opened_case_ids.is_empty() {
        None
    } else {
        Some(OpenCaseConflict { opened_case_ids })
    }
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct RawCreateResponse {
    #[serde(default)]
    case_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawListResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RawContact {
    id: Value,
}

#[derive(Debug, Deserialize)]
struct RawCase {
    id: Value,
    contact_id: Value,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct RawErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    opened_cases: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn api() -> DeskCaseApi {
        DeskCaseApi::new(
            Client::new(),
            "https://desk.example.invalid/core/v1",
            "key",
            "bot@example.invalid",
        )
        .unwrap()
    }

    #[test]
    fn endpoint_joins_relative_paths() {
        let api = api();
        assert_eq!(
            api.endpoint("cases").unwrap().as_str(),
            "https://desk.example.invalid/core/v1/cases"
        );
        assert_eq!(
            api.endpoint("cases/case-7").unwrap().as_str(),
            "https://desk.example.invalid/core/v1/cases/case-7"
        );
    }

    #[test]
    fn conflict_body_parses_string_and_numeric_ids() {
        let conflict =
            parse_conflict(r#"{"error":"OPEN_CASES_EXIST","opened_cases":["case-77",42]}"#)
                .unwrap();
        assert_eq!(conflict.opened_case_ids, vec!["case-77", "42"]);
    }

    #[test]
    fn unrelated_error_body_is_not_a_conflict() {
        assert!(parse_conflict(r#"{"error":"RATE_LIMITED"}"#).is_none());
        assert!(parse_conflict(r#"{"error":"OPEN_CASES_EXIST","opened_cases":[]}"#).is_none());
        assert!(parse_conflict("not json").is_none());
    }

    #[test]
    fn contact_filter_shape() {
        let filters = contact_filter("contact.phone", "573001234567");
        let parsed: Value = serde_json::from_str(&filters).unwrap();
        assert_eq!(parsed[0]["field"], "contact.phone");
        assert_eq!(parsed[0]["operator"], "EQUAL");
        assert_eq!(parsed[0]["value"], "573001234567");
    }

    #[test]
    fn open_case_filter_includes_window_and_status() {
        let now = datetime!(2026-08-29 12:00:00 UTC);
        let filters = open_case_filter("contact-9", now);
        let parsed: Value = serde_json::from_str(&filters).unwrap();
        assert_eq!(parsed[0]["value"], "contact-9");
        assert_eq!(parsed[1]["value"][0], "open");
        assert_eq!(parsed[2]["value"], "2026-07-30 12:00:00");
        assert_eq!(parsed[3]["value"], "2026-08-29 12:00:00");
    }

    #[test]
    fn id_string_handles_platform_shapes() {
        assert_eq!(id_string(&json!("case-1")), Some("case-1".into()));
        assert_eq!(id_string(&json!(99)), Some("99".into()));
        assert_eq!(id_string(&json!(null)), None);
        assert_eq!(id_string(&json!("")), None);
    }
}
