use crate::domain::model::{Outcome, SubmitVerdict};
use crate::domain::ports::{ConfigProvider, RetryPolicy};
use crate::utils::error::{ProbeError, Result};
use chrono::NaiveDateTime;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use url::Url;

const BODY_PREVIEW: usize = 200;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest<'a> {
    pub login_id: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitFlagRequest<'a> {
    pub submit_flag: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub email: String,
    pub login_id: String,
    pub password: String,
    pub univ: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Body of `POST /api/admin/create/challenge-no-file`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDraft {
    pub title: String,
    pub description: String,
    pub flag: String,
    pub points: u32,
    pub min_points: u32,
    pub initial_points: u32,
    pub start_time: String,
    pub end_time: String,
    pub category: String,
    pub mileage: u32,
}

impl ChallengeDraft {
    pub const TIME_FORMAT: &'static str = "%Y-%m-%d %H:%M:%S";

    /// A MISC challenge open for seven days from `start`.
    pub fn open_for_a_week(title: &str, flag: &str, points: u32, start: NaiveDateTime) -> Self {
        let end = start + chrono::Duration::days(7);
        Self {
            title: title.to_string(),
            description: "Test challenge for concurrency testing".to_string(),
            flag: flag.to_string(),
            points,
            min_points: 100,
            initial_points: points,
            start_time: start.format(Self::TIME_FORMAT).to_string(),
            end_time: end.format(Self::TIME_FORMAT).to_string(),
            category: "MISC".to_string(),
            mileage: 100,
        }
    }
}

/// Row of `GET /api/admin/member`; only the fields cleanup needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
}

/// Status, body and wall time of the last attempt of one call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    pub latency_ms: f64,
}

impl ApiResponse {
    pub fn preview(&self) -> &str {
        let end = self
            .body
            .char_indices()
            .nth(BODY_PREVIEW)
            .map(|(i, _)| i)
            .unwrap_or(self.body.len());
        &self.body[..end]
    }

    /// The `data` string of a submission response, if the body carries one.
    pub fn verdict(&self) -> Option<SubmitVerdict> {
        let json: serde_json::Value = serde_json::from_str(&self.body).ok()?;
        json.get("data")
            .and_then(|d| d.as_str())
            .map(SubmitVerdict::parse)
    }
}

/// How the bearer token is attached to authenticated calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStyle {
    pub header: String,
    pub scheme: String,
    pub cookie_name: Option<String>,
}

impl Default for AuthStyle {
    fn default() -> Self {
        Self {
            header: "Authorization".to_string(),
            scheme: "Bearer".to_string(),
            cookie_name: None,
        }
    }
}

impl AuthStyle {
    pub fn header_value(&self, token: &str) -> String {
        if self.scheme.is_empty() {
            token.to_string()
        } else {
            format!("{} {}", self.scheme, token)
        }
    }
}

/// Pulls the access token out of a sign-in body: `data` when it is an object, else the top level.
pub fn extract_token(payload: &serde_json::Value) -> Option<String> {
    let scope = match payload.get("data") {
        Some(data) if data.is_object() => data,
        _ => payload,
    };
    ["accessToken", "token", "jwt"]
        .iter()
        .filter_map(|key| scope.get(*key).and_then(|v| v.as_str()))
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// 200/201 created, 409 already there.
pub fn classify_create(status: u16) -> Outcome {
    match status {
        200 | 201 => Outcome::Success,
        409 => Outcome::AlreadyDone,
        _ => Outcome::Rejected,
    }
}

/// 200/204 deleted, 404 already gone.
pub fn classify_delete(status: u16) -> Outcome {
    match status {
        200 | 204 => Outcome::Success,
        404 => Outcome::AlreadyDone,
        _ => Outcome::Rejected,
    }
}

#[derive(Debug, Clone)]
pub struct CtfClient {
    client: Client,
    base: Url,
    auth_path: String,
    retry: RetryPolicy,
    auth: AuthStyle,
    token: Option<String>,
}

impl CtfClient {
    pub fn new(config: &impl ConfigProvider) -> Result<Self> {
        let base = Url::parse(config.base_url()).map_err(|e| ProbeError::InvalidConfigValueError {
            field: "base_url".to_string(),
            value: config.base_url().to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ProbeError::InvalidConfigValueError {
                field: "base_url".to_string(),
                value: config.base_url().to_string(),
                reason: "URL cannot carry a path".to_string(),
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(xff) = config.forwarded_for() {
            let value = HeaderValue::from_str(xff).map_err(|e| ProbeError::InvalidConfigValueError {
                field: "forwarded_for".to_string(),
                value: xff.to_string(),
                reason: e.to_string(),
            })?;
            headers.insert("X-Forwarded-For", value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base,
            auth_path: config.auth_path().to_string(),
            retry: config.retry_policy(),
            auth: AuthStyle::default(),
            token: None,
        })
    }

    pub fn with_auth_style(mut self, auth: AuthStyle) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// A copy of this client that sends `token` on every call.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        let mut authed = self.clone();
        authed.token = Some(token.into());
        authed
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn auth_path(&self) -> &str {
        &self.auth_path
    }

    /// Absolute URL for `path` under the base URL's own path (leading `/`, may carry a query string).
    pub fn url(&self, path: &str) -> Result<Url> {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut url = self.url_from_segments(&segments)?;
        url.set_query(query);
        Ok(url)
    }

    /// Absolute URL made of `segments`, each percent-encoded as a single path segment.
    pub fn url_from_segments(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ProbeError::DataError {
                message: format!("Base URL {} cannot carry a path", self.base),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let Some(token) = &self.token else {
            return builder;
        };
        let mut builder = builder.header(self.auth.header.as_str(), self.auth.header_value(token));
        if let Some(cookie) = &self.auth.cookie_name {
            builder = builder.header(reqwest::header::COOKIE, format!("{}={}", cookie, token));
        }
        builder
    }

    /// Sends the request built by `build`, retrying connect/timeout errors and retryable statuses.
    pub async fn send<F>(&self, build: F) -> Result<ApiResponse>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            match self.authorize(build(&self.client)).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if RetryPolicy::is_retryable_status(status) && attempt < self.retry.max_retries {
                        attempt += 1;
                        let delay = self.retry.delay_for(attempt);
                        tracing::debug!("Retryable status {}, retry {} in {:?}", status, attempt, delay);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let body = response.text().await?;
                    return Ok(ApiResponse {
                        status,
                        body,
                        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                    });
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    tracing::debug!("Request failed ({}), retry {} in {:?}", e, attempt, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        let url = self.url(path)?;
        self.send(|c| c.get(url.clone())).await
    }

    pub async fn get_with_query(&self, path: &str, query: &[(&str, &str)]) -> Result<ApiResponse> {
        let url = self.url(path)?;
        self.send(|c| c.get(url.clone()).query(query)).await
    }

    pub async fn get_url(&self, url: Url) -> Result<ApiResponse> {
        self.send(|c| c.get(url.clone())).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        let url = self.url(path)?;
        self.send(|c| c.post(url.clone()).json(body)).await
    }

    /// Signs in and returns the access token.
    pub async fn sign_in(&self, login_id: &str, password: &str) -> Result<String> {
        let request = SignInRequest { login_id, password };
        let url = self.url(&self.auth_path)?;
        let response = self.send(|c| c.post(url.clone()).json(&request)).await?;

        if response.status != 200 {
            return Err(ProbeError::AuthFailed {
                login_id: login_id.to_string(),
                status: response.status,
                body: response.preview().to_string(),
            });
        }

        let payload: serde_json::Value =
            serde_json::from_str(&response.body).map_err(|_| ProbeError::TokenMissing {
                login_id: login_id.to_string(),
            })?;
        let token = extract_token(&payload).ok_or_else(|| ProbeError::TokenMissing {
            login_id: login_id.to_string(),
        })?;
        tracing::debug!("Signed in as {} ({}ms)", login_id, response.latency_ms as u64);
        Ok(token)
    }

    pub async fn submit_flag(&self, challenge_id: u64, flag: &str) -> Result<ApiResponse> {
        let url = self.url(&format!("/api/challenges/{}/submit", challenge_id))?;
        let body = SubmitFlagRequest { submit_flag: flag };
        self.send(|c| c.post(url.clone()).json(&body)).await
    }

    pub async fn get_challenge(&self, challenge_id: u64) -> Result<ApiResponse> {
        self.get(&format!("/api/challenges/{}", challenge_id)).await
    }

    pub async fn get_ranking(&self) -> Result<ApiResponse> {
        self.get("/api/teams/ranking").await
    }

    pub async fn add_member(&self, member: &AddMemberRequest) -> Result<ApiResponse> {
        self.post_json("/api/admin/add/member", member).await
    }

    pub async fn create_team(&self, team_name: &str) -> Result<ApiResponse> {
        let url = self.url("/api/admin/team/create")?;
        self.send(|c| c.post(url.clone()).query(&[("teamName", team_name)]))
            .await
    }

    pub async fn add_team_member(&self, team_name: &str, email: &str) -> Result<ApiResponse> {
        let url = self.url_from_segments(&["api", "admin", "team", "member", team_name])?;
        self.send(|c| c.post(url.clone()).query(&[("email", email)]))
            .await
    }

    pub async fn delete_team(&self, team_name: &str) -> Result<ApiResponse> {
        let url = self.url_from_segments(&["api", "admin", "team", "delete", team_name])?;
        self.send(|c| c.delete(url.clone())).await
    }

    pub async fn delete_member(&self, user_id: &str) -> Result<ApiResponse> {
        let url = self.url_from_segments(&["api", "admin", "delete", "member", user_id])?;
        self.send(|c| c.delete(url.clone())).await
    }

    /// Member list from the admin API; the array may sit at the top level or under `data`.
    pub async fn list_members(&self) -> Result<Vec<MemberRecord>> {
        let response = self.get("/api/admin/member").await?;
        if response.status != 200 {
            return Err(ProbeError::UnexpectedStatus {
                endpoint: "/api/admin/member".to_string(),
                status: response.status,
                body: response.preview().to_string(),
            });
        }

        let payload: serde_json::Value = serde_json::from_str(&response.body)?;
        let records = match payload {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(mut obj) => match obj.remove("data") {
                Some(serde_json::Value::Array(items)) => items,
                _ => {
                    return Err(ProbeError::DataError {
                        message: "Unexpected member list payload".to_string(),
                    })
                }
            },
            _ => {
                return Err(ProbeError::DataError {
                    message: "Unexpected member list payload".to_string(),
                })
            }
        };

        Ok(records
            .into_iter()
            .filter_map(|r| serde_json::from_value(r).ok())
            .collect())
    }

    pub async fn create_challenge(&self, draft: &ChallengeDraft) -> Result<ApiResponse> {
        self.post_json("/api/admin/create/challenge-no-file", draft)
            .await
    }
}
