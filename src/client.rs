//! Blocking FieldClimate API client.
//!
//! A call goes through two retry layers. The outer one re-runs the whole call
//! (rate-limit wait included) with exponential backoff on malformed responses
//! and timeouts. The inner one re-sends GET/POST on 429/5xx before the response
//! is classified. Every send is signed afresh.

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use reqwest::blocking::{Client, Request, Response};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::auth::Signer;
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::retry::{
    duration_from_secs, retry_with_backoff, scale_duration, BackoffPolicy, Clock, RateLimiter,
    SystemClock, MAX_BACKOFF,
};

/// Status codes re-sent by the transport layer
const TRANSPORT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Characters of response body included in debug logs
const LOG_BODY_LIMIT: usize = 200;

/// Remote operations the registry needs from the provider.
pub trait StationApi {
    /// Stations visible to the account (`user/stations`)
    fn get_stations(&self) -> Result<Vec<Value>, ApiError>;

    fn get_station(&self, station_id: &str) -> Result<Value, ApiError>;

    fn get_station_sensors(&self, station_id: &str) -> Result<Vec<Value>, ApiError>;

    /// Raw data points of one sensor in `[start, end]`
    fn get_sensor_data(
        &self,
        station_id: &str,
        sensor_id: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Value, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub requests_per_hour: u32,
    pub backoff: BackoffPolicy,
    pub transport_retries: u32,
    pub transport_backoff: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.fieldclimate.com/v2".to_string(),
            timeout: Duration::from_secs(30),
            requests_per_hour: 7200,
            backoff: BackoffPolicy::default(),
            transport_retries: 3,
            transport_backoff: Duration::from_millis(500),
        }
    }
}

impl ClientSettings {
    pub fn from_config(api: &ApiConfig) -> Self {
        Self {
            base_url: api.base_url.clone(),
            timeout: Duration::from_secs(api.request_timeout_secs),
            requests_per_hour: api.requests_per_hour,
            backoff: BackoffPolicy {
                max_retries: api.max_retries,
                initial_backoff: duration_from_secs(api.initial_backoff_secs),
                backoff_factor: api.backoff_factor,
                ..BackoffPolicy::default()
            },
            transport_retries: api.transport_retries,
            transport_backoff: duration_from_secs(api.transport_backoff_secs),
        }
    }
}

pub struct FieldClimateClient {
    http: Client,
    base_url: String,
    timeout: Duration,
    signer: Box<dyn Signer>,
    rate_limiter: RateLimiter,
    backoff: BackoffPolicy,
    transport_retries: u32,
    transport_backoff: Duration,
    clock: Arc<dyn Clock>,
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn masked_headers(headers: &HeaderMap) -> Vec<String> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if *name == AUTHORIZATION || name.as_str() == "x-signature" {
                "***"
            } else {
                value.to_str().unwrap_or("<binary>")
            };
            format!("{}: {}", name, shown)
        })
        .collect()
}

fn log_request(request: &Request, body: Option<&str>) {
    debug!(
        "{} {} headers=[{}] body={}",
        request.method(),
        request.url(),
        masked_headers(request.headers()).join(", "),
        body.map(|b| truncate(b, LOG_BODY_LIMIT)).unwrap_or("-")
    );
}

/// `error` fields that are null, false, 0 or empty do not count as errors
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Map a response to a JSON value or one of the API error kinds.
pub fn classify_response(status: u16, body: &str) -> Result<Value, ApiError> {
    let snippet = truncate(body, LOG_BODY_LIMIT);
    match status {
        429 => return Err(ApiError::RateLimit(format!("HTTP 429: {}", snippet))),
        401 | 403 => return Err(ApiError::Auth(format!("HTTP {}: {}", status, snippet))),
        200..=299 => {}
        _ => return Err(ApiError::Generic(format!("HTTP {}: {}", status, snippet))),
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ApiError::Response(format!("invalid JSON body: {}", e)))?;
    if let Some(error) = value.as_object().and_then(|map| map.get("error")) {
        if is_truthy(error) {
            return Err(ApiError::Response(error.to_string()));
        }
    }
    Ok(value)
}

fn format_query_time(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn expect_list(value: Value, what: &str) -> Result<Vec<Value>, ApiError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(ApiError::Response(format!(
            "expected a list of {}, got {}",
            what,
            truncate(&other.to_string(), LOG_BODY_LIMIT)
        ))),
    }
}

impl FieldClimateClient {
    pub fn new(settings: ClientSettings, signer: Box<dyn Signer>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ApiError::Generic(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            timeout: settings.timeout,
            signer,
            rate_limiter: RateLimiter::per_hour(settings.requests_per_hour),
            backoff: settings.backoff,
            transport_retries: settings.transport_retries,
            transport_backoff: settings.transport_backoff,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used for rate limiting and backoff sleeps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Rate-limited, signed request with application-level retry.
    pub fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        retry_with_backoff(
            &self.backoff,
            self.clock.as_ref(),
            ApiError::is_retryable,
            || {
                self.rate_limiter.wait(self.clock.as_ref());
                self.send(&method, endpoint, params, body)
            },
        )
    }

    pub fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        self.request(Method::GET, endpoint, params, None)
    }

    fn transport_error(&self, e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::Timeout(self.timeout)
        } else {
            ApiError::Generic(e.to_string())
        }
    }

    fn send(
        &self,
        method: &Method,
        endpoint: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let endpoint = endpoint.trim_start_matches('/');
        let path = format!("/{}", endpoint);
        let url = format!("{}/{}", self.base_url, endpoint);
        let body_text = body.map(|b| b.to_string());
        let resend_allowed = *method == Method::GET || *method == Method::POST;

        let mut resends = 0;
        let response: Response = loop {
            let headers = self
                .signer
                .sign(method, &path, SystemTime::now(), body_text.as_deref())?;
            let mut builder = self
                .http
                .request(method.clone(), &url)
                .headers(headers)
                .header(ACCEPT, "application/json")
                .query(params);
            if let Some(text) = &body_text {
                builder = builder
                    .header(CONTENT_TYPE, "application/json")
                    .body(text.clone());
            }
            let request = builder
                .build()
                .map_err(|e| ApiError::Generic(format!("Failed to build request: {}", e)))?;
            log_request(&request, body_text.as_deref());

            let response = self
                .http
                .execute(request)
                .map_err(|e| self.transport_error(e))?;
            let status = response.status().as_u16();
            if resend_allowed
                && resends < self.transport_retries
                && TRANSPORT_RETRY_STATUSES.contains(&status)
            {
                resends += 1;
                let delay =
                    scale_duration(self.transport_backoff, 2f64.powi(resends as i32 - 1))
                        .min(MAX_BACKOFF);
                warn!(
                    "{} {} returned HTTP {}, re-sending in {:.2}s ({}/{})",
                    method,
                    path,
                    status,
                    delay.as_secs_f64(),
                    resends,
                    self.transport_retries
                );
                self.clock.sleep(delay);
                continue;
            }
            break response;
        };

        let status = response.status().as_u16();
        let text = response.text().map_err(|e| self.transport_error(e))?;
        debug!(
            "Response {} for {} {}: {}",
            status,
            method,
            path,
            truncate(&text, LOG_BODY_LIMIT)
        );
        classify_response(status, &text)
    }
}

impl StationApi for FieldClimateClient {
    fn get_stations(&self) -> Result<Vec<Value>, ApiError> {
        expect_list(self.get("user/stations", &[])?, "stations")
    }

    fn get_station(&self, station_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("station/{}", station_id), &[])
    }

    fn get_station_sensors(&self, station_id: &str) -> Result<Vec<Value>, ApiError> {
        expect_list(
            self.get(&format!("station/{}/sensors", station_id), &[])?,
            "sensors",
        )
    }

    fn get_sensor_data(
        &self,
        station_id: &str,
        sensor_id: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Value, ApiError> {
        debug!(
            "Fetching sensor {} of station {} from {} to {}",
            sensor_id, station_id, start, end
        );
        self.get(
            &format!("station/{}/sensor/{}/data", station_id, sensor_id),
            &[
                ("date_from", format_query_time(start)),
                ("date_to", format_query_time(end)),
                ("group", "raw".to_string()),
            ],
        )
    }
}
