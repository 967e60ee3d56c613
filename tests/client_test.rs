use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    Router,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use fieldclimate_collector::auth::{build_signer, hmac_sha256_hex, AuthScheme};
use fieldclimate_collector::client::{ClientSettings, FieldClimateClient, StationApi};
use fieldclimate_collector::credentials::ApiKeys;
use fieldclimate_collector::retry::{BackoffPolicy, ManualClock};
use fieldclimate_collector::ApiError;

const PUBLIC_KEY: &str = "test-public";
const PRIVATE_KEY: &str = "test-private";

#[derive(Debug, Clone)]
struct RecordedRequest {
    path: String,
    query: Option<String>,
    headers: HeaderMap,
}

/// Responses are scripted per path; the last scripted response repeats.
#[derive(Clone, Default)]
struct MockState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responses: Arc<Mutex<HashMap<String, VecDeque<(u16, String)>>>>,
}

impl MockState {
    fn script(&self, path: &str, responses: &[(u16, &str)]) {
        self.responses.lock().unwrap().insert(
            path.to_string(),
            responses
                .iter()
                .map(|(status, body)| (*status, body.to_string()))
                .collect(),
        );
    }

    fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    fn last_request(&self) -> RecordedRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

async fn mock_handler(
    State(state): State<MockState>,
    uri: Uri,
    headers: HeaderMap,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    state.requests.lock().unwrap().push(RecordedRequest {
        path: path.clone(),
        query: uri.query().map(str::to_string),
        headers,
    });

    if path.ends_with("/slow") {
        tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
    }

    let (status, body) = {
        let mut responses = state.responses.lock().unwrap();
        match responses.get_mut(&path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => (404, r#"{"message": "not found"}"#.to_string()),
        }
    };
    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
}

async fn start_mock_server(state: MockState) -> String {
    let app = Router::new().fallback(mock_handler).with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}/v2", addr)
}

fn settings(base_url: String) -> ClientSettings {
    ClientSettings {
        base_url,
        timeout: Duration::from_secs(5),
        requests_per_hour: 3_600_000,
        backoff: BackoffPolicy::default(),
        transport_retries: 3,
        transport_backoff: Duration::from_millis(500),
    }
}

fn keys() -> ApiKeys {
    ApiKeys {
        public_key: PUBLIC_KEY.to_string(),
        private_key: PRIVATE_KEY.to_string(),
    }
}

fn client_with(
    settings: ClientSettings,
    scheme: AuthScheme,
    clock: Arc<ManualClock>,
) -> FieldClimateClient {
    FieldClimateClient::new(settings, build_signer(scheme, keys()))
        .unwrap()
        .with_clock(clock)
}

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

#[tokio::test]
async fn test_hmac_date_signature_and_sensor_query() {
    let state = MockState::default();
    state.script(
        "/v2/station/S1/sensor/506/data",
        &[(200, r#"{"data": [{"date_utc": "2024-03-01 10:00:00", "value": 4.5}]}"#)],
    );
    let base_url = start_mock_server(state.clone()).await;

    let payload = tokio::task::spawn_blocking(move || {
        let client = client_with(
            settings(base_url),
            AuthScheme::HmacDate,
            Arc::new(ManualClock::new()),
        );
        client.get_sensor_data(
            "S1",
            "506",
            &utc("2024-03-01T00:00:00Z"),
            &utc("2024-03-02T00:00:00Z"),
        )
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(payload["data"][0]["value"], 4.5);

    let request = state.last_request();
    assert_eq!(request.path, "/v2/station/S1/sensor/506/data");
    let query = request.query.unwrap();
    assert!(query.contains("group=raw"));
    assert!(query.contains("date_from=2024-03-01T00%3A00%3A00%2B00%3A00"));
    assert!(query.contains("date_to=2024-03-02T00%3A00%3A00%2B00%3A00"));

    assert_eq!(request.headers["accept"], "application/json");
    let date = request.headers["date"].to_str().unwrap().to_string();
    assert!(httpdate::parse_http_date(&date).is_ok());

    // Signed path excludes the base URL prefix and the query string
    let expected = hmac_sha256_hex(
        PRIVATE_KEY,
        &format!("GET/station/S1/sensor/506/data{}{}", date, PUBLIC_KEY),
    )
    .unwrap();
    assert_eq!(
        request.headers["authorization"].to_str().unwrap(),
        format!("hmac {}:{}", PUBLIC_KEY, expected)
    );
}

#[tokio::test]
async fn test_signed_headers_scheme() {
    let state = MockState::default();
    state.script("/v2/user/stations", &[(200, r#"[{"name": {"original": "S1"}}]"#)]);
    let base_url = start_mock_server(state.clone()).await;

    let stations = tokio::task::spawn_blocking(move || {
        let client = client_with(
            settings(base_url),
            AuthScheme::SignedHeaders,
            Arc::new(ManualClock::new()),
        );
        client.get_stations()
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(stations.len(), 1);

    let request = state.last_request();
    assert!(request.headers.get("authorization").is_none());
    assert_eq!(request.headers["x-public-key"], PUBLIC_KEY);
    let timestamp = request.headers["x-timestamp"].to_str().unwrap().to_string();
    assert!(timestamp.parse::<u64>().is_ok());
    let expected =
        hmac_sha256_hex(PRIVATE_KEY, &format!("get/user/stations{}", timestamp)).unwrap();
    assert_eq!(request.headers["x-signature"].to_str().unwrap(), expected);
}

#[tokio::test]
async fn test_error_field_is_retried_until_exhausted() {
    let state = MockState::default();
    state.script("/v2/station/S1", &[(200, r#"{"error": "temporarily unavailable"}"#)]);
    let base_url = start_mock_server(state.clone()).await;
    let clock = Arc::new(ManualClock::new());
    let client_clock = clock.clone();

    let result = tokio::task::spawn_blocking(move || {
        client_with(settings(base_url), AuthScheme::HmacDate, client_clock).get_station("S1")
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(ApiError::Response(_))));
    assert_eq!(state.hits("/v2/station/S1"), 4);

    let sleeps = clock.sleeps();
    assert_eq!(sleeps.len(), 3);
    for (sleep, nominal) in sleeps.iter().zip([5.0, 10.0, 20.0]) {
        let secs = sleep.as_secs_f64();
        assert!(secs >= nominal * 0.8 - 1e-9 && secs <= nominal * 1.2 + 1e-9);
    }
}

#[tokio::test]
async fn test_malformed_json_recovers_on_retry() {
    let state = MockState::default();
    state.script(
        "/v2/station/S1",
        &[(200, "<html>maintenance</html>"), (200, r#"{"name": "North"}"#)],
    );
    let base_url = start_mock_server(state.clone()).await;

    let detail = tokio::task::spawn_blocking(move || {
        client_with(
            settings(base_url),
            AuthScheme::HmacDate,
            Arc::new(ManualClock::new()),
        )
        .get_station("S1")
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(detail["name"], "North");
    assert_eq!(state.hits("/v2/station/S1"), 2);
}

#[tokio::test]
async fn test_auth_error_is_not_retried() {
    let state = MockState::default();
    state.script("/v2/user/stations", &[(401, r#"{"message": "bad signature"}"#)]);
    let base_url = start_mock_server(state.clone()).await;

    let result = tokio::task::spawn_blocking(move || {
        client_with(
            settings(base_url),
            AuthScheme::HmacDate,
            Arc::new(ManualClock::new()),
        )
        .get_stations()
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(ApiError::Auth(_))));
    assert_eq!(state.hits("/v2/user/stations"), 1);
}

#[tokio::test]
async fn test_transport_resends_on_server_error() {
    let state = MockState::default();
    state.script(
        "/v2/station/S1/sensors",
        &[(503, "busy"), (502, "busy"), (200, r#"[{"id": "506"}]"#)],
    );
    let base_url = start_mock_server(state.clone()).await;
    let clock = Arc::new(ManualClock::new());
    let client_clock = clock.clone();

    let sensors = tokio::task::spawn_blocking(move || {
        client_with(settings(base_url), AuthScheme::HmacDate, client_clock)
            .get_station_sensors("S1")
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(sensors.len(), 1);
    assert_eq!(state.hits("/v2/station/S1/sensors"), 3);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(500), Duration::from_millis(1000)]
    );
}

#[tokio::test]
async fn test_rate_limit_response_after_transport_retries() {
    let state = MockState::default();
    state.script("/v2/user/stations", &[(429, r#"{"message": "slow down"}"#)]);
    let base_url = start_mock_server(state.clone()).await;

    let result = tokio::task::spawn_blocking(move || {
        client_with(
            settings(base_url),
            AuthScheme::HmacDate,
            Arc::new(ManualClock::new()),
        )
        .get_stations()
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(ApiError::RateLimit(_))));
    // Initial send plus three transport re-sends, no application-level retry
    assert_eq!(state.hits("/v2/user/stations"), 4);
}

#[tokio::test]
async fn test_other_status_is_generic_error() {
    let state = MockState::default();
    let base_url = start_mock_server(state.clone()).await;

    let result = tokio::task::spawn_blocking(move || {
        client_with(
            settings(base_url),
            AuthScheme::HmacDate,
            Arc::new(ManualClock::new()),
        )
        .get_station("UNKNOWN")
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(ApiError::Generic(_))));
    assert_eq!(state.hits("/v2/station/UNKNOWN"), 1);
}

#[tokio::test]
async fn test_requests_are_spaced_by_rate_limiter() {
    let state = MockState::default();
    state.script("/v2/user/stations", &[(200, "[]")]);
    let base_url = start_mock_server(state.clone()).await;
    let clock = Arc::new(ManualClock::new());
    let client_clock = clock.clone();

    tokio::task::spawn_blocking(move || {
        let mut config = settings(base_url);
        config.requests_per_hour = 3600;
        let client = client_with(config, AuthScheme::HmacDate, client_clock);
        client.get_stations().unwrap();
        client.get_stations().unwrap();
        client.get_stations().unwrap();
    })
    .await
    .unwrap();

    assert_eq!(state.hits("/v2/user/stations"), 3);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(1)]
    );
}

#[tokio::test]
async fn test_timeout_is_classified_and_retried() {
    let state = MockState::default();
    state.script("/v2/slow", &[(200, "{}")]);
    let base_url = start_mock_server(state.clone()).await;

    let result = tokio::task::spawn_blocking(move || {
        let mut config = settings(base_url);
        config.timeout = Duration::from_millis(200);
        config.backoff.max_retries = 1;
        client_with(config, AuthScheme::HmacDate, Arc::new(ManualClock::new()))
            .get("slow", &[])
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(ApiError::Timeout(_))));
    assert_eq!(state.hits("/v2/slow"), 2);
}
