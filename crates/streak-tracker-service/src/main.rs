use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use streak_tracker_core::{
    days_since_start, format_date, format_rfc3339, now_utc, parse_date, parse_status,
    today_local, MonthGrid, Status, StatusStore, StreakEngine, TrackerConfig, TrackerError,
    DEFAULT_ANCHOR_DATE,
};
use streak_tracker_store_sqlite::SqliteStatusStore;
use time::Date;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Months shown by the streak view, starting at the anchor month.
const CALENDAR_MONTHS: usize = 13;

#[derive(Debug, Clone)]
struct ServiceState {
    db_path: PathBuf,
    config: TrackerConfig,
    fixed_today: Option<Date>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    error: ServiceErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceErrorPayload {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct ServiceFailure {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
struct StreakResponse {
    anchor_date: String,
    today: String,
    current_streak: u32,
    days_since_start: i64,
    total_days_tracked: u32,
    months: Vec<MonthGrid>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToggleRequest {
    date: String,
    #[serde(default)]
    current_status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ToggleResponse {
    date: String,
    previous_status: Status,
    status: Status,
    message: String,
}

#[derive(Debug, Parser)]
#[command(name = "streak-tracker-service")]
#[command(about = "Local HTTP service for the streak tracker")]
struct Args {
    #[arg(long, env = "STREAK_DB", default_value = "./streak_tracker.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "STREAK_BIND", default_value = "127.0.0.1:5000")]
    bind: SocketAddr,
    #[arg(long, env = "STREAK_ANCHOR_DATE", default_value_t = format_date(DEFAULT_ANCHOR_DATE))]
    anchor_date: String,
    #[arg(long, env = "STREAK_WEEK_START", default_value = "monday")]
    week_start: String,
    /// Pin "today" for every request (YYYY-MM-DD).
    #[arg(long, env = "STREAK_TODAY")]
    today: Option<String>,
    #[arg(long)]
    log_level: Option<String>,
}

impl IntoResponse for ServiceFailure {
    fn into_response(self) -> Response {
        let payload = ServiceError {
            error: ServiceErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}

impl From<TrackerError> for ServiceFailure {
    fn from(err: TrackerError) -> Self {
        let (status, code) = match &err {
            TrackerError::InvalidDate(_) => (StatusCode::BAD_REQUEST, "invalid_date"),
            TrackerError::InvalidMonth(_) => (StatusCode::BAD_REQUEST, "invalid_month"),
            TrackerError::InvalidStatus(_) => (StatusCode::BAD_REQUEST, "invalid_status"),
            TrackerError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            TrackerError::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
        };
        ServiceState::failure(status, code, err.to_string(), None)
    }
}

impl ServiceState {
    fn failure(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> ServiceFailure {
        ServiceFailure {
            status,
            code,
            message: message.into(),
            details,
        }
    }

    fn invalid_json(rejection: &JsonRejection) -> ServiceFailure {
        Self::failure(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            rejection.body_text(),
            Some(json!({"rejection": rejection.to_string()})),
        )
    }

    fn today(&self) -> Date {
        self.fixed_today.unwrap_or_else(today_local)
    }

    /// Runs `op` against a freshly opened store on the blocking pool and
    /// waits for it to finish. Lock waits are bounded by the connection's
    /// busy timeout only, so a reported failure never hides a later commit.
    /// Opening failures count as store outages.
    async fn run_blocking<T, F>(
        &self,
        operation_label: &'static str,
        op: F,
    ) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteStatusStore) -> Result<T, TrackerError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        let op_result = tokio::task::spawn_blocking(move || {
            let mut store = SqliteStatusStore::open(&db_path)
                .map_err(|err| TrackerError::StoreUnavailable(format!("{err:#}")))?;
            op(&mut store)
        })
        .await
        .map_err(|err| {
            Self::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("{operation_label} join failure: {err}"),
                None,
            )
        })?;

        op_result.map_err(|err| {
            warn!(operation = operation_label, error = %err, "operation failed");
            ServiceFailure::from(err)
        })
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/streak", get(streak))
        .route("/api/marked-days", get(marked_days))
        .route("/api/toggle-day", post(toggle_day))
        .route("/api/calendar/:year/:month", get(calendar_month))
        .with_state(state)
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let config = TrackerConfig::from_raw(&args.anchor_date, &args.week_start)?;
    let fixed_today = args
        .today
        .as_deref()
        .map(parse_date)
        .transpose()
        .context("invalid --today value")?;

    // Schema is applied once here; requests open the file without migrating.
    SqliteStatusStore::open_migrated(&args.db)?;

    let state = ServiceState {
        db_path: args.db,
        config,
        fixed_today,
    };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(bind = %args.bind, anchor = %format_date(config.anchor_date), "streak service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Result<Json<HealthResponse>, ServiceFailure> {
    Ok(Json(HealthResponse {
        status: "healthy",
        timestamp: format_rfc3339(now_utc())?,
    }))
}

async fn streak(State(state): State<ServiceState>) -> Result<Json<StreakResponse>, ServiceFailure> {
    let today = state.today();
    let engine = StreakEngine::new(&state.config);
    let anchor_date = engine.anchor_date();

    let statuses = state
        .run_blocking("streak", move |store| store.list_statuses(anchor_date, today))
        .await?;
    let streak = engine.streak_state(today, &statuses);
    let months = engine.calendar_from_anchor(CALENDAR_MONTHS, today, &statuses)?;

    Ok(Json(StreakResponse {
        anchor_date: format_date(anchor_date),
        today: format_date(today),
        current_streak: streak.current_streak,
        days_since_start: days_since_start(anchor_date, today),
        total_days_tracked: streak.total_days_tracked,
        months,
    }))
}

async fn marked_days(
    State(state): State<ServiceState>,
) -> Result<Json<BTreeMap<String, Status>>, ServiceFailure> {
    let statuses = state
        .run_blocking("marked_days", |store| store.list_all_statuses())
        .await?;
    Ok(Json(
        statuses
            .into_iter()
            .map(|(date, status)| (format_date(date), status))
            .collect(),
    ))
}

/// Accepts `unmarked` as well, which is what the calendar page sends for an
/// empty cell.
fn parse_current_status(raw: &str) -> Result<Status, TrackerError> {
    if raw == "unmarked" {
        return Ok(Status::Unset);
    }
    parse_status(raw)
}

async fn toggle_day(
    State(state): State<ServiceState>,
    payload: Result<Json<ToggleRequest>, JsonRejection>,
) -> Result<Json<ToggleResponse>, ServiceFailure> {
    let Json(request) = payload.map_err(|rejection| ServiceState::invalid_json(&rejection))?;
    let date = parse_date(&request.date)?;
    let claimed = request
        .current_status
        .as_deref()
        .map(parse_current_status)
        .transpose()?;

    let (previous_status, status) = state
        .run_blocking("toggle_day", move |store| {
            let previous = match claimed {
                Some(status) => status,
                None => store.get_status(date)?,
            };
            let next = previous.next_in_cycle();
            store.set_status(date, next)?;
            Ok((previous, next))
        })
        .await?;

    let date = format_date(date);
    info!(%date, from = %previous_status, to = %status, "toggled day");
    Ok(Json(ToggleResponse {
        message: format!("Day {date} set to {status}"),
        date,
        previous_status,
        status,
    }))
}

async fn calendar_month(
    State(state): State<ServiceState>,
    Path((year, month)): Path<(i32, u8)>,
) -> Result<Json<MonthGrid>, ServiceFailure> {
    let today = state.today();
    let engine = StreakEngine::new(&state.config);
    // Validates the month before any store access.
    let empty = engine.build_month_grid(year, month, today, &BTreeMap::new())?;
    let from = empty.days().map(|day| day.date).min();
    let to = empty.days().map(|day| day.date).max();

    let statuses = match (from, to) {
        (Some(from), Some(to)) => {
            state
                .run_blocking("calendar_month", move |store| store.list_statuses(from, to))
                .await?
        }
        _ => BTreeMap::new(),
    };
    Ok(Json(engine.build_month_grid(year, month, today, &statuses)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use http::Request;
    use time::macros::date;
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("streak-service-{}.sqlite3", ulid::Ulid::new()))
    }

    /// Temp database with the schema applied, as `main` does before serving.
    fn migrated_temp_db() -> PathBuf {
        let db_path = unique_temp_db_path();
        if let Err(err) = SqliteStatusStore::open_migrated(&db_path) {
            panic!("failed to migrate temp db: {err:#}");
        }
        db_path
    }

    fn test_state(db_path: PathBuf) -> ServiceState {
        ServiceState {
            db_path,
            config: TrackerConfig::default(),
            fixed_today: Some(date!(2025 - 08 - 29)),
        }
    }

    fn stored_status(db_path: &std::path::Path, date: Date) -> Status {
        let store = match SqliteStatusStore::open(db_path) {
            Ok(store) => store,
            Err(err) => panic!("failed to reopen store: {err:#}"),
        };
        match store.get_status(date) {
            Ok(status) => status,
            Err(err) => panic!("failed to read {date}: {err}"),
        }
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .body(Body::empty())
            .unwrap_or_else(|err| panic!("failed to build request: {err}"))
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|err| panic!("failed to build request: {err}"))
    }

    async fn send(state: ServiceState, request: Request<Body>) -> Response {
        match app(state).oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    fn error_code(value: &serde_json::Value) -> Option<&str> {
        value
            .get("error")
            .and_then(|error| error.get("code"))
            .and_then(serde_json::Value::as_str)
    }

    fn seed(db_path: &std::path::Path, entries: &[(Date, Status)]) {
        let mut store = match SqliteStatusStore::open_migrated(db_path) {
            Ok(store) => store,
            Err(err) => panic!("failed to open seed store: {err:#}"),
        };
        for (date, status) in entries {
            if let Err(err) = store.set_status(*date, *status) {
                panic!("failed to seed {date}: {err}");
            }
        }
    }

    #[tokio::test]
    async fn health_endpoint_reports_healthy() {
        let response = send(
            test_state(migrated_temp_db()),
            get_request("/health"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(value["status"], "healthy");
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn streak_endpoint_counts_from_last_unsuccessful_day() {
        let db_path = unique_temp_db_path();
        seed(&db_path, &[(date!(2025 - 08 - 28), Status::Unsuccessful)]);

        let response = send(test_state(db_path.clone()), get_request("/api/streak")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(value["anchor_date"], "2025-08-26");
        assert_eq!(value["today"], "2025-08-29");
        assert_eq!(value["current_streak"], 1);
        assert_eq!(value["days_since_start"], 3);
        assert_eq!(value["total_days_tracked"], 4);
        let months = value["months"].as_array().map_or(0, Vec::len);
        assert_eq!(months, CALENDAR_MONTHS);
        assert_eq!(value["months"][0]["month_name"], "August");
        assert_eq!(value["months"][12]["month_name"], "August");
        assert_eq!(value["months"][12]["year"], 2026);

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn streak_endpoint_reports_negative_days_before_anchor() {
        let mut state = test_state(migrated_temp_db());
        state.fixed_today = Some(date!(2025 - 08 - 20));

        let value = response_json(send(state, get_request("/api/streak")).await).await;
        assert_eq!(value["current_streak"], 0);
        assert_eq!(value["days_since_start"], -6);
        assert_eq!(value["total_days_tracked"], 0);
    }

    #[tokio::test]
    async fn store_outage_returns_unavailable_without_fallback() {
        let missing_dir = std::env::temp_dir()
            .join(format!("streak-missing-{}", ulid::Ulid::new()))
            .join("nested")
            .join("streak.sqlite3");
        let response = send(test_state(missing_dir), get_request("/api/streak")).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let value = response_json(response).await;
        assert_eq!(error_code(&value), Some("store_unavailable"));
        assert!(value.get("current_streak").is_none());
    }

    #[tokio::test]
    async fn toggle_day_cycles_through_stored_status() {
        let db_path = migrated_temp_db();
        let state = test_state(db_path.clone());
        let mut seen = Vec::new();

        for _ in 0..3 {
            let response = send(
                state.clone(),
                post_json("/api/toggle-day", r#"{"date":"2025-08-27"}"#),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
            let value = response_json(response).await;
            seen.push(value["status"].as_str().unwrap_or_default().to_string());
        }
        assert_eq!(seen, vec!["successful", "unsuccessful", "unset"]);

        let marked = response_json(send(state, get_request("/api/marked-days")).await).await;
        assert_eq!(marked, json!({}));

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn toggle_day_trusts_claimed_current_status() {
        let db_path = migrated_temp_db();
        let state = test_state(db_path.clone());

        let response = send(
            state.clone(),
            post_json(
                "/api/toggle-day",
                r#"{"date":"2025-08-27","current_status":"successful"}"#,
            ),
        )
        .await;
        let value = response_json(response).await;
        assert_eq!(value["previous_status"], "successful");
        assert_eq!(value["status"], "unsuccessful");
        assert_eq!(value["message"], "Day 2025-08-27 set to unsuccessful");

        let unmarked = response_json(
            send(
                state.clone(),
                post_json(
                    "/api/toggle-day",
                    r#"{"date":"2025-08-30","current_status":"unmarked"}"#,
                ),
            )
            .await,
        )
        .await;
        assert_eq!(unmarked["status"], "successful");

        let marked = response_json(send(state, get_request("/api/marked-days")).await).await;
        assert_eq!(
            marked,
            json!({"2025-08-27": "unsuccessful", "2025-08-30": "successful"})
        );

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn toggle_day_rejects_bad_input() {
        let state = test_state(migrated_temp_db());

        let bad_date = send(
            state.clone(),
            post_json("/api/toggle-day", r#"{"date":"2025/08/27"}"#),
        )
        .await;
        assert_eq!(bad_date.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            error_code(&response_json(bad_date).await),
            Some("invalid_date")
        );

        let bad_status = send(
            state.clone(),
            post_json(
                "/api/toggle-day",
                r#"{"date":"2025-08-27","current_status":"maybe"}"#,
            ),
        )
        .await;
        assert_eq!(bad_status.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            error_code(&response_json(bad_status).await),
            Some("invalid_status")
        );

        let bad_json = send(state, post_json("/api/toggle-day", "{")).await;
        assert_eq!(bad_json.status(), StatusCode::BAD_REQUEST);
        let value = response_json(bad_json).await;
        assert_eq!(error_code(&value), Some("invalid_json"));
        assert!(value["error"]["details"]["rejection"].is_string());
    }

    #[tokio::test]
    async fn calendar_month_returns_annotated_grid() {
        let db_path = unique_temp_db_path();
        seed(&db_path, &[(date!(2025 - 08 - 28), Status::Unsuccessful)]);

        let response = send(
            test_state(db_path.clone()),
            get_request("/api/calendar/2025/8"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value["month_name"], "August");

        let last_week = value["weeks"]
            .as_array()
            .and_then(|weeks| weeks.last())
            .cloned()
            .unwrap_or_default();
        let markers = last_week
            .as_array()
            .map(|cells| {
                cells
                    .iter()
                    .map(|cell| cell["marker"].as_str().unwrap_or_default().to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        assert_eq!(
            markers,
            vec![
                "neutral",
                "anchor",
                "successful",
                "unsuccessful",
                "today",
                "neutral",
                "neutral"
            ]
        );

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn calendar_month_rejects_month_thirteen() {
        let response = send(
            test_state(migrated_temp_db()),
            get_request("/api/calendar/2025/13"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            error_code(&response_json(response).await),
            Some("invalid_month")
        );
    }

    #[tokio::test]
    async fn failed_toggle_leaves_stored_status_unchanged() {
        let db_path = unique_temp_db_path();
        seed(&db_path, &[(date!(2025 - 08 - 27), Status::Successful)]);
        let conn = match rusqlite::Connection::open(&db_path) {
            Ok(conn) => conn,
            Err(err) => panic!("failed to open raw connection: {err}"),
        };
        if let Err(err) = conn.execute_batch(
            "CREATE TRIGGER reject_status_update BEFORE UPDATE ON day_statuses
             BEGIN SELECT RAISE(ABORT, 'status updates rejected'); END;",
        ) {
            panic!("failed to install trigger: {err}");
        }
        drop(conn);

        let response = send(
            test_state(db_path.clone()),
            post_json("/api/toggle-day", r#"{"date":"2025-08-27"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            error_code(&response_json(response).await),
            Some("store_unavailable")
        );
        assert_eq!(
            stored_status(&db_path, date!(2025 - 08 - 27)),
            Status::Successful
        );

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn successful_toggle_response_matches_committed_status() {
        let db_path = migrated_temp_db();
        let state = test_state(db_path.clone());

        for _ in 0..2 {
            let response = send(
                state.clone(),
                post_json("/api/toggle-day", r#"{"date":"2025-08-27"}"#),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
            let value = response_json(response).await;
            let reported = value["status"].as_str().and_then(Status::parse);
            assert_eq!(reported, Some(stored_status(&db_path, date!(2025 - 08 - 27))));
        }

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn requests_against_unmigrated_file_report_store_unavailable() {
        let db_path = unique_temp_db_path();
        let response = send(test_state(db_path.clone()), get_request("/api/marked-days")).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            error_code(&response_json(response).await),
            Some("store_unavailable")
        );

        let _ = std::fs::remove_file(&db_path);
    }
}
