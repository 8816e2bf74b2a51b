//! HTTP control surface routes (§6): reservation lifecycle, credential linking,
//! booking-window lookup, admin cookie management, and health/status/logs.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware;
use axum::response::{Json, Response};
use axum::routing::{delete, get, post};
use axum::{Router, body::Body};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{Span, debug, trace, warn};

use crate::app_state::AppState;
use crate::error::AppError;
use crate::queue::{ScheduledReservation, UsageType};
use crate::status::ServiceStatus;
use crate::vault::WafCookie;
use crate::web::error::ApiError;
use crate::web::extractors::{OwnerId, require_admin_token, require_internal_token, require_owner};

/// Creates the web server router: the full §6 HTTP surface behind the
/// `X-Internal-Token`/admin-bearer-token middleware stack.
pub fn create_router(app_state: AppState) -> Router {
    let public_router = Router::new()
        .route("/health", get(health))
        .with_state(app_state.clone());

    let api_router = Router::new()
        .route("/api/reserve", post(reserve))
        .route("/api/reservations", get(list_reservations))
        .route("/api/reservations/{id}", delete(cancel_reservation))
        .route("/api/resy/link", post(link_credentials))
        .route("/api/resy/status", get(credential_status))
        .route("/api/resy/unlink", post(unlink_credentials))
        .route("/api/booking-window/{venue_id}", get(booking_window))
        .route("/api/logs", get(logs))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), require_internal_token))
        .with_state(app_state.clone());

    let admin_router = Router::new()
        .route("/admin/cookies/import", post(import_cookies))
        .route("/admin/cookies/{venue_id}", get(cookie_status))
        .route("/admin/cookies/{venue_id}", delete(delete_cookies))
        .route("/admin/status", get(admin_status))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), require_admin_token))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), require_internal_token))
        .with_state(app_state);

    Router::new()
        .merge(public_router)
        .merge(api_router)
        .merge(admin_router)
        .layer((
            CompressionLayer::new().zstd(true).br(true).gzip(true),
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    tracing::debug_span!("request", path = request.uri().path())
                })
                .on_request(())
                .on_body_chunk(())
                .on_eos(())
                .on_response(
                    |response: &Response<Body>, latency: Duration, _span: &Span| {
                        let threshold = if cfg!(debug_assertions) {
                            Duration::from_millis(100)
                        } else {
                            Duration::from_millis(1000)
                        };
                        let status = response.status().as_u16();
                        if latency > threshold {
                            warn!(status, latency = ?latency, "response");
                        } else {
                            debug!(status, latency = ?latency, "response");
                        }
                    },
                )
                .on_failure(
                    |error: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
                        warn!(?error, latency = ?latency, "request failed");
                    },
                ),
            TimeoutLayer::new(Duration::from_secs(10)),
        ))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    trace!("health check requested");
    let kvs_status = match state.kvs.exists("health:ping").await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };
    Json(json!({
        "status": "healthy",
        "kvs": kvs_status,
    }))
}

#[derive(Debug, Deserialize)]
struct ReserveRequest {
    venue_id: i64,
    reservation_time: String,
    party_size: u32,
    #[serde(default)]
    table_preferences: Vec<String>,
    #[serde(default)]
    is_immediate: bool,
    #[serde(default)]
    auto_schedule: bool,
    /// Client-supplied submission instant, accepted for parity with the documented
    /// request body but not currently consulted (enqueue uses `Utc::now()`/the
    /// Booking-Window Resolver for timing, not the caller's clock).
    #[serde(default)]
    #[allow(dead_code)]
    request_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ReserveResponse {
    Immediate {
        reservation_id: String,
        booked_time: DateTime<Utc>,
    },
    Scheduled {
        id: String,
        run_time: DateTime<Utc>,
    },
}

/// Parses a local wall-clock reservation time (`YYYY-MM-DDTHH:MM`) as if it were UTC;
/// the venue-local conversion happens downstream once the venue's timezone is known.
fn parse_reservation_time(raw: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .map_err(|_| AppError::invalid_input(format!("unparseable reservation_time: {raw}")))
}

/// `POST /api/reserve`
async fn reserve(
    State(state): State<AppState>,
    owner: OwnerId,
    Json(body): Json<ReserveRequest>,
) -> Result<Json<ReserveResponse>, ApiError> {
    if body.party_size == 0 {
        return Err(AppError::invalid_input("party_size must be positive").into());
    }
    let reservation_time = parse_reservation_time(&body.reservation_time)?;
    let owner_id = owner.0.unwrap_or_default();

    let credentials = if owner_id.is_empty() {
        None
    } else {
        state.vault.get_credentials(&owner_id).await.map_err(AppError::from)?
    };

    if body.is_immediate {
        let mut reservation = ScheduledReservation::new(
            body.venue_id,
            reservation_time,
            body.party_size,
            body.table_preferences.clone(),
            owner_id.clone(),
            UsageType::Immediate,
            Utc::now(),
        );
        if let Some(creds) = &credentials {
            reservation.auth_token = Some(creds.auth_token.clone());
            reservation.payment_method_id = Some(creds.payment_method_id.clone());
        }

        let timezone = state
            .booking_window
            .resolve(body.venue_id)
            .await
            .ok()
            .and_then(|w| w.timezone.parse().ok())
            .unwrap_or(chrono_tz::America::New_York);

        let outcome = state
            .upstream
            .book(&reservation, credentials.as_ref(), timezone)
            .await
            .map_err(AppError::from)?;

        state
            .accounting
            .record_usage(&owner_id, UsageType::Immediate, body.venue_id)
            .await;

        return Ok(Json(ReserveResponse::Immediate {
            reservation_id: outcome.reservation_id,
            booked_time: outcome.booked_time,
        }));
    }

    let run_time = if body.auto_schedule {
        let window = state
            .booking_window
            .resolve(body.venue_id)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        window
            .calculate_run_time(reservation_time)
            .map_err(|e| AppError::Internal(e.to_string()))?
    } else {
        Utc::now()
    };

    let mut reservation = ScheduledReservation::new(
        body.venue_id,
        reservation_time,
        body.party_size,
        body.table_preferences,
        owner_id.clone(),
        UsageType::Concierge,
        run_time,
    );
    if let Some(creds) = &credentials {
        reservation.auth_token = Some(creds.auth_token.clone());
        reservation.payment_method_id = Some(creds.payment_method_id.clone());
    }

    state.queue.enqueue(&reservation).await.map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ReserveResponse::Scheduled {
        id: reservation.id,
        run_time: reservation.run_time,
    }))
}

/// `GET /api/reservations`
async fn list_reservations(
    State(state): State<AppState>,
    owner: OwnerId,
) -> Result<Json<Vec<ScheduledReservation>>, ApiError> {
    let reservations = match owner.0 {
        Some(owner_id) => state.queue.list_by_owner(&owner_id).await,
        None => state.queue.list_all().await,
    }
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(reservations))
}

/// `DELETE /api/reservations/{id}`
async fn cancel_reservation(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if let Some(owner_id) = &owner.0 {
        if let Some(existing) = state.queue.get(&id).await.map_err(|e| AppError::Internal(e.to_string()))? {
            if &existing.owner_id != owner_id {
                return Err(AppError::not_found("reservation not found").into());
            }
        }
    }

    state.queue.delete(&id).await.map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct LinkRequest {
    email: String,
    password: String,
}

/// `POST /api/resy/link`
async fn link_credentials(
    State(state): State<AppState>,
    owner: OwnerId,
    Json(body): Json<LinkRequest>,
) -> Result<Json<Value>, ApiError> {
    let owner_id = require_owner(&owner)?;

    let (auth_token, payment_method_id) = state
        .upstream
        .login(&body.email, &body.password)
        .await
        .map_err(AppError::from)?;

    state
        .vault
        .set_credentials(owner_id, &auth_token, &payment_method_id.to_string())
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({ "linked": true })))
}

/// `GET /api/resy/status`
async fn credential_status(
    State(state): State<AppState>,
    owner: OwnerId,
) -> Result<Json<Value>, ApiError> {
    let owner_id = require_owner(&owner)?;
    let linked = state.vault.has_credentials(owner_id).await.map_err(AppError::from)?;
    Ok(Json(json!({ "linked": linked })))
}

/// `POST /api/resy/unlink`
async fn unlink_credentials(
    State(state): State<AppState>,
    owner: OwnerId,
) -> Result<StatusCode, ApiError> {
    let owner_id = require_owner(&owner)?;
    state.vault.delete_credentials(owner_id).await.map_err(AppError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/booking-window/{venue_id}`
async fn booking_window(
    State(state): State<AppState>,
    Path(venue_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let window = state
        .booking_window
        .resolve(venue_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "days_in_advance": window.days_in_advance,
        "release_time": format!("{:02}:{:02}", window.release_hour, window.release_minute),
        "timezone": window.timezone,
    })))
}

/// `GET /api/logs`
async fn logs(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.logs.snapshot(Some(500)))
}

#[derive(Debug, Deserialize)]
struct ImportCookiesRequest {
    venue_id: i64,
    cookies: Vec<WafCookie>,
    user_agent: String,
    #[serde(default = "default_ttl_hours")]
    ttl_hours: u64,
}

fn default_ttl_hours() -> u64 {
    24
}

/// `POST /admin/cookies/import`
async fn import_cookies(
    State(state): State<AppState>,
    Json(body): Json<ImportCookiesRequest>,
) -> Result<StatusCode, ApiError> {
    let session = crate::vault::WafSession {
        cookies: body.cookies,
        user_agent: body.user_agent,
    };
    state
        .vault
        .set_waf_session(body.venue_id, &session, Duration::from_secs(body.ttl_hours * 3600))
        .await
        .map_err(AppError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /admin/cookies/{venue_id}`
async fn cookie_status(
    State(state): State<AppState>,
    Path(venue_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let ttl = state.vault.waf_session_ttl(venue_id).await.map_err(AppError::from)?;
    Ok(Json(json!({
        "exists": ttl.is_some(),
        "ttl_seconds": ttl.map(|d| d.as_secs()),
    })))
}

/// `DELETE /admin/cookies/{venue_id}`
async fn delete_cookies(
    State(state): State<AppState>,
    Path(venue_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.vault.delete_waf_session(venue_id).await.map_err(AppError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct AdminStatusParams {
    #[serde(default)]
    venue_ids: Option<String>,
}

/// `GET /admin/status` — per-venue cookie status plus pending-reservation count and
/// the self-reported health of every background service.
async fn admin_status(
    State(state): State<AppState>,
    Query(params): Query<AdminStatusParams>,
) -> Result<Json<Value>, ApiError> {
    let pending_count = state.queue.count_pending().await.map_err(|e| AppError::Internal(e.to_string()))?;

    let mut services = BTreeMap::new();
    for (name, status) in state.service_statuses.all() {
        services.insert(name, status);
    }

    let mut cookies = BTreeMap::new();
    if let Some(ids) = params.venue_ids {
        for id_str in ids.split(',').filter(|s| !s.is_empty()) {
            if let Ok(venue_id) = id_str.parse::<i64>() {
                let ttl = state.vault.waf_session_ttl(venue_id).await.map_err(AppError::from)?;
                cookies.insert(
                    venue_id,
                    json!({ "exists": ttl.is_some(), "ttl_seconds": ttl.map(|d| d.as_secs()) }),
                );
            }
        }
    }

    Ok(Json(json!({
        "pending_count": pending_count,
        "services": services.into_iter().map(|(k, v)| (k, service_status_label(&v))).collect::<BTreeMap<_, _>>(),
        "cookies": cookies,
    })))
}

fn service_status_label(status: &ServiceStatus) -> &'static str {
    match status {
        ServiceStatus::Starting => "starting",
        ServiceStatus::Active => "active",
        ServiceStatus::Connected => "connected",
        ServiceStatus::Disabled => "disabled",
        ServiceStatus::Error => "error",
    }
}

