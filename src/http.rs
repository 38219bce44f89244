use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use ulid::Ulid;

use crate::booking::{Booker, Command, CommandResult, Outcome, Policy, ReservationListing};
use crate::engine::{EngineError, ErrorClass, GamePatch, SystemPatch};
use crate::model::*;

#[derive(Clone)]
pub struct AppState {
    pub booker: Arc<Booker>,
    pub request_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/availability", get(availability))
        .route("/api/reservations", get(list_reservations).post(create_reservation))
        .route("/api/reservations/events", get(reservation_events))
        .route("/api/reservations/{id}", delete(cancel_reservation))
        .route("/api/system-types", get(list_system_types).post(create_system_type))
        .route("/api/system-types/{id}", patch(rename_system_type))
        .route("/api/systems", get(list_systems).post(create_system))
        .route("/api/systems/{id}", patch(update_system).delete(delete_system))
        .route("/api/games", get(list_games).post(create_game))
        .route("/api/games/{id}", patch(update_game).delete(delete_game))
        .route("/api/weekly-notice", get(weekly_notice).put(update_weekly_notice))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .with_state(state)
}

// ── Errors ───────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Engine(EngineError),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
            ApiError::Engine(EngineError::Timeout) => {
                (StatusCode::SERVICE_UNAVAILABLE, EngineError::Timeout.to_string())
            }
            ApiError::Engine(e) => {
                let status = match e.class() {
                    ErrorClass::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorClass::NotFound => StatusCode::NOT_FOUND,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, e.to_string())
            }
        };
        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}

// ── Wire shapes ──────────────────────────────────────────

fn iso(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

fn parse_instant(field: &str, raw: &str) -> Result<Ms, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.timestamp_millis())
        .map_err(|e| ApiError::BadRequest(format!("{field}: {e}")))
}

fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|e| ApiError::BadRequest(format!("invalid id {raw}: {e}")))
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReservationJson {
    id: Ulid,
    user_id: UserId,
    start: String,
    end: String,
    game_system_id: Ulid,
    game_id: Ulid,
    created_at: String,
}

impl From<&Reservation> for ReservationJson {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id.clone(),
            start: iso(r.span.start),
            end: iso(r.span.end),
            game_system_id: r.game_system_id,
            game_id: r.game_id,
            created_at: iso(r.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
struct ExtendedProps {
    system: String,
}

/// One calendar item: the reservation plus display fields.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CalendarEntry {
    #[serde(flatten)]
    reservation: ReservationJson,
    title: String,
    game: GameInfo,
    game_system: GameSystemInfo,
    system_type: SystemType,
    user: Option<UserProfile>,
    extended_props: ExtendedProps,
}

impl From<ReservationListing> for CalendarEntry {
    fn from(listing: ReservationListing) -> Self {
        let row = listing.row;
        Self {
            reservation: ReservationJson::from(&row.reservation),
            title: row.game.name.clone(),
            extended_props: ExtendedProps {
                system: row.system_type.name.clone(),
            },
            game: row.game,
            game_system: row.game_system,
            system_type: row.system_type,
            user: listing.user,
        }
    }
}

fn command_json(result: CommandResult) -> Value {
    let mut body = json!({ "success": result.success, "message": result.message });
    let Some(outcome) = result.outcome else {
        return body;
    };
    let (key, value) = match outcome {
        Outcome::Reservation(r) => ("reservation", serde_json::to_value(ReservationJson::from(&r))),
        Outcome::SystemType(t) => ("systemType", serde_json::to_value(t)),
        Outcome::GameSystem(s) => ("gameSystem", serde_json::to_value(s)),
        Outcome::Game(g) => ("game", serde_json::to_value(g)),
        Outcome::Removed(id) => ("id", serde_json::to_value(id)),
        Outcome::WeeklyNotice(n) => ("weeklyNotice", serde_json::to_value(n)),
    };
    if let Ok(value) = value {
        body[key] = value;
    }
    body
}

/// Run a command under the caller's session. `policy` is checked before
/// `build` reads the path and body, so an unauthorized caller gets the
/// structured refusal whatever they sent. The commit happens in its own
/// task so a client hanging up cannot cut it short between log and memory.
async fn run(
    state: &AppState,
    headers: &HeaderMap,
    policy: Policy,
    build: impl FnOnce() -> Result<Command, ApiError>,
) -> Result<Json<Value>, ApiError> {
    let ctx = state.booker.context(bearer(headers), state.request_timeout).await;
    if let Err(refused) = ctx.admit(policy) {
        return Ok(Json(command_json(refused)));
    }
    let cmd = build()?;
    let booker = state.booker.clone();
    let result = tokio::spawn(async move { booker.execute(&ctx, cmd).await })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(command_json(result)))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

// ── Queries ──────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<Value> {
    let engine = state.booker.engine();
    Json(json!({
        "status": "ok",
        "reservations": engine.reservation_count(),
        "walAppendsSinceCompact": engine.wal_appends_since_compact().await,
    }))
}

#[derive(Debug, Deserialize)]
struct WindowParams {
    start: Option<String>,
    end: Option<String>,
}

impl WindowParams {
    fn bounds(&self) -> Result<(Option<Ms>, Option<Ms>), ApiError> {
        let start = self.start.as_deref().map(|s| parse_instant("start", s)).transpose()?;
        let end = self.end.as_deref().map(|s| parse_instant("end", s)).transpose()?;
        Ok((start, end))
    }
}

async fn availability(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Value>, ApiError> {
    let (Some(start), Some(end)) = params.bounds()? else {
        return Err(ApiError::BadRequest("start and end are required".into()));
    };
    let ctx = state.booker.context(None, state.request_timeout).await;
    let view = state.booker.availability(&ctx, start, end).await?;
    Ok(Json(json!({ "availableToReserve": view })))
}

async fn list_reservations(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Vec<CalendarEntry>>, ApiError> {
    let (start, end) = params.bounds()?;
    let ctx = state.booker.context(None, state.request_timeout).await;
    let listings = state.booker.reservations(&ctx, start, end).await?;
    Ok(Json(listings.into_iter().map(CalendarEntry::from).collect()))
}

/// Server-sent change feed: one event per committed change, named after it.
async fn reservation_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.booker.engine().notify.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = match rx.recv().await {
            Ok(event) => SseEvent::default().event(event.label()).data("refresh"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                SseEvent::default().event("lagged").data(missed.to_string())
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        };
        Some((Ok(event), rx))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn list_system_types(State(state): State<AppState>) -> Json<Vec<SystemType>> {
    Json(state.booker.engine().list_system_types())
}

async fn list_systems(State(state): State<AppState>) -> Result<Json<Vec<GameSystemInfo>>, ApiError> {
    let ctx = state.booker.context(None, state.request_timeout).await;
    Ok(Json(state.booker.engine().list_game_systems(ctx.deadline).await?))
}

async fn list_games(State(state): State<AppState>) -> Result<Json<Vec<GameInfo>>, ApiError> {
    let ctx = state.booker.context(None, state.request_timeout).await;
    Ok(Json(state.booker.engine().list_games(ctx.deadline).await?))
}

// ── Commands ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateReservationBody {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    game_id: Ulid,
    game_system_id: Ulid,
    #[serde(alias = "userId")]
    on_behalf_of_user_id: Option<UserId>,
}

async fn create_reservation(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateReservationBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    run(&state, &headers, Policy::RESERVE, move || {
        let req = body(payload)?;
        Ok(Command::CreateReservation {
            user_id: req.on_behalf_of_user_id,
            start: req.start.timestamp_millis(),
            end: req.end.timestamp_millis(),
            game_system_id: req.game_system_id,
            game_id: req.game_id,
        })
    })
    .await
}

async fn cancel_reservation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    run(&state, &headers, Policy::CANCEL, move || {
        Ok(Command::CancelReservation { id: parse_id(&id)? })
    })
    .await
}

#[derive(Debug, Deserialize)]
struct NameBody {
    name: String,
}

async fn create_system_type(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NameBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    run(&state, &headers, Policy::MANAGE_CATALOG, move || {
        Ok(Command::CreateSystemType {
            name: body(payload)?.name,
        })
    })
    .await
}

async fn rename_system_type(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<NameBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    run(&state, &headers, Policy::MANAGE_CATALOG, move || {
        let id = parse_id(&id)?;
        let name = body(payload)?.name;
        Ok(Command::RenameSystemType { id, name })
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSystemBody {
    name: String,
    system_type_id: Ulid,
}

async fn create_system(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateSystemBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    run(&state, &headers, Policy::MANAGE_CATALOG, move || {
        let req = body(payload)?;
        Ok(Command::CreateGameSystem {
            name: req.name,
            system_type_id: req.system_type_id,
        })
    })
    .await
}

async fn update_system(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<SystemPatch>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    run(&state, &headers, Policy::MANAGE_CATALOG, move || {
        let id = parse_id(&id)?;
        let patch = body(payload)?;
        Ok(Command::UpdateGameSystem { id, patch })
    })
    .await
}

async fn delete_system(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    run(&state, &headers, Policy::MANAGE_CATALOG, move || {
        Ok(Command::DeleteGameSystem { id: parse_id(&id)? })
    })
    .await
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGameBody {
    name: String,
    system_type_id: Ulid,
    #[serde(default = "default_quantity")]
    quantity: u32,
}

async fn create_game(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateGameBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    run(&state, &headers, Policy::MANAGE_CATALOG, move || {
        let req = body(payload)?;
        Ok(Command::CreateGame {
            name: req.name,
            system_type_id: req.system_type_id,
            quantity: req.quantity,
        })
    })
    .await
}

async fn update_game(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<GamePatch>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    run(&state, &headers, Policy::MANAGE_CATALOG, move || {
        let id = parse_id(&id)?;
        let patch = body(payload)?;
        Ok(Command::UpdateGame { id, patch })
    })
    .await
}

async fn delete_game(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    run(&state, &headers, Policy::MANAGE_CATALOG, move || {
        Ok(Command::DeleteGame { id: parse_id(&id)? })
    })
    .await
}

/// The current weekly notice, or `null` before anyone has written one.
async fn weekly_notice(State(state): State<AppState>) -> Json<Option<WeeklyNotice>> {
    Json(state.booker.weekly_notice())
}

#[derive(Debug, Deserialize)]
struct NoticeBody {
    content: String,
}

async fn update_weekly_notice(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NoticeBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    run(&state, &headers, Policy::MANAGE_NOTICE, move || {
        Ok(Command::UpdateWeeklyNotice {
            content: body(payload)?.content,
        })
    })
    .await
}
