use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use gamebook::booking::Booker;
use gamebook::dispatch::TracingDispatcher;
use gamebook::engine::Engine;
use gamebook::gate::InMemoryGate;
use gamebook::http::{AppState, router};
use gamebook::model::{Role, UserProfile};
use gamebook::notify::NotifyHub;

fn app(name: &str) -> Router {
    let dir = std::env::temp_dir().join("gamebook_test_http");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);

    let gate = InMemoryGate::new();
    for (id, role) in [("ada", Role::User), ("sam", Role::Staff), ("root", Role::Admin)] {
        gate.insert_user(UserProfile {
            id: id.into(),
            name: id.into(),
            email: format!("{id}@example.com"),
            role,
        });
        gate.insert_session(format!("tok-{id}"), id);
    }

    let engine = Arc::new(Engine::new(path, Arc::new(NotifyHub::new()), 0).unwrap());
    let booker = Arc::new(Booker::new(engine, Arc::new(gate), Arc::new(TracingDispatcher)));
    router(AppState {
        booker,
        request_timeout: Duration::from_secs(5),
    })
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Admin-created Switch type with one system and one single-copy title.
async fn seed(app: &Router) -> (String, String) {
    let (_, t) = call(app, "POST", "/api/system-types", Some("tok-root"), Some(json!({"name": "Switch"}))).await;
    let type_id = t["systemType"]["id"].as_str().unwrap().to_string();
    let (_, s) = call(
        app,
        "POST",
        "/api/systems",
        Some("tok-root"),
        Some(json!({"name": "Switch-1", "systemTypeId": type_id})),
    )
    .await;
    let (_, g) = call(
        app,
        "POST",
        "/api/games",
        Some("tok-root"),
        Some(json!({"name": "Solo Title", "systemTypeId": type_id})),
    )
    .await;
    (
        s["gameSystem"]["id"].as_str().unwrap().to_string(),
        g["game"]["id"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app("health.wal");
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["reservations"], 0);
}

#[tokio::test]
async fn reserve_and_see_it_everywhere() {
    let app = app("reserve_flow.wal");
    let (system_id, game_id) = seed(&app).await;

    let (status, body) = call(
        &app,
        "GET",
        "/api/availability?start=2026-01-01T10:00:00Z&end=2026-01-01T11:00:00Z",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["availableToReserve"]["Switch"][0]["name"], "Solo Title");
    assert_eq!(body["availableToReserve"]["Switch"][0]["quantity"], 1);

    let (status, body) = call(
        &app,
        "POST",
        "/api/reservations",
        Some("tok-ada"),
        Some(json!({
            "start": "2026-01-01T10:00:00Z",
            "end": "2026-01-01T11:00:00Z",
            "gameId": game_id,
            "gameSystemId": system_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true, "{body}");
    assert_eq!(body["message"], "Reservation created!");
    assert_eq!(body["reservation"]["userId"], "ada");
    assert_eq!(body["reservation"]["start"], "2026-01-01T10:00:00.000Z");

    // Occupied until 11:30 with the cleanup buffer.
    let (_, body) = call(
        &app,
        "GET",
        "/api/availability?start=2026-01-01T11:00:00Z&end=2026-01-01T12:00:00Z",
        None,
        None,
    )
    .await;
    assert_eq!(body["availableToReserve"], json!({}));

    let (status, body) = call(&app, "GET", "/api/reservations", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["title"], "Solo Title");
    assert_eq!(entries[0]["extendedProps"]["system"], "Switch");
    assert_eq!(entries[0]["gameSystem"]["name"], "Switch-1");
    assert_eq!(entries[0]["user"]["email"], "ada@example.com");
    assert_eq!(entries[0]["end"], "2026-01-01T11:00:00.000Z");
}

#[tokio::test]
async fn conflicting_reservation_is_a_soft_failure() {
    let app = app("soft_failure.wal");
    let (system_id, game_id) = seed(&app).await;
    let req = json!({
        "start": "2026-01-01T14:00:00Z",
        "end": "2026-01-01T15:00:00Z",
        "gameId": game_id,
        "gameSystemId": system_id,
    });

    let (_, first) = call(&app, "POST", "/api/reservations", Some("tok-ada"), Some(req.clone())).await;
    assert_eq!(first["success"], true);
    let (status, second) = call(&app, "POST", "/api/reservations", Some("tok-ada"), Some(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["success"], false);
    assert!(second["message"].as_str().unwrap().starts_with("no longer available"));
}

#[tokio::test]
async fn authorization_is_enforced() {
    let app = app("authorization.wal");
    let (system_id, game_id) = seed(&app).await;

    let (_, body) = call(&app, "POST", "/api/system-types", Some("tok-ada"), Some(json!({"name": "PS5"}))).await;
    assert_eq!(body["success"], false);

    let (_, body) = call(
        &app,
        "POST",
        "/api/reservations",
        None,
        Some(json!({
            "start": "2026-01-01T10:00:00Z",
            "end": "2026-01-01T11:00:00Z",
            "gameId": game_id,
            "gameSystemId": system_id,
        })),
    )
    .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "you must be signed in to do that");

    let (_, created) = call(
        &app,
        "POST",
        "/api/reservations",
        Some("tok-root"),
        Some(json!({
            "start": "2026-01-01T10:00:00Z",
            "end": "2026-01-01T11:00:00Z",
            "gameId": game_id,
            "gameSystemId": system_id,
            "onBehalfOfUserId": "ada",
        })),
    )
    .await;
    assert_eq!(created["reservation"]["userId"], "ada");
    let id = created["reservation"]["id"].as_str().unwrap();

    let uri = format!("/api/reservations/{id}");
    let (_, body) = call(&app, "DELETE", &uri, Some("tok-ada"), None).await;
    assert_eq!(body["success"], false);
    let (_, body) = call(&app, "DELETE", &uri, Some("tok-sam"), None).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["reservation"]["id"], id);
}

#[tokio::test]
async fn catalog_crud_and_integrity() {
    let app = app("catalog_crud.wal");
    let (system_id, game_id) = seed(&app).await;

    let (_, body) = call(
        &app,
        "PATCH",
        &format!("/api/games/{game_id}"),
        Some("tok-root"),
        Some(json!({"quantity": 3, "active": false})),
    )
    .await;
    assert_eq!(body["game"]["quantity"], 3);
    assert_eq!(body["game"]["active"], false);

    let (_, games) = call(&app, "GET", "/api/games", None, None).await;
    assert_eq!(games[0]["quantity"], 3);

    let (_, body) = call(
        &app,
        "POST",
        "/api/systems",
        Some("tok-root"),
        Some(json!({"name": "Switch-1", "systemTypeId": games[0]["systemTypeId"]})),
    )
    .await;
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("already in use"));

    // Reactivate and book it, then try to delete the system.
    call(&app, "PATCH", &format!("/api/games/{game_id}"), Some("tok-root"), Some(json!({"active": true}))).await;
    let (_, r) = call(
        &app,
        "POST",
        "/api/reservations",
        Some("tok-ada"),
        Some(json!({
            "start": "2026-01-02T10:00:00Z",
            "end": "2026-01-02T11:00:00Z",
            "gameId": game_id,
            "gameSystemId": system_id,
        })),
    )
    .await;
    assert_eq!(r["success"], true, "{r}");

    let (_, body) = call(&app, "DELETE", &format!("/api/systems/{system_id}"), Some("tok-root"), None).await;
    assert_eq!(body["success"], false);
    let (_, systems) = call(&app, "GET", "/api/systems", None, None).await;
    assert_eq!(systems.as_array().unwrap().len(), 1);

    let (_, types) = call(&app, "GET", "/api/system-types", None, None).await;
    let type_id = types[0]["id"].as_str().unwrap();
    let (_, body) = call(
        &app,
        "PATCH",
        &format!("/api/system-types/{type_id}"),
        Some("tok-root"),
        Some(json!({"name": "Switch 2"})),
    )
    .await;
    assert_eq!(body["systemType"]["name"], "Switch 2");
}

#[tokio::test]
async fn malformed_input_is_a_400() {
    let app = app("malformed.wal");

    let (status, body) = call(&app, "GET", "/api/availability?start=nope&end=2026-01-01T11:00:00Z", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = call(&app, "GET", "/api/availability?start=2026-01-01T11:00:00Z", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        "GET",
        "/api/availability?start=2026-01-01T12:00:00Z&end=2026-01-01T11:00:00Z",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().starts_with("invalid interval"));

    let (status, _) = call(&app, "DELETE", "/api/reservations/not-a-ulid", Some("tok-root"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, "POST", "/api/games", Some("tok-root"), Some(json!({"name": 5}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn refusal_comes_before_body_parsing() {
    let app = app("refusal_first.wal");

    let (status, body) = call(&app, "POST", "/api/games", None, Some(json!({"name": 5}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "you must be signed in to do that");

    let (status, body) = call(&app, "PATCH", "/api/games/not-a-ulid", Some("tok-ada"), Some(json!({"quantity": "x"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "role user is not authorized to manage the catalog");

    let (status, body) = call(&app, "DELETE", "/api/reservations/not-a-ulid", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "you must be signed in to do that");

    // An authorized caller still gets the 400.
    let (status, _) = call(&app, "PATCH", "/api/games/not-a-ulid", Some("tok-root"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn weekly_notice_read_and_replace() {
    let app = app("weekly_notice.wal");

    let (status, body) = call(&app, "GET", "/api/weekly-notice", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);

    let (_, body) = call(
        &app,
        "PUT",
        "/api/weekly-notice",
        Some("tok-sam"),
        Some(json!({"content": "Free play all week"})),
    )
    .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "role staff is not authorized to update the weekly notice");

    let (status, body) = call(
        &app,
        "PUT",
        "/api/weekly-notice",
        Some("tok-root"),
        Some(json!({"content": "Mario Kart cup on Friday"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true, "{body}");
    assert_eq!(body["message"], "Weekly notice updated!");
    assert_eq!(body["weeklyNotice"]["updatedBy"], "root");

    let (_, body) = call(&app, "GET", "/api/weekly-notice", None, None).await;
    assert_eq!(body["content"], "Mario Kart cup on Friday");
    assert_eq!(body["updatedBy"], "root");
    assert!(body["updatedAt"].is_number());
}
