use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::scanner::RoundReport;
use crate::state::{Controller, RoundPhase, StartError};

pub fn router(controller: Arc<Controller>, auth_token: Option<String>) -> Router {
    Router::new()
        .route("/start", post(start_round))
        .route("/stop", post(stop_round))
        .route("/status", get(get_status))
        .with_state(ApiState {
            controller,
            auth_token: auth_token.map(Arc::from),
        })
}

#[derive(Clone)]
struct ApiState {
    controller: Arc<Controller>,
    auth_token: Option<Arc<str>>,
}

impl ApiState {
    fn authorize(&self, headers: &HeaderMap) -> Result<(), StatusCode> {
        match &self.auth_token {
            Some(token) => check_auth(headers, token),
            None => Ok(()),
        }
    }
}

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if let Some(token) = auth.strip_prefix("Bearer ")
        && token == expected_token
    {
        return Ok(());
    }

    Err(StatusCode::UNAUTHORIZED)
}

async fn start_round(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    api.authorize(&headers)?;

    match api.controller.start_round() {
        // The round reports through the status sink; nobody awaits the handle.
        Ok(_handle) => Ok(Json(json!({"status": "started"}))),
        Err(StartError::AlreadyRunning) => Err(StatusCode::CONFLICT),
    }
}

async fn stop_round(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    api.authorize(&headers)?;

    api.controller.request_cancel();
    Ok(Json(json!({"status": "stopping"})))
}

#[derive(Serialize)]
struct StatusResponse {
    phase: RoundPhase,
    running: bool,
    message: Option<String>,
    last_report: Option<RoundReport>,
}

async fn get_status(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    api.authorize(&headers)?;

    let snapshot = api.controller.status();
    Ok(Json(StatusResponse {
        phase: snapshot.phase,
        running: api.controller.is_running(),
        message: snapshot.messages.back().cloned(),
        last_report: snapshot.last_report,
    }))
}
