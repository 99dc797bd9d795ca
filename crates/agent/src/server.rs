//! Agent HTTP surface
//!
//! The RPC endpoints the controller drives: status, screenshot, input
//! actions, game launch, process listing, and game status. Launch and
//! terminate serialize on the game session; screenshot and input act on
//! the desktop directly and may interleave with them.

use crate::desktop::Desktop;
use crate::session::GameSession;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use playtest_common::protocol::{
    ActionRequest, ActionResponse, ErrorBody, GameStatusResponse, LaunchRequest, LaunchResponse,
    ProcessListResponse, StatusResponse,
};
use playtest_common::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<GameSession>,
    pub desktop: Arc<dyn Desktop>,
}

/// API error carrying the HTTP status and a JSON error body.
struct ApiError {
    code: StatusCode,
    message: String,
}

impl ApiError {
    fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn internal(e: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code, Json(ErrorBody::new(self.message))).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::Process(msg) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, msg),
            other => ApiError::internal(other),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/health", get(status))
        .route("/screenshot", get(screenshot))
        .route("/launch", post(launch))
        .route("/action", post(action))
        .route("/processes", get(processes))
        .route("/game_status", get(game_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running".to_string(),
    })
}

async fn screenshot(State(state): State<AppState>) -> Result<Response, ApiError> {
    let desktop = state.desktop.clone();
    let png = tokio::task::spawn_blocking(move || desktop.capture_screen())
        .await
        .map_err(ApiError::internal)??;
    info!("Screenshot captured ({} bytes)", png.len());
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn launch(
    State(state): State<AppState>,
    Json(request): Json<LaunchRequest>,
) -> Result<Json<LaunchResponse>, ApiError> {
    if request.path.is_empty() || !Path::new(&request.path).exists() {
        error!("Game path not found: {}", request.path);
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "Game executable not found",
        ));
    }

    let response = state
        .session
        .launch(&request.path, request.process_id.as_deref())
        .await?;
    Ok(Json(response))
}

/// Durations on the wire must be usable as `std::time::Duration`.
fn valid_duration(seconds: f64) -> bool {
    seconds.is_finite() && seconds >= 0.0
}

/// Body is parsed by hand so an unknown or malformed action type maps
/// to 400 with the shared error body instead of an extractor rejection.
async fn action(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ActionResponse>, ApiError> {
    let request: ActionRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid action: {}", e)))?;

    let durations_ok = match &request {
        ActionRequest::Click {
            move_duration,
            click_delay,
            ..
        } => valid_duration(*move_duration) && valid_duration(*click_delay),
        ActionRequest::Wait { duration } => valid_duration(*duration),
        ActionRequest::DoubleClick { move_duration, .. } => valid_duration(*move_duration),
        _ => true,
    };
    if !durations_ok {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid action: durations must be non-negative finite numbers",
        ));
    }

    let response = match request {
        ActionRequest::Click {
            x,
            y,
            move_duration,
            click_delay,
            button,
        } => {
            info!("Moving to ({}, {}) over {}s", x, y, move_duration);
            let desktop = state.desktop.clone();
            tokio::task::spawn_blocking(move || {
                desktop.move_mouse(x, y, Duration::from_secs_f64(move_duration))
            })
            .await
            .map_err(ApiError::internal)??;

            tokio::time::sleep(Duration::from_secs_f64(click_delay)).await;

            info!("{}-clicking at ({}, {})", button.as_str(), x, y);
            let desktop = state.desktop.clone();
            tokio::task::spawn_blocking(move || desktop.click(button))
                .await
                .map_err(ApiError::internal)??;

            ActionResponse {
                coordinates: Some([x, y]),
                ..ActionResponse::success(format!("{}_click", button.as_str()))
            }
        }
        ActionRequest::Key { key } => {
            info!("Pressing key: {}", key);
            let desktop = state.desktop.clone();
            let k = key.clone();
            tokio::task::spawn_blocking(move || desktop.press_key(&k))
                .await
                .map_err(ApiError::internal)??;
            ActionResponse {
                key: Some(key),
                ..ActionResponse::success("keypress")
            }
        }
        ActionRequest::Wait { duration } => {
            info!("Waiting for {} seconds", duration);
            tokio::time::sleep(Duration::from_secs_f64(duration)).await;
            ActionResponse {
                duration: Some(duration),
                ..ActionResponse::success("wait")
            }
        }
        ActionRequest::DoubleClick {
            x,
            y,
            button,
            move_duration,
        } => {
            info!("Double-{}-clicking at ({}, {})", button.as_str(), x, y);
            let desktop = state.desktop.clone();
            tokio::task::spawn_blocking(move || {
                desktop.move_mouse(x, y, Duration::from_secs_f64(move_duration))?;
                desktop.double_click(x, y, button)
            })
            .await
            .map_err(ApiError::internal)??;
            ActionResponse {
                coordinates: Some([x, y]),
                ..ActionResponse::success(format!("double_{}_click", button.as_str()))
            }
        }
        ActionRequest::Hotkey { keys } => {
            if keys.is_empty() {
                return Err(ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "No keys specified for hotkey",
                ));
            }
            info!("Pressing hotkey combination: {}", keys.join("+"));
            let desktop = state.desktop.clone();
            let ks = keys.clone();
            tokio::task::spawn_blocking(move || desktop.hotkey(&ks))
                .await
                .map_err(ApiError::internal)??;
            ActionResponse {
                keys: Some(keys),
                ..ActionResponse::success("hotkey")
            }
        }
        ActionRequest::TerminateGame => {
            let report = state.session.terminate().await?;
            ActionResponse {
                message: report.message,
                ..ActionResponse::success("terminate_game")
            }
        }
    };

    Ok(Json(response))
}

async fn processes(State(state): State<AppState>) -> Result<Json<ProcessListResponse>, ApiError> {
    let supervisor = state.session.supervisor().clone();
    let processes = tokio::task::spawn_blocking(move || supervisor.list())
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(ProcessListResponse {
        status: "success".to_string(),
        processes,
    }))
}

async fn game_status(State(state): State<AppState>) -> Result<Json<GameStatusResponse>, ApiError> {
    let game_status = state.session.status().await?;
    Ok(Json(GameStatusResponse {
        status: "success".to_string(),
        game_status,
    }))
}
