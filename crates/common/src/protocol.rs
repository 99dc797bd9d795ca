//! Request/response protocol between the controller and the SUT agent
//!
//! JSON bodies for the agent's HTTP surface. Both sides deserialize
//! through these types so the wire shape lives in one place.

use serde::{Deserialize, Serialize};

/// Mouse button for click actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
        }
    }
}

fn default_move_duration() -> f64 {
    0.5
}

fn default_click_delay() -> f64 {
    1.0
}

fn default_wait_duration() -> f64 {
    1.0
}

/// An input action dispatched to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionRequest {
    Click {
        x: i32,
        y: i32,
        #[serde(default = "default_move_duration")]
        move_duration: f64,
        #[serde(default = "default_click_delay")]
        click_delay: f64,
        #[serde(default)]
        button: MouseButton,
    },
    #[serde(alias = "keypress")]
    Key { key: String },
    Wait {
        #[serde(default = "default_wait_duration")]
        duration: f64,
    },
    DoubleClick {
        x: i32,
        y: i32,
        #[serde(default)]
        button: MouseButton,
        #[serde(default = "default_move_duration")]
        move_duration: f64,
    },
    Hotkey { keys: Vec<String> },
    TerminateGame,
}

/// Outcome of an action request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub status: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<[i32; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResponse {
    pub fn success(action: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            action: action.into(),
            coordinates: None,
            key: None,
            keys: None,
            duration: None,
            message: None,
        }
    }
}

/// Body of `POST /launch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub path: String,
    /// Expected process name when it differs from the executable name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
}

/// Response of `POST /launch`.
///
/// `subprocess_pid` is always present on success; the resolved process
/// identity is present only if discovery succeeded, otherwise `warning`
/// explains the miss (which is not a launch failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchResponse {
    pub status: String,
    pub subprocess_pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_process_pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_process_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One row of `GET /processes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exe: Option<String>,
    pub create_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessListResponse {
    pub status: String,
    pub processes: Vec<ProcessInfo>,
}

/// Resolved game process details inside `GameStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameProcessInfo {
    pub pid: u32,
    pub name: String,
    pub status: String,
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// Payload of `GET /game_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStatus {
    pub subprocess_running: bool,
    pub subprocess_pid: Option<u32>,
    pub expected_process_name: Option<String>,
    pub actual_game_process: Option<GameProcessInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStatusResponse {
    pub status: String,
    pub game_status: GameStatus,
}

/// Body of `GET /status` and `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Error body shared by all endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_defaults() {
        let req: ActionRequest =
            serde_json::from_str(r#"{"type":"click","x":100,"y":200}"#).unwrap();
        match req {
            ActionRequest::Click {
                x,
                y,
                move_duration,
                click_delay,
                button,
            } => {
                assert_eq!((x, y), (100, 200));
                assert_eq!(move_duration, 0.5);
                assert_eq!(click_delay, 1.0);
                assert_eq!(button, MouseButton::Left);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_keypress_alias() {
        let req: ActionRequest =
            serde_json::from_str(r#"{"type":"keypress","key":"escape"}"#).unwrap();
        assert_eq!(
            req,
            ActionRequest::Key {
                key: "escape".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<ActionRequest>(r#"{"type":"scroll","x":1,"y":2}"#).is_err());
    }

    #[test]
    fn test_invalid_button_rejected() {
        let body = r#"{"type":"click","x":1,"y":2,"button":"middle"}"#;
        assert!(serde_json::from_str::<ActionRequest>(body).is_err());
    }

    #[test]
    fn test_terminate_game_round_trip() {
        let json = serde_json::to_string(&ActionRequest::TerminateGame).unwrap();
        assert_eq!(json, r#"{"type":"terminate_game"}"#);
    }
}
