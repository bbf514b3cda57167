// Wire messages for the control and camera channels
// One JSON object per line in each direction.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Seconds since the Unix epoch, as carried in `timestamp` fields
pub fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Forward,
    Backward,
    #[default]
    Stop,
}

fn default_speed() -> i64 {
    50
}

/// Command from an operator -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Move {
        #[serde(default)]
        direction: MoveDirection,
        #[serde(default = "default_speed")]
        speed: i64,
    },
    Steering {
        #[serde(default)]
        angle: f64,
    },
    Camera {
        #[serde(default)]
        pan: Option<f64>,
        #[serde(default)]
        tilt: Option<f64>,
    },
    Stop,
    Status,
    Reset,
}

const COMMAND_NAMES: [&str; 6] = ["move", "steering", "camera", "stop", "status", "reset"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid JSON format")]
    InvalidJson,

    #[error("Missing command field")]
    MissingCommand,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid arguments for {command}: {reason}")]
    InvalidArguments { command: String, reason: String },
}

impl Command {
    /// Parse one inbound line.
    ///
    /// The line is first read as a generic JSON object so the error can say
    /// whether the JSON, the command name, or its arguments were wrong.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|_| ParseError::InvalidJson)?;
        let name = match value.get("command") {
            Some(serde_json::Value::String(name)) => name.clone(),
            Some(other) => return Err(ParseError::UnknownCommand(other.to_string())),
            None if value.is_object() => return Err(ParseError::MissingCommand),
            None => return Err(ParseError::InvalidJson),
        };
        if !COMMAND_NAMES.contains(&name.as_str()) {
            return Err(ParseError::UnknownCommand(name));
        }
        serde_json::from_value(value).map_err(|e| ParseError::InvalidArguments {
            command: name,
            reason: e.to_string(),
        })
    }
}

/// Command a viewer may send on the camera channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ViewerCommand {
    Snapshot,
}

/// Sensor and steering fields shared by status replies and broadcasts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub distance: Option<f64>,
    pub line_position: Option<f64>,
    pub steering_angle: f64,
}

/// Message from runtime -> operators and viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Welcome {
        message: String,
        timestamp: f64,
    },
    MoveResponse {
        direction: MoveDirection,
        speed: i64,
        success: bool,
    },
    SteeringResponse {
        angle: f64,
        success: bool,
    },
    CameraResponse {
        pan: Option<f64>,
        tilt: Option<f64>,
        success: bool,
    },
    StopResponse {
        success: bool,
    },
    StatusResponse {
        #[serde(flatten)]
        telemetry: Telemetry,
        timestamp: f64,
    },
    ResetResponse {
        success: bool,
    },
    StatusBroadcast {
        #[serde(flatten)]
        telemetry: Telemetry,
        timestamp: f64,
    },
    Error {
        message: String,
    },
    VideoFrame {
        data: String,
        timestamp: f64,
    },
    Snapshot {
        data: String,
        timestamp: f64,
    },
}

impl Message {
    pub fn error(message: impl Into<String>) -> Self {
        Message::Error {
            message: message.into(),
        }
    }

    /// Serialize as one line, without the trailing newline
    pub fn to_line(&self) -> String {
        // Every variant is plain data with string keys
        serde_json::to_string(self).unwrap_or_else(|e| fallback_error_line(&e))
    }
}

fn fallback_error_line(e: &dyn std::fmt::Display) -> String {
    serde_json::json!({"type": "error", "message": format!("serialization failed: {}", e)})
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_fallback_error_line_escapes_text() {
        let line = fallback_error_line(&r#"bad "key" \ here"#);
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], r#"serialization failed: bad "key" \ here"#);
    }

    #[test]
    fn test_parse_move() {
        let cmd = Command::parse(r#"{"command":"move","direction":"forward","speed":42}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Move {
                direction: MoveDirection::Forward,
                speed: 42
            }
        );
    }

    #[test]
    fn test_move_defaults() {
        let cmd = Command::parse(r#"{"command":"move"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Move {
                direction: MoveDirection::Stop,
                speed: 50
            }
        );
    }

    #[test]
    fn test_parse_camera_partial() {
        let cmd = Command::parse(r#"{"command":"camera","tilt":10}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Camera {
                pan: None,
                tilt: Some(10.0)
            }
        );
    }

    #[test]
    fn test_parse_unit_commands() {
        assert_eq!(Command::parse(r#"{"command":"stop"}"#).unwrap(), Command::Stop);
        assert_eq!(Command::parse(r#"{"command":"status"}"#).unwrap(), Command::Status);
        assert_eq!(Command::parse(r#"{"command":"reset"}"#).unwrap(), Command::Reset);
        assert_eq!(
            Command::parse(r#"{"command":"steering","angle":-12.5}"#).unwrap(),
            Command::Steering { angle: -12.5 }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Command::parse("{not json"), Err(ParseError::InvalidJson));
        assert_eq!(Command::parse("[1,2]"), Err(ParseError::InvalidJson));
        assert_eq!(
            Command::parse(r#"{"speed":3}"#),
            Err(ParseError::MissingCommand)
        );
        assert_eq!(
            Command::parse(r#"{"command":"dance"}"#),
            Err(ParseError::UnknownCommand("dance".to_string()))
        );
        assert_eq!(
            Command::parse(r#"{"command":"dance"}"#).unwrap_err().to_string(),
            "Unknown command: dance"
        );
        assert!(matches!(
            Command::parse(r#"{"command":"move","direction":"sideways"}"#),
            Err(ParseError::InvalidArguments { .. })
        ));
        assert!(matches!(
            Command::parse(r#"{"command":"move","speed":"fast"}"#),
            Err(ParseError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_move_response_shape() {
        let msg = Message::MoveResponse {
            direction: MoveDirection::Forward,
            speed: 42,
            success: true,
        };
        let value: Value = serde_json::from_str(&msg.to_line()).unwrap();
        assert_eq!(
            value,
            json!({"type":"move_response","direction":"forward","speed":42,"success":true})
        );
    }

    #[test]
    fn test_status_fields_are_flat() {
        let msg = Message::StatusBroadcast {
            telemetry: Telemetry {
                distance: None,
                line_position: Some(-1.0),
                steering_angle: 15.0,
            },
            timestamp: 1.5,
        };
        let value: Value = serde_json::from_str(&msg.to_line()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "status_broadcast",
                "distance": null,
                "line_position": -1.0,
                "steering_angle": 15.0,
                "timestamp": 1.5
            })
        );
    }

    #[test]
    fn test_error_message() {
        let line = Message::error("Unknown command: dance").to_line();
        assert_eq!(line, r#"{"type":"error","message":"Unknown command: dance"}"#);
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_viewer_command() {
        let cmd: ViewerCommand = serde_json::from_str(r#"{"command":"snapshot"}"#).unwrap();
        assert_eq!(cmd, ViewerCommand::Snapshot);
    }

    #[test]
    fn test_timestamp_is_recent() {
        // After 2020-01-01
        assert!(timestamp() > 1_577_836_800.0);
    }
}
