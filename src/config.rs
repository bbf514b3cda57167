// Ports, cadences, pin assignments and actuator limits
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::camera::CameraBackend;
use crate::hal::{Backend, PinId};

// Network
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const CONTROL_PORT: u16 = 8765; // commands + telemetry
pub const CAMERA_PORT: u16 = 8766; // video frames

// Telemetry broadcast rate
pub const STATUS_HZ: u64 = 10;

// Outbound messages buffered per session before that session starts dropping
pub const SESSION_QUEUE: usize = 64;
// Frames buffered per viewer; a slow viewer skips frames
pub const VIEWER_QUEUE: usize = 4;

// Drive motors
pub const MOTOR_PWM_HZ: f64 = 1000.0;

// Servo ranges (degrees)
pub const STEERING_RANGE: (f64, f64) = (-30.0, 30.0);
pub const CAMERA_PAN_RANGE: (f64, f64) = (-90.0, 90.0);
pub const CAMERA_TILT_RANGE: (f64, f64) = (-35.0, 65.0);

// Ultrasonic echo timeout, per edge
pub const ECHO_TIMEOUT: Duration = Duration::from_millis(30);

// Camera defaults
pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;
pub const FRAME_FPS: u32 = 30;
pub const JPEG_QUALITY: u8 = 80;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Power (PWM) and direction (GPIO) lines of one H-bridge channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorPins {
    pub pwm: PinId,
    pub direction: PinId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UltrasonicPins {
    pub trigger: PinId,
    pub echo: PinId,
}

/// Hardware layout of the robot. Any field missing from a config file keeps its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub backend: Backend,
    pub left_motor: MotorPins,
    pub right_motor: MotorPins,
    pub steering_servo: PinId,
    pub camera_pan_servo: PinId,
    pub camera_tilt_servo: PinId,
    pub ultrasonic: UltrasonicPins,
    pub grayscale_channels: Vec<u8>,
    /// Per-edge echo wait for the ultrasonic sensor
    pub echo_timeout_ms: u64,
    /// Offsets added to commanded motor speeds, [left, right]
    pub motor_calibration: [f64; 2],
    /// Offsets added to servo angles, [steering, pan, tilt]
    pub servo_calibration: [f64; 3],
    pub camera: CameraConfig,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Hardware,
            left_motor: MotorPins {
                pwm: PinId::new(13),
                direction: PinId::new(4),
            },
            right_motor: MotorPins {
                pwm: PinId::new(12),
                direction: PinId::new(5),
            },
            steering_servo: PinId::new(2),
            camera_pan_servo: PinId::new(0),
            camera_tilt_servo: PinId::new(1),
            ultrasonic: UltrasonicPins {
                trigger: PinId::new(23),
                echo: PinId::new(24),
            },
            grayscale_channels: vec![0, 1, 2],
            echo_timeout_ms: ECHO_TIMEOUT.as_millis() as u64,
            motor_calibration: [0.0; 2],
            servo_calibration: [0.0; 3],
            camera: CameraConfig::default(),
        }
    }
}

impl RobotConfig {
    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    /// Read a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Requested capture settings and the device candidates to try
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub backend: CameraBackend,
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub jpeg_quality: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: CameraBackend::V4l2,
            index: 0,
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            fps: FRAME_FPS,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "picarx-runtime")]
#[command(about = "PiCar-X control server with telemetry and camera streaming", long_about = None)]
pub struct Args {
    /// Address to bind both servers to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Control channel port
    #[arg(short, long, default_value_t = CONTROL_PORT)]
    pub port: u16,

    /// Camera channel port
    #[arg(long, default_value_t = CAMERA_PORT)]
    pub camera_port: u16,

    /// Use simulated capabilities and the test-pattern camera
    #[arg(long, default_value_t = false)]
    pub simulate: bool,

    /// Do not start the camera streamer
    #[arg(long, default_value_t = false)]
    pub no_camera: bool,

    /// JSON file overriding pin assignments and calibration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Requested frame width
    #[arg(long)]
    pub width: Option<u32>,

    /// Requested frame height
    #[arg(long)]
    pub height: Option<u32>,

    /// Requested capture rate
    #[arg(long)]
    pub fps: Option<u32>,
}

impl Args {
    /// Robot config from `--config` (or defaults) with command-line overrides applied
    pub fn robot_config(&self) -> Result<RobotConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RobotConfig::load(path)?,
            None => RobotConfig::default(),
        };
        if self.simulate {
            config.backend = Backend::Simulated;
            config.camera.backend = CameraBackend::TestPattern;
        }
        if let Some(width) = self.width {
            config.camera.width = width;
        }
        if let Some(height) = self.height {
            config.camera.height = height;
        }
        if let Some(fps) = self.fps {
            config.camera.fps = fps;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pins() {
        let config = RobotConfig::default();
        assert_eq!(config.left_motor.pwm, PinId::new(13));
        assert_eq!(config.right_motor.direction, PinId::new(5));
        assert_eq!(config.ultrasonic.echo, PinId::new(24));
        assert_eq!(config.grayscale_channels, vec![0, 1, 2]);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let json = r#"{
            "backend": "simulated",
            "steering_servo": "6",
            "camera": { "fps": 15 }
        }"#;
        let config: RobotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.backend, Backend::Simulated);
        assert_eq!(config.steering_servo, PinId::new(6));
        assert_eq!(config.camera.fps, 15);
        assert_eq!(config.camera.width, FRAME_WIDTH);
        assert_eq!(config.left_motor, RobotConfig::default().left_motor);
    }

    #[test]
    fn test_rejects_named_pins() {
        let json = r#"{ "steering_servo": "P2" }"#;
        assert!(serde_json::from_str::<RobotConfig>(json).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = RobotConfig::load(Path::new("/nonexistent/picarx.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_file() {
        let path = std::env::temp_dir().join(format!("picarx-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "grayscale_channels": [1, 2, 3] }"#).unwrap();
        let config = RobotConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.grayscale_channels, vec![1, 2, 3]);

        let bad = std::env::temp_dir().join(format!("picarx-bad-{}.json", std::process::id()));
        std::fs::write(&bad, "{ not json").unwrap();
        let err = RobotConfig::load(&bad).unwrap_err();
        std::fs::remove_file(&bad).unwrap();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from(["picarx-runtime", "--simulate", "--fps", "10", "--port", "9000"]);
        assert_eq!(args.port, 9000);
        assert_eq!(args.camera_port, CAMERA_PORT);
        let config = args.robot_config().unwrap();
        assert_eq!(config.backend, Backend::Simulated);
        assert_eq!(config.camera.backend, CameraBackend::TestPattern);
        assert_eq!(config.camera.fps, 10);
        assert_eq!(config.camera.height, FRAME_HEIGHT);
    }
}
