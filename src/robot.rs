// PiCar-X controller
//
// Owns every actuator and sensor plus the board they were drawn from, and
// turns drive commands into motor speeds using differential steering.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{
    RobotConfig, CAMERA_PAN_RANGE, CAMERA_TILT_RANGE, MOTOR_PWM_HZ, STEERING_RANGE,
};
use crate::device::{validate_range, DeviceError};
use crate::hal::{open_board, Backend, Board, HalError};
use crate::messages::Telemetry;
use crate::motor::{differential_speeds, DcMotor, Drive, Servo, WheelSpeeds};
use crate::sensor::{Grayscale, Ultrasonic};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RobotError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Hal(#[from] HalError),

    #[error("robot has been shut down")]
    Released,

    #[error("robot task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, RobotError>;

/// Snapshot of everything the controller has commanded
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RobotState {
    pub steering_angle: f64,
    pub camera_pan: f64,
    pub camera_tilt: f64,
    pub left_speed: f64,
    pub right_speed: f64,
}

pub struct Robot {
    left_motor: DcMotor,
    right_motor: DcMotor,
    steering: Servo,
    camera_pan: Servo,
    camera_tilt: Servo,
    ultrasonic: Ultrasonic,
    grayscale: Grayscale,
    state: RobotState,
    released: bool,
    // Declared last: handles above are released before the board shuts down
    board: Box<dyn Board>,
}

impl Robot {
    /// Open the configured backend and build the robot on it
    pub fn open(config: &RobotConfig) -> Result<Self> {
        Self::new(config, open_board(config.backend))
    }

    /// Build the robot from capabilities drawn out of `board`
    pub fn new(config: &RobotConfig, mut board: Box<dyn Board>) -> Result<Self> {
        info!("Initializing PiCar-X controller ({:?} backend)", board.backend());

        let mut left_motor = DcMotor::new(
            board.pwm_output(config.left_motor.pwm)?,
            board.digital_pin(config.left_motor.direction)?,
            MOTOR_PWM_HZ,
        )?;
        left_motor.calibrate(config.motor_calibration[0])?;

        let mut right_motor = DcMotor::new(
            board.pwm_output(config.right_motor.pwm)?,
            board.digital_pin(config.right_motor.direction)?,
            MOTOR_PWM_HZ,
        )?;
        right_motor.calibrate(config.motor_calibration[1])?;

        let mut steering = Servo::new(
            board.pwm_output(config.steering_servo)?,
            STEERING_RANGE.0,
            STEERING_RANGE.1,
        )?;
        let mut camera_pan = Servo::new(
            board.pwm_output(config.camera_pan_servo)?,
            CAMERA_PAN_RANGE.0,
            CAMERA_PAN_RANGE.1,
        )?;
        let mut camera_tilt = Servo::new(
            board.pwm_output(config.camera_tilt_servo)?,
            CAMERA_TILT_RANGE.0,
            CAMERA_TILT_RANGE.1,
        )?;
        let [steer_offset, pan_offset, tilt_offset] = config.servo_calibration;
        steering.calibrate(steer_offset)?;
        camera_pan.calibrate(pan_offset)?;
        camera_tilt.calibrate(tilt_offset)?;

        let ultrasonic = Ultrasonic::new(
            board.digital_pin(config.ultrasonic.trigger)?,
            board.digital_pin(config.ultrasonic.echo)?,
            config.echo_timeout(),
        )?;
        let grayscale = Grayscale::new(board.analog_input()?, config.grayscale_channels.clone())?;

        info!("PiCar-X controller initialized");
        Ok(Self {
            left_motor,
            right_motor,
            steering,
            camera_pan,
            camera_tilt,
            ultrasonic,
            grayscale,
            state: RobotState::default(),
            released: false,
            board,
        })
    }

    fn ensure_active(&self) -> Result<()> {
        if self.released {
            return Err(RobotError::Released);
        }
        Ok(())
    }

    fn drive(&mut self, drive: Drive, speed: f64) -> Result<()> {
        self.ensure_active()?;
        validate_range("speed", speed, 0.0, 100.0)?;

        let wheels = differential_speeds(drive, speed, self.state.steering_angle);
        self.apply(wheels)?;
        debug!(
            "Moving {:?} at speed {} with steering {}",
            drive, speed, self.state.steering_angle
        );
        Ok(())
    }

    fn apply(&mut self, wheels: WheelSpeeds) -> Result<()> {
        self.left_motor.set_speed(wheels.left)?;
        self.state.left_speed = wheels.left;
        self.right_motor.set_speed(wheels.right)?;
        self.state.right_speed = wheels.right;
        Ok(())
    }

    /// Drive forward at `speed` (0..=100), steering by the current angle
    pub fn forward(&mut self, speed: f64) -> Result<()> {
        self.drive(Drive::Forward, speed)
    }

    pub fn backward(&mut self, speed: f64) -> Result<()> {
        self.drive(Drive::Backward, speed)
    }

    /// Stop both motors
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_active()?;
        // Try both motors even if the first fails
        let left = self.left_motor.stop();
        let right = self.right_motor.stop();
        self.state.left_speed = 0.0;
        self.state.right_speed = 0.0;
        debug!("Robot stopped");
        left.and(right)?;
        Ok(())
    }

    /// Point the front wheels. Later `forward`/`backward` calls steer by this angle.
    pub fn set_steering_angle(&mut self, angle: f64) -> Result<()> {
        self.ensure_active()?;
        self.steering.set_position(angle)?;
        self.state.steering_angle = angle;
        debug!("Steering angle set to {}°", angle);
        Ok(())
    }

    pub fn set_camera_pan(&mut self, angle: f64) -> Result<()> {
        self.ensure_active()?;
        self.camera_pan.set_position(angle)?;
        self.state.camera_pan = angle;
        debug!("Camera pan set to {}°", angle);
        Ok(())
    }

    pub fn set_camera_tilt(&mut self, angle: f64) -> Result<()> {
        self.ensure_active()?;
        self.camera_tilt.set_position(angle)?;
        self.state.camera_tilt = angle;
        debug!("Camera tilt set to {}°", angle);
        Ok(())
    }

    /// Distance ahead in cm; `None` when no echo came back in time
    pub fn get_distance(&mut self) -> Result<Option<f64>> {
        self.ensure_active()?;
        Ok(self.ultrasonic.read_distance()?)
    }

    /// Line position under the grayscale array, -1.0 (left) ..= 1.0 (right)
    pub fn get_line_position(&mut self) -> Result<Option<f64>> {
        self.ensure_active()?;
        Ok(self.grayscale.get_line_position()?)
    }

    /// Sensor readings plus the current steering angle
    pub fn telemetry(&mut self) -> Result<Telemetry> {
        Ok(Telemetry {
            distance: self.get_distance()?,
            line_position: self.get_line_position()?,
            steering_angle: self.state.steering_angle,
        })
    }

    pub fn state(&self) -> RobotState {
        self.state
    }

    pub fn backend(&self) -> Backend {
        self.board.backend()
    }

    pub fn left_motor(&self) -> &DcMotor {
        &self.left_motor
    }

    pub fn right_motor(&self) -> &DcMotor {
        &self.right_motor
    }

    pub fn grayscale_mut(&mut self) -> &mut Grayscale {
        &mut self.grayscale
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stop and center steering and camera
    pub fn reset(&mut self) -> Result<()> {
        self.stop()?;
        self.set_steering_angle(0.0)?;
        self.set_camera_pan(0.0)?;
        self.set_camera_tilt(0.0)?;
        info!("Robot reset to default state");
        Ok(())
    }

    /// Reset, release every actuator and sensor, then shut the board down.
    ///
    /// Failures are logged and the remaining resources are still released.
    /// Calling it again does nothing.
    pub fn cleanup(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.reset() {
            warn!("Reset during cleanup failed: {}", e);
        }

        let steps: [(&str, std::result::Result<(), DeviceError>); 7] = [
            ("left motor", self.left_motor.release()),
            ("right motor", self.right_motor.release()),
            ("steering servo", self.steering.release()),
            ("camera pan servo", self.camera_pan.release()),
            ("camera tilt servo", self.camera_tilt.release()),
            ("ultrasonic sensor", self.ultrasonic.release()),
            ("grayscale sensor", self.grayscale.release()),
        ];
        for (name, result) in steps {
            if let Err(e) = result {
                error!("Failed to release {}: {}", name, e);
            }
        }

        if let Err(e) = self.board.shutdown() {
            error!("Failed to shut down board: {}", e);
        }
        self.released = true;
        self.state = RobotState::default();
        info!("All resources cleaned up");
    }
}

impl Drop for Robot {
    fn drop(&mut self) {
        // Never leave the wheels turning
        if self.released {
            return;
        }
        if let Err(e) = self.stop() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}
