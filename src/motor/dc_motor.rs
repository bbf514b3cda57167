// DC motor on an H-bridge: one PWM line for power, one GPIO line for direction

use tracing::{debug, info};

use crate::device::{validate_range, DeviceError, Result};
use crate::hal::{DigitalPin, Direction, Pull, PwmOutput};

pub const MIN_SPEED: f64 = -100.0;
pub const MAX_SPEED: f64 = 100.0;

/// Default PWM frequency for the drive motors
pub const DEFAULT_FREQUENCY_HZ: f64 = 1000.0;

/// Speed-controlled DC motor
///
/// Speed is a signed percentage. The sign selects the direction pin level
/// (low for forward, high for reverse) and the magnitude becomes the duty cycle.
pub struct DcMotor {
    pwm: Box<dyn PwmOutput>,
    direction: Box<dyn DigitalPin>,
    frequency_hz: f64,
    speed: f64,
    offset: f64,
    duty_cycle: f64,
}

impl DcMotor {
    /// Take ownership of the power and direction lines and park the motor
    pub fn new(
        pwm: Box<dyn PwmOutput>,
        mut direction: Box<dyn DigitalPin>,
        frequency_hz: f64,
    ) -> Result<Self> {
        direction.configure(Direction::Output, Pull::None)?;
        direction.write(false)?;
        info!(
            "DC motor initialized on PWM {}, DIR {}",
            pwm.id(),
            direction.id()
        );
        Ok(Self {
            pwm,
            direction,
            frequency_hz,
            speed: 0.0,
            offset: 0.0,
            duty_cycle: 0.0,
        })
    }

    /// Set speed in -100..=100
    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        validate_range("speed", speed, MIN_SPEED, MAX_SPEED)?;

        let adjusted = (speed + self.offset).clamp(MIN_SPEED, MAX_SPEED);
        self.direction.write(adjusted < 0.0)?;

        let duty = adjusted.abs();
        if duty > 0.0 {
            if !self.pwm.is_running() {
                self.pwm.start(self.frequency_hz)?;
            }
            self.pwm.set_duty_cycle(duty)?;
        } else if self.pwm.is_running() {
            self.pwm.stop()?;
        }

        self.duty_cycle = duty;
        self.speed = speed;
        debug!("Motor speed set to {} (adjusted: {})", speed, adjusted);
        Ok(())
    }

    /// Cut power immediately
    pub fn stop(&mut self) -> Result<()> {
        self.pwm.stop()?;
        self.speed = 0.0;
        self.duty_cycle = 0.0;
        debug!("Motor stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.pwm.is_running()
    }

    /// Offset added to every commanded speed before clamping
    pub fn calibrate(&mut self, offset: f64) -> Result<()> {
        validate_range("calibration offset", offset, MIN_SPEED, MAX_SPEED)?;
        self.offset = offset;
        info!("Motor calibrated with offset: {}", offset);
        Ok(())
    }

    /// Last commanded speed (before calibration)
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Duty cycle currently applied, in percent
    pub fn duty_cycle(&self) -> f64 {
        self.duty_cycle
    }

    pub fn calibration(&self) -> f64 {
        self.offset
    }

    pub fn pwm(&self) -> &dyn PwmOutput {
        self.pwm.as_ref()
    }

    /// Stop, then give both lines back. Both releases are attempted.
    pub fn release(&mut self) -> Result<()> {
        let stopped = self.stop();
        let pwm = self.pwm.release();
        let dir = self.direction.release();
        info!("Motor resources released");
        stopped
            .and(pwm.map_err(DeviceError::from))
            .and(dir.map_err(DeviceError::from))
    }
}
