// Hobby servo driven by a 50 Hz pulse
//
// Angle maps linearly onto a 1.0..2.0 ms pulse inside a 20 ms period.

use tracing::{debug, info};

use crate::device::{validate_range, DeviceError, Result};
use crate::hal::PwmOutput;

pub const SERVO_FREQUENCY_HZ: f64 = 50.0;
pub const PERIOD_MS: f64 = 1000.0 / SERVO_FREQUENCY_HZ;
pub const MIN_PULSE_MS: f64 = 1.0;
pub const MAX_PULSE_MS: f64 = 2.0;

pub struct Servo {
    pwm: Box<dyn PwmOutput>,
    min_angle: f64,
    max_angle: f64,
    min_pulse_ms: f64,
    max_pulse_ms: f64,
    position: f64,
    offset: f64,
    duty_cycle: f64,
}

impl Servo {
    /// Servo with an angular range of `min_angle..=max_angle` degrees
    pub fn new(pwm: Box<dyn PwmOutput>, min_angle: f64, max_angle: f64) -> Result<Self> {
        if !(min_angle.is_finite() && max_angle.is_finite() && min_angle < max_angle) {
            return Err(DeviceError::EmptyRange {
                name: "servo angle",
                min: min_angle,
                max: max_angle,
            });
        }
        info!(
            "Servo initialized on pin {} ({}° to {}°)",
            pwm.id(),
            min_angle,
            max_angle
        );
        Ok(Self {
            pwm,
            min_angle,
            max_angle,
            min_pulse_ms: MIN_PULSE_MS,
            max_pulse_ms: MAX_PULSE_MS,
            position: 0.0,
            offset: 0.0,
            duty_cycle: 0.0,
        })
    }

    /// Move to `angle` degrees. The calibration offset is added, then the
    /// result is clamped back into the servo's range.
    pub fn set_position(&mut self, angle: f64) -> Result<()> {
        validate_range("angle", angle, self.min_angle, self.max_angle)?;

        let adjusted = (angle + self.offset).clamp(self.min_angle, self.max_angle);
        let duty = self.angle_to_duty(adjusted);

        if !self.pwm.is_running() {
            self.pwm.start(SERVO_FREQUENCY_HZ)?;
        }
        self.pwm.set_duty_cycle(duty)?;

        self.duty_cycle = duty;
        self.position = angle;
        debug!("Servo position set to {}° (adjusted: {}°)", angle, adjusted);
        Ok(())
    }

    /// Last requested angle, before calibration
    pub fn get_position(&self) -> f64 {
        self.position
    }

    pub fn calibrate(&mut self, offset: f64) -> Result<()> {
        if !offset.is_finite() {
            return Err(DeviceError::NotFinite {
                name: "calibration offset",
            });
        }
        self.offset = offset;
        info!("Servo calibrated with offset: {}°", offset);
        Ok(())
    }

    /// Duty cycle for an angle already inside the range
    pub fn angle_to_duty(&self, angle: f64) -> f64 {
        let normalized = (angle - self.min_angle) / (self.max_angle - self.min_angle);
        let pulse_ms = self.min_pulse_ms + normalized * (self.max_pulse_ms - self.min_pulse_ms);
        pulse_ms / PERIOD_MS * 100.0
    }

    pub fn duty_cycle(&self) -> f64 {
        self.duty_cycle
    }

    pub fn range(&self) -> (f64, f64) {
        (self.min_angle, self.max_angle)
    }

    pub fn release(&mut self) -> Result<()> {
        self.pwm.release()?;
        info!("Servo resources released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::simulated::SimulatedPwm;
    use crate::hal::PinId;

    fn servo(min: f64, max: f64) -> Servo {
        Servo::new(Box::new(SimulatedPwm::new(PinId::new(2))), min, max).unwrap()
    }

    #[test]
    fn test_duty_cycle_endpoints() {
        let s = servo(-90.0, 90.0);
        // 1.0 ms / 20 ms and 2.0 ms / 20 ms
        assert_eq!(s.angle_to_duty(-90.0), 5.0);
        assert_eq!(s.angle_to_duty(90.0), 10.0);
        assert_eq!(s.angle_to_duty(0.0), 7.5);
    }

    #[test]
    fn test_position_round_trip() {
        let mut s = servo(-35.0, 65.0);
        s.calibrate(5.0).unwrap();
        for angle in [-35.0, -10.25, 0.0, 33.3, 62.0, 65.0] {
            s.set_position(angle).unwrap();
            assert_eq!(s.get_position(), angle);
        }
    }

    #[test]
    fn test_calibration_clamped_into_range() {
        let mut s = servo(-30.0, 30.0);
        s.calibrate(10.0).unwrap();
        s.set_position(25.0).unwrap();
        // 35 clamps to 30 -> 2.0 ms pulse
        assert_eq!(s.duty_cycle(), 10.0);
        assert_eq!(s.get_position(), 25.0);

        s.calibrate(-10.0).unwrap();
        s.set_position(-30.0).unwrap();
        assert_eq!(s.duty_cycle(), 5.0);
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let mut a = servo(-90.0, 90.0);
        let mut b = servo(-90.0, 90.0);
        a.set_position(17.3).unwrap();
        b.set_position(17.3).unwrap();
        assert_eq!(a.duty_cycle().to_bits(), b.duty_cycle().to_bits());
    }

    #[test]
    fn test_rejects_out_of_range_angle() {
        let mut s = servo(-30.0, 30.0);
        s.set_position(10.0).unwrap();
        assert!(matches!(
            s.set_position(31.0),
            Err(DeviceError::OutOfRange { .. })
        ));
        assert!(s.set_position(f64::NAN).is_err());
        assert_eq!(s.get_position(), 10.0);
    }

    #[test]
    fn test_starts_pwm_once() {
        let mut s = servo(-30.0, 30.0);
        s.set_position(0.0).unwrap();
        // Second move reuses the running session
        s.set_position(5.0).unwrap();
        assert!(s.duty_cycle() > 7.5);
    }

    #[test]
    fn test_invalid_range() {
        let pwm = Box::new(SimulatedPwm::new(PinId::new(0)));
        assert!(matches!(
            Servo::new(pwm, 10.0, 10.0),
            Err(DeviceError::EmptyRange { .. })
        ));
    }

    #[test]
    fn test_release() {
        let mut s = servo(-30.0, 30.0);
        s.set_position(0.0).unwrap();
        s.release().unwrap();
        assert!(s.set_position(0.0).is_err());
    }
}
