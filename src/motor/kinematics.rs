// Differential steering for the two rear drive wheels
// Converts a drive command (direction, speed, steering angle) to per-motor speeds.
//
// The motors face each other on the axle, so driving straight means opposite
// electrical polarity: forward is left = +speed, right = -speed.

/// Largest steering angle the front servo accepts (degrees, either side)
pub const MAX_STEERING_ANGLE: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive {
    Forward,
    Backward,
}

/// Signed motor speeds in percent, as handed to `DcMotor::set_speed`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelSpeeds {
    pub left: f64,
    pub right: f64,
}

impl WheelSpeeds {
    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Returns speeds as array [left, right]
    pub fn as_array(&self) -> [f64; 2] {
        [self.left, self.right]
    }
}

/// Inner-wheel speed for a turn: `speed * (100 - |angle|) / 100`
///
/// Multiplying before dividing keeps whole-number inputs exact
/// (80 at 30 degrees gives 56, not 55.99...).
fn inner_wheel(speed: f64, steering_angle: f64) -> f64 {
    speed * (100.0 - steering_angle.abs()) / 100.0
}

/// Convert a drive command to motor speeds
///
/// # Arguments
/// * `drive` - Forward or backward
/// * `speed` - Magnitude in percent (0..=100)
/// * `steering_angle` - Degrees, positive = right turn
///
/// # Returns
/// Signed speeds for the left and right motors. On a turn the outer wheel
/// keeps full speed and the inner wheel is scaled down.
pub fn differential_speeds(drive: Drive, speed: f64, steering_angle: f64) -> WheelSpeeds {
    let (left, right) = if steering_angle > 0.0 {
        // Right turn: left wheel is inner when going forward
        let inner = inner_wheel(speed, steering_angle);
        match drive {
            Drive::Forward => (inner, -speed),
            Drive::Backward => (-speed, inner),
        }
    } else if steering_angle < 0.0 {
        let inner = inner_wheel(speed, steering_angle);
        match drive {
            Drive::Forward => (speed, -inner),
            Drive::Backward => (-inner, speed),
        }
    } else {
        match drive {
            Drive::Forward => (speed, -speed),
            Drive::Backward => (-speed, speed),
        }
    };
    WheelSpeeds::new(left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_speed() {
        let wheels = differential_speeds(Drive::Forward, 0.0, 0.0);
        assert_eq!(wheels.left, 0.0);
        assert_eq!(wheels.right, 0.0);
        assert_eq!(WheelSpeeds::zero().as_array(), [0.0, 0.0]);
    }

    #[test]
    fn test_straight_motion() {
        // Facing motors: straight travel needs opposite polarity
        let fwd = differential_speeds(Drive::Forward, 60.0, 0.0);
        assert_eq!(fwd.as_array(), [60.0, -60.0]);

        let back = differential_speeds(Drive::Backward, 60.0, 0.0);
        assert_eq!(back.as_array(), [-60.0, 60.0]);
    }

    #[test]
    fn test_right_turn_at_max_steering() {
        let wheels = differential_speeds(Drive::Forward, 80.0, MAX_STEERING_ANGLE);
        // Inner wheel: 80 * (100 - 30) / 100
        assert_eq!(wheels.left, 56.0);
        // Outer wheel keeps full speed, opposite polarity
        assert_eq!(wheels.right, -80.0);
    }

    #[test]
    fn test_left_turn_mirrors_right_turn() {
        let wheels = differential_speeds(Drive::Forward, 80.0, -MAX_STEERING_ANGLE);
        assert_eq!(wheels.left, 80.0);
        assert_eq!(wheels.right, -56.0);
    }

    #[test]
    fn test_backward_turns_mirror_signs() {
        let right = differential_speeds(Drive::Backward, 80.0, 30.0);
        assert_eq!(right.as_array(), [-80.0, 56.0]);

        let left = differential_speeds(Drive::Backward, 80.0, -30.0);
        assert_eq!(left.as_array(), [-56.0, 80.0]);
    }

    #[test]
    fn test_outputs_stay_in_motor_range() {
        for angle in [-30.0, -15.5, -1.0, 0.0, 1.0, 12.0, 30.0] {
            for speed in [0.0, 1.0, 50.0, 100.0] {
                for drive in [Drive::Forward, Drive::Backward] {
                    let w = differential_speeds(drive, speed, angle);
                    assert!(
                        w.left.abs() <= 100.0 && w.right.abs() <= 100.0,
                        "{:?} speed {} angle {} gave {:?}",
                        drive,
                        speed,
                        angle,
                        w
                    );
                    // Inner wheel never outruns the outer one
                    assert!(w.left.abs() <= speed && w.right.abs() <= speed);
                }
            }
        }
    }
}
