// Actuators for the PiCar-X chassis
//
// Provides:
// - DC drive motors (speed -> direction pin + duty cycle)
// - Angle-controlled servos (steering, camera pan/tilt)
// - Differential steering kinematics

pub mod dc_motor;
pub mod kinematics;
pub mod servo;

pub use dc_motor::DcMotor;
pub use kinematics::{differential_speeds, Drive, WheelSpeeds, MAX_STEERING_ANGLE};
pub use servo::Servo;
