// Errors and input checks shared by actuators and sensors

use crate::hal::HalError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("{name} {value} must be between {min} and {max}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{name} must be a finite number")]
    NotFinite { name: &'static str },

    #[error("{name} range is empty: min {min} must be below max {max}")]
    EmptyRange {
        name: &'static str,
        min: f64,
        max: f64,
    },

    #[error("expected {expected} reference values, got {got}")]
    ReferenceCount { expected: usize, got: usize },

    #[error("at least one channel is required")]
    NoChannels,

    #[error(transparent)]
    Hal(#[from] HalError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Check that `value` is a number inside `min..=max`
pub fn validate_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(DeviceError::NotFinite { name });
    }
    if value < min || value > max {
        return Err(DeviceError::OutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_range() {
        assert!(validate_range("speed", 0.0, -100.0, 100.0).is_ok());
        assert!(validate_range("speed", -100.0, -100.0, 100.0).is_ok());
        assert!(validate_range("speed", 100.0, -100.0, 100.0).is_ok());
        assert_eq!(
            validate_range("speed", 100.5, -100.0, 100.0),
            Err(DeviceError::OutOfRange {
                name: "speed",
                value: 100.5,
                min: -100.0,
                max: 100.0
            })
        );
        assert_eq!(
            validate_range("angle", f64::NAN, -30.0, 30.0),
            Err(DeviceError::NotFinite { name: "angle" })
        );
        assert!(validate_range("angle", f64::INFINITY, -30.0, 30.0).is_err());
    }

    #[test]
    fn test_error_messages() {
        let e = DeviceError::OutOfRange {
            name: "speed",
            value: 120.0,
            min: -100.0,
            max: 100.0,
        };
        assert_eq!(e.to_string(), "speed 120 must be between -100 and 100");
    }
}
