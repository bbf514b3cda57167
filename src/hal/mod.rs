// Capability layer: digital I/O, PWM output and analog input
//
// Every capability is a trait with two implementations: a hardware-backed one
// (Raspberry Pi GPIO + ADS1015 over I2C, behind the `hardware` feature) and a
// deterministic simulated one. A `Board` hands out capability handles and is
// chosen exactly once, when it is opened.

pub mod ads1015;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod rpi;
pub mod simulated;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use simulated::SimulatedBoard;

/// Input channels on the analog converter (ADS1015: AIN0..AIN3)
pub const ADC_CHANNELS: u8 = 4;

/// GPIO line identifier (BCM numbering), written as a numeric string in config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PinId(u8);

impl PinId {
    pub const fn new(number: u8) -> Self {
        Self(number)
    }

    pub fn number(self) -> u8 {
        self.0
    }
}

impl FromStr for PinId {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(HalError::InvalidPin(s.to_string()));
        }
        s.parse::<u8>()
            .map(PinId)
            .map_err(|_| HalError::InvalidPin(s.to_string()))
    }
}

impl TryFrom<String> for PinId {
    type Error = HalError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PinId> for String {
    fn from(pin: PinId) -> Self {
        pin.0.to_string()
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

/// Internal pull resistor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pull {
    #[default]
    None,
    Up,
    Down,
}

/// Which capability implementation a board is built on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Hardware,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HalError {
    #[error("{resource} is not configured")]
    NotConfigured { resource: String },

    #[error("pin {pin} is configured as {actual:?}, cannot use it as {wanted:?}")]
    WrongDirection {
        pin: PinId,
        actual: Direction,
        wanted: Direction,
    },

    #[error("{what} {value} is outside {min}..={max}")]
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("PWM already started on pin {pin}, stop it first")]
    AlreadyStarted { pin: PinId },

    #[error("pin {pin} is already claimed by another capability")]
    PinInUse { pin: PinId },

    #[error("analog converter is already claimed")]
    AdcInUse,

    #[error("invalid pin identifier {0:?}, expected a numeric string")]
    InvalidPin(String),

    #[error("hardware driver error: {0}")]
    Driver(String),
}

pub type Result<T> = std::result::Result<T, HalError>;

/// Boolean GPIO line
pub trait DigitalPin: Send {
    fn id(&self) -> PinId;

    /// Set direction and pull. May be called again to reconfigure.
    fn configure(&mut self, direction: Direction, pull: Pull) -> Result<()>;

    /// Drive an output pin high (`true`) or low
    fn write(&mut self, high: bool) -> Result<()>;

    /// Sample an input pin
    fn read(&mut self) -> Result<bool>;

    /// Give the line back. Every later call fails with `NotConfigured`.
    fn release(&mut self) -> Result<()>;
}

/// Periodic pulse output on one pin
///
/// `start` opens a session at a frequency with 0% duty. A second `start`
/// fails with `AlreadyStarted` until `stop` ends the session.
pub trait PwmOutput: Send {
    fn id(&self) -> PinId;

    fn start(&mut self, frequency_hz: f64) -> Result<()>;

    /// Duty cycle in percent, 0..=100. Requires a running session.
    fn set_duty_cycle(&mut self, percent: f64) -> Result<()>;

    /// End the session and drive the pin low. No-op when idle.
    fn stop(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Last duty cycle written in the current session, 0 when idle
    fn duty_cycle(&self) -> f64;

    fn release(&mut self) -> Result<()>;
}

/// Multi-channel analog-to-digital converter
pub trait AnalogInput: Send {
    fn configure(&mut self) -> Result<()>;

    fn channel_count(&self) -> u8;

    /// Channel voltage in volts
    fn read_voltage(&mut self, channel: u8) -> Result<f64>;

    /// Raw 12-bit conversion result
    fn read_raw(&mut self, channel: u8) -> Result<u16>;

    fn release(&mut self) -> Result<()>;
}

/// Source of capability handles for one physical (or simulated) board
pub trait Board: Send {
    fn backend(&self) -> Backend;

    fn digital_pin(&mut self, pin: PinId) -> Result<Box<dyn DigitalPin>>;

    fn pwm_output(&mut self, pin: PinId) -> Result<Box<dyn PwmOutput>>;

    fn analog_input(&mut self) -> Result<Box<dyn AnalogInput>>;

    /// Final teardown, after every handle has been released
    fn shutdown(&mut self) -> Result<()>;
}

/// Open a board for `backend`.
///
/// If the hardware drivers cannot be acquired the simulated board is returned
/// instead. This is the only place the substitution happens.
pub fn open_board(backend: Backend) -> Box<dyn Board> {
    match backend {
        Backend::Simulated => {
            info!("Using simulated capabilities");
            Box::new(SimulatedBoard::new())
        }
        Backend::Hardware => match open_hardware_board() {
            Ok(board) => {
                info!("Hardware capabilities acquired");
                board
            }
            Err(e) => {
                warn!(
                    "Hardware unavailable ({}), DEGRADED MODE: running on simulated capabilities",
                    e
                );
                Box::new(SimulatedBoard::new())
            }
        },
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn open_hardware_board() -> Result<Box<dyn Board>> {
    Ok(Box::new(rpi::RaspberryPiBoard::open()?))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn open_hardware_board() -> Result<Box<dyn Board>> {
    Err(HalError::Driver(
        "built without the `hardware` feature".to_string(),
    ))
}

/// Pins handed out by one board; a line can back only one live capability
#[derive(Debug, Default)]
pub(crate) struct PinClaims {
    claimed: BTreeSet<PinId>,
}

impl PinClaims {
    pub(crate) fn claim(&mut self, pin: PinId) -> Result<()> {
        if !self.claimed.insert(pin) {
            return Err(HalError::PinInUse { pin });
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.claimed.len()
    }
}

/// Reject PWM duty cycles outside 0..=100
pub(crate) fn check_duty_cycle(percent: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(HalError::OutOfRange {
            what: "duty cycle",
            value: percent,
            min: 0.0,
            max: 100.0,
        });
    }
    Ok(())
}

pub(crate) fn check_channel(channel: u8, count: u8) -> Result<()> {
    if channel >= count {
        return Err(HalError::OutOfRange {
            what: "ADC channel",
            value: f64::from(channel),
            min: 0.0,
            max: f64::from(count.saturating_sub(1)),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_id_parsing() {
        assert_eq!("13".parse::<PinId>().unwrap(), PinId::new(13));
        assert_eq!("0".parse::<PinId>().unwrap().number(), 0);
        assert!(matches!("P13".parse::<PinId>(), Err(HalError::InvalidPin(_))));
        assert!("".parse::<PinId>().is_err());
        assert!("-1".parse::<PinId>().is_err());
        assert!("300".parse::<PinId>().is_err());
    }

    #[test]
    fn test_pin_id_serde_as_string() {
        let pin: PinId = serde_json::from_str("\"24\"").unwrap();
        assert_eq!(pin, PinId::new(24));
        assert_eq!(serde_json::to_string(&pin).unwrap(), "\"24\"");
        assert!(serde_json::from_str::<PinId>("\"D4\"").is_err());
    }

    #[test]
    fn test_pin_claims_reject_alias() {
        let mut claims = PinClaims::default();
        claims.claim(PinId::new(5)).unwrap();
        assert_eq!(
            claims.claim(PinId::new(5)),
            Err(HalError::PinInUse { pin: PinId::new(5) })
        );
        assert_eq!(claims.len(), 1);
    }

    #[test]
    fn test_simulated_backend_is_explicit() {
        let board = open_board(Backend::Simulated);
        assert_eq!(board.backend(), Backend::Simulated);
    }

    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    #[test]
    fn test_hardware_request_degrades_to_simulation() {
        let board = open_board(Backend::Hardware);
        assert_eq!(board.backend(), Backend::Simulated);
    }

    #[test]
    fn test_duty_and_channel_checks() {
        assert!(check_duty_cycle(0.0).is_ok());
        assert!(check_duty_cycle(100.0).is_ok());
        assert!(check_duty_cycle(100.5).is_err());
        assert!(check_duty_cycle(-0.1).is_err());
        assert!(check_duty_cycle(f64::NAN).is_err());
        assert!(check_channel(3, ADC_CHANNELS).is_ok());
        assert!(matches!(
            check_channel(4, ADC_CHANNELS),
            Err(HalError::OutOfRange { .. })
        ));
    }
}
