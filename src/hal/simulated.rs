// Simulated capabilities
//
// Same contracts as the hardware backend, no physics: outputs are recorded,
// inputs read their pull level, the ADC returns fixed per-channel voltages.
// All state lives in the handle that owns it.

use tracing::debug;

use super::{
    check_channel, check_duty_cycle, AnalogInput, Backend, Board, Direction, DigitalPin,
    HalError, PinClaims, PinId, Pull, PwmOutput, Result, ADC_CHANNELS,
};

/// Reference voltage of the simulated converter
pub const SIM_VREF: f64 = 3.3;

/// Voltage every simulated ADC channel reports unless overridden (mid-scale)
pub const SIM_DEFAULT_VOLTAGE: f64 = 1.65;

#[derive(Debug)]
pub struct SimulatedBoard {
    claims: PinClaims,
    adc_voltages: [f64; ADC_CHANNELS as usize],
    adc_claimed: bool,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self::with_adc_voltages([SIM_DEFAULT_VOLTAGE; ADC_CHANNELS as usize])
    }

    /// Board whose analog channels read the given voltages
    pub fn with_adc_voltages(voltages: [f64; ADC_CHANNELS as usize]) -> Self {
        Self {
            claims: PinClaims::default(),
            adc_voltages: voltages,
            adc_claimed: false,
        }
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Board for SimulatedBoard {
    fn backend(&self) -> Backend {
        Backend::Simulated
    }

    fn digital_pin(&mut self, pin: PinId) -> Result<Box<dyn DigitalPin>> {
        self.claims.claim(pin)?;
        Ok(Box::new(SimulatedPin::new(pin)))
    }

    fn pwm_output(&mut self, pin: PinId) -> Result<Box<dyn PwmOutput>> {
        self.claims.claim(pin)?;
        Ok(Box::new(SimulatedPwm::new(pin)))
    }

    fn analog_input(&mut self) -> Result<Box<dyn AnalogInput>> {
        if self.adc_claimed {
            return Err(HalError::AdcInUse);
        }
        self.adc_claimed = true;
        Ok(Box::new(SimulatedAdc::new(self.adc_voltages)))
    }

    fn shutdown(&mut self) -> Result<()> {
        debug!("Simulated board shut down");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LineState {
    Unconfigured,
    Configured {
        direction: Direction,
        pull: Pull,
        level: bool,
    },
    Released,
}

/// Simulated GPIO line
#[derive(Debug)]
pub struct SimulatedPin {
    id: PinId,
    state: LineState,
}

impl SimulatedPin {
    pub fn new(id: PinId) -> Self {
        Self {
            id,
            state: LineState::Unconfigured,
        }
    }

    /// Level last driven on an output pin
    pub fn output_level(&self) -> Option<bool> {
        match self.state {
            LineState::Configured {
                direction: Direction::Output,
                level,
                ..
            } => Some(level),
            _ => None,
        }
    }

    fn not_configured(&self) -> HalError {
        HalError::NotConfigured {
            resource: format!("pin {}", self.id),
        }
    }
}

impl DigitalPin for SimulatedPin {
    fn id(&self) -> PinId {
        self.id
    }

    fn configure(&mut self, direction: Direction, pull: Pull) -> Result<()> {
        if self.state == LineState::Released {
            return Err(self.not_configured());
        }
        // A floating input settles on its pull resistor
        let level = direction == Direction::Input && pull == Pull::Up;
        self.state = LineState::Configured {
            direction,
            pull,
            level,
        };
        debug!("Sim pin {} configured as {:?} (pull {:?})", self.id, direction, pull);
        Ok(())
    }

    fn write(&mut self, high: bool) -> Result<()> {
        match self.state {
            LineState::Configured {
                direction: Direction::Output,
                pull,
                ..
            } => {
                self.state = LineState::Configured {
                    direction: Direction::Output,
                    pull,
                    level: high,
                };
                Ok(())
            }
            LineState::Configured { direction, .. } => Err(HalError::WrongDirection {
                pin: self.id,
                actual: direction,
                wanted: Direction::Output,
            }),
            _ => Err(self.not_configured()),
        }
    }

    fn read(&mut self) -> Result<bool> {
        match self.state {
            LineState::Configured {
                direction: Direction::Input,
                level,
                ..
            } => Ok(level),
            LineState::Configured { direction, .. } => Err(HalError::WrongDirection {
                pin: self.id,
                actual: direction,
                wanted: Direction::Input,
            }),
            _ => Err(self.not_configured()),
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.state == LineState::Released {
            return Err(self.not_configured());
        }
        self.state = LineState::Released;
        debug!("Sim pin {} released", self.id);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PwmState {
    Idle,
    Running { frequency_hz: f64, duty: f64 },
    Released,
}

/// Simulated PWM channel
#[derive(Debug)]
pub struct SimulatedPwm {
    id: PinId,
    state: PwmState,
}

impl SimulatedPwm {
    pub fn new(id: PinId) -> Self {
        Self {
            id,
            state: PwmState::Idle,
        }
    }

    pub fn frequency_hz(&self) -> Option<f64> {
        match self.state {
            PwmState::Running { frequency_hz, .. } => Some(frequency_hz),
            _ => None,
        }
    }

    fn not_configured(&self) -> HalError {
        HalError::NotConfigured {
            resource: format!("PWM pin {}", self.id),
        }
    }
}

impl PwmOutput for SimulatedPwm {
    fn id(&self) -> PinId {
        self.id
    }

    fn start(&mut self, frequency_hz: f64) -> Result<()> {
        match self.state {
            PwmState::Idle => {
                if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
                    return Err(HalError::OutOfRange {
                        what: "PWM frequency",
                        value: frequency_hz,
                        min: f64::MIN_POSITIVE,
                        max: f64::MAX,
                    });
                }
                self.state = PwmState::Running {
                    frequency_hz,
                    duty: 0.0,
                };
                debug!("Sim PWM {} started at {}Hz", self.id, frequency_hz);
                Ok(())
            }
            PwmState::Running { .. } => Err(HalError::AlreadyStarted { pin: self.id }),
            PwmState::Released => Err(self.not_configured()),
        }
    }

    fn set_duty_cycle(&mut self, percent: f64) -> Result<()> {
        check_duty_cycle(percent)?;
        match self.state {
            PwmState::Running { frequency_hz, .. } => {
                self.state = PwmState::Running {
                    frequency_hz,
                    duty: percent,
                };
                Ok(())
            }
            _ => Err(self.not_configured()),
        }
    }

    fn stop(&mut self) -> Result<()> {
        match self.state {
            PwmState::Released => Err(self.not_configured()),
            _ => {
                self.state = PwmState::Idle;
                Ok(())
            }
        }
    }

    fn is_running(&self) -> bool {
        matches!(self.state, PwmState::Running { .. })
    }

    fn duty_cycle(&self) -> f64 {
        match self.state {
            PwmState::Running { duty, .. } => duty,
            _ => 0.0,
        }
    }

    fn release(&mut self) -> Result<()> {
        self.stop()?;
        self.state = PwmState::Released;
        debug!("Sim PWM {} released", self.id);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AdcState {
    Unconfigured,
    Configured,
    Released,
}

/// Simulated 4-channel converter with fixed voltages
#[derive(Debug)]
pub struct SimulatedAdc {
    voltages: [f64; ADC_CHANNELS as usize],
    state: AdcState,
}

impl SimulatedAdc {
    pub fn new(voltages: [f64; ADC_CHANNELS as usize]) -> Self {
        Self {
            voltages,
            state: AdcState::Unconfigured,
        }
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.state != AdcState::Configured {
            return Err(HalError::NotConfigured {
                resource: "ADC".to_string(),
            });
        }
        Ok(())
    }
}

impl AnalogInput for SimulatedAdc {
    fn configure(&mut self) -> Result<()> {
        if self.state == AdcState::Released {
            return Err(HalError::NotConfigured {
                resource: "ADC".to_string(),
            });
        }
        self.state = AdcState::Configured;
        Ok(())
    }

    fn channel_count(&self) -> u8 {
        ADC_CHANNELS
    }

    fn read_voltage(&mut self, channel: u8) -> Result<f64> {
        self.ensure_configured()?;
        check_channel(channel, ADC_CHANNELS)?;
        Ok(self.voltages[channel as usize])
    }

    fn read_raw(&mut self, channel: u8) -> Result<u16> {
        let volts = self.read_voltage(channel)?;
        let scaled = (volts / SIM_VREF * 4095.0).round().clamp(0.0, 4095.0);
        Ok(scaled as u16)
    }

    fn release(&mut self) -> Result<()> {
        self.ensure_configured()?;
        self.state = AdcState::Released;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(n: u8) -> PinId {
        PinId::new(n)
    }

    #[test]
    fn test_digital_pin_requires_configure() {
        let mut p = SimulatedPin::new(pin(4));
        assert!(matches!(p.write(true), Err(HalError::NotConfigured { .. })));
        assert!(matches!(p.read(), Err(HalError::NotConfigured { .. })));
    }

    #[test]
    fn test_digital_pin_direction_checks() {
        let mut out = SimulatedPin::new(pin(4));
        out.configure(Direction::Output, Pull::None).unwrap();
        out.write(true).unwrap();
        assert_eq!(out.output_level(), Some(true));
        assert!(matches!(
            out.read(),
            Err(HalError::WrongDirection {
                wanted: Direction::Input,
                ..
            })
        ));

        let mut input = SimulatedPin::new(pin(24));
        input.configure(Direction::Input, Pull::Down).unwrap();
        assert!(!input.read().unwrap());
        assert!(matches!(
            input.write(true),
            Err(HalError::WrongDirection {
                wanted: Direction::Output,
                ..
            })
        ));

        input.configure(Direction::Input, Pull::Up).unwrap();
        assert!(input.read().unwrap());
    }

    #[test]
    fn test_released_pin_is_dead() {
        let mut p = SimulatedPin::new(pin(4));
        p.configure(Direction::Output, Pull::None).unwrap();
        p.release().unwrap();
        assert!(matches!(p.write(false), Err(HalError::NotConfigured { .. })));
        assert!(matches!(
            p.configure(Direction::Output, Pull::None),
            Err(HalError::NotConfigured { .. })
        ));
        assert!(p.release().is_err());
    }

    #[test]
    fn test_pwm_session_lifecycle() {
        let mut pwm = SimulatedPwm::new(pin(13));
        assert!(matches!(
            pwm.set_duty_cycle(10.0),
            Err(HalError::NotConfigured { .. })
        ));

        pwm.start(1000.0).unwrap();
        assert!(pwm.is_running());
        assert_eq!(pwm.frequency_hz(), Some(1000.0));
        assert_eq!(
            pwm.start(1000.0),
            Err(HalError::AlreadyStarted { pin: pin(13) })
        );

        pwm.set_duty_cycle(42.0).unwrap();
        assert_eq!(pwm.duty_cycle(), 42.0);
        assert!(matches!(
            pwm.set_duty_cycle(101.0),
            Err(HalError::OutOfRange { .. })
        ));
        assert_eq!(pwm.duty_cycle(), 42.0);

        pwm.stop().unwrap();
        assert!(!pwm.is_running());
        assert_eq!(pwm.duty_cycle(), 0.0);

        // A stopped session may be started again
        pwm.start(50.0).unwrap();
        pwm.release().unwrap();
        assert!(!pwm.is_running());
        assert!(matches!(pwm.start(50.0), Err(HalError::NotConfigured { .. })));
        assert!(matches!(pwm.stop(), Err(HalError::NotConfigured { .. })));
    }

    #[test]
    fn test_adc_channels_and_values() {
        let mut adc = SimulatedAdc::new([0.0, 1.65, 3.3, 5.0]);
        assert!(matches!(
            adc.read_voltage(0),
            Err(HalError::NotConfigured { .. })
        ));
        adc.configure().unwrap();
        assert_eq!(adc.read_voltage(1).unwrap(), 1.65);
        assert_eq!(adc.read_raw(0).unwrap(), 0);
        assert_eq!(adc.read_raw(1).unwrap(), 2048);
        assert_eq!(adc.read_raw(2).unwrap(), 4095);
        assert_eq!(adc.read_raw(3).unwrap(), 4095);
        assert!(matches!(
            adc.read_voltage(4),
            Err(HalError::OutOfRange { .. })
        ));
        adc.release().unwrap();
        assert!(adc.read_voltage(0).is_err());
    }

    #[test]
    fn test_board_hands_out_each_line_once() {
        let mut board = SimulatedBoard::new();
        let _dir = board.digital_pin(pin(4)).unwrap();
        assert!(matches!(
            board.pwm_output(pin(4)),
            Err(HalError::PinInUse { .. })
        ));
        let _adc = board.analog_input().unwrap();
        assert!(matches!(board.analog_input(), Err(HalError::AdcInUse)));
    }
}
