// Raspberry Pi backend: GPIO lines and software PWM through rppal, analog
// input through an ADS1015 on the I2C bus.

use std::thread::sleep;
use std::time::Duration;

use rppal::gpio::{Bias, Gpio, IoPin, Level, Mode, OutputPin, Pin};
use rppal::i2c::I2c;
use tracing::{debug, info};

use super::ads1015;
use super::{
    check_channel, check_duty_cycle, AnalogInput, Backend, Board, Direction, DigitalPin,
    HalError, PinClaims, PinId, Pull, PwmOutput, Result, ADC_CHANNELS,
};

/// Time for one single-shot conversion at 1600 SPS, with margin
const CONVERSION_TIME: Duration = Duration::from_millis(2);

impl From<rppal::gpio::Error> for HalError {
    fn from(e: rppal::gpio::Error) -> Self {
        HalError::Driver(format!("gpio: {}", e))
    }
}

impl From<rppal::i2c::Error> for HalError {
    fn from(e: rppal::i2c::Error) -> Self {
        HalError::Driver(format!("i2c: {}", e))
    }
}

pub struct RaspberryPiBoard {
    gpio: Gpio,
    claims: PinClaims,
    adc_claimed: bool,
}

impl RaspberryPiBoard {
    /// Acquire the GPIO peripheral
    pub fn open() -> Result<Self> {
        let gpio = Gpio::new()?;
        info!("Raspberry Pi GPIO opened");
        Ok(Self {
            gpio,
            claims: PinClaims::default(),
            adc_claimed: false,
        })
    }

    fn take_pin(&mut self, pin: PinId) -> Result<Pin> {
        self.claims.claim(pin)?;
        Ok(self.gpio.get(pin.number())?)
    }
}

impl Board for RaspberryPiBoard {
    fn backend(&self) -> Backend {
        Backend::Hardware
    }

    fn digital_pin(&mut self, pin: PinId) -> Result<Box<dyn DigitalPin>> {
        let line = self.take_pin(pin)?;
        Ok(Box::new(RpiDigitalPin {
            id: pin,
            line: Line::Claimed(line),
        }))
    }

    fn pwm_output(&mut self, pin: PinId) -> Result<Box<dyn PwmOutput>> {
        let out = self.take_pin(pin)?.into_output_low();
        Ok(Box::new(RpiPwm {
            id: pin,
            out: Some(out),
            session: None,
        }))
    }

    fn analog_input(&mut self) -> Result<Box<dyn AnalogInput>> {
        if self.adc_claimed {
            return Err(HalError::AdcInUse);
        }
        let i2c = I2c::new()?;
        self.adc_claimed = true;
        Ok(Box::new(Ads1015Input {
            i2c: Some(i2c),
            address: ads1015::DEFAULT_ADDRESS,
            configured: false,
        }))
    }

    fn shutdown(&mut self) -> Result<()> {
        // Pins reset themselves when their handles drop
        info!("Raspberry Pi board shut down");
        Ok(())
    }
}

enum Line {
    Claimed(Pin),
    Active { io: IoPin, direction: Direction },
    Released,
}

pub struct RpiDigitalPin {
    id: PinId,
    line: Line,
}

impl RpiDigitalPin {
    fn not_configured(&self) -> HalError {
        HalError::NotConfigured {
            resource: format!("pin {}", self.id),
        }
    }
}

fn bias(pull: Pull) -> Bias {
    match pull {
        Pull::None => Bias::Off,
        Pull::Up => Bias::PullUp,
        Pull::Down => Bias::PullDown,
    }
}

fn mode(direction: Direction) -> Mode {
    match direction {
        Direction::Input => Mode::Input,
        Direction::Output => Mode::Output,
    }
}

impl DigitalPin for RpiDigitalPin {
    fn id(&self) -> PinId {
        self.id
    }

    fn configure(&mut self, direction: Direction, pull: Pull) -> Result<()> {
        let line = std::mem::replace(&mut self.line, Line::Released);
        let mut io = match line {
            Line::Claimed(pin) => pin.into_io(mode(direction)),
            Line::Active { mut io, .. } => {
                io.set_mode(mode(direction));
                io
            }
            Line::Released => return Err(self.not_configured()),
        };
        io.set_bias(bias(pull));
        self.line = Line::Active { io, direction };
        debug!("GPIO {} configured as {:?} (pull {:?})", self.id, direction, pull);
        Ok(())
    }

    fn write(&mut self, high: bool) -> Result<()> {
        match &mut self.line {
            Line::Active {
                io,
                direction: Direction::Output,
            } => {
                io.write(if high { Level::High } else { Level::Low });
                Ok(())
            }
            Line::Active { direction, .. } => Err(HalError::WrongDirection {
                pin: self.id,
                actual: *direction,
                wanted: Direction::Output,
            }),
            _ => Err(HalError::NotConfigured {
                resource: format!("pin {}", self.id),
            }),
        }
    }

    fn read(&mut self) -> Result<bool> {
        match &self.line {
            Line::Active {
                io,
                direction: Direction::Input,
            } => Ok(io.read() == Level::High),
            Line::Active { direction, .. } => Err(HalError::WrongDirection {
                pin: self.id,
                actual: *direction,
                wanted: Direction::Input,
            }),
            _ => Err(self.not_configured()),
        }
    }

    fn release(&mut self) -> Result<()> {
        if matches!(self.line, Line::Released) {
            return Err(self.not_configured());
        }
        // Dropping the rppal handle restores the line's previous mode
        self.line = Line::Released;
        debug!("GPIO {} released", self.id);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct PwmSession {
    frequency_hz: f64,
    duty: f64,
}

/// Software PWM on a GPIO line
pub struct RpiPwm {
    id: PinId,
    out: Option<OutputPin>,
    session: Option<PwmSession>,
}

impl RpiPwm {
    fn output(&mut self) -> Result<&mut OutputPin> {
        let id = self.id;
        self.out.as_mut().ok_or_else(|| HalError::NotConfigured {
            resource: format!("PWM pin {}", id),
        })
    }
}

impl PwmOutput for RpiPwm {
    fn id(&self) -> PinId {
        self.id
    }

    fn start(&mut self, frequency_hz: f64) -> Result<()> {
        if self.session.is_some() {
            return Err(HalError::AlreadyStarted { pin: self.id });
        }
        self.output()?.set_pwm_frequency(frequency_hz, 0.0)?;
        self.session = Some(PwmSession {
            frequency_hz,
            duty: 0.0,
        });
        debug!("PWM {} started at {}Hz", self.id, frequency_hz);
        Ok(())
    }

    fn set_duty_cycle(&mut self, percent: f64) -> Result<()> {
        check_duty_cycle(percent)?;
        let Some(session) = self.session else {
            return Err(HalError::NotConfigured {
                resource: format!("PWM pin {}", self.id),
            });
        };
        self.output()?
            .set_pwm_frequency(session.frequency_hz, percent / 100.0)?;
        self.session = Some(PwmSession {
            duty: percent,
            ..session
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let out = self.output()?;
        out.clear_pwm()?;
        out.set_low();
        self.session = None;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.session.is_some()
    }

    fn duty_cycle(&self) -> f64 {
        self.session.map(|s| s.duty).unwrap_or(0.0)
    }

    fn release(&mut self) -> Result<()> {
        self.stop()?;
        self.out = None;
        debug!("PWM {} released", self.id);
        Ok(())
    }
}

/// ADS1015 on the primary I2C bus
pub struct Ads1015Input {
    i2c: Option<I2c>,
    address: u16,
    configured: bool,
}

impl Ads1015Input {
    fn bus(&mut self) -> Result<&mut I2c> {
        if !self.configured {
            return Err(HalError::NotConfigured {
                resource: "ADC".to_string(),
            });
        }
        self.i2c.as_mut().ok_or_else(|| HalError::NotConfigured {
            resource: "ADC".to_string(),
        })
    }
}

impl AnalogInput for Ads1015Input {
    fn configure(&mut self) -> Result<()> {
        let address = self.address;
        let i2c = self.i2c.as_mut().ok_or_else(|| HalError::NotConfigured {
            resource: "ADC".to_string(),
        })?;
        i2c.set_slave_address(address)?;
        self.configured = true;
        info!("ADS1015 configured at address 0x{:02x}", address);
        Ok(())
    }

    fn channel_count(&self) -> u8 {
        ADC_CHANNELS
    }

    fn read_voltage(&mut self, channel: u8) -> Result<f64> {
        let code = self.read_raw(channel)?;
        let volts = ads1015::code_to_volts(code);
        debug!("ADC channel {} read: {:.3}V", channel, volts);
        Ok(volts)
    }

    fn read_raw(&mut self, channel: u8) -> Result<u16> {
        check_channel(channel, ADC_CHANNELS)?;
        let bus = self.bus()?;
        bus.write(&ads1015::start_conversion_command(channel))?;
        sleep(CONVERSION_TIME);
        let mut buf = [0u8; 2];
        bus.write_read(&[ads1015::REG_CONVERSION], &mut buf)?;
        Ok(ads1015::decode_conversion(buf))
    }

    fn release(&mut self) -> Result<()> {
        self.bus()?;
        self.i2c = None;
        self.configured = false;
        Ok(())
    }
}
