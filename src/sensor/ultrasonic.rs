// HC-SR04 style ultrasonic ranger on two GPIO lines

use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::device::Result;
use crate::hal::{DigitalPin, Direction, Pull};

/// How long to wait for each echo edge
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30);

/// Half the speed of sound, in cm/s
const HALF_SPEED_OF_SOUND_CM_S: f64 = 17150.0;

const TRIGGER_LOW: Duration = Duration::from_micros(2);
const TRIGGER_PULSE: Duration = Duration::from_micros(10);
const SETTLE_TIME: Duration = Duration::from_millis(100);
const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

pub struct Ultrasonic {
    trigger: Box<dyn DigitalPin>,
    echo: Box<dyn DigitalPin>,
    timeout: Duration,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Ultrasonic {
    pub fn new(
        mut trigger: Box<dyn DigitalPin>,
        mut echo: Box<dyn DigitalPin>,
        timeout: Duration,
    ) -> Result<Self> {
        trigger.configure(Direction::Output, Pull::None)?;
        echo.configure(Direction::Input, Pull::Down)?;
        trigger.write(false)?;
        sleep(SETTLE_TIME);
        info!(
            "Ultrasonic sensor initialized (trig: {}, echo: {})",
            trigger.id(),
            echo.id()
        );
        Ok(Self {
            trigger,
            echo,
            timeout,
        })
    }

    /// Poll the echo line until it reads `level`. Returns the instant it did,
    /// or `None` once `timeout` has elapsed since `since`.
    fn wait_for(&mut self, level: bool, since: Instant) -> Result<Option<Instant>> {
        loop {
            if self.echo.read()? == level {
                return Ok(Some(Instant::now()));
            }
            if since.elapsed() > self.timeout {
                return Ok(None);
            }
            std::hint::spin_loop();
        }
    }

    /// One measurement in centimeters, rounded to 2 decimals.
    /// A missing echo edge gives `Ok(None)`; pin failures are errors.
    pub fn read_distance(&mut self) -> Result<Option<f64>> {
        self.trigger.write(false)?;
        sleep(TRIGGER_LOW);
        self.trigger.write(true)?;
        sleep(TRIGGER_PULSE);
        self.trigger.write(false)?;

        let Some(rise) = self.wait_for(true, Instant::now())? else {
            warn!("Ultrasonic sensor timeout waiting for echo start");
            return Ok(None);
        };
        let Some(fall) = self.wait_for(false, rise)? else {
            warn!("Ultrasonic sensor timeout waiting for echo end");
            return Ok(None);
        };

        let distance = round2((fall - rise).as_secs_f64() * HALF_SPEED_OF_SOUND_CM_S);
        debug!("Ultrasonic distance: {:.2} cm", distance);
        Ok(Some(distance))
    }

    /// Mean of the successful readings out of `samples`, or `None` if all failed
    pub fn read_distance_average(&mut self, samples: usize) -> Result<Option<f64>> {
        let mut readings = Vec::with_capacity(samples);
        for _ in 0..samples {
            if let Some(d) = self.read_distance()? {
                readings.push(d);
            }
            sleep(SAMPLE_INTERVAL);
        }

        if readings.is_empty() {
            return Ok(None);
        }
        let average = round2(readings.iter().sum::<f64>() / readings.len() as f64);
        debug!(
            "Ultrasonic average distance ({} samples): {:.2} cm",
            readings.len(),
            average
        );
        Ok(Some(average))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Release both lines; both are attempted even if the first fails
    pub fn release(&mut self) -> Result<()> {
        let trig = self.trigger.release();
        let echo = self.echo.release();
        info!("Ultrasonic sensor released");
        trig.and(echo)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use crate::hal::simulated::SimulatedPin;
    use crate::hal::{HalError, PinId};
    use std::collections::VecDeque;

    /// Echo line that replays a fixed sequence of levels, then holds the last one
    struct ScriptedEcho {
        levels: VecDeque<bool>,
        hold: bool,
    }

    impl ScriptedEcho {
        fn new(levels: &[bool]) -> Self {
            Self {
                levels: levels.iter().copied().collect(),
                hold: levels.last().copied().unwrap_or(false),
            }
        }
    }

    impl DigitalPin for ScriptedEcho {
        fn id(&self) -> PinId {
            PinId::new(24)
        }

        fn configure(&mut self, _direction: Direction, _pull: Pull) -> crate::hal::Result<()> {
            Ok(())
        }

        fn write(&mut self, _high: bool) -> crate::hal::Result<()> {
            Err(HalError::WrongDirection {
                pin: self.id(),
                actual: Direction::Input,
                wanted: Direction::Output,
            })
        }

        fn read(&mut self) -> crate::hal::Result<bool> {
            Ok(self.levels.pop_front().unwrap_or(self.hold))
        }

        fn release(&mut self) -> crate::hal::Result<()> {
            Ok(())
        }
    }

    fn sensor(echo: Box<dyn DigitalPin>) -> Ultrasonic {
        Ultrasonic::new(
            Box::new(SimulatedPin::new(PinId::new(23))),
            echo,
            Duration::from_millis(5),
        )
        .unwrap()
    }

    #[test]
    fn test_no_echo_is_no_reading() {
        // Simulated input with pull-down never rises
        let mut s = sensor(Box::new(SimulatedPin::new(PinId::new(24))));
        assert_eq!(s.read_distance().unwrap(), None);
    }

    #[test]
    fn test_average_of_failed_reads_is_no_reading() {
        let mut s = sensor(Box::new(SimulatedPin::new(PinId::new(24))));
        assert_eq!(s.read_distance_average(5).unwrap(), None);
    }

    #[test]
    fn test_echo_that_never_falls_is_no_reading() {
        let mut s = sensor(Box::new(ScriptedEcho::new(&[false, false, true])));
        assert_eq!(s.read_distance().unwrap(), None);
    }

    #[test]
    fn test_echo_pulse_gives_distance() {
        let mut levels = vec![false; 3];
        levels.extend(std::iter::repeat_n(true, 200));
        levels.push(false);
        let mut s = sensor(Box::new(ScriptedEcho::new(&levels)));

        let d = s.read_distance().unwrap().expect("echo observed");
        assert!(d >= 0.0);
        // Pulse is bounded by the 5 ms timeout: at most ~86 cm
        assert!(d < 5.0e-3 * HALF_SPEED_OF_SOUND_CM_S + 1.0);
        assert_eq!(d, round2(d));
    }

    #[test]
    fn test_pin_failure_is_an_error() {
        let mut echo = SimulatedPin::new(PinId::new(24));
        echo.configure(Direction::Input, Pull::Down).unwrap();
        echo.release().unwrap();
        let mut s = Ultrasonic {
            trigger: Box::new(SimulatedPin::new(PinId::new(23))),
            echo: Box::new(echo),
            timeout: Duration::from_millis(5),
        };
        // Unconfigured trigger
        assert!(matches!(
            s.read_distance(),
            Err(DeviceError::Hal(HalError::NotConfigured { .. }))
        ));
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(12.345_6), 12.35);
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(99.994), 99.99);
    }
}
