// Grayscale line-following array on the analog converter

use tracing::{debug, info};

use crate::device::{DeviceError, Result};
use crate::hal::{check_channel, AnalogInput};

/// Voltage mapped to a normalized reading of 1.0
pub const FULL_SCALE_VOLTS: f64 = 3.3;

/// Per-channel reference used until `calibrate` is called
pub const DEFAULT_REFERENCE: f64 = 1.65;

pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Position of a dark line under the array, in -1.0 (leftmost) ..= 1.0
///
/// Readings are inverted (`1 - v`) so dark surfaces weigh most, then the
/// weighted centroid index is mapped from `0..=n-1` onto `-1..=1`.
/// Returns `None` when every weight is zero (nothing dark in view).
pub fn line_position(normalized: &[f64]) -> Option<f64> {
    let weights: Vec<f64> = normalized.iter().map(|v| 1.0 - v).collect();
    let total: f64 = weights.iter().sum();
    if total == 0.0 || weights.is_empty() {
        return None;
    }

    let weighted: f64 = weights
        .iter()
        .enumerate()
        .map(|(i, w)| i as f64 * w)
        .sum();
    let centroid = weighted / total;

    let half_span = (weights.len() - 1) as f64 / 2.0;
    if half_span == 0.0 {
        return Some(0.0);
    }
    Some((centroid - half_span) / half_span)
}

pub struct Grayscale {
    adc: Box<dyn AnalogInput>,
    channels: Vec<u8>,
    references: Vec<f64>,
}

impl Grayscale {
    /// Configure the converter and bind the given channels, left to right
    pub fn new(mut adc: Box<dyn AnalogInput>, channels: Vec<u8>) -> Result<Self> {
        if channels.is_empty() {
            return Err(DeviceError::NoChannels);
        }
        for &ch in &channels {
            check_channel(ch, adc.channel_count())?;
        }
        adc.configure()?;
        info!("Grayscale module initialized with {} sensors", channels.len());
        let references = vec![DEFAULT_REFERENCE; channels.len()];
        Ok(Self {
            adc,
            channels,
            references,
        })
    }

    /// Voltage on each channel
    pub fn read_raw(&mut self) -> Result<Vec<f64>> {
        let mut values = Vec::with_capacity(self.channels.len());
        for &ch in &self.channels {
            values.push(self.adc.read_voltage(ch)?);
        }
        debug!("Grayscale raw values: {:?}", values);
        Ok(values)
    }

    /// Readings scaled by the fixed full-scale voltage, clamped to 0..=1
    pub fn read_normalized(&mut self) -> Result<Vec<f64>> {
        let normalized: Vec<f64> = self
            .read_raw()?
            .into_iter()
            .map(|v| (v / FULL_SCALE_VOLTS).clamp(0.0, 1.0))
            .collect();
        debug!("Grayscale normalized values: {:?}", normalized);
        Ok(normalized)
    }

    pub fn read_digital(&mut self, threshold: f64) -> Result<Vec<bool>> {
        Ok(self
            .read_normalized()?
            .into_iter()
            .map(|v| v > threshold)
            .collect())
    }

    pub fn get_line_position(&mut self) -> Result<Option<f64>> {
        let position = line_position(&self.read_normalized()?);
        if let Some(p) = position {
            debug!("Line position: {:.3}", p);
        }
        Ok(position)
    }

    /// Store per-channel reference values.
    ///
    /// Normalization does not use them yet; it divides by `FULL_SCALE_VOLTS`.
    pub fn calibrate(&mut self, references: &[f64]) -> Result<()> {
        if references.len() != self.channels.len() {
            return Err(DeviceError::ReferenceCount {
                expected: self.channels.len(),
                got: references.len(),
            });
        }
        self.references = references.to_vec();
        info!("Grayscale sensors calibrated: {:?}", self.references);
        Ok(())
    }

    pub fn references(&self) -> &[f64] {
        &self.references
    }

    pub fn channels(&self) -> &[u8] {
        &self.channels
    }

    pub fn release(&mut self) -> Result<()> {
        self.adc.release()?;
        info!("Grayscale module released");
        Ok(())
    }
}
