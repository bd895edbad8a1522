// src/conversion.rs

//! Raw sample → voltage → calibrated value.
//!
//! Every function here is pure: identical inputs always give identical outputs.

use crate::common::error::GoIoError;
use crate::common::types::{CalibrationEquation, ProbeType};

/// Full-scale count of the analog converters (signed 16-bit).
pub const ANALOG_FULL_SCALE: f64 = 32768.0;
/// Offset of 0 °C on the kelvin scale.
pub const KELVIN_OFFSET: f64 = 273.15;

const MICRONS_PER_METRE: f64 = 1_000_000.0;

/// Converts a raw sample into volts (or metres for motion probes).
///
/// * `Analog5V`: `raw * 5 / 32768`, so 0 → 0.0 and 32767 → just under 5.0. Counts outside
///   `0..=32767` are clamped into that range first.
/// * `Analog10V`: `raw * 10 / 32768`, covering -10.0..10.0
/// * `Motion`: raw microns scaled to metres
pub fn raw_to_voltage(raw: i32, probe_type: ProbeType) -> f64 {
    match probe_type {
        ProbeType::Analog5V => raw.clamp(0, i16::MAX as i32) as f64 * 5.0 / ANALOG_FULL_SCALE,
        ProbeType::Analog10V => raw as f64 * 10.0 / ANALOG_FULL_SCALE,
        ProbeType::Motion => raw as f64 / MICRONS_PER_METRE,
    }
}

/// Inverse of [`raw_to_voltage`], rounded to the nearest count.
///
/// Analog results are clamped to the counts the converter can produce for the probe type.
pub fn voltage_to_raw(voltage: f64, probe_type: ProbeType) -> i32 {
    match probe_type {
        ProbeType::Analog5V => analog_count(voltage * ANALOG_FULL_SCALE / 5.0).max(0),
        ProbeType::Analog10V => analog_count(voltage * ANALOG_FULL_SCALE / 10.0),
        ProbeType::Motion => (voltage * MICRONS_PER_METRE).round() as i32,
    }
}

fn analog_count(counts: f64) -> i32 {
    counts.round().clamp(i16::MIN as f64, i16::MAX as f64) as i32
}

/// Applies a calibration equation to `x` (a voltage, or a resistance for Steinhart-Hart).
///
/// # Arguments
///
/// * `x`: Input value.
/// * `equation`: Equation family selected by the DDS record.
/// * `a`, `b`, `c`: Coefficients of the active calibration page.
///
/// # Returns
///
/// The calibrated value. Inputs outside an equation's domain (e.g. `x <= 0` for
/// `Logarithmic`) yield NaN or infinity, never a panic.
pub fn voltage_to_calibrated(x: f64, equation: CalibrationEquation, a: f64, b: f64, c: f64) -> f64 {
    match equation {
        CalibrationEquation::None => x,
        CalibrationEquation::Linear => a + b * x,
        CalibrationEquation::Quadratic => a + b * x + c * x * x,
        CalibrationEquation::Power => a * x.powf(b),
        CalibrationEquation::ModifiedPower => a * b.powf(x),
        CalibrationEquation::Exponential => a * (b * x).exp(),
        CalibrationEquation::Logarithmic => a + b * x.ln(),
        CalibrationEquation::SteinhartHart => {
            let ln_r = x.ln();
            1.0 / (a + b * ln_r + c * ln_r * ln_r * ln_r) - KELVIN_OFFSET
        }
    }
}

/// Same as [`voltage_to_calibrated`] but takes the raw DDS equation selector.
///
/// # Returns
///
/// * `Err(GoIoError::UnsupportedEquation)` if the selector names no known equation.
pub fn calibrate_with_selector(
    x: f64,
    selector: i8,
    a: f64,
    b: f64,
    c: f64,
) -> Result<f64, GoIoError> {
    let equation =
        CalibrationEquation::from_i8(selector).ok_or(GoIoError::UnsupportedEquation(selector))?;
    Ok(voltage_to_calibrated(x, equation, a, b, c))
}
