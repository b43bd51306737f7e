//! Reference waveform synthesis
//!
//! The recorder drives one analog output module with a periodic reference
//! signal, one sample per response interval. A waveform is generated once
//! per run as a fixed-length array covering exactly one period; every value
//! is rounded to three decimals, the resolution of the output modules.
//!
//! Trapezoid and triangle shapes are truncated Fourier series rather than
//! piecewise-linear ramps, so their edges carry a small ripple. The triangle
//! has its two extrema forced to the exact limits.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Highest odd harmonic of the trapezoid series
const TRAPEZOID_HARMONICS: u32 = 49;

/// Highest odd harmonic of the triangle series
const TRIANGLE_HARMONICS: u32 = 13;

/// Default rise time of the trapezoid, in milliseconds
pub const DEFAULT_TAU: f64 = 1000.0;

/// Output pattern used when no regular form is selected
pub const CALIBRATION_TABLE: [f32; 48] = [
    8.640, 2.230, 1.100, 8.000, 1.520, 5.250, 5.341, 5.341, 5.341, 5.341, 5.341, 5.341, //
    8.640, 2.230, 1.100, 8.000, 1.520, 5.250, 5.341, 5.341, 5.341, 5.341, //
    8.640, 2.230, 1.100, 8.000, 1.520, 5.250, 5.341, 5.341, 5.341, 5.341, //
    8.640, 2.230, 1.100, 8.000, 1.520, 5.250, 5.341, 5.341, 5.341, 5.341, //
    8.640, 2.230, 1.100, 8.000, 1.520, 5.250,
];

/// Integer signal-form code as stored in headers and preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalForm {
    Sine,
    Trapezoid,
    Triangle,
    Calibration,
}

impl SignalForm {
    /// Map a stored code; anything outside 0..=2 selects the calibration
    /// table
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Sine,
            1 => Self::Trapezoid,
            2 => Self::Triangle,
            _ => Self::Calibration,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Sine => 0,
            Self::Trapezoid => 1,
            Self::Triangle => 2,
            Self::Calibration => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Sine => "sine",
            Self::Trapezoid => "trapezoid",
            Self::Triangle => "triangle",
            Self::Calibration => "calibration",
        }
    }
}

impl std::fmt::Display for SignalForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Sampling parameters shared by all waveforms, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleTiming {
    /// Length of one waveform period
    pub period: u32,
    /// Interval between two samples
    pub response_timeout: u32,
}

impl SampleTiming {
    pub fn new(period: u32, response_timeout: u32) -> Self {
        Self {
            period,
            response_timeout,
        }
    }

    /// Period expressed in samples, before rounding
    pub fn ratio(&self) -> f64 {
        f64::from(self.period) / f64::from(self.response_timeout)
    }

    /// Number of samples in one period
    pub fn sample_count(&self) -> usize {
        if self.response_timeout == 0 {
            return 0;
        }
        round_half_up(self.ratio()).max(0.0) as usize
    }
}

/// Shape of the reference signal with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum Waveform {
    Sine { min: f64, max: f64 },
    Trapezoid { min: f64, max: f64, tau: f64 },
    Triangle { min: f64, max: f64 },
    Calibration,
}

impl Waveform {
    /// Build a waveform from the stored form code and limits
    pub fn from_settings(form: SignalForm, min: f64, max: f64, tau: f64) -> Self {
        match form {
            SignalForm::Sine => Self::Sine { min, max },
            SignalForm::Trapezoid => Self::Trapezoid { min, max, tau },
            SignalForm::Triangle => Self::Triangle { min, max },
            SignalForm::Calibration => Self::Calibration,
        }
    }

    pub fn form(&self) -> SignalForm {
        match self {
            Self::Sine { .. } => SignalForm::Sine,
            Self::Trapezoid { .. } => SignalForm::Trapezoid,
            Self::Triangle { .. } => SignalForm::Triangle,
            Self::Calibration => SignalForm::Calibration,
        }
    }

    /// Generate one period of samples
    ///
    /// The calibration table ignores `timing`. The other forms produce
    /// `timing.sample_count()` samples, which is empty when the response
    /// timeout is zero.
    pub fn generate(&self, timing: SampleTiming) -> Vec<f32> {
        match *self {
            Self::Sine { min, max } => sine(min, max, timing),
            Self::Trapezoid { min, max, tau } => trapezoid(min, max, tau, timing),
            Self::Triangle { min, max } => triangle(min, max, timing),
            Self::Calibration => CALIBRATION_TABLE.to_vec(),
        }
    }
}

/// Round to three decimals, ties rounded up
pub fn round3(value: f64) -> f32 {
    (round_half_up(value * 1000.0) / 1000.0) as f32
}

fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

fn amplitude_and_midpoint(min: f64, max: f64) -> (f64, f64) {
    let amplitude = (max - min) / 2.0;
    (amplitude, amplitude + min)
}

fn sine(min: f64, max: f64, timing: SampleTiming) -> Vec<f32> {
    let count = timing.sample_count();
    let (amplitude, midpoint) = amplitude_and_midpoint(min, max);
    let step = 2.0 * PI / count as f64;
    (0..count)
        .map(|i| round3(amplitude * (i as f64 * step).sin() + midpoint))
        .collect()
}

fn trapezoid(min: f64, max: f64, tau: f64, timing: SampleTiming) -> Vec<f32> {
    let count = timing.sample_count();
    let (amplitude, midpoint) = amplitude_and_midpoint(min, max);
    let omega = 2.0 * PI / f64::from(timing.period);
    let t = f64::from(timing.response_timeout);
    let scale = 4.0 * amplitude / (omega * tau * PI);

    (0..count)
        .map(|i| {
            let sum: f64 = (1..=TRAPEZOID_HARMONICS)
                .step_by(2)
                .map(f64::from)
                .map(|k| (k * omega * tau).sin() / k.powi(2) * (k * omega * i as f64 * t).sin())
                .sum();
            let value = round3(scale * sum + midpoint);
            if f64::from(value) > max {
                round3(max)
            } else if f64::from(value) < min {
                round3(min)
            } else {
                value
            }
        })
        .collect()
}

fn triangle(min: f64, max: f64, timing: SampleTiming) -> Vec<f32> {
    let count = timing.sample_count();
    let (amplitude, midpoint) = amplitude_and_midpoint(min, max);
    let omega = 2.0 * PI / f64::from(timing.period);
    let t = f64::from(timing.response_timeout);
    let scale = 8.0 * amplitude / PI.powi(2);
    let ratio = timing.ratio();
    let peak = round_half_up(ratio / 4.0) as usize;
    let trough = round_half_up(3.0 * ratio / 4.0) as usize;

    (0..count)
        .map(|i| {
            if i == trough {
                return round3(min);
            }
            if i == peak {
                return round3(max);
            }
            let sum: f64 = (1..=TRIANGLE_HARMONICS)
                .step_by(2)
                .map(|k| {
                    let sign = if (k - 1) / 2 % 2 == 0 { 1.0 } else { -1.0 };
                    let k = f64::from(k);
                    sign * (k * omega * i as f64 * t).sin() / k.powi(2)
                })
                .sum();
            round3(scale * sum + midpoint)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sine_eight_samples() {
        let samples = Waveform::Sine { min: 0.0, max: 2.0 }.generate(SampleTiming::new(8, 1));
        assert_eq!(samples.len(), 8);
        assert_eq!(samples[0], 1.0);
        assert_eq!(samples[2], 2.0);
        assert_eq!(samples[6], 0.0);
        assert!(samples.iter().all(|v| (0.0..=2.0).contains(v)));
    }

    #[test]
    fn test_sample_count_rounds_ratio() {
        assert_eq!(SampleTiming::new(1000, 200).sample_count(), 5);
        assert_eq!(SampleTiming::new(1050, 100).sample_count(), 11);
        assert_eq!(SampleTiming::new(1000, 0).sample_count(), 0);
    }

    #[test]
    fn test_triangle_extrema_are_exact() {
        let timing = SampleTiming::new(2000, 100);
        let samples = Waveform::Triangle { min: -1.5, max: 3.0 }.generate(timing);
        assert_eq!(samples.len(), 20);
        assert_eq!(samples[5], 3.0);
        assert_eq!(samples[15], -1.5);
        assert_eq!(samples[0], 0.75);
    }

    #[test]
    fn test_trapezoid_is_clamped() {
        let timing = SampleTiming::new(10_000, 100);
        let samples = Waveform::Trapezoid {
            min: 0.0,
            max: 5.0,
            tau: DEFAULT_TAU,
        }
        .generate(timing);
        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|v| (0.0..=5.0).contains(v)));
        // Flat top around the quarter period
        assert!(samples[25] > 4.5);
        assert!(samples[75] < 0.5);
    }

    #[test]
    fn test_calibration_ignores_timing() {
        let samples = Waveform::Calibration.generate(SampleTiming::new(1, 1000));
        assert_eq!(samples.len(), 48);
        assert_eq!(samples[0], 8.640);
        assert_eq!(samples[47], 5.250);
    }

    #[test]
    fn test_signal_form_codes() {
        for code in 0..4 {
            assert_eq!(SignalForm::from_code(code).code(), code);
        }
        assert_eq!(SignalForm::from_code(7), SignalForm::Calibration);
        assert_eq!(SignalForm::from_code(-1), SignalForm::Calibration);
    }

    #[test]
    fn test_from_settings_matches_form() {
        let waveform = Waveform::from_settings(SignalForm::Trapezoid, 1.0, 4.0, 500.0);
        assert_eq!(
            waveform,
            Waveform::Trapezoid {
                min: 1.0,
                max: 4.0,
                tau: 500.0
            }
        );
        assert_eq!(waveform.form(), SignalForm::Trapezoid);
    }

    #[test]
    fn test_round3_half_up() {
        assert_eq!(round3(0.0625), 0.063);
        assert_eq!(round3(-0.0625), -0.062);
        assert_eq!(round3(2.4994), 2.499);
    }

    proptest! {
        #[test]
        fn test_sine_stays_within_limits(
            min in -10.0f64..0.0,
            span in 0.1f64..10.0,
            period in 100u32..5000,
            timeout in 10u32..500,
        ) {
            let max = min + span;
            let samples = Waveform::Sine { min, max }.generate(SampleTiming::new(period, timeout));
            for v in samples {
                let v = f64::from(v);
                prop_assert!(v >= min - 0.001 && v <= max + 0.001);
            }
        }
    }
}
