//! Typed acquisition settings
//!
//! [`AcquisitionSettings`] is a validated snapshot of the preference keys
//! that shape a recording: how many modules are read, how often, and which
//! reference waveform is driven. Preferences stay stringly typed; this is
//! where they get checked.

use super::{keys, Preferences};
use crate::error::{DaqError, Result};
use crate::protocol::MAX_MODULES;
use crate::signal::{SampleTiming, SignalForm, Waveform, DEFAULT_TAU};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters of one acquisition run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Number of input modules read per row
    pub module_count: u32,
    /// Sampling interval in milliseconds
    pub response_timeout: u32,
    /// Input range selector passed through to the header
    pub analog_input_type: i32,
    /// Output range selector passed through to the header
    pub output_range: i32,
    /// Reference waveform period in milliseconds
    pub period: u32,
    pub waveform: Waveform,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self::from_preferences(&Preferences::default()).unwrap_or(Self {
            module_count: 0,
            response_timeout: 200,
            analog_input_type: 0,
            output_range: 0,
            period: 2000,
            waveform: Waveform::Sine { min: 0.0, max: 5.0 },
        })
    }
}

impl AcquisitionSettings {
    /// Read and validate settings from preferences
    pub fn from_preferences(prefs: &Preferences) -> Result<Self> {
        let module_count = prefs.get_int_or(keys::MODULE_COUNT, 0).max(0);
        if module_count > i64::from(MAX_MODULES) {
            return Err(DaqError::Config(format!(
                "{} modules requested, a bus holds at most {}",
                module_count, MAX_MODULES
            )));
        }
        let response_timeout = positive(prefs, keys::RESPONSE_TIMEOUT)?;
        let period = positive(prefs, keys::SIGNAL_PERIOD)?;
        let form = SignalForm::from_code(prefs.get_int_or(keys::SIGNAL_FORM, 0) as i32);
        let min = prefs.get_double_or(keys::SIGNAL_MIN, 0.0);
        let max = prefs.get_double_or(keys::SIGNAL_MAX, 0.0);
        let tau = prefs.get_double_or(keys::SIGNAL_TAU, DEFAULT_TAU);

        if !(tau.is_finite() && tau > 0.0) {
            return Err(DaqError::Config(format!(
                "{} must be positive, got {}",
                keys::SIGNAL_TAU,
                tau
            )));
        }
        if min > max {
            return Err(DaqError::Config(format!(
                "signal minimum {} is above maximum {}",
                min, max
            )));
        }

        Ok(Self {
            module_count: module_count as u32,
            response_timeout,
            analog_input_type: prefs.get_int_or(keys::ANALOG_INPUT_TYPE, 0) as i32,
            output_range: prefs.get_int_or(keys::SIGNAL_OUT_RANGE, 0) as i32,
            period,
            waveform: Waveform::from_settings(form, min, max, tau),
        })
    }

    /// Write these settings back into preferences
    pub fn apply_to(&self, prefs: &mut Preferences) {
        prefs.set(keys::MODULE_COUNT, self.module_count);
        prefs.set(keys::RESPONSE_TIMEOUT, self.response_timeout);
        prefs.set(keys::ANALOG_INPUT_TYPE, self.analog_input_type);
        prefs.set(keys::SIGNAL_OUT_RANGE, self.output_range);
        prefs.set(keys::SIGNAL_FORM, self.waveform.form().code());
        prefs.set(keys::SIGNAL_PERIOD, self.period);
        match self.waveform {
            Waveform::Sine { min, max } | Waveform::Triangle { min, max } => {
                prefs.set(keys::SIGNAL_MIN, min);
                prefs.set(keys::SIGNAL_MAX, max);
            }
            Waveform::Trapezoid { min, max, tau } => {
                prefs.set(keys::SIGNAL_MIN, min);
                prefs.set(keys::SIGNAL_MAX, max);
                prefs.set(keys::SIGNAL_TAU, tau);
            }
            Waveform::Calibration => {}
        }
    }

    pub fn timing(&self) -> SampleTiming {
        SampleTiming::new(self.period, self.response_timeout)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.response_timeout))
    }

    /// One period of the reference waveform
    pub fn generate_signal(&self) -> Vec<f32> {
        self.waveform.generate(self.timing())
    }
}

fn positive(prefs: &Preferences, key: &str) -> Result<u32> {
    let value = prefs
        .get_int(key)
        .ok_or_else(|| DaqError::Config(format!("{} is missing or not an integer", key)))?;
    if value <= 0 || value > i64::from(u32::MAX) {
        return Err(DaqError::Config(format!("{} must be positive, got {}", key, value)));
    }
    Ok(value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_preferences() {
        let settings = AcquisitionSettings::from_preferences(&Preferences::default()).unwrap();
        assert_eq!(settings.response_timeout, 200);
        assert_eq!(settings.period, 2000);
        assert_eq!(settings.waveform, Waveform::Sine { min: 0.0, max: 5.0 });
        assert_eq!(settings.generate_signal().len(), 10);
        assert_eq!(settings.sample_interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut prefs = Preferences::default();
        prefs.set(keys::RESPONSE_TIMEOUT, 0);
        assert!(matches!(
            AcquisitionSettings::from_preferences(&prefs),
            Err(DaqError::Config(_))
        ));
    }

    #[test]
    fn test_non_positive_tau_rejected() {
        for tau in ["0", "-250", "NaN"] {
            let mut prefs = Preferences::default();
            prefs.set(keys::SIGNAL_FORM, 1);
            prefs.set(keys::SIGNAL_TAU, tau);
            assert!(
                matches!(AcquisitionSettings::from_preferences(&prefs), Err(DaqError::Config(_))),
                "tau {}",
                tau
            );
        }
    }

    #[test]
    fn test_too_many_modules_rejected() {
        let mut prefs = Preferences::default();
        prefs.set(keys::MODULE_COUNT, 257);
        assert!(AcquisitionSettings::from_preferences(&prefs).is_err());
        prefs.set(keys::MODULE_COUNT, 256);
        assert_eq!(AcquisitionSettings::from_preferences(&prefs).unwrap().module_count, 256);
    }

    #[test]
    fn test_inverted_limits_rejected() {
        let mut prefs = Preferences::default();
        prefs.set(keys::SIGNAL_MIN, 4);
        prefs.set(keys::SIGNAL_MAX, 1);
        assert!(AcquisitionSettings::from_preferences(&prefs).is_err());
    }

    #[test]
    fn test_apply_roundtrip() {
        let settings = AcquisitionSettings {
            module_count: 3,
            response_timeout: 100,
            analog_input_type: 8,
            output_range: 2,
            period: 4000,
            waveform: Waveform::Trapezoid {
                min: -1.0,
                max: 1.0,
                tau: 400.0,
            },
        };
        let mut prefs = Preferences::default();
        settings.apply_to(&mut prefs);
        assert_eq!(prefs.get_int(keys::SIGNAL_FORM), Some(1));
        assert_eq!(AcquisitionSettings::from_preferences(&prefs).unwrap(), settings);
    }

    #[test]
    fn test_unknown_form_is_calibration() {
        let mut prefs = Preferences::default();
        prefs.set(keys::SIGNAL_FORM, 9);
        let settings = AcquisitionSettings::from_preferences(&prefs).unwrap();
        assert_eq!(settings.waveform, Waveform::Calibration);
        assert_eq!(settings.generate_signal().len(), 48);
    }
}
