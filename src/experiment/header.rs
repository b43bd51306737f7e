//! Acquisition file header
//!
//! Every recording starts with a description comment and one `title=` line
//! holding ten comma-separated fields:
//!
//! ```text
//! # Time, Number of ADC(s), Timeout, Analog input type, Type of range, Signal form, Period, Min, Max, Tau
//! title=2024-03-01T10:15:00.000Z,3,200,8,0,0,2000,0,5,1000
//! ```

use crate::config::{keys, AcquisitionSettings, Preferences};
use crate::error::{DaqError, Result};
use crate::protocol::MAX_MODULES;
use crate::signal::{SignalForm, Waveform, DEFAULT_TAU};
use chrono::{SecondsFormat, Utc};

/// Comment line written above the header
pub const DESCRIPTION: &str =
    "# Time, Number of ADC(s), Timeout, Analog input type, Type of range, Signal form, Period, Min, Max, Tau";

/// Key of the header line
pub const TITLE_KEY: &str = "title";

/// Key of the optional axes line
pub const AXES_KEY: &str = "map.of.axes";

const FIELD_COUNT: usize = 10;

/// Decoded `title=` line
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentHeader {
    /// ISO-8601 creation instant, kept verbatim
    pub created: String,
    pub module_count: i64,
    /// Sampling interval in milliseconds
    pub response_timeout: i64,
    pub analog_input_type: i64,
    pub output_range: i64,
    pub signal_form: SignalForm,
    pub period: i64,
    pub min: f64,
    pub max: f64,
    pub tau: f64,
}

impl ExperimentHeader {
    /// Header for a recording that starts now
    pub fn new(settings: &AcquisitionSettings) -> Self {
        let created = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        Self::with_created(settings, created)
    }

    pub fn with_created(settings: &AcquisitionSettings, created: impl Into<String>) -> Self {
        let (min, max, tau) = match settings.waveform {
            Waveform::Sine { min, max } | Waveform::Triangle { min, max } => {
                (min, max, DEFAULT_TAU)
            }
            Waveform::Trapezoid { min, max, tau } => (min, max, tau),
            Waveform::Calibration => (0.0, 0.0, DEFAULT_TAU),
        };
        Self {
            created: created.into(),
            module_count: i64::from(settings.module_count),
            response_timeout: i64::from(settings.response_timeout),
            analog_input_type: i64::from(settings.analog_input_type),
            output_range: i64::from(settings.output_range),
            signal_form: settings.waveform.form(),
            period: i64::from(settings.period),
            min,
            max,
            tau,
        }
    }

    /// Header built from the current preferences
    ///
    /// Signal limits and tau are taken verbatim so a calibration run still
    /// records whatever limits were configured.
    pub fn from_preferences(prefs: &Preferences) -> Result<Self> {
        let settings = AcquisitionSettings::from_preferences(prefs)?;
        let mut header = Self::new(&settings);
        header.min = prefs.get_double_or(keys::SIGNAL_MIN, header.min);
        header.max = prefs.get_double_or(keys::SIGNAL_MAX, header.max);
        header.tau = prefs.get_double_or(keys::SIGNAL_TAU, header.tau);
        Ok(header)
    }

    /// Decode the value part of a `title=` line
    pub fn parse(value: &str) -> Result<Self> {
        let fields: Vec<&str> = value.split(',').map(str::trim).collect();
        if fields.len() != FIELD_COUNT {
            return Err(DaqError::InvalidHeader(format!(
                "expected {} fields, found {}",
                FIELD_COUNT,
                fields.len()
            )));
        }

        let int = |index: usize, what: &str| -> Result<i64> {
            fields[index]
                .parse()
                .map_err(|_| DaqError::InvalidHeader(format!("{} {:?}", what, fields[index])))
        };
        let float = |index: usize, what: &str| -> Result<f64> {
            fields[index]
                .parse()
                .map_err(|_| DaqError::InvalidHeader(format!("{} {:?}", what, fields[index])))
        };

        let module_count = int(1, "module count")?;
        if !(0..=i64::from(MAX_MODULES)).contains(&module_count) {
            return Err(DaqError::InvalidHeader(format!(
                "module count {} outside 0..={}",
                module_count, MAX_MODULES
            )));
        }

        Ok(Self {
            created: fields[0].to_string(),
            module_count,
            response_timeout: int(2, "response timeout")?,
            analog_input_type: int(3, "analog input type")?,
            output_range: int(4, "output range")?,
            signal_form: SignalForm::from_code(int(5, "signal form")? as i32),
            period: int(6, "period")?,
            min: float(7, "minimum")?,
            max: float(8, "maximum")?,
            tau: float(9, "tau")?,
        })
    }

    /// Value part of the `title=` line
    pub fn to_value(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{}",
            self.created,
            self.module_count,
            self.response_timeout,
            self.analog_input_type,
            self.output_range,
            self.signal_form.code(),
            self.period,
            self.min,
            self.max,
            self.tau
        )
    }

    /// Complete `title=...` line without terminator
    pub fn to_line(&self) -> String {
        format!("{}={}", TITLE_KEY, self.to_value())
    }

    /// Whether data lines may follow this header
    pub fn enables_data(&self) -> bool {
        self.module_count > 0
    }

    /// Mirror the header into preferences
    pub fn apply_to(&self, prefs: &mut Preferences) {
        prefs.set(keys::RUNTIME_TIME, &self.created);
        prefs.set(keys::MODULE_COUNT, self.module_count);
        prefs.set(keys::RESPONSE_TIMEOUT, self.response_timeout);
        prefs.set(keys::ANALOG_INPUT_TYPE, self.analog_input_type);
        prefs.set(keys::SIGNAL_OUT_RANGE, self.output_range);
        prefs.set(keys::SIGNAL_FORM, self.signal_form.code());
        prefs.set(keys::SIGNAL_PERIOD, self.period);
        prefs.set(keys::SIGNAL_MIN, self.min);
        prefs.set(keys::SIGNAL_MAX, self.max);
        prefs.set(keys::SIGNAL_TAU, self.tau);
    }
}
