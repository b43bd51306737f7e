//! Per-module channel consumers
//!
//! Each input module gets one channel. The controller asks the channel for
//! its scaling coefficient and hands it timestamps and scaled values in
//! batches; what the channel does with them (plot, store, forward) is up to
//! the implementation.

/// Default scaling applied to readings before truncation to integers
pub const DEFAULT_COEFFICIENT: i32 = 1000;

/// Consumer of one module's decoded values
pub trait ChannelSink: Send {
    /// Multiplier applied to raw readings before truncation
    fn coefficient(&self) -> i32;

    /// Append one batch; `timestamps` and `values` have the same length
    fn set_data(&mut self, timestamps: &[i64], values: &[i64]);
}

/// In-memory channel keeping every point it receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBuffer {
    coefficient: i32,
    timestamps: Vec<i64>,
    values: Vec<i64>,
}

impl Default for ChannelBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_COEFFICIENT)
    }
}

impl ChannelBuffer {
    pub fn new(coefficient: i32) -> Self {
        Self {
            coefficient,
            timestamps: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn set_coefficient(&mut self, coefficient: i32) {
        self.coefficient = coefficient;
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Most recent point
    pub fn last(&self) -> Option<(i64, i64)> {
        Some((*self.timestamps.last()?, *self.values.last()?))
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
        self.values.clear();
    }
}

impl ChannelSink for ChannelBuffer {
    fn coefficient(&self) -> i32 {
        self.coefficient
    }

    fn set_data(&mut self, timestamps: &[i64], values: &[i64]) {
        self.timestamps.extend_from_slice(timestamps);
        self.values.extend_from_slice(values);
    }
}
