//! Sample sources for recording without a bus

use i7000_daq::experiment::SampleSource;
use i7000_daq::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Source producing `value + n` on every channel for row `n`
pub struct CountingSource {
    channels: usize,
    base: f64,
    rows: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new(channels: usize, base: f64) -> Self {
        Self {
            channels,
            base,
            rows: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter shared with the recording thread
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.rows.clone()
    }
}

impl SampleSource for CountingSource {
    fn read_row(&mut self, _reference: Option<f32>) -> Result<Vec<String>> {
        let n = self.rows.fetch_add(1, Ordering::SeqCst);
        Ok((0..self.channels)
            .map(|c| format!("{:.3}", self.base + n as f64 + c as f64 / 10.0))
            .collect())
    }
}
