//! Test data builders for creating test objects

use i7000_daq::bus::{Bus, ReceiveBuffer, SimulatedBusHandle, SimulatedTransport};
use i7000_daq::config::{keys, Preferences, SharedPreferences};
use std::time::Duration;

/// Builder for a bus of simulated modules
pub struct SimulatedBusBuilder {
    modules: Vec<(u8, String, f32)>,
    loopback: Vec<(u8, u8)>,
    checksum: bool,
    echo: bool,
    delay: Duration,
}

impl SimulatedBusBuilder {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            loopback: Vec::new(),
            checksum: false,
            echo: false,
            delay: Duration::ZERO,
        }
    }

    pub fn module(mut self, address: u8, name: &str) -> Self {
        self.modules.push((address, name.to_string(), 0.0));
        self
    }

    pub fn reading(mut self, address: u8, name: &str, reading: f32) -> Self {
        self.modules.push((address, name.to_string(), reading));
        self
    }

    pub fn loopback(mut self, input: u8, output: u8) -> Self {
        self.loopback.push((input, output));
        self
    }

    pub fn checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    pub fn echo(mut self, enabled: bool) -> Self {
        self.echo = enabled;
        self
    }

    /// Deliver replies from another thread after `delay`
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn build(self) -> (Bus, SimulatedBusHandle) {
        let buffer = ReceiveBuffer::new();
        let mut transport = SimulatedTransport::new(buffer.clone())
            .with_checksum(self.checksum)
            .with_echo(self.echo)
            .with_response_delay(self.delay);
        for (address, name, reading) in self.modules {
            transport = transport
                .with_module(address, name)
                .with_reading(address, reading);
        }
        for (input, output) in self.loopback {
            transport = transport.with_loopback(input, output);
        }
        let handle = transport.handle();
        let bus = Bus::new(transport, buffer);
        bus.set_checksum_enabled(self.checksum);
        (bus, handle)
    }
}

/// Builder for acquisition preferences
pub struct PreferencesBuilder {
    prefs: Preferences,
}

impl PreferencesBuilder {
    pub fn new() -> Self {
        Self {
            prefs: Preferences::default(),
        }
    }

    pub fn modules(mut self, count: u32) -> Self {
        self.prefs.set(keys::MODULE_COUNT, count);
        self
    }

    pub fn response_timeout(mut self, millis: u32) -> Self {
        self.prefs.set(keys::RESPONSE_TIMEOUT, millis);
        self
    }

    pub fn period(mut self, millis: u32) -> Self {
        self.prefs.set(keys::SIGNAL_PERIOD, millis);
        self
    }

    pub fn signal(mut self, form: i32, min: f64, max: f64) -> Self {
        self.prefs.set(keys::SIGNAL_FORM, form);
        self.prefs.set(keys::SIGNAL_MIN, min);
        self.prefs.set(keys::SIGNAL_MAX, max);
        self
    }

    pub fn build(self) -> Preferences {
        self.prefs
    }

    pub fn shared(self) -> SharedPreferences {
        self.prefs.into_shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_builder() {
        let prefs = PreferencesBuilder::new()
            .modules(3)
            .response_timeout(50)
            .build();

        assert_eq!(prefs.get_int(keys::MODULE_COUNT), Some(3));
        assert_eq!(prefs.get_int(keys::RESPONSE_TIMEOUT), Some(50));
    }
}
