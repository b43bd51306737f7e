//! Core data types shared by the bus and experiment modules

use serde::{Deserialize, Serialize};

/// A module discovered on the bus
///
/// Identity is the two-character hex address; the name is whatever the
/// module reported (or was renamed to).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Two uppercase hex characters, e.g. `"0A"`
    pub address: String,
    /// Module name as reported by `$AAM`
    pub name: String,
}

impl Device {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// Numeric address, when the address text is valid hex
    pub fn address_value(&self) -> Option<u8> {
        crate::protocol::parse_address(&self.address)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.address, self.name)
    }
}

/// Devices in discovery order, at most one per address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceTable {
    devices: Vec<Device>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a device; an existing entry with the same address is replaced
    /// in place
    pub fn insert(&mut self, device: Device) {
        match self.devices.iter_mut().find(|d| d.address == device.address) {
            Some(existing) => *existing = device,
            None => self.devices.push(device),
        }
    }

    pub fn get(&self, address: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.address == address)
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.address == address)
    }

    /// Change the name of the device at `address`; returns false when absent
    pub fn rename(&mut self, address: &str, name: &str) -> bool {
        match self.get_mut(address) {
            Some(device) => {
                device.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Replace the whole table, e.g. with the result of a finished scan
    pub fn replace(&mut self, devices: impl IntoIterator<Item = Device>) {
        self.devices.clear();
        devices.into_iter().for_each(|d| self.insert(d));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl From<Vec<Device>> for DeviceTable {
    fn from(devices: Vec<Device>) -> Self {
        devices.into_iter().collect()
    }
}

impl FromIterator<Device> for DeviceTable {
    fn from_iter<I: IntoIterator<Item = Device>>(iter: I) -> Self {
        let mut table = Self::default();
        iter.into_iter().for_each(|d| table.insert(d));
        table
    }
}

impl<'a> IntoIterator for &'a DeviceTable {
    type Item = &'a Device;
    type IntoIter = std::slice::Iter<'a, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

/// One decoded acquisition row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRow {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// One scaled value per module
    pub values: Vec<i64>,
}
