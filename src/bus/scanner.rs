//! Background device discovery over an address range
//!
//! A scan polls every address with `$AAM`, sleeping between polls so slow
//! modules have time to answer, and parses whatever accumulated in the
//! receive buffer once the range is exhausted. The scan runs on its own
//! thread and reports through a [`ScanHandle`]:
//!
//! - [`ScanEvent::Progress`] - percentage of the range already polled
//! - [`ScanEvent::Finished`] - devices found, in response order
//! - [`ScanEvent::Cancelled`] - [`ScanHandle::stop`] was called
//! - [`ScanEvent::Failed`] - the transport rejected a write
//!
//! The bus wait guard is held for the whole scan, so a command exchange
//! started meanwhile fails with [`DaqError::Busy`].

use super::Bus;
use crate::error::{DaqError, Result};
use crate::protocol::{COMMAND_LEAD, MAX_MODULES, POLL_COMMAND, TERMINATOR};
use crate::types::Device;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// Pause between two polls
pub const DEFAULT_SCAN_PAUSE: Duration = Duration::from_millis(500);

/// Half-open range of addresses to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    /// First address polled
    pub start: u16,
    /// One past the last address polled (at most 256)
    pub end: u16,
}

impl ScanRange {
    /// Build a range, clamping `end` to the 256 addressable modules
    pub fn new(start: u16, end: u16) -> Self {
        let end = end.min(MAX_MODULES);
        Self {
            start: start.min(end),
            end,
        }
    }

    /// The full address space
    pub fn full() -> Self {
        Self::new(0, MAX_MODULES)
    }

    /// Number of addresses polled
    pub fn len(&self) -> u16 {
        self.end - self.start
    }

    /// Whether nothing would be polled
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ScanRange {
    fn default() -> Self {
        Self::full()
    }
}

/// Progress and outcome of a scan
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// Percentage of the range polled so far (0..=100)
    Progress(u8),
    /// Scan completed with the devices that answered
    Finished(Vec<Device>),
    /// Scan stopped before completion; no devices are reported
    Cancelled,
    /// Scan aborted by a transport error
    Failed(String),
}

/// Caller side of a running scan
#[derive(Debug)]
pub struct ScanHandle {
    cancel: Sender<()>,
    events: Receiver<ScanEvent>,
    join: Option<JoinHandle<()>>,
}

impl ScanHandle {
    /// Ask the scan to stop; the sleep in progress is cut short
    pub fn stop(&self) {
        let _ = self.cancel.try_send(());
    }

    /// Event stream of the scan
    pub fn events(&self) -> &Receiver<ScanEvent> {
        &self.events
    }

    /// Non-blocking drain of pending events
    pub fn drain(&self) -> Vec<ScanEvent> {
        self.events.try_iter().collect()
    }

    /// Whether the scan thread has exited
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }

    /// Block until the scan ends and return its final event
    pub fn wait(mut self) -> ScanEvent {
        let mut last = ScanEvent::Cancelled;
        for event in self.events.iter() {
            let terminal = !matches!(event, ScanEvent::Progress(_));
            last = event;
            if terminal {
                break;
            }
        }
        self.join_thread();
        last
    }

    fn join_thread(&mut self) {
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!("Scan thread panicked");
            }
        }
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        self.stop();
        self.join_thread();
    }
}

/// Scans a bus for modules
#[derive(Debug, Clone)]
pub struct DeviceScanner {
    bus: Bus,
    pause: Duration,
}

impl DeviceScanner {
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            pause: DEFAULT_SCAN_PAUSE,
        }
    }

    /// Override the pause between polls
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Whether the bus is currently held by a scan or exchange
    pub fn is_scanning(&self) -> bool {
        self.bus.is_waiting()
    }

    /// Start scanning `range` on a background thread
    ///
    /// Fails with [`DaqError::Busy`] when a scan or exchange already holds
    /// the bus, and with [`DaqError::PortClosed`] when the link is closed.
    pub fn start(&self, range: ScanRange) -> Result<ScanHandle> {
        if !self.bus.is_open() {
            return Err(DaqError::PortClosed);
        }
        // Claimed here so a second start fails synchronously
        let guard = self.bus.begin_wait()?;
        let (cancel_tx, cancel_rx) = bounded(1);
        let (event_tx, event_rx) = unbounded();
        let bus = self.bus.clone();
        let pause = self.pause;

        tracing::info!("Scanning addresses {}..{}", range.start, range.end);
        let join = std::thread::Builder::new()
            .name("i7000-scan".to_string())
            .spawn(move || {
                let _guard = guard;
                let event = match scan(&bus, range, pause, &cancel_rx, &event_tx) {
                    Ok(devices) => {
                        tracing::info!("Scan finished, {} device(s) found", devices.len());
                        ScanEvent::Finished(devices)
                    }
                    Err(DaqError::Cancelled) => {
                        tracing::info!("Scan cancelled");
                        ScanEvent::Cancelled
                    }
                    Err(e) => {
                        tracing::warn!("Scan failed: {}", e);
                        ScanEvent::Failed(e.to_string())
                    }
                };
                let _ = event_tx.send(event);
            })?;

        Ok(ScanHandle {
            cancel: cancel_tx,
            events: event_rx,
            join: Some(join),
        })
    }
}

fn scan(
    bus: &Bus,
    range: ScanRange,
    pause: Duration,
    cancel: &Receiver<()>,
    events: &Sender<ScanEvent>,
) -> Result<Vec<Device>> {
    let codec = bus.codec();
    bus.buffer().clear();

    for address in range.start..range.end {
        let frame = codec.poll_frame(address as u8);
        bus.write(&frame)?;

        let percent = 100 * u32::from(address - range.start) / u32::from(range.len());
        let _ = events.send(ScanEvent::Progress(percent as u8));

        match cancel.recv_timeout(pause) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Err(DaqError::Cancelled),
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    let _ = events.send(ScanEvent::Progress(100));
    Ok(parse_scan_response(&bus.buffer().snapshot(), codec.checksum_enabled()))
}

/// Extract devices from the text accumulated during a scan
///
/// Tokens are split on the terminator. Each token of at least three
/// characters yields one device whose address is characters 1-2; the rest is
/// the name, minus the two checksum characters when checksums are on. An
/// echoed poll frame keeps its command letter, which is dropped.
pub fn parse_scan_response(buffer: &str, checksum_enabled: bool) -> Vec<Device> {
    buffer
        .split(TERMINATOR)
        .filter(|token| token.chars().count() >= 3)
        .filter_map(|token| {
            let mut chars = token.char_indices();
            let (_, lead) = chars.next()?;
            let (name_start, _) = chars.nth(1).map(|(i, c)| (i + c.len_utf8(), c))?;
            let address = token.get(lead.len_utf8()..name_start)?;

            let mut name = &token[name_start..];
            if checksum_enabled {
                let cut = name
                    .char_indices()
                    .rev()
                    .nth(1)
                    .map_or(0, |(i, _)| i);
                name = &name[..cut];
            }
            if lead == COMMAND_LEAD {
                name = name.strip_prefix(POLL_COMMAND).unwrap_or(name);
            }
            Some(Device::new(address, name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ReceiveBuffer, SimulatedTransport};
    use serial_test::serial;

    const FAST: Duration = Duration::from_millis(5);

    fn bus_with(transport: SimulatedTransport, buffer: ReceiveBuffer) -> Bus {
        Bus::new(transport, buffer)
    }

    #[test]
    fn test_parse_echoed_polls() {
        let devices = parse_scan_response("$01MFoo\r$02MBar\r", false);
        assert_eq!(
            devices,
            vec![Device::new("01", "Foo"), Device::new("02", "Bar")]
        );
    }

    #[test]
    fn test_parse_module_replies() {
        let devices = parse_scan_response("!017017\r!0A7024\r", false);
        assert_eq!(
            devices,
            vec![Device::new("01", "7017"), Device::new("0A", "7024")]
        );
    }

    #[test]
    fn test_parse_discards_short_tokens() {
        let devices = parse_scan_response("\r!0\r\r!017017\r", false);
        assert_eq!(devices, vec![Device::new("01", "7017")]);
    }

    #[test]
    fn test_parse_strips_checksum() {
        let devices = parse_scan_response("!0170175B\r!02A\r", true);
        assert_eq!(devices[0], Device::new("01", "7017"));
        // Too short to carry a checksum: empty name rather than a panic
        assert_eq!(devices[1], Device::new("02", ""));
    }

    #[test]
    fn test_range_clamps_to_address_space() {
        let range = ScanRange::new(10, 1000);
        assert_eq!(range.end, 256);
        assert_eq!(range.len(), 246);
        assert!(ScanRange::new(5, 5).is_empty());
    }

    #[test]
    #[serial]
    fn test_scan_finds_modules_and_reports_progress() {
        let buffer = ReceiveBuffer::new();
        let transport = SimulatedTransport::new(buffer.clone())
            .with_module(0x01, "7017")
            .with_module(0x03, "7024");
        let handle = transport.handle();
        let scanner = DeviceScanner::new(bus_with(transport, buffer)).with_pause(FAST);

        let scan = scanner.start(ScanRange::new(0, 4)).unwrap();
        let events: Vec<ScanEvent> = scan.events().iter().collect();

        let progress: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![0, 25, 50, 75, 100]);
        assert_eq!(
            events.last(),
            Some(&ScanEvent::Finished(vec![
                Device::new("01", "7017"),
                Device::new("03", "7024"),
            ]))
        );
        assert_eq!(handle.frames(), vec!["$00M\r", "$01M\r", "$02M\r", "$03M\r"]);
        drop(scan);
        assert!(!scanner.is_scanning());
    }

    #[test]
    #[serial]
    fn test_scan_with_checksum_and_echo() {
        let buffer = ReceiveBuffer::new();
        let transport = SimulatedTransport::new(buffer.clone())
            .with_module(0x02, "7060")
            .with_checksum(true)
            .with_echo(true);
        let bus = bus_with(transport, buffer);
        bus.set_checksum_enabled(true);
        let scanner = DeviceScanner::new(bus).with_pause(FAST);

        let event = scanner.start(ScanRange::new(2, 3)).unwrap().wait();
        // The echoed poll parses as a nameless entry for the same address
        match event {
            ScanEvent::Finished(devices) => {
                assert!(devices.contains(&Device::new("02", "7060")));
            }
            other => panic!("expected finished scan, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_stop_cancels_without_devices() {
        let buffer = ReceiveBuffer::new();
        let transport = SimulatedTransport::new(buffer.clone()).with_module(0x00, "7017");
        let scanner =
            DeviceScanner::new(bus_with(transport, buffer)).with_pause(Duration::from_secs(10));

        let scan = scanner.start(ScanRange::full()).unwrap();
        assert_eq!(scan.events().recv().unwrap(), ScanEvent::Progress(0));
        scan.stop();
        assert_eq!(scan.wait(), ScanEvent::Cancelled);
        assert!(!scanner.is_scanning());
    }

    #[test]
    #[serial]
    fn test_second_scan_is_busy() {
        let buffer = ReceiveBuffer::new();
        let transport = SimulatedTransport::new(buffer.clone());
        let scanner =
            DeviceScanner::new(bus_with(transport, buffer)).with_pause(Duration::from_secs(10));

        let first = scanner.start(ScanRange::full()).unwrap();
        assert!(scanner.is_scanning());
        assert!(matches!(scanner.start(ScanRange::full()), Err(DaqError::Busy)));
        first.stop();
        first.wait();
        assert!(scanner.start(ScanRange::new(0, 1)).is_ok());
    }

    #[test]
    #[serial]
    fn test_closed_port_fails_fast() {
        let buffer = ReceiveBuffer::new();
        let transport = SimulatedTransport::new(buffer.clone());
        transport.handle().set_open(false);
        let scanner = DeviceScanner::new(bus_with(transport, buffer));
        assert!(matches!(
            scanner.start(ScanRange::full()),
            Err(DaqError::PortClosed)
        ));
    }
}
