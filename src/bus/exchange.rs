//! Synchronous command exchange for the command console
//!
//! One call to [`CommandExchange::send`] writes one frame and waits, for at
//! most [`DEFAULT_RESPONSE_TIMEOUT`], until a terminator appears in the
//! receive buffer. A timeout is an ordinary, recoverable error carrying the
//! partial response.

use super::history::CommandHistory;
use super::Bus;
use crate::error::{DaqError, Result};
use crate::types::DeviceTable;
use std::time::Duration;

/// How long a module has to answer a command
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Send-and-await front end of the bus
#[derive(Debug)]
pub struct CommandExchange {
    bus: Bus,
    history: CommandHistory,
    timeout: Duration,
}

impl CommandExchange {
    /// Create an exchange with the default timeout and history capacity
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            history: CommandHistory::default(),
            timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Override the response timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a history of the given capacity
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history = CommandHistory::new(capacity);
        self
    }

    /// The bus this exchange talks to
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Response timeout in use
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Command history (read-only)
    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    /// Command history for up/down recall
    pub fn history_mut(&mut self) -> &mut CommandHistory {
        &mut self.history
    }

    /// Send a user-typed command and wait for the response
    ///
    /// The raw command is framed with the bus codec (checksum and
    /// terminator) and recorded in the history before waiting.
    pub fn send(&mut self, command: &str) -> Result<String> {
        let command = command.trim();
        if command.is_empty() {
            return Err(DaqError::InvalidCommand("empty command".to_string()));
        }

        let guard = self.bus.begin_wait()?;
        let frame = self.bus.codec().filter(command);
        self.bus.buffer().clear();
        self.bus.write(&frame)?;
        self.history.add_command(command);

        let result = self.bus.await_response(self.timeout);
        drop(guard);
        result
    }

    /// Rename a module and update the device table once it acknowledges
    ///
    /// The table is left untouched when the module does not answer or
    /// rejects the command.
    pub fn rename(&mut self, devices: &mut DeviceTable, address: &str, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DaqError::InvalidCommand("empty module name".to_string()));
        }
        if devices.get(address).is_none() {
            return Err(DaqError::DeviceNotFound(address.to_string()));
        }

        let frame = self.bus.codec().rename_frame(address, name);
        let response = self.bus.request(&frame, self.timeout)?;
        let body = self
            .bus
            .codec()
            .strip_checksum(&response)
            .ok_or_else(|| DaqError::Transport(format!("bad checksum in {:?}", response)))?;

        if !body.starts_with(crate::protocol::ACK_LEAD) {
            return Err(DaqError::InvalidCommand(format!(
                "module {} rejected rename: {:?}",
                address, body
            )));
        }

        devices.rename(address, name);
        tracing::info!("Module {} renamed to {}", address, name);
        Ok(())
    }

    /// Cancel an in-flight [`send`](Self::send) from another thread
    pub fn interrupt(&self) {
        self.bus.interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::buffer::ReceiveBuffer;
    use crate::bus::simulated::SimulatedTransport;
    use crate::bus::transport::MockTransport;
    use crate::types::Device;
    use mockall::predicate::eq;

    fn mock_bus(configure: impl FnOnce(&mut MockTransport, ReceiveBuffer)) -> Bus {
        let buffer = ReceiveBuffer::new();
        let mut transport = MockTransport::new();
        transport.expect_is_open().return_const(true);
        configure(&mut transport, buffer.clone());
        Bus::new(transport, buffer)
    }

    #[test]
    fn test_send_frames_command_and_records_history() {
        let bus = mock_bus(|transport, buffer| {
            transport
                .expect_write()
                .with(eq("$01M\r"))
                .times(1)
                .returning(move |_| {
                    buffer.append("!017017\r");
                    Ok(())
                });
        });
        let mut exchange = CommandExchange::new(bus);

        let response = exchange.send("$01M").unwrap();
        assert_eq!(response, "!017017\r");
        assert_eq!(exchange.history().commands().collect::<Vec<_>>(), vec!["$01M"]);
        assert!(!exchange.bus().is_waiting());
    }

    #[test]
    fn test_send_appends_checksum_when_enabled() {
        let bus = mock_bus(|transport, buffer| {
            transport
                .expect_write()
                .with(eq("$01MD2\r"))
                .times(1)
                .returning(move |_| {
                    buffer.append("!01\r");
                    Ok(())
                });
        });
        bus.set_checksum_enabled(true);
        let mut exchange = CommandExchange::new(bus);
        assert!(exchange.send("$01M").is_ok());
    }

    #[test]
    fn test_timeout_leaves_buffer_for_inspection() {
        let bus = mock_bus(|transport, buffer| {
            transport.expect_write().returning(move |_| {
                buffer.append("!01");
                Ok(())
            });
        });
        let mut exchange = CommandExchange::new(bus).with_timeout(Duration::from_millis(20));

        match exchange.send("$01M") {
            Err(DaqError::Timeout { partial, .. }) => assert_eq!(partial, "!01"),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(exchange.bus().buffer().snapshot(), "!01");
        // History records the command even when the module stays silent
        assert_eq!(exchange.history().len(), 1);
    }

    #[test]
    fn test_transport_error_is_reported() {
        let bus = mock_bus(|transport, _| {
            transport
                .expect_write()
                .returning(|_| Err(DaqError::Transport("port busy".to_string())));
        });
        let mut exchange = CommandExchange::new(bus);
        assert!(matches!(exchange.send("#01"), Err(DaqError::Transport(_))));
        assert!(!exchange.bus().is_waiting());
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let bus = mock_bus(|transport, _| {
            transport.expect_write().never();
        });
        let mut exchange = CommandExchange::new(bus);
        assert!(matches!(exchange.send("  "), Err(DaqError::InvalidCommand(_))));
    }

    #[test]
    fn test_rename_updates_table_after_ack() {
        let buffer = ReceiveBuffer::new();
        let transport = SimulatedTransport::new(buffer.clone()).with_module(0x01, "7017");
        let handle = transport.handle();
        let mut exchange = CommandExchange::new(Bus::new(transport, buffer));
        let mut devices = DeviceTable::from(vec![Device::new("01", "7017")]);

        exchange.rename(&mut devices, "01", "PUMP").unwrap();
        assert_eq!(devices.get("01").map(|d| d.name.as_str()), Some("PUMP"));
        assert_eq!(handle.module_name(0x01).as_deref(), Some("PUMP"));
    }

    #[test]
    fn test_rename_without_ack_keeps_table() {
        let buffer = ReceiveBuffer::new();
        // Module 02 is in the table but absent from the bus
        let transport = SimulatedTransport::new(buffer.clone()).with_module(0x01, "7017");
        let mut exchange = CommandExchange::new(Bus::new(transport, buffer))
            .with_timeout(Duration::from_millis(10));
        let mut devices = DeviceTable::from(vec![Device::new("02", "7024")]);

        assert!(matches!(
            exchange.rename(&mut devices, "02", "VALVE"),
            Err(DaqError::Timeout { .. })
        ));
        assert_eq!(devices.get("02").map(|d| d.name.as_str()), Some("7024"));
    }

    #[test]
    fn test_rename_unknown_device() {
        let buffer = ReceiveBuffer::new();
        let transport = SimulatedTransport::new(buffer.clone());
        let mut exchange = CommandExchange::new(Bus::new(transport, buffer));
        let mut devices = DeviceTable::default();
        assert!(matches!(
            exchange.rename(&mut devices, "05", "X"),
            Err(DaqError::DeviceNotFound(_))
        ));
    }
}
