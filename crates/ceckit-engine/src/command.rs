//! Command data structures.
//!
//! Defines the closed command type executed by the worker, the device
//! reference it targets, and the serial counter backing synchronous waits.

use std::sync::Mutex;

use ceckit_bus::{KeyCode, LogicalAddress, Opcode, PhysicalAddress};
use serde::{Deserialize, Serialize};

use crate::keymap::HostKey;

/// Correlation token matching a synchronous waiter to its command.
pub type Serial = u16;

/// Serials wrap back to 1 past this value.
pub const SERIAL_MAX: Serial = 10_000;

/// A device as named by configuration, with the resolver's address cache.
///
/// `resolved` is filled in by the address resolver and is never re-resolved
/// once set for a given instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// HDMI topology address, unset when the device is named logically.
    #[serde(default)]
    pub physical_address: PhysicalAddress,
    /// Configured logical address, used as fallback and disambiguator.
    #[serde(default)]
    pub configured: LogicalAddress,
    /// Resolver cache; not part of the configuration surface.
    #[serde(skip)]
    pub resolved: LogicalAddress,
}

impl Device {
    /// Device named by its HDMI topology position.
    pub fn by_physical(address: PhysicalAddress) -> Self {
        Self {
            physical_address: address,
            ..Self::default()
        }
    }

    /// Device named by a configured logical address.
    pub fn by_logical(address: LogicalAddress) -> Self {
        Self {
            configured: address,
            ..Self::default()
        }
    }
}

/// A command executed by the worker.
///
/// One variant per kind, carrying only the fields that kind needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CecCommand {
    /// Terminate the worker after disconnecting.
    Exit,
    /// Deliver a received bus key press to the host.
    KeyPress { code: KeyCode },
    /// Declare this process the active source.
    MakeActive,
    /// Withdraw this process as active source.
    MakeInactive,
    /// Power on a device and wait for convergence.
    PowerOn { device: Device },
    /// Put a device into standby and wait for convergence.
    PowerOff { device: Device },
    /// Send the text-view-on opcode to a device.
    TextViewOn { device: Device },
    /// Forward a host key press to a bus device.
    HostKey { key: HostKey, device: Device },
    /// Run a shell command under the script supervisor.
    ExecShell { command: String },
    /// Run one of two command lists depending on a device's power state.
    ExecToggle {
        device: Device,
        on_power_on: Vec<CecCommand>,
        on_power_off: Vec<CecCommand>,
    },
    /// React to a protocol opcode received from the bus.
    BusCommand {
        opcode: Opcode,
        initiator: LogicalAddress,
    },
    /// Disconnect, settle, connect.
    Reconnect,
    /// Open the adapter if not already open.
    Connect,
    /// Close the adapter if open.
    Disconnect,
}

impl CecCommand {
    /// Whether executing this kind requires an open adapter connection.
    ///
    /// Kinds that do are dropped (with a logged error) while disconnected;
    /// everything else always runs.
    pub fn needs_adapter(&self) -> bool {
        matches!(
            self,
            CecCommand::MakeActive
                | CecCommand::MakeInactive
                | CecCommand::PowerOn { .. }
                | CecCommand::PowerOff { .. }
                | CecCommand::TextViewOn { .. }
                | CecCommand::HostKey { .. }
                | CecCommand::ExecToggle { .. }
        )
    }

    /// Get the kind name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CecCommand::Exit => "exit",
            CecCommand::KeyPress { .. } => "key_press",
            CecCommand::MakeActive => "make_active",
            CecCommand::MakeInactive => "make_inactive",
            CecCommand::PowerOn { .. } => "power_on",
            CecCommand::PowerOff { .. } => "power_off",
            CecCommand::TextViewOn { .. } => "text_view_on",
            CecCommand::HostKey { .. } => "host_key",
            CecCommand::ExecShell { .. } => "exec_shell",
            CecCommand::ExecToggle { .. } => "exec_toggle",
            CecCommand::BusCommand { .. } => "bus_command",
            CecCommand::Reconnect => "reconnect",
            CecCommand::Connect => "connect",
            CecCommand::Disconnect => "disconnect",
        }
    }
}

/// Wrap-around serial counter, one per engine instance.
///
/// Uniqueness is relied upon only within the window of concurrently
/// outstanding synchronous waits, which is far narrower than the wrap.
#[derive(Debug, Default)]
pub struct SerialCounter {
    next: Mutex<Serial>,
}

impl SerialCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next serial, wrapping from [`SERIAL_MAX`] back to 1.
    pub fn next(&self) -> Serial {
        let mut next = self.next.lock().unwrap();
        *next += 1;
        if *next > SERIAL_MAX {
            *next = 1;
        }
        *next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_strictly_increasing_then_wraps() {
        let counter = SerialCounter::new();
        let mut prev = 0;
        for _ in 0..SERIAL_MAX {
            let s = counter.next();
            assert_eq!(s, prev + 1);
            prev = s;
        }
        // 10_000 -> 1
        assert_eq!(prev, SERIAL_MAX);
        assert_eq!(counter.next(), 1);
    }

    #[test]
    fn test_needs_adapter() {
        assert!(CecCommand::MakeActive.needs_adapter());
        assert!(CecCommand::PowerOn {
            device: Device::by_logical(LogicalAddress::Tv)
        }
        .needs_adapter());

        // Connection management and host-side kinds always run.
        assert!(!CecCommand::Exit.needs_adapter());
        assert!(!CecCommand::Connect.needs_adapter());
        assert!(!CecCommand::Disconnect.needs_adapter());
        assert!(!CecCommand::Reconnect.needs_adapter());
        assert!(!CecCommand::KeyPress { code: KeyCode(1) }.needs_adapter());
        assert!(!CecCommand::ExecShell {
            command: "true".to_string()
        }
        .needs_adapter());
        assert!(!CecCommand::BusCommand {
            opcode: Opcode::STANDBY,
            initiator: LogicalAddress::Tv
        }
        .needs_adapter());
    }

    #[test]
    fn test_command_serde() {
        let commands = vec![
            CecCommand::PowerOn {
                device: Device::by_physical(PhysicalAddress(0x1000)),
            },
            CecCommand::MakeActive,
            CecCommand::ExecShell {
                command: "echo hi".to_string(),
            },
        ];
        let json = serde_json::to_string(&commands).unwrap();
        let back: Vec<CecCommand> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, commands);
    }

    #[test]
    fn test_device_constructors() {
        let d = Device::by_physical(PhysicalAddress(0x2000));
        assert_eq!(d.physical_address, PhysicalAddress(0x2000));
        assert!(d.configured.is_unknown());
        assert!(d.resolved.is_unknown());

        let d = Device::by_logical(LogicalAddress::AudioSystem);
        assert!(d.physical_address.is_unset());
        assert_eq!(d.configured, LogicalAddress::AudioSystem);
    }
}
