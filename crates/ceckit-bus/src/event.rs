//! Inbound driver events.
//!
//! The driver layer raises these from its own callback threads; the engine
//! receives them through a channel and turns each actionable event into
//! exactly one queued command.

use crate::address::LogicalAddress;
use crate::types::{AlertKind, DriverLogLevel, KeyCode, Opcode};

/// An asynchronous event raised by the adapter driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A key was pressed on a remote somewhere on the bus.
    ///
    /// A nonzero duration marks an auto-repeat of a still-held key.
    KeyPress { code: KeyCode, duration_ms: u32 },
    /// A protocol command addressed to us was received.
    CommandReceived {
        opcode: Opcode,
        initiator: LogicalAddress,
    },
    /// Connectivity alert.
    Alert(AlertKind),
    /// Driver-internal log message.
    Log {
        level: DriverLogLevel,
        message: String,
    },
    /// A device was (de)activated as the active source.
    SourceActivated {
        address: LogicalAddress,
        activated: bool,
    },
    /// The adapter configuration changed.
    ConfigurationChanged,
}
