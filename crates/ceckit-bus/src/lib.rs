//! CEC bus vocabulary and the adapter driver seam.
//!
//! Provides:
//! - Logical/physical bus addressing
//! - Protocol-level types (opcodes, key codes, power status, alerts)
//! - Inbound driver events
//! - The `CecDriver`/`CecConnection` traits implemented by a real adapter
//!   binding or the in-memory mock

pub mod address;
pub mod driver;
pub mod event;
pub mod mock;
pub mod types;

// Re-exports
pub use address::{LogicalAddress, LogicalAddressSet, PhysicalAddress};

pub use types::{
    AdapterInfo, AlertKind, DeviceType, DriverLogLevel, KeyCode, Opcode, PowerStatus, VendorId,
};

pub use driver::{CecConnection, CecDriver, DriverError, EventSink, OpenOptions};

pub use event::BusEvent;
