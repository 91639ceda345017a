//! The adapter driver seam.
//!
//! A `CecDriver` discovers and opens local adapters; an open adapter is a
//! `CecConnection`. The engine owns the connection on its single worker task;
//! the driver delivers asynchronous events through the `EventSink` channel
//! handed over at open time, so driver callback threads never touch engine
//! state directly.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::address::{LogicalAddress, LogicalAddressSet, PhysicalAddress};
use crate::event::BusEvent;
use crate::types::{AdapterInfo, DeviceType, KeyCode, Opcode, PowerStatus, VendorId};

/// Channel end the driver uses to raise [`BusEvent`]s.
pub type EventSink = mpsc::UnboundedSender<BusEvent>;

/// Driver error types.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("adapter discovery failed: {0}")]
    Discovery(String),

    #[error("unable to open adapter on port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("adapter not connected")]
    NotConnected,

    #[error("operation failed: {0}")]
    Operation(String),
}

/// Settings applied when opening an adapter.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// OSD name this process registers on the bus.
    pub device_name: String,
    /// HDMI port the adapter is plugged into.
    pub hdmi_port: u8,
    /// Device the adapter is connected to, if known.
    pub base_device: LogicalAddress,
    /// Roles to register on the bus; the driver falls back to a recording
    /// device when empty.
    pub device_types: Vec<DeviceType>,
    /// Timeout for combo key handling in the driver.
    pub combo_key_timeout: Duration,
    /// Bounded time allowed for the open itself.
    pub open_timeout: Duration,
}

/// Adapter discovery and opening.
pub trait CecDriver: Send + Sync {
    /// List locally attached adapters.
    fn discover(&self) -> Result<Vec<AdapterInfo>, DriverError>;

    /// Open the given adapter. Events raised by the driver after a
    /// successful open flow through `events` until the connection is closed.
    fn open(
        &self,
        adapter: &AdapterInfo,
        options: &OpenOptions,
        events: EventSink,
    ) -> Result<Box<dyn CecConnection>, DriverError>;
}

/// An open adapter connection.
///
/// Not safe for concurrent use; the engine serializes every call through its
/// worker task.
pub trait CecConnection: Send {
    /// Override the physical address reported on the bus.
    fn set_physical_address(&mut self, address: PhysicalAddress) -> Result<(), DriverError>;

    /// Addresses of devices currently active on the bus.
    fn active_devices(&mut self) -> LogicalAddressSet;

    /// Addresses owned by this process itself.
    fn own_addresses(&mut self) -> LogicalAddressSet;

    /// Physical address reported by the device at `address`.
    fn device_physical_address(&mut self, address: LogicalAddress) -> PhysicalAddress;

    /// Vendor id reported by the device at `address`.
    fn device_vendor_id(&mut self, address: LogicalAddress) -> VendorId;

    /// OSD name reported by the device at `address`.
    fn device_osd_name(&mut self, address: LogicalAddress) -> String;

    /// Power status reported by the device at `address`.
    fn device_power_status(&mut self, address: LogicalAddress) -> PowerStatus;

    /// Power on the device at `address`.
    fn power_on(&mut self, address: LogicalAddress) -> Result<(), DriverError>;

    /// Put the device at `address` into standby.
    fn standby(&mut self, address: LogicalAddress) -> Result<(), DriverError>;

    /// Declare this process the active source.
    fn set_active_source(&mut self) -> Result<(), DriverError>;

    /// Withdraw this process as active source.
    fn set_inactive_view(&mut self) -> Result<(), DriverError>;

    /// Transmit a raw opcode to `destination`.
    fn transmit(&mut self, opcode: Opcode, destination: LogicalAddress)
        -> Result<(), DriverError>;

    /// Poll `address` for liveness.
    fn poll_device(&mut self, address: LogicalAddress) -> bool;

    /// Send a user-control key press to `address`.
    fn send_key_press(
        &mut self,
        address: LogicalAddress,
        code: KeyCode,
    ) -> Result<(), DriverError>;

    /// Send the matching key release to `address`.
    fn send_key_release(&mut self, address: LogicalAddress) -> Result<(), DriverError>;

    /// Close the connection and release driver resources.
    fn close(&mut self);
}
