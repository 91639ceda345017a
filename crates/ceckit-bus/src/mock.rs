//! In-memory adapter driver for tests.
//!
//! `MockDriver` simulates a single local adapter and a scriptable population
//! of bus devices. Tests hold a [`MockHandle`] to stage devices, inject
//! failures, emit driver events and inspect the calls the engine made.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::address::{LogicalAddress, LogicalAddressSet, PhysicalAddress};
use crate::driver::{CecConnection, CecDriver, DriverError, EventSink, OpenOptions};
use crate::event::BusEvent;
use crate::types::{AdapterInfo, KeyCode, Opcode, PowerStatus, VendorId};

/// A simulated bus device.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub physical_address: PhysicalAddress,
    pub power: PowerStatus,
    pub osd_name: String,
    pub vendor: VendorId,
    /// Whether the device answers liveness polls.
    pub responds_to_poll: bool,
}

impl MockDevice {
    pub fn new(physical_address: PhysicalAddress) -> Self {
        Self {
            physical_address,
            power: PowerStatus::Standby,
            osd_name: "Device".to_string(),
            vendor: VendorId(0),
            responds_to_poll: true,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    devices: BTreeMap<u8, MockDevice>,
    own: LogicalAddressSet,
    fail_discovery: bool,
    fail_open: bool,
    open_count: usize,
    connected: bool,
    calls: Vec<String>,
    events: Option<EventSink>,
}

/// Test-side handle onto the shared mock state.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Stage a device at `address`.
    pub fn add_device(&self, address: LogicalAddress, device: MockDevice) {
        let mut state = self.state.lock().unwrap();
        state.devices.insert(address.value(), device);
    }

    /// Mark `address` as owned by the process under test.
    pub fn add_own_address(&self, address: LogicalAddress) {
        self.state.lock().unwrap().own.insert(address);
    }

    /// Change the power status of a staged device.
    pub fn set_power(&self, address: LogicalAddress, power: PowerStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(d) = state.devices.get_mut(&address.value()) {
            d.power = power;
        }
    }

    /// Make discovery return no adapters.
    pub fn fail_discovery(&self, fail: bool) {
        self.state.lock().unwrap().fail_discovery = fail;
    }

    /// Make the next open attempts fail.
    pub fn fail_open(&self, fail: bool) {
        self.state.lock().unwrap().fail_open = fail;
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open_count
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    /// Calls recorded by the connection, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Emit a driver event into the engine, as a driver callback would.
    /// Returns false when no connection is open or the engine went away.
    pub fn emit(&self, event: BusEvent) -> bool {
        let sink = self.state.lock().unwrap().events.clone();
        match sink {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

/// In-memory [`CecDriver`] implementation.
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Get a test handle onto the driver's shared state.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl CecDriver for MockDriver {
    fn discover(&self) -> Result<Vec<AdapterInfo>, DriverError> {
        let state = self.state.lock().unwrap();
        if state.fail_discovery {
            return Ok(vec![]);
        }
        Ok(vec![AdapterInfo {
            path: "/dev/mock0".to_string(),
            port: "mock0".to_string(),
            firmware_version: 9,
        }])
    }

    fn open(
        &self,
        adapter: &AdapterInfo,
        options: &OpenOptions,
        events: EventSink,
    ) -> Result<Box<dyn CecConnection>, DriverError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(DriverError::Open {
                port: adapter.port.clone(),
                reason: "simulated failure".to_string(),
            });
        }
        state.open_count += 1;
        state.connected = true;
        state.events = Some(events);
        // Register a default own address unless the test staged one.
        if state.own.is_empty() {
            state.own.insert(LogicalAddress::RecordingDevice1);
        }
        state
            .calls
            .push(format!("open({})", options.device_name));
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
        }))
    }
}

/// Connection half of the mock; records every operation.
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    /// Build a standalone connection over fresh state (for unit tests that
    /// bypass the driver).
    pub fn standalone() -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            connected: true,
            ..MockState::default()
        }));
        let handle = MockHandle {
            state: state.clone(),
        };
        (Self { state }, handle)
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl CecConnection for MockConnection {
    fn set_physical_address(&mut self, address: PhysicalAddress) -> Result<(), DriverError> {
        self.record(format!("set_physical_address({address})"));
        Ok(())
    }

    fn active_devices(&mut self) -> LogicalAddressSet {
        let state = self.state.lock().unwrap();
        state
            .devices
            .keys()
            .filter_map(|v| LogicalAddress::from_value(*v))
            .chain(state.own.iter())
            .collect()
    }

    fn own_addresses(&mut self) -> LogicalAddressSet {
        self.state.lock().unwrap().own
    }

    fn device_physical_address(&mut self, address: LogicalAddress) -> PhysicalAddress {
        let state = self.state.lock().unwrap();
        state
            .devices
            .get(&address.value())
            .map(|d| d.physical_address)
            .unwrap_or(PhysicalAddress::UNSET)
    }

    fn device_vendor_id(&mut self, address: LogicalAddress) -> VendorId {
        let state = self.state.lock().unwrap();
        state
            .devices
            .get(&address.value())
            .map(|d| d.vendor)
            .unwrap_or_default()
    }

    fn device_osd_name(&mut self, address: LogicalAddress) -> String {
        let state = self.state.lock().unwrap();
        state
            .devices
            .get(&address.value())
            .map(|d| d.osd_name.clone())
            .unwrap_or_default()
    }

    fn device_power_status(&mut self, address: LogicalAddress) -> PowerStatus {
        let state = self.state.lock().unwrap();
        state
            .devices
            .get(&address.value())
            .map(|d| d.power)
            .unwrap_or(PowerStatus::Unknown)
    }

    fn power_on(&mut self, address: LogicalAddress) -> Result<(), DriverError> {
        self.record(format!("power_on({})", address.value()));
        let mut state = self.state.lock().unwrap();
        if let Some(d) = state.devices.get_mut(&address.value()) {
            d.power = PowerStatus::On;
        }
        Ok(())
    }

    fn standby(&mut self, address: LogicalAddress) -> Result<(), DriverError> {
        self.record(format!("standby({})", address.value()));
        let mut state = self.state.lock().unwrap();
        if let Some(d) = state.devices.get_mut(&address.value()) {
            d.power = PowerStatus::Standby;
        }
        Ok(())
    }

    fn set_active_source(&mut self) -> Result<(), DriverError> {
        self.record("set_active_source".to_string());
        Ok(())
    }

    fn set_inactive_view(&mut self) -> Result<(), DriverError> {
        self.record("set_inactive_view".to_string());
        Ok(())
    }

    fn transmit(
        &mut self,
        opcode: Opcode,
        destination: LogicalAddress,
    ) -> Result<(), DriverError> {
        self.record(format!("transmit({opcode}, {})", destination.value()));
        Ok(())
    }

    fn poll_device(&mut self, address: LogicalAddress) -> bool {
        let state = self.state.lock().unwrap();
        state
            .devices
            .get(&address.value())
            .map(|d| d.responds_to_poll)
            .unwrap_or(false)
    }

    fn send_key_press(
        &mut self,
        address: LogicalAddress,
        code: KeyCode,
    ) -> Result<(), DriverError> {
        self.record(format!("key_press({}, {code})", address.value()));
        Ok(())
    }

    fn send_key_release(&mut self, address: LogicalAddress) -> Result<(), DriverError> {
        self.record(format!("key_release({})", address.value()));
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.events = None;
        state.calls.push("close".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_calls() {
        let (mut conn, handle) = MockConnection::standalone();
        handle.add_device(
            LogicalAddress::Tv,
            MockDevice::new(PhysicalAddress(0x0000)),
        );

        conn.power_on(LogicalAddress::Tv).unwrap();
        assert_eq!(
            conn.device_power_status(LogicalAddress::Tv),
            PowerStatus::On
        );
        assert_eq!(handle.calls(), vec!["power_on(0)".to_string()]);
    }

    #[test]
    fn test_mock_unknown_device_queries() {
        let (mut conn, _handle) = MockConnection::standalone();
        assert_eq!(
            conn.device_power_status(LogicalAddress::Tuner1),
            PowerStatus::Unknown
        );
        assert!(!conn.poll_device(LogicalAddress::Tuner1));
        assert!(conn
            .device_physical_address(LogicalAddress::Tuner1)
            .is_unset());
    }
}
