//! Adapter connection lifecycle.
//!
//! Owns open/close/reconnect and the deferred-startup handoff. Lives on the
//! worker task; producers only ever observe the shared connectivity flag.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ceckit_bus::{
    AdapterInfo, CecConnection, CecDriver, LogicalAddress, OpenOptions, PhysicalAddress,
    PowerStatus, VendorId,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::engine::{ingest_event, Shared};

/// Delay between disconnect and connect on a reconnect.
const RECONNECT_SETTLE: Duration = Duration::from_secs(1);

/// Interval and attempt bound for power-status convergence polling.
const POWER_POLL_INTERVAL: Duration = Duration::from_millis(100);
const POWER_POLL_ATTEMPTS: u32 = 50;

/// One active bus device in a [`BusSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEntry {
    pub address: LogicalAddress,
    pub physical_address: PhysicalAddress,
    pub osd_name: String,
    pub vendor: VendorId,
    /// Power status; not queried for our own addresses.
    pub power: Option<PowerStatus>,
    /// Whether the address belongs to this process.
    pub is_own: bool,
}

/// Point-in-time control-plane view of the adapter and the bus.
#[derive(Debug, Clone, Serialize)]
pub struct BusSnapshot {
    pub connected: bool,
    pub adapters: Vec<AdapterInfo>,
    pub devices: Vec<DeviceEntry>,
}

impl BusSnapshot {
    pub(crate) fn disconnected() -> Self {
        Self {
            connected: false,
            adapters: vec![],
            devices: vec![],
        }
    }
}

impl std::fmt::Display for BusSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.connected {
            return write!(f, "adapter disconnected");
        }
        for (i, a) in self.adapters.iter().enumerate() {
            writeln!(
                f,
                "adapter {i} path {} port {} firmware {:04}",
                a.path, a.port, a.firmware_version
            )?;
        }
        writeln!(f, "active devices:")?;
        for d in &self.devices {
            let power = match d.power {
                Some(p) => p.to_string(),
                None => "-".to_string(),
            };
            writeln!(
                f,
                "  {:2}# {:<12} @{} {:<14} vendor {} power {}{}",
                d.address.value(),
                d.address.type_name(),
                d.physical_address,
                d.osd_name,
                d.vendor,
                power,
                if d.is_own { " (own)" } else { "" },
            )?;
        }
        Ok(())
    }
}

/// Connection lifecycle manager; all methods run on the worker task.
pub(crate) struct ConnectionManager {
    driver: Arc<dyn CecDriver>,
    config: Arc<EngineConfig>,
    shared: Arc<Shared>,
    conn: Option<Box<dyn CecConnection>>,
    adapters: Vec<AdapterInfo>,
}

impl ConnectionManager {
    pub fn new(
        driver: Arc<dyn CecDriver>,
        config: Arc<EngineConfig>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            driver,
            config,
            shared,
            conn: None,
            adapters: vec![],
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Mutable access to the open connection, if any.
    pub fn conn(&mut self) -> Option<&mut (dyn CecConnection + 'static)> {
        self.conn.as_deref_mut()
    }

    /// Open the first discovered adapter. No-op when already connected;
    /// leaves the state disconnected on any failure.
    pub async fn connect(&mut self) {
        if self.conn.is_some() {
            debug!("connect ignored, already connected");
            return;
        }

        let adapters = match self.driver.discover() {
            Ok(list) if !list.is_empty() => list,
            Ok(_) => {
                error!("no adapter found");
                return;
            }
            Err(e) => {
                error!("adapter discovery failed: {e}");
                return;
            }
        };
        for (i, a) in adapters.iter().enumerate() {
            debug!("adapter {i} path {} port {}", a.path, a.port);
        }

        let options = OpenOptions {
            device_name: self.config.device_name.clone(),
            hdmi_port: self.config.hdmi_port,
            base_device: self.config.base_device,
            device_types: self.config.device_types.clone(),
            combo_key_timeout: self.config.combo_key_timeout(),
            open_timeout: self.config.open_timeout(),
        };
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut conn = match self.driver.open(&adapters[0], &options, event_tx) {
            Ok(conn) => conn,
            Err(e) => {
                error!("{e}");
                return;
            }
        };
        self.spawn_event_pump(event_rx);

        if !self.config.physical_address.is_unset() {
            debug!("forcing physical address {}", self.config.physical_address);
            if let Err(e) = conn.set_physical_address(self.config.physical_address) {
                error!(
                    "unable to set physical address {}: {e}",
                    self.config.physical_address
                );
            }
        }

        // Enumerate the bus for diagnostics.
        let active = conn.active_devices();
        for address in active.iter() {
            let physical = conn.device_physical_address(address);
            let name = conn.device_osd_name(address);
            let vendor = conn.device_vendor_id(address);
            debug!(
                "  {:<12} {}@{} {} vendor {}",
                address.type_name(),
                address.value(),
                physical,
                name,
                vendor
            );
        }

        self.conn = Some(conn);
        self.adapters = adapters;
        self.shared.connected.store(true, Ordering::SeqCst);
        info!("adapter connected on port {}", self.adapters[0].port);

        if self.shared.deferred_startup.swap(false, Ordering::SeqCst) {
            info!("running deferred startup command lists");
            if self.config.started_manually {
                self.shared.push_list(&self.config.on_manual_start);
            }
            self.shared.push_list(&self.config.on_start);
        }
    }

    /// Close the adapter. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.set_inactive_view() {
                debug!("set_inactive_view on disconnect failed: {e}");
            }
            conn.close();
            info!("adapter disconnected");
        }
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    /// Disconnect, settle, connect.
    pub async fn reconnect(&mut self) {
        info!("reconnecting adapter");
        self.disconnect();
        tokio::time::sleep(RECONNECT_SETTLE).await;
        self.connect().await;
    }

    /// Poll the device at `address` until it reports `target`, an unknown
    /// status, or the attempt bound is reached. Blocks only the worker.
    pub async fn wait_for_power(&mut self, address: LogicalAddress, target: PowerStatus) {
        for _ in 0..POWER_POLL_ATTEMPTS {
            tokio::time::sleep(POWER_POLL_INTERVAL).await;
            let status = match self.conn() {
                Some(conn) => conn.device_power_status(address),
                None => return,
            };
            if status == target || status == PowerStatus::Unknown {
                return;
            }
        }
        debug!(
            "device {} did not reach power state {} in time",
            address, target
        );
    }

    /// Point-in-time adapter and device table view.
    pub fn snapshot(&mut self) -> BusSnapshot {
        let adapters = self.adapters.clone();
        let Some(conn) = self.conn.as_deref_mut() else {
            error!("list devices: adapter disconnected");
            return BusSnapshot::disconnected();
        };

        let active = conn.active_devices();
        let own = conn.own_addresses();
        let mut devices = Vec::new();
        for address in active.iter() {
            let is_own = own.contains(address);
            devices.push(DeviceEntry {
                address,
                physical_address: conn.device_physical_address(address),
                osd_name: conn.device_osd_name(address),
                vendor: conn.device_vendor_id(address),
                power: if is_own {
                    None
                } else {
                    Some(conn.device_power_status(address))
                },
                is_own,
            });
        }
        BusSnapshot {
            connected: true,
            adapters,
            devices,
        }
    }

    /// Forward driver events into the engine until the driver drops its
    /// sender (i.e. the connection closed).
    fn spawn_event_pump(&self, mut events: mpsc::UnboundedReceiver<ceckit_bus::BusEvent>) {
        let shared = self.shared.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                ingest_event(&shared, &config, event);
            }
            debug!("driver event channel closed");
        });
    }
}
