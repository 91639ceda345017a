//! Protocol-level bus types.

use serde::{Deserialize, Serialize};

/// Protocol opcode exchanged between bus devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Opcode(pub u8);

impl Opcode {
    pub const IMAGE_VIEW_ON: Opcode = Opcode(0x04);
    pub const TEXT_VIEW_ON: Opcode = Opcode(0x0d);
    pub const STANDBY: Opcode = Opcode(0x36);
    pub const ACTIVE_SOURCE: Opcode = Opcode(0x82);
    pub const ROUTING_CHANGE: Opcode = Opcode(0x80);
    pub const GIVE_DEVICE_POWER_STATUS: Opcode = Opcode(0x8f);
    pub const USER_CONTROL_PRESSED: Opcode = Opcode(0x44);
    pub const USER_CONTROL_RELEASE: Opcode = Opcode(0x45);
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// User-control key code carried by key press events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(pub u8);

impl KeyCode {
    /// Highest defined user-control code.
    pub const MAX: KeyCode = KeyCode(0x76);

    /// Check whether the code is within the defined range.
    pub fn is_valid(&self) -> bool {
        self.0 <= Self::MAX.0
    }
}

impl std::fmt::Display for KeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// Vendor identifier reported by a bus device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorId(pub u32);

impl std::fmt::Display for VendorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

/// Power status reported by a bus device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PowerStatus {
    On,
    Standby,
    TransitionStandbyToOn,
    TransitionOnToStandby,
    #[default]
    Unknown,
}

impl PowerStatus {
    /// Get the status name.
    pub fn type_name(&self) -> &'static str {
        match self {
            PowerStatus::On => "on",
            PowerStatus::Standby => "standby",
            PowerStatus::TransitionStandbyToOn => "standby -> on",
            PowerStatus::TransitionOnToStandby => "on -> standby",
            PowerStatus::Unknown => "unknown",
        }
    }

    /// Check for the on state or the transition into it.
    pub fn is_on(&self) -> bool {
        matches!(
            self,
            PowerStatus::On | PowerStatus::TransitionStandbyToOn
        )
    }
}

impl std::fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Device role registered with the adapter at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Tv,
    RecordingDevice,
    Tuner,
    PlaybackDevice,
    AudioSystem,
}

/// Connectivity alert raised asynchronously by the driver layer.
///
/// Only `ConnectionLost` triggers automatic action (a priority reconnect);
/// the rest are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    ConnectionLost,
    TvPollFailed,
    ServiceDevice,
    PermissionError,
    PortBusy,
    PhysicalAddressError,
}

impl AlertKind {
    /// Get the alert name.
    pub fn type_name(&self) -> &'static str {
        match self {
            AlertKind::ConnectionLost => "connection lost",
            AlertKind::TvPollFailed => "TV poll failed",
            AlertKind::ServiceDevice => "service device",
            AlertKind::PermissionError => "permission error",
            AlertKind::PortBusy => "port busy",
            AlertKind::PhysicalAddressError => "physical address error",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Severity of a driver-originated log message.
///
/// Levels form a bitmask so a configured mask can select which driver
/// messages are forwarded to the process log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverLogLevel {
    Error,
    Warning,
    Notice,
    Traffic,
    Debug,
}

impl DriverLogLevel {
    /// Get the mask bit for this level.
    pub fn mask(&self) -> u8 {
        match self {
            DriverLogLevel::Error => 0x01,
            DriverLogLevel::Warning => 0x02,
            DriverLogLevel::Notice => 0x04,
            DriverLogLevel::Traffic => 0x08,
            DriverLogLevel::Debug => 0x10,
        }
    }

    /// Get the level name.
    pub fn type_name(&self) -> &'static str {
        match self {
            DriverLogLevel::Error => "error",
            DriverLogLevel::Warning => "warning",
            DriverLogLevel::Notice => "notice",
            DriverLogLevel::Traffic => "traffic",
            DriverLogLevel::Debug => "debug",
        }
    }
}

impl std::fmt::Display for DriverLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// A local adapter endpoint reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterInfo {
    /// Device path (e.g. `/dev/ttyACM0`).
    pub path: String,
    /// Port name used to open the adapter.
    pub port: String,
    /// Adapter firmware version.
    pub firmware_version: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_code_bounds() {
        assert!(KeyCode(0).is_valid());
        assert!(KeyCode::MAX.is_valid());
        assert!(!KeyCode(0x77).is_valid());
    }

    #[test]
    fn test_power_status_is_on() {
        assert!(PowerStatus::On.is_on());
        assert!(PowerStatus::TransitionStandbyToOn.is_on());
        assert!(!PowerStatus::Standby.is_on());
        assert!(!PowerStatus::Unknown.is_on());
    }

    #[test]
    fn test_config_visible_json_forms() {
        // Newtypes serialize transparently, enums by variant name; config
        // loaders target these forms directly.
        assert_eq!(serde_json::to_string(&Opcode::STANDBY).unwrap(), "54");
        assert_eq!(
            serde_json::from_str::<Opcode>("54").unwrap(),
            Opcode::STANDBY
        );
        assert_eq!(serde_json::to_string(&PowerStatus::On).unwrap(), "\"On\"");

        let info: AdapterInfo = serde_json::from_str(
            r#"{"path":"/dev/ttyACM0","port":"RPI","firmware_version":9}"#,
        )
        .unwrap();
        assert_eq!(info.port, "RPI");
        assert_eq!(info.firmware_version, 9);
    }

    #[test]
    fn test_log_level_masks_disjoint() {
        let levels = [
            DriverLogLevel::Error,
            DriverLogLevel::Warning,
            DriverLogLevel::Notice,
            DriverLogLevel::Traffic,
            DriverLogLevel::Debug,
        ];
        let mut seen = 0u8;
        for l in levels {
            assert_eq!(seen & l.mask(), 0);
            seen |= l.mask();
        }
    }
}
