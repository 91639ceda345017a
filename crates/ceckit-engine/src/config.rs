//! Engine configuration.
//!
//! The engine assumes a validated configuration at construction time; the
//! loader producing it (XML, TOML, ...) is an external collaborator. All
//! structs are serde-derived so such a loader can target them directly.

use std::time::Duration;

use ceckit_bus::{DeviceType, DriverLogLevel, LogicalAddress, Opcode, PhysicalAddress};
use serde::{Deserialize, Serialize};

use crate::command::CecCommand;

/// Reaction to a protocol opcode received from the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusCommandHandler {
    /// Opcode that triggers this handler.
    pub opcode: Opcode,
    /// Only react when the opcode came from this address, if set.
    #[serde(default)]
    pub initiator: Option<LogicalAddress>,
    /// Commands pushed to the main queue when the handler matches.
    pub commands: Vec<CecCommand>,
}

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// OSD name this process registers on the bus.
    pub device_name: String,
    /// HDMI port the adapter is plugged into.
    pub hdmi_port: u8,
    /// Device the adapter hangs off, if known.
    pub base_device: LogicalAddress,
    /// Physical address override; unset means adapter auto-detection.
    pub physical_address: PhysicalAddress,
    /// Roles to register on the bus (recording device when empty).
    pub device_types: Vec<DeviceType>,
    /// Driver-side combo key timeout in milliseconds.
    pub combo_key_timeout_ms: u32,
    /// Bounded timeout for opening a discovered adapter, in milliseconds.
    pub open_timeout_ms: u64,
    /// Delay before the first connection attempt, in seconds.
    pub startup_delay_secs: u64,
    /// Bitmask of [`DriverLogLevel`]s forwarded to the process log.
    pub driver_log_mask: u8,
    /// Whether the host was started manually rather than by a timer.
    pub started_manually: bool,
    /// Commands run at startup.
    pub on_start: Vec<CecCommand>,
    /// Commands run before the worker exits.
    pub on_stop: Vec<CecCommand>,
    /// Commands run at startup only when the host was started manually.
    pub on_manual_start: Vec<CecCommand>,
    /// Reactions to received bus opcodes.
    pub bus_handlers: Vec<BusCommandHandler>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_name: "ceckit".to_string(),
            hdmi_port: 1,
            base_device: LogicalAddress::Unknown,
            physical_address: PhysicalAddress::UNSET,
            device_types: vec![],
            combo_key_timeout_ms: 1000,
            open_timeout_ms: 5000,
            startup_delay_secs: 0,
            driver_log_mask: DriverLogLevel::Error.mask()
                | DriverLogLevel::Warning.mask()
                | DriverLogLevel::Notice.mask(),
            started_manually: true,
            on_start: vec![],
            on_stop: vec![],
            on_manual_start: vec![],
            bus_handlers: vec![],
        }
    }
}

impl EngineConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn combo_key_timeout(&self) -> Duration {
        Duration::from_millis(self.combo_key_timeout_ms as u64)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    /// Whether driver messages at `level` pass the configured mask.
    pub fn logs_driver_level(&self, level: DriverLogLevel) -> bool {
        self.driver_log_mask & level.mask() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.hdmi_port, 1);
        assert!(config.physical_address.is_unset());
        assert!(config.started_manually);
        assert!(config.logs_driver_level(DriverLogLevel::Error));
        assert!(config.logs_driver_level(DriverLogLevel::Notice));
        assert!(!config.logs_driver_level(DriverLogLevel::Traffic));
        assert_eq!(config.open_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "device_name": "living-room",
            "hdmi_port": 2,
            "on_start": [
                {"kind": "text_view_on", "device": {"configured": "Tv"}},
                {"kind": "make_active"}
            ],
            "bus_handlers": [
                {
                    "opcode": 54,
                    "initiator": "Tv",
                    "commands": [{"kind": "disconnect"}]
                }
            ]
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device_name, "living-room");
        assert_eq!(config.hdmi_port, 2);
        assert_eq!(config.on_start.len(), 2);
        assert_eq!(config.bus_handlers[0].opcode, Opcode::STANDBY);
        assert_eq!(config.bus_handlers[0].initiator, Some(LogicalAddress::Tv));
        // Unspecified fields keep their defaults.
        assert_eq!(config.open_timeout_ms, 5000);
    }
}
