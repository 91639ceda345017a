//! Device address resolution.
//!
//! Maps a configured device reference (HDMI topology position and/or a
//! configured logical address) to the live logical address on the bus.
//! Results are cached per [`Device`] instance; topology changes surface as a
//! reconnect, which rebuilds commands and thereby drops stale caches.

use ceckit_bus::{CecConnection, LogicalAddress};
use tracing::{debug, error};

use crate::command::Device;

/// Resolve `device` to a live logical address.
///
/// A device found on the bus at the configured physical address is trusted
/// as-is; only the configured-address fallback is checked against our own
/// addresses and polled for liveness, since nothing on the bus vouches for
/// it. Returns [`LogicalAddress::Unknown`] on failure; callers treat that as
/// a logged failure of the surrounding command.
pub fn resolve(conn: &mut dyn CecConnection, device: &mut Device) -> LogicalAddress {
    if !device.resolved.is_unknown() {
        return device.resolved;
    }

    let mut found = LogicalAddress::Unknown;
    if !device.physical_address.is_unset() {
        let active = conn.active_devices();
        for address in active.iter() {
            if conn.device_physical_address(address) != device.physical_address {
                continue;
            }
            if address == device.configured {
                device.resolved = address;
                return address;
            }
            // Ambiguous without a configured match; the last one wins.
            found = address;
        }
    }
    if !found.is_unknown() {
        device.resolved = found;
        return found;
    }

    if device.configured.is_unknown() {
        error!("device at {} not present on the bus", device.physical_address);
        return LogicalAddress::Unknown;
    }
    debug!(
        "device at {} not found, falling back to configured address {}",
        device.physical_address, device.configured
    );
    let fallback = device.configured;

    if conn.own_addresses().contains(fallback) {
        error!("device address {fallback} resolves to this process itself");
        return LogicalAddress::Unknown;
    }
    if !conn.poll_device(fallback) {
        error!("device {fallback} did not answer a poll");
        return LogicalAddress::Unknown;
    }

    device.resolved = fallback;
    fallback
}
