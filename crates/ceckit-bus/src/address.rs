//! CEC bus addressing.
//!
//! A device participates on the bus under a small-integer logical address
//! describing its role, and reports a topology-derived physical address
//! describing its HDMI port position.

use serde::{Deserialize, Serialize};

/// Logical address of a device role on the bus.
///
/// Logical addresses can be ambiguous: two physically distinct devices may
/// register the same role. The physical address disambiguates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum LogicalAddress {
    Tv = 0,
    RecordingDevice1 = 1,
    RecordingDevice2 = 2,
    Tuner1 = 3,
    PlaybackDevice1 = 4,
    AudioSystem = 5,
    Tuner2 = 6,
    Tuner3 = 7,
    PlaybackDevice2 = 8,
    RecordingDevice3 = 9,
    Tuner4 = 10,
    PlaybackDevice3 = 11,
    Reserved1 = 12,
    Reserved2 = 13,
    FreeUse = 14,
    /// Address 15 is the unregistered/broadcast address.
    Broadcast = 15,
    /// Sentinel for an unresolved or invalid address.
    #[default]
    Unknown = 0xff,
}

impl LogicalAddress {
    /// Get the numeric bus address. `Unknown` has no bus representation.
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Get an address from its numeric value (0..=15).
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(LogicalAddress::Tv),
            1 => Some(LogicalAddress::RecordingDevice1),
            2 => Some(LogicalAddress::RecordingDevice2),
            3 => Some(LogicalAddress::Tuner1),
            4 => Some(LogicalAddress::PlaybackDevice1),
            5 => Some(LogicalAddress::AudioSystem),
            6 => Some(LogicalAddress::Tuner2),
            7 => Some(LogicalAddress::Tuner3),
            8 => Some(LogicalAddress::PlaybackDevice2),
            9 => Some(LogicalAddress::RecordingDevice3),
            10 => Some(LogicalAddress::Tuner4),
            11 => Some(LogicalAddress::PlaybackDevice3),
            12 => Some(LogicalAddress::Reserved1),
            13 => Some(LogicalAddress::Reserved2),
            14 => Some(LogicalAddress::FreeUse),
            15 => Some(LogicalAddress::Broadcast),
            _ => None,
        }
    }

    /// Check for the unresolved sentinel.
    pub fn is_unknown(&self) -> bool {
        matches!(self, LogicalAddress::Unknown)
    }

    /// Get the role name.
    pub fn type_name(&self) -> &'static str {
        match self {
            LogicalAddress::Tv => "TV",
            LogicalAddress::RecordingDevice1 => "Recorder 1",
            LogicalAddress::RecordingDevice2 => "Recorder 2",
            LogicalAddress::Tuner1 => "Tuner 1",
            LogicalAddress::PlaybackDevice1 => "Playback 1",
            LogicalAddress::AudioSystem => "Audio",
            LogicalAddress::Tuner2 => "Tuner 2",
            LogicalAddress::Tuner3 => "Tuner 3",
            LogicalAddress::PlaybackDevice2 => "Playback 2",
            LogicalAddress::RecordingDevice3 => "Recorder 3",
            LogicalAddress::Tuner4 => "Tuner 4",
            LogicalAddress::PlaybackDevice3 => "Playback 3",
            LogicalAddress::Reserved1 => "Reserved 1",
            LogicalAddress::Reserved2 => "Reserved 2",
            LogicalAddress::FreeUse => "Free use",
            LogicalAddress::Broadcast => "Broadcast",
            LogicalAddress::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unknown() {
            write!(f, "{}", self.type_name())
        } else {
            write!(f, "{} ({})", self.type_name(), self.value())
        }
    }
}

/// Bitmask over the 16 bus addresses.
///
/// Used for "active devices" and "own addresses" adapter queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalAddressSet(pub u16);

impl LogicalAddressSet {
    /// The empty set.
    pub fn empty() -> Self {
        LogicalAddressSet(0)
    }

    /// Check membership. `Unknown` is never a member.
    pub fn contains(&self, address: LogicalAddress) -> bool {
        let v = address.value();
        v < 16 && (self.0 & (1 << v)) != 0
    }

    /// Add an address to the set. `Unknown` is ignored.
    pub fn insert(&mut self, address: LogicalAddress) {
        let v = address.value();
        if v < 16 {
            self.0 |= 1 << v;
        }
    }

    /// Check whether no address is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate members in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = LogicalAddress> + '_ {
        let mask = self.0;
        (0u8..16).filter_map(move |v| {
            if mask & (1 << v) != 0 {
                LogicalAddress::from_value(v)
            } else {
                None
            }
        })
    }
}

impl FromIterator<LogicalAddress> for LogicalAddressSet {
    fn from_iter<T: IntoIterator<Item = LogicalAddress>>(iter: T) -> Self {
        let mut set = LogicalAddressSet::empty();
        for a in iter {
            set.insert(a);
        }
        set
    }
}

/// HDMI topology address, four nibbles (e.g. `1.0.0.0` for HDMI port 1).
///
/// The zero address is the "unset" sentinel for configured devices (the TV
/// root also carries 0.0.0.0, but it is never targeted by physical address).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalAddress(pub u16);

impl PhysicalAddress {
    pub const UNSET: PhysicalAddress = PhysicalAddress(0);

    /// Check for the unset sentinel.
    pub fn is_unset(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:x}.{:x}.{:x}.{:x}",
            (self.0 >> 12) & 0xf,
            (self.0 >> 8) & 0xf,
            (self.0 >> 4) & 0xf,
            self.0 & 0xf
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_address_roundtrip() {
        for v in 0u8..16 {
            let a = LogicalAddress::from_value(v).unwrap();
            assert_eq!(a.value(), v);
        }
        assert_eq!(LogicalAddress::from_value(16), None);
        assert!(LogicalAddress::Unknown.is_unknown());
    }

    #[test]
    fn test_address_set() {
        let mut set = LogicalAddressSet::empty();
        assert!(set.is_empty());

        set.insert(LogicalAddress::Tv);
        set.insert(LogicalAddress::AudioSystem);
        set.insert(LogicalAddress::Unknown); // ignored

        assert!(set.contains(LogicalAddress::Tv));
        assert!(set.contains(LogicalAddress::AudioSystem));
        assert!(!set.contains(LogicalAddress::Tuner1));
        assert!(!set.contains(LogicalAddress::Unknown));

        let members: Vec<_> = set.iter().collect();
        assert_eq!(
            members,
            vec![LogicalAddress::Tv, LogicalAddress::AudioSystem]
        );
    }

    #[test]
    fn test_address_json_forms() {
        assert_eq!(
            serde_json::to_string(&LogicalAddress::Tv).unwrap(),
            "\"Tv\""
        );
        let back: LogicalAddress = serde_json::from_str("\"AudioSystem\"").unwrap();
        assert_eq!(back, LogicalAddress::AudioSystem);

        // Physical addresses are plain numbers on the config surface.
        assert_eq!(serde_json::to_string(&PhysicalAddress(0x1000)).unwrap(), "4096");
    }

    #[test]
    fn test_physical_address_display() {
        assert_eq!(PhysicalAddress(0x1000).to_string(), "1.0.0.0");
        assert_eq!(PhysicalAddress(0x2100).to_string(), "2.1.0.0");
        assert!(PhysicalAddress::UNSET.is_unset());
        assert!(!PhysicalAddress(0x1000).is_unset());
    }
}
