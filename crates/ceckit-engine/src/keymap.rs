//! Key translation seam.
//!
//! Key tables are an external collaborator; the engine only needs an opaque
//! bidirectional lookup between host key values and bus user-control codes.

use ceckit_bus::KeyCode;
use serde::{Deserialize, Serialize};

/// A key value in the host's own key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostKey(pub u32);

impl std::fmt::Display for HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bidirectional lookup between host keys and bus key codes.
///
/// A single input may map to several outputs (combo expansions), or to none
/// (unmapped key).
pub trait KeyTranslator: Send + Sync {
    /// Host keys to deliver for a received bus key code.
    fn cec_to_host(&self, code: KeyCode) -> Vec<HostKey>;

    /// Bus key codes to send for a host key.
    fn host_to_cec(&self, key: HostKey) -> Vec<KeyCode>;
}

/// 1:1 mapping between host key values and bus key codes. Handy for tests
/// and hosts whose key space already is the user-control code space.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityKeymap;

impl KeyTranslator for IdentityKeymap {
    fn cec_to_host(&self, code: KeyCode) -> Vec<HostKey> {
        vec![HostKey(code.0 as u32)]
    }

    fn host_to_cec(&self, key: HostKey) -> Vec<KeyCode> {
        if key.0 <= KeyCode::MAX.0 as u32 {
            vec![KeyCode(key.0 as u8)]
        } else {
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip() {
        let map = IdentityKeymap;
        assert_eq!(map.cec_to_host(KeyCode(0x44)), vec![HostKey(0x44)]);
        assert_eq!(map.host_to_cec(HostKey(0x44)), vec![KeyCode(0x44)]);
    }

    #[test]
    fn test_identity_out_of_range_host_key() {
        let map = IdentityKeymap;
        assert!(map.host_to_cec(HostKey(0x1000)).is_empty());
    }
}
