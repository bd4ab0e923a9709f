//! Regions and beacon observations.
//!
//! A [`Region`] is the identity key both subscription tables are keyed by. It
//! names a class of beacons through optional identifier filters and an
//! optional Bluetooth address filter. A [`Beacon`] is one observation handed
//! to the core by the scanner.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BeaconError, Result};

static MAC_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("MAC address pattern is valid")
});

/// Returns `true` if `address` is a `XX:XX:XX:XX:XX:XX` Bluetooth address.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS.is_match(address)
}

/// Identity/filter key describing a class of beacons a client wants observed.
///
/// Regions are immutable once constructed. Two regions are interchangeable
/// only if every field is equal. Deserialization applies the same checks as
/// the constructors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRegion")]
pub struct Region {
    unique_id: String,
    identifiers: Vec<Option<String>>,
    bluetooth_address: Option<String>,
}

impl Region {
    /// Create a region from a unique id and identifier filters.
    ///
    /// A `None` filter matches any value at that position.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidRegion`] if `unique_id` is blank.
    pub fn new(unique_id: impl Into<String>, identifiers: Vec<Option<String>>) -> Result<Self> {
        let unique_id = unique_id.into();
        if unique_id.trim().is_empty() {
            return Err(BeaconError::InvalidRegion("unique id cannot be empty".into()));
        }
        Ok(Self {
            unique_id,
            identifiers,
            bluetooth_address: None,
        })
    }

    /// Create a region that only matches beacons transmitted from `address`.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidBluetoothAddress`] if the address is not a
    /// valid MAC, or [`BeaconError::InvalidRegion`] if `unique_id` is blank.
    pub fn with_bluetooth_address(
        unique_id: impl Into<String>,
        identifiers: Vec<Option<String>>,
        address: impl Into<String>,
    ) -> Result<Self> {
        let address = address.into();
        if !is_valid_mac_address(&address) {
            return Err(BeaconError::InvalidBluetoothAddress(address));
        }
        let mut region = Self::new(unique_id, identifiers)?;
        region.bluetooth_address = Some(address);
        Ok(region)
    }

    /// The caller-chosen unique id of this region.
    #[must_use]
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// All identifier filters, in position order.
    #[must_use]
    pub fn identifiers(&self) -> &[Option<String>] {
        &self.identifiers
    }

    /// The identifier filter at position `index`, if set.
    #[must_use]
    pub fn identifier(&self, index: usize) -> Option<&str> {
        self.identifiers.get(index).and_then(Option::as_deref)
    }

    /// The Bluetooth address filter, if set.
    #[must_use]
    pub fn bluetooth_address(&self) -> Option<&str> {
        self.bluetooth_address.as_deref()
    }

    /// Returns `true` if `beacon` falls inside this region.
    ///
    /// Every set identifier filter must equal the beacon's identifier at the
    /// same position. The address filter compares case-insensitively.
    #[must_use]
    pub fn matches_beacon(&self, beacon: &Beacon) -> bool {
        let identifiers_match = self.identifiers.iter().enumerate().all(|(i, filter)| {
            filter
                .as_deref()
                .map_or(true, |expected| beacon.identifiers.get(i).is_some_and(|id| id == expected))
        });

        let address_matches = self
            .bluetooth_address
            .as_deref()
            .map_or(true, |expected| expected.eq_ignore_ascii_case(&beacon.bluetooth_address));

        identifiers_match && address_matches
    }
}

/// Unchecked wire form of a [`Region`].
#[derive(Deserialize)]
struct RawRegion {
    unique_id: String,
    #[serde(default)]
    identifiers: Vec<Option<String>>,
    #[serde(default)]
    bluetooth_address: Option<String>,
}

impl TryFrom<RawRegion> for Region {
    type Error = BeaconError;

    fn try_from(raw: RawRegion) -> Result<Self> {
        match raw.bluetooth_address {
            Some(address) => Self::with_bluetooth_address(raw.unique_id, raw.identifiers, address),
            None => Self::new(raw.unique_id, raw.identifiers),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.unique_id)?;
        for (i, id) in self.identifiers.iter().enumerate() {
            write!(f, " id{}: {}", i + 1, id.as_deref().unwrap_or("*"))?;
        }
        if let Some(address) = &self.bluetooth_address {
            write!(f, " mac: {address}")?;
        }
        Ok(())
    }
}

/// A single beacon observation reported by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    /// Decoded identifiers in position order.
    pub identifiers: Vec<String>,

    /// Received signal strength in dBm.
    pub rssi: i16,

    /// Calibrated transmit power in dBm.
    pub tx_power: i16,

    /// Address of the transmitting device.
    pub bluetooth_address: String,
}

impl Beacon {
    /// Create a beacon observation.
    pub fn new(
        identifiers: Vec<String>,
        rssi: i16,
        tx_power: i16,
        bluetooth_address: impl Into<String>,
    ) -> Self {
        Self {
            identifiers,
            rssi,
            tx_power,
            bluetooth_address: bluetooth_address.into(),
        }
    }

    /// Returns `true` if `other` is an observation of the same physical beacon.
    #[must_use]
    pub fn same_beacon_as(&self, other: &Self) -> bool {
        self.identifiers == other.identifiers
            && self.bluetooth_address.eq_ignore_ascii_case(&other.bluetooth_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(ids: &[&str], address: &str) -> Beacon {
        Beacon::new(ids.iter().map(ToString::to_string).collect(), -60, -59, address)
    }

    #[test]
    fn test_region_requires_unique_id() {
        assert!(Region::new("", vec![]).is_err());
        assert!(Region::new("   ", vec![]).is_err());
        assert!(Region::new("all-beacons", vec![]).is_ok());
    }

    #[test]
    fn test_region_rejects_invalid_mac() {
        let err = Region::with_bluetooth_address("r", vec![], "not-a-mac").unwrap_err();
        assert!(matches!(err, BeaconError::InvalidBluetoothAddress(_)));

        let region = Region::with_bluetooth_address("r", vec![], "AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(region.bluetooth_address(), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_deserialize_validates_fields() {
        let err = serde_json::from_str::<Region>(
            r#"{"unique_id":"","identifiers":[],"bluetooth_address":null}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unique id"));

        let err = serde_json::from_str::<Region>(
            r#"{"unique_id":"r","identifiers":[],"bluetooth_address":"not-a-mac"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not-a-mac"));

        let region: Region =
            serde_json::from_str(r#"{"unique_id":"r","identifiers":["uuid",null]}"#).unwrap();
        assert_eq!(region.identifiers(), &[Some("uuid".to_string()), None]);
        assert_eq!(region.bluetooth_address(), None);
    }

    #[test]
    fn test_serialized_region_reads_back() {
        let region =
            Region::with_bluetooth_address("r", vec![Some("uuid".into())], "AA:BB:CC:DD:EE:FF")
                .unwrap();
        let json = serde_json::to_string(&region).unwrap();
        assert_eq!(serde_json::from_str::<Region>(&json).unwrap(), region);
    }

    #[test]
    fn test_is_valid_mac_address() {
        assert!(is_valid_mac_address("00:11:22:aa:bb:cc"));
        assert!(!is_valid_mac_address("00:11:22:aa:bb"));
        assert!(!is_valid_mac_address("00-11-22-aa-bb-cc"));
    }

    #[test]
    fn test_region_equality_covers_all_fields() {
        let a = Region::new("r", vec![Some("uuid".into())]).unwrap();
        let b = Region::new("r", vec![Some("uuid".into())]).unwrap();
        let c = Region::new("r", vec![Some("other".into())]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_region_matches_everything() {
        let region = Region::new("all", vec![]).unwrap();
        assert!(region.matches_beacon(&beacon(&["uuid", "1", "2"], "AA:BB:CC:DD:EE:FF")));
    }

    #[test]
    fn test_wildcard_identifiers() {
        let region = Region::new("r", vec![Some("uuid".into()), None, Some("2".into())]).unwrap();
        assert!(region.matches_beacon(&beacon(&["uuid", "7", "2"], "AA:BB:CC:DD:EE:FF")));
        assert!(!region.matches_beacon(&beacon(&["uuid", "7", "3"], "AA:BB:CC:DD:EE:FF")));
        assert!(!region.matches_beacon(&beacon(&["uuid"], "AA:BB:CC:DD:EE:FF")));
    }

    #[test]
    fn test_address_filter_is_case_insensitive() {
        let region = Region::with_bluetooth_address("r", vec![], "aa:bb:cc:dd:ee:ff").unwrap();
        assert!(region.matches_beacon(&beacon(&["x"], "AA:BB:CC:DD:EE:FF")));
        assert!(!region.matches_beacon(&beacon(&["x"], "11:22:33:44:55:66")));
    }

    #[test]
    fn test_region_display() {
        let region = Region::new("home", vec![Some("uuid".into()), None]).unwrap();
        assert_eq!(region.to_string(), "home id1: uuid id2: *");
    }
}
