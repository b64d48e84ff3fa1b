//! Device Classifier: the static, read-only mapping from C-Bus group address
//! to the kind of Home Assistant entity it should be exposed as.

use std::collections::HashMap;
use std::fmt;

/// Lowest valid C-Bus lighting group address.
pub const MIN_GA: u16 = 1;
/// Highest valid C-Bus lighting group address.
pub const MAX_GA: u16 = 255;

/// A validated C-Bus lighting group address in `[MIN_GA, MAX_GA]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupAddress(u16);

impl GroupAddress {
    /// Validate and construct a `GroupAddress`. Every GA entering the system
    /// at a boundary (MQTT topic, CLI list, PCI frame) must pass through here.
    pub fn new(raw: u16) -> Result<Self, GroupAddressError> {
        if (MIN_GA..=MAX_GA).contains(&raw) {
            Ok(Self(raw))
        } else {
            Err(GroupAddressError { raw })
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// All valid group addresses, in ascending order.
    pub fn all() -> impl Iterator<Item = GroupAddress> {
        (MIN_GA..=MAX_GA).map(GroupAddress)
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupAddressError {
    pub raw: u16,
}

impl fmt::Display for GroupAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "group address {} out of range [{}, {}]",
            self.raw, MIN_GA, MAX_GA
        )
    }
}

impl std::error::Error for GroupAddressError {}

/// The kind of Home Assistant entity a group address is exposed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Dimmable,
    NonDimmable,
    Switch,
    BinarySensor,
    Ignore,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceKind::Dimmable => "dimmable light",
            DeviceKind::NonDimmable => "non-dimmable light",
            DeviceKind::Switch => "switch",
            DeviceKind::BinarySensor => "binary sensor",
            DeviceKind::Ignore => "ignored",
        };
        write!(f, "{s}")
    }
}

/// Total function GA -> DeviceKind, built once at startup and immutable
/// thereafter. Unclassified GAs default to `Dimmable`.
#[derive(Debug, Clone, Default)]
pub struct DeviceTypeMap {
    overrides: HashMap<GroupAddress, DeviceKind>,
}

impl DeviceTypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a non-default kind to a group address. Later calls for the
    /// same GA overwrite earlier ones, consistent with the CLI lists being
    /// applied in a fixed order (see `config::parse_device_lists`).
    pub fn set(&mut self, ga: GroupAddress, kind: DeviceKind) {
        self.overrides.insert(ga, kind);
    }

    /// `kind_of`: total, O(1). Unknown GAs return `Dimmable`.
    pub fn kind_of(&self, ga: GroupAddress) -> DeviceKind {
        self.overrides.get(&ga).copied().unwrap_or(DeviceKind::Dimmable)
    }
}
