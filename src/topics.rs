//! Topic Codec: pure functions mapping (group address, device kind) to and
//! from the Home Assistant MQTT discovery topic namespace.

use crate::ga::{DeviceKind, GroupAddress};
use std::fmt;

const LIGHT_PREFIX: &str = "homeassistant/light/cbus_";
const SWITCH_PREFIX: &str = "homeassistant/switch/cbus_";
const BINSENSOR_PREFIX: &str = "homeassistant/binary_sensor/cbus_";
const SET_SUFFIX: &str = "/set";
const CONFIG_SUFFIX: &str = "/config";
const STATE_SUFFIX: &str = "/state";

/// Topic of the meta "bridge" device, published once regardless of GA.
pub const META_DEVICE_TOPIC: &str = "homeassistant/binary_sensor/cbus_cmqttd";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTopic(pub String);

impl fmt::Display for InvalidTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid topic '{}'", self.0)
    }
}

impl std::error::Error for InvalidTopic {}

fn prefix_for(kind: DeviceKind) -> &'static str {
    match kind {
        DeviceKind::Switch => SWITCH_PREFIX,
        DeviceKind::BinarySensor => BINSENSOR_PREFIX,
        // Dimmable and NonDimmable both live under the light topic; Ignore
        // is never published but falls back to the light shape harmlessly.
        DeviceKind::Dimmable | DeviceKind::NonDimmable | DeviceKind::Ignore => LIGHT_PREFIX,
    }
}

pub fn config_topic(ga: GroupAddress, kind: DeviceKind) -> String {
    format!("{}{}{}", prefix_for(kind), ga, CONFIG_SUFFIX)
}

pub fn set_topic(ga: GroupAddress, kind: DeviceKind) -> String {
    format!("{}{}{}", prefix_for(kind), ga, SET_SUFFIX)
}

pub fn state_topic(ga: GroupAddress, kind: DeviceKind) -> String {
    format!("{}{}{}", prefix_for(kind), ga, STATE_SUFFIX)
}

/// Resolve the group address encoded in a `.../set` topic. Fails when no
/// known prefix matches, the suffix isn't `/set`, or the embedded integer is
/// out of GA range.
pub fn parse_set_topic(topic: &str) -> Result<GroupAddress, InvalidTopic> {
    for prefix in [LIGHT_PREFIX, SWITCH_PREFIX, BINSENSOR_PREFIX] {
        if let Some(rest) = topic.strip_prefix(prefix) {
            let Some(ga_str) = rest.strip_suffix(SET_SUFFIX) else {
                continue;
            };
            let raw: u16 = ga_str.parse().map_err(|_| InvalidTopic(topic.to_string()))?;
            return GroupAddress::new(raw).map_err(|_| InvalidTopic(topic.to_string()));
        }
    }
    Err(InvalidTopic(topic.to_string()))
}
