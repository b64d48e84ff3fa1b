//! Discovery Publisher (DP): at MQTT-connect time, publishes Home Assistant
//! retained config topics for every non-ignored GA, then the caller
//! subscribes to the relevant set topics.

use crate::busevent::Publisher;
use crate::ga::{DeviceKind, DeviceTypeMap, GroupAddress};
use crate::topics;
use serde::Serialize;

const META_IDENTIFIER: &str = "cmqttd";
const SW_VERSION: &str = concat!("cmqttd ", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct HaDeviceInfo {
    identifiers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connections: Option<Vec<(String, String)>>,
    name: String,
    manufacturer: String,
    model: String,
    sw_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    via_device: Option<String>,
}

impl HaDeviceInfo {
    fn for_ga(ga: GroupAddress, kind_label: &str) -> Self {
        Self {
            identifiers: vec![format!("cbus_{kind_label}_{ga}")],
            connections: Some(vec![("cbus_group_address".to_string(), ga.to_string())]),
            name: format!("C-Bus {} {:03}", title(kind_label), ga.get()),
            manufacturer: "micolous by wazza_aus".to_string(),
            model: "cbus2ha".to_string(),
            sw_version: SW_VERSION.to_string(),
            via_device: Some(META_IDENTIFIER.to_string()),
        }
    }

    fn meta() -> Self {
        Self {
            identifiers: vec![META_IDENTIFIER.to_string()],
            connections: None,
            name: "cmqttd".to_string(),
            manufacturer: "micolous by wazza_aus".to_string(),
            model: "cbus2ha".to_string(),
            sw_version: SW_VERSION.to_string(),
            via_device: None,
        }
    }
}

fn title(label: &str) -> String {
    label
        .split('_')
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Serialize)]
struct HaLightConfig {
    name: String,
    unique_id: String,
    cmd_t: String,
    stat_t: String,
    schema: &'static str,
    brightness: bool,
    supported_color_modes: Vec<&'static str>,
    device: HaDeviceInfo,
}

#[derive(Serialize)]
struct HaSwitchConfig {
    name: String,
    unique_id: String,
    cmd_t: String,
    stat_t: String,
    schema: &'static str,
    device: HaDeviceInfo,
}

#[derive(Serialize)]
struct HaBinarySensorConfig {
    name: String,
    unique_id: String,
    stat_t: String,
    device: HaDeviceInfo,
}

#[derive(Serialize)]
struct HaMetaConfig {
    name: &'static str,
    unique_id: &'static str,
    stat_t: String,
    device: HaDeviceInfo,
}

fn default_label(ga: GroupAddress, kind: DeviceKind) -> String {
    let kind_label = match kind {
        DeviceKind::Dimmable => "dimmable light",
        DeviceKind::NonDimmable => "non dimmable light",
        DeviceKind::Switch => "switch",
        DeviceKind::BinarySensor => "binary sensor",
        DeviceKind::Ignore => "ignored",
    };
    format!("C-Bus {} {:03}", title(kind_label), ga.get())
}

fn publish_config(ga: GroupAddress, kind: DeviceKind, label: Option<&str>, publisher: &dyn Publisher) {
    let name = label.map(str::to_string).unwrap_or_else(|| default_label(ga, kind));
    let config_topic = topics::config_topic(ga, kind);

    let body = match kind {
        DeviceKind::Dimmable | DeviceKind::NonDimmable => {
            let dimmable = kind == DeviceKind::Dimmable;
            serde_json::to_vec(&HaLightConfig {
                name,
                unique_id: format!("cbus_light_{ga}"),
                cmd_t: topics::set_topic(ga, kind),
                stat_t: topics::state_topic(ga, kind),
                schema: "json",
                brightness: dimmable,
                supported_color_modes: if dimmable { vec!["brightness"] } else { vec!["onoff"] },
                device: HaDeviceInfo::for_ga(ga, "light"),
            })
        }
        DeviceKind::Switch => serde_json::to_vec(&HaSwitchConfig {
            name,
            unique_id: format!("cbus_switch_{ga}"),
            cmd_t: topics::set_topic(ga, kind),
            stat_t: topics::state_topic(ga, kind),
            schema: "json",
            device: HaDeviceInfo::for_ga(ga, "switch"),
        }),
        DeviceKind::BinarySensor => serde_json::to_vec(&HaBinarySensorConfig {
            name,
            unique_id: format!("cbus_binary_sensor_{ga}"),
            stat_t: topics::state_topic(ga, kind),
            device: HaDeviceInfo::for_ga(ga, "binary sensor"),
        }),
        DeviceKind::Ignore => return,
    }
    .expect("discovery config is always serializable");

    publisher.publish_retained(&config_topic, body);
}

fn publish_meta(publisher: &dyn Publisher) {
    let body = serde_json::to_vec(&HaMetaConfig {
        name: "cmqttd",
        unique_id: "cmqttd",
        stat_t: format!("{}/state", topics::META_DEVICE_TOPIC),
        device: HaDeviceInfo::meta(),
    })
    .expect("meta discovery config is always serializable");
    publisher.publish_retained(&format!("{}/config", topics::META_DEVICE_TOPIC), body);
}

/// Publish retained discovery config for every non-ignored GA, plus the
/// meta device once. `labels` is an optional human-readable name per GA
/// (from a CBZ project file); unclassified GAs get a generated label.
pub fn publish_all(dc: &DeviceTypeMap, labels: &std::collections::HashMap<u16, String>, publisher: &dyn Publisher) {
    publish_meta(publisher);
    for ga in GroupAddress::all() {
        let kind = dc.kind_of(ga);
        if kind == DeviceKind::Ignore {
            continue;
        }
        publish_config(ga, kind, labels.get(&ga.get()).map(String::as_str), publisher);
    }
}

/// Set topics to subscribe (QoS 2) for every non-ignored, non-BinarySensor
/// GA, under both the light-prefix and the switch-prefix — Home Assistant
/// may send commands to either, mirroring the daemon's historical behavior.
pub fn set_topics_to_subscribe(dc: &DeviceTypeMap) -> Vec<String> {
    let mut topics_out = Vec::new();
    for ga in GroupAddress::all() {
        let kind = dc.kind_of(ga);
        if matches!(kind, DeviceKind::Ignore | DeviceKind::BinarySensor) {
            continue;
        }
        topics_out.push(topics::set_topic(ga, DeviceKind::Dimmable));
        topics_out.push(topics::set_topic(ga, DeviceKind::Switch));
    }
    topics_out
}
