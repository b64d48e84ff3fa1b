//! Payload Codec: translates inbound MQTT set-topic payloads into a
//! normalized `CommandIntent`, and formats outbound state payloads.

use crate::ga::{DeviceKind, GroupAddress};
use crate::topics::{self, InvalidTopic};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A fully resolved command to enqueue with the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    On,
    Off,
    Ramp { duration_s: u16, level: u8 },
}

/// The MQTT payload to publish, broken out per the kind of entity it targets.
/// Dimmable/NonDimmable lights publish a JSON object; Switch/BinarySensor
/// publish a plain `"ON"`/`"OFF"` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub on: bool,
    pub brightness: u8,
    pub transition_s: u16,
    pub source_addr: Option<u8>,
}

impl StateSnapshot {
    pub fn on(brightness: u8, transition_s: u16) -> Self {
        Self {
            on: brightness > 0,
            brightness,
            transition_s,
            source_addr: None,
        }
    }

    pub fn off() -> Self {
        Self {
            on: false,
            brightness: 0,
            transition_s: 0,
            source_addr: None,
        }
    }

    pub fn with_source(mut self, source_addr: Option<u8>) -> Self {
        self.source_addr = source_addr;
        self
    }

    fn state_str(self) -> &'static str {
        if self.on {
            "ON"
        } else {
            "OFF"
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct LightStatePayload {
    state: String,
    brightness: u8,
    transition: u16,
    cbus_source_addr: Option<u8>,
    color_mode: String,
}

/// Format the outbound payload bytes for a confirmed state, per device kind.
pub fn encode_state(kind: DeviceKind, snapshot: StateSnapshot) -> Vec<u8> {
    match kind {
        DeviceKind::Switch | DeviceKind::BinarySensor => snapshot.state_str().as_bytes().to_vec(),
        DeviceKind::Dimmable | DeviceKind::NonDimmable | DeviceKind::Ignore => {
            let color_mode = if kind == DeviceKind::NonDimmable {
                "onoff"
            } else {
                "brightness"
            };
            let payload = LightStatePayload {
                state: snapshot.state_str().to_string(),
                brightness: snapshot.brightness,
                transition: snapshot.transition_s,
                cbus_source_addr: snapshot.source_addr,
                color_mode: color_mode.to_string(),
            };
            serde_json::to_vec(&payload).expect("state payload always serializable")
        }
    }
}

/// A fully resolved command ready for the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandIntent {
    pub ga: GroupAddress,
    pub kind: DeviceKind,
    pub cmd: CommandKind,
    pub projected_state: StateSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressError {
    InvalidTopic(String),
    InvalidPayload(String),
}

impl fmt::Display for IngressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngressError::InvalidTopic(t) => write!(f, "invalid topic: {t}"),
            IngressError::InvalidPayload(p) => write!(f, "invalid payload: {p}"),
        }
    }
}

impl std::error::Error for IngressError {}

impl From<InvalidTopic> for IngressError {
    fn from(e: InvalidTopic) -> Self {
        IngressError::InvalidTopic(e.0)
    }
}

struct RawFields {
    state_on: bool,
    brightness: u8,
    transition_s: u16,
}

fn parse_raw_fields(bytes: &[u8]) -> Result<RawFields, IngressError> {
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        let Value::Object(map) = value else {
            return Err(IngressError::InvalidPayload(
                "payload JSON is not an object".to_string(),
            ));
        };
        let state = map
            .get("state")
            .and_then(Value::as_str)
            .ok_or_else(|| IngressError::InvalidPayload("missing 'state' field".to_string()))?;
        let state_on = match state.to_uppercase().as_str() {
            "ON" => true,
            "OFF" => false,
            other => {
                return Err(IngressError::InvalidPayload(format!(
                    "unrecognized state '{other}'"
                )))
            }
        };
        let brightness = map
            .get("brightness")
            .and_then(Value::as_i64)
            .map(|b| b.clamp(0, 255) as u8)
            .unwrap_or(255);
        let transition_s = map
            .get("transition")
            .and_then(Value::as_i64)
            .map(|t| t.max(0) as u16)
            .unwrap_or(0);
        return Ok(RawFields {
            state_on,
            brightness,
            transition_s,
        });
    }

    let text = std::str::from_utf8(bytes)
        .map_err(|_| IngressError::InvalidPayload("payload is not valid UTF-8".to_string()))?
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_uppercase();
    match text.as_str() {
        "ON" => Ok(RawFields {
            state_on: true,
            brightness: 255,
            transition_s: 0,
        }),
        "OFF" => Ok(RawFields {
            state_on: false,
            brightness: 0,
            transition_s: 0,
        }),
        other => Err(IngressError::InvalidPayload(format!(
            "payload '{other}' is neither JSON nor a plain ON/OFF literal"
        ))),
    }
}

/// Decode an inbound set-topic message into a `CommandIntent`.
///
/// Returns `Ok(None)` for the non-error "rejected" case (ignored or
/// binary-sensor GAs): logged at the call site and silently dropped.
pub fn decode_set_payload(
    topic: &str,
    bytes: &[u8],
    dc: &crate::ga::DeviceTypeMap,
) -> Result<Option<CommandIntent>, IngressError> {
    let ga = topics::parse_set_topic(topic)?;
    let kind = dc.kind_of(ga);
    if matches!(kind, DeviceKind::Ignore | DeviceKind::BinarySensor) {
        return Ok(None);
    }

    let raw = parse_raw_fields(bytes)?;
    let (brightness, transition_s) = if matches!(kind, DeviceKind::NonDimmable | DeviceKind::Switch)
    {
        (if raw.state_on { 255 } else { 0 }, 0)
    } else {
        (raw.brightness, raw.transition_s)
    };

    let cmd = if raw.state_on {
        if brightness == 255 && transition_s == 0 {
            CommandKind::On
        } else {
            CommandKind::Ramp {
                duration_s: transition_s,
                level: brightness,
            }
        }
    } else if transition_s > 0 {
        CommandKind::Ramp {
            duration_s: transition_s,
            level: 0,
        }
    } else {
        CommandKind::Off
    };

    // Off always reports brightness 0 regardless of what the payload carried;
    // "on" tracks brightness > 0 for both branches (a ramp-on to 0 reports OFF).
    let projected_brightness = if raw.state_on { brightness } else { 0 };
    let projected_state = StateSnapshot {
        on: projected_brightness > 0,
        brightness: projected_brightness,
        transition_s,
        source_addr: None,
    };

    Ok(Some(CommandIntent {
        ga,
        kind,
        cmd,
        projected_state,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ga::DeviceTypeMap;

    fn dc_with(ga: u16, kind: DeviceKind) -> DeviceTypeMap {
        let mut dc = DeviceTypeMap::new();
        dc.set(GroupAddress::new(ga).unwrap(), kind);
        dc
    }

    #[test]
    fn dimmable_on_full_brightness_is_plain_on() {
        let dc = DeviceTypeMap::new();
        let intent = decode_set_payload(
            "homeassistant/light/cbus_12/set",
            br#"{"state":"ON","brightness":255,"transition":0}"#,
            &dc,
        )
        .unwrap()
        .unwrap();
        assert_eq!(intent.cmd, CommandKind::On);
        assert_eq!(intent.kind, DeviceKind::Dimmable);
    }

    #[test]
    fn dimmable_on_partial_brightness_is_ramp() {
        let dc = DeviceTypeMap::new();
        let intent = decode_set_payload(
            "homeassistant/light/cbus_5/set",
            br#"{"state":"ON","brightness":128,"transition":4}"#,
            &dc,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            intent.cmd,
            CommandKind::Ramp {
                duration_s: 4,
                level: 128
            }
        );
    }

    #[test]
    fn off_with_transition_ramps_to_zero() {
        let dc = DeviceTypeMap::new();
        let intent = decode_set_payload(
            "homeassistant/light/cbus_5/set",
            br#"{"state":"OFF","transition":3}"#,
            &dc,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            intent.cmd,
            CommandKind::Ramp {
                duration_s: 3,
                level: 0
            }
        );
    }

    #[test]
    fn off_without_transition_is_plain_off() {
        let dc = DeviceTypeMap::new();
        let intent =
            decode_set_payload("homeassistant/light/cbus_5/set", br#"{"state":"OFF"}"#, &dc)
                .unwrap()
                .unwrap();
        assert_eq!(intent.cmd, CommandKind::Off);
    }

    #[test]
    fn dimmable_off_projects_off_state_not_stale_full_brightness() {
        let dc = DeviceTypeMap::new();
        let intent =
            decode_set_payload("homeassistant/light/cbus_5/set", br#"{"state":"OFF"}"#, &dc)
                .unwrap()
                .unwrap();
        let bytes = encode_state(DeviceKind::Dimmable, intent.projected_state);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"state\":\"OFF\""));
        assert!(text.contains("\"brightness\":0"));
    }

    #[test]
    fn switch_plain_string_ingress() {
        let dc = dc_with(90, DeviceKind::Switch);
        let intent =
            decode_set_payload("homeassistant/switch/cbus_90/set", b"OFF", &dc)
                .unwrap()
                .unwrap();
        assert_eq!(intent.cmd, CommandKind::Off);
        assert_eq!(intent.kind, DeviceKind::Switch);
    }

    #[test]
    fn switch_forces_brightness_and_transition_to_binary() {
        let dc = dc_with(90, DeviceKind::Switch);
        let intent = decode_set_payload(
            "homeassistant/switch/cbus_90/set",
            br#"{"state":"ON","brightness":10,"transition":5}"#,
            &dc,
        )
        .unwrap()
        .unwrap();
        assert_eq!(intent.cmd, CommandKind::On);
    }

    #[test]
    fn ignored_ga_is_rejected_not_errored() {
        let dc = dc_with(7, DeviceKind::Ignore);
        let result = decode_set_payload(
            "homeassistant/light/cbus_7/set",
            br#"{"state":"ON"}"#,
            &dc,
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn binary_sensor_is_rejected_not_errored() {
        let dc = dc_with(20, DeviceKind::BinarySensor);
        let result = decode_set_payload(
            "homeassistant/light/cbus_20/set",
            br#"{"state":"ON"}"#,
            &dc,
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn invalid_topic_is_an_error() {
        let dc = DeviceTypeMap::new();
        let err = decode_set_payload("homeassistant/fan/cbus_12/set", b"ON", &dc).unwrap_err();
        assert!(matches!(err, IngressError::InvalidTopic(_)));
    }

    #[test]
    fn invalid_payload_is_an_error() {
        let dc = DeviceTypeMap::new();
        let err =
            decode_set_payload("homeassistant/light/cbus_12/set", b"banana", &dc).unwrap_err();
        assert!(matches!(err, IngressError::InvalidPayload(_)));
    }

    #[test]
    fn encode_decode_round_trip_for_dimmable() {
        let snapshot = StateSnapshot::on(200, 3).with_source(Some(17));
        let bytes = encode_state(DeviceKind::Dimmable, snapshot);
        let decoded: LightStatePayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.state, "ON");
        assert_eq!(decoded.brightness, 200);
        assert_eq!(decoded.transition, 3);
        assert_eq!(decoded.cbus_source_addr, Some(17));
        assert_eq!(decoded.color_mode, "brightness");
    }

    #[test]
    fn encode_non_dimmable_uses_onoff_color_mode() {
        let bytes = encode_state(DeviceKind::NonDimmable, StateSnapshot::on(255, 0));
        let decoded: LightStatePayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.color_mode, "onoff");
    }

    #[test]
    fn encode_switch_is_plain_string() {
        assert_eq!(
            encode_state(DeviceKind::Switch, StateSnapshot::off()),
            b"OFF"
        );
        assert_eq!(
            encode_state(DeviceKind::Switch, StateSnapshot::on(255, 0)),
            b"ON"
        );
    }
}
