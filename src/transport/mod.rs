//! Broker transport setup: TLS material loading and `rumqttc::Transport`
//! construction.

mod tls;

pub use tls::{build_transport, parse_mqtt_endpoint, MqttEndpoint, TlsMaterials};
