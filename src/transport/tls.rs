//! TLS configuration for the MQTT broker connection.
//!
//! Broker TLS is on by default (matching Home Assistant's Mosquitto add-on,
//! which listens on 8883); `--broker-disable-tls` switches to plain TCP.
//! CA/cert/key loading mirrors Home Assistant's MQTT integration: CA path is
//! optional (falls back to system/webpki roots), client cert and key must be
//! provided together or not at all.

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::PathBuf;

/// TLS certificate materials for the broker connection.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// PEM-encoded CA certificate bytes. `None` uses system/webpki roots.
    pub ca: Option<Vec<u8>>,
    /// Client certificate and key for mutual TLS.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&PathBuf>,
        client_cert_path: Option<&PathBuf>,
        client_key_path: Option<&PathBuf>,
    ) -> Result<Self> {
        let ca = match ca_path {
            Some(path) => Some(
                std::fs::read(path)
                    .with_context(|| format!("failed to read broker CA '{}'", path.display()))?,
            ),
            None => None,
        };

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!("failed to read broker client cert '{}'", cert_path.display())
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("failed to read broker client key '{}'", key_path.display())
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(anyhow!("broker client certificate given without a key (-k requires -K)"))
            }
            (None, Some(_)) => {
                return Err(anyhow!("broker client key given without a certificate (-K requires -k)"))
            }
        };

        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }
}

/// Broker endpoint: host, port, and whether to negotiate TLS.
#[derive(Clone, Debug)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Build a rumqttc `Transport` for a given endpoint and TLS materials.
///
/// Returns plain TCP when `endpoint.use_tls` is false; errors if materials
/// were supplied anyway (the user probably meant to also pass
/// `--broker-disable-tls=false`, i.e. this is almost certainly a mistake).
pub fn build_transport(endpoint: &MqttEndpoint, materials: &TlsMaterials) -> Result<Transport> {
    if !endpoint.use_tls {
        if materials.is_configured() {
            return Err(anyhow!(
                "broker CA/cert/key material was provided but --broker-disable-tls is set"
            ));
        }
        return Ok(Transport::tcp());
    }

    if !materials.is_configured() {
        return Ok(Transport::tls_with_default_config());
    }

    let ca = materials.ca.clone().ok_or_else(|| {
        anyhow!("a client certificate was provided without a CA certificate (-c is required with -k/-K)")
    })?;

    Ok(Transport::tls(ca, materials.client_auth.clone(), None))
}

/// Wrap the CLI's already-separated host/port/TLS fields into an `MqttEndpoint`.
/// No parsing happens here — `-b/--broker-address` and `-p/--broker-port` are
/// distinct flags, so there is no combined `host:port` string to split.
pub fn parse_mqtt_endpoint(host: &str, port: u16, use_tls: bool) -> MqttEndpoint {
    MqttEndpoint {
        host: host.to_string(),
        port,
        use_tls,
    }
}
