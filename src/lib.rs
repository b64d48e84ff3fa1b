//! cmqttd — a bridge daemon connecting a C-Bus lighting network (serial or
//! TCP PCI/CNI) to an MQTT broker, publishing in Home Assistant's
//! auto-discovery convention.
//!
//! # Architecture
//!
//! Components, leaves first:
//!
//! - [`ga`]: Device Classifier — the static GA → [`ga::DeviceKind`] mapping.
//! - [`topics`]: Topic Codec — pure (GA, kind) ↔ MQTT topic string mapping.
//! - [`payload`]: Payload Codec — inbound JSON/plain-string parsing into a
//!   [`payload::CommandIntent`]; outbound state payload formatting.
//! - [`dispatch`]: Command Queue & Dispatcher — the rate-limited,
//!   confirmation-tracked, retry-capable command engine.
//! - [`pci`]: PCI Adapter — the byte-level boundary to the physical bus
//!   (serial or TCP), request encoding and inbound event framing.
//! - [`busevent`]: Bus-Event Fan-out — unsolicited bus events to MQTT state.
//! - [`discovery`]: Discovery Publisher — Home Assistant retained config
//!   topics at connect time.
//! - [`config`]: CLI-derived configuration — GA-list parsing, PCI endpoint
//!   selection, broker auth, logging.
//! - [`transport`]: Broker TLS/transport setup.
//!
//! The Supervisor lifecycle (binding MQTT-connect to dispatcher start, and
//! connection-loss to dispatcher stop) lives in the `cmqttd` binary, not the
//! library, since it is almost entirely orchestration of the pieces above.

pub mod busevent;
pub mod config;
pub mod dispatch;
pub mod discovery;
pub mod ga;
pub mod payload;
pub mod pci;
pub mod topics;
pub mod transport;

pub use busevent::{BusEventFanout, BusEventSink, Publisher};
pub use config::BridgeConfig;
pub use dispatch::{Dispatcher, DispatcherConfig, StateSink};
pub use ga::{DeviceKind, DeviceTypeMap, GroupAddress};
pub use payload::{CommandIntent, CommandKind, IngressError, StateSnapshot};
pub use pci::{BusEvent, ConfirmationResult, ConfirmationToken, PciError, PciOutput, PciTransport};
