//! Bus-Event Fan-out (BEF): turns unsolicited inbound C-Bus events —
//! another station switched a load — into outbound MQTT state publishes.
//! Stays operational regardless of CQD's outstanding retries: unsolicited
//! bus events are authoritative about physical state.

use crate::ga::{DeviceKind, DeviceTypeMap, GroupAddress};
use crate::pci::BusEvent;
use crate::payload::{self, CommandKind, StateSnapshot};
use crate::topics;
use std::sync::Arc;

/// Publishes a retained MQTT message. Implemented by the MQTT client
/// wrapper; kept as a trait so BEF (and CQD's confirmed-state path) can be
/// exercised against an in-memory fake.
pub trait Publisher: Send + Sync {
    fn publish_retained(&self, topic: &str, payload: Vec<u8>);
}

pub struct BusEventFanout {
    dc: Arc<DeviceTypeMap>,
    publisher: Arc<dyn Publisher>,
}

impl BusEventFanout {
    pub fn new(dc: Arc<DeviceTypeMap>, publisher: Arc<dyn Publisher>) -> Self {
        Self { dc, publisher }
    }

    fn snapshot_for(kind: CommandKind) -> StateSnapshot {
        match kind {
            CommandKind::On => StateSnapshot::on(255, 0),
            CommandKind::Off => StateSnapshot::off(),
            CommandKind::Ramp { duration_s, level } => StateSnapshot::on(level, duration_s),
        }
    }

    pub fn handle(&self, ev: BusEvent) {
        let kind = self.dc.kind_of(ev.ga);
        if kind == DeviceKind::Ignore {
            log::debug!("dropping bus event for ignored GA {}", ev.ga);
            return;
        }

        let snapshot = Self::snapshot_for(ev.kind).with_source(ev.source_addr);
        let topic = topics::state_topic(ev.ga, kind);
        let payload = payload::encode_state(kind, snapshot);
        log::info!("bus event GA {} -> {}", ev.ga, topic);
        self.publisher.publish_retained(&topic, payload);
    }
}

/// Adapts `BusEventFanout` to the `BusEventSink` the dispatch event router
/// expects.
pub trait BusEventSink: Send + Sync {
    fn handle_bus_event(&self, ev: BusEvent);
}

impl BusEventSink for BusEventFanout {
    fn handle_bus_event(&self, ev: BusEvent) {
        self.handle(ev)
    }
}

/// CQD's confirmed-command publish path: `projected_state`, never a merely
/// attempted one, goes out the moment PA reports `success=true`.
pub struct ConfirmedStatePublisher {
    publisher: Arc<dyn Publisher>,
}

impl ConfirmedStatePublisher {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }
}

impl crate::dispatch::StateSink for ConfirmedStatePublisher {
    fn publish_confirmed(&self, kind: DeviceKind, intent: &crate::payload::CommandIntent) {
        let topic = topics::state_topic(intent.ga, kind);
        let bytes = payload::encode_state(kind, intent.projected_state);
        log::info!("confirmed GA {} -> {}", intent.ga, topic);
        self.publisher.publish_retained(&topic, bytes);
    }
}
