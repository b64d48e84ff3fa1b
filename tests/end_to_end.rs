//! End-to-end scenarios from the bridge's testable-properties list, driven
//! against an in-memory fake PCI transport and a recording publisher rather
//! than a live broker or bus.

use cbus_mqttd::busevent::{BusEventFanout, ConfirmedStatePublisher, Publisher};
use cbus_mqttd::dispatch::{spawn_event_router, Dispatcher, DispatcherConfig};
use cbus_mqttd::ga::{DeviceKind, DeviceTypeMap, GroupAddress};
use cbus_mqttd::pci::{
    BusEvent, ConfirmationResult, ConfirmationToken, PciError, PciOutput, PciTransport,
};
use cbus_mqttd::payload::{self, CommandIntent, CommandKind, StateSnapshot};
use cbus_mqttd::{discovery, topics};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A PCI transport whose sends always succeed and whose confirmations (or
/// silence, to exercise the watchdog) are driven explicitly by the test via
/// `events_tx`.
struct FakeBus {
    sent: Arc<Mutex<Vec<(GroupAddress, CommandKind)>>>,
    events_rx: Option<std::sync::mpsc::Receiver<PciOutput>>,
    next_token: AtomicU8,
    fail_sends: bool,
}

impl FakeBus {
    fn new(fail_sends: bool) -> (Self, Sender<PciOutput>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                events_rx: Some(rx),
                next_token: AtomicU8::new(b'g'),
                fail_sends,
            },
            tx,
        )
    }

    fn record(&self, ga: GroupAddress, kind: CommandKind) -> Result<Option<ConfirmationToken>, PciError> {
        if self.fail_sends {
            return Err(PciError::Closed);
        }
        self.sent.lock().unwrap().push((ga, kind));
        let letter = self.next_token.fetch_add(1, Ordering::SeqCst);
        Ok(Some(ConfirmationToken(letter)))
    }
}

impl PciTransport for FakeBus {
    fn send_on(&mut self, ga: GroupAddress) -> Result<Option<ConfirmationToken>, PciError> {
        self.record(ga, CommandKind::On)
    }
    fn send_off(&mut self, ga: GroupAddress) -> Result<Option<ConfirmationToken>, PciError> {
        self.record(ga, CommandKind::Off)
    }
    fn send_ramp(
        &mut self,
        ga: GroupAddress,
        duration_s: u16,
        level: u8,
    ) -> Result<Option<ConfirmationToken>, PciError> {
        self.record(ga, CommandKind::Ramp { duration_s, level })
    }
    fn events(&mut self) -> std::sync::mpsc::Receiver<PciOutput> {
        self.events_rx.take().expect("events() called twice")
    }
}

struct RecordingPublisher {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
    fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
        }
    }

    fn last_for(&self, topic: &str) -> Option<Vec<u8>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
    }

    fn count_for(&self, topic: &str) -> usize {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .count()
    }
}

impl Publisher for RecordingPublisher {
    fn publish_retained(&self, topic: &str, payload: Vec<u8>) {
        self.published.lock().unwrap().push((topic.to_string(), payload));
    }
}

fn ga(n: u16) -> GroupAddress {
    GroupAddress::new(n).unwrap()
}

fn fast_config(max_attempts: u8) -> DispatcherConfig {
    DispatcherConfig {
        inter_frame_gap: Duration::from_millis(20),
        confirmation_timeout: Duration::from_millis(60),
        watchdog_period: Duration::from_millis(10),
        max_attempts,
    }
}

/// Spins up a dispatcher plus its event router against a `FakeBus`, returning
/// everything needed to drive and tear it down.
struct Harness {
    dispatcher: Arc<Dispatcher>,
    sent: Arc<Mutex<Vec<(GroupAddress, CommandKind)>>>,
    events_tx: Sender<PciOutput>,
    publisher: Arc<RecordingPublisher>,
    router_running: Arc<AtomicBool>,
    router_handle: std::thread::JoinHandle<()>,
}

impl Harness {
    fn start(config: DispatcherConfig, dc: DeviceTypeMap, fail_sends: bool) -> Self {
        let (bus, events_tx) = FakeBus::new(fail_sends);
        let sent = Arc::clone(&bus.sent);
        let dispatcher = Dispatcher::new(config);
        let publisher = Arc::new(RecordingPublisher::new());
        let state_sink = Arc::new(ConfirmedStatePublisher::new(
            Arc::clone(&publisher) as Arc<dyn Publisher>
        ));
        let bus_sink = Arc::new(BusEventFanout::new(
            Arc::new(dc),
            Arc::clone(&publisher) as Arc<dyn Publisher>,
        ));
        let router_running = Arc::new(AtomicBool::new(true));

        let mut bus = bus;
        let events_rx = bus.events();
        dispatcher.start(
            Box::new(bus),
            Arc::clone(&state_sink) as Arc<dyn cbus_mqttd::dispatch::StateSink>,
        );
        let router_handle = spawn_event_router(
            Arc::clone(&dispatcher),
            state_sink as Arc<dyn cbus_mqttd::dispatch::StateSink>,
            bus_sink as Arc<dyn cbus_mqttd::busevent::BusEventSink>,
            events_rx,
            Arc::clone(&router_running),
        );

        Self {
            dispatcher,
            sent,
            events_tx,
            publisher,
            router_running,
            router_handle,
        }
    }

    fn stop(self) {
        self.router_running.store(false, Ordering::SeqCst);
        self.dispatcher.stop();
        let _ = self.router_handle.join();
    }
}

#[test]
fn scenario_1_happy_path_dimmable_on() {
    let dc = DeviceTypeMap::new();
    let harness = Harness::start(fast_config(4), dc.clone(), false);

    let intent = CommandIntent {
        ga: ga(12),
        kind: DeviceKind::Dimmable,
        cmd: CommandKind::On,
        projected_state: StateSnapshot::on(255, 0),
    };
    harness.dispatcher.enqueue(intent);
    std::thread::sleep(Duration::from_millis(40));

    let token = harness.sent.lock().unwrap()[0].0;
    assert_eq!(token, ga(12));
    harness
        .events_tx
        .send(PciOutput::Confirmation(ConfirmationResult {
            token: ConfirmationToken(b'g'),
            success: true,
        }))
        .unwrap();
    std::thread::sleep(Duration::from_millis(40));

    let topic = topics::state_topic(ga(12), DeviceKind::Dimmable);
    assert_eq!(harness.publisher.count_for(&topic), 1);
    let body = harness.publisher.last_for(&topic).unwrap();
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("\"state\":\"ON\""));
    assert!(text.contains("\"brightness\":255"));
    assert!(text.contains("\"color_mode\":\"brightness\""));

    harness.stop();
}

#[test]
fn scenario_2_timeout_then_success_retries_once() {
    let dc = DeviceTypeMap::new();
    let harness = Harness::start(fast_config(4), dc, false);

    let intent = CommandIntent {
        ga: ga(12),
        kind: DeviceKind::Dimmable,
        cmd: CommandKind::On,
        projected_state: StateSnapshot::on(255, 0),
    };
    harness.dispatcher.enqueue(intent);

    // Let the first send time out without ever confirming it.
    std::thread::sleep(Duration::from_millis(120));
    // The retry should have been sent by now; confirm it.
    let sent_count = harness.sent.lock().unwrap().len();
    assert_eq!(sent_count, 2, "expected exactly one retry by now");

    let second_token = ConfirmationToken(b'h');
    harness
        .events_tx
        .send(PciOutput::Confirmation(ConfirmationResult {
            token: second_token,
            success: true,
        }))
        .unwrap();
    std::thread::sleep(Duration::from_millis(40));

    let topic = topics::state_topic(ga(12), DeviceKind::Dimmable);
    assert_eq!(harness.publisher.count_for(&topic), 1);

    harness.stop();
}

#[test]
fn scenario_3_exhausted_retries_never_publish() {
    let dc = DeviceTypeMap::new();
    let harness = Harness::start(fast_config(4), dc, true);

    let intent = CommandIntent {
        ga: ga(5),
        kind: DeviceKind::Dimmable,
        cmd: CommandKind::Ramp {
            duration_s: 4,
            level: 128,
        },
        projected_state: StateSnapshot::on(128, 4),
    };
    harness.dispatcher.enqueue(intent);
    std::thread::sleep(Duration::from_millis(200));

    assert!(harness.publisher.published.lock().unwrap().is_empty());
    harness.stop();
}

#[test]
fn scenario_4_switch_plain_string_ingress_round_trip() {
    let mut dc = DeviceTypeMap::new();
    dc.set(ga(90), DeviceKind::Switch);

    let intent = payload::decode_set_payload("homeassistant/switch/cbus_90/set", b"OFF", &dc)
        .unwrap()
        .unwrap();
    assert_eq!(intent.cmd, CommandKind::Off);
    assert_eq!(intent.kind, DeviceKind::Switch);

    let harness = Harness::start(fast_config(4), dc, false);
    harness.dispatcher.enqueue(intent);
    std::thread::sleep(Duration::from_millis(40));
    harness
        .events_tx
        .send(PciOutput::Confirmation(ConfirmationResult {
            token: ConfirmationToken(b'g'),
            success: true,
        }))
        .unwrap();
    std::thread::sleep(Duration::from_millis(40));

    let topic = topics::state_topic(ga(90), DeviceKind::Switch);
    let body = harness.publisher.last_for(&topic).unwrap();
    assert_eq!(body, b"OFF");

    harness.stop();
}

#[test]
fn scenario_5_unsolicited_bus_event_for_binary_sensor() {
    let mut dc = DeviceTypeMap::new();
    dc.set(ga(20), DeviceKind::BinarySensor);
    let harness = Harness::start(fast_config(4), dc.clone(), false);

    harness
        .events_tx
        .send(PciOutput::BusEvent(BusEvent {
            ga: ga(20),
            source_addr: Some(17),
            kind: CommandKind::On,
        }))
        .unwrap();
    std::thread::sleep(Duration::from_millis(40));

    let topic = topics::state_topic(ga(20), DeviceKind::BinarySensor);
    assert_eq!(harness.publisher.last_for(&topic).unwrap(), b"ON");
    assert!(harness.sent.lock().unwrap().is_empty());
    assert!(!discovery::set_topics_to_subscribe(&dc)
        .iter()
        .any(|t| t.contains("cbus_20")));

    harness.stop();
}

#[test]
fn scenario_6_ignored_ga_is_dropped_on_every_path() {
    let mut dc = DeviceTypeMap::new();
    dc.set(ga(7), DeviceKind::Ignore);

    let rejected = payload::decode_set_payload(
        "homeassistant/light/cbus_7/set",
        br#"{"state":"ON"}"#,
        &dc,
    )
    .unwrap();
    assert!(rejected.is_none());

    let harness = Harness::start(fast_config(4), dc.clone(), false);
    harness
        .events_tx
        .send(PciOutput::BusEvent(BusEvent {
            ga: ga(7),
            source_addr: None,
            kind: CommandKind::On,
        }))
        .unwrap();
    std::thread::sleep(Duration::from_millis(40));
    assert!(harness.publisher.published.lock().unwrap().is_empty());

    let publisher = Arc::new(RecordingPublisher::new());
    discovery::publish_all(&dc, &Default::default(), publisher.as_ref());
    assert!(!publisher
        .published
        .lock()
        .unwrap()
        .iter()
        .any(|(t, _)| t.contains("cbus_7")));

    harness.stop();
}
