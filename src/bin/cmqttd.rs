//! cmqttd — C-Bus to MQTT bridge daemon.
//!
//! Supervisor (SV): binds MQTT-connect to starting the Command Queue &
//! Dispatcher plus Discovery Publisher, and binds loss of either transport
//! to tearing the dispatcher back down. No pending-command persistence is
//! attempted across a cycle (Non-goal).

use anyhow::{anyhow, Context, Result};
use cbus_mqttd::busevent::{BusEventFanout, ConfirmedStatePublisher, Publisher};
use cbus_mqttd::config::{self, BridgeConfig, PciEndpoint};
use cbus_mqttd::dispatch::{spawn_event_router, Dispatcher, DispatcherConfig};
use cbus_mqttd::discovery;
use cbus_mqttd::ga::DeviceTypeMap;
use cbus_mqttd::payload;
use cbus_mqttd::pci::{PciTransport, SerialPciTransport, TcpPciTransport};
use cbus_mqttd::transport::TlsMaterials;
use clap::Parser;
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bridge a C-Bus lighting network to MQTT / Home Assistant")]
struct Args {
    /// Destination to write logs. [default: stderr]
    #[arg(short = 'l', long = "log-file", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Verbosity of logging to emit (error|warn|info|debug|trace).
    #[arg(short = 'v', long = "verbosity", default_value = "info")]
    verbosity: String,

    /// Address of the MQTT broker.
    #[arg(short = 'b', long = "broker-address", env = "CMQTTD_BROKER_ADDRESS")]
    broker_address: String,

    /// Port to use to connect to the MQTT broker. [default: 8883 if using
    /// TLS, otherwise 1883]
    #[arg(short = 'p', long = "broker-port")]
    broker_port: Option<u16>,

    /// Send an MQTT keep-alive message every n seconds.
    #[arg(long = "broker-keepalive", default_value_t = 60, value_name = "SECONDS")]
    broker_keepalive: u64,

    /// Disables TLS [default: TLS is enabled]. Insecure.
    #[arg(long = "broker-disable-tls")]
    broker_disable_tls: bool,

    /// File containing the broker username (line 1) and password (line 2).
    #[arg(short = 'A', long = "broker-auth", value_name = "FILE")]
    broker_auth: Option<PathBuf>,

    /// Path to a PEM-encoded CA certificate to trust for the broker
    /// connection. [default: system/webpki roots]
    #[arg(short = 'c', long = "broker-ca", value_name = "FILE")]
    broker_ca: Option<PathBuf>,

    /// Path to a PEM-encoded client certificate (requires -K).
    #[arg(short = 'k', long = "broker-client-cert", value_name = "FILE")]
    broker_client_cert: Option<PathBuf>,

    /// Path to a PEM-encoded client private key (requires -k).
    #[arg(short = 'K', long = "broker-client-key", value_name = "FILE")]
    broker_client_key: Option<PathBuf>,

    /// Device node the PCI is connected to (e.g. /dev/ttyUSB0).
    #[arg(short = 's', long = "serial", value_name = "DEVICE", conflicts_with = "tcp")]
    serial: Option<String>,

    /// Address and TCP port where the C-Bus CNI/PCI is located (host:port).
    #[arg(short = 't', long = "tcp", value_name = "ADDR:PORT", conflicts_with = "serial")]
    tcp: Option<String>,

    /// Send time-sync packets every n seconds (0 disables).
    #[arg(short = 'T', long = "timesync", default_value_t = 300, value_name = "SECONDS")]
    timesync: u64,

    /// Do not respond to Clock Request SAL messages with the system time.
    #[arg(short = 'C', long = "no-clock")]
    no_clock: bool,

    /// Path to a C-Bus Toolkit project backup file (CBZ) for GA labels.
    #[arg(short = 'P', long = "project-file", value_name = "CBZ")]
    project_file: Option<PathBuf>,

    /// Comma-separated GAs for non-dimmable lights (e.g. "26,65,81").
    #[arg(long = "non-dimmable-lights", default_value = "")]
    non_dimmable_lights: String,

    /// Comma-separated GAs for switches (e.g. "15,90").
    #[arg(long = "switches", default_value = "")]
    switches: String,

    /// Comma-separated GAs for binary sensors (e.g. "10,20,30").
    #[arg(long = "binary-sensors", default_value = "")]
    binary_sensors: String,

    /// Comma-separated GAs to ignore entirely (e.g. "5,15,25").
    #[arg(long = "ignore", default_value = "")]
    ignore: String,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

/// Publishes retained MQTT messages through a live `rumqttc::Client`. The
/// client handle is swapped out on each reconnect cycle (see `run_cycle`),
/// so publishes racing a disconnect simply fail and are logged, matching
/// the Non-goal of guaranteed delivery across a broker outage.
struct MqttPublisher {
    client: Mutex<Client>,
}

impl Publisher for MqttPublisher {
    fn publish_retained(&self, topic: &str, payload: Vec<u8>) {
        let client = self.client.lock().expect("mqtt client mutex poisoned");
        if let Err(e) = client.publish(topic, QoS::AtLeastOnce, true, payload) {
            log::warn!("failed to publish to '{topic}': {e}");
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    config::init_logging(args.log_file.as_deref(), config::parse_verbosity(&args.verbosity)?)?;

    let pci = config::resolve_pci_endpoint(args.serial.as_deref(), args.tcp.as_deref())?;
    let broker_tls = !args.broker_disable_tls;
    let broker_port = args.broker_port.unwrap_or(if broker_tls { 8883 } else { 1883 });
    let broker_tls_materials = TlsMaterials::load(
        args.broker_ca.as_ref(),
        args.broker_client_cert.as_ref(),
        args.broker_client_key.as_ref(),
    )?;
    let broker_auth = args
        .broker_auth
        .as_deref()
        .map(config::BrokerAuth::load)
        .transpose()?;
    let device_types = config::parse_device_lists(
        &args.non_dimmable_lights,
        &args.switches,
        &args.binary_sensors,
        &args.ignore,
    );
    let labels = config::load_labels(args.project_file.as_deref());
    let timesync_interval = match args.timesync {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let cfg = BridgeConfig {
        broker_host: args.broker_address.clone(),
        broker_port,
        broker_keepalive: Duration::from_secs(args.broker_keepalive),
        broker_tls,
        broker_tls_materials,
        broker_auth,
        pci,
        timesync_interval,
        clock_response: !args.no_clock,
        project_file: args.project_file.clone(),
        device_types,
        dispatcher: DispatcherConfig::default(),
    };

    if !broker_tls {
        log::warn!("MQTT transport security disabled (--broker-disable-tls)");
    }
    if cfg.broker_auth.is_none() {
        log::warn!("no broker authentication configured (-A not supplied)");
    }

    let is_tty = std::io::stderr().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !std::io::stdout().is_terminal());

    let dc = Arc::new(cfg.device_types.clone());
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            log::warn!("received interrupt, shutting down");
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let mut first_attempt = true;
    let mut backoff = Duration::from_secs(1);
    while !shutdown.load(Ordering::SeqCst) {
        match run_cycle(&cfg, &dc, &labels, &shutdown, &ui) {
            Ok(()) => break,
            Err(e) if first_attempt => return Err(e),
            Err(e) => {
                log::error!("bridge cycle ended: {e:#}; retrying in {backoff:?}");
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }
        }
        first_attempt = false;
    }

    log::info!("cmqttd shut down cleanly");
    Ok(())
}

/// One PCI-open + MQTT-connect cycle: opens (or reopens) the PCI transport,
/// connects to the broker, publishes discovery, subscribes, and pumps
/// inbound `set` messages into the dispatcher until either transport is
/// lost or `shutdown` is set. Returns `Ok(())` only on a clean shutdown
/// request; any transport loss is an `Err` so the caller can retry.
fn run_cycle(
    cfg: &BridgeConfig,
    dc: &Arc<DeviceTypeMap>,
    labels: &HashMap<u16, String>,
    shutdown: &Arc<AtomicBool>,
    ui: &ui::Ui,
) -> Result<()> {
    let mut pci_transport: Box<dyn PciTransport> = {
        let _stage = ui.stage("Open PCI transport");
        match &cfg.pci {
            PciEndpoint::Serial(device) => Box::new(
                SerialPciTransport::open(device)
                    .with_context(|| format!("failed to open PCI serial device '{device}'"))?,
            ),
            PciEndpoint::Tcp(addr) => Box::new(
                TcpPciTransport::connect(addr)
                    .with_context(|| format!("failed to connect to PCI at '{addr}'"))?,
            ),
        }
    };
    let pci_events = pci_transport.events();

    let endpoint = cbus_mqttd::transport::parse_mqtt_endpoint(&cfg.broker_host, cfg.broker_port, cfg.broker_tls);
    let transport = cbus_mqttd::transport::build_transport(&endpoint, &cfg.broker_tls_materials)?;

    let mut options = MqttOptions::new("cmqttd", &cfg.broker_host, cfg.broker_port);
    options.set_keep_alive(cfg.broker_keepalive);
    options.set_transport(transport);
    if let Some(auth) = &cfg.broker_auth {
        options.set_credentials(&auth.username, &auth.password);
    }

    let mut connect_stage = Some(ui.stage("Connect to MQTT broker"));
    let (client, mut connection) = Client::new(options, 64);
    let publisher: Arc<dyn Publisher> = Arc::new(MqttPublisher {
        client: Mutex::new(client.clone()),
    });

    let dispatcher = Dispatcher::new(cfg.dispatcher);
    let state_sink = Arc::new(ConfirmedStatePublisher::new(Arc::clone(&publisher)));
    let bus_sink = Arc::new(BusEventFanout::new(Arc::clone(dc), Arc::clone(&publisher)));
    let router_running = Arc::new(AtomicBool::new(true));

    dispatcher.start(pci_transport, Arc::clone(&state_sink) as Arc<dyn cbus_mqttd::dispatch::StateSink>);
    let router_handle = spawn_event_router(
        Arc::clone(&dispatcher),
        Arc::clone(&state_sink) as Arc<dyn cbus_mqttd::dispatch::StateSink>,
        bus_sink as Arc<dyn cbus_mqttd::busevent::BusEventSink>,
        pci_events,
        Arc::clone(&router_running),
    );

    let teardown = |dispatcher: &Dispatcher, router_running: &AtomicBool| {
        router_running.store(false, Ordering::SeqCst);
        dispatcher.stop();
    };

    let result = (|| -> Result<()> {
        for event in connection.iter() {
            if shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    connect_stage.take();
                    log::info!("connected to broker {}:{}", cfg.broker_host, cfg.broker_port);
                    {
                        let _stage = ui.stage("Publish HA discovery configs");
                        discovery::publish_all(dc, labels, publisher.as_ref());
                        for topic in discovery::set_topics_to_subscribe(dc) {
                            client.subscribe(topic, QoS::ExactlyOnce)?;
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = publish.topic.as_str();
                    match payload::decode_set_payload(topic, &publish.payload, dc) {
                        Ok(Some(intent)) => dispatcher.enqueue(intent),
                        Ok(None) => log::info!("rejected command for ignored/sensor GA on '{topic}'"),
                        Err(e) => log::error!("{e}"),
                    }
                }
                Ok(_) => {}
                Err(e) => return Err(anyhow!("MQTT connection error: {e}")),
            }
        }
        Err(anyhow!("MQTT connection closed"))
    })();

    teardown(&dispatcher, &router_running);
    let _ = router_handle.join();
    result
}
