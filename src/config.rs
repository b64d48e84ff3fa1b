//! Configuration (CFG): translates the CLI surface into the immutable data
//! CQD and friends need to run — the four GA-list flags into a
//! `DeviceTypeMap`, the PCI selection flags into a `PciEndpoint`, the broker
//! auth file into credentials, and `-v`/`-l` into a logging sink. TLS
//! material loading lives in [`crate::transport::tls`].

use crate::ga::{DeviceKind, DeviceTypeMap, GroupAddress};
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which physical link the PCI Adapter speaks over. Exactly one of
/// `-s/--serial` or `-t/--tcp` is required; enforced by the CLI's
/// `conflicts_with`/`required` pair, not re-checked here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PciEndpoint {
    Serial(String),
    Tcp(String),
}

/// Username/password pair read from the `-A/--broker-auth` file: first line
/// is the username, second is the password, UTF-8, matching the daemon's
/// historical file format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAuth {
    pub username: String,
    pub password: String,
}

impl BrokerAuth {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read broker auth file '{}'", path.display()))?;
        let mut lines = contents.lines();
        let username = lines
            .next()
            .ok_or_else(|| anyhow!("broker auth file '{}' is empty", path.display()))?
            .trim()
            .to_string();
        let password = lines
            .next()
            .ok_or_else(|| {
                anyhow!(
                    "broker auth file '{}' is missing a password on line 2",
                    path.display()
                )
            })?
            .trim()
            .to_string();
        Ok(Self { username, password })
    }
}

/// Timing knobs named as hard design defaults; not exposed on the CLI
/// surface (the original daemon hard-codes them too), but kept
/// independently constructible so tests can tighten them. Re-exported here
/// rather than duplicated since `BridgeConfig` carries one.
pub use crate::dispatch::DispatcherConfig;

/// CLI-derived immutable configuration handed to `main` once argument
/// parsing and validation succeed. Everything downstream (CQD, BEF, DP,
/// PXT) is constructed from this plus a `DeviceTypeMap`.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub broker_keepalive: Duration,
    pub broker_tls: bool,
    pub broker_tls_materials: crate::transport::TlsMaterials,
    pub broker_auth: Option<BrokerAuth>,
    pub pci: PciEndpoint,
    /// `None` when `-T 0` disables time-sync. Time-sync SAL emission itself
    /// is out of scope (see `cmqttd`'s module docs); this is carried only so
    /// a future PCI protocol implementation has somewhere to read it from.
    pub timesync_interval: Option<Duration>,
    pub clock_response: bool,
    pub project_file: Option<PathBuf>,
    pub device_types: DeviceTypeMap,
    pub dispatcher: DispatcherConfig,
}

/// Split a comma-separated GA list and assign `kind` to each valid address in
/// `map`, logging and skipping ones that fail to parse or are out of range.
/// Applied in a fixed order by the caller (non-dimmable, switches,
/// binary-sensors, ignore) so a GA named in more than one list ends up with
/// whichever kind's flag comes last, mirroring the source's dict-overwrite
/// behavior.
fn apply_ga_list(map: &mut DeviceTypeMap, csv: &str, kind: DeviceKind) {
    for raw in csv.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match raw.parse::<u16>().ok().and_then(|n| GroupAddress::new(n).ok()) {
            Some(ga) => map.set(ga, kind),
            None => log::warn!("invalid group address in --{kind} list: '{raw}'"),
        }
    }
}

/// Build the `DeviceTypeMap` from the four CLI CSV flags, in the order the
/// CLI documents them: non-dimmable lights, switches, binary sensors,
/// ignore. A GA present in more than one list gets whichever kind is
/// applied last.
pub fn parse_device_lists(
    non_dimmable_lights: &str,
    switches: &str,
    binary_sensors: &str,
    ignore: &str,
) -> DeviceTypeMap {
    let mut map = DeviceTypeMap::new();
    apply_ga_list(&mut map, non_dimmable_lights, DeviceKind::NonDimmable);
    apply_ga_list(&mut map, switches, DeviceKind::Switch);
    apply_ga_list(&mut map, binary_sensors, DeviceKind::BinarySensor);
    apply_ga_list(&mut map, ignore, DeviceKind::Ignore);
    map
}

/// Resolve the PCI endpoint from the two mutually exclusive flags. The CLI
/// also enforces this with `conflicts_with`/`required`; this is the
/// library-level guard so `BridgeConfig` can be constructed directly in
/// tests without going through clap.
pub fn resolve_pci_endpoint(serial: Option<&str>, tcp: Option<&str>) -> Result<PciEndpoint> {
    match (serial, tcp) {
        (Some(device), None) => Ok(PciEndpoint::Serial(device.to_string())),
        (None, Some(addr)) => Ok(PciEndpoint::Tcp(addr.to_string())),
        (None, None) => Err(anyhow!("exactly one of -s/--serial or -t/--tcp is required")),
        (Some(_), Some(_)) => Err(anyhow!("-s/--serial and -t/--tcp are mutually exclusive")),
    }
}

/// Labels keyed by group address, sourced from a C-Bus Toolkit project
/// backup (CBZ/XML). Parsing that format is an out-of-scope external
/// collaborator (spec §1); when a project file is given we log that labels
/// will fall back to generated names rather than silently ignoring the
/// flag.
pub fn load_labels(project_file: Option<&Path>) -> HashMap<u16, String> {
    if let Some(path) = project_file {
        log::warn!(
            "project-file label extraction ('{}') is not implemented; using generated labels",
            path.display()
        );
    }
    HashMap::new()
}

/// Parse the `-v/--verbosity` flag. Accepts the `log` crate's own level
/// names case-insensitively (`error`, `warn`, `info`, `debug`, `trace`,
/// `off`); the source's five-level `CRITICAL..DEBUG` scale collapses onto
/// this one-for-one except `CRITICAL`, which has no `log` equivalent and
/// maps to `error`.
pub fn parse_verbosity(raw: &str) -> Result<log::LevelFilter> {
    match raw.to_ascii_uppercase().as_str() {
        "CRITICAL" => Ok(log::LevelFilter::Error),
        other => other
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| anyhow!("invalid verbosity level '{raw}'")),
    }
}

/// Initialize the `log` sink: `env_logger` to stderr by default, or to
/// `log_file` when `-l/--log-file` is given.
pub fn init_logging(log_file: Option<&Path>, level: log::LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file '{}'", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn device_lists_apply_in_documented_order() {
        let map = parse_device_lists("7", "", "", "7");
        let ga = GroupAddress::new(7).unwrap();
        assert_eq!(map.kind_of(ga), DeviceKind::Ignore);
    }

    #[test]
    fn device_lists_skip_invalid_entries_and_keep_valid_ones() {
        let map = parse_device_lists("12, 999, abc", "", "", "");
        assert_eq!(
            map.kind_of(GroupAddress::new(12).unwrap()),
            DeviceKind::NonDimmable
        );
        assert_eq!(
            map.kind_of(GroupAddress::new(90).unwrap()),
            DeviceKind::Dimmable
        );
    }

    #[test]
    fn blank_lists_are_ignored() {
        let map = parse_device_lists("", "", "", "");
        assert_eq!(
            map.kind_of(GroupAddress::new(1).unwrap()),
            DeviceKind::Dimmable
        );
    }

    #[test]
    fn pci_endpoint_requires_exactly_one() {
        assert!(resolve_pci_endpoint(None, None).is_err());
        assert!(resolve_pci_endpoint(Some("/dev/ttyUSB0"), Some("host:1234")).is_err());
        assert_eq!(
            resolve_pci_endpoint(Some("/dev/ttyUSB0"), None).unwrap(),
            PciEndpoint::Serial("/dev/ttyUSB0".to_string())
        );
        assert_eq!(
            resolve_pci_endpoint(None, Some("host:1234")).unwrap(),
            PciEndpoint::Tcp("host:1234".to_string())
        );
    }

    #[test]
    fn broker_auth_reads_username_and_password_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "alice").unwrap();
        writeln!(f, "hunter2").unwrap();
        let auth = BrokerAuth::load(&path).unwrap();
        assert_eq!(auth.username, "alice");
        assert_eq!(auth.password, "hunter2");
    }

    #[test]
    fn broker_auth_rejects_missing_password_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.txt");
        std::fs::write(&path, "alice\n").unwrap();
        assert!(BrokerAuth::load(&path).is_err());
    }

    #[test]
    fn verbosity_accepts_log_crate_names_and_critical_alias() {
        assert_eq!(parse_verbosity("INFO").unwrap(), log::LevelFilter::Info);
        assert_eq!(parse_verbosity("debug").unwrap(), log::LevelFilter::Debug);
        assert_eq!(
            parse_verbosity("CRITICAL").unwrap(),
            log::LevelFilter::Error
        );
        assert!(parse_verbosity("NOISY").is_err());
    }

    #[test]
    fn load_labels_without_project_file_is_empty() {
        assert!(load_labels(None).is_empty());
    }
}
