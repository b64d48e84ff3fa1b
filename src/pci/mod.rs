//! PCI Adapter: the boundary between the dispatcher and the physical C-Bus
//! PCI/CNI device. Request encoding lives in [`frame`]; the two concrete
//! transports are [`SerialPciTransport`] and [`TcpPciTransport`].
//!
//! The wire format here is intentionally minimal — request encoding/decoding
//! for the real Clipsal/Schneider PCI protocol is out of scope; this gives
//! the crate something concrete to drive end to end and to exercise in
//! tests via [`FakePciTransport`].

mod frame;
mod serial;
mod tcp;

pub use frame::{parse_line, ParsedLine};
pub use serial::SerialPciTransport;
pub use tcp::TcpPciTransport;

use crate::ga::GroupAddress;
use crate::payload::CommandKind;
use std::fmt;
use std::io::BufRead;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;

/// Opaque confirmation identifier echoed by the PCI for one outstanding
/// request. Assigned round-robin over `b'g'..=b'z'` by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfirmationToken(pub u8);

impl fmt::Display for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 as char)
    }
}

#[derive(Debug)]
pub enum PciError {
    Io(std::io::Error),
    Closed,
}

impl fmt::Display for PciError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PciError::Io(e) => write!(f, "PCI transport I/O error: {e}"),
            PciError::Closed => write!(f, "PCI transport is closed"),
        }
    }
}

impl std::error::Error for PciError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PciError::Io(e) => Some(e),
            PciError::Closed => None,
        }
    }
}

impl From<std::io::Error> for PciError {
    fn from(e: std::io::Error) -> Self {
        PciError::Io(e)
    }
}

/// An unsolicited lighting-Application report from the bus: another station
/// switched a load, or a ramp completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusEvent {
    pub ga: GroupAddress,
    pub source_addr: Option<u8>,
    pub kind: CommandKind,
}

/// PA's report of a completed (or failed) request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationResult {
    pub token: ConfirmationToken,
    pub success: bool,
}

/// One item delivered asynchronously from the transport's reader thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PciOutput {
    Confirmation(ConfirmationResult),
    BusEvent(BusEvent),
}

/// The byte-level half of the PCI Adapter. Implementations own the physical
/// link and a background reader that classifies inbound lines and forwards
/// them over the channel returned by `events()`.
pub trait PciTransport: Send {
    fn send_on(&mut self, ga: GroupAddress) -> Result<Option<ConfirmationToken>, PciError>;
    fn send_off(&mut self, ga: GroupAddress) -> Result<Option<ConfirmationToken>, PciError>;
    fn send_ramp(
        &mut self,
        ga: GroupAddress,
        duration_s: u16,
        level: u8,
    ) -> Result<Option<ConfirmationToken>, PciError>;

    /// Receiver side of the reader thread's output channel. Panics if called
    /// more than once per transport instance (the channel has one consumer).
    fn events(&mut self) -> Receiver<PciOutput>;
}

/// Assigns confirmation letters round-robin over `b'g'..=b'z'`, mirroring
/// the real PCI's confirmation-letter convention closely enough to exercise
/// token correlation in tests.
pub(crate) struct TokenCounter(u8);

impl TokenCounter {
    const FIRST: u8 = b'g';
    const LAST: u8 = b'z';

    pub(crate) fn new() -> Self {
        Self(Self::FIRST)
    }

    pub(crate) fn next(&mut self) -> ConfirmationToken {
        let token = ConfirmationToken(self.0);
        self.0 = if self.0 >= Self::LAST {
            Self::FIRST
        } else {
            self.0 + 1
        };
        token
    }
}

/// Spawn the background reader thread shared by both transports: reads
/// lines off `reader`, classifies each with [`frame::parse_line`], and
/// forwards the result on `tx`. Exits quietly when the link closes.
pub(crate) fn spawn_reader<R>(reader: R, tx: Sender<PciOutput>) -> JoinHandle<()>
where
    R: std::io::Read + Send + 'static,
{
    std::thread::spawn(move || {
        let buffered = std::io::BufReader::new(reader);
        for line in buffered.lines() {
            let Ok(line) = line else {
                break;
            };
            match frame::parse_line(&line) {
                Some(frame::ParsedLine::Confirmation { letter, success }) => {
                    let out = PciOutput::Confirmation(ConfirmationResult {
                        token: ConfirmationToken(letter),
                        success,
                    });
                    if tx.send(out).is_err() {
                        break;
                    }
                }
                Some(frame::ParsedLine::Event(ev)) => {
                    if tx.send(PciOutput::BusEvent(ev)).is_err() {
                        break;
                    }
                }
                None => {
                    log::debug!("PCI reader: ignoring unrecognized line '{line}'");
                }
            }
        }
        log::warn!("PCI reader thread exiting: link closed");
    })
}
