//! Serial-attached PCI transport (e.g. a cp210x USB-serial adapter wired to
//! a C-Bus PCI), 9600 8N1.

use super::{frame, spawn_reader, ConfirmationToken, PciError, PciOutput, PciTransport, TokenCounter};
use crate::ga::GroupAddress;
use std::io::Write;
use std::sync::mpsc::Receiver;
use std::time::Duration;

const BAUD_RATE: u32 = 9600;

pub struct SerialPciTransport {
    port: Box<dyn serialport::SerialPort>,
    tokens: TokenCounter,
    events_rx: Option<Receiver<PciOutput>>,
}

impl SerialPciTransport {
    pub fn open(device: &str) -> Result<Self, PciError> {
        let port = serialport::new(device, BAUD_RATE)
            .timeout(Duration::from_millis(500))
            .open()
            .map_err(|e| PciError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let reader = port
            .try_clone()
            .map_err(|e| PciError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let (tx, rx) = std::sync::mpsc::channel();
        spawn_reader(reader, tx);

        Ok(Self {
            port,
            tokens: TokenCounter::new(),
            events_rx: Some(rx),
        })
    }

    fn write_line(&mut self, line: &str) -> Result<(), PciError> {
        self.port.write_all(line.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }
}

impl PciTransport for SerialPciTransport {
    fn send_on(&mut self, ga: GroupAddress) -> Result<Option<ConfirmationToken>, PciError> {
        let token = self.tokens.next();
        self.write_line(&frame::encode_on(ga, token))?;
        Ok(Some(token))
    }

    fn send_off(&mut self, ga: GroupAddress) -> Result<Option<ConfirmationToken>, PciError> {
        let token = self.tokens.next();
        self.write_line(&frame::encode_off(ga, token))?;
        Ok(Some(token))
    }

    fn send_ramp(
        &mut self,
        ga: GroupAddress,
        duration_s: u16,
        level: u8,
    ) -> Result<Option<ConfirmationToken>, PciError> {
        let token = self.tokens.next();
        self.write_line(&frame::encode_ramp(ga, duration_s, level, token))?;
        Ok(Some(token))
    }

    fn events(&mut self) -> Receiver<PciOutput> {
        self.events_rx
            .take()
            .expect("SerialPciTransport::events() called more than once")
    }
}
