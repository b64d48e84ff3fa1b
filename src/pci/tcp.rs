//! TCP-tunneled PCI transport, for CNI devices reached over a network
//! (`host:port`, as handed to the daemon via `-t/--tcp`).

use super::{frame, spawn_reader, ConfirmationToken, PciError, PciOutput, PciTransport, TokenCounter};
use crate::ga::GroupAddress;
use std::io::Write;
use std::net::TcpStream;
use std::sync::mpsc::Receiver;

pub struct TcpPciTransport {
    stream: TcpStream,
    tokens: TokenCounter,
    events_rx: Option<Receiver<PciOutput>>,
}

impl TcpPciTransport {
    pub fn connect(addr: &str) -> Result<Self, PciError> {
        let stream = TcpStream::connect(addr)?;
        let reader = stream.try_clone()?;
        let (tx, rx) = std::sync::mpsc::channel();
        spawn_reader(reader, tx);

        Ok(Self {
            stream,
            tokens: TokenCounter::new(),
            events_rx: Some(rx),
        })
    }

    fn write_line(&mut self, line: &str) -> Result<(), PciError> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }
}

impl PciTransport for TcpPciTransport {
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
            .expect("TcpPciTransport::events() called more than once")
    }
}
