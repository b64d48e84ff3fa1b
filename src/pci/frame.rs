//! Minimal ASCII PCI-style framing.
//!
//! This is deliberately not a full implementation of the Clipsal/Schneider
//! C-Bus PCI/CNI protocol (explicitly out of scope) — just enough structure
//! for the adapter to assign a confirmation token to an outbound request and
//! for the reader to tell a confirmation echo apart from an unsolicited bus
//! event.
//!
//! Outbound request: `\` + lighting-app byte + GA byte + command byte(s) +
//! 2-hex-digit checksum + confirmation letter, terminated by `\r`.
//!
//! Unsolicited event: `\` + source-addr byte + lighting-app byte + GA byte +
//! tag byte + command byte(s) + 2-hex-digit checksum, terminated by `\r`
//! (no confirmation letter — nothing sent this, nothing to confirm).

use super::BusEvent;
use crate::ga::GroupAddress;
use crate::payload::CommandKind;

pub const LIGHTING_APP: u8 = 0x38;
const ON_TAG: u8 = 0x79;
const OFF_TAG: u8 = 0x01;
const RAMP_TAG: u8 = 0x02;

fn checksum(bytes: &[u8]) -> u8 {
    let sum: u8 = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}

fn push_hex(out: &mut String, byte: u8) {
    out.push_str(&format!("{byte:02X}"));
}

/// Encode an outbound on/off/ramp request, appending the confirmation letter
/// and terminator. `cmd_bytes` is the tag plus any payload (rate/level).
fn encode_request(ga: GroupAddress, cmd_bytes: &[u8], token: super::ConfirmationToken) -> String {
    let ga_byte = ga.get() as u8;
    let mut body = vec![LIGHTING_APP, ga_byte];
    body.extend_from_slice(cmd_bytes);
    let cksum = checksum(&body);

    let mut line = String::with_capacity(16);
    line.push('\\');
    for b in &body {
        push_hex(&mut line, *b);
    }
    push_hex(&mut line, cksum);
    line.push(token.0 as char);
    line.push('\r');
    line
}

pub fn encode_on(ga: GroupAddress, token: super::ConfirmationToken) -> String {
    encode_request(ga, &[ON_TAG], token)
}

pub fn encode_off(ga: GroupAddress, token: super::ConfirmationToken) -> String {
    encode_request(ga, &[OFF_TAG], token)
}

pub fn encode_ramp(
    ga: GroupAddress,
    duration_s: u16,
    level: u8,
    token: super::ConfirmationToken,
) -> String {
    let rate = duration_s.min(255) as u8;
    encode_request(ga, &[RAMP_TAG, rate, level], token)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedLine {
    Confirmation { letter: u8, success: bool },
    Event(BusEvent),
}

/// Classify one reassembled line (already split on `\r`/`\n`) from the PCI.
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    // Confirmation echo: exactly a letter followed by '.' (ok) or '!' (fail).
    if line.len() == 2 {
        let mut chars = line.chars();
        let letter = chars.next().unwrap();
        let mark = chars.next().unwrap();
        if letter.is_ascii_lowercase() && (mark == '.' || mark == '!') {
            return Some(ParsedLine::Confirmation {
                letter: letter as u8,
                success: mark == '.',
            });
        }
    }

    parse_event(line)
}

fn parse_event(line: &str) -> Option<ParsedLine> {
    let rest = line.strip_prefix('\\')?;
    // rest is hex pairs, last pair is the checksum.
    if rest.len() < 4 * 2 || rest.len() % 2 != 0 {
        return None;
    }
    let bytes: Option<Vec<u8>> = (0..rest.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&rest[i..i + 2], 16).ok())
        .collect();
    let bytes = bytes?;
    let (body, _cksum) = bytes.split_at(bytes.len() - 1);
    if body.len() < 4 {
        return None;
    }

    let source_addr = body[0];
    let app = body[1];
    if app != LIGHTING_APP {
        return None;
    }
    let ga = GroupAddress::new(body[2] as u16).ok()?;
    let tag = body[3];

    let kind = match tag {
        ON_TAG => CommandKind::On,
        OFF_TAG => CommandKind::Off,
        RAMP_TAG if body.len() >= 6 => CommandKind::Ramp {
            duration_s: body[4] as u16,
            level: body[5],
        },
        _ => return None,
    };

    Some(ParsedLine::Event(BusEvent {
        ga,
        source_addr: if source_addr == 0 {
            None
        } else {
            Some(source_addr)
        },
        kind,
    }))
}
