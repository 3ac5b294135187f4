//! Telephone-Events (RFC 4733, DTMF)
//!
//! ```text
//!  0                   1                   2                   3
//! |     event     |E|R| volume    |          duration             |
//! ```

use crate::error::WireError;
use bytes::{Buf, BufMut};

/// Groesse der Nutzdaten eines Telephone-Events
pub const TELEPHONE_EVENT_SIZE: usize = 4;

/// Ein einzelnes Telephone-Event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelephoneEvent {
    /// Event-Code (0-9, 10 = '*', 11 = '#', 12-15 = A-D)
    pub event: u8,
    /// Ende des Events
    pub end: bool,
    /// Pegel in -dBm0 (6 Bit)
    pub volume: u8,
    /// Dauer in Zeitstempel-Einheiten
    pub duration: u16,
}

impl TelephoneEvent {
    /// Zeichen des Events, falls es eine DTMF-Taste ist
    pub fn digit(&self) -> Option<char> {
        match self.event {
            0..=9 => char::from_digit(self.event as u32, 10),
            10 => Some('*'),
            11 => Some('#'),
            12..=15 => Some((b'A' + self.event - 12) as char),
            _ => None,
        }
    }

    /// Serialisiert die Nutzdaten
    pub fn encode(&self) -> [u8; TELEPHONE_EVENT_SIZE] {
        let mut buf = [0u8; TELEPHONE_EVENT_SIZE];
        let mut dst = &mut buf[..];
        dst.put_u8(self.event);
        dst.put_u8((if self.end { 0x80 } else { 0 }) | (self.volume & 0x3f));
        dst.put_u16(self.duration);
        buf
    }

    /// Liest die Nutzdaten
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        WireError::pruefe_laenge(buf, TELEPHONE_EVENT_SIZE)?;
        let mut cursor = buf;
        let event = cursor.get_u8();
        let flags = cursor.get_u8();
        Ok(Self {
            event,
            end: flags & 0x80 != 0,
            volume: flags & 0x3f,
            duration: cursor.get_u16(),
        })
    }
}
