//! RTP-Pakete (RFC 3550)
//!
//! ## Paketformat (fester Header = 12 Bytes)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   V(2) P(1) X(1) CC(4)
//!  1       1   M(1) PT(7)
//!  2       2   Sequenznummer (big-endian)
//!  4       4   Zeitstempel (big-endian)
//!  8       4   SSRC (big-endian)
//! 12     4*CC  CSRC-Liste
//! ...      N   Nutzdaten
//! ```
//!
//! Extension-Header und Padding bleiben opak in den Nutzdaten, nur die
//! Flags werden abgebildet.
//!
//! ## Sequenz-Arithmetik
//! Sequenznummern (u16) und Zeitstempel (u32) laufen ueber. Vergleiche
//! erfolgen ausschliesslich ueber [`seq_delta`] / [`timestamp_delta`].

use crate::error::WireError;
use bytes::{Buf, BufMut};

/// RTP-Version (immer 2)
pub const RTP_VERSION: u8 = 2;

/// Groesse des festen RTP-Headers
pub const RTP_HEADER_SIZE: usize = 12;

/// Marker-Bit im zweiten Header-Byte
pub const MARKER_MASK: u8 = 0x80;

/// Payload-Typ im zweiten Header-Byte
pub const PAYLOAD_TYPE_MASK: u8 = 0x7f;

/// Maximale Anzahl CSRC-Eintraege (4 Bit)
pub const MAX_CSRC: usize = 15;

/// Comfort Noise (RFC 3389)
pub const COMFORT_NOISE_PAYLOAD: u8 = 13;

/// Von manchen Gegenstellen faelschlich fuer Comfort Noise verwendet
pub const COMFORT_NOISE_PAYLOAD_ALT: u8 = 19;

/// Prueft ob ein Payload-Typ Comfort Noise traegt
pub fn is_comfort_noise(payload_type: u8) -> bool {
    payload_type == COMFORT_NOISE_PAYLOAD || payload_type == COMFORT_NOISE_PAYLOAD_ALT
}

/// Vorzeichenbehafteter Abstand `a - b` zweier Sequenznummern
///
/// Positiv wenn `a` nach `b` kommt, auch ueber den Ueberlauf hinweg.
pub fn seq_delta(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}

/// Vorzeichenbehafteter Abstand `a - b` zweier RTP-Zeitstempel
pub fn timestamp_delta(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

// ---------------------------------------------------------------------------
// RtpFrame
// ---------------------------------------------------------------------------

/// Vollstaendiges RTP-Paket (Header + Nutzdaten)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpFrame {
    /// Padding-Flag (Padding-Bytes bleiben Teil der Nutzdaten)
    pub padding: bool,
    /// Extension-Flag (Extension bleibt Teil der Nutzdaten)
    pub extension: bool,
    /// Marker-Bit
    pub marker: bool,
    /// Payload-Typ (7 Bit)
    pub payload_type: u8,
    /// Sequenznummer
    pub sequence: u16,
    /// Zeitstempel in Samples pro Kanal
    pub timestamp: u32,
    /// Synchronisation Source
    pub ssrc: u32,
    /// Contributing Sources (max. 15)
    pub csrc: Vec<u32>,
    /// Nutzdaten
    pub payload: Vec<u8>,
}

impl RtpFrame {
    /// Erstellt ein Paket ohne Flags und CSRCs
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32, payload: Vec<u8>) -> Self {
        Self {
            padding: false,
            extension: false,
            marker: false,
            payload_type: payload_type & PAYLOAD_TYPE_MASK,
            sequence,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            payload,
        }
    }

    /// Erstellt ein Comfort-Noise-Paket mit dem gegebenen Rauschpegel
    pub fn comfort_noise(sequence: u16, timestamp: u32, ssrc: u32, level: u8) -> Self {
        Self::new(COMFORT_NOISE_PAYLOAD, sequence, timestamp, ssrc, vec![level])
    }

    /// Immer 2
    pub fn version(&self) -> u8 {
        RTP_VERSION
    }

    /// Anzahl CSRC-Eintraege wie sie auf dem Draht steht
    pub fn csrc_count(&self) -> u8 {
        self.csrc.len().min(MAX_CSRC) as u8
    }

    /// Headerlaenge inklusive CSRC-Liste
    pub fn header_len(&self) -> usize {
        RTP_HEADER_SIZE + 4 * self.csrc_count() as usize
    }

    /// Gesamtlaenge des kodierten Pakets
    pub fn encoded_len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    /// Setzt das Marker-Bit, der Payload-Typ bleibt unveraendert
    pub fn set_marker(&mut self) {
        self.marker = true;
    }

    /// Loescht das Marker-Bit, der Payload-Typ bleibt unveraendert
    pub fn clear_marker(&mut self) {
        self.marker = false;
    }

    /// Setzt den Payload-Typ, das Marker-Bit bleibt unveraendert
    pub fn set_payload_type(&mut self, payload_type: u8) {
        self.payload_type = payload_type & PAYLOAD_TYPE_MASK;
    }

    /// Ist dies ein Comfort-Noise-Paket?
    pub fn is_comfort_noise(&self) -> bool {
        is_comfort_noise(self.payload_type)
    }

    /// Rauschpegel eines Comfort-Noise-Pakets (`None` falls keins)
    pub fn noise_level(&self) -> Option<u8> {
        if self.is_comfort_noise() {
            Some(self.payload.first().copied().unwrap_or(0))
        } else {
            None
        }
    }

    /// Schreibt das Paket in einen beliebigen Puffer (big-endian)
    pub fn encode_into<B: BufMut>(&self, dst: &mut B) {
        let cc = self.csrc_count();
        let mut b0 = RTP_VERSION << 6 | cc;
        if self.padding {
            b0 |= 0x20;
        }
        if self.extension {
            b0 |= 0x10;
        }
        let mut b1 = self.payload_type & PAYLOAD_TYPE_MASK;
        if self.marker {
            b1 |= MARKER_MASK;
        }

        dst.put_u8(b0);
        dst.put_u8(b1);
        dst.put_u16(self.sequence);
        dst.put_u32(self.timestamp);
        dst.put_u32(self.ssrc);
        for csrc in self.csrc.iter().take(cc as usize) {
            dst.put_u32(*csrc);
        }
        dst.put_slice(&self.payload);
    }

    /// Serialisiert das Paket in einen neuen Puffer
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Deserialisiert ein Paket aus einem Byte-Slice
    ///
    /// # Fehler
    /// - `Truncated` wenn der Puffer kuerzer als Header + CSRC-Liste ist
    /// - `InvalidVersion` wenn die Version nicht 2 ist
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        WireError::pruefe_laenge(buf, RTP_HEADER_SIZE)?;

        let mut cursor = buf;
        let b0 = cursor.get_u8();
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(WireError::InvalidVersion(version));
        }
        let cc = (b0 & 0x0f) as usize;
        WireError::pruefe_laenge(buf, RTP_HEADER_SIZE + 4 * cc)?;

        let b1 = cursor.get_u8();
        let sequence = cursor.get_u16();
        let timestamp = cursor.get_u32();
        let ssrc = cursor.get_u32();
        let csrc = (0..cc).map(|_| cursor.get_u32()).collect();

        Ok(Self {
            padding: b0 & 0x20 != 0,
            extension: b0 & 0x10 != 0,
            marker: b1 & MARKER_MASK != 0,
            payload_type: b1 & PAYLOAD_TYPE_MASK,
            sequence,
            timestamp,
            ssrc,
            csrc,
            payload: cursor.to_vec(),
        })
    }
}

/// Dekodiert ein RTP-Paket
pub fn decode_rtp(buf: &[u8]) -> Result<RtpFrame, WireError> {
    RtpFrame::decode(buf)
}

/// Kodiert ein RTP-Paket
pub fn encode_rtp(frame: &RtpFrame) -> Vec<u8> {
    frame.encode()
}

// ---------------------------------------------------------------------------
// RtpSequencer – Sende-Zustand
// ---------------------------------------------------------------------------

/// Header-Zustand eines ausgehenden RTP-Stroms
///
/// Vergibt Sequenznummern und Zeitstempel. Das Marker-Bit wird auf dem
/// ersten Paket und auf dem ersten Paket nach einer Pause (Comfort Noise)
/// gesetzt. Waehrend einer Pause laeuft der Zeitstempel ueber
/// [`RtpSequencer::skip`] mit der Wanduhr weiter.
#[derive(Debug, Clone)]
pub struct RtpSequencer {
    ssrc: u32,
    payload_type: u8,
    sequence: u16,
    timestamp: u32,
    marker_pending: bool,
    comfort_noise_sent: bool,
}

impl RtpSequencer {
    /// Erstellt einen Sequencer mit festen Startwerten
    pub fn new(ssrc: u32, payload_type: u8, sequence: u16, timestamp: u32) -> Self {
        Self {
            ssrc,
            payload_type: payload_type & PAYLOAD_TYPE_MASK,
            sequence,
            timestamp,
            marker_pending: true,
            comfort_noise_sent: false,
        }
    }

    /// Erstellt einen Sequencer mit zufaelliger SSRC, Sequenz und Zeitstempel
    pub fn random(payload_type: u8) -> Self {
        Self::new(rand::random(), payload_type, rand::random(), rand::random())
    }

    /// SSRC dieses Stroms
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Naechste zu vergebende Sequenznummer
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// Aktueller Zeitstempel
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Erzeugt das naechste Medienpaket und rueckt Sequenz und Zeitstempel vor
    ///
    /// `frames` ist die Anzahl Samples pro Kanal in `payload`.
    pub fn next_frame(&mut self, payload: Vec<u8>, frames: u32) -> RtpFrame {
        let mut frame = RtpFrame::new(
            self.payload_type,
            self.sequence,
            self.timestamp,
            self.ssrc,
            payload,
        );
        if self.marker_pending {
            frame.set_marker();
            self.marker_pending = false;
        }
        self.comfort_noise_sent = false;
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(frames);
        frame
    }

    /// Erzeugt ein Comfort-Noise-Paket, aber nur einmal pro Pause
    ///
    /// Das naechste Medienpaket traegt danach das Marker-Bit.
    pub fn comfort_noise(&mut self, level: u8, frames: u32) -> Option<RtpFrame> {
        self.marker_pending = true;
        if self.comfort_noise_sent {
            self.skip(frames);
            return None;
        }
        let frame = RtpFrame::comfort_noise(self.sequence, self.timestamp, self.ssrc, level);
        self.comfort_noise_sent = true;
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(frames);
        Some(frame)
    }

    /// Rueckt nur den Zeitstempel vor (Pause ohne Paket)
    pub fn skip(&mut self, frames: u32) {
        self.timestamp = self.timestamp.wrapping_add(frames);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
