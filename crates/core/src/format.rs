//! Medienformate und die statische Format-Registry
//!
//! Jedes unterstuetzte Format ist ein unveraenderlicher Eintrag in
//! [`MEDIA_FORMATS`]. Die Signalisierung handelt Payload-Typen aus, die
//! Pipeline schlaegt das Format einmal beim Aufbau eines Call-Legs nach.
//!
//! ## Paketgroesse
//! Alle Formate verwenden 20 ms Pakete, d.h. `rate * channels / 50` Samples.

use crate::error::FormatError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pakete pro Sekunde bei 20 ms Paketdauer
const PAKETE_PRO_SEKUNDE: u32 = 50;

/// Kodierung der Nutzdaten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Encoding {
    /// G.711 μ-law, 1 Byte pro Sample
    Pcmu,
    /// Lineares PCM, 16 Bit big-endian
    Pcm,
    /// Speex (externer Codec)
    Speex,
}

impl Encoding {
    /// Bytes pro Sample im Paket (`None` bei variabler Bitrate)
    pub fn bytes_pro_sample(&self) -> Option<usize> {
        match self {
            Self::Pcmu => Some(1),
            Self::Pcm => Some(2),
            Self::Speex => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pcmu => "PCMU",
            Self::Pcm => "PCM",
            Self::Speex => "SPEEX",
        };
        f.write_str(name)
    }
}

/// Ein ausgehandeltes Medienformat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaFormat {
    /// RTP Payload-Typ
    pub payload: u8,
    /// Kodierung der Nutzdaten
    pub encoding: Encoding,
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl (1 oder 2)
    pub channels: u8,
    /// Traegt der Payload-Typ Telephone-Events (RFC 4733)?
    pub telephone_event: bool,
}

const fn eintrag(
    payload: u8,
    encoding: Encoding,
    sample_rate: u32,
    channels: u8,
    telephone_event: bool,
) -> MediaFormat {
    MediaFormat {
        payload,
        encoding,
        sample_rate,
        channels,
        telephone_event,
    }
}

/// Statische Registry aller unterstuetzten Formate
pub static MEDIA_FORMATS: &[MediaFormat] = &[
    eintrag(0, Encoding::Pcmu, 8000, 1, false),
    eintrag(101, Encoding::Pcmu, 8000, 1, true),
    eintrag(102, Encoding::Pcm, 8000, 1, false),
    eintrag(103, Encoding::Pcm, 8000, 2, false),
    eintrag(104, Encoding::Pcm, 16000, 1, false),
    eintrag(105, Encoding::Pcm, 16000, 2, false),
    eintrag(106, Encoding::Pcm, 32000, 1, false),
    eintrag(107, Encoding::Pcm, 32000, 2, false),
    eintrag(108, Encoding::Pcm, 44100, 1, false),
    eintrag(109, Encoding::Pcm, 44100, 2, false),
    eintrag(110, Encoding::Pcm, 48000, 1, false),
    eintrag(111, Encoding::Pcm, 48000, 2, false),
    eintrag(112, Encoding::Pcmu, 16000, 1, false),
    eintrag(113, Encoding::Pcmu, 32000, 1, false),
    eintrag(114, Encoding::Pcmu, 44100, 1, false),
    eintrag(115, Encoding::Pcmu, 48000, 1, false),
    eintrag(116, Encoding::Pcmu, 48000, 2, false),
    eintrag(117, Encoding::Speex, 8000, 1, false),
    eintrag(118, Encoding::Speex, 16000, 1, false),
    eintrag(119, Encoding::Speex, 32000, 1, false),
];

impl MediaFormat {
    /// Sucht ein Format anhand des Payload-Typs
    pub fn by_payload(payload: u8) -> Result<&'static MediaFormat, FormatError> {
        MEDIA_FORMATS
            .iter()
            .find(|f| f.payload == payload)
            .ok_or(FormatError::UnsupportedPayloadType(payload))
    }

    /// Sucht ein Format anhand von Kodierung, Rate und Kanalanzahl
    ///
    /// Telephone-Event-Eintraege werden dabei nie geliefert.
    pub fn find(
        encoding: Encoding,
        sample_rate: u32,
        channels: u8,
    ) -> Result<&'static MediaFormat, FormatError> {
        MEDIA_FORMATS
            .iter()
            .find(|f| {
                !f.telephone_event
                    && f.encoding == encoding
                    && f.sample_rate == sample_rate
                    && f.channels == channels
            })
            .ok_or(FormatError::UnsupportedFormat {
                encoding,
                sample_rate,
                channels,
            })
    }

    /// Alle registrierten Formate
    pub fn all() -> &'static [MediaFormat] {
        MEDIA_FORMATS
    }

    /// Samples pro 20 ms Paket (ueber alle Kanaele)
    pub fn samples_per_packet(&self) -> usize {
        (self.sample_rate * self.channels as u32 / PAKETE_PRO_SEKUNDE) as usize
    }

    /// Samples pro Kanal und Paket (= RTP-Timestamp-Inkrement)
    pub fn frames_per_packet(&self) -> usize {
        (self.sample_rate / PAKETE_PRO_SEKUNDE) as usize
    }

    /// Nutzdaten-Bytes pro Paket (`None` bei Speex)
    pub fn bytes_per_packet(&self) -> Option<usize> {
        self.encoding
            .bytes_pro_sample()
            .map(|b| b * self.samples_per_packet())
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} (PT {})",
            self.encoding, self.sample_rate, self.channels, self.payload
        )
    }
}
