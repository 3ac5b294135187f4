//! Fehlertypen fuer voxbridge
//!
//! Zentraler Fehler-Enum fuer Aufbau und Betrieb eines Call-Legs.
//! Untermodule (Wire-Codec, Audio, Ticker) definieren eigene Fehler und
//! werden an den Crate-Grenzen via `#[from]` konvertiert.
//!
//! Fehler im Datenpfad (kaputte Pakete, Buffer-Pathologien) beenden nie
//! einen Call; sie werden gezaehlt und geloggt. Nur Fehler beim Aufbau
//! (ungueltiges Format, Konfiguration) brechen den Call-Setup ab.

use crate::format::Encoding;
use thiserror::Error;

/// Globaler Result-Alias fuer voxbridge
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Fehler beim Nachschlagen in der Medienformat-Registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("Payload-Typ nicht unterstuetzt: {0}")]
    UnsupportedPayloadType(u8),

    #[error("Medienformat nicht unterstuetzt: {encoding}/{sample_rate}/{channels}")]
    UnsupportedFormat {
        encoding: Encoding,
        sample_rate: u32,
        channels: u8,
    },
}

/// Alle moeglichen Fehler im voxbridge-System
#[derive(Debug, Error)]
pub enum BridgeError {
    // --- Medienformat ---
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Ungueltiges Medienformat: {0}")]
    UngueltigesFormat(String),

    // --- Netzwerk ---
    #[error("Netzwerkfehler: {0}")]
    Netzwerk(#[from] std::io::Error),

    #[error("Call-Leg nicht gefunden: {0}")]
    LegNichtGefunden(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl BridgeError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler den Call-Aufbau abbrechen muss
    ///
    /// Formatfehler koennen zur Laufzeit nicht repariert werden, alles
    /// andere wird lokal behandelt.
    pub fn bricht_setup_ab(&self) -> bool {
        matches!(
            self,
            Self::Format(_) | Self::UngueltigesFormat(_) | Self::Konfiguration(_)
        )
    }
}
