//! Medien-Ereignisse
//!
//! Ereignisse, die der Datenpfad eines Call-Legs nach aussen meldet
//! (Sprechstatus, Comfort Noise, DTMF, Lebenszyklus). Die Zustellung
//! erfolgt ueber einen [`EventSink`]; im Voice-Crate ist das ein
//! tokio-Broadcast-Kanal.

use crate::types::LegId;
use serde::{Deserialize, Serialize};

/// Alle Ereignisse die ein Call-Leg melden kann
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MediaEvent {
    /// Ein Leg wurde gestartet
    LegGestartet { leg: LegId },
    /// Ein Leg wurde beendet
    LegBeendet { leg: LegId },
    /// Die Sprachaktivitaet hat sich geaendert
    SpeakingChanged { leg: LegId, speaking: bool },
    /// Die Gegenstelle sendet Comfort Noise (Pegel in -dBov)
    ComfortNoise { leg: LegId, level: u8 },
    /// Telephone-Event (DTMF) empfangen
    TelephoneEvent {
        leg: LegId,
        event: u8,
        end: bool,
        duration: u16,
    },
}

impl MediaEvent {
    /// Gibt das betroffene Leg zurueck
    pub fn leg(&self) -> LegId {
        match self {
            Self::LegGestartet { leg }
            | Self::LegBeendet { leg }
            | Self::SpeakingChanged { leg, .. }
            | Self::ComfortNoise { leg, .. }
            | Self::TelephoneEvent { leg, .. } => *leg,
        }
    }
}

/// Senke fuer Medien-Ereignisse
pub trait EventSink: Send + Sync + 'static {
    /// Meldet ein Ereignis; darf den Datenpfad nie blockieren
    fn melden(&self, event: MediaEvent);
}
