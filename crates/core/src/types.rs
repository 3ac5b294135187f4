//! Gemeinsame Identifikationstypen und Zeitkonstanten
//!
//! IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Dauer eines Medienpakets
pub const PACKET_PERIOD: Duration = Duration::from_millis(20);

/// Eindeutige ID eines Call-Legs (eine Gegenstelle, ein RTP-Strom je Richtung)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LegId(pub Uuid);

impl LegId {
    /// Erstellt eine neue zufaellige LegId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for LegId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LegId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "leg:{}", self.0)
    }
}
