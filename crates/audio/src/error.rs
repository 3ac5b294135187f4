//! Fehlertypen fuer die Audio-Verarbeitung

use thiserror::Error;
use voxbridge_core::{Encoding, FormatError};

/// Alle moeglichen Fehler der Audio-Verarbeitung
#[derive(Debug, Error)]
pub enum AudioError {
    /// Ungueltige Parameter beim Aufbau (Rate, Kanaele, Filterordnung)
    #[error("Ungueltiges Format: {0}")]
    InvalidFormat(String),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Puffer zu klein: benoetigt {benoetigt} Bytes, vorhanden {vorhanden}")]
    BufferTooSmall { benoetigt: usize, vorhanden: usize },

    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Kein Codec fuer {0} konfiguriert")]
    CodecNichtVerfuegbar(Encoding),
}

pub type AudioResult<T> = Result<T, AudioError>;
