//! Fehlertypen des Voice-Crates

use crate::ticker::TickerError;
use thiserror::Error;
use voxbridge_audio::AudioError;
use voxbridge_core::BridgeError;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Ticker(#[from] TickerError),

    #[error("Netzwerkfehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Leg nicht gefunden: {0}")]
    LegNichtGefunden(String),
}

pub type VoiceResult<T> = Result<T, VoiceError>;

impl From<VoiceError> for BridgeError {
    fn from(e: VoiceError) -> Self {
        match e {
            VoiceError::Io(io) => BridgeError::Netzwerk(io),
            VoiceError::LegNichtGefunden(leg) => BridgeError::LegNichtGefunden(leg),
            VoiceError::Audio(audio) => BridgeError::UngueltigesFormat(audio.to_string()),
            VoiceError::Ticker(t) => BridgeError::Konfiguration(t.to_string()),
        }
    }
}
