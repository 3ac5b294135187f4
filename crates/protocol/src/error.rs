//! Fehlertypen des Wire-Codecs

use thiserror::Error;

/// Fehler beim Dekodieren von RTP/RTCP-Paketen
///
/// Ein fehlerhaftes Datagramm wird verworfen; der Call laeuft weiter.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Paket zu kurz: {actual} Bytes (erwartet mindestens {expected})")]
    Truncated { expected: usize, actual: usize },

    #[error("Ungueltige RTP-Version: {0} (erwartet 2)")]
    InvalidVersion(u8),

    #[error("Unbekannter RTCP-Pakettyp: {0}")]
    UnknownPacketType(u8),

    #[error("RTCP-Laenge passt nicht: {laenge} Bytes fuer {bloecke} Report-Bloecke")]
    LengthMismatch { laenge: usize, bloecke: usize },

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Prueft die Mindestlaenge eines Puffers
    pub(crate) fn pruefe_laenge(buf: &[u8], expected: usize) -> Result<(), WireError> {
        if buf.len() < expected {
            return Err(WireError::Truncated {
                expected,
                actual: buf.len(),
            });
        }
        Ok(())
    }
}
