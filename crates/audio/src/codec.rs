//! Nutzlast-Codecs: RTP-Payload ↔ lineare Samples
//!
//! PCMU und PCM (16 Bit big-endian) werden direkt ueber die
//! Companding-Tabellen abgebildet. Speex ist ein externer Codec hinter dem
//! [`SpeechCodec`]-Trait und muss beim Aufbau mitgegeben werden.

use crate::companding::{
    be_bytes_to_linear, linear_to_be_bytes, linear_to_ulaw_bytes, ulaw_bytes_to_linear,
};
use crate::error::{AudioError, AudioResult};
use tracing::debug;
use voxbridge_core::{Encoding, MediaFormat};

/// Externer Sprachcodec (z.B. Speex)
pub trait SpeechCodec: Send {
    /// Dekodiert eine Nutzlast zu linearen Samples
    fn decode(&mut self, payload: &[u8]) -> AudioResult<Vec<i32>>;

    /// Kodiert lineare Samples zu einer Nutzlast
    fn encode(&mut self, samples: &[i32]) -> AudioResult<Vec<u8>>;
}

/// Codec fuer die Nutzlast eines Legs
pub enum PayloadCodec {
    Ulaw { samples_per_packet: usize },
    Pcm { samples_per_packet: usize },
    Speex(Box<dyn SpeechCodec>),
}

impl std::fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ulaw { samples_per_packet } => f
                .debug_struct("Ulaw")
                .field("samples_per_packet", samples_per_packet)
                .finish(),
            Self::Pcm { samples_per_packet } => f
                .debug_struct("Pcm")
                .field("samples_per_packet", samples_per_packet)
                .finish(),
            Self::Speex(_) => f.write_str("Speex"),
        }
    }
}

impl PayloadCodec {
    /// Waehlt den Codec fuer ein ausgehandeltes Format
    ///
    /// Fuer Speex muss `speex` gesetzt sein, sonst
    /// [`AudioError::CodecNichtVerfuegbar`].
    pub fn for_format(
        format: &MediaFormat,
        speex: Option<Box<dyn SpeechCodec>>,
    ) -> AudioResult<Self> {
        if format.telephone_event {
            return Err(AudioError::InvalidFormat(format!(
                "{format} traegt keine Audiodaten"
            )));
        }
        let samples_per_packet = format.samples_per_packet();
        let codec = match format.encoding {
            Encoding::Pcmu => Self::Ulaw { samples_per_packet },
            Encoding::Pcm => Self::Pcm { samples_per_packet },
            Encoding::Speex => {
                Self::Speex(speex.ok_or(AudioError::CodecNichtVerfuegbar(Encoding::Speex))?)
            }
        };
        debug!(format = %format, "Payload-Codec gewaehlt: {codec:?}");
        Ok(codec)
    }

    /// Dekodiert eine Nutzlast
    ///
    /// Zu kurze PCMU/PCM-Pakete werden mit Stille auf Paketgroesse
    /// aufgefuellt.
    pub fn decode(&mut self, payload: &[u8]) -> AudioResult<Vec<i32>> {
        match self {
            Self::Ulaw { samples_per_packet } => {
                let mut samples = ulaw_bytes_to_linear(payload);
                if samples.len() < *samples_per_packet {
                    samples.resize(*samples_per_packet, 0);
                }
                Ok(samples)
            }
            Self::Pcm { samples_per_packet } => {
                let mut samples = be_bytes_to_linear(payload);
                if samples.len() < *samples_per_packet {
                    samples.resize(*samples_per_packet, 0);
                }
                Ok(samples)
            }
            Self::Speex(codec) => codec.decode(payload),
        }
    }

    /// Kodiert lineare Samples
    pub fn encode(&mut self, samples: &[i32]) -> AudioResult<Vec<u8>> {
        match self {
            Self::Ulaw { .. } => Ok(linear_to_ulaw_bytes(samples)),
            Self::Pcm { .. } => Ok(linear_to_be_bytes(samples)),
            Self::Speex(codec) => codec.encode(samples),
        }
    }

    /// `true` fuer μ-law, dessen Nutzlast im Jitter-Buffer kompandiert bleibt
    pub fn is_companded(&self) -> bool {
        matches!(self, Self::Ulaw { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companding::linear_to_ulaw;

    /// Testcodec: verdoppelt jedes Byte beim Kodieren
    struct Verdoppler;

    impl SpeechCodec for Verdoppler {
        fn decode(&mut self, payload: &[u8]) -> AudioResult<Vec<i32>> {
            if payload.is_empty() {
                return Err(AudioError::CodecFehler("leere Nutzlast".into()));
            }
            Ok(payload.iter().step_by(2).map(|b| *b as i32).collect())
        }

        fn encode(&mut self, samples: &[i32]) -> AudioResult<Vec<u8>> {
            Ok(samples.iter().flat_map(|s| [*s as u8; 2]).collect())
        }
    }

    #[test]
    fn pcmu_kurzes_paket_wird_aufgefuellt() {
        let format = MediaFormat::by_payload(0).unwrap();
        let mut codec = PayloadCodec::for_format(format, None).unwrap();
        let samples = codec.decode(&[linear_to_ulaw(1000); 100]).unwrap();
        assert_eq!(samples.len(), 160);
        assert!(samples[100..].iter().all(|s| *s == 0));
        assert!(codec.is_companded());
    }

    #[test]
    fn pcm_big_endian() {
        let format = MediaFormat::find(Encoding::Pcm, 16000, 1).unwrap();
        let mut codec = PayloadCodec::for_format(format, None).unwrap();
        let bytes = codec.encode(&[1, -1, 70000]).unwrap();
        assert_eq!(bytes, vec![0, 1, 0xFF, 0xFF, 0x7F, 0xFF]);
        let samples = codec.decode(&bytes).unwrap();
        assert_eq!(&samples[..3], &[1, -1, 32767]);
        assert_eq!(samples.len(), 320);
    }

    #[test]
    fn speex_ohne_codec_schlaegt_fehl() {
        let format = MediaFormat::find(Encoding::Speex, 8000, 1).unwrap();
        assert!(matches!(
            PayloadCodec::for_format(format, None),
            Err(AudioError::CodecNichtVerfuegbar(Encoding::Speex))
        ));
    }

    #[test]
    fn speex_ueber_externen_codec() {
        let format = MediaFormat::find(Encoding::Speex, 8000, 1).unwrap();
        let mut codec = PayloadCodec::for_format(format, Some(Box::new(Verdoppler))).unwrap();
        let bytes = codec.encode(&[1, 2, 3]).unwrap();
        assert_eq!(bytes, vec![1, 1, 2, 2, 3, 3]);
        assert_eq!(codec.decode(&bytes).unwrap(), vec![1, 2, 3]);
        assert!(codec.decode(&[]).is_err());
    }

    #[test]
    fn telephone_event_hat_keinen_codec() {
        let format = MediaFormat::by_payload(101).unwrap();
        assert!(PayloadCodec::for_format(format, None).is_err());
    }
}
