//! voxbridge-audio – Signalverarbeitung fuer die Medienbruecke
//!
//! - G.711 μ-law Companding und 16-Bit-Konvertierung
//! - Nutzlast-Codecs (PCMU, PCM, externer Speex-Codec)
//! - DSP: Tiefpassfilter, Voice Activity Detection
//! - Abtastraten- und Kanalwandlung

pub mod codec;
pub mod companding;
pub mod dsp;
pub mod error;
pub mod resample;

// Bequeme Re-Exporte der wichtigsten Typen
pub use codec::{PayloadCodec, SpeechCodec};
pub use companding::{clip, linear_to_ulaw, ulaw_to_linear};
pub use dsp::lowpass::{FilterKind, LowPassFilter};
pub use dsp::vad::{VadConfig, VoiceActivityDetector};
pub use dsp::AudioProcessor;
pub use error::{AudioError, AudioResult};
pub use resample::{ResampleStats, SampleRateConverter};
