//! DSP-Module fuer die Audio-Verarbeitung
//!
//! Alle Module implementieren das `AudioProcessor` Trait fuer
//! eine einheitliche Pipeline-Integration.

pub mod lowpass;
pub mod vad;

/// Gemeinsames Trait fuer alle Audio-Prozessoren
///
/// Alle DSP-Bausteine verarbeiten interleavte lineare Samples in-place und
/// sind Send + Sync fuer die Nutzung im Wiedergabe-Thread eines Legs.
pub trait AudioProcessor: Send + Sync {
    /// Verarbeitet einen Puffer von Samples in-place
    fn process(&mut self, samples: &mut [i32]);

    /// Setzt den internen Zustand zurueck (z.B. Filter-Historie)
    fn reset(&mut self);
}
