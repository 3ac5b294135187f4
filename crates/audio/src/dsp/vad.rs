//! Voice Activity Detection (VAD)
//!
//! Leistungsbasierte Erkennung mit Hysterese. Die Samples werden auf Mono
//! gefaltet, je 8 Samples wird der Mittelwert des oberen Bytes quadriert und
//! aufsummiert. Sobald genug Gruppen gesammelt sind (`50 * rate / 8000`,
//! bei Stereo doppelt so viele) wird die mittlere Leistung mit einer
//! adaptiven Schwelle verglichen:
//!
//! - ueber der Schwelle: nach mehr als `on_thresh` Entscheidungen in Folge
//!   "spricht"; die Schwelle wandert langsam nach oben
//! - sonst: nach mehr als `off_thresh` Entscheidungen in Folge "still"; die
//!   Schwelle folgt dem Umgebungspegel nach unten

use super::AudioProcessor;
use crate::error::{AudioError, AudioResult};
use serde::{Deserialize, Serialize};

/// Samples pro Leistungsgruppe
const GRUPPE: usize = 8;

/// Konfiguration fuer die VAD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Entscheidungen ueber der Schwelle, die ueberschritten werden muessen
    pub on_thresh: u32,
    /// Entscheidungen unter der Schwelle, die ueberschritten werden muessen
    pub off_thresh: u32,
    /// Faktor fuer das Absenken der Schwelle auf den Umgebungspegel
    pub power_threshold_limit: f64,
    /// Startwert der Leistungsschwelle
    pub initial_power_threshold: f64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            on_thresh: 1,
            off_thresh: 4,
            power_threshold_limit: 1.05,
            initial_power_threshold: 50.0,
        }
    }
}

/// Voice Activity Detector fuer einen Audiostrom
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    channels: usize,
    /// Gruppen bis zur naechsten Entscheidung
    schwelle_anzahl: u32,
    power_threshold: f64,
    summe: f64,
    anzahl: u32,
    /// Angefangene Gruppe aus dem letzten Block
    gruppe_summe: i32,
    gruppe_fuellstand: usize,
    on_count: u32,
    off_count: u32,
    speaking: bool,
}

impl VoiceActivityDetector {
    pub fn new(sample_rate: u32, channels: u8, config: VadConfig) -> AudioResult<Self> {
        if !(1..=2).contains(&channels) {
            return Err(AudioError::InvalidFormat(format!(
                "VAD: {channels} Kanaele (erlaubt 1 oder 2)"
            )));
        }
        if sample_rate < 8000 {
            return Err(AudioError::InvalidFormat(format!(
                "VAD: Abtastrate {sample_rate} zu klein"
            )));
        }

        let mut schwelle_anzahl = 50 * sample_rate / 8000;
        if channels == 2 {
            schwelle_anzahl *= 2;
        }

        Ok(Self {
            config,
            channels: channels as usize,
            schwelle_anzahl,
            power_threshold: config.initial_power_threshold,
            summe: 0.0,
            anzahl: 0,
            gruppe_summe: 0,
            gruppe_fuellstand: 0,
            on_count: 0,
            off_count: 0,
            speaking: false,
        })
    }

    /// Gibt zurueck ob zuletzt Sprache erkannt wurde
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Aktuelle adaptive Leistungsschwelle
    pub fn power_threshold(&self) -> f64 {
        self.power_threshold
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Analysiert einen Block interleavter Samples
    ///
    /// Gibt `true` zurueck wenn sich der Sprechzustand in diesem Aufruf
    /// geaendert hat. Die Samples werden nicht veraendert.
    pub fn detect(&mut self, samples: &[i32]) -> bool {
        let mut geaendert = false;
        for frame in samples.chunks_exact(self.channels) {
            let mono = frame.iter().sum::<i32>() / self.channels as i32;
            self.gruppe_summe += mono >> 8;
            self.gruppe_fuellstand += 1;
            if self.gruppe_fuellstand < GRUPPE {
                continue;
            }

            let mittel = (self.gruppe_summe / GRUPPE as i32) as f64;
            self.gruppe_summe = 0;
            self.gruppe_fuellstand = 0;
            self.summe += mittel * mittel;
            // Zaehlt in Eingangsgruppen, damit Stereo dieselbe Dauer abdeckt
            self.anzahl += self.channels as u32;

            if self.anzahl >= self.schwelle_anzahl {
                let leistung = self.summe * self.channels as f64 / self.anzahl as f64;
                self.summe = 0.0;
                self.anzahl = 0;
                geaendert |= self.entscheiden(leistung);
            }
        }
        geaendert
    }

    fn entscheiden(&mut self, leistung: f64) -> bool {
        if leistung > self.power_threshold {
            self.on_count += 1;
            self.off_count = 0;
            self.power_threshold = (self.power_threshold + 2.0) * 63.0 / 64.0 + leistung / 64.0;
            if self.on_count > self.config.on_thresh && !self.speaking {
                self.speaking = true;
                tracing::trace!(leistung, schwelle = self.power_threshold, "VAD: Sprache");
                return true;
            }
        } else {
            self.off_count += 1;
            self.on_count = 0;
            self.power_threshold = self
                .power_threshold
                .min(leistung * self.config.power_threshold_limit + 2.0);
            if self.off_count > self.config.off_thresh && self.speaking {
                self.speaking = false;
                tracing::trace!(leistung, schwelle = self.power_threshold, "VAD: Stille");
                return true;
            }
        }
        false
    }

    /// Setzt den Detektor zurueck; liefert ob er vorher "spricht" meldete
    pub fn reset(&mut self) -> bool {
        let vorher = self.speaking;
        self.power_threshold = self.config.initial_power_threshold;
        self.summe = 0.0;
        self.anzahl = 0;
        self.gruppe_summe = 0;
        self.gruppe_fuellstand = 0;
        self.on_count = 0;
        self.off_count = 0;
        self.speaking = false;
        vorher
    }
}

impl AudioProcessor for VoiceActivityDetector {
    /// Reine Analyse, die Samples bleiben unveraendert
    fn process(&mut self, samples: &mut [i32]) {
        self.detect(samples);
    }

    fn reset(&mut self) {
        VoiceActivityDetector::reset(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 160;

    /// Rechteckton, Halbperiode 80 Samples
    fn ton(amplitude: i32, kanaele: usize) -> Vec<i32> {
        (0..BLOCK)
            .flat_map(|i| {
                let s = if (i / 80) % 2 == 0 { amplitude } else { -amplitude };
                std::iter::repeat(s).take(kanaele)
            })
            .collect()
    }

    #[test]
    fn stille_loest_nie_aus() {
        let mut vad = VoiceActivityDetector::new(8000, 1, VadConfig::default()).unwrap();
        for _ in 0..100 {
            assert!(!vad.detect(&[0; BLOCK]));
        }
        assert!(!vad.is_speaking());
    }

    #[test]
    fn hysterese_ein_und_aus_genau_einmal() {
        let mut vad = VoiceActivityDetector::new(8000, 1, VadConfig::default()).unwrap();
        let mut wechsel = Vec::new();

        for i in 0..40 {
            if vad.detect(&ton(16000, 1)) {
                wechsel.push((i, vad.is_speaking()));
            }
        }
        for i in 40..80 {
            if vad.detect(&[0; BLOCK]) {
                wechsel.push((i, vad.is_speaking()));
            }
        }

        assert_eq!(wechsel.len(), 2, "Wechsel: {wechsel:?}");
        assert!(wechsel[0].1, "erst Sprache");
        assert!(!wechsel[1].1, "dann Stille");
        // Zweite Entscheidung (400 Samples je Entscheidung) schaltet ein
        assert!(wechsel[0].0 < 6);
    }

    #[test]
    fn einzelner_ausreisser_schaltet_nicht() {
        let mut vad = VoiceActivityDetector::new(8000, 1, VadConfig::default()).unwrap();
        // Genau eine Entscheidung (400 Samples) mit Ton
        let mut signal = ton(16000, 1);
        signal.extend(ton(16000, 1));
        signal.extend(&ton(16000, 1)[..80]);
        assert!(!vad.detect(&signal));
        for _ in 0..20 {
            assert!(!vad.detect(&[0; BLOCK]));
        }
        assert!(!vad.is_speaking());
    }

    #[test]
    fn stereo_braucht_gleiche_dauer() {
        let mut mono = VoiceActivityDetector::new(8000, 1, VadConfig::default()).unwrap();
        let mut stereo = VoiceActivityDetector::new(8000, 2, VadConfig::default()).unwrap();
        for i in 0..10 {
            let m = mono.detect(&ton(16000, 1));
            let s = stereo.detect(&ton(16000, 2));
            assert_eq!(m, s, "Block {i}");
        }
        assert!(stereo.is_speaking());
    }

    #[test]
    fn schwelle_folgt_umgebung_nach_unten() {
        let mut vad = VoiceActivityDetector::new(8000, 1, VadConfig::default()).unwrap();
        for _ in 0..5 {
            vad.detect(&[0; BLOCK]);
        }
        assert_eq!(vad.power_threshold(), 2.0);
    }

    #[test]
    fn reset_meldet_vorherigen_zustand() {
        let mut vad = VoiceActivityDetector::new(8000, 1, VadConfig::default()).unwrap();
        for _ in 0..10 {
            vad.detect(&ton(16000, 1));
        }
        assert!(vad.is_speaking());
        assert!(vad.reset());
        assert!(!vad.is_speaking());
        assert!(!vad.reset());
        assert_eq!(vad.power_threshold(), 50.0);
    }

    #[test]
    fn ungueltige_kanaele() {
        assert!(VoiceActivityDetector::new(8000, 3, VadConfig::default()).is_err());
        assert!(VoiceActivityDetector::new(0, 1, VadConfig::default()).is_err());
    }
}
