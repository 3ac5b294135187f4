//! Tiefpassfilter fuer das Resampling
//!
//! Zwei Algorithmen, beide auf interleavten 16-Bit-Samples mit 1 oder 2
//! Kanaelen (Kanaele werden unabhaengig gefiltert):
//!
//! - **Gleitender Mittelwert** ueber die letzten N Samples eines Kanals
//!   (N in 2..=50, Standard 3). Der Pegelverlust wird mit
//!   `1 + adjustment * N` ausgeglichen. Zwischen zwei Aufrufen werden
//!   `(N - 1) * kanaele` Samples mitgefuehrt.
//! - **Einpoliges IIR**: `out[n] = a0 * in[n] + b1 * out[n - kanaele]` mit
//!   `a0 = 1 - exp(-2π·cutoff)` und `b1 = exp(-2π·cutoff)`. `cutoff` ist
//!   die Grenzfrequenz relativ zur Abtastrate (0 < cutoff <= 0.5).
//!
//! Ausgaben werden auf den 16-Bit-Bereich begrenzt.

use super::AudioProcessor;
use crate::companding::clip;
use crate::error::{AudioError, AudioResult};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Kleinste erlaubte Ordnung des Mittelwertfilters
pub const MIN_ORDER: usize = 2;

/// Groesste erlaubte Ordnung des Mittelwertfilters
pub const MAX_ORDER: usize = 50;

/// Standard-Ordnung des Mittelwertfilters
pub const DEFAULT_ORDER: usize = 3;

/// Standard-Pegelausgleich pro Filterordnung
pub const DEFAULT_ADJUSTMENT: f64 = 0.05;

/// Filteralgorithmus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithmus", rename_all = "snake_case")]
pub enum FilterKind {
    /// Gleitender Mittelwert mit Pegelausgleich
    MovingAverage { order: usize, adjustment: f64 },
    /// Einpoliger IIR-Tiefpass
    SinglePole { cutoff: f64 },
}

impl Default for FilterKind {
    fn default() -> Self {
        Self::MovingAverage {
            order: DEFAULT_ORDER,
            adjustment: DEFAULT_ADJUSTMENT,
        }
    }
}

#[derive(Debug, Clone)]
enum Zustand {
    Mittelwert {
        order: usize,
        lautstaerke: f64,
        /// Letzte `(order - 1) * kanaele` Eingangssamples
        historie: Vec<i32>,
    },
    Iir {
        a0: f64,
        b1: f64,
        /// Letzte Ausgabe pro Kanal
        letzte: [f64; 2],
    },
}

/// Tiefpassfilter mit Zustand ueber Aufrufgrenzen hinweg
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    kind: FilterKind,
    channels: usize,
    zustand: Zustand,
}

impl LowPassFilter {
    /// Erstellt einen Filter; prueft Kanalanzahl und Filterparameter
    pub fn new(kind: FilterKind, channels: u8) -> AudioResult<Self> {
        if !(1..=2).contains(&channels) {
            return Err(AudioError::InvalidFormat(format!(
                "Tiefpass: {channels} Kanaele (erlaubt 1 oder 2)"
            )));
        }
        let channels = channels as usize;

        let zustand = match kind {
            FilterKind::MovingAverage { order, adjustment } => {
                if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
                    return Err(AudioError::InvalidFormat(format!(
                        "Tiefpass: Ordnung {order} ausserhalb {MIN_ORDER}..={MAX_ORDER}"
                    )));
                }
                if !adjustment.is_finite() || adjustment < 0.0 {
                    return Err(AudioError::InvalidFormat(format!(
                        "Tiefpass: ungueltiger Pegelausgleich {adjustment}"
                    )));
                }
                Zustand::Mittelwert {
                    order,
                    lautstaerke: 1.0 + adjustment * order as f64,
                    historie: vec![0; (order - 1) * channels],
                }
            }
            FilterKind::SinglePole { cutoff } => {
                if !(cutoff > 0.0 && cutoff <= 0.5) {
                    return Err(AudioError::InvalidFormat(format!(
                        "Tiefpass: Grenzfrequenz {cutoff} ausserhalb (0, 0.5]"
                    )));
                }
                let b1 = (-2.0 * PI * cutoff).exp();
                Zustand::Iir {
                    a0: 1.0 - b1,
                    b1,
                    letzte: [0.0; 2],
                }
            }
        };

        Ok(Self {
            kind,
            channels,
            zustand,
        })
    }

    /// Gleitender Mittelwert mit Standard-Pegelausgleich
    pub fn moving_average(channels: u8, order: usize) -> AudioResult<Self> {
        Self::new(
            FilterKind::MovingAverage {
                order,
                adjustment: DEFAULT_ADJUSTMENT,
            },
            channels,
        )
    }

    /// Einpoliger IIR-Tiefpass
    pub fn single_pole(channels: u8, cutoff: f64) -> AudioResult<Self> {
        Self::new(FilterKind::SinglePole { cutoff }, channels)
    }

    /// Konfigurierter Algorithmus
    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Kanalanzahl
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Filtert `input` in einen neuen Puffer
    pub fn filter(&mut self, input: &[i32]) -> Vec<i32> {
        let mut out = input.to_vec();
        self.process(&mut out);
        out
    }
}

impl AudioProcessor for LowPassFilter {
    fn process(&mut self, samples: &mut [i32]) {
        let kanaele = self.channels;
        match &mut self.zustand {
            Zustand::Mittelwert {
                order,
                lautstaerke,
                historie,
            } => {
                let carry = historie.len();
                let mut erweitert = Vec::with_capacity(carry + samples.len());
                erweitert.extend_from_slice(historie);
                erweitert.extend_from_slice(samples);

                for (i, ausgabe) in samples.iter_mut().enumerate() {
                    let summe: i64 = (0..*order)
                        .map(|k| erweitert[carry + i - k * kanaele] as i64)
                        .sum();
                    let mittel = summe as f64 / *order as f64 * *lautstaerke;
                    *ausgabe = clip(mittel.round() as i32) as i32;
                }

                let rest = erweitert.len() - carry;
                historie.copy_from_slice(&erweitert[rest..]);
            }
            Zustand::Iir { a0, b1, letzte } => {
                for (i, sample) in samples.iter_mut().enumerate() {
                    let kanal = i % kanaele;
                    let y = *a0 * *sample as f64 + *b1 * letzte[kanal];
                    letzte[kanal] = y;
                    *sample = clip(y.round() as i32) as i32;
                }
            }
        }
    }

    fn reset(&mut self) {
        match &mut self.zustand {
            Zustand::Mittelwert { historie, .. } => historie.iter_mut().for_each(|s| *s = 0),
            Zustand::Iir { letzte, .. } => *letzte = [0.0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wechselt jedes Sample das Vorzeichen (Nyquist-Frequenz)
    fn nyquist(amplitude: i32, n: usize) -> Vec<i32> {
        (0..n)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    #[test]
    fn mittelwert_gleichanteil_mit_pegelausgleich() {
        let mut lpf = LowPassFilter::moving_average(1, 3).unwrap();
        let out = lpf.filter(&[1000; 160]);
        // Nach dem Einschwingen: 1000 * (1 + 0.05 * 3)
        assert!(out[2..].iter().all(|s| *s == 1150));
        // Einschwingen mit Null-Historie
        assert_eq!(out[0], (1000.0_f64 / 3.0 * 1.15).round() as i32);
    }

    #[test]
    fn mittelwert_daempft_nyquist() {
        let mut lpf = LowPassFilter::moving_average(1, 2).unwrap();
        let out = lpf.filter(&nyquist(10_000, 160));
        assert!(out[1..].iter().all(|s| *s == 0), "Nyquist muss ausloeschen");
    }

    #[test]
    fn mittelwert_historie_ueber_aufrufe() {
        let signal: Vec<i32> = (0..320).map(|i| ((i * 37) % 2000) - 1000).collect();

        let mut am_stueck = LowPassFilter::moving_average(2, 5).unwrap();
        let erwartet = am_stueck.filter(&signal);

        let mut geteilt = LowPassFilter::moving_average(2, 5).unwrap();
        let mut ergebnis = geteilt.filter(&signal[..100]);
        ergebnis.extend(geteilt.filter(&signal[100..]));

        assert_eq!(ergebnis, erwartet);
    }

    #[test]
    fn stereo_kanaele_unabhaengig() {
        let mut lpf = LowPassFilter::moving_average(2, 4).unwrap();
        // links Gleichanteil, rechts Stille
        let signal: Vec<i32> = (0..320).map(|i| if i % 2 == 0 { 2000 } else { 0 }).collect();
        let out = lpf.filter(&signal);
        assert!(out.iter().skip(1).step_by(2).all(|s| *s == 0));
        assert!(out.iter().step_by(2).skip(3).all(|s| *s == 2400));
    }

    #[test]
    fn ausgabe_wird_begrenzt() {
        let mut lpf = LowPassFilter::moving_average(1, 10).unwrap();
        let out = lpf.filter(&[32767; 50]);
        assert_eq!(*out.last().unwrap(), 32767);
        let out = lpf.filter(&[-32768; 50]);
        assert_eq!(*out.last().unwrap(), -32768);
    }

    #[test]
    fn iir_koeffizienten_und_gleichanteil() {
        let mut lpf = LowPassFilter::single_pole(1, 0.25).unwrap();
        let b1 = (-2.0 * PI * 0.25).exp();
        let out = lpf.filter(&[10_000; 400]);
        assert_eq!(out[0], ((1.0 - b1) * 10_000.0).round() as i32);
        assert_eq!(*out.last().unwrap(), 10_000, "DC-Verstaerkung 1");
    }

    #[test]
    fn iir_daempft_nyquist() {
        let mut lpf = LowPassFilter::single_pole(1, 0.05).unwrap();
        let out = lpf.filter(&nyquist(10_000, 400));
        let spitze = out[200..].iter().map(|s| s.abs()).max().unwrap();
        assert!(spitze < 2_000, "Spitze {spitze} nicht gedaempft");
    }

    #[test]
    fn reset_loescht_historie() {
        let mut lpf = LowPassFilter::moving_average(1, 3).unwrap();
        lpf.filter(&[5000; 10]);
        lpf.reset();
        let out = lpf.filter(&[0; 3]);
        assert_eq!(out, vec![0, 0, 0]);
    }

    #[test]
    fn ungueltige_parameter() {
        assert!(matches!(
            LowPassFilter::moving_average(3, 3),
            Err(AudioError::InvalidFormat(_))
        ));
        assert!(LowPassFilter::moving_average(1, 1).is_err());
        assert!(LowPassFilter::moving_average(1, 51).is_err());
        assert!(LowPassFilter::single_pole(1, 0.0).is_err());
        assert!(LowPassFilter::single_pole(1, 0.6).is_err());
        assert!(LowPassFilter::moving_average(2, 50).is_ok());
    }
}
