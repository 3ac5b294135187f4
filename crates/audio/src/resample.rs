//! Abtastraten- und Kanalwandlung
//!
//! Ablauf pro Aufruf:
//! 1. Kanal-Remix (mehr Eingangs- als Ausgangskanaele: nur der erste Kanal,
//!    weniger: Kanal wird dupliziert)
//! 2. Lineare Interpolation im Verhaeltnis `in_rate / out_rate`
//! 3. Tiefpass gegen Aliasing: vor der Dezimierung bzw. nach der Interpolation
//!
//! Gleiche Rate und gleiche Kanalanzahl liefern die Eingabe unveraendert
//! zurueck (ohne Kopie).

use crate::dsp::lowpass::{FilterKind, LowPassFilter};
use crate::dsp::AudioProcessor;
use crate::error::{AudioError, AudioResult};
use std::borrow::Cow;
use std::time::Instant;
use voxbridge_core::MediaFormat;

/// Laufzeitstatistik eines Konverters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResampleStats {
    pub calls: u64,
    pub avg_nanos: u64,
}

/// Konverter zwischen zwei Abtastraten/Kanalanzahlen
#[derive(Debug, Clone)]
pub struct SampleRateConverter {
    in_rate: u32,
    in_channels: usize,
    out_rate: u32,
    out_channels: usize,
    /// `in_rate / out_rate`
    schritt: f64,
    filter: LowPassFilter,
    /// Letzter Frame des vorherigen Aufrufs (nur Upsampling)
    vorheriger: Option<Vec<i32>>,
    aufrufe: u64,
    nanos_gesamt: u128,
}

impl SampleRateConverter {
    /// Konverter mit Standard-Tiefpass (gleitender Mittelwert, Ordnung 3)
    pub fn new(in_rate: u32, in_channels: u8, out_rate: u32, out_channels: u8) -> AudioResult<Self> {
        Self::with_filter(
            in_rate,
            in_channels,
            out_rate,
            out_channels,
            FilterKind::default(),
        )
    }

    pub fn with_filter(
        in_rate: u32,
        in_channels: u8,
        out_rate: u32,
        out_channels: u8,
        filter: FilterKind,
    ) -> AudioResult<Self> {
        if in_rate == 0 || out_rate == 0 {
            return Err(AudioError::InvalidFormat(format!(
                "Resampler: ungueltige Abtastrate {in_rate} -> {out_rate}"
            )));
        }
        for kanaele in [in_channels, out_channels] {
            if !(1..=2).contains(&kanaele) {
                return Err(AudioError::InvalidFormat(format!(
                    "Resampler: {kanaele} Kanaele (erlaubt 1 oder 2)"
                )));
            }
        }

        tracing::debug!(
            in_rate,
            in_channels,
            out_rate,
            out_channels,
            "Resampler erstellt"
        );

        Ok(Self {
            in_rate,
            in_channels: in_channels as usize,
            out_rate,
            out_channels: out_channels as usize,
            schritt: in_rate as f64 / out_rate as f64,
            filter: LowPassFilter::new(filter, out_channels)?,
            vorheriger: None,
            aufrufe: 0,
            nanos_gesamt: 0,
        })
    }

    /// Konverter zwischen zwei ausgehandelten Medienformaten
    pub fn between(von: &MediaFormat, nach: &MediaFormat, filter: FilterKind) -> AudioResult<Self> {
        Self::with_filter(
            von.sample_rate,
            von.channels,
            nach.sample_rate,
            nach.channels,
            filter,
        )
    }

    /// `true` wenn Rate und Kanalanzahl uebereinstimmen
    pub fn is_passthrough(&self) -> bool {
        self.in_rate == self.out_rate && self.in_channels == self.out_channels
    }

    pub fn stats(&self) -> ResampleStats {
        ResampleStats {
            calls: self.aufrufe,
            avg_nanos: if self.aufrufe == 0 {
                0
            } else {
                (self.nanos_gesamt / self.aufrufe as u128) as u64
            },
        }
    }

    /// Verwirft Filterhistorie und den mitgefuehrten Frame
    pub fn reset(&mut self) {
        self.filter.reset();
        self.vorheriger = None;
    }

    /// Wandelt einen Block interleavter Samples
    ///
    /// Liefert `round(frames * out_rate / in_rate)` Frames. Ein
    /// unvollstaendiger letzter Frame wird ignoriert.
    pub fn resample<'a>(&mut self, input: &'a [i32]) -> Cow<'a, [i32]> {
        if self.is_passthrough() {
            return Cow::Borrowed(input);
        }

        let start = Instant::now();
        let remixed = self.remix(input);
        let out = if self.in_rate == self.out_rate {
            remixed
        } else if self.in_rate > self.out_rate {
            self.runter(remixed)
        } else {
            self.hoch(&remixed)
        };

        self.aufrufe += 1;
        self.nanos_gesamt += start.elapsed().as_nanos();
        Cow::Owned(out)
    }

    fn remix(&self, input: &[i32]) -> Vec<i32> {
        if self.in_channels == self.out_channels {
            let frames = input.len() / self.in_channels;
            return input[..frames * self.in_channels].to_vec();
        }
        input
            .chunks_exact(self.in_channels)
            .flat_map(|frame| std::iter::repeat(frame[0]).take(self.out_channels))
            .collect()
    }

    fn ausgabe_frames(&self, eingabe_frames: usize) -> usize {
        (eingabe_frames as f64 * self.out_rate as f64 / self.in_rate as f64).round() as usize
    }

    /// Downsampling: erst filtern, dann interpolieren
    fn runter(&mut self, mut samples: Vec<i32>) -> Vec<i32> {
        let kanaele = self.out_channels;
        let frames = samples.len() / kanaele;
        if frames == 0 {
            return Vec::new();
        }
        self.filter.process(&mut samples);

        let ziel = self.ausgabe_frames(frames);
        let mut out = Vec::with_capacity(ziel * kanaele);
        for k in 0..ziel {
            let pos = k as f64 * self.schritt;
            let i = (pos.floor() as usize).min(frames - 1);
            let j = (i + 1).min(frames - 1);
            let frac = pos - i as f64;
            for c in 0..kanaele {
                out.push(interpolieren(samples[i * kanaele + c], samples[j * kanaele + c], frac));
            }
        }
        out
    }

    /// Upsampling: interpolieren mit dem letzten Frame des Vorgaengers als
    /// Stuetzstelle vor dem ersten Sample, dann filtern
    fn hoch(&mut self, samples: &[i32]) -> Vec<i32> {
        let kanaele = self.out_channels;
        let frames = samples.len() / kanaele;
        if frames == 0 {
            return Vec::new();
        }
        let vorheriger = self
            .vorheriger
            .take()
            .unwrap_or_else(|| samples[..kanaele].to_vec());

        let wert = |index: isize, c: usize| -> i32 {
            if index < 0 {
                vorheriger[c]
            } else {
                samples[(index as usize).min(frames - 1) * kanaele + c]
            }
        };

        let ziel = self.ausgabe_frames(frames);
        let mut out = Vec::with_capacity(ziel * kanaele);
        for k in 0..ziel {
            let pos = (k + 1) as f64 * self.schritt - 1.0;
            let i = pos.floor();
            let frac = pos - i;
            let i = i as isize;
            for c in 0..kanaele {
                out.push(interpolieren(wert(i, c), wert(i + 1, c), frac));
            }
        }

        self.vorheriger = Some(samples[(frames - 1) * kanaele..frames * kanaele].to_vec());
        self.filter.process(&mut out);
        out
    }
}

#[inline]
fn interpolieren(a: i32, b: i32, frac: f64) -> i32 {
    (a as f64 + (b - a) as f64 * frac).round() as i32
}
