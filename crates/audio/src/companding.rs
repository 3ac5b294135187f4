//! G.711 μ-law Companding und 16-Bit-Konvertierung
//!
//! Die Tabellen werden beim ersten Zugriff einmalig erzeugt und sind danach
//! unveraenderlich (prozessweit geteilt, keine Synchronisation im Hot Path).
//!
//! ## Tabellen
//! - Exponent: 256 Eintraege, Index `(sample >> 7) & 0xFF`
//! - μ-law → linear: 256 Eintraege
//! - linear → μ-law: 65536 Eintraege, Index `sample as u16`
//!
//! Lineare Sample-Arrays sind `i32`; jeder Weg zurueck nach 16 Bit laeuft
//! ueber [`clip`].

use crate::error::{AudioError, AudioResult};
use bytes::{Buf, BufMut};
use std::sync::OnceLock;

/// Bias des G.711-Encoders
pub const BIAS: i32 = 0x84;

/// Groesster kodierbarer Betrag
pub const CLIP: i32 = 32635;

/// μ-law-Byte fuer digitale Stille
pub const ULAW_SILENCE: u8 = 0xFF;

struct Tabellen {
    ulaw_zu_linear: [i16; 256],
    linear_zu_ulaw: Box<[u8]>,
}

fn tabellen() -> &'static Tabellen {
    static TABELLEN: OnceLock<Tabellen> = OnceLock::new();
    TABELLEN.get_or_init(|| {
        let mut exponent = [0u8; 256];
        for (i, e) in exponent.iter_mut().enumerate() {
            *e = (8 - (i as u8).leading_zeros() as u8).saturating_sub(1);
        }

        let mut ulaw_zu_linear = [0i16; 256];
        for (byte, wert) in ulaw_zu_linear.iter_mut().enumerate() {
            *wert = dekodieren(byte as u8);
        }

        let linear_zu_ulaw = (0..=u16::MAX)
            .map(|roh| kodieren(roh as i16, &exponent))
            .collect::<Vec<u8>>()
            .into_boxed_slice();

        tracing::debug!("G.711 μ-law Tabellen erzeugt");
        Tabellen {
            ulaw_zu_linear,
            linear_zu_ulaw,
        }
    })
}

fn kodieren(sample: i16, exponent_tabelle: &[u8; 256]) -> u8 {
    let mut s = sample as i32;
    let vorzeichen = ((s >> 8) & 0x80) as u8;
    if vorzeichen != 0 {
        s = -s;
    }
    s = s.min(CLIP) + BIAS;
    let exponent = exponent_tabelle[((s >> 7) & 0xFF) as usize];
    let mantisse = ((s >> (exponent + 3)) & 0x0F) as u8;
    let byte = !(vorzeichen | exponent << 4 | mantisse);
    // CCITT Zero-Trap
    if byte == 0 {
        0x02
    } else {
        byte
    }
}

fn dekodieren(ulaw: u8) -> i16 {
    let u = !ulaw;
    let exponent = (u >> 4) & 0x07;
    let mantisse = (u & 0x0F) as i32;
    let betrag = (((mantisse << 3) + BIAS) << exponent) - BIAS;
    if u & 0x80 != 0 {
        -betrag as i16
    } else {
        betrag as i16
    }
}

/// Begrenzt einen Wert auf den 16-Bit-Bereich
#[inline]
pub fn clip(wert: i32) -> i16 {
    wert.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// μ-law-Byte → lineares Sample
#[inline]
pub fn ulaw_to_linear(ulaw: u8) -> i16 {
    tabellen().ulaw_zu_linear[ulaw as usize]
}

/// Lineares Sample → μ-law-Byte
#[inline]
pub fn linear_to_ulaw(sample: i16) -> u8 {
    tabellen().linear_zu_ulaw[sample as u16 as usize]
}

fn pruefe_platz(benoetigt: usize, vorhanden: usize) -> AudioResult<()> {
    if vorhanden < benoetigt {
        return Err(AudioError::BufferTooSmall {
            benoetigt,
            vorhanden,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// μ-law Batch-Konvertierung
// ---------------------------------------------------------------------------

/// Dekodiert μ-law-Bytes in ein neues lineares Array
pub fn ulaw_bytes_to_linear(src: &[u8]) -> Vec<i32> {
    src.iter().map(|b| ulaw_to_linear(*b) as i32).collect()
}

/// Dekodiert `dst.len()` μ-law-Bytes ab `offset` aus `src`
pub fn ulaw_bytes_to_linear_into(src: &[u8], offset: usize, dst: &mut [i32]) -> AudioResult<()> {
    pruefe_platz(offset + dst.len(), src.len())?;
    for (ziel, byte) in dst.iter_mut().zip(&src[offset..]) {
        *ziel = ulaw_to_linear(*byte) as i32;
    }
    Ok(())
}

/// Kodiert lineare Samples in neue μ-law-Bytes
pub fn linear_to_ulaw_bytes(src: &[i32]) -> Vec<u8> {
    src.iter().map(|s| linear_to_ulaw(clip(*s))).collect()
}

/// Kodiert lineare Samples als μ-law in `dst` ab `offset`
pub fn linear_to_ulaw_bytes_into(src: &[i32], dst: &mut [u8], offset: usize) -> AudioResult<()> {
    pruefe_platz(offset + src.len(), dst.len())?;
    for (ziel, sample) in dst[offset..].iter_mut().zip(src) {
        *ziel = linear_to_ulaw(clip(*sample));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 16-Bit big-endian Konvertierung
// ---------------------------------------------------------------------------

/// Liest 16-Bit big-endian Samples in ein neues lineares Array
///
/// Ein ueberzaehliges letztes Byte wird ignoriert.
pub fn be_bytes_to_linear(src: &[u8]) -> Vec<i32> {
    let mut cursor = src;
    let mut out = Vec::with_capacity(src.len() / 2);
    while cursor.remaining() >= 2 {
        out.push(cursor.get_i16() as i32);
    }
    out
}

/// Liest `dst.len()` 16-Bit big-endian Samples ab `offset` aus `src`
pub fn be_bytes_to_linear_into(src: &[u8], offset: usize, dst: &mut [i32]) -> AudioResult<()> {
    pruefe_platz(offset + 2 * dst.len(), src.len())?;
    let mut cursor = &src[offset..];
    for ziel in dst.iter_mut() {
        *ziel = cursor.get_i16() as i32;
    }
    Ok(())
}

/// Schreibt lineare Samples als 16-Bit big-endian in einen neuen Puffer
pub fn linear_to_be_bytes(src: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() * 2);
    for sample in src {
        out.put_i16(clip(*sample));
    }
    out
}

/// Schreibt lineare Samples als 16-Bit big-endian in `dst` ab `offset`
pub fn linear_to_be_bytes_into(src: &[i32], dst: &mut [u8], offset: usize) -> AudioResult<()> {
    pruefe_platz(offset + 2 * src.len(), dst.len())?;
    let mut ziel = &mut dst[offset..];
    for sample in src {
        ziel.put_i16(clip(*sample));
    }
    Ok(())
}
