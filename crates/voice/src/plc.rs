//! Packet Loss Concealment (PLC)
//!
//! Wird vom Jitter Buffer fuer jeden fehlenden Eintrag aufgerufen, der an der
//! Spitze des Buffers ankommt.
//!
//! ## Strategien
//! 1. **Compress**: liefert keine Daten, der Verlust verkuerzt die Ausgabe.
//! 2. **Duplicate**: gibt die beim Auffuellen der Luecke kopierte letzte
//!    Nutzlast aus, als waere das Paket angekommen.
//! 3. **Custom**: eigene Strategie hinter dem [`Concealer`]-Trait.

use crate::jitter_buffer::JitterEntry;
use serde::{Deserialize, Serialize};

/// Erweiterungspunkt fuer eigene Verdeckungsstrategien
pub trait Concealer: Send {
    /// Versucht einen fehlenden Eintrag zu reparieren
    fn repair(&mut self, entry: JitterEntry) -> Option<JitterEntry>;

    /// Verwirft internen Zustand (Buffer wurde geleert)
    fn reset(&mut self) {}

    /// Sieht jeden gueltig ausgelieferten Eintrag
    fn add_packet(&mut self, _entry: &JitterEntry) {}
}

/// Konfigurierbare Strategie (Auswahl beim Start)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlcKind {
    Compress,
    #[default]
    Duplicate,
}

/// Aktive Verdeckungsstrategie eines Jitter Buffers
pub enum PacketLossConcealment {
    Compress,
    Duplicate,
    Custom(Box<dyn Concealer>),
}

impl std::fmt::Debug for PacketLossConcealment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compress => f.write_str("Compress"),
            Self::Duplicate => f.write_str("Duplicate"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl From<PlcKind> for PacketLossConcealment {
    fn from(kind: PlcKind) -> Self {
        match kind {
            PlcKind::Compress => Self::Compress,
            PlcKind::Duplicate => Self::Duplicate,
        }
    }
}

impl PacketLossConcealment {
    /// Repariert einen fehlenden Eintrag
    ///
    /// `None` bedeutet: keine Daten, der Aufrufer ueberspringt den Eintrag.
    pub fn repair(&mut self, entry: JitterEntry) -> Option<JitterEntry> {
        match self {
            Self::Compress => None,
            Self::Duplicate => entry.payload.map(|payload| JitterEntry {
                sequence: entry.sequence,
                missing: false,
                payload: Some(payload),
            }),
            Self::Custom(concealer) => concealer.repair(entry),
        }
    }

    pub fn reset(&mut self) {
        if let Self::Custom(concealer) = self {
            concealer.reset();
        }
    }

    pub fn add_packet(&mut self, entry: &JitterEntry) {
        if let Self::Custom(concealer) = self {
            concealer.add_packet(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter_buffer::Payload;

    fn fehlend(seq: u16, payload: Option<Payload>) -> JitterEntry {
        JitterEntry {
            sequence: seq,
            missing: true,
            payload,
        }
    }

    #[test]
    fn compress_liefert_nichts() {
        let mut plc = PacketLossConcealment::from(PlcKind::Compress);
        let eintrag = fehlend(7, Some(Payload::Companded(vec![0x55; 160])));
        assert!(plc.repair(eintrag).is_none());
    }

    #[test]
    fn duplicate_wiederholt_geerbte_nutzlast() {
        let mut plc = PacketLossConcealment::from(PlcKind::Duplicate);
        let repariert = plc
            .repair(fehlend(7, Some(Payload::Linear(vec![42; 160]))))
            .unwrap();
        assert_eq!(repariert.sequence, 7);
        assert!(!repariert.missing);
        assert_eq!(repariert.payload, Some(Payload::Linear(vec![42; 160])));
    }

    #[test]
    fn duplicate_ohne_vorgaenger_scheitert() {
        let mut plc = PacketLossConcealment::Duplicate;
        assert!(plc.repair(fehlend(1, None)).is_none());
    }

    struct Zaehler {
        gesehen: usize,
        resets: usize,
    }

    impl Concealer for Zaehler {
        fn repair(&mut self, mut entry: JitterEntry) -> Option<JitterEntry> {
            entry.missing = false;
            entry.payload = Some(Payload::Linear(vec![self.gesehen as i32; 4]));
            Some(entry)
        }

        fn reset(&mut self) {
            self.resets += 1;
        }

        fn add_packet(&mut self, _entry: &JitterEntry) {
            self.gesehen += 1;
        }
    }

    #[test]
    fn eigene_strategie_sieht_pakete() {
        let mut plc = PacketLossConcealment::Custom(Box::new(Zaehler {
            gesehen: 0,
            resets: 0,
        }));
        let gueltig = JitterEntry {
            sequence: 1,
            missing: false,
            payload: Some(Payload::Linear(vec![1; 4])),
        };
        plc.add_packet(&gueltig);
        plc.add_packet(&gueltig);
        plc.reset();
        let repariert = plc.repair(fehlend(3, None)).unwrap();
        assert_eq!(repariert.payload, Some(Payload::Linear(vec![2; 4])));
    }

    #[test]
    fn plc_kind_aus_toml_namen() {
        #[derive(Deserialize)]
        struct Wrapper {
            plc: PlcKind,
        }
        let w: Wrapper = toml::from_str("plc = \"compress\"").unwrap();
        assert_eq!(w.plc, PlcKind::Compress);
        assert_eq!(PlcKind::default(), PlcKind::Duplicate);
    }
}
