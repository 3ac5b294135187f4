//! Adaptiver Jitter Buffer pro Call-Leg
//!
//! Ordnet eingehende RTP-Nutzlasten nach Sequenznummer. Der Buffer ist ein
//! zusammenhaengendes Fenster ab `first_sequence`; jede Position ist
//! entweder
//! - gueltig (Nutzlast angekommen),
//! - Platzhalter (gewollte Stille, `missing = false`, keine Nutzlast) oder
//! - fehlend (`missing = true`, traegt eine Kopie der letzten Nutzlast).
//!
//! Fehlende Eintraege werden bei der Entnahme an die
//! [`PacketLossConcealment`] gegeben.
//!
//! ## Eigenschaften
//! - `first_sequence` waechst nur (Wraparound-bewusst)
//! - kein Eintrag wird zweimal ausgeliefert
//! - nach jedem `insert` gilt `len <= max_size` (Ueberlauf → Reset)
//! - Fehler werden nur gezaehlt, nie an den Aufrufer gegeben
//!
//! Nicht thread-safe; der Leg haelt den Buffer hinter einem Mutex.

use crate::plc::{PacketLossConcealment, PlcKind};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use voxbridge_core::PACKET_PERIOD;
use voxbridge_protocol::seq_delta;

// ---------------------------------------------------------------------------
// Eintraege
// ---------------------------------------------------------------------------

/// Nutzlast eines Eintrags
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Lineare Samples
    Linear(Vec<i32>),
    /// μ-law-Bytes, erst bei der Wiedergabe dekodiert
    Companded(Vec<u8>),
}

/// Eintrag im Jitter Buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterEntry {
    pub sequence: u16,
    pub missing: bool,
    pub payload: Option<Payload>,
}

impl JitterEntry {
    fn platzhalter(sequence: u16) -> Self {
        Self {
            sequence,
            missing: false,
            payload: None,
        }
    }

    /// Gewollte Stille (z.B. Comfort Noise)
    pub fn is_placeholder(&self) -> bool {
        !self.missing && self.payload.is_none()
    }

    /// Angekommene Nutzlast
    pub fn is_valid(&self) -> bool {
        !self.missing && self.payload.is_some()
    }
}

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den Jitter Buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterBufferConfig {
    /// Minimale Fuellung in Paketen
    pub min_size: usize,
    /// Maximale Fuellung in Paketen; groessere Luecken setzen zurueck
    pub max_size: usize,
    /// Verdeckungsstrategie
    pub plc: PlcKind,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            min_size: 3,
            max_size: 15,
            plc: PlcKind::Duplicate,
        }
    }
}

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken des Jitter Buffers (Snapshot)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JitterBufferStatistik {
    /// Eingefuegte Stille-Platzhalter
    pub inserted_silence: u64,
    /// Platzhalter, die zur Latenzbegrenzung verworfen wurden
    pub evicted_silence: u64,
    /// Nachzuegler, die eine fehlende Position gefuellt haben
    pub out_of_order: u64,
    /// Pakete vor dem Fenster (bereits ausgeliefert)
    pub tossed_old: u64,
    /// Fehlende Eintraege, die nicht repariert werden konnten
    pub failed_to_recover: u64,
    /// Reparierte Eintraege
    pub repaired: u64,
    /// Doppelte Schreibzugriffe auf gueltige Positionen
    pub duplicates: u64,
    /// Vollstaendige Resets nach zu grosser Luecke
    pub resets: u64,
    /// Ausgelieferte Eintraege
    pub delivered: u64,
    /// Entnahmen aus leerem Buffer
    pub underflows: u64,
    /// Aktuelle Fuellung
    pub depth: usize,
    /// Geglaetteter Jitter in Millisekunden
    pub jitter_ms: f64,
}

/// Ergebnis eines `insert`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Am Ende angefuegt
    Appended,
    /// Am Ende angefuegt, davor `missing` fehlende Eintraege
    Gap { missing: usize },
    /// Platzhalter oder fehlende Position gefuellt
    Filled { was_missing: bool },
    /// Position war bereits gueltig, bestehende Nutzlast bleibt
    Duplicate,
    /// Liegt vor `first_sequence`, verworfen
    TossedOld,
    /// Luecke zu gross; Buffer neu aufgebaut
    Reset,
}

// ---------------------------------------------------------------------------
// JitterBuffer
// ---------------------------------------------------------------------------

/// Jitter Buffer eines Call-Legs
#[derive(Debug)]
pub struct JitterBuffer {
    config: JitterBufferConfig,
    eintraege: VecDeque<JitterEntry>,
    first_sequence: u16,
    /// `first_sequence` ist gueltig (mindestens ein Paket seit Start/Reset)
    verankert: bool,
    jitter_ms: f64,
    letzte_nutzlast: Option<Payload>,
    plc: PacketLossConcealment,
    statistik: JitterBufferStatistik,
}

impl JitterBuffer {
    /// Erstellt einen Buffer mit der konfigurierten Standard-Strategie
    pub fn neu(config: JitterBufferConfig) -> Self {
        Self::mit_plc(config, config.plc.into())
    }

    /// Erstellt einen Buffer mit einer eigenen Strategie
    pub fn mit_plc(config: JitterBufferConfig, plc: PacketLossConcealment) -> Self {
        let config = JitterBufferConfig {
            min_size: config.min_size.max(1),
            max_size: config.max_size.max(config.min_size.max(1) + 1),
            ..config
        };
        Self {
            config,
            eintraege: VecDeque::with_capacity(config.max_size + 1),
            first_sequence: 0,
            verankert: false,
            jitter_ms: 0.0,
            letzte_nutzlast: None,
            plc,
            statistik: JitterBufferStatistik::default(),
        }
    }

    pub fn config(&self) -> &JitterBufferConfig {
        &self.config
    }

    /// Sequenznummer des naechsten auszuliefernden Eintrags
    pub fn first_sequence(&self) -> Option<u16> {
        self.verankert.then_some(self.first_sequence)
    }

    pub fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.is_empty()
    }

    /// Geglaetteter Jitter in Millisekunden
    pub fn jitter_ms(&self) -> f64 {
        self.jitter_ms
    }

    pub fn statistik(&self) -> JitterBufferStatistik {
        JitterBufferStatistik {
            depth: self.eintraege.len(),
            jitter_ms: self.jitter_ms,
            ..self.statistik.clone()
        }
    }

    /// Fuegt eine Nutzlast ein
    ///
    /// `elapsed` ist die Zeit seit dem vorherigen Paket dieses Legs. `None`
    /// als Nutzlast legt gewollte Stille ab.
    pub fn insert(
        &mut self,
        sequence: u16,
        elapsed: Duration,
        payload: Option<Payload>,
    ) -> InsertOutcome {
        self.jitter_aktualisieren(elapsed);

        let rueckstand = -(seq_delta(sequence, self.first_sequence) as i32);
        if self.verankert && rueckstand > 0 {
            if (rueckstand as usize) < self.config.max_size {
                self.statistik.tossed_old += 1;
                tracing::trace!(
                    sequence,
                    first = self.first_sequence,
                    "Veraltetes Paket verworfen"
                );
                return InsertOutcome::TossedOld;
            }
            // Sprung weit hinter das Auslieferungsfenster: neu verankern
            self.statistik.resets += 1;
            tracing::debug!(
                sequence,
                first = self.first_sequence,
                rueckstand,
                "Sequenz springt zurueck, Jitter Buffer wird zurueckgesetzt"
            );
            self.zuruecksetzen();
            self.leer_einfuegen(sequence, payload);
            self.platzhalter_verwerfen();
            return InsertOutcome::Reset;
        }

        let ergebnis = if self.eintraege.is_empty() {
            self.leer_einfuegen(sequence, payload);
            InsertOutcome::Appended
        } else {
            let index = seq_delta(sequence, self.first_sequence) as usize;
            if index < self.eintraege.len() {
                self.position_fuellen(index, payload)
            } else if index >= self.config.max_size {
                self.statistik.resets += 1;
                tracing::debug!(
                    sequence,
                    first = self.first_sequence,
                    luecke = index - self.eintraege.len(),
                    "Luecke zu gross, Jitter Buffer wird zurueckgesetzt"
                );
                self.zuruecksetzen();
                self.leer_einfuegen(sequence, payload);
                InsertOutcome::Reset
            } else {
                self.anhaengen(index, payload)
            }
        };

        self.platzhalter_verwerfen();
        ergebnis
    }

    /// Entnimmt den aeltesten Eintrag
    ///
    /// Fehlende Eintraege laufen durch die Verdeckung; ist sie erfolglos,
    /// wird der Eintrag als fehlend ohne Nutzlast geliefert. `None` bei
    /// leerem Buffer.
    pub fn take_first(&mut self) -> Option<JitterEntry> {
        let Some(eintrag) = self.eintraege.pop_front() else {
            self.statistik.underflows += 1;
            return None;
        };
        self.first_sequence = self.first_sequence.wrapping_add(1);
        self.statistik.delivered += 1;

        if !eintrag.missing {
            if eintrag.payload.is_some() {
                self.plc.add_packet(&eintrag);
            }
            return Some(eintrag);
        }

        let sequence = eintrag.sequence;
        match self.plc.repair(eintrag) {
            Some(repariert) => {
                self.statistik.repaired += 1;
                // Ein Ergebnis fuer den Rest dieser Luecke, spaetere Luecken
                // behalten ihre eigene Nutzlast
                for spaeter in self.eintraege.iter_mut().take_while(|e| e.missing) {
                    spaeter.payload = repariert.payload.clone();
                }
                Some(repariert)
            }
            None => {
                self.statistik.failed_to_recover += 1;
                tracing::trace!(sequence, "Verlust nicht verdeckt");
                Some(JitterEntry {
                    sequence,
                    missing: true,
                    payload: None,
                })
            }
        }
    }

    /// Entnimmt alle Eintraege in Reihenfolge
    pub fn flush(&mut self) -> Vec<JitterEntry> {
        let mut alle = Vec::with_capacity(self.eintraege.len());
        while !self.eintraege.is_empty() {
            if let Some(eintrag) = self.take_first() {
                alle.push(eintrag);
            }
        }
        alle
    }

    /// Leert den Buffer und setzt die Verdeckung zurueck
    pub fn reset(&mut self) {
        self.zuruecksetzen();
    }

    // -----------------------------------------------------------------------
    // Interna
    // -----------------------------------------------------------------------

    /// Schnell steigend, langsam fallend
    fn jitter_aktualisieren(&mut self, elapsed: Duration) {
        let beobachtet = elapsed.as_secs_f64() * 1000.0;
        if beobachtet <= self.jitter_ms {
            self.jitter_ms -= (self.jitter_ms - beobachtet) / 4.0;
        } else {
            self.jitter_ms = beobachtet;
        }
    }

    /// Zielfuellung beim Neuaufbau in Paketen
    fn ziel_fuellung(&self) -> usize {
        let perioden = (self.jitter_ms / PACKET_PERIOD.as_millis() as f64).ceil() as usize;
        let obergrenze = (self.config.max_size / 2).max(self.config.min_size);
        perioden.clamp(self.config.min_size, obergrenze)
    }

    fn leer_einfuegen(&mut self, sequence: u16, payload: Option<Payload>) {
        let mut anker = sequence.wrapping_sub(self.ziel_fuellung() as u16);
        if self.verankert && seq_delta(anker, self.first_sequence) < 0 {
            anker = self.first_sequence;
        }
        self.first_sequence = anker;
        self.verankert = true;

        let platzhalter = seq_delta(sequence, anker) as u16;
        for i in 0..platzhalter {
            self.eintraege
                .push_back(JitterEntry::platzhalter(anker.wrapping_add(i)));
        }
        self.statistik.inserted_silence += platzhalter as u64;
        self.merken(&payload);
        self.eintraege.push_back(JitterEntry {
            sequence,
            missing: false,
            payload,
        });
    }

    fn position_fuellen(&mut self, index: usize, payload: Option<Payload>) -> InsertOutcome {
        let Some(eintrag) = self.eintraege.get_mut(index) else {
            return InsertOutcome::Duplicate;
        };
        if eintrag.is_valid() {
            self.statistik.duplicates += 1;
            tracing::debug!(sequence = eintrag.sequence, "Doppeltes Paket, bestehende Nutzlast bleibt");
            return InsertOutcome::Duplicate;
        }

        let was_missing = eintrag.missing;
        eintrag.missing = false;
        eintrag.payload = payload;
        if was_missing {
            self.statistik.out_of_order += 1;
        }
        InsertOutcome::Filled { was_missing }
    }

    fn anhaengen(&mut self, index: usize, payload: Option<Payload>) -> InsertOutcome {
        let luecke = index - self.eintraege.len();
        for _ in 0..luecke {
            let sequence = self.first_sequence.wrapping_add(self.eintraege.len() as u16);
            self.eintraege.push_back(JitterEntry {
                sequence,
                missing: true,
                payload: self.letzte_nutzlast.clone(),
            });
        }
        self.merken(&payload);
        self.eintraege.push_back(JitterEntry {
            sequence: self.first_sequence.wrapping_add(index as u16),
            missing: false,
            payload,
        });
        if luecke == 0 {
            InsertOutcome::Appended
        } else {
            InsertOutcome::Gap { missing: luecke }
        }
    }

    /// Haelt die Latenz klein: ein Platzhalter an der Spitze wird verworfen,
    /// sobald mehr als `min_size` Eintraege vorliegen
    fn platzhalter_verwerfen(&mut self) {
        let spitze_ist_platzhalter = self
            .eintraege
            .front()
            .map(JitterEntry::is_placeholder)
            .unwrap_or(false);
        if self.eintraege.len() > self.config.min_size && spitze_ist_platzhalter {
            self.eintraege.pop_front();
            self.first_sequence = self.first_sequence.wrapping_add(1);
            self.statistik.evicted_silence += 1;
        }
    }

    fn merken(&mut self, payload: &Option<Payload>) {
        if payload.is_some() {
            self.letzte_nutzlast = payload.clone();
        }
    }

    fn zuruecksetzen(&mut self) {
        self.eintraege.clear();
        self.letzte_nutzlast = None;
        self.verankert = false;
        self.plc.reset();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
