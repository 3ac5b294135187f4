//! Empfangsstatistik einer RTP-Quelle (RFC 3550 Anhang A.1, A.3, A.8)
//!
//! Fuehrt die erweiterte hoechste Sequenznummer, Verlustzaehler und den
//! Interarrival-Jitter und erzeugt daraus Report-Bloecke fuer RR/SR.

use crate::rtcp::{ntp_middle_32, ReportBlock, SenderReport};
use crate::rtp::seq_delta;
use std::time::{Duration, Instant};

/// Empfangsstatistik pro Quelle
#[derive(Debug, Clone)]
pub struct ReceptionStats {
    ssrc: u32,
    clock_rate: u32,
    base_seq: u16,
    max_seq: u16,
    cycles: u32,
    received: u32,
    expected_prior: u32,
    received_prior: u32,
    /// Letzte Transitzeit in Zeitstempel-Einheiten
    transit: Option<i64>,
    /// Jitter in Zeitstempel-Einheiten
    jitter: f64,
    last_sr: u32,
    last_sr_at: Option<Instant>,
    initialisiert: bool,
}

impl ReceptionStats {
    /// Erstellt eine leere Statistik fuer die gegebene Abtastrate
    pub fn new(clock_rate: u32) -> Self {
        Self {
            ssrc: 0,
            clock_rate: clock_rate.max(1),
            base_seq: 0,
            max_seq: 0,
            cycles: 0,
            received: 0,
            expected_prior: 0,
            received_prior: 0,
            transit: None,
            jitter: 0.0,
            last_sr: 0,
            last_sr_at: None,
            initialisiert: false,
        }
    }

    /// Verbucht ein empfangenes Paket
    ///
    /// `ankunft` ist die Ankunftszeit relativ zu einem festen Bezugspunkt
    /// des Empfaengers (z.B. Start des Legs).
    pub fn update(&mut self, ssrc: u32, sequence: u16, timestamp: u32, ankunft: Duration) {
        if !self.initialisiert || ssrc != self.ssrc {
            self.ssrc = ssrc;
            self.base_seq = sequence;
            self.max_seq = sequence;
            self.cycles = 0;
            self.received = 0;
            self.expected_prior = 0;
            self.received_prior = 0;
            self.transit = None;
            self.jitter = 0.0;
            self.initialisiert = true;
        } else if seq_delta(sequence, self.max_seq) > 0 {
            if sequence < self.max_seq {
                self.cycles = self.cycles.wrapping_add(1 << 16);
            }
            self.max_seq = sequence;
        }
        self.received = self.received.wrapping_add(1);

        let ankunft_ts = (ankunft.as_secs_f64() * self.clock_rate as f64).round() as i64;
        let transit = ankunft_ts - timestamp as i64;
        if let Some(vorher) = self.transit {
            let d = (transit - vorher).abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.transit = Some(transit);
    }

    /// Merkt sich den letzten Sender Report fuer LSR/DLSR
    pub fn sender_report_empfangen(&mut self, sr: &SenderReport, jetzt: Instant) {
        self.last_sr = ntp_middle_32(sr.info.ntp_timestamp);
        self.last_sr_at = Some(jetzt);
    }

    /// Erweiterte hoechste Sequenznummer
    pub fn extended_max(&self) -> u32 {
        self.cycles.wrapping_add(self.max_seq as u32)
    }

    /// Erwartete Pakete seit Beginn
    pub fn expected(&self) -> u32 {
        if !self.initialisiert {
            return 0;
        }
        self.extended_max()
            .wrapping_sub(self.base_seq as u32)
            .wrapping_add(1)
    }

    /// Kumulativ verlorene Pakete (negativ bei Duplikaten)
    pub fn cumulative_lost(&self) -> i64 {
        self.expected() as i64 - self.received as i64
    }

    /// Aktueller Jitter in Zeitstempel-Einheiten
    pub fn jitter(&self) -> u32 {
        self.jitter as u32
    }

    /// Empfangene Pakete
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Erzeugt einen Report-Block und beginnt ein neues Intervall
    ///
    /// Gibt `None` zurueck solange noch kein Paket empfangen wurde.
    pub fn report_block(&mut self, jetzt: Instant) -> Option<ReportBlock> {
        if !self.initialisiert {
            return None;
        }

        let expected = self.expected();
        let expected_interval = expected.wrapping_sub(self.expected_prior);
        let received_interval = self.received.wrapping_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.received;

        let lost_interval = expected_interval as i64 - received_interval as i64;
        let fraction_lost = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval as i64).min(255) as u8
        };

        let delay_since_last_sr = self
            .last_sr_at
            .map(|t| {
                let d = jetzt.saturating_duration_since(t);
                (d.as_secs_f64() * 65536.0) as u32
            })
            .unwrap_or(0);

        Some(ReportBlock {
            ssrc: self.ssrc,
            fraction_lost,
            cumulative_lost: self.cumulative_lost().clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            highest_sequence: self.extended_max(),
            jitter: self.jitter(),
            last_sr: self.last_sr,
            delay_since_last_sr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtcp::SenderInfo;

    const PERIODE: Duration = Duration::from_millis(20);

    #[test]
    fn kein_block_ohne_pakete() {
        let mut stats = ReceptionStats::new(8000);
        assert!(stats.report_block(Instant::now()).is_none());
    }

    #[test]
    fn verlust_und_anteil() {
        let mut stats = ReceptionStats::new(8000);
        // 10 Pakete erwartet, 2 fehlen (3 und 7)
        for seq in (0u16..10).filter(|s| *s != 3 && *s != 7) {
            stats.update(0xABCD, seq, seq as u32 * 160, PERIODE * seq as u32);
        }
        let block = stats.report_block(Instant::now()).unwrap();
        assert_eq!(block.ssrc, 0xABCD);
        assert_eq!(block.cumulative_lost, 2);
        assert_eq!(block.highest_sequence, 9);
        assert_eq!(block.fraction_lost, (2 * 256 / 10) as u8);
        assert_eq!(block.jitter, 0, "gleichmaessige Ankunft ohne Jitter");

        // Naechstes Intervall ohne Verlust
        stats.update(0xABCD, 10, 1600, PERIODE * 10);
        let block = stats.report_block(Instant::now()).unwrap();
        assert_eq!(block.fraction_lost, 0);
        assert_eq!(block.cumulative_lost, 2);
    }

    #[test]
    fn sequenz_ueberlauf_zaehlt_zyklen() {
        let mut stats = ReceptionStats::new(8000);
        for (i, seq) in [65534u16, 65535, 0, 1].iter().enumerate() {
            stats.update(1, *seq, i as u32 * 160, PERIODE * i as u32);
        }
        assert_eq!(stats.extended_max(), 65536 + 1);
        assert_eq!(stats.expected(), 4);
        assert_eq!(stats.cumulative_lost(), 0);
    }

    #[test]
    fn jitter_waechst_bei_unregelmaessiger_ankunft() {
        let mut stats = ReceptionStats::new(8000);
        for i in 0u16..50 {
            let versatz = if i % 2 == 0 { 0 } else { 10 };
            let ankunft = PERIODE * i as u32 + Duration::from_millis(versatz);
            stats.update(1, i, i as u32 * 160, ankunft);
        }
        assert!(stats.jitter() > 0);
    }

    #[test]
    fn lsr_aus_sender_report() {
        let mut stats = ReceptionStats::new(8000);
        stats.update(1, 0, 0, Duration::ZERO);
        let sr = SenderReport {
            ssrc: 1,
            info: SenderInfo {
                ntp_timestamp: 0x0001_2345_6789_0000,
                ..SenderInfo::default()
            },
            blocks: vec![],
        };
        let t0 = Instant::now();
        stats.sender_report_empfangen(&sr, t0);
        let block = stats.report_block(t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(block.last_sr, 0x2345_6789);
        assert_eq!(block.delay_since_last_sr, 65536);
    }
}
