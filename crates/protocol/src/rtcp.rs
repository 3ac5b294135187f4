//! RTCP Sender- und Receiver-Reports (RFC 3550 Abschnitt 6.4)
//!
//! ## Layout
//!
//! ```text
//! Header (8 Bytes):  V(2) P(1) RC(5) | PT(8) | Laenge(16) | SSRC(32)
//! Sender-Info (20):  NTP(64) | RTP-Zeitstempel(32) | Pakete(32) | Oktette(32)   (nur SR)
//! Report-Block (24): SSRC | Anteil verloren(8) + kumulativ verloren(24, signed)
//!                    | hoechste Sequenz | Jitter | LSR | DLSR
//! ```
//!
//! Ein SR mit einem Block ist 52 Bytes lang, ein RR mit einem Block 32.
//! Die Unterscheidung erfolgt ueber das zweite Byte (200 = SR, 201 = RR).
//! Bei zusammengesetzten Paketen wird nur das erste Paket gelesen.

use crate::error::WireError;
use bytes::{Buf, BufMut};
use chrono::{DateTime, Utc};

/// Pakettyp Sender Report
pub const RTCP_SR: u8 = 200;

/// Pakettyp Receiver Report
pub const RTCP_RR: u8 = 201;

/// Groesse des gemeinsamen Headers
pub const RTCP_HEADER_SIZE: usize = 8;

/// Groesse der Sender-Info im SR
pub const SENDER_INFO_SIZE: usize = 20;

/// Groesse eines Report-Blocks
pub const REPORT_BLOCK_SIZE: usize = 24;

/// Maximale Anzahl Report-Bloecke (5 Bit)
pub const MAX_REPORT_BLOCKS: usize = 31;

/// Wertebereich des 24-Bit-Feldes "kumulativ verloren"
const CUMULATIVE_LOST_MIN: i32 = -0x80_0000;
const CUMULATIVE_LOST_MAX: i32 = 0x7F_FFFF;

/// Sekunden zwischen 1900-01-01 (NTP-Epoche) und 1970-01-01
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

// ---------------------------------------------------------------------------
// Datentypen
// ---------------------------------------------------------------------------

/// Report-Block ueber eine empfangene Quelle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportBlock {
    /// SSRC der beobachteten Quelle
    pub ssrc: u32,
    /// Anteil verlorener Pakete seit dem letzten Report (x/256)
    pub fraction_lost: u8,
    /// Kumulativ verlorene Pakete (24 Bit, vorzeichenbehaftet)
    pub cumulative_lost: i32,
    /// Hoechste empfangene erweiterte Sequenznummer
    pub highest_sequence: u32,
    /// Interarrival-Jitter in Zeitstempel-Einheiten
    pub jitter: u32,
    /// Mittlere 32 Bit des NTP-Zeitstempels des letzten SR
    pub last_sr: u32,
    /// Verzoegerung seit dem letzten SR (1/65536 s)
    pub delay_since_last_sr: u32,
}

/// Sender-Info eines SR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderInfo {
    /// NTP-Zeitstempel (32.32 Festkomma)
    pub ntp_timestamp: u64,
    /// Zugehoeriger RTP-Zeitstempel
    pub rtp_timestamp: u32,
    /// Gesendete Pakete
    pub packet_count: u32,
    /// Gesendete Nutzdaten-Oktette
    pub octet_count: u32,
}

/// Sender Report (PT 200)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    pub info: SenderInfo,
    pub blocks: Vec<ReportBlock>,
}

/// Receiver Report (PT 201)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub blocks: Vec<ReportBlock>,
}

/// Ein RTCP-Report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpReport {
    Sender(SenderReport),
    Receiver(ReceiverReport),
}

impl RtcpReport {
    /// SSRC des Absenders
    pub fn ssrc(&self) -> u32 {
        match self {
            Self::Sender(sr) => sr.ssrc,
            Self::Receiver(rr) => rr.ssrc,
        }
    }

    /// Report-Bloecke
    pub fn blocks(&self) -> &[ReportBlock] {
        match self {
            Self::Sender(sr) => &sr.blocks,
            Self::Receiver(rr) => &rr.blocks,
        }
    }

    fn packet_type(&self) -> u8 {
        match self {
            Self::Sender(_) => RTCP_SR,
            Self::Receiver(_) => RTCP_RR,
        }
    }

    /// Laenge des kodierten Reports in Bytes
    pub fn encoded_len(&self) -> usize {
        let bloecke = self.blocks().len().min(MAX_REPORT_BLOCKS) * REPORT_BLOCK_SIZE;
        match self {
            Self::Sender(_) => RTCP_HEADER_SIZE + SENDER_INFO_SIZE + bloecke,
            Self::Receiver(_) => RTCP_HEADER_SIZE + bloecke,
        }
    }

    /// Schreibt den Report in einen beliebigen Puffer
    pub fn encode_into<B: BufMut>(&self, dst: &mut B) {
        let blocks = &self.blocks()[..self.blocks().len().min(MAX_REPORT_BLOCKS)];
        let laenge_woerter = (self.encoded_len() / 4 - 1) as u16;

        dst.put_u8(2 << 6 | blocks.len() as u8);
        dst.put_u8(self.packet_type());
        dst.put_u16(laenge_woerter);
        dst.put_u32(self.ssrc());

        if let Self::Sender(sr) = self {
            dst.put_u64(sr.info.ntp_timestamp);
            dst.put_u32(sr.info.rtp_timestamp);
            dst.put_u32(sr.info.packet_count);
            dst.put_u32(sr.info.octet_count);
        }

        for block in blocks {
            block.encode_into(dst);
        }
    }

    /// Serialisiert den Report in einen neuen Puffer
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Deserialisiert einen Report
    ///
    /// # Fehler
    /// - `Truncated` wenn Header, Sender-Info oder Bloecke fehlen
    /// - `InvalidVersion` bei Version != 2
    /// - `UnknownPacketType` fuer alles ausser 200/201
    /// - `LengthMismatch` wenn das Laengenfeld die Bloecke nicht abdeckt
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        WireError::pruefe_laenge(buf, RTCP_HEADER_SIZE)?;

        let mut cursor = buf;
        let b0 = cursor.get_u8();
        let version = b0 >> 6;
        if version != 2 {
            return Err(WireError::InvalidVersion(version));
        }
        let anzahl = (b0 & 0x1f) as usize;
        let packet_type = cursor.get_u8();
        let laenge = (cursor.get_u16() as usize + 1) * 4;
        let ssrc = cursor.get_u32();

        let fest = match packet_type {
            RTCP_SR => RTCP_HEADER_SIZE + SENDER_INFO_SIZE,
            RTCP_RR => RTCP_HEADER_SIZE,
            other => return Err(WireError::UnknownPacketType(other)),
        };
        let benoetigt = fest + anzahl * REPORT_BLOCK_SIZE;
        if laenge < benoetigt {
            return Err(WireError::LengthMismatch {
                laenge,
                bloecke: anzahl,
            });
        }
        WireError::pruefe_laenge(buf, benoetigt)?;

        let info = if packet_type == RTCP_SR {
            Some(SenderInfo {
                ntp_timestamp: cursor.get_u64(),
                rtp_timestamp: cursor.get_u32(),
                packet_count: cursor.get_u32(),
                octet_count: cursor.get_u32(),
            })
        } else {
            None
        };

        let blocks = (0..anzahl)
            .map(|_| ReportBlock::decode_from(&mut cursor))
            .collect();

        Ok(match info {
            Some(info) => Self::Sender(SenderReport { ssrc, info, blocks }),
            None => Self::Receiver(ReceiverReport { ssrc, blocks }),
        })
    }
}

impl ReportBlock {
    fn encode_into<B: BufMut>(&self, dst: &mut B) {
        let lost = self
            .cumulative_lost
            .clamp(CUMULATIVE_LOST_MIN, CUMULATIVE_LOST_MAX) as u32
            & 0x00FF_FFFF;
        dst.put_u32(self.ssrc);
        dst.put_u32((self.fraction_lost as u32) << 24 | lost);
        dst.put_u32(self.highest_sequence);
        dst.put_u32(self.jitter);
        dst.put_u32(self.last_sr);
        dst.put_u32(self.delay_since_last_sr);
    }

    /// Liest einen Block; der Aufrufer hat die Laenge bereits geprueft
    fn decode_from(cursor: &mut &[u8]) -> Self {
        let ssrc = cursor.get_u32();
        let verlust = cursor.get_u32();
        // 24-Bit-Feld mit Vorzeichen erweitern
        let cumulative_lost = ((verlust << 8) as i32) >> 8;
        Self {
            ssrc,
            fraction_lost: (verlust >> 24) as u8,
            cumulative_lost,
            highest_sequence: cursor.get_u32(),
            jitter: cursor.get_u32(),
            last_sr: cursor.get_u32(),
            delay_since_last_sr: cursor.get_u32(),
        }
    }
}

/// Dekodiert einen RTCP-Report
pub fn decode_rtcp(buf: &[u8]) -> Result<RtcpReport, WireError> {
    RtcpReport::decode(buf)
}

/// Kodiert einen RTCP-Report
pub fn encode_rtcp(report: &RtcpReport) -> Vec<u8> {
    report.encode()
}

// ---------------------------------------------------------------------------
// NTP-Zeit
// ---------------------------------------------------------------------------

/// Wandelt einen Zeitpunkt in einen 64-Bit NTP-Zeitstempel
pub fn ntp_from_datetime(zeit: DateTime<Utc>) -> u64 {
    let sekunden = (zeit.timestamp() as u64).wrapping_add(NTP_UNIX_OFFSET);
    let bruch = ((zeit.timestamp_subsec_nanos() as u64) << 32) / 1_000_000_000;
    sekunden << 32 | bruch
}

/// Aktueller NTP-Zeitstempel
pub fn ntp_now() -> u64 {
    ntp_from_datetime(Utc::now())
}

/// Mittlere 32 Bit eines NTP-Zeitstempels (LSR-Feld)
pub fn ntp_middle_32(ntp: u64) -> u32 {
    (ntp >> 16) as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn block() -> ReportBlock {
        ReportBlock {
            ssrc: 0x1111_2222,
            fraction_lost: 25,
            cumulative_lost: -3,
            highest_sequence: 0x0001_0005,
            jitter: 42,
            last_sr: 0xDEAD_BEEF,
            delay_since_last_sr: 65536,
        }
    }

    #[test]
    fn sr_und_rr_groessen() {
        let sr = RtcpReport::Sender(SenderReport {
            ssrc: 1,
            info: SenderInfo::default(),
            blocks: vec![block()],
        });
        let rr = RtcpReport::Receiver(ReceiverReport {
            ssrc: 1,
            blocks: vec![block()],
        });
        assert_eq!(sr.encode().len(), 52);
        assert_eq!(rr.encode().len(), 32);
        assert_eq!(sr.encode()[1], RTCP_SR);
        assert_eq!(rr.encode()[1], RTCP_RR);
        // Laengenfeld in 32-Bit-Woertern minus eins
        assert_eq!(&sr.encode()[2..4], &[0, 12]);
        assert_eq!(&rr.encode()[2..4], &[0, 7]);
    }

    #[test]
    fn kumulativer_verlust_vorzeichen() {
        let rr = RtcpReport::Receiver(ReceiverReport {
            ssrc: 7,
            blocks: vec![block()],
        });
        let bytes = rr.encode();
        // -3 als 24-Bit Zweierkomplement hinter dem Anteil (25)
        assert_eq!(&bytes[12..16], &[25, 0xFF, 0xFF, 0xFD]);
        assert_eq!(decode_rtcp(&bytes).unwrap().blocks()[0].cumulative_lost, -3);
    }

    #[test]
    fn kumulativer_verlust_wird_begrenzt() {
        let mut b = block();
        b.cumulative_lost = 10_000_000;
        let rr = RtcpReport::Receiver(ReceiverReport {
            ssrc: 7,
            blocks: vec![b],
        });
        let decoded = decode_rtcp(&rr.encode()).unwrap();
        assert_eq!(decoded.blocks()[0].cumulative_lost, CUMULATIVE_LOST_MAX);
    }

    #[test]
    fn abgeschnittene_reports_sind_fehler() {
        let sr = RtcpReport::Sender(SenderReport {
            ssrc: 1,
            info: SenderInfo::default(),
            blocks: vec![block()],
        })
        .encode();
        assert!(matches!(
            decode_rtcp(&sr[..40]),
            Err(WireError::Truncated { expected: 52, actual: 40 })
        ));
        assert!(matches!(
            decode_rtcp(&sr[..4]),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn unbekannter_pakettyp() {
        let mut bytes = RtcpReport::Receiver(ReceiverReport {
            ssrc: 1,
            blocks: vec![],
        })
        .encode();
        bytes[1] = 202; // SDES
        assert!(matches!(
            decode_rtcp(&bytes),
            Err(WireError::UnknownPacketType(202))
        ));
    }

    #[test]
    fn laengenfeld_zu_klein() {
        let mut bytes = RtcpReport::Receiver(ReceiverReport {
            ssrc: 1,
            blocks: vec![block()],
        })
        .encode();
        bytes[3] = 1;
        assert!(matches!(
            decode_rtcp(&bytes),
            Err(WireError::LengthMismatch { bloecke: 1, .. })
        ));
    }

    #[test]
    fn ntp_umrechnung() {
        let zeit = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::milliseconds(500);
        let ntp = ntp_from_datetime(zeit);
        assert_eq!(ntp >> 32, NTP_UNIX_OFFSET);
        assert_eq!(ntp & 0xFFFF_FFFF, 0x8000_0000, "halbe Sekunde");
        assert_eq!(ntp_middle_32(ntp), ((NTP_UNIX_OFFSET as u32) << 16) | 0x8000);
    }

    fn block_strategie() -> impl Strategy<Value = ReportBlock> {
        (
            any::<u32>(),
            any::<u8>(),
            CUMULATIVE_LOST_MIN..=CUMULATIVE_LOST_MAX,
            any::<u32>(),
            any::<u32>(),
            any::<u32>(),
            any::<u32>(),
        )
            .prop_map(|(ssrc, fraction_lost, cumulative_lost, highest_sequence, jitter, last_sr, dlsr)| {
                ReportBlock {
                    ssrc,
                    fraction_lost,
                    cumulative_lost,
                    highest_sequence,
                    jitter,
                    last_sr,
                    delay_since_last_sr: dlsr,
                }
            })
    }

    proptest! {
        #[test]
        fn sr_kodierung_umkehrbar(
            ssrc in any::<u32>(),
            ntp in any::<u64>(),
            rtp in any::<u32>(),
            pakete in any::<u32>(),
            oktette in any::<u32>(),
            blocks in prop::collection::vec(block_strategie(), 1..4),
        ) {
            let report = RtcpReport::Sender(SenderReport {
                ssrc,
                info: SenderInfo { ntp_timestamp: ntp, rtp_timestamp: rtp, packet_count: pakete, octet_count: oktette },
                blocks,
            });
            prop_assert_eq!(decode_rtcp(&encode_rtcp(&report)).unwrap(), report);
        }

        #[test]
        fn rr_kodierung_umkehrbar(
            ssrc in any::<u32>(),
            blocks in prop::collection::vec(block_strategie(), 1..4),
        ) {
            let report = RtcpReport::Receiver(ReceiverReport { ssrc, blocks });
            prop_assert_eq!(decode_rtcp(&encode_rtcp(&report)).unwrap(), report);
        }
    }
}
