//! Zwei-Parteien-Bruecke: Wiedergabe-Threads zwischen zwei Call-Legs
//!
//! Pro Richtung laeuft ein eigener OS-Thread, getaktet von einem
//! [`Ticker`]. Jeder Takt entnimmt genau einen Eintrag aus dem Jitter
//! Buffer des Quell-Legs, bereitet ihn fuer das Format des Ziel-Legs auf
//! und gibt das RTP-Paket an eine [`PaketSenke`].
//!
//! ```text
//! Leg A ── JitterBuffer ── Weiterleitung A→B ── Ticker ──> Senke → B.remote
//! Leg B ── JitterBuffer ── Weiterleitung B→A ── Ticker ──> Senke → A.remote
//! ```
//!
//! `Ticker::tick` ist der einzige blockierende Aufruf im Datenpfad.

use crate::error::VoiceResult;
use crate::leg::{CallLeg, LegPlayout, PlayoutBlock};
use crate::ticker::{Ticker, TickerKind};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use voxbridge_audio::{FilterKind, VadConfig};
use voxbridge_core::PACKET_PERIOD;
use voxbridge_protocol::RtpFrame;

/// Nach so vielen Takten wird die Wiedergabe-Statistik am Leg veroeffentlicht
const STATISTIK_TAKTE: u64 = 50;

/// Ziel fuer fertig kodierte RTP-Datagramme
///
/// Wird aus den Wiedergabe-Threads aufgerufen und darf nicht blockieren.
pub trait PaketSenke: Send + Sync {
    fn senden(&self, datagramm: Vec<u8>, ziel: SocketAddr);
}

/// Einstellungen des Wiedergabe-Pfads
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayoutConfig {
    /// Tiefpass des Resamplers
    pub filter: FilterKind,
    /// `None` schaltet die Sprach-Erkennung ab
    pub vad: Option<VadConfig>,
    pub ticker: TickerKind,
    /// Sendetakt
    #[serde(with = "millis")]
    pub periode: Duration,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            filter: FilterKind::default(),
            vad: Some(VadConfig::default()),
            ticker: TickerKind::default(),
            periode: PACKET_PERIOD,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Weiterleitung – eine Richtung
// ---------------------------------------------------------------------------

/// Datenpfad einer Richtung (Quelle → Ziel), ohne eigenen Thread
pub struct Weiterleitung {
    quelle: Arc<CallLeg>,
    ziel: Arc<CallLeg>,
    playout: LegPlayout,
    takte: u64,
}

impl Weiterleitung {
    pub fn neu(quelle: Arc<CallLeg>, ziel: Arc<CallLeg>, config: &PlayoutConfig) -> VoiceResult<Self> {
        let playout = LegPlayout::neu(&quelle, ziel.format(), config.filter, config.vad)?;
        Ok(Self {
            quelle,
            ziel,
            playout,
            takte: 0,
        })
    }

    /// Ein Takt: naechsten Block entnehmen und als Paket fuer das Ziel
    /// verpacken
    ///
    /// `None` wenn in diesem Takt nichts zu senden ist.
    pub fn schritt(&mut self, jetzt: Instant) -> Option<RtpFrame> {
        let block = self.playout.naechster_block(self.quelle.buffer());
        if let PlayoutBlock::Luecke = block {
            tracing::trace!(leg = %self.quelle.id(), "Verlust ohne Verdeckung, Takt entfaellt");
        }
        let frame = self.ziel.frame_fuer(block, jetzt);

        self.takte += 1;
        if self.takte % STATISTIK_TAKTE == 0 {
            self.statistik_veroeffentlichen();
        }
        frame
    }

    pub fn statistik_veroeffentlichen(&self) {
        self.quelle.playout_statistik_setzen(self.playout.statistik());
    }

    fn aktiv(&self) -> bool {
        self.quelle.ist_aktiv() && self.ziel.ist_aktiv()
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

struct Richtung {
    ticker: Arc<Ticker>,
    thread: Option<JoinHandle<()>>,
}

/// Laufende Bruecke zwischen zwei Legs
///
/// Beim Drop werden beide Threads gestoppt.
pub struct Bridge {
    legs: [Arc<CallLeg>; 2],
    richtungen: Vec<Richtung>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("a", &self.legs[0].id())
            .field("b", &self.legs[1].id())
            .field("laeuft", &self.laeuft())
            .finish()
    }
}

impl Bridge {
    /// Verbindet zwei Legs und startet beide Wiedergabe-Threads
    pub fn starten(
        a: Arc<CallLeg>,
        b: Arc<CallLeg>,
        config: &PlayoutConfig,
        senke: Arc<dyn PaketSenke>,
    ) -> VoiceResult<Self> {
        let vorwaerts = Weiterleitung::neu(a.clone(), b.clone(), config)?;
        let rueckwaerts = Weiterleitung::neu(b.clone(), a.clone(), config)?;

        let mut bridge = Self {
            legs: [a, b],
            richtungen: Vec::with_capacity(2),
        };
        for weiterleitung in [vorwaerts, rueckwaerts] {
            match richtung_starten(weiterleitung, config, senke.clone()) {
                Ok(richtung) => bridge.richtungen.push(richtung),
                Err(e) => {
                    bridge.stoppen();
                    return Err(e);
                }
            }
        }

        tracing::info!(
            a = %bridge.legs[0].id(),
            b = %bridge.legs[1].id(),
            format_a = %bridge.legs[0].format(),
            format_b = %bridge.legs[1].format(),
            "Bruecke gestartet"
        );
        Ok(bridge)
    }

    pub fn legs(&self) -> &[Arc<CallLeg>; 2] {
        &self.legs
    }

    pub fn laeuft(&self) -> bool {
        self.richtungen.iter().any(|r| r.ticker.is_armed())
    }

    /// Stoppt beide Richtungen und wartet auf die Threads
    pub fn stoppen(&mut self) {
        for richtung in &self.richtungen {
            richtung.ticker.disarm();
        }
        for richtung in &mut self.richtungen {
            if let Some(thread) = richtung.thread.take() {
                if thread.join().is_err() {
                    tracing::error!("Wiedergabe-Thread ist abgestuerzt");
                }
            }
        }
        if !self.richtungen.is_empty() {
            tracing::info!(a = %self.legs[0].id(), b = %self.legs[1].id(), "Bruecke gestoppt");
        }
        self.richtungen.clear();
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stoppen();
    }
}

fn richtung_starten(
    mut weiterleitung: Weiterleitung,
    config: &PlayoutConfig,
    senke: Arc<dyn PaketSenke>,
) -> VoiceResult<Richtung> {
    let ticker = Arc::new(Ticker::neu(config.ticker));
    ticker.arm(config.periode)?;

    let name = format!("playout-{}", weiterleitung.quelle.id());
    let takt = ticker.clone();
    let thread = std::thread::Builder::new().name(name).spawn(move || {
        let ziel = weiterleitung.ziel.remote();
        while takt.tick().is_ok() {
            if !weiterleitung.aktiv() {
                tracing::debug!(leg = %weiterleitung.quelle.id(), "Leg beendet, Wiedergabe endet");
                takt.disarm();
                break;
            }
            if let Some(frame) = weiterleitung.schritt(Instant::now()) {
                senke.senden(frame.encode(), ziel);
            }
        }
        weiterleitung.statistik_veroeffentlichen();
        let stat = takt.statistik();
        tracing::debug!(ticks = stat.ticks, verschlafen = stat.overslept, "Wiedergabe-Thread beendet");
    });

    match thread {
        Ok(thread) => Ok(Richtung {
            ticker,
            thread: Some(thread),
        }),
        Err(e) => {
            ticker.disarm();
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leg::LegConfig;
    use parking_lot::Mutex;
    use std::net::{IpAddr, Ipv4Addr};
    use voxbridge_audio::companding::linear_to_ulaw_bytes;
    use voxbridge_core::{Encoding, EventSink, MediaEvent, MediaFormat};
    use voxbridge_protocol::decode_rtp;

    struct Stumm;

    impl EventSink for Stumm {
        fn melden(&self, _event: MediaEvent) {}
    }

    #[derive(Default)]
    struct Sammler(Mutex<Vec<(Vec<u8>, SocketAddr)>>);

    impl PaketSenke for Sammler {
        fn senden(&self, datagramm: Vec<u8>, ziel: SocketAddr) {
            self.0.lock().push((datagramm, ziel));
        }
    }

    fn leg(format: &'static MediaFormat, port: u16) -> Arc<CallLeg> {
        let remote = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        Arc::new(CallLeg::neu(LegConfig::neu(format, remote), Arc::new(Stumm)).unwrap())
    }

    #[test]
    fn pcmu_8k_nach_pcm_16k() {
        let a = leg(MediaFormat::by_payload(0).unwrap(), 41000);
        let b = leg(MediaFormat::find(Encoding::Pcm, 16000, 1).unwrap(), 41002);
        let config = PlayoutConfig {
            vad: None,
            ..PlayoutConfig::default()
        };
        let mut weiter = Weiterleitung::neu(a.clone(), b.clone(), &config).unwrap();

        let t0 = Instant::now();
        for seq in 1..=3u16 {
            let frame = RtpFrame::new(0, seq, seq as u32 * 160, 1, linear_to_ulaw_bytes(&[8000; 160]));
            a.rtp_empfangen(frame, t0);
        }

        let frames: Vec<RtpFrame> = (0..6).filter_map(|_| weiter.schritt(t0)).collect();
        let audio: Vec<&RtpFrame> = frames.iter().filter(|f| !f.is_comfort_noise()).collect();
        assert_eq!(audio.len(), 3);
        for f in &audio {
            assert_eq!(f.payload_type, b.format().payload);
            assert_eq!(f.payload.len(), 640, "320 Samples à 2 Bytes");
        }
        // Zeitstempel in Einheiten des Zielformats
        assert_eq!(audio[1].timestamp.wrapping_sub(audio[0].timestamp), 320);
    }

    #[test]
    fn statistik_wird_veroeffentlicht() {
        let a = leg(MediaFormat::by_payload(0).unwrap(), 41010);
        let b = leg(MediaFormat::by_payload(0).unwrap(), 41012);
        let mut weiter = Weiterleitung::neu(a.clone(), b, &PlayoutConfig::default()).unwrap();
        for _ in 0..STATISTIK_TAKTE {
            weiter.schritt(Instant::now());
        }
        assert_eq!(a.snapshot().playout.leer, STATISTIK_TAKTE);
    }

    #[test]
    fn bruecke_sendet_im_takt_und_stoppt() {
        let a = leg(MediaFormat::by_payload(0).unwrap(), 41020);
        let b = leg(MediaFormat::by_payload(0).unwrap(), 41022);
        let senke = Arc::new(Sammler::default());

        let t0 = Instant::now();
        for seq in 1..=4u16 {
            let frame = RtpFrame::new(0, seq, seq as u32 * 160, 7, linear_to_ulaw_bytes(&[100; 160]));
            a.rtp_empfangen(frame, t0);
        }

        let mut bridge = Bridge::starten(a.clone(), b.clone(), &PlayoutConfig::default(), senke.clone()).unwrap();
        assert!(bridge.laeuft());
        std::thread::sleep(Duration::from_millis(200));
        bridge.stoppen();
        assert!(!bridge.laeuft());

        let gesendet = senke.0.lock();
        let an_b: Vec<_> = gesendet
            .iter()
            .filter(|(_, ziel)| *ziel == b.remote())
            .map(|(d, _)| decode_rtp(d).unwrap())
            .collect();
        assert_eq!(an_b.iter().filter(|f| !f.is_comfort_noise()).count(), 4);
        // B hat nichts empfangen: genau ein Comfort-Noise-Paket an A
        let an_a = gesendet.iter().filter(|(_, ziel)| *ziel == a.remote()).count();
        assert_eq!(an_a, 1);
    }

    #[test]
    fn beendetes_leg_stoppt_thread() {
        let a = leg(MediaFormat::by_payload(0).unwrap(), 41030);
        let b = leg(MediaFormat::by_payload(0).unwrap(), 41032);
        let bridge = Bridge::starten(a.clone(), b, &PlayoutConfig::default(), Arc::new(Sammler::default())).unwrap();
        a.beenden();
        std::thread::sleep(Duration::from_millis(100));
        assert!(!bridge.laeuft());
    }

    #[test]
    fn playout_config_aus_toml() {
        let config: PlayoutConfig = toml::from_str(
            r#"
            ticker = "busy_wait"
            periode = 10

            [filter]
            algorithmus = "single_pole"
            cutoff = 0.2
            "#,
        )
        .unwrap();
        assert_eq!(config.ticker, TickerKind::BusyWait);
        assert_eq!(config.periode, Duration::from_millis(10));
        assert_eq!(config.filter, FilterKind::SinglePole { cutoff: 0.2 });
        assert!(config.vad.is_some());
    }
}
