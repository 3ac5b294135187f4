//! Quality Telemetrie – Kennzahlen pro Call-Leg
//!
//! Liest periodisch die Zaehler aller Legs aus der [`LegRegistry`] und
//! bildet daraus Zeitraum-Snapshots.
//!
//! ## Kennzahlen
//! - Paketverlust-Rate (aus der RTP-Empfangsstatistik)
//! - Interarrival-Jitter in ms
//! - Bitrate (Empfang und Senden)
//! - Jitter-Buffer-Fuellstand und Verdeckungszaehler
//!
//! ## Export
//! Snapshots gehen ueber einen tokio-Broadcast-Kanal an Observability-
//! Systeme. Medien-Ereignisse laufen ueber [`BroadcastSink`].

use crate::leg::LegSnapshot;
use crate::state::LegRegistry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use voxbridge_core::{EventSink, LegId, MediaEvent, MediaFormat};

/// Intervall fuer periodische Telemetrie-Snapshots
pub const TELEMETRIE_INTERVALL: Duration = Duration::from_secs(5);

/// Kapazitaet der Broadcast-Kanaele
const KANAL_KAPAZITAET: usize = 256;

// ---------------------------------------------------------------------------
// Ereignisse
// ---------------------------------------------------------------------------

/// [`EventSink`] auf einem tokio-Broadcast-Kanal
///
/// Blockiert nie; ohne Empfaenger gehen Ereignisse verloren.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<MediaEvent>,
}

impl BroadcastSink {
    pub fn neu() -> (Self, broadcast::Receiver<MediaEvent>) {
        let (tx, rx) = broadcast::channel(KANAL_KAPAZITAET);
        (Self { tx }, rx)
    }

    pub fn abonnieren(&self) -> broadcast::Receiver<MediaEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn melden(&self, event: MediaEvent) {
        tracing::trace!(?event, "Medien-Ereignis");
        let _ = self.tx.send(event);
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Periodischer Telemetrie-Snapshot pro Leg
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrieSnapshot {
    pub leg: LegId,
    pub remote: SocketAddr,
    /// Erfassungszeitraum
    pub zeitraum: Duration,
    /// Paketverlust-Rate im Zeitraum (0.0–1.0)
    pub verlust_rate: f64,
    /// Interarrival-Jitter in ms
    pub jitter_ms: f64,
    /// Empfangs-Bitrate in bps (Nutzdaten)
    pub empfang_bps: u64,
    /// Sende-Bitrate in bps (Nutzdaten)
    pub sende_bps: u64,
    /// Jitter-Buffer-Fuellstand (Pakete)
    pub buffer_fuellstand: usize,
    /// Geglaetteter Jitter des Buffers in ms
    pub buffer_jitter_ms: f64,
    /// Im Zeitraum empfangene RTP-Pakete
    pub pakete_empfangen: u64,
    /// Im Zeitraum gesendete RTP-Pakete
    pub pakete_gesendet: u64,
    /// Zu spaet eingetroffene Pakete (verworfen)
    pub verworfen_alt: u64,
    /// Nachzuegler, die eine Luecke geschlossen haben
    pub ausser_reihe: u64,
    /// Verdeckte Verluste
    pub repariert: u64,
    /// Nicht verdeckte Verluste
    pub nicht_verdeckt: u64,
    /// Resets des Jitter Buffers
    pub resets: u64,
    /// Gesamtzaehler zum Zeitpunkt des Snapshots
    pub zaehler: LegSnapshot,
}

impl TelemetrieSnapshot {
    /// Gibt eine lesbare Zusammenfassung zurueck
    pub fn zusammenfassung(&self) -> String {
        format!(
            "Leg {} ({}): Loss={:.1}% Jitter={:.1}ms Empfang={}kbps Sende={}kbps Buffer={} ({:.0}ms) Unverdeckt={}",
            self.leg,
            self.remote,
            self.verlust_rate * 100.0,
            self.jitter_ms,
            self.empfang_bps / 1000,
            self.sende_bps / 1000,
            self.buffer_fuellstand,
            self.buffer_jitter_ms,
            self.nicht_verdeckt,
        )
    }
}

/// Stand des vorherigen Snapshots eines Legs
struct Vorher {
    zeitpunkt: Instant,
    zaehler: Option<LegSnapshot>,
}

fn differenz(jetzt: u64, vorher: u64) -> u64 {
    jetzt.saturating_sub(vorher)
}

fn bps(bytes: u64, zeitraum: Duration) -> u64 {
    ((bytes * 8) as f64 / zeitraum.as_secs_f64().max(0.001)) as u64
}

// ---------------------------------------------------------------------------
// VoiceTelemetry
// ---------------------------------------------------------------------------

/// Zentrales Telemetrie-System fuer alle Legs
///
/// Thread-safe durch DashMap + Arc. Der Export-Task laeuft separat via
/// `starten()`.
#[derive(Clone)]
pub struct VoiceTelemetry {
    inner: Arc<TelemetrieInner>,
}

struct TelemetrieInner {
    registry: LegRegistry,
    vorher: DashMap<LegId, Mutex<Vorher>>,
    export_tx: broadcast::Sender<TelemetrieSnapshot>,
}

impl VoiceTelemetry {
    /// Erstellt ein Telemetrie-System ueber der gegebenen Registry
    ///
    /// Gibt auch den Broadcast-Receiver zurueck, ueber den Snapshots
    /// empfangen werden.
    pub fn neu(registry: LegRegistry) -> (Self, broadcast::Receiver<TelemetrieSnapshot>) {
        let (tx, rx) = broadcast::channel(KANAL_KAPAZITAET);
        let telemetry = Self {
            inner: Arc::new(TelemetrieInner {
                registry,
                vorher: DashMap::new(),
                export_tx: tx,
            }),
        };
        (telemetry, rx)
    }

    pub fn abonnieren(&self) -> broadcast::Receiver<TelemetrieSnapshot> {
        self.inner.export_tx.subscribe()
    }

    /// Erstellt sofort Snapshots fuer alle Legs und sendet sie
    pub fn snapshots_erstellen(&self) -> Vec<TelemetrieSnapshot> {
        let legs = self.inner.registry.legs();
        let jetzt = Instant::now();

        // Entfernte Legs vergessen
        self.inner
            .vorher
            .retain(|id, _| legs.iter().any(|l| l.id() == *id));

        let mut snapshots = Vec::with_capacity(legs.len());
        for leg in legs {
            let zaehler = leg.snapshot();
            let eintrag = self.inner.vorher.entry(leg.id()).or_insert_with(|| {
                Mutex::new(Vorher {
                    zeitpunkt: jetzt,
                    zaehler: None,
                })
            });
            let mut vorher = eintrag.lock();
            let snapshot = snapshot_berechnen(leg.format(), &zaehler, &vorher, jetzt);
            *vorher = Vorher {
                zeitpunkt: jetzt,
                zaehler: Some(zaehler),
            };
            drop(vorher);

            tracing::debug!("{}", snapshot.zusammenfassung());
            let _ = self.inner.export_tx.send(snapshot.clone());
            snapshots.push(snapshot);
        }
        snapshots
    }

    /// Startet den periodischen Telemetrie-Task
    pub fn starten(&self, intervall: Duration) -> tokio::task::JoinHandle<()> {
        let telemetry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(intervall);
            ticker.tick().await; // Ersten Tick ueberspringen

            loop {
                ticker.tick().await;
                let snapshots = telemetry.snapshots_erstellen();
                if !snapshots.is_empty() {
                    tracing::info!(legs = snapshots.len(), "Telemetrie-Snapshot erstellt");
                }
            }
        })
    }
}

fn snapshot_berechnen(
    format: &MediaFormat,
    zaehler: &LegSnapshot,
    vorher: &Vorher,
    jetzt: Instant,
) -> TelemetrieSnapshot {
    let zeitraum = jetzt.saturating_duration_since(vorher.zeitpunkt);
    let basis = vorher.zaehler.as_ref();

    let empfangen = differenz(
        zaehler.empfangen_pakete,
        basis.map_or(0, |b| b.empfangen_pakete),
    );
    let verloren = (zaehler.kumulativ_verloren - basis.map_or(0, |b| b.kumulativ_verloren)).max(0) as u64;
    let verlust_rate = if empfangen + verloren > 0 {
        verloren as f64 / (empfangen + verloren) as f64
    } else {
        0.0
    };

    let empfang_bytes = differenz(zaehler.empfangen_bytes, basis.map_or(0, |b| b.empfangen_bytes));
    let sende_bytes = differenz(
        zaehler.gesendet_oktette as u64,
        basis.map_or(0, |b| b.gesendet_oktette as u64),
    );
    let buffer = &zaehler.jitter_buffer;
    let buffer_vorher = basis.map(|b| b.jitter_buffer.clone()).unwrap_or_default();
    let pakete_gesendet = differenz(
        zaehler.gesendet_pakete as u64,
        basis.map_or(0, |b| b.gesendet_pakete as u64),
    );

    TelemetrieSnapshot {
        leg: zaehler.leg,
        remote: zaehler.remote,
        zeitraum,
        verlust_rate,
        jitter_ms: zaehler.rtp_jitter as f64 * 1000.0 / format.sample_rate as f64,
        empfang_bps: bps(empfang_bytes, zeitraum),
        sende_bps: bps(sende_bytes, zeitraum),
        buffer_fuellstand: zaehler.jitter_buffer.depth,
        buffer_jitter_ms: zaehler.jitter_buffer.jitter_ms,
        pakete_empfangen: empfangen,
        pakete_gesendet,
        verworfen_alt: differenz(buffer.tossed_old, buffer_vorher.tossed_old),
        ausser_reihe: differenz(buffer.out_of_order, buffer_vorher.out_of_order),
        repariert: differenz(buffer.repaired, buffer_vorher.repaired),
        nicht_verdeckt: differenz(buffer.failed_to_recover, buffer_vorher.failed_to_recover),
        resets: differenz(buffer.resets, buffer_vorher.resets),
        zaehler: zaehler.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leg::{CallLeg, LegConfig};
    use std::net::{IpAddr, Ipv4Addr};
    use voxbridge_audio::companding::linear_to_ulaw_bytes;
    use voxbridge_protocol::RtpFrame;

    fn leg_in(registry: &LegRegistry, sink: BroadcastSink, port: u16) -> Arc<CallLeg> {
        let format = MediaFormat::by_payload(0).unwrap();
        let remote = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let leg = Arc::new(CallLeg::neu(LegConfig::neu(format, remote), Arc::new(sink)).unwrap());
        registry.registrieren(leg.clone());
        leg
    }

    fn paket(seq: u16) -> RtpFrame {
        RtpFrame::new(0, seq, seq as u32 * 160, 0xAB, linear_to_ulaw_bytes(&[0; 160]))
    }

    #[tokio::test]
    async fn ereignisse_ueber_broadcast() {
        let (sink, mut rx) = BroadcastSink::neu();
        let registry = LegRegistry::neu();
        let leg = leg_in(&registry, sink, 30000);

        match rx.try_recv() {
            Ok(MediaEvent::LegGestartet { leg: id }) => assert_eq!(id, leg.id()),
            andere => panic!("LegGestartet erwartet, war {andere:?}"),
        }
    }

    #[test]
    fn melden_ohne_empfaenger_ist_ok() {
        let (sink, rx) = BroadcastSink::neu();
        drop(rx);
        sink.melden(MediaEvent::LegBeendet { leg: LegId::new() });
    }

    #[test]
    fn verlust_rate_aus_sequenzluecke() {
        let (sink, _rx) = BroadcastSink::neu();
        let registry = LegRegistry::neu();
        let leg = leg_in(&registry, sink, 30010);
        let (tele, _snap_rx) = VoiceTelemetry::neu(registry);

        let t0 = Instant::now();
        // 8 von 10 Paketen, 2 verloren
        for seq in [1u16, 2, 3, 5, 6, 7, 9, 10] {
            leg.rtp_empfangen(paket(seq), t0 + Duration::from_millis(20) * seq as u32);
        }

        let snapshots = tele.snapshots_erstellen();
        assert_eq!(snapshots.len(), 1);
        let snap = &snapshots[0];
        assert!((snap.verlust_rate - 0.2).abs() < 1e-9, "Verlust {}", snap.verlust_rate);
        assert_eq!(snap.zaehler.empfangen_pakete, 8);
        assert_eq!(snap.pakete_empfangen, 8);
        assert!(snap.empfang_bps > 0);
    }

    #[test]
    fn zeitraum_zaehler_nach_snapshot_zurueck() {
        let (sink, _rx) = BroadcastSink::neu();
        let registry = LegRegistry::neu();
        let leg = leg_in(&registry, sink, 30020);
        let (tele, _snap_rx) = VoiceTelemetry::neu(registry);

        leg.rtp_empfangen(paket(1), Instant::now());
        let erster = tele.snapshots_erstellen();
        assert!(erster[0].empfang_bps > 0);

        let zweiter = tele.snapshots_erstellen();
        assert_eq!(zweiter[0].empfang_bps, 0, "Zeitraum muss nach Snapshot neu beginnen");
        assert_eq!(zweiter[0].pakete_empfangen, 0);
        assert_eq!(zweiter[0].zaehler.empfangen_pakete, 1);
    }

    #[tokio::test]
    async fn snapshot_broadcast_export() {
        let (sink, _rx) = BroadcastSink::neu();
        let registry = LegRegistry::neu();
        let leg = leg_in(&registry, sink, 30030);
        let (tele, mut rx) = VoiceTelemetry::neu(registry.clone());

        tele.snapshots_erstellen();
        let snap = rx.try_recv().expect("Snapshot sollte via Broadcast ankommen");
        assert_eq!(snap.leg, leg.id());

        registry.entfernen(&leg.id());
        assert!(tele.snapshots_erstellen().is_empty());
    }
}
