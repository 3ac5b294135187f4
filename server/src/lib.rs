//! voxbridge-server – Bibliotheks-Root
//!
//! Baut aus einer [`BridgeConfig`] die laufende Bruecke zusammen:
//! Media Server (RTP/RTCP), Call-Legs, Wiedergabe-Threads, Telemetrie,
//! Prometheus-Metriken. Stellt den Einstiegspunkt fuer Tests bereit.

pub mod config;

use anyhow::Result;
use config::BridgeConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use voxbridge_core::MediaEvent;
use voxbridge_observability::metrics::{
    EREIGNIS_AUSSER_REIHE, EREIGNIS_NICHT_VERDECKT, EREIGNIS_REPARIERT, EREIGNIS_RESET,
    EREIGNIS_VERWORFEN_ALT,
};
use voxbridge_observability::{observability_server_starten, BridgeMetrics};
use voxbridge_voice::{
    Bridge, BroadcastSink, CallLeg, LegRegistry, MediaServer, TelemetrieSnapshot, VoiceTelemetry,
};

/// Haelt die Konfiguration bis zum Start zusammen
pub struct Server {
    pub config: BridgeConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    pub async fn starten(self) -> Result<()> {
        let laufend = self.hochfahren().await?;

        tracing::info!("Bruecke laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Bruecke wird beendet");

        laufend.beenden().await;
        Ok(())
    }

    /// Startet alle Subsysteme und kehrt sofort zurueck
    ///
    /// Reihenfolge:
    /// 1. Metriken-Registry anlegen
    /// 2. RTP/RTCP-Socketpaar binden, Empfangs-Loop starten
    /// 3. Legs aus der Konfiguration registrieren
    /// 4. Wiedergabe-Threads beider Richtungen starten (bei zwei Legs)
    /// 5. Telemetrie, Metriken-Export und optional `/metrics` starten
    pub async fn hochfahren(self) -> Result<LaufendeBruecke> {
        let config = self.config;
        let metriken = BridgeMetrics::neu()?;
        let registry = LegRegistry::neu();

        let media = Arc::new(MediaServer::binden(config.media_server()?, registry.clone()).await?);
        tracing::info!(
            rtp = %media.rtp_adresse()?,
            rtcp = %media.rtcp_adresse()?,
            "Media Server bereit"
        );

        let (sink, ereignis_rx) = BroadcastSink::neu();
        let sink = Arc::new(sink);
        let mut legs = Vec::with_capacity(config.legs.len());
        for leg_config in config.leg_configs()? {
            let leg = Arc::new(CallLeg::neu(leg_config, sink.clone())?);
            tracing::info!(leg = %leg.id(), remote = %leg.remote(), format = %leg.format(), "Leg angelegt");
            registry.registrieren(leg.clone());
            legs.push(leg);
        }
        metriken.legs_active.set(registry.anzahl() as f64);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let empfang = {
            let media = media.clone();
            tokio::spawn(async move { media.empfangs_loop_starten(shutdown_rx).await })
        };

        let bridge = match legs.as_slice() {
            [a, b] => Some(Bridge::starten(
                a.clone(),
                b.clone(),
                &config.playout(),
                media.senke(),
            )?),
            _ => {
                tracing::warn!("Keine Legs konfiguriert, Bruecke leitet nichts weiter");
                None
            }
        };

        let (telemetrie, snapshot_rx) = VoiceTelemetry::neu(registry.clone());
        let mut hintergrund = vec![
            telemetrie.starten(config.telemetrie_intervall()),
            tokio::spawn(metriken_exportieren(
                snapshot_rx,
                metriken.clone(),
                registry.clone(),
            )),
            tokio::spawn(ereignisse_protokollieren(ereignis_rx, metriken.clone())),
        ];

        if config.observability.aktiviert {
            let adresse = config.observability_bind_adresse()?;
            let metriken = metriken.clone();
            hintergrund.push(tokio::spawn(async move {
                if let Err(err) = observability_server_starten(adresse, metriken).await {
                    tracing::error!(%adresse, "Observability-Server beendet: {err:#}");
                }
            }));
        }

        Ok(LaufendeBruecke {
            media,
            registry,
            bridge,
            telemetrie,
            metriken,
            shutdown_tx: Some(shutdown_tx),
            empfang,
            hintergrund,
        })
    }
}

/// Laufende Bruecke mit allen Hintergrund-Tasks
pub struct LaufendeBruecke {
    media: Arc<MediaServer>,
    registry: LegRegistry,
    bridge: Option<Bridge>,
    telemetrie: VoiceTelemetry,
    metriken: BridgeMetrics,
    shutdown_tx: Option<oneshot::Sender<()>>,
    empfang: JoinHandle<()>,
    hintergrund: Vec<JoinHandle<()>>,
}

impl LaufendeBruecke {
    pub fn rtp_adresse(&self) -> std::io::Result<SocketAddr> {
        self.media.rtp_adresse()
    }

    pub fn registry(&self) -> &LegRegistry {
        &self.registry
    }

    pub fn telemetrie(&self) -> &VoiceTelemetry {
        &self.telemetrie
    }

    pub fn metriken(&self) -> &BridgeMetrics {
        &self.metriken
    }

    /// Stoppt Wiedergabe, Empfang und Hintergrund-Tasks
    pub async fn beenden(mut self) {
        if let Some(bridge) = self.bridge.take() {
            // Stoppen joint die Wiedergabe-Threads
            if let Err(err) = tokio::task::spawn_blocking(move || drop(bridge)).await {
                tracing::error!("Wiedergabe-Threads nicht sauber beendet: {err}");
            }
        }
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.empfang).await {
            tracing::error!("Empfangs-Loop abgebrochen: {err}");
        }
        for task in self.hintergrund.drain(..) {
            task.abort();
        }
        for leg in self.registry.legs() {
            self.registry.entfernen(&leg.id());
        }
        tracing::info!("Bruecke beendet");
    }
}

/// Uebertraegt Telemetrie-Snapshots in die Prometheus-Metriken
async fn metriken_exportieren(
    mut rx: broadcast::Receiver<TelemetrieSnapshot>,
    metriken: BridgeMetrics,
    registry: LegRegistry,
) {
    loop {
        match rx.recv().await {
            Ok(snapshot) => {
                snapshot_verbuchen(&metriken, &snapshot);
                metriken.legs_active.set(registry.anzahl() as f64);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(verpasst = n, "Telemetrie-Export hinkt hinterher");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn snapshot_verbuchen(metriken: &BridgeMetrics, snapshot: &TelemetrieSnapshot) {
    metriken
        .rtp_packets_received
        .inc_by(snapshot.pakete_empfangen);
    metriken.rtp_packets_sent.inc_by(snapshot.pakete_gesendet);

    if snapshot.pakete_empfangen > 0 {
        metriken.packet_loss_ratio.observe(snapshot.verlust_rate);
        metriken.jitter_seconds.observe(snapshot.jitter_ms / 1000.0);
    }

    metriken
        .jitter_buffer_depth
        .with_label_values(&[&snapshot.leg.to_string()])
        .set(snapshot.buffer_fuellstand as i64);
    metriken.buffer_ereignis(EREIGNIS_VERWORFEN_ALT, snapshot.verworfen_alt);
    metriken.buffer_ereignis(EREIGNIS_AUSSER_REIHE, snapshot.ausser_reihe);
    metriken.buffer_ereignis(EREIGNIS_REPARIERT, snapshot.repariert);
    metriken.buffer_ereignis(EREIGNIS_NICHT_VERDECKT, snapshot.nicht_verdeckt);
    metriken.buffer_ereignis(EREIGNIS_RESET, snapshot.resets);

    let resample = snapshot.zaehler.playout.resample;
    if resample.calls > 0 {
        metriken
            .resample_seconds
            .observe(resample.avg_nanos as f64 / 1e9);
    }
}

/// Protokolliert Medien-Ereignisse aller Legs
async fn ereignisse_protokollieren(mut rx: broadcast::Receiver<MediaEvent>, metriken: BridgeMetrics) {
    loop {
        match rx.recv().await {
            Ok(MediaEvent::LegBeendet { leg }) => {
                tracing::info!(%leg, "Leg beendet");
                metriken.leg_vergessen(&leg.to_string());
            }
            Ok(MediaEvent::TelephoneEvent {
                leg,
                event,
                end,
                duration,
            }) => {
                tracing::info!(%leg, event, end, duration, "Telephone-Event");
            }
            Ok(MediaEvent::SpeakingChanged { leg, speaking }) => {
                tracing::debug!(%leg, speaking, "Sprachaktivitaet geaendert");
            }
            Ok(event) => tracing::debug!(leg = %event.leg(), ?event, "Medien-Ereignis"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(verpasst = n, "Ereignis-Protokoll hinkt hinterher");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
