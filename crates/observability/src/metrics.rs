//! Prometheus-kompatible Metriken fuer voxbridge
//!
//! Registrierte Metriken:
//! - `voxbridge_legs_active` – Gauge: Registrierte Call-Legs
//! - `voxbridge_rtp_packets_received_total` – Counter: Empfangene RTP-Pakete
//! - `voxbridge_rtp_packets_sent_total` – Counter: Gesendete RTP-Pakete
//! - `voxbridge_packet_loss_ratio` – Histogram: Paketverlust-Rate je Zeitraum
//! - `voxbridge_jitter_seconds` – Histogram: Interarrival-Jitter
//! - `voxbridge_jitter_buffer_depth` – Gauge: Fuellstand (leg)
//! - `voxbridge_jitter_buffer_events_total` – Counter: Buffer-Ereignisse (ereignis)
//! - `voxbridge_resample_seconds` – Histogram: Mittlere Dauer eines Resample-Aufrufs
//! - `process_*` – Prozess-Metriken (nur Linux)

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

/// Label-Werte fuer `voxbridge_jitter_buffer_events_total`
pub const EREIGNIS_VERWORFEN_ALT: &str = "verworfen_alt";
pub const EREIGNIS_AUSSER_REIHE: &str = "ausser_reihe";
pub const EREIGNIS_REPARIERT: &str = "repariert";
pub const EREIGNIS_NICHT_VERDECKT: &str = "nicht_verdeckt";
pub const EREIGNIS_RESET: &str = "reset";

/// Alle voxbridge-Prometheus-Metriken
#[derive(Clone)]
pub struct BridgeMetrics {
    pub registry: Arc<Registry>,

    pub legs_active: Gauge,
    pub rtp_packets_received: IntCounter,
    pub rtp_packets_sent: IntCounter,
    pub packet_loss_ratio: Histogram,
    pub jitter_seconds: Histogram,
    pub jitter_buffer_depth: IntGaugeVec,
    pub jitter_buffer_events: IntCounterVec,
    pub resample_seconds: Histogram,
}

impl BridgeMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let legs_active = Gauge::with_opts(Opts::new(
            "voxbridge_legs_active",
            "Anzahl registrierter Call-Legs",
        ))?;
        registry.register(Box::new(legs_active.clone()))?;

        let rtp_packets_received = IntCounter::with_opts(Opts::new(
            "voxbridge_rtp_packets_received_total",
            "Gesamtanzahl empfangener RTP-Pakete",
        ))?;
        registry.register(Box::new(rtp_packets_received.clone()))?;

        let rtp_packets_sent = IntCounter::with_opts(Opts::new(
            "voxbridge_rtp_packets_sent_total",
            "Gesamtanzahl gesendeter RTP-Pakete",
        ))?;
        registry.register(Box::new(rtp_packets_sent.clone()))?;

        let packet_loss_ratio = Histogram::with_opts(
            HistogramOpts::new(
                "voxbridge_packet_loss_ratio",
                "Paketverlust-Rate je Telemetrie-Zeitraum (0.0 bis 1.0)",
            )
            .buckets(vec![0.0, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0]),
        )?;
        registry.register(Box::new(packet_loss_ratio.clone()))?;

        let jitter_seconds = Histogram::with_opts(
            HistogramOpts::new("voxbridge_jitter_seconds", "Interarrival-Jitter in Sekunden")
                .buckets(vec![0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1]),
        )?;
        registry.register(Box::new(jitter_seconds.clone()))?;

        let jitter_buffer_depth = IntGaugeVec::new(
            Opts::new(
                "voxbridge_jitter_buffer_depth",
                "Aktueller Fuellstand des Jitter Buffers in Paketen",
            ),
            &["leg"],
        )?;
        registry.register(Box::new(jitter_buffer_depth.clone()))?;

        let jitter_buffer_events = IntCounterVec::new(
            Opts::new(
                "voxbridge_jitter_buffer_events_total",
                "Ereignisse der Jitter Buffer (verworfen, nachsortiert, verdeckt, reset)",
            ),
            &["ereignis"],
        )?;
        registry.register(Box::new(jitter_buffer_events.clone()))?;

        let resample_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "voxbridge_resample_seconds",
                "Mittlere Dauer eines Resample-Aufrufs in Sekunden",
            )
            .buckets(vec![1e-6, 5e-6, 1e-5, 5e-5, 1e-4, 5e-4, 1e-3]),
        )?;
        registry.register(Box::new(resample_seconds.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry: Arc::new(registry),
            legs_active,
            rtp_packets_received,
            rtp_packets_sent,
            packet_loss_ratio,
            jitter_seconds,
            jitter_buffer_depth,
            jitter_buffer_events,
            resample_seconds,
        })
    }

    /// Zaehlt `anzahl` Buffer-Ereignisse der Art `ereignis`
    pub fn buffer_ereignis(&self, ereignis: &str, anzahl: u64) {
        if anzahl > 0 {
            self.jitter_buffer_events
                .with_label_values(&[ereignis])
                .inc_by(anzahl);
        }
    }

    /// Entfernt die Leg-bezogenen Zeitreihen eines beendeten Legs
    pub fn leg_vergessen(&self, leg: &str) {
        let _ = self.jitter_buffer_depth.remove_label_values(&[leg]);
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: BridgeMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<BridgeMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = BridgeMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn zwei_instanzen_kollidieren_nicht() {
        // Jede Instanz hat ihre eigene Registry
        let a = BridgeMetrics::neu().unwrap();
        let b = BridgeMetrics::neu().unwrap();
        a.rtp_packets_received.inc();
        assert_eq!(b.rtp_packets_received.get(), 0);
    }

    #[test]
    fn paketzaehler_inkrementieren() {
        let metriken = BridgeMetrics::neu().unwrap();
        metriken.rtp_packets_received.inc();
        metriken.rtp_packets_received.inc_by(9);
        metriken.rtp_packets_sent.inc_by(3);
        assert_eq!(metriken.rtp_packets_received.get(), 10);
        assert_eq!(metriken.rtp_packets_sent.get(), 3);
    }

    #[test]
    fn buffer_ereignisse_mit_labels() {
        let metriken = BridgeMetrics::neu().unwrap();
        metriken.buffer_ereignis(EREIGNIS_VERWORFEN_ALT, 2);
        metriken.buffer_ereignis(EREIGNIS_VERWORFEN_ALT, 1);
        metriken.buffer_ereignis(EREIGNIS_RESET, 0);

        let wert = metriken
            .jitter_buffer_events
            .with_label_values(&[EREIGNIS_VERWORFEN_ALT])
            .get();
        assert_eq!(wert, 3);
    }

    #[test]
    fn leg_vergessen_entfernt_zeitreihe() {
        let metriken = BridgeMetrics::neu().unwrap();
        metriken.jitter_buffer_depth.with_label_values(&["a"]).set(4);
        metriken.leg_vergessen("a");
        metriken.leg_vergessen("unbekannt");

        let output = metriken.exportieren().unwrap();
        assert!(!output.contains("leg=\"a\""));
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = BridgeMetrics::neu().unwrap();
        metriken.legs_active.set(2.0);
        metriken.rtp_packets_sent.inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("voxbridge_legs_active 2"));
        assert!(output.contains("voxbridge_rtp_packets_sent_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn alle_metriken_in_registry_registriert() {
        let metriken = BridgeMetrics::neu().unwrap();

        // Vec-Metriken erscheinen in gather() erst nach dem ersten Label-Zugriff
        metriken.jitter_buffer_depth.with_label_values(&["x"]).set(1);
        metriken.buffer_ereignis(EREIGNIS_REPARIERT, 1);

        let families = metriken.registry.gather();
        let namen: Vec<&str> = families.iter().map(|f| f.get_name()).collect();

        assert!(namen.contains(&"voxbridge_legs_active"));
        assert!(namen.contains(&"voxbridge_rtp_packets_received_total"));
        assert!(namen.contains(&"voxbridge_rtp_packets_sent_total"));
        assert!(namen.contains(&"voxbridge_packet_loss_ratio"));
        assert!(namen.contains(&"voxbridge_jitter_seconds"));
        assert!(namen.contains(&"voxbridge_jitter_buffer_depth"));
        assert!(namen.contains(&"voxbridge_jitter_buffer_events_total"));
        assert!(namen.contains(&"voxbridge_resample_seconds"));
    }

    #[tokio::test]
    async fn metrics_endpunkt_liefert_textformat() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let metriken = BridgeMetrics::neu().unwrap();
        metriken.legs_active.set(1.0);
        let antwort = metrics_router(metriken)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(antwort.status(), axum::http::StatusCode::OK);
        let typ = antwort.headers()[axum::http::header::CONTENT_TYPE].clone();
        assert_eq!(typ, "text/plain; version=0.0.4");
    }
}
