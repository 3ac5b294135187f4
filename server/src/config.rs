//! Bruecken-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass die Bruecke ohne Konfigurationsdatei
//! lauffaehig ist (dann allerdings ohne Legs).
//!
//! ```toml
//! [netzwerk]
//! bind_adresse = "0.0.0.0"
//! rtp_port = 40000
//!
//! [jitter]
//! min_size = 3
//! max_size = 15
//! plc = "duplicate"
//!
//! [resampler]
//! algorithmus = "moving_average"
//! order = 3
//! adjustment = 0.05
//!
//! [[legs]]
//! remote = "192.0.2.10:5004"
//! payload_type = 0
//! ```

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use voxbridge_audio::{FilterKind, VadConfig};
use voxbridge_core::{MediaFormat, PACKET_PERIOD};
use voxbridge_voice::{
    JitterBufferConfig, LegConfig, MediaServerConfig, PlayoutConfig, TickerKind,
};

/// Vollstaendige Bruecken-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Netzwerk-Einstellungen (RTP/RTCP)
    pub netzwerk: NetzwerkEinstellungen,
    /// Jitter Buffer aller Legs
    pub jitter: JitterBufferConfig,
    /// Tiefpass des Resamplers
    pub resampler: FilterKind,
    /// Sprach-Erkennung
    pub vad: VadEinstellungen,
    /// Sendetakt
    pub ticker: TickerEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Telemetrie)
    pub observability: ObservabilityEinstellungen,
    /// Gegenstellen der Bruecke (keine oder genau zwei)
    pub legs: Vec<LegEinstellungen>,
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer RTP, RTCP und Metriken
    pub bind_adresse: String,
    /// RTP-Port (gerade); RTCP liegt auf Port + 1. 0 = OS waehlt
    pub rtp_port: u16,
    /// Groesse der Sende-Queue in Paketen
    pub send_queue_groesse: usize,
    /// Abstand der RTCP-Reports in Sekunden
    pub rtcp_intervall_secs: u64,
    /// Legs ohne Paket fuer so viele Sekunden werden entfernt
    pub leg_timeout_secs: u64,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        let server = MediaServerConfig::default();
        Self {
            bind_adresse: "0.0.0.0".into(),
            rtp_port: server.bind_addr.port(),
            send_queue_groesse: server.send_queue_groesse,
            rtcp_intervall_secs: server.rtcp_intervall_secs,
            leg_timeout_secs: server.leg_timeout_secs,
        }
    }
}

/// VAD-Einstellungen
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct VadEinstellungen {
    pub aktiviert: bool,
    #[serde(flatten)]
    pub schwellen: VadConfig,
}

impl Default for VadEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            schwellen: VadConfig::default(),
        }
    }
}

/// Ticker-Einstellungen
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TickerEinstellungen {
    /// "sleep" oder "busy_wait"
    pub art: TickerKind,
    /// Sendetakt in Millisekunden
    pub periode_ms: u64,
}

impl Default for TickerEinstellungen {
    fn default() -> Self {
        Self {
            art: TickerKind::default(),
            periode_ms: PACKET_PERIOD.as_millis() as u64,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Filter-Direktive, z.B. "info" oder "voxbridge_voice=debug"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Metriken-Server
    pub aktiviert: bool,
    /// Port fuer `/metrics` (Standard: 9300)
    pub port: u16,
    /// Abstand der Telemetrie-Snapshots in Sekunden
    pub telemetrie_intervall_secs: u64,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
            telemetrie_intervall_secs: 5,
        }
    }
}

/// Eine Gegenstelle mit ausgehandeltem Payload-Typ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegEinstellungen {
    /// RTP-Endpunkt der Gegenstelle
    pub remote: SocketAddr,
    /// Payload-Typ aus der Format-Tabelle (z.B. 0 = PCMU)
    pub payload_type: u8,
}

impl BridgeConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .with_context(|| format!("Konfigurationsfehler in '{pfad}'"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => bail!("Konfigurationsdatei '{pfad}' nicht lesbar: {e}"),
        };
        config.pruefen()?;
        Ok(config)
    }

    pub fn aus_toml(inhalt: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(inhalt)?)
    }

    /// Prueft Werte, die serde nicht abfangen kann
    pub fn pruefen(&self) -> anyhow::Result<()> {
        self.bind_ip()?;
        if self.netzwerk.rtp_port % 2 != 0 {
            bail!(
                "RTP-Port muss gerade sein (RTCP liegt auf Port + 1), war {}",
                self.netzwerk.rtp_port
            );
        }
        if self.jitter.max_size <= self.jitter.min_size {
            bail!(
                "jitter.max_size ({}) muss groesser als jitter.min_size ({}) sein",
                self.jitter.max_size,
                self.jitter.min_size
            );
        }
        if self.ticker.periode_ms == 0 {
            bail!("ticker.periode_ms darf nicht 0 sein");
        }
        if !matches!(self.legs.len(), 0 | 2) {
            bail!(
                "Eine Bruecke braucht genau zwei Legs, konfiguriert sind {}",
                self.legs.len()
            );
        }
        for leg in &self.legs {
            MediaFormat::by_payload(leg.payload_type)
                .with_context(|| format!("Leg {}", leg.remote))?;
        }
        Ok(())
    }

    fn bind_ip(&self) -> anyhow::Result<IpAddr> {
        self.netzwerk
            .bind_adresse
            .parse()
            .with_context(|| format!("Ungueltige Bind-Adresse '{}'", self.netzwerk.bind_adresse))
    }

    /// Konfiguration des Media Servers (RTP/RTCP-Socketpaar)
    pub fn media_server(&self) -> anyhow::Result<MediaServerConfig> {
        Ok(MediaServerConfig {
            bind_addr: SocketAddr::new(self.bind_ip()?, self.netzwerk.rtp_port),
            send_queue_groesse: self.netzwerk.send_queue_groesse,
            rtcp_intervall_secs: self.netzwerk.rtcp_intervall_secs,
            leg_timeout_secs: self.netzwerk.leg_timeout_secs,
        })
    }

    /// Konfiguration beider Wiedergabe-Richtungen
    pub fn playout(&self) -> PlayoutConfig {
        PlayoutConfig {
            filter: self.resampler,
            vad: self.vad.aktiviert.then_some(self.vad.schwellen),
            ticker: self.ticker.art,
            periode: Duration::from_millis(self.ticker.periode_ms),
        }
    }

    /// Leg-Konfigurationen in Reihenfolge der Datei
    pub fn leg_configs(&self) -> anyhow::Result<Vec<LegConfig>> {
        self.legs
            .iter()
            .map(|leg| {
                let format = MediaFormat::by_payload(leg.payload_type)
                    .with_context(|| format!("Leg {}", leg.remote))?;
                let mut config = LegConfig::neu(format, leg.remote);
                config.jitter = self.jitter;
                Ok(config)
            })
            .collect()
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_ip()?, self.observability.port))
    }

    pub fn telemetrie_intervall(&self) -> Duration {
        Duration::from_secs(self.observability.telemetrie_intervall_secs.max(1))
    }
}
