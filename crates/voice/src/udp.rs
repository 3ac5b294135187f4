//! UDP Media Server – RTP/RTCP-Socketpaar und Empfangs-Loop
//!
//! Bindet RTP auf einem geraden Port und RTCP auf Port + 1, dekodiert
//! eingehende Datagramme ueber `UdpFramed` und gibt sie an das Leg der
//! Gegenstelle.
//!
//! ## Architektur
//!
//! ```text
//! RTP Socket ── UdpFramed<RtpDatagramCodec> ──> LegRegistry::leg_von_endpunkt()
//!                                                   |
//!                                                   v
//!                                              CallLeg::rtp_empfangen()
//!
//! RTCP Socket ── UdpFramed<RtcpDatagramCodec> ──> CallLeg::rtcp_empfangen()
//!             <── periodischer Report je Leg (SR/RR)
//!
//! Wiedergabe-Threads ── SendeQueue (mpsc) ──> Sende-Task ──> RTP Socket
//! ```
//!
//! Fehlerhafte Datagramme werden verworfen, der Loop laeuft weiter.

use crate::bridge::PaketSenke;
use crate::error::VoiceResult;
use crate::state::{LegRegistry, LEG_TIMEOUT};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio_util::udp::UdpFramed;
use voxbridge_protocol::{RtcpDatagramCodec, RtcpReport, RtpDatagramCodec, RtpFrame};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den Media Server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaServerConfig {
    /// RTP-Bind-Adresse (gerader Port, 0 = OS waehlt); RTCP liegt auf Port + 1
    pub bind_addr: SocketAddr,
    /// Groesse der Sende-Queue in Paketen
    pub send_queue_groesse: usize,
    /// Abstand der RTCP-Reports in Sekunden
    pub rtcp_intervall_secs: u64,
    /// Legs ohne Paket fuer so viele Sekunden werden entfernt
    pub leg_timeout_secs: u64,
}

impl Default for MediaServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 40000)),
            send_queue_groesse: 512,
            rtcp_intervall_secs: 5,
            leg_timeout_secs: LEG_TIMEOUT.as_secs(),
        }
    }
}

impl MediaServerConfig {
    /// Erstellt eine Konfiguration mit Standard-Werten
    pub fn neu(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// SendeQueue
// ---------------------------------------------------------------------------

/// Entkoppelt die Wiedergabe-Threads vom asynchronen Socket
///
/// `senden` blockiert nie; bei voller Queue wird das Paket verworfen.
#[derive(Debug, Clone)]
pub struct SendeQueue {
    tx: mpsc::Sender<(Vec<u8>, SocketAddr)>,
}

impl SendeQueue {
    /// Startet den Sende-Task auf dem gegebenen Socket
    pub fn starten(socket: Arc<UdpSocket>, groesse: usize) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<(Vec<u8>, SocketAddr)>(groesse.max(1));

        let task = tokio::spawn(async move {
            while let Some((daten, ziel)) = rx.recv().await {
                match socket.send_to(&daten, ziel).await {
                    Ok(_) => {
                        tracing::trace!(bytes = daten.len(), ziel = %ziel, "RTP-Paket gesendet");
                    }
                    Err(e) => {
                        tracing::warn!(fehler = %e, ziel = %ziel, "UDP-Sendefehler");
                    }
                }
            }
            tracing::debug!("Sende-Task beendet");
        });

        (Self { tx }, task)
    }
}

impl PaketSenke for SendeQueue {
    fn senden(&self, datagramm: Vec<u8>, ziel: SocketAddr) {
        if let Err(e) = self.tx.try_send((datagramm, ziel)) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!(ziel = %ziel, "Sende-Queue voll, Paket verworfen")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::debug!(ziel = %ziel, "Sende-Queue geschlossen")
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MediaServer
// ---------------------------------------------------------------------------

/// RTP/RTCP-Server fuer alle Legs der Registry
pub struct MediaServer {
    config: MediaServerConfig,
    rtp: Arc<UdpSocket>,
    rtcp: Arc<UdpSocket>,
    registry: LegRegistry,
    sende_queue: SendeQueue,
    sende_task: tokio::task::JoinHandle<()>,
}

impl MediaServer {
    /// Bindet das Socketpaar
    ///
    /// Bei Port 0 waehlt das OS den RTP-Port; RTCP folgt dann auf dem
    /// naechsten Port, sofern frei.
    pub async fn binden(config: MediaServerConfig, registry: LegRegistry) -> VoiceResult<Self> {
        let rtp = UdpSocket::bind(config.bind_addr).await?;
        let mut rtcp_addr = rtp.local_addr()?;
        rtcp_addr.set_port(rtcp_addr.port().wrapping_add(1));
        let rtcp = UdpSocket::bind(rtcp_addr).await?;

        let rtp = Arc::new(rtp);
        let (sende_queue, sende_task) = SendeQueue::starten(rtp.clone(), config.send_queue_groesse);

        tracing::info!(
            rtp = %rtp.local_addr()?,
            rtcp = %rtcp_addr,
            "Media Server gebunden"
        );
        Ok(Self {
            config,
            rtp,
            rtcp: Arc::new(rtcp),
            registry,
            sende_queue,
            sende_task,
        })
    }

    pub fn rtp_adresse(&self) -> std::io::Result<SocketAddr> {
        self.rtp.local_addr()
    }

    pub fn rtcp_adresse(&self) -> std::io::Result<SocketAddr> {
        self.rtcp.local_addr()
    }

    pub fn registry(&self) -> &LegRegistry {
        &self.registry
    }

    /// Senke fuer die Wiedergabe-Threads
    pub fn senke(&self) -> Arc<dyn PaketSenke> {
        Arc::new(self.sende_queue.clone())
    }

    /// Startet die Empfangs-Loop (laeuft bis `shutdown_rx` ein Signal sendet)
    pub async fn empfangs_loop_starten(&self, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut rtp = UdpFramed::new(self.rtp.clone(), RtpDatagramCodec);
        let mut rtcp = UdpFramed::new(self.rtcp.clone(), RtcpDatagramCodec);
        let mut rtcp_sende = UdpFramed::new(self.rtcp.clone(), RtcpDatagramCodec);

        let intervall = Duration::from_secs(self.config.rtcp_intervall_secs.max(1));
        let mut report_takt = tokio::time::interval(intervall);
        report_takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        report_takt.tick().await; // Ersten Tick ueberspringen

        tracing::info!("Media-Empfangs-Loop gestartet");

        loop {
            tokio::select! {
                paket = rtp.next() => match paket {
                    Some(Ok((frame, absender))) => self.rtp_verarbeiten(frame, absender),
                    Some(Err(e)) => tracing::debug!(fehler = %e, "Ungueltiges RTP-Paket verworfen"),
                    None => break,
                },

                report = rtcp.next() => match report {
                    Some(Ok((report, absender))) => self.rtcp_verarbeiten(&report, absender),
                    Some(Err(e)) => tracing::debug!(fehler = %e, "Ungueltiges RTCP-Paket verworfen"),
                    None => break,
                },

                _ = report_takt.tick() => {
                    self.reports_senden(&mut rtcp_sende).await;
                    let timeout = Duration::from_secs(self.config.leg_timeout_secs);
                    self.registry.inaktive_bereinigen(timeout);
                }

                _ = &mut shutdown_rx => {
                    tracing::info!("Media Server: Shutdown-Signal empfangen");
                    break;
                }
            }
        }

        tracing::info!("Media-Empfangs-Loop beendet");
    }

    // -----------------------------------------------------------------------
    // Interna
    // -----------------------------------------------------------------------

    /// Hot Path: schneller Ausstieg bei unbekanntem Absender
    fn rtp_verarbeiten(&self, frame: RtpFrame, absender: SocketAddr) {
        let Some(leg) = self.registry.leg_von_endpunkt(&absender) else {
            tracing::debug!(absender = %absender, ssrc = frame.ssrc, "Unbekannter Absender");
            return;
        };
        let ssrc = frame.ssrc;
        let sequence = frame.sequence;
        let ergebnis = leg.rtp_empfangen(frame, Instant::now());
        self.registry.paket_empfangen(&leg.id(), ssrc);
        tracing::trace!(leg = %leg.id(), sequence, ssrc, ?ergebnis, "RTP-Paket empfangen");
    }

    fn rtcp_verarbeiten(&self, report: &RtcpReport, absender: SocketAddr) {
        let mut rtp_absender = absender;
        rtp_absender.set_port(absender.port().wrapping_sub(1));
        let leg = self
            .registry
            .leg_von_ssrc(report.ssrc())
            .or_else(|| self.registry.leg_von_endpunkt(&rtp_absender));
        match leg {
            Some(leg) => leg.rtcp_empfangen(report, Instant::now()),
            None => tracing::debug!(absender = %absender, ssrc = report.ssrc(), "RTCP von unbekannter Quelle"),
        }
    }

    async fn reports_senden(&self, sink: &mut UdpFramed<RtcpDatagramCodec, Arc<UdpSocket>>) {
        let jetzt = Instant::now();
        for leg in self.registry.legs() {
            let report = leg.rtcp_report(jetzt);
            if let Err(e) = sink.send((report, leg.rtcp_remote())).await {
                tracing::warn!(leg = %leg.id(), fehler = %e, "RTCP-Report nicht gesendet");
            }
        }
    }
}

impl Drop for MediaServer {
    fn drop(&mut self) {
        self.sende_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leg::{CallLeg, LegConfig};
    use crate::telemetry::BroadcastSink;
    use std::net::{IpAddr, Ipv4Addr};
    use voxbridge_core::MediaFormat;
    use voxbridge_protocol::decode_rtcp;

    fn localhost(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn server_binden_rtcp_auf_folgeport() {
        let server = MediaServer::binden(MediaServerConfig::neu(localhost(0)), LegRegistry::neu())
            .await
            .expect("Server muss binden koennen");
        let rtp = server.rtp_adresse().unwrap();
        let rtcp = server.rtcp_adresse().unwrap();
        assert_ne!(rtp.port(), 0, "OS muss einen Port zuweisen");
        assert_eq!(rtcp.port(), rtp.port() + 1);
    }

    #[tokio::test]
    async fn sende_queue_liefert_datagramm() {
        let socket = Arc::new(UdpSocket::bind(localhost(0)).await.unwrap());
        let empfaenger = UdpSocket::bind(localhost(0)).await.unwrap();
        let (queue, task) = SendeQueue::starten(socket, 8);

        queue.senden(vec![1, 2, 3], empfaenger.local_addr().unwrap());
        let mut buf = [0u8; 16];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), empfaenger.recv_from(&mut buf))
            .await
            .expect("Datagramm erwartet")
            .unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3]);
        task.abort();
    }

    #[tokio::test]
    async fn rtp_erreicht_leg_und_rtcp_geht_raus() {
        let registry = LegRegistry::neu();
        let mut config = MediaServerConfig::neu(localhost(0));
        config.rtcp_intervall_secs = 1;
        let server = Arc::new(MediaServer::binden(config, registry.clone()).await.unwrap());
        let server_rtp = server.rtp_adresse().unwrap();

        // Gegenstelle: RTP-Socket und RTCP auf Port + 1
        let gegen_rtp = UdpSocket::bind(localhost(0)).await.unwrap();
        let gegen_addr = gegen_rtp.local_addr().unwrap();
        let gegen_rtcp = match UdpSocket::bind(localhost(gegen_addr.port() + 1)).await {
            Ok(s) => s,
            Err(_) => return, // Folgeport belegt, Test nicht aussagekraeftig
        };

        let (sink, _rx) = BroadcastSink::neu();
        let format = MediaFormat::by_payload(0).unwrap();
        let leg = Arc::new(CallLeg::neu(LegConfig::neu(format, gegen_addr), Arc::new(sink)).unwrap());
        registry.registrieren(leg.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let s = server.clone();
        let loop_task = tokio::spawn(async move { s.empfangs_loop_starten(shutdown_rx).await });

        for seq in 1..=3u16 {
            let frame = RtpFrame::new(0, seq, seq as u32 * 160, 0x4242, vec![0xFF; 160]);
            gegen_rtp.send_to(&frame.encode(), server_rtp).await.unwrap();
        }
        // Muell wird verworfen, der Loop laeuft weiter
        gegen_rtp.send_to(&[0x00, 0x01], server_rtp).await.unwrap();

        let mut buf = [0u8; 1500];
        let (len, _) = tokio::time::timeout(Duration::from_secs(3), gegen_rtcp.recv_from(&mut buf))
            .await
            .expect("RTCP-Report erwartet")
            .unwrap();
        match decode_rtcp(&buf[..len]).unwrap() {
            RtcpReport::Receiver(rr) => {
                assert_eq!(rr.blocks.len(), 1);
                assert_eq!(rr.blocks[0].ssrc, 0x4242);
            }
            andere => panic!("Receiver Report erwartet, war {andere:?}"),
        }
        assert_eq!(leg.snapshot().empfangen_pakete, 3);
        assert_eq!(registry.leg_von_ssrc(0x4242).map(|l| l.id()), Some(leg.id()));

        let _ = shutdown_tx.send(());
        loop_task.await.unwrap();
    }
}
