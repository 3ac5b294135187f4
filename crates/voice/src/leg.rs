//! Call-Leg: Empfang, Wiedergabe und Senden einer RTP-Gegenstelle
//!
//! ```text
//! Empfang (tokio)                       Wiedergabe (eigener Thread, Ticker)
//! RtpFrame                              JitterBuffer::take_first()
//!   |  SSRC, Comfort Noise, DTMF          |  μ-law → linear
//!   v                                     |  VAD
//! JitterBuffer::insert()  <-- Mutex -->   |  Resampler → Zielformat
//!                                         v
//!                                       LegSender (Ziel-Leg) → RtpFrame
//! ```
//!
//! Empfang und Wiedergabe teilen sich nur den Jitter Buffer. Resampler und
//! VAD gehoeren exklusiv dem Wiedergabe-Pfad.

use crate::error::VoiceResult;
use crate::jitter_buffer::{
    InsertOutcome, JitterBuffer, JitterBufferConfig, JitterBufferStatistik, JitterEntry, Payload,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use voxbridge_audio::companding::ulaw_bytes_to_linear;
use voxbridge_audio::{
    FilterKind, PayloadCodec, ResampleStats, SampleRateConverter, SpeechCodec, VadConfig,
    VoiceActivityDetector,
};
use voxbridge_core::{EventSink, LegId, MediaEvent, MediaFormat};
use voxbridge_protocol::rtcp::ntp_now;
use voxbridge_protocol::{
    ReceiverReport, ReceptionStats, RtcpReport, RtpFrame, RtpSequencer, SenderInfo, SenderReport,
    TelephoneEvent,
};

/// Pegel der gesendeten Comfort-Noise-Pakete in -dBov
pub const COMFORT_NOISE_LEVEL: u8 = 70;

/// Erzeugt eine Speex-Instanz pro Richtung
pub type SpeechCodecFactory = Arc<dyn Fn() -> Box<dyn SpeechCodec> + Send + Sync>;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Aufbauparameter eines Call-Legs (aus der Signalisierung)
#[derive(Clone)]
pub struct LegConfig {
    /// Ausgehandeltes Medienformat der Gegenstelle
    pub format: &'static MediaFormat,
    /// RTP-Endpunkt der Gegenstelle; RTCP liegt auf Port + 1
    pub remote: SocketAddr,
    pub jitter: JitterBufferConfig,
    /// Externer Speex-Codec, nur fuer Speex-Formate noetig
    pub speex: Option<SpeechCodecFactory>,
}

impl std::fmt::Debug for LegConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegConfig")
            .field("format", &self.format.to_string())
            .field("remote", &self.remote)
            .field("jitter", &self.jitter)
            .field("speex", &self.speex.is_some())
            .finish()
    }
}

impl LegConfig {
    pub fn neu(format: &'static MediaFormat, remote: SocketAddr) -> Self {
        Self {
            format,
            remote,
            jitter: JitterBufferConfig::default(),
            speex: None,
        }
    }

    fn codec(&self) -> VoiceResult<PayloadCodec> {
        let speex = self.speex.as_ref().map(|f| f());
        Ok(PayloadCodec::for_format(self.format, speex)?)
    }
}

// ---------------------------------------------------------------------------
// Empfang
// ---------------------------------------------------------------------------

/// Ergebnis der Verarbeitung eines empfangenen RTP-Pakets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Empfangen {
    /// Nutzlast in den Jitter Buffer gelegt
    Medien(InsertOutcome),
    /// Comfort Noise: Stille-Platzhalter eingefuegt
    ComfortNoise { level: u8 },
    /// Telephone-Event gemeldet
    TelephoneEvent(TelephoneEvent),
    /// Paket verworfen (falscher Payload-Typ, defekte Nutzlast)
    Verworfen,
}

/// Empfangszustand eines Legs
struct LegReceiver {
    format: &'static MediaFormat,
    codec: PayloadCodec,
    ssrc: Option<u32>,
    start: Instant,
    letzte_ankunft: Option<Instant>,
    stats: ReceptionStats,
    /// (Zeitstempel, Ende gemeldet) des laufenden Telephone-Events
    laufendes_event: Option<(u32, bool)>,
    pakete: u64,
    bytes: u64,
    verworfen: u64,
}

impl LegReceiver {
    fn neu(format: &'static MediaFormat, codec: PayloadCodec) -> Self {
        Self {
            format,
            codec,
            ssrc: None,
            start: Instant::now(),
            letzte_ankunft: None,
            stats: ReceptionStats::new(format.sample_rate),
            laufendes_event: None,
            pakete: 0,
            bytes: 0,
            verworfen: 0,
        }
    }

    fn verarbeiten(
        &mut self,
        leg: LegId,
        frame: RtpFrame,
        jetzt: Instant,
        buffer: &Mutex<JitterBuffer>,
        events: &dyn EventSink,
    ) -> Empfangen {
        if self.ssrc.is_some_and(|s| s != frame.ssrc) {
            tracing::info!(
                leg = %leg,
                alt = self.ssrc.unwrap_or_default(),
                neu = frame.ssrc,
                "SSRC gewechselt, Jitter Buffer wird zurueckgesetzt"
            );
            buffer.lock().reset();
            self.letzte_ankunft = None;
            self.laufendes_event = None;
        }
        self.ssrc = Some(frame.ssrc);
        self.pakete += 1;
        self.bytes += frame.payload.len() as u64;
        self.stats.update(
            frame.ssrc,
            frame.sequence,
            frame.timestamp,
            jetzt.saturating_duration_since(self.start),
        );

        let elapsed = self
            .letzte_ankunft
            .map(|t| jetzt.saturating_duration_since(t))
            .unwrap_or(Duration::ZERO);
        self.letzte_ankunft = Some(jetzt);

        if frame.is_comfort_noise() {
            let level = frame.noise_level().unwrap_or(COMFORT_NOISE_LEVEL);
            buffer.lock().insert(frame.sequence, elapsed, None);
            events.melden(MediaEvent::ComfortNoise { leg, level });
            return Empfangen::ComfortNoise { level };
        }

        if frame.payload_type != self.format.payload {
            let ist_event = MediaFormat::by_payload(frame.payload_type)
                .map(|f| f.telephone_event)
                .unwrap_or(false);
            if ist_event {
                // Sequenz bleibt lueckenlos, Audio pausiert
                buffer.lock().insert(frame.sequence, elapsed, None);
                return self.telephone_event(leg, &frame, events);
            }
            self.verworfen += 1;
            tracing::debug!(
                leg = %leg,
                payload_type = frame.payload_type,
                erwartet = self.format.payload,
                "Unerwarteter Payload-Typ"
            );
            return Empfangen::Verworfen;
        }

        let payload = if self.codec.is_companded() {
            Payload::Companded(frame.payload)
        } else {
            match self.codec.decode(&frame.payload) {
                Ok(samples) => Payload::Linear(samples),
                Err(e) => {
                    // Luecke bleibt, die Verdeckung uebernimmt
                    self.verworfen += 1;
                    tracing::debug!(leg = %leg, fehler = %e, "Nutzlast nicht dekodierbar");
                    return Empfangen::Verworfen;
                }
            }
        };
        Empfangen::Medien(buffer.lock().insert(frame.sequence, elapsed, Some(payload)))
    }

    /// Meldet Beginn und Ende eines Events je einmal; RFC 4733 wiederholt
    /// Pakete mit demselben Zeitstempel
    fn telephone_event(&mut self, leg: LegId, frame: &RtpFrame, events: &dyn EventSink) -> Empfangen {
        let event = match TelephoneEvent::decode(&frame.payload) {
            Ok(e) => e,
            Err(e) => {
                self.verworfen += 1;
                tracing::debug!(leg = %leg, fehler = %e, "Defektes Telephone-Event");
                return Empfangen::Verworfen;
            }
        };

        let melden = match self.laufendes_event {
            Some((ts, ende_gemeldet)) if ts == frame.timestamp => event.end && !ende_gemeldet,
            _ => true,
        };
        if melden {
            self.laufendes_event = Some((frame.timestamp, event.end));
            tracing::debug!(leg = %leg, taste = ?event.digit(), ende = event.end, "Telephone-Event");
            events.melden(MediaEvent::TelephoneEvent {
                leg,
                event: event.event,
                end: event.end,
                duration: event.duration,
            });
        }
        Empfangen::TelephoneEvent(event)
    }
}

// ---------------------------------------------------------------------------
// Senden
// ---------------------------------------------------------------------------

/// Ein Block aus dem Wiedergabe-Pfad
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayoutBlock {
    /// Lineare Samples im Zielformat
    Audio(Vec<i32>),
    /// Gewollte Stille (Comfort Noise, Vorlauf)
    Stille,
    /// Verlust ohne Verdeckung; die Ausgabe wird verkuerzt
    Luecke,
    /// Jitter Buffer leer
    Leer,
}

/// Sendezustand eines Legs (Richtung zur Gegenstelle)
struct LegSender {
    format: &'static MediaFormat,
    codec: PayloadCodec,
    sequencer: RtpSequencer,
    pakete: u32,
    oktette: u32,
    letzte_sendung: Option<Instant>,
}

impl LegSender {
    fn frame_fuer(&mut self, block: PlayoutBlock, jetzt: Instant) -> Option<RtpFrame> {
        let frames_pro_paket = self.format.frames_per_packet() as u32;
        let frame = match block {
            PlayoutBlock::Audio(samples) => {
                let frames = (samples.len() / self.format.channels as usize) as u32;
                match self.codec.encode(&samples) {
                    Ok(bytes) => Some(self.sequencer.next_frame(bytes, frames)),
                    Err(e) => {
                        tracing::warn!(fehler = %e, "Kodieren fehlgeschlagen, Paket entfaellt");
                        self.sequencer.skip(frames);
                        None
                    }
                }
            }
            PlayoutBlock::Stille | PlayoutBlock::Leer => self
                .sequencer
                .comfort_noise(COMFORT_NOISE_LEVEL, frames_pro_paket),
            PlayoutBlock::Luecke => None,
        };
        if let Some(f) = &frame {
            self.pakete = self.pakete.wrapping_add(1);
            self.oktette = self.oktette.wrapping_add(f.payload.len() as u32);
            self.letzte_sendung = Some(jetzt);
        }
        frame
    }

    fn sender_info(&self, ntp: u64) -> SenderInfo {
        SenderInfo {
            ntp_timestamp: ntp,
            rtp_timestamp: self.sequencer.timestamp(),
            packet_count: self.pakete,
            octet_count: self.oktette,
        }
    }
}

// ---------------------------------------------------------------------------
// Wiedergabe
// ---------------------------------------------------------------------------

/// Statistik des Wiedergabe-Pfads
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayoutStatistik {
    pub audio: u64,
    pub stille: u64,
    pub luecken: u64,
    pub leer: u64,
    pub resample: ResampleStats,
}

/// Wiedergabe-Pfad einer Richtung (Quell-Leg → Ziel-Format)
///
/// Gehoert exklusiv dem Wiedergabe-Thread.
pub struct LegPlayout {
    leg: LegId,
    resampler: SampleRateConverter,
    samples_per_packet: usize,
    vad: Option<VoiceActivityDetector>,
    events: Arc<dyn EventSink>,
    statistik: PlayoutStatistik,
}

impl LegPlayout {
    pub fn neu(
        quelle: &CallLeg,
        ziel: &MediaFormat,
        filter: FilterKind,
        vad: Option<VadConfig>,
    ) -> VoiceResult<Self> {
        let format = quelle.format();
        let vad = vad
            .map(|config| VoiceActivityDetector::new(format.sample_rate, format.channels, config))
            .transpose()?;
        Ok(Self {
            leg: quelle.id(),
            resampler: SampleRateConverter::between(format, ziel, filter)?,
            samples_per_packet: format.samples_per_packet(),
            vad,
            events: quelle.events.clone(),
            statistik: PlayoutStatistik::default(),
        })
    }

    /// Entnimmt den naechsten Eintrag und bereitet ihn fuer das Ziel auf
    pub fn naechster_block(&mut self, buffer: &Mutex<JitterBuffer>) -> PlayoutBlock {
        let eintrag = buffer.lock().take_first();
        let block = match eintrag {
            None => {
                self.pause();
                self.statistik.leer += 1;
                PlayoutBlock::Leer
            }
            Some(JitterEntry {
                payload: Some(payload),
                ..
            }) => {
                let linear = match payload {
                    Payload::Linear(samples) => samples,
                    Payload::Companded(bytes) => {
                        // wie beim Dekodieren von PCM: kurze Pakete mit Stille auffuellen
                        let mut samples = ulaw_bytes_to_linear(&bytes);
                        if samples.len() < self.samples_per_packet {
                            samples.resize(self.samples_per_packet, 0);
                        }
                        samples
                    }
                };
                self.sprache_pruefen(&linear);
                self.statistik.audio += 1;
                PlayoutBlock::Audio(self.resampler.resample(&linear).into_owned())
            }
            Some(e) if e.missing => {
                self.statistik.luecken += 1;
                PlayoutBlock::Luecke
            }
            Some(_) => {
                self.pause();
                self.statistik.stille += 1;
                PlayoutBlock::Stille
            }
        };
        self.statistik.resample = self.resampler.stats();
        block
    }

    pub fn statistik(&self) -> PlayoutStatistik {
        self.statistik
    }

    fn sprache_pruefen(&mut self, samples: &[i32]) {
        if let Some(vad) = self.vad.as_mut() {
            if vad.detect(samples) {
                self.events.melden(MediaEvent::SpeakingChanged {
                    leg: self.leg,
                    speaking: vad.is_speaking(),
                });
            }
        }
    }

    /// Stille unterbricht den Strom: Resampler-Historie verwerfen, VAD
    /// zuruecksetzen
    fn pause(&mut self) {
        self.resampler.reset();
        if let Some(vad) = self.vad.as_mut() {
            if vad.reset() {
                self.events.melden(MediaEvent::SpeakingChanged {
                    leg: self.leg,
                    speaking: false,
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CallLeg
// ---------------------------------------------------------------------------

/// Momentaufnahme eines Legs fuer Telemetrie
#[derive(Debug, Clone, PartialEq)]
pub struct LegSnapshot {
    pub leg: LegId,
    pub remote: SocketAddr,
    pub payload_type: u8,
    pub empfangen_pakete: u64,
    pub empfangen_bytes: u64,
    pub verworfen: u64,
    pub kumulativ_verloren: i64,
    /// Interarrival-Jitter in Zeitstempel-Einheiten
    pub rtp_jitter: u32,
    pub gesendet_pakete: u32,
    pub gesendet_oktette: u32,
    pub jitter_buffer: JitterBufferStatistik,
    pub playout: PlayoutStatistik,
}

/// Eine RTP-Gegenstelle der Bruecke
pub struct CallLeg {
    id: LegId,
    format: &'static MediaFormat,
    remote: SocketAddr,
    buffer: Mutex<JitterBuffer>,
    empfang: Mutex<LegReceiver>,
    sender: Mutex<LegSender>,
    playout: Mutex<PlayoutStatistik>,
    events: Arc<dyn EventSink>,
    aktiv: AtomicBool,
}

impl std::fmt::Debug for CallLeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallLeg")
            .field("id", &self.id)
            .field("format", &self.format.to_string())
            .field("remote", &self.remote)
            .finish()
    }
}

impl CallLeg {
    /// Baut ein Leg auf; ungueltige Formate brechen den Aufbau ab
    pub fn neu(config: LegConfig, events: Arc<dyn EventSink>) -> VoiceResult<Self> {
        let id = LegId::new();
        let empfang = LegReceiver::neu(config.format, config.codec()?);
        let sender = LegSender {
            format: config.format,
            codec: config.codec()?,
            sequencer: RtpSequencer::random(config.format.payload),
            pakete: 0,
            oktette: 0,
            letzte_sendung: None,
        };

        tracing::info!(
            leg = %id,
            format = %config.format,
            remote = %config.remote,
            "Call-Leg aufgebaut"
        );
        events.melden(MediaEvent::LegGestartet { leg: id });

        Ok(Self {
            id,
            format: config.format,
            remote: config.remote,
            buffer: Mutex::new(JitterBuffer::neu(config.jitter)),
            empfang: Mutex::new(empfang),
            sender: Mutex::new(sender),
            playout: Mutex::new(PlayoutStatistik::default()),
            events,
            aktiv: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> LegId {
        self.id
    }

    pub fn format(&self) -> &'static MediaFormat {
        self.format
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// RTCP-Endpunkt der Gegenstelle (RTP-Port + 1)
    pub fn rtcp_remote(&self) -> SocketAddr {
        let mut addr = self.remote;
        addr.set_port(self.remote.port().wrapping_add(1));
        addr
    }

    pub fn buffer(&self) -> &Mutex<JitterBuffer> {
        &self.buffer
    }

    pub fn ist_aktiv(&self) -> bool {
        self.aktiv.load(Ordering::Acquire)
    }

    /// SSRC der Gegenstelle, sobald ein Paket empfangen wurde
    pub fn remote_ssrc(&self) -> Option<u32> {
        self.empfang.lock().ssrc
    }

    /// SSRC des eigenen Sendestroms
    pub fn local_ssrc(&self) -> u32 {
        self.sender.lock().sequencer.ssrc()
    }

    /// Verarbeitet ein empfangenes RTP-Paket
    pub fn rtp_empfangen(&self, frame: RtpFrame, jetzt: Instant) -> Empfangen {
        // Reihenfolge immer empfang → buffer
        self.empfang
            .lock()
            .verarbeiten(self.id, frame, jetzt, &self.buffer, self.events.as_ref())
    }

    /// Verarbeitet einen empfangenen RTCP-Report
    pub fn rtcp_empfangen(&self, report: &RtcpReport, jetzt: Instant) {
        let eigene_ssrc = self.local_ssrc();
        if let RtcpReport::Sender(sr) = report {
            self.empfang.lock().stats.sender_report_empfangen(sr, jetzt);
        }
        for block in report.blocks().iter().filter(|b| b.ssrc == eigene_ssrc) {
            tracing::debug!(
                leg = %self.id,
                anteil_verloren = block.fraction_lost,
                kumulativ = block.cumulative_lost,
                jitter = block.jitter,
                "Empfangsbericht der Gegenstelle"
            );
        }
    }

    /// Erzeugt den periodischen RTCP-Report dieses Legs
    ///
    /// Sender Report sobald Medien gesendet wurden, sonst Receiver Report.
    pub fn rtcp_report(&self, jetzt: Instant) -> RtcpReport {
        let block = self.empfang.lock().stats.report_block(jetzt);
        let blocks: Vec<_> = block.into_iter().collect();
        let sender = self.sender.lock();
        let ssrc = sender.sequencer.ssrc();
        if sender.pakete > 0 {
            RtcpReport::Sender(SenderReport {
                ssrc,
                info: sender.sender_info(ntp_now()),
                blocks,
            })
        } else {
            RtcpReport::Receiver(ReceiverReport { ssrc, blocks })
        }
    }

    /// Verpackt einen Wiedergabe-Block als RTP-Paket an diese Gegenstelle
    pub fn frame_fuer(&self, block: PlayoutBlock, jetzt: Instant) -> Option<RtpFrame> {
        self.sender.lock().frame_fuer(block, jetzt)
    }

    /// Uebernimmt die Statistik des Wiedergabe-Threads
    pub fn playout_statistik_setzen(&self, statistik: PlayoutStatistik) {
        *self.playout.lock() = statistik;
    }

    pub fn snapshot(&self) -> LegSnapshot {
        let (empfangen_pakete, empfangen_bytes, verworfen, kumulativ_verloren, rtp_jitter) = {
            let e = self.empfang.lock();
            (
                e.pakete,
                e.bytes,
                e.verworfen,
                e.stats.cumulative_lost(),
                e.stats.jitter(),
            )
        };
        let (gesendet_pakete, gesendet_oktette) = {
            let s = self.sender.lock();
            (s.pakete, s.oktette)
        };
        LegSnapshot {
            leg: self.id,
            remote: self.remote,
            payload_type: self.format.payload,
            empfangen_pakete,
            empfangen_bytes,
            verworfen,
            kumulativ_verloren,
            rtp_jitter,
            gesendet_pakete,
            gesendet_oktette,
            jitter_buffer: self.buffer.lock().statistik(),
            playout: *self.playout.lock(),
        }
    }

    /// Beendet das Leg: Buffer leeren, Ereignis melden
    pub fn beenden(&self) {
        if self.aktiv.swap(false, Ordering::AcqRel) {
            let rest = self.buffer.lock().flush();
            tracing::info!(leg = %self.id, verworfen = rest.len(), "Call-Leg beendet");
            self.events.melden(MediaEvent::LegBeendet { leg: self.id });
        }
    }
}
