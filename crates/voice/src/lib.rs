//! voxbridge-voice – Echtzeit-Medien-Pipeline
//!
//! Empfaengt RTP pro Call-Leg, ordnet und repariert den Strom im Jitter
//! Buffer, passt Format und Rate an und sendet ihn getaktet an die
//! Gegenstelle weiter.
//!
//! ## Module
//! - [`udp`] – RTP/RTCP-Socketpaar, Empfangs-Loop und Sende-Queue
//! - [`leg`] – Empfang, Wiedergabe und Senden eines Call-Legs
//! - [`bridge`] – Wiedergabe-Threads zwischen zwei Legs
//! - [`jitter_buffer`] – Adaptiver Jitter Buffer
//! - [`plc`] – Packet Loss Concealment
//! - [`ticker`] – Driftkompensierter Sendetakt
//! - [`state`] – Registry aller Legs
//! - [`telemetry`] – Kennzahlen und Ereignis-Export

pub mod bridge;
pub mod error;
pub mod jitter_buffer;
pub mod leg;
pub mod plc;
pub mod state;
pub mod telemetry;
pub mod ticker;
pub mod udp;

pub use bridge::{Bridge, PaketSenke, PlayoutConfig, Weiterleitung};
pub use error::{VoiceError, VoiceResult};
pub use jitter_buffer::{InsertOutcome, JitterBuffer, JitterBufferConfig, JitterEntry, Payload};
pub use leg::{CallLeg, LegConfig, LegSnapshot, PlayoutBlock, SpeechCodecFactory};
pub use plc::{Concealer, PacketLossConcealment, PlcKind};
pub use state::LegRegistry;
pub use telemetry::{BroadcastSink, TelemetrieSnapshot, VoiceTelemetry};
pub use ticker::{Clock, SystemClock, Ticker, TickerError, TickerKind};
pub use udp::{MediaServer, MediaServerConfig, SendeQueue};
