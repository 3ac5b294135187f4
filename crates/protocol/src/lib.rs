//! voxbridge-protocol – RTP/RTCP Wire-Codec
//!
//! Reine Byte-Transformationen nach RFC 3550 (RTP/RTCP), RFC 3389
//! (Comfort Noise) und RFC 4733 (Telephone-Events). Alle Mehrbyte-Felder
//! sind big-endian.
//!
//! ## Module
//! - [`rtp`] – RTP-Header, Sequenz-Arithmetik, Sende-Zustand
//! - [`rtcp`] – Sender- und Receiver-Reports
//! - [`stats`] – Empfangsstatistik fuer Report-Bloecke
//! - [`telephone_event`] – DTMF-Nutzdaten
//! - [`wire`] – tokio-util Codecs fuer `UdpFramed`

pub mod error;
pub mod rtcp;
pub mod rtp;
pub mod stats;
pub mod telephone_event;
pub mod wire;

pub use error::WireError;
pub use rtcp::{decode_rtcp, encode_rtcp, ReceiverReport, ReportBlock, RtcpReport, SenderInfo, SenderReport};
pub use rtp::{decode_rtp, encode_rtp, seq_delta, timestamp_delta, RtpFrame, RtpSequencer};
pub use stats::ReceptionStats;
pub use telephone_event::TelephoneEvent;
pub use wire::{RtcpDatagramCodec, RtpDatagramCodec};
