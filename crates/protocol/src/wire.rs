//! Datagramm-Codecs fuer `tokio_util::udp::UdpFramed`
//!
//! Jedes UDP-Datagramm enthaelt genau ein RTP-Paket bzw. einen
//! RTCP-Report. Der Decoder verbraucht daher immer das komplette
//! Datagramm, auch wenn es fehlerhaft ist.
//!
//! # Beispiel
//!
//! ```rust,no_run
//! use tokio_util::udp::UdpFramed;
//! use voxbridge_protocol::wire::RtcpDatagramCodec;
//!
//! // let socket = tokio::net::UdpSocket::bind("0.0.0.0:40001").await?;
//! // let framed = UdpFramed::new(socket, RtcpDatagramCodec);
//! ```

use crate::error::WireError;
use crate::rtcp::RtcpReport;
use crate::rtp::RtpFrame;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

// ---------------------------------------------------------------------------
// RTP
// ---------------------------------------------------------------------------

/// Codec fuer RTP-Datagramme
#[derive(Debug, Clone, Copy, Default)]
pub struct RtpDatagramCodec;

impl Decoder for RtpDatagramCodec {
    type Item = RtpFrame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        // Datagramm immer komplett verbrauchen
        let datagramm = src.split();
        RtpFrame::decode(&datagramm).map(Some)
    }
}

impl Encoder<RtpFrame> for RtpDatagramCodec {
    type Error = WireError;

    fn encode(&mut self, frame: RtpFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(frame.encoded_len());
        frame.encode_into(dst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RTCP
// ---------------------------------------------------------------------------

/// Codec fuer RTCP-Datagramme
#[derive(Debug, Clone, Copy, Default)]
pub struct RtcpDatagramCodec;

impl Decoder for RtcpDatagramCodec {
    type Item = RtcpReport;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let datagramm = src.split();
        RtcpReport::decode(&datagramm).map(Some)
    }
}

impl Encoder<RtcpReport> for RtcpDatagramCodec {
    type Error = WireError;

    fn encode(&mut self, report: RtcpReport, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(report.encoded_len());
        report.encode_into(dst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
