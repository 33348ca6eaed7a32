/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

use bytes::Bytes;
use rtp::header::Header;
use rtp::packet::Packet;
use serde::{Deserialize, Serialize};
use webrtc_util::{Marshal, Unmarshal};

use crate::{PipelineError, Result};

/// One RTP packet as exchanged with the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportPacket {
    /// RTP sequence number (wraps at 65535)
    pub sequence_number: u16,
    /// RTP timestamp
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
    pub payload_type: u8,
    /// Set on the last packet of a frame
    pub marker: bool,
    /// Payload fragment, including any codec payload descriptor
    pub payload: Vec<u8>,
}

impl TransportPacket {
    /// Serialize to the RFC 3550 wire format.
    pub fn marshal(&self) -> Result<Bytes> {
        let packet = Packet {
            header: Header {
                version: 2,
                marker: self.marker,
                payload_type: self.payload_type,
                sequence_number: self.sequence_number,
                timestamp: self.timestamp,
                ssrc: self.ssrc,
                ..Default::default()
            },
            payload: Bytes::copy_from_slice(&self.payload),
        };
        packet
            .marshal()
            .map_err(|e| PipelineError::InvalidPacket(format!("RTP marshal: {e}")))
    }

    /// Parse an RTP datagram received from the network.
    pub fn unmarshal(mut raw: &[u8]) -> Result<Self> {
        let packet = Packet::unmarshal(&mut raw)
            .map_err(|e| PipelineError::InvalidPacket(format!("RTP unmarshal: {e}")))?;
        Ok(Self {
            sequence_number: packet.header.sequence_number,
            timestamp: packet.header.timestamp,
            ssrc: packet.header.ssrc,
            payload_type: packet.header.payload_type,
            marker: packet.header.marker,
            payload: packet.payload.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(sequence_number: u16, timestamp: u32) -> TransportPacket {
        TransportPacket {
            sequence_number,
            timestamp,
            ssrc: 0x1234_5678,
            payload_type: 111,
            marker: true,
            payload: vec![0xde, 0xad, 0xbe, 0xef],
        }
    }

    #[test]
    fn test_wire_format() {
        let original = packet(4242, 96000);
        let wire = original.marshal().unwrap();
        assert_eq!(wire.len(), 12 + 4);
        assert_eq!(wire[0] >> 6, 2);
        // marker bit plus payload type 111
        assert_eq!(wire[1], 0x80 | 111);
        assert_eq!(&wire[2..4], &4242u16.to_be_bytes());

        let parsed = TransportPacket::unmarshal(&wire).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_truncated_datagram_is_rejected() {
        let err = TransportPacket::unmarshal(&[0x80, 0x6f, 0x00]);
        assert!(matches!(err, Err(PipelineError::InvalidPacket(_))));
    }
}
