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

//! Audio framing: one payload per packet, no descriptor.

use super::{Depacketized, Depacketizer, PacketStamp, Packetizer};
use crate::frame::EncodedPayload;
use crate::packet::TransportPacket;

#[derive(Debug, Clone)]
pub struct AudioPacketizer {
    stamp: PacketStamp,
}

impl AudioPacketizer {
    pub fn new(stamp: PacketStamp) -> Self {
        Self { stamp }
    }

    pub fn stamp(&self) -> &PacketStamp {
        &self.stamp
    }
}

impl Packetizer for AudioPacketizer {
    fn packetize(&mut self, payload: &EncodedPayload) -> Vec<TransportPacket> {
        vec![self
            .stamp
            .stamp(payload.timestamp, true, payload.data.clone())]
    }
}

/// Passes every packet through as a payload. Gaps are left to the sequence
/// tracker, which turns them into recovery work.
#[derive(Debug, Default, Clone)]
pub struct AudioDepacketizer;

impl Depacketizer for AudioDepacketizer {
    fn push(&mut self, packet: &TransportPacket) -> Option<Depacketized> {
        Some(Depacketized {
            payload: EncodedPayload::new(packet.payload.clone(), packet.timestamp),
            sequence_number: packet.sequence_number,
            sequence_violation: false,
        })
    }
}
