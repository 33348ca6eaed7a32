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

//! Payload framing: splitting encoded payloads into transport packets and
//! reassembling them on the receive side.

pub mod audio;
pub mod vp8;

pub use audio::{AudioDepacketizer, AudioPacketizer};
pub use vp8::{Vp8Depacketizer, Vp8Packetizer};

use crate::frame::EncodedPayload;
use crate::packet::TransportPacket;

/// Stream identity and numbering shared by every packetizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketStamp {
    pub ssrc: u32,
    pub payload_type: u8,
    next_sequence: u16,
}

impl PacketStamp {
    /// Random SSRC and initial sequence number.
    pub fn random(payload_type: u8) -> Self {
        Self::new(rand::random(), payload_type, rand::random())
    }

    pub fn new(ssrc: u32, payload_type: u8, initial_sequence: u16) -> Self {
        Self {
            ssrc,
            payload_type,
            next_sequence: initial_sequence,
        }
    }

    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    fn stamp(&mut self, timestamp: u32, marker: bool, payload: Vec<u8>) -> TransportPacket {
        let sequence_number = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        TransportPacket {
            sequence_number,
            timestamp,
            ssrc: self.ssrc,
            payload_type: self.payload_type,
            marker,
            payload,
        }
    }
}

/// A payload recovered from one or more transport packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Depacketized {
    pub payload: EncodedPayload,
    /// Sequence number of the packet that completed the payload.
    pub sequence_number: u16,
    /// Packets were lost or reordered between the previous payload and the
    /// end of this one.
    pub sequence_violation: bool,
}

/// Splits encoded payloads into transport packets.
pub trait Packetizer: Send {
    fn packetize(&mut self, payload: &EncodedPayload) -> Vec<TransportPacket>;
}

/// Rebuilds encoded payloads from transport packets.
pub trait Depacketizer: Send {
    /// Consumes one packet. Returns a payload once one is complete.
    fn push(&mut self, packet: &TransportPacket) -> Option<Depacketized>;
}
