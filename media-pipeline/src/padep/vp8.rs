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

//! VP8 framing (RFC 7741) with the minimal one-byte payload descriptor.
//!
//! ```text
//!  0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+
//! |X|R|N|S|R| PID |
//! +-+-+-+-+-+-+-+-+
//! ```
//!
//! Only the S bit is written; extension fields are skipped when parsing.

use super::{Depacketized, Depacketizer, PacketStamp, Packetizer};
use crate::frame::EncodedPayload;
use crate::packet::TransportPacket;
use crate::sequence::sequence_delta;

const START_OF_PARTITION: u8 = 0x10;
const EXTENDED_CONTROL: u8 = 0x80;
const PICTURE_ID_PRESENT: u8 = 0x80;
const TL0PICIDX_PRESENT: u8 = 0x40;
const TID_PRESENT: u8 = 0x20;
const KEYIDX_PRESENT: u8 = 0x10;

pub struct Vp8Packetizer {
    stamp: PacketStamp,
    max_fragment: usize,
}

impl Vp8Packetizer {
    /// `mtu` bounds the packet payload, descriptor included.
    pub fn new(stamp: PacketStamp, mtu: usize) -> Self {
        Self {
            stamp,
            max_fragment: mtu.saturating_sub(1).max(1),
        }
    }

    pub fn stamp(&self) -> &PacketStamp {
        &self.stamp
    }
}

impl Packetizer for Vp8Packetizer {
    fn packetize(&mut self, payload: &EncodedPayload) -> Vec<TransportPacket> {
        if payload.is_empty() {
            log::debug!("Skipping empty VP8 payload at {}", payload.timestamp);
            return Vec::new();
        }
        let count = payload.data.len().div_ceil(self.max_fragment);
        payload
            .data
            .chunks(self.max_fragment)
            .enumerate()
            .map(|(i, chunk)| {
                let mut data = Vec::with_capacity(chunk.len() + 1);
                data.push(if i == 0 { START_OF_PARTITION } else { 0 });
                data.extend_from_slice(chunk);
                self.stamp.stamp(payload.timestamp, i + 1 == count, data)
            })
            .collect()
    }
}

/// Length of the payload descriptor at the front of `payload`, or `None`
/// when it is truncated.
fn descriptor_len(payload: &[u8]) -> Option<usize> {
    let first = *payload.first()?;
    let mut len = 1;
    if first & EXTENDED_CONTROL != 0 {
        let ext = *payload.get(1)?;
        len += 1;
        if ext & PICTURE_ID_PRESENT != 0 {
            let picture_id = *payload.get(len)?;
            // M bit selects a 15-bit picture id
            len += if picture_id & 0x80 != 0 { 2 } else { 1 };
        }
        if ext & TL0PICIDX_PRESENT != 0 {
            len += 1;
        }
        if ext & (TID_PRESENT | KEYIDX_PRESENT) != 0 {
            len += 1;
        }
    }
    (len <= payload.len()).then_some(len)
}

/// Reassembles VP8 frames and flags any loss inside or between them.
#[derive(Debug, Default)]
pub struct Vp8Depacketizer {
    buffer: Vec<u8>,
    timestamp: Option<u32>,
    last_sequence: Option<u16>,
    violation: bool,
}

impl Vp8Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn discard_partial(&mut self) {
        if self.timestamp.take().is_some() {
            log::warn!("Discarding incomplete VP8 frame ({} bytes)", self.buffer.len());
            self.violation = true;
        }
        self.buffer.clear();
    }
}

impl Depacketizer for Vp8Depacketizer {
    fn push(&mut self, packet: &TransportPacket) -> Option<Depacketized> {
        if let Some(last) = self.last_sequence {
            let delta = sequence_delta(packet.sequence_number, last);
            if delta != 1 {
                log::warn!(
                    "VP8 sequence violation: {} after {}",
                    packet.sequence_number,
                    last
                );
                self.violation = true;
                self.discard_partial();
            }
        }
        self.last_sequence = Some(packet.sequence_number);

        let Some(header) = descriptor_len(&packet.payload) else {
            log::warn!("Truncated VP8 payload descriptor");
            self.discard_partial();
            self.violation = true;
            return None;
        };
        let start = packet.payload[0] & START_OF_PARTITION != 0;

        if start {
            self.discard_partial();
            self.timestamp = Some(packet.timestamp);
        } else if self.timestamp != Some(packet.timestamp) {
            // continuation of a frame whose start we never saw
            self.discard_partial();
            self.violation = true;
            return None;
        }
        self.buffer.extend_from_slice(&packet.payload[header..]);

        if !packet.marker {
            return None;
        }
        let timestamp = self.timestamp.take().unwrap_or(packet.timestamp);
        Some(Depacketized {
            payload: EncodedPayload::new(std::mem::take(&mut self.buffer), timestamp),
            sequence_number: packet.sequence_number,
            sequence_violation: std::mem::take(&mut self.violation),
        })
    }
}
