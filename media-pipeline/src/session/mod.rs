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

//! Per-stream codec sessions.
//!
//! A session owns one encoder and one decoder handle for a single media
//! stream and composes framing, gap detection, recovery and adaptive control
//! around them. The send side (encode and feedback) and the receive side
//! (depacketize and decode) each sit behind their own lock, so the three
//! call sites may run on different threads. `destroy` takes both locks and
//! therefore waits for in-flight calls to finish.

mod audio;
mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use audio::AudioSession;
pub use video::VideoSession;

use std::sync::{Mutex, MutexGuard};

use crate::feedback::Feedback;
use crate::frame::EncodedPayload;
use crate::packet::TransportPacket;
use crate::quality::Adjustment;
use crate::stats::StreamStatistics;
use crate::{PipelineError, Result};

/// Operations every media stream supports.
pub trait CodecSession: Send + Sync {
    /// Raw frame type consumed by `encode` and produced by `decode`.
    type Frame;

    /// Encodes one frame. `Ok(None)` when the engine produced nothing.
    fn encode(&self, frame: Self::Frame) -> Result<Option<EncodedPayload>>;

    /// Decodes one payload. `Ok(None)` when no frame could be produced.
    fn decode(&self, payload: &EncodedPayload) -> Result<Option<Self::Frame>>;

    fn packetize(&self, payload: &EncodedPayload) -> Result<Vec<TransportPacket>>;

    /// Feeds one packet. Returns a payload once one is complete.
    fn depacketize(&self, packet: &TransportPacket) -> Result<Option<EncodedPayload>>;

    /// Applies a batch of transport feedback. Ignored until an encoder exists.
    fn process_feedback(&self, feedback: &[Feedback]) -> Result<()>;

    /// Releases the encoder and decoder. Safe to call more than once.
    fn destroy(&self);

    fn statistics(&self) -> StreamStatistics;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        log::error!("Session lock poisoned");
        PipelineError::LockPoisoned
    })
}

/// Counts parameter moves, excluding FEC activation.
pub(crate) fn count_steps(adjustments: &[Adjustment]) -> u64 {
    adjustments
        .iter()
        .filter(|a| !matches!(a, Adjustment::ActivateFec { .. }))
        .count() as u64
}
