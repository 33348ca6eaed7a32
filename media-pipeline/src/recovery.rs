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

//! Loss recovery for audio streams.
//!
//! For a gap of `N` lost packets in front of an arriving payload, the
//! controller produces `N - 1` concealment (PLC) frames followed by one frame
//! reconstructed from the FEC data embedded in the arriving payload. When
//! the payload carries no usable FEC data, that last slot is concealed too.
//! The arriving payload is then decoded normally and the recovered frames
//! are attached to it, oldest first.

use serde::{Deserialize, Serialize};

use crate::engine::{AudioDecoder, AudioFormat};
use crate::frame::{AudioFrame, EncodedPayload, FrameOrigin};

/// What happened while decoding one payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Lost packets in front of this payload.
    pub missing: usize,
    pub concealed: usize,
    pub fec_recovered: usize,
    /// FEC slots that fell back to concealment.
    pub fec_fallbacks: usize,
    /// Decoder calls that produced nothing, including the final normal decode.
    pub failed_decodes: usize,
}

/// Output of [`RecoveryController::decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    /// The decoded payload with the recovered frames in `preceding`. `None`
    /// when the payload itself could not be decoded.
    pub frame: Option<AudioFrame>,
    pub report: RecoveryReport,
}

#[derive(Debug, Clone, Copy)]
enum DecodeMode {
    Normal,
    Concealment,
    ForwardErrorCorrection,
}

/// Stateless recovery policy for one audio format.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryController {
    format: AudioFormat,
}

impl RecoveryController {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }

    /// Decodes `payload`, first backfilling `missing` lost frames.
    pub fn decode(
        &self,
        decoder: &mut dyn AudioDecoder,
        payload: &EncodedPayload,
        missing: usize,
    ) -> Recovered {
        let mut report = RecoveryReport {
            missing,
            ..Default::default()
        };
        let mut preceding = Vec::with_capacity(missing);

        if missing > 0 {
            let plc_count = missing - 1;
            if plc_count > 0 {
                log::info!(
                    "Adding {plc_count} frames of loss concealment to incoming audio stream."
                );
            }
            for slot in 0..plc_count {
                let timestamp = self.slot_timestamp(payload.timestamp, missing - slot);
                match self.decode_one(decoder, None, DecodeMode::Concealment, timestamp) {
                    Some(frame) => {
                        report.concealed += 1;
                        preceding.push(frame);
                    }
                    None => report.failed_decodes += 1,
                }
            }

            let timestamp = self.slot_timestamp(payload.timestamp, 1);
            match self.decode_one(
                decoder,
                Some(&payload.data),
                DecodeMode::ForwardErrorCorrection,
                timestamp,
            ) {
                Some(frame) => {
                    report.fec_recovered += 1;
                    preceding.push(frame);
                }
                None => {
                    report.fec_fallbacks += 1;
                    log::debug!("No FEC data in payload at {}, concealing", payload.timestamp);
                    match self.decode_one(decoder, None, DecodeMode::Concealment, timestamp) {
                        Some(frame) => {
                            report.concealed += 1;
                            preceding.push(frame);
                        }
                        None => report.failed_decodes += 1,
                    }
                }
            }
        }

        let frame = self
            .decode_one(
                decoder,
                Some(&payload.data),
                DecodeMode::Normal,
                payload.timestamp,
            )
            .map(|mut frame| {
                frame.preceding = preceding;
                frame
            });
        if frame.is_none() {
            report.failed_decodes += 1;
            if report.concealed + report.fec_recovered > 0 {
                log::warn!(
                    "Discarding {} recovered frames: payload at {} did not decode",
                    report.concealed + report.fec_recovered,
                    payload.timestamp
                );
            }
        }

        Recovered { frame, report }
    }

    /// Timestamp of the slot `frames_back` intervals before `current`.
    fn slot_timestamp(&self, current: u32, frames_back: usize) -> u32 {
        let step = self.format.samples_per_frame() as u32;
        current.wrapping_sub(step.wrapping_mul(frames_back as u32))
    }

    fn decode_one(
        &self,
        decoder: &mut dyn AudioDecoder,
        data: Option<&[u8]>,
        mode: DecodeMode,
        timestamp: u32,
    ) -> Option<AudioFrame> {
        let fec = matches!(mode, DecodeMode::ForwardErrorCorrection);
        match decoder.decode(data, fec) {
            Ok(Some(samples)) => {
                let mut frame = AudioFrame::new(
                    samples,
                    self.format.clock_rate,
                    self.format.channels,
                    timestamp,
                );
                frame.origin = match mode {
                    DecodeMode::Normal => FrameOrigin::Normal,
                    DecodeMode::Concealment => FrameOrigin::Concealed,
                    DecodeMode::ForwardErrorCorrection => FrameOrigin::ForwardErrorCorrected,
                };
                Some(frame)
            }
            Ok(None) => None,
            Err(e) => {
                // FEC is routinely absent; only the other modes are worth a warning
                if fec {
                    log::debug!("FEC decode failed: {e}");
                } else {
                    log::warn!("{mode:?} decode failed: {e}");
                }
                None
            }
        }
    }
}
