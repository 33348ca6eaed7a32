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

//! Recording engines for session tests.
//!
//! Audio payloads are `[fec_flag, samples as little-endian i16...]`. Video
//! payloads are `[frame_tag, byte...]` where a clear bit 0 marks a keyframe,
//! as in VP8.

use std::sync::{Arc, Mutex};

use crate::engine::{
    AudioDecoder, AudioEncoder, AudioEngine, AudioFormat, DecodedImage, VideoDecoder,
    VideoEncoder, VideoEngine,
};
use crate::frame::VideoFrame;
use crate::{PipelineError, Result};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct EngineLog {
    pub encoders_created: usize,
    pub decoders_created: usize,
    pub encoders_destroyed: usize,
    pub decoders_destroyed: usize,
    pub builtin_plc_disabled: bool,
    pub qualities: Vec<f64>,
    pub bitrates: Vec<u32>,
    pub scales: Vec<f64>,
    pub fec_activations: Vec<u8>,
    pub keyframes_forced: usize,
    /// `None` for concealment, `Some(fec)` for payload decodes.
    pub decode_calls: Vec<Option<bool>>,
}

pub type SharedLog = Arc<Mutex<EngineLog>>;

fn record(log: &SharedLog, f: impl FnOnce(&mut EngineLog)) {
    f(&mut log.lock().unwrap());
}

#[derive(Default, Clone)]
pub struct MockAudioEngine {
    pub log: SharedLog,
    pub fail_decoder_creation: bool,
}

impl AudioEngine for MockAudioEngine {
    fn name(&self) -> &str {
        "mock-audio"
    }

    fn create_encoder(&self, _format: AudioFormat) -> Result<Box<dyn AudioEncoder>> {
        record(&self.log, |l| l.encoders_created += 1);
        Ok(Box::new(MockAudioEncoder {
            log: self.log.clone(),
            fec: false,
        }))
    }

    fn create_decoder(&self, format: AudioFormat) -> Result<Box<dyn AudioDecoder>> {
        if self.fail_decoder_creation {
            return Err(PipelineError::Engine("no decoder".into()));
        }
        record(&self.log, |l| l.decoders_created += 1);
        Ok(Box::new(MockAudioDecoder {
            log: self.log.clone(),
            frame_len: format.samples_per_frame() * format.channels as usize,
        }))
    }
}

struct MockAudioEncoder {
    log: SharedLog,
    fec: bool,
}

impl AudioEncoder for MockAudioEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        let mut out = vec![self.fec as u8];
        out.extend(pcm.iter().flat_map(|s| s.to_le_bytes()));
        Ok(out)
    }

    fn set_quality(&mut self, quality: f64) {
        record(&self.log, |l| l.qualities.push(quality));
    }

    fn set_bitrate_kbps(&mut self, bitrate_kbps: u32) {
        record(&self.log, |l| l.bitrates.push(bitrate_kbps));
    }

    fn activate_fec(&mut self, loss_percent: u8) {
        self.fec = true;
        record(&self.log, |l| l.fec_activations.push(loss_percent));
    }

    fn destroy(&mut self) {
        record(&self.log, |l| l.encoders_destroyed += 1);
    }
}

struct MockAudioDecoder {
    log: SharedLog,
    frame_len: usize,
}

impl AudioDecoder for MockAudioDecoder {
    fn decode(&mut self, payload: Option<&[u8]>, fec: bool) -> Result<Option<Vec<i16>>> {
        record(&self.log, |l| l.decode_calls.push(payload.map(|_| fec)));
        let Some(data) = payload else {
            return Ok(Some(vec![0; self.frame_len]));
        };
        let (&flag, body) = data
            .split_first()
            .ok_or_else(|| PipelineError::Engine("empty payload".into()))?;
        if fec {
            return Ok((flag == 1).then(|| vec![-1; self.frame_len]));
        }
        Ok(Some(
            body.chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect(),
        ))
    }

    fn disable_builtin_plc(&mut self) {
        record(&self.log, |l| l.builtin_plc_disabled = true);
    }

    fn destroy(&mut self) {
        record(&self.log, |l| l.decoders_destroyed += 1);
    }
}

#[derive(Default, Clone)]
pub struct MockVideoEngine {
    pub log: SharedLog,
}

impl VideoEngine for MockVideoEngine {
    fn name(&self) -> &str {
        "mock-video"
    }

    fn create_encoder(&self) -> Result<Box<dyn VideoEncoder>> {
        record(&self.log, |l| l.encoders_created += 1);
        Ok(Box::new(MockVideoEncoder {
            log: self.log.clone(),
            next_is_keyframe: true,
        }))
    }

    fn create_decoder(&self) -> Result<Box<dyn VideoDecoder>> {
        record(&self.log, |l| l.decoders_created += 1);
        Ok(Box::new(MockVideoDecoder {
            log: self.log.clone(),
        }))
    }

    fn is_keyframe(&self, payload: &[u8]) -> bool {
        payload.first().is_some_and(|tag| tag & 1 == 0)
    }
}

struct MockVideoEncoder {
    log: SharedLog,
    next_is_keyframe: bool,
}

impl VideoEncoder for MockVideoEncoder {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Vec<u8>> {
        let tag = if std::mem::take(&mut self.next_is_keyframe) {
            0
        } else {
            1
        };
        let mut out = vec![tag];
        if let Some(plane) = frame.planes.first() {
            out.extend_from_slice(&plane.data);
        }
        Ok(out)
    }

    fn force_keyframe(&mut self) {
        self.next_is_keyframe = true;
        record(&self.log, |l| l.keyframes_forced += 1);
    }

    fn set_quality(&mut self, quality: f64) {
        record(&self.log, |l| l.qualities.push(quality));
    }

    fn set_bitrate_kbps(&mut self, bitrate_kbps: u32) {
        record(&self.log, |l| l.bitrates.push(bitrate_kbps));
    }

    fn set_scale(&mut self, scale: f64) {
        record(&self.log, |l| l.scales.push(scale));
    }

    fn destroy(&mut self) {
        record(&self.log, |l| l.encoders_destroyed += 1);
    }
}

struct MockVideoDecoder {
    log: SharedLog,
}

impl VideoDecoder for MockVideoDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Option<DecodedImage>> {
        record(&self.log, |l| l.decode_calls.push(Some(false)));
        if payload.len() < 2 {
            return Ok(None);
        }
        Ok(Some(DecodedImage {
            width: 2,
            height: 2,
            rotation: 0,
            planes: vec![(payload[1..].to_vec(), 2)],
        }))
    }

    fn destroy(&mut self) {
        record(&self.log, |l| l.decoders_destroyed += 1);
    }
}
