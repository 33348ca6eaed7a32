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

//! Opus engine backed by libopus via the `opus` crate (native targets).

use opus::{Application, Bitrate, Channels, Decoder as OpusInnerDecoder, Encoder as OpusInner};

use super::{AudioDecoder, AudioEncoder, AudioEngine, AudioFormat};
use crate::{PipelineError, Result};

/// Largest packet libopus will emit.
const MAX_PACKET_BYTES: usize = 1275;
/// Opus frames are at most 120 ms long.
const MAX_FRAME_MS: usize = 120;
const MIN_BITRATE_BPS: i32 = 6_000;
const MAX_BITRATE_BPS: i32 = 510_000;

fn channels(count: u8) -> Result<Channels> {
    match count {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        _ => Err(PipelineError::InvalidChannelCount(count)),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpusEngine;

impl AudioEngine for OpusEngine {
    fn name(&self) -> &str {
        "opus"
    }

    fn create_encoder(&self, format: AudioFormat) -> Result<Box<dyn AudioEncoder>> {
        Ok(Box::new(OpusEncoder::new(format)?))
    }

    fn create_decoder(&self, format: AudioFormat) -> Result<Box<dyn AudioDecoder>> {
        Ok(Box::new(OpusDecoder::new(format)?))
    }
}

/// Wrapper around a libopus encoder.
///
/// Opus has no quality knob of its own, so quality scales the configured
/// bitrate: 0.0 runs at half of it, 1.0 at the full rate.
pub struct OpusEncoder {
    inner: Option<OpusInner>,
    quality: f64,
    bitrate_kbps: u32,
}

impl OpusEncoder {
    pub fn new(format: AudioFormat) -> Result<Self> {
        let inner = OpusInner::new(
            format.clock_rate,
            channels(format.channels)?,
            Application::Voip,
        )
        .map_err(|e| PipelineError::Engine(format!("Opus encoder init: {e}")))?;
        Ok(Self {
            inner: Some(inner),
            quality: 1.0,
            bitrate_kbps: 64,
        })
    }

    fn apply_bitrate(&mut self) {
        let bps = (self.bitrate_kbps as f64 * 1000.0 * (0.5 + 0.5 * self.quality)) as i32;
        let bps = bps.clamp(MIN_BITRATE_BPS, MAX_BITRATE_BPS);
        if let Some(inner) = self.inner.as_mut() {
            if let Err(e) = inner.set_bitrate(Bitrate::Bits(bps)) {
                log::warn!("Opus set_bitrate({bps}) failed: {e}");
            }
        }
    }
}

impl AudioEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        let inner = self
            .inner
            .as_mut()
            .ok_or(PipelineError::Destroyed("Opus encoder"))?;
        let mut out = vec![0u8; MAX_PACKET_BYTES];
        let written = inner
            .encode(pcm, &mut out)
            .map_err(|e| PipelineError::Engine(format!("Opus encode: {e}")))?;
        out.truncate(written);
        Ok(out)
    }

    fn set_quality(&mut self, quality: f64) {
        self.quality = quality.clamp(0.0, 1.0);
        self.apply_bitrate();
    }

    fn set_bitrate_kbps(&mut self, bitrate_kbps: u32) {
        self.bitrate_kbps = bitrate_kbps;
        self.apply_bitrate();
    }

    fn activate_fec(&mut self, loss_percent: u8) {
        if let Some(inner) = self.inner.as_mut() {
            if let Err(e) = inner.set_inband_fec(true) {
                log::warn!("Opus set_inband_fec failed: {e}");
            }
            if let Err(e) = inner.set_packet_loss_perc(loss_percent as i32) {
                log::warn!("Opus set_packet_loss_perc failed: {e}");
            }
        }
    }

    fn destroy(&mut self) {
        self.inner = None;
    }
}

/// Wrapper around a libopus decoder.
pub struct OpusDecoder {
    inner: Option<OpusInnerDecoder>,
    channels: usize,
    frame_samples: usize,
    max_samples: usize,
}

impl OpusDecoder {
    pub fn new(format: AudioFormat) -> Result<Self> {
        let inner = OpusInnerDecoder::new(format.clock_rate, channels(format.channels)?)
            .map_err(|e| PipelineError::Engine(format!("Opus decoder init: {e}")))?;
        let channels = format.channels as usize;
        Ok(Self {
            inner: Some(inner),
            channels,
            frame_samples: format.samples_per_frame() * channels,
            max_samples: (format.clock_rate as usize * MAX_FRAME_MS / 1000) * channels,
        })
    }
}

impl AudioDecoder for OpusDecoder {
    fn decode(&mut self, payload: Option<&[u8]>, fec: bool) -> Result<Option<Vec<i16>>> {
        let inner = self
            .inner
            .as_mut()
            .ok_or(PipelineError::Destroyed("Opus decoder"))?;

        // Concealment and FEC output must be exactly one frame long; libopus
        // derives the frame length from the buffer size in those modes.
        let (input, len) = match payload {
            Some(data) if !fec => (data, self.max_samples),
            Some(data) => (data, self.frame_samples),
            None => (&[][..], self.frame_samples),
        };
        let mut buf = vec![0i16; len];
        let decoded = inner
            .decode(input, &mut buf, fec)
            .map_err(|e| PipelineError::Engine(format!("Opus decode: {e}")))?;
        if decoded == 0 {
            return Ok(None);
        }
        buf.truncate(decoded * self.channels);
        Ok(Some(buf))
    }

    fn destroy(&mut self) {
        self.inner = None;
    }
}
