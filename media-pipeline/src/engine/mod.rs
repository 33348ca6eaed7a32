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

//! The common interface for codec engines.
//!
//! The pipeline never looks inside a bitstream. Everything it needs from a
//! concrete codec library is expressed by the traits below: an engine creates
//! encoder and decoder handles, and the handles encode, decode and accept
//! parameter updates. Sessions own the handles and release them exactly once
//! through `destroy`.

use crate::frame::VideoFrame;
use crate::Result;

/// Format parameters an audio engine needs to create a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub clock_rate: u32,
    pub channels: u8,
    pub frame_interval_ms: u32,
}

impl AudioFormat {
    pub fn samples_per_frame(&self) -> usize {
        (self.clock_rate as usize * self.frame_interval_ms as usize) / 1000
    }
}

/// Decoded pixel data returned by a video decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rotation: u32,
    /// (data, stride) per plane
    pub planes: Vec<(Vec<u8>, usize)>,
}

/// Encoder handle for an audio codec.
pub trait AudioEncoder: Send {
    /// Encodes one frame interval of interleaved PCM.
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>>;

    /// Quality in [0.0, 1.0].
    fn set_quality(&mut self, quality: f64);

    fn set_bitrate_kbps(&mut self, bitrate_kbps: u32);

    /// Starts embedding redundancy for the previous frame, tuned for the
    /// given expected loss percentage.
    fn activate_fec(&mut self, loss_percent: u8);

    fn destroy(&mut self);
}

/// Decoder handle for an audio codec.
pub trait AudioDecoder: Send {
    /// Decodes one frame.
    ///
    /// `payload == None` asks for a concealment frame. `fec == true` asks the
    /// decoder to reconstruct the frame *preceding* `payload` from the
    /// redundancy embedded in it. `Ok(None)` means the decoder had nothing to
    /// produce.
    fn decode(&mut self, payload: Option<&[u8]>, fec: bool) -> Result<Option<Vec<i16>>>;

    /// Turns off any concealment the codec library would apply on its own.
    fn disable_builtin_plc(&mut self) {}

    fn destroy(&mut self);
}

/// Factory for audio codec handles.
pub trait AudioEngine: Send + Sync {
    fn name(&self) -> &str;

    fn create_encoder(&self, format: AudioFormat) -> Result<Box<dyn AudioEncoder>>;

    fn create_decoder(&self, format: AudioFormat) -> Result<Box<dyn AudioDecoder>>;
}

/// Encoder handle for a video codec.
pub trait VideoEncoder: Send {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Vec<u8>>;

    /// The next encoded frame will be a keyframe.
    fn force_keyframe(&mut self);

    fn set_quality(&mut self, quality: f64);

    fn set_bitrate_kbps(&mut self, bitrate_kbps: u32);

    /// Spatial scale in (0.0, 1.0] applied to the input resolution.
    fn set_scale(&mut self, scale: f64);

    fn destroy(&mut self);
}

/// Decoder handle for a video codec.
pub trait VideoDecoder: Send {
    /// `Ok(None)` means the payload produced no picture.
    fn decode(&mut self, payload: &[u8]) -> Result<Option<DecodedImage>>;

    fn destroy(&mut self);
}

/// Factory for video codec handles.
pub trait VideoEngine: Send + Sync {
    fn name(&self) -> &str;

    fn create_encoder(&self) -> Result<Box<dyn VideoEncoder>>;

    fn create_decoder(&self) -> Result<Box<dyn VideoDecoder>>;

    /// Whether the payload is independently decodable.
    fn is_keyframe(&self, payload: &[u8]) -> bool;
}

#[cfg(feature = "opus")]
pub mod opus;
#[cfg(feature = "vpx")]
pub mod vpx;
