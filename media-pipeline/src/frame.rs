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

//! Contains the fundamental data structures for raw and encoded media.

use serde::{Deserialize, Serialize};

/// How a decoded audio frame came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameOrigin {
    /// Decoded from the payload that carried it.
    Normal,
    /// Synthesized by the decoder with no input data (PLC).
    Concealed,
    /// Reconstructed from redundancy embedded in the following payload.
    ForwardErrorCorrected,
}

/// A frame of interleaved 16-bit PCM audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    /// Interleaved samples.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u8,
    /// Capture or render timestamp in sample-clock units.
    pub timestamp: u32,
    pub origin: FrameOrigin,
    /// Frames recovered for packets lost right before this one, oldest first.
    /// A renderer plays these before `samples`.
    pub preceding: Vec<AudioFrame>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u8, timestamp: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            timestamp,
            origin: FrameOrigin::Normal,
            preceding: Vec::new(),
        }
    }

    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_ms(&self) -> u32 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples_per_channel() as u64 * 1000 / self.sample_rate as u64) as u32
    }
}

/// One image plane (Y, U, V or alpha).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoPlane {
    pub data: Vec<u8>,
    /// Bytes per row in `data`.
    pub stride: usize,
}

/// A raw video frame in planar format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation in degrees.
    pub rotation: u32,
    pub planes: Vec<VideoPlane>,
    /// Capture timestamp in 90 kHz units.
    pub timestamp: u32,
    /// Ask the encoder to produce a keyframe for this frame.
    pub reset_keyframe: bool,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, planes: Vec<VideoPlane>, timestamp: u32) -> Self {
        Self {
            width,
            height,
            rotation: 0,
            planes,
            timestamp,
            reset_keyframe: false,
        }
    }
}

/// The opaque output of an encoder for one frame interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedPayload {
    pub data: Vec<u8>,
    /// RTP timestamp of the frame this payload encodes.
    pub timestamp: u32,
}

impl EncodedPayload {
    pub fn new(data: Vec<u8>, timestamp: u32) -> Self {
        Self { data, timestamp }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
