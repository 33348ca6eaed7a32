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

//! Configuration for audio/video streams, the adaptive controller and the
//! echo/mix path.
//!
//! Every struct has a `Default` matching the behaviour of a live call, and
//! deserializes with `#[serde(default)]` so partial JSON documents work.

use serde::{Deserialize, Serialize};

use crate::{PipelineError, Result};

/// Bounds and step size for one adjustable encoder parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepRange<T> {
    pub min: T,
    pub max: T,
    pub step: T,
}

impl<T: PartialOrd + Copy> StepRange<T> {
    fn is_valid(&self) -> bool {
        self.min <= self.max
    }
}

/// Hysteresis settings for the adaptive quality controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    /// A streak must *exceed* this many consecutive same-direction samples
    /// before parameters move.
    pub streak_threshold: u32,
    pub quality: StepRange<f64>,
    /// Video only.
    pub bitrate_kbps: StepRange<u32>,
    /// Video only.
    pub scale: StepRange<f64>,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            streak_threshold: 5,
            quality: StepRange {
                min: 0.0,
                max: 1.0,
                step: 0.1,
            },
            bitrate_kbps: StepRange {
                min: 64,
                max: 640,
                step: 64,
            },
            scale: StepRange {
                min: 0.2,
                max: 1.0,
                step: 0.2,
            },
        }
    }
}

impl AdaptationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.streak_threshold == 0 {
            return Err(PipelineError::InvalidConfig(
                "streak_threshold must be at least 1".into(),
            ));
        }
        if !self.quality.is_valid() || self.quality.min < 0.0 || self.quality.max > 1.0 {
            return Err(PipelineError::InvalidConfig(
                "quality bounds must lie within [0.0, 1.0]".into(),
            ));
        }
        if !self.bitrate_kbps.is_valid() || self.bitrate_kbps.min == 0 {
            return Err(PipelineError::InvalidConfig(
                "bitrate bounds must be positive and ordered".into(),
            ));
        }
        if !self.scale.is_valid() || self.scale.min <= 0.0 || self.scale.max > 1.0 {
            return Err(PipelineError::InvalidConfig(
                "scale bounds must lie within (0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

/// Forward error correction policy (audio only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FecConfig {
    /// When set, FEC never activates.
    pub disabled: bool,
    /// Loss percentage (0-100) a sample must exceed to activate FEC.
    pub trigger_percent: u8,
    /// Number of reports that must have been processed before FEC may activate.
    pub min_reports: u64,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            trigger_percent: 5,
            min_reports: 1,
        }
    }
}

/// Audio stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub clock_rate: u32,
    /// Number of audio channels
    pub channels: u8,
    /// Duration of one encoded frame
    pub frame_interval_ms: u32,
    pub payload_type: u8,
    pub default_quality: f64,
    pub default_bitrate_kbps: u32,
    /// Largest run of lost packets the receiver recovers. A longer jump
    /// restarts decoding at the new sequence number.
    pub max_recoverable_gap: u16,
    pub fec: FecConfig,
    pub adaptation: AdaptationConfig,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            clock_rate: 48000,
            channels: 2,
            frame_interval_ms: 20,
            payload_type: 111,
            default_quality: 0.5,
            default_bitrate_kbps: 125,
            max_recoverable_gap: 50,
            fec: FecConfig::default(),
            adaptation: AdaptationConfig::default(),
        }
    }
}

impl AudioConfig {
    /// Samples per channel in one frame interval.
    pub fn samples_per_frame(&self) -> usize {
        (self.clock_rate as usize * self.frame_interval_ms as usize) / 1000
    }

    pub fn validate(&self) -> Result<()> {
        if self.clock_rate == 0 {
            return Err(PipelineError::InvalidConfig("clock_rate must be non-zero".into()));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(PipelineError::InvalidChannelCount(self.channels));
        }
        if self.frame_interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "frame_interval_ms must be non-zero".into(),
            ));
        }
        if self.max_recoverable_gap == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_recoverable_gap must be at least 1".into(),
            ));
        }
        if self.fec.trigger_percent > 100 {
            return Err(PipelineError::InvalidConfig(
                "fec.trigger_percent must be within 0..=100".into(),
            ));
        }
        if self.payload_type > 127 {
            return Err(PipelineError::InvalidConfig("payload_type must fit in 7 bits".into()));
        }
        self.adaptation.validate()?;
        check_default("default_quality", self.default_quality, &self.adaptation.quality)
    }
}

/// Video stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub payload_type: u8,
    pub default_quality: f64,
    pub default_bitrate_kbps: u32,
    pub default_scale: f64,
    /// Largest payload fragment carried by one packet, descriptor included.
    pub mtu: usize,
    pub adaptation: AdaptationConfig,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            payload_type: 96,
            default_quality: 0.5,
            default_bitrate_kbps: 320,
            default_scale: 1.0,
            mtu: 1200,
            adaptation: AdaptationConfig::default(),
        }
    }
}

impl VideoConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mtu < 2 {
            return Err(PipelineError::InvalidConfig(
                "mtu must leave room for the payload descriptor".into(),
            ));
        }
        if self.payload_type > 127 {
            return Err(PipelineError::InvalidConfig("payload_type must fit in 7 bits".into()));
        }
        self.adaptation.validate()?;
        check_default("default_quality", self.default_quality, &self.adaptation.quality)?;
        check_default("default_scale", self.default_scale, &self.adaptation.scale)?;
        let bitrate = &self.adaptation.bitrate_kbps;
        if self.default_bitrate_kbps < bitrate.min || self.default_bitrate_kbps > bitrate.max {
            return Err(PipelineError::InvalidConfig(format!(
                "default_bitrate_kbps {} outside [{}, {}]",
                self.default_bitrate_kbps, bitrate.min, bitrate.max
            )));
        }
        Ok(())
    }
}

/// Mixer cadence and queue depth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub frame_interval_ms: u32,
    /// Frames queued per peer before the oldest is discarded.
    pub max_queued_frames: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 20,
            max_queued_frames: 10,
        }
    }
}

/// Echo canceller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// How far back rendered audio is kept as reference.
    pub tail_length_ms: u32,
    /// Attenuation applied to the reference before subtraction.
    pub reference_gain: f32,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            tail_length_ms: 300,
            reference_gain: 1.0,
        }
    }
}

/// Top-level configuration for a call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub mixer: MixerConfig,
    pub echo: EchoConfig,
    /// Capture audio skips the echo canceller. Mixing still runs.
    pub disable_echo_cancellation: bool,
}

impl PipelineConfig {
    /// Parse a (possibly partial) JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidConfig(format!("JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.video.validate()?;
        if self.mixer.frame_interval_ms == 0 || self.mixer.max_queued_frames == 0 {
            return Err(PipelineError::InvalidConfig(
                "mixer interval and queue depth must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.echo.reference_gain) {
            return Err(PipelineError::InvalidConfig(
                "echo.reference_gain must be within [0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

fn check_default(name: &str, value: f64, range: &StepRange<f64>) -> Result<()> {
    if value < range.min || value > range.max {
        return Err(PipelineError::InvalidConfig(format!(
            "{name} {value} outside [{}, {}]",
            range.min, range.max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
        assert_eq!(AudioConfig::default().samples_per_frame(), 960);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json(
            r#"{ "audio": { "fec": { "trigger_percent": 10 } }, "video": { "mtu": 900 } }"#,
        )
        .unwrap();
        assert_eq!(config.audio.fec.trigger_percent, 10);
        assert_eq!(config.audio.fec.min_reports, 1);
        assert_eq!(config.audio.clock_rate, 48000);
        assert_eq!(config.video.mtu, 900);
        assert_eq!(config.video.default_bitrate_kbps, 320);
    }

    #[test]
    fn test_rejects_out_of_range_defaults() {
        let err = PipelineConfig::from_json(r#"{ "video": { "default_scale": 0.1 } }"#);
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));

        let err = PipelineConfig::from_json(r#"{ "audio": { "channels": 6 } }"#);
        assert_eq!(err, Err(PipelineError::InvalidChannelCount(6)));
    }

    #[test]
    fn test_rejects_zero_recoverable_gap() {
        let err = PipelineConfig::from_json(r#"{ "audio": { "max_recoverable_gap": 0 } }"#);
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
        assert_eq!(AudioConfig::default().max_recoverable_gap, 50);
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(PipelineConfig::from_json("{ audio: ").is_err());
    }
}
