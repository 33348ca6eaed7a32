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

//! Closed-loop encoder tuning driven by receiver loss reports.
//!
//! The controller is a hysteresis step controller: every loss block counts
//! towards either a lossy or a lossless streak. When a streak grows past the
//! configured threshold it resets and every adjustable parameter moves one
//! step (down for loss, up for clean reports), each clamped to its own
//! bounds. Audio adjusts quality only; video adjusts quality, bitrate and
//! spatial scale. Audio streams may additionally switch on forward error
//! correction, which then stays on for the lifetime of the stream.

use serde::{Deserialize, Serialize};

use crate::config::{AdaptationConfig, FecConfig, StepRange};
use crate::feedback::{LossBlock, LossReport};

/// Which parameters a stream can adjust.
#[derive(Debug, Clone, PartialEq)]
pub enum Profile {
    Audio { fec: FecConfig },
    Video,
}

/// Current encoder parameters owned by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderParameters {
    pub quality: f64,
    pub bitrate_kbps: u32,
    pub scale: f64,
}

/// A change the session must apply to its encoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    Quality(f64),
    BitrateKbps(u32),
    Scale(f64),
    /// Switch on in-band FEC tuned for the given loss percentage.
    ActivateFec { loss_percent: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Down,
    Up,
}

// Keeps repeated 0.1 steps on the decimal grid.
fn snap(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

fn step_f64(value: f64, range: &StepRange<f64>, direction: Direction) -> f64 {
    let next = match direction {
        Direction::Down => value - range.step,
        Direction::Up => value + range.step,
    };
    snap(next.clamp(range.min, range.max))
}

fn step_u32(value: u32, range: &StepRange<u32>, direction: Direction) -> u32 {
    let next = match direction {
        Direction::Down => value.saturating_sub(range.step),
        Direction::Up => value.saturating_add(range.step),
    };
    next.clamp(range.min, range.max)
}

pub struct AdaptiveQualityController {
    profile: Profile,
    adaptation: AdaptationConfig,
    params: EncoderParameters,
    loss_streak: u32,
    no_loss_streak: u32,
    reports_received: u64,
    fec_active: bool,
}

impl AdaptiveQualityController {
    /// `initial` is clamped to the configured bounds.
    pub fn new(profile: Profile, adaptation: AdaptationConfig, initial: EncoderParameters) -> Self {
        let params = EncoderParameters {
            quality: initial
                .quality
                .clamp(adaptation.quality.min, adaptation.quality.max),
            bitrate_kbps: initial
                .bitrate_kbps
                .clamp(adaptation.bitrate_kbps.min, adaptation.bitrate_kbps.max),
            scale: initial
                .scale
                .clamp(adaptation.scale.min, adaptation.scale.max),
        };
        Self {
            profile,
            adaptation,
            params,
            loss_streak: 0,
            no_loss_streak: 0,
            reports_received: 0,
            fec_active: false,
        }
    }

    pub fn parameters(&self) -> EncoderParameters {
        self.params
    }

    pub fn fec_active(&self) -> bool {
        self.fec_active
    }

    pub fn reports_received(&self) -> u64 {
        self.reports_received
    }

    pub fn loss_streak(&self) -> u32 {
        self.loss_streak
    }

    pub fn no_loss_streak(&self) -> u32 {
        self.no_loss_streak
    }

    /// Folds one report into the controller and returns the encoder changes
    /// it triggers, in the order they should be applied.
    pub fn process_report(&mut self, report: &LossReport) -> Vec<Adjustment> {
        self.reports_received += 1;
        let mut adjustments = Vec::new();
        for block in &report.blocks {
            log::debug!(
                "Loss report: {:.2}% packet loss ({} cumulative packets lost)",
                block.percent_lost * 100.0,
                block.cumulative_lost
            );
            self.process_block(block, &mut adjustments);
        }
        adjustments
    }

    fn process_block(&mut self, block: &LossBlock, adjustments: &mut Vec<Adjustment>) {
        let direction = if block.is_lossy() {
            self.no_loss_streak = 0;
            self.loss_streak += 1;
            (self.loss_streak > self.adaptation.streak_threshold).then(|| {
                self.loss_streak = 0;
                Direction::Down
            })
        } else {
            self.loss_streak = 0;
            self.no_loss_streak += 1;
            (self.no_loss_streak > self.adaptation.streak_threshold).then(|| {
                self.no_loss_streak = 0;
                Direction::Up
            })
        };

        if let Some(direction) = direction {
            self.step(direction, adjustments);
        }

        if let Profile::Audio { fec } = &self.profile {
            if !fec.disabled
                && !self.fec_active
                && self.reports_received > fec.min_reports
                && block.percent_lost * 100.0 > fec.trigger_percent as f64
            {
                log::info!("Activating FEC for audio stream");
                self.fec_active = true;
                adjustments.push(Adjustment::ActivateFec {
                    loss_percent: fec.trigger_percent,
                });
            }
        }
    }

    fn step(&mut self, direction: Direction, adjustments: &mut Vec<Adjustment>) {
        let verb = match direction {
            Direction::Down => "Decreasing",
            Direction::Up => "Increasing",
        };

        let quality = step_f64(self.params.quality, &self.adaptation.quality, direction);
        if quality != self.params.quality {
            self.params.quality = quality;
            log::info!("{verb} encoder quality to {:.0}%", quality * 100.0);
            adjustments.push(Adjustment::Quality(quality));
        }

        if matches!(self.profile, Profile::Video) {
            let bitrate = step_u32(
                self.params.bitrate_kbps,
                &self.adaptation.bitrate_kbps,
                direction,
            );
            if bitrate != self.params.bitrate_kbps {
                self.params.bitrate_kbps = bitrate;
                log::info!("{verb} encoder bitrate to {bitrate} kbps");
                adjustments.push(Adjustment::BitrateKbps(bitrate));
            }

            let scale = step_f64(self.params.scale, &self.adaptation.scale, direction);
            if scale != self.params.scale {
                self.params.scale = scale;
                log::info!("{verb} encoder scale to {:.0}%", scale * 100.0);
                adjustments.push(Adjustment::Scale(scale));
            }
        }
    }
}
