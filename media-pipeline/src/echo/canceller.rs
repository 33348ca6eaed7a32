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

use std::collections::VecDeque;

use crate::config::EchoConfig;
use crate::frame::AudioFrame;

/// Removes the rendered far-end signal from captured audio.
pub trait EchoCanceller: Send {
    /// Feeds audio that was just played out.
    fn render(&mut self, reference: &AudioFrame);

    /// Cleans a captured frame in place.
    fn capture(&mut self, frame: &mut AudioFrame);

    fn reset(&mut self);
}

/// Subtracts the played-out reference, sample-aligned in playout order, from
/// the captured signal. Reference older than the tail length is forgotten.
#[derive(Debug)]
pub struct ReferenceSubtractor {
    reference: VecDeque<i16>,
    tail_samples: usize,
    gain: f32,
}

impl ReferenceSubtractor {
    pub fn new(config: &EchoConfig, sample_rate: u32, channels: u8) -> Self {
        let tail_samples =
            sample_rate as usize * config.tail_length_ms as usize / 1000 * channels as usize;
        Self {
            reference: VecDeque::with_capacity(tail_samples),
            tail_samples,
            gain: config.reference_gain,
        }
    }

    pub fn buffered(&self) -> usize {
        self.reference.len()
    }
}

impl EchoCanceller for ReferenceSubtractor {
    fn render(&mut self, reference: &AudioFrame) {
        self.reference.extend(reference.samples.iter().copied());
        let excess = self.reference.len().saturating_sub(self.tail_samples);
        self.reference.drain(..excess);
    }

    fn capture(&mut self, frame: &mut AudioFrame) {
        for sample in frame.samples.iter_mut() {
            let Some(echo) = self.reference.pop_front() else {
                break;
            };
            let cleaned = *sample as f32 - echo as f32 * self.gain;
            *sample = cleaned.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
    }

    fn reset(&mut self) {
        self.reference.clear();
    }
}

/// Leaves captured audio untouched.
#[derive(Debug, Default)]
pub struct PassthroughCanceller;

impl EchoCanceller for PassthroughCanceller {
    fn render(&mut self, _reference: &AudioFrame) {}

    fn capture(&mut self, _frame: &mut AudioFrame) {}

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtractor(tail_length_ms: u32) -> ReferenceSubtractor {
        ReferenceSubtractor::new(
            &EchoConfig {
                tail_length_ms,
                reference_gain: 1.0,
            },
            1000,
            1,
        )
    }

    #[test]
    fn test_rendered_signal_is_removed() {
        let mut aec = subtractor(300);
        aec.render(&AudioFrame::new(vec![100, 200, -50], 1000, 1, 0));
        let mut captured = AudioFrame::new(vec![150, 200, -50, 7], 1000, 1, 0);
        aec.capture(&mut captured);
        assert_eq!(captured.samples, vec![50, 0, 0, 7]);
        assert_eq!(aec.buffered(), 0);
    }

    #[test]
    fn test_tail_bounds_reference() {
        // 5 ms at 1 kHz
        let mut aec = subtractor(5);
        aec.render(&AudioFrame::new((1..=8).collect(), 1000, 1, 0));
        assert_eq!(aec.buffered(), 5);
        let mut captured = AudioFrame::new(vec![10; 1], 1000, 1, 0);
        aec.capture(&mut captured);
        assert_eq!(captured.samples, vec![6]);
    }

    #[test]
    fn test_subtraction_saturates() {
        let mut aec = subtractor(300);
        aec.render(&AudioFrame::new(vec![i16::MAX], 1000, 1, 0));
        let mut captured = AudioFrame::new(vec![i16::MIN], 1000, 1, 0);
        aec.capture(&mut captured);
        assert_eq!(captured.samples, vec![i16::MIN]);
    }
}
