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

//! Multi-peer audio mixer and the thread that drives it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::MixerConfig;
use crate::frame::AudioFrame;
use crate::{PipelineError, Result};

#[derive(Debug, Default)]
struct MixerState {
    /// Interleaved samples per peer, in arrival order.
    sources: HashMap<String, VecDeque<i16>>,
    timestamp: u32,
}

/// Sums one frame interval from every peer into a single output frame.
///
/// Each peer has its own sample queue, so decoded frames of any length are
/// re-chunked to the mixer interval. `add_source_frame` calls are serialized
/// by the mixer lock, so any number of decode threads may feed it.
#[derive(Debug)]
pub struct AudioMixer {
    sample_rate: u32,
    channels: u8,
    /// Interleaved samples per output frame.
    frame_len: usize,
    max_queued_frames: usize,
    state: Mutex<MixerState>,
}

impl AudioMixer {
    pub fn new(sample_rate: u32, channels: u8, config: &MixerConfig) -> Self {
        let frame_len = (sample_rate as usize * config.frame_interval_ms as usize / 1000)
            * channels as usize;
        Self {
            sample_rate,
            channels,
            frame_len,
            max_queued_frames: config.max_queued_frames.max(1),
            state: Mutex::new(MixerState::default()),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Queues a decoded frame from `peer_id`. Frames in a different format
    /// are dropped.
    pub fn add_source_frame(&self, peer_id: &str, frame: &AudioFrame) -> Result<()> {
        if frame.sample_rate != self.sample_rate || frame.channels != self.channels {
            log::warn!(
                "Dropping {} Hz/{} ch frame from {peer_id}: mixer runs at {} Hz/{} ch",
                frame.sample_rate,
                frame.channels,
                self.sample_rate,
                self.channels
            );
            return Ok(());
        }
        let mut state = self.state.lock().map_err(|_| PipelineError::LockPoisoned)?;
        let capacity = self.max_queued_frames * self.frame_len.max(frame.samples.len());
        let queue = state.sources.entry(peer_id.to_string()).or_default();
        let overflow = (queue.len() + frame.samples.len()).saturating_sub(capacity);
        if overflow > 0 {
            queue.drain(..overflow);
            log::debug!("Mixer queue for {peer_id} full, dropped {overflow} oldest samples");
        }
        queue.extend(frame.samples.iter().copied());
        Ok(())
    }

    pub fn remove_source(&self, peer_id: &str) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| PipelineError::LockPoisoned)?;
        state.sources.remove(peer_id);
        Ok(())
    }

    pub fn source_count(&self) -> usize {
        self.state.lock().map(|s| s.sources.len()).unwrap_or(0)
    }

    /// Produces the next mixed frame, or `None` when no peer has audio queued.
    pub fn mix_once(&self) -> Result<Option<AudioFrame>> {
        let mut state = self.state.lock().map_err(|_| PipelineError::LockPoisoned)?;
        let mut mixed = vec![0i16; self.frame_len];
        let mut contributors = 0;
        for queue in state.sources.values_mut() {
            if queue.is_empty() {
                continue;
            }
            contributors += 1;
            let take = queue.len().min(self.frame_len);
            for (out, sample) in mixed.iter_mut().zip(queue.drain(..take)) {
                *out = out.saturating_add(sample);
            }
        }
        if contributors == 0 {
            return Ok(None);
        }
        let timestamp = state.timestamp;
        let frame_samples = self.frame_len / self.channels.max(1) as usize;
        state.timestamp = timestamp.wrapping_add(frame_samples as u32);
        Ok(Some(AudioFrame::new(
            mixed,
            self.sample_rate,
            self.channels,
            timestamp,
        )))
    }
}

/// A named thread invoking a callback at a fixed interval until stopped.
pub struct IntervalThread {
    quit: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IntervalThread {
    pub fn start<F>(name: &'static str, period: Duration, tick: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let quit = Arc::new(AtomicBool::new(false));
        let quit_clone = quit.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while !quit_clone.load(Ordering::Relaxed) {
                    std::thread::sleep(period);
                    if quit_clone.load(Ordering::Relaxed) {
                        break;
                    }
                    tick();
                }
            })
            .map_err(|e| {
                log::error!("Failed to spawn {name} thread: {e}");
                PipelineError::ThreadSpawn(name)
            })?;
        Ok(Self {
            quit,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for the current tick to finish.
    pub fn stop(&mut self) {
        self.quit.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Interval thread panicked");
            }
        }
    }
}

impl Drop for IntervalThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn mixer() -> AudioMixer {
        // 8 kHz mono, 1 ms frames: 8 samples
        AudioMixer::new(
            8000,
            1,
            &MixerConfig {
                frame_interval_ms: 1,
                max_queued_frames: 2,
            },
        )
    }

    fn frame(value: i16) -> AudioFrame {
        AudioFrame::new(vec![value; 8], 8000, 1, 0)
    }

    #[test]
    fn test_mix_sums_peers() {
        let mixer = mixer();
        mixer.add_source_frame("alice", &frame(100)).unwrap();
        mixer.add_source_frame("bob", &frame(-30)).unwrap();
        let mixed = mixer.mix_once().unwrap().unwrap();
        assert_eq!(mixed.samples, vec![70; 8]);
        assert!(mixer.mix_once().unwrap().is_none());
    }

    #[test]
    fn test_mix_saturates() {
        let mixer = mixer();
        mixer.add_source_frame("alice", &frame(i16::MAX)).unwrap();
        mixer.add_source_frame("bob", &frame(10)).unwrap();
        assert_eq!(mixer.mix_once().unwrap().unwrap().samples, vec![i16::MAX; 8]);
    }

    #[test]
    fn test_queue_bound_and_order() {
        let mixer = mixer();
        for v in 1..=3 {
            mixer.add_source_frame("alice", &frame(v)).unwrap();
        }
        // oldest frame (1) was dropped
        assert_eq!(mixer.mix_once().unwrap().unwrap().samples[0], 2);
        let next = mixer.mix_once().unwrap().unwrap();
        assert_eq!(next.samples[0], 3);
        assert_eq!(next.timestamp, 8);
    }

    #[test]
    fn test_short_frames_are_zero_padded_and_mismatches_dropped() {
        let mixer = mixer();
        mixer
            .add_source_frame("alice", &AudioFrame::new(vec![5; 4], 8000, 1, 0))
            .unwrap();
        mixer
            .add_source_frame("bob", &AudioFrame::new(vec![5; 8], 48000, 1, 0))
            .unwrap();
        assert_eq!(mixer.source_count(), 1);
        let mixed = mixer.mix_once().unwrap().unwrap();
        assert_eq!(mixed.samples, vec![5, 5, 5, 5, 0, 0, 0, 0]);
        mixer.remove_source("alice").unwrap();
        assert_eq!(mixer.source_count(), 0);
    }

    #[test]
    fn test_frames_longer_than_the_interval_are_split() {
        let mixer = mixer();
        let samples: Vec<i16> = (1..=20).collect();
        mixer
            .add_source_frame("alice", &AudioFrame::new(samples, 8000, 1, 0))
            .unwrap();
        let chunks: Vec<_> = std::iter::from_fn(|| mixer.mix_once().unwrap())
            .map(|f| f.samples)
            .collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], (1..=8).collect::<Vec<i16>>());
        assert_eq!(chunks[1], (9..=16).collect::<Vec<i16>>());
        assert_eq!(chunks[2], vec![17, 18, 19, 20, 0, 0, 0, 0]);
    }

    #[test]
    fn test_interval_thread_ticks_and_stops() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let mut thread = IntervalThread::start("test-ticker", Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        while ticks.load(Ordering::Relaxed) < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }
        thread.stop();
        let after_stop = ticks.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(ticks.load(Ordering::Relaxed), after_stop);
        thread.stop();
    }
}
