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

//! Echo cancellation and mixing around the audio codec.
//!
//! Captured audio passes through the canceller before it is encoded. Every
//! frame decoded from a remote peer, concealed and FEC frames included, is
//! queued in the mixer under that peer's id. The mixer runs on its own
//! cadence and each frame it produces becomes the canceller's reference.

mod canceller;
mod mixer;

pub use canceller::{EchoCanceller, PassthroughCanceller, ReferenceSubtractor};
pub use mixer::{AudioMixer, IntervalThread};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::frame::AudioFrame;
use crate::{PipelineError, Result};

/// Receives every mixed frame, typically the speaker output.
pub type MixSink = Box<dyn Fn(&AudioFrame) + Send + Sync>;

struct Shared {
    mixer: AudioMixer,
    canceller: Mutex<Box<dyn EchoCanceller>>,
    sink: Mutex<Option<MixSink>>,
}

impl Shared {
    fn tick(&self) -> Result<Option<AudioFrame>> {
        let Some(mixed) = self.mixer.mix_once()? else {
            return Ok(None);
        };
        self.canceller
            .lock()
            .map_err(|_| PipelineError::LockPoisoned)?
            .render(&mixed);
        if let Some(sink) = self
            .sink
            .lock()
            .map_err(|_| PipelineError::LockPoisoned)?
            .as_ref()
        {
            sink(&mixed);
        }
        Ok(Some(mixed))
    }
}

/// One per call, shared by every audio stream in it.
pub struct EchoMixAdapter {
    shared: Arc<Shared>,
    interval: Duration,
    ticker: Mutex<Option<IntervalThread>>,
}

impl EchoMixAdapter {
    pub fn new(config: &PipelineConfig) -> Self {
        let audio = &config.audio;
        let canceller: Box<dyn EchoCanceller> = if config.disable_echo_cancellation {
            Box::new(PassthroughCanceller)
        } else {
            Box::new(ReferenceSubtractor::new(
                &config.echo,
                audio.clock_rate,
                audio.channels,
            ))
        };
        Self::with_canceller(config, canceller)
    }

    pub fn with_canceller(config: &PipelineConfig, canceller: Box<dyn EchoCanceller>) -> Self {
        let mixer = AudioMixer::new(config.audio.clock_rate, config.audio.channels, &config.mixer);
        Self {
            shared: Arc::new(Shared {
                mixer,
                canceller: Mutex::new(canceller),
                sink: Mutex::new(None),
            }),
            interval: Duration::from_millis(config.mixer.frame_interval_ms.max(1) as u64),
            ticker: Mutex::new(None),
        }
    }

    pub fn set_sink(&self, sink: MixSink) -> Result<()> {
        *self
            .shared
            .sink
            .lock()
            .map_err(|_| PipelineError::LockPoisoned)? = Some(sink);
        Ok(())
    }

    /// Removes echo from a captured frame before it is encoded.
    pub fn capture(&self, frame: &mut AudioFrame) -> Result<()> {
        self.shared
            .canceller
            .lock()
            .map_err(|_| PipelineError::LockPoisoned)?
            .capture(frame);
        Ok(())
    }

    /// Queues a decoded frame and the frames recovered in front of it.
    pub fn render(&self, peer_id: &str, frame: &AudioFrame) -> Result<()> {
        for recovered in &frame.preceding {
            self.shared.mixer.add_source_frame(peer_id, recovered)?;
        }
        self.shared.mixer.add_source_frame(peer_id, frame)
    }

    pub fn remove_peer(&self, peer_id: &str) -> Result<()> {
        self.shared.mixer.remove_source(peer_id)
    }

    /// Runs one mixer cycle on the calling thread.
    pub fn mix_now(&self) -> Result<Option<AudioFrame>> {
        self.shared.tick()
    }

    pub fn mixer(&self) -> &AudioMixer {
        &self.shared.mixer
    }

    /// Starts the mixer thread. Starting twice is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut ticker = self.ticker.lock().map_err(|_| PipelineError::LockPoisoned)?;
        if ticker.is_some() {
            return Ok(());
        }
        let shared = self.shared.clone();
        *ticker = Some(IntervalThread::start("audio-mixer", self.interval, move || {
            if let Err(e) = shared.tick() {
                log::error!("Mixer tick failed: {e}");
            }
        })?);
        log::info!("Audio mixer started ({:?} cadence)", self.interval);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let mut ticker = self.ticker.lock().map_err(|_| PipelineError::LockPoisoned)?;
        if let Some(mut thread) = ticker.take() {
            thread.stop();
            log::info!("Audio mixer stopped");
        }
        // nothing plays out once stopped
        self.shared
            .canceller
            .lock()
            .map_err(|_| PipelineError::LockPoisoned)?
            .reset();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.ticker.lock().map(|t| t.is_some()).unwrap_or(false)
    }
}

impl Drop for EchoMixAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Failed to stop the audio mixer: {e}");
        }
    }
}
