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

//! A call: the set of media streams exchanged with remote peers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::echo::EchoMixAdapter;
use crate::engine::{AudioEngine, VideoEngine};
use crate::session::{lock, AudioSession, CodecSession, VideoSession};
use crate::stats::StreamStatistics;
use crate::{PipelineError, Result};

/// Statistics for both streams of one peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerStatistics {
    pub audio: Option<StreamStatistics>,
    pub video: Option<StreamStatistics>,
}

/// Owns the echo/mix path and one audio and one video session per peer.
///
/// The mixer starts with the call and stops when it ends. Ending the call
/// destroys every session.
pub struct Call {
    config: PipelineConfig,
    audio_engine: Arc<dyn AudioEngine>,
    video_engine: Arc<dyn VideoEngine>,
    echo: Arc<EchoMixAdapter>,
    audio: Mutex<HashMap<String, Arc<AudioSession>>>,
    video: Mutex<HashMap<String, Arc<VideoSession>>>,
    ended: AtomicBool,
}

impl Call {
    pub fn new(
        config: PipelineConfig,
        audio_engine: Arc<dyn AudioEngine>,
        video_engine: Arc<dyn VideoEngine>,
    ) -> Result<Self> {
        config.validate()?;
        let echo = Arc::new(EchoMixAdapter::new(&config));
        echo.start()?;
        log::info!(
            "Call started with {} audio and {} video",
            audio_engine.name(),
            video_engine.name()
        );
        Ok(Self {
            config,
            audio_engine,
            video_engine,
            echo,
            audio: Mutex::new(HashMap::new()),
            video: Mutex::new(HashMap::new()),
            ended: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn echo(&self) -> &Arc<EchoMixAdapter> {
        &self.echo
    }

    fn ensure_active(&self) -> Result<()> {
        if self.ended.load(Ordering::SeqCst) {
            log::error!("Stream attached to a call that already ended");
            return Err(PipelineError::Destroyed("call"));
        }
        Ok(())
    }

    /// Returns the audio session for `peer_id`, creating it on first use.
    pub fn attach_audio(&self, peer_id: &str) -> Result<Arc<AudioSession>> {
        self.ensure_active()?;
        let mut sessions = lock(&self.audio)?;
        if let Some(session) = sessions.get(peer_id) {
            return Ok(session.clone());
        }
        let session = Arc::new(AudioSession::new(
            peer_id,
            &self.config.audio,
            self.audio_engine.clone(),
            Some(self.echo.clone()),
        )?);
        sessions.insert(peer_id.to_string(), session.clone());
        log::info!("Attached audio stream for {peer_id}");
        Ok(session)
    }

    /// Returns the video session for `peer_id`, creating it on first use.
    pub fn attach_video(&self, peer_id: &str) -> Result<Arc<VideoSession>> {
        self.ensure_active()?;
        let mut sessions = lock(&self.video)?;
        if let Some(session) = sessions.get(peer_id) {
            return Ok(session.clone());
        }
        let session = Arc::new(VideoSession::new(
            peer_id,
            &self.config.video,
            self.video_engine.clone(),
        )?);
        sessions.insert(peer_id.to_string(), session.clone());
        log::info!("Attached video stream for {peer_id}");
        Ok(session)
    }

    pub fn audio_session(&self, peer_id: &str) -> Option<Arc<AudioSession>> {
        lock(&self.audio).ok()?.get(peer_id).cloned()
    }

    pub fn video_session(&self, peer_id: &str) -> Option<Arc<VideoSession>> {
        lock(&self.video).ok()?.get(peer_id).cloned()
    }

    /// Destroys both streams of `peer_id`. Returns whether anything was
    /// attached.
    pub fn detach(&self, peer_id: &str) -> Result<bool> {
        let audio = lock(&self.audio)?.remove(peer_id);
        let video = lock(&self.video)?.remove(peer_id);
        let attached = audio.is_some() || video.is_some();
        if let Some(session) = audio {
            session.destroy();
        }
        if let Some(session) = video {
            session.destroy();
        }
        if attached {
            log::info!("Detached streams for {peer_id}");
        }
        Ok(attached)
    }

    /// Peers with at least one attached stream, sorted.
    pub fn peers(&self) -> Vec<String> {
        let mut peers = BTreeSet::new();
        if let Ok(audio) = lock(&self.audio) {
            peers.extend(audio.keys().cloned());
        }
        if let Ok(video) = lock(&self.video) {
            peers.extend(video.keys().cloned());
        }
        peers.into_iter().collect()
    }

    pub fn statistics(&self) -> BTreeMap<String, PeerStatistics> {
        let mut out: BTreeMap<String, PeerStatistics> = BTreeMap::new();
        if let Ok(audio) = lock(&self.audio) {
            for (peer, session) in audio.iter() {
                out.entry(peer.clone()).or_default().audio = Some(session.statistics());
            }
        }
        if let Ok(video) = lock(&self.video) {
            for (peer, session) in video.iter() {
                out.entry(peer.clone()).or_default().video = Some(session.statistics());
            }
        }
        out
    }

    /// Destroys every session and stops the mixer. Safe to call twice.
    pub fn end(&self) -> Result<()> {
        if self.ended.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let audio: Vec<_> = lock(&self.audio)?.drain().map(|(_, s)| s).collect();
        let video: Vec<_> = lock(&self.video)?.drain().map(|(_, s)| s).collect();
        for session in &audio {
            session.destroy();
        }
        for session in &video {
            session.destroy();
        }
        self.echo.stop()?;
        log::info!(
            "Call ended ({} audio, {} video streams)",
            audio.len(),
            video.len()
        );
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        if let Err(e) = self.end() {
            log::error!("Failed to end call cleanly: {e}");
        }
    }
}
