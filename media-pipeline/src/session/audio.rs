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

use std::sync::{Arc, Mutex};

use super::{count_steps, lock, CodecSession};
use crate::config::AudioConfig;
use crate::echo::EchoMixAdapter;
use crate::engine::{AudioDecoder, AudioEncoder, AudioEngine, AudioFormat};
use crate::feedback::Feedback;
use crate::frame::{AudioFrame, EncodedPayload};
use crate::handle::Handle;
use crate::packet::TransportPacket;
use crate::padep::{AudioDepacketizer, AudioPacketizer, Depacketizer, PacketStamp, Packetizer};
use crate::quality::{AdaptiveQualityController, Adjustment, EncoderParameters, Profile};
use crate::recovery::RecoveryController;
use crate::sequence::{Gap, SequenceTracker};
use crate::stats::StreamStatistics;
use crate::{PipelineError, Result};

struct SendSide {
    encoder: Handle<Box<dyn AudioEncoder>>,
    controller: AdaptiveQualityController,
}

struct ReceiveSide {
    decoder: Handle<Box<dyn AudioDecoder>>,
    depacketizer: AudioDepacketizer,
    tracker: SequenceTracker,
}

/// One audio stream of a call.
pub struct AudioSession {
    peer_id: String,
    format: AudioFormat,
    engine: Arc<dyn AudioEngine>,
    echo: Option<Arc<EchoMixAdapter>>,
    recovery: RecoveryController,
    send: Mutex<SendSide>,
    packetizer: Mutex<AudioPacketizer>,
    receive: Mutex<ReceiveSide>,
    stats: Mutex<StreamStatistics>,
}

impl AudioSession {
    pub fn new(
        peer_id: impl Into<String>,
        config: &AudioConfig,
        engine: Arc<dyn AudioEngine>,
        echo: Option<Arc<EchoMixAdapter>>,
    ) -> Result<Self> {
        Self::with_stamp(
            peer_id,
            config,
            engine,
            echo,
            PacketStamp::random(config.payload_type),
        )
    }

    /// Like [`AudioSession::new`] with a fixed SSRC and initial sequence number.
    pub fn with_stamp(
        peer_id: impl Into<String>,
        config: &AudioConfig,
        engine: Arc<dyn AudioEngine>,
        echo: Option<Arc<EchoMixAdapter>>,
        stamp: PacketStamp,
    ) -> Result<Self> {
        config.validate()?;
        let format = AudioFormat {
            clock_rate: config.clock_rate,
            channels: config.channels,
            frame_interval_ms: config.frame_interval_ms,
        };
        let controller = AdaptiveQualityController::new(
            Profile::Audio {
                fec: config.fec.clone(),
            },
            config.adaptation.clone(),
            EncoderParameters {
                quality: config.default_quality,
                bitrate_kbps: config.default_bitrate_kbps,
                scale: 1.0,
            },
        );
        Ok(Self {
            peer_id: peer_id.into(),
            format,
            engine,
            echo,
            recovery: RecoveryController::new(format),
            send: Mutex::new(SendSide {
                encoder: Handle::default(),
                controller,
            }),
            packetizer: Mutex::new(AudioPacketizer::new(stamp)),
            receive: Mutex::new(ReceiveSide {
                decoder: Handle::default(),
                depacketizer: AudioDepacketizer,
                tracker: SequenceTracker::with_max_gap(config.max_recoverable_gap),
            }),
            stats: Mutex::new(StreamStatistics::default()),
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn fec_active(&self) -> bool {
        lock(&self.send)
            .map(|s| s.controller.fec_active())
            .unwrap_or(false)
    }

    fn update_stats(&self, f: impl FnOnce(&mut StreamStatistics)) {
        if let Ok(mut stats) = lock(&self.stats) {
            f(&mut stats);
        }
    }
}

impl CodecSession for AudioSession {
    type Frame = AudioFrame;

    fn encode(&self, mut frame: AudioFrame) -> Result<Option<EncodedPayload>> {
        let mut send = lock(&self.send)?;
        let SendSide {
            encoder,
            controller,
        } = &mut *send;
        let encoder = encoder.get_or_try_create("audio encoder", || {
            let mut encoder = self.engine.create_encoder(self.format)?;
            let params = controller.parameters();
            encoder.set_quality(params.quality);
            encoder.set_bitrate_kbps(params.bitrate_kbps);
            log::info!(
                "Created {} encoder for {} at {} kbps",
                self.engine.name(),
                self.peer_id,
                params.bitrate_kbps
            );
            Ok(encoder)
        })?;

        if let Some(echo) = &self.echo {
            if let Err(e) = echo.capture(&mut frame) {
                log::warn!("Echo cancellation skipped: {e}");
            }
        }

        match encoder.encode(&frame.samples) {
            Ok(data) => {
                let parameters = controller.parameters();
                self.update_stats(|s| {
                    s.frames_encoded += 1;
                    s.parameters = Some(parameters);
                });
                Ok(Some(EncodedPayload::new(data, frame.timestamp)))
            }
            Err(e) => {
                log::warn!("Audio encode failed for {}: {e}", self.peer_id);
                Ok(None)
            }
        }
    }

    fn decode(&self, payload: &EncodedPayload) -> Result<Option<AudioFrame>> {
        let mut receive = lock(&self.receive)?;
        let ReceiveSide {
            decoder, tracker, ..
        } = &mut *receive;
        let decoder = decoder.get_or_try_create("audio decoder", || {
            let mut decoder = self.engine.create_decoder(self.format)?;
            decoder.disable_builtin_plc();
            Ok(decoder)
        })?;

        let gap = tracker.advance();
        match gap {
            Gap::Backwards { delta } => {
                log::warn!(
                    "Audio from {} out of order (sequence delta {delta})",
                    self.peer_id
                );
                self.update_stats(|s| s.reordered_packets += 1);
            }
            Gap::Resync { skipped } => {
                log::warn!(
                    "Audio from {} jumped {skipped} packets ahead, resyncing without recovery",
                    self.peer_id
                );
                self.update_stats(|s| s.resyncs += 1);
            }
            Gap::None | Gap::Missing(_) => {}
        }

        let recovered = self
            .recovery
            .decode(&mut **decoder, payload, gap.missing_count());
        self.update_stats(|s| {
            s.record_recovery(&recovered.report);
            if recovered.frame.is_some() {
                s.frames_decoded += 1;
            }
        });

        if let (Some(frame), Some(echo)) = (&recovered.frame, &self.echo) {
            if let Err(e) = echo.render(&self.peer_id, frame) {
                log::warn!("Failed to queue audio from {} for mixing: {e}", self.peer_id);
            }
        }
        Ok(recovered.frame)
    }

    fn packetize(&self, payload: &EncodedPayload) -> Result<Vec<TransportPacket>> {
        let packets = lock(&self.packetizer)?.packetize(payload);
        self.update_stats(|s| s.packets_sent += packets.len() as u64);
        Ok(packets)
    }

    fn depacketize(&self, packet: &TransportPacket) -> Result<Option<EncodedPayload>> {
        let mut receive = lock(&self.receive)?;
        if receive.decoder.is_destroyed() {
            log::error!("Audio depacketize after the stream was destroyed");
            return Err(PipelineError::Destroyed("audio depacketizer"));
        }
        self.update_stats(|s| s.packets_received += 1);
        let Some(out) = receive.depacketizer.push(packet) else {
            return Ok(None);
        };
        receive.tracker.observe(out.sequence_number);
        Ok(Some(out.payload))
    }

    fn process_feedback(&self, feedback: &[Feedback]) -> Result<()> {
        let mut send = lock(&self.send)?;
        let SendSide {
            encoder,
            controller,
        } = &mut *send;
        let Some(encoder) = encoder.live_mut() else {
            log::trace!("Dropping feedback for {}: no encoder yet", self.peer_id);
            return Ok(());
        };

        for item in feedback {
            let Feedback::Report(report) = item else {
                continue;
            };
            let adjustments = controller.process_report(report);
            for adjustment in &adjustments {
                match *adjustment {
                    Adjustment::Quality(quality) => encoder.set_quality(quality),
                    Adjustment::BitrateKbps(bitrate) => encoder.set_bitrate_kbps(bitrate),
                    Adjustment::Scale(_) => {}
                    Adjustment::ActivateFec { loss_percent } => encoder.activate_fec(loss_percent),
                }
            }
            let parameters = controller.parameters();
            let fec_active = controller.fec_active();
            self.update_stats(|s| {
                s.reports_processed += 1;
                s.quality_steps += count_steps(&adjustments);
                s.fec_active = fec_active;
                s.parameters = Some(parameters);
            });
        }
        Ok(())
    }

    fn destroy(&self) {
        // send before receive, the same order everywhere both are held
        match (lock(&self.send), lock(&self.receive)) {
            (Ok(mut send), Ok(mut receive)) => {
                let released_encoder = send.encoder.destroy(|e| e.destroy());
                let released_decoder = receive.decoder.destroy(|d| d.destroy());
                if released_encoder || released_decoder {
                    log::info!("Destroyed audio session for {}", self.peer_id);
                }
            }
            _ => log::error!("Audio session for {} has a poisoned lock", self.peer_id),
        }
        if let Some(echo) = &self.echo {
            if let Err(e) = echo.remove_peer(&self.peer_id) {
                log::warn!("Failed to remove {} from the mixer: {e}", self.peer_id);
            }
        }
    }

    fn statistics(&self) -> StreamStatistics {
        lock(&self.stats).map(|s| s.clone()).unwrap_or_default()
    }
}
