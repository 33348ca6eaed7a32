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
use crate::config::VideoConfig;
use crate::engine::{DecodedImage, VideoDecoder, VideoEncoder, VideoEngine};
use crate::feedback::Feedback;
use crate::frame::{EncodedPayload, VideoFrame, VideoPlane};
use crate::handle::Handle;
use crate::packet::TransportPacket;
use crate::padep::{Depacketizer, PacketStamp, Packetizer, Vp8Depacketizer, Vp8Packetizer};
use crate::quality::{AdaptiveQualityController, Adjustment, EncoderParameters, Profile};
use crate::stats::StreamStatistics;
use crate::{PipelineError, Result};

struct SendSide {
    encoder: Handle<Box<dyn VideoEncoder>>,
    controller: AdaptiveQualityController,
}

struct ReceiveSide {
    decoder: Handle<Box<dyn VideoDecoder>>,
    depacketizer: Vp8Depacketizer,
    /// Set by the depacketizer for the payload it handed out last.
    sequence_violated: bool,
    needs_keyframe: bool,
}

impl From<(DecodedImage, u32)> for VideoFrame {
    fn from((image, timestamp): (DecodedImage, u32)) -> Self {
        let planes = image
            .planes
            .into_iter()
            .map(|(data, stride)| VideoPlane { data, stride })
            .collect();
        let mut frame = VideoFrame::new(image.width, image.height, planes, timestamp);
        frame.rotation = image.rotation;
        frame
    }
}

/// One video stream of a call.
///
/// Video has no concealment. A sequencing violation drops the affected frame
/// and marks the decoder as needing a keyframe; delta frames are dropped
/// until one decodes.
pub struct VideoSession {
    peer_id: String,
    engine: Arc<dyn VideoEngine>,
    send: Mutex<SendSide>,
    packetizer: Mutex<Vp8Packetizer>,
    receive: Mutex<ReceiveSide>,
    stats: Mutex<StreamStatistics>,
}

impl VideoSession {
    pub fn new(
        peer_id: impl Into<String>,
        config: &VideoConfig,
        engine: Arc<dyn VideoEngine>,
    ) -> Result<Self> {
        Self::with_stamp(
            peer_id,
            config,
            engine,
            PacketStamp::random(config.payload_type),
        )
    }

    pub fn with_stamp(
        peer_id: impl Into<String>,
        config: &VideoConfig,
        engine: Arc<dyn VideoEngine>,
        stamp: PacketStamp,
    ) -> Result<Self> {
        config.validate()?;
        let controller = AdaptiveQualityController::new(
            Profile::Video,
            config.adaptation.clone(),
            EncoderParameters {
                quality: config.default_quality,
                bitrate_kbps: config.default_bitrate_kbps,
                scale: config.default_scale,
            },
        );
        Ok(Self {
            peer_id: peer_id.into(),
            engine,
            send: Mutex::new(SendSide {
                encoder: Handle::default(),
                controller,
            }),
            packetizer: Mutex::new(Vp8Packetizer::new(stamp, config.mtu)),
            receive: Mutex::new(ReceiveSide {
                decoder: Handle::default(),
                depacketizer: Vp8Depacketizer::new(),
                sequence_violated: false,
                needs_keyframe: false,
            }),
            stats: Mutex::new(StreamStatistics::default()),
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Whether the receive side is waiting for a keyframe. Always `false`
    /// before the decoder exists.
    pub fn decoder_needs_keyframe(&self) -> bool {
        lock(&self.receive)
            .map(|r| r.decoder.is_live() && r.needs_keyframe)
            .unwrap_or(false)
    }

    fn update_stats(&self, f: impl FnOnce(&mut StreamStatistics)) {
        if let Ok(mut stats) = lock(&self.stats) {
            f(&mut stats);
        }
    }
}

impl CodecSession for VideoSession {
    type Frame = VideoFrame;

    fn encode(&self, frame: VideoFrame) -> Result<Option<EncodedPayload>> {
        let mut send = lock(&self.send)?;
        let SendSide {
            encoder,
            controller,
        } = &mut *send;
        let encoder = encoder.get_or_try_create("video encoder", || {
            let mut encoder = self.engine.create_encoder()?;
            let params = controller.parameters();
            encoder.set_quality(params.quality);
            encoder.set_bitrate_kbps(params.bitrate_kbps);
            encoder.set_scale(params.scale);
            log::info!(
                "Created {} encoder for {} at {} kbps",
                self.engine.name(),
                self.peer_id,
                params.bitrate_kbps
            );
            Ok(encoder)
        })?;

        if frame.reset_keyframe {
            encoder.force_keyframe();
        }
        match encoder.encode(&frame) {
            Ok(data) => {
                let parameters = controller.parameters();
                self.update_stats(|s| {
                    s.frames_encoded += 1;
                    s.parameters = Some(parameters);
                });
                Ok(Some(EncodedPayload::new(data, frame.timestamp)))
            }
            Err(e) => {
                log::warn!("Video encode failed for {}: {e}", self.peer_id);
                Ok(None)
            }
        }
    }

    fn decode(&self, payload: &EncodedPayload) -> Result<Option<VideoFrame>> {
        let mut receive = lock(&self.receive)?;
        let ReceiveSide {
            decoder,
            sequence_violated,
            needs_keyframe,
            ..
        } = &mut *receive;
        let decoder = decoder.get_or_try_create("video decoder", || self.engine.create_decoder())?;

        if std::mem::take(sequence_violated) {
            if !*needs_keyframe {
                log::info!("Video from {} lost packets, waiting for a keyframe", self.peer_id);
            }
            *needs_keyframe = true;
            self.update_stats(|s| s.dropped_frames += 1);
            return Ok(None);
        }
        if *needs_keyframe && !self.engine.is_keyframe(&payload.data) {
            self.update_stats(|s| s.dropped_frames += 1);
            return Ok(None);
        }

        match decoder.decode(&payload.data) {
            Ok(Some(image)) => {
                if *needs_keyframe {
                    log::info!("Video from {} resumed on keyframe", self.peer_id);
                    *needs_keyframe = false;
                }
                self.update_stats(|s| s.frames_decoded += 1);
                Ok(Some(VideoFrame::from((image, payload.timestamp))))
            }
            Ok(None) => {
                *needs_keyframe = true;
                self.update_stats(|s| s.decode_failures += 1);
                Ok(None)
            }
            Err(e) => {
                log::warn!("Video decode failed for {}: {e}", self.peer_id);
                *needs_keyframe = true;
                self.update_stats(|s| s.decode_failures += 1);
                Ok(None)
            }
        }
    }

    fn packetize(&self, payload: &EncodedPayload) -> Result<Vec<TransportPacket>> {
        let packets = lock(&self.packetizer)?.packetize(payload);
        self.update_stats(|s| s.packets_sent += packets.len() as u64);
        Ok(packets)
    }

    fn depacketize(&self, packet: &TransportPacket) -> Result<Option<EncodedPayload>> {
        let mut receive = lock(&self.receive)?;
        if receive.decoder.is_destroyed() {
            log::error!("Video depacketize after the stream was destroyed");
            return Err(PipelineError::Destroyed("video depacketizer"));
        }
        self.update_stats(|s| s.packets_received += 1);
        let Some(out) = receive.depacketizer.push(packet) else {
            return Ok(None);
        };
        if out.sequence_violation {
            self.update_stats(|s| s.reordered_packets += 1);
        }
        receive.sequence_violated = out.sequence_violation;
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
            match item {
                Feedback::KeyframeRequest => {
                    log::info!("Keyframe requested for video to {}", self.peer_id);
                    encoder.force_keyframe();
                    self.update_stats(|s| s.keyframes_requested += 1);
                }
                Feedback::Report(report) => {
                    let adjustments = controller.process_report(report);
                    for adjustment in &adjustments {
                        match *adjustment {
                            Adjustment::Quality(quality) => encoder.set_quality(quality),
                            Adjustment::BitrateKbps(bitrate) => encoder.set_bitrate_kbps(bitrate),
                            Adjustment::Scale(scale) => encoder.set_scale(scale),
                            Adjustment::ActivateFec { .. } => {}
                        }
                    }
                    let parameters = controller.parameters();
                    self.update_stats(|s| {
                        s.reports_processed += 1;
                        s.quality_steps += count_steps(&adjustments);
                        s.parameters = Some(parameters);
                    });
                }
            }
        }
        Ok(())
    }

    fn destroy(&self) {
        match (lock(&self.send), lock(&self.receive)) {
            (Ok(mut send), Ok(mut receive)) => {
                let released_encoder = send.encoder.destroy(|e| e.destroy());
                let released_decoder = receive.decoder.destroy(|d| d.destroy());
                if released_encoder || released_decoder {
                    log::info!("Destroyed video session for {}", self.peer_id);
                }
            }
            _ => log::error!("Video session for {} has a poisoned lock", self.peer_id),
        }
    }

    fn statistics(&self) -> StreamStatistics {
        lock(&self.stats).map(|s| s.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::LossReport;
    use crate::session::testing::MockVideoEngine;
    use approx::assert_relative_eq;

    fn config() -> VideoConfig {
        VideoConfig {
            mtu: 4,
            ..Default::default()
        }
    }

    fn session(engine: &MockVideoEngine) -> VideoSession {
        VideoSession::with_stamp(
            "remote",
            &config(),
            Arc::new(engine.clone()),
            PacketStamp::new(9, 96, 500),
        )
        .unwrap()
    }

    fn picture(value: u8, timestamp: u32) -> VideoFrame {
        VideoFrame::new(
            2,
            2,
            vec![VideoPlane {
                data: vec![value; 8],
                stride: 2,
            }],
            timestamp,
        )
    }

    fn send(session: &VideoSession, frame: VideoFrame) -> Vec<TransportPacket> {
        let payload = session.encode(frame).unwrap().unwrap();
        session.packetize(&payload).unwrap()
    }

    fn receive(session: &VideoSession, packets: &[TransportPacket]) -> Option<VideoFrame> {
        let mut decoded = None;
        for packet in packets {
            if let Some(payload) = session.depacketize(packet).unwrap() {
                decoded = session.decode(&payload).unwrap();
            }
        }
        decoded
    }

    #[test]
    fn test_round_trip_fragments() {
        let engine = MockVideoEngine::default();
        let sender = session(&engine);
        let receiver = session(&engine);

        let packets = send(&sender, picture(7, 3000));
        // 9 payload bytes, 3 per packet
        assert_eq!(packets.len(), 3);
        let frame = receive(&receiver, &packets).unwrap();
        assert_eq!(frame.planes[0].data, vec![7; 8]);
        assert_eq!(frame.timestamp, 3000);
        assert!(!receiver.decoder_needs_keyframe());
    }

    #[test]
    fn test_needs_keyframe_false_before_decoder() {
        let engine = MockVideoEngine::default();
        assert!(!session(&engine).decoder_needs_keyframe());
    }

    #[test]
    fn test_loss_waits_for_keyframe() {
        let engine = MockVideoEngine::default();
        let sender = session(&engine);
        let receiver = session(&engine);

        assert!(receive(&receiver, &send(&sender, picture(1, 0))).is_some());
        let lost = send(&sender, picture(2, 3000));
        // drop the middle fragment
        assert!(receive(&receiver, &[lost[0].clone(), lost[2].clone()]).is_none());

        // next delta frame completes but carries the violation
        assert!(receive(&receiver, &send(&sender, picture(3, 6000))).is_none());
        assert!(receiver.decoder_needs_keyframe());
        assert!(receive(&receiver, &send(&sender, picture(4, 9000))).is_none());

        // PLI path on the sender
        sender
            .process_feedback(&[Feedback::KeyframeRequest])
            .unwrap();
        let frame = receive(&receiver, &send(&sender, picture(5, 12000))).unwrap();
        assert_eq!(frame.planes[0].data, vec![5; 8]);
        assert!(!receiver.decoder_needs_keyframe());

        let stats = receiver.statistics();
        assert_eq!(stats.dropped_frames, 2);
        assert_eq!(sender.statistics().keyframes_requested, 1);
        assert_eq!(engine.log.lock().unwrap().keyframes_forced, 1);
    }

    #[test]
    fn test_reset_keyframe_forces_keyframe() {
        let engine = MockVideoEngine::default();
        let sender = session(&engine);
        let first = sender.encode(picture(1, 0)).unwrap().unwrap();
        let second = sender.encode(picture(1, 1)).unwrap().unwrap();
        let mut reset = picture(1, 2);
        reset.reset_keyframe = true;
        let third = sender.encode(reset).unwrap().unwrap();

        assert!(engine.is_keyframe(&first.data));
        assert!(!engine.is_keyframe(&second.data));
        assert!(engine.is_keyframe(&third.data));
    }

    #[test]
    fn test_loss_reports_step_all_parameters() {
        let engine = MockVideoEngine::default();
        let sender = session(&engine);
        sender.encode(picture(1, 0)).unwrap();
        let batch: Vec<_> = (0..6)
            .map(|_| Feedback::Report(LossReport::single(0.1, 1)))
            .collect();
        sender.process_feedback(&batch).unwrap();

        let log = engine.log.lock().unwrap().clone();
        assert_eq!(log.bitrates, vec![320, 256]);
        assert_relative_eq!(log.qualities[1], 0.4);
        assert_relative_eq!(log.scales[1], 0.8);
        assert!(log.fec_activations.is_empty());
        assert_eq!(sender.statistics().quality_steps, 3);
    }

    #[test]
    fn test_feedback_without_encoder_is_noop() {
        let engine = MockVideoEngine::default();
        let sender = session(&engine);
        sender
            .process_feedback(&[Feedback::KeyframeRequest])
            .unwrap();
        assert_eq!(engine.log.lock().unwrap().keyframes_forced, 0);
    }

    #[test]
    fn test_destroy_twice() {
        let engine = MockVideoEngine::default();
        let session = session(&engine);
        let packets = send(&session, picture(1, 0));
        receive(&session, &packets);
        session.destroy();
        session.destroy();
        let log = engine.log.lock().unwrap().clone();
        assert_eq!(log.encoders_destroyed, 1);
        assert_eq!(log.decoders_destroyed, 1);
        assert!(matches!(
            session.encode(picture(1, 0)),
            Err(PipelineError::Destroyed(_))
        ));
        assert!(!session.decoder_needs_keyframe());
    }
}
