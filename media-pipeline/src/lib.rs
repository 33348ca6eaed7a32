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

//! Loss-adaptive codec pipeline for real-time calls.
//!
//! The crate wraps opaque audio and video codec engines with everything a
//! live stream needs around them: RTP framing, gap detection, packet loss
//! concealment and forward error correction on the receive side, and a
//! closed-loop quality controller driven by RTCP loss reports on the send
//! side. Audio additionally passes through an echo canceller and a
//! multi-peer mixer.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use rtc_media_pipeline::{Call, CodecSession, PipelineConfig};
//! # fn run(audio: Arc<dyn rtc_media_pipeline::engine::AudioEngine>,
//! #        video: Arc<dyn rtc_media_pipeline::engine::VideoEngine>,
//! #        frame: rtc_media_pipeline::AudioFrame) -> rtc_media_pipeline::Result<()> {
//! let call = Call::new(PipelineConfig::default(), audio, video)?;
//! let session = call.attach_audio("remote-peer")?;
//! if let Some(payload) = session.encode(frame)? {
//!     for packet in session.packetize(&payload)? {
//!         let _wire = packet.marshal()?;
//!     }
//! }
//! call.end()?;
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod config;
pub mod echo;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod frame;
pub mod handle;
pub mod packet;
pub mod padep;
pub mod quality;
pub mod recovery;
pub mod sequence;
pub mod session;
pub mod stats;

pub use call::{Call, PeerStatistics};
pub use config::{
    AdaptationConfig, AudioConfig, EchoConfig, FecConfig, MixerConfig, PipelineConfig,
    StepRange, VideoConfig,
};
pub use error::{PipelineError, Result};
pub use feedback::{Feedback, LossBlock, LossReport};
pub use frame::{AudioFrame, EncodedPayload, FrameOrigin, VideoFrame, VideoPlane};
pub use packet::TransportPacket;
pub use quality::{AdaptiveQualityController, Adjustment, EncoderParameters, Profile};
pub use recovery::{RecoveryController, RecoveryReport};
pub use sequence::{Gap, SequenceTracker};
pub use session::{AudioSession, CodecSession, VideoSession};
pub use stats::StreamStatistics;
