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

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur in the media pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Invalid feedback: {0}")]
    InvalidFeedback(String),

    #[error("Codec engine error: {0}")]
    Engine(String),

    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(u8),

    /// The stream's encoder/decoder were already released. Calling into a
    /// destroyed stream is a lifecycle bug in the caller.
    #[error("{0} used after the stream was destroyed")]
    Destroyed(&'static str),

    #[error("Stream state lock poisoned")]
    LockPoisoned,

    #[error("Failed to start {0} thread")]
    ThreadSpawn(&'static str),
}
