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

//! Per-stream counters.

use serde::{Deserialize, Serialize};

use crate::quality::EncoderParameters;
use crate::recovery::RecoveryReport;

/// Snapshot of one stream's activity since it was attached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStatistics {
    pub frames_encoded: u64,
    pub frames_decoded: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Packets inferred lost from sequence gaps.
    pub packets_missing: u64,
    pub concealed_frames: u64,
    pub fec_recovered_frames: u64,
    pub fec_fallbacks: u64,
    pub decode_failures: u64,
    /// Duplicate, late or out-of-sequence packets.
    pub reordered_packets: u64,
    /// Jumps too far ahead to recover; decoding restarted at the new position.
    pub resyncs: u64,
    /// Video frames dropped while waiting for a keyframe.
    pub dropped_frames: u64,
    pub reports_processed: u64,
    pub quality_steps: u64,
    pub keyframes_requested: u64,
    pub fec_active: bool,
    /// Encoder parameters in effect, once an encoder exists.
    pub parameters: Option<EncoderParameters>,
}

impl StreamStatistics {
    pub(crate) fn record_recovery(&mut self, report: &RecoveryReport) {
        self.packets_missing += report.missing as u64;
        self.concealed_frames += report.concealed as u64;
        self.fec_recovered_frames += report.fec_recovered as u64;
        self.fec_fallbacks += report.fec_fallbacks as u64;
        self.decode_failures += report.failed_decodes as u64;
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_recovery_accumulates() {
        let mut stats = StreamStatistics::default();
        let report = RecoveryReport {
            missing: 3,
            concealed: 2,
            fec_recovered: 1,
            fec_fallbacks: 0,
            failed_decodes: 0,
        };
        stats.record_recovery(&report);
        stats.record_recovery(&report);
        assert_eq!(stats.packets_missing, 6);
        assert_eq!(stats.concealed_frames, 4);
        assert_eq!(stats.fec_recovered_frames, 2);
    }

    #[test]
    fn test_json_snapshot() {
        let stats = StreamStatistics {
            frames_encoded: 12,
            fec_active: true,
            ..Default::default()
        };
        let json = stats.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["frames_encoded"], 12);
        assert_eq!(value["fec_active"], true);
        assert!(value["parameters"].is_null());
    }
}
