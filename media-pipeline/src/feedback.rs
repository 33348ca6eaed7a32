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

//! Transport feedback consumed by the adaptive quality controller.

use rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use rtcp::receiver_report::ReceiverReport;
use rtcp::reception_report::ReceptionReport;
use rtcp::sender_report::SenderReport;
use serde::{Deserialize, Serialize};

use crate::{PipelineError, Result};

/// Loss summary for one observation window of one source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossBlock {
    /// Fraction of packets lost in the window, 0.0 to 1.0.
    pub percent_lost: f64,
    /// Packets lost since the beginning of reception.
    pub cumulative_lost: u32,
}

impl LossBlock {
    pub fn new(percent_lost: f64, cumulative_lost: u32) -> Self {
        Self {
            percent_lost: percent_lost.clamp(0.0, 1.0),
            cumulative_lost,
        }
    }

    pub fn is_lossy(&self) -> bool {
        self.percent_lost > 0.0
    }
}

impl From<&ReceptionReport> for LossBlock {
    fn from(report: &ReceptionReport) -> Self {
        Self::new(report.fraction_lost as f64 / 256.0, report.total_lost)
    }
}

/// One periodic report: an ordered list of loss blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    pub blocks: Vec<LossBlock>,
}

impl LossReport {
    pub fn new(blocks: Vec<LossBlock>) -> Self {
        Self { blocks }
    }

    /// Convenience constructor for a report with a single block.
    pub fn single(percent_lost: f64, cumulative_lost: u32) -> Self {
        Self::new(vec![LossBlock::new(percent_lost, cumulative_lost)])
    }
}

/// One item of feedback delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Feedback {
    /// Receiver statistics from a sender or receiver report.
    Report(LossReport),
    /// The remote decoder lost its reference picture (PLI or FIR).
    KeyframeRequest,
}

impl Feedback {
    /// Parse a compound RTCP datagram. Packet types that carry no loss or
    /// keyframe information are skipped.
    pub fn parse_rtcp(mut raw: &[u8]) -> Result<Vec<Feedback>> {
        let packets = rtcp::packet::unmarshal(&mut raw)
            .map_err(|e| PipelineError::InvalidFeedback(format!("RTCP unmarshal: {e}")))?;

        let mut feedback = Vec::with_capacity(packets.len());
        for packet in packets {
            let any = packet.as_any();
            if let Some(rr) = any.downcast_ref::<ReceiverReport>() {
                feedback.push(Feedback::Report(LossReport::new(
                    rr.reports.iter().map(LossBlock::from).collect(),
                )));
            } else if let Some(sr) = any.downcast_ref::<SenderReport>() {
                if !sr.reports.is_empty() {
                    feedback.push(Feedback::Report(LossReport::new(
                        sr.reports.iter().map(LossBlock::from).collect(),
                    )));
                }
            } else if any.downcast_ref::<PictureLossIndication>().is_some()
                || any.downcast_ref::<FullIntraRequest>().is_some()
            {
                feedback.push(Feedback::KeyframeRequest);
            } else {
                log::trace!("Ignoring RTCP packet: {:?}", packet.header());
            }
        }
        Ok(feedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use webrtc_util::Marshal;

    fn receiver_report(fraction_lost: u8, total_lost: u32) -> Vec<u8> {
        ReceiverReport {
            ssrc: 1,
            reports: vec![ReceptionReport {
                ssrc: 2,
                fraction_lost,
                total_lost,
                ..Default::default()
            }],
            ..Default::default()
        }
        .marshal()
        .unwrap()
        .to_vec()
    }

    #[test]
    fn test_loss_block_clamps() {
        assert_relative_eq!(LossBlock::new(1.5, 0).percent_lost, 1.0);
        assert_relative_eq!(LossBlock::new(-0.5, 0).percent_lost, 0.0);
        assert!(!LossBlock::new(0.0, 7).is_lossy());
        assert!(LossBlock::new(0.01, 7).is_lossy());
    }

    #[test]
    fn test_parse_receiver_report() {
        let feedback = Feedback::parse_rtcp(&receiver_report(64, 12)).unwrap();
        assert_eq!(feedback.len(), 1);
        match &feedback[0] {
            Feedback::Report(report) => {
                assert_eq!(report.blocks.len(), 1);
                assert_relative_eq!(report.blocks[0].percent_lost, 0.25);
                assert_eq!(report.blocks[0].cumulative_lost, 12);
            }
            other => panic!("unexpected feedback {other:?}"),
        }
    }

    #[test]
    fn test_parse_compound_with_pli() {
        let mut raw = receiver_report(0, 0);
        raw.extend_from_slice(
            &PictureLossIndication {
                sender_ssrc: 1,
                media_ssrc: 2,
            }
            .marshal()
            .unwrap(),
        );
        // a sender report without reception blocks carries no loss data
        raw.extend_from_slice(&SenderReport::default().marshal().unwrap());

        let feedback = Feedback::parse_rtcp(&raw).unwrap();
        assert_eq!(feedback.len(), 2);
        assert!(matches!(feedback[0], Feedback::Report(_)));
        assert_eq!(feedback[1], Feedback::KeyframeRequest);
    }

    #[test]
    fn test_parse_garbage() {
        let err = Feedback::parse_rtcp(&[0x01, 0x02]);
        assert!(matches!(err, Err(PipelineError::InvalidFeedback(_))));
    }
}
