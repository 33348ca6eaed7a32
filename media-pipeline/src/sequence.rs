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

//! Gap detection between consecutively decoded packets.

/// Signed distance from `previous` to `current` on the 16-bit sequence
/// circle. Positive when `current` is ahead.
pub fn sequence_delta(current: u16, previous: u16) -> i32 {
    current.wrapping_sub(previous) as i16 as i32
}

/// Result of comparing the newest sequence number against the one consumed
/// by the previous decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gap {
    /// First packet of the stream, or no packet observed yet.
    None,
    /// `missing` packets were lost between the previous decode and this one.
    Missing(u16),
    /// The packet is a duplicate or arrived behind an already decoded one.
    /// Also reported when decode runs twice without a new observation.
    Backwards { delta: i32 },
    /// The jump exceeds the recoverable gap. Decoding restarts at the new
    /// position without recovering anything.
    Resync { skipped: u16 },
}

impl Gap {
    /// Packets that need recovery. Never negative.
    pub fn missing_count(&self) -> usize {
        match *self {
            Gap::Missing(n) => n as usize,
            _ => 0,
        }
    }
}

/// Tracks the last depacketized sequence number and the one consumed by the
/// previous decode.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    last_seen: Option<u16>,
    last_decoded: Option<u16>,
    max_gap: u16,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceTracker {
    /// A tracker that reports every forward gap as missing packets.
    pub fn new() -> Self {
        Self::with_max_gap(u16::MAX)
    }

    /// Gaps of more than `max_gap` missing packets are reported as
    /// [`Gap::Resync`].
    pub fn with_max_gap(max_gap: u16) -> Self {
        Self {
            last_seen: None,
            last_decoded: None,
            max_gap,
        }
    }

    /// Records the sequence number of a depacketized packet. Called for every
    /// packet, whether or not the following decode succeeds.
    pub fn observe(&mut self, sequence_number: u16) {
        self.last_seen = Some(sequence_number);
    }

    /// Consumes the most recent observation and reports the gap since the
    /// previous call.
    pub fn advance(&mut self) -> Gap {
        let Some(current) = self.last_seen else {
            return Gap::None;
        };
        let Some(previous) = self.last_decoded else {
            self.last_decoded = Some(current);
            return Gap::None;
        };

        let delta = sequence_delta(current, previous);
        if delta <= 0 {
            // keep the newest position so a late packet does not turn the
            // next in-order packet into a false gap
            return Gap::Backwards { delta };
        }
        self.last_decoded = Some(current);
        let missing = (delta - 1) as u16;
        if missing > self.max_gap {
            return Gap::Resync { skipped: missing };
        }
        Gap::Missing(missing)
    }

    pub fn last_seen(&self) -> Option<u16> {
        self.last_seen
    }

    pub fn last_decoded(&self) -> Option<u16> {
        self.last_decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaps(sequence: &[u16]) -> Vec<usize> {
        let mut tracker = SequenceTracker::new();
        sequence
            .iter()
            .map(|&seq| {
                tracker.observe(seq);
                tracker.advance().missing_count()
            })
            .collect()
    }

    #[test]
    fn test_first_packet_infers_no_loss() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(40000);
        assert_eq!(tracker.advance(), Gap::None);
        assert_eq!(tracker.last_decoded(), Some(40000));
    }

    #[test]
    fn test_contiguous_and_gaps() {
        assert_eq!(gaps(&[1, 2, 3, 5]), vec![0, 0, 0, 1]);
        assert_eq!(gaps(&[1, 2, 6]), vec![0, 0, 3]);
    }

    #[test]
    fn test_wraparound_distance() {
        assert_eq!(sequence_delta(0, 65535), 1);
        assert_eq!(sequence_delta(2, 65534), 4);
        assert_eq!(gaps(&[65534, 65535, 0, 3]), vec![0, 0, 0, 2]);

        for previous in [0u16, 1, 1000, 32767, 65000, 65535] {
            for step in [1u16, 2, 10, 500] {
                let current = previous.wrapping_add(step);
                let mut tracker = SequenceTracker::new();
                tracker.observe(previous);
                tracker.advance();
                tracker.observe(current);
                assert_eq!(tracker.advance().missing_count(), (step - 1) as usize);
            }
        }
    }

    #[test]
    fn test_backwards_and_duplicates_never_negative() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(10);
        tracker.advance();

        tracker.observe(8);
        let gap = tracker.advance();
        assert_eq!(gap, Gap::Backwards { delta: -2 });
        assert_eq!(gap.missing_count(), 0);

        tracker.observe(10);
        assert_eq!(tracker.advance(), Gap::Backwards { delta: 0 });
        assert_eq!(gaps(&[5, 5, 4, 6]), vec![0, 0, 0, 0]);
        assert_eq!(tracker.last_decoded(), Some(10));
    }

    #[test]
    fn test_advance_without_observation() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.advance(), Gap::None);
        tracker.observe(3);
        tracker.advance();
        assert_eq!(tracker.advance().missing_count(), 0);
        assert_eq!(tracker.last_seen(), Some(3));
    }

    #[test]
    fn test_jump_beyond_max_gap_resyncs() {
        let mut tracker = SequenceTracker::with_max_gap(50);
        tracker.observe(0);
        tracker.advance();

        tracker.observe(32767);
        let gap = tracker.advance();
        assert_eq!(gap, Gap::Resync { skipped: 32766 });
        assert_eq!(gap.missing_count(), 0);
        assert_eq!(tracker.last_decoded(), Some(32767));

        // alternating far jumps never turn into recovery work
        tracker.observe(65534);
        assert_eq!(tracker.advance().missing_count(), 0);
        tracker.observe(65535);
        assert_eq!(tracker.advance(), Gap::Missing(0));
        tracker.observe(50);
        assert_eq!(tracker.advance(), Gap::Missing(50));
    }
}
