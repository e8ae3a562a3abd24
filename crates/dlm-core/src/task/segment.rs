//! Byte-range segment of a task.

use serde::{Deserialize, Serialize};

/// A contiguous inclusive byte range `[start, end]` of the artifact, with
/// download progress and the last offset known to have been flushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
    #[serde(default)]
    pub downloaded: u64,
    /// Highest offset within the segment known to be on disk. Monotone,
    /// never exceeds `downloaded`.
    #[serde(default)]
    pub checkpoint: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_hash: Option<String>,
    /// Human part number, present in partial tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<u32>,
}

impl Segment {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            downloaded: 0,
            checkpoint: 0,
            start_hash: None,
            end_hash: None,
            part: None,
        }
    }

    /// Total bytes this segment covers.
    pub fn expected(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn remaining(&self) -> u64 {
        self.expected().saturating_sub(self.downloaded)
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.expected()
    }

    /// Absolute offset of the next byte to write.
    pub fn current_offset(&self) -> u64 {
        self.start + self.downloaded
    }

    /// HTTP Range header value for the not-yet-downloaded suffix.
    pub fn range_value(&self) -> String {
        format!("{}-{}", self.current_offset(), self.end)
    }

    /// True when `other` covers a disjoint byte range (invariant I3).
    pub fn disjoint_from(&self, other: &Segment) -> bool {
        self.end < other.start || other.end < self.start
    }

    /// Record that everything downloaded so far is flushed to disk.
    pub fn advance_checkpoint(&mut self) {
        self.checkpoint = self.downloaded;
    }

    /// Reset all progress, discarding hashes.
    pub fn wipe(&mut self) {
        self.downloaded = 0;
        self.checkpoint = 0;
        self.start_hash = None;
        self.end_hash = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_is_inclusive() {
        assert_eq!(Segment::new(0, 0).expected(), 1);
        assert_eq!(Segment::new(0, 99).expected(), 100);
        assert_eq!(Segment::new(100, 199).expected(), 100);
    }

    #[test]
    fn completion_and_remaining() {
        let mut s = Segment::new(10, 19);
        assert_eq!(s.remaining(), 10);
        assert!(!s.is_complete());
        s.downloaded = 10;
        assert!(s.is_complete());
        assert_eq!(s.remaining(), 0);
    }

    #[test]
    fn range_value_covers_undownloaded_suffix() {
        let mut s = Segment::new(100, 299);
        assert_eq!(s.range_value(), "100-299");
        s.downloaded = 50;
        assert_eq!(s.range_value(), "150-299");
    }

    #[test]
    fn disjoint_ranges() {
        let a = Segment::new(0, 99);
        let b = Segment::new(100, 199);
        let c = Segment::new(50, 149);
        assert!(a.disjoint_from(&b));
        assert!(b.disjoint_from(&a));
        assert!(!a.disjoint_from(&c));
        assert!(!b.disjoint_from(&c));
    }

    #[test]
    fn wipe_clears_progress_and_hashes() {
        let mut s = Segment::new(0, 9);
        s.downloaded = 10;
        s.checkpoint = 10;
        s.start_hash = Some("aa".into());
        s.end_hash = Some("bb".into());
        s.wipe();
        assert_eq!(s.downloaded, 0);
        assert_eq!(s.checkpoint, 0);
        assert!(s.start_hash.is_none() && s.end_hash.is_none());
    }
}
