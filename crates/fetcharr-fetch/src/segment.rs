//! Byte-range planning for multi-connection downloads.

/// A single segment: byte range `[start, end)` of the destination file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (exclusive).
    pub end: u64,
}

impl Segment {
    /// Length of this segment in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the segment covers no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Range` header value. The tail segment is requested open-ended so a
    /// plain sequential stream is exactly `bytes=offset-`.
    #[must_use]
    pub fn range_header_value(&self, open_ended: bool) -> String {
        if open_ended {
            format!("bytes={}-", self.start)
        } else {
            format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
        }
    }
}

/// Minimum bytes that justify a dedicated connection.
const MIN_SEGMENT_BYTES: u64 = 4 * 1024 * 1024;

/// Partition `[offset, total)` into at most `connections` near-equal
/// segments, each owning a disjoint window.
///
/// Small remainders collapse into fewer segments so tiny files never fan out
/// across connections. Returns an empty plan when nothing remains.
#[must_use]
pub fn plan_segments(offset: u64, total: u64, connections: u32) -> Vec<Segment> {
    if offset >= total {
        return Vec::new();
    }
    let span = total - offset;
    let max_by_size = span.div_ceil(MIN_SEGMENT_BYTES).max(1);
    let count = u64::from(connections.max(1)).min(max_by_size);

    let base = span / count;
    let remainder = span % count;
    let mut out = Vec::with_capacity(count as usize);
    let mut cursor = offset;
    for i in 0..count {
        let len = base + u64::from(i < remainder);
        let end = (cursor + len).min(total);
        out.push(Segment { start: cursor, end });
        cursor = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_covers_the_span_contiguously() {
        let segments = plan_segments(0, 100 * 1024 * 1024, 4);
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments.last().expect("tail").end, 100 * 1024 * 1024);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn plan_resumes_from_the_offset() {
        let segments = plan_segments(10 * 1024 * 1024, 30 * 1024 * 1024, 2);
        assert_eq!(segments[0].start, 10 * 1024 * 1024);
        assert_eq!(segments.last().expect("tail").end, 30 * 1024 * 1024);
    }

    #[test]
    fn small_spans_collapse_to_one_segment() {
        let segments = plan_segments(0, 1024, 4);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0], Segment { start: 0, end: 1024 });
    }

    #[test]
    fn completed_span_plans_nothing() {
        assert!(plan_segments(1024, 1024, 4).is_empty());
        assert!(plan_segments(2048, 1024, 4).is_empty());
    }

    #[test]
    fn range_header_forms() {
        let segment = Segment { start: 100, end: 200 };
        assert_eq!(segment.range_header_value(false), "bytes=100-199");
        assert_eq!(segment.range_header_value(true), "bytes=100-");
    }
}
