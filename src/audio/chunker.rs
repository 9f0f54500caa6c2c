//! Size-bounded chunk planning
//!
//! The planner assumes a constant bitrate: a chunk of `d` seconds weighs
//! roughly `d / duration * file_size`. Chunk length is derived from that and
//! clamped to a minimum duration so long books don't explode into thousands
//! of tiny files.

/// One planned chunk, 1-based
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub start: f64,
    pub duration: f64,
}

/// Length in seconds of each chunk for a file of `file_size_mb` lasting
/// `duration_secs`
pub fn chunk_duration(duration_secs: f64, file_size_mb: f64, max_chunk_mb: f64, min_chunk_secs: f64) -> f64 {
    if file_size_mb <= 0.0 {
        return duration_secs.max(min_chunk_secs);
    }
    (max_chunk_mb / file_size_mb * duration_secs).max(min_chunk_secs)
}

/// Upper bound on chunks per file
pub const MAX_SEGMENTS: usize = 10_000;

/// Cover `[0, duration_secs)` with consecutive segments
///
/// The last segment is truncated at the end of the file. A zero or negative
/// duration yields no segments, and no plan has more than [`MAX_SEGMENTS`].
pub fn plan_segments(duration_secs: f64, file_size_mb: f64, max_chunk_mb: f64, min_chunk_secs: f64) -> Vec<Segment> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Vec::new();
    }

    let step = chunk_duration(duration_secs, file_size_mb, max_chunk_mb, min_chunk_secs);
    if !(step > 0.0) {
        return Vec::new();
    }
    let step = step
        .min(duration_secs)
        .max(duration_secs / MAX_SEGMENTS as f64);
    let count = ((duration_secs / step).ceil() as usize).clamp(1, MAX_SEGMENTS);

    let mut segments = Vec::with_capacity(count);
    for i in 0..count {
        let start = i as f64 * step;
        let end = if i + 1 == count {
            duration_secs
        } else {
            ((i + 1) as f64 * step).min(duration_secs)
        };
        if end <= start {
            break;
        }
        segments.push(Segment {
            index: i + 1,
            start,
            duration: end - start,
        });
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_file_single_chunk() {
        // 10 MB over an hour fits in one 24 MB chunk
        let segments = plan_segments(3600.0, 10.0, 24.0, 60.0);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0], Segment { index: 1, start: 0.0, duration: 3600.0 });
    }

    #[test]
    fn test_large_file_split_and_truncated() {
        // 100 MB over 1000 s -> 240 s chunks, last one 40 s
        let segments = plan_segments(1000.0, 100.0, 24.0, 60.0);
        assert_eq!(segments.len(), 5);
        assert_eq!(segments[0].duration, 240.0);
        assert_eq!(segments[4].index, 5);
        assert_eq!(segments[4].start, 960.0);
        assert!((segments[4].duration - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_minimum_chunk_duration_applies() {
        // 1000 MB over 600 s would give 14.4 s chunks; clamp to 60 s
        let segments = plan_segments(600.0, 1000.0, 24.0, 60.0);
        assert_eq!(segments.len(), 10);
        assert!(segments.iter().all(|s| s.duration == 60.0));
    }

    #[test]
    fn test_segments_are_contiguous() {
        let segments = plan_segments(12_345.6, 300.0, 24.0, 60.0);
        let mut cursor = 0.0;
        for s in &segments {
            assert!((s.start - cursor).abs() < 1e-6);
            cursor = s.start + s.duration;
        }
        assert!((cursor - 12_345.6).abs() < 1e-6);
    }

    #[test]
    fn test_tiny_step_is_bounded() {
        // Huge file, no minimum: the raw step is ~1e-291 s
        let segments = plan_segments(1.0e9, 1.0e300, 1.0, 0.0);
        assert_eq!(segments.len(), MAX_SEGMENTS);
        assert!(segments.iter().all(|s| s.duration > 0.0));
        let last = segments.last().unwrap();
        assert!((last.start + last.duration - 1.0e9).abs() < 1e-3);

        // Subnormal but non-zero step
        let segments = plan_segments(1.0, 1.0e300, 1.0e-10, 0.0);
        assert_eq!(segments.len(), MAX_SEGMENTS);
        assert_eq!(segments.last().unwrap().start + segments.last().unwrap().duration, 1.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(plan_segments(0.0, 10.0, 24.0, 60.0).is_empty());
        assert!(plan_segments(-5.0, 10.0, 24.0, 60.0).is_empty());
        assert!(plan_segments(f64::NAN, 10.0, 24.0, 60.0).is_empty());
        // Empty file still produces a covering segment
        assert_eq!(plan_segments(30.0, 0.0, 24.0, 60.0).len(), 1);
    }
}
