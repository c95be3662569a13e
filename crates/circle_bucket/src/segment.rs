//! Draw-call sized partitions of a bucket's vertex and index arrays.

use std::sync::atomic::{AtomicBool, Ordering};

/// Most vertices one segment may address with 16-bit indices.
pub const MAX_VERTEX_ARRAY_LENGTH: usize = u16::MAX as usize;

static OVERSIZE_WARNED: AtomicBool = AtomicBool::new(false);

/// A contiguous run of vertices and triangles drawn with one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// First vertex of the segment in the bucket's vertex array.
    pub vertex_offset: usize,
    /// First triangle of the segment in the bucket's index array.
    pub primitive_offset: usize,
    pub vertex_length: usize,
    pub primitive_length: usize,
    /// Sort key shared by every feature in the segment.
    pub sort_key: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentVector {
    segments: Vec<Segment>,
}

impl SegmentVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a segment with room for `num_vertices` more vertices.
    ///
    /// A new segment starts when there is none yet, when the current one
    /// would overflow [`MAX_VERTEX_ARRAY_LENGTH`], or when `sort_key`
    /// differs from the current segment's key.
    pub fn prepare_segment(
        &mut self,
        num_vertices: usize,
        vertex_array_len: usize,
        index_array_len: usize,
        sort_key: Option<f64>,
    ) -> &mut Segment {
        if num_vertices > MAX_VERTEX_ARRAY_LENGTH && !OVERSIZE_WARNED.swap(true, Ordering::Relaxed) {
            log::warn!(
                "Max vertices per segment is {}: bucket requested {}",
                MAX_VERTEX_ARRAY_LENGTH,
                num_vertices
            );
        }

        let start_new = match self.segments.last() {
            None => true,
            Some(s) => s.vertex_length + num_vertices > MAX_VERTEX_ARRAY_LENGTH || s.sort_key != sort_key,
        };

        if start_new {
            self.segments.push(Segment {
                vertex_offset: vertex_array_len,
                primitive_offset: index_array_len,
                vertex_length: 0,
                primitive_length: 0,
                sort_key,
            });
        }

        let last = self.segments.len() - 1;
        &mut self.segments[last]
    }

    pub fn get(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds `quads` four-vertex requests through the allocator, the way the
    /// bucket does.
    fn fill(segments: &mut SegmentVector, quads: usize, sort_key: impl Fn(usize) -> Option<f64>) {
        let (mut vertices, mut triangles) = (0, 0);
        for i in 0..quads {
            let s = segments.prepare_segment(4, vertices, triangles, sort_key(i));
            s.vertex_length += 4;
            s.primitive_length += 2;
            vertices += 4;
            triangles += 2;
        }
    }

    #[test]
    fn test_single_segment_below_limit() {
        let mut segs = SegmentVector::new();
        fill(&mut segs, 100, |_| None);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs.get()[0].vertex_length, 400);
        assert_eq!(segs.get()[0].primitive_length, 200);
    }

    #[test]
    fn test_new_segment_at_vertex_ceiling() {
        let mut segs = SegmentVector::new();
        // 16383 quads = 65532 vertices fit; the next quad would reach 65536.
        fill(&mut segs, 16_384, |_| None);
        assert_eq!(segs.len(), 2);

        let [first, second] = segs.get() else {
            panic!("expected two segments");
        };
        assert_eq!(first.vertex_length, 65_532);
        assert_eq!(second.vertex_offset, 65_532);
        assert_eq!(second.primitive_offset, 32_766);
        assert_eq!(second.vertex_length, 4);
        assert!(segs.get().iter().all(|s| s.vertex_length <= MAX_VERTEX_ARRAY_LENGTH));
    }

    #[test]
    fn test_sort_key_change_starts_segment() {
        let mut segs = SegmentVector::new();
        let keys = [1.0, 1.0, 2.0, 2.0, 2.0, 3.0];
        fill(&mut segs, keys.len(), |i| Some(keys[i]));

        let lengths: Vec<_> = segs.get().iter().map(|s| (s.sort_key, s.vertex_length)).collect();
        assert_eq!(lengths, vec![(Some(1.0), 8), (Some(2.0), 12), (Some(3.0), 4)]);
    }

    #[test]
    fn test_empty() {
        let segs = SegmentVector::new();
        assert!(segs.is_empty());
        assert!(segs.get().is_empty());
    }
}
