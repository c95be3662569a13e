//! Packed vertex format for circle quads.
//!
//! Each vertex stores `anchor * 2 + (extrude + 1) / 2` per axis, so the low
//! bit carries the corner direction and the rest the anchor. The shader
//! recovers both with `floor(a_pos * 0.5)` and `mod(a_pos, 2.0) * 2.0 - 1.0`.

use crate::gpu::VertexLayout;
use glam::IVec2;

/// One corner of a feature's quad, in emission order.
///
/// ```text
/// 3 ─── 2
/// │     │
/// 0 ─── 1
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    BottomLeft,
    BottomRight,
    TopRight,
    TopLeft,
}

impl Corner {
    /// All corners in vertex order; triangles are (0,1,2) and (0,3,2).
    pub const QUAD: [Corner; 4] = [
        Corner::BottomLeft,
        Corner::BottomRight,
        Corner::TopRight,
        Corner::TopLeft,
    ];

    /// Extrusion sign, each axis in {-1, +1}.
    #[inline]
    pub fn extrude(self) -> IVec2 {
        match self {
            Corner::BottomLeft => IVec2::new(-1, -1),
            Corner::BottomRight => IVec2::new(1, -1),
            Corner::TopRight => IVec2::new(1, 1),
            Corner::TopLeft => IVec2::new(-1, 1),
        }
    }
}

/// Packs an anchor and a corner into one vertex position.
///
/// Anchors come from decoded geometry, clamped to
/// [`COORD_MIN`](crate::geometry::COORD_MIN)..=[`COORD_MAX`](crate::geometry::COORD_MAX);
/// within that range the result always fits an `i16`.
#[inline]
pub fn encode_vertex(anchor: IVec2, corner: Corner) -> [i16; 2] {
    let e = corner.extrude();
    [
        (anchor.x * 2 + (e.x + 1) / 2) as i16,
        (anchor.y * 2 + (e.y + 1) / 2) as i16,
    ]
}

/// Per-vertex layout record. Must match `a_pos` in the circle shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CircleLayoutVertex {
    pub a_pos: [i16; 2],
}

/// Three vertex indices, relative to the owning segment's vertex offset.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TriangleIndex(pub [u16; 3]);

const LAYOUT_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Sint16x2];

/// Vertex buffer layout for [`CircleLayoutVertex`].
pub fn layout_attributes() -> VertexLayout {
    VertexLayout {
        array_stride: std::mem::size_of::<CircleLayoutVertex>() as u64,
        attributes: LAYOUT_ATTRIBUTES.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{COORD_MAX, COORD_MIN};

    #[test]
    fn test_encode_doubles_anchor_and_biases_extrusion() {
        let anchor = IVec2::new(5, 7);
        assert_eq!(encode_vertex(anchor, Corner::BottomLeft), [10, 14]);
        assert_eq!(encode_vertex(anchor, Corner::TopRight), [11, 15]);
        assert_eq!(encode_vertex(anchor, Corner::BottomRight), [11, 14]);
        assert_eq!(encode_vertex(anchor, Corner::TopLeft), [10, 15]);
    }

    #[test]
    fn test_encode_decodes_back() {
        for anchor in [IVec2::new(0, 0), IVec2::new(-3, 8191), IVec2::new(COORD_MAX, COORD_MIN)] {
            for corner in Corner::QUAD {
                let [x, y] = encode_vertex(anchor, corner);
                let decoded = IVec2::new((x as i32).div_euclid(2), (y as i32).div_euclid(2));
                let extrude = IVec2::new((x as i32).rem_euclid(2) * 2 - 1, (y as i32).rem_euclid(2) * 2 - 1);
                assert_eq!(decoded, anchor);
                assert_eq!(extrude, corner.extrude());
            }
        }
    }

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<CircleLayoutVertex>(), 4);
        assert_eq!(std::mem::size_of::<TriangleIndex>(), 6);
        let layout = layout_attributes();
        assert_eq!(layout.array_stride, 4);
        assert_eq!(layout.attributes[0].format, wgpu::VertexFormat::Sint16x2);
    }
}
