//! Tile addressing and the tile-local coordinate transform.

use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical (unwrapped) z/x/y address of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalTileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl CanonicalTileId {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

impl fmt::Display for CanonicalTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Affine transform applied to geometry after it has been scaled to tile
/// extent. The identity is the common case; projections that re-grid tile
/// coordinates supply their own scale and translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileTransform {
    pub scale: f64,
    pub translate: DVec2,
}

impl TileTransform {
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        translate: DVec2::ZERO,
    };

    #[inline]
    pub fn apply(&self, p: DVec2) -> DVec2 {
        p * self.scale + self.translate
    }
}

impl Default for TileTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_applies_scale_then_translate() {
        let t = TileTransform {
            scale: 2.0,
            translate: DVec2::new(10.0, -4.0),
        };
        assert_eq!(t.apply(DVec2::new(3.0, 5.0)), DVec2::new(16.0, 6.0));
        assert_eq!(TileTransform::default().apply(DVec2::new(3.0, 5.0)), DVec2::new(3.0, 5.0));
    }

    #[test]
    fn test_tile_id_display() {
        assert_eq!(CanonicalTileId::new(14, 8190, 5447).to_string(), "14/8190/5447");
    }
}
