//! Tile-local geometry and the decoded-feature source.

use crate::tile_id::{CanonicalTileId, TileTransform};
use glam::{DVec2, IVec2};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};

/// Tile extent in geometry units; all decoded geometry is rescaled to it.
pub const EXTENT: u32 = 8192;

/// Decoded geometry limits: 15 signed bits, so a doubled anchor plus its
/// corner bit still fits an `i16` vertex component.
const COORD_BITS: u32 = 15;
pub const COORD_MIN: i32 = -(1 << (COORD_BITS - 1));
pub const COORD_MAX: i32 = (1 << (COORD_BITS - 1)) - 1;

static CLAMP_WARNED: AtomicBool = AtomicBool::new(false);

/// Rings of tile-local points. Point features carry one ring per point.
pub type Geometry = Vec<Vec<IVec2>>;

/// Feature properties as decoded from the tile.
pub type PropertyMap = Map<String, Value>;

/// Vector-tile geometry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GeometryType {
    #[default]
    Unknown,
    Point,
    LineString,
    Polygon,
}

impl GeometryType {
    pub fn as_str(self) -> &'static str {
        match self {
            GeometryType::Unknown => "Unknown",
            GeometryType::Point => "Point",
            GeometryType::LineString => "LineString",
            GeometryType::Polygon => "Polygon",
        }
    }
}

/// A feature as handed over by the tile decoder.
///
/// `load_geometry` is the (comparatively expensive) decode step; callers
/// only invoke it when the geometry is actually needed.
pub trait TileFeature {
    fn id(&self) -> Option<u64>;
    fn properties(&self) -> &PropertyMap;
    fn geometry_type(&self) -> GeometryType;
    fn load_geometry(&self, canonical: &CanonicalTileId, transform: &TileTransform) -> Geometry;
}

fn default_extent() -> u32 {
    4096
}

/// A feature whose geometry is kept in its source layer's extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedFeature {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(rename = "type", default)]
    pub geometry_type: GeometryType,
    #[serde(default)]
    pub properties: PropertyMap,
    pub geometry: Vec<Vec<[i32; 2]>>,
    /// Extent of the source layer the coordinates are expressed in.
    #[serde(default = "default_extent")]
    pub extent: u32,
}

impl DecodedFeature {
    /// Single point feature already expressed in tile extent.
    pub fn point(id: Option<u64>, x: i32, y: i32, properties: PropertyMap) -> Self {
        Self {
            id,
            geometry_type: GeometryType::Point,
            properties,
            geometry: vec![vec![[x, y]]],
            extent: EXTENT,
        }
    }
}

impl TileFeature for DecodedFeature {
    fn id(&self) -> Option<u64> {
        self.id
    }

    fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    fn load_geometry(&self, _canonical: &CanonicalTileId, transform: &TileTransform) -> Geometry {
        let scale = EXTENT as f64 / self.extent.max(1) as f64;
        self.geometry
            .iter()
            .map(|ring| {
                ring.iter()
                    .map(|&[x, y]| {
                        let p = transform.apply(DVec2::new(x as f64, y as f64) * scale).round();
                        clamp_point(p)
                    })
                    .collect()
            })
            .collect()
    }
}

impl<T: TileFeature + ?Sized> TileFeature for &T {
    fn id(&self) -> Option<u64> {
        (**self).id()
    }

    fn properties(&self) -> &PropertyMap {
        (**self).properties()
    }

    fn geometry_type(&self) -> GeometryType {
        (**self).geometry_type()
    }

    fn load_geometry(&self, canonical: &CanonicalTileId, transform: &TileTransform) -> Geometry {
        (**self).load_geometry(canonical, transform)
    }
}

fn clamp_point(p: DVec2) -> IVec2 {
    let x = (p.x as i64).clamp(COORD_MIN as i64, COORD_MAX as i64) as i32;
    let y = (p.y as i64).clamp(COORD_MIN as i64, COORD_MAX as i64) as i32;
    if (x as f64 != p.x || y as f64 != p.y) && !CLAMP_WARNED.swap(true, Ordering::Relaxed) {
        log::warn!("Geometry exceeds allowed extent, reduce your vector tile buffer size");
    }
    IVec2::new(x, y)
}

/// Axis-aligned bounds of all points, or `None` for empty geometry.
pub fn bounds(geometry: &Geometry) -> Option<(IVec2, IVec2)> {
    let mut points = geometry.iter().flatten();
    let first = *points.next()?;
    Some(points.fold((first, first), |(min, max), &p| (min.min(p), max.max(p))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile() -> CanonicalTileId {
        CanonicalTileId::new(0, 0, 0)
    }

    #[test]
    fn test_load_geometry_rescales_to_tile_extent() {
        let f = DecodedFeature {
            id: None,
            geometry_type: GeometryType::Point,
            properties: PropertyMap::new(),
            geometry: vec![vec![[10, 20]], vec![[4096, 0]]],
            extent: 4096,
        };
        let g = f.load_geometry(&tile(), &TileTransform::IDENTITY);
        assert_eq!(g, vec![vec![IVec2::new(20, 40)], vec![IVec2::new(8192, 0)]]);
    }

    #[test]
    fn test_load_geometry_clamps_to_15_bits() {
        let f = DecodedFeature::point(Some(1), 20_000, -40_000, PropertyMap::new());
        let g = f.load_geometry(&tile(), &TileTransform::IDENTITY);
        assert_eq!(g[0][0], IVec2::new(16_383, -16_384));
        assert_eq!((COORD_MIN, COORD_MAX), (-16_384, 16_383));
    }

    #[test]
    fn test_load_geometry_applies_transform() {
        let f = DecodedFeature::point(None, 100, 200, PropertyMap::new());
        let t = TileTransform {
            scale: 0.5,
            translate: DVec2::new(1.0, 1.0),
        };
        assert_eq!(f.load_geometry(&tile(), &t)[0][0], IVec2::new(51, 101));
    }

    #[test]
    fn test_borrowed_feature_reads_through() {
        let f = DecodedFeature::point(Some(4), 1, 2, PropertyMap::new());
        let borrowed = &f;
        assert_eq!(TileFeature::id(&borrowed), Some(4));
        assert_eq!(
            borrowed.load_geometry(&tile(), &TileTransform::IDENTITY),
            f.load_geometry(&tile(), &TileTransform::IDENTITY)
        );
    }

    #[test]
    fn test_bounds() {
        let g: Geometry = vec![vec![IVec2::new(3, 9), IVec2::new(-1, 4)], vec![IVec2::new(7, 0)]];
        assert_eq!(bounds(&g), Some((IVec2::new(-1, 0), IVec2::new(7, 9))));
        assert_eq!(bounds(&vec![vec![]]), None);
    }

    #[test]
    fn test_feature_deserializes_with_defaults() {
        let f: DecodedFeature = serde_json::from_str(r#"{"geometry": [[[1, 2]]]}"#).unwrap();
        assert_eq!(f.extent, 4096);
        assert_eq!(f.geometry_type, GeometryType::Unknown);
        assert!(f.id.is_none());
    }
}
