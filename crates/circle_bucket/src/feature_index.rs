//! Spatial index of the features a tile's buckets tessellated, used for
//! hit-testing and rendered-feature queries.

use crate::geometry::{bounds, Geometry, TileFeature};
use glam::IVec2;
use rstar::{RTree, RTreeObject, AABB};

/// Receives every feature a bucket keeps, with the geometry it tessellated.
pub trait FeatureIndex {
    fn insert(
        &mut self,
        feature: &dyn TileFeature,
        geometry: &Geometry,
        feature_index: usize,
        source_layer_index: usize,
        bucket_index: usize,
    );
}

/// Identifies an indexed feature within its tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexedFeatureRef {
    pub bucket_index: usize,
    pub source_layer_index: usize,
    pub feature_index: usize,
    pub feature_id: Option<u64>,
}

#[derive(Debug, Clone)]
struct Entry {
    envelope: AABB<[i32; 2]>,
    feature: IndexedFeatureRef,
}

impl RTreeObject for Entry {
    type Envelope = AABB<[i32; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over feature bounding boxes in tile coordinates.
#[derive(Debug, Default)]
pub struct FeatureIndexTree {
    tree: RTree<Entry>,
}

impl FeatureIndexTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Features whose bounds come within `radius` of `point`, ordered by
    /// bucket then feature index.
    pub fn query(&self, point: IVec2, radius: i32) -> Vec<IndexedFeatureRef> {
        let r = radius.max(0);
        let area = AABB::from_corners([point.x - r, point.y - r], [point.x + r, point.y + r]);
        let mut hits: Vec<_> = self
            .tree
            .locate_in_envelope_intersecting(&area)
            .map(|e| e.feature)
            .collect();
        hits.sort();
        hits
    }
}

impl FeatureIndex for FeatureIndexTree {
    fn insert(
        &mut self,
        feature: &dyn TileFeature,
        geometry: &Geometry,
        feature_index: usize,
        source_layer_index: usize,
        bucket_index: usize,
    ) {
        let Some((min, max)) = bounds(geometry) else {
            return;
        };
        self.tree.insert(Entry {
            envelope: AABB::from_corners(min.to_array(), max.to_array()),
            feature: IndexedFeatureRef {
                bucket_index,
                source_layer_index,
                feature_index,
                feature_id: feature.id(),
            },
        });
    }
}
