//! Worker-side bucket construction for one tile.

use crate::input::TileSpec;
use anyhow::{Context, Result};
use circle_bucket::{
    BucketParameters, CanonicalTileId, CircleBucket, DecodedFeature, FeatureIndexTree, IndexedFeature, PointLayer,
    PopulateParameters, TileTransform,
};
use std::sync::Arc;

/// A populated bucket plus what it was built from.
#[derive(Debug)]
pub struct BuiltBucket {
    pub bucket: CircleBucket,
    pub source_layer: String,
    pub source_features: usize,
}

/// Every bucket of one tile, ready to be handed to the uploading thread.
#[derive(Debug)]
pub struct TileBuckets {
    pub tile: CanonicalTileId,
    pub buckets: Vec<BuiltBucket>,
    pub feature_index: FeatureIndexTree,
}

/// Builds one bucket per layer group whose source layer exists in the tile.
pub fn build_tile(
    tile: &TileSpec,
    groups: &[Vec<Arc<PointLayer>>],
    overscaling: u32,
) -> Result<TileBuckets> {
    let mut feature_index = FeatureIndexTree::new();
    let mut buckets = Vec::new();

    for (group_index, layers) in groups.iter().enumerate() {
        let Some(first) = layers.first() else {
            continue;
        };
        let Some((source_layer_index, source_layer)) = tile.source_layer(&first.source_layer) else {
            log::debug!("tile {}: no source layer `{}`", tile.id, first.source_layer);
            continue;
        };

        let features: Vec<IndexedFeature<&DecodedFeature>> = source_layer
            .features
            .iter()
            .enumerate()
            .map(|(index, feature)| IndexedFeature {
                id: feature.id,
                feature,
                index,
                source_layer_index,
            })
            .collect();

        let mut bucket = CircleBucket::new(BucketParameters {
            index: group_index,
            zoom: tile.id.z as f64,
            overscaling,
            layers: layers.clone(),
        });

        let mut options = PopulateParameters {
            feature_index: &mut feature_index,
            available_images: &[],
            tile_transform: TileTransform::IDENTITY,
        };
        bucket
            .populate(&features, &mut options, &tile.id)
            .with_context(|| format!("populating `{}` for tile {}", first.id, tile.id))?;

        buckets.push(BuiltBucket {
            bucket,
            source_layer: source_layer.name.clone(),
            source_features: features.len(),
        });
    }

    Ok(TileBuckets {
        tile: tile.id,
        buckets,
        feature_index,
    })
}
