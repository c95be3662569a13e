//! On-disk inputs: decoded tiles, style document, feature states.

use anyhow::{Context, Result};
use circle_bucket::{CanonicalTileId, DecodedFeature, FeatureStates, LayerSpec};
use serde::de::DeserializeOwned;
use hashbrown::HashMap;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct SourceLayerSpec {
    pub name: String,
    pub features: Vec<DecodedFeature>,
}

#[derive(Debug, Deserialize)]
pub struct TileSpec {
    pub id: CanonicalTileId,
    /// Source layers; their position is the source-layer index.
    pub layers: Vec<SourceLayerSpec>,
}

impl TileSpec {
    pub fn source_layer(&self, name: &str) -> Option<(usize, &SourceLayerSpec)> {
        self.layers.iter().enumerate().find(|(_, l)| l.name == name)
    }
}

#[derive(Debug, Deserialize)]
pub struct TileBatch {
    pub tiles: Vec<TileSpec>,
}

#[derive(Debug, Deserialize)]
pub struct StyleDocument {
    pub layers: Vec<LayerSpec>,
}

/// Source layer name -> feature id -> state.
pub type FeatureStateDocument = HashMap<String, FeatureStates>;

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

pub fn states_for(doc: &FeatureStateDocument, source_layer: &str) -> FeatureStates {
    doc.get(source_layer).cloned().unwrap_or_default()
}
