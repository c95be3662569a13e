//! Evaluation-side view of features plus the capability traits the bucket
//! consumes from the style system.

use crate::error::ExpressionError;
use crate::geometry::{Geometry, GeometryType, PropertyMap, TileFeature};
use crate::tile_id::{CanonicalTileId, TileTransform};
use hashbrown::HashMap;
use serde_json::{Map, Value};
use std::fmt::Debug;

/// Runtime state attached to one feature (hover, selection, ...).
pub type FeatureState = Map<String, Value>;

/// Feature states of one source layer, keyed by feature id.
pub type FeatureStates = HashMap<u64, FeatureState>;

/// Global inputs of an expression evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EvaluationParameters {
    pub zoom: f64,
}

impl EvaluationParameters {
    pub fn new(zoom: f64) -> Self {
        Self { zoom }
    }
}

/// What an expression sees of a feature.
///
/// `geometry` is only present when the filter asked for it; the bucket then
/// reuses it instead of decoding a second time.
#[derive(Debug, Clone)]
pub struct EvaluationFeature<'a> {
    pub id: Option<u64>,
    pub properties: &'a PropertyMap,
    pub geometry_type: GeometryType,
    pub geometry: Option<Geometry>,
}

/// Builds the evaluation view of `feature`, decoding geometry only when
/// `need_geometry` is set.
pub fn to_evaluation_feature<'a, F>(
    feature: &'a F,
    need_geometry: bool,
    canonical: &CanonicalTileId,
) -> EvaluationFeature<'a>
where
    F: TileFeature + ?Sized,
{
    EvaluationFeature {
        id: feature.id(),
        properties: feature.properties(),
        geometry_type: feature.geometry_type(),
        geometry: need_geometry.then(|| feature.load_geometry(canonical, &TileTransform::IDENTITY)),
    }
}

/// A compiled style expression.
pub trait StyleExpression: Debug + Send + Sync {
    fn evaluate(
        &self,
        globals: &EvaluationParameters,
        feature: &EvaluationFeature<'_>,
        feature_state: Option<&FeatureState>,
        canonical: &CanonicalTileId,
    ) -> Result<Value, ExpressionError>;

    /// True when the result depends on feature state.
    fn is_state_dependent(&self) -> bool {
        false
    }

    /// True when evaluation needs decoded geometry.
    fn needs_geometry(&self) -> bool {
        false
    }
}

/// A compiled layer filter.
pub trait FeatureFilter: Debug + Send + Sync {
    fn needs_geometry(&self) -> bool;

    fn filter(
        &self,
        params: &EvaluationParameters,
        feature: &EvaluationFeature<'_>,
        canonical: &CanonicalTileId,
    ) -> Result<bool, ExpressionError>;
}

/// Source layer lookup used to re-evaluate paint values on state changes.
pub trait SourceLayer {
    fn feature(&self, index: usize) -> Option<&dyn TileFeature>;
}

impl<F: TileFeature> SourceLayer for Vec<F> {
    fn feature(&self, index: usize) -> Option<&dyn TileFeature> {
        self.get(index).map(|f| f as &dyn TileFeature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DecodedFeature;
    use glam::IVec2;

    #[test]
    fn test_geometry_is_only_decoded_on_request() {
        let f = DecodedFeature::point(Some(9), 4, 5, PropertyMap::new());
        let tile = CanonicalTileId::new(1, 0, 0);

        let lazy = to_evaluation_feature(&f, false, &tile);
        assert!(lazy.geometry.is_none());
        assert_eq!(lazy.id, Some(9));

        let eager = to_evaluation_feature(&f, true, &tile);
        assert_eq!(eager.geometry, Some(vec![vec![IVec2::new(4, 5)]]));
    }

    #[test]
    fn test_vec_source_layer_lookup() {
        let layer = vec![DecodedFeature::point(Some(3), 0, 0, PropertyMap::new())];
        assert_eq!(layer.feature(0).and_then(|f| f.id()), Some(3));
        assert!(layer.feature(1).is_none());
    }
}
