//! The circle bucket: population, paint updates and GPU upload of the
//! quads for one (tile, layer group) pair.
//!
//! Lifecycle:
//!
//! ```text
//! Empty ──populate──▶ Populated ──upload──▶ Uploaded ──destroy──▶ Destroyed
//!                                    ▲          │
//!                                    └─upload───┘ (after update marks paint dirty)
//! ```
//!
//! `populate` and `update` only touch CPU arrays and may run on a worker
//! thread; the finished bucket is then moved to the thread owning the GPU
//! device for `upload` and `destroy`. `&mut self` on every mutating call
//! keeps a single writer at a time.

use crate::error::BucketError;
use crate::evaluation::{
    to_evaluation_feature, EvaluationFeature, EvaluationParameters, FeatureStates, SourceLayer,
    StyleExpression,
};
use crate::feature_index::FeatureIndex;
use crate::geometry::{Geometry, GeometryType, PropertyMap, TileFeature};
use crate::gpu::{BufferHandle, GpuBuffer, GpuContext};
use crate::layout::{encode_vertex, layout_attributes, CircleLayoutVertex, Corner, TriangleIndex};
use crate::program_configuration::{ImagePosition, ImagePositions, ProgramConfigurationSet};
use crate::segment::{Segment, SegmentVector};
use crate::style::PointLayer;
use crate::tile_id::{CanonicalTileId, TileTransform};
use glam::IVec2;
use hashbrown::HashMap;
use std::cmp::Ordering;
use std::sync::Arc;

/// A source feature together with its position in the tile.
#[derive(Debug, Clone)]
pub struct IndexedFeature<F> {
    pub feature: F,
    pub id: Option<u64>,
    /// Index of the feature within its source layer.
    pub index: usize,
    pub source_layer_index: usize,
}

/// A feature that passed the filter, ready for tessellation.
#[derive(Debug, Clone)]
pub struct BucketFeature<'a> {
    pub id: Option<u64>,
    pub properties: &'a PropertyMap,
    pub geometry_type: GeometryType,
    pub source_layer_index: usize,
    pub index: usize,
    pub geometry: Geometry,
    /// Fill-pattern images; always empty for circles.
    pub patterns: HashMap<String, ImagePosition>,
    pub sort_key: Option<f64>,
    /// Position in the slice handed to `populate`.
    source: usize,
}

impl BucketFeature<'_> {
    fn evaluation_feature(&self) -> EvaluationFeature<'_> {
        EvaluationFeature {
            id: self.id,
            properties: self.properties,
            geometry_type: self.geometry_type,
            geometry: None,
        }
    }

    fn anchor(&self) -> Option<IVec2> {
        self.geometry.first().and_then(|ring| ring.first()).copied()
    }
}

#[derive(Debug, Clone)]
pub struct BucketParameters {
    /// Stable index of the layer group within the tile.
    pub index: usize,
    pub zoom: f64,
    pub overscaling: u32,
    /// Layers sharing this bucket; the first one drives filtering and sorting.
    pub layers: Vec<Arc<PointLayer>>,
}

pub struct PopulateParameters<'a> {
    pub feature_index: &'a mut dyn FeatureIndex,
    pub available_images: &'a [String],
    pub tile_transform: TileTransform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Empty,
    Populated,
    Uploaded,
    Destroyed,
}

/// Keyless features order before keyed ones.
fn compare_sort_keys(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

#[derive(Debug)]
pub struct CircleBucket {
    index: usize,
    zoom: f64,
    overscaling: u32,
    layer_ids: Vec<String>,
    layers: Vec<Arc<PointLayer>>,
    state_dependent_layers: Vec<Arc<PointLayer>>,
    has_pattern: bool,

    layout_vertex_array: Vec<CircleLayoutVertex>,
    layout_vertex_buffer: Option<BufferHandle>,

    index_array: Vec<TriangleIndex>,
    index_buffer: Option<BufferHandle>,

    program_configurations: ProgramConfigurationSet,
    segments: SegmentVector,
    state: BucketState,
    canonical: Option<CanonicalTileId>,
}

impl CircleBucket {
    pub fn new(options: BucketParameters) -> Self {
        let program_configurations = ProgramConfigurationSet::new(&options.layers, options.zoom);
        let state_dependent_layers = options
            .layers
            .iter()
            .filter(|l| l.is_state_dependent())
            .cloned()
            .collect();

        Self {
            index: options.index,
            zoom: options.zoom,
            overscaling: options.overscaling,
            layer_ids: options.layers.iter().map(|l| l.id.clone()).collect(),
            layers: options.layers,
            state_dependent_layers,
            has_pattern: false,
            layout_vertex_array: Vec::new(),
            layout_vertex_buffer: None,
            index_array: Vec::new(),
            index_buffer: None,
            program_configurations,
            segments: SegmentVector::new(),
            state: BucketState::Empty,
            canonical: None,
        }
    }

    /// Filters, sorts and tessellates the tile's features. Runs once per
    /// bucket; filter and sort-key failures abort population unchanged.
    pub fn populate<F: TileFeature>(
        &mut self,
        features: &[IndexedFeature<F>],
        options: &mut PopulateParameters<'_>,
        canonical: &CanonicalTileId,
    ) -> Result<(), BucketError> {
        if self.state != BucketState::Empty {
            return Err(BucketError::AlreadyPopulated { index: self.index });
        }
        self.canonical = Some(*canonical);
        self.state = BucketState::Populated;

        let Some(style_layer) = self.layers.first().cloned() else {
            return Ok(());
        };
        let circle_sort_key = style_layer.sort_key();
        let need_geometry = style_layer.needs_geometry();
        let params = EvaluationParameters::new(self.zoom);

        let mut bucket_features = Vec::with_capacity(features.len());
        for (source, indexed) in features.iter().enumerate() {
            let mut evaluation_feature = to_evaluation_feature(&indexed.feature, need_geometry, canonical);

            if !style_layer.filter(&params, &evaluation_feature, canonical)? {
                continue;
            }

            let sort_key = match circle_sort_key {
                Some(expr) => StyleExpression::evaluate(expr, &params, &evaluation_feature, None, canonical)?.as_f64(),
                None => None,
            };

            let geometry = match evaluation_feature.geometry.take() {
                Some(geometry) => geometry,
                None => indexed.feature.load_geometry(canonical, &options.tile_transform),
            };

            bucket_features.push(BucketFeature {
                id: indexed.id,
                properties: evaluation_feature.properties,
                geometry_type: evaluation_feature.geometry_type,
                source_layer_index: indexed.source_layer_index,
                index: indexed.index,
                geometry,
                patterns: HashMap::new(),
                sort_key,
                source,
            });
        }

        if circle_sort_key.is_some() {
            bucket_features.sort_by(|a, b| compare_sort_keys(a.sort_key, b.sort_key));
        }

        let mut kept = 0usize;
        for bucket_feature in &bucket_features {
            let Some(anchor) = bucket_feature.anchor() else {
                continue;
            };
            self.add_feature(bucket_feature, anchor, options.available_images, canonical);
            options.feature_index.insert(
                &features[bucket_feature.source].feature,
                &bucket_feature.geometry,
                bucket_feature.index,
                bucket_feature.source_layer_index,
                self.index,
            );
            kept += 1;
        }

        log::debug!(
            "circle bucket {} [{}] {}: kept {}/{} features, {} vertices, {} triangles, {} segments",
            self.index,
            self.layer_ids.join(","),
            canonical,
            kept,
            features.len(),
            self.layout_vertex_array.len(),
            self.index_array.len(),
            self.segments.len(),
        );

        Ok(())
    }

    /// Refreshes paint arrays of layers that read feature state. Geometry is
    /// left untouched.
    pub fn update(
        &mut self,
        states: &FeatureStates,
        source_layer: &dyn SourceLayer,
        available_images: &[String],
        image_positions: &ImagePositions,
    ) {
        if self.state_dependent_layers.is_empty() {
            return;
        }
        let Some(canonical) = self.canonical else {
            return;
        };
        self.program_configurations.update_paint_arrays(
            states,
            source_layer,
            &self.state_dependent_layers,
            available_images,
            image_positions,
            &canonical,
        );
    }

    pub fn is_empty(&self) -> bool {
        self.layout_vertex_array.is_empty()
    }

    pub fn upload_pending(&self) -> bool {
        match self.state {
            BucketState::Destroyed => false,
            BucketState::Uploaded => self.program_configurations.needs_upload,
            BucketState::Empty | BucketState::Populated => true,
        }
    }

    /// Materializes geometry buffers once, then (re)uploads pending paint
    /// buffers. A bucket that was never populated or is destroyed is left
    /// alone.
    pub fn upload(&mut self, context: &dyn GpuContext) -> Result<(), BucketError> {
        match self.state {
            BucketState::Empty => return Ok(()),
            BucketState::Destroyed => {
                log::warn!("circle bucket {}: upload after destroy ignored", self.index);
                return Ok(());
            }
            BucketState::Populated | BucketState::Uploaded => {}
        }

        if !self.is_empty() {
            if self.layout_vertex_buffer.is_none() {
                self.layout_vertex_buffer = Some(context.create_vertex_buffer(
                    "circle layout vertices",
                    bytemuck::cast_slice(&self.layout_vertex_array),
                    &layout_attributes(),
                )?);
            }
            if self.index_buffer.is_none() {
                self.index_buffer = Some(
                    context.create_index_buffer("circle indices", bytemuck::cast_slice(&self.index_array))?,
                );
            }
        }

        self.program_configurations.upload(context)?;
        self.state = BucketState::Uploaded;
        Ok(())
    }

    /// Releases every GPU resource. Buckets that never uploaded anything
    /// make no GPU calls.
    pub fn destroy(&mut self) {
        if let Some(buffer) = self.layout_vertex_buffer.take() {
            buffer.destroy();
        }
        if let Some(buffer) = self.index_buffer.take() {
            buffer.destroy();
        }
        self.program_configurations.destroy();
        self.state = BucketState::Destroyed;
    }

    fn add_feature(
        &mut self,
        feature: &BucketFeature<'_>,
        anchor: IVec2,
        available_images: &[String],
        canonical: &CanonicalTileId,
    ) {
        let segment = self.segments.prepare_segment(
            4,
            self.layout_vertex_array.len(),
            self.index_array.len(),
            feature.sort_key,
        );
        let base = segment.vertex_length as u16;

        for corner in Corner::QUAD {
            self.layout_vertex_array.push(CircleLayoutVertex {
                a_pos: encode_vertex(anchor, corner),
            });
        }

        self.index_array.push(TriangleIndex([base, base + 1, base + 2]));
        self.index_array.push(TriangleIndex([base, base + 3, base + 2]));

        segment.vertex_length += 4;
        segment.primitive_length += 2;

        self.program_configurations.populate_paint_arrays(
            self.layout_vertex_array.len(),
            &feature.evaluation_feature(),
            feature.index,
            &feature.patterns,
            available_images,
            canonical,
        );
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn overscaling(&self) -> u32 {
        self.overscaling
    }

    pub fn has_pattern(&self) -> bool {
        self.has_pattern
    }

    pub fn state(&self) -> BucketState {
        self.state
    }

    pub fn layer_ids(&self) -> &[String] {
        &self.layer_ids
    }

    pub fn layers(&self) -> &[Arc<PointLayer>] {
        &self.layers
    }

    pub fn segments(&self) -> &[Segment] {
        self.segments.get()
    }

    pub fn layout_vertices(&self) -> &[CircleLayoutVertex] {
        &self.layout_vertex_array
    }

    pub fn triangles(&self) -> &[TriangleIndex] {
        &self.index_array
    }

    pub fn layout_vertex_buffer(&self) -> Option<&dyn GpuBuffer> {
        self.layout_vertex_buffer.as_deref()
    }

    pub fn index_buffer(&self) -> Option<&dyn GpuBuffer> {
        self.index_buffer.as_deref()
    }

    pub fn program_configurations(&self) -> &ProgramConfigurationSet {
        &self.program_configurations
    }
}
