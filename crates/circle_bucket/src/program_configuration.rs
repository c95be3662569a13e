//! Per-vertex paint attributes for data-driven paint properties.
//!
//! Every layer of a bucket gets one [`ProgramConfiguration`]; each of its
//! data-driven properties owns a binder with a CPU array parallel to the
//! bucket's vertex array. Constant properties stay uniforms and never touch
//! vertex memory.

use crate::error::GpuError;
use crate::evaluation::{
    to_evaluation_feature, EvaluationFeature, EvaluationParameters, FeatureState, FeatureStates,
    SourceLayer, StyleExpression,
};
use crate::gpu::{BufferHandle, GpuBuffer, GpuContext, VertexLayout};
use crate::style::{paint_components, PaintKind, PaintValue, PointLayer};
use crate::tile_id::CanonicalTileId;
use hashbrown::HashMap;
use std::sync::Arc;

/// Location of a sprite in the image atlas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePosition {
    pub padded_rect: [u16; 4],
    pub pixel_ratio: f32,
}

pub type ImagePositions = HashMap<String, ImagePosition>;

/// Vertex range a feature occupies in the paint arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FeaturePosition {
    feature_index: usize,
    start: usize,
    end: usize,
}

#[derive(Debug)]
struct PaintBinder {
    property: &'static str,
    kind: PaintKind,
    default: Vec<f32>,
    expression: Arc<dyn StyleExpression>,
    array: Vec<f32>,
    buffer: Option<BufferHandle>,
}

impl PaintBinder {
    fn components(&self) -> usize {
        self.kind.components()
    }

    fn vertex_len(&self) -> usize {
        self.array.len() / self.components()
    }

    /// Paint evaluation never drops a feature: failures fall back to the
    /// property default.
    fn evaluate(
        &self,
        globals: &EvaluationParameters,
        feature: &EvaluationFeature<'_>,
        state: Option<&FeatureState>,
        canonical: &CanonicalTileId,
    ) -> Vec<f32> {
        let value = self
            .expression
            .evaluate(globals, feature, state, canonical)
            .and_then(|v| paint_components(self.kind, &v));
        match value {
            Ok(v) => v,
            Err(err) => {
                log::trace!("{}: using default ({})", self.property, err);
                self.default.clone()
            }
        }
    }

    fn fill(&mut self, start: usize, end: usize, value: &[f32]) {
        let c = self.components();
        for chunk in self.array[start * c..end * c].chunks_exact_mut(c) {
            chunk.copy_from_slice(value);
        }
    }

    fn attribute_name(&self) -> String {
        let short = self.property.split_once('-').map_or(self.property, |(_, rest)| rest);
        format!("a_{}", short.replace('-', "_"))
    }
}

/// Paint attribute binders of one layer.
#[derive(Debug)]
pub struct ProgramConfiguration {
    layer_id: String,
    zoom: f64,
    binders: Vec<PaintBinder>,
    uniforms: Vec<(&'static str, Vec<f32>)>,
    feature_map: HashMap<u64, Vec<FeaturePosition>>,
}

impl ProgramConfiguration {
    pub fn new(layer: &PointLayer, zoom: f64) -> Self {
        let mut binders = Vec::new();
        let mut uniforms = Vec::new();
        for prop in &layer.paint {
            match &prop.value {
                PaintValue::DataDriven(expr) => binders.push(PaintBinder {
                    property: prop.name,
                    kind: prop.kind,
                    default: prop.default.clone(),
                    expression: expr.clone(),
                    array: Vec::new(),
                    buffer: None,
                }),
                PaintValue::Constant(v) => uniforms.push((prop.name, v.clone())),
            }
        }

        Self {
            layer_id: layer.id.clone(),
            zoom,
            binders,
            uniforms,
            feature_map: HashMap::new(),
        }
    }

    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    /// Extends every paint array to `new_length` vertices using the
    /// feature's evaluated values.
    pub fn populate_paint_arrays(
        &mut self,
        new_length: usize,
        feature: &EvaluationFeature<'_>,
        index: usize,
        canonical: &CanonicalTileId,
    ) {
        let globals = EvaluationParameters::new(self.zoom);
        let mut start = None;
        for binder in &mut self.binders {
            let value = binder.evaluate(&globals, feature, None, canonical);
            let from = binder.vertex_len();
            binder.array.resize(new_length * binder.components(), 0.0);
            binder.fill(from, new_length, &value);
            start.get_or_insert(from);
        }

        if let (Some(id), Some(start)) = (feature.id, start) {
            self.feature_map.entry(id).or_default().push(FeaturePosition {
                feature_index: index,
                start,
                end: new_length,
            });
        }
    }

    /// Rewrites the ranges of features present in `states` for binders that
    /// read feature state. Returns whether anything changed.
    pub fn update_paint_arrays(
        &mut self,
        states: &FeatureStates,
        source_layer: &dyn SourceLayer,
        canonical: &CanonicalTileId,
    ) -> bool {
        let globals = EvaluationParameters::new(self.zoom);
        let mut dirty = false;

        for (id, state) in states {
            let Some(positions) = self.feature_map.get(id) else {
                continue;
            };
            for pos in positions {
                let Some(feature) = source_layer.feature(pos.feature_index) else {
                    continue;
                };
                let feature = to_evaluation_feature(feature, false, canonical);
                for binder in self.binders.iter_mut().filter(|b| b.expression.is_state_dependent()) {
                    let value = binder.evaluate(&globals, &feature, Some(state), canonical);
                    binder.fill(pos.start, pos.end, &value);
                    dirty = true;
                }
            }
        }

        dirty
    }

    /// Creates paint buffers on first use; later uploads rewrite them in
    /// place, or recreate them when the array size changed.
    pub fn upload(&mut self, context: &dyn GpuContext) -> Result<(), GpuError> {
        for (i, binder) in self.binders.iter_mut().enumerate() {
            if binder.array.is_empty() {
                continue;
            }
            let bytes: &[u8] = bytemuck::cast_slice(&binder.array);
            match &binder.buffer {
                Some(buffer) if buffer.size() == bytes.len() as u64 => {
                    context.update_buffer(buffer.as_ref(), bytes)?;
                }
                _ => {
                    if let Some(old) = binder.buffer.take() {
                        old.destroy();
                    }
                    let label = format!("{} {}", self.layer_id, binder.property);
                    let layout = paint_layout(binder.kind, i);
                    binder.buffer = Some(context.create_vertex_buffer(&label, bytes, &layout)?);
                }
            }
        }
        Ok(())
    }

    pub fn destroy(&mut self) {
        for binder in &mut self.binders {
            if let Some(buffer) = binder.buffer.take() {
                buffer.destroy();
            }
        }
    }

    /// Shader attribute names of the per-vertex paint arrays, in buffer order.
    pub fn attribute_names(&self) -> Vec<String> {
        self.binders.iter().map(PaintBinder::attribute_name).collect()
    }

    /// Vertex layouts of the paint buffers, in buffer order.
    pub fn attribute_layouts(&self) -> Vec<VertexLayout> {
        self.binders
            .iter()
            .enumerate()
            .map(|(i, b)| paint_layout(b.kind, i))
            .collect()
    }

    /// Uploaded paint buffers, in buffer order.
    pub fn paint_buffers(&self) -> impl Iterator<Item = &dyn GpuBuffer> + '_ {
        self.binders.iter().filter_map(|b| b.buffer.as_deref())
    }

    /// Values of the constant paint properties.
    pub fn uniform_values(&self) -> &[(&'static str, Vec<f32>)] {
        &self.uniforms
    }

    /// CPU-side paint array of a data-driven property.
    pub fn paint_array(&self, property: &str) -> Option<&[f32]> {
        self.binders
            .iter()
            .find(|b| b.property == property)
            .map(|b| b.array.as_slice())
    }
}

/// Shader location 0 is the layout position; paint attributes follow.
fn paint_layout(kind: PaintKind, slot: usize) -> VertexLayout {
    let format = match kind {
        PaintKind::Number => wgpu::VertexFormat::Float32,
        PaintKind::Color => wgpu::VertexFormat::Float32x4,
    };
    VertexLayout {
        array_stride: format.size(),
        attributes: vec![wgpu::VertexAttribute {
            format,
            offset: 0,
            shader_location: 1 + slot as u32,
        }],
    }
}

/// Paint configurations of every layer sharing a bucket.
#[derive(Debug)]
pub struct ProgramConfigurationSet {
    configurations: Vec<ProgramConfiguration>,
    /// Set when a paint array changed since the last upload.
    pub needs_upload: bool,
}

impl ProgramConfigurationSet {
    pub fn new(layers: &[Arc<PointLayer>], zoom: f64) -> Self {
        Self {
            configurations: layers.iter().map(|l| ProgramConfiguration::new(l, zoom)).collect(),
            needs_upload: false,
        }
    }

    /// Image inputs are accepted for pattern-capable binders; circle and
    /// heatmap paint properties never read them.
    pub fn populate_paint_arrays(
        &mut self,
        new_length: usize,
        feature: &EvaluationFeature<'_>,
        index: usize,
        _image_positions: &ImagePositions,
        _available_images: &[String],
        canonical: &CanonicalTileId,
    ) {
        for config in &mut self.configurations {
            config.populate_paint_arrays(new_length, feature, index, canonical);
        }
        self.needs_upload = true;
    }

    pub fn update_paint_arrays(
        &mut self,
        states: &FeatureStates,
        source_layer: &dyn SourceLayer,
        layers: &[Arc<PointLayer>],
        _available_images: &[String],
        _image_positions: &ImagePositions,
        canonical: &CanonicalTileId,
    ) {
        for layer in layers {
            let Some(config) = self.configurations.iter_mut().find(|c| c.layer_id == layer.id) else {
                continue;
            };
            if config.update_paint_arrays(states, source_layer, canonical) {
                self.needs_upload = true;
            }
        }
    }

    /// Uploads pending paint arrays. No-op while nothing changed.
    pub fn upload(&mut self, context: &dyn GpuContext) -> Result<(), GpuError> {
        if !self.needs_upload {
            return Ok(());
        }
        for config in &mut self.configurations {
            config.upload(context)?;
        }
        self.needs_upload = false;
        Ok(())
    }

    pub fn destroy(&mut self) {
        for config in &mut self.configurations {
            config.destroy();
        }
    }

    pub fn get(&self, layer_id: &str) -> Option<&ProgramConfiguration> {
        self.configurations.iter().find(|c| c.layer_id == layer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProgramConfiguration> {
        self.configurations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::JsonExpression;
    use crate::geometry::{DecodedFeature, GeometryType, PropertyMap};
    use crate::gpu::recording::RecordingContext;
    use serde_json::{json, Value};

    fn expr(v: Value) -> PaintValue {
        PaintValue::DataDriven(Arc::new(JsonExpression::parse(&v).unwrap()))
    }

    fn layer() -> Arc<PointLayer> {
        Arc::new(
            PointLayer::circle("c", "poi")
                .with_paint("circle-radius", expr(json!(["get", "size"])))
                .unwrap()
                .with_paint("circle-color", expr(json!(["case", ["feature-state", "hover"], "#ffffff", "#000000"])))
                .unwrap(),
        )
    }

    fn props(v: Value) -> PropertyMap {
        v.as_object().cloned().unwrap()
    }

    fn tile() -> CanonicalTileId {
        CanonicalTileId::new(10, 1, 1)
    }

    fn populate(set: &mut ProgramConfigurationSet, features: &[DecodedFeature]) {
        for (i, f) in features.iter().enumerate() {
            let ef = to_evaluation_feature(f, false, &tile());
            set.populate_paint_arrays((i + 1) * 4, &ef, i, &ImagePositions::new(), &[], &tile());
        }
    }

    #[test]
    fn test_constant_properties_stay_uniforms() {
        let set = ProgramConfigurationSet::new(&[layer()], 10.0);
        let config = set.get("c").unwrap();
        assert_eq!(config.attribute_names(), vec!["a_radius", "a_color"]);
        assert!(config.uniform_values().iter().any(|(n, v)| *n == "circle-opacity" && v == &vec![1.0]));
        let layouts = config.attribute_layouts();
        assert_eq!(layouts[0].attributes[0].shader_location, 1);
        assert_eq!(layouts[1].array_stride, 16);
    }

    #[test]
    fn test_populate_fills_parallel_arrays() {
        let mut set = ProgramConfigurationSet::new(&[layer()], 10.0);
        let features = vec![
            DecodedFeature::point(Some(1), 0, 0, props(json!({"size": 3}))),
            DecodedFeature::point(Some(2), 0, 0, props(json!({"size": "bogus"}))),
        ];
        populate(&mut set, &features);
        assert!(set.needs_upload);

        let config = set.get("c").unwrap();
        assert_eq!(config.paint_array("circle-radius").unwrap(), &[3.0, 3.0, 3.0, 3.0, 5.0, 5.0, 5.0, 5.0]);
        assert_eq!(config.paint_array("circle-color").unwrap().len(), 8 * 4);
    }

    #[test]
    fn test_update_rewrites_only_stateful_features() {
        let mut set = ProgramConfigurationSet::new(&[layer()], 10.0);
        let features = vec![
            DecodedFeature::point(Some(1), 0, 0, props(json!({"size": 3}))),
            DecodedFeature::point(Some(2), 0, 0, props(json!({"size": 4}))),
        ];
        populate(&mut set, &features);
        let ctx = RecordingContext::default();
        set.upload(&ctx).unwrap();
        assert!(!set.needs_upload);

        let mut states = FeatureStates::new();
        states.insert(2, props(json!({"hover": true})));
        set.update_paint_arrays(&states, &features, &[layer()], &[], &ImagePositions::new(), &tile());
        assert!(set.needs_upload);

        let colors = set.get("c").unwrap().paint_array("circle-color").unwrap();
        assert_eq!(&colors[..4], &[0.0, 0.0, 0.0, 1.0]);
        assert_eq!(&colors[16..20], &[1.0, 1.0, 1.0, 1.0]);
        // Radius does not read state and keeps its value.
        assert_eq!(set.get("c").unwrap().paint_array("circle-radius").unwrap()[4], 4.0);
    }

    #[test]
    fn test_upload_creates_then_rewrites() {
        let mut set = ProgramConfigurationSet::new(&[layer()], 10.0);
        let features = vec![DecodedFeature::point(Some(1), 0, 0, props(json!({"size": 3})))];
        populate(&mut set, &features);

        let ctx = RecordingContext::default();
        set.upload(&ctx).unwrap();
        assert_eq!(ctx.counters.vertex_buffers(), 2);

        // Nothing pending: no GPU traffic.
        set.upload(&ctx).unwrap();
        assert_eq!(ctx.counters.updates(), 0);

        set.needs_upload = true;
        set.upload(&ctx).unwrap();
        assert_eq!(ctx.counters.vertex_buffers(), 2);
        assert_eq!(ctx.counters.updates(), 2);

        set.destroy();
        assert_eq!(ctx.counters.destroyed(), 2);
    }

    #[test]
    fn test_features_without_id_are_not_tracked() {
        let mut set = ProgramConfigurationSet::new(&[layer()], 10.0);
        let p = props(json!({"size": 1}));
        let f = EvaluationFeature {
            id: None,
            properties: &p,
            geometry_type: GeometryType::Point,
            geometry: None,
        };
        set.populate_paint_arrays(4, &f, 0, &ImagePositions::new(), &[], &tile());
        assert!(set.get("c").unwrap().feature_map.is_empty());
    }
}
