//! Point-like style layers (circle and heatmap) as consumed by the bucket.

use crate::error::ExpressionError;
use crate::evaluation::{EvaluationFeature, EvaluationParameters, FeatureFilter, StyleExpression};
use crate::expression::JsonExpression;
use crate::tile_id::CanonicalTileId;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Shape of a paint value on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintKind {
    Number,
    Color,
}

impl PaintKind {
    pub fn components(self) -> usize {
        match self {
            PaintKind::Number => 1,
            PaintKind::Color => 4,
        }
    }
}

struct PaintDef {
    name: &'static str,
    kind: PaintKind,
    default: [f32; 4],
}

const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

const fn num(name: &'static str, v: f32) -> PaintDef {
    PaintDef {
        name,
        kind: PaintKind::Number,
        default: [v, 0.0, 0.0, 0.0],
    }
}

const fn color(name: &'static str, c: [f32; 4]) -> PaintDef {
    PaintDef {
        name,
        kind: PaintKind::Color,
        default: c,
    }
}

const CIRCLE_PAINT: [PaintDef; 7] = [
    num("circle-radius", 5.0),
    color("circle-color", BLACK),
    num("circle-blur", 0.0),
    num("circle-opacity", 1.0),
    num("circle-stroke-width", 0.0),
    color("circle-stroke-color", BLACK),
    num("circle-stroke-opacity", 1.0),
];

const HEATMAP_PAINT: [PaintDef; 2] = [num("heatmap-weight", 1.0), num("heatmap-radius", 30.0)];

/// A paint property's value: fixed for the layer, or computed per feature.
#[derive(Debug, Clone)]
pub enum PaintValue {
    Constant(Vec<f32>),
    DataDriven(Arc<dyn StyleExpression>),
}

#[derive(Debug, Clone)]
pub struct PaintProperty {
    pub name: &'static str,
    pub kind: PaintKind,
    pub default: Vec<f32>,
    pub value: PaintValue,
}

impl PaintProperty {
    fn from_def(def: &PaintDef) -> Self {
        let default = def.default[..def.kind.components()].to_vec();
        Self {
            name: def.name,
            kind: def.kind,
            value: PaintValue::Constant(default.clone()),
            default,
        }
    }

    pub fn is_data_driven(&self) -> bool {
        matches!(self.value, PaintValue::DataDriven(_))
    }

    pub fn is_state_dependent(&self) -> bool {
        matches!(&self.value, PaintValue::DataDriven(e) if e.is_state_dependent())
    }
}

/// Layer kinds sharing the circle bucket. Only circles carry a sort key.
#[derive(Debug, Clone)]
pub enum PointLayerKind {
    Circle {
        sort_key: Option<Arc<dyn StyleExpression>>,
    },
    Heatmap,
}

#[derive(Debug, Clone)]
pub struct PointLayer {
    pub id: String,
    pub source_layer: String,
    pub kind: PointLayerKind,
    /// `None` accepts every feature.
    pub filter: Option<Arc<dyn FeatureFilter>>,
    pub paint: Vec<PaintProperty>,
}

impl PointLayer {
    pub fn circle(id: impl Into<String>, source_layer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_layer: source_layer.into(),
            kind: PointLayerKind::Circle { sort_key: None },
            filter: None,
            paint: CIRCLE_PAINT.iter().map(PaintProperty::from_def).collect(),
        }
    }

    pub fn heatmap(id: impl Into<String>, source_layer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_layer: source_layer.into(),
            kind: PointLayerKind::Heatmap,
            filter: None,
            paint: HEATMAP_PAINT.iter().map(PaintProperty::from_def).collect(),
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn FeatureFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the sort key; ignored by heatmap layers.
    pub fn with_sort_key(mut self, expr: Arc<dyn StyleExpression>) -> Self {
        if let PointLayerKind::Circle { sort_key } = &mut self.kind {
            *sort_key = Some(expr);
        }
        self
    }

    pub fn with_paint(mut self, name: &str, value: PaintValue) -> Result<Self, ExpressionError> {
        let prop = self
            .paint
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| ExpressionError::UnknownProperty(name.to_string()))?;
        prop.value = value;
        Ok(self)
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            PointLayerKind::Circle { .. } => "circle",
            PointLayerKind::Heatmap => "heatmap",
        }
    }

    pub fn sort_key(&self) -> Option<&dyn StyleExpression> {
        match &self.kind {
            PointLayerKind::Circle { sort_key } => sort_key.as_deref(),
            PointLayerKind::Heatmap => None,
        }
    }

    pub fn needs_geometry(&self) -> bool {
        self.filter.as_ref().is_some_and(|f| f.needs_geometry())
    }

    pub fn filter(
        &self,
        params: &EvaluationParameters,
        feature: &EvaluationFeature<'_>,
        canonical: &CanonicalTileId,
    ) -> Result<bool, ExpressionError> {
        match &self.filter {
            Some(f) => f.filter(params, feature, canonical),
            None => Ok(true),
        }
    }

    /// True when any paint property reads feature state.
    pub fn is_state_dependent(&self) -> bool {
        self.paint.iter().any(PaintProperty::is_state_dependent)
    }
}

fn hex_channel(s: &str, i: usize) -> Option<f32> {
    let byte = u8::from_str_radix(s.get(i..i + 2)?, 16).ok()?;
    Some(byte as f32 / 255.0)
}

/// Parses `#rrggbb`, `#rrggbbaa` or `[r, g, b(, a)]` with channels in 0..=1.
pub fn parse_color(v: &Value) -> Result<[f32; 4], ExpressionError> {
    let parsed = match v {
        Value::String(s) => s.strip_prefix('#').and_then(|hex| match hex.len() {
            6 | 8 => Some([
                hex_channel(hex, 0)?,
                hex_channel(hex, 2)?,
                hex_channel(hex, 4)?,
                if hex.len() == 8 { hex_channel(hex, 6)? } else { 1.0 },
            ]),
            _ => None,
        }),
        Value::Array(cs) if matches!(cs.len(), 3 | 4) => {
            let cs: Option<Vec<f32>> = cs.iter().map(|c| c.as_f64().map(|c| c as f32)).collect();
            cs.map(|cs| [cs[0], cs[1], cs[2], cs.get(3).copied().unwrap_or(1.0)])
        }
        _ => None,
    };
    parsed.ok_or_else(|| ExpressionError::Color(v.to_string()))
}

/// Converts an evaluated value into the GPU components of a paint kind.
pub fn paint_components(kind: PaintKind, v: &Value) -> Result<Vec<f32>, ExpressionError> {
    match kind {
        PaintKind::Number => v
            .as_f64()
            .map(|n| vec![n as f32])
            .ok_or_else(|| ExpressionError::Type {
                op: "paint".to_string(),
                expected: "number",
                found: v.to_string(),
            }),
        PaintKind::Color => parse_color(v).map(|c| c.to_vec()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Circle,
    Heatmap,
}

/// Serialized form of a point layer in a style document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    #[serde(rename = "source-layer")]
    pub source_layer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default)]
    pub layout: Map<String, Value>,
    #[serde(default)]
    pub paint: Map<String, Value>,
}

impl LayerSpec {
    /// Compiles filter, sort key and paint expressions.
    pub fn build(&self) -> Result<PointLayer, ExpressionError> {
        let mut layer = match self.layer_type {
            LayerType::Circle => PointLayer::circle(&self.id, &self.source_layer),
            LayerType::Heatmap => PointLayer::heatmap(&self.id, &self.source_layer),
        };

        if let Some(filter) = &self.filter {
            layer = layer.with_filter(Arc::new(JsonExpression::parse(filter)?));
        }

        if let Some(key) = self.layout.get("circle-sort-key") {
            layer = layer.with_sort_key(Arc::new(JsonExpression::parse(key)?));
        }

        for (name, json) in &self.paint {
            let kind = layer
                .paint
                .iter()
                .find(|p| p.name == name.as_str())
                .map(|p| p.kind)
                .ok_or_else(|| ExpressionError::UnknownProperty(name.clone()))?;

            let expr = JsonExpression::parse(json)?;
            let value = if expr.is_constant() {
                PaintValue::Constant(paint_components(kind, json)?)
            } else {
                PaintValue::DataDriven(Arc::new(expr))
            };
            layer = layer.with_paint(name, value)?;
        }

        Ok(layer)
    }
}

/// Groups layers that can share one bucket: equal type, source layer,
/// filter and layout. Groups keep the order of their first layer.
pub fn group_by_layout(layers: &[LayerSpec]) -> Vec<Vec<&LayerSpec>> {
    let mut groups: Vec<Vec<&LayerSpec>> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for layer in layers {
        let key = serde_json::json!([layer.layer_type, layer.source_layer, layer.filter, layer.layout]).to_string();
        match by_key.get(&key) {
            Some(&i) => groups[i].push(layer),
            None => {
                by_key.insert(key, groups.len());
                groups.push(vec![layer]);
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(v: Value) -> LayerSpec {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color(&json!("#ff0000")).unwrap(), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(parse_color(&json!("#00000000")).unwrap(), [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(parse_color(&json!([0.5, 0.5, 0.5])).unwrap(), [0.5, 0.5, 0.5, 1.0]);
        assert!(parse_color(&json!("red")).is_err());
        assert!(parse_color(&json!("#12345")).is_err());
    }

    #[test]
    fn test_only_circle_layers_have_sort_keys() {
        let key: Arc<dyn StyleExpression> = Arc::new(JsonExpression::parse(&json!(["get", "rank"])).unwrap());
        assert!(PointLayer::circle("c", "poi").with_sort_key(key.clone()).sort_key().is_some());
        assert!(PointLayer::heatmap("h", "poi").with_sort_key(key).sort_key().is_none());
    }

    #[test]
    fn test_build_layer_spec() {
        let layer = spec(json!({
            "id": "pois",
            "type": "circle",
            "source-layer": "poi",
            "filter": ["==", ["get", "kind"], "cafe"],
            "layout": {"circle-sort-key": ["get", "rank"]},
            "paint": {
                "circle-radius": ["get", "size"],
                "circle-color": "#ff0000",
                "circle-opacity": ["case", ["feature-state", "hover"], 1, 0.5]
            }
        }))
        .build()
        .unwrap();

        assert_eq!(layer.type_name(), "circle");
        assert!(layer.filter.is_some());
        assert!(layer.sort_key().is_some());
        assert!(layer.is_state_dependent());

        let radius = layer.paint.iter().find(|p| p.name == "circle-radius").unwrap();
        assert!(radius.is_data_driven());
        let color = layer.paint.iter().find(|p| p.name == "circle-color").unwrap();
        assert!(matches!(&color.value, PaintValue::Constant(c) if c == &vec![1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_unknown_paint_property_is_rejected() {
        let err = spec(json!({
            "id": "h", "type": "heatmap", "source-layer": "poi",
            "paint": {"circle-radius": 3}
        }))
        .build()
        .unwrap_err();
        assert_eq!(err, ExpressionError::UnknownProperty("circle-radius".into()));
    }

    #[test]
    fn test_group_by_layout() {
        let layers = vec![
            spec(json!({"id": "a", "type": "circle", "source-layer": "poi"})),
            spec(json!({"id": "b", "type": "heatmap", "source-layer": "poi"})),
            spec(json!({"id": "c", "type": "circle", "source-layer": "poi", "paint": {"circle-radius": 9}})),
            spec(json!({"id": "d", "type": "circle", "source-layer": "poi", "filter": ["has", "x"]})),
        ];
        let ids: Vec<Vec<&str>> = group_by_layout(&layers)
            .iter()
            .map(|g| g.iter().map(|l| l.id.as_str()).collect())
            .collect();
        assert_eq!(ids, vec![vec!["a", "c"], vec!["b"], vec!["d"]]);
    }
}
