use crate::pipeline::TileBuckets;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct BucketReport {
    pub tile: String,
    pub index: usize,
    pub layers: Vec<String>,
    pub source_layer: String,
    pub source_features: usize,
    pub vertices: usize,
    pub triangles: usize,
    pub segments: usize,
    pub paint_attributes: Vec<String>,
    pub uploaded: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub buckets: Vec<BucketReport>,
    pub paint_reuploads: usize,
}

impl Report {
    pub fn collect(tiles: &[TileBuckets], paint_reuploads: usize) -> Self {
        let buckets = tiles
            .iter()
            .flat_map(|t| t.buckets.iter().map(move |b| (t.tile, b)))
            .map(|(tile, built)| {
                let bucket = &built.bucket;
                BucketReport {
                    tile: tile.to_string(),
                    index: bucket.index(),
                    layers: bucket.layer_ids().to_vec(),
                    source_layer: built.source_layer.clone(),
                    source_features: built.source_features,
                    vertices: bucket.layout_vertices().len(),
                    triangles: bucket.triangles().len(),
                    segments: bucket.segments().len(),
                    paint_attributes: bucket
                        .program_configurations()
                        .iter()
                        .flat_map(|c| c.attribute_names())
                        .collect(),
                    uploaded: bucket.layout_vertex_buffer().is_some(),
                }
            })
            .collect();

        Self {
            buckets,
            paint_reuploads,
        }
    }

    pub fn total_vertices(&self) -> usize {
        self.buckets.iter().map(|b| b.vertices).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::TileBatch;
    use crate::pipeline::build_tile;
    use circle_bucket::{group_by_layout, LayerSpec, PointLayer};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_report_lists_paint_attributes() {
        let batch: TileBatch = serde_json::from_value(json!({"tiles": [{
            "id": {"z": 5, "x": 3, "y": 9},
            "layers": [{"name": "poi", "features": [
                {"id": 1, "type": "Point", "properties": {"size": 4}, "geometry": [[[1, 1]]]}
            ]}]
        }]}))
        .unwrap();
        let specs: Vec<LayerSpec> = serde_json::from_value(json!([
            {"id": "dots", "type": "circle", "source-layer": "poi", "paint": {"circle-radius": ["get", "size"]}}
        ]))
        .unwrap();
        let groups: Vec<Vec<Arc<PointLayer>>> = group_by_layout(&specs)
            .into_iter()
            .map(|g| g.into_iter().map(|s| Arc::new(s.build().unwrap())).collect())
            .collect();

        let tiles = vec![build_tile(&batch.tiles[0], &groups, 1).unwrap()];
        let report = Report::collect(&tiles, 0);

        let [bucket] = report.buckets.as_slice() else {
            panic!("expected one bucket");
        };
        assert_eq!(bucket.tile, "5/3/9");
        assert_eq!(bucket.layers, vec!["dots"]);
        assert_eq!(bucket.paint_attributes, vec!["a_radius"]);
        assert_eq!((bucket.vertices, bucket.triangles, bucket.segments), (4, 2, 1));
        assert!(!bucket.uploaded);
        assert_eq!(report.total_vertices(), 4);
    }
}
