// src/lib.rs
//! Circle bucket: turns the point features of one map tile into GPU-ready
//! quad geometry plus per-feature paint attributes.
//!
//! A bucket is built off the render thread (`populate`, `update`), then moved
//! to the thread owning the GPU device (`upload`, `destroy`). Every quad is
//! expanded on the GPU from a single anchor coordinate; the corner direction
//! is packed into the low bit of each coordinate (see [`layout`]).

pub mod bucket;
pub mod error;
pub mod evaluation;
pub mod expression;
pub mod feature_index;
pub mod geometry;
pub mod gpu;
pub mod layout;
pub mod program_configuration;
pub mod segment;
pub mod style;
pub mod tile_id;

// Re-export commonly used types for convenience.
pub use self::bucket::{BucketParameters, BucketState, CircleBucket, IndexedFeature, PopulateParameters};
pub use self::error::{BucketError, ExpressionError, GpuError};
pub use self::evaluation::{
    EvaluationFeature, EvaluationParameters, FeatureFilter, FeatureState, FeatureStates,
    SourceLayer, StyleExpression,
};
pub use self::expression::JsonExpression;
pub use self::feature_index::{FeatureIndex, FeatureIndexTree, IndexedFeatureRef};
pub use self::geometry::{DecodedFeature, Geometry, GeometryType, TileFeature, EXTENT};
pub use self::gpu::{BufferHandle, GpuBuffer, GpuContext, VertexLayout, WgpuBuffer, WgpuContext};
pub use self::layout::{encode_vertex, CircleLayoutVertex, Corner, TriangleIndex};
pub use self::program_configuration::{ImagePosition, ImagePositions, ProgramConfigurationSet};
pub use self::segment::{Segment, SegmentVector, MAX_VERTEX_ARRAY_LENGTH};
pub use self::style::{group_by_layout, LayerSpec, PaintValue, PointLayer, PointLayerKind};
pub use self::tile_id::{CanonicalTileId, TileTransform};
