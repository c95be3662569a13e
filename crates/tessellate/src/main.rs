mod config;
mod gpu;
mod input;
mod pipeline;
mod report;

use anyhow::{Context, Result};
use circle_bucket::{group_by_layout, ImagePositions, PointLayer, WgpuContext};
use clap::Parser;
use config::Config;
use gpu::HeadlessGpu;
use input::{read_json, states_for, FeatureStateDocument, StyleDocument, TileBatch};
use pipeline::{build_tile, TileBuckets};
use rayon::prelude::*;
use report::Report;
use std::sync::Arc;

fn main() -> Result<()> {
    // Initialize logging; default to "info" if RUST_LOG is unset.
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let config = Config::parse();

    // Style layers, grouped so layers sharing layout share a bucket.
    let style: StyleDocument = read_json(&config.style)?;
    let groups = group_by_layout(&style.layers)
        .into_iter()
        .map(|group| {
            group
                .into_iter()
                .map(|spec| {
                    spec.build()
                        .map(Arc::new)
                        .with_context(|| format!("building layer `{}`", spec.id))
                })
                .collect::<Result<Vec<Arc<PointLayer>>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    log::info!("{} layers in {} bucket groups", style.layers.len(), groups.len());

    let batch: TileBatch = read_json(&config.tiles)?;

    // Buckets are built on worker threads and handed back whole.
    let mut tiles = batch
        .tiles
        .par_iter()
        .map(|tile| build_tile(tile, &groups, config.overscaling))
        .collect::<Result<Vec<TileBuckets>>>()?;

    let feature_states: Option<FeatureStateDocument> =
        config.feature_state.as_deref().map(read_json::<FeatureStateDocument>).transpose()?;

    let mut paint_reuploads = 0;
    if config.upload {
        let headless = pollster::block_on(HeadlessGpu::new())?;
        let context = WgpuContext::new(&headless.device, &headless.queue);

        upload_all(&mut tiles, &context)?;

        if let Some(doc) = &feature_states {
            apply_feature_states(&mut tiles, &batch, doc);
            paint_reuploads = upload_all(&mut tiles, &context)?;
            log::info!("{paint_reuploads} buckets re-uploaded after feature-state update");
        }

        headless.flush();
    } else if let Some(doc) = &feature_states {
        apply_feature_states(&mut tiles, &batch, doc);
    }

    let report = Report::collect(&tiles, paint_reuploads);

    for tile in &mut tiles {
        for built in &mut tile.buckets {
            built.bucket.destroy();
        }
    }

    match &config.report {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(file), &report)?;
            log::info!("Report written to {}", path.display());
        }
        None => log::info!(
            "{} buckets, {} vertices across {} tiles",
            report.buckets.len(),
            report.total_vertices(),
            tiles.len()
        ),
    }

    Ok(())
}

/// Uploads every bucket with pending work and returns how many were touched.
fn upload_all(tiles: &mut [TileBuckets], context: &WgpuContext<'_>) -> Result<usize> {
    let mut uploaded = 0;
    for tile in tiles.iter_mut() {
        for built in tile.buckets.iter_mut() {
            if built.bucket.is_empty() || !built.bucket.upload_pending() {
                continue;
            }
            built
                .bucket
                .upload(context)
                .with_context(|| format!("uploading bucket {} of tile {}", built.bucket.index(), tile.tile))?;
            uploaded += 1;
        }
    }
    Ok(uploaded)
}

fn apply_feature_states(tiles: &mut [TileBuckets], batch: &TileBatch, doc: &FeatureStateDocument) {
    let no_positions = ImagePositions::new();
    for (tile, spec) in tiles.iter_mut().zip(&batch.tiles) {
        for built in tile.buckets.iter_mut() {
            let Some((_, source_layer)) = spec.source_layer(&built.source_layer) else {
                continue;
            };
            let states = states_for(doc, &built.source_layer);
            built.bucket.update(&states, &source_layer.features, &[], &no_positions);
        }
    }
}
