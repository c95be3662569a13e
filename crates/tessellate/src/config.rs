use clap::Parser;
use std::path::PathBuf;

/// `circle-tessellate` - builds circle/heatmap buckets for a batch of decoded
/// tiles and optionally uploads them to a headless GPU device.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// JSON file with the decoded tiles (`{"tiles": [...]}`).
    #[arg(long, env = "CIRCLE_TILES_PATH")]
    pub tiles: PathBuf,

    /// JSON style document holding the circle and heatmap layers.
    #[arg(long, env = "CIRCLE_STYLE_PATH")]
    pub style: PathBuf,

    /// Optional feature states, keyed by source layer then feature id.
    ///
    /// Applied after the first upload; buckets whose paint depends on
    /// feature state are then re-uploaded.
    #[arg(long, env = "CIRCLE_FEATURE_STATE_PATH")]
    pub feature_state: Option<PathBuf>,

    /// Where to write the JSON report; logged only when unset.
    #[arg(long, env = "CIRCLE_REPORT_PATH")]
    pub report: Option<PathBuf>,

    /// Upload every bucket to a headless GPU adapter.
    #[arg(long, default_value_t = false)]
    pub upload: bool,

    /// Overscale factor recorded on every bucket.
    #[arg(long, default_value_t = 1)]
    pub overscaling: u32,
}
