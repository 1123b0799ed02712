use anyhow::{Context, Result};
use clap::Parser;
use hemicanopy::{logger, prelude::*};
use std::{num::NonZeroUsize, path::PathBuf};

/// Convert equirectangular panoramas into hemispherical canopy images and
/// report their gap fractions.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory of panoramas.
    input: PathBuf,

    /// Directory receiving the hemispheres and the report.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// JSON circle definition or raster mask image.
    #[arg(long)]
    mask: Option<PathBuf>,

    /// JSON configuration file. Flags take precedence over its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// CSV sidecar with per-image metadata, e.g. from `exiftool -csv`.
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Camera heading in degrees.
    #[arg(long, allow_negative_numbers = true)]
    heading: Option<f64>,

    /// One of R, G, B, RGB, 2BG.
    #[arg(long)]
    channel: Option<ChannelMode>,

    /// Fixed sky threshold instead of Otsu's method.
    #[arg(long, conflicts_with = "zonal")]
    threshold: Option<u8>,

    /// Threshold each of this many ring zones separately.
    #[arg(long)]
    zonal: Option<NonZeroUsize>,

    #[arg(long)]
    gamma: Option<f64>,

    /// One of equidistant, stereographic, orthographic, equisolid.
    #[arg(long)]
    lens: Option<Lens>,

    #[arg(long)]
    start_vza: Option<f64>,

    #[arg(long)]
    end_vza: Option<f64>,

    #[arg(long)]
    rings: Option<usize>,

    #[arg(long)]
    segments: Option<usize>,

    /// Skip writing binarized hemispheres.
    #[arg(long)]
    no_export_binary: bool,

    /// Process several images at once.
    #[arg(long)]
    parallel: bool,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Overlay the flags that were given on `config`.
    fn apply(&self, config: &mut Config) {
        if let Some(heading) = self.heading {
            config.heading = heading;
        }
        if let Some(channel) = self.channel {
            config.channel = channel;
        }
        if let Some(value) = self.threshold {
            config.threshold = ThresholdMethod::Manual { value };
        }
        if let Some(zones) = self.zonal {
            config.threshold = ThresholdMethod::Zonal { zones };
        }
        if let Some(gamma) = self.gamma {
            config.gamma = gamma;
        }
        if let Some(lens) = self.lens {
            config.lens = lens;
        }
        if let Some(start) = self.start_vza {
            config.start_vza = start;
        }
        if let Some(end) = self.end_vza {
            config.end_vza = end;
        }
        if let Some(rings) = self.rings {
            config.rings = rings;
        }
        if let Some(segments) = self.segments {
            config.segments = segments;
        }
        if self.no_export_binary {
            config.export_binary = false;
        }
        if self.parallel {
            config.parallel = true;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init(if args.verbose { "debug" } else { "info" });

    let mut config = match &args.config {
        Some(path) => Config::open(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => Config::default(),
    };
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let mask = match &args.mask {
        Some(path) => Mask::open(path)?,
        None => Mask::default(),
    };
    let metadata: Box<dyn MetadataSource> = match &args.metadata {
        Some(path) => Box::new(
            CsvMetadata::open(path)
                .with_context(|| format!("failed to read metadata {}", path.display()))?,
        ),
        None => Box::new(RasterMetadata),
    };

    let images = list_images(&args.input)
        .with_context(|| format!("failed to list {}", args.input.display()))?;
    let batch = Batch::new(&config, &args.output, mask, metadata)?;
    let summary = batch.run(&images)?;

    println!(
        "{} of {} images processed, {} skipped, report written to {}",
        summary.rows.len(),
        images.len(),
        summary.failures.len(),
        batch.report_path().display()
    );
    Ok(())
}
