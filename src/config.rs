use crate::{
    binarize::{BinarizationConfig, ChannelMode, ThresholdMethod},
    error::Result,
    gap::RingSegmentGrid,
    lens::Lens,
    pipeline::Pipeline,
    projection::ProjectionParams,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Settings for a batch run, as read from a JSON file.
///
/// Every field is optional in the file. Unknown fields are rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Camera heading in degrees, clockwise from north.
    pub heading: f64,

    /// Metadata attribute holding a per-image heading in degrees. Images
    /// without it fall back to [`Config::heading`].
    pub heading_attribute: Option<String>,

    pub channel: ChannelMode,
    pub threshold: ThresholdMethod,
    pub gamma: f64,
    pub lens: Lens,

    /// View zenith range in degrees.
    pub start_vza: f64,
    pub end_vza: f64,
    pub rings: usize,
    pub segments: usize,

    /// Also write the binarized hemisphere.
    pub export_binary: bool,

    /// Process images on the rayon thread pool.
    pub parallel: bool,

    // Relative paths are resolved against the output directory.
    pub masked_dir: PathBuf,
    pub binary_dir: PathBuf,
    pub report_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heading: 0.0,
            heading_attribute: None,
            channel: ChannelMode::default(),
            threshold: ThresholdMethod::default(),
            gamma: 2.2,
            lens: Lens::default(),
            start_vza: 0.0,
            end_vza: 70.0,
            rings: 7,
            segments: 8,
            export_binary: true,
            parallel: false,
            masked_dir: PathBuf::from("masked_hemispheres"),
            binary_dir: PathBuf::from("binarized"),
            report_file: PathBuf::from("canopy_report.csv"),
        }
    }
}

impl Config {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn binarization(&self) -> Result<BinarizationConfig> {
        BinarizationConfig::new(self.channel, self.threshold, self.gamma)
    }

    pub fn grid(&self) -> Result<RingSegmentGrid> {
        RingSegmentGrid::from_degrees(self.start_vza, self.end_vza, self.rings, self.segments)
    }

    /// Projection for images without a heading of their own.
    pub fn projection(&self) -> Result<ProjectionParams> {
        ProjectionParams::from_degrees(self.heading)
    }

    pub fn pipeline(&self) -> Result<Pipeline> {
        Ok(Pipeline::new(self.binarization()?, self.grid()?, self.lens))
    }

    /// Check every setting, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.projection()?;
        self.pipeline()?;
        Ok(())
    }
}
