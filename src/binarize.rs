use crate::{
    error::{Error, Result},
    mask::MaskRaster,
    projection::RasterImage,
};
use image::{GrayImage, Luma, Rgb};
use serde::{Deserialize, Serialize};
use std::{fmt, num::NonZeroUsize, str::FromStr};
use tracing::debug;

/// Threshold used by Otsu's method when the histogram cannot be split, for
/// example when every valid pixel has the same intensity.
pub const OTSU_FALLBACK: u8 = 128;

/// Exported levels of sky, canopy and invalid pixels.
pub const SKY_LEVEL: u8 = 255;
pub const CANOPY_LEVEL: u8 = 0;
pub const INVALID_LEVEL: u8 = 128;

/// Describes how the single channel that separates sky from canopy is derived
/// from an RGB pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMode {
    #[serde(rename = "R")]
    Red,
    #[serde(rename = "G")]
    Green,
    #[serde(rename = "B")]
    Blue,

    /// Rec. 601 luma.
    #[serde(rename = "RGB")]
    Luminance,

    /// Twice the blue channel minus the green channel.
    ///
    /// Sky is bright in blue and moderately bright in green while foliage is
    /// dark in blue, so the difference widens the gap between the two.
    #[default]
    #[serde(rename = "2BG")]
    TwoBlueMinusGreen,
}

impl ChannelMode {
    /// Combine gamma corrected channels, each on [0, 1], into a value on [0, 1].
    fn combine(self, [r, g, b]: [f64; 3]) -> f64 {
        let value = match self {
            ChannelMode::Red => r,
            ChannelMode::Green => g,
            ChannelMode::Blue => b,
            ChannelMode::Luminance => 0.299 * r + 0.587 * g + 0.114 * b,
            ChannelMode::TwoBlueMinusGreen => 2.0 * b - g,
        };
        value.clamp(0.0, 1.0)
    }
}

impl FromStr for ChannelMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "R" => Ok(ChannelMode::Red),
            "G" => Ok(ChannelMode::Green),
            "B" => Ok(ChannelMode::Blue),
            "RGB" => Ok(ChannelMode::Luminance),
            "2BG" => Ok(ChannelMode::TwoBlueMinusGreen),
            other => Err(Error::InvalidConfig(format!(
                "unknown channel mode {other}, expected one of R, G, B, RGB, 2BG"
            ))),
        }
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelMode::Red => "R",
            ChannelMode::Green => "G",
            ChannelMode::Blue => "B",
            ChannelMode::Luminance => "RGB",
            ChannelMode::TwoBlueMinusGreen => "2BG",
        };
        write!(f, "{name}")
    }
}

/// How the sky threshold is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ThresholdMethod {
    /// One threshold from Otsu's method over all valid pixels.
    #[default]
    Otsu,

    /// A fixed threshold on the corrected 8-bit scale.
    Manual { value: u8 },

    /// Otsu's method run independently on concentric ring zones of equal width.
    Zonal { zones: NonZeroUsize },
}

/// Settings for classifying hemisphere pixels as sky.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BinarizationConfig {
    channel: ChannelMode,
    method: ThresholdMethod,
    gamma: f64,
}

impl BinarizationConfig {
    pub fn new(channel: ChannelMode, method: ThresholdMethod, gamma: f64) -> Result<Self> {
        if !gamma.is_finite() || gamma <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "gamma must be greater than zero but got {gamma}"
            )));
        }

        Ok(Self {
            channel,
            method,
            gamma,
        })
    }

    pub fn channel(&self) -> ChannelMode {
        self.channel
    }

    pub fn method(&self) -> ThresholdMethod {
        self.method
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}

impl Default for BinarizationConfig {
    fn default() -> Self {
        Self {
            channel: ChannelMode::default(),
            method: ThresholdMethod::default(),
            gamma: 2.2,
        }
    }
}

/// The circle of valid pixels, in pixel units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CircleRegion {
    cx: f64,
    cy: f64,
    radius: f64,
}

impl CircleRegion {
    pub fn new(cx: f64, cy: f64, radius: f64) -> Result<Self> {
        if !(cx.is_finite() && cy.is_finite() && radius.is_finite()) || radius <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "circular region needs a finite centre and a positive radius but got ({cx}, {cy}, {radius})"
            )));
        }

        Ok(Self { cx, cy, radius })
    }

    /// The circle inscribed in a `side` x `side` image.
    pub fn inscribed(side: u32) -> Result<Self> {
        let half = side as f64 / 2.0;
        Self::new(half, half, half)
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Offset of the centre of pixel (`x`, `y`) from the circle centre.
    pub fn offset(&self, x: u32, y: u32) -> (f64, f64) {
        (x as f64 + 0.5 - self.cx, y as f64 + 0.5 - self.cy)
    }

    /// Distance of pixel (`x`, `y`) from the centre as a fraction of the radius.
    pub fn normalized_radius(&self, x: u32, y: u32) -> f64 {
        let (dx, dy) = self.offset(x, y);
        dx.hypot(dy) / self.radius
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        let (dx, dy) = self.offset(x, y);
        dx * dx + dy * dy <= self.radius * self.radius
    }
}

/// Classification of a single hemisphere pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Sky,
    Canopy,
    /// Outside the circular region or the mask, ignored by every statistic.
    Invalid,
}

/// Thresholds that produced a [`BinaryImage`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Thresholds {
    Global(u8),
    /// One threshold per ring zone, from the centre outwards.
    Zonal(Vec<u8>),
}

impl fmt::Display for Thresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Thresholds::Global(value) => write!(f, "{value}"),
            Thresholds::Zonal(values) => {
                let joined: Vec<String> = values.iter().map(u8::to_string).collect();
                write!(f, "{}", joined.join("/"))
            }
        }
    }
}

/// A hemisphere classified into sky, canopy and invalid pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct BinaryImage {
    width: u32,
    height: u32,
    region: CircleRegion,
    classes: Vec<Class>,
    thresholds: Thresholds,
}

impl BinaryImage {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The circular region the classification was computed in.
    pub fn region(&self) -> &CircleRegion {
        &self.region
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Returns the class of pixel (`x`, `y`), or `None` if it is off the image.
    pub fn class(&self, x: u32, y: u32) -> Option<Class> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.classes.get((y * self.width + x) as usize).copied()
    }

    /// Iterate over `(x, y, class)` row by row.
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32, Class)> + '_ {
        let width = self.width;
        self.classes
            .iter()
            .enumerate()
            .map(move |(i, class)| (i as u32 % width, i as u32 / width, *class))
    }

    pub fn sky_count(&self) -> usize {
        self.count(Class::Sky)
    }

    pub fn valid_count(&self) -> usize {
        self.classes.len() - self.count(Class::Invalid)
    }

    fn count(&self, class: Class) -> usize {
        self.classes.iter().filter(|&&c| c == class).count()
    }

    /// Render sky white, canopy black and invalid pixels mid grey.
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| match self.class(x, y) {
            Some(Class::Sky) => Luma([SKY_LEVEL]),
            Some(Class::Canopy) => Luma([CANOPY_LEVEL]),
            Some(Class::Invalid) | None => Luma([INVALID_LEVEL]),
        })
    }
}

/// Compute Otsu's threshold for an 8-bit histogram.
///
/// Returns the level `t` that maximizes the between-class variance of the
/// classes `[0, t)` and `[t, 255]`, so a pixel is sky if its level is at least
/// `t`. Ties resolve to the lowest level. Histograms that cannot be split
/// return [`OTSU_FALLBACK`].
pub fn otsu_threshold(histogram: &[u64; 256]) -> u8 {
    let total: u64 = histogram.iter().sum();
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut best: Option<(u8, f64)> = None;
    let mut below = 0u64;
    let mut weighted_below = 0.0f64;
    for threshold in 1..=255usize {
        let level = threshold - 1;
        below += histogram[level];
        weighted_below += level as f64 * histogram[level] as f64;

        let above = total - below;
        if below == 0 {
            continue;
        }
        if above == 0 {
            break;
        }

        let mean_below = weighted_below / below as f64;
        let mean_above = (weighted_total - weighted_below) / above as f64;
        let variance = below as f64 * above as f64 * (mean_below - mean_above).powi(2);
        if best.is_none_or(|(_, best_variance)| variance > best_variance) {
            best = Some((threshold as u8, variance));
        }
    }

    best.map_or(OTSU_FALLBACK, |(threshold, _)| threshold)
}

fn histogram(levels: impl Iterator<Item = u8>) -> [u64; 256] {
    let mut bins = [0u64; 256];
    for level in levels {
        bins[level as usize] += 1;
    }
    bins
}

/// Gamma correct a pixel and reduce it to one 8-bit level.
fn intensity(pixel: &Rgb<u8>, channel: ChannelMode, exponent: f64) -> u8 {
    let corrected = pixel.0.map(|c| (c as f64 / 255.0).powf(exponent));
    (channel.combine(corrected) * 255.0).round() as u8
}

/// Classify every pixel of `hemisphere` inside `region` as sky or canopy.
///
/// Values are corrected as `v^(1 / gamma)` on the normalized scale before the
/// channel combination. Pixels outside `region` become [`Class::Invalid`]; a
/// region reaching past the image is clipped to it.
pub fn binarize(
    hemisphere: &RasterImage,
    region: &CircleRegion,
    config: &BinarizationConfig,
) -> Result<BinaryImage> {
    classify(hemisphere, region, config, |_, _| true)
}

/// Like [`binarize`], but pixels the mask marks as outside are also invalid
/// and take no part in choosing the threshold.
pub fn binarize_masked(
    hemisphere: &RasterImage,
    region: &CircleRegion,
    mask: &MaskRaster,
    config: &BinarizationConfig,
) -> Result<BinaryImage> {
    if hemisphere.dimensions() != (mask.side(), mask.side()) {
        return Err(Error::IncompatibleMask(format!(
            "mask of side {} cannot cover a {}x{} hemisphere",
            mask.side(),
            hemisphere.width(),
            hemisphere.height()
        )));
    }

    classify(hemisphere, region, config, |x, y| mask.contains(x, y))
}

fn classify(
    hemisphere: &RasterImage,
    region: &CircleRegion,
    config: &BinarizationConfig,
    keep: impl Fn(u32, u32) -> bool,
) -> Result<BinaryImage> {
    let (width, height) = hemisphere.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::InvalidInput("cannot binarize an empty image".into()));
    }

    let exponent = 1.0 / config.gamma;
    let levels: Vec<Option<u8>> = hemisphere
        .enumerate_pixels()
        .map(|(x, y, px)| {
            (region.contains(x, y) && keep(x, y))
                .then(|| intensity(px, config.channel, exponent))
        })
        .collect();

    // Zone of every pixel. All zero unless thresholding zonally.
    let zones = match config.method {
        ThresholdMethod::Zonal { zones } => zones.get(),
        _ => 1,
    };
    let zone_of = |i: usize| -> usize {
        if zones == 1 {
            return 0;
        }
        let (x, y) = (i as u32 % width, i as u32 / width);
        ((region.normalized_radius(x, y) * zones as f64).floor() as usize).min(zones - 1)
    };

    let thresholds = match config.method {
        ThresholdMethod::Manual { value } => Thresholds::Global(value),
        ThresholdMethod::Otsu => {
            Thresholds::Global(otsu_threshold(&histogram(levels.iter().flatten().copied())))
        }
        ThresholdMethod::Zonal { .. } => {
            let mut histograms = vec![[0u64; 256]; zones];
            for (i, level) in levels.iter().enumerate() {
                if let Some(level) = level {
                    histograms[zone_of(i)][*level as usize] += 1;
                }
            }
            Thresholds::Zonal(histograms.iter().map(otsu_threshold).collect())
        }
    };

    let classes: Vec<Class> = levels
        .iter()
        .enumerate()
        .map(|(i, level)| {
            let Some(level) = level else {
                return Class::Invalid;
            };
            let threshold = match &thresholds {
                Thresholds::Global(value) => *value,
                Thresholds::Zonal(values) => values[zone_of(i)],
            };
            match *level >= threshold {
                true => Class::Sky,
                false => Class::Canopy,
            }
        })
        .collect();

    debug!(
        channel = %config.channel,
        gamma = config.gamma,
        thresholds = %thresholds,
        "binarized hemisphere"
    );

    Ok(BinaryImage {
        width,
        height,
        region: *region,
        classes,
        thresholds,
    })
}
