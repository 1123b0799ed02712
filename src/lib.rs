//! Hemispherical Canopy Photography from Smartphone Panoramas
//!
//! An equirectangular panorama is projected onto a hemispherical image,
//! masked, split into sky and canopy, and sampled in view zenith rings to
//! estimate gap fractions and canopy structure.

#[allow(missing_docs)]
pub mod error;

pub mod batch;
pub mod binarize;
pub mod canopy;
pub mod config;
pub mod gap;
pub mod lens;
pub mod logger;
pub mod mask;
pub mod metadata;
pub mod pipeline;
pub mod projection;
pub mod report;

pub mod prelude {
    pub use crate::{
        batch::{Batch, BatchSummary, list_images},
        binarize::{BinarizationConfig, BinaryImage, ChannelMode, Class, ThresholdMethod},
        canopy::CanopyMetrics,
        config::Config,
        error::{Error, Result},
        gap::{GapFractions, RingSegmentGrid},
        lens::{Lens, LensModel},
        mask::{Mask, MaskCache},
        metadata::{CsvMetadata, MetadataSource, RasterMetadata},
        pipeline::{HemiOutput, Pipeline},
        projection::{ProjectionParams, RasterImage},
    };
}
