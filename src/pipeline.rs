use crate::{
    binarize::{BinarizationConfig, BinaryImage, CircleRegion, binarize_masked},
    canopy::{CanopyMetrics, aggregate},
    error::Result,
    gap::{GapFractions, RingSegmentGrid, sample},
    lens::Lens,
    mask::{MaskCache, composite},
    projection::{ProjectionParams, RasterImage, project},
};
use tracing::debug;

/// Everything produced for one panorama.
#[derive(Clone, Debug)]
pub struct HemiOutput {
    /// The masked hemispherical image.
    pub hemisphere: RasterImage,
    pub binary: BinaryImage,
    pub gaps: GapFractions,
    pub metrics: CanopyMetrics,
}

/// Per-image processing shared by every panorama of a run.
///
/// Holds no state between images, so one instance may be used from several
/// threads at once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pipeline {
    binarization: BinarizationConfig,
    grid: RingSegmentGrid,
    lens: Lens,
}

impl Pipeline {
    pub fn new(binarization: BinarizationConfig, grid: RingSegmentGrid, lens: Lens) -> Self {
        Self {
            binarization,
            grid,
            lens,
        }
    }

    pub fn binarization(&self) -> &BinarizationConfig {
        &self.binarization
    }

    pub fn grid(&self) -> &RingSegmentGrid {
        &self.grid
    }

    pub fn lens(&self) -> Lens {
        self.lens
    }

    /// Turn an equirectangular panorama into a masked hemisphere, classify
    /// it and reduce it to canopy metrics.
    ///
    /// The horizon of the hemisphere is the inscribed circle, whatever the
    /// mask, so view zenith angles do not depend on the mask shape.
    pub fn process(
        &self,
        pano: &RasterImage,
        projection: &ProjectionParams,
        masks: &MaskCache,
    ) -> Result<HemiOutput> {
        let projected = project(pano, projection)?;
        let side = projected.width();
        let mask = masks.raster(side);
        let hemisphere = composite(&projected, &mask)?;

        let region = CircleRegion::inscribed(side)?;
        let binary = binarize_masked(&hemisphere, &region, &mask, &self.binarization)?;
        let gaps = sample(&binary, &self.grid, &self.lens);
        let metrics = aggregate(&gaps)?;

        debug!(side, gap_fraction = metrics.gap_fraction, "processed panorama");
        Ok(HemiOutput {
            hemisphere,
            binary,
            gaps,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        binarize::{ChannelMode, Class, ThresholdMethod},
        error::Error,
        mask::Mask,
    };
    use image::{Rgb, RgbImage};
    use rstest::rstest;

    fn full_range() -> Pipeline {
        Pipeline::new(
            BinarizationConfig::default(),
            RingSegmentGrid::from_degrees(0.0, 90.0, 3, 4).unwrap(),
            Lens::Equidistant,
        )
    }

    #[rstest]
    #[case(Rgb([255, 255, 255]), 1.0)]
    #[case(Rgb([0, 0, 0]), 0.0)]
    fn uniform_panorama(#[case] colour: Rgb<u8>, #[case] expected: f64) {
        let pano = RgbImage::from_pixel(8, 4, colour);
        let masks = MaskCache::new(Mask::default());
        let output = full_range()
            .process(&pano, &ProjectionParams::default(), &masks)
            .unwrap();

        assert_eq!(output.hemisphere.dimensions(), (8, 8));
        assert_eq!(output.binary.valid_count(), 52);
        assert_eq!(output.metrics.gap_fraction, expected);
    }

    #[test]
    fn blue_sky_over_green_canopy() {
        // Sky near the zenith, foliage towards the horizon.
        let pano = RgbImage::from_fn(64, 32, |_, y| match y < 8 {
            true => Rgb([90, 150, 240]),
            false => Rgb([40, 110, 30]),
        });
        let pipeline = Pipeline::new(
            BinarizationConfig::new(ChannelMode::TwoBlueMinusGreen, ThresholdMethod::Otsu, 2.2)
                .unwrap(),
            RingSegmentGrid::from_degrees(0.0, 90.0, 4, 8).unwrap(),
            Lens::Equidistant,
        );
        let output = pipeline
            .process(&pano, &ProjectionParams::default(), &MaskCache::new(Mask::default()))
            .unwrap();

        assert_eq!(output.binary.class(32, 32), Some(Class::Sky));
        assert_eq!(output.binary.class(32, 62), Some(Class::Canopy));
        assert!(output.metrics.gap_fraction > 0.0 && output.metrics.gap_fraction < 1.0);
        assert!(output.metrics.effective_pai > 0.0);
    }

    #[test]
    fn empty_zenith_range_is_reported() {
        // A 2x2 hemisphere only has pixels around 64 degrees.
        let pano = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let pipeline = Pipeline::new(
            BinarizationConfig::default(),
            RingSegmentGrid::from_degrees(0.0, 30.0, 1, 1).unwrap(),
            Lens::Equidistant,
        );
        let result = pipeline.process(
            &pano,
            &ProjectionParams::default(),
            &MaskCache::new(Mask::default()),
        );

        assert!(matches!(result, Err(Error::NoValidPixels { .. })));
    }
}
