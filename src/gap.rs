use crate::{
    binarize::{BinaryImage, Class},
    error::{Error, Result},
    lens::LensModel,
};
use std::f64::consts::TAU;
use tracing::debug;
use uom::si::{
    angle::{degree, radian},
    f64::Angle,
};

/// Concentric view zenith angle rings, each split into azimuth segments.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RingSegmentGrid {
    start: Angle,
    end: Angle,
    rings: usize,
    segments: usize,
}

impl RingSegmentGrid {
    /// Create a grid of `rings` equal-width rings between `start` and `end`,
    /// each with `segments` equal azimuth segments.
    ///
    /// Requires `0 <= start < end <= 90` degrees and at least one ring and
    /// one segment.
    pub fn new(start: Angle, end: Angle, rings: usize, segments: usize) -> Result<Self> {
        let (lo, hi) = (start.get::<degree>(), end.get::<degree>());
        if !(lo.is_finite() && hi.is_finite()) || lo < 0.0 || hi > 90.0 || lo >= hi {
            return Err(Error::InvalidConfig(format!(
                "view zenith range must satisfy 0 <= start < end <= 90 but got {lo}..{hi}"
            )));
        }
        if rings == 0 || segments == 0 {
            return Err(Error::InvalidConfig(format!(
                "grid needs at least one ring and one segment but got {rings}x{segments}"
            )));
        }

        Ok(Self {
            start,
            end,
            rings,
            segments,
        })
    }

    pub fn from_degrees(start: f64, end: f64, rings: usize, segments: usize) -> Result<Self> {
        Self::new(
            Angle::new::<degree>(start),
            Angle::new::<degree>(end),
            rings,
            segments,
        )
    }

    pub fn start(&self) -> Angle {
        self.start
    }

    pub fn end(&self) -> Angle {
        self.end
    }

    pub fn rings(&self) -> usize {
        self.rings
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    fn ring_width(&self) -> Angle {
        (self.end - self.start) / self.rings as f64
    }

    /// Returns the ring that `zenith` falls in.
    ///
    /// Rings include their lower bound and exclude their upper bound, except
    /// the outermost ring which also includes `end`. Angles outside the grid
    /// return `None`.
    pub fn ring_of(&self, zenith: Angle) -> Option<usize> {
        if zenith < self.start || zenith > self.end {
            return None;
        }
        let offset = (zenith - self.start).get::<radian>();
        let span = (self.end - self.start).get::<radian>();
        let ring = (offset * self.rings as f64 / span).floor() as usize;
        Some(ring.min(self.rings - 1))
    }

    /// Returns the segment holding `azimuth`, measured counter-clockwise from
    /// the top of the hemisphere.
    pub fn segment_of(&self, azimuth: Angle) -> usize {
        let turns = azimuth.get::<radian>().rem_euclid(TAU) / TAU;
        (turns * self.segments as f64).floor() as usize % self.segments
    }

    /// The view zenith angle halfway across `ring`.
    pub fn ring_center(&self, ring: usize) -> Angle {
        self.start + self.ring_width() * (ring as f64 + 0.5)
    }
}

impl Default for RingSegmentGrid {
    fn default() -> Self {
        Self {
            start: Angle::new::<degree>(0.0),
            end: Angle::new::<degree>(70.0),
            rings: 7,
            segments: 8,
        }
    }
}

/// Sky and valid pixel counts of one grid cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellCount {
    pub sky: u64,
    pub valid: u64,
}

impl CellCount {
    /// Fraction of valid pixels that are sky, if there are any.
    pub fn gap_fraction(&self) -> Option<f64> {
        (self.valid > 0).then(|| self.sky as f64 / self.valid as f64)
    }
}

impl std::ops::Add for CellCount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            sky: self.sky + rhs.sky,
            valid: self.valid + rhs.valid,
        }
    }
}

impl std::iter::Sum for CellCount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, cell| acc + cell)
    }
}

/// Per-cell counts of a sampled hemisphere. Cells are stored ring by ring.
#[derive(Clone, Debug, PartialEq)]
pub struct GapFractions {
    grid: RingSegmentGrid,
    cells: Vec<CellCount>,
}

impl GapFractions {
    /// Wrap precomputed counts, ring by ring, for `grid`.
    pub fn from_counts(grid: RingSegmentGrid, cells: Vec<CellCount>) -> Result<Self> {
        let expected = grid.rings * grid.segments;
        if cells.len() != expected || cells.iter().any(|cell| cell.sky > cell.valid) {
            return Err(Error::InvalidInput(format!(
                "expected {expected} cells with no more sky than valid pixels"
            )));
        }

        Ok(Self { grid, cells })
    }

    pub fn grid(&self) -> &RingSegmentGrid {
        &self.grid
    }

    pub fn cell(&self, ring: usize, segment: usize) -> Option<CellCount> {
        if segment >= self.grid.segments {
            return None;
        }
        self.cells.get(ring * self.grid.segments + segment).copied()
    }

    /// The segments of `ring`, in azimuth order.
    pub fn segments(&self, ring: usize) -> &[CellCount] {
        let n = self.grid.segments;
        self.cells.get(ring * n..(ring + 1) * n).unwrap_or(&[])
    }

    /// Counts summed over all segments of `ring`.
    pub fn ring(&self, ring: usize) -> CellCount {
        self.segments(ring).iter().copied().sum()
    }

    /// Counts summed over every cell.
    pub fn total(&self) -> CellCount {
        self.cells.iter().copied().sum()
    }

    /// Sky pixels over valid pixels across the whole grid.
    pub fn gap_fraction(&self) -> Option<f64> {
        self.total().gap_fraction()
    }
}

/// Accumulate the classified pixels of `binary` into the cells of `grid`.
///
/// Each valid pixel's distance from the region centre, as a fraction of the
/// region radius, becomes a view zenith angle through `lens`. Azimuth is
/// measured counter-clockwise from the top of the image. Pixels whose angle
/// falls outside the grid are skipped.
pub fn sample<L: LensModel + ?Sized>(
    binary: &BinaryImage,
    grid: &RingSegmentGrid,
    lens: &L,
) -> GapFractions {
    let region = binary.region();
    let mut cells = vec![CellCount::default(); grid.rings * grid.segments];

    for (x, y, class) in binary.pixels() {
        let sky = match class {
            Class::Invalid => continue,
            Class::Sky => 1,
            Class::Canopy => 0,
        };

        let zenith = lens.zenith_angle(region.normalized_radius(x, y));
        let Some(ring) = grid.ring_of(zenith) else {
            continue;
        };

        let (dx, dy) = region.offset(x, y);
        let azimuth = Angle::new::<radian>((-dx).atan2(-dy));
        let cell = &mut cells[ring * grid.segments + grid.segment_of(azimuth)];
        cell.sky += sky;
        cell.valid += 1;
    }

    let gaps = GapFractions {
        grid: *grid,
        cells,
    };
    debug!(
        rings = grid.rings,
        segments = grid.segments,
        valid = gaps.total().valid,
        gap_fraction = ?gaps.gap_fraction(),
        "sampled gap fractions"
    );
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        binarize::{BinarizationConfig, ChannelMode, CircleRegion, ThresholdMethod, binarize},
        lens::Lens,
    };
    use approx::assert_relative_eq;
    use image::{Rgb, RgbImage};
    use quickcheck::quickcheck;
    use rstest::rstest;

    fn classify(image: &RgbImage) -> BinaryImage {
        let region = CircleRegion::inscribed(image.width()).unwrap();
        let config = BinarizationConfig::new(
            ChannelMode::Red,
            ThresholdMethod::Manual { value: 128 },
            1.0,
        )
        .unwrap();
        binarize(image, &region, &config).unwrap()
    }

    fn deg(value: f64) -> Angle {
        Angle::new::<degree>(value)
    }

    #[rstest]
    #[case(0.0, Some(0))]
    #[case(9.999, Some(0))]
    #[case(10.001, Some(1))]
    #[case(69.99, Some(6))]
    #[case(70.0, Some(6))]
    #[case(70.01, None)]
    fn ring_boundaries(#[case] zenith: f64, #[case] expected: Option<usize>) {
        let grid = RingSegmentGrid::default();
        assert_eq!(grid.ring_of(deg(zenith)), expected);
    }

    #[test]
    fn start_bound_excludes_the_zenith() {
        let grid = RingSegmentGrid::from_degrees(10.0, 60.0, 5, 8).unwrap();
        assert_eq!(grid.ring_of(deg(5.0)), None);
        assert_eq!(grid.ring_of(deg(10.0)), Some(0));
    }

    #[rstest]
    #[case(0.0, 0)]
    #[case(44.9, 0)]
    #[case(45.1, 1)]
    #[case(359.9, 7)]
    #[case(-10.0, 7)]
    #[case(360.1, 0)]
    fn segment_boundaries(#[case] azimuth: f64, #[case] expected: usize) {
        let grid = RingSegmentGrid::default();
        assert_eq!(grid.segment_of(deg(azimuth)), expected);
    }

    #[rstest]
    #[case(0.0, 0.0, 7, 8)]
    #[case(70.0, 10.0, 7, 8)]
    #[case(0.0, 95.0, 7, 8)]
    #[case(-5.0, 70.0, 7, 8)]
    #[case(0.0, 70.0, 0, 8)]
    #[case(0.0, 70.0, 7, 0)]
    fn invalid_grids_are_rejected(
        #[case] start: f64,
        #[case] end: f64,
        #[case] rings: usize,
        #[case] segments: usize,
    ) {
        let result = RingSegmentGrid::from_degrees(start, end, rings, segments);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn ring_centers() {
        let grid = RingSegmentGrid::default();
        assert_relative_eq!(grid.ring_center(0).get::<degree>(), 5.0, epsilon = 1e-9);
        assert_relative_eq!(grid.ring_center(6).get::<degree>(), 65.0, epsilon = 1e-9);
    }

    #[rstest]
    #[case(255, 1.0)]
    #[case(0, 0.0)]
    fn uniform_sky(#[case] level: u8, #[case] expected: f64) {
        let binary = classify(&RgbImage::from_pixel(8, 8, Rgb([level; 3])));
        let grid = RingSegmentGrid::from_degrees(0.0, 90.0, 3, 4).unwrap();
        let gaps = sample(&binary, &grid, &Lens::Equidistant);

        assert_eq!(gaps.total().valid, 52);
        assert_eq!(gaps.gap_fraction(), Some(expected));
    }

    #[test]
    fn azimuth_runs_counter_clockwise_from_the_top() {
        // Sky on the left half only.
        let image = RgbImage::from_fn(8, 8, |x, _| match x < 4 {
            true => Rgb([255; 3]),
            false => Rgb([0; 3]),
        });
        let binary = classify(&image);
        let grid = RingSegmentGrid::from_degrees(0.0, 90.0, 1, 4).unwrap();
        let gaps = sample(&binary, &grid, &Lens::Equidistant);

        // Top-left, bottom-left, bottom-right, top-right.
        let fractions: Vec<_> = gaps
            .segments(0)
            .iter()
            .map(|cell| cell.gap_fraction())
            .collect();
        assert_eq!(fractions, vec![Some(1.0), Some(1.0), Some(0.0), Some(0.0)]);
    }

    #[test]
    fn empty_ring_has_no_gap_fraction() {
        let binary = classify(&RgbImage::from_pixel(2, 2, Rgb([255; 3])));
        // The four pixels of a 2x2 hemisphere sit at 0.71 of the radius.
        let grid = RingSegmentGrid::from_degrees(0.0, 90.0, 2, 1).unwrap();
        let gaps = sample(&binary, &grid, &Lens::Equidistant);

        assert_eq!(gaps.ring(0).gap_fraction(), None);
        assert_eq!(gaps.ring(1), CellCount { sky: 4, valid: 4 });
    }

    quickcheck! {
        fn full_range_counts_every_valid_pixel(
            side_seed: u8,
            rings_seed: u8,
            segments_seed: u8,
            lens_seed: u8
        ) -> bool {
            let side = side_seed as u32 % 24 + 1;
            let rings = rings_seed as usize % 10 + 1;
            let segments = segments_seed as usize % 12 + 1;
            let lens = [
                Lens::Equidistant,
                Lens::Stereographic,
                Lens::Orthographic,
                Lens::Equisolid,
            ][lens_seed as usize % 4];

            let image = RgbImage::from_fn(side, side, |x, y| Rgb([((x * 53 + y * 29) % 256) as u8; 3]));
            let binary = classify(&image);
            let grid = RingSegmentGrid::from_degrees(0.0, 90.0, rings, segments).unwrap();
            let gaps = sample(&binary, &grid, &lens);

            let fraction = gaps.gap_fraction().unwrap_or(0.0);
            gaps.total().valid as usize == binary.valid_count()
                && gaps.total().sky as usize == binary.sky_count()
                && (0.0..=1.0).contains(&fraction)
        }
    }
}
