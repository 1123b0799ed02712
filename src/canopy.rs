use crate::{
    error::{Error, Result},
    gap::{CellCount, GapFractions},
};
use tracing::debug;
use uom::si::angle::{degree, radian};

/// Canopy structure derived from one sampled hemisphere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanopyMetrics {
    /// Sky pixels over valid pixels across the sampled rings.
    pub gap_fraction: f64,

    /// `1 - gap_fraction`.
    pub cover: f64,

    /// Effective plant area index (Le), assuming a random foliage layout.
    pub effective_pai: f64,

    /// Plant area index (L) corrected for clumping by averaging the
    /// logarithm of each segment's gap fraction.
    pub pai: f64,

    /// Clumping index `Le / L`.
    pub clumping: f64,

    /// Diffuse non-interceptance, the fraction of uniform sky light reaching
    /// the camera.
    pub difn: f64,
}

/// `-ln(p)` with zero gap fractions floored to half a pixel of `valid`.
fn log_gap(cell: &CellCount) -> Option<f64> {
    let p = cell.gap_fraction()?;
    let p = match cell.sky {
        0 => 0.5 / cell.valid as f64,
        _ => p,
    };
    Some((1.0 / p).ln())
}

/// Reduce per-cell counts to canopy metrics.
///
/// Only rings with at least one valid pixel contribute. Each ring is
/// represented by its centre angle θ and weighted by `sin θ`, so
///
/// ```text
/// Le   = 2 Σ w_i (-ln P_i) cos θ_i,   w_i = sin θ_i / Σ sin θ_j
/// DIFN = Σ P_i sin θ_i cos θ_i / Σ sin θ_i cos θ_i
/// ```
///
/// and `L` repeats `Le` with `-ln P_i` replaced by the mean of `-ln P_ij`
/// over the ring's segments.
pub fn aggregate(gaps: &GapFractions) -> Result<CanopyMetrics> {
    let grid = gaps.grid();
    let Some(gap_fraction) = gaps.gap_fraction() else {
        return Err(Error::NoValidPixels {
            start_vza: grid.start().get::<degree>(),
            end_vza: grid.end().get::<degree>(),
        });
    };

    let mut weights = 0.0;
    let mut effective = 0.0;
    let mut clumped = 0.0;
    let mut projected = 0.0;
    let mut transmitted = 0.0;

    for ring in 0..grid.rings() {
        let counts = gaps.ring(ring);
        let (Some(p), Some(log_p)) = (counts.gap_fraction(), log_gap(&counts)) else {
            continue;
        };

        let segment_logs: Vec<f64> = gaps.segments(ring).iter().filter_map(log_gap).collect();
        let mean_segment_log = segment_logs.iter().sum::<f64>() / segment_logs.len() as f64;

        let theta = grid.ring_center(ring).get::<radian>();
        let (sin, cos) = theta.sin_cos();
        weights += sin;
        effective += sin * log_p * cos;
        clumped += sin * mean_segment_log * cos;
        projected += sin * cos;
        transmitted += p * sin * cos;
    }

    let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };
    let effective_pai = 2.0 * ratio(effective, weights);
    let pai = 2.0 * ratio(clumped, weights);
    let clumping = if pai > 0.0 { effective_pai / pai } else { 1.0 };

    let metrics = CanopyMetrics {
        gap_fraction,
        cover: 1.0 - gap_fraction,
        effective_pai,
        pai,
        clumping,
        difn: ratio(transmitted, projected),
    };
    debug!(?metrics, "aggregated canopy metrics");
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap::RingSegmentGrid;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn cell(sky: u64, valid: u64) -> CellCount {
        CellCount { sky, valid }
    }

    fn gaps(rings: usize, segments: usize, cells: Vec<CellCount>) -> GapFractions {
        let grid = RingSegmentGrid::from_degrees(0.0, 90.0, rings, segments).unwrap();
        GapFractions::from_counts(grid, cells).unwrap()
    }

    #[test]
    fn open_sky() {
        let metrics = aggregate(&gaps(2, 2, vec![cell(10, 10); 4])).unwrap();

        assert_eq!(metrics.gap_fraction, 1.0);
        assert_eq!(metrics.cover, 0.0);
        assert_eq!(metrics.effective_pai, 0.0);
        assert_eq!(metrics.pai, 0.0);
        assert_eq!(metrics.clumping, 1.0);
        assert_relative_eq!(metrics.difn, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn single_ring_with_clumped_segments() {
        let metrics = aggregate(&gaps(1, 2, vec![cell(50, 100), cell(10, 100)])).unwrap();
        let cos = 45f64.to_radians().cos();

        let le = 2.0 * -(0.3f64.ln()) * cos;
        let l = 2.0 * (-(0.5f64.ln()) - 0.1f64.ln()) / 2.0 * cos;
        assert_relative_eq!(metrics.gap_fraction, 0.3);
        assert_relative_eq!(metrics.cover, 0.7, epsilon = 1e-12);
        assert_relative_eq!(metrics.effective_pai, le, epsilon = 1e-9);
        assert_relative_eq!(metrics.pai, l, epsilon = 1e-9);
        assert_relative_eq!(metrics.clumping, le / l, epsilon = 1e-9);
        assert_relative_eq!(metrics.difn, 0.3, epsilon = 1e-9);
        assert!(metrics.clumping < 1.0);
    }

    #[test]
    fn rings_are_weighted_by_sine_of_centre_angle() {
        let metrics = aggregate(&gaps(2, 1, vec![cell(50, 100), cell(25, 100)])).unwrap();
        let (t1, t2) = (22.5f64.to_radians(), 67.5f64.to_radians());

        let le = 2.0 * (t1.sin() * 2f64.ln() * t1.cos() + t2.sin() * 4f64.ln() * t2.cos())
            / (t1.sin() + t2.sin());
        let difn = (0.5 * t1.sin() * t1.cos() + 0.25 * t2.sin() * t2.cos())
            / (t1.sin() * t1.cos() + t2.sin() * t2.cos());
        assert_relative_eq!(metrics.effective_pai, le, epsilon = 1e-9);
        assert_relative_eq!(metrics.difn, difn, epsilon = 1e-9);
        // One segment per ring leaves nothing to clump.
        assert_relative_eq!(metrics.clumping, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn closed_canopy_is_floored_to_half_a_pixel() {
        let metrics = aggregate(&gaps(1, 1, vec![cell(0, 4)])).unwrap();
        let cos = 45f64.to_radians().cos();

        assert_eq!(metrics.gap_fraction, 0.0);
        assert_eq!(metrics.cover, 1.0);
        assert_eq!(metrics.difn, 0.0);
        assert_relative_eq!(metrics.effective_pai, 2.0 * 8f64.ln() * cos, epsilon = 1e-9);
    }

    #[test]
    fn empty_rings_are_skipped() {
        let with_empty = aggregate(&gaps(2, 1, vec![cell(0, 0), cell(25, 100)])).unwrap();

        let t2 = 67.5f64.to_radians();
        assert_relative_eq!(with_empty.effective_pai, 2.0 * 4f64.ln() * t2.cos(), epsilon = 1e-9);
        assert_relative_eq!(with_empty.difn, 0.25, epsilon = 1e-9);
    }

    #[rstest]
    #[case(1, 1)]
    #[case(7, 8)]
    fn no_valid_pixels_is_an_error(#[case] rings: usize, #[case] segments: usize) {
        let result = aggregate(&gaps(rings, segments, vec![cell(0, 0); rings * segments]));
        assert!(matches!(result, Err(Error::NoValidPixels { .. })));
    }
}
