use hemicanopy::{binarize::Thresholds, prelude::*};
use image::{Rgb, RgbImage};
use rstest::rstest;
use std::io::Write;

fn uniform(width: u32, height: u32, level: u8) -> RasterImage {
    RgbImage::from_pixel(width, height, Rgb([level; 3]))
}

fn full_range(rings: usize, segments: usize) -> Pipeline {
    Pipeline::new(
        BinarizationConfig::default(),
        RingSegmentGrid::from_degrees(0.0, 90.0, rings, segments).unwrap(),
        Lens::Equidistant,
    )
}

#[rstest]
#[case(255, 1.0)]
#[case(0, 0.0)]
fn uniform_panorama_gap_fraction(#[case] level: u8, #[case] expected: f64) {
    let masks = MaskCache::new(Mask::default());
    let output = full_range(3, 4)
        .process(&uniform(8, 4, level), &ProjectionParams::default(), &masks)
        .unwrap();

    assert_eq!(output.hemisphere.dimensions(), (8, 8));
    assert_eq!(output.metrics.gap_fraction, expected);
    assert_eq!(output.metrics.cover, 1.0 - expected);
    assert_eq!(output.binary.thresholds(), &Thresholds::Global(128));
}

#[test]
fn full_turn_heading_matches_no_heading() {
    let pano = RgbImage::from_fn(32, 16, |x, y| Rgb([(x * 8) as u8, (y * 16) as u8, 200]));
    let masks = MaskCache::new(Mask::default());
    let pipeline = full_range(4, 8);

    let north = pipeline
        .process(&pano, &ProjectionParams::from_degrees(0.0).unwrap(), &masks)
        .unwrap();
    let full_turn = pipeline
        .process(&pano, &ProjectionParams::from_degrees(360.0).unwrap(), &masks)
        .unwrap();

    assert_eq!(north.hemisphere, full_turn.hemisphere);
    assert_eq!(north.gaps, full_turn.gaps);
}

#[test]
fn sampled_counts_cover_every_valid_pixel() {
    let pano = RgbImage::from_fn(40, 20, |x, y| match (x / 5 + y / 3) % 2 {
        0 => Rgb([120, 170, 250]),
        _ => Rgb([30, 90, 20]),
    });
    let masks = MaskCache::new(Mask::default());
    let output = full_range(5, 6)
        .process(&pano, &ProjectionParams::default(), &masks)
        .unwrap();

    assert_eq!(output.gaps.total().valid as usize, output.binary.valid_count());
    assert!((0.0..=1.0).contains(&output.metrics.gap_fraction));
}

#[test]
fn json_mask_limits_valid_pixels() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, r#"{{"cx": 0.5, "cy": 0.5, "radius": 0.25}}"#).unwrap();
    let masks = MaskCache::new(Mask::open(file.path()).unwrap());

    let output = full_range(2, 4)
        .process(&uniform(8, 4, 255), &ProjectionParams::default(), &masks)
        .unwrap();

    // Outside the mask the hemisphere is black but not counted as canopy.
    assert_eq!(output.binary.valid_count(), 12);
    assert_eq!(output.hemisphere.get_pixel(0, 4), &Rgb([0, 0, 0]));
    assert_eq!(output.metrics.gap_fraction, 1.0);
}

#[rstest]
#[case(Lens::Equidistant)]
#[case(Lens::Stereographic)]
#[case(Lens::Orthographic)]
#[case(Lens::Equisolid)]
fn every_lens_samples_the_whole_disc(#[case] lens: Lens) {
    let pipeline = Pipeline::new(
        BinarizationConfig::default(),
        RingSegmentGrid::from_degrees(0.0, 90.0, 9, 8).unwrap(),
        lens,
    );
    let output = pipeline
        .process(
            &uniform(64, 32, 255),
            &ProjectionParams::default(),
            &MaskCache::new(Mask::default()),
        )
        .unwrap();

    assert_eq!(output.gaps.total().valid as usize, output.binary.valid_count());
}

#[rstest]
#[case(30.0)]
#[case(45.0)]
#[case(137.5)]
fn oblique_heading_keeps_the_rim_clean(#[case] heading: f64) {
    let pipeline = Pipeline::new(
        BinarizationConfig::default(),
        RingSegmentGrid::from_degrees(0.0, 90.0, 9, 8).unwrap(),
        Lens::Equidistant,
    );
    let output = pipeline
        .process(
            &uniform(64, 32, 255),
            &ProjectionParams::from_degrees(heading).unwrap(),
            &MaskCache::new(Mask::default()),
        )
        .unwrap();

    let blended = output
        .binary
        .pixels()
        .filter(|(_, _, class)| *class != Class::Invalid)
        .filter(|(x, y, _)| output.hemisphere.get_pixel(*x, *y) != &Rgb([255; 3]))
        .count();
    assert_eq!(blended, 0);
    assert_eq!(output.binary.thresholds(), &Thresholds::Global(128));
    assert_eq!(output.metrics.gap_fraction, 1.0);
}
