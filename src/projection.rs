use crate::error::{Error, Result};
use image::{
    Rgb, RgbImage,
    imageops::{self, FilterType},
};
use nalgebra::{Rotation2, Vector2};
use std::f64::consts::TAU;
use tracing::debug;
use uom::si::{
    angle::{degree, radian},
    f64::Angle,
};

/// An RGB raster passed between pipeline stages.
pub type RasterImage = RgbImage;

/// Fill value for pixels that no source pixel maps onto.
pub const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// Orientation applied while projecting a panorama onto the hemisphere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectionParams {
    /// Clockwise rotation of the disc, on the range [0, 360) degrees.
    heading: Angle,
}

impl ProjectionParams {
    /// Creates parameters that rotate the hemisphere clockwise by `heading`.
    ///
    /// The heading is wrapped into [0, 360) degrees so that a full turn is the
    /// same as no turn at all.
    pub fn new(heading: Angle) -> Result<Self> {
        let degrees = heading.get::<degree>();
        if !degrees.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "heading must be finite but got {degrees}"
            )));
        }

        let mut wrapped = degrees.rem_euclid(360.0);
        if wrapped >= 360.0 {
            wrapped = 0.0;
        }

        Ok(Self {
            heading: Angle::new::<degree>(wrapped),
        })
    }

    pub fn from_degrees(degrees: f64) -> Result<Self> {
        Self::new(Angle::new::<degree>(degrees))
    }

    pub fn heading(&self) -> Angle {
        self.heading
    }
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            heading: Angle::new::<degree>(0.0),
        }
    }
}

/// Project an equirectangular panorama onto an upward looking hemisphere.
///
/// The result is a square image with the side length of the panorama width.
/// The zenith lies at the centre and the horizon on the inscribed circle.
/// Azimuth runs counter-clockwise from the top of the image, which is the
/// compass sense of a camera looking straight up.
///
/// ```text
///   panorama                        hemisphere
/// +----------------+              +-----------+
/// | zenith   ...   |  --------->  |   .---.   |
/// | horizon  ...   |              |  ( z   )  |
/// |----------------|              |   '---'   |
/// | (discarded)    |              +-----------+
/// +----------------+
/// ```
pub fn project(pano: &RasterImage, params: &ProjectionParams) -> Result<RasterImage> {
    let (width, height) = pano.dimensions();
    if width == 0 || height < 2 {
        return Err(Error::InvalidInput(format!(
            "panorama of {width}x{height} pixels is too small to project"
        )));
    }

    let strip = upper_half(pano);
    let stretched = stretch(&strip);
    let polar = polar_remap(&stretched);
    let flipped = imageops::flip_vertical(&polar);
    let rotated = rotate(&flipped, params.heading);
    let hemisphere = crop_centered(&rotated, width);

    debug!(
        width,
        height,
        heading = params.heading.get::<degree>(),
        "projected panorama"
    );

    Ok(hemisphere)
}

/// Keep the rows above the horizon.
fn upper_half(pano: &RasterImage) -> RasterImage {
    let (width, height) = pano.dimensions();
    imageops::crop_imm(pano, 0, 0, width, height / 2).to_image()
}

/// Stretch the strip to four times its height so that it spans a full radius.
fn stretch(strip: &RasterImage) -> RasterImage {
    let (width, height) = strip.dimensions();
    imageops::resize(strip, width, height * 4, FilterType::Triangle)
}

/// Wrap strip columns around the disc centre and map strip rows to radius.
///
/// The canvas side equals the smaller strip dimension so that the transformed
/// circle touches all four edges.
fn polar_remap(strip: &RasterImage) -> RasterImage {
    let (width, height) = strip.dimensions();
    let side = width.min(height);
    let radius = side as f64 / 2.0;

    RgbImage::from_fn(side, side, |x, y| {
        let dx = x as f64 + 0.5 - radius;
        let dy = y as f64 + 0.5 - radius;
        let r = dx.hypot(dy);
        if r > radius {
            return BACKGROUND;
        }

        // Measured from the downward direction. The vertical flip that follows
        // moves the first column to the top of the disc.
        let azimuth = (-dx).atan2(dy).rem_euclid(TAU);
        let src_x = azimuth / TAU * width as f64;
        let src_y = r / radius * height as f64;

        bilinear(strip, src_x - 0.5, src_y - 0.5, Edge::Wrap)
    })
}

/// Rotate the disc clockwise about the image centre, growing the canvas to
/// the rotated bounding box.
///
/// Only pixels inside the inscribed disc are sampled, so the rim never blends
/// with the background corners.
fn rotate(image: &RasterImage, heading: Angle) -> RasterImage {
    let theta = heading.get::<radian>();
    if theta == 0.0 {
        return image.clone();
    }

    let (width, height) = image.dimensions();
    let (w, h) = (width as f64, height as f64);
    let (sin, cos) = theta.sin_cos();
    let out_width = bounding_extent(w * cos.abs() + h * sin.abs(), width);
    let out_height = bounding_extent(w * sin.abs() + h * cos.abs(), height);

    // With y pointing down a positive rotation turns +x towards +y, which is
    // clockwise on screen. Sampling needs the inverse.
    let inverse = Rotation2::new(-theta);
    let src_center = Vector2::new(w / 2.0, h / 2.0);
    let dst_center = Vector2::new(out_width as f64 / 2.0, out_height as f64 / 2.0);
    let radius = w.min(h) / 2.0;
    let in_disc = |offset: Vector2<f64>| offset.norm_squared() <= radius * radius;

    RgbImage::from_fn(out_width, out_height, |x, y| {
        let offset = Vector2::new(x as f64 + 0.5, y as f64 + 0.5) - dst_center;
        if !in_disc(offset) {
            return BACKGROUND;
        }

        let src = inverse * offset + src_center;
        bilinear_where(image, src.x - 0.5, src.y - 0.5, Edge::Clamp, |col, row| {
            in_disc(Vector2::new(col as f64 + 0.5, row as f64 + 0.5) - src_center)
        })
    })
}

/// Round a rotated extent up to whole pixels, ignoring floating point dust.
///
/// The result keeps the parity of `original` so that the disc centre stays on
/// the same sub-pixel position and a centred crop undoes the growth exactly.
fn bounding_extent(extent: f64, original: u32) -> u32 {
    let mut pixels = ((extent - 1e-6).ceil().max(1.0) as u32).max(original);
    if (pixels - original) % 2 == 1 {
        pixels += 1;
    }
    pixels
}

/// Cut a `side` x `side` square around the image centre.
///
/// Parts of the square that fall outside `image` are filled with
/// [`BACKGROUND`].
fn crop_centered(image: &RasterImage, side: u32) -> RasterImage {
    let (width, height) = image.dimensions();
    let left = (width as i64 - side as i64).div_euclid(2);
    let top = (height as i64 - side as i64).div_euclid(2);

    RgbImage::from_fn(side, side, |x, y| {
        let (sx, sy) = (x as i64 + left, y as i64 + top);
        if (0..width as i64).contains(&sx) && (0..height as i64).contains(&sy) {
            *image.get_pixel(sx as u32, sy as u32)
        } else {
            BACKGROUND
        }
    })
}

#[derive(Clone, Copy, Debug)]
enum Edge {
    /// Columns wrap around, as azimuth does.
    Wrap,
    Clamp,
}

/// Sample `image` at a fractional pixel position.
///
/// Integer coordinates address pixel centres. Rows are always clamped.
fn bilinear(image: &RasterImage, x: f64, y: f64, edge: Edge) -> Rgb<u8> {
    bilinear_where(image, x, y, edge, |_, _| true)
}

/// Like [`bilinear`], but only neighbours for which `keep` holds contribute.
/// Their weights are renormalized.
fn bilinear_where(
    image: &RasterImage,
    x: f64,
    y: f64,
    edge: Edge,
    keep: impl Fn(u32, u32) -> bool,
) -> Rgb<u8> {
    let (width, height) = image.dimensions();
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);

    let column = |offset: i64| -> u32 {
        let col = x0 as i64 + offset;
        match edge {
            Edge::Wrap => col.rem_euclid(width as i64) as u32,
            Edge::Clamp => col.clamp(0, width as i64 - 1) as u32,
        }
    };
    let row = |offset: i64| -> u32 { (y0 as i64 + offset).clamp(0, height as i64 - 1) as u32 };

    let (c0, c1, r0, r1) = (column(0), column(1), row(0), row(1));
    let neighbours = [
        (c0, r0, (1.0 - fx) * (1.0 - fy)),
        (c1, r0, fx * (1.0 - fy)),
        (c0, r1, (1.0 - fx) * fy),
        (c1, r1, fx * fy),
    ];
    let kept: Vec<_> = neighbours
        .iter()
        .filter(|(col, row, _)| keep(*col, *row))
        .collect();
    let total: f64 = kept.iter().map(|(_, _, weight)| weight).sum();

    if total <= f64::EPSILON {
        // Every kept neighbour has zero weight. Take the first of them, or the
        // nearest neighbour if none was kept.
        let (col, row, _) = match kept.first() {
            Some(neighbour) => **neighbour,
            None => neighbours
                .iter()
                .copied()
                .fold(neighbours[0], |best, n| if n.2 > best.2 { n } else { best }),
        };
        return *image.get_pixel(col, row);
    }

    let mut out = [0u8; 3];
    for (channel, value) in out.iter_mut().enumerate() {
        let sum: f64 = kept
            .iter()
            .map(|(col, row, weight)| image.get_pixel(*col, *row).0[channel] as f64 * weight)
            .sum();
        *value = (sum / total).round().clamp(0.0, 255.0) as u8;
    }

    Rgb(out)
}
