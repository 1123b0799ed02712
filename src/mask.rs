use crate::{
    error::{Error, Result},
    projection::{BACKGROUND, RasterImage},
};
use image::{
    GrayImage, RgbImage,
    imageops::{self, FilterType},
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;

/// A circle expressed in fractions of the hemisphere side.
///
/// Being resolution independent, one definition serves every panorama size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircularMask {
    cx: f64,
    cy: f64,
    radius: f64,
}

impl CircularMask {
    pub fn new(cx: f64, cy: f64, radius: f64) -> Result<Self> {
        if !(cx.is_finite() && cy.is_finite() && radius.is_finite()) || radius <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "mask circle needs a finite centre and a positive radius but got ({cx}, {cy}, {radius})"
            )));
        }

        Ok(Self { cx, cy, radius })
    }

    /// The circle inscribed in the hemisphere square.
    pub fn inscribed() -> Self {
        Self {
            cx: 0.5,
            cy: 0.5,
            radius: 0.5,
        }
    }

    /// Returns `true` if the centre of pixel (`x`, `y`) lies inside the circle
    /// scaled to `side`.
    fn contains(&self, side: u32, x: u32, y: u32) -> bool {
        let side = side as f64;
        let dx = x as f64 + 0.5 - self.cx * side;
        let dy = y as f64 + 0.5 - self.cy * side;
        let r = self.radius * side;
        dx * dx + dy * dy <= r * r
    }
}

/// Defines which part of the hemisphere holds valid sky.
#[derive(Clone, Debug, PartialEq)]
pub enum Mask {
    Circle(CircularMask),

    /// A grayscale image where bright pixels mark the inside.
    Raster(GrayImage),
}

impl Mask {
    /// Open a mask asset.
    ///
    /// A `.json` file holds a [`CircularMask`]. Anything else is decoded as a
    /// raster image, so vector masks must be rasterized beforehand.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::MaskNotFound(path.to_path_buf()));
        }

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let mask = if is_json {
            let circle: CircularMask = serde_json::from_str(&fs::read_to_string(path)?)?;
            Mask::Circle(CircularMask::new(circle.cx, circle.cy, circle.radius)?)
        } else {
            let image = image::open(path).map_err(|err| {
                Error::InvalidConfig(format!("unreadable mask {}: {err}", path.display()))
            })?;
            Mask::Raster(image.into_luma8())
        };

        debug!(path = %path.display(), "opened mask");
        Ok(mask)
    }

    /// Rasterize the mask onto a `side` x `side` grid.
    pub fn rasterize(&self, side: u32) -> MaskRaster {
        let inside = match self {
            Mask::Circle(circle) => (0..side)
                .flat_map(|y| (0..side).map(move |x| (x, y)))
                .map(|(x, y)| circle.contains(side, x, y))
                .collect(),
            Mask::Raster(image) => imageops::resize(image, side, side, FilterType::Nearest)
                .pixels()
                .map(|px| px.0[0] > 127)
                .collect(),
        };

        MaskRaster { side, inside }
    }
}

impl Default for Mask {
    fn default() -> Self {
        Mask::Circle(CircularMask::inscribed())
    }
}

/// A mask resolved to pixels. Stored row by row.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskRaster {
    side: u32,
    inside: Vec<bool>,
}

impl MaskRaster {
    pub fn side(&self) -> u32 {
        self.side
    }

    /// Returns `true` if pixel (`x`, `y`) is part of the hemisphere.
    ///
    /// Pixels off the grid are outside.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.side && y < self.side && self.inside[(y * self.side + x) as usize]
    }

    pub fn inside_count(&self) -> usize {
        self.inside.iter().filter(|&&inside| inside).count()
    }
}

/// Black out every hemisphere pixel that the mask marks as outside.
///
/// Inside pixels are copied unchanged.
pub fn composite(hemisphere: &RasterImage, mask: &MaskRaster) -> Result<RasterImage> {
    let (width, height) = hemisphere.dimensions();
    if width != height || width != mask.side() {
        return Err(Error::IncompatibleMask(format!(
            "mask of side {} cannot cover a {width}x{height} hemisphere",
            mask.side()
        )));
    }

    Ok(RgbImage::from_fn(width, height, |x, y| {
        if mask.contains(x, y) {
            *hemisphere.get_pixel(x, y)
        } else {
            BACKGROUND
        }
    }))
}

/// Holds a mask together with its most recent rasterization.
///
/// Panoramas from one device share a width, so the raster is only rebuilt
/// when the hemisphere side changes.
pub struct MaskCache {
    mask: Mask,
    raster: Mutex<Option<Arc<MaskRaster>>>,
}

impl MaskCache {
    pub fn new(mask: Mask) -> Self {
        Self {
            mask,
            raster: Mutex::new(None),
        }
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Returns the mask rasterized to `side`.
    pub fn raster(&self, side: u32) -> Arc<MaskRaster> {
        let mut cached = self.raster.lock().unwrap_or_else(PoisonError::into_inner);
        match cached.as_ref() {
            Some(raster) if raster.side() == side => Arc::clone(raster),
            _ => {
                debug!(side, "rasterizing mask");
                let raster = Arc::new(self.mask.rasterize(side));
                *cached = Some(Arc::clone(&raster));
                raster
            }
        }
    }
}
