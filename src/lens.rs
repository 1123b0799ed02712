use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::{
    f64::consts::{FRAC_PI_2, FRAC_PI_4},
    fmt,
    str::FromStr,
};
use uom::si::{angle::radian, f64::Angle};

/// Maps a position on the image circle to a view zenith angle.
///
/// Every model is normalized so that the rim of the image circle is the
/// horizon, a view zenith angle of 90 degrees.
pub trait LensModel {
    /// Returns the view zenith angle at `radius`, the distance from the
    /// image circle centre as a fraction of its radius.
    ///
    /// `radius` is clamped to [0, 1].
    fn zenith_angle(&self, radius: f64) -> Angle;
}

/// Zenith angle grows linearly with radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Equidistant;

impl LensModel for Equidistant {
    fn zenith_angle(&self, radius: f64) -> Angle {
        Angle::new::<radian>(radius.clamp(0.0, 1.0) * FRAC_PI_2)
    }
}

/// `r = tan(θ / 2) / tan(45°)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stereographic;

impl LensModel for Stereographic {
    fn zenith_angle(&self, radius: f64) -> Angle {
        Angle::new::<radian>(2.0 * radius.clamp(0.0, 1.0).atan())
    }
}

/// `r = sin(θ)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Orthographic;

impl LensModel for Orthographic {
    fn zenith_angle(&self, radius: f64) -> Angle {
        Angle::new::<radian>(radius.clamp(0.0, 1.0).asin())
    }
}

/// `r = sin(θ / 2) / sin(45°)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Equisolid;

impl LensModel for Equisolid {
    fn zenith_angle(&self, radius: f64) -> Angle {
        Angle::new::<radian>(2.0 * (radius.clamp(0.0, 1.0) * FRAC_PI_4.sin()).asin())
    }
}

/// Selects one of the built-in lens models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lens {
    /// Panorama projections are equidistant by construction.
    #[default]
    Equidistant,
    Stereographic,
    Orthographic,
    Equisolid,
}

impl Lens {
    /// Returns the model that implements this lens.
    pub fn model(self) -> &'static dyn LensModel {
        match self {
            Lens::Equidistant => &Equidistant,
            Lens::Stereographic => &Stereographic,
            Lens::Orthographic => &Orthographic,
            Lens::Equisolid => &Equisolid,
        }
    }
}

impl LensModel for Lens {
    fn zenith_angle(&self, radius: f64) -> Angle {
        self.model().zenith_angle(radius)
    }
}

impl FromStr for Lens {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "equidistant" => Ok(Lens::Equidistant),
            "stereographic" => Ok(Lens::Stereographic),
            "orthographic" => Ok(Lens::Orthographic),
            "equisolid" => Ok(Lens::Equisolid),
            other => Err(Error::InvalidConfig(format!("unknown lens: {other}"))),
        }
    }
}

impl fmt::Display for Lens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lens::Equidistant => "equidistant",
            Lens::Stereographic => "stereographic",
            Lens::Orthographic => "orthographic",
            Lens::Equisolid => "equisolid",
        };
        write!(f, "{name}")
    }
}
