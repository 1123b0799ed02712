use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("mask asset not found: {0}")]
    MaskNotFound(PathBuf),

    #[error("incompatible mask: {0}")]
    IncompatibleMask(String),

    #[error("no valid pixels between {start_vza} and {end_vza} degrees")]
    NoValidPixels { start_vza: f64, end_vza: f64 },

    #[error("{path} would overwrite the outputs of {earlier}")]
    OutputClash { path: PathBuf, earlier: PathBuf },

    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write image {path}: {source}")]
    WriteImage {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Returns `true` if the error must stop a batch run.
    ///
    /// Per-image problems (unreadable input, degenerate hemisphere) only skip
    /// the image that caused them.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Decode { .. }
                | Error::InvalidInput(_)
                | Error::IncompatibleMask(_)
                | Error::NoValidPixels { .. }
                | Error::OutputClash { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Error::InvalidInput("height is zero".into()), false)]
    #[case(Error::NoValidPixels { start_vza: 0.0, end_vza: 70.0 }, false)]
    #[case(Error::OutputClash { path: "a.png".into(), earlier: "a.jpg".into() }, false)]
    #[case(Error::InvalidConfig("gamma".into()), true)]
    #[case(Error::MaskNotFound(PathBuf::from("mask.json")), true)]
    fn fatal_classification(#[case] err: Error, #[case] fatal: bool) {
        assert_eq!(err.is_fatal(), fatal);
    }
}
