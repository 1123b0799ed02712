use crate::{
    config::Config,
    error::{Error, Result},
    mask::{Mask, MaskCache},
    metadata::{Metadata, MetadataSource},
    pipeline::Pipeline,
    projection::ProjectionParams,
    report::{ReportRow, save_report},
};
use rayon::prelude::*;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Extensions of the panoramas picked up from an input directory.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "tif", "tiff"];

/// Returns the image files directly inside `dir`, sorted by path.
pub fn list_images<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if is_image && path.is_file() {
            images.push(path);
        }
    }

    images.sort();
    Ok(images)
}

/// An image that was skipped.
#[derive(Debug)]
pub struct Failure {
    pub path: PathBuf,
    pub error: Error,
}

/// Outcome of a completed run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Report rows in input order.
    pub rows: Vec<ReportRow>,
    pub failures: Vec<Failure>,
}

/// Runs the pipeline over many panoramas and keeps the report on disk up to
/// date.
pub struct Batch {
    pipeline: Pipeline,
    projection: ProjectionParams,
    heading_attribute: Option<String>,
    masks: MaskCache,
    metadata: Box<dyn MetadataSource>,
    export_binary: bool,
    parallel: bool,
    masked_dir: PathBuf,
    binary_dir: PathBuf,
    report_path: PathBuf,
}

impl Batch {
    /// Validate `config` and resolve its output paths against `output`.
    pub fn new(
        config: &Config,
        output: &Path,
        mask: Mask,
        metadata: Box<dyn MetadataSource>,
    ) -> Result<Self> {
        Ok(Self {
            pipeline: config.pipeline()?,
            projection: config.projection()?,
            heading_attribute: config.heading_attribute.clone(),
            masks: MaskCache::new(mask),
            metadata,
            export_binary: config.export_binary,
            parallel: config.parallel,
            masked_dir: output.join(&config.masked_dir),
            binary_dir: output.join(&config.binary_dir),
            report_path: output.join(&config.report_file),
        })
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn masked_dir(&self) -> &Path {
        &self.masked_dir
    }

    pub fn binary_dir(&self) -> &Path {
        &self.binary_dir
    }

    /// Process `images` in order.
    ///
    /// Images that cannot be decoded, yield no valid pixels or share a file
    /// stem with an earlier image are recorded in the summary and skipped. Failing to create an output directory or to
    /// write an output stops the run.
    pub fn run(&self, images: &[PathBuf]) -> Result<BatchSummary> {
        let mut dirs = vec![self.masked_dir.as_path()];
        if self.export_binary {
            dirs.push(&self.binary_dir);
        }
        if let Some(parent) = self.report_path.parent() {
            dirs.push(parent);
        }
        for dir in dirs {
            fs::create_dir_all(dir).map_err(|source| Error::OutputDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let chunk_size = match self.parallel {
            true => rayon::current_num_threads().max(1),
            false => 1,
        };
        info!(images = images.len(), parallel = self.parallel, "starting batch");

        let clashes = stem_clashes(images);
        let process = |path: &PathBuf| match clashes.get(path) {
            Some(earlier) => Err(Error::OutputClash {
                path: path.clone(),
                earlier: earlier.clone(),
            }),
            None => self.process(path),
        };

        let mut summary = BatchSummary::default();
        for chunk in images.chunks(chunk_size) {
            let outcomes: Vec<Result<ReportRow>> = match self.parallel {
                true => chunk.par_iter().map(process).collect(),
                false => chunk.iter().map(process).collect(),
            };

            for (path, outcome) in chunk.iter().zip(outcomes) {
                match outcome {
                    Ok(row) => summary.rows.push(row),
                    Err(error) if !error.is_fatal() => {
                        warn!(path = %path.display(), %error, "skipping image");
                        summary.failures.push(Failure {
                            path: path.clone(),
                            error,
                        });
                    }
                    Err(error) => return Err(error),
                }
            }
            save_report(&self.report_path, &summary.rows)?;
        }

        if images.is_empty() {
            save_report(&self.report_path, &summary.rows)?;
        }

        info!(
            processed = summary.rows.len(),
            failed = summary.failures.len(),
            report = %self.report_path.display(),
            "batch complete"
        );
        Ok(summary)
    }

    /// Run one image through the pipeline and write its outputs.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    fn process(&self, path: &Path) -> Result<ReportRow> {
        let pano = image::open(path)
            .map_err(|source| Error::Decode {
                path: path.to_path_buf(),
                source,
            })?
            .into_rgb8();
        let metadata = self.metadata.attributes(path, &pano);
        let projection = self.projection_for(path, &metadata)?;
        let output = self.pipeline.process(&pano, &projection, &self.masks)?;

        let stem = output_stem(path);
        let hemi_file = format!("{stem}_hemi.png");
        let hemi_path = self.masked_dir.join(&hemi_file);
        output
            .hemisphere
            .save(&hemi_path)
            .map_err(|source| Error::WriteImage {
                path: hemi_path,
                source,
            })?;

        if self.export_binary {
            let binary_path = self.binary_dir.join(format!("{stem}_binary.png"));
            output
                .binary
                .to_luma()
                .save(&binary_path)
                .map_err(|source| Error::WriteImage {
                    path: binary_path,
                    source,
                })?;
        }

        info!(
            path = %path.display(),
            gap_fraction = output.metrics.gap_fraction,
            threshold = %output.binary.thresholds(),
            "processed image"
        );
        Ok(ReportRow {
            metadata,
            hemi_file,
            metrics: output.metrics,
            thresholds: output.binary.thresholds().clone(),
        })
    }

    /// The projection for one image, preferring a heading from its metadata.
    fn projection_for(&self, path: &Path, metadata: &Metadata) -> Result<ProjectionParams> {
        let Some(attribute) = &self.heading_attribute else {
            return Ok(self.projection);
        };

        match metadata.number(attribute).filter(|heading| heading.is_finite()) {
            Some(heading) => {
                debug!(path = %path.display(), heading, "heading from metadata");
                ProjectionParams::from_degrees(heading)
            }
            None => {
                warn!(
                    path = %path.display(),
                    attribute = attribute.as_str(),
                    "no usable heading in metadata, using the configured heading"
                );
                Ok(self.projection)
            }
        }
    }
}

/// The stem shared by every output of `path`.
fn output_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Maps each image whose outputs would overwrite those of an earlier image,
/// such as `a.png` after `a.jpg`, to that earlier image.
fn stem_clashes(images: &[PathBuf]) -> HashMap<PathBuf, PathBuf> {
    let mut first_by_stem: HashMap<String, &PathBuf> = HashMap::new();
    let mut clashes = HashMap::new();
    for path in images {
        match first_by_stem.get(&output_stem(path)) {
            Some(&earlier) => {
                clashes.insert(path.clone(), earlier.clone());
            }
            None => {
                first_by_stem.insert(output_stem(path), path);
            }
        }
    }
    clashes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::RasterMetadata;
    use rstest::rstest;
    use uom::si::angle::degree;

    #[test]
    fn images_are_filtered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.TIF", "a.JPG", "b.png", "notes.txt", "d"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("e.jpg")).unwrap();

        let names: Vec<_> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.png", "c.TIF"]);
    }

    #[test]
    fn later_images_with_the_same_stem_clash() {
        let images: Vec<PathBuf> = ["in/a.jpg", "in/a.png", "in/b.jpg", "in/a.tif"]
            .iter()
            .map(PathBuf::from)
            .collect();

        let clashes = stem_clashes(&images);
        assert_eq!(clashes.len(), 2);
        assert_eq!(clashes[Path::new("in/a.png")], PathBuf::from("in/a.jpg"));
        assert_eq!(clashes[Path::new("in/a.tif")], PathBuf::from("in/a.jpg"));
        assert!(!clashes.contains_key(Path::new("in/b.jpg")));
    }

    #[test]
    fn missing_input_directory_is_an_error() {
        assert!(list_images("does/not/exist").is_err());
    }

    #[rstest]
    #[case(Some("90"), 90.0)]
    #[case(Some("-90"), 270.0)]
    #[case(Some("north"), 10.0)]
    #[case(None, 10.0)]
    fn heading_comes_from_metadata_when_present(
        #[case] value: Option<&str>,
        #[case] expected: f64,
    ) {
        let config = Config {
            heading: 10.0,
            heading_attribute: Some("GPSImgDirection".into()),
            ..Config::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let batch = Batch::new(&config, dir.path(), Mask::default(), Box::new(RasterMetadata))
            .unwrap();

        let mut metadata = Metadata::default();
        if let Some(value) = value {
            metadata.insert("GPSImgDirection", value);
        }
        let projection = batch
            .projection_for(Path::new("pano.jpg"), &metadata)
            .unwrap();
        approx::assert_relative_eq!(
            projection.heading().get::<degree>(),
            expected,
            epsilon = 1e-9
        );
    }

    #[test]
    fn invalid_config_is_rejected_before_any_image() {
        let config = Config {
            gamma: -1.0,
            ..Config::default()
        };
        let result = Batch::new(&config, Path::new("out"), Mask::default(), Box::new(RasterMetadata));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
