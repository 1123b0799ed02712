use crate::{error::Result, projection::RasterImage};
use std::{collections::HashMap, io::Read, path::Path};
use tracing::{debug, warn};

/// Attribute name of the file name column.
pub const SOURCE_FILE: &str = "SourceFile";
pub const IMAGE_WIDTH: &str = "ImageWidth";
pub const IMAGE_HEIGHT: &str = "ImageHeight";

/// Named attributes of one image, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    fields: Vec<(String, String)>,
}

impl Metadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set `key` to `value`, keeping the position of an existing entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse `key` as a number.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key)?.trim().parse().ok()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::default();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

/// Supplies the attributes reported for each image.
pub trait MetadataSource: Sync {
    /// Returns the attributes of the image at `path`, which decoded to `image`.
    fn attributes(&self, path: &Path, image: &RasterImage) -> Metadata;
}

/// Attributes read off the decoded raster itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct RasterMetadata;

impl MetadataSource for RasterMetadata {
    fn attributes(&self, path: &Path, image: &RasterImage) -> Metadata {
        let (width, height) = image.dimensions();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Metadata::from_iter([
            (SOURCE_FILE, name),
            (IMAGE_WIDTH, width.to_string()),
            (IMAGE_HEIGHT, height.to_string()),
            (
                "Megapixels",
                format!("{:.2}", width as f64 * height as f64 / 1e6),
            ),
        ])
    }
}

/// Attributes from a CSV sidecar such as the output of `exiftool -csv`.
///
/// Rows are matched to images by the file name in their `SourceFile` column.
/// Dimensions of the decoded image replace the sidecar's.
#[derive(Clone, Debug, Default)]
pub struct CsvMetadata {
    rows: HashMap<String, Metadata>,
}

impl CsvMetadata {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path.as_ref())?;
        Self::from_csv(reader)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Self::from_csv(csv::ReaderBuilder::new().flexible(true).from_reader(reader))
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let headers = reader.headers()?.clone();
        let mut rows = HashMap::new();

        for record in reader.records() {
            let record = record?;
            let metadata: Metadata = headers.iter().zip(record.iter()).collect();
            let Some(name) = metadata.get(SOURCE_FILE).and_then(file_name) else {
                warn!(?record, "skipping sidecar row without a source file");
                continue;
            };
            rows.insert(name, metadata);
        }

        debug!(rows = rows.len(), "loaded metadata sidecar");
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn file_name(path: &str) -> Option<String> {
    // Sidecars written on Windows use backslashes.
    let last = path.rsplit(['/', '\\']).next()?;
    (!last.is_empty()).then(|| last.to_string())
}

impl MetadataSource for CsvMetadata {
    fn attributes(&self, path: &Path, image: &RasterImage) -> Metadata {
        let decoded = RasterMetadata.attributes(path, image);
        let Some(mut metadata) = decoded
            .get(SOURCE_FILE)
            .and_then(|name| self.rows.get(name))
            .cloned()
        else {
            debug!(path = %path.display(), "no sidecar row");
            return decoded;
        };

        for (key, value) in decoded.iter() {
            if let Some(listed) = metadata.get(key)
                && listed != value
                && (key == IMAGE_WIDTH || key == IMAGE_HEIGHT)
            {
                warn!(
                    path = %path.display(),
                    key,
                    sidecar = listed,
                    decoded = value,
                    "sidecar disagrees with decoded image, using decoded value"
                );
            }
            metadata.insert(key, value);
        }
        metadata
    }
}
