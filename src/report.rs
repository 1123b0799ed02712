use crate::{
    binarize::Thresholds, canopy::CanopyMetrics, error::Result, metadata::Metadata,
};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

/// Columns that follow the metadata columns, in order.
pub const RESULT_COLUMNS: [&str; 8] = [
    "HemiFile",
    "GF",
    "Cover",
    "Le",
    "L",
    "LX",
    "DIFN",
    "Threshold",
];

/// One line of the canopy report.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportRow {
    pub metadata: Metadata,
    /// File name of the masked hemisphere.
    pub hemi_file: String,
    pub metrics: CanopyMetrics,
    pub thresholds: Thresholds,
}

impl ReportRow {
    fn results(&self) -> [String; 8] {
        let m = &self.metrics;
        [
            self.hemi_file.clone(),
            format!("{:.4}", m.gap_fraction),
            format!("{:.4}", m.cover),
            format!("{:.4}", m.effective_pai),
            format!("{:.4}", m.pai),
            format!("{:.4}", m.clumping),
            format!("{:.4}", m.difn),
            self.thresholds.to_string(),
        ]
    }
}

/// Write `rows` as CSV.
///
/// The header holds every metadata attribute seen in any row, in the order
/// first seen, followed by [`RESULT_COLUMNS`]. Missing attributes are left
/// empty.
pub fn write_report<W: Write>(writer: W, rows: &[ReportRow]) -> Result<()> {
    let mut columns: Vec<&str> = Vec::new();
    for key in rows.iter().flat_map(|row| row.metadata.keys()) {
        if !columns.contains(&key) && !RESULT_COLUMNS.contains(&key) {
            columns.push(key);
        }
    }

    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(columns.iter().copied().chain(RESULT_COLUMNS))?;
    for row in rows {
        let results = row.results();
        let attributes = columns
            .iter()
            .map(|column| row.metadata.get(column).unwrap_or(""));
        csv.write_record(attributes.chain(results.iter().map(String::as_str)))?;
    }
    csv.flush()?;
    Ok(())
}

/// Replace the report at `path` with `rows`.
///
/// The report is written next to `path` first and then renamed over it, so
/// an interrupted write leaves the previous report intact.
pub fn save_report(path: &Path, rows: &[ReportRow]) -> Result<()> {
    let staging = staging_path(path);
    write_report(BufWriter::new(File::create(&staging)?), rows)?;
    fs::rename(&staging, path)?;

    debug!(path = %path.display(), rows = rows.len(), "saved report");
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
