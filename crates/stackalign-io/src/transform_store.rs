use std::fs;
use std::path::{Path, PathBuf};

use crate::error::IoError;

/// Directory of per-run transform tables.
///
/// A table `<name>.csv` holds one flattened row-major affine matrix per tile:
/// 6 columns (`m00..m12`) for 2D and 12 columns (`m00..m23`) for 3D.
#[derive(Debug, Clone)]
pub struct TransformStore {
    dir: PathBuf,
}

impl TransformStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, IoError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the table for the run `name`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.csv"))
    }

    /// Whether a table for the run exists.
    pub fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    /// Load the matrices of the run, or `None` if they were never saved.
    pub fn load(&self, name: &str) -> Result<Option<Vec<Vec<f64>>>, IoError> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }
        read_matrices(&path).map(Some)
    }

    /// Save the matrices of the run, replacing any previous table atomically.
    pub fn save(&self, name: &str, matrices: &[Vec<f64>]) -> Result<PathBuf, IoError> {
        let width = matrices.first().map_or(0, |m| m.len());
        let dims = dimensions(width)?;
        check_uniform(matrices, width)?;

        let path = self.path(name);
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            writer.write_record(header(dims))?;
            for m in matrices {
                writer.write_record(m.iter().map(|v| v.to_string()))?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;

        log::debug!("saved {} transforms to {}", matrices.len(), path.display());
        Ok(path)
    }
}

/// Spatial dimensionality of a flat affine matrix of `width` entries.
fn dimensions(width: usize) -> Result<usize, IoError> {
    match width {
        6 => Ok(2),
        12 => Ok(3),
        other => Err(IoError::InvalidMatrixWidth(other)),
    }
}

fn header(dims: usize) -> Vec<String> {
    (0..dims)
        .flat_map(|r| (0..=dims).map(move |c| format!("m{r}{c}")))
        .collect()
}

fn check_uniform(matrices: &[Vec<f64>], expected: usize) -> Result<(), IoError> {
    for (row, m) in matrices.iter().enumerate() {
        if m.len() != expected {
            return Err(IoError::InconsistentMatrixWidth {
                row,
                expected,
                actual: m.len(),
            });
        }
    }
    Ok(())
}

fn read_matrices(path: &Path) -> Result<Vec<Vec<f64>>, IoError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let width = reader.headers()?.len();
    dimensions(width)?;

    let mut matrices = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let values = record
            .iter()
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| IoError::ParseError {
                path: path.to_path_buf(),
                line: row + 2,
                message: e.to_string(),
            })?;
        matrices.push(values);
    }

    check_uniform(&matrices, width)?;
    Ok(matrices)
}
