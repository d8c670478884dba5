use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use stackalign_models::{CorrespondenceSet, MatchMethod, PointMatch};

use crate::error::IoError;

const SUFFIX: &str = "pointmatches.csv";

/// Directory of persisted correspondence sets, one CSV file per tile pair.
///
/// A file starts with a `#` metadata line holding the parameter fingerprint and
/// the extraction method, followed by a header and one row per match:
///
/// ```text
/// # fingerprint=3f2a9c01d4e5b6a7 method=block-matching
/// x1,y1,x2,y2,weight
/// 10,10,13.25,9.5,0.98
/// ```
#[derive(Debug, Clone)]
pub struct CorrespondenceStore {
    dir: PathBuf,
}

struct Metadata {
    fingerprint: String,
    method: MatchMethod,
}

impl CorrespondenceStore {
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

    /// Path of the file for the pair `(source_id, target_id)`.
    pub fn path(&self, source_id: &str, target_id: &str) -> PathBuf {
        self.dir
            .join(format!("{source_id}.{target_id}.{SUFFIX}"))
    }

    /// Whether a set for the pair exists and was produced with `fingerprint`.
    pub fn exists(&self, source_id: &str, target_id: &str, fingerprint: &str) -> bool {
        let path = self.path(source_id, target_id);
        match read_metadata(&path) {
            Ok(Some(meta)) => meta.fingerprint == fingerprint,
            _ => false,
        }
    }

    /// Load the set for the pair.
    ///
    /// Returns `None` when no file exists or when it was produced with another
    /// fingerprint; the latter is logged as a warning.
    pub fn load<const D: usize>(
        &self,
        source_id: &str,
        target_id: &str,
        fingerprint: &str,
    ) -> Result<Option<CorrespondenceSet<D>>, IoError> {
        let path = self.path(source_id, target_id);
        let Some(meta) = read_metadata(&path)? else {
            return Ok(None);
        };

        if meta.fingerprint != fingerprint {
            log::warn!(
                "{} was produced with fingerprint {}, expected {}",
                path.display(),
                meta.fingerprint,
                fingerprint
            );
            return Ok(None);
        }

        let matches = read_matches::<D>(&path)?;
        Ok(Some(CorrespondenceSet {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            method: meta.method,
            fingerprint: meta.fingerprint,
            matches,
        }))
    }

    /// Persist a set, replacing any previous file atomically.
    pub fn save<const D: usize>(&self, set: &CorrespondenceSet<D>) -> Result<PathBuf, IoError> {
        let path = self.path(&set.source_id, &set.target_id);
        let tmp = path.with_extension("csv.tmp");

        {
            let mut file = fs::File::create(&tmp)?;
            writeln!(
                file,
                "# fingerprint={} method={}",
                set.fingerprint, set.method
            )?;

            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(header(D))?;
            for m in &set.matches {
                let row = m
                    .p1
                    .iter()
                    .chain(&m.p2)
                    .chain(std::iter::once(&m.weight))
                    .map(|v| v.to_string());
                writer.write_record(row)?;
            }
            writer.flush()?;
        }

        fs::rename(&tmp, &path)?;
        Ok(path)
    }
}

fn header(d: usize) -> Vec<String> {
    const AXES: [&str; 3] = ["x", "y", "z"];
    (1..=2)
        .flat_map(|p| AXES.iter().take(d).map(move |a| format!("{a}{p}")))
        .chain(std::iter::once("weight".to_string()))
        .collect()
}

fn read_metadata(path: &Path) -> Result<Option<Metadata>, IoError> {
    if !path.exists() {
        return Ok(None);
    }

    let mut first = String::new();
    BufReader::new(fs::File::open(path)?).read_line(&mut first)?;
    let first = first.trim_end();
    let parse_error = |message: String| IoError::ParseError {
        path: path.to_path_buf(),
        line: 1,
        message,
    };

    let Some(fields) = first.strip_prefix('#') else {
        return Err(parse_error("missing metadata line".to_string()));
    };

    let mut fingerprint = None;
    let mut method = None;
    for field in fields.split_whitespace() {
        match field.split_once('=') {
            Some(("fingerprint", v)) => fingerprint = Some(v.to_string()),
            Some(("method", v)) => method = Some(v.parse::<MatchMethod>().map_err(parse_error)?),
            _ => {}
        }
    }

    match (fingerprint, method) {
        (Some(fingerprint), Some(method)) => Ok(Some(Metadata {
            fingerprint,
            method,
        })),
        _ => Err(parse_error(
            "metadata line needs fingerprint and method".to_string(),
        )),
    }
}

fn read_matches<const D: usize>(path: &Path) -> Result<Vec<PointMatch<D>>, IoError> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .from_path(path)?;

    let columns = 2 * D + 1;
    let found = reader.headers()?.len();
    if found != columns {
        return Err(IoError::ParseError {
            path: path.to_path_buf(),
            line: 2,
            message: format!("expected {columns} columns, found {found}"),
        });
    }

    let mut matches = Vec::new();
    for (i, record) in reader.records().enumerate() {
        // metadata line and header precede the rows
        let line = i + 3;
        let record = record?;
        let values = record
            .iter()
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| IoError::ParseError {
                path: path.to_path_buf(),
                line,
                message: e.to_string(),
            })?;

        let mut m = PointMatch {
            p1: [0.0; D],
            p2: [0.0; D],
            weight: values[2 * D],
        };
        m.p1.copy_from_slice(&values[..D]);
        m.p2.copy_from_slice(&values[D..2 * D]);
        matches.push(m);
    }
    Ok(matches)
}
