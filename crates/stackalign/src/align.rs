use std::path::{Path, PathBuf};
use std::sync::Arc;

use stackalign_io::{CorrespondenceStore, IoError, TransformStore};
use stackalign_models::Model;

use crate::config::AlignConfig;
use crate::error::AlignError;
use crate::extract::CorrespondenceExtractor;
use crate::graph::{adjacent_path_pairs, build_tile_configuration};
use crate::loader::ImageLoader;

/// Subdirectory of the target directory holding the correspondence sets.
pub const MATCHES_DIR: &str = "pointmatches";

/// Subdirectory of the target directory holding the transform tables.
pub const TRANSFORMS_DIR: &str = "transforms";

/// List the files of `dir` whose name ends with `suffix`, sorted by name.
pub fn discover_sections(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, AlignError> {
    if !dir.is_dir() {
        return Err(IoError::FileDoesNotExist(dir.to_path_buf()).into());
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(IoError::from)? {
        let path = entry.map_err(IoError::from)?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix));
        if path.is_file() && matches {
            paths.push(path);
        }
    }

    if paths.is_empty() {
        return Err(AlignError::NoImages(dir.to_path_buf()));
    }
    paths.sort();
    Ok(paths)
}

/// Build the worker pool for correspondence extraction.
pub fn build_thread_pool(num_threads: Option<usize>) -> Result<rayon::ThreadPool, AlignError> {
    let n = num_threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    Ok(rayon::ThreadPoolBuilder::new().num_threads(n).build()?)
}

/// Align a series of sections, one transform per section in input order.
///
/// Transforms persisted under `run_name` are returned as they are. Otherwise
/// the correspondences of every section and its `n_adjacent` successors are
/// extracted (reusing persisted sets), the tile graph is optimized with the
/// middle section fixed, and the result is persisted before returning.
pub fn align_sections<M: Model<2>>(
    paths: &[PathBuf],
    loader: Arc<ImageLoader>,
    config: &AlignConfig,
    target_dir: &Path,
    run_name: &str,
) -> Result<Vec<M>, AlignError> {
    if paths.is_empty() {
        return Err(AlignError::NoImages(target_dir.to_path_buf()));
    }
    config.validate()?;

    let transforms = TransformStore::new(target_dir.join(TRANSFORMS_DIR))?;
    if let Some(rows) = transforms.load(run_name)? {
        if rows.len() == paths.len() {
            log::info!("loaded {} transforms from {}", rows.len(), transforms.path(run_name).display());
            return Ok(rows
                .iter()
                .map(|row| M::from_matrix(row))
                .collect::<Result<Vec<_>, _>>()?);
        }
        log::warn!(
            "{} holds {} transforms for {} sections, recomputing",
            transforms.path(run_name).display(),
            rows.len(),
            paths.len()
        );
    }

    let store = CorrespondenceStore::new(target_dir.join(MATCHES_DIR))?;
    let extractor = CorrespondenceExtractor::new(loader, config.clone())?;
    let pool = build_thread_pool(config.num_threads)?;

    let pairs = adjacent_path_pairs(paths, config.tiles.n_adjacent);
    let report = extractor.ensure_correspondences(&pairs, &store, &pool);
    log::info!(
        "correspondences: {} extracted, {} reused, {} failed",
        report.extracted(),
        report.skipped(),
        report.failed()
    );

    let mut tc = build_tile_configuration::<M>(
        paths,
        config.tiles.n_adjacent,
        &store,
        extractor.fingerprint(),
    )?;
    tc.fix_tile(paths.len() / 2)?;

    let optimized = pool.install(|| tc.optimize(&config.optimizer))?;
    log::info!(
        "optimized {} sections in {} iterations, residual {:.3} -> {:.3}",
        paths.len(),
        optimized.iterations,
        optimized.initial_residual,
        optimized.residual
    );

    let models = tc.models();
    let rows = models.iter().map(|m| m.to_matrix()).collect::<Vec<_>>();
    transforms.save(run_name, &rows)?;
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_sections() -> Result<(), AlignError> {
        let tmp_dir = tempfile::tempdir().map_err(IoError::from)?;
        for name in ["s2.tif", "s0.tif", "s1.tif", "notes.txt"] {
            std::fs::write(tmp_dir.path().join(name), b"").map_err(IoError::from)?;
        }
        std::fs::create_dir(tmp_dir.path().join("sub.tif")).map_err(IoError::from)?;

        let paths = discover_sections(tmp_dir.path(), ".tif")?;
        let names = paths
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["s0.tif", "s1.tif", "s2.tif"]);

        assert!(matches!(
            discover_sections(tmp_dir.path(), ".png"),
            Err(AlignError::NoImages(_))
        ));
        Ok(())
    }

    #[test]
    fn test_build_thread_pool() -> Result<(), AlignError> {
        assert_eq!(build_thread_pool(Some(2))?.current_num_threads(), 2);
        assert!(build_thread_pool(None)?.current_num_threads() >= 1);
        Ok(())
    }
}
