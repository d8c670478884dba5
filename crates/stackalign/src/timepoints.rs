//! Registration of multi-camera time-point series.
//!
//! Every `TM<digits>` folder holds one volume per camera. The four cameras are
//! fused pairwise (`CM00 + CM01`, `CM02 + CM03`) by an external [`Deconvolver`]
//! after fine registration, and the fused volumes of all time points are then
//! registered to the first one. Correspondences between volumes come from an
//! external [`VolumeMatcher`]. Every transform table is persisted and reused on
//! the next run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use stackalign_io::{IoError, TransformStore};
use stackalign_models::ransac::{filter_ransac, RansacParams};
use stackalign_models::{AffineModel3d, Model, PointMatch};

use crate::error::AlignError;

/// Number of cameras of every time point.
pub const NUM_CAMERAS: usize = 4;

/// Subdirectory of the target directory holding the fused volumes.
pub const DECONVOLVED_DIR: &str = "deconvolved";

/// The camera pairs fused into one volume each.
pub const CAMERA_PAIRS: [[usize; 2]; 2] = [[0, 1], [2, 3]];

/// A volume placed in a common frame by an affine transform.
#[derive(Debug, Clone, Copy)]
pub struct VolumeRef<'a> {
    /// Location of the volume.
    pub path: &'a Path,
    /// Transform from volume coordinates into the common frame.
    pub transform: AffineModel3d,
}

/// Finds correspondences between two transformed volumes.
pub trait VolumeMatcher: Send + Sync {
    /// Correspondences with `p1` in `a` and `p2` in `b`.
    fn match_volumes(
        &self,
        a: &VolumeRef<'_>,
        b: &VolumeRef<'_>,
    ) -> Result<Vec<PointMatch<3>>, AlignError>;
}

/// Fuses registered views into a single volume written to `output`.
pub trait Deconvolver: Send + Sync {
    /// Fuse `views` and write the result to `output`.
    fn deconvolve(&self, views: &[VolumeRef<'_>], output: &Path) -> Result<(), AlignError>;
}

/// One time point folder and its camera files by camera index.
#[derive(Debug, Clone, PartialEq)]
pub struct TimePoint {
    /// Folder name, `TM<digits>`.
    pub name: String,
    /// The folder.
    pub dir: PathBuf,
    /// Camera files ordered by camera index.
    pub cameras: BTreeMap<u32, PathBuf>,
}

impl TimePoint {
    /// The camera files in camera index order.
    pub fn camera_paths(&self) -> Vec<&Path> {
        self.cameras.values().map(PathBuf::as_path).collect()
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_time_point_name(name: &str) -> bool {
    name.strip_prefix("TM").is_some_and(is_digits)
}

/// The camera index of a file named `SPM00_TM<digits>_CM<index>_CHN0{0,1}.klb`.
pub fn camera_index(file_name: &str) -> Option<u32> {
    let rest = file_name
        .strip_prefix("SPM00_TM")?
        .strip_suffix(".klb")?;
    let (tm, rest) = rest.split_once("_CM")?;
    let (cm, channel) = rest.split_once("_CHN0")?;
    if !is_digits(tm) || !is_digits(cm) || !matches!(channel, "0" | "1") {
        return None;
    }
    cm.parse().ok()
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, AlignError> {
    if !dir.is_dir() {
        return Err(IoError::FileDoesNotExist(dir.to_path_buf()).into());
    }
    let mut paths = std::fs::read_dir(dir)
        .map_err(IoError::from)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(IoError::from)?;
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Names of the time point folders of `src_dir`, sorted.
pub fn time_point_names(src_dir: &Path) -> Result<Vec<String>, AlignError> {
    let names = sorted_entries(src_dir)?
        .iter()
        .filter(|p| p.is_dir())
        .filter_map(|p| file_name(p))
        .filter(|n| is_time_point_name(n))
        .map(str::to_string)
        .collect::<Vec<_>>();

    if names.is_empty() {
        return Err(AlignError::NoImages(src_dir.to_path_buf()));
    }
    Ok(names)
}

/// Discover every time point of `src_dir`.
///
/// All folders are validated before returning: any folder without exactly
/// [`NUM_CAMERAS`] distinct cameras aborts the discovery.
pub fn discover_time_points(src_dir: &Path) -> Result<Vec<TimePoint>, AlignError> {
    let mut time_points = Vec::new();
    for name in time_point_names(src_dir)? {
        let dir = src_dir.join(&name);
        let mut cameras = BTreeMap::new();
        for path in sorted_entries(&dir)? {
            if let Some(index) = file_name(&path).and_then(camera_index) {
                cameras.entry(index).or_insert(path);
            }
        }

        if cameras.len() != NUM_CAMERAS {
            return Err(AlignError::InvalidTimePoint {
                dir,
                found: cameras.len(),
            });
        }
        time_points.push(TimePoint { name, dir, cameras });
    }
    Ok(time_points)
}

/// Path of the fused volume of `cameras` at time point `name`.
pub fn deconvolved_path(target_dir: &Path, name: &str, cameras: [usize; 2]) -> PathBuf {
    target_dir.join(DECONVOLVED_DIR).join(format!(
        "{name}_CM{:02}-CM{:02}-deconvolved.zip",
        cameras[0], cameras[1]
    ))
}

fn to_affine<M: Model<3>>(model: &M) -> Result<AffineModel3d, AlignError> {
    Ok(AffineModel3d::from_matrix(&model.to_matrix())?)
}

/// Register every volume to its predecessor.
///
/// Returns one transform per volume, mapping the coordinates of volume
/// `i - 1` into those of volume `i`; the first one is the identity. Pairs are
/// matched and fitted in parallel.
pub fn compute_forward_transforms<M: Model<3>>(
    volumes: &[VolumeRef<'_>],
    matcher: &dyn VolumeMatcher,
    ransac: &RansacParams,
) -> Result<Vec<AffineModel3d>, AlignError> {
    let forward = volumes
        .par_windows(2)
        .map(|pair| -> Result<AffineModel3d, AlignError> {
            let candidates = matcher.match_volumes(&pair[0], &pair[1])?;
            let (model, inliers) = filter_ransac::<M, 3>(&candidates, ransac)?;
            log::debug!(
                "{} -> {}: {} / {} inliers",
                pair[0].path.display(),
                pair[1].path.display(),
                inliers.len(),
                candidates.len()
            );
            to_affine(&model)
        })
        .collect::<Result<Vec<_>, AlignError>>()?;

    Ok(std::iter::once(AffineModel3d::default())
        .chain(forward)
        .take(volumes.len())
        .collect())
}

/// Chain forward transforms into transforms to the first volume.
///
/// `B_0 = I` and `B_i = B_{i-1} * F_i^{-1}`.
pub fn as_backward_concat_transforms(
    forward: &[AffineModel3d],
) -> Result<Vec<AffineModel3d>, AlignError> {
    let mut backward = Vec::with_capacity(forward.len());
    let mut current = AffineModel3d::default();
    for (i, f) in forward.iter().enumerate() {
        if i > 0 {
            current = current.concatenate(&f.inverse()?);
        }
        backward.push(current);
    }
    Ok(backward)
}

/// Load the transform table `name` if it has `expected` rows, or compute and save it.
fn load_or_compute(
    store: &TransformStore,
    name: &str,
    expected: usize,
    compute: impl FnOnce() -> Result<Vec<AffineModel3d>, AlignError>,
) -> Result<Vec<AffineModel3d>, AlignError> {
    if let Some(rows) = store.load(name)? {
        if rows.len() == expected {
            log::info!("loaded {}", store.path(name).display());
            return rows
                .iter()
                .map(|row| AffineModel3d::from_matrix(row).map_err(AlignError::from))
                .collect();
        }
        log::warn!(
            "{} holds {} transforms instead of {}, recomputing",
            store.path(name).display(),
            rows.len(),
            expected
        );
    }

    let transforms = compute()?;
    let rows = transforms.iter().map(|t| t.to_matrix()).collect::<Vec<_>>();
    store.save(name, &rows)?;
    Ok(transforms)
}

fn identity_ref(path: &Path) -> VolumeRef<'_> {
    VolumeRef {
        path,
        transform: AffineModel3d::default(),
    }
}

/// The forward transform of `b` relative to `a`.
fn pair_transform<M: Model<3>>(
    a: VolumeRef<'_>,
    b: VolumeRef<'_>,
    matcher: &dyn VolumeMatcher,
    ransac: &RansacParams,
) -> Result<AffineModel3d, AlignError> {
    let forward = compute_forward_transforms::<M>(&[a, b], matcher, ransac)?;
    Ok(forward.get(1).copied().unwrap_or_default())
}

/// Register the fused volumes of every time point of `src_dir`.
///
/// All `CM00-CM01` volumes are registered in sequence to the first one, and
/// every `CM02-CM03` volume to the `CM00-CM01` volume of its time point.
/// Returns the volumes interleaved per time point, each with its transform
/// into the frame of the first volume.
pub fn register_deconvolved_time_points<M: Model<3>>(
    src_dir: &Path,
    target_dir: &Path,
    matcher: &dyn VolumeMatcher,
    ransac: &RansacParams,
) -> Result<Vec<(PathBuf, AffineModel3d)>, AlignError> {
    let names = time_point_names(src_dir)?;

    let mut paths_01 = Vec::with_capacity(names.len());
    let mut paths_23 = Vec::with_capacity(names.len());
    for name in &names {
        for (pair, paths) in CAMERA_PAIRS.iter().zip([&mut paths_01, &mut paths_23]) {
            let path = deconvolved_path(target_dir, name, *pair);
            if !path.exists() {
                return Err(AlignError::MissingArtifact(path));
            }
            paths.push(path);
        }
    }

    let store = TransformStore::new(target_dir.join(DECONVOLVED_DIR).join("csvs"))?;

    let refs_01 = paths_01.iter().map(|p| identity_ref(p)).collect::<Vec<_>>();
    let matrices_01 = load_or_compute(&store, "matrices_CM00_CM01", names.len(), || {
        let forward = compute_forward_transforms::<M>(&refs_01, matcher, ransac)?;
        as_backward_concat_transforms(&forward)
    })?;

    let matrices_23 = load_or_compute(&store, "matrices_CM02_CM03", names.len(), || {
        paths_01
            .par_iter()
            .zip(paths_23.par_iter())
            .zip(matrices_01.par_iter())
            .map(|((p01, p23), a01)| -> Result<AffineModel3d, AlignError> {
                let f = pair_transform::<M>(identity_ref(p01), identity_ref(p23), matcher, ransac)?;
                Ok(a01.concatenate(&f.inverse()?))
            })
            .collect()
    })?;

    log::info!("registered {} time points", names.len());

    Ok(paths_01
        .into_iter()
        .zip(matrices_01)
        .zip(paths_23.into_iter().zip(matrices_23))
        .flat_map(|(a, b)| [a, b])
        .collect())
}

/// Finely register and fuse the cameras of one time point.
///
/// `coarse` holds the transform of every camera into the common frame. The
/// fine transforms of `CM01` onto `CM00` and of `CM03` onto `CM02` are
/// persisted in `<target>/<TM>-csv/<TM>-matrices.csv`. A fused volume that
/// already exists is not recomputed.
pub fn deconvolve_time_point<M: Model<3>>(
    time_point: &TimePoint,
    target_dir: &Path,
    coarse: &[AffineModel3d; NUM_CAMERAS],
    matcher: &dyn VolumeMatcher,
    deconvolver: &dyn Deconvolver,
    ransac: &RansacParams,
) -> Result<(), AlignError> {
    let cameras = time_point.camera_paths();
    if cameras.len() != NUM_CAMERAS {
        return Err(AlignError::InvalidTimePoint {
            dir: time_point.dir.clone(),
            found: cameras.len(),
        });
    }
    let views = cameras
        .iter()
        .zip(coarse)
        .map(|(&path, &transform)| VolumeRef { path, transform })
        .collect::<Vec<_>>();

    let name = &time_point.name;
    let store = TransformStore::new(target_dir.join(format!("{name}-csv")))?;
    let fine = load_or_compute(&store, &format!("{name}-matrices"), 2, || {
        let (m01, m23) = rayon::join(
            || pair_transform::<M>(views[0], views[1], matcher, ransac),
            || pair_transform::<M>(views[2], views[3], matcher, ransac),
        );
        Ok(vec![m01?, m23?])
    })?;

    let views = [
        views[0],
        VolumeRef {
            transform: fine[0].concatenate(&coarse[1]),
            ..views[1]
        },
        views[2],
        VolumeRef {
            transform: fine[1].concatenate(&coarse[3]),
            ..views[3]
        },
    ];

    std::fs::create_dir_all(target_dir.join(DECONVOLVED_DIR)).map_err(IoError::from)?;
    for pair in CAMERA_PAIRS {
        let output = deconvolved_path(target_dir, name, pair);
        if output.exists() {
            log::info!("{} exists, skipping", output.display());
            continue;
        }
        log::info!("deconvolving {}", output.display());
        deconvolver.deconvolve(&[views[pair[0]], views[pair[1]]], &output)?;
    }
    Ok(())
}

/// Register and fuse the cameras of every time point of `src_dir`, in order.
///
/// Every time point is validated before any is processed. Time points run
/// one at a time; the parallelism is within each.
pub fn deconvolve_time_points<M: Model<3>>(
    src_dir: &Path,
    target_dir: &Path,
    coarse: &[AffineModel3d; NUM_CAMERAS],
    matcher: &dyn VolumeMatcher,
    deconvolver: &dyn Deconvolver,
    ransac: &RansacParams,
) -> Result<Vec<TimePoint>, AlignError> {
    let time_points = discover_time_points(src_dir)?;
    for (i, time_point) in time_points.iter().enumerate() {
        log::info!("time point {} ({}/{})", time_point.name, i + 1, time_points.len());
        deconvolve_time_point::<M>(time_point, target_dir, coarse, matcher, deconvolver, ransac)?;
    }
    Ok(time_points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{DMat3, DVec3};
    use stackalign_models::TranslationModel3d;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Volumes observing the same points shifted by a per-file offset.
    struct ShiftMatcher {
        offsets: HashMap<PathBuf, [f64; 3]>,
    }

    impl VolumeMatcher for ShiftMatcher {
        fn match_volumes(
            &self,
            a: &VolumeRef<'_>,
            b: &VolumeRef<'_>,
        ) -> Result<Vec<PointMatch<3>>, AlignError> {
            let ta = self.offsets.get(a.path).copied().unwrap_or_default();
            let tb = self.offsets.get(b.path).copied().unwrap_or_default();
            let mut matches = Vec::new();
            for i in 0..3 {
                for j in 0..3 {
                    for k in 0..3 {
                        let x = [10.0 * i as f64, 12.0 * j as f64 + i as f64, 7.0 * k as f64];
                        matches.push(PointMatch::new(
                            [x[0] - ta[0], x[1] - ta[1], x[2] - ta[2]],
                            [x[0] - tb[0], x[1] - tb[1], x[2] - tb[2]],
                        ));
                    }
                }
            }
            Ok(matches)
        }
    }

    #[derive(Default)]
    struct TouchDeconvolver {
        calls: AtomicUsize,
    }

    impl Deconvolver for TouchDeconvolver {
        fn deconvolve(&self, views: &[VolumeRef<'_>], output: &Path) -> Result<(), AlignError> {
            assert_eq!(views.len(), 2);
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(output, b"fused").map_err(IoError::from)?;
            Ok(())
        }
    }

    fn translation(t: [f64; 3]) -> AffineModel3d {
        AffineModel3d {
            m: DMat3::IDENTITY,
            t: DVec3::from_array(t),
        }
    }

    fn write_time_point(src: &Path, name: &str, cameras: &[u32]) -> Result<(), AlignError> {
        let dir = src.join(name);
        std::fs::create_dir_all(&dir).map_err(IoError::from)?;
        let digits = &name[2..];
        for cm in cameras {
            let file = dir.join(format!("SPM00_TM{digits}_CM{cm:02}_CHN0{}.klb", cm / 2));
            std::fs::write(file, b"").map_err(IoError::from)?;
        }
        std::fs::write(dir.join("notes.txt"), b"").map_err(IoError::from)?;
        Ok(())
    }

    #[test]
    fn test_camera_index() {
        assert_eq!(camera_index("SPM00_TM000012_CM03_CHN01.klb"), Some(3));
        assert_eq!(camera_index("SPM00_TM000012_CM00_CHN00.klb"), Some(0));
        assert_eq!(camera_index("SPM00_TM000012_CM00_CHN02.klb"), None);
        assert_eq!(camera_index("SPM00_TM_CM00_CHN00.klb"), None);
        assert_eq!(camera_index("SPM00_TM000012_CM00_CHN00.tif"), None);
        assert_eq!(camera_index("SPM01_TM000012_CM00_CHN00.klb"), None);
    }

    #[test]
    fn test_discover_time_points() -> Result<(), AlignError> {
        let tmp_dir = tempfile::tempdir().map_err(IoError::from)?;
        let src = tmp_dir.path();
        write_time_point(src, "TM000001", &[0, 1, 2, 3])?;
        write_time_point(src, "TM000000", &[0, 1, 2, 3])?;
        std::fs::create_dir(src.join("other")).map_err(IoError::from)?;

        let time_points = discover_time_points(src)?;
        assert_eq!(time_points.len(), 2);
        assert_eq!(time_points[0].name, "TM000000");
        assert_eq!(
            time_points[0].cameras.keys().copied().collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );

        write_time_point(src, "TM000002", &[0, 1, 3])?;
        assert!(matches!(
            discover_time_points(src),
            Err(AlignError::InvalidTimePoint { found: 3, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_backward_concat() -> Result<(), AlignError> {
        let forward = [
            AffineModel3d::default(),
            translation([-1.0, 0.0, 0.0]),
            translation([-2.0, 1.0, 0.0]),
        ];
        let backward = as_backward_concat_transforms(&forward)?;
        assert_eq!(backward[0], AffineModel3d::default());
        assert_eq!(backward[1].t, DVec3::new(1.0, 0.0, 0.0));
        assert_eq!(backward[2].t, DVec3::new(3.0, -1.0, 0.0));
        assert!(as_backward_concat_transforms(&[]).is_ok_and(|b| b.is_empty()));
        Ok(())
    }

    #[test]
    fn test_forward_transforms() -> Result<(), AlignError> {
        let paths = [PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")];
        let matcher = ShiftMatcher {
            offsets: HashMap::from([
                (paths[1].clone(), [2.0, 0.0, 0.0]),
                (paths[2].clone(), [2.0, -3.0, 1.0]),
            ]),
        };
        let refs = paths.iter().map(|p| identity_ref(p)).collect::<Vec<_>>();

        let forward =
            compute_forward_transforms::<TranslationModel3d>(&refs, &matcher, &RansacParams::default())?;
        assert_eq!(forward.len(), 3);
        assert_eq!(forward[0], AffineModel3d::default());
        approx::assert_relative_eq!(forward[1].t.x, -2.0, epsilon = 1e-9);
        approx::assert_relative_eq!(forward[2].t.y, 3.0, epsilon = 1e-9);

        let backward = as_backward_concat_transforms(&forward)?;
        approx::assert_relative_eq!(backward[2].t.x, 2.0, epsilon = 1e-9);
        approx::assert_relative_eq!(backward[2].t.y, -3.0, epsilon = 1e-9);
        approx::assert_relative_eq!(backward[2].t.z, 1.0, epsilon = 1e-9);

        let affine = compute_forward_transforms::<AffineModel3d>(&refs, &matcher, &RansacParams::default())?;
        approx::assert_relative_eq!(affine[2].t.z, -1.0, epsilon = 1e-6);
        approx::assert_relative_eq!(affine[2].m.x_axis.x, 1.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_deconvolve_and_register() -> Result<(), AlignError> {
        let src_dir = tempfile::tempdir().map_err(IoError::from)?;
        let target_dir = tempfile::tempdir().map_err(IoError::from)?;
        let (src, target) = (src_dir.path(), target_dir.path());
        for name in ["TM000000", "TM000001", "TM000002"] {
            write_time_point(src, name, &[0, 1, 2, 3])?;
        }

        let ransac = RansacParams::default();
        let deconvolver = TouchDeconvolver::default();
        let coarse = [AffineModel3d::default(); NUM_CAMERAS];

        // the fused volumes drift by one unit in x per time point
        let mut offsets = HashMap::new();
        for (i, name) in ["TM000000", "TM000001", "TM000002"].iter().enumerate() {
            offsets.insert(deconvolved_path(target, name, [0, 1]), [i as f64, 0.0, 0.0]);
            offsets.insert(deconvolved_path(target, name, [2, 3]), [i as f64, 0.5, 0.0]);
        }
        let matcher = ShiftMatcher { offsets };

        assert!(matches!(
            register_deconvolved_time_points::<TranslationModel3d>(src, target, &matcher, &ransac),
            Err(AlignError::MissingArtifact(_))
        ));

        let time_points = deconvolve_time_points::<TranslationModel3d>(
            src,
            target,
            &coarse,
            &matcher,
            &deconvolver,
            &ransac,
        )?;
        assert_eq!(time_points.len(), 3);
        assert_eq!(deconvolver.calls.load(Ordering::SeqCst), 6);
        assert!(target.join("TM000001-csv").join("TM000001-matrices.csv").exists());

        // rerun reuses the fused volumes
        deconvolve_time_points::<TranslationModel3d>(
            src,
            target,
            &coarse,
            &matcher,
            &deconvolver,
            &ransac,
        )?;
        assert_eq!(deconvolver.calls.load(Ordering::SeqCst), 6);

        let registered =
            register_deconvolved_time_points::<TranslationModel3d>(src, target, &matcher, &ransac)?;
        assert_eq!(registered.len(), 6);
        assert_eq!(registered[0].0, deconvolved_path(target, "TM000000", [0, 1]));
        assert_eq!(registered[1].0, deconvolved_path(target, "TM000000", [2, 3]));
        approx::assert_relative_eq!(registered[4].1.t.x, 2.0, epsilon = 1e-9);
        approx::assert_relative_eq!(registered[5].1.t.x, 2.0, epsilon = 1e-9);
        approx::assert_relative_eq!(registered[5].1.t.y, 0.5, epsilon = 1e-9);

        let csvs = target.join(DECONVOLVED_DIR).join("csvs");
        assert!(csvs.join("matrices_CM00_CM01.csv").exists());
        assert!(csvs.join("matrices_CM02_CM03.csv").exists());

        let reloaded =
            register_deconvolved_time_points::<TranslationModel3d>(src, target, &matcher, &ransac)?;
        assert_eq!(reloaded.len(), registered.len());
        for (a, b) in reloaded.iter().zip(&registered) {
            approx::assert_relative_eq!(a.1.t.x, b.1.t.x, epsilon = 1e-9);
        }
        Ok(())
    }
}
