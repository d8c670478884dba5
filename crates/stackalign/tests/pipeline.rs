use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::{rngs::StdRng, Rng, SeedableRng};
use stackalign::extract::{tile_id, PairOutcome};
use stackalign::image::Image;
use stackalign::imgproc::filter::gaussian_blur;
use stackalign::io::tiff::write_image_tiff_mono16;
use stackalign::io::{CorrespondenceStore, TiffImageSource};
use stackalign::models::{MatchMethod, Model, TranslationModel2d};
use stackalign::{
    align_sections, discover_sections, AlignConfig, AlignedVolumeView, CorrespondenceExtractor,
    ImageLoader,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Uniform noise, optionally blurred and stretched to the full 16-bit range.
fn base_image(width: usize, height: usize, blur: Option<f32>, seed: u64) -> Result<Image<f32>, Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Image::new(
        [width, height].into(),
        (0..width * height).map(|_| rng.random::<f32>()).collect(),
    )?;
    let Some(sigma) = blur else {
        return Ok(noise);
    };

    let mut blurred = Image::from_size_val(noise.size(), 0.0)?;
    gaussian_blur(&noise, &mut blurred, sigma)?;
    Ok(blurred)
}

/// Standard normal sample by the Box-Muller transform.
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1 = rng.random::<f32>().max(f32::MIN_POSITIVE);
    let u2 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

/// Write `count` crops of `base`, crop `k` starting `shift * k` pixels to the right.
///
/// Every section gets its own additive Gaussian noise of deviation `noise`,
/// relative to the intensity range of `base`.
fn write_sections(
    dir: &Path,
    base: &Image<f32>,
    size: [usize; 2],
    shift: usize,
    count: usize,
    noise: f32,
) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let (lo, hi) = base.min_max().ok_or("empty base image")?;
    let mut rng = StdRng::seed_from_u64(42);
    let mut paths = Vec::new();
    for k in 0..count {
        let mut data = Vec::with_capacity(size[0] * size[1]);
        for y in 0..size[1] {
            for x in 0..size[0] {
                let v = base.get(x + shift * k, y).copied().ok_or("crop out of bounds")?;
                let mut v = (v - lo) / (hi - lo);
                if noise > 0.0 {
                    v += noise * gaussian(&mut rng);
                }
                data.push((v * 60000.0 + 1000.0).round().clamp(0.0, 65535.0) as u16);
            }
        }
        let path = dir.join(format!("s{k:02}.tif"));
        write_image_tiff_mono16(&path, &Image::new(size.into(), data)?)?;
        paths.push(path);
    }
    Ok(paths)
}

fn loader(config: &AlignConfig) -> Arc<ImageLoader> {
    Arc::new(ImageLoader::new(Arc::new(TiffImageSource), &config.cache))
}

fn dense_config() -> AlignConfig {
    let mut config = AlignConfig::default();
    config.block_matching.scale = 1.0;
    config.block_matching.mesh_resolution = 10;
    config.block_matching.block_radius = 12;
    config.block_matching.search_radius = 10;
    config.block_matching.min_r = 0.7;
    config.tiles.n_adjacent = 2;
    config.num_threads = Some(2);
    config
}

fn translation(model: &TranslationModel2d) -> [f64; 2] {
    let m = model.to_matrix();
    [m[2], m[5]]
}

#[test]
fn aligns_shifted_series() -> TestResult {
    let src_dir = tempfile::tempdir()?;
    let target_dir = tempfile::tempdir()?;

    let base = base_image(112, 100, None, 7)?;
    write_sections(src_dir.path(), &base, [100, 100], 3, 5, 0.0)?;
    let paths = discover_sections(src_dir.path(), ".tif")?;
    assert_eq!(paths.len(), 5);

    let config = dense_config();
    let models = align_sections::<TranslationModel2d>(
        &paths,
        loader(&config),
        &config,
        target_dir.path(),
        "run",
    )?;
    assert_eq!(models.len(), 5);

    // the middle section is fixed at the identity
    assert_eq!(translation(&models[2]), [0.0, 0.0]);
    for (k, model) in models.iter().enumerate() {
        let [tx, ty] = translation(model);
        let expected = 3.0 * (k as f64 - 2.0);
        assert!((tx - expected).abs() < 1.0, "section {k}: {tx} vs {expected}");
        assert!(ty.abs() < 1.0, "section {k}: {ty}");
    }

    let store = CorrespondenceStore::new(target_dir.path().join("pointmatches"))?;
    let fingerprint = config.fingerprint()?;
    assert!(store.exists("s00.tif", "s01.tif", &fingerprint));
    assert!(store.exists("s00.tif", "s02.tif", &fingerprint));
    assert!(!store.exists("s00.tif", "s03.tif", &fingerprint));
    assert!(store
        .path("s00.tif", "s01.tif")
        .ends_with("s00.tif.s01.tif.pointmatches.csv"));
    let set = store
        .load::<2>("s01.tif", "s02.tif", &fingerprint)?
        .ok_or("missing correspondences")?;
    assert_eq!(set.method, MatchMethod::BlockMatching);
    assert!(set.len() >= 10);

    // a rerun returns the persisted transforms without extracting again
    std::fs::remove_dir_all(store.dir())?;
    let reloaded = align_sections::<TranslationModel2d>(
        &paths,
        loader(&config),
        &config,
        target_dir.path(),
        "run",
    )?;
    assert!(!store.dir().exists());
    for (a, b) in reloaded.iter().zip(&models) {
        let (ta, tb) = (translation(a), translation(b));
        approx::assert_relative_eq!(ta[0], tb[0], epsilon = 1e-9);
        approx::assert_relative_eq!(ta[1], tb[1], epsilon = 1e-9);
    }
    Ok(())
}

#[test]
fn aligns_noisy_shifted_series() -> TestResult {
    let src_dir = tempfile::tempdir()?;
    let target_dir = tempfile::tempdir()?;

    let base = base_image(112, 100, None, 3)?;
    let paths = write_sections(src_dir.path(), &base, [100, 100], 3, 5, 0.05)?;

    let config = dense_config();
    let models = align_sections::<TranslationModel2d>(
        &paths,
        loader(&config),
        &config,
        target_dir.path(),
        "noisy",
    )?;
    assert_eq!(models.len(), 5);
    assert_eq!(translation(&models[2]), [0.0, 0.0]);
    for (k, model) in models.iter().enumerate() {
        let [tx, ty] = translation(model);
        let expected = 3.0 * (k as f64 - 2.0);
        assert!((tx - expected).abs() < 1.0, "section {k}: {tx} vs {expected}");
        assert!(ty.abs() < 1.0, "section {k}: {ty}");
    }
    Ok(())
}

#[test]
fn persisted_correspondences_are_reused() -> TestResult {
    let src_dir = tempfile::tempdir()?;
    let target_dir = tempfile::tempdir()?;

    let base = base_image(106, 100, None, 11)?;
    let paths = write_sections(src_dir.path(), &base, [100, 100], 3, 3, 0.0)?;

    let config = dense_config();
    let store = CorrespondenceStore::new(target_dir.path().join("pointmatches"))?;
    let extractor = CorrespondenceExtractor::new(loader(&config), config.clone())?;

    let first = extractor.ensure(&paths[0], &paths[1], &store)?;
    assert!(matches!(
        first,
        PairOutcome::Extracted {
            method: MatchMethod::BlockMatching,
            ..
        }
    ));

    let file = store.path(&tile_id(&paths[0]), &tile_id(&paths[1]));
    let bytes = std::fs::read(&file)?;

    let second = extractor.ensure(&paths[0], &paths[1], &store)?;
    assert!(matches!(second, PairOutcome::Skipped));
    assert_eq!(std::fs::read(&file)?, bytes);

    // other extraction parameters do not reuse the set
    let mut other = config.clone();
    other.block_matching.min_r = 0.6;
    let extractor = CorrespondenceExtractor::new(loader(&other), other)?;
    assert!(matches!(
        extractor.ensure(&paths[0], &paths[1], &store)?,
        PairOutcome::Extracted { .. }
    ));

    let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build()?;
    let pairs = vec![
        (paths[0].clone(), paths[1].clone()),
        (paths[1].clone(), paths[2].clone()),
        (paths[0].clone(), src_dir.path().join("missing.tif")),
    ];
    let report = extractor.ensure_correspondences(&pairs, &store, &pool);
    assert_eq!(report.pairs.len(), 3);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.extracted(), 1);
    assert_eq!(report.failed(), 1);
    assert!(matches!(report.pairs[2].outcome, PairOutcome::Failed(_)));
    Ok(())
}

#[test]
fn falls_back_to_features_beyond_search_radius() -> TestResult {
    let src_dir = tempfile::tempdir()?;
    let target_dir = tempfile::tempdir()?;

    let base = base_image(158, 128, Some(2.0), 5)?;
    let paths = write_sections(src_dir.path(), &base, [128, 128], 30, 2, 0.0)?;

    let mut config = AlignConfig::default();
    config.block_matching.scale = 1.0;
    config.block_matching.block_radius = 20;
    config.block_matching.search_radius = 5;
    config.block_matching.min_r = 0.7;
    config.sift.fd_size = 4;
    config.sift.min_octave_size = 32;

    let store = CorrespondenceStore::new(target_dir.path())?;
    let extractor = CorrespondenceExtractor::new(loader(&config), config)?;
    let set = extractor.extract(&paths[0], &paths[1])?;
    assert_eq!(set.method, MatchMethod::Sift);
    assert!(set.len() >= 5);

    // the content of section 0 at x sits at x - 30 in section 1
    let mut residuals = set
        .matches
        .iter()
        .map(|m| ((m.p2[0] - m.p1[0] + 30.0).powi(2) + (m.p2[1] - m.p1[1]).powi(2)).sqrt())
        .collect::<Vec<_>>();
    residuals.sort_by(f64::total_cmp);
    assert!(residuals[residuals.len() / 2] < 2.0);

    store.save(&set)?;
    let loaded = store
        .load::<2>(&set.source_id, &set.target_id, &set.fingerprint)?
        .ok_or("missing correspondences")?;
    assert_eq!(loaded.method, MatchMethod::Sift);
    assert_eq!(loaded.len(), set.len());
    Ok(())
}

#[test]
fn view_places_sections_with_zero_padding() -> TestResult {
    let src_dir = tempfile::tempdir()?;
    let target_dir = tempfile::tempdir()?;

    let base = base_image(112, 100, None, 13)?;
    let paths = write_sections(src_dir.path(), &base, [100, 100], 3, 5, 0.0)?;

    let config = dense_config();
    let loader = loader(&config);
    let models = align_sections::<TranslationModel2d>(
        &paths,
        loader.clone(),
        &config,
        target_dir.path(),
        "run",
    )?;

    let view = AlignedVolumeView::new(loader, paths, &models, [100, 100].into())?;
    assert_eq!(view.dimensions(), [100, 100, 5]);
    for k in 0..5 {
        assert_eq!(view.offset(k), Some([3 * k as isize - 6, 0]));
    }

    // section 0 moves 6 pixels left, its last 6 columns are padding
    let first = view.materialize_tile(0)?;
    for row in first.rows() {
        assert!(row[94..].iter().all(|&v| v == 0));
        assert!(row[..94].iter().all(|&v| v > 0));
    }

    // section 4 moves 6 pixels right
    let last = view.materialize_tile(4)?;
    for row in last.rows() {
        assert!(row[..6].iter().all(|&v| v == 0));
    }

    // aligned sections agree where they overlap
    let middle = view.materialize_tile(2)?;
    for (a, b) in first.rows().zip(middle.rows()) {
        assert_eq!(&a[..94], &b[..94]);
    }
    for (a, b) in last.rows().zip(middle.rows()) {
        assert_eq!(&a[6..], &b[6..]);
    }
    Ok(())
}
