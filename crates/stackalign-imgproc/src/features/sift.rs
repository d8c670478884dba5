use std::f32::consts::PI;

use rayon::prelude::*;
use stackalign_image::{Image, ImageError};

use crate::filter::gaussian_blur;
use crate::normalize::normalize_contrast;
use crate::resize::{downsample, halve};

/// Contrast threshold for DoG extrema, divided by the number of steps per octave.
const CONTRAST_THRESHOLD: f32 = 0.03;

/// Maximal ratio of principal curvatures of a DoG extremum.
const EDGE_RATIO: f32 = 10.0;

/// Number of bins of the orientation histogram.
const ORIENTATION_BINS: usize = 36;

/// Clamp value of the normalized descriptor entries.
const DESCRIPTOR_CLAMP: f32 = 0.2;

/// Blur assumed to be present in a camera image.
const SOURCE_SIGMA: f32 = 0.5;

/// Smallest octave extent the detector can work with.
const MIN_OCTAVE_EXTENT: usize = 8;

/// Parameters of the scale-space feature extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct SiftParams {
    /// Number of descriptor cells per row and column.
    pub fd_size: usize,
    /// Number of orientation bins per descriptor cell.
    pub fd_bins: usize,
    /// Images larger than this are downscaled before building the scale space.
    pub max_octave_size: usize,
    /// Smallest octave, in pixels of the shorter side.
    pub min_octave_size: usize,
    /// Number of scale steps per octave.
    pub steps: usize,
    /// Blur of the first scale of each octave.
    pub initial_sigma: f32,
}

impl Default for SiftParams {
    fn default() -> Self {
        Self {
            fd_size: 4,
            fd_bins: 8,
            max_octave_size: 1024,
            min_octave_size: 64,
            steps: 3,
            initial_sigma: 1.6,
        }
    }
}

/// A distinctive, scale and rotation invariant image feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Location in the input image, in pixels.
    pub location: [f64; 2],
    /// Scale of the feature, in pixels of the input image.
    pub scale: f64,
    /// Dominant gradient orientation in radians.
    pub orientation: f32,
    /// Normalized descriptor of `fd_size * fd_size * fd_bins` entries.
    pub descriptor: Vec<f32>,
}

struct Keypoint {
    x: f32,
    y: f32,
    level: usize,
    sigma: f32,
}

/// Extract scale-space features from an image.
///
/// The image is contrast normalized, optionally downscaled to fit
/// `max_octave_size`, and decomposed in octaves of `steps + 3` gaussian levels.
/// Extrema of the difference of gaussians are localized to sub-pixel accuracy,
/// assigned a dominant orientation and described by gradient histograms.
///
/// # Arguments
///
/// * `image` - The input image.
/// * `params` - The extractor parameters.
///
/// # Returns
///
/// The features, with locations in input image coordinates.
pub fn extract_features(image: &Image<f32>, params: &SiftParams) -> Result<Vec<Feature>, ImageError> {
    if params.steps == 0 || params.fd_size == 0 || params.fd_bins == 0 {
        return Err(ImageError::InvalidArgument(format!(
            "steps, fd_size and fd_bins must be positive, got {}, {}, {}",
            params.steps, params.fd_size, params.fd_bins
        )));
    }
    if params.initial_sigma.is_nan() || params.initial_sigma <= SOURCE_SIGMA {
        return Err(ImageError::InvalidArgument(format!(
            "initial sigma must be larger than {SOURCE_SIGMA}, got {}",
            params.initial_sigma
        )));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(ImageError::EmptyImage);
    }

    let mut base = image.clone();
    normalize_contrast(&mut base);

    let longest = image.width().max(image.height());
    let factor = if longest > params.max_octave_size {
        params.max_octave_size as f64 / longest as f64
    } else {
        1.0
    };
    if factor < 1.0 {
        base = downsample(&base, factor, SOURCE_SIGMA, SOURCE_SIGMA)?;
    }

    let s0 = params.initial_sigma;
    let mut current = Image::from_size_val(base.size(), 0.0)?;
    gaussian_blur(&base, &mut current, (s0 * s0 - SOURCE_SIGMA * SOURCE_SIGMA).sqrt())?;

    let min_extent = params.min_octave_size.max(MIN_OCTAVE_EXTENT);
    let k = 2f32.powf(1.0 / params.steps as f32);

    let mut features = Vec::new();
    let mut octave = 0;
    while current.width().min(current.height()) >= min_extent {
        let gaussians = octave_gaussians(current, params.steps, s0, k)?;
        let dogs = gaussians
            .windows(2)
            .map(|pair| difference(&pair[1], &pair[0]))
            .collect::<Result<Vec<_>, _>>()?;

        let keypoints = detect_keypoints(&dogs, params.steps, s0, k);
        log::debug!("octave {}: {} keypoints", octave, keypoints.len());

        let octave_scale = (1u64 << octave) as f64;
        let described = keypoints
            .par_iter()
            .filter_map(|kp| {
                let g = &gaussians[kp.level];
                let orientation = dominant_orientation(g, kp)?;
                let descriptor = describe(g, kp, orientation, params.fd_size, params.fd_bins)?;
                let bx = kp.x as f64 * octave_scale;
                let by = kp.y as f64 * octave_scale;
                Some(Feature {
                    location: [(bx + 0.5) / factor - 0.5, (by + 0.5) / factor - 0.5],
                    scale: kp.sigma as f64 * octave_scale / factor,
                    orientation,
                    descriptor,
                })
            })
            .collect::<Vec<_>>();
        features.extend(described);

        if current_too_small(&gaussians[params.steps]) {
            break;
        }
        current = halve(&gaussians[params.steps])?;
        octave += 1;
    }

    Ok(features)
}

fn current_too_small(image: &Image<f32>) -> bool {
    image.width() < 2 || image.height() < 2
}

fn octave_gaussians(
    base: Image<f32>,
    steps: usize,
    s0: f32,
    k: f32,
) -> Result<Vec<Image<f32>>, ImageError> {
    let mut gaussians = Vec::with_capacity(steps + 3);
    gaussians.push(base);
    for i in 1..steps + 3 {
        let sigma_prev = s0 * k.powi(i as i32 - 1);
        let increment = sigma_prev * (k * k - 1.0).sqrt();
        let mut next = Image::from_size_val(gaussians[i - 1].size(), 0.0)?;
        gaussian_blur(&gaussians[i - 1], &mut next, increment)?;
        gaussians.push(next);
    }
    Ok(gaussians)
}

fn difference(a: &Image<f32>, b: &Image<f32>) -> Result<Image<f32>, ImageError> {
    let data = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| x - y)
        .collect();
    Image::new(a.size(), data)
}

fn detect_keypoints(dogs: &[Image<f32>], steps: usize, s0: f32, k: f32) -> Vec<Keypoint> {
    let width = dogs[0].width();
    let height = dogs[0].height();
    let threshold = CONTRAST_THRESHOLD / steps as f32;

    (1..=steps)
        .into_par_iter()
        .flat_map_iter(|s| {
            let mut found = Vec::new();
            for y in 1..height - 1 {
                for x in 1..width - 1 {
                    let v = dogs[s].as_slice()[y * width + x];
                    if v.abs() < 0.5 * threshold || !is_extremum(dogs, s, x, y, v) {
                        continue;
                    }
                    if let Some(kp) = localize(dogs, s, x, y, threshold, s0, k) {
                        found.push(kp);
                    }
                }
            }
            found
        })
        .collect()
}

fn is_extremum(dogs: &[Image<f32>], s: usize, x: usize, y: usize, v: f32) -> bool {
    let width = dogs[0].width();
    let mut is_max = true;
    let mut is_min = true;
    for dog in &dogs[s - 1..=s + 1] {
        let data = dog.as_slice();
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if std::ptr::eq(dog, &dogs[s]) && nx == x && ny == y {
                    continue;
                }
                let w = data[ny * width + nx];
                is_max &= v > w;
                is_min &= v < w;
            }
        }
        if !is_max && !is_min {
            return false;
        }
    }
    is_max || is_min
}

fn localize(
    dogs: &[Image<f32>],
    s: usize,
    x: usize,
    y: usize,
    threshold: f32,
    s0: f32,
    k: f32,
) -> Option<Keypoint> {
    let width = dogs[0].width();
    let d = |level: usize, xx: usize, yy: usize| dogs[level].as_slice()[yy * width + xx];

    let v = d(s, x, y);
    let dx = (d(s, x + 1, y) - d(s, x - 1, y)) / 2.0;
    let dy = (d(s, x, y + 1) - d(s, x, y - 1)) / 2.0;
    let ds = (d(s + 1, x, y) - d(s - 1, x, y)) / 2.0;

    let dxx = d(s, x + 1, y) - 2.0 * v + d(s, x - 1, y);
    let dyy = d(s, x, y + 1) - 2.0 * v + d(s, x, y - 1);
    let dss = d(s + 1, x, y) - 2.0 * v + d(s - 1, x, y);
    let dxy = (d(s, x + 1, y + 1) - d(s, x + 1, y - 1) - d(s, x - 1, y + 1) + d(s, x - 1, y - 1))
        / 4.0;
    let dxs = (d(s + 1, x + 1, y) - d(s + 1, x - 1, y) - d(s - 1, x + 1, y) + d(s - 1, x - 1, y))
        / 4.0;
    let dys = (d(s + 1, x, y + 1) - d(s + 1, x, y - 1) - d(s - 1, x, y + 1) + d(s - 1, x, y - 1))
        / 4.0;

    let hessian = [[dxx, dxy, dxs], [dxy, dyy, dys], [dxs, dys, dss]];
    let offset = solve3(&hessian, &[-dx, -dy, -ds])?;
    if offset.iter().any(|o| o.abs() > 1.0) {
        return None;
    }

    let contrast = v + 0.5 * (dx * offset[0] + dy * offset[1] + ds * offset[2]);
    if contrast.abs() < threshold {
        return None;
    }

    // reject responses along edges
    let trace = dxx + dyy;
    let det = dxx * dyy - dxy * dxy;
    if det <= 0.0 || trace * trace / det >= (EDGE_RATIO + 1.0).powi(2) / EDGE_RATIO {
        return None;
    }

    Some(Keypoint {
        x: x as f32 + offset[0],
        y: y as f32 + offset[1],
        level: s,
        sigma: s0 * k.powf(s as f32 + offset[2]),
    })
}

/// Solve a 3x3 linear system with Cramer's rule.
fn solve3(a: &[[f32; 3]; 3], b: &[f32; 3]) -> Option<[f32; 3]> {
    let det = |m: &[[f32; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };

    let d = det(a);
    if d.abs() < f32::EPSILON {
        return None;
    }

    let mut x = [0.0; 3];
    for (col, xi) in x.iter_mut().enumerate() {
        let mut m = *a;
        for row in 0..3 {
            m[row][col] = b[row];
        }
        *xi = det(&m) / d;
    }
    Some(x)
}

fn gradient(image: &Image<f32>, x: isize, y: isize) -> (f32, f32) {
    let gx = image.get_clamped(x + 1, y) - image.get_clamped(x - 1, y);
    let gy = image.get_clamped(x, y + 1) - image.get_clamped(x, y - 1);
    ((gx * gx + gy * gy).sqrt(), gy.atan2(gx))
}

fn dominant_orientation(image: &Image<f32>, kp: &Keypoint) -> Option<f32> {
    let sigma_w = 1.5 * kp.sigma;
    let radius = (3.0 * sigma_w).round() as isize;
    let (cx, cy) = (kp.x.round() as isize, kp.y.round() as isize);

    let mut hist = [0.0f32; ORIENTATION_BINS];
    for j in -radius..=radius {
        for i in -radius..=radius {
            let (px, py) = (cx + i, cy + j);
            if px < 1 || py < 1 || px >= image.width() as isize - 1 || py >= image.height() as isize - 1 {
                continue;
            }
            let (mag, angle) = gradient(image, px, py);
            let w = (-((i * i + j * j) as f32) / (2.0 * sigma_w * sigma_w)).exp();
            let bin = ((angle + PI) / (2.0 * PI) * ORIENTATION_BINS as f32).floor() as usize;
            hist[bin.min(ORIENTATION_BINS - 1)] += w * mag;
        }
    }

    for _ in 0..2 {
        let prev = hist;
        for b in 0..ORIENTATION_BINS {
            let l = prev[(b + ORIENTATION_BINS - 1) % ORIENTATION_BINS];
            let r = prev[(b + 1) % ORIENTATION_BINS];
            hist[b] = (l + prev[b] + r) / 3.0;
        }
    }

    let (peak, &c) = hist.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1))?;
    if c <= 0.0 {
        return None;
    }

    let l = hist[(peak + ORIENTATION_BINS - 1) % ORIENTATION_BINS];
    let r = hist[(peak + 1) % ORIENTATION_BINS];
    let denom = l - 2.0 * c + r;
    let offset = if denom.abs() > f32::EPSILON {
        (0.5 * (l - r) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    Some((peak as f32 + 0.5 + offset) / ORIENTATION_BINS as f32 * 2.0 * PI - PI)
}

fn describe(
    image: &Image<f32>,
    kp: &Keypoint,
    orientation: f32,
    fd_size: usize,
    fd_bins: usize,
) -> Option<Vec<f32>> {
    let samples = 4 * fd_size;
    let spacing = 3.0 * kp.sigma / 4.0;
    let half = samples as f32 / 2.0;
    let half_window = half * spacing;
    let (sin, cos) = orientation.sin_cos();

    let mut descriptor = vec![0.0f32; fd_size * fd_size * fd_bins];
    for v in 0..samples {
        for u in 0..samples {
            let su = (u as f32 + 0.5 - half) * spacing;
            let sv = (v as f32 + 0.5 - half) * spacing;
            let x = kp.x + cos * su - sin * sv;
            let y = kp.y + sin * su + cos * sv;

            let (mag, angle) = gradient(image, x.round() as isize, y.round() as isize);
            let relative = (angle - orientation).rem_euclid(2.0 * PI);
            let w = (-(su * su + sv * sv) / (2.0 * half_window * half_window)).exp();

            let bin = ((relative / (2.0 * PI)) * fd_bins as f32).floor() as usize % fd_bins;
            let cell = (v / 4) * fd_size + u / 4;
            descriptor[cell * fd_bins + bin] += w * mag;
        }
    }

    if !normalize(&mut descriptor) {
        return None;
    }
    descriptor.iter_mut().for_each(|d| *d = d.min(DESCRIPTOR_CLAMP));
    normalize(&mut descriptor).then_some(descriptor)
}

fn normalize(values: &mut [f32]) -> bool {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return false;
    }
    values.iter_mut().for_each(|v| *v /= norm);
    true
}
