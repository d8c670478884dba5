//! Dense correspondence search by maximal Pearson product-moment correlation.
//!
//! A regular mesh of sample points is laid over the source image. For every
//! point a square block around it is compared against all blocks within a
//! search window of the target image, and the offset with the highest
//! correlation coefficient is kept when it is a clear, well-defined maximum.
//!
//! The images are expected to be pre-scaled (downsampled and contrast
//! normalized); sample points, radii and the resulting matches are expressed
//! in full resolution pixels.

use rayon::prelude::*;
use stackalign_image::{Image, ImageSize};

/// Parameters for the block matching search.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMatchingParams {
    /// Scale of the pre-scaled images relative to full resolution.
    pub scale: f64,
    /// Radius of the compared blocks, in full resolution pixels.
    pub block_radius: usize,
    /// Radius of the search window, in full resolution pixels.
    pub search_radius: usize,
    /// Minimal correlation coefficient to accept a match.
    pub min_r: f32,
    /// Maximal ratio of the second best over the best correlation.
    pub rod: f32,
    /// Maximal ratio of principal curvatures at the correlation peak.
    pub max_curvature: f32,
}

/// A correspondence found by block matching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockMatch {
    /// Location in the source image, full resolution.
    pub source: [f64; 2],
    /// Location in the target image, full resolution.
    pub target: [f64; 2],
    /// Correlation coefficient at the match.
    pub r: f32,
}

/// Regular grid of `resolution x resolution` sample points spanning an image.
///
/// Points cover `[0, width - 1] x [0, height - 1]` including the borders. A
/// resolution of one yields the image center.
///
/// # Example
///
/// ```
/// use stackalign_imgproc::blockmatching::mesh_points;
///
/// let points = mesh_points([101, 51].into(), 3);
/// assert_eq!(points.len(), 9);
/// assert_eq!(points[0], [0.0, 0.0]);
/// assert_eq!(points[4], [50.0, 25.0]);
/// assert_eq!(points[8], [100.0, 50.0]);
/// ```
pub fn mesh_points(size: ImageSize, resolution: usize) -> Vec<[f64; 2]> {
    let axis = |extent: usize| -> Vec<f64> {
        let last = extent.saturating_sub(1) as f64;
        match resolution {
            0 => vec![],
            1 => vec![last / 2.0],
            n => (0..n).map(|i| i as f64 * last / (n - 1) as f64).collect(),
        }
    };

    let xs = axis(size.width);
    let ys = axis(size.height);
    ys.iter()
        .flat_map(|&y| xs.iter().map(move |&x| [x, y]))
        .collect()
}

/// Find, for every source point, the best matching location in the target image.
///
/// # Arguments
///
/// * `source` - The pre-scaled source image.
/// * `target` - The pre-scaled target image.
/// * `target_size` - The full resolution size of the target image.
/// * `source_points` - Sample points in full resolution source coordinates.
/// * `params` - The block matching parameters.
///
/// # Returns
///
/// The accepted matches, in the order of their source points.
pub fn match_by_maximal_pmcc(
    source: &Image<f32>,
    target: &Image<f32>,
    target_size: ImageSize,
    source_points: &[[f64; 2]],
    params: &BlockMatchingParams,
) -> Vec<BlockMatch> {
    source_points
        .par_iter()
        .filter_map(|p| match_point(source, target, target_size, p, params))
        .collect()
}

fn scaled_radius(radius: usize, scale: f64) -> isize {
    ((radius as f64 * scale).ceil() as isize).max(1)
}

fn match_point(
    source: &Image<f32>,
    target: &Image<f32>,
    target_size: ImageSize,
    point: &[f64; 2],
    params: &BlockMatchingParams,
) -> Option<BlockMatch> {
    let scale = params.scale;
    let cx = (point[0] * scale).round() as isize;
    let cy = (point[1] * scale).round() as isize;
    let br = scaled_radius(params.block_radius, scale);
    let sr = scaled_radius(params.search_radius, scale);

    let full_area = ((2 * br + 1) * (2 * br + 1)) as usize;
    let min_valid = (full_area + 1) / 2;

    // the part of the block that lies inside the source image
    let mut offsets = Vec::with_capacity(full_area);
    let mut values = Vec::with_capacity(full_area);
    for dy in -br..=br {
        for dx in -br..=br {
            if let Some(&v) = source.get_signed(cx + dx, cy + dy) {
                offsets.push((dx, dy));
                values.push(v);
            }
        }
    }
    if values.len() < min_valid {
        return None;
    }

    let side = (2 * sr + 1) as usize;
    let mut landscape = vec![f32::NEG_INFINITY; side * side];
    for oy in -sr..=sr {
        for ox in -sr..=sr {
            let idx = (oy + sr) as usize * side + (ox + sr) as usize;
            if let Some(r) = pmcc(&offsets, &values, target, cx + ox, cy + oy, min_valid) {
                landscape[idx] = r;
            }
        }
    }

    let peak = find_peak(&landscape, side, params)?;
    let bx = peak.x as isize - sr;
    let by = peak.y as isize - sr;

    let target_point = [
        point[0] + (bx as f64 + peak.dx as f64) / scale,
        point[1] + (by as f64 + peak.dy as f64) / scale,
    ];

    let max_x = target_size.width.saturating_sub(1) as f64;
    let max_y = target_size.height.saturating_sub(1) as f64;
    if !(0.0..=max_x).contains(&target_point[0]) || !(0.0..=max_y).contains(&target_point[1]) {
        return None;
    }

    Some(BlockMatch {
        source: *point,
        target: target_point,
        r: peak.r,
    })
}

/// Pearson correlation between the source block and the target block centered at `(tx, ty)`.
fn pmcc(
    offsets: &[(isize, isize)],
    values: &[f32],
    target: &Image<f32>,
    tx: isize,
    ty: isize,
    min_valid: usize,
) -> Option<f32> {
    let (mut n, mut sa, mut sb, mut saa, mut sbb, mut sab) = (0usize, 0.0, 0.0, 0.0, 0.0, 0.0);
    for (&(dx, dy), &a) in offsets.iter().zip(values.iter()) {
        if let Some(&b) = target.get_signed(tx + dx, ty + dy) {
            let (a, b) = (a as f64, b as f64);
            n += 1;
            sa += a;
            sb += b;
            saa += a * a;
            sbb += b * b;
            sab += a * b;
        }
    }

    if n < min_valid {
        return None;
    }

    let nf = n as f64;
    let cov = sab - sa * sb / nf;
    let var_a = saa - sa * sa / nf;
    let var_b = sbb - sb * sb / nf;
    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return None;
    }

    Some((cov / (var_a * var_b).sqrt()) as f32)
}

struct Peak {
    x: usize,
    y: usize,
    dx: f32,
    dy: f32,
    r: f32,
}

fn find_peak(landscape: &[f32], side: usize, params: &BlockMatchingParams) -> Option<Peak> {
    let (best_idx, best_r) = landscape
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, r)| r.is_finite())
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    if best_r < params.min_r {
        return None;
    }

    let (bx, by) = (best_idx % side, best_idx / side);

    // a peak on the window border may be a larger shift cut by the window
    if bx == 0 || by == 0 || bx == side - 1 || by == side - 1 {
        return None;
    }

    let at = |x: usize, y: usize| landscape[y * side + x];

    let mut n = [[0.0f32; 3]; 3];
    for (j, row) in n.iter_mut().enumerate() {
        for (i, v) in row.iter_mut().enumerate() {
            *v = at(bx + i - 1, by + j - 1);
            if !v.is_finite() {
                return None;
            }
        }
    }

    // ambiguity: compare with the best secondary local maximum
    if best_r > 0.0 {
        if let Some(second) = second_maximum(landscape, side, bx, by) {
            if second > params.rod * best_r {
                return None;
            }
        }
    }

    let dxx = n[1][2] - 2.0 * n[1][1] + n[1][0];
    let dyy = n[2][1] - 2.0 * n[1][1] + n[0][1];
    let dxy = (n[2][2] - n[2][0] - n[0][2] + n[0][0]) / 4.0;
    let det = dxx * dyy - dxy * dxy;
    if det <= 0.0 || dxx >= 0.0 {
        return None;
    }

    let trace = dxx + dyy;
    let max_curvature = params.max_curvature;
    if trace * trace / det >= (max_curvature + 1.0) * (max_curvature + 1.0) / max_curvature {
        return None;
    }

    // quadratic sub-pixel refinement
    let gx = (n[1][2] - n[1][0]) / 2.0;
    let gy = (n[2][1] - n[0][1]) / 2.0;
    let ox = -(dyy * gx - dxy * gy) / det;
    let oy = -(dxx * gy - dxy * gx) / det;
    let (dx, dy) = if ox.abs() <= 1.0 && oy.abs() <= 1.0 {
        (ox.clamp(-0.5, 0.5), oy.clamp(-0.5, 0.5))
    } else {
        (0.0, 0.0)
    };

    Some(Peak {
        x: bx,
        y: by,
        dx,
        dy,
        r: best_r,
    })
}

fn second_maximum(landscape: &[f32], side: usize, bx: usize, by: usize) -> Option<f32> {
    let mut second: Option<f32> = None;
    for y in 0..side {
        for x in 0..side {
            if x.abs_diff(bx) <= 1 && y.abs_diff(by) <= 1 {
                continue;
            }
            let v = landscape[y * side + x];
            if !v.is_finite() {
                continue;
            }

            let is_maximum = (y.saturating_sub(1)..=(y + 1).min(side - 1)).all(|ny| {
                (x.saturating_sub(1)..=(x + 1).min(side - 1)).all(|nx| {
                    let w = landscape[ny * side + nx];
                    (nx == x && ny == y) || !w.is_finite() || v >= w
                })
            });

            if is_maximum && second.map_or(true, |s| v > s) {
                second = Some(v);
            }
        }
    }
    second
}
