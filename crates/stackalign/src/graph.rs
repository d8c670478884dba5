use std::path::PathBuf;

use stackalign_io::CorrespondenceStore;
use stackalign_models::tile::TileConfiguration;
use stackalign_models::Model;

use crate::error::AlignError;
use crate::extract::tile_id;

/// Index pairs `(i, i + k)` for `k` in `1..=n_adjacent` and `i + k < n`.
///
/// # Example
///
/// ```
/// use stackalign::graph::adjacent_pairs;
///
/// assert_eq!(adjacent_pairs(4, 2), vec![(0, 1), (0, 2), (1, 2), (1, 3), (2, 3)]);
/// ```
pub fn adjacent_pairs(n: usize, n_adjacent: usize) -> Vec<(usize, usize)> {
    (0..n)
        .flat_map(|i| (1..=n_adjacent).map(move |k| (i, i + k)))
        .filter(|&(_, j)| j < n)
        .collect()
}

/// Path pairs of [`adjacent_pairs`].
pub fn adjacent_path_pairs(paths: &[PathBuf], n_adjacent: usize) -> Vec<(PathBuf, PathBuf)> {
    adjacent_pairs(paths.len(), n_adjacent)
        .into_iter()
        .map(|(i, j)| (paths[i].clone(), paths[j].clone()))
        .collect()
}

/// Build the tile graph of a section series from persisted correspondences.
///
/// One tile per path, in order, connected to each of its `n_adjacent`
/// successors whose correspondence set exists for `fingerprint`. Missing or
/// unreadable sets leave the pair unconnected.
pub fn build_tile_configuration<M: Model<2>>(
    paths: &[PathBuf],
    n_adjacent: usize,
    store: &CorrespondenceStore,
    fingerprint: &str,
) -> Result<TileConfiguration<M, 2>, AlignError> {
    let ids = paths.iter().map(|p| tile_id(p)).collect::<Vec<_>>();
    let mut tc = TileConfiguration::<M, 2>::new(paths.len());

    for (i, j) in adjacent_pairs(paths.len(), n_adjacent) {
        let set = match store.load::<2>(&ids[i], &ids[j], fingerprint) {
            Ok(Some(set)) => set,
            Ok(None) => {
                log::warn!("no correspondences between {} and {}", ids[i], ids[j]);
                continue;
            }
            Err(e) => {
                log::warn!(
                    "unreadable correspondences between {} and {}: {}",
                    ids[i],
                    ids[j],
                    e
                );
                continue;
            }
        };

        log::debug!(
            "connecting {} and {} with {} {} matches",
            ids[i],
            ids[j],
            set.len(),
            set.method
        );
        tc.connect(i, j, set.matches)?;
    }

    Ok(tc)
}
