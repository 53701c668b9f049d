// THEORY:
// The `proximity` module answers "how far apart are the spots?". It has two jobs:
//
// 1.  **Nearest neighbour (single frame)**: for every region centroid, find the
//     closest *other* centroid. A k-d tree is built over the frame's centroids and
//     queried for the two nearest hits per point; the first hit is normally the
//     point itself at distance 0, so the answer is the best hit that is not the
//     query point. Fewer than two regions has no answer and is reported as a
//     degenerate input rather than a silent zero.
// 2.  **Frame-to-frame matching (multi frame)**: every current centroid looks up
//     its single nearest previous centroid and is matched when that distance is
//     below a threshold, otherwise it is reported as new. The assignment is
//     greedy and not one-to-one: two current spots may both claim the same
//     previous spot, and no conflict is reported. Callers relying on a bijection
//     must resolve fan-in themselves.

use crate::core_modules::region::Centroid;
use crate::core_modules::spatial::KdTree;
use crate::error::{SpotError, SpotResult, ValidationError};
use serde::Serialize;
use tracing::{debug, error};

/// Default matching radius, in pixels, for `track_spots`.
pub const DEFAULT_TRACK_THRESHOLD: f64 = 5.0;

/// Per-region nearest neighbour, as parallel arrays in region order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearestNeighbors {
    /// Euclidean distance in pixels to the nearest other region.
    pub distances: Vec<f64>,
    /// Display id of that region.
    pub neighbor_names: Vec<String>,
    /// Index of that region in the input order.
    pub neighbor_indices: Vec<usize>,
}

/// Outcome of matching one frame's centroids against the previous frame's.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpotTracking {
    /// `(current_index, previous_index)` pairs.
    pub matched: Vec<(usize, usize)>,
    /// Current indices with no previous centroid within the threshold.
    pub new_indices: Vec<usize>,
}

/// Finds, for each centroid, its nearest other centroid.
pub fn nearest_neighbors(centroids: &[Centroid], names: &[String]) -> SpotResult<NearestNeighbors> {
    if centroids.len() != names.len() {
        error!(centroids = centroids.len(), names = names.len(), "centroid/name count mismatch");
        return Err(ValidationError::ShapeMismatch {
            expected: centroids.len(),
            actual: names.len(),
        }
        .into());
    }
    if centroids.len() < 2 {
        error!(regions = centroids.len(), "nearest neighbour needs at least two regions");
        return Err(SpotError::DegenerateInput {
            stage: "nearest neighbour",
            regions: centroids.len(),
        });
    }

    let tree = KdTree::build(centroids).ok_or_else(|| {
        SpotError::computation("nearest neighbour", "spatial index could not be built")
    })?;

    let mut distances = Vec::with_capacity(centroids.len());
    let mut neighbor_names = Vec::with_capacity(centroids.len());
    let mut neighbor_indices = Vec::with_capacity(centroids.len());

    for (i, centroid) in centroids.iter().enumerate() {
        let hits = tree.k_nearest(*centroid, 2);
        let Some(&(j, dist)) = hits.iter().find(|(j, _)| *j != i) else {
            error!(index = i, "spatial index returned no neighbour");
            return Err(SpotError::computation(
                "nearest neighbour",
                format!("no neighbour found for region {}", names[i]),
            ));
        };
        distances.push(dist);
        neighbor_names.push(names[j].clone());
        neighbor_indices.push(j);
    }

    debug!(regions = centroids.len(), "nearest neighbours computed");
    Ok(NearestNeighbors {
        distances,
        neighbor_names,
        neighbor_indices,
    })
}

/// Greedily matches current centroids to their nearest previous centroid.
///
/// With no previous centroids every current centroid is new.
pub fn track_spots(
    previous: &[Centroid],
    current: &[Centroid],
    threshold: f64,
) -> SpotResult<SpotTracking> {
    if threshold.is_nan() {
        return Err(SpotError::computation("spot tracking", "threshold is NaN"));
    }

    let Some(tree) = KdTree::build(previous) else {
        return Ok(SpotTracking {
            matched: Vec::new(),
            new_indices: (0..current.len()).collect(),
        });
    };

    let mut tracking = SpotTracking::default();
    for (i, centroid) in current.iter().enumerate() {
        match tree.nearest(*centroid) {
            Some((j, dist)) if dist < threshold => tracking.matched.push((i, j)),
            _ => tracking.new_indices.push(i),
        }
    }

    debug!(
        matched = tracking.matched.len(),
        new = tracking.new_indices.len(),
        "spots tracked"
    );
    Ok(tracking)
}
