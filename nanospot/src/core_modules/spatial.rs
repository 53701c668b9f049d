//! A 2-D k-d tree over region centroids.
//!
//! Built once per frame and queried once per centroid, which is the access
//! pattern of the nearest-neighbour and frame-to-frame matching passes.

use crate::core_modules::region::Centroid;

#[derive(Debug)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    points: Vec<Centroid>,
}

#[derive(Debug, Clone)]
struct KdNode {
    /// Index into the points array
    point_idx: usize,
    left: Option<usize>,
    right: Option<usize>,
    /// 0 splits on row, 1 splits on col
    split_dim: usize,
}

impl KdTree {
    /// Builds a balanced tree using median splits. Returns `None` for no points.
    pub fn build(points: &[Centroid]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let points_vec = points.to_vec();
        let mut indices: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::with_capacity(points.len());
        Self::build_recursive(&points_vec, &mut indices, 0, &mut nodes);

        Some(Self {
            nodes,
            points: points_vec,
        })
    }

    fn build_recursive(
        points: &[Centroid],
        indices: &mut [usize],
        depth: usize,
        nodes: &mut Vec<KdNode>,
    ) -> Option<usize> {
        if indices.is_empty() {
            return None;
        }

        let split_dim = depth % 2;
        indices.sort_by(|&a, &b| axis(&points[a], split_dim).total_cmp(&axis(&points[b], split_dim)));

        let median = indices.len() / 2;
        let node_idx = nodes.len();
        nodes.push(KdNode {
            point_idx: indices[median],
            left: None,
            right: None,
            split_dim,
        });

        let (left_indices, right_part) = indices.split_at_mut(median);
        let right_indices = &mut right_part[1..];

        let left = Self::build_recursive(points, left_indices, depth + 1, nodes);
        let right = Self::build_recursive(points, right_indices, depth + 1, nodes);
        nodes[node_idx].left = left;
        nodes[node_idx].right = right;

        Some(node_idx)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Finds the `k` nearest points to `query`.
    ///
    /// Returns `(index, distance)` pairs sorted by distance; ties are broken by
    /// the lower index.
    pub fn k_nearest(&self, query: Centroid, k: usize) -> Vec<(usize, f64)> {
        if self.nodes.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut best = BoundedBest::new(k);
        self.k_nearest_recursive(0, query, &mut best);
        best.into_sorted()
            .into_iter()
            .map(|(idx, dist_sq)| (idx, dist_sq.sqrt()))
            .collect()
    }

    /// The single nearest point to `query`.
    pub fn nearest(&self, query: Centroid) -> Option<(usize, f64)> {
        self.k_nearest(query, 1).into_iter().next()
    }

    fn k_nearest_recursive(&self, node_idx: usize, query: Centroid, best: &mut BoundedBest) {
        let node = &self.nodes[node_idx];
        let point = self.points[node.point_idx];
        best.offer(node.point_idx, distance_squared(&query, &point));

        let diff = axis(&query, node.split_dim) - axis(&point, node.split_dim);
        let (first, second) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(first_idx) = first {
            self.k_nearest_recursive(first_idx, query, best);
        }

        // The far side can only help if the splitting plane is within reach.
        if let Some(second_idx) = second {
            if !best.is_full() || diff * diff <= best.worst() {
                self.k_nearest_recursive(second_idx, query, best);
            }
        }
    }
}

fn axis(point: &Centroid, dim: usize) -> f64 {
    if dim == 0 { point.row } else { point.col }
}

fn distance_squared(a: &Centroid, b: &Centroid) -> f64 {
    (a.row - b.row).powi(2) + (a.col - b.col).powi(2)
}

/// Keeps the `k` best `(index, distance_squared)` candidates seen so far.
struct BoundedBest {
    k: usize,
    items: Vec<(usize, f64)>,
}

impl BoundedBest {
    fn new(k: usize) -> Self {
        Self {
            k,
            items: Vec::with_capacity(k + 1),
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.k
    }

    fn worst(&self) -> f64 {
        self.items.last().map_or(f64::INFINITY, |&(_, d)| d)
    }

    fn offer(&mut self, idx: usize, dist_sq: f64) {
        let pos = self
            .items
            .partition_point(|&(i, d)| d < dist_sq || (d == dist_sq && i < idx));
        if pos >= self.k {
            return;
        }
        self.items.insert(pos, (idx, dist_sq));
        self.items.truncate(self.k);
    }

    fn into_sorted(self) -> Vec<(usize, f64)> {
        self.items
    }
}
