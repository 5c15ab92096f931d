//! Static KD-tree over LUT backscatter vectors
//!
//! Points are stored in a left-complete (Eytzinger) layout: the children of node `i`
//! live at `2i+1` and `2i+2`. The tree is built once and never mutated.
//!
//! Neighbors are ordered by `(distance, row)`, so equal distances always resolve to the
//! lower table row, independent of tree shape.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap entry ordered by squared distance, then by row
#[derive(Debug, Clone, Copy)]
struct RowDistance {
    row: usize,
    dist_sq: f64,
}

impl RowDistance {
    fn key_cmp(&self, other: &Self) -> Ordering {
        self.dist_sq
            .total_cmp(&other.dist_sq)
            .then(self.row.cmp(&other.row))
    }
}

impl PartialEq for RowDistance {
    fn eq(&self, other: &Self) -> bool {
        self.key_cmp(other) == Ordering::Equal
    }
}
impl Eq for RowDistance {}

impl PartialOrd for RowDistance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for RowDistance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key_cmp(other)
    }
}

/// KD-tree over `len()` points of dimension `dims()`
#[derive(Debug, Clone)]
pub struct KdTree {
    /// Table row stored at each Eytzinger node
    rows: Vec<usize>,
    /// Point coordinates permuted to node order
    points: Vec<f64>,
    dims: usize,
}

impl KdTree {
    /// Build from a flattened row-major point array (`n * dims` values)
    pub fn build(points: &[f64], dims: usize) -> Self {
        let dims = dims.max(1);
        let n = points.len() / dims;
        let mut order: Vec<usize> = (0..n).collect();
        let mut rows = vec![0usize; n];
        let mut permuted = vec![0.0; n * dims];

        Self::build_recursive(points, dims, &mut order, 0, &mut rows, &mut permuted, 0);

        Self {
            rows,
            points: permuted,
            dims,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Up to `k` nearest rows as `(row, euclidean distance)`, ascending
    pub fn nearest_k(&self, query: &[f64], k: usize) -> Vec<(usize, f64)> {
        if k == 0 || self.is_empty() || query.len() != self.dims {
            return Vec::new();
        }

        let mut heap: BinaryHeap<RowDistance> = BinaryHeap::with_capacity(k + 1);
        // (node, axis, lower bound of squared distance to the node's region)
        let mut stack: Vec<(usize, usize, f64)> = Vec::with_capacity(64);
        stack.push((0, 0, 0.0));

        while let Some((node, axis, bound)) = stack.pop() {
            if heap.len() == k {
                if let Some(worst) = heap.peek() {
                    if bound > worst.dist_sq {
                        continue;
                    }
                }
            }

            let point = self.point(node);
            let candidate = RowDistance {
                row: self.rows[node],
                dist_sq: squared_distance(query, point),
            };

            if heap.len() < k {
                heap.push(candidate);
            } else if let Some(mut worst) = heap.peek_mut() {
                if candidate < *worst {
                    *worst = candidate;
                }
            }

            let left = 2 * node + 1;
            if left >= self.rows.len() {
                continue;
            }
            let right = left + 1;
            let has_right = right < self.rows.len();
            let next_axis = if axis + 1 == self.dims { 0 } else { axis + 1 };

            let diff = query[axis] - point[axis];
            let plane_sq = diff * diff;

            let (near, far) = if diff <= 0.0 { (left, right) } else { (right, left) };
            let near_exists = near == left || has_right;
            let far_exists = far == left || has_right;

            // Far side first so the near side is popped first
            if far_exists {
                stack.push((far, next_axis, bound.max(plane_sq)));
            }
            if near_exists {
                stack.push((near, next_axis, bound));
            }
        }

        let mut found = heap.into_vec();
        found.sort();
        found
            .into_iter()
            .map(|rd| (rd.row, rd.dist_sq.sqrt()))
            .collect()
    }

    /// Single nearest row
    pub fn nearest(&self, query: &[f64]) -> Option<(usize, f64)> {
        if self.is_empty() || query.len() != self.dims {
            return None;
        }

        let mut best = RowDistance {
            row: usize::MAX,
            dist_sq: f64::INFINITY,
        };
        self.nearest_recursive(query, 0, 0, &mut best);

        if best.row == usize::MAX {
            None
        } else {
            Some((best.row, best.dist_sq.sqrt()))
        }
    }

    fn nearest_recursive(&self, query: &[f64], node: usize, axis: usize, best: &mut RowDistance) {
        if node >= self.rows.len() {
            return;
        }

        let point = self.point(node);
        let candidate = RowDistance {
            row: self.rows[node],
            dist_sq: squared_distance(query, point),
        };
        if candidate < *best {
            *best = candidate;
        }

        let next_axis = if axis + 1 == self.dims { 0 } else { axis + 1 };
        let diff = query[axis] - point[axis];
        let (near, far) = if diff <= 0.0 {
            (2 * node + 1, 2 * node + 2)
        } else {
            (2 * node + 2, 2 * node + 1)
        };

        self.nearest_recursive(query, near, next_axis, best);
        if diff * diff <= best.dist_sq {
            self.nearest_recursive(query, far, next_axis, best);
        }
    }

    fn point(&self, node: usize) -> &[f64] {
        let offset = node * self.dims;
        &self.points[offset..offset + self.dims]
    }

    fn build_recursive(
        points: &[f64],
        dims: usize,
        order: &mut [usize],
        depth: usize,
        rows: &mut [usize],
        permuted: &mut [f64],
        node: usize,
    ) {
        if order.is_empty() {
            return;
        }

        let axis = depth % dims;
        let median = left_subtree_size(order.len());

        order.select_nth_unstable_by(median, |&a, &b| {
            points[a * dims + axis]
                .total_cmp(&points[b * dims + axis])
                .then(a.cmp(&b))
        });

        let row = order[median];
        rows[node] = row;
        permuted[node * dims..(node + 1) * dims]
            .copy_from_slice(&points[row * dims..(row + 1) * dims]);

        let (left, rest) = order.split_at_mut(median);
        let right = &mut rest[1..];

        Self::build_recursive(points, dims, left, depth + 1, rows, permuted, 2 * node + 1);
        Self::build_recursive(points, dims, right, depth + 1, rows, permuted, 2 * node + 2);
    }
}

/// Nodes in the left subtree of a left-complete binary tree with `n` nodes
fn left_subtree_size(n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let height = (usize::BITS - n.leading_zeros() - 1) as usize;
    let last_level_capacity = 1usize << height;
    let last_level_count = n - (last_level_capacity - 1);
    (last_level_capacity / 2 - 1) + last_level_count.min(last_level_capacity / 2)
}

#[inline]
fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force(points: &[f64], dims: usize, query: &[f64], k: usize) -> Vec<(usize, f64)> {
        let mut all: Vec<(usize, f64)> = points
            .chunks(dims)
            .enumerate()
            .map(|(row, p)| (row, squared_distance(query, p)))
            .collect();
        all.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        all.truncate(k);
        all.into_iter().map(|(r, d)| (r, d.sqrt())).collect()
    }

    /// Deterministic pseudo-random coordinates on a coarse grid (forces ties)
    fn grid_points(n: usize, dims: usize) -> Vec<f64> {
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        (0..n * dims)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                -25.0 + (state % 40) as f64 * 0.5
            })
            .collect()
    }

    #[test]
    fn test_left_subtree_size() {
        assert_eq!(left_subtree_size(1), 0);
        assert_eq!(left_subtree_size(2), 1);
        assert_eq!(left_subtree_size(3), 1);
        assert_eq!(left_subtree_size(6), 3);
        assert_eq!(left_subtree_size(7), 3);
    }

    #[test]
    fn test_matches_brute_force_with_ties() {
        for &dims in &[2usize, 4] {
            let points = grid_points(500, dims);
            let tree = KdTree::build(&points, dims);
            assert_eq!(tree.len(), 500);

            let queries = grid_points(40, dims);
            for query in queries.chunks(dims) {
                for &k in &[1usize, 3, 7] {
                    let expected = brute_force(&points, dims, query, k);
                    let actual = tree.nearest_k(query, k);
                    assert_eq!(actual.len(), expected.len());
                    for (a, e) in actual.iter().zip(&expected) {
                        assert_eq!(a.0, e.0);
                        assert!((a.1 - e.1).abs() < 1e-12);
                    }
                }
                let single = tree.nearest(query).unwrap();
                assert_eq!(single.0, brute_force(&points, dims, query, 1)[0].0);
            }
        }
    }

    #[test]
    fn test_duplicate_points_keep_row_order() {
        let points = vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let tree = KdTree::build(&points, 2);
        let found = tree.nearest_k(&[1.0, 1.0], 3);
        let rows: Vec<usize> = found.iter().map(|f| f.0).collect();
        assert_eq!(rows, vec![0, 2, 3]);
        assert_eq!(tree.nearest(&[1.0, 1.0]).unwrap().0, 0);
    }

    #[test]
    fn test_empty_and_mismatched_queries() {
        let tree = KdTree::build(&[], 2);
        assert!(tree.is_empty());
        assert!(tree.nearest_k(&[0.0, 0.0], 3).is_empty());
        assert!(tree.nearest(&[0.0, 0.0]).is_none());

        let tree = KdTree::build(&[0.0, 0.0], 2);
        assert!(tree.nearest_k(&[0.0], 1).is_empty());
        assert_eq!(tree.nearest_k(&[0.0, 0.0], 5).len(), 1);
    }
}
