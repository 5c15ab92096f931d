//! Nearest-neighbor search of observed backscatter against the LUT

use crate::core::lut::LutTable;
use crate::core::spatial_index::{SpatialIndex, SpatialIndexCache};
use serde::{Deserialize, Serialize};

/// One LUT row matched to an observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Row index within an angle section
    pub row: usize,
    /// Euclidean distance in backscatter space (dB)
    pub distance: f64,
    /// LUT parameters of the row
    pub params: Vec<f64>,
    /// LUT backscatter of the row for each matched dimension
    pub backscatter: Vec<f64>,
}

impl Candidate {
    pub fn param(&self, col: usize) -> f64 {
        self.params[col]
    }
}

/// Candidates for one pixel, nearest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborResult {
    pub candidates: Vec<Candidate>,
}

impl NeighborResult {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn closest(&self) -> Option<&Candidate> {
        self.candidates.first()
    }
}

/// Euclidean distance between two backscatter vectors
pub fn backscatter_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Up to `n` candidates from `index`, ascending distance, ties by row
///
/// A missing index, a dimension mismatch or `n == 0` yield an empty result.
pub fn search(lut: &LutTable, index: Option<&SpatialIndex>, observed: &[f64], n: usize) -> Vec<Candidate> {
    let index = match index {
        Some(index) if index.dims() == observed.len() => index,
        _ => return Vec::new(),
    };

    let hits: Vec<(usize, f64)> = if n == 1 {
        index.tree().nearest(observed).into_iter().collect()
    } else {
        index.tree().nearest_k(observed, n)
    };

    hits.into_iter()
        .map(|(row, distance)| candidate(lut, index, row, distance))
        .collect()
}

/// Reference linear scan, same ordering contract as [`search`]
pub fn linear_search(lut: &LutTable, index: &SpatialIndex, observed: &[f64], n: usize) -> Vec<Candidate> {
    if index.dims() != observed.len() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f64)> = (0..lut.rows_per_section())
        .map(|row| {
            let sigma = row_backscatter(lut, index, row);
            (row, backscatter_distance(observed, &sigma))
        })
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    scored.truncate(n);

    scored
        .into_iter()
        .map(|(row, distance)| candidate(lut, index, row, distance))
        .collect()
}

fn row_backscatter(lut: &LutTable, index: &SpatialIndex, row: usize) -> Vec<f64> {
    index
        .layout()
        .dims
        .iter()
        .map(|&(section, column)| lut.backscatter(section, row, column))
        .collect()
}

fn candidate(lut: &LutTable, index: &SpatialIndex, row: usize, distance: f64) -> Candidate {
    Candidate {
        row,
        distance,
        params: lut.param_row(row),
        backscatter: row_backscatter(lut, index, row),
    }
}

/// Search bound to one LUT and its prepared index cache
#[derive(Debug, Clone, Copy)]
pub struct NearestNeighborSearch<'a> {
    lut: &'a LutTable,
    cache: &'a SpatialIndexCache,
    num_candidates: usize,
}

impl<'a> NearestNeighborSearch<'a> {
    pub fn new(lut: &'a LutTable, cache: &'a SpatialIndexCache, num_candidates: usize) -> Self {
        Self {
            lut,
            cache,
            num_candidates,
        }
    }

    /// Candidates for an observation given the angle section of each image
    pub fn search(&self, observed: &[f64], image_sections: &[usize]) -> NeighborResult {
        let index = self.cache.get(image_sections);
        NeighborResult::new(search(self.lut, index, observed, self.num_candidates))
    }

    pub fn lut(&self) -> &'a LutTable {
        self.lut
    }
}
