//! Spatial outlier resolution for multi-candidate LUT retrievals
//!
//! The closest LUT candidate of a pixel is checked against the average retrieved RDC of
//! its `M x M` neighbourhood. When it deviates by more than the threshold, later
//! candidates are tried in distance order and the first one within the threshold wins.
//! Pixels left without an acceptable candidate are either replaced by the neighbourhood
//! average or flagged and kept.

use crate::core::neighbor_search::NeighborResult;
use crate::types::QualityCode;
use ndarray::Array2;

/// Relative deviation `|avg - value| / |avg|`
///
/// A zero average gives 0 for a matching value and infinity otherwise.
pub fn relative_deviation(avg: f64, value: f64) -> f64 {
    let diff = (avg - value).abs();
    if avg == 0.0 {
        if diff == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        diff / avg.abs()
    }
}

/// Which candidate a pixel keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Closest candidate agrees with the neighbourhood
    Closest,
    /// A later candidate agrees with the neighbourhood
    Alternate(usize),
    /// No candidate agrees with the neighbourhood
    Unresolved,
}

/// Final parameters and code for one pixel
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub params: Vec<f64>,
    pub code: QualityCode,
    /// Candidate used, `None` when the neighbourhood average was written
    pub candidate: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct OutlierResolver {
    threshold: f64,
    window_size: usize,
    filter_remaining_outliers: bool,
}

impl OutlierResolver {
    /// `window_size` is the odd neighbourhood width `M`
    pub fn new(threshold: f64, window_size: usize, filter_remaining_outliers: bool) -> Self {
        Self {
            threshold,
            window_size,
            filter_remaining_outliers,
        }
    }

    pub fn half_window(&self) -> usize {
        self.window_size / 2
    }

    /// Apply the candidate precedence rule to per-candidate deviations
    pub fn select(&self, deviations: &[f64]) -> Selection {
        let d0 = match deviations.first() {
            Some(&d0) => d0,
            None => return Selection::Unresolved,
        };

        if d0 <= self.threshold {
            return Selection::Closest;
        }

        deviations
            .iter()
            .enumerate()
            .skip(1)
            .find(|&(_, &d)| d < d0 && d <= self.threshold)
            .map_or(Selection::Unresolved, |(i, _)| Selection::Alternate(i))
    }

    /// Average of the closest-candidate parameters over the window around `(row, col)`
    ///
    /// The centre and pixels without candidates are excluded. Falls back to the pixel's
    /// own closest candidate when no neighbour qualifies; `None` when the pixel itself has
    /// no candidate.
    pub fn neighborhood_average(
        &self,
        results: &Array2<NeighborResult>,
        row: usize,
        col: usize,
    ) -> Option<Vec<f64>> {
        let own = results[[row, col]].closest()?;
        let (height, width) = results.dim();
        let half = self.half_window();

        let mut sums = vec![0.0; own.params.len()];
        let mut count = 0usize;

        let i_start = row.saturating_sub(half);
        let i_end = (row + half + 1).min(height);
        let j_start = col.saturating_sub(half);
        let j_end = (col + half + 1).min(width);

        for i in i_start..i_end {
            for j in j_start..j_end {
                if i == row && j == col {
                    continue;
                }
                if let Some(neighbor) = results[[i, j]].closest() {
                    for (sum, value) in sums.iter_mut().zip(&neighbor.params) {
                        *sum += value;
                    }
                    count += 1;
                }
            }
        }

        if count == 0 {
            return Some(own.params.clone());
        }

        Some(sums.into_iter().map(|s| s / count as f64).collect())
    }

    /// Resolve the pixel at `(row, col)`; `value_col` is the parameter checked for consistency
    pub fn resolve(
        &self,
        results: &Array2<NeighborResult>,
        row: usize,
        col: usize,
        value_col: usize,
    ) -> Option<Resolution> {
        let average = self.neighborhood_average(results, row, col)?;
        let candidates = &results[[row, col]].candidates;
        let avg_value = average[value_col];

        let deviations: Vec<f64> = candidates
            .iter()
            .map(|c| relative_deviation(avg_value, c.param(value_col)))
            .collect();

        let resolution = match self.select(&deviations) {
            Selection::Closest => Resolution {
                params: candidates[0].params.clone(),
                code: QualityCode::Ok,
                candidate: Some(0),
            },
            Selection::Alternate(i) => Resolution {
                params: candidates[i].params.clone(),
                code: QualityCode::OutlierReplacedByAlternate,
                candidate: Some(i),
            },
            Selection::Unresolved if self.filter_remaining_outliers => Resolution {
                params: average,
                code: QualityCode::OutlierReplacedByNeighborAverage,
                candidate: None,
            },
            Selection::Unresolved => Resolution {
                params: candidates[0].params.clone(),
                code: QualityCode::OutlierAccepted,
                candidate: Some(0),
            },
        };

        Some(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::neighbor_search::Candidate;
    use approx::assert_relative_eq;

    fn cand(rms: f64, rdc: f64) -> Candidate {
        Candidate {
            row: 0,
            distance: 0.0,
            params: vec![rms, rdc],
            backscatter: vec![],
        }
    }

    fn grid(center: Vec<Candidate>, neighbor_rdc: f64) -> Array2<NeighborResult> {
        let mut results = Array2::from_elem(
            (3, 3),
            NeighborResult::new(vec![cand(1.0, neighbor_rdc)]),
        );
        results[[1, 1]] = NeighborResult::new(center);
        results
    }

    #[test]
    fn test_first_improving_candidate_wins() {
        let resolver = OutlierResolver::new(0.5, 3, true);
        assert_eq!(resolver.select(&[0.8, 0.3, 0.6]), Selection::Alternate(1));
        assert_eq!(resolver.select(&[0.8, 0.45, 0.1]), Selection::Alternate(1));
        assert_eq!(resolver.select(&[0.2, 0.0]), Selection::Closest);
        assert_eq!(resolver.select(&[0.8, 0.9, 0.7]), Selection::Unresolved);
        assert_eq!(resolver.select(&[]), Selection::Unresolved);
    }

    #[test]
    fn test_deviation_with_zero_average() {
        assert_eq!(relative_deviation(0.0, 0.0), 0.0);
        assert!(relative_deviation(0.0, 1.0).is_infinite());
        assert_relative_eq!(relative_deviation(10.0, 15.0), 0.5);
        assert_relative_eq!(relative_deviation(-10.0, -5.0), 0.5);
    }

    #[test]
    fn test_alternate_candidate_replaces_outlier() {
        let resolver = OutlierResolver::new(0.5, 3, true);
        let results = grid(vec![cand(1.0, 30.0), cand(1.5, 12.0), cand(2.0, 11.0)], 10.0);
        let res = resolver.resolve(&results, 1, 1, 1).unwrap();
        assert_eq!(res.code, QualityCode::OutlierReplacedByAlternate);
        assert_eq!(res.candidate, Some(1));
        assert_eq!(res.params, vec![1.5, 12.0]);
    }

    #[test]
    fn test_remaining_outlier_uses_average_or_is_flagged() {
        let results = grid(vec![cand(3.0, 30.0), cand(3.0, 25.0)], 10.0);

        let filtering = OutlierResolver::new(0.5, 3, true);
        let res = filtering.resolve(&results, 1, 1, 1).unwrap();
        assert_eq!(res.code, QualityCode::OutlierReplacedByNeighborAverage);
        assert_eq!(res.candidate, None);
        assert_relative_eq!(res.params[1], 10.0);
        assert_relative_eq!(res.params[0], 1.0);

        let flagging = OutlierResolver::new(0.5, 3, false);
        let res = flagging.resolve(&results, 1, 1, 1).unwrap();
        assert_eq!(res.code, QualityCode::OutlierAccepted);
        assert_eq!(res.params, vec![3.0, 30.0]);
    }

    #[test]
    fn test_isolated_pixel_averages_itself() {
        let resolver = OutlierResolver::new(0.5, 5, true);
        let mut results = Array2::from_elem((3, 3), NeighborResult::default());
        results[[0, 2]] = NeighborResult::new(vec![cand(1.0, 40.0), cand(1.0, 5.0)]);
        let res = resolver.resolve(&results, 0, 2, 1).unwrap();
        assert_eq!(res.code, QualityCode::Ok);
        assert_eq!(res.params, vec![1.0, 40.0]);
        assert!(resolver.resolve(&results, 1, 1, 1).is_none());
    }

    #[test]
    fn test_window_clipped_at_edges() {
        let resolver = OutlierResolver::new(0.5, 3, true);
        let mut results = Array2::from_elem((4, 4), NeighborResult::new(vec![cand(1.0, 20.0)]));
        results[[0, 1]] = NeighborResult::new(vec![cand(1.0, 8.0)]);
        let avg = resolver.neighborhood_average(&results, 0, 0).unwrap();
        // neighbours (0,1), (1,0), (1,1)
        assert_relative_eq!(avg[1], (8.0 + 20.0 + 20.0) / 3.0);
    }
}
