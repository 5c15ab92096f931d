//! Spatial index cache
//!
//! One KD-tree per combination of (angle section, polarization column) per matched
//! dimension. Every combination the scene can produce is built up front; lookups never
//! build, they only read.

use crate::core::kdtree::KdTree;
use crate::core::lut::LutTable;
use crate::types::{Polarization, RetrievalError, RetrievalResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Backscatter combination an inversion matches against the LUT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalMode {
    /// One image, HH and VV at the same incidence angle
    MultiPolarization,
    /// Two images at different angles, one polarization taken from each
    MultiAngle {
        first: Polarization,
        second: Polarization,
    },
    /// Two images at different angles, both polarizations from each
    Hybrid,
}

impl RetrievalMode {
    /// Number of input images
    pub fn num_images(&self) -> usize {
        match self {
            RetrievalMode::MultiPolarization => 1,
            RetrievalMode::MultiAngle { .. } | RetrievalMode::Hybrid => 2,
        }
    }

    /// Dimension of the matched backscatter vector
    pub fn dims(&self) -> usize {
        match self {
            RetrievalMode::MultiPolarization | RetrievalMode::MultiAngle { .. } => 2,
            RetrievalMode::Hybrid => 4,
        }
    }

    /// Names of the LUT parameter columns, in column order
    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            RetrievalMode::MultiPolarization | RetrievalMode::MultiAngle { .. } => &["rms", "rdc"],
            RetrievalMode::Hybrid => &["rms", "cl", "rdc"],
        }
    }

    pub fn num_params(&self) -> usize {
        self.param_names().len()
    }

    /// Column of the real dielectric constant (always the last parameter)
    pub fn rdc_column(&self) -> usize {
        self.num_params() - 1
    }

    /// `(image, polarization)` feeding each dimension of the observation vector
    pub fn observation_layout(&self) -> Vec<(usize, Polarization)> {
        match *self {
            RetrievalMode::MultiPolarization => {
                vec![(0, Polarization::HH), (0, Polarization::VV)]
            }
            RetrievalMode::MultiAngle { first, second } => vec![(0, first), (1, second)],
            RetrievalMode::Hybrid => vec![
                (0, Polarization::HH),
                (0, Polarization::VV),
                (1, Polarization::HH),
                (1, Polarization::VV),
            ],
        }
    }

    /// Polarizations each image has to provide
    pub fn required_polarizations(&self, image: usize) -> Vec<Polarization> {
        let mut pols: Vec<Polarization> = self
            .observation_layout()
            .into_iter()
            .filter(|(img, _)| *img == image)
            .map(|(_, pol)| pol)
            .collect();
        pols.dedup();
        pols
    }

    /// Per-dimension (section, polarization column) for per-image sections
    pub fn index_layout(&self, image_sections: &[usize]) -> IndexLayout {
        IndexLayout {
            dims: self
                .observation_layout()
                .into_iter()
                .map(|(img, pol)| (image_sections[img], pol.column()))
                .collect(),
        }
    }

    /// Map key of the index serving `image_sections`
    ///
    /// Injective over section indices in `0..num_sections` and the polarization columns
    /// this mode uses.
    pub fn index_key(&self, image_sections: &[usize], num_sections: usize) -> u64 {
        let n = num_sections as u64;
        match *self {
            RetrievalMode::MultiPolarization => image_sections[0] as u64,
            RetrievalMode::MultiAngle { first, second } => {
                let pair = image_sections[0] as u64 * n + image_sections[1] as u64;
                (pair * 2 + first.column() as u64) * 2 + second.column() as u64
            }
            RetrievalMode::Hybrid => image_sections[0] as u64 * n + image_sections[1] as u64,
        }
    }
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalMode::MultiPolarization => write!(f, "multi-polarization"),
            RetrievalMode::MultiAngle { first, second } => {
                write!(f, "multi-angle ({}/{})", first, second)
            }
            RetrievalMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Section and polarization column of every matched dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLayout {
    pub dims: Vec<(usize, usize)>,
}

/// Read-only KD-tree over one section/column combination
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    layout: IndexLayout,
    tree: KdTree,
}

impl SpatialIndex {
    /// Build over all `rows_per_section` rows of the LUT
    pub fn build(lut: &LutTable, layout: IndexLayout) -> Self {
        let dims = layout.dims.len();
        let rows = lut.rows_per_section();
        let mut points = Vec::with_capacity(rows * dims);
        for row in 0..rows {
            for &(section, column) in &layout.dims {
                points.push(lut.backscatter(section, row, column));
            }
        }

        Self {
            tree: KdTree::build(&points, dims),
            layout,
        }
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    pub fn tree(&self) -> &KdTree {
        &self.tree
    }

    pub fn dims(&self) -> usize {
        self.layout.dims.len()
    }
}

/// Inclusive range of angle sections an image can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRange {
    pub first: usize,
    pub last: usize,
}

impl SectionRange {
    pub fn new(first: usize, last: usize) -> Self {
        Self { first, last }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> {
        self.first..=self.last
    }
}

/// All spatial indices of one processing run
#[derive(Debug, Clone)]
pub struct SpatialIndexCache {
    mode: RetrievalMode,
    num_sections: usize,
    indices: BTreeMap<u64, SpatialIndex>,
}

impl SpatialIndexCache {
    /// Build one index per reachable section combination
    pub fn build(
        lut: &LutTable,
        mode: RetrievalMode,
        ranges: &[SectionRange],
    ) -> RetrievalResult<Self> {
        if ranges.len() != mode.num_images() {
            return Err(RetrievalError::Processing(format!(
                "{} retrieval needs {} section ranges, got {}",
                mode,
                mode.num_images(),
                ranges.len()
            )));
        }

        let num_sections = lut.num_sections();
        if let Some(bad) = ranges
            .iter()
            .find(|r| r.first > r.last || r.last >= num_sections)
        {
            return Err(RetrievalError::Processing(format!(
                "Section range {:?} outside LUT sections 0..{}",
                bad, num_sections
            )));
        }

        let mut indices = BTreeMap::new();
        for combination in combinations(ranges) {
            let key = mode.index_key(&combination, num_sections);
            let layout = mode.index_layout(&combination);
            log::debug!("Building spatial index {} for sections {:?}", key, combination);
            indices.insert(key, SpatialIndex::build(lut, layout));
        }

        log::info!(
            "Built {} spatial indices for {} retrieval ({} rows each)",
            indices.len(),
            mode,
            lut.rows_per_section()
        );

        Ok(Self {
            mode,
            num_sections,
            indices,
        })
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Index serving `image_sections`; `None` when it was never built
    pub fn get(&self, image_sections: &[usize]) -> Option<&SpatialIndex> {
        let key = self.key(image_sections)?;
        let index = self.indices.get(&key);
        if index.is_none() {
            log::debug!("No spatial index for sections {:?} (key {})", image_sections, key);
        }
        index
    }

    pub fn contains(&self, image_sections: &[usize]) -> bool {
        self.key(image_sections)
            .map_or(false, |key| self.indices.contains_key(&key))
    }

    fn key(&self, image_sections: &[usize]) -> Option<u64> {
        if image_sections.len() != self.mode.num_images()
            || image_sections.iter().any(|&s| s >= self.num_sections)
        {
            return None;
        }
        Some(self.mode.index_key(image_sections, self.num_sections))
    }
}

/// Cartesian product of the per-image section ranges
fn combinations(ranges: &[SectionRange]) -> Vec<Vec<usize>> {
    let mut result: Vec<Vec<usize>> = vec![Vec::new()];
    for range in ranges {
        let mut next = Vec::new();
        for prefix in &result {
            for section in range.iter() {
                let mut combo = prefix.clone();
                combo.push(section);
                next.push(combo);
            }
        }
        result = next;
    }
    result
}
