//! Lookup-table store
//!
//! A LUT holds forward-model backscatter for a grid of surface parameters, evaluated at
//! every integer incidence angle between a start and a stop angle. Rows are grouped into
//! contiguous angle sections of equal size; row `k` of every section describes the same
//! parameter combination, so only the first section's parameters are kept.

use crate::io::properties::PropertyMap;
use crate::types::{Polarization, RetrievalError, RetrievalResult};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

/// Number of backscatter columns per LUT row (HH, VV)
pub const NUM_BACKSCATTER_COLUMNS: usize = 2;

/// Header information of a LUT (`.luthdr` file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LutMetadata {
    pub rows_per_section: usize,
    pub start_angle: i32,
    pub end_angle: i32,
}

impl LutMetadata {
    pub fn new(rows_per_section: usize, start_angle: i32, end_angle: i32) -> RetrievalResult<Self> {
        let metadata = Self {
            rows_per_section,
            start_angle,
            end_angle,
        };
        metadata.validate("<in-memory>")?;
        Ok(metadata)
    }

    /// Read `Number_of_rows_per_angle`, `Start_angle` and `Stop_angle`
    pub fn from_properties(props: &PropertyMap) -> RetrievalResult<Self> {
        let metadata = Self {
            rows_per_section: props.get_usize("Number_of_rows_per_angle")?,
            start_angle: props.get_i32("Start_angle")?,
            end_angle: props.get_i32("Stop_angle")?,
        };
        metadata.validate(props.source())?;
        Ok(metadata)
    }

    fn validate(&self, source: &str) -> RetrievalResult<()> {
        if self.end_angle < self.start_angle {
            return Err(RetrievalError::lut_format(
                source,
                format!(
                    "Start_angle = {} should be <= Stop_angle = {}",
                    self.start_angle, self.end_angle
                ),
            ));
        }
        if self.rows_per_section == 0 {
            return Err(RetrievalError::lut_format(
                source,
                "Number_of_rows_per_angle must be positive",
            ));
        }
        Ok(())
    }

    pub fn num_sections(&self) -> usize {
        (self.end_angle - self.start_angle + 1) as usize
    }

    pub fn total_rows(&self) -> usize {
        self.rows_per_section * self.num_sections()
    }

    /// Angle section of an incidence angle in degrees, `None` when out of range
    pub fn angle_section(&self, theta: f64) -> Option<AngleSection> {
        if !theta.is_finite() {
            return None;
        }
        let rounded = theta.round();
        if rounded < self.start_angle as f64 || rounded > self.end_angle as f64 {
            return None;
        }
        let index = (rounded as i64 - self.start_angle as i64) as usize;
        Some(AngleSection {
            index,
            angle: rounded as i32,
        })
    }

    /// Inclusive range of section indices overlapping `[min_theta, max_theta]`
    pub fn section_range(&self, min_theta: f64, max_theta: f64) -> Option<(usize, usize)> {
        if !min_theta.is_finite() || !max_theta.is_finite() || max_theta < min_theta {
            return None;
        }
        let lo = (min_theta.round() as i64).max(self.start_angle as i64);
        let hi = (max_theta.round() as i64).min(self.end_angle as i64);
        if lo > hi {
            return None;
        }
        let start = self.start_angle as i64;
        Some(((lo - start) as usize, (hi - start) as usize))
    }
}

/// Integer-degree incidence-angle bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AngleSection {
    /// Zero-based section index
    pub index: usize,
    /// Rounded incidence angle (degrees)
    pub angle: i32,
}

/// Storage of the LUT body, one variant per on-disk encoding
#[derive(Debug, Clone)]
enum LutBody {
    /// Raster matrix: `total_rows x (num_params + 2)`, parameters then backscatter
    Raster(Array2<f64>),
    /// Delimited text: backscatter only, `total_rows x 2`
    Delimited(Array2<f64>),
}

/// Precomputed forward-model table
#[derive(Debug, Clone)]
pub struct LutTable {
    metadata: LutMetadata,
    /// `rows_per_section x num_params`, taken from the first angle section
    params: Array2<f64>,
    body: LutBody,
}

impl LutTable {
    /// Build from a decoded raster matrix (encoding A)
    pub fn from_raster_matrix(
        metadata: LutMetadata,
        num_params: usize,
        matrix: Array2<f64>,
        source: &str,
    ) -> RetrievalResult<Self> {
        let (height, width) = matrix.dim();

        if num_params == 0 {
            return Err(RetrievalError::lut_format(source, "LUT needs at least one parameter column"));
        }

        if width != num_params + NUM_BACKSCATTER_COLUMNS {
            return Err(RetrievalError::lut_format(
                source,
                format!("LUT has wrong width = {}; expecting {}", width, num_params + NUM_BACKSCATTER_COLUMNS),
            ));
        }

        if height != metadata.total_rows() {
            return Err(RetrievalError::lut_format(
                source,
                format!("LUT has wrong height = {}; expecting it to be {}", height, metadata.total_rows()),
            ));
        }

        if let Some(((row, col), _)) = matrix.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(RetrievalError::lut_format(
                source,
                format!("non-finite value at row {}, column {} (zero-based)", row, col),
            ));
        }

        let params = matrix
            .slice(s![0..metadata.rows_per_section, 0..num_params])
            .to_owned();

        log::info!(
            "Loaded raster LUT {}: {} sections x {} rows, {} parameters",
            source,
            metadata.num_sections(),
            metadata.rows_per_section,
            num_params
        );

        Ok(Self {
            metadata,
            params,
            body: LutBody::Raster(matrix),
        })
    }

    /// Build from separately decoded parameter and backscatter blocks (encoding B)
    pub fn from_delimited_parts(
        metadata: LutMetadata,
        params: Array2<f64>,
        backscatter: Array2<f64>,
        source: &str,
    ) -> RetrievalResult<Self> {
        if params.nrows() != metadata.rows_per_section || params.ncols() == 0 {
            return Err(RetrievalError::lut_format(
                source,
                format!(
                    "parameter block is {}x{}; expecting {} rows",
                    params.nrows(),
                    params.ncols(),
                    metadata.rows_per_section
                ),
            ));
        }

        if backscatter.dim() != (metadata.total_rows(), NUM_BACKSCATTER_COLUMNS) {
            return Err(RetrievalError::lut_format(
                source,
                format!(
                    "backscatter block is {:?}; expecting ({}, {})",
                    backscatter.dim(),
                    metadata.total_rows(),
                    NUM_BACKSCATTER_COLUMNS
                ),
            ));
        }

        log::info!(
            "Loaded delimited LUT {}: {} sections x {} rows, {} parameters",
            source,
            metadata.num_sections(),
            metadata.rows_per_section,
            params.ncols()
        );

        Ok(Self {
            metadata,
            params,
            body: LutBody::Delimited(backscatter),
        })
    }

    pub fn metadata(&self) -> &LutMetadata {
        &self.metadata
    }

    pub fn rows_per_section(&self) -> usize {
        self.metadata.rows_per_section
    }

    pub fn num_sections(&self) -> usize {
        self.metadata.num_sections()
    }

    pub fn num_params(&self) -> usize {
        self.params.ncols()
    }

    pub fn angle_section(&self, theta: f64) -> Option<AngleSection> {
        self.metadata.angle_section(theta)
    }

    /// Model parameter `col` of row `row` (row relative to a section)
    pub fn param(&self, row: usize, col: usize) -> f64 {
        self.params[[row, col]]
    }

    /// All parameters of row `row`
    pub fn param_row(&self, row: usize) -> Vec<f64> {
        self.params.row(row).to_vec()
    }

    /// Backscatter (dB) of row `row` in section `section` for polarization column `pol_column`
    pub fn backscatter(&self, section: usize, row: usize, pol_column: usize) -> f64 {
        let table_row = section * self.metadata.rows_per_section + row;
        match &self.body {
            LutBody::Raster(matrix) => {
                let width = matrix.ncols();
                matrix[[table_row, width - NUM_BACKSCATTER_COLUMNS + pol_column]]
            }
            LutBody::Delimited(sigma) => sigma[[table_row, pol_column]],
        }
    }

    pub fn backscatter_pol(&self, section: usize, row: usize, pol: Polarization) -> f64 {
        self.backscatter(section, row, pol.column())
    }

    /// True when the body came from the raster encoding
    pub fn is_raster_encoded(&self) -> bool {
        matches!(self.body, LutBody::Raster(_))
    }

    /// Largest absolute differences against another LUT with identical shape
    pub fn compare(&self, other: &LutTable) -> RetrievalResult<LutComparison> {
        if self.metadata != other.metadata || self.num_params() != other.num_params() {
            return Err(RetrievalError::Processing(format!(
                "Cannot compare LUTs of different shape: {:?}/{} vs {:?}/{}",
                self.metadata,
                self.num_params(),
                other.metadata,
                other.num_params()
            )));
        }

        let mut max_param_diff = vec![0.0f64; self.num_params()];
        for row in 0..self.rows_per_section() {
            for (col, max) in max_param_diff.iter_mut().enumerate() {
                *max = max.max((self.param(row, col) - other.param(row, col)).abs());
            }
        }

        let mut max_backscatter_diff = [0.0f64; NUM_BACKSCATTER_COLUMNS];
        for section in 0..self.num_sections() {
            for row in 0..self.rows_per_section() {
                for (pol, max) in max_backscatter_diff.iter_mut().enumerate() {
                    let diff = (self.backscatter(section, row, pol) - other.backscatter(section, row, pol)).abs();
                    *max = max.max(diff);
                }
            }
        }

        log::debug!(
            "LUT comparison: params {:?}, backscatter {:?}",
            max_param_diff,
            max_backscatter_diff
        );

        Ok(LutComparison {
            max_param_diff,
            max_backscatter_diff,
        })
    }
}

/// Result of [`LutTable::compare`]
#[derive(Debug, Clone, PartialEq)]
pub struct LutComparison {
    pub max_param_diff: Vec<f64>,
    pub max_backscatter_diff: [f64; NUM_BACKSCATTER_COLUMNS],
}

impl LutComparison {
    pub fn within(&self, epsilon: f64) -> bool {
        self.max_param_diff
            .iter()
            .chain(self.max_backscatter_diff.iter())
            .all(|&d| d <= epsilon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small_metadata() -> LutMetadata {
        LutMetadata::new(2, 30, 31).unwrap()
    }

    #[test]
    fn test_angle_section_boundaries() {
        let meta = LutMetadata::new(3, 30, 32).unwrap();
        assert_eq!(meta.num_sections(), 3);
        assert!(meta.angle_section(30.0 - 0.6).is_none());
        assert!(meta.angle_section(32.0 + 0.6).is_none());
        assert_eq!(meta.angle_section(30.4).unwrap().index, 0);
        assert_eq!(meta.angle_section(31.2).unwrap().index, 1);
        assert_eq!(meta.angle_section(32.4).unwrap().angle, 32);
        assert!(meta.angle_section(f64::NAN).is_none());
    }

    #[test]
    fn test_section_range_clips_to_lut() {
        let meta = LutMetadata::new(3, 30, 32).unwrap();
        assert_eq!(meta.section_range(25.0, 31.4), Some((0, 1)));
        assert_eq!(meta.section_range(31.6, 40.0), Some((2, 2)));
        assert_eq!(meta.section_range(40.0, 45.0), None);
    }

    #[test]
    fn test_rejects_reversed_angles() {
        assert!(matches!(
            LutMetadata::new(3, 33, 32),
            Err(RetrievalError::LutFormat { .. })
        ));
    }

    #[test]
    fn test_both_encodings_agree() {
        let matrix = array![
            [1.0, 10.0, -12.0, -14.0],
            [2.0, 20.0, -8.0, -9.0],
            [1.0, 10.0, -13.0, -15.0],
            [2.0, 20.0, -9.0, -10.0],
        ];
        let raster = LutTable::from_raster_matrix(small_metadata(), 2, matrix.clone(), "m").unwrap();
        let params = matrix.slice(s![0..2, 0..2]).to_owned();
        let sigma = matrix.slice(s![.., 2..4]).to_owned();
        let delimited = LutTable::from_delimited_parts(small_metadata(), params, sigma, "c").unwrap();

        assert!(raster.is_raster_encoded());
        assert!(!delimited.is_raster_encoded());
        for section in 0..2 {
            for row in 0..2 {
                for pol in 0..2 {
                    assert_eq!(
                        raster.backscatter(section, row, pol),
                        delimited.backscatter(section, row, pol)
                    );
                }
                assert_eq!(raster.param(row, 1), delimited.param(row, 1));
            }
        }
        assert_eq!(raster.backscatter_pol(1, 0, Polarization::VV), -15.0);
        assert!(raster.compare(&delimited).unwrap().within(0.0));
    }

    #[test]
    fn test_raster_dimension_checks() {
        let too_narrow = Array2::<f64>::zeros((4, 3));
        assert!(LutTable::from_raster_matrix(small_metadata(), 2, too_narrow, "m").is_err());
        let too_short = Array2::<f64>::zeros((3, 4));
        assert!(LutTable::from_raster_matrix(small_metadata(), 2, too_short, "m").is_err());
        let mut with_nan = Array2::<f64>::zeros((4, 4));
        with_nan[[2, 1]] = f64::NAN;
        assert!(LutTable::from_raster_matrix(small_metadata(), 2, with_nan, "m").is_err());
    }
}
