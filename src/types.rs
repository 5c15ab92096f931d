use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Value written to every output raster when a pixel could not be retrieved
pub const INVALID_OUTPUT_VALUE: f64 = -999.0;

/// Smallest linear backscatter accepted before conversion to decibels
pub const UNDERFLOW_FLOOR: f64 = 1.0e-30;

/// Real-valued raster tile (rows x cols)
pub type RealImage = Array2<f64>;

/// Per-pixel quality/outlier codes
pub type QualityImage = Array2<i8>;

/// Polarizations carried by the LUT backscatter columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    HH,
    VV,
}

impl Polarization {
    /// Zero-based backscatter column inside a LUT row (HH first, then VV)
    pub fn column(self) -> usize {
        match self {
            Polarization::HH => 0,
            Polarization::VV => 1,
        }
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::HH => write!(f, "HH"),
            Polarization::VV => write!(f, "VV"),
        }
    }
}

/// Outcome attached to every emitted pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityCode {
    /// Retrieved without any correction
    Ok,
    /// Closest candidate kept although it deviates from its neighbourhood
    OutlierAccepted,
    /// A farther candidate agreeing with the neighbourhood was used
    OutlierReplacedByAlternate,
    /// Neighbourhood average written in place of any candidate
    OutlierReplacedByNeighborAverage,
    /// Missing or invalid observation (backscatter, RDC, incidence angle)
    NoObservation,
    /// Missing or invalid auxiliary input (soil texture, temperature)
    NoAuxiliaryData,
    /// Scalar inversion hit an iteration/evaluation cap or failed numerically
    NotConverged,
    /// Incidence angle rounds outside the LUT angle sections
    AngleOutOfRange,
}

impl QualityCode {
    /// Integer encoding written to the quality raster
    pub fn as_i8(self) -> i8 {
        match self {
            QualityCode::Ok => 0,
            QualityCode::OutlierReplacedByAlternate => 1,
            QualityCode::OutlierReplacedByNeighborAverage => 2,
            QualityCode::OutlierAccepted => 3,
            QualityCode::NoObservation => -1,
            QualityCode::NoAuxiliaryData => -2,
            QualityCode::NotConverged => -3,
            QualityCode::AngleOutOfRange => -4,
        }
    }

    pub fn from_i8(code: i8) -> Option<Self> {
        match code {
            0 => Some(QualityCode::Ok),
            1 => Some(QualityCode::OutlierReplacedByAlternate),
            2 => Some(QualityCode::OutlierReplacedByNeighborAverage),
            3 => Some(QualityCode::OutlierAccepted),
            -1 => Some(QualityCode::NoObservation),
            -2 => Some(QualityCode::NoAuxiliaryData),
            -3 => Some(QualityCode::NotConverged),
            -4 => Some(QualityCode::AngleOutOfRange),
            _ => None,
        }
    }

    /// True when the emitted value is a real retrieval rather than the sentinel
    pub fn has_value(self) -> bool {
        self.as_i8() >= 0
    }
}

/// Unit a backscatter band is stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackscatterUnit {
    Linear,
    Decibels,
}

impl BackscatterUnit {
    /// Interpret a band unit string. No unit means linear power.
    pub fn from_unit_str(unit: Option<&str>) -> Self {
        match unit {
            Some(u) => {
                let lower = u.to_lowercase();
                if lower.contains("db") || lower.contains("decibel") {
                    BackscatterUnit::Decibels
                } else {
                    BackscatterUnit::Linear
                }
            }
            None => BackscatterUnit::Linear,
        }
    }
}

/// Convert linear power to decibels with an underflow floor
pub fn to_decibels(sigma: f64) -> f64 {
    10.0 * sigma.max(UNDERFLOW_FLOOR).log10()
}

/// Read-only view of one input raster plus its declared no-data value
#[derive(Debug, Clone, Copy)]
pub struct BandView<'a> {
    pub data: ArrayView2<'a, f64>,
    pub no_data: Option<f64>,
    pub unit: BackscatterUnit,
}

impl<'a> BandView<'a> {
    pub fn new(data: ArrayView2<'a, f64>, no_data: Option<f64>) -> Self {
        Self {
            data,
            no_data,
            unit: BackscatterUnit::Linear,
        }
    }

    pub fn with_unit(mut self, unit: BackscatterUnit) -> Self {
        self.unit = unit;
        self
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Finite and different from the no-data sentinel
    pub fn is_valid(&self, value: f64) -> bool {
        value.is_finite() && self.no_data.map_or(true, |nd| value != nd)
    }

    /// Pixel value when valid
    pub fn valid_at(&self, row: usize, col: usize) -> Option<f64> {
        let value = self.data[[row, col]];
        if self.is_valid(value) {
            Some(value)
        } else {
            None
        }
    }

    /// Pixel value converted to decibels when valid
    pub fn decibels_at(&self, row: usize, col: usize) -> Option<f64> {
        self.valid_at(row, col).map(|v| match self.unit {
            BackscatterUnit::Decibels => v,
            BackscatterUnit::Linear => to_decibels(v),
        })
    }

    /// Minimum and maximum of all valid values
    pub fn valid_min_max(&self) -> Option<(f64, f64)> {
        let mut range: Option<(f64, f64)> = None;
        for &v in self.data.iter() {
            if !self.is_valid(v) {
                continue;
            }
            range = Some(match range {
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
                None => (v, v),
            });
        }
        range
    }
}

/// Rectangular raster region in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRect {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
}

impl TileRect {
    pub fn new(x0: usize, y0: usize, width: usize, height: usize) -> Self {
        Self { x0, y0, width, height }
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x0 && x < self.x0 + self.width && y >= self.y0 && y < self.y0 + self.height
    }

    /// Grow the tile by `margin` on every side, clipped to a raster of `raster_dims` (rows, cols)
    pub fn extended(&self, margin: usize, raster_dims: (usize, usize)) -> TileRect {
        let (rows, cols) = raster_dims;
        let (x0, width) = extend_axis(self.x0, self.width, margin, cols);
        let (y0, height) = extend_axis(self.y0, self.height, margin, rows);
        TileRect { x0, y0, width, height }
    }
}

fn extend_axis(start: usize, len: usize, margin: usize, limit: usize) -> (usize, usize) {
    let new_start = start.saturating_sub(margin);
    let new_end = (start + len + margin).min(limit);
    (new_start, new_end.saturating_sub(new_start))
}

/// Split a raster of `dims` (rows, cols) into tiles no larger than `tile_size` square
pub fn tile_grid(dims: (usize, usize), tile_size: usize) -> Vec<TileRect> {
    let (rows, cols) = dims;
    let step = tile_size.max(1);
    let mut tiles = Vec::new();
    for y0 in (0..rows).step_by(step) {
        let h = step.min(rows - y0);
        for x0 in (0..cols).step_by(step) {
            let w = step.min(cols - x0);
            tiles.push(TileRect::new(x0, y0, w, h));
        }
    }
    tiles
}

/// Error types for retrieval
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LUT format error in {file}: {message}")]
    LutFormat { file: String, message: String },

    #[error("Coefficient error in {file}, key '{key}': {message}")]
    Coefficient {
        file: String,
        key: String,
        message: String,
    },

    #[error("Invalid configuration for '{field}': {message}")]
    Config { field: String, message: String },

    #[error("Processing error: {0}")]
    Processing(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl RetrievalError {
    pub fn lut_format(file: impl Into<String>, message: impl Into<String>) -> Self {
        RetrievalError::LutFormat {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        RetrievalError::Config {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for retrieval operations
pub type RetrievalResult<T> = Result<T, RetrievalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_rect_clips_to_raster() {
        let tile = TileRect::new(0, 10, 8, 8);
        let ext = tile.extended(2, (20, 9));
        assert_eq!(ext, TileRect::new(0, 8, 9, 12));
    }

    #[test]
    fn test_tile_grid_covers_raster() {
        let tiles = tile_grid((5, 7), 4);
        assert_eq!(tiles.len(), 4);
        let covered: usize = tiles.iter().map(|t| t.width * t.height).sum();
        assert_eq!(covered, 35);
    }

    #[test]
    fn test_quality_code_roundtrip() {
        for code in [
            QualityCode::Ok,
            QualityCode::OutlierAccepted,
            QualityCode::OutlierReplacedByAlternate,
            QualityCode::OutlierReplacedByNeighborAverage,
            QualityCode::NoObservation,
            QualityCode::NoAuxiliaryData,
            QualityCode::NotConverged,
            QualityCode::AngleOutOfRange,
        ] {
            assert_eq!(QualityCode::from_i8(code.as_i8()), Some(code));
        }
    }

    #[test]
    fn test_decibel_floor() {
        assert!((to_decibels(100.0) - 20.0).abs() < 1e-12);
        assert!((to_decibels(0.0) + 300.0).abs() < 1e-9);
        assert_eq!(BackscatterUnit::from_unit_str(Some("dB")), BackscatterUnit::Decibels);
        assert_eq!(BackscatterUnit::from_unit_str(Some("intensity")), BackscatterUnit::Linear);
    }
}
