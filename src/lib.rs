//! loam: soil moisture and roughness retrieval from SAR backscatter
//!
//! Two retrieval paths are provided:
//!
//! * LUT inversion: observed HH/VV backscatter is matched against a precomputed
//!   scattering-model look-up table to retrieve the real dielectric constant (RDC),
//!   surface roughness and, for hybrid acquisitions, correlation length. Spatial
//!   outliers are resolved against each pixel's neighbourhood.
//! * Dielectric inversion: RDC is converted to volumetric soil moisture by inverting
//!   the Hallikainen or Mironov dielectric model with Brent's method.
//!
//! Scenes are processed tile by tile; every output pixel carries a [`QualityCode`].

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BackscatterUnit, BandView, Polarization, QualityCode, QualityImage, RealImage,
    RetrievalError, RetrievalResult, TileRect, INVALID_OUTPUT_VALUE,
};

pub use io::{LutReader, PropertyMap};

pub use crate::core::{
    DielectricInversion, ForwardModel, ForwardModelKind, ImageBands, LutInversion,
    LutInversionParams, LutTable, RetrievalMode, ScalarInversionSolver, SoilBands, SolverParams,
};
