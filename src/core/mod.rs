//! Core retrieval modules

pub mod dielectric;
pub mod inversion;
pub mod kdtree;
pub mod lut;
pub mod neighbor_search;
pub mod outlier;
pub mod solver;
pub mod spatial_index;

// Re-export main types
pub use dielectric::{ForwardModel, ForwardModelKind, HallikainenCoefficients, MironovCoefficients};
pub use inversion::{
    DielectricInversion, ImageBands, LutInversion, LutInversionParams, LutOutput, MoistureOutput,
    PixelFailure, SoilBands,
};
pub use kdtree::KdTree;
pub use lut::{AngleSection, LutComparison, LutMetadata, LutTable};
pub use neighbor_search::{Candidate, NearestNeighborSearch, NeighborResult};
pub use outlier::{OutlierResolver, Resolution, Selection};
pub use solver::{ScalarInversionSolver, Solution, SolveFailure, SolverParams};
pub use spatial_index::{IndexLayout, RetrievalMode, SectionRange, SpatialIndex, SpatialIndexCache};
