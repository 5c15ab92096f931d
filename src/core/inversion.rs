//! Per-pixel inversion drivers
//!
//! [`LutInversion`] matches observed backscatter against a LUT and resolves spatial
//! outliers; [`DielectricInversion`] inverts a closed-form dielectric model for soil
//! moisture. Both process a scene as a grid of independent tiles and never fail per
//! pixel: every pixel ends with a value (or the invalid value) and a [`QualityCode`].

use crate::core::lut::LutTable;
use crate::core::neighbor_search::{NearestNeighborSearch, NeighborResult};
use crate::core::outlier::OutlierResolver;
use crate::core::solver::{ScalarInversionSolver, SolveFailure};
use crate::core::spatial_index::{RetrievalMode, SectionRange, SpatialIndexCache};
use crate::types::{
    tile_grid, BandView, Polarization, QualityCode, QualityImage, RealImage, RetrievalError,
    RetrievalResult, TileRect, INVALID_OUTPUT_VALUE,
};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

/// LUT inversion parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LutInversionParams {
    /// Number of LUT candidates per pixel (N)
    pub num_candidates: usize,
    /// Outlier neighbourhood width (M, odd)
    pub window_size: usize,
    /// Relative RDC deviation above which a retrieval is an outlier
    pub rdc_threshold: f64,
    /// Replace outliers without an acceptable candidate by the neighbourhood average
    pub filter_remaining_outliers: bool,
    pub invalid_value: f64,
    /// Tile edge length for scene processing
    pub tile_size: usize,
}

impl Default for LutInversionParams {
    fn default() -> Self {
        Self {
            num_candidates: 5,
            window_size: 5,
            rdc_threshold: 0.5,
            filter_remaining_outliers: true,
            invalid_value: INVALID_OUTPUT_VALUE,
            tile_size: 256,
        }
    }
}

impl LutInversionParams {
    pub fn validate(&self) -> RetrievalResult<()> {
        if self.num_candidates < 1 {
            return Err(RetrievalError::config("num_candidates", "must be at least 1"));
        }
        if self.window_size < 3 || self.window_size % 2 == 0 {
            return Err(RetrievalError::config(
                "window_size",
                format!("must be odd and at least 3, got {}", self.window_size),
            ));
        }
        if !self.rdc_threshold.is_finite() || self.rdc_threshold <= 0.0 {
            return Err(RetrievalError::config(
                "rdc_threshold",
                format!("must be finite and positive, got {}", self.rdc_threshold),
            ));
        }
        if self.tile_size == 0 {
            return Err(RetrievalError::config("tile_size", "must be positive"));
        }
        Ok(())
    }
}

/// Per-pixel failure, folded into the invalid value and a quality code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFailure {
    NoObservation,
    NoAuxiliaryData,
    NotConverged,
    AngleOutOfRange,
    /// Angle sections fall outside the ranges indexed at initialization
    NoIndex,
}

impl PixelFailure {
    pub fn code(self) -> QualityCode {
        match self {
            PixelFailure::NoObservation => QualityCode::NoObservation,
            PixelFailure::NoAuxiliaryData => QualityCode::NoAuxiliaryData,
            PixelFailure::NotConverged => QualityCode::NotConverged,
            PixelFailure::AngleOutOfRange => QualityCode::AngleOutOfRange,
            PixelFailure::NoIndex => QualityCode::NoObservation,
        }
    }
}

/// Input rasters of one acquisition
#[derive(Debug, Clone, Copy)]
pub struct ImageBands<'a> {
    pub sigma_hh: Option<BandView<'a>>,
    pub sigma_vv: Option<BandView<'a>>,
    /// Local incidence angle (degrees)
    pub theta: BandView<'a>,
    /// Near/far incidence angle from product metadata
    pub incidence_range: Option<(f64, f64)>,
}

impl<'a> ImageBands<'a> {
    pub fn new(theta: BandView<'a>) -> Self {
        Self {
            sigma_hh: None,
            sigma_vv: None,
            theta,
            incidence_range: None,
        }
    }

    pub fn with_sigma(mut self, pol: Polarization, band: BandView<'a>) -> Self {
        match pol {
            Polarization::HH => self.sigma_hh = Some(band),
            Polarization::VV => self.sigma_vv = Some(band),
        }
        self
    }

    pub fn with_incidence_range(mut self, near: f64, far: f64) -> Self {
        self.incidence_range = Some((near, far));
        self
    }

    pub fn sigma(&self, pol: Polarization) -> Option<&BandView<'a>> {
        match pol {
            Polarization::HH => self.sigma_hh.as_ref(),
            Polarization::VV => self.sigma_vv.as_ref(),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.theta.dim()
    }

    /// Min/max incidence angle: metadata first, raster statistics otherwise
    pub fn angle_range(&self) -> Option<(f64, f64)> {
        if let Some((near, far)) = self.incidence_range {
            if near.is_finite() && far.is_finite() {
                return Some((near.min(far), near.max(far)));
            }
        }
        log::warn!("No incidence angle range in metadata, using raster statistics");
        self.theta.valid_min_max()
    }
}

/// LUT retrieval of one tile (or a whole scene)
#[derive(Debug, Clone, PartialEq)]
pub struct LutOutput {
    pub rect: TileRect,
    pub rdc: RealImage,
    pub rms: RealImage,
    /// Correlation length, hybrid retrievals only
    pub cl: Option<RealImage>,
    pub quality: QualityImage,
}

impl LutOutput {
    fn filled(rect: TileRect, with_cl: bool, invalid_value: f64) -> Self {
        let shape = (rect.height, rect.width);
        Self {
            rect,
            rdc: Array2::from_elem(shape, invalid_value),
            rms: Array2::from_elem(shape, invalid_value),
            cl: if with_cl {
                Some(Array2::from_elem(shape, invalid_value))
            } else {
                None
            },
            quality: Array2::from_elem(shape, QualityCode::NoObservation.as_i8()),
        }
    }

    /// Copy a tile into this (larger) output at the tile's position
    fn paste(&mut self, tile: &LutOutput) {
        let (y0, x0) = (tile.rect.y0 - self.rect.y0, tile.rect.x0 - self.rect.x0);
        let (y1, x1) = (y0 + tile.rect.height, x0 + tile.rect.width);
        self.rdc.slice_mut(s![y0..y1, x0..x1]).assign(&tile.rdc);
        self.rms.slice_mut(s![y0..y1, x0..x1]).assign(&tile.rms);
        if let (Some(dst), Some(src)) = (self.cl.as_mut(), tile.cl.as_ref()) {
            dst.slice_mut(s![y0..y1, x0..x1]).assign(src);
        }
        self.quality.slice_mut(s![y0..y1, x0..x1]).assign(&tile.quality);
    }

    pub fn quality_at(&self, row: usize, col: usize) -> Option<QualityCode> {
        QualityCode::from_i8(self.quality[[row, col]])
    }
}

/// LUT-based retrieval of RDC and roughness
#[derive(Debug, Clone)]
pub struct LutInversion {
    lut: LutTable,
    mode: RetrievalMode,
    params: LutInversionParams,
    cache: SpatialIndexCache,
    resolver: OutlierResolver,
    dims: (usize, usize),
}

impl LutInversion {
    /// Validate configuration and inputs, then build every spatial index the scene needs
    pub fn new(
        lut: LutTable,
        mode: RetrievalMode,
        params: LutInversionParams,
        images: &[ImageBands<'_>],
    ) -> RetrievalResult<Self> {
        params.validate()?;

        if lut.num_params() != mode.num_params() {
            return Err(RetrievalError::lut_format(
                "<lut>",
                format!(
                    "{} retrieval needs {} parameter columns {:?}, LUT has {}",
                    mode,
                    mode.num_params(),
                    mode.param_names(),
                    lut.num_params()
                ),
            ));
        }

        let dims = check_images(mode, images)?;

        let mut ranges = Vec::with_capacity(images.len());
        for (i, image) in images.iter().enumerate() {
            let (min_theta, max_theta) = image.angle_range().ok_or_else(|| {
                RetrievalError::config("theta", format!("image {} has no valid incidence angle", i))
            })?;
            let (first, last) = lut
                .metadata()
                .section_range(min_theta, max_theta)
                .ok_or_else(|| {
                    RetrievalError::config(
                        "theta",
                        format!(
                            "image {} incidence angles [{:.2}, {:.2}] outside LUT angles [{}, {}]",
                            i,
                            min_theta,
                            max_theta,
                            lut.metadata().start_angle,
                            lut.metadata().end_angle
                        ),
                    )
                })?;
            log::debug!(
                "Image {}: incidence [{:.2}, {:.2}] -> sections {}..={}",
                i,
                min_theta,
                max_theta,
                first,
                last
            );
            ranges.push(SectionRange::new(first, last));
        }

        let cache = SpatialIndexCache::build(&lut, mode, &ranges)?;
        let resolver = OutlierResolver::new(
            params.rdc_threshold,
            params.window_size,
            params.filter_remaining_outliers,
        );

        log::info!(
            "LUT inversion ready: {} retrieval, N = {}, M = {}, threshold = {}",
            mode,
            params.num_candidates,
            params.window_size,
            params.rdc_threshold
        );

        Ok(Self {
            lut,
            mode,
            params,
            cache,
            resolver,
            dims,
        })
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    pub fn params(&self) -> &LutInversionParams {
        &self.params
    }

    pub fn lut(&self) -> &LutTable {
        &self.lut
    }

    pub fn cache(&self) -> &SpatialIndexCache {
        &self.cache
    }

    fn search(&self) -> NearestNeighborSearch<'_> {
        NearestNeighborSearch::new(&self.lut, &self.cache, self.params.num_candidates)
    }

    /// Validate one pixel and search the LUT for it
    pub fn search_pixel(
        &self,
        images: &[ImageBands<'_>],
        row: usize,
        col: usize,
    ) -> Result<NeighborResult, PixelFailure> {
        let mut thetas = Vec::with_capacity(images.len());
        for image in images {
            thetas.push(image.theta.valid_at(row, col).ok_or(PixelFailure::NoObservation)?);
        }

        let mut observed = Vec::with_capacity(self.mode.dims());
        for (img, pol) in self.mode.observation_layout() {
            let band = images[img].sigma(pol).ok_or(PixelFailure::NoObservation)?;
            observed.push(band.decibels_at(row, col).ok_or(PixelFailure::NoObservation)?);
        }

        let mut sections = Vec::with_capacity(thetas.len());
        for theta in thetas {
            let section = self
                .lut
                .angle_section(theta)
                .ok_or(PixelFailure::AngleOutOfRange)?;
            sections.push(section.index);
        }

        if !self.cache.contains(&sections) {
            return Err(PixelFailure::NoIndex);
        }
        let result = self.search().search(&observed, &sections);
        if result.is_empty() {
            return Err(PixelFailure::NoObservation);
        }
        Ok(result)
    }

    /// Retrieve one tile
    pub fn process_tile(&self, images: &[ImageBands<'_>], tile: TileRect) -> RetrievalResult<LutOutput> {
        if check_images(self.mode, images)? != self.dims {
            return Err(RetrievalError::Processing(format!(
                "Input rasters changed size since initialization (expected {:?})",
                self.dims
            )));
        }
        if tile.y0 + tile.height > self.dims.0 || tile.x0 + tile.width > self.dims.1 {
            return Err(RetrievalError::Processing(format!(
                "Tile {:?} outside raster {:?}",
                tile, self.dims
            )));
        }

        let with_outliers = self.params.num_candidates > 1;
        let margin = if with_outliers { self.resolver.half_window() } else { 0 };
        let window = tile.extended(margin, self.dims);

        log::debug!("Processing tile {:?} on window {:?}", tile, window);

        // Search every pixel of the extended window before resolving any of them
        let mut results = Array2::from_elem((window.height, window.width), NeighborResult::default());
        let mut failures: Array2<Option<PixelFailure>> = Array2::from_elem((window.height, window.width), None);
        for wy in 0..window.height {
            for wx in 0..window.width {
                match self.search_pixel(images, window.y0 + wy, window.x0 + wx) {
                    Ok(result) => results[[wy, wx]] = result,
                    Err(failure) => failures[[wy, wx]] = Some(failure),
                }
            }
        }

        let mut output = LutOutput::filled(
            tile,
            self.mode == RetrievalMode::Hybrid,
            self.params.invalid_value,
        );
        let rdc_col = self.mode.rdc_column();
        let mut unindexed = 0usize;

        for ty in 0..tile.height {
            for tx in 0..tile.width {
                let wy = tile.y0 + ty - window.y0;
                let wx = tile.x0 + tx - window.x0;

                if let Some(failure) = failures[[wy, wx]] {
                    if failure == PixelFailure::NoIndex {
                        unindexed += 1;
                    }
                    output.quality[[ty, tx]] = failure.code().as_i8();
                    continue;
                }

                let resolved = if with_outliers {
                    self.resolver
                        .resolve(&results, wy, wx, rdc_col)
                        .map(|r| (r.params, r.code))
                } else {
                    results[[wy, wx]]
                        .closest()
                        .map(|c| (c.params.clone(), QualityCode::Ok))
                };

                match resolved {
                    Some((params, code)) => {
                        output.rdc[[ty, tx]] = params[rdc_col];
                        output.rms[[ty, tx]] = params[0];
                        if let Some(cl) = output.cl.as_mut() {
                            cl[[ty, tx]] = params[1];
                        }
                        output.quality[[ty, tx]] = code.as_i8();
                    }
                    None => {
                        output.quality[[ty, tx]] = QualityCode::NoObservation.as_i8();
                    }
                }
            }
        }

        if unindexed > 0 {
            log::warn!(
                "Tile {:?}: {} pixels outside the indexed incidence angle range",
                tile,
                unindexed
            );
        }

        Ok(output)
    }

    /// Retrieve the whole scene tile by tile
    pub fn process_scene(&self, images: &[ImageBands<'_>]) -> RetrievalResult<LutOutput> {
        let tiles = tile_grid(self.dims, self.params.tile_size);
        log::info!(
            "Processing {}x{} scene in {} tiles",
            self.dims.0,
            self.dims.1,
            tiles.len()
        );

        let tile_outputs = run_tiles(&tiles, |tile| self.process_tile(images, tile))?;

        let mut scene = LutOutput::filled(
            TileRect::new(0, 0, self.dims.1, self.dims.0),
            self.mode == RetrievalMode::Hybrid,
            self.params.invalid_value,
        );
        for tile in &tile_outputs {
            scene.paste(tile);
        }

        log_quality_summary(&scene.quality);
        Ok(scene)
    }
}

/// Check that every required band is present and all rasters share one size
fn check_images(mode: RetrievalMode, images: &[ImageBands<'_>]) -> RetrievalResult<(usize, usize)> {
    if images.len() != mode.num_images() {
        return Err(RetrievalError::config(
            "images",
            format!("{} retrieval needs {} images, got {}", mode, mode.num_images(), images.len()),
        ));
    }

    let dims = images[0].dim();
    for (i, image) in images.iter().enumerate() {
        for pol in mode.required_polarizations(i) {
            let band = image.sigma(pol).ok_or_else(|| {
                RetrievalError::config(
                    format!("sigma_{}", pol.to_string().to_lowercase()),
                    format!("image {} is missing its {} backscatter band", i, pol),
                )
            })?;
            if band.dim() != dims {
                return Err(RetrievalError::config(
                    format!("sigma_{}", pol.to_string().to_lowercase()),
                    format!("image {} band is {:?}, expected {:?}", i, band.dim(), dims),
                ));
            }
        }
        if image.dim() != dims {
            return Err(RetrievalError::config(
                "theta",
                format!("image {} incidence band is {:?}, expected {:?}", i, image.dim(), dims),
            ));
        }
    }
    Ok(dims)
}

/// Soil moisture retrieval output
#[derive(Debug, Clone, PartialEq)]
pub struct MoistureOutput {
    pub rect: TileRect,
    pub moisture: RealImage,
    pub quality: QualityImage,
}

/// Inputs of a dielectric inversion: RDC plus one band per auxiliary model input
#[derive(Debug, Clone)]
pub struct SoilBands<'a> {
    pub rdc: BandView<'a>,
    /// In the model's `fixed` order
    pub auxiliary: Vec<BandView<'a>>,
}

impl SoilBands<'_> {
    pub fn dim(&self) -> (usize, usize) {
        self.rdc.dim()
    }
}

/// Soil moisture from RDC by inverting a dielectric model
#[derive(Debug, Clone)]
pub struct DielectricInversion {
    solver: ScalarInversionSolver,
    tile_size: usize,
}

impl DielectricInversion {
    pub fn new(solver: ScalarInversionSolver, tile_size: usize) -> RetrievalResult<Self> {
        if tile_size == 0 {
            return Err(RetrievalError::config("tile_size", "must be positive"));
        }
        Ok(Self { solver, tile_size })
    }

    pub fn solver(&self) -> &ScalarInversionSolver {
        &self.solver
    }

    /// Invert one pixel; `None` marks a missing or invalid raster value
    pub fn invert_pixel(&self, rdc: Option<f64>, fixed: &[Option<f64>]) -> Result<f64, PixelFailure> {
        let rdc = rdc.ok_or(PixelFailure::NoObservation)?;

        let fixed: Vec<f64> = fixed
            .iter()
            .map(|v| v.ok_or(PixelFailure::NoAuxiliaryData))
            .collect::<Result<_, _>>()?;

        if !self.solver.model().check_fixed(&fixed) {
            return Err(PixelFailure::NoAuxiliaryData);
        }

        self.solver
            .solve(rdc, &fixed)
            .map(|solution| solution.value)
            .map_err(|failure| match failure {
                SolveFailure::NotConverged | SolveFailure::Numerical(_) => PixelFailure::NotConverged,
            })
    }

    pub fn process_tile(&self, bands: &SoilBands<'_>, tile: TileRect) -> RetrievalResult<MoistureOutput> {
        let dims = self.check_bands(bands)?;
        if tile.y0 + tile.height > dims.0 || tile.x0 + tile.width > dims.1 {
            return Err(RetrievalError::Processing(format!(
                "Tile {:?} outside raster {:?}",
                tile, dims
            )));
        }

        let invalid = self.solver.params().invalid_value;
        let mut moisture = Array2::from_elem((tile.height, tile.width), invalid);
        let mut quality = Array2::from_elem((tile.height, tile.width), QualityCode::Ok.as_i8());
        let mut fixed = vec![None; bands.auxiliary.len()];

        for ty in 0..tile.height {
            for tx in 0..tile.width {
                let (row, col) = (tile.y0 + ty, tile.x0 + tx);
                for (value, band) in fixed.iter_mut().zip(&bands.auxiliary) {
                    *value = band.valid_at(row, col);
                }
                match self.invert_pixel(bands.rdc.valid_at(row, col), &fixed) {
                    Ok(mv) => moisture[[ty, tx]] = mv,
                    Err(failure) => quality[[ty, tx]] = failure.code().as_i8(),
                }
            }
        }

        Ok(MoistureOutput {
            rect: tile,
            moisture,
            quality,
        })
    }

    pub fn process_scene(&self, bands: &SoilBands<'_>) -> RetrievalResult<MoistureOutput> {
        let dims = self.check_bands(bands)?;
        let tiles = tile_grid(dims, self.tile_size);
        log::info!(
            "Inverting {:?} model over {}x{} scene in {} tiles",
            self.solver.model().kind(),
            dims.0,
            dims.1,
            tiles.len()
        );

        let tile_outputs = run_tiles(&tiles, |tile| self.process_tile(bands, tile))?;

        let invalid = self.solver.params().invalid_value;
        let mut moisture = Array2::from_elem(dims, invalid);
        let mut quality = Array2::from_elem(dims, QualityCode::NoObservation.as_i8());
        for tile in &tile_outputs {
            let r = tile.rect;
            let (y1, x1) = (r.y0 + r.height, r.x0 + r.width);
            moisture.slice_mut(s![r.y0..y1, r.x0..x1]).assign(&tile.moisture);
            quality.slice_mut(s![r.y0..y1, r.x0..x1]).assign(&tile.quality);
        }

        log_quality_summary(&quality);
        Ok(MoistureOutput {
            rect: TileRect::new(0, 0, dims.1, dims.0),
            moisture,
            quality,
        })
    }

    fn check_bands(&self, bands: &SoilBands<'_>) -> RetrievalResult<(usize, usize)> {
        let expected = self.solver.model().num_fixed();
        if bands.auxiliary.len() != expected {
            return Err(RetrievalError::config(
                "auxiliary",
                format!(
                    "{:?} model needs {} auxiliary bands {:?}, got {}",
                    self.solver.model().kind(),
                    expected,
                    self.solver.model().fixed_names(),
                    bands.auxiliary.len()
                ),
            ));
        }
        let dims = bands.dim();
        if let Some(bad) = bands.auxiliary.iter().position(|b| b.dim() != dims) {
            return Err(RetrievalError::config(
                self.solver.model().fixed_names()[bad],
                format!("band is {:?}, expected {:?}", bands.auxiliary[bad].dim(), dims),
            ));
        }
        Ok(dims)
    }
}

/// Run `f` over all tiles, in parallel when enabled
#[cfg(feature = "parallel")]
fn run_tiles<T, F>(tiles: &[TileRect], f: F) -> RetrievalResult<Vec<T>>
where
    T: Send,
    F: Fn(TileRect) -> RetrievalResult<T> + Sync,
{
    use rayon::prelude::*;

    tiles.par_iter().map(|&tile| f(tile)).collect()
}

#[cfg(not(feature = "parallel"))]
fn run_tiles<T, F>(tiles: &[TileRect], f: F) -> RetrievalResult<Vec<T>>
where
    F: Fn(TileRect) -> RetrievalResult<T>,
{
    tiles.iter().map(|&tile| f(tile)).collect()
}

fn log_quality_summary(quality: &QualityImage) {
    let total = quality.len();
    let valid = quality.iter().filter(|&&q| q >= 0).count();
    let replaced = quality
        .iter()
        .filter(|&&q| q == QualityCode::OutlierReplacedByAlternate.as_i8()
            || q == QualityCode::OutlierReplacedByNeighborAverage.as_i8())
        .count();
    log::info!(
        "Retrieved {}/{} pixels ({} outliers replaced)",
        valid,
        total,
        replaced
    );
}
