use crate::core::terrain::TerrainModel;
use crate::types::{
    bands, is_masked, BandData, BurnError, BurnResult, ImageCollection, Raster, Scene, Stage,
};
use ndarray::Zip;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Parameters for statistical-empirical topographic correction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionParams {
    /// Sampling resolution of the regional reductions, in map units
    pub sampling_scale: f64,
    /// Factor undoing the fixed-point reflectance encoding
    pub reflectance_scale: f64,
}

impl Default for CorrectionParams {
    fn default() -> Self {
        Self {
            sampling_scale: 30.0,
            reflectance_scale: 0.0001,
        }
    }
}

/// Least-squares fit `y = offset + scale·x`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub scale: f64,
    pub offset: f64,
}

/// Associative accumulator for the regional mean of `y` and the fit of
/// `y` against `x`. Partial accumulators from any tiling merge into the
/// same totals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegressionAccumulator {
    /// Pixels where `y` is valid
    n_y: f64,
    sum_y_all: f64,
    /// Pixels where both `x` and `y` are valid
    n: f64,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_xy: f64,
}

impl RegressionAccumulator {
    pub fn push(mut self, x: f64, y: f64) -> Self {
        if is_masked(y) {
            return self;
        }
        self.n_y += 1.0;
        self.sum_y_all += y;
        if !is_masked(x) {
            self.n += 1.0;
            self.sum_x += x;
            self.sum_y += y;
            self.sum_xx += x * x;
            self.sum_xy += x * y;
        }
        self
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            n_y: self.n_y + other.n_y,
            sum_y_all: self.sum_y_all + other.sum_y_all,
            n: self.n + other.n,
            sum_x: self.sum_x + other.sum_x,
            sum_y: self.sum_y + other.sum_y,
            sum_xx: self.sum_xx + other.sum_xx,
            sum_xy: self.sum_xy + other.sum_xy,
        }
    }

    /// Regional mean of `y`; masked when no pixel was valid
    pub fn mean(&self) -> f64 {
        if self.n_y == 0.0 {
            f64::NAN
        } else {
            self.sum_y_all / self.n_y
        }
    }

    pub fn linear_fit(&self) -> BurnResult<LinearFit> {
        if self.n < 2.0 {
            return Err(BurnError::DegenerateRegression(format!(
                "{} paired samples, at least 2 required",
                self.n
            )));
        }
        let sxx = self.sum_xx - self.sum_x * self.sum_x / self.n;
        let sxy = self.sum_xy - self.sum_x * self.sum_y / self.n;
        let x_scale = self.sum_xx / self.n;
        if sxx.abs() <= 1e-12 * x_scale.max(1.0) * self.n {
            return Err(BurnError::DegenerateRegression(
                "regressor has zero variance".to_string(),
            ));
        }
        let scale = sxy / sxx;
        let offset = (self.sum_y - scale * self.sum_x) / self.n;
        Ok(LinearFit { scale, offset })
    }
}

/// Regional statistics for one reflectance band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandStatistics {
    pub mean: f64,
    pub fit: LinearFit,
    /// True when the regression was degenerate and the band is only mean-corrected
    pub mean_only: bool,
}

/// Reduce `band` against `ic` over a sampling lattice with the given stride
pub fn reduce_region(band: &BandData, ic: &BandData, stride: usize) -> RegressionAccumulator {
    let (rows, cols) = band.dim();
    let stride = stride.max(1);

    (0..rows)
        .into_par_iter()
        .step_by(stride)
        .map(|i| {
            (0..cols)
                .step_by(stride)
                .fold(RegressionAccumulator::default(), |acc, j| {
                    acc.push(ic[[i, j]], band[[i, j]])
                })
        })
        .reduce(RegressionAccumulator::default, RegressionAccumulator::merge)
}

/// Statistical-empirical (C-correction style) topographic corrector
pub struct TopographicCorrector {
    params: CorrectionParams,
    terrain: TerrainModel,
}

impl TopographicCorrector {
    pub fn new(params: CorrectionParams, terrain: TerrainModel) -> Self {
        Self { params, terrain }
    }

    /// Create a corrector with standard Landsat parameters
    pub fn standard(terrain: TerrainModel) -> Self {
        Self::new(CorrectionParams::default(), terrain)
    }

    pub fn terrain(&self) -> &TerrainModel {
        &self.terrain
    }

    fn sampling_stride(&self, raster: &Raster) -> usize {
        let pixel = raster.grid().pixel_size();
        if pixel <= 0.0 {
            return 1;
        }
        ((self.params.sampling_scale / pixel).round() as usize).max(1)
    }

    /// Regional mean and IC regression for one band. A degenerate
    /// regression falls back to mean-only correction.
    pub fn band_statistics(&self, band: &BandData, ic: &BandData, stride: usize) -> BandStatistics {
        let acc = reduce_region(band, ic, stride);
        let mean = acc.mean();
        match acc.linear_fit() {
            Ok(fit) => BandStatistics {
                mean,
                fit,
                mean_only: false,
            },
            Err(e) => {
                log::warn!("{}; falling back to mean-only correction", e);
                BandStatistics {
                    mean,
                    fit: LinearFit {
                        scale: 0.0,
                        offset: mean,
                    },
                    mean_only: true,
                }
            }
        }
    }

    /// Correct one scene. Output carries the six reflectance bands and the
    /// scene's original metadata.
    pub fn correct_scene(&self, scene: &Scene) -> BurnResult<Scene> {
        let with_ic = if scene.raster.has_band(bands::IC) {
            scene.clone()
        } else {
            self.terrain.add_illumination(scene)?
        };
        let raster = &with_ic.raster;
        raster.require_bands(Stage::TopographicCorrection, &bands::REFLECTANCE)?;
        let ic = raster.band(Stage::TopographicCorrection, bands::IC)?;
        let stride = self.sampling_stride(raster);
        let factor = self.params.reflectance_scale;

        let mut corrected = Raster::new(raster.grid().clone());
        for name in bands::REFLECTANCE {
            let band = raster.band(Stage::TopographicCorrection, name)?;
            let stats = self.band_statistics(band, ic, stride);
            log::debug!(
                "{} {}: mean={:.2} scale={:.4} offset={:.2}{}",
                scene.metadata.scene_id,
                name,
                stats.mean,
                stats.fit.scale,
                stats.fit.offset,
                if stats.mean_only { " (mean only)" } else { "" }
            );

            let LinearFit { scale, offset } = stats.fit;
            let mean = stats.mean;
            let data = Zip::from(band)
                .and(ic)
                .par_map_collect(|&b, &ic| (b - (offset + scale * ic) + mean) * factor);
            corrected = corrected.with_band_in(Stage::TopographicCorrection, name, data)?;
        }

        Ok(Scene::new(corrected, scene.metadata.clone()))
    }

    /// Correct every scene of a collection independently
    pub fn correct_collection(&self, collection: &ImageCollection) -> BurnResult<ImageCollection> {
        log::info!("Applying topographic correction to {} scenes", collection.len());
        collection.par_try_map(|scene| self.correct_scene(scene))
    }
}
