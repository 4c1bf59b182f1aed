use crate::types::{bands, is_masked, BandData, BurnError, BurnResult, GridSpec, Raster, Scene, Stage};
use ndarray::{Array2, Zip};

/// Slope and aspect derived from a smoothed DEM, in radians.
///
/// Aspect is measured clockwise from north and points downslope, so it can
/// be compared directly with a solar azimuth.
#[derive(Debug, Clone)]
pub struct TerrainModel {
    pub slope: BandData,
    pub aspect: BandData,
    grid: GridSpec,
}

impl TerrainModel {
    /// Build a terrain model from a DEM raster with an `elevation` band
    pub fn from_dem(dem: &Raster) -> BurnResult<Self> {
        log::info!("Deriving slope and aspect from DEM");
        let elevation = dem.band(Stage::Illumination, bands::ELEVATION)?;

        log::debug!("Smoothing DEM with 3x3 boxcar");
        let smoothed = smooth_boxcar(elevation);
        let (slope, aspect) = compute_slope_aspect(&smoothed, dem.grid().pixel_size())?;

        Ok(Self {
            slope,
            aspect,
            grid: dem.grid().clone(),
        })
    }

    /// Grid of the DEM the model was derived from
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Per-pixel illumination condition for one solar geometry:
    ///
    /// IC = cos(slope)·cos(z) + sin(slope)·sin(z)·cos(a − aspect)
    pub fn illumination_condition(&self, solar_zenith_deg: f64, solar_azimuth_deg: f64) -> BandData {
        let zenith = solar_zenith_deg.to_radians();
        let azimuth = solar_azimuth_deg.to_radians();
        let (cos_z, sin_z) = (zenith.cos(), zenith.sin());

        Zip::from(&self.slope)
            .and(&self.aspect)
            .par_map_collect(|&slope, &aspect| {
                slope.cos() * cos_z + slope.sin() * sin_z * (azimuth - aspect).cos()
            })
    }

    /// Attach an `IC` band computed from the scene's solar angles
    pub fn add_illumination(&self, scene: &Scene) -> BurnResult<Scene> {
        self.grid.ensure_matches(Stage::Illumination, scene.raster.grid())?;
        let ic = self.illumination_condition(
            scene.metadata.solar_zenith_deg,
            scene.metadata.solar_azimuth_deg,
        );
        let raster = scene.raster.clone().with_band_in(Stage::Illumination, bands::IC, ic)?;
        Ok(Scene::new(raster, scene.metadata.clone()))
    }
}

/// 3x3 mean filter. Edge and masked-neighbour cells average whatever valid
/// cells fall inside the window; a masked centre stays masked.
pub fn smooth_boxcar(dem: &BandData) -> BandData {
    let (rows, cols) = dem.dim();

    Zip::indexed(dem).par_map_collect(|(i, j), &centre| {
        if is_masked(centre) {
            return f64::NAN;
        }
        let mut sum = 0.0;
        let mut count = 0usize;
        for ii in i.saturating_sub(1)..=(i + 1).min(rows - 1) {
            for jj in j.saturating_sub(1)..=(j + 1).min(cols - 1) {
                let v = dem[[ii, jj]];
                if !is_masked(v) {
                    sum += v;
                    count += 1;
                }
            }
        }
        sum / count as f64
    })
}

/// Compute slope and aspect with Horn's 3x3 gradient operator.
///
/// Returns (slope_radians, aspect_radians)
pub fn compute_slope_aspect(dem: &BandData, pixel_size: f64) -> BurnResult<(BandData, BandData)> {
    let (rows, cols) = dem.dim();
    if rows < 3 || cols < 3 {
        return Err(BurnError::InvalidParameter(format!(
            "DEM of {}x{} pixels is too small for a 3x3 kernel",
            rows, cols
        )));
    }
    if pixel_size <= 0.0 {
        return Err(BurnError::InvalidParameter(format!(
            "pixel size must be positive, got {}",
            pixel_size
        )));
    }
    let mut slope = Array2::<f64>::zeros((rows, cols));
    let mut aspect = Array2::<f64>::zeros((rows, cols));

    let scale = 8.0 * pixel_size;

    for i in 1..rows - 1 {
        for j in 1..cols - 1 {
            let a = dem[[i - 1, j - 1]];
            let b = dem[[i - 1, j]];
            let c = dem[[i - 1, j + 1]];
            let d = dem[[i, j - 1]];
            let f = dem[[i, j + 1]];
            let g = dem[[i + 1, j - 1]];
            let h = dem[[i + 1, j]];
            let k = dem[[i + 1, j + 1]];

            // Eastward and southward gradients
            let dz_dx = ((c + 2.0 * f + k) - (a + 2.0 * d + g)) / scale;
            let dz_dy = ((g + 2.0 * h + k) - (a + 2.0 * b + c)) / scale;

            slope[[i, j]] = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan();

            // Downslope direction as compass bearing (0 = north, clockwise)
            let bearing = (-dz_dx).atan2(dz_dy);
            aspect[[i, j]] = if bearing < 0.0 {
                bearing + 2.0 * std::f64::consts::PI
            } else {
                bearing
            };
        }
    }

    // Handle edges by copying nearest valid values
    fill_edges(&mut slope);
    fill_edges(&mut aspect);

    Ok((slope, aspect))
}

fn fill_edges(array: &mut BandData) {
    let (rows, cols) = array.dim();

    for j in 0..cols {
        array[[0, j]] = array[[1, j]];
        array[[rows - 1, j]] = array[[rows - 2, j]];
    }

    for i in 0..rows {
        array[[i, 0]] = array[[i, 1]];
        array[[i, cols - 1]] = array[[i, cols - 2]];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GridSpec;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn dem_raster(f: impl Fn(usize, usize) -> f64) -> Raster {
        let data = Array2::from_shape_fn((7, 7), |(i, j)| f(i, j));
        Raster::from_bands(GridSpec::with_shape(7, 7), vec![(bands::ELEVATION, data)]).unwrap()
    }

    #[test]
    fn test_flat_dem_has_zero_slope() {
        let terrain = TerrainModel::from_dem(&dem_raster(|_, _| 100.0)).unwrap();
        assert!(terrain.slope.iter().all(|s| s.abs() < 1e-12));

        // On flat terrain IC reduces to cos(zenith)
        let ic = terrain.illumination_condition(40.0, 135.0);
        assert_relative_eq!(ic[[3, 3]], 40f64.to_radians().cos(), epsilon = 1e-12);
    }

    #[test]
    fn test_south_facing_slope() {
        // Elevation falls towards the south (increasing row), 30 m per pixel
        let terrain = TerrainModel::from_dem(&dem_raster(|i, _| 1000.0 - 30.0 * i as f64)).unwrap();
        assert_relative_eq!(terrain.slope[[3, 3]], PI / 4.0, epsilon = 1e-9);
        assert_relative_eq!(terrain.aspect[[3, 3]], PI, epsilon = 1e-9);
    }

    #[test]
    fn test_east_facing_slope() {
        let terrain = TerrainModel::from_dem(&dem_raster(|_, j| 500.0 - 10.0 * j as f64)).unwrap();
        assert_relative_eq!(terrain.aspect[[3, 3]], PI / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sun_facing_slope_is_brighter() {
        let terrain = TerrainModel::from_dem(&dem_raster(|i, _| 1000.0 - 30.0 * i as f64)).unwrap();
        let facing_sun = terrain.illumination_condition(45.0, 180.0);
        let facing_away = terrain.illumination_condition(45.0, 0.0);
        assert!(facing_sun[[3, 3]] > facing_away[[3, 3]]);
        // Sun perpendicular to a 45 degree slope
        assert_relative_eq!(facing_sun[[3, 3]], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_boxcar_keeps_masked_centre() {
        let mut dem = Array2::from_elem((3, 3), 9.0);
        dem[[1, 1]] = f64::NAN;
        dem[[0, 0]] = 0.0;
        let smoothed = smooth_boxcar(&dem);
        assert!(smoothed[[1, 1]].is_nan());
        // Corner window holds (0,0)=0, (0,1)=9, (1,0)=9 and the masked centre
        assert_relative_eq!(smoothed[[0, 0]], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_small_dem_rejected() {
        let data = Array2::zeros((2, 2));
        let dem = Raster::from_bands(GridSpec::with_shape(2, 2), vec![(bands::ELEVATION, data)]).unwrap();
        assert!(TerrainModel::from_dem(&dem).is_err());

        for shape in [(2, 5), (5, 2), (0, 0)] {
            assert!(matches!(
                compute_slope_aspect(&Array2::zeros(shape), 30.0),
                Err(BurnError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_scene_on_another_grid_is_rejected() {
        let terrain = TerrainModel::from_dem(&dem_raster(|_, _| 100.0)).unwrap();
        assert_eq!(terrain.grid(), &GridSpec::with_shape(7, 7));

        let raster = Raster::broadcast(GridSpec::with_shape(6, 7), bands::RED, 0.1);
        let scene = Scene::new(
            raster,
            crate::types::SceneMetadata {
                scene_id: "grid".to_string(),
                acquired: chrono::Utc::now(),
                solar_zenith_deg: 30.0,
                solar_azimuth_deg: 140.0,
                cloud_cover: 0.0,
                wrs_path: 144,
                wrs_row: 40,
            },
        );
        assert!(matches!(
            terrain.add_illumination(&scene),
            Err(BurnError::GridMismatch { stage: Stage::Illumination, .. })
        ));
    }
}
