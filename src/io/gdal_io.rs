use crate::io::export::{ExportReceipt, ExportRequest, ExportSink};
use crate::types::{
    bands, BurnError, BurnResult, CoordinateSystem, GeoTransform, GridSpec, Raster,
};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Read a single-band DEM GeoTIFF into a raster with an `elevation` band.
/// The band's nodata value becomes `NaN`.
pub fn read_dem<P: AsRef<Path>>(dem_path: P) -> BurnResult<Raster> {
    log::info!("Reading DEM from: {}", dem_path.as_ref().display());

    let dataset = Dataset::open(dem_path.as_ref())?;
    let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();
    log::debug!("DEM size: {}x{}, geotransform: {:?}", width, height, geo_transform);

    let coordinate_system = match dataset.spatial_ref().and_then(|srs| srs.auth_code()) {
        Ok(4326) => CoordinateSystem::Geographic,
        Ok(code) => CoordinateSystem::Projected { epsg: code as u32 },
        Err(e) => {
            log::warn!("DEM has no EPSG code ({}), assuming EPSG:4326", e);
            CoordinateSystem::Geographic
        }
    };

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value();
    let band_data = rasterband.read_as::<f64>((0, 0), (width, height), (width, height), None)?;

    let mut elevation = Array2::from_shape_vec((height, width), band_data.data)
        .map_err(|e| BurnError::Processing(format!("Failed to reshape DEM data: {}", e)))?;
    if let Some(nodata) = nodata {
        elevation.mapv_inplace(|v| if v == nodata { f64::NAN } else { v });
    }

    let grid = GridSpec::new(height, width, geo_transform, coordinate_system);
    Raster::from_bands(grid, vec![(bands::ELEVATION, elevation)])
}

/// Sink writing multi-band Float64 GeoTIFFs plus a JSON receipt sidecar
#[derive(Debug, Clone)]
pub struct GeoTiffSink {
    output_dir: PathBuf,
}

impl GeoTiffSink {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> BurnResult<Self> {
        std::fs::create_dir_all(output_dir.as_ref())?;
        Ok(Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        })
    }

    fn write_geotiff(&self, raster: &Raster, request: &ExportRequest, path: &Path) -> BurnResult<()> {
        let (rows, cols) = raster.shape();
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<f64, _>(
            path,
            cols as isize,
            rows as isize,
            raster.band_count() as isize,
        )?;

        dataset.set_geo_transform(&raster.grid().geo_transform.to_gdal())?;
        let srs = SpatialRef::from_epsg(request.epsg)?;
        dataset.set_spatial_ref(&srs)?;

        for (index, band) in raster.bands().iter().enumerate() {
            let mut gdal_band = dataset.rasterband(index as isize + 1)?;
            gdal_band.set_no_data_value(Some(f64::NAN))?;
            let buffer = Buffer::new((cols, rows), band.data.iter().copied().collect());
            gdal_band.write((0, 0), (cols, rows), &buffer)?;
            log::debug!("Wrote band {} '{}'", index + 1, band.name);
        }
        Ok(())
    }
}

impl ExportSink for GeoTiffSink {
    fn export(&mut self, raster: &Raster, request: &ExportRequest) -> BurnResult<ExportReceipt> {
        let clipped = request.prepare(raster)?;
        let path = self.output_dir.join(format!("{}.tif", request.description));
        log::info!("Exporting '{}' to {}", request.description, path.display());

        self.write_geotiff(&clipped, request, &path)?;
        let receipt = ExportReceipt::new(request, path.display().to_string(), &clipped);
        receipt.write_json(path.with_extension("json"))?;
        Ok(receipt)
    }
}
