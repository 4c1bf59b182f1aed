use crate::types::{BurnError, BurnResult, GeoTransform, GridSpec, Raster, Stage};
use ndarray::s;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Export parameters for a named raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Output name, also used as the file stem by file-backed sinks
    pub description: String,
    /// Output pixel size in map units
    pub scale: f64,
    /// Output coordinate reference system
    pub epsg: u32,
    /// Footprint (min_x, min_y, max_x, max_y); the whole raster when absent
    pub region: Option<(f64, f64, f64, f64)>,
    /// Largest number of output pixels accepted
    pub max_pixels: f64,
}

impl ExportRequest {
    /// Request at the raster's native scale and CRS with the default 1e11 pixel budget
    pub fn native(description: &str, raster: &Raster) -> Self {
        Self {
            description: description.to_string(),
            scale: raster.grid().pixel_size(),
            epsg: raster.grid().coordinate_system.epsg(),
            region: None,
            max_pixels: 1e11,
        }
    }

    pub fn with_region(mut self, region: (f64, f64, f64, f64)) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_max_pixels(mut self, max_pixels: f64) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    /// Check the request against a raster and return the clipped output
    pub fn prepare(&self, raster: &Raster) -> BurnResult<Raster> {
        if self.description.trim().is_empty() {
            return Err(BurnError::InvalidParameter("export description is empty".to_string()));
        }
        let grid = raster.grid();
        if grid.coordinate_system.epsg() != self.epsg {
            return Err(BurnError::InvalidParameter(format!(
                "export to EPSG:{} requested for a raster in {}; reprojection is not supported",
                self.epsg, grid.coordinate_system
            )));
        }
        if !(self.scale > 0.0) || (self.scale - grid.pixel_size()).abs() > 1e-6 * self.scale {
            return Err(BurnError::InvalidParameter(format!(
                "export scale {} differs from the native pixel size {}; resampling is not supported",
                self.scale,
                grid.pixel_size()
            )));
        }

        let clipped = match self.region {
            Some(region) => clip_to_region(raster, region)?,
            None => raster.clone(),
        };
        let pixels = clipped.grid().pixel_count() as f64;
        if pixels > self.max_pixels {
            return Err(BurnError::InvalidParameter(format!(
                "export '{}' covers {} pixels, exceeding max_pixels {}",
                self.description, pixels, self.max_pixels
            )));
        }
        Ok(clipped)
    }
}

/// Record of a completed export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReceipt {
    pub description: String,
    /// Where the raster was written
    pub location: String,
    pub bands: Vec<String>,
    pub rows: usize,
    pub cols: usize,
    pub epsg: u32,
    pub geo_transform: [f64; 6],
}

impl ExportReceipt {
    pub fn new(request: &ExportRequest, location: String, raster: &Raster) -> Self {
        Self {
            description: request.description.clone(),
            location,
            bands: raster.band_names().iter().map(|s| s.to_string()).collect(),
            rows: raster.grid().rows,
            cols: raster.grid().cols,
            epsg: request.epsg,
            geo_transform: raster.grid().geo_transform.to_gdal(),
        }
    }

    /// Write the receipt as a JSON sidecar
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> BurnResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Destination for finished rasters
pub trait ExportSink {
    fn export(&mut self, raster: &Raster, request: &ExportRequest) -> BurnResult<ExportReceipt>;
}

/// Sink keeping exported rasters in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    exports: Vec<(String, Raster)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, description: &str) -> Option<&Raster> {
        self.exports
            .iter()
            .find(|(name, _)| name == description)
            .map(|(_, raster)| raster)
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }
}

impl ExportSink for MemorySink {
    fn export(&mut self, raster: &Raster, request: &ExportRequest) -> BurnResult<ExportReceipt> {
        let clipped = request.prepare(raster)?;
        let receipt = ExportReceipt::new(request, format!("memory:{}", request.description), &clipped);
        log::info!("Exported '{}' ({}x{}) to memory", request.description, receipt.rows, receipt.cols);
        self.exports.push((request.description.clone(), clipped));
        Ok(receipt)
    }
}

/// Cut a north-up raster down to the pixels intersecting `region`
pub fn clip_to_region(raster: &Raster, region: (f64, f64, f64, f64)) -> BurnResult<Raster> {
    let grid = raster.grid();
    let gt = grid.geo_transform;
    if gt.rotation_x != 0.0 || gt.rotation_y != 0.0 || gt.pixel_height >= 0.0 {
        return Err(BurnError::InvalidParameter(
            "region clipping requires a north-up geotransform".to_string(),
        ));
    }
    let (min_x, min_y, max_x, max_y) = region;
    let width = gt.pixel_width;
    let height = -gt.pixel_height;

    let col0 = ((min_x - gt.top_left_x) / width).floor().max(0.0) as usize;
    let col1 = (((max_x - gt.top_left_x) / width).ceil().max(0.0) as usize).min(grid.cols);
    let row0 = ((gt.top_left_y - max_y) / height).floor().max(0.0) as usize;
    let row1 = (((gt.top_left_y - min_y) / height).ceil().max(0.0) as usize).min(grid.rows);

    if col0 >= col1 || row0 >= row1 {
        return Err(BurnError::InvalidParameter(format!(
            "export region {:?} does not intersect the raster footprint {:?}",
            region,
            grid.bounds()
        )));
    }

    let clipped_grid = GridSpec::new(
        row1 - row0,
        col1 - col0,
        GeoTransform {
            top_left_x: gt.top_left_x + col0 as f64 * width,
            top_left_y: gt.top_left_y + row0 as f64 * gt.pixel_height,
            ..gt
        },
        grid.coordinate_system.clone(),
    );

    let mut clipped = Raster::new(clipped_grid);
    for band in raster.bands() {
        let window = band.data.slice(s![row0..row1, col0..col1]).to_owned();
        clipped = clipped.with_band_in(Stage::Export, band.name.clone(), window)?;
    }
    log::debug!(
        "Clipped {}x{} raster to rows {}..{}, cols {}..{}",
        grid.rows,
        grid.cols,
        row0,
        row1,
        col0,
        col1
    );
    Ok(clipped)
}
