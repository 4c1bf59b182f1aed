use chrono::{DateTime, Datelike, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 2D floating-point band data (rows x cols). `NaN` marks masked pixels.
pub type BandData = Array2<f64>;

/// Canonical band names shared by every pipeline stage
pub mod bands {
    pub const BLUE: &str = "blue";
    pub const GREEN: &str = "green";
    pub const RED: &str = "red";
    pub const NIR: &str = "nir";
    pub const SWIR1: &str = "swir1";
    pub const SWIR2: &str = "swir2";
    pub const QA: &str = "pixel_qa";
    pub const IC: &str = "IC";
    pub const ELEVATION: &str = "elevation";

    pub const NDVI: &str = "NDVI";
    pub const NBR: &str = "NBR";
    pub const NBR2: &str = "NBR2";
    pub const NDMI: &str = "NDMI";
    pub const MIRBI: &str = "MIRBI";
    pub const SAVI: &str = "SAVI";
    pub const BAI: &str = "BAI";
    pub const GEMI: &str = "GEMI";

    pub const CLASSIFICATION: &str = "classification";
    pub const TIME: &str = "time";

    // Annual product
    pub const MAX_NDVI: &str = "Max_NDVI";
    pub const TIME2: &str = "time2";
    pub const MAX_NBR: &str = "Max_NBR";

    // Regeneration bands attached to the year-1 product
    pub const NDVI2: &str = "NDVI2";
    pub const T2: &str = "t2";
    pub const NBR3: &str = "NBR3";

    /// Surface reflectance bands subject to topographic correction
    pub const REFLECTANCE: [&str; 6] = [BLUE, GREEN, RED, NIR, SWIR1, SWIR2];

    /// Classifier feature order
    pub const FEATURES: [&str; 14] = [
        BLUE, GREEN, RED, NIR, SWIR1, SWIR2, NDVI, NBR, NBR2, NDMI, MIRBI, SAVI, BAI, GEMI,
    ];
}

/// Returns true if a pixel value is masked (nodata)
#[inline]
pub fn is_masked(value: f64) -> bool {
    value.is_nan()
}

/// Coordinate system enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (latitude, longitude)
    Geographic,
    /// Projected coordinates (e.g., UTM)
    Projected { epsg: u32 },
}

impl CoordinateSystem {
    pub fn epsg(&self) -> u32 {
        match self {
            CoordinateSystem::Geographic => 4326,
            CoordinateSystem::Projected { epsg } => *epsg,
        }
    }
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Ground sampling distance (map units per pixel, x direction)
    pub fn pixel_size(&self) -> f64 {
        self.pixel_width.abs()
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        // Landsat 30 m grid
        Self::north_up(0.0, 0.0, 30.0)
    }
}

/// Spatial grid shared by every band of a raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub geo_transform: GeoTransform,
    pub coordinate_system: CoordinateSystem,
}

impl GridSpec {
    pub fn new(
        rows: usize,
        cols: usize,
        geo_transform: GeoTransform,
        coordinate_system: CoordinateSystem,
    ) -> Self {
        Self {
            rows,
            cols,
            geo_transform,
            coordinate_system,
        }
    }

    /// Grid of the given size on a default 30 m UTM 45N transform
    pub fn with_shape(rows: usize, cols: usize) -> Self {
        Self::new(
            rows,
            cols,
            GeoTransform::default(),
            CoordinateSystem::Projected { epsg: 32645 },
        )
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn pixel_size(&self) -> f64 {
        self.geo_transform.pixel_size()
    }

    /// Footprint as (min_x, min_y, max_x, max_y) in map units
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let gt = &self.geo_transform;
        let x0 = gt.top_left_x;
        let y0 = gt.top_left_y;
        let x1 = x0 + self.cols as f64 * gt.pixel_width;
        let y1 = y0 + self.rows as f64 * gt.pixel_height;
        (x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Fail unless `other` has the same geometry and CRS
    pub fn ensure_matches(&self, stage: Stage, other: &GridSpec) -> BurnResult<()> {
        if self != other {
            return Err(BurnError::GridMismatch {
                stage,
                expected: self.describe(),
                found: other.describe(),
            });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "{}x{} @ {} ({:?})",
            self.rows,
            self.cols,
            self.coordinate_system,
            self.geo_transform.to_gdal()
        )
    }
}

/// Pipeline stage, used to attribute structural errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Assembly,
    QaMask,
    Illumination,
    TopographicCorrection,
    SpectralIndices,
    Training,
    Classification,
    Compositing,
    FireDetection,
    RegionGrowing,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Assembly => "raster assembly",
            Stage::QaMask => "QA masking",
            Stage::Illumination => "illumination condition",
            Stage::TopographicCorrection => "topographic correction",
            Stage::SpectralIndices => "spectral indices",
            Stage::Training => "classifier training",
            Stage::Classification => "classification",
            Stage::Compositing => "quality mosaic",
            Stage::FireDetection => "fire detection",
            Stage::RegionGrowing => "region growing",
            Stage::Export => "export",
        };
        write!(f, "{}", name)
    }
}

/// Named 2D slice of a raster
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub name: String,
    pub data: BandData,
}

/// Multi-band raster over a fixed grid. Bands are addressed by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    grid: GridSpec,
    bands: Vec<Band>,
}

impl Raster {
    /// Create a raster with no bands
    pub fn new(grid: GridSpec) -> Self {
        Self {
            grid,
            bands: Vec::new(),
        }
    }

    /// Create a raster from named band arrays
    pub fn from_bands<S: Into<String>>(
        grid: GridSpec,
        bands: Vec<(S, BandData)>,
    ) -> BurnResult<Self> {
        let mut raster = Self::new(grid);
        for (name, data) in bands {
            raster = raster.with_band(name, data)?;
        }
        Ok(raster)
    }

    /// Broadcast a scalar into a single-band raster over `grid`
    pub fn broadcast(grid: GridSpec, name: impl Into<String>, value: f64) -> Self {
        let data = Array2::from_elem(grid.shape(), value);
        Self {
            grid,
            bands: vec![Band {
                name: name.into(),
                data,
            }],
        }
    }

    /// Scalar broadcast onto this raster's grid
    pub fn constant_like(&self, value: f64) -> BandData {
        Array2::from_elem(self.grid.shape(), value)
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn shape(&self) -> (usize, usize) {
        self.grid.shape()
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.iter().any(|b| b.name == name)
    }

    /// Borrow a band by name, failing with a stage-attributed error
    pub fn band(&self, stage: Stage, name: &str) -> BurnResult<&BandData> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.data)
            .ok_or_else(|| BurnError::MissingBand {
                stage,
                band: name.to_string(),
            })
    }

    /// Ensure all named bands are present
    pub fn require_bands(&self, stage: Stage, names: &[&str]) -> BurnResult<()> {
        for name in names {
            self.band(stage, name)?;
        }
        Ok(())
    }

    /// Add a band, replacing any existing band of the same name
    pub fn with_band(self, name: impl Into<String>, data: BandData) -> BurnResult<Self> {
        self.with_band_in(Stage::Assembly, name, data)
    }

    /// `with_band` with shape errors attributed to `stage`
    pub fn with_band_in(mut self, stage: Stage, name: impl Into<String>, data: BandData) -> BurnResult<Self> {
        let name = name.into();
        if data.dim() != self.grid.shape() {
            return Err(BurnError::GridMismatch {
                stage,
                expected: format!("{}x{}", self.grid.rows, self.grid.cols),
                found: format!("{}x{} for band '{}'", data.nrows(), data.ncols(), name),
            });
        }
        match self.bands.iter_mut().find(|b| b.name == name) {
            Some(existing) => existing.data = data,
            None => self.bands.push(Band { name, data }),
        }
        Ok(self)
    }

    /// Keep only the named bands, in the given order
    pub fn select(&self, stage: Stage, names: &[&str]) -> BurnResult<Raster> {
        let renames: Vec<(&str, &str)> = names.iter().map(|n| (*n, *n)).collect();
        self.select_rename(stage, &renames)
    }

    /// Select bands and rename them: `(from, to)` pairs
    pub fn select_rename(&self, stage: Stage, renames: &[(&str, &str)]) -> BurnResult<Raster> {
        let mut bands = Vec::with_capacity(renames.len());
        for (from, to) in renames {
            bands.push(Band {
                name: to.to_string(),
                data: self.band(stage, from)?.clone(),
            });
        }
        Ok(Raster {
            grid: self.grid.clone(),
            bands,
        })
    }

    /// Copy bands from `other` into this raster under new names
    pub fn add_bands_from(
        self,
        stage: Stage,
        other: &Raster,
        renames: &[(&str, &str)],
    ) -> BurnResult<Raster> {
        self.ensure_same_grid(stage, other)?;
        let mut out = self;
        for (from, to) in renames {
            let data = other.band(stage, from)?.clone();
            out = out.with_band_in(stage, *to, data)?;
        }
        Ok(out)
    }

    /// Fail unless `other` shares this raster's grid geometry and CRS
    pub fn ensure_same_grid(&self, stage: Stage, other: &Raster) -> BurnResult<()> {
        self.grid.ensure_matches(stage, &other.grid)
    }

    /// Values of the named bands at one pixel
    pub fn pixel_vector(&self, stage: Stage, names: &[&str], row: usize, col: usize) -> BurnResult<Vec<f64>> {
        names
            .iter()
            .map(|name| self.band(stage, name).map(|b| b[[row, col]]))
            .collect()
    }

    /// Number of unmasked pixels in a band
    pub fn valid_pixel_count(&self, stage: Stage, name: &str) -> BurnResult<usize> {
        Ok(self.band(stage, name)?.iter().filter(|v| !is_masked(**v)).count())
    }
}

/// Landsat acquisition metadata attached to each collection element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub scene_id: String,
    pub acquired: DateTime<Utc>,
    /// Solar zenith angle in degrees
    pub solar_zenith_deg: f64,
    /// Solar azimuth angle in degrees
    pub solar_azimuth_deg: f64,
    /// Scene cloud cover, percent
    pub cloud_cover: f64,
    pub wrs_path: u16,
    pub wrs_row: u16,
}

impl SceneMetadata {
    /// Acquisition time as UNIX milliseconds
    pub fn timestamp_ms(&self) -> i64 {
        self.acquired.timestamp_millis()
    }

    /// Acquisition time as fractional days since the UNIX epoch
    pub fn days_since_epoch(&self) -> f64 {
        self.timestamp_ms() as f64 / 86_400_000.0
    }
}

/// One observation in a collection
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub raster: Raster,
    pub metadata: SceneMetadata,
}

impl Scene {
    pub fn new(raster: Raster, metadata: SceneMetadata) -> Self {
        Self { raster, metadata }
    }
}

/// Filter over scene metadata, mirroring archive-side date/path/row/cloud filters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionFilter {
    /// Inclusive calendar year range
    pub years: Option<(i32, i32)>,
    /// Inclusive calendar month range (1-12)
    pub months: Option<(u32, u32)>,
    pub wrs_path: Option<u16>,
    pub wrs_row: Option<u16>,
    /// Scenes must have cloud cover strictly below this value
    pub max_cloud_cover: Option<f64>,
}

impl CollectionFilter {
    pub fn accepts(&self, metadata: &SceneMetadata) -> bool {
        let date = metadata.acquired;
        if let Some((start, end)) = self.years {
            if date.year() < start || date.year() > end {
                return false;
            }
        }
        if let Some((start, end)) = self.months {
            if date.month() < start || date.month() > end {
                return false;
            }
        }
        if self.wrs_path.is_some_and(|p| p != metadata.wrs_path) {
            return false;
        }
        if self.wrs_row.is_some_and(|r| r != metadata.wrs_row) {
            return false;
        }
        if self.max_cloud_cover.is_some_and(|c| metadata.cloud_cover >= c) {
            return false;
        }
        true
    }
}

/// Ordered sequence of observations over a common footprint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageCollection {
    scenes: Vec<Scene>,
}

impl ImageCollection {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self { scenes }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scene> {
        self.scenes.iter()
    }

    pub fn first(&self) -> Option<&Scene> {
        self.scenes.first()
    }

    /// Fail with `EmptyCollection` if no scene is present
    pub fn require_non_empty(&self, context: &str) -> BurnResult<()> {
        if self.scenes.is_empty() {
            return Err(BurnError::EmptyCollection(context.to_string()));
        }
        Ok(())
    }

    /// Scenes accepted by `filter`, in original order
    pub fn filter(&self, filter: &CollectionFilter) -> ImageCollection {
        let scenes: Vec<Scene> = self
            .scenes
            .iter()
            .filter(|s| filter.accepts(&s.metadata))
            .cloned()
            .collect();
        log::debug!("Collection filter kept {}/{} scenes", scenes.len(), self.scenes.len());
        ImageCollection { scenes }
    }

    /// Apply a fallible per-scene transform, producing a new collection
    pub fn try_map<F>(&self, f: F) -> BurnResult<ImageCollection>
    where
        F: Fn(&Scene) -> BurnResult<Scene>,
    {
        let scenes = self.scenes.iter().map(f).collect::<BurnResult<Vec<_>>>()?;
        Ok(ImageCollection { scenes })
    }

    /// Parallel variant of [`try_map`](Self::try_map); scene order is preserved
    #[cfg(feature = "parallel")]
    pub fn par_try_map<F>(&self, f: F) -> BurnResult<ImageCollection>
    where
        F: Fn(&Scene) -> BurnResult<Scene> + Sync + Send,
    {
        use rayon::prelude::*;

        let scenes = self
            .scenes
            .par_iter()
            .map(f)
            .collect::<BurnResult<Vec<_>>>()?;
        Ok(ImageCollection { scenes })
    }

    #[cfg(not(feature = "parallel"))]
    pub fn par_try_map<F>(&self, f: F) -> BurnResult<ImageCollection>
    where
        F: Fn(&Scene) -> BurnResult<Scene> + Sync + Send,
    {
        self.try_map(f)
    }
}

impl FromIterator<Scene> for ImageCollection {
    fn from_iter<I: IntoIterator<Item = Scene>>(iter: I) -> Self {
        Self {
            scenes: iter.into_iter().collect(),
        }
    }
}

/// Training class label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BurnClass {
    Unburned,
    Burned,
}

impl BurnClass {
    pub fn is_burned(self) -> bool {
        matches!(self, BurnClass::Burned)
    }
}

impl fmt::Display for BurnClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BurnClass::Unburned => write!(f, "unburned"),
            BurnClass::Burned => write!(f, "burned"),
        }
    }
}

/// Labelled feature vector used for classifier training
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: Vec<f64>,
    pub class: BurnClass,
}

/// Error types for burned-area processing
#[derive(Debug, thiserror::Error)]
pub enum BurnError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{stage}: missing band '{band}'")]
    MissingBand { stage: Stage, band: String },

    #[error("{stage}: grid mismatch, expected {expected}, found {found}")]
    GridMismatch {
        stage: Stage,
        expected: String,
        found: String,
    },

    #[error("Degenerate regression: {0}")]
    DegenerateRegression(String),

    #[error("Empty image collection: {0}")]
    EmptyCollection(String),

    #[error("Classifier model has not been trained")]
    ModelNotTrained,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for burned-area operations
pub type BurnResult<T> = Result<T, BurnError>;
