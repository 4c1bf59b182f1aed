//! I/O modules for configuration, scene identifiers and raster export

pub mod config;
pub mod scene_id;
pub mod export;
#[cfg(feature = "gdal")]
pub mod gdal_io;

pub use config::{BandMapping, PipelineConfig};
pub use scene_id::{metadata_from_scene_id, LandsatProductId, Sensor};
pub use export::{ExportReceipt, ExportRequest, ExportSink, MemorySink};
#[cfg(feature = "gdal")]
pub use gdal_io::{read_dem, GeoTiffSink};
