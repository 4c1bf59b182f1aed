//! burnmap: burned-area and post-fire regeneration mapping
//!
//! Detects burned forest and its vegetation recovery from two years of
//! Landsat surface reflectance: topographic correction, spectral indices,
//! a per-pixel random-forest burn probability, quality mosaicking, a
//! multi-condition fire rule and constrained region growing.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    bands, Band, BandData, BurnClass, BurnError, BurnResult, CollectionFilter, CoordinateSystem,
    GeoTransform, GridSpec, ImageCollection, Raster, Sample, Scene, SceneMetadata, Stage,
};

pub use crate::core::{detect_fire, FireExtent, PipelineContext, TrainingSet};
pub use io::PipelineConfig;
