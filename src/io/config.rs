use crate::core::classifier::ForestParams;
use crate::core::fire_detection::DetectionThresholds;
use crate::core::qa_mask::QaMaskFlags;
use crate::core::region_growing::GrowthParams;
use crate::core::topographic::CorrectionParams;
use crate::types::{bands, BurnError, BurnResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Archive band name mapped onto a canonical band name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandMapping {
    pub source: String,
    pub target: String,
}

impl BandMapping {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

/// Landsat 8 surface reflectance band layout
pub fn landsat8_bands() -> Vec<BandMapping> {
    vec![
        BandMapping::new("B2", bands::BLUE),
        BandMapping::new("B3", bands::GREEN),
        BandMapping::new("B4", bands::RED),
        BandMapping::new("B5", bands::NIR),
        BandMapping::new("B6", bands::SWIR1),
        BandMapping::new("B7", bands::SWIR2),
    ]
}

/// Full pipeline configuration. Every section falls back to its defaults,
/// so a partial JSON file only needs the values it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub correction: CorrectionParams,
    pub forest: ForestParams,
    pub detection: DetectionThresholds,
    pub growth: GrowthParams,
    pub qa_flags: QaMaskFlags,
    /// Mask QA-flagged pixels before correction when a `pixel_qa` band is present
    pub apply_qa_mask: bool,
    /// Renames applied to incoming scenes
    pub input_bands: Vec<BandMapping>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            correction: CorrectionParams::default(),
            forest: ForestParams::default(),
            detection: DetectionThresholds::default(),
            growth: GrowthParams::default(),
            qa_flags: QaMaskFlags::default(),
            apply_qa_mask: true,
            input_bands: landsat8_bands(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> BurnResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> BurnResult<Self> {
        let path = path.as_ref();
        log::info!("Loading pipeline configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> BurnResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> BurnResult<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// Reject parameter combinations no stage can work with
    pub fn validate(&self) -> BurnResult<()> {
        if !(self.correction.sampling_scale > 0.0) {
            return Err(BurnError::InvalidParameter(format!(
                "sampling_scale must be positive, got {}",
                self.correction.sampling_scale
            )));
        }
        if self.forest.n_trees == 0 {
            return Err(BurnError::InvalidParameter("n_trees must be at least 1".to_string()));
        }
        if self.forest.max_features == Some(0) {
            return Err(BurnError::InvalidParameter("max_features must be at least 1".to_string()));
        }
        self.growth.validate()?;

        let t = &self.detection;
        for (name, value) in [
            ("fire_probability", t.fire_probability),
            ("growing_probability", t.growing_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(BurnError::InvalidParameter(format!(
                    "{} must lie in [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}
