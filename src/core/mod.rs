//! Burned-area processing stages

pub mod terrain;
pub mod topographic;
pub mod indices;
pub mod qa_mask;
pub mod classifier;
pub mod composite;
pub mod fire_detection;
pub mod region_growing;
pub mod pipeline;

// Re-export main types
pub use terrain::TerrainModel;
pub use topographic::{CorrectionParams, LinearFit, RegressionAccumulator, TopographicCorrector};
pub use indices::{add_spectral_indices, SpectralIndex};
pub use qa_mask::{apply_qa_mask, QaMaskFlags};
pub use classifier::{ForestParams, ProbabilityClassifier, ProbabilityModel, RandomForest, TrainingRegion};
pub use composite::{annual_product, quality_mosaic};
pub use fire_detection::{ConditionMasks, DetectionResult, DetectionThresholds, FireDetector};
pub use region_growing::{GrowthOutcome, GrowthParams, RegionGrower};
pub use pipeline::{detect_fire, BurnedAreaPipeline, FireExtent, PipelineContext, TrainingSet};
