use crate::core::classifier::{ProbabilityClassifier, TrainingRegion};
use crate::core::composite::annual_product;
use crate::core::fire_detection::FireDetector;
use crate::core::indices::{add_indices_to_collection, add_spectral_indices};
use crate::core::qa_mask::apply_qa_mask;
use crate::core::region_growing::RegionGrower;
use crate::core::terrain::TerrainModel;
use crate::core::topographic::TopographicCorrector;
use crate::io::config::{BandMapping, PipelineConfig};
use crate::types::{
    bands, BandData, BurnError, BurnResult, ImageCollection, Raster, Scene, Stage,
};

/// Labelled regions over a reference scene
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub reference: Scene,
    pub regions: Vec<TrainingRegion>,
}

/// Static inputs shared by every run
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// DEM on the scenes' grid, with an `elevation` band
    pub dem: Raster,
    pub config: PipelineConfig,
}

/// Band names of the fire extent raster
pub mod extent_bands {
    pub const EXTENT: &str = "extent";
    pub const MAINFIRE: &str = "mainfire";
    pub const GROWING: &str = "growingconditions";
    pub const FIRE: &str = "Fire";
}

/// Final fire extent with its intermediate layers
#[derive(Debug, Clone)]
pub struct FireExtent {
    /// Bands: extent, mainfire, growingconditions, Fire, NDVI2, t2, NBR3
    pub raster: Raster,
    /// Growth iterations performed after the initial step
    pub iterations: usize,
    pub converged: bool,
}

impl FireExtent {
    pub fn extent(&self) -> BurnResult<&BandData> {
        self.raster.band(Stage::RegionGrowing, extent_bands::EXTENT)
    }

    /// Number of pixels in the final extent
    pub fn burned_pixels(&self) -> BurnResult<usize> {
        Ok(self.extent()?.iter().filter(|v| **v > 0.0).count())
    }
}

/// Rename archive bands to canonical names. Bands already carrying the
/// canonical name pass through; other bands are kept unchanged.
pub fn standardize_bands(raster: &Raster, mapping: &[BandMapping]) -> BurnResult<Raster> {
    let mut out = Raster::new(raster.grid().clone());
    for band in raster.bands() {
        let name = mapping
            .iter()
            .find(|m| m.source == band.name)
            .map(|m| m.target.as_str())
            .unwrap_or(band.name.as_str());
        out = out.with_band_in(Stage::Assembly, name, band.data.clone())?;
    }
    out.require_bands(Stage::Assembly, &bands::REFLECTANCE)?;
    Ok(out)
}

/// Burned-area and regeneration pipeline
pub struct BurnedAreaPipeline {
    config: PipelineConfig,
    corrector: TopographicCorrector,
    classifier: ProbabilityClassifier,
    detector: FireDetector,
    grower: RegionGrower,
}

impl BurnedAreaPipeline {
    pub fn new(context: &PipelineContext) -> BurnResult<Self> {
        let config = context.config.clone();
        config.validate()?;
        let terrain = TerrainModel::from_dem(&context.dem)?;

        Ok(Self {
            corrector: TopographicCorrector::new(config.correction.clone(), terrain),
            classifier: ProbabilityClassifier::new(config.forest.clone()),
            detector: FireDetector::new(config.detection.clone()),
            grower: RegionGrower::new(config.growth.clone()),
            config,
        })
    }

    pub fn classifier(&self) -> &ProbabilityClassifier {
        &self.classifier
    }

    /// Canonical band names, then QA masking when enabled and available
    fn prepare_input(&self, scene: &Scene) -> BurnResult<Scene> {
        let standardized = Scene::new(
            standardize_bands(&scene.raster, &self.config.input_bands)?,
            scene.metadata.clone(),
        );
        if self.config.apply_qa_mask && standardized.raster.has_band(bands::QA) {
            apply_qa_mask(&standardized, &self.config.qa_flags)
        } else {
            Ok(standardized)
        }
    }

    /// Band standardisation, optional QA masking, topographic correction
    /// and spectral indices for one scene
    pub fn preprocess_scene(&self, scene: &Scene) -> BurnResult<Scene> {
        let corrected = self.corrector.correct_scene(&self.prepare_input(scene)?)?;
        Ok(Scene::new(
            add_spectral_indices(&corrected.raster)?,
            corrected.metadata,
        ))
    }

    /// Preprocess every scene of a collection
    pub fn preprocess(&self, collection: &ImageCollection) -> BurnResult<ImageCollection> {
        log::info!("Preprocessing {} scenes", collection.len());
        let prepared = collection.par_try_map(|scene| self.prepare_input(scene))?;
        let corrected = self.corrector.correct_collection(&prepared)?;
        add_indices_to_collection(&corrected)
    }

    /// Train the classifier on labelled regions of the reference scene
    pub fn train(&mut self, training: &TrainingSet) -> BurnResult<()> {
        log::info!(
            "Training on {} regions of {}",
            training.regions.len(),
            training.reference.metadata.scene_id
        );
        let reference = self.preprocess_scene(&training.reference)?;
        self.classifier
            .train_on_regions(&reference.raster, &training.regions)
    }

    /// Score a year of imagery and reduce it to its annual product
    pub fn annual_product(&self, collection: &ImageCollection) -> BurnResult<Raster> {
        collection.require_non_empty("no scenes for the annual product")?;
        let preprocessed = self.preprocess(collection)?;
        let scored = self.classifier.score_collection(&preprocessed)?;
        annual_product(&scored)
    }

    /// Fire extent from two annual products
    pub fn extent_from_products(&self, year1: &Raster, year2: &Raster) -> BurnResult<FireExtent> {
        let detection = self.detector.detect(year1, year2)?;
        let outcome = self.grower.grow(&detection.fire, &detection.growing)?;
        let stage = Stage::RegionGrowing;

        let raster = Raster::new(year1.grid().clone())
            .with_band_in(stage, extent_bands::EXTENT, outcome.extent)?
            .with_band_in(stage, extent_bands::MAINFIRE, outcome.seed)?
            .with_band_in(stage, extent_bands::GROWING, detection.growing)?
            .with_band_in(stage, extent_bands::FIRE, detection.fire)?
            .add_bands_from(
                stage,
                &detection.attached,
                &[
                    (bands::NDVI2, bands::NDVI2),
                    (bands::T2, bands::T2),
                    (bands::NBR3, bands::NBR3),
                ],
            )?;

        let extent = FireExtent {
            raster,
            iterations: outcome.iterations,
            converged: outcome.converged,
        };
        log::info!(
            "Fire extent: {} pixels after {} growth iterations",
            extent.burned_pixels()?,
            extent.iterations
        );
        Ok(extent)
    }

    /// Full run: train, build both annual products, detect and grow
    pub fn run(
        &mut self,
        year1: &ImageCollection,
        year2: &ImageCollection,
        training: &TrainingSet,
    ) -> BurnResult<FireExtent> {
        if year1.is_empty() || year2.is_empty() {
            return Err(BurnError::EmptyCollection(format!(
                "year 1 has {} scenes, year 2 has {}",
                year1.len(),
                year2.len()
            )));
        }
        self.train(training)?;
        let product1 = self.annual_product(year1)?;
        let product2 = self.annual_product(year2)?;
        self.extent_from_products(&product1, &product2)
    }
}

/// Detect burned area and regeneration from two consecutive years of imagery
pub fn detect_fire(
    year1: &ImageCollection,
    year2: &ImageCollection,
    training: &TrainingSet,
    context: &PipelineContext,
) -> BurnResult<FireExtent> {
    let mut pipeline = BurnedAreaPipeline::new(context)?;
    pipeline.run(year1, year2, training)
}
