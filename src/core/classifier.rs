use crate::types::{
    bands, is_masked, BandData, BurnClass, BurnError, BurnResult, ImageCollection, Raster, Sample,
    Scene, Stage,
};
use ndarray::Array2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Random forest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    /// Number of trees
    pub n_trees: usize,
    /// Maximum tree depth (None for unlimited)
    pub max_depth: Option<usize>,
    /// Nodes smaller than this become leaves
    pub min_samples_split: usize,
    /// Candidate features per split (None for sqrt of the feature count)
    pub max_features: Option<usize>,
    /// Random seed for reproducibility (None for random)
    pub seed: Option<u64>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            max_features: None,
            seed: None,
        }
    }
}

/// Trained model emitting the probability of the burned class
pub trait ProbabilityModel: Send + Sync {
    /// Length of the feature vectors the model was trained on
    fn n_features(&self) -> usize;

    /// Burned-class probability in [0, 1]; `NaN` if any feature is masked
    fn predict_proba(&self, features: &[f64]) -> f64;
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        burned_fraction: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone)]
struct DecisionTree {
    root: Node,
}

struct TreeBuilder<'a> {
    samples: &'a [Sample],
    n_features: usize,
    mtry: usize,
    max_depth: usize,
    min_samples_split: usize,
}

impl TreeBuilder<'_> {
    fn build(&self, indices: Vec<usize>, depth: usize, rng: &mut ChaCha8Rng) -> Node {
        let n = indices.len();
        let burned = indices
            .iter()
            .filter(|&&i| self.samples[i].class.is_burned())
            .count();
        let burned_fraction = burned as f64 / n as f64;

        if burned == 0 || burned == n || n < self.min_samples_split || depth >= self.max_depth {
            return Node::Leaf { burned_fraction };
        }

        let mut candidates: Vec<usize> = (0..self.n_features).collect();
        candidates.shuffle(rng);
        candidates.truncate(self.mtry);

        let best = candidates
            .iter()
            .filter_map(|&feature| self.best_split(&indices, feature, burned))
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let Some((_, feature, threshold)) = best else {
            return Node::Leaf { burned_fraction };
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.samples[i].features[feature] <= threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(self.build(left, depth + 1, rng)),
            right: Box::new(self.build(right, depth + 1, rng)),
        }
    }

    /// Lowest weighted Gini impurity split on one feature: (impurity, feature, threshold)
    fn best_split(&self, indices: &[usize], feature: usize, burned: usize) -> Option<(f64, usize, f64)> {
        let mut ordered: Vec<(f64, bool)> = indices
            .iter()
            .map(|&i| (self.samples[i].features[feature], self.samples[i].class.is_burned()))
            .collect();
        ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let n = ordered.len() as f64;
        let total_burned = burned as f64;
        let mut left_n = 0.0;
        let mut left_burned = 0.0;
        let mut best: Option<(f64, usize, f64)> = None;

        for k in 0..ordered.len() - 1 {
            left_n += 1.0;
            if ordered[k].1 {
                left_burned += 1.0;
            }
            let (value, next) = (ordered[k].0, ordered[k + 1].0);
            if value == next {
                continue;
            }

            let right_n = n - left_n;
            let right_burned = total_burned - left_burned;
            let impurity = (left_n * gini(left_burned, left_n) + right_n * gini(right_burned, right_n)) / n;

            if best.map_or(true, |(b, _, _)| impurity < b) {
                let mut threshold = value + (next - value) / 2.0;
                if threshold >= next {
                    threshold = value;
                }
                best = Some((impurity, feature, threshold));
            }
        }

        best
    }
}

fn gini(burned: f64, total: f64) -> f64 {
    let p = burned / total;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}

impl DecisionTree {
    fn predict(&self, features: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { burned_fraction } => return *burned_fraction,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if features[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

/// Bootstrap-aggregated CART forest with probability output
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
}

impl RandomForest {
    /// Fit a forest on labelled samples
    pub fn fit(samples: &[Sample], params: &ForestParams) -> BurnResult<Self> {
        if params.n_trees == 0 {
            return Err(BurnError::InvalidParameter("n_trees must be at least 1".to_string()));
        }
        let n_features = samples
            .first()
            .map(|s| s.features.len())
            .ok_or_else(|| BurnError::InvalidParameter("no training samples".to_string()))?;
        if n_features == 0 {
            return Err(BurnError::InvalidParameter("samples have no features".to_string()));
        }
        if samples.iter().any(|s| s.features.len() != n_features) {
            return Err(BurnError::InvalidParameter(
                "training samples have inconsistent feature counts".to_string(),
            ));
        }

        let valid: Vec<Sample> = samples
            .iter()
            .filter(|s| s.features.iter().all(|v| v.is_finite()))
            .cloned()
            .collect();
        if valid.len() < samples.len() {
            log::warn!("Dropped {} samples with masked features", samples.len() - valid.len());
        }
        let burned = valid.iter().filter(|s| s.class.is_burned()).count();
        if burned == 0 || burned == valid.len() {
            return Err(BurnError::InvalidParameter(format!(
                "training requires both classes, got {} burned of {} samples",
                burned,
                valid.len()
            )));
        }

        let mtry = params
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize)
            .clamp(1, n_features);

        log::info!(
            "Training random forest: {} trees, {} samples ({} burned), {} features, mtry={}",
            params.n_trees,
            valid.len(),
            burned,
            n_features,
            mtry
        );

        let mut rng: ChaCha8Rng = match params.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        let tree_seeds: Vec<u64> = (0..params.n_trees).map(|_| rng.random()).collect();

        let builder = TreeBuilder {
            samples: &valid,
            n_features,
            mtry,
            max_depth: params.max_depth.unwrap_or(usize::MAX),
            min_samples_split: params.min_samples_split.max(2),
        };

        let n = valid.len();
        let trees = tree_seeds
            .into_par_iter()
            .map(|seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
                DecisionTree {
                    root: builder.build(bootstrap, 0, &mut rng),
                }
            })
            .collect();

        Ok(Self { trees, n_features })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl ProbabilityModel for RandomForest {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, features: &[f64]) -> f64 {
        if features.len() != self.n_features || features.iter().any(|v| is_masked(*v)) {
            return f64::NAN;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        sum / self.trees.len() as f64
    }
}

/// Labelled pixels over a reference image
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRegion {
    pub class: BurnClass,
    pub pixels: Vec<(usize, usize)>,
}

impl TrainingRegion {
    /// All pixels of a rectangular window
    pub fn rectangle(class: BurnClass, rows: Range<usize>, cols: Range<usize>) -> Self {
        let pixels = rows
            .flat_map(|r| cols.clone().map(move |c| (r, c)))
            .collect();
        Self { class, pixels }
    }
}

/// Extract training samples from labelled regions. Pixels with any masked
/// feature are skipped.
pub fn sample_regions(
    raster: &Raster,
    regions: &[TrainingRegion],
    feature_bands: &[&str],
) -> BurnResult<Vec<Sample>> {
    let (rows, cols) = raster.shape();
    let features: Vec<&BandData> = feature_bands
        .iter()
        .map(|name| raster.band(Stage::Training, name))
        .collect::<BurnResult<_>>()?;

    let mut samples = Vec::new();
    let mut skipped = 0usize;
    for region in regions {
        for &(r, c) in &region.pixels {
            if r >= rows || c >= cols {
                return Err(BurnError::InvalidParameter(format!(
                    "training pixel ({}, {}) outside {}x{} image",
                    r, c, rows, cols
                )));
            }
            let vector: Vec<f64> = features.iter().map(|b| b[[r, c]]).collect();
            if vector.iter().any(|v| is_masked(*v)) {
                skipped += 1;
                continue;
            }
            samples.push(Sample {
                features: vector,
                class: region.class,
            });
        }
    }

    log::debug!("Sampled {} training pixels ({} masked skipped)", samples.len(), skipped);
    Ok(samples)
}

/// Per-pixel burned-area probability classifier
pub struct ProbabilityClassifier {
    params: ForestParams,
    feature_bands: Vec<String>,
    model: Option<Box<dyn ProbabilityModel>>,
}

impl ProbabilityClassifier {
    /// Untrained classifier over the standard feature bands
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            feature_bands: bands::FEATURES.iter().map(|s| s.to_string()).collect(),
            model: None,
        }
    }

    /// Classifier backed by an already trained model
    pub fn with_model(feature_bands: Vec<String>, model: Box<dyn ProbabilityModel>) -> BurnResult<Self> {
        if model.n_features() != feature_bands.len() {
            return Err(BurnError::InvalidParameter(format!(
                "model expects {} features, {} bands given",
                model.n_features(),
                feature_bands.len()
            )));
        }
        Ok(Self {
            params: ForestParams::default(),
            feature_bands,
            model: Some(model),
        })
    }

    pub fn feature_bands(&self) -> Vec<&str> {
        self.feature_bands.iter().map(|s| s.as_str()).collect()
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    /// Fit the random forest on samples ordered like `feature_bands`
    pub fn train(&mut self, samples: &[Sample]) -> BurnResult<()> {
        if let Some(sample) = samples.first() {
            if sample.features.len() != self.feature_bands.len() {
                return Err(BurnError::InvalidParameter(format!(
                    "samples carry {} features, classifier uses {}",
                    sample.features.len(),
                    self.feature_bands.len()
                )));
            }
        }
        let forest = RandomForest::fit(samples, &self.params)?;
        self.model = Some(Box::new(forest));
        Ok(())
    }

    /// Sample the regions over `reference` and train on them
    pub fn train_on_regions(&mut self, reference: &Raster, regions: &[TrainingRegion]) -> BurnResult<()> {
        let samples = sample_regions(reference, regions, &self.feature_bands())?;
        self.train(&samples)
    }

    fn model(&self) -> BurnResult<&dyn ProbabilityModel> {
        self.model.as_deref().ok_or(BurnError::ModelNotTrained)
    }

    /// Burned probability for every pixel of a raster
    pub fn classify_raster(&self, raster: &Raster) -> BurnResult<BandData> {
        let model = self.model()?;
        let features: Vec<&BandData> = self
            .feature_bands
            .iter()
            .map(|name| raster.band(Stage::Classification, name))
            .collect::<BurnResult<_>>()?;
        let (rows, cols) = raster.shape();

        let values: Vec<f64> = (0..rows)
            .into_par_iter()
            .flat_map_iter(|i| {
                let features = &features;
                let mut buffer = Vec::with_capacity(features.len());
                (0..cols).map(move |j| {
                    buffer.clear();
                    buffer.extend(features.iter().map(|b| b[[i, j]]));
                    model.predict_proba(&buffer)
                })
            })
            .collect();

        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| BurnError::Processing(format!("Failed to shape classification: {}", e)))
    }

    /// Score one scene: bands {classification, time, NDVI, NBR}
    pub fn score_scene(&self, scene: &Scene) -> BurnResult<Scene> {
        let classification = self.classify_raster(&scene.raster)?;
        let time = Raster::broadcast(
            scene.raster.grid().clone(),
            bands::TIME,
            scene.metadata.days_since_epoch(),
        );

        let scored = Raster::new(scene.raster.grid().clone())
            .with_band_in(Stage::Classification, bands::CLASSIFICATION, classification)?
            .add_bands_from(Stage::Classification, &time, &[(bands::TIME, bands::TIME)])?
            .add_bands_from(
                Stage::Classification,
                &scene.raster,
                &[(bands::NDVI, bands::NDVI), (bands::NBR, bands::NBR)],
            )?;
        Ok(Scene::new(scored, scene.metadata.clone()))
    }

    /// Score every scene of a collection
    pub fn score_collection(&self, collection: &ImageCollection) -> BurnResult<ImageCollection> {
        self.model()?;
        log::info!("Scoring {} scenes", collection.len());
        collection.par_try_map(|scene| self.score_scene(scene))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GridSpec, SceneMetadata};
    use chrono::{TimeZone, Utc};

    fn separable_samples() -> Vec<Sample> {
        (0..40)
            .map(|i| {
                let x = i as f64 / 40.0;
                Sample {
                    features: vec![x, 0.5 - (i % 3) as f64 * 0.1],
                    class: if x > 0.5 { BurnClass::Burned } else { BurnClass::Unburned },
                }
            })
            .collect()
    }

    fn seeded(n_trees: usize) -> ForestParams {
        ForestParams {
            n_trees,
            seed: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn test_forest_separates_classes() {
        let forest = RandomForest::fit(&separable_samples(), &seeded(25)).unwrap();
        assert_eq!(forest.n_trees(), 25);
        assert!(forest.predict_proba(&[0.95, 0.4]) > 0.8);
        assert!(forest.predict_proba(&[0.05, 0.4]) < 0.2);
        let p = forest.predict_proba(&[0.6, 0.3]);
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn test_seeded_forest_is_reproducible() {
        let a = RandomForest::fit(&separable_samples(), &seeded(10)).unwrap();
        let b = RandomForest::fit(&separable_samples(), &seeded(10)).unwrap();
        for k in 0..50 {
            let x = [k as f64 / 50.0, 0.3];
            assert_eq!(a.predict_proba(&x).to_bits(), b.predict_proba(&x).to_bits());
        }
    }

    #[test]
    fn test_masked_features_give_masked_probability() {
        let forest = RandomForest::fit(&separable_samples(), &seeded(5)).unwrap();
        assert!(forest.predict_proba(&[f64::NAN, 0.4]).is_nan());
    }

    #[test]
    fn test_single_class_rejected() {
        let samples: Vec<Sample> = separable_samples()
            .into_iter()
            .filter(|s| s.class == BurnClass::Burned)
            .collect();
        assert!(matches!(
            RandomForest::fit(&samples, &seeded(5)),
            Err(BurnError::InvalidParameter(_))
        ));
        assert!(RandomForest::fit(&[], &seeded(5)).is_err());
    }

    fn feature_scene(burned_cols: Range<usize>) -> Scene {
        let grid = GridSpec::with_shape(4, 6);
        let data: Vec<(&str, BandData)> = bands::FEATURES
            .iter()
            .map(|name| {
                let band = Array2::from_shape_fn((4, 6), |(_, c)| {
                    if burned_cols.contains(&c) {
                        0.9
                    } else {
                        0.1
                    }
                });
                (*name, band)
            })
            .collect();
        Scene::new(
            Raster::from_bands(grid, data).unwrap(),
            SceneMetadata {
                scene_id: "LC08_L1TP_144040_20150412_20170410_01_T1".to_string(),
                acquired: Utc.with_ymd_and_hms(2015, 4, 12, 0, 0, 0).unwrap(),
                solar_zenith_deg: 30.0,
                solar_azimuth_deg: 130.0,
                cloud_cover: 3.0,
                wrs_path: 144,
                wrs_row: 40,
            },
        )
    }

    #[test]
    fn test_scoring_requires_training() {
        let classifier = ProbabilityClassifier::new(seeded(5));
        let collection = ImageCollection::new(vec![feature_scene(0..3)]);
        assert!(matches!(
            classifier.score_collection(&collection),
            Err(BurnError::ModelNotTrained)
        ));
    }

    #[test]
    fn test_train_on_regions_and_score() {
        let reference = feature_scene(0..3);
        let regions = vec![
            TrainingRegion::rectangle(BurnClass::Burned, 0..4, 0..3),
            TrainingRegion::rectangle(BurnClass::Unburned, 0..4, 3..6),
        ];
        let mut classifier = ProbabilityClassifier::new(seeded(20));
        classifier.train_on_regions(&reference.raster, &regions).unwrap();
        assert!(classifier.is_trained());

        let scored = classifier.score_scene(&feature_scene(2..6)).unwrap();
        assert_eq!(
            scored.raster.band_names(),
            vec![bands::CLASSIFICATION, bands::TIME, bands::NDVI, bands::NBR]
        );
        let prob = scored.raster.band(Stage::Classification, bands::CLASSIFICATION).unwrap();
        assert!(prob[[0, 4]] > 0.9);
        assert!(prob[[0, 0]] < 0.1);

        let time = scored.raster.band(Stage::Classification, bands::TIME).unwrap();
        let days = Utc.with_ymd_and_hms(2015, 4, 12, 0, 0, 0).unwrap().timestamp_millis() as f64
            / 86_400_000.0;
        assert!(time.iter().all(|t| *t == days));
    }

    #[test]
    fn test_sample_regions_skips_masked() {
        let mut scene = feature_scene(0..3);
        let mut red = scene.raster.band(Stage::Training, bands::RED).unwrap().clone();
        red[[0, 0]] = f64::NAN;
        scene.raster = scene.raster.with_band(bands::RED, red).unwrap();

        let regions = vec![TrainingRegion::rectangle(BurnClass::Burned, 0..2, 0..2)];
        let samples = sample_regions(&scene.raster, &regions, &bands::FEATURES).unwrap();
        assert_eq!(samples.len(), 3);

        let outside = vec![TrainingRegion {
            class: BurnClass::Unburned,
            pixels: vec![(10, 10)],
        }];
        assert!(sample_regions(&scene.raster, &outside, &bands::FEATURES).is_err());
    }
}
