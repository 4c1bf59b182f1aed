use crate::core::composite::quality_mosaic;
use crate::types::{bands, is_masked, BandData, BurnResult, Raster, Stage};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Decision thresholds for the fire and regeneration rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionThresholds {
    /// C1: year-2 NDVI must exceed this
    pub min_regrowth_ndvi: f64,
    /// C2: NDVI increase between the two years
    pub min_ndvi_increase: f64,
    /// C3: drop of the sign-inverted NBR between the two years
    pub min_nbr_decrease: f64,
    /// C4: days between the year-1 observation and the year-2 greenest observation
    pub min_elapsed_days: f64,
    /// Fire = classification · conditions above this
    pub fire_probability: f64,
    /// Growing eligibility = classification above this, and C1
    pub growing_probability: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            min_regrowth_ndvi: 0.5,
            min_ndvi_increase: 0.2,
            min_nbr_decrease: 0.1,
            min_elapsed_days: 60.0,
            fire_probability: 0.75,
            growing_probability: 0.35,
        }
    }
}

/// `{0,1}` condition layers; masked inputs give masked (`NaN`) conditions
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionMasks {
    pub c1: BandData,
    pub c2: BandData,
    pub c3: BandData,
    pub c4: BandData,
    /// C1 · C2 · C3 · C4
    pub conditions: BandData,
}

/// Output of the decision rule
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// Year-1 product with NDVI2, t2 and NBR3 attached
    pub attached: Raster,
    pub masks: ConditionMasks,
    /// Candidate fire mask `{0,1}`
    pub fire: BandData,
    /// Growing eligibility `{0,1}`
    pub growing: BandData,
}

#[inline]
fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// `{0,1}` of a predicate over two inputs, masked if either is
#[inline]
fn compare(a: f64, b: f64, predicate: impl Fn(f64, f64) -> bool) -> f64 {
    if is_masked(a) || is_masked(b) {
        f64::NAN
    } else {
        flag(predicate(a, b))
    }
}

/// Multi-condition fire and regeneration detector
#[derive(Debug, Clone, Default)]
pub struct FireDetector {
    thresholds: DetectionThresholds,
}

impl FireDetector {
    pub fn new(thresholds: DetectionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &DetectionThresholds {
        &self.thresholds
    }

    /// Attach the regeneration bands to the year-1 product.
    ///
    /// Both annual products are mosaicked on `Max_NDVI`; the winner's
    /// `Max_NDVI`, `time2` and `Max_NBR` become `NDVI2`, `t2` and `NBR3`.
    pub fn attach_regeneration(&self, year1: &Raster, year2: &Raster) -> BurnResult<Raster> {
        let stage = Stage::FireDetection;
        let regrowth = quality_mosaic(&[year1, year2], bands::MAX_NDVI)?;
        year1.clone().add_bands_from(
            stage,
            &regrowth,
            &[
                (bands::MAX_NDVI, bands::NDVI2),
                (bands::TIME2, bands::T2),
                (bands::MAX_NBR, bands::NBR3),
            ],
        )
    }

    /// Evaluate C1 to C4 over the attached year-1 raster and the year-2 product
    pub fn conditions(&self, attached: &Raster, year2: &Raster) -> BurnResult<ConditionMasks> {
        let stage = Stage::FireDetection;
        attached.ensure_same_grid(stage, year2)?;
        let t = &self.thresholds;

        let ndvi = attached.band(stage, bands::NDVI)?;
        let nbr = attached.band(stage, bands::NBR)?;
        let time = attached.band(stage, bands::TIME)?;
        let ndvi2 = attached.band(stage, bands::NDVI2)?;
        let t2 = attached.band(stage, bands::T2)?;
        let nbr_year2 = year2.band(stage, bands::MAX_NBR)?;

        let c1 = ndvi2.mapv(|v| compare(v, t.min_regrowth_ndvi, |a, b| a > b));
        let c2 = Zip::from(ndvi2)
            .and(ndvi)
            .par_map_collect(|&n2, &n1| compare(n2, n1, |a, b| a - b > t.min_ndvi_increase));
        let c3 = Zip::from(nbr_year2)
            .and(nbr)
            .par_map_collect(|&b2, &b1| compare(b2, b1, |a, b| (-a) - (-b) > t.min_nbr_decrease));
        // Literal disjunction: an inverted ordering also passes
        let c4 = Zip::from(t2)
            .and(time)
            .par_map_collect(|&t2, &t1| compare(t2, t1, |a, b| a - b > t.min_elapsed_days || b > a));
        let conditions = Zip::from(&c1)
            .and(&c2)
            .and(&c3)
            .and(&c4)
            .par_map_collect(|&a, &b, &c, &d| a * b * c * d);

        Ok(ConditionMasks {
            c1,
            c2,
            c3,
            c4,
            conditions,
        })
    }

    /// Run the full decision rule on two annual products
    pub fn detect(&self, year1: &Raster, year2: &Raster) -> BurnResult<DetectionResult> {
        log::info!("Evaluating fire and regeneration conditions");
        year1.ensure_same_grid(Stage::FireDetection, year2)?;
        let t = &self.thresholds;

        let attached = self.attach_regeneration(year1, year2)?;
        let masks = self.conditions(&attached, year2)?;
        let classification = attached.band(Stage::FireDetection, bands::CLASSIFICATION)?;

        let fire = Zip::from(classification)
            .and(&masks.conditions)
            .par_map_collect(|&p, &c| compare(p, c, |p, c| p * c > t.fire_probability));
        let growing = Zip::from(classification)
            .and(&masks.c1)
            .par_map_collect(|&p, &c1| compare(p, c1, |p, c1| p > t.growing_probability && c1 > 0.0));

        log::debug!(
            "Candidate fire pixels: {}, growing-eligible pixels: {}",
            fire.iter().filter(|v| **v > 0.0).count(),
            growing.iter().filter(|v| **v > 0.0).count()
        );

        Ok(DetectionResult {
            attached,
            masks,
            fire,
            growing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GridSpec;
    use ndarray::Array2;

    fn product(prob: f64, ndvi: f64, nbr: f64, time: f64, max_ndvi: f64, time2: f64, max_nbr: f64) -> Raster {
        let values = [
            (bands::CLASSIFICATION, prob),
            (bands::TIME, time),
            (bands::NDVI, ndvi),
            (bands::NBR, nbr),
            (bands::MAX_NDVI, max_ndvi),
            (bands::TIME2, time2),
            (bands::MAX_NBR, max_nbr),
        ];
        Raster::from_bands(
            GridSpec::with_shape(1, 1),
            values
                .iter()
                .map(|(name, v)| (*name, Array2::from_elem((1, 1), *v)))
                .collect(),
        )
        .unwrap()
    }

    fn burned_then_regrown() -> (Raster, Raster) {
        // Year 1: burned (low NDVI, high inverted NBR); year 2 greener by 0.5 and 200 days later
        let year1 = product(0.9, 0.1, 0.3, 16_800.0, 0.2, 16_790.0, 0.35);
        let year2 = product(0.2, 0.5, -0.2, 17_100.0, 0.6, 17_000.0, 0.0);
        (year1, year2)
    }

    #[test]
    fn test_single_pixel_fire() {
        let (year1, year2) = burned_then_regrown();
        let result = FireDetector::default().detect(&year1, &year2).unwrap();

        let attached = &result.attached;
        assert_eq!(attached.band(Stage::FireDetection, bands::NDVI2).unwrap()[[0, 0]], 0.6);
        assert_eq!(attached.band(Stage::FireDetection, bands::T2).unwrap()[[0, 0]], 17_000.0);
        assert_eq!(attached.band(Stage::FireDetection, bands::NBR3).unwrap()[[0, 0]], 0.0);

        assert_eq!(result.masks.conditions[[0, 0]], 1.0);
        assert_eq!(result.fire[[0, 0]], 1.0);
        assert_eq!(result.growing[[0, 0]], 1.0);
    }

    /// 5x5 product with `centre` values at (2, 2) and `rest` values elsewhere
    fn centred_product(centre: [f64; 7], rest: [f64; 7]) -> Raster {
        let names = [
            bands::CLASSIFICATION,
            bands::NDVI,
            bands::NBR,
            bands::TIME,
            bands::MAX_NDVI,
            bands::TIME2,
            bands::MAX_NBR,
        ];
        let layers = names
            .iter()
            .enumerate()
            .map(|(k, name)| {
                let data = Array2::from_shape_fn((5, 5), |(i, j)| {
                    if (i, j) == (2, 2) {
                        centre[k]
                    } else {
                        rest[k]
                    }
                });
                (*name, data)
            })
            .collect();
        Raster::from_bands(GridSpec::with_shape(5, 5), layers).unwrap()
    }

    #[test]
    fn test_one_qualifying_pixel_in_a_grid() {
        // Only the centre is burned in year 1; its neighbours were already green, failing C2
        let year1 = centred_product(
            [0.8, 0.1, 0.3, 16_800.0, 0.2, 16_790.0, 0.35],
            [0.4, 0.5, 0.3, 16_800.0, 0.2, 16_790.0, 0.35],
        );
        let year2_values = [0.2, 0.5, -0.2, 17_100.0, 0.6, 17_000.0, 0.0];
        let year2 = centred_product(year2_values, year2_values);

        let result = FireDetector::default().detect(&year1, &year2).unwrap();
        assert_eq!(result.masks.conditions.sum(), 1.0);
        assert_eq!(result.masks.conditions[[2, 2]], 1.0);
        assert_eq!(result.fire.sum(), 1.0);
        assert_eq!(result.fire[[2, 2]], 1.0);

        for ((i, j), g) in result.growing.indexed_iter() {
            assert_eq!(*g, 1.0, "growing at ({}, {})", i, j);
        }

        // Neighbours below the growing threshold are not eligible
        let year1 = centred_product(
            [0.8, 0.1, 0.3, 16_800.0, 0.2, 16_790.0, 0.35],
            [0.3, 0.5, 0.3, 16_800.0, 0.2, 16_790.0, 0.35],
        );
        let result = FireDetector::default().detect(&year1, &year2).unwrap();
        assert_eq!(result.growing.sum(), 1.0);
        assert_eq!(result.fire.sum(), 1.0);
    }

    #[test]
    fn test_low_probability_is_not_fire_but_may_grow() {
        let (_, year2) = burned_then_regrown();
        let year1 = product(0.5, 0.1, 0.3, 16_800.0, 0.2, 16_790.0, 0.35);
        let result = FireDetector::default().detect(&year1, &year2).unwrap();
        assert_eq!(result.fire[[0, 0]], 0.0);
        assert_eq!(result.growing[[0, 0]], 1.0);
    }

    #[test]
    fn test_inverted_time_order_passes_c4() {
        let (year1, _) = burned_then_regrown();
        let year2 = product(0.2, 0.5, -0.2, 16_700.0, 0.6, 16_700.0, 0.0);
        let detector = FireDetector::default();
        let attached = detector.attach_regeneration(&year1, &year2).unwrap();
        let masks = detector.conditions(&attached, &year2).unwrap();
        assert_eq!(masks.c4[[0, 0]], 1.0);

        // 30 days later in the right order fails
        let year2 = product(0.2, 0.5, -0.2, 16_830.0, 0.6, 16_830.0, 0.0);
        let attached = detector.attach_regeneration(&year1, &year2).unwrap();
        assert_eq!(detector.conditions(&attached, &year2).unwrap().c4[[0, 0]], 0.0);
    }

    #[test]
    fn test_masked_inputs_give_masked_conditions() {
        let (year1, _) = burned_then_regrown();
        let year2 = product(0.2, 0.5, -0.2, 17_100.0, 0.6, 17_000.0, f64::NAN);
        let result = FireDetector::default().detect(&year1, &year2).unwrap();
        assert!(result.masks.c3[[0, 0]].is_nan());
        assert!(result.masks.conditions[[0, 0]].is_nan());
        assert!(result.fire[[0, 0]].is_nan());
        assert_eq!(result.masks.c1[[0, 0]], 1.0);
    }

    #[test]
    fn test_conditions_are_idempotent() {
        let (year1, year2) = burned_then_regrown();
        let detector = FireDetector::default();
        let attached = detector.attach_regeneration(&year1, &year2).unwrap();
        let first = detector.conditions(&attached, &year2).unwrap();
        let second = detector.conditions(&attached, &year2).unwrap();
        assert_eq!(first, second);
    }
}
