//! Spectral vegetation and burn indices
//!
//! Every index is a pure per-pixel formula over topographically corrected
//! reflectance. Zero denominators and masked inputs produce masked (`NaN`)
//! output rather than infinities.

use crate::types::{bands, BandData, BurnResult, ImageCollection, Raster, Scene, Stage};
use ndarray::Zip;
use num_traits::Float;

/// Enumeration of supported spectral indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralIndex {
    /// Normalized Difference Vegetation Index
    Ndvi,
    /// Normalized Burn Ratio, sign inverted so larger means more burned
    Nbr,
    /// Normalized Burn Ratio 2 (SWIR1/SWIR2)
    Nbr2,
    /// Normalized Difference Moisture Index
    Ndmi,
    /// Mid-Infrared Burn Index
    Mirbi,
    /// Soil Adjusted Vegetation Index (L = 0.5)
    Savi,
    /// Burned Area Index
    Bai,
    /// Global Environment Monitoring Index
    Gemi,
}

impl SpectralIndex {
    pub const ALL: [SpectralIndex; 8] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Nbr,
        SpectralIndex::Nbr2,
        SpectralIndex::Ndmi,
        SpectralIndex::Mirbi,
        SpectralIndex::Savi,
        SpectralIndex::Bai,
        SpectralIndex::Gemi,
    ];

    /// Output band name
    pub fn band_name(self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => bands::NDVI,
            SpectralIndex::Nbr => bands::NBR,
            SpectralIndex::Nbr2 => bands::NBR2,
            SpectralIndex::Ndmi => bands::NDMI,
            SpectralIndex::Mirbi => bands::MIRBI,
            SpectralIndex::Savi => bands::SAVI,
            SpectralIndex::Bai => bands::BAI,
            SpectralIndex::Gemi => bands::GEMI,
        }
    }

    /// Evaluate the index for one pixel
    pub fn evaluate<T: Float>(self, px: &Reflectance<T>) -> T {
        match self {
            SpectralIndex::Ndvi => ndvi(px.nir, px.red),
            SpectralIndex::Nbr => nbr(px.nir, px.swir2),
            SpectralIndex::Nbr2 => normalized_difference(px.swir1, px.swir2),
            SpectralIndex::Ndmi => normalized_difference(px.nir, px.swir1),
            SpectralIndex::Mirbi => mirbi(px.swir1, px.swir2),
            SpectralIndex::Savi => savi(px.nir, px.red),
            SpectralIndex::Bai => bai(px.nir, px.red),
            SpectralIndex::Gemi => gemi(px.nir, px.red),
        }
    }

    /// Compute the index band over a corrected raster
    pub fn compute(self, raster: &Raster) -> BurnResult<BandData> {
        let stage = Stage::SpectralIndices;
        let red = raster.band(stage, bands::RED)?;
        let nir = raster.band(stage, bands::NIR)?;
        let swir1 = raster.band(stage, bands::SWIR1)?;
        let swir2 = raster.band(stage, bands::SWIR2)?;

        Ok(Zip::from(red)
            .and(nir)
            .and(swir1)
            .and(swir2)
            .par_map_collect(|&red, &nir, &swir1, &swir2| {
                self.evaluate(&Reflectance {
                    red,
                    nir,
                    swir1,
                    swir2,
                })
            }))
    }
}

/// Reflectance values of one pixel needed by the indices
#[derive(Debug, Clone, Copy)]
pub struct Reflectance<T> {
    pub red: T,
    pub nir: T,
    pub swir1: T,
    pub swir2: T,
}

#[inline]
fn checked_div<T: Float>(numerator: T, denominator: T) -> T {
    if denominator == T::zero() || numerator.is_nan() || denominator.is_nan() {
        T::nan()
    } else {
        numerator / denominator
    }
}

fn lit<T: Float>(v: f64) -> T {
    T::from(v).unwrap_or_else(T::nan)
}

/// `(a - b) / (a + b)`
pub fn normalized_difference<T: Float>(a: T, b: T) -> T {
    checked_div(a - b, a + b)
}

/// NDVI = (nir − red) / (nir + red)
pub fn ndvi<T: Float>(nir: T, red: T) -> T {
    normalized_difference(nir, red)
}

/// NBR = −(nir − swir2) / (nir + swir2)
pub fn nbr<T: Float>(nir: T, swir2: T) -> T {
    -normalized_difference(nir, swir2)
}

/// MIRBI = 10·swir2 − 9.8·swir1 + 2
pub fn mirbi<T: Float>(swir1: T, swir2: T) -> T {
    lit::<T>(10.0) * swir2 - lit::<T>(9.8) * swir1 + lit(2.0)
}

/// SAVI = 1.5·(nir − red) / (nir + red + 0.5)
pub fn savi<T: Float>(nir: T, red: T) -> T {
    checked_div(lit::<T>(1.5) * (nir - red), nir + red + lit(0.5))
}

/// BAI = 1 / ((nir − 0.06)² + (red − 0.1)²)
pub fn bai<T: Float>(nir: T, red: T) -> T {
    let dn = nir - lit(0.06);
    let dr = red - lit(0.1);
    checked_div(T::one(), dn * dn + dr * dr)
}

/// GEMI = (N − 0.25·N² − (red − 0.125)) / (1 − red) with
/// N = (2·(nir² − red²) + 1.5·nir + 0.5·red) / (nir + red + 0.5)
pub fn gemi<T: Float>(nir: T, red: T) -> T {
    let n = checked_div(
        lit::<T>(2.0) * (nir * nir - red * red) + lit::<T>(1.5) * nir + lit::<T>(0.5) * red,
        nir + red + lit(0.5),
    );
    checked_div(n - lit::<T>(0.25) * n * n - (red - lit(0.125)), T::one() - red)
}

/// Append all spectral index bands to a corrected raster
pub fn add_spectral_indices(raster: &Raster) -> BurnResult<Raster> {
    let mut out = raster.clone();
    for index in SpectralIndex::ALL {
        out = out.with_band_in(Stage::SpectralIndices, index.band_name(), index.compute(raster)?)?;
    }
    Ok(out)
}

/// Append index bands to every scene of a collection
pub fn add_indices_to_collection(collection: &ImageCollection) -> BurnResult<ImageCollection> {
    log::info!("Computing spectral indices for {} scenes", collection.len());
    collection.par_try_map(|scene| {
        Ok(Scene::new(
            add_spectral_indices(&scene.raster)?,
            scene.metadata.clone(),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BurnError, GridSpec};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_ndvi_known_value() {
        assert_relative_eq!(ndvi(0.3_f64, 0.1), 0.5, epsilon = 1e-15);
        assert_relative_eq!(ndvi(0.3_f32, 0.1), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_nbr_sign_inverted() {
        // Healthy vegetation has high nir, low swir2: negative under the inverted convention
        assert!(nbr(0.4_f64, 0.1) < 0.0);
        assert_relative_eq!(nbr(0.4_f64, 0.1), -0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_formulas() {
        assert_relative_eq!(mirbi(0.2_f64, 0.3), 10.0 * 0.3 - 9.8 * 0.2 + 2.0, epsilon = 1e-12);
        assert_relative_eq!(savi(0.3_f64, 0.1), 1.5 * 0.2 / 0.9, epsilon = 1e-12);
        assert_relative_eq!(bai(0.16_f64, 0.2), 1.0 / 0.02, epsilon = 1e-9);

        let n = (2.0 * (0.09 - 0.01) + 1.5 * 0.3 + 0.5 * 0.1) / 0.9;
        let expected = (n - 0.25 * n * n - (0.1 - 0.125)) / 0.9;
        assert_relative_eq!(gemi(0.3_f64, 0.1), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_denominators_are_masked() {
        assert!(ndvi(0.0_f64, 0.0).is_nan());
        assert!(bai(0.06_f64, 0.1).is_nan());
        assert!(gemi(0.3_f64, 1.0).is_nan());
        assert!(savi(-0.25_f64, -0.25).is_nan());
        assert!(ndvi(f64::NAN, 0.1).is_nan());
    }

    #[test]
    fn test_indices_are_deterministic() {
        let px = Reflectance::<f64> {
            red: 0.07,
            nir: 0.31,
            swir1: 0.18,
            swir2: 0.11,
        };
        for index in SpectralIndex::ALL {
            let a = index.evaluate(&px);
            let b = index.evaluate(&px);
            assert_eq!(a.to_bits(), b.to_bits(), "{:?}", index);
        }
    }

    #[test]
    fn test_add_spectral_indices() {
        let grid = GridSpec::with_shape(2, 3);
        let raster = Raster::from_bands(
            grid,
            vec![
                (bands::RED, Array2::from_elem((2, 3), 0.1)),
                (bands::NIR, Array2::from_elem((2, 3), 0.3)),
                (bands::SWIR1, Array2::from_elem((2, 3), 0.2)),
                (bands::SWIR2, Array2::from_elem((2, 3), 0.1)),
            ],
        )
        .unwrap();
        let out = add_spectral_indices(&raster).unwrap();
        assert_eq!(out.band_count(), 12);
        let ndvi = out.band(Stage::SpectralIndices, bands::NDVI).unwrap();
        assert_relative_eq!(ndvi[[1, 2]], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_band() {
        let raster = Raster::broadcast(GridSpec::with_shape(2, 2), bands::RED, 0.1);
        let err = SpectralIndex::Ndvi.compute(&raster).unwrap_err();
        assert!(matches!(err, BurnError::MissingBand { ref band, .. } if band == "nir"));
    }
}
