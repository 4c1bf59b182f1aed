use crate::types::{bands, is_masked, BandData, BurnResult, ImageCollection, Raster, Scene, Stage};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

const WATER_BIT: u32 = 2;
const CLOUD_SHADOW_BIT: u32 = 3;
const SNOW_BIT: u32 = 4;
const CLOUD_BIT: u32 = 5;

/// Which Landsat `pixel_qa` flags exclude a pixel
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QaMaskFlags {
    pub water: bool,
    pub cloud_shadow: bool,
    pub snow: bool,
    pub cloud: bool,
}

impl Default for QaMaskFlags {
    fn default() -> Self {
        Self {
            water: true,
            cloud_shadow: true,
            snow: true,
            cloud: true,
        }
    }
}

impl QaMaskFlags {
    /// Bitmask of the enabled flags
    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.water {
            bits |= 1 << WATER_BIT;
        }
        if self.cloud_shadow {
            bits |= 1 << CLOUD_SHADOW_BIT;
        }
        if self.snow {
            bits |= 1 << SNOW_BIT;
        }
        if self.cloud {
            bits |= 1 << CLOUD_BIT;
        }
        bits
    }

    /// True when a QA word carries none of the enabled flags
    pub fn is_clear(&self, qa: u32) -> bool {
        qa & self.bits() == 0
    }
}

/// Decode a QA band into a clear-pixel mask. Masked QA values are not clear.
pub fn clear_mask(qa: &BandData, flags: &QaMaskFlags) -> Array2<bool> {
    qa.mapv(|v| !is_masked(v) && v >= 0.0 && flags.is_clear(v as u32))
}

/// Mask every band of a scene (except the QA band itself) where the QA
/// band flags water, cloud shadow, snow or cloud
pub fn apply_qa_mask(scene: &Scene, flags: &QaMaskFlags) -> BurnResult<Scene> {
    let qa = scene.raster.band(Stage::QaMask, bands::QA)?;
    let clear = clear_mask(qa, flags);

    let mut masked = Raster::new(scene.raster.grid().clone());
    for band in scene.raster.bands() {
        let data = if band.name == bands::QA {
            band.data.clone()
        } else {
            Zip::from(&band.data)
                .and(&clear)
                .par_map_collect(|&v, &ok| if ok { v } else { f64::NAN })
        };
        masked = masked.with_band_in(Stage::QaMask, band.name.clone(), data)?;
    }

    let kept = clear.iter().filter(|c| **c).count();
    log::debug!(
        "{}: {}/{} pixels clear after QA masking",
        scene.metadata.scene_id,
        kept,
        clear.len()
    );
    Ok(Scene::new(masked, scene.metadata.clone()))
}

/// Apply QA masking to every scene
pub fn mask_collection(collection: &ImageCollection, flags: &QaMaskFlags) -> BurnResult<ImageCollection> {
    log::info!("Applying QA mask to {} scenes", collection.len());
    collection.par_try_map(|scene| apply_qa_mask(scene, flags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GridSpec, SceneMetadata};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_flag_bits() {
        let flags = QaMaskFlags::default();
        assert_eq!(flags.bits(), 0b11_1100);
        // Clear land (bit 1) and radiometric saturation bits stay valid
        assert!(flags.is_clear(322 & !0b11_1100));
        assert!(flags.is_clear(0b10));
        assert!(!flags.is_clear(1 << 2));
        assert!(!flags.is_clear(1 << 3));
        assert!(!flags.is_clear(1 << 4));
        assert!(!flags.is_clear(1 << 5));
        assert!(flags.is_clear(1 << 6));
    }

    #[test]
    fn test_disabled_flag_keeps_water() {
        let flags = QaMaskFlags {
            water: false,
            ..Default::default()
        };
        assert!(flags.is_clear(1 << 2));
        assert!(!flags.is_clear(1 << 5));
    }

    #[test]
    fn test_apply_qa_mask() {
        let grid = GridSpec::with_shape(1, 3);
        let qa = Array2::from_shape_vec((1, 3), vec![66.0, 66.0 + 32.0, f64::NAN]).unwrap();
        let raster = Raster::from_bands(
            grid,
            vec![(bands::RED, Array2::from_elem((1, 3), 700.0)), (bands::QA, qa)],
        )
        .unwrap();
        let scene = Scene::new(
            raster,
            SceneMetadata {
                scene_id: "qa".to_string(),
                acquired: Utc.with_ymd_and_hms(2015, 5, 1, 0, 0, 0).unwrap(),
                solar_zenith_deg: 30.0,
                solar_azimuth_deg: 120.0,
                cloud_cover: 20.0,
                wrs_path: 144,
                wrs_row: 40,
            },
        );

        let masked = apply_qa_mask(&scene, &QaMaskFlags::default()).unwrap();
        let red = masked.raster.band(Stage::QaMask, bands::RED).unwrap();
        assert_eq!(red[[0, 0]], 700.0);
        assert!(red[[0, 1]].is_nan());
        assert!(red[[0, 2]].is_nan());
        assert_eq!(masked.raster.band(Stage::QaMask, bands::QA).unwrap()[[0, 1]], 98.0);
    }
}
