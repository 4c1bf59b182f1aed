use crate::types::{bands, is_masked, BandData, BurnError, BurnResult, ImageCollection, Raster, Stage};
use ndarray::{Array2, Zip};

/// Per-pixel quality mosaic.
///
/// At every pixel all bands are taken from the single slice whose `quality`
/// band is maximal there. Ties go to the earliest slice; masked quality
/// values never win, and a pixel masked in every slice is masked in every
/// output band.
pub fn quality_mosaic(slices: &[&Raster], quality: &str) -> BurnResult<Raster> {
    let stage = Stage::Compositing;
    let first = slices
        .first()
        .ok_or_else(|| BurnError::EmptyCollection(format!("quality mosaic on '{}'", quality)))?;

    for slice in &slices[1..] {
        first.ensure_same_grid(stage, slice)?;
    }
    let names = first.band_names();
    for slice in slices {
        slice.require_bands(stage, &names)?;
    }

    let qualities: Vec<&BandData> = slices
        .iter()
        .map(|s| s.band(stage, quality))
        .collect::<BurnResult<_>>()?;
    let winner = select_best(&qualities, first.shape());

    let mut out = Raster::new(first.grid().clone());
    for name in names {
        let layers: Vec<&BandData> = slices
            .iter()
            .map(|s| s.band(stage, name))
            .collect::<BurnResult<_>>()?;
        let data = Zip::indexed(&winner).par_map_collect(|(i, j), pick| match pick {
            Some(k) => layers[*k][[i, j]],
            None => f64::NAN,
        });
        out = out.with_band_in(stage, name, data)?;
    }

    log::debug!(
        "Quality mosaic on '{}' over {} slices: {} pixels without a valid observation",
        quality,
        slices.len(),
        winner.iter().filter(|w| w.is_none()).count()
    );
    Ok(out)
}

/// Index of the first slice holding the maximal unmasked quality value
fn select_best(qualities: &[&BandData], shape: (usize, usize)) -> Array2<Option<usize>> {
    Zip::indexed(&Array2::<()>::from_elem(shape, ())).par_map_collect(|(i, j), _| {
        let mut best: Option<(usize, f64)> = None;
        for (k, q) in qualities.iter().enumerate() {
            let v = q[[i, j]];
            if is_masked(v) {
                continue;
            }
            if best.map_or(true, |(_, b)| v > b) {
                best = Some((k, v));
            }
        }
        best.map(|(k, _)| k)
    })
}

/// Quality mosaic over every scene of a collection
pub fn mosaic_collection(collection: &ImageCollection, quality: &str) -> BurnResult<Raster> {
    collection.require_non_empty(&format!("quality mosaic on '{}'", quality))?;
    let slices: Vec<&Raster> = collection.iter().map(|s| &s.raster).collect();
    quality_mosaic(&slices, quality)
}

/// Yearly product from a scored collection.
///
/// The highest-probability composite (classification, time, NDVI, NBR)
/// plus the greenest observation's NDVI and time (`Max_NDVI`, `time2`)
/// and the per-pixel maximum NBR (`Max_NBR`).
pub fn annual_product(scored: &ImageCollection) -> BurnResult<Raster> {
    log::info!("Building annual product from {} scored scenes", scored.len());
    let highest = mosaic_collection(scored, bands::CLASSIFICATION)?;
    let greenest = mosaic_collection(scored, bands::NDVI)?;
    let most_burned = mosaic_collection(scored, bands::NBR)?;

    highest
        .add_bands_from(
            Stage::Compositing,
            &greenest,
            &[(bands::NDVI, bands::MAX_NDVI), (bands::TIME, bands::TIME2)],
        )?
        .add_bands_from(Stage::Compositing, &most_burned, &[(bands::NBR, bands::MAX_NBR)])
}
