use crate::core::composite::quality_mosaic as mosaic_rasters;
use crate::core::indices::{Reflectance, SpectralIndex};
use crate::core::region_growing::{connected_pixel_count as count_components, GrowthParams, RegionGrower};
use crate::io::scene_id::LandsatProductId;
use crate::types::{BurnError, GridSpec, Raster};
use ndarray::Zip;
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

fn to_py_err(e: BurnError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Convert PyReadonlyArray2 to ndarray Array2
fn numpy_to_array2<T>(arr: PyReadonlyArray2<T>) -> ndarray::Array2<T>
where
    T: Copy + numpy::Element,
{
    arr.as_array().to_owned()
}

/// All spectral indices from four reflectance arrays
#[pyfunction]
fn spectral_indices(
    py: Python,
    red: PyReadonlyArray2<f64>,
    nir: PyReadonlyArray2<f64>,
    swir1: PyReadonlyArray2<f64>,
    swir2: PyReadonlyArray2<f64>,
) -> PyResult<PyObject> {
    let (red, nir, swir1, swir2) = (
        numpy_to_array2(red),
        numpy_to_array2(nir),
        numpy_to_array2(swir1),
        numpy_to_array2(swir2),
    );
    if nir.dim() != red.dim() || swir1.dim() != red.dim() || swir2.dim() != red.dim() {
        return Err(PyValueError::new_err("reflectance arrays must share one shape"));
    }

    let result = PyDict::new(py);
    for index in SpectralIndex::ALL {
        let values = Zip::from(&red)
            .and(&nir)
            .and(&swir1)
            .and(&swir2)
            .par_map_collect(|&red, &nir, &swir1, &swir2| {
                index.evaluate(&Reflectance {
                    red,
                    nir,
                    swir1,
                    swir2,
                })
            });
        result.set_item(index.band_name(), values.to_pyarray(py))?;
    }
    Ok(result.into())
}

/// Quality mosaic over a list of {band name: array} dicts
#[pyfunction]
fn quality_mosaic(py: Python, slices: Vec<&PyDict>, quality: String) -> PyResult<PyObject> {
    let mut rasters = Vec::with_capacity(slices.len());
    for slice in slices {
        let mut bands = Vec::new();
        for (name, array) in slice.iter() {
            let name: String = name.extract()?;
            let array: PyReadonlyArray2<f64> = array.extract()?;
            bands.push((name, numpy_to_array2(array)));
        }
        let shape = bands.first().map(|(_, a)| a.dim()).unwrap_or((0, 0));
        rasters.push(Raster::from_bands(GridSpec::with_shape(shape.0, shape.1), bands).map_err(to_py_err)?);
    }

    let refs: Vec<&Raster> = rasters.iter().collect();
    let mosaic = mosaic_rasters(&refs, &quality).map_err(to_py_err)?;

    let result = PyDict::new(py);
    for band in mosaic.bands() {
        result.set_item(band.name.as_str(), band.data.to_pyarray(py))?;
    }
    Ok(result.into())
}

/// 8-connected component size of every foreground pixel, capped
#[pyfunction]
#[pyo3(signature = (mask, max_size=100))]
fn connected_pixel_count(py: Python, mask: PyReadonlyArray2<f64>, max_size: usize) -> PyResult<PyObject> {
    let counts = count_components(&numpy_to_array2(mask), max_size).mapv(|c| c as u64);
    Ok(counts.to_pyarray(py).into())
}

/// Seed filter and constrained region growing
#[pyfunction]
#[pyo3(signature = (fire, growing, max_component_size=100, min_component_size=11, max_iterations=200))]
fn region_growing(
    py: Python,
    fire: PyReadonlyArray2<f64>,
    growing: PyReadonlyArray2<f64>,
    max_component_size: usize,
    min_component_size: usize,
    max_iterations: usize,
) -> PyResult<PyObject> {
    let grower = RegionGrower::new(GrowthParams {
        max_component_size,
        min_component_size,
        max_iterations,
    });
    let outcome = grower
        .grow(&numpy_to_array2(fire), &numpy_to_array2(growing))
        .map_err(to_py_err)?;

    let result = PyDict::new(py);
    result.set_item("extent", outcome.extent.to_pyarray(py))?;
    result.set_item("mainfire", outcome.seed.to_pyarray(py))?;
    result.set_item("iterations", outcome.iterations)?;
    result.set_item("converged", outcome.converged)?;
    Ok(result.into())
}

/// Parse a Landsat scene identifier
#[pyfunction]
fn parse_scene_id(py: Python, scene_id: String) -> PyResult<PyObject> {
    let id = LandsatProductId::parse(&scene_id).map_err(to_py_err)?;

    let result = PyDict::new(py);
    result.set_item("satellite", id.satellite)?;
    result.set_item("wrs_path", id.wrs_path)?;
    result.set_item("wrs_row", id.wrs_row)?;
    result.set_item("acquired", id.acquired.format("%Y-%m-%d").to_string())?;
    result.set_item("processing_level", id.processing_level)?;
    result.set_item("tier", id.tier)?;
    Ok(result.into())
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    // Stage-level operations on plain numpy arrays
    m.add_function(wrap_pyfunction!(spectral_indices, m)?)?;
    m.add_function(wrap_pyfunction!(quality_mosaic, m)?)?;
    m.add_function(wrap_pyfunction!(connected_pixel_count, m)?)?;
    m.add_function(wrap_pyfunction!(region_growing, m)?)?;

    m.add_function(wrap_pyfunction!(parse_scene_id, m)?)?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
