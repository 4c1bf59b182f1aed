use crate::types::{is_masked, BandData, BurnError, BurnResult, Stage};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;

/// Seed filter and constrained growth parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthParams {
    /// Component sizes are counted up to this cap
    pub max_component_size: usize,
    /// Components must be strictly larger than this to seed growth
    pub min_component_size: usize,
    /// Upper bound on growth iterations after the initial step
    pub max_iterations: usize,
}

impl Default for GrowthParams {
    fn default() -> Self {
        Self {
            max_component_size: 100,
            min_component_size: 11,
            max_iterations: 200,
        }
    }
}

impl GrowthParams {
    pub fn validate(&self) -> BurnResult<()> {
        if self.max_component_size <= self.min_component_size {
            return Err(BurnError::InvalidParameter(format!(
                "max_component_size ({}) must exceed min_component_size ({})",
                self.max_component_size, self.min_component_size
            )));
        }
        Ok(())
    }
}

/// Final extent of a growth run
#[derive(Debug, Clone, PartialEq)]
pub struct GrowthOutcome {
    /// Seed mask after the component-size filter
    pub seed: BandData,
    /// `{0,1}` extent, masked where eligibility is masked
    pub extent: BandData,
    /// Iterations performed after the initial step
    pub iterations: usize,
    /// True if a fixed point was reached before the cap
    pub converged: bool,
}

fn find_root(labels: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while current != labels[current] {
        labels[current] = labels[labels[current]];
        current = labels[current];
    }
    current
}

fn union_labels(labels: &mut [usize], a: usize, b: usize) {
    let root_a = find_root(labels, a);
    let root_b = find_root(labels, b);
    if root_a < root_b {
        labels[root_b] = root_a;
    } else if root_b < root_a {
        labels[root_a] = root_b;
    }
}

/// 8-connected component labels of `mask > 0` (0 is background) and the
/// pixel count of every label
pub fn label_components(mask: &BandData) -> (Array2<usize>, Vec<usize>) {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::<usize>::zeros((rows, cols));
    let mut parents = vec![0usize];

    for i in 0..rows {
        for j in 0..cols {
            if !(mask[[i, j]] > 0.0) {
                continue;
            }
            // Already visited neighbours: W, NW, N, NE
            let mut neighbours = [0usize; 4];
            if j > 0 {
                neighbours[0] = labels[[i, j - 1]];
            }
            if i > 0 {
                if j > 0 {
                    neighbours[1] = labels[[i - 1, j - 1]];
                }
                neighbours[2] = labels[[i - 1, j]];
                if j + 1 < cols {
                    neighbours[3] = labels[[i - 1, j + 1]];
                }
            }

            match neighbours.iter().copied().filter(|&l| l > 0).min() {
                None => {
                    let label = parents.len();
                    parents.push(label);
                    labels[[i, j]] = label;
                }
                Some(min_label) => {
                    labels[[i, j]] = min_label;
                    for &n in neighbours.iter().filter(|&&l| l > 0 && l != min_label) {
                        union_labels(&mut parents, min_label, n);
                    }
                }
            }
        }
    }

    for label in 1..parents.len() {
        find_root(&mut parents, label);
    }
    let mut sizes = vec![0usize; parents.len()];
    labels.mapv_inplace(|l| if l > 0 { parents[l] } else { 0 });
    for &l in labels.iter() {
        if l > 0 {
            sizes[l] += 1;
        }
    }
    (labels, sizes)
}

/// Size of the 8-connected component of every foreground pixel, capped at
/// `cap`. Background pixels are 0.
pub fn connected_pixel_count(mask: &BandData, cap: usize) -> Array2<usize> {
    let (labels, sizes) = label_components(mask);
    labels.mapv(|l| if l > 0 { sizes[l].min(cap) } else { 0 })
}

/// `{0,1}` mask of components larger than `min_component_size`
pub fn seed_mask(fire: &BandData, params: &GrowthParams) -> BandData {
    connected_pixel_count(fire, params.max_component_size)
        .mapv(|count| if count > params.min_component_size { 1.0 } else { 0.0 })
}

/// 3x3 focal maximum over in-bounds neighbours. Masked neighbours count as 0.
pub fn dilate_square(state: &BandData) -> BandData {
    let (rows, cols) = state.dim();
    Zip::indexed(state).par_map_collect(|(i, j), _| {
        let mut max = 0.0f64;
        for ii in i.saturating_sub(1)..=(i + 1).min(rows - 1) {
            for jj in j.saturating_sub(1)..=(j + 1).min(cols - 1) {
                let v = state[[ii, jj]];
                if v > max {
                    max = v;
                }
            }
        }
        max
    })
}

/// One constrained growth step: dilate, then keep eligible pixels only.
/// Pixels with masked eligibility stay masked.
pub fn grow_step(state: &BandData, growing: &BandData) -> BandData {
    let dilated = dilate_square(state);
    Zip::from(&dilated)
        .and(growing)
        .par_map_collect(|&d, &g| if is_masked(g) { f64::NAN } else { d * g })
}

/// Equality of two growth states, with masked pixels equal to each other
pub fn same_state(a: &BandData, b: &BandData) -> bool {
    a.dim() == b.dim()
        && Zip::from(a)
            .and(b)
            .all(|&x, &y| x == y || (is_masked(x) && is_masked(y)))
}

/// Constrained region growing from `seed` inside `growing`.
///
/// Returns the extent, the number of iterations after the initial step and
/// whether the mask stopped changing before `max_iterations`.
pub fn grow_region(seed: &BandData, growing: &BandData, max_iterations: usize) -> (BandData, usize, bool) {
    let initial = grow_step(seed, growing);

    let folded = (0..max_iterations).try_fold((initial, 0usize), |(state, _), k| {
        let next = grow_step(&state, growing);
        if same_state(&next, &state) {
            ControlFlow::Break((state, k))
        } else {
            ControlFlow::Continue((next, k + 1))
        }
    });

    match folded {
        ControlFlow::Break((extent, iterations)) => (extent, iterations, true),
        ControlFlow::Continue((extent, iterations)) => (extent, iterations, false),
    }
}

/// Seed filter followed by constrained growth
#[derive(Debug, Clone, Default)]
pub struct RegionGrower {
    params: GrowthParams,
}

impl RegionGrower {
    pub fn new(params: GrowthParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GrowthParams {
        &self.params
    }

    /// Grow the main fire components of `fire` under `growing`
    pub fn grow(&self, fire: &BandData, growing: &BandData) -> BurnResult<GrowthOutcome> {
        self.params.validate()?;
        if fire.dim() != growing.dim() {
            return Err(BurnError::GridMismatch {
                stage: Stage::RegionGrowing,
                expected: format!("{:?}", fire.dim()),
                found: format!("{:?}", growing.dim()),
            });
        }

        let seed = seed_mask(fire, &self.params);
        log::info!(
            "Region growing from {} seed pixels (max {} iterations)",
            seed.iter().filter(|v| **v > 0.0).count(),
            self.params.max_iterations
        );

        let (extent, iterations, converged) = grow_region(&seed, growing, self.params.max_iterations);
        if converged {
            log::debug!("Region growing converged after {} iterations", iterations);
        } else {
            log::warn!(
                "Region growing stopped at the {} iteration cap without converging",
                self.params.max_iterations
            );
        }

        Ok(GrowthOutcome {
            seed,
            extent,
            iterations,
            converged,
        })
    }
}
