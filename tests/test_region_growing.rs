use burnmap::core::region_growing::{
    connected_pixel_count, grow_region, seed_mask, GrowthParams, RegionGrower,
};
use ndarray::{s, Array2};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_three_by_three_seed_fills_open_grid() {
    init_logging();
    let mut seed = Array2::zeros((10, 10));
    seed.slice_mut(s![4..7, 4..7]).fill(1.0);
    let growing = Array2::from_elem((10, 10), 1.0);

    // Too small for the component filter, so growth starts from it directly
    assert!(seed_mask(&seed, &GrowthParams::default()).iter().all(|v| *v == 0.0));

    let (extent, iterations, converged) = grow_region(&seed, &growing, 200);
    assert!(converged);
    assert!(iterations <= 10, "took {} iterations", iterations);
    assert!(extent.iter().all(|v| *v == 1.0));

    let (again, extra, _) = grow_region(&extent, &growing, 200);
    assert_eq!(again, extent);
    assert_eq!(extra, 0);
}

#[test]
fn test_growth_stays_inside_eligible_pixels() {
    let mut seed = Array2::zeros((10, 10));
    seed.slice_mut(s![2..5, 2..5]).fill(1.0);
    let growing = seed.clone();

    let (extent, _, converged) = grow_region(&seed, &growing, 200);
    assert!(converged);
    assert_eq!(extent, seed);
}

#[test]
fn test_growth_follows_a_corridor() {
    // Eligible L-shaped corridor leading away from the seed
    let mut fire = Array2::zeros((12, 12));
    fire.slice_mut(s![0..4, 0..4]).fill(1.0);
    let mut growing = Array2::zeros((12, 12));
    growing.slice_mut(s![0..4, 0..4]).fill(1.0);
    growing.slice_mut(s![3, 0..12]).fill(1.0);
    growing.slice_mut(s![3..12, 11]).fill(1.0);
    // Isolated eligible pixel far from the seed
    growing[[0, 11]] = 1.0;

    let outcome = RegionGrower::default().grow(&fire, &growing).expect("growth");
    assert!(outcome.converged);
    assert_eq!(outcome.extent[[11, 11]], 1.0);
    assert_eq!(outcome.extent[[3, 7]], 1.0);
    assert_eq!(outcome.extent[[0, 11]], 0.0);
    assert_eq!(outcome.extent[[6, 6]], 0.0);
    // One pixel per step along the corridor, with the corner taken diagonally
    assert_eq!(outcome.iterations, 14);
}

#[test]
fn test_eleven_pixels_rejected_twelve_retained() {
    let params = GrowthParams::default();

    let mut eleven = Array2::zeros((6, 6));
    eleven.slice_mut(s![0..2, 0..5]).fill(1.0);
    eleven[[2, 0]] = 1.0;
    assert_eq!(connected_pixel_count(&eleven, 100)[[0, 0]], 11);
    assert!(seed_mask(&eleven, &params).iter().all(|v| *v == 0.0));

    let mut twelve = eleven.clone();
    twelve[[3, 1]] = 1.0; // diagonal neighbour of (2, 0)
    assert_eq!(connected_pixel_count(&twelve, 100)[[3, 1]], 12);
    assert_eq!(seed_mask(&twelve, &params).sum(), 12.0);
}

#[test]
fn test_large_component_reports_cap() {
    let fire = Array2::from_elem((15, 15), 1.0);
    let counts = connected_pixel_count(&fire, 100);
    assert!(counts.iter().all(|c| *c == 100));
    assert_eq!(seed_mask(&fire, &GrowthParams::default()).sum(), 225.0);
}
