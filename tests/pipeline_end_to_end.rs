use ndarray::Array2;
use psfpatch::{
    regular_corners, AverageMode, CoordinateId, DetectConfig, FitConfig, Gaussian2d, PatchStore,
    PsfModel, ThresholdDetector,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;

fn star_image(stars: &[(f64, f64, f64)], sigma: f64, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 2.0).unwrap();
    Array2::from_shape_fn((96, 96), |(r, c)| {
        let mut v = 50.0 + noise.sample(&mut rng);
        for &(row, col, amp) in stars {
            let d2 = (r as f64 - row).powi(2) + (c as f64 - col).powi(2);
            v += amp * (-d2 / (2.0 * sigma * sigma)).exp();
        }
        v
    })
}

#[test]
fn detect_average_and_fit() {
    let sigma = 1.8;
    let images = vec![
        star_image(&[(20.0, 20.0, 400.0), (70.0, 25.0, 300.0)], sigma, 1),
        star_image(&[(22.0, 70.0, 350.0), (68.0, 72.0, 500.0)], sigma, 2),
    ];
    let detector = ThresholdDetector::new(DetectConfig {
        threshold: 5.0,
        min_area: 4,
    });
    let store = PatchStore::find_stars_and_create(&images, 15, &detector).unwrap();
    assert_eq!(store.len(), 4);
    assert!(store.keys().all(|key| key.image_index.is_some()));

    let path = std::env::temp_dir().join(format!("psfpatch-e2e-{}.bin", std::process::id()));
    store.save(&path).unwrap();
    let store = PatchStore::<CoordinateId>::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let corners = regular_corners(96, 96, 48);
    let averaged = store.average(&corners, 48, 15, AverageMode::Median).unwrap();
    assert_eq!(averaged.len(), 4);

    let initial: HashMap<String, f64> = Gaussian2d
        .parameters()
        .iter()
        .zip([1.0, 7.0, 7.0, 2.0, 2.0, 0.0])
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    let results = averaged
        .fit(&Gaussian2d, &initial, &FitConfig::default())
        .unwrap();
    assert_eq!(results.len(), 4);
    for (key, result) in &results {
        let fit = result.as_ref().unwrap();
        let sx = fit.value("sigma_x").unwrap();
        let sy = fit.value("sigma_y").unwrap();
        assert!((sx - sigma).abs() < 0.25, "{key}: sigma_x {sx}");
        assert!((sy - sigma).abs() < 0.25, "{key}: sigma_y {sy}");
    }
}
