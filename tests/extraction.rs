use ndarray::Array2;
use psfpatch::{
    CoordinateId, DetectConfig, Detections, PatchStore, PsfPatchError, PsfPatchResult, Source,
    ThresholdDetector,
};

fn ramp(rows: usize, cols: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c + 1) as f64)
}

#[test]
fn every_coordinate_yields_full_patch() {
    let images = vec![ramp(20, 30), ramp(8, 8)];
    let coordinates = vec![
        CoordinateId::new(0, 0, 0),
        CoordinateId::new(0, 15, 25),
        CoordinateId::new(1, -3, -3),
        CoordinateId::new(1, 6, 2),
    ];
    let size = 7;
    let store = PatchStore::extract(&images, &coordinates, size).unwrap();
    assert_eq!(store.len(), coordinates.len());
    assert_eq!(store.size(), Some(size));
    for coordinate in &coordinates {
        assert_eq!(store.get(coordinate).unwrap().dim(), (size, size));
    }
}

#[test]
fn interior_patch_matches_source() {
    let image = ramp(20, 30);
    let store =
        PatchStore::extract(std::slice::from_ref(&image), &[CoordinateId::new(0, 4, 9)], 5)
            .unwrap();
    let patch = store.get(&CoordinateId::new(0, 4, 9)).unwrap();
    for r in 0..5 {
        for c in 0..5 {
            assert_eq!(patch[[r, c]], image[[4 + r, 9 + c]]);
        }
    }
}

#[test]
fn edge_patch_is_zero_outside_image() {
    let image = ramp(10, 10);
    let id = CoordinateId::new(0, -2, 7);
    let store = PatchStore::extract(std::slice::from_ref(&image), &[id], 5).unwrap();
    let patch = store.get(&id).unwrap();
    for r in 0..5 {
        for c in 0..5 {
            let (sr, sc) = (r as i64 - 2, c as i64 + 7);
            let expected = if (0..10).contains(&sr) && (0..10).contains(&sc) {
                image[[sr as usize, sc as usize]]
            } else {
                0.0
            };
            assert_eq!(patch[[r, c]], expected, "sample ({r}, {c})");
        }
    }
}

#[test]
fn window_wholly_outside_is_all_zero() {
    let image = ramp(10, 10);
    let id = CoordinateId::new(0, 40, -40);
    let store = PatchStore::extract(std::slice::from_ref(&image), &[id], 4).unwrap();
    assert!(store.get(&id).unwrap().iter().all(|&v| v == 0.0));
}

#[test]
fn invalid_image_index_is_rejected_before_work() {
    let images = vec![ramp(10, 10)];
    let err = PatchStore::extract(
        &images,
        &[CoordinateId::new(0, 0, 0), CoordinateId::new(3, 0, 0)],
        4,
    )
    .unwrap_err();
    assert_eq!(err, PsfPatchError::ImageIndexOutOfRange { index: 3, count: 1 });

    let err = PatchStore::extract(&images, &[CoordinateId::derived(0, 0)], 4).unwrap_err();
    assert_eq!(err, PsfPatchError::MissingImageIndex { x: 0, y: 0 });
}

#[test]
fn detection_assisted_extraction_uses_corner_convention() {
    let images = vec![ramp(30, 30), ramp(30, 30)];
    let detector = |image: ndarray::ArrayView2<'_, f64>| -> PsfPatchResult<Detections> {
        let source = Source {
            x: image.ncols() as f64 / 3.0,
            y: 12.0,
            flux: 1.0,
            peak: 1.0,
            area: 1,
            significance: 10.0,
        };
        Ok(Detections {
            sources: vec![source],
            background: 0.0,
            noise: 1.0,
        })
    };
    let store = PatchStore::find_stars_and_create(&images, 6, &detector).unwrap();
    assert_eq!(store.len(), 2);
    // centroid (x = 10, y = 12) maps to corner (12 - 3, 10 - 3)
    assert!(store.contains(&CoordinateId::new(0, 9, 7)));
    assert!(store.contains(&CoordinateId::new(1, 9, 7)));
}

#[test]
fn threshold_detector_centers_stamps_on_stars() {
    let mut image = Array2::from_elem((60, 60), 100.0);
    for (r, c) in (0..60).flat_map(|r| (0..60).map(move |c| (r, c))) {
        let d2 = (r as f64 - 30.0).powi(2) + (c as f64 - 20.0).powi(2);
        image[[r, c]] += 500.0 * (-d2 / 4.5).exp() + ((r * 13 + c * 7) % 3) as f64;
    }
    let detector = ThresholdDetector::new(DetectConfig::default());
    let store = PatchStore::find_stars_and_create(std::slice::from_ref(&image), 9, &detector)
        .unwrap();
    assert_eq!(store.len(), 1);

    let (_, patch) = store.iter().next().unwrap();
    let (mut best, mut best_idx) = (f64::MIN, (0, 0));
    for ((r, c), &v) in patch.indexed_iter() {
        if v > best {
            best = v;
            best_idx = (r, c);
        }
    }
    // corner is trunc(30 - 4.5) = 25, so the star lands one past the stamp center
    assert_eq!(best_idx, (5, 5));
}
