//! End-to-end boundary scenarios on tiny, fully hand-checkable corpora.

mod common;

use common::{build_index, quantizer_from};
use strata_core::{IndexConfig, SearchConfig, StrataIndex};

fn tiny_config(dimension: usize, centroids: usize, subcentroids: usize) -> IndexConfig {
    IndexConfig {
        dimension,
        centroids,
        subcentroids,
        code_bytes: 2,
        nbits: 2,
    }
}

#[test]
fn well_separated_centroids_route_and_rank() {
    let dir = tempfile::tempdir().unwrap();
    let centroids = vec![vec![0.0; 4], vec![10.0; 4]];
    let points = vec![
        vec![0.0, 0.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0],
        vec![10.0, 10.0, 10.0, 10.0],
        vec![10.0, 10.0, 10.0, 11.0],
    ];

    let index = build_index(
        &centroids,
        &points,
        tiny_config(4, 2, 1),
        SearchConfig::default(),
        dir.path(),
    );

    // Points 0 and 1 live under centroid 0; points 2 and 3 under centroid 1.
    let mut under_first: Vec<u32> = index.lists(0).ids(0).to_vec();
    under_first.sort_unstable();
    assert_eq!(under_first, vec![0, 1]);
    let mut under_second: Vec<u32> = index.lists(1).ids(0).to_vec();
    under_second.sort_unstable();
    assert_eq!(under_second, vec![2, 3]);

    // The query sitting exactly on point 0 gets point 0 back, even though
    // the scan crosses both coarse cells (nprobe is clamped to 2).
    let hits = index.search(&[0.0, 0.0, 0.0, 0.0], 1).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].1, 0);
}

#[test]
fn empty_group_leaves_a_clean_cell() {
    let dir = tempfile::tempdir().unwrap();
    // No point is anywhere near centroid 0.
    let centroids = vec![vec![100.0, 100.0], vec![0.0, 0.0], vec![10.0, 10.0]];
    let points = vec![
        vec![0.1, 0.0],
        vec![0.0, 0.1],
        vec![10.1, 10.0],
        vec![10.0, 10.1],
    ];

    let index = build_index(
        &centroids,
        &points,
        tiny_config(2, 3, 1),
        SearchConfig::default(),
        dir.path(),
    );

    assert_eq!(index.alpha(0), 0.0);
    assert!(index.lists(0).is_empty());
    assert_eq!(index.num_points(), 4);

    // Probing the empty cell is harmless: the query near centroid 0 still
    // resolves against the populated cells.
    let hits = index.search(&[99.0, 99.0], 2).unwrap();
    assert_eq!(hits.len(), 2);
}

#[test]
fn identical_centroids_collapse_onto_first_sublist() {
    let dir = tempfile::tempdir().unwrap();
    // Degenerate geometry: every coarse centroid is the same point, so all
    // neighbor directions have zero squared norm.
    let centroids = vec![vec![1.0, 1.0]; 3];
    let points = vec![
        vec![0.5, 1.0],
        vec![1.5, 1.0],
        vec![1.0, 0.5],
        vec![1.0, 1.5],
    ];

    let index = build_index(
        &centroids,
        &points,
        tiny_config(2, 3, 1),
        SearchConfig::default(),
        dir.path(),
    );

    // Ties in coarse assignment resolve to the smallest centroid id, the
    // degenerate alpha fit yields 0, and every point sits in sublist 0.
    assert_eq!(index.alpha(0), 0.0);
    assert_eq!(index.lists(0).len(0), 4);
    assert!(index.lists(1).is_empty());
    assert!(index.lists(2).is_empty());

    let hits = index.search(&[0.6, 1.0], 1).unwrap();
    assert_eq!(hits[0].1, 0);
}

#[test]
fn point_on_subcentroid_has_zero_residual() {
    let dir = tempfile::tempdir().unwrap();
    let centroids = vec![vec![0.0, 0.0], vec![2.0, 0.0]];
    // Four copies of the midpoint: every per-point projection is exactly
    // 0.5, so the fitted alpha puts the sub-centroid on the points.
    let points = vec![vec![1.0, 0.0]; 4];

    let index = build_index(
        &centroids,
        &points,
        tiny_config(2, 2, 1),
        SearchConfig::default(),
        dir.path(),
    );

    assert!((index.alpha(0) - 0.5).abs() < 1e-6);
    assert_eq!(index.lists(0).len(0), 4);

    // Residual codes decode to (numerically) nothing.
    let decoded = index.pq().decode(index.lists(0).codes(0)).unwrap();
    for value in decoded {
        assert!(value.abs() < 1e-6, "residual component {value} should be 0");
    }

    // The stored norm is the sub-centroid's squared norm.
    let norms = index.norm_pq().decode(index.lists(0).norm_codes(0)).unwrap();
    for norm in norms {
        assert!((norm - 1.0).abs() < 1e-3, "norm {norm} should be ~1");
    }

    // Searching the shared location returns the smallest id at distance 0.
    let hits = index.search(&[1.0, 0.0], 1).unwrap();
    assert_eq!(hits[0].1, 0);
    assert!(hits[0].0.abs() < 1e-4);
}

#[test]
fn full_scan_recall_dominates_partial_probe() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    // 16 far-apart clusters, 12 points each, mild in-cluster noise.
    let mut centroids = Vec::new();
    for gx in 0..4 {
        for gy in 0..4 {
            let mut centroid = vec![0.0f32; 8];
            centroid[0] = gx as f32 * 100.0;
            centroid[1] = gy as f32 * 100.0;
            centroids.push(centroid);
        }
    }
    let mut points = Vec::new();
    for centroid in &centroids {
        for _ in 0..12 {
            let point: Vec<f32> = centroid
                .iter()
                .map(|&x| x + rng.gen::<f32>() - 0.5)
                .collect();
            points.push(point);
        }
    }

    let config = IndexConfig {
        dimension: 8,
        centroids: 16,
        subcentroids: 4,
        code_bytes: 4,
        nbits: 4,
    };
    let mut index = build_index(
        &centroids,
        &points,
        config,
        SearchConfig::default(),
        dir.path(),
    );

    let recall_at_10 = |index: &StrataIndex| -> f64 {
        let mut found = 0usize;
        for (i, point) in points.iter().enumerate() {
            let hits = index.search(point, 10).unwrap();
            if hits.iter().any(|&(_, id)| id == i as u32) {
                found += 1;
            }
        }
        found as f64 / points.len() as f64
    };

    index.set_nprobe(1);
    let partial = recall_at_10(&index);

    // Probing everything with an unbounded budget is a full scan of the
    // encoded data; recall can only improve.
    index.set_nprobe(16);
    index.set_max_codes(usize::MAX);
    let full = recall_at_10(&index);

    assert!(full >= partial, "full scan recall {full} < partial {partial}");
    assert!(full >= 0.9, "full scan recall {full} unexpectedly low");
}

#[test]
fn search_rejects_bad_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let centroids = vec![vec![0.0; 4], vec![10.0; 4]];
    let points = vec![
        vec![0.0, 0.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0],
        vec![10.0, 10.0, 10.0, 10.0],
        vec![10.0, 10.0, 10.0, 11.0],
    ];
    let index = build_index(
        &centroids,
        &points,
        tiny_config(4, 2, 1),
        SearchConfig::default(),
        dir.path(),
    );

    let err = index.search(&[0.0; 3], 1).unwrap_err();
    assert_eq!(err.code(), "STRATA-006");

    let err = index.search(&[0.0; 4], 0).unwrap_err();
    assert_eq!(err.code(), "STRATA-007");

    let err = index.search(&[0.0; 4], 20_000).unwrap_err();
    assert_eq!(err.code(), "STRATA-007");
}

#[test]
fn add_runs_only_once() {
    let dir = tempfile::tempdir().unwrap();
    let centroids = vec![vec![0.0, 0.0], vec![4.0, 0.0]];
    let points = vec![
        vec![0.0, 0.5],
        vec![0.5, 0.0],
        vec![4.0, 0.5],
        vec![4.5, 0.0],
    ];
    let mut index = build_index(
        &centroids,
        &points,
        tiny_config(2, 2, 1),
        SearchConfig::default(),
        dir.path(),
    );

    let (groups_path, ids_path) = common::write_group_streams(
        dir.path(),
        &[(vec![0.0, 0.0], vec![9]), (Vec::new(), Vec::new())],
    );
    assert!(index.add(&groups_path, &ids_path).is_err());
}

#[test]
fn untrained_index_refuses_to_add() {
    let dir = tempfile::tempdir().unwrap();
    let centroids = vec![vec![0.0, 0.0], vec![4.0, 0.0]];
    let quantizer = quantizer_from(&centroids);
    let mut index = StrataIndex::new(
        tiny_config(2, 2, 1),
        SearchConfig::default(),
        quantizer,
    )
    .unwrap();

    let (groups_path, ids_path) = common::write_group_streams(
        dir.path(),
        &[(vec![0.0, 0.0], vec![0]), (Vec::new(), Vec::new())],
    );
    let err = index.add(&groups_path, &ids_path).unwrap_err();
    assert_eq!(err.code(), "STRATA-004");
}
