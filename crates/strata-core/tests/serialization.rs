//! Index persistence: fixed-point round trips and corruption handling.

mod common;

use common::{build_index, quantizer_from};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use strata_core::{IndexConfig, SearchConfig, StrataIndex};

fn clustered_fixture(
    rng: &mut StdRng,
    clusters: usize,
    per_cluster: usize,
) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
    let mut centroids = Vec::new();
    for i in 0..clusters {
        let mut centroid = vec![0.0f32; 8];
        centroid[0] = i as f32 * 50.0;
        centroid[1] = (i * i % 5) as f32 * 30.0;
        centroids.push(centroid);
    }
    let mut points = Vec::new();
    for centroid in &centroids {
        for _ in 0..per_cluster {
            points.push(
                centroid
                    .iter()
                    .map(|&x| x + rng.gen::<f32>() - 0.5)
                    .collect(),
            );
        }
    }
    (centroids, points)
}

fn fixture_config() -> IndexConfig {
    IndexConfig {
        dimension: 8,
        centroids: 4,
        subcentroids: 2,
        code_bytes: 4,
        nbits: 4,
    }
}

#[test]
fn write_read_write_is_a_fixed_point() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let (centroids, points) = clustered_fixture(&mut rng, 4, 16);

    let index = build_index(
        &centroids,
        &points,
        fixture_config(),
        SearchConfig::default(),
        dir.path(),
    );

    let first = dir.path().join("first.strata");
    let second = dir.path().join("second.strata");
    index.write(&first).unwrap();

    let reloaded = StrataIndex::read(
        &first,
        Arc::clone(index.quantizer()),
        index.pq().clone(),
        index.norm_pq().clone(),
        SearchConfig::default(),
    )
    .unwrap();
    reloaded.write(&second).unwrap();

    let first_bytes = std::fs::read(&first).unwrap();
    let second_bytes = std::fs::read(&second).unwrap();
    assert_eq!(first_bytes, second_bytes);
}

#[test]
fn reloaded_index_answers_identically() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let (centroids, points) = clustered_fixture(&mut rng, 4, 12);

    let index = build_index(
        &centroids,
        &points,
        fixture_config(),
        SearchConfig::default(),
        dir.path(),
    );
    let path = dir.path().join("index.strata");
    index.write(&path).unwrap();

    let reloaded = StrataIndex::read(
        &path,
        Arc::clone(index.quantizer()),
        index.pq().clone(),
        index.norm_pq().clone(),
        SearchConfig::default(),
    )
    .unwrap();

    assert_eq!(reloaded.num_points(), index.num_points());

    for _ in 0..100 {
        let query: Vec<f32> = (0..8).map(|_| rng.gen::<f32>() * 160.0 - 5.0).collect();
        let expected = index.search(&query, 10).unwrap();
        let actual = reloaded.search(&query, 10).unwrap();
        assert_eq!(expected, actual);
    }
}

#[test]
fn truncated_file_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(13);
    let (centroids, points) = clustered_fixture(&mut rng, 4, 8);

    let index = build_index(
        &centroids,
        &points,
        fixture_config(),
        SearchConfig::default(),
        dir.path(),
    );
    let path = dir.path().join("index.strata");
    index.write(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let truncated = dir.path().join("truncated.strata");
    std::fs::write(&truncated, &bytes[..bytes.len() - 4]).unwrap();

    let err = StrataIndex::read(
        &truncated,
        Arc::clone(index.quantizer()),
        index.pq().clone(),
        index.norm_pq().clone(),
        SearchConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err.code(), "STRATA-002");
}

#[test]
fn trailing_bytes_are_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(17);
    let (centroids, points) = clustered_fixture(&mut rng, 4, 8);

    let index = build_index(
        &centroids,
        &points,
        fixture_config(),
        SearchConfig::default(),
        dir.path(),
    );
    let path = dir.path().join("index.strata");
    index.write(&path).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    bytes.push(0xAB);
    let padded = dir.path().join("padded.strata");
    std::fs::write(&padded, &bytes).unwrap();

    let err = StrataIndex::read(
        &padded,
        Arc::clone(index.quantizer()),
        index.pq().clone(),
        index.norm_pq().clone(),
        SearchConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err.code(), "STRATA-002");
}

#[test]
fn untrained_index_refuses_to_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let centroids = vec![vec![0.0, 0.0], vec![4.0, 0.0]];
    let quantizer = quantizer_from(&centroids);
    let index = StrataIndex::new(
        IndexConfig {
            dimension: 2,
            centroids: 2,
            subcentroids: 1,
            code_bytes: 2,
            nbits: 2,
        },
        SearchConfig::default(),
        quantizer,
    )
    .unwrap();

    let err = index.write(dir.path().join("never.strata")).unwrap_err();
    assert_eq!(err.code(), "STRATA-004");
}
