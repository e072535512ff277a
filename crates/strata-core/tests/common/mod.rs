//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::{CoarseQuantizer, IndexConfig, SearchConfig, StrataIndex};

/// Builds a quantizer holding the given centroids, ids in order.
pub fn quantizer_from(centroids: &[Vec<f32>]) -> Arc<CoarseQuantizer> {
    let dimension = centroids[0].len();
    let quantizer = CoarseQuantizer::new(dimension, 8, 64, centroids.len());
    for centroid in centroids {
        quantizer.add_point(centroid).unwrap();
    }
    Arc::new(quantizer)
}

/// Writes the paired groups/ids streams for the given coarse buckets.
pub fn write_group_streams(
    dir: &Path,
    groups: &[(Vec<f32>, Vec<u32>)],
) -> (PathBuf, PathBuf) {
    let groups_path = dir.join("groups.bin");
    let ids_path = dir.join("ids.bin");

    let mut groups_file = std::fs::File::create(&groups_path).unwrap();
    let mut ids_file = std::fs::File::create(&ids_path).unwrap();
    for (vectors, ids) in groups {
        let size = ids.len() as i32;
        groups_file.write_all(&size.to_le_bytes()).unwrap();
        ids_file.write_all(&size.to_le_bytes()).unwrap();
        for value in vectors {
            groups_file.write_all(&value.to_le_bytes()).unwrap();
        }
        for id in ids {
            ids_file.write_all(&id.to_le_bytes()).unwrap();
        }
    }
    (groups_path, ids_path)
}

/// Trains both quantizers on the points themselves, buckets the points by
/// coarse assignment, and populates the index through the file pipeline.
/// Point `i` is stored under external id `i`.
pub fn build_index(
    centroids: &[Vec<f32>],
    points: &[Vec<f32>],
    config: IndexConfig,
    search: SearchConfig,
    dir: &Path,
) -> StrataIndex {
    let quantizer = quantizer_from(centroids);
    let mut index = StrataIndex::new(config, search, quantizer).unwrap();

    let flat: Vec<f32> = points.iter().flatten().copied().collect();
    index.train_residual_pq(&flat).unwrap();
    index.train_norm_pq(&flat).unwrap();

    let assigned = index.assign(&flat).unwrap();
    let mut groups: Vec<(Vec<f32>, Vec<u32>)> = vec![(Vec::new(), Vec::new()); centroids.len()];
    for (i, (&c, point)) in assigned.iter().zip(points).enumerate() {
        groups[c as usize].0.extend_from_slice(point);
        groups[c as usize].1.push(i as u32);
    }

    let (groups_path, ids_path) = write_group_streams(dir, &groups);
    index.add(&groups_path, &ids_path).unwrap();
    index
}

/// Collects every stored `(centroid, sublist, id)` triple.
pub fn stored_triples(index: &StrataIndex) -> Vec<(usize, usize, u32)> {
    let mut triples = Vec::new();
    for c in 0..index.config().centroids {
        let lists = index.lists(c);
        for s in 0..lists.sublists() {
            for &id in lists.ids(s) {
                triples.push((c, s, id));
            }
        }
    }
    triples
}
