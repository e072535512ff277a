//! Per-centroid nearest-neighbor centroid tables.
//!
//! Each coarse centroid keeps the ids and squared distances of its
//! `nsubc` nearest *other* centroids, in ascending-distance order. The
//! differences toward these neighbors are the directions along which
//! sub-centroids are placed.

use crate::error::{Error, Result};
use crate::graph::CoarseQuantizer;
use rayon::prelude::*;

/// Neighbor-centroid ids and squared distances, indexed by centroid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborTables {
    /// `ids[c]` holds the `nsubc` nearest other centroids, ascending.
    pub ids: Vec<Vec<u32>>,
    /// `distances[c][s] = ‖centroid(c) - centroid(ids[c][s])‖²`.
    pub distances: Vec<Vec<f32>>,
}

/// The `nsubc` nearest centroids to centroid `c`, excluding `c` itself.
///
/// The quantizer is asked for `nsubc + 1` hits; the self-hit is removed by
/// id equality (duplicate centroids at distance zero therefore survive).
///
/// # Errors
///
/// Returns [`Error::InsufficientCentroids`] if fewer than `nsubc` other
/// centroids come back.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn nearest_centroids(
    quantizer: &CoarseQuantizer,
    centroid: usize,
    nsubc: usize,
) -> Result<(Vec<u32>, Vec<f32>)> {
    let anchor = quantizer.get_centroid(centroid);
    let hits = quantizer.search_knn(&anchor, nsubc + 1)?;

    let mut ids = Vec::with_capacity(nsubc);
    let mut distances = Vec::with_capacity(nsubc);
    for (dist, id) in hits {
        if id == centroid {
            continue;
        }
        if ids.len() == nsubc {
            break;
        }
        ids.push(id as u32);
        distances.push(dist);
    }

    if ids.len() < nsubc {
        return Err(Error::InsufficientCentroids {
            requested: nsubc,
            returned: ids.len(),
        });
    }
    Ok((ids, distances))
}

/// Builds the neighbor tables for all centroids in parallel.
///
/// # Errors
///
/// Propagates [`Error::InsufficientCentroids`] from any centroid.
pub(crate) fn build_neighbor_tables(
    quantizer: &CoarseQuantizer,
    nsubc: usize,
) -> Result<NeighborTables> {
    let nc = quantizer.len();
    let rows: Vec<(Vec<u32>, Vec<f32>)> = (0..nc)
        .into_par_iter()
        .map(|c| nearest_centroids(quantizer, c, nsubc))
        .collect::<Result<_>>()?;

    let mut tables = NeighborTables {
        ids: Vec::with_capacity(nc),
        distances: Vec::with_capacity(nc),
    };
    for (ids, distances) in rows {
        tables.ids.push(ids);
        tables.distances.push(distances);
    }
    Ok(tables)
}
