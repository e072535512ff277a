//! Two-level inverted-list index.
//!
//! The first level partitions the database across coarse centroids owned
//! by the graph quantizer. The second level splits every coarse cell along
//! its fitted sub-centroids and stores each point as a PQ residual code
//! plus a one-byte code of the reconstructed squared norm. Queries probe a
//! handful of coarse cells and rank candidates with a decomposed distance
//! over a precomputed inner-product table.

mod group;
mod lists;
mod neighbors;
mod ordered_float;
mod persistence;
mod search;
mod train;

pub use lists::CentroidLists;
pub use neighbors::NeighborTables;

use crate::config::{IndexConfig, SearchConfig};
use crate::error::{Error, Result};
use crate::graph::CoarseQuantizer;
use crate::pq::ProductQuantizer;
use crate::reader::{self, GroupReader};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Graph connectivity used when the quantizer is built from scratch.
const GRAPH_M: usize = 16;
/// Graph construction expansion width.
const GRAPH_EF_CONSTRUCTION: usize = 500;
/// Group progress is logged every this many processed groups.
const PROGRESS_EVERY: usize = 10_000;

/// Two-level PQ index over a fixed set of coarse centroids.
///
/// Lifecycle: the quantizer is built or loaded first, both product
/// quantizers are trained next, `add` populates the inverted lists once,
/// and the index is read-only afterwards. Concurrent `search` calls on the
/// populated index are safe.
#[derive(Debug)]
pub struct StrataIndex {
    /// Structural parameters, immutable after construction.
    config: IndexConfig,
    /// Query-time parameters, tunable via setters.
    search: SearchConfig,
    /// First-level quantizer owning the coarse centroid vectors.
    quantizer: Arc<CoarseQuantizer>,
    /// Residual product quantizer.
    pq: ProductQuantizer,
    /// Scalar quantizer over reconstructed squared norms.
    norm_pq: ProductQuantizer,
    /// Inverted lists, one entry per coarse centroid.
    lists: Vec<CentroidLists>,
    /// Neighbor-centroid tables, filled by `add`.
    neighbors: NeighborTables,
    /// Per-centroid alpha, filled by `add`.
    alphas: Vec<f32>,
    /// Squared norms of the coarse centroids, derived from the quantizer.
    centroid_norms: Vec<f32>,
}

impl StrataIndex {
    /// Creates an empty index over an already-populated quantizer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParameterOutOfRange`] for invalid configuration,
    /// [`Error::DimensionMismatch`] if the quantizer dimension disagrees,
    /// and [`Error::Config`] if the quantizer does not hold exactly
    /// `centroids` points.
    pub fn new(
        config: IndexConfig,
        search: SearchConfig,
        quantizer: Arc<CoarseQuantizer>,
    ) -> Result<Self> {
        config.validate()?;
        search.validate()?;

        if quantizer.dimension() != config.dimension {
            return Err(Error::DimensionMismatch {
                expected: config.dimension,
                actual: quantizer.dimension(),
            });
        }
        if quantizer.len() != config.centroids {
            return Err(Error::Config(format!(
                "quantizer holds {} centroids, configuration expects {}",
                quantizer.len(),
                config.centroids
            )));
        }

        let pq = ProductQuantizer::new(config.dimension, config.code_bytes, config.nbits)?;
        let norm_pq = ProductQuantizer::new(1, 1, config.nbits)?;

        quantizer.set_ef(search.ef);

        let lists = vec![
            CentroidLists::empty(config.subcentroids, config.code_size());
            config.centroids
        ];
        let alphas = vec![0.0f32; config.centroids];

        // The scoring decomposition needs ‖centroid‖² per centroid; the
        // quantizer is read-only from here on, so compute the table once.
        let centroid_norms: Vec<f32> = (0..config.centroids)
            .into_par_iter()
            .map(|c| crate::simd::squared_norm(&quantizer.get_centroid(c)))
            .collect();

        Ok(Self {
            config,
            search,
            quantizer,
            pq,
            norm_pq,
            lists,
            neighbors: NeighborTables::default(),
            alphas,
            centroid_norms,
        })
    }

    /// Builds the coarse quantizer, or loads it when both graph files
    /// already exist.
    ///
    /// On a fresh build the raw `f32[centroids * dimension]` centroid file
    /// is inserted in stream order (so internal ids match stream
    /// positions) and both graph files are written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptInput`] if the centroid file is short,
    /// [`Error::CorruptIndex`] if existing graph files are malformed, and
    /// [`Error::Io`] on file-system failures.
    pub fn build_quantizer<P: AsRef<Path>>(
        config: &IndexConfig,
        search: &SearchConfig,
        centroids_path: P,
        info_path: P,
        edges_path: P,
    ) -> Result<Arc<CoarseQuantizer>> {
        config.validate()?;

        if info_path.as_ref().exists() && edges_path.as_ref().exists() {
            tracing::info!("loading coarse quantizer from saved graph files");
            let quantizer = CoarseQuantizer::load(&info_path, &edges_path)?;
            quantizer.set_ef(search.ef);
            return Ok(Arc::new(quantizer));
        }

        tracing::info!(centroids = config.centroids, "constructing coarse quantizer");
        let vectors = reader::read_raw_vectors(centroids_path, config.dimension, config.centroids)?;

        let quantizer = CoarseQuantizer::new(
            config.dimension,
            GRAPH_M,
            GRAPH_EF_CONSTRUCTION,
            config.centroids,
        );
        quantizer.set_ef(search.ef);

        for (c, centroid) in vectors.chunks_exact(config.dimension).enumerate() {
            quantizer.add_point(centroid)?;
            if (c + 1) % 100_000 == 0 {
                tracing::info!(inserted = c + 1, total = config.centroids, "quantizer progress");
            }
        }

        quantizer.save(&info_path, &edges_path)?;
        Ok(Arc::new(quantizer))
    }

    /// Assigns each row of `xs` to its nearest coarse centroid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] on a ragged buffer and
    /// [`Error::InsufficientCentroids`] if the quantizer is empty.
    #[allow(clippy::cast_possible_truncation)]
    pub fn assign(&self, xs: &[f32]) -> Result<Vec<u32>> {
        if xs.len() % self.config.dimension != 0 {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                actual: xs.len() % self.config.dimension,
            });
        }

        xs.par_chunks_exact(self.config.dimension)
            .map(|x| {
                let hits = self.quantizer.search_knn(x, 1)?;
                hits.first()
                    .map(|&(_, id)| id as u32)
                    .ok_or(Error::InsufficientCentroids {
                        requested: 1,
                        returned: 0,
                    })
            })
            .collect()
    }

    /// Populates the inverted lists from the paired groups/ids streams.
    ///
    /// Groups are processed in parallel; the paired streams are consumed
    /// through one mutex so each worker receives a whole `(group, ids)`
    /// pair. No two workers touch the same coarse centroid, so the
    /// per-centroid results are merged without further synchronization.
    /// Must be called exactly once, after both quantizers are trained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PqNotTrained`] if a quantizer is untrained,
    /// [`Error::Config`] on a repeated call, [`Error::CorruptInput`] on
    /// malformed streams, and [`Error::InsufficientCentroids`] if the
    /// neighbor tables cannot be built.
    #[allow(clippy::cast_precision_loss)]
    pub fn add<P: AsRef<Path>>(&mut self, groups_path: P, ids_path: P) -> Result<()> {
        if !self.pq.is_trained() || !self.norm_pq.is_trained() {
            return Err(Error::PqNotTrained);
        }
        if self.lists.iter().any(|l| !l.is_empty()) {
            return Err(Error::Config(
                "index already holds points; add may only run once".into(),
            ));
        }

        let nc = self.config.centroids;
        let nsubc = self.config.subcentroids;
        let dimension = self.config.dimension;

        tracing::info!(centroids = nc, "computing neighbor-centroid tables");
        let tables = neighbors::build_neighbor_tables(&self.quantizer, nsubc)?;

        tracing::info!("adding groups to the index");
        let stream = Mutex::new(GroupReader::open(groups_path, ids_path, dimension, nc)?);
        let progress = AtomicUsize::new(0);

        let quantizer = &self.quantizer;
        let pq = &self.pq;
        let norm_pq = &self.norm_pq;
        let tables_ref = &tables;

        let built: Vec<(usize, group::GroupBuild)> = (0..nc)
            .into_par_iter()
            .map(|_| {
                // One lock covers the paired reads, keeping the two
                // streams aligned.
                let pulled = { stream.lock().next_group()? };
                let Some(g) = pulled else {
                    return Err(Error::CorruptInput(
                        "group stream ended before the last centroid".into(),
                    ));
                };

                let c = g.centroid;
                let centroid = quantizer.get_centroid(c);
                let neighbor_vectors: Vec<Vec<f32>> = tables_ref.ids[c]
                    .iter()
                    .map(|&id| quantizer.get_centroid(id as usize))
                    .collect();

                let result = group::build_group(
                    pq,
                    norm_pq,
                    nsubc,
                    dimension,
                    &centroid,
                    &neighbor_vectors,
                    &tables_ref.distances[c],
                    &g,
                )?;

                let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
                if done % PROGRESS_EVERY == 0 {
                    tracing::info!(groups = done, total = nc, "group progress");
                }
                Ok((c, result))
            })
            .collect::<Result<_>>()?;

        let mut baseline = 0.0f64;
        let mut adapted = 0.0f64;
        let mut points = 0usize;
        for (c, result) in built {
            baseline += result.baseline_distortion;
            adapted += result.adapted_distortion;
            points += result.lists.total();
            self.alphas[c] = result.alpha;
            self.lists[c] = result.lists;
        }
        self.neighbors = tables;

        if points > 0 {
            tracing::info!(
                points,
                baseline_avg = baseline / points as f64,
                adapted_avg = adapted / points as f64,
                "construction finished"
            );
        }
        Ok(())
    }

    /// Structural parameters.
    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Number of coarse inverted lists probed per query.
    #[must_use]
    pub fn nprobe(&self) -> usize {
        self.search.nprobe
    }

    /// Sets the number of probed lists.
    pub fn set_nprobe(&mut self, nprobe: usize) {
        self.search.nprobe = nprobe.max(1);
    }

    /// Scanned-candidate budget per query.
    #[must_use]
    pub fn max_codes(&self) -> usize {
        self.search.max_codes
    }

    /// Sets the scanned-candidate budget.
    pub fn set_max_codes(&mut self, max_codes: usize) {
        self.search.max_codes = max_codes.max(1);
    }

    /// The coarse quantizer.
    #[must_use]
    pub fn quantizer(&self) -> &Arc<CoarseQuantizer> {
        &self.quantizer
    }

    /// The residual product quantizer.
    #[must_use]
    pub fn pq(&self) -> &ProductQuantizer {
        &self.pq
    }

    /// Replaces the residual quantizer with one trained elsewhere (for
    /// example, loaded from a codebook file).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if its shape disagrees with
    /// the index configuration.
    pub fn set_pq(&mut self, pq: ProductQuantizer) -> Result<()> {
        if pq.dimension() != self.config.dimension || pq.m() != self.config.code_bytes {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                actual: pq.dimension(),
            });
        }
        self.pq = pq;
        Ok(())
    }

    /// Replaces the norm quantizer with one trained elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] unless it is a scalar
    /// quantizer.
    pub fn set_norm_pq(&mut self, norm_pq: ProductQuantizer) -> Result<()> {
        if norm_pq.dimension() != 1 || norm_pq.m() != 1 {
            return Err(Error::DimensionMismatch {
                expected: 1,
                actual: norm_pq.dimension(),
            });
        }
        self.norm_pq = norm_pq;
        Ok(())
    }

    /// The norm quantizer.
    #[must_use]
    pub fn norm_pq(&self) -> &ProductQuantizer {
        &self.norm_pq
    }

    /// Fitted alpha of a coarse centroid.
    #[must_use]
    pub fn alpha(&self, centroid: usize) -> f32 {
        self.alphas[centroid]
    }

    /// Neighbor-centroid ids of a coarse centroid, ascending by distance.
    #[must_use]
    pub fn neighbor_ids(&self, centroid: usize) -> &[u32] {
        &self.neighbors.ids[centroid]
    }

    /// Inverted lists of a coarse centroid.
    #[must_use]
    pub fn lists(&self, centroid: usize) -> &CentroidLists {
        &self.lists[centroid]
    }

    /// Total number of stored points.
    #[must_use]
    pub fn num_points(&self) -> usize {
        self.lists.iter().map(CentroidLists::total).sum()
    }
}
