//! Codebook training drivers.
//!
//! Both quantizers train on pools harvested from a coarse-assigned sample
//! of the base distribution: the residual quantizer on residuals against
//! the locally fitted sub-centroids, the norm quantizer on the squared
//! norms of the reconstructions those residual codes produce. Buckets are
//! consumed in ascending centroid order until the pool cap is reached, so
//! training is reproducible for a fixed sample.

use super::{group, neighbors, StrataIndex};
use crate::error::{Error, Result};
use rustc_hash::FxHashMap;

/// Pool cap, in training rows.
const TRAIN_POOL_ROWS: usize = 65_536;

/// One coarse bucket of the training sample, with its local geometry.
struct TrainingBucket {
    subcentroids: Vec<f32>,
    assignments: Vec<u32>,
    rows: Vec<f32>,
}

impl StrataIndex {
    /// Fits the residual codebooks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] on a ragged sample and
    /// [`Error::TrainingDataInsufficient`] if the harvested pool is too
    /// small for the configured codeword count.
    pub fn train_residual_pq(&mut self, xs: &[f32]) -> Result<()> {
        let dimension = self.config.dimension;
        let mut pool: Vec<f32> = Vec::new();

        self.for_each_training_bucket(xs, |bucket| {
            let residuals = group::compute_residuals(
                &bucket.rows,
                &bucket.subcentroids,
                &bucket.assignments,
                dimension,
            );
            pool.extend_from_slice(&residuals);
            Ok(pool.len() / dimension >= TRAIN_POOL_ROWS)
        })?;

        if pool.is_empty() {
            return Err(Error::TrainingDataInsufficient {
                required: self.pq.min_training_rows(),
                actual: 0,
            });
        }

        tracing::info!(
            rows = pool.len() / dimension,
            sub_quantizers = self.pq.m(),
            codewords = self.pq.ksub(),
            "training residual quantizer"
        );
        self.pq.train(&pool)
    }

    /// Fits the norm codebook. Requires a trained residual quantizer,
    /// because the norms are taken over reconstructions of its codes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PqNotTrained`] if the residual quantizer is
    /// untrained, plus the same errors as [`Self::train_residual_pq`].
    pub fn train_norm_pq(&mut self, xs: &[f32]) -> Result<()> {
        if !self.pq.is_trained() {
            return Err(Error::PqNotTrained);
        }

        let dimension = self.config.dimension;
        let pq = self.pq.clone();
        let mut pool: Vec<f32> = Vec::new();

        self.for_each_training_bucket(xs, |bucket| {
            let (_, norms) = group::encode_residuals_with_norms(
                &pq,
                &bucket.rows,
                &bucket.subcentroids,
                &bucket.assignments,
                dimension,
            )?;
            pool.extend_from_slice(&norms);
            Ok(pool.len() >= TRAIN_POOL_ROWS)
        })?;

        if pool.is_empty() {
            return Err(Error::TrainingDataInsufficient {
                required: self.norm_pq.min_training_rows(),
                actual: 0,
            });
        }

        tracing::info!(rows = pool.len(), "training norm quantizer");
        self.norm_pq.train(&pool)
    }

    /// Coarse-assigns the sample, buckets it by centroid, rebuilds each
    /// bucket's local sub-centroid geometry, and feeds the buckets to
    /// `visit` in ascending centroid order until it reports saturation.
    fn for_each_training_bucket<F>(&self, xs: &[f32], mut visit: F) -> Result<()>
    where
        F: FnMut(&TrainingBucket) -> Result<bool>,
    {
        let dimension = self.config.dimension;
        let nsubc = self.config.subcentroids;

        let assigned = self.assign(xs)?;

        let mut buckets: FxHashMap<u32, Vec<f32>> = FxHashMap::default();
        for (row, &c) in xs.chunks_exact(dimension).zip(&assigned) {
            buckets.entry(c).or_default().extend_from_slice(row);
        }

        let mut order: Vec<u32> = buckets.keys().copied().collect();
        order.sort_unstable();

        for c in order {
            let rows = buckets.remove(&c).unwrap_or_default();
            let centroid = self.quantizer.get_centroid(c as usize);

            let (neighbor_ids, neighbor_distances) =
                neighbors::nearest_centroids(&self.quantizer, c as usize, nsubc)?;
            let neighbor_vectors: Vec<Vec<f32>> = neighbor_ids
                .iter()
                .map(|&id| self.quantizer.get_centroid(id as usize))
                .collect();

            let directions = group::neighbor_directions(&centroid, &neighbor_vectors, dimension);
            let alpha =
                group::fit_alpha(&directions, &neighbor_distances, &rows, &centroid, dimension);
            let subcentroids =
                group::materialize_subcentroids(&directions, &centroid, alpha, dimension);
            let assignments = group::assign_subcentroids(&rows, &subcentroids, dimension);

            let saturated = visit(&TrainingBucket {
                subcentroids,
                assignments,
                rows,
            })?;
            if saturated {
                break;
            }
        }
        Ok(())
    }
}
