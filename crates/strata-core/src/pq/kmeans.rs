//! Lloyd iteration for codebook fitting.
//!
//! Deterministic by construction: initialization draws from a seeded
//! xorshift64 stream, so the same training pool always yields the same
//! codebook.

use crate::simd;
use rayon::prelude::*;

/// Minimal xorshift64 PRNG; enough for sampling initial codewords.
pub(crate) struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x2545_F491_4F6C_DD1D } else { seed },
        }
    }

    fn next(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform draw in `[0, bound)`.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

/// Runs Lloyd k-means over `n = data.len() / dimension` rows and returns
/// `k * dimension` centroids.
///
/// The caller guarantees `n >= k`. Initial centroids are `k` distinct rows
/// sampled without replacement; clusters that empty out are re-seeded with
/// a random member of the currently largest cluster.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn fit(
    data: &[f32],
    dimension: usize,
    k: usize,
    iterations: usize,
    seed: u64,
) -> Vec<f32> {
    let n = data.len() / dimension;
    debug_assert!(n >= k, "k-means needs at least k rows");

    let mut rng = XorShift64::new(seed);

    // Partial Fisher-Yates: the first k slots become the initial codewords.
    let mut order: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = i + rng.below(n - i);
        order.swap(i, j);
    }

    let mut centroids = vec![0.0f32; k * dimension];
    for (slot, &row) in order.iter().take(k).enumerate() {
        centroids[slot * dimension..(slot + 1) * dimension]
            .copy_from_slice(&data[row * dimension..(row + 1) * dimension]);
    }

    let mut assignments = vec![0usize; n];

    for _ in 0..iterations {
        // Assignment step.
        let fresh: Vec<usize> = data
            .par_chunks_exact(dimension)
            .map(|row| nearest(row, &centroids, dimension, k))
            .collect();

        let changed = fresh
            .iter()
            .zip(&assignments)
            .filter(|(a, b)| a != b)
            .count();
        assignments = fresh;

        // Update step.
        let mut sums = vec![0.0f64; k * dimension];
        let mut counts = vec![0usize; k];
        for (row, &cluster) in data.chunks_exact(dimension).zip(&assignments) {
            counts[cluster] += 1;
            let slot = &mut sums[cluster * dimension..(cluster + 1) * dimension];
            for (acc, &x) in slot.iter_mut().zip(row) {
                *acc += f64::from(x);
            }
        }

        for cluster in 0..k {
            if counts[cluster] == 0 {
                // Re-seed from the largest cluster to keep all codewords live.
                let largest = (0..k).max_by_key(|&c| counts[c]).unwrap_or(0);
                let members: Vec<usize> = assignments
                    .iter()
                    .enumerate()
                    .filter(|&(_, &a)| a == largest)
                    .map(|(i, _)| i)
                    .collect();
                if !members.is_empty() {
                    let row = members[rng.below(members.len())];
                    centroids[cluster * dimension..(cluster + 1) * dimension]
                        .copy_from_slice(&data[row * dimension..(row + 1) * dimension]);
                }
                continue;
            }
            for i in 0..dimension {
                centroids[cluster * dimension + i] =
                    (sums[cluster * dimension + i] / counts[cluster] as f64) as f32;
            }
        }

        if changed == 0 {
            break;
        }
    }

    centroids
}

/// Index of the nearest centroid, first index winning ties.
fn nearest(row: &[f32], centroids: &[f32], dimension: usize, k: usize) -> usize {
    let mut best = 0usize;
    let mut best_dist = f32::MAX;
    for j in 0..k {
        let dist = simd::squared_l2(row, &centroids[j * dimension..(j + 1) * dimension]);
        if dist < best_dist {
            best = j;
            best_dist = dist;
        }
    }
    best
}
