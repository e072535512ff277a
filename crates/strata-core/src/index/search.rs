//! Query-time scoring.
//!
//! A query probes the `nprobe` nearest coarse centroids and ranks every
//! stored point in the probed lists without touching raw vectors. With
//! the sub-centroid `S = (1 − α)·μ + α·ν` and the reconstruction
//! `x̂ = S + r̂`, expanding `‖x − x̂‖²` and substituting
//! `−2⟨x, μ⟩ = q_c − ‖x‖² − ‖μ‖²` (and likewise for `ν`) gives
//!
//! `‖x − x̂‖² = (1 − α)·(q_c − ‖μ‖²) + α·(q_s − ‖ν‖²) − 2·q_r + ‖x̂‖²`
//!
//! where `q_c`/`q_s` are the query's squared distances to the centroid
//! and the neighbor centroid, `q_r = ⟨x, r̂⟩` comes from the precomputed
//! inner-product table, and `‖x̂‖²` is decoded from the stored norm code.
//! Every term on the right is available without the raw point, so the
//! returned distance is exactly the squared distance to the PQ
//! reconstruction (the centroid-norm offsets keep scores comparable
//! across probed lists).

use super::ordered_float::OrderedFloat;
use super::StrataIndex;
use crate::error::{Error, Result};
use crate::simd;
use std::collections::BinaryHeap;

impl StrataIndex {
    /// Returns the `k` nearest stored points as `(distance, id)` pairs,
    /// sorted ascending by distance with ties broken by ascending id.
    ///
    /// Probing visits coarse cells in ascending coarse distance and stops
    /// once the number of scanned candidates exceeds the `max_codes`
    /// budget. `nprobe` larger than the centroid count is clamped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] for a mis-sized query and
    /// [`Error::ParameterOutOfRange`] when `k` is zero or exceeds
    /// `max_codes`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, u32)>> {
        if query.len() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Err(Error::ParameterOutOfRange {
                param: "k",
                message: "must be positive".into(),
            });
        }
        if k > self.search.max_codes {
            return Err(Error::ParameterOutOfRange {
                param: "k",
                message: format!(
                    "{k} exceeds the scanned-candidate budget {}",
                    self.search.max_codes
                ),
            });
        }

        let nprobe = self.search.nprobe.min(self.config.centroids);

        let mut table = vec![0.0f32; self.pq.m() * self.pq.ksub()];
        self.pq.inner_product_table(query, &mut table)?;

        let coarse = self.quantizer.search_knn(query, nprobe)?;

        let mut heap: BinaryHeap<(OrderedFloat, u32)> = BinaryHeap::with_capacity(k + 1);
        let mut norm_scratch: Vec<f32> = Vec::new();
        let mut scanned = 0usize;

        for (q_c, c) in coarse {
            self.scan_centroid(query, q_c, c, &table, &mut norm_scratch, k, &mut heap)?;
            scanned += self.lists[c].total();
            if scanned > self.search.max_codes {
                break;
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|(dist, id)| (dist.0, id))
            .collect())
    }

    /// Scores every point stored under coarse centroid `c`.
    fn scan_centroid(
        &self,
        query: &[f32],
        q_c: f32,
        c: usize,
        table: &[f32],
        norm_scratch: &mut Vec<f32>,
        k: usize,
        heap: &mut BinaryHeap<(OrderedFloat, u32)>,
    ) -> Result<()> {
        let lists = &self.lists[c];
        if lists.is_empty() {
            return Ok(());
        }

        let alpha = self.alphas[c];
        let neighbor_ids = &self.neighbors.ids[c];
        let code_size = self.pq.code_size();
        let ksub = self.pq.ksub();

        // (1 − α)·(q_c − ‖μ‖²) is shared by every sub-list of this cell.
        let coarse_term = (1.0 - alpha) * (q_c - self.centroid_norms[c]);

        for s in 0..lists.sublists() {
            let n = lists.len(s);
            if n == 0 {
                continue;
            }

            let neighbor_id = neighbor_ids[s] as usize;
            let neighbor = self.quantizer.get_centroid(neighbor_id);
            let q_s = simd::squared_l2(query, &neighbor);
            let sub_term = alpha * (q_s - self.centroid_norms[neighbor_id]);

            self.norm_pq.decode_into(lists.norm_codes(s), norm_scratch)?;

            let codes = lists.codes(s);
            let ids = lists.ids(s);
            for i in 0..n {
                let q_r = table_lookup_sum(table, ksub, &codes[i * code_size..(i + 1) * code_size]);
                let dist = coarse_term + sub_term - 2.0 * q_r + norm_scratch[i];

                heap.push((OrderedFloat(dist), ids[i]));
                if heap.len() > k {
                    heap.pop();
                }
            }
        }
        Ok(())
    }
}

/// Sums one table entry per sub-quantizer, turning a byte code into
/// `⟨query, decoded residual⟩`. Four-way unrolled over the code bytes;
/// codes whose size is a multiple of four never take the remainder loop.
fn table_lookup_sum(table: &[f32], ksub: usize, code: &[u8]) -> f32 {
    let mut sum = 0.0f32;
    let mut m = 0usize;

    for quad in code.chunks_exact(4) {
        sum += table[m * ksub + quad[0] as usize]
            + table[(m + 1) * ksub + quad[1] as usize]
            + table[(m + 2) * ksub + quad[2] as usize]
            + table[(m + 3) * ksub + quad[3] as usize];
        m += 4;
    }
    for &byte in code.chunks_exact(4).remainder() {
        sum += table[m * ksub + byte as usize];
        m += 1;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup_sums_one_entry_per_sub_quantizer() {
        // Two sub-quantizers, four codewords each.
        let table = vec![
            0.0, 1.0, 2.0, 3.0, // sub 0
            10.0, 20.0, 30.0, 40.0, // sub 1
        ];
        let sum = table_lookup_sum(&table, 4, &[2, 1]);
        assert!((sum - 22.0).abs() < 1e-6);
    }

    #[test]
    fn table_lookup_unrolled_matches_remainder_path() {
        let ksub = 8;
        let m = 6; // 4-wide chunk plus a 2-wide remainder
        let table: Vec<f32> = (0..m * ksub).map(|i| i as f32 * 0.5).collect();
        let code = [1u8, 7, 3, 0, 5, 2];

        let expected: f32 = code
            .iter()
            .enumerate()
            .map(|(sub, &j)| table[sub * ksub + j as usize])
            .sum();
        assert!((table_lookup_sum(&table, ksub, &code) - expected).abs() < 1e-5);
    }
}
