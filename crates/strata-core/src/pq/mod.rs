//! Product quantizer: codebook training, byte encoding, ADC tables.
//!
//! One type covers both quantizers the index carries: the residual
//! quantizer splits a `dimension`-wide vector into `m` sub-vectors with a
//! `2^nbits`-codeword codebook each, and the norm quantizer is the same
//! machinery instantiated at `dimension = 1, m = 1`, quantizing scalars.
//!
//! Codes occupy one byte per sub-quantizer; sub-byte code widths are not
//! bit-packed.

mod kmeans;

use crate::error::{Error, Result};
use crate::simd;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Product quantizer over `m` sub-spaces of `dimension / m` components.
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    /// Input vector dimension.
    dimension: usize,
    /// Number of sub-quantizers.
    m: usize,
    /// Bits per codeword index.
    nbits: usize,
    /// Codewords per sub-quantizer (`2^nbits`).
    ksub: usize,
    /// Components per sub-vector (`dimension / m`).
    dsub: usize,
    /// Codebooks, laid out `[m][ksub][dsub]` row-major.
    centroids: Vec<f32>,
    /// Set once `train` (or `load`) has produced codebooks.
    trained: bool,
}

#[derive(Serialize, Deserialize)]
struct PqSnapshot {
    dimension: usize,
    m: usize,
    nbits: usize,
    centroids: Vec<f32>,
}

impl ProductQuantizer {
    const KMEANS_ITERATIONS: usize = 25;
    const KMEANS_SEED: u64 = 0x2545_F491_4F6C_DD1D;

    /// Creates an untrained quantizer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParameterOutOfRange`] unless `m` divides
    /// `dimension` and `nbits` is in `[1, 8]`.
    pub fn new(dimension: usize, m: usize, nbits: usize) -> Result<Self> {
        if dimension == 0 || m == 0 || dimension % m != 0 {
            return Err(Error::ParameterOutOfRange {
                param: "m",
                message: format!("{m} sub-quantizers do not divide dimension {dimension}"),
            });
        }
        if nbits == 0 || nbits > 8 {
            return Err(Error::ParameterOutOfRange {
                param: "nbits",
                message: format!("must be in [1, 8]; got {nbits}"),
            });
        }
        Ok(Self {
            dimension,
            m,
            nbits,
            ksub: 1 << nbits,
            dsub: dimension / m,
            centroids: Vec::new(),
            trained: false,
        })
    }

    /// Input vector dimension.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of sub-quantizers.
    #[must_use]
    pub const fn m(&self) -> usize {
        self.m
    }

    /// Bits per codeword index.
    #[must_use]
    pub const fn nbits(&self) -> usize {
        self.nbits
    }

    /// Codewords per sub-quantizer.
    #[must_use]
    pub const fn ksub(&self) -> usize {
        self.ksub
    }

    /// Components per sub-vector.
    #[must_use]
    pub const fn dsub(&self) -> usize {
        self.dsub
    }

    /// Bytes per encoded vector.
    #[must_use]
    pub const fn code_size(&self) -> usize {
        self.m
    }

    /// True once codebooks exist.
    #[must_use]
    pub const fn is_trained(&self) -> bool {
        self.trained
    }

    /// Minimum number of training rows `train` accepts.
    #[must_use]
    pub const fn min_training_rows(&self) -> usize {
        self.ksub
    }

    fn codeword(&self, sub: usize, j: usize) -> &[f32] {
        let start = (sub * self.ksub + j) * self.dsub;
        &self.centroids[start..start + self.dsub]
    }

    /// Fits one codebook per sub-quantizer with Lloyd k-means.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `rows` is not a whole
    /// number of vectors and [`Error::TrainingDataInsufficient`] if there
    /// are fewer rows than codewords.
    pub fn train(&mut self, rows: &[f32]) -> Result<()> {
        if rows.len() % self.dimension != 0 {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: rows.len() % self.dimension,
            });
        }
        let n = rows.len() / self.dimension;
        if n < self.ksub {
            return Err(Error::TrainingDataInsufficient {
                required: self.ksub,
                actual: n,
            });
        }

        tracing::debug!(
            sub_quantizers = self.m,
            codewords = self.ksub,
            rows = n,
            "fitting product quantizer codebooks"
        );

        let dimension = self.dimension;
        let dsub = self.dsub;
        let ksub = self.ksub;

        let codebooks: Vec<Vec<f32>> = (0..self.m)
            .into_par_iter()
            .map(|sub| {
                // Gather this sub-space into a contiguous block.
                let mut block = vec![0.0f32; n * dsub];
                for i in 0..n {
                    let src = &rows[i * dimension + sub * dsub..i * dimension + (sub + 1) * dsub];
                    block[i * dsub..(i + 1) * dsub].copy_from_slice(src);
                }
                kmeans::fit(
                    &block,
                    dsub,
                    ksub,
                    Self::KMEANS_ITERATIONS,
                    Self::KMEANS_SEED ^ sub as u64,
                )
            })
            .collect();

        self.centroids = codebooks.concat();
        self.trained = true;
        Ok(())
    }

    /// Encodes `rows` into `rows.len() / dimension * code_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PqNotTrained`] before training and
    /// [`Error::DimensionMismatch`] on a ragged input buffer.
    pub fn encode(&self, rows: &[f32]) -> Result<Vec<u8>> {
        if !self.trained {
            return Err(Error::PqNotTrained);
        }
        if rows.len() % self.dimension != 0 {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: rows.len() % self.dimension,
            });
        }

        let n = rows.len() / self.dimension;
        let mut codes = vec![0u8; n * self.m];
        for (row, code) in rows
            .chunks_exact(self.dimension)
            .zip(codes.chunks_exact_mut(self.m))
        {
            self.encode_row(row, code);
        }
        Ok(codes)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_row(&self, row: &[f32], code: &mut [u8]) {
        for sub in 0..self.m {
            let sub_vector = &row[sub * self.dsub..(sub + 1) * self.dsub];
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for j in 0..self.ksub {
                let dist = simd::squared_l2(sub_vector, self.codeword(sub, j));
                if dist < best_dist {
                    best = j;
                    best_dist = dist;
                }
            }
            code[sub] = best as u8;
        }
    }

    /// Decodes codes back into reconstructed vectors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PqNotTrained`] before training and
    /// [`Error::CorruptIndex`] if `codes` is not a whole number of codes.
    pub fn decode(&self, codes: &[u8]) -> Result<Vec<f32>> {
        let mut out = Vec::new();
        self.decode_into(codes, &mut out)?;
        Ok(out)
    }

    /// Decodes into a caller-owned buffer, reusing its capacity.
    ///
    /// # Errors
    ///
    /// Same as [`Self::decode`].
    pub fn decode_into(&self, codes: &[u8], out: &mut Vec<f32>) -> Result<()> {
        if !self.trained {
            return Err(Error::PqNotTrained);
        }
        if codes.len() % self.m != 0 {
            return Err(Error::CorruptIndex(format!(
                "code buffer of {} bytes is not a multiple of the code size {}",
                codes.len(),
                self.m
            )));
        }

        let n = codes.len() / self.m;
        out.clear();
        out.reserve(n * self.dimension);
        for code in codes.chunks_exact(self.m) {
            for (sub, &j) in code.iter().enumerate() {
                out.extend_from_slice(self.codeword(sub, usize::from(j)));
            }
        }
        Ok(())
    }

    /// Fills `table` with `⟨x_sub, codeword⟩` for every codeword, laid out
    /// `table[sub * ksub + j]`, so that summing `table[sub * ksub +
    /// code[sub]]` over sub-quantizers yields `⟨x, decode(code)⟩`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PqNotTrained`] before training and
    /// [`Error::DimensionMismatch`] if `x` or `table` have the wrong size.
    pub fn inner_product_table(&self, x: &[f32], table: &mut [f32]) -> Result<()> {
        if !self.trained {
            return Err(Error::PqNotTrained);
        }
        if x.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: x.len(),
            });
        }
        if table.len() != self.m * self.ksub {
            return Err(Error::DimensionMismatch {
                expected: self.m * self.ksub,
                actual: table.len(),
            });
        }

        for sub in 0..self.m {
            let sub_vector = &x[sub * self.dsub..(sub + 1) * self.dsub];
            for j in 0..self.ksub {
                table[sub * self.ksub + j] = simd::inner_product(sub_vector, self.codeword(sub, j));
            }
        }
        Ok(())
    }

    /// Persists the codebooks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PqNotTrained`] before training and [`Error::Io`]
    /// on write failure.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if !self.trained {
            return Err(Error::PqNotTrained);
        }
        let snapshot = PqSnapshot {
            dimension: self.dimension,
            m: self.m,
            nbits: self.nbits,
            centroids: self.centroids.clone(),
        };
        let file = BufWriter::new(File::create(path)?);
        bincode::serialize_into(file, &snapshot)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        Ok(())
    }

    /// Restores a quantizer previously written by [`Self::save`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and
    /// [`Error::CorruptIndex`] if the payload is malformed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = BufReader::new(File::open(path)?);
        let snapshot: PqSnapshot = bincode::deserialize_from(file)
            .map_err(|e| Error::CorruptIndex(format!("codebook file: {e}")))?;

        let mut pq = Self::new(snapshot.dimension, snapshot.m, snapshot.nbits)?;
        if snapshot.centroids.len() != pq.m * pq.ksub * pq.dsub {
            return Err(Error::CorruptIndex(format!(
                "codebook payload holds {} floats, expected {}",
                snapshot.centroids.len(),
                pq.m * pq.ksub * pq.dsub
            )));
        }
        pq.centroids = snapshot.centroids;
        pq.trained = true;
        Ok(pq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trained_pq(dimension: usize, m: usize, nbits: usize, rows: usize) -> ProductQuantizer {
        let mut pq = ProductQuantizer::new(dimension, m, nbits).unwrap();
        let data: Vec<f32> = (0..rows * dimension)
            .map(|i| (i as f32 * 0.61).sin() * 3.0)
            .collect();
        pq.train(&data).unwrap();
        pq
    }

    #[test]
    fn rejects_non_dividing_m() {
        assert!(ProductQuantizer::new(10, 3, 8).is_err());
        assert!(ProductQuantizer::new(12, 3, 8).is_ok());
    }

    #[test]
    fn untrained_encode_fails() {
        let pq = ProductQuantizer::new(8, 2, 4).unwrap();
        let err = pq.encode(&[0.0; 8]).unwrap_err();
        assert_eq!(err.code(), "STRATA-004");
    }

    #[test]
    fn short_pool_is_rejected() {
        let mut pq = ProductQuantizer::new(8, 2, 8).unwrap();
        let err = pq.train(&vec![0.5; 8 * 10]).unwrap_err();
        assert_eq!(err.code(), "STRATA-005");
    }

    #[test]
    fn encode_decode_is_deterministic() {
        let pq = trained_pq(8, 2, 4, 64);
        let rows: Vec<f32> = (0..8 * 5).map(|i| (i as f32 * 0.3).cos()).collect();
        let a = pq.encode(&rows).unwrap();
        let b = pq.encode(&rows).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 5 * pq.code_size());

        let decoded = pq.decode(&a).unwrap();
        assert_eq!(decoded.len(), rows.len());
        // Requantizing a reconstruction is a fixed point.
        let again = pq.encode(&decoded).unwrap();
        assert_eq!(a, again);
    }

    #[test]
    fn table_sum_matches_decoded_inner_product() {
        let pq = trained_pq(8, 2, 4, 64);
        let row: Vec<f32> = (0..8).map(|i| (i as f32 * 0.7).sin()).collect();
        let query: Vec<f32> = (0..8).map(|i| (i as f32 * 0.2).cos()).collect();

        let code = pq.encode(&row).unwrap();
        let decoded = pq.decode(&code).unwrap();

        let mut table = vec![0.0f32; pq.m() * pq.ksub()];
        pq.inner_product_table(&query, &mut table).unwrap();

        let via_table: f32 = code
            .iter()
            .enumerate()
            .map(|(sub, &j)| table[sub * pq.ksub() + usize::from(j)])
            .sum();
        let direct = crate::simd::inner_product(&query, &decoded);
        assert!((via_table - direct).abs() < 1e-4);
    }

    #[test]
    fn scalar_instantiation_quantizes_norms() {
        // The norm quantizer is the same type at dimension = 1, m = 1.
        let mut pq = ProductQuantizer::new(1, 1, 8).unwrap();
        let norms: Vec<f32> = (0..512).map(|i| i as f32 * 0.25).collect();
        pq.train(&norms).unwrap();

        let codes = pq.encode(&norms[..16]).unwrap();
        assert_eq!(codes.len(), 16);
        let decoded = pq.decode(&codes).unwrap();
        for (&x, &y) in norms[..16].iter().zip(&decoded) {
            assert!((x - y).abs() < 0.5, "norm {x} decoded as {y}");
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pq.bin");

        let pq = trained_pq(8, 4, 4, 64);
        pq.save(&path).unwrap();
        let restored = ProductQuantizer::load(&path).unwrap();

        assert!(restored.is_trained());
        let rows: Vec<f32> = (0..8 * 3).map(|i| (i as f32 * 0.9).sin()).collect();
        assert_eq!(pq.encode(&rows).unwrap(), restored.encode(&rows).unwrap());
    }
}
