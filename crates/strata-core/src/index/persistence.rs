//! On-disk index format.
//!
//! The layout is pinned little-endian regardless of host, so index files
//! migrate between machines:
//!
//! ```text
//! u64 dimension, u64 centroids, u64 subcentroids
//! for c, for s:  u32 n, u32[n] external ids
//! for c, for s:  u32 n, u8[n]  residual codes   (n = points * code_size)
//! for c, for s:  u32 n, u8[n]  norm codes
//! for c:         u32 n, u32[n] neighbor ids     (n = subcentroids)
//! f32[centroids] alphas
//! ```
//!
//! Codebooks and the quantizer graph are persisted separately with their
//! own formats; reading an index takes them as collaborators.

use super::lists::CentroidLists;
use super::{NeighborTables, StrataIndex};
use crate::config::{IndexConfig, SearchConfig};
use crate::error::{Error, Result};
use crate::graph::CoarseQuantizer;
use crate::pq::ProductQuantizer;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Arc;

impl StrataIndex {
    /// Writes the index to `path`.
    ///
    /// # Errors
    ///
    /// Partially built indexes must not be serialized: returns
    /// [`Error::PqNotTrained`] if a quantizer never trained and
    /// [`Error::Config`] if `add` has not run. Write failures surface as
    /// [`Error::Io`].
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if !self.pq.is_trained() || !self.norm_pq.is_trained() {
            return Err(Error::PqNotTrained);
        }
        if self.neighbors.ids.len() != self.config.centroids {
            return Err(Error::Config(
                "index is not populated; run add before writing".into(),
            ));
        }

        let mut out = BufWriter::new(File::create(path)?);

        write_u64(&mut out, self.config.dimension as u64)?;
        write_u64(&mut out, self.config.centroids as u64)?;
        write_u64(&mut out, self.config.subcentroids as u64)?;

        for lists in &self.lists {
            for s in 0..lists.sublists() {
                let ids = lists.ids(s);
                write_u32(&mut out, ids.len() as u32)?;
                for &id in ids {
                    write_u32(&mut out, id)?;
                }
            }
        }

        for lists in &self.lists {
            for s in 0..lists.sublists() {
                let codes = lists.codes(s);
                write_u32(&mut out, codes.len() as u32)?;
                out.write_all(codes)?;
            }
        }

        for lists in &self.lists {
            for s in 0..lists.sublists() {
                let norm_codes = lists.norm_codes(s);
                write_u32(&mut out, norm_codes.len() as u32)?;
                out.write_all(norm_codes)?;
            }
        }

        for neighbor_ids in &self.neighbors.ids {
            write_u32(&mut out, neighbor_ids.len() as u32)?;
            for &id in neighbor_ids {
                write_u32(&mut out, id)?;
            }
        }

        for &alpha in &self.alphas {
            out.write_all(&alpha.to_le_bytes())?;
        }

        out.flush()?;
        Ok(())
    }

    /// Reads an index written by [`Self::write`], reattaching the
    /// separately persisted collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptIndex`] for any malformed payload (bad
    /// size prefix, early EOF, trailing bytes, or disagreement between
    /// the file header and the collaborators) and [`Error::PqNotTrained`]
    /// if a collaborator quantizer is untrained.
    pub fn read<P: AsRef<Path>>(
        path: P,
        quantizer: Arc<CoarseQuantizer>,
        pq: ProductQuantizer,
        norm_pq: ProductQuantizer,
        search: SearchConfig,
    ) -> Result<Self> {
        if !pq.is_trained() || !norm_pq.is_trained() {
            return Err(Error::PqNotTrained);
        }

        let mut input = BufReader::new(File::open(path)?);

        let dimension = read_u64(&mut input)? as usize;
        let centroids = read_u64(&mut input)? as usize;
        let subcentroids = read_u64(&mut input)? as usize;

        let config = IndexConfig {
            dimension,
            centroids,
            subcentroids,
            code_bytes: pq.m(),
            nbits: pq.nbits(),
        };
        config
            .validate()
            .map_err(|e| Error::CorruptIndex(format!("implausible header: {e}")))?;
        if pq.dimension() != dimension {
            return Err(Error::CorruptIndex(format!(
                "index dimension {dimension} does not match codebook dimension {}",
                pq.dimension()
            )));
        }

        let mut index = Self::new(config, search, quantizer)?;
        index.set_pq(pq)?;
        index.set_norm_pq(norm_pq)?;
        let code_size = index.pq.code_size();

        let mut ids = vec![Vec::new(); centroids];
        for per_centroid in &mut ids {
            for _ in 0..subcentroids {
                let n = read_u32(&mut input)? as usize;
                per_centroid.push(read_u32s(&mut input, n)?);
            }
        }

        let mut codes = vec![Vec::new(); centroids];
        for per_centroid in &mut codes {
            for _ in 0..subcentroids {
                let n = read_u32(&mut input)? as usize;
                per_centroid.push(read_bytes(&mut input, n)?);
            }
        }

        let mut norm_codes = vec![Vec::new(); centroids];
        for per_centroid in &mut norm_codes {
            for _ in 0..subcentroids {
                let n = read_u32(&mut input)? as usize;
                per_centroid.push(read_bytes(&mut input, n)?);
            }
        }

        let mut neighbors = NeighborTables::default();
        for c in 0..centroids {
            let n = read_u32(&mut input)? as usize;
            if n != subcentroids {
                return Err(Error::CorruptIndex(format!(
                    "centroid {c} records {n} neighbors, expected {subcentroids}"
                )));
            }
            neighbors.ids.push(read_u32s(&mut input, n)?);
        }

        let mut alphas = Vec::with_capacity(centroids);
        for _ in 0..centroids {
            let mut buf = [0u8; 4];
            input
                .read_exact(&mut buf)
                .map_err(map_eof)?;
            alphas.push(f32::from_le_bytes(buf));
        }

        let mut trailing = [0u8; 1];
        match input.read(&mut trailing) {
            Ok(0) => {}
            Ok(_) => {
                return Err(Error::CorruptIndex("trailing bytes after alphas".into()));
            }
            Err(e) => return Err(Error::Io(e)),
        }

        for (c, ((i, x), n)) in ids
            .into_iter()
            .zip(codes)
            .zip(norm_codes)
            .enumerate()
        {
            index.lists[c] = CentroidLists::from_parts(code_size, i, x, n)?;
        }
        index.neighbors = neighbors;
        index.alphas = alphas;

        Ok(index)
    }
}

fn map_eof(err: std::io::Error) -> Error {
    if err.kind() == ErrorKind::UnexpectedEof {
        Error::CorruptIndex("file ends before the recorded payload".into())
    } else {
        Error::Io(err)
    }
}

fn write_u64<W: Write>(out: &mut W, value: u64) -> Result<()> {
    out.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_u32<W: Write>(out: &mut W, value: u32) -> Result<()> {
    out.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u64<R: Read>(input: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf).map_err(map_eof)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u32<R: Read>(input: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf).map_err(map_eof)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u32s<R: Read>(input: &mut R, count: usize) -> Result<Vec<u32>> {
    let mut bytes = vec![0u8; count * 4];
    input.read_exact(&mut bytes).map_err(map_eof)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn read_bytes<R: Read>(input: &mut R, count: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; count];
    input.read_exact(&mut bytes).map_err(map_eof)?;
    Ok(bytes)
}
