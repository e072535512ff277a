//! Sequential readers for the construction input files.
//!
//! Construction consumes two paired binary streams: a groups file holding,
//! per coarse centroid, an `i32` group size followed by `size * dimension`
//! little-endian floats, and an ids file holding the same `i32` size
//! followed by `size` little-endian `u32` external ids. The streams are
//! read in lock-step; the `c`-th group corresponds to coarse centroid `c`.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// One coarse bucket pulled from the paired streams.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Coarse centroid this group belongs to (stream position).
    pub centroid: usize,
    /// Row-major `len * dimension` vector payload.
    pub vectors: Vec<f32>,
    /// External ids, parallel to `vectors` rows.
    pub ids: Vec<u32>,
}

impl Group {
    /// Number of points in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True for a `size = 0` group.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Lock-step reader over the paired groups/ids streams.
pub struct GroupReader {
    groups: BufReader<File>,
    ids: BufReader<File>,
    dimension: usize,
    total: usize,
    cursor: usize,
}

impl GroupReader {
    /// Opens both streams.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if either file cannot be opened.
    pub fn open<P: AsRef<Path>>(
        groups_path: P,
        ids_path: P,
        dimension: usize,
        centroids: usize,
    ) -> Result<Self> {
        Ok(Self {
            groups: BufReader::new(File::open(groups_path)?),
            ids: BufReader::new(File::open(ids_path)?),
            dimension,
            total: centroids,
            cursor: 0,
        })
    }

    /// Number of groups already consumed.
    #[must_use]
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Reads the next `(group, ids)` pair, or `None` after the last
    /// centroid. Empty groups are yielded unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptInput`] if either stream ends early or the
    /// two size prefixes disagree.
    pub fn next_group(&mut self) -> Result<Option<Group>> {
        if self.cursor == self.total {
            return Ok(None);
        }
        let centroid = self.cursor;

        let group_size = read_i32(&mut self.groups)
            .map_err(|e| truncated("groups", centroid, &e))?;
        let ids_size = read_i32(&mut self.ids).map_err(|e| truncated("ids", centroid, &e))?;

        if group_size != ids_size {
            return Err(Error::CorruptInput(format!(
                "streams disagree at group {centroid}: {group_size} vectors vs {ids_size} ids"
            )));
        }
        if group_size < 0 {
            return Err(Error::CorruptInput(format!(
                "negative group size {group_size} at group {centroid}"
            )));
        }

        #[allow(clippy::cast_sign_loss)]
        let size = group_size as usize;

        let vectors = read_f32s(&mut self.groups, size * self.dimension)
            .map_err(|e| truncated("groups", centroid, &e))?;
        let ids = read_u32s(&mut self.ids, size).map_err(|e| truncated("ids", centroid, &e))?;

        self.cursor += 1;
        Ok(Some(Group {
            centroid,
            vectors,
            ids,
        }))
    }
}

fn truncated(stream: &str, group: usize, err: &std::io::Error) -> Error {
    Error::CorruptInput(format!("{stream} stream truncated at group {group}: {err}"))
}

fn read_i32<R: Read>(reader: &mut R) -> std::io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_f32s<R: Read>(reader: &mut R, count: usize) -> std::io::Result<Vec<f32>> {
    let mut bytes = vec![0u8; count * 4];
    reader.read_exact(&mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn read_u32s<R: Read>(reader: &mut R, count: usize) -> std::io::Result<Vec<u32>> {
    let mut bytes = vec![0u8; count * 4];
    reader.read_exact(&mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Reads a raw little-endian `f32[count * dimension]` vector file, the
/// format the coarse centroid training file uses.
///
/// # Errors
///
/// Returns [`Error::CorruptInput`] if the file is shorter than
/// `count * dimension` floats.
pub fn read_raw_vectors<P: AsRef<Path>>(
    path: P,
    dimension: usize,
    count: usize,
) -> Result<Vec<f32>> {
    let mut reader = BufReader::new(File::open(path)?);
    read_f32s(&mut reader, count * dimension)
        .map_err(|e| Error::CorruptInput(format!("vector file truncated: {e}")))
}
