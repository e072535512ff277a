//! Ragged inverted-list storage for one coarse centroid.
//!
//! Each coarse centroid owns `nsubc` sub-lists. Rather than `nsubc` small
//! allocations per field, the three per-point sequences (external ids,
//! residual codes, norm codes) live in flat buffers with a prefix-sum
//! offset table over the sub-list axis, giving contiguous memory per
//! centroid and sequential scans at query time.

use crate::error::{Error, Result};

/// Frozen per-centroid inverted lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentroidLists {
    /// Bytes per residual code.
    code_size: usize,
    /// Prefix sums over sub-lists, in points; length `nsubc + 1`.
    offsets: Vec<usize>,
    /// External ids, concatenated over sub-lists.
    ids: Vec<u32>,
    /// Residual codes, `code_size` bytes per point.
    codes: Vec<u8>,
    /// One norm code byte per point.
    norm_codes: Vec<u8>,
}

impl CentroidLists {
    /// Creates empty lists for `sublists` sub-centroids.
    #[must_use]
    pub fn empty(sublists: usize, code_size: usize) -> Self {
        Self {
            code_size,
            offsets: vec![0; sublists + 1],
            ids: Vec::new(),
            codes: Vec::new(),
            norm_codes: Vec::new(),
        }
    }

    /// Assembles lists from per-sub-list parts, validating the length
    /// relations between the three sequences.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptIndex`] if the parts disagree in length.
    pub(crate) fn from_parts(
        code_size: usize,
        ids: Vec<Vec<u32>>,
        codes: Vec<Vec<u8>>,
        norm_codes: Vec<Vec<u8>>,
    ) -> Result<Self> {
        if codes.len() != ids.len() || norm_codes.len() != ids.len() {
            return Err(Error::CorruptIndex(
                "sub-list counts disagree across sections".into(),
            ));
        }

        let sublists = ids.len();
        let mut merged = Self::empty(sublists, code_size);
        merged.offsets.clear();
        merged.offsets.push(0);

        for s in 0..sublists {
            let n = ids[s].len();
            if codes[s].len() != n * code_size {
                return Err(Error::CorruptIndex(format!(
                    "sub-list {s} holds {} code bytes for {n} points (code size {code_size})",
                    codes[s].len()
                )));
            }
            if norm_codes[s].len() != n {
                return Err(Error::CorruptIndex(format!(
                    "sub-list {s} holds {} norm codes for {n} points",
                    norm_codes[s].len()
                )));
            }
            merged.ids.extend_from_slice(&ids[s]);
            merged.codes.extend_from_slice(&codes[s]);
            merged.norm_codes.extend_from_slice(&norm_codes[s]);
            merged.offsets.push(merged.ids.len());
        }

        Ok(merged)
    }

    /// Number of sub-lists.
    #[must_use]
    pub fn sublists(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Number of points in sub-list `s`.
    #[must_use]
    pub fn len(&self, s: usize) -> usize {
        self.offsets[s + 1] - self.offsets[s]
    }

    /// Total number of points under this centroid.
    #[must_use]
    pub fn total(&self) -> usize {
        *self.offsets.last().unwrap_or(&0)
    }

    /// True when no sub-list holds a point.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// External ids of sub-list `s`.
    #[must_use]
    pub fn ids(&self, s: usize) -> &[u32] {
        &self.ids[self.offsets[s]..self.offsets[s + 1]]
    }

    /// Residual codes of sub-list `s`, `code_size` bytes per point.
    #[must_use]
    pub fn codes(&self, s: usize) -> &[u8] {
        &self.codes[self.offsets[s] * self.code_size..self.offsets[s + 1] * self.code_size]
    }

    /// Norm codes of sub-list `s`, one byte per point.
    #[must_use]
    pub fn norm_codes(&self, s: usize) -> &[u8] {
        &self.norm_codes[self.offsets[s]..self.offsets[s + 1]]
    }
}

/// Accumulates one group's points by sub-centroid, then freezes into the
/// flat representation. Scratch space lives only for the group.
pub(crate) struct ListBuilder {
    code_size: usize,
    ids: Vec<Vec<u32>>,
    codes: Vec<Vec<u8>>,
    norm_codes: Vec<Vec<u8>>,
}

impl ListBuilder {
    pub(crate) fn new(sublists: usize, code_size: usize) -> Self {
        Self {
            code_size,
            ids: vec![Vec::new(); sublists],
            codes: vec![Vec::new(); sublists],
            norm_codes: vec![Vec::new(); sublists],
        }
    }

    pub(crate) fn push(&mut self, sublist: usize, id: u32, code: &[u8], norm_code: u8) {
        debug_assert_eq!(code.len(), self.code_size);
        self.ids[sublist].push(id);
        self.codes[sublist].extend_from_slice(code);
        self.norm_codes[sublist].push(norm_code);
    }

    pub(crate) fn freeze(self) -> CentroidLists {
        // The builder maintains the length relations, so this cannot fail.
        CentroidLists::from_parts(self.code_size, self.ids, self.codes, self.norm_codes)
            .unwrap_or_else(|_| unreachable!("builder preserves sub-list invariants"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_groups_points_by_sublist() {
        let mut builder = ListBuilder::new(3, 2);
        builder.push(1, 10, &[1, 2], 100);
        builder.push(0, 11, &[3, 4], 101);
        builder.push(1, 12, &[5, 6], 102);

        let lists = builder.freeze();
        assert_eq!(lists.sublists(), 3);
        assert_eq!(lists.total(), 3);
        assert_eq!(lists.len(0), 1);
        assert_eq!(lists.len(1), 2);
        assert_eq!(lists.len(2), 0);

        assert_eq!(lists.ids(1), &[10, 12]);
        assert_eq!(lists.codes(1), &[1, 2, 5, 6]);
        assert_eq!(lists.norm_codes(1), &[100, 102]);
        assert_eq!(lists.ids(2), &[] as &[u32]);
    }

    #[test]
    fn empty_lists_have_zero_everywhere() {
        let lists = CentroidLists::empty(4, 8);
        assert!(lists.is_empty());
        assert_eq!(lists.sublists(), 4);
        for s in 0..4 {
            assert_eq!(lists.len(s), 0);
        }
    }

    #[test]
    fn from_parts_rejects_ragged_codes() {
        let err = CentroidLists::from_parts(
            2,
            vec![vec![1, 2]],
            vec![vec![0u8; 3]], // 3 bytes cannot cover 2 points at 2 bytes each
            vec![vec![0u8; 2]],
        )
        .unwrap_err();
        assert_eq!(err.code(), "STRATA-002");
    }
}
