//! Navigable small-world quantizer over the coarse centroids.

use super::layer::{Layer, NodeId};
use crate::error::{Error, Result};
use crate::simd;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Frontier entry for layer expansion, ordered so that `BinaryHeap::pop`
/// yields the *smallest* distance (ties resolved to the smaller id).
struct Hop {
    dist: f32,
    node: NodeId,
}

impl PartialEq for Hop {
    fn eq(&self, other: &Self) -> bool {
        self.dist.to_bits() == other.dist.to_bits() && self.node == other.node
    }
}

impl Eq for Hop {}

impl PartialOrd for Hop {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hop {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed on purpose: a max-heap of Hops pops the closest node.
        other
            .dist
            .total_cmp(&self.dist)
            .then(other.node.cmp(&self.node))
    }
}

/// Inserts into a `(distance, id)`-ascending array, dropping the worst
/// entry once `cap` is exceeded.
fn insert_bounded(nearest: &mut Vec<(f32, NodeId)>, entry: (f32, NodeId), cap: usize) {
    let at = nearest
        .partition_point(|&(d, n)| d.total_cmp(&entry.0).then(n.cmp(&entry.1)).is_lt());
    nearest.insert(at, entry);
    if nearest.len() > cap {
        nearest.pop();
    }
}

/// Hierarchical proximity graph used as the first-level quantizer.
///
/// Supports concurrent `search_knn` / `get_centroid` on read-only state;
/// insertion is internally synchronized as well, but internal ids are only
/// sequential when points are inserted from a single thread.
#[derive(Debug)]
pub struct CoarseQuantizer {
    /// Centroid dimension.
    dimension: usize,
    /// Centroid storage (`node_id -> vector`).
    vectors: RwLock<Vec<Vec<f32>>>,
    /// Hierarchical layers (layer 0 = bottom, dense connections).
    layers: RwLock<Vec<Layer>>,
    /// Entry point for search (highest layer node).
    entry_point: RwLock<Option<NodeId>>,
    /// Maximum layer of the entry point.
    max_layer: AtomicUsize,
    /// Number of centroids in the graph.
    count: AtomicUsize,
    /// PRNG state for layer selection.
    rng_state: AtomicU64,
    /// Maximum connections per node (M parameter).
    max_connections: usize,
    /// Maximum connections at layer 0 (2*M).
    max_connections_0: usize,
    /// Construction-time expansion width.
    ef_construction: usize,
    /// Query-time expansion width, tunable after construction.
    ef_search: AtomicUsize,
    /// Level multiplier for layer selection (1/ln(M)).
    level_mult: f64,
}

/// Graph parameters and centroid payload, persisted to the info file.
#[derive(Serialize, Deserialize)]
struct QuantizerInfo {
    dimension: usize,
    max_connections: usize,
    ef_construction: usize,
    max_layer: usize,
    entry_point: Option<NodeId>,
    vectors: Vec<Vec<f32>>,
}

/// Adjacency lists per layer, persisted to the edges file.
#[derive(Serialize, Deserialize)]
struct QuantizerEdges {
    layers: Vec<Vec<Vec<NodeId>>>,
}

impl CoarseQuantizer {
    const RNG_SEED: u64 = 0x853C_49E6_748F_EA9B;
    /// Hard cap on the level draw; beyond this the upper layers hold a
    /// handful of nodes and add nothing.
    const MAX_LEVEL: usize = 12;

    /// Creates an empty quantizer.
    #[must_use]
    pub fn new(
        dimension: usize,
        max_connections: usize,
        ef_construction: usize,
        capacity: usize,
    ) -> Self {
        let max_connections_0 = max_connections * 2;
        let level_mult = 1.0 / (max_connections as f64).ln();

        Self {
            dimension,
            vectors: RwLock::new(Vec::with_capacity(capacity)),
            layers: RwLock::new(vec![Layer::new(capacity)]),
            entry_point: RwLock::new(None),
            max_layer: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
            rng_state: AtomicU64::new(Self::RNG_SEED),
            max_connections,
            max_connections_0,
            ef_construction,
            ef_search: AtomicUsize::new(128),
            level_mult,
        }
    }

    /// Returns the centroid dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the number of centroids in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Returns true if the graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets the query-time expansion width.
    pub fn set_ef(&self, ef: usize) {
        self.ef_search.store(ef, Ordering::Relaxed);
    }

    /// Returns the query-time expansion width.
    #[must_use]
    pub fn ef(&self) -> usize {
        self.ef_search.load(Ordering::Relaxed)
    }

    /// Returns a copy of the centroid with the given internal id.
    ///
    /// # Panics
    ///
    /// Panics if `id` has not been assigned.
    #[must_use]
    pub fn get_centroid(&self, id: NodeId) -> Vec<f32> {
        self.vectors.read()[id].clone()
    }

    /// Inserts a centroid and returns its internal id.
    ///
    /// Ids are assigned sequentially, so when centroids are inserted in
    /// stream order the `c`-th centroid receives id `c`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the vector width is wrong.
    pub fn add_point(&self, vector: &[f32]) -> Result<NodeId> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let node_id = {
            let mut vectors = self.vectors.write();
            let id = vectors.len();
            vectors.push(vector.to_vec());
            id
        };

        let node_layer = self.draw_level();

        {
            let mut layers = self.layers.write();
            while layers.len() <= node_layer {
                layers.push(Layer::new(node_id + 1));
            }
            for layer in layers.iter_mut() {
                layer.ensure_capacity(node_id);
            }
        }

        let entry_point = *self.entry_point.read();

        if let Some(ep) = entry_point {
            let query = self.get_centroid(node_id);
            let mut current_ep = ep;
            let max_layer = self.max_layer.load(Ordering::Relaxed);

            // Greedy descent through layers above the node's own layer.
            for layer_idx in (node_layer + 1..=max_layer).rev() {
                current_ep = self.search_layer_single(&query, current_ep, layer_idx);
            }

            // Link into every layer from node_layer down to 0.
            for layer_idx in (0..=node_layer.min(max_layer)).rev() {
                let candidates =
                    self.search_layer(&query, vec![current_ep], self.ef_construction, layer_idx);

                let max_conn = if layer_idx == 0 {
                    self.max_connections_0
                } else {
                    self.max_connections
                };
                let selected = self.select_neighbors(&candidates, max_conn);

                self.layers.read()[layer_idx].set_neighbors(node_id, selected.clone());

                for &neighbor in &selected {
                    self.link_back(node_id, neighbor, layer_idx, max_conn);
                }

                if let Some(&(closest, _)) = candidates.first() {
                    current_ep = closest;
                }
            }
        } else {
            *self.entry_point.write() = Some(node_id);
        }

        if node_layer > self.max_layer.load(Ordering::Relaxed) {
            self.max_layer.store(node_layer, Ordering::Relaxed);
            *self.entry_point.write() = Some(node_id);
        }

        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(node_id)
    }

    /// Searches for the `k` nearest centroids to `query`.
    ///
    /// Returns `(squared distance, id)` pairs sorted ascending by distance
    /// with ties broken by ascending id, at most `k` of them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the query width is wrong.
    pub fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<(f32, NodeId)>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let entry_point = *self.entry_point.read();
        let Some(ep) = entry_point else {
            return Ok(Vec::new());
        };

        let max_layer = self.max_layer.load(Ordering::Relaxed);
        let ef = self.ef().max(k);

        let mut current_ep = ep;
        for layer_idx in (1..=max_layer).rev() {
            current_ep = self.search_layer_single(query, current_ep, layer_idx);
        }

        let mut candidates = self.search_layer(query, vec![current_ep], ef, 0);
        candidates.truncate(k);
        Ok(candidates.into_iter().map(|(id, d)| (d, id)).collect())
    }

    /// Persists the graph: parameters and centroids to `info_path`,
    /// adjacency lists to `edges_path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if either file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, info_path: P, edges_path: P) -> Result<()> {
        let info = QuantizerInfo {
            dimension: self.dimension,
            max_connections: self.max_connections,
            ef_construction: self.ef_construction,
            max_layer: self.max_layer.load(Ordering::Relaxed),
            entry_point: *self.entry_point.read(),
            vectors: self.vectors.read().clone(),
        };
        let edges = QuantizerEdges {
            layers: self.layers.read().iter().map(Layer::snapshot).collect(),
        };

        let info_file = BufWriter::new(File::create(info_path)?);
        bincode::serialize_into(info_file, &info).map_err(|e| Error::Io(std::io::Error::other(e)))?;

        let edges_file = BufWriter::new(File::create(edges_path)?);
        bincode::serialize_into(edges_file, &edges)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        Ok(())
    }

    /// Restores a quantizer previously written by [`Self::save`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a file cannot be read and
    /// [`Error::CorruptIndex`] if the payload is malformed or the two
    /// files disagree.
    pub fn load<P: AsRef<Path>>(info_path: P, edges_path: P) -> Result<Self> {
        let info_file = BufReader::new(File::open(info_path)?);
        let info: QuantizerInfo = bincode::deserialize_from(info_file)
            .map_err(|e| Error::CorruptIndex(format!("quantizer info: {e}")))?;

        let edges_file = BufReader::new(File::open(edges_path)?);
        let edges: QuantizerEdges = bincode::deserialize_from(edges_file)
            .map_err(|e| Error::CorruptIndex(format!("quantizer edges: {e}")))?;

        let count = info.vectors.len();
        if info.dimension == 0 || info.max_connections == 0 {
            return Err(Error::CorruptIndex("degenerate quantizer parameters".into()));
        }
        if let Some(ep) = info.entry_point {
            if ep >= count {
                return Err(Error::CorruptIndex(format!(
                    "entry point {ep} out of range for {count} centroids"
                )));
            }
        }
        if edges.layers.is_empty() || edges.layers.len() <= info.max_layer {
            return Err(Error::CorruptIndex(
                "edge file does not cover the recorded layer range".into(),
            ));
        }
        if info.vectors.iter().any(|v| v.len() != info.dimension) {
            return Err(Error::CorruptIndex("centroid width drifts in info file".into()));
        }

        let layers: Vec<Layer> = edges
            .layers
            .into_iter()
            .map(|mut adjacency| {
                adjacency.resize(count, Vec::new());
                Layer::from_adjacency(adjacency)
            })
            .collect();

        Ok(Self {
            dimension: info.dimension,
            vectors: RwLock::new(info.vectors),
            layers: RwLock::new(layers),
            entry_point: RwLock::new(info.entry_point),
            max_layer: AtomicUsize::new(info.max_layer),
            count: AtomicUsize::new(count),
            rng_state: AtomicU64::new(Self::RNG_SEED),
            max_connections: info.max_connections,
            max_connections_0: info.max_connections * 2,
            ef_construction: info.ef_construction,
            ef_search: AtomicUsize::new(128),
            level_mult: 1.0 / (info.max_connections as f64).ln(),
        })
    }

    // =========================================================================
    // Private helpers
    // =========================================================================

    /// Draws a node's top level from the exponential distribution the
    /// hierarchy expects (`floor(-ln(u) / ln(M))`).
    ///
    /// The state advances by `fetch_add` of an odd constant and each draw
    /// is finalized with a splitmix64 mix, so concurrent inserts never
    /// consume the same state value.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn draw_level(&self) -> usize {
        let stepped = self
            .rng_state
            .fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed)
            .wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut mixed = stepped;
        mixed = (mixed ^ (mixed >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        mixed = (mixed ^ (mixed >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        mixed ^= mixed >> 31;

        // Top 53 bits, shifted into (0, 1] so the logarithm stays finite.
        let uniform = ((mixed >> 11) + 1) as f64 / (1u64 << 53) as f64;
        let level = (-uniform.ln() * self.level_mult) as usize;
        level.min(Self::MAX_LEVEL)
    }

    /// Greedy descent: hill-climb to the locally closest node in a layer.
    fn search_layer_single(&self, query: &[f32], entry: NodeId, layer: usize) -> NodeId {
        let mut best = entry;
        let mut best_dist = {
            let vectors = self.vectors.read();
            simd::squared_l2(query, &vectors[entry])
        };

        loop {
            let neighbors = self.layers.read()[layer].get_neighbors(best);
            let mut improved = false;

            let vectors = self.vectors.read();
            for neighbor in neighbors {
                let dist = simd::squared_l2(query, &vectors[neighbor]);
                if dist < best_dist {
                    best = neighbor;
                    best_dist = dist;
                    improved = true;
                }
            }
            drop(vectors);

            if !improved {
                break;
            }
        }

        best
    }

    /// Best-first expansion across one layer, keeping the `width` nearest
    /// nodes found.
    ///
    /// The running result set is a small sorted array (kept ordered by
    /// `insert_bounded`, so it doubles as the stopping threshold and
    /// needs no final sort), the frontier is a heap of [`Hop`]s popping
    /// closest-first, and the visited set is a plain bitmap since
    /// internal ids are dense. The vectors lock is held across the whole
    /// expansion; the layers lock is taken per adjacency fetch, always
    /// after vectors, never the other way around.
    ///
    /// Returns `(id, distance)` sorted ascending by distance, ties by id.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: Vec<NodeId>,
        width: usize,
        layer: usize,
    ) -> Vec<(NodeId, f32)> {
        let vectors = self.vectors.read();

        let mut seen = vec![false; vectors.len()];
        let mut frontier: BinaryHeap<Hop> = BinaryHeap::new();
        let mut nearest: Vec<(f32, NodeId)> = Vec::with_capacity(width + 1);

        for entry in entry_points {
            if std::mem::replace(&mut seen[entry], true) {
                continue;
            }
            let dist = simd::squared_l2(query, &vectors[entry]);
            insert_bounded(&mut nearest, (dist, entry), width);
            frontier.push(Hop { dist, node: entry });
        }

        while let Some(hop) = frontier.pop() {
            let worst = nearest.last().map_or(f32::INFINITY, |&(d, _)| d);
            if nearest.len() == width && hop.dist > worst {
                break;
            }

            let adjacency = self.layers.read()[layer].get_neighbors(hop.node);
            for next in adjacency {
                if std::mem::replace(&mut seen[next], true) {
                    continue;
                }
                let dist = simd::squared_l2(query, &vectors[next]);
                let worst = nearest.last().map_or(f32::INFINITY, |&(d, _)| d);
                if nearest.len() < width || dist < worst {
                    insert_bounded(&mut nearest, (dist, next), width);
                    frontier.push(Hop { dist, node: next });
                }
            }
        }

        nearest.into_iter().map(|(dist, node)| (node, dist)).collect()
    }

    /// Distance-ordered neighbor selection with occlusion pruning.
    ///
    /// A candidate is kept when it is closer to the query than to every
    /// neighbor already selected; the quota is then topped up with the
    /// closest remaining candidates.
    fn select_neighbors(&self, candidates: &[(NodeId, f32)], max_neighbors: usize) -> Vec<NodeId> {
        if candidates.len() <= max_neighbors {
            return candidates.iter().map(|(id, _)| *id).collect();
        }

        let vectors = self.vectors.read();
        let mut selected: Vec<NodeId> = Vec::with_capacity(max_neighbors);

        for &(candidate, candidate_dist) in candidates {
            if selected.len() >= max_neighbors {
                break;
            }
            let diverse = selected.iter().all(|&s| {
                candidate_dist <= simd::squared_l2(&vectors[candidate], &vectors[s])
            });
            if diverse || selected.is_empty() {
                selected.push(candidate);
            }
        }

        if selected.len() < max_neighbors {
            for &(candidate, _) in candidates {
                if selected.len() >= max_neighbors {
                    break;
                }
                if !selected.contains(&candidate) {
                    selected.push(candidate);
                }
            }
        }

        selected
    }

    /// Registers the reverse edge `neighbor -> node`.
    ///
    /// Below the cap the edge is appended in place. On overflow the
    /// neighbor's adjacency is rebuilt: every candidate (old edges plus
    /// the new one) is ranked by distance to the neighbor under the
    /// vectors lock alone, and the layer slot is rewritten afterwards, so
    /// the vectors and layers locks are never held together here.
    fn link_back(&self, node: NodeId, neighbor: NodeId, layer: usize, cap: usize) {
        let mut adjacency = {
            let layers = self.layers.read();
            let mut adjacency = layers[layer].get_neighbors(neighbor);
            if adjacency.len() < cap {
                adjacency.push(node);
                layers[layer].set_neighbors(neighbor, adjacency);
                return;
            }
            adjacency
        };
        adjacency.push(node);

        let mut ranked: Vec<(f32, NodeId)> = {
            let vectors = self.vectors.read();
            let around = &vectors[neighbor];
            adjacency
                .into_iter()
                .map(|n| (simd::squared_l2(around, &vectors[n]), n))
                .collect()
        };
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let kept: Vec<NodeId> = ranked.into_iter().take(cap).map(|(_, n)| n).collect();
        self.layers.read()[layer].set_neighbors(neighbor, kept);
    }
}
