//! Graph coarse quantizer.
//!
//! A hierarchical navigable small world graph over the coarse centroids,
//! as described in the Malkov & Yashunin paper. The quantizer owns the
//! centroid vectors: the rest of the index refers to centroids by the
//! sequential internal id assigned at insertion time.
//!
//! # References
//!
//! - Paper: "Efficient and robust approximate nearest neighbor search
//!   using Hierarchical Navigable Small World graphs" (Malkov & Yashunin, 2016)
//! - arXiv: <https://arxiv.org/abs/1603.09320>

mod layer;
mod quantizer;

pub use layer::NodeId;
pub use quantizer::CoarseQuantizer;
