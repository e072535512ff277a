//! # Strata Core
//!
//! Billion-scale approximate nearest-neighbor search over dense float
//! vectors under squared Euclidean distance.
//!
//! Strata is a two-level inverted-list index. A navigable small-world
//! graph quantizer partitions the database across coarse centroids; each
//! coarse cell is split again along locally fitted *sub-centroids*, affine
//! combinations of the centroid and its neighbor-centroid directions.
//! Points are stored as product-quantized residuals against their
//! sub-centroid, and queries rank candidates through a decomposed distance
//! that reads one precomputed inner-product table instead of raw vectors.
//!
//! ## Features
//!
//! - **Compact**: a point costs its residual code plus one norm byte
//! - **Fast coarse probe**: graph descent instead of exhaustive centroid scan
//! - **Portable persistence**: pinned little-endian index files
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata_core::{IndexConfig, SearchConfig, StrataIndex};
//!
//! let config = IndexConfig { dimension: 128, centroids: 1_000_000, ..Default::default() };
//! let search = SearchConfig::default();
//!
//! let quantizer = StrataIndex::build_quantizer(
//!     &config, &search, "centroids.bin", "graph.info", "graph.edges",
//! )?;
//! let mut index = StrataIndex::new(config, search, quantizer)?;
//!
//! index.train_residual_pq(&learn_vectors)?;
//! index.train_norm_pq(&learn_vectors)?;
//! index.add("groups.bin", "ids.bin")?;
//!
//! let neighbors = index.search(&query, 10)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod graph;
pub mod index;
pub mod pq;
pub mod reader;
pub mod simd;

pub use config::{IndexConfig, SearchConfig, StrataConfig};
pub use error::{Error, Result};
pub use graph::CoarseQuantizer;
pub use index::{CentroidLists, StrataIndex};
pub use pq::ProductQuantizer;
pub use reader::{Group, GroupReader};
