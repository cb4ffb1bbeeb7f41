//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `bitset`: fixed-width clade bit vector with the sampled-ancestor marker bits.
//! - `tree`: annotatable tree arena, metadata values and taxon sets.
//! - `snapshot`: canonical per-node clade bitsets of a tree.
//! - `registry`: clade counts, credibilities and attribute samples.
//! - `selector`: maximum (sum) clade credibility tree selection.
//! - `annotate`: per-node attribute statistics of the summary tree.
//! - `ca_heights`: common-ancestor node heights.
//! - `stats` / `contour`: 1D and 2D summary statistics.
//! - `source`: rewindable posterior tree streams.
//! - `newick` / `io`: BEAST Newick and NEXUS reading and writing.
//! - `summary`: the end-to-end pipeline.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod annotate;
pub mod bitset;
pub mod ca_heights;
pub mod config;
pub mod contour;
pub mod error;
pub mod io;
pub mod newick;
pub mod registry;
pub mod selector;
pub mod snapshot;
pub mod source;
pub mod stats;
pub mod summary;
pub mod tree;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use bitset::Bitset;
pub use config::{HeightSummary, SummaryConfig, TargetTopology};
pub use contour::{ContourEstimator, KdeContourEstimator};
pub use error::{Result, SummaryError};
pub use io::{Burnin, NexusTreeSource, read_posterior_trees, read_target_tree, write_annotated_nexus};
pub use registry::CladeRegistry;
pub use selector::SummaryTreeSelector;
pub use snapshot::CladeCodec;
pub use source::{InMemoryTreeSource, PosteriorTreeSource};
pub use summary::summarize;
pub use tree::{MetaValue, TaxonSet, Tree};
