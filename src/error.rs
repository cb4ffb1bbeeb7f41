//! Crate-level error type.
//!
//! Every failure surfaces synchronously from the call that detects it.
//! Nothing here is retried: the summarization is deterministic, so a
//! failed pass aborts the whole run.

/// Errors raised while reading posterior trees or summarizing them.
#[derive(thiserror::Error, Debug)]
pub enum SummaryError {
    /// Incompatible options, detected before any pass over the posterior.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The posterior yielded no usable trees (empty file or everything burned in).
    #[error("insufficient trees: {0}")]
    InsufficientTrees(String),

    /// A target-tree clade has no entry in the frozen registry.
    #[error("clade {clade} of target node {node} is missing from the clade registry; the target tree is incompatible with the posterior")]
    MissingClade { node: usize, clade: String },

    /// An attribute changed type after its first observation.
    #[error("attribute '{name}' was first seen as {expected} but a later sample is {found}")]
    AttributeTypeMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown taxon '{0}'")]
    UnknownTaxon(String),

    #[error("tree has {found} taxa but the taxon set has {expected}")]
    TaxonCountMismatch { expected: usize, found: usize },

    #[error("invalid tree: {0}")]
    InvalidTree(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SummaryError>;
