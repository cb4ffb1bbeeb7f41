//! Python binding layer for posterior tree summaries.
//!
//! Provides Python functions for building an annotated summary tree and
//! inspecting clade credibilities from BEAST/NEXUS tree files.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::config::{HeightSummary, SummaryConfig, TargetTopology};
use crate::contour::KdeContourEstimator;
use crate::error::SummaryError;
use crate::io::{Burnin, NexusTreeSource, format_nexus, read_posterior_trees, read_target_tree};
use crate::registry::CladeRegistry;
use crate::snapshot::CladeCodec;
use crate::source::{InMemoryTreeSource, PosteriorTreeSource};
use crate::summary::summarize;

fn to_py_err(e: SummaryError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Options shared with the command line, validated.
#[allow(clippy::too_many_arguments)]
fn summary_config(
    heights: &str,
    topology: &str,
    limit: f64,
    hpd: f64,
    hpd2d: f64,
    sampled_ancestors: bool,
    bivariate: bool,
    discrete_integers: bool,
) -> crate::error::Result<SummaryConfig> {
    let config = SummaryConfig {
        heights: heights.parse::<HeightSummary>()?,
        topology: topology.parse::<TargetTopology>()?,
        posterior_limit: limit,
        hpd_mass: hpd,
        hpd2d_mass: hpd2d,
        process_sampled_ancestors: sampled_ancestors,
        process_bivariate: bivariate,
        discrete_integers,
    };
    config.validate()?;
    Ok(config)
}

/// Build an annotated summary tree from a BEAST/NEXUS posterior tree file.
///
/// Args:
///     path: BEAST .trees file (optionally .gz)
///     burnin_trees: Number of trees to skip at the beginning (default: 0)
///     burnin_states: Keep trees with STATE above this value (default: 0)
///     burnin_percent: Percentage of trees to skip (default: 0)
///     heights: keep | mean | median | ca (default: mean)
///     topology: mcc | mscc (default: mcc)
///     target: Optional tree file to annotate instead of selecting one
///     limit: Posterior limit below which nodes are filtered (default: 0)
///     hpd: HPD mass (default: 0.95)
///     hpd2d: Bivariate HPD mass (default: 0.80)
///     sampled_ancestors: Process sampled ancestors (default: True)
///     bivariate: Compute bivariate HPD regions for two-component attributes (default: True)
///     discrete_integers: Summarize integer-valued attributes as discrete traits (default: False)
///     low_memory: Re-read the file on every pass instead of holding all trees (default: False)
///
/// Returns:
///     The annotated summary tree as a NEXUS document.
///
/// Raises:
///     ValueError: On unreadable input, incompatible options or an empty posterior
#[pyfunction]
#[pyo3(signature = (
    path,
    burnin_trees=0,
    burnin_states=0,
    burnin_percent=0.0,
    heights="mean",
    topology="mcc",
    target=None,
    limit=0.0,
    hpd=0.95,
    hpd2d=0.80,
    sampled_ancestors=true,
    bivariate=true,
    discrete_integers=false,
    low_memory=false,
))]
#[allow(clippy::too_many_arguments)]
fn summarize_trees(
    path: String,
    burnin_trees: usize,
    burnin_states: usize,
    burnin_percent: f64,
    heights: &str,
    topology: &str,
    target: Option<String>,
    limit: f64,
    hpd: f64,
    hpd2d: f64,
    sampled_ancestors: bool,
    bivariate: bool,
    discrete_integers: bool,
    low_memory: bool,
) -> PyResult<String> {
    let config = summary_config(
        heights,
        topology,
        limit,
        hpd,
        hpd2d,
        sampled_ancestors,
        bivariate,
        discrete_integers,
    )
    .map_err(to_py_err)?;
    let burnin = Burnin::from_options(burnin_trees, burnin_states, burnin_percent).map_err(to_py_err)?;

    let (taxa, mut source) = if low_memory {
        let source = NexusTreeSource::open(&path, burnin).map_err(to_py_err)?;
        (source.taxa().clone(), Box::new(source) as Box<dyn PosteriorTreeSource>)
    } else {
        let (taxa, trees) = read_posterior_trees(&path, burnin).map_err(to_py_err)?;
        (taxa, Box::new(InMemoryTreeSource::new(trees)) as Box<dyn PosteriorTreeSource>)
    };
    let target = target
        .map(|t| read_target_tree(t, &taxa))
        .transpose()
        .map_err(to_py_err)?;

    let tree = summarize(source.as_mut(), &config, target, &KdeContourEstimator::default()).map_err(to_py_err)?;
    Ok(format_nexus(&tree, &taxa))
}

/// Clade credibilities of a posterior, most credible first.
///
/// Args:
///     path: BEAST .trees file (optionally .gz)
///     burnin_trees: Number of trees to skip at the beginning (default: 0)
///     burnin_states: Keep trees with STATE above this value (default: 0)
///     burnin_percent: Percentage of trees to skip (default: 0)
///
/// Returns:
///     A list of (taxon_labels, credibility) tuples for every non-trivial clade.
#[pyfunction]
#[pyo3(signature = (path, burnin_trees=0, burnin_states=0, burnin_percent=0.0))]
fn clade_credibilities(
    path: String,
    burnin_trees: usize,
    burnin_states: usize,
    burnin_percent: f64,
) -> PyResult<Vec<(Vec<String>, f64)>> {
    let burnin = Burnin::from_options(burnin_trees, burnin_states, burnin_percent).map_err(to_py_err)?;
    let (taxa, trees) = read_posterior_trees(&path, burnin).map_err(to_py_err)?;
    let first = trees
        .first()
        .ok_or_else(|| PyValueError::new_err(format!("No trees found in file '{path}' after burnin removal")))?;

    let mut registry = CladeRegistry::new(CladeCodec::new(taxa.len(), true), first.has_trunk());
    for tree in &trees {
        registry.add(tree, false).map_err(to_py_err)?;
    }
    registry.calculate_credibilities(trees.len()).map_err(to_py_err)?;

    let mut clades: Vec<(Vec<String>, f64)> = registry
        .clades()
        .map(|c| {
            let labels = c.bits.taxa().filter_map(|t| taxa.label(t)).map(str::to_string).collect();
            (labels, c.credibility)
        })
        .collect();
    clades.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(clades)
}

/// Python module definition
#[pymodule]
fn rust_python_tree_annotator(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(summarize_trees, m)?)?;
    m.add_function(wrap_pyfunction!(clade_credibilities, m)?)?;
    Ok(())
}
