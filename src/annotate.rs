//! Per-node statistics of the summary tree.
//!
//! # Overview
//! The annotation pass pools, for every node of the target tree, the values
//! observed on posterior nodes with the same canonical clade, and writes
//! summary statistics into the target node's metadata.
//!
//! # Steps
//! 1. A fresh [`CladeRegistry`] is seeded with the target tree (tips
//!    included) and the target is removed again, leaving empty entries.
//! 2. One pass over the posterior appends every matching node's attribute
//!    sample to its clade; a trunk root feeds the separate root list.
//! 3. Credibilities are recomputed and each target node is reduced.
//!
//! # Output keys for an attribute `rate`
//! | kind     | keys                                                          |
//! |----------|---------------------------------------------------------------|
//! | scalar   | `rate`, `rate_median`, `rate_95%_HPD`, `rate_range`           |
//! | vector   | the scalar keys per component: `rate1`, `rate2`, ...          |
//! | 2-vector | plus `rate_80%HPD_modality`, `rate1_80%HPD_1`, `rate2_80%HPD_1` |
//! | discrete | `rate`, `rate.prob`, `rate.set`, `rate.set.prob`              |
//! | boolean  | `rate` (fraction true)                                        |
//!
//! Median, HPD and range are skipped for constant samples.

use crate::config::{HeightSummary, SummaryConfig};
use crate::contour::{ContourEstimator, Hpd2D};
use crate::error::{Result, SummaryError};
use crate::registry::{AttributeSample, CladeRegistry};
use crate::snapshot::CladeCodec;
use crate::source::PosteriorTreeSource;
use crate::stats::{self, FrequencyTable};
use crate::tree::{MetaValue, NodeId, Tree};
use std::collections::BTreeSet;
use std::time::Instant;

pub const HEIGHT: &str = "height";
pub const LENGTH: &str = "length";
pub const POSTERIOR: &str = "posterior";

/// Type of an attribute, fixed at its first observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeKind {
    Boolean,
    Scalar,
    /// Numeric array of a fixed length.
    Vector(usize),
    Discrete,
}

impl AttributeKind {
    fn infer(value: &MetaValue, discrete_integers: bool) -> AttributeKind {
        match value {
            MetaValue::Bool(_) => AttributeKind::Boolean,
            MetaValue::Number(x) if discrete_integers && x.fract() == 0.0 => AttributeKind::Discrete,
            MetaValue::Number(_) => AttributeKind::Scalar,
            MetaValue::Text(_) => AttributeKind::Discrete,
            MetaValue::Array(_) => match value.as_numeric_array() {
                Some(values) => AttributeKind::Vector(values.len()),
                None => AttributeKind::Discrete,
            },
        }
    }

    fn accepts(self, value: &MetaValue) -> bool {
        match self {
            AttributeKind::Boolean => matches!(value, MetaValue::Bool(_)),
            AttributeKind::Scalar => matches!(value, MetaValue::Number(_)),
            AttributeKind::Vector(n) => value.as_numeric_array().is_some_and(|v| v.len() == n),
            AttributeKind::Discrete => !matches!(value, MetaValue::Bool(_)),
        }
    }

    fn describe(self) -> String {
        match self {
            AttributeKind::Boolean => "boolean".to_string(),
            AttributeKind::Scalar => "number".to_string(),
            AttributeKind::Vector(n) => format!("numeric array of length {n}"),
            AttributeKind::Discrete => "discrete value".to_string(),
        }
    }
}

/// Attribute names and their resolved kinds.
#[derive(Clone, Debug)]
pub struct AttributeSchema {
    names: Vec<String>,
    kinds: Vec<Option<AttributeKind>>,
    discrete_integers: bool,
}

impl AttributeSchema {
    /// `height`, `length` and every metadata key found on `tree`.
    pub fn from_tree(tree: &Tree, discrete_integers: bool) -> Self {
        let keys: BTreeSet<&str> = tree
            .nodes()
            .iter()
            .flat_map(|n| n.metadata.keys().map(String::as_str))
            .filter(|k| *k != HEIGHT && *k != LENGTH)
            .collect();
        let mut names = vec![HEIGHT.to_string(), LENGTH.to_string()];
        names.extend(keys.into_iter().map(str::to_string));

        let mut kinds = vec![None; names.len()];
        kinds[0] = Some(AttributeKind::Scalar);
        kinds[1] = Some(AttributeKind::Scalar);
        AttributeSchema { names, kinds, discrete_integers }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn kind(&self, index: usize) -> Option<AttributeKind> {
        self.kinds[index]
    }

    fn observe(&mut self, index: usize, value: &MetaValue) -> Result<()> {
        match self.kinds[index] {
            None => {
                self.kinds[index] = Some(AttributeKind::infer(value, self.discrete_integers));
                Ok(())
            }
            Some(kind) if kind.accepts(value) => Ok(()),
            Some(kind) => Err(SummaryError::AttributeTypeMismatch {
                name: self.names[index].clone(),
                expected: kind.describe(),
                found: value.type_name().to_string(),
            }),
        }
    }

    /// Reads the attribute values of node `id`, validating their kinds.
    pub fn sample(&mut self, tree: &Tree, id: NodeId) -> Result<AttributeSample> {
        let mut sample = Vec::with_capacity(self.names.len());
        for index in 0..self.names.len() {
            let value = match index {
                0 => Some(MetaValue::Number(tree.height(id))),
                1 => tree.branch_length(id).map(MetaValue::Number),
                _ => tree.node(id).metadata.get(&self.names[index]).cloned(),
            };
            if let Some(value) = &value {
                self.observe(index, value)?;
            }
            sample.push(value);
        }
        Ok(sample)
    }
}

pub struct AttributeAnnotator<'a> {
    config: &'a SummaryConfig,
    contour: &'a dyn ContourEstimator,
}

impl<'a> AttributeAnnotator<'a> {
    pub fn new(config: &'a SummaryConfig, contour: &'a dyn ContourEstimator) -> Self {
        AttributeAnnotator { config, contour }
    }

    /// Annotates `target` in place from one pass over `source`.
    ///
    /// Returns the number of posterior trees pooled.
    ///
    /// # Errors
    /// - [`SummaryError::InsufficientTrees`] for an empty posterior
    /// - [`SummaryError::AttributeTypeMismatch`] when an attribute changes type
    /// - [`SummaryError::MissingClade`] when a target clade cannot be resolved
    pub fn annotate(&self, target: &mut Tree, source: &mut dyn PosteriorTreeSource) -> Result<usize> {
        let t0 = Instant::now();
        let codec = CladeCodec::new(target.taxon_count(), self.config.process_sampled_ancestors);
        let mut registry = CladeRegistry::new(codec, target.has_trunk());
        registry.add(target, true)?;
        registry.remove(target, true)?;

        source.reset()?;
        let mut schema: Option<AttributeSchema> = None;
        let mut total = 0usize;
        while let Some(tree) = source.next_tree()? {
            let schema = schema
                .get_or_insert_with(|| AttributeSchema::from_tree(&tree, self.config.discrete_integers));
            registry.collect_attributes(&tree, |t, id| schema.sample(t, id))?;
            total += 1;
        }
        let Some(schema) = schema else {
            return Err(SummaryError::InsufficientTrees(
                "no posterior trees to annotate the summary tree from".to_string(),
            ));
        };
        registry.calculate_credibilities(total)?;

        self.write_annotations(target, &registry, &schema)?;
        tracing::info!(
            trees = total,
            attributes = schema.names().len(),
            secs = t0.elapsed().as_secs_f64(),
            "summary tree annotated"
        );
        Ok(total)
    }

    fn write_annotations(&self, target: &mut Tree, registry: &CladeRegistry, schema: &AttributeSchema) -> Result<()> {
        let snapshot = registry.codec().encode(target)?;
        // Pairings are fixed before any height moves.
        let partners: Vec<Option<NodeId>> = (0..target.len())
            .map(|id| {
                if target.is_direct_ancestor(id) {
                    target.node(id).parent
                } else {
                    target.direct_ancestor_child(id)
                }
            })
            .collect();

        let mut unsampled = 0usize;
        for &id in &snapshot.postorder {
            let (samples, posterior) = if registry.has_trunk() && target.is_root(id) {
                (registry.root_attribute_samples(), Some(1.0))
            } else {
                let bits = snapshot.bits(id);
                let clade = registry.get(bits).ok_or_else(|| SummaryError::MissingClade {
                    node: id,
                    clade: bits.to_string(),
                })?;
                let posterior = (!target.is_leaf(id)).then_some(clade.credibility);
                (clade.attribute_samples.as_slice(), posterior)
            };

            if let Some(posterior) = posterior {
                if posterior == 0.0 {
                    unsampled += 1;
                }
                let node = target.node_mut(id);
                node.metadata.insert(POSTERIOR.to_string(), MetaValue::Number(posterior));
                node.filtered = posterior < self.config.posterior_limit;
            }
            for (index, name) in schema.names().iter().enumerate() {
                let Some(kind) = schema.kind(index) else { continue };
                let values: Vec<&MetaValue> = samples.iter().filter_map(|s| s[index].as_ref()).collect();
                if values.is_empty() {
                    continue;
                }
                self.annotate_attribute(target, id, partners[id], name, kind, &values);
            }
        }
        if unsampled > 0 {
            tracing::warn!(clades = unsampled, "target tree contains clades that never occur in the posterior");
        }
        Ok(())
    }

    fn annotate_attribute(
        &self,
        tree: &mut Tree,
        id: NodeId,
        partner: Option<NodeId>,
        name: &str,
        kind: AttributeKind,
        values: &[&MetaValue],
    ) {
        match kind {
            AttributeKind::Boolean => {
                let ones: Vec<f64> = values
                    .iter()
                    .map(|v| if matches!(v, MetaValue::Bool(true)) { 1.0 } else { 0.0 })
                    .collect();
                tree.node_mut(id).metadata.insert(name.to_string(), MetaValue::Number(stats::mean(&ones)));
            }
            AttributeKind::Scalar => {
                let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_number()).collect();
                let (mean, median) = self.annotate_continuous(tree, id, name, &numbers);
                if name == HEIGHT {
                    let height = match self.config.heights {
                        HeightSummary::Mean => Some(mean),
                        HeightSummary::Median => Some(median),
                        HeightSummary::Keep | HeightSummary::CommonAncestor => None,
                    };
                    if let Some(height) = height {
                        tree.set_height(id, height);
                        if let Some(partner) = partner {
                            tree.set_height(partner, height);
                        }
                    }
                }
            }
            AttributeKind::Vector(len) => {
                let arrays: Vec<Vec<f64>> = values.iter().filter_map(|v| v.as_numeric_array()).collect();
                let components: Vec<Vec<f64>> =
                    (0..len).map(|k| arrays.iter().map(|a| a[k]).collect()).collect();
                for (k, component) in components.iter().enumerate() {
                    self.annotate_continuous(tree, id, &format!("{name}{}", k + 1), component);
                }
                if len == 2 && self.config.process_bivariate {
                    self.annotate_bivariate(tree, id, name, &components[0], &components[1]);
                }
            }
            AttributeKind::Discrete => {
                let table = FrequencyTable::from_labels(values.iter().map(|v| v.to_string()));
                let metadata = &mut tree.node_mut(id).metadata;
                if let Some((mode, prob)) = table.mode() {
                    metadata.insert(name.to_string(), MetaValue::Text(mode));
                    metadata.insert(format!("{name}.prob"), MetaValue::Number(prob));
                }
                let (labels, probs) = table.probabilities();
                metadata.insert(format!("{name}.set"), MetaValue::texts(&labels));
                metadata.insert(format!("{name}.set.prob"), MetaValue::numbers(&probs));
            }
        }
    }

    /// Writes mean and, for varying samples, median, HPD and range.
    /// Returns `(mean, median)`.
    fn annotate_continuous(&self, tree: &mut Tree, id: NodeId, name: &str, values: &[f64]) -> (f64, f64) {
        let mean = stats::mean(values);
        let median = stats::median(values);
        let metadata = &mut tree.node_mut(id).metadata;
        metadata.insert(name.to_string(), MetaValue::Number(mean));
        if stats::varies(values) {
            let hpd = stats::hpd_interval(self.config.hpd_mass, values);
            let (lo, hi) = stats::range(values);
            metadata.insert(format!("{name}_median"), MetaValue::Number(median));
            metadata.insert(format!("{name}_{}", self.config.hpd_label()), MetaValue::numbers(&[hpd.lower, hpd.upper]));
            metadata.insert(format!("{name}_range"), MetaValue::numbers(&[lo, hi]));
        }
        (mean, median)
    }

    fn annotate_bivariate(&self, tree: &mut Tree, id: NodeId, name: &str, xs: &[f64], ys: &[f64]) {
        // A constant component leaves only the 1D interval of the other one.
        if !(stats::varies(xs) && stats::varies(ys)) {
            return;
        }
        let hpd = Hpd2D {
            mass: self.config.hpd2d_mass,
            paths: self.contour.compute_contours(xs, ys, self.config.hpd2d_mass),
        };
        if hpd.modality() > 1 {
            tracing::warn!(node = id, attribute = name, modality = hpd.modality(), "disjoint 2D HPD region");
        }
        let label = self.config.hpd2d_label();
        let metadata = &mut tree.node_mut(id).metadata;
        metadata.insert(format!("{name}_{label}_modality"), MetaValue::Number(hpd.modality() as f64));
        for (r, path) in hpd.paths.iter().enumerate() {
            metadata.insert(format!("{name}1_{label}_{}", r + 1), MetaValue::numbers(&path.xs));
            metadata.insert(format!("{name}2_{label}_{}", r + 1), MetaValue::numbers(&path.ys));
        }
    }
}
