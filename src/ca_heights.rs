//! Common-ancestor node heights (Heled & Bouckaert 2013).
//!
//! The CA height of a target clade is the height of the most recent common
//! ancestor of its taxa in each posterior tree, averaged over the posterior.
//! Unlike clade-conditioned heights this uses every tree, including those
//! where the clade itself is absent.
//!
//! Within one posterior tree the internal nodes are visited parents before
//! children; the last node whose clade contains the target clade is its
//! MRCA. A trunk root takes the posterior root height.

use crate::annotate::HEIGHT;
use crate::config::SummaryConfig;
use crate::error::{Result, SummaryError};
use crate::snapshot::CladeCodec;
use crate::source::PosteriorTreeSource;
use crate::stats;
use crate::tree::{MetaValue, NodeId, Tree};
use std::time::Instant;

pub struct CaHeightEstimator<'a> {
    config: &'a SummaryConfig,
}

impl<'a> CaHeightEstimator<'a> {
    pub fn new(config: &'a SummaryConfig) -> Self {
        CaHeightEstimator { config }
    }

    /// Sets every internal node height of `target` to its mean CA height.
    ///
    /// Returns the number of posterior trees used.
    pub fn estimate(&self, target: &mut Tree, source: &mut dyn PosteriorTreeSource) -> Result<usize> {
        let t0 = Instant::now();
        let codec = CladeCodec::new(target.taxon_count(), self.config.process_sampled_ancestors);
        let snapshot = codec.encode(target)?;
        let trunk_root = target.has_trunk().then(|| target.root());

        let slots: Vec<NodeId> = snapshot
            .postorder
            .iter()
            .copied()
            .filter(|&id| !target.is_leaf(id))
            .collect();
        let mut heights: Vec<Vec<f64>> = vec![Vec::new(); slots.len()];

        source.reset()?;
        let mut total = 0usize;
        while let Some(tree) = source.next_tree()? {
            let posterior = codec.encode(&tree)?;
            let internal: Vec<NodeId> = tree.preorder().into_iter().filter(|&id| !tree.is_leaf(id)).collect();
            for (slot, &id) in slots.iter().enumerate() {
                let height = if Some(id) == trunk_root {
                    tree.height(tree.root())
                } else {
                    let clade = snapshot.bits(id);
                    let mrca = internal
                        .iter()
                        .rev()
                        .find(|&&j| posterior.bits(j).is_superset_of(clade))
                        .copied()
                        .unwrap_or(tree.root());
                    tree.height(mrca)
                };
                heights[slot].push(height);
            }
            total += 1;
        }
        if total == 0 {
            return Err(SummaryError::InsufficientTrees(
                "no posterior trees to estimate common-ancestor heights from".to_string(),
            ));
        }

        let hpd_key = format!("{HEIGHT}_{}", self.config.hpd_label());
        let median_key = format!("{HEIGHT}_median");
        let range_key = format!("{HEIGHT}_range");
        for (&id, values) in slots.iter().zip(&heights) {
            let mean = stats::mean(values);
            target.set_height(id, mean);
            let metadata = &mut target.node_mut(id).metadata;
            metadata.insert(HEIGHT.to_string(), MetaValue::Number(mean));
            if stats::varies(values) {
                let hpd = stats::hpd_interval(self.config.hpd_mass, values);
                let (lo, hi) = stats::range(values);
                metadata.insert(median_key.clone(), MetaValue::Number(stats::median(values)));
                metadata.insert(hpd_key.clone(), MetaValue::numbers(&[hpd.lower, hpd.upper]));
                metadata.insert(range_key.clone(), MetaValue::numbers(&[lo, hi]));
            } else {
                // clade-conditioned statistics from the annotation pass no longer apply
                metadata.remove(&median_key);
                metadata.remove(&hpd_key);
                metadata.remove(&range_key);
            }
        }

        tracing::info!(
            trees = total,
            nodes = slots.len(),
            secs = t0.elapsed().as_secs_f64(),
            "common-ancestor heights estimated"
        );
        Ok(total)
    }
}
