//! Clade frequency bookkeeping.
//!
//! # Overview
//! A [`CladeRegistry`] maps canonical clade bitsets to [`Clade`] counters. It is
//! filled by one streaming pass, frozen with
//! [`CladeRegistry::calculate_credibilities`], and then only queried.
//!
//! A registry belongs to exactly one pass. Reusing the registry that counted
//! the posterior for an annotation pass would count every tree twice; build a
//! fresh one instead.
//!
//! # Root handling
//! - Tree with a trunk (root with a single child): the root is never stored;
//!   its support is the constant 1.0 and its samples go to a separate list.
//! - Otherwise the root is an ordinary clade.

use crate::bitset::Bitset;
use crate::error::{Result, SummaryError};
use crate::snapshot::{CladeCodec, CladeSnapshot};
use crate::tree::{MetaValue, NodeId, Tree};
use std::collections::HashMap;

/// Attribute values of one node occurrence, aligned with the attribute name list.
pub type AttributeSample = Vec<Option<MetaValue>>;

#[derive(Clone, Debug)]
pub struct Clade {
    pub bits: Bitset,
    pub count: usize,
    /// `count / total_trees`; meaningful only after credibilities are calculated.
    pub credibility: f64,
    pub attribute_samples: Vec<AttributeSample>,
}

impl Clade {
    fn new(bits: Bitset) -> Self {
        Clade { bits, count: 0, credibility: 0.0, attribute_samples: Vec::new() }
    }
}

#[derive(Clone, Debug)]
pub struct CladeRegistry {
    codec: CladeCodec,
    clades: HashMap<Bitset, Clade>,
    has_trunk: bool,
    root_attribute_samples: Vec<AttributeSample>,
}

impl CladeRegistry {
    pub fn new(codec: CladeCodec, has_trunk: bool) -> Self {
        CladeRegistry {
            codec,
            clades: HashMap::new(),
            has_trunk,
            root_attribute_samples: Vec::new(),
        }
    }

    pub fn codec(&self) -> &CladeCodec {
        &self.codec
    }

    pub fn has_trunk(&self) -> bool {
        self.has_trunk
    }

    pub fn len(&self) -> usize {
        self.clades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clades.is_empty()
    }

    pub fn get(&self, bits: &Bitset) -> Option<&Clade> {
        self.clades.get(bits)
    }

    pub fn credibility(&self, bits: &Bitset) -> Option<f64> {
        self.clades.get(bits).map(|c| c.credibility)
    }

    pub fn clades(&self) -> impl Iterator<Item = &Clade> + '_ {
        self.clades.values()
    }

    /// Samples collected for a trunk root (empty when the tree has no trunk).
    pub fn root_attribute_samples(&self) -> &[AttributeSample] {
        &self.root_attribute_samples
    }

    /// Whether node `id` takes part in clade bookkeeping.
    fn is_registered(&self, tree: &Tree, id: NodeId, include_tips: bool) -> bool {
        if tree.is_leaf(id) {
            return include_tips;
        }
        !(self.has_trunk && tree.is_root(id))
    }

    fn registered_clades(&self, tree: &Tree, include_tips: bool) -> Result<(CladeSnapshot, Vec<NodeId>)> {
        let snapshot = self.codec.encode(tree)?;
        let ids = snapshot
            .postorder
            .iter()
            .copied()
            .filter(|&id| self.is_registered(tree, id, include_tips))
            .collect();
        Ok((snapshot, ids))
    }

    /// Counts every clade of `tree`, creating entries on first sight.
    pub fn add(&mut self, tree: &Tree, include_tips: bool) -> Result<()> {
        let (snapshot, ids) = self.registered_clades(tree, include_tips)?;
        for id in ids {
            let bits = snapshot.bits(id);
            match self.clades.get_mut(bits) {
                Some(clade) => clade.count += 1,
                None => {
                    let mut clade = Clade::new(bits.clone());
                    clade.count = 1;
                    self.clades.insert(bits.clone(), clade);
                }
            }
        }
        Ok(())
    }

    /// Undoes [`CladeRegistry::add`] for the same tree.
    ///
    /// Entries stay in the map with their decremented count, so a target tree
    /// registered and removed again leaves empty but present clades behind.
    pub fn remove(&mut self, tree: &Tree, include_tips: bool) -> Result<()> {
        let (snapshot, ids) = self.registered_clades(tree, include_tips)?;
        for id in ids {
            match self.clades.get_mut(snapshot.bits(id)) {
                Some(clade) => clade.count = clade.count.saturating_sub(1),
                None => tracing::debug!(clade = %snapshot.bits(id), "removing a clade that was never added"),
            }
        }
        Ok(())
    }

    /// Freezes the registry: `credibility = count / total_trees` for every clade.
    ///
    /// # Errors
    /// [`SummaryError::InsufficientTrees`] when `total_trees` is zero.
    pub fn calculate_credibilities(&mut self, total_trees: usize) -> Result<()> {
        if total_trees == 0 {
            return Err(SummaryError::InsufficientTrees(
                "cannot compute clade credibilities from zero trees".to_string(),
            ));
        }
        for clade in self.clades.values_mut() {
            clade.credibility = clade.count as f64 / total_trees as f64;
        }
        Ok(())
    }

    /// Scores `tree` against the frozen registry (tips excluded).
    ///
    /// - `use_sum_credibility`: `Σ credibility` (absent clades add 0)
    /// - otherwise: `Σ ln(credibility)` (absent clades give `-∞`)
    pub fn score_tree(&self, tree: &Tree, use_sum_credibility: bool) -> Result<f64> {
        let (snapshot, ids) = self.registered_clades(tree, false)?;
        let mut score = 0.0;
        for id in ids {
            let credibility = self.credibility(snapshot.bits(id)).unwrap_or(0.0);
            score += if use_sum_credibility { credibility } else { credibility.ln() };
        }
        Ok(score)
    }

    /// Annotation pass: for every node of `tree` whose clade is already known,
    /// count it and append the node's attribute sample.
    ///
    /// Clades not present in the registry are skipped; a trunk root always
    /// feeds the separate root sample list.
    pub fn collect_attributes<F>(&mut self, tree: &Tree, mut sample: F) -> Result<()>
    where
        F: FnMut(&Tree, NodeId) -> Result<AttributeSample>,
    {
        let snapshot = self.codec.encode(tree)?;
        for &id in &snapshot.postorder {
            if self.has_trunk && tree.is_root(id) {
                self.root_attribute_samples.push(sample(tree, id)?);
                continue;
            }
            if let Some(clade) = self.clades.get_mut(snapshot.bits(id)) {
                clade.count += 1;
                clade.attribute_samples.push(sample(tree, id)?);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::parse_newick;
    use crate::tree::TaxonSet;

    fn abc() -> TaxonSet {
        TaxonSet::sorted(vec!["A".into(), "B".into(), "C".into()])
    }

    fn clade(taxa: &[usize]) -> Bitset {
        let mut bits = Bitset::zeros(1);
        for &t in taxa {
            bits.set_taxon(t);
        }
        bits
    }

    fn scenario_a() -> Vec<Tree> {
        [
            "((A:1,B:1):1,C:2);",
            "((A:1.2,B:1.2):1,C:2.2);",
            "((B:0.8,A:0.8):1,C:1.8);",
            "((A:1,C:1):1,B:2);",
        ]
        .iter()
        .map(|s| parse_newick(s, &abc()).unwrap())
        .collect()
    }

    #[test]
    fn test_credibilities_scenario_a() {
        let mut registry = CladeRegistry::new(CladeCodec::new(3, true), false);
        for tree in scenario_a() {
            registry.add(&tree, false).unwrap();
        }
        registry.calculate_credibilities(4).unwrap();

        assert_eq!(registry.credibility(&clade(&[0, 1])), Some(0.75));
        assert_eq!(registry.credibility(&clade(&[0, 2])), Some(0.25));
        assert_eq!(registry.credibility(&clade(&[0, 1, 2])), Some(1.0));
        // tips excluded
        assert_eq!(registry.get(&clade(&[0])).map(|c| c.count), None);
        assert_eq!(registry.len(), 3);

        for c in registry.clades() {
            assert!((0.0..=1.0).contains(&c.credibility));
            assert_eq!(c.credibility, c.count as f64 / 4.0);
        }
    }

    #[test]
    fn test_zero_trees_is_an_error() {
        let mut registry = CladeRegistry::new(CladeCodec::new(3, true), false);
        assert!(matches!(
            registry.calculate_credibilities(0),
            Err(SummaryError::InsufficientTrees(_))
        ));
    }

    #[test]
    fn test_add_then_remove_restores_counts() {
        let trees = scenario_a();
        let mut registry = CladeRegistry::new(CladeCodec::new(3, true), false);
        registry.add(&trees[0], false).unwrap();
        registry.add(&trees[3], false).unwrap();
        let before: Vec<(Bitset, usize)> = {
            let mut v: Vec<_> = registry.clades().map(|c| (c.bits.clone(), c.count)).collect();
            v.sort();
            v
        };

        registry.add(&trees[1], true).unwrap();
        registry.remove(&trees[1], true).unwrap();

        for (bits, count) in before {
            assert_eq!(registry.get(&bits).unwrap().count, count);
        }
        // tip clades materialized by the add stay present with zero count
        assert_eq!(registry.get(&clade(&[0])).unwrap().count, 0);
    }

    #[test]
    fn test_score_tree() {
        let trees = scenario_a();
        let mut registry = CladeRegistry::new(CladeCodec::new(3, true), false);
        for tree in &trees {
            registry.add(tree, false).unwrap();
        }
        registry.calculate_credibilities(4).unwrap();

        let log_ab = registry.score_tree(&trees[0], false).unwrap();
        let log_ac = registry.score_tree(&trees[3], false).unwrap();
        assert!((log_ab - 0.75f64.ln()).abs() < 1e-12);
        assert!((log_ac - 0.25f64.ln()).abs() < 1e-12);

        let sum_ab = registry.score_tree(&trees[0], true).unwrap();
        assert!((sum_ab - 1.75).abs() < 1e-12);

        // a topology never sampled
        let unseen = parse_newick("((B:1,C:1):1,A:2);", &abc()).unwrap();
        assert_eq!(registry.score_tree(&unseen, false).unwrap(), f64::NEG_INFINITY);
        assert!((registry.score_tree(&unseen, true).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_trunk_root_is_never_a_key() {
        // root with a single child lineage
        let trunk = parse_newick("(((A:1,B:1):1,C:2):1);", &abc()).unwrap();
        assert!(trunk.has_trunk());

        let mut registry = CladeRegistry::new(CladeCodec::new(3, true), true);
        registry.add(&trunk, true).unwrap();
        // {A,B}, {A,B,C} below the trunk, and three tips
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.get(&clade(&[0, 1, 2])).unwrap().count, 1);

        registry
            .collect_attributes(&trunk, |t, id| Ok(vec![Some(MetaValue::Number(t.height(id)))]))
            .unwrap();
        assert_eq!(registry.root_attribute_samples().len(), 1);
        assert_eq!(registry.root_attribute_samples()[0][0], Some(MetaValue::Number(3.0)));
        assert_eq!(registry.get(&clade(&[0, 1, 2])).unwrap().count, 2);
    }

    #[test]
    fn test_collect_only_known_clades() {
        let trees = scenario_a();
        let mut registry = CladeRegistry::new(CladeCodec::new(3, true), false);
        registry.add(&trees[0], false).unwrap();
        registry.remove(&trees[0], false).unwrap();

        for tree in &trees {
            registry
                .collect_attributes(tree, |t, id| Ok(vec![Some(MetaValue::Number(t.height(id)))]))
                .unwrap();
        }
        let ab = registry.get(&clade(&[0, 1])).unwrap();
        assert_eq!(ab.count, 3);
        let heights: Vec<f64> = ab
            .attribute_samples
            .iter()
            .filter_map(|s| s[0].as_ref().and_then(MetaValue::as_number))
            .collect();
        assert_eq!(heights.len(), 3);
        for (h, expected) in heights.iter().zip([1.0, 1.2, 0.8]) {
            assert!((h - expected).abs() < 1e-9);
        }
        assert!(registry.get(&clade(&[0, 2])).is_none());
    }
}
