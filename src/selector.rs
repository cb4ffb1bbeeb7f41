//! Choosing the summary topology from the posterior.
//!
//! # State machine
//! ```text
//! AwaitingFirstPass --build_registry--> Scoring --score_trees--> Selected
//! ```
//! 1. **First pass**: every post-burn-in tree is counted into a fresh
//!    [`CladeRegistry`] (tips excluded), then credibilities are frozen.
//! 2. **Second pass**: every tree is scored against the registry; only the
//!    best tree seen so far is kept. The first tree with the maximum score
//!    wins ties.
//!
//! A user-supplied target tree bypasses this module entirely.

use crate::config::TargetTopology;
use crate::error::{Result, SummaryError};
use crate::registry::CladeRegistry;
use crate::snapshot::CladeCodec;
use crate::source::PosteriorTreeSource;
use crate::tree::Tree;
use rayon::prelude::*;
use std::time::Instant;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SelectorState {
    AwaitingFirstPass,
    Scoring,
    Selected,
}

/// The winning posterior tree.
#[derive(Clone, Debug)]
pub struct SelectedTree {
    pub tree: Tree,
    pub score: f64,
    /// Position of the tree within the post-burn-in posterior.
    pub index: usize,
}

pub struct SummaryTreeSelector {
    state: SelectorState,
    use_sum_credibility: bool,
    process_sampled_ancestors: bool,
    registry: Option<CladeRegistry>,
    total_trees: usize,
    best: Option<SelectedTree>,
}

impl SummaryTreeSelector {
    pub fn new(topology: TargetTopology, process_sampled_ancestors: bool) -> Self {
        SummaryTreeSelector {
            state: SelectorState::AwaitingFirstPass,
            use_sum_credibility: topology.uses_sum_credibility(),
            process_sampled_ancestors,
            registry: None,
            total_trees: 0,
            best: None,
        }
    }

    /// Runs both passes and returns the selected tree.
    pub fn select(
        source: &mut dyn PosteriorTreeSource,
        topology: TargetTopology,
        process_sampled_ancestors: bool,
    ) -> Result<SelectedTree> {
        let mut selector = SummaryTreeSelector::new(topology, process_sampled_ancestors);
        selector.build_registry(source)?;
        selector.score_trees(source)?;
        selector.into_selected()
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    /// The frozen first-pass registry, once built.
    pub fn registry(&self) -> Option<&CladeRegistry> {
        self.registry.as_ref()
    }

    pub fn total_trees(&self) -> usize {
        self.total_trees
    }

    fn expect_state(&self, expected: SelectorState) -> Result<()> {
        if self.state != expected {
            return Err(SummaryError::Configuration(format!(
                "summary tree selector is {:?}, expected {:?}",
                self.state, expected
            )));
        }
        Ok(())
    }

    /// First pass: count clades over the whole posterior and freeze credibilities.
    pub fn build_registry(&mut self, source: &mut dyn PosteriorTreeSource) -> Result<()> {
        self.expect_state(SelectorState::AwaitingFirstPass)?;
        let t0 = Instant::now();
        source.reset()?;

        let mut registry: Option<CladeRegistry> = None;
        let mut total = 0usize;
        while let Some(tree) = source.next_tree()? {
            let registry = registry.get_or_insert_with(|| {
                let codec = CladeCodec::new(tree.taxon_count(), self.process_sampled_ancestors);
                CladeRegistry::new(codec, tree.has_trunk())
            });
            registry.add(&tree, false)?;
            total += 1;
        }

        let Some(mut registry) = registry else {
            return Err(SummaryError::InsufficientTrees(
                "no trees left after burn-in to build the clade registry".to_string(),
            ));
        };
        registry.calculate_credibilities(total)?;

        tracing::info!(
            trees = total,
            clades = registry.len(),
            secs = t0.elapsed().as_secs_f64(),
            "clade registry built"
        );
        self.registry = Some(registry);
        self.total_trees = total;
        self.state = SelectorState::Scoring;
        Ok(())
    }

    /// Second pass: score every tree and keep the best one.
    ///
    /// A materialized posterior is scored in parallel; the first maximum in
    /// posterior order still wins.
    pub fn score_trees(&mut self, source: &mut dyn PosteriorTreeSource) -> Result<()> {
        self.expect_state(SelectorState::Scoring)?;
        let t0 = Instant::now();
        let Some(registry) = self.registry.as_ref() else {
            return Err(SummaryError::Configuration("clade registry missing".to_string()));
        };
        let use_sum = self.use_sum_credibility;

        let mut best: Option<SelectedTree> = None;
        if let Some(trees) = source.as_slice() {
            let scores = trees
                .par_iter()
                .map(|tree| registry.score_tree(tree, use_sum))
                .collect::<Result<Vec<f64>>>()?;
            let mut best_index: Option<usize> = None;
            for (index, &score) in scores.iter().enumerate() {
                if best_index.is_none_or(|b| score > scores[b]) {
                    best_index = Some(index);
                }
            }
            best = best_index.map(|index| SelectedTree {
                tree: trees[index].clone(),
                score: scores[index],
                index,
            });
        } else {
            source.reset()?;
            let mut index = 0usize;
            while let Some(tree) = source.next_tree()? {
                let score = registry.score_tree(&tree, use_sum)?;
                if best.as_ref().is_none_or(|b| score > b.score) {
                    best = Some(SelectedTree { tree: tree.into_owned(), score, index });
                }
                index += 1;
            }
        }

        let Some(best) = best else {
            return Err(SummaryError::InsufficientTrees(
                "no trees left after burn-in to score".to_string(),
            ));
        };
        if best.score == f64::NEG_INFINITY {
            tracing::warn!("every tree contains a clade absent from the registry");
        }
        tracing::info!(
            index = best.index,
            score = best.score,
            secs = t0.elapsed().as_secs_f64(),
            "summary tree selected"
        );
        self.best = Some(best);
        self.state = SelectorState::Selected;
        Ok(())
    }

    pub fn into_selected(self) -> Result<SelectedTree> {
        self.expect_state(SelectorState::Selected)?;
        self.best
            .ok_or_else(|| SummaryError::InsufficientTrees("no tree was selected".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::{parse_newick, to_newick};
    use crate::source::InMemoryTreeSource;
    use crate::tree::TaxonSet;

    fn abc() -> TaxonSet {
        TaxonSet::sorted(vec!["A".into(), "B".into(), "C".into()])
    }

    fn trees(newicks: &[&str]) -> Vec<Tree> {
        newicks.iter().map(|s| parse_newick(s, &abc()).unwrap()).collect()
    }

    /// Forces the streaming code path.
    struct Streaming(InMemoryTreeSource);

    impl PosteriorTreeSource for Streaming {
        fn reset(&mut self) -> Result<()> {
            self.0.reset()
        }
        fn next_tree(&mut self) -> Result<Option<std::borrow::Cow<'_, Tree>>> {
            Ok(self.0.next_tree()?.map(|t| std::borrow::Cow::Owned(t.into_owned())))
        }
        fn approx_total_trees(&self) -> usize {
            self.0.approx_total_trees()
        }
    }

    #[test]
    fn test_mcc_scenario_a() {
        let posterior = trees(&[
            "((A:1,C:1):1,B:2);",
            "((A:1,B:1):1,C:2);",
            "((A:1.2,B:1.2):1,C:2.2);",
            "((B:0.8,A:0.8):1,C:1.8);",
        ]);
        for mut source in [
            Box::new(InMemoryTreeSource::new(posterior.clone())) as Box<dyn PosteriorTreeSource>,
            Box::new(Streaming(InMemoryTreeSource::new(posterior.clone()))),
        ] {
            let selected = SummaryTreeSelector::select(
                source.as_mut(),
                TargetTopology::MaxCladeCredibility,
                true,
            )
            .unwrap();
            // first ((A,B),C) wins the tie among three equal scores
            assert_eq!(selected.index, 1);
            assert_eq!(to_newick(&selected.tree), "((A:1,B:1):1,C:2);");
            assert!((selected.score - 0.75f64.ln()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_state_machine_order() {
        let mut source = InMemoryTreeSource::new(trees(&["((A:1,B:1):1,C:2);"]));
        let mut selector = SummaryTreeSelector::new(TargetTopology::MaxSumCladeCredibility, true);
        assert_eq!(selector.state(), SelectorState::AwaitingFirstPass);
        assert!(selector.score_trees(&mut source).is_err());

        selector.build_registry(&mut source).unwrap();
        assert_eq!(selector.state(), SelectorState::Scoring);
        assert_eq!(selector.total_trees(), 1);
        assert_eq!(selector.registry().unwrap().len(), 2);

        selector.score_trees(&mut source).unwrap();
        assert_eq!(selector.state(), SelectorState::Selected);
        let selected = selector.into_selected().unwrap();
        assert!((selected.score - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_posterior_is_insufficient() {
        let mut source = InMemoryTreeSource::new(Vec::new());
        let err = SummaryTreeSelector::select(&mut source, TargetTopology::MaxCladeCredibility, true)
            .unwrap_err();
        assert!(matches!(err, SummaryError::InsufficientTrees(_)));
    }
}
