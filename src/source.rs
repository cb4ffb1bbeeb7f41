//! Rewindable streams of posterior trees.
//!
//! The summary needs two to four full passes over the posterior. A
//! [`PosteriorTreeSource`] is a cursor that can be rewound with `reset`; it may
//! hold every tree in memory ([`InMemoryTreeSource`]) or re-read a file on each
//! pass ([`crate::io::NexusTreeSource`]).

use crate::error::Result;
use crate::tree::Tree;
use std::borrow::Cow;

pub trait PosteriorTreeSource {
    /// Rewinds to the first post-burn-in tree.
    fn reset(&mut self) -> Result<()>;

    /// The next tree, or `None` once the pass is complete.
    ///
    /// In-memory sources lend their trees; streaming sources hand out owned ones.
    fn next_tree(&mut self) -> Result<Option<Cow<'_, Tree>>>;

    /// Expected number of trees per pass, for progress reporting.
    fn approx_total_trees(&self) -> usize;

    /// The materialized trees, when the source keeps them all in memory.
    fn as_slice(&self) -> Option<&[Tree]> {
        None
    }
}

/// A fully materialized posterior.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTreeSource {
    trees: Vec<Tree>,
    cursor: usize,
}

impl InMemoryTreeSource {
    pub fn new(trees: Vec<Tree>) -> Self {
        InMemoryTreeSource { trees, cursor: 0 }
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }
}

impl PosteriorTreeSource for InMemoryTreeSource {
    fn reset(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next_tree(&mut self) -> Result<Option<Cow<'_, Tree>>> {
        let tree = self.trees.get(self.cursor);
        if tree.is_some() {
            self.cursor += 1;
        }
        Ok(tree.map(Cow::Borrowed))
    }

    fn approx_total_trees(&self) -> usize {
        self.trees.len()
    }

    fn as_slice(&self) -> Option<&[Tree]> {
        Some(&self.trees)
    }
}
