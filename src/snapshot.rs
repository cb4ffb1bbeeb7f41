//! Canonical clade bitsets for every node of a tree.
//!
//! # Overview
//! A [`CladeSnapshot`] records, for each node, the bitset of the taxa below it.
//! Every pass over the posterior (registration, scoring, annotation, common
//! ancestor heights) encodes trees through the same [`CladeCodec`]; a second
//! encoding would silently break all lookups between passes.
//!
//! # Encoding
//! - **Leaf**: bit `2*taxon` set
//! - **Internal node**: OR of the children, odd bits cleared, then bit
//!   `2*taxon+1` set when the node is the attachment point of sampled
//!   ancestor `taxon` (and sampled-ancestor processing is on)
//!
//! ```text
//!            root            {A,B,C}    0b010101
//!           /    \
//!       fake      C          {A*,B}     0b000111
//!      /    \
//!     A      B               A is a sampled ancestor on a zero-length branch
//! ```
//!
//! # CRITICAL: taxon indices, not node ids
//! Node ids are arena positions and differ between trees. Leaves are keyed by
//! their taxon index, which the [`TaxonSet`](crate::tree::TaxonSet) assigns
//! once for the whole posterior.

use crate::bitset::Bitset;
use crate::error::{Result, SummaryError};
use crate::tree::{NodeId, Tree};

/// Encodes nodes of trees over a fixed taxon set.
#[derive(Clone, Copy, Debug)]
pub struct CladeCodec {
    taxon_count: usize,
    words: usize,
    process_sampled_ancestors: bool,
}

impl CladeCodec {
    pub fn new(taxon_count: usize, process_sampled_ancestors: bool) -> Self {
        CladeCodec {
            taxon_count,
            words: Bitset::words_for_taxa(taxon_count),
            process_sampled_ancestors,
        }
    }

    pub fn taxon_count(&self) -> usize {
        self.taxon_count
    }

    pub fn processes_sampled_ancestors(&self) -> bool {
        self.process_sampled_ancestors
    }

    /// Encode every node of `tree`.
    ///
    /// # Errors
    /// Returns [`SummaryError::TaxonCountMismatch`] if the tree was built over a
    /// different taxon set, or [`SummaryError::InvalidTree`] for an unmapped leaf.
    pub fn encode(&self, tree: &Tree) -> Result<CladeSnapshot> {
        if tree.taxon_count() != self.taxon_count {
            return Err(SummaryError::TaxonCountMismatch {
                expected: self.taxon_count,
                found: tree.taxon_count(),
            });
        }

        let postorder = tree.postorder();
        let mut bits = vec![Bitset::zeros(self.words); tree.len()];

        // Children are visited before parents, so each union only reads
        // finished child entries.
        for &id in &postorder {
            let node = tree.node(id);
            if node.children.is_empty() {
                let taxon = node.taxon.ok_or_else(|| {
                    SummaryError::InvalidTree(format!("leaf {id} has no taxon index"))
                })?;
                bits[id].set_taxon(taxon);
                continue;
            }

            let mut bitset = Bitset::zeros(self.words);
            for &child in &node.children {
                bitset.or_assign(&bits[child]);
            }
            bitset.clear_odd_bits();

            if self.process_sampled_ancestors {
                if let Some(da) = tree.direct_ancestor_child(id) {
                    if let Some(taxon) = tree.node(da).taxon {
                        bitset.set_sampled_ancestor(taxon);
                    }
                }
            }
            bits[id] = bitset;
        }

        Ok(CladeSnapshot { bits, postorder })
    }
}

/// The canonical bitset of every node of one tree.
#[derive(Debug, Clone)]
pub struct CladeSnapshot {
    /// Bitset per node, indexed by [`NodeId`].
    pub bits: Vec<Bitset>,

    /// Node ids, children before parents.
    pub postorder: Vec<NodeId>,
}

impl CladeSnapshot {
    pub fn bits(&self, id: NodeId) -> &Bitset {
        &self.bits[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::parse_newick;
    use crate::tree::TaxonSet;

    fn taxa() -> TaxonSet {
        TaxonSet::sorted(vec!["A".into(), "B".into(), "C".into(), "D".into()])
    }

    #[test]
    fn test_internal_node_is_union_of_children() {
        let tree = parse_newick("((A:1,B:1):1,(C:1,D:1):1);", &taxa()).unwrap();
        let snap = CladeCodec::new(4, true).encode(&tree).unwrap();

        let root = tree.root();
        assert_eq!(snap.bits(root).0[0], 0b01010101);
        let ab = tree.node(root).children[0];
        assert_eq!(snap.bits(ab).0[0], 0b0101);
        let cd = tree.node(root).children[1];
        assert_eq!(snap.bits(cd).0[0], 0b01010000);
    }

    /// Children in a different order must produce the same keys.
    #[test]
    fn test_child_order_does_not_matter() {
        let t1 = parse_newick("((A:1,B:1):1,(C:1,D:1):1);", &taxa()).unwrap();
        let t2 = parse_newick("((D:1,C:1):1,(B:1,A:1):1);", &taxa()).unwrap();
        let codec = CladeCodec::new(4, true);

        let mut k1: Vec<Bitset> = codec.encode(&t1).unwrap().bits;
        let mut k2: Vec<Bitset> = codec.encode(&t2).unwrap().bits;
        k1.sort();
        k2.sort();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_sampled_ancestor_marker_bit() {
        // A sits on a zero-length branch below the fake node.
        let tree = parse_newick("((A:0,B:1):1,C:2);", &TaxonSet::sorted(vec!["A".into(), "B".into(), "C".into()])).unwrap();
        let fake = tree.node(tree.root()).children[0];
        assert!(tree.is_fake(fake));

        let with_sa = CladeCodec::new(3, true).encode(&tree).unwrap();
        assert_eq!(with_sa.bits(fake).0[0], 0b000111);
        // The marker never leaks into the parent.
        assert_eq!(with_sa.bits(tree.root()).0[0], 0b010101);

        let without_sa = CladeCodec::new(3, false).encode(&tree).unwrap();
        assert_eq!(without_sa.bits(fake).0[0], 0b000101);
    }

    #[test]
    fn test_taxon_count_mismatch() {
        let tree = parse_newick("((A:1,B:1):1,(C:1,D:1):1);", &taxa()).unwrap();
        let err = CladeCodec::new(5, true).encode(&tree).unwrap_err();
        assert!(matches!(err, SummaryError::TaxonCountMismatch { expected: 5, found: 4 }));
    }
}
