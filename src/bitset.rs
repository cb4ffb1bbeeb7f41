//! Compact bitset keys for clades in phylogenetic trees.
//!
//! # Overview
//! A clade is identified by the set of taxa below its node. Each taxon owns
//! two bit positions:
//! - bit `2*i`: taxon `i` is a descendant of the clade
//! - bit `2*i + 1`: the clade's node is the zero-length attachment point of
//!   sampled ancestor `i` (a "fake" node)
//!
//! Odd bits are cleared everywhere except on the fake node itself, so two
//! clades with the same taxa but different marker bits are distinct keys.
//!
//! # Example
//! For a tree with taxa [A, B, C] mapped to indices [0, 1, 2]:
//! - Clade {A, C} → bitset `0b010001` (bits 0 and 4 set)
//! - Clade {A, B} where A is a sampled ancestor → `0b000111` (bits 0, 1, 2)

use std::fmt;

/// Mask selecting the descendant (even) bits of a word.
const EVEN_BITS: u64 = 0x5555_5555_5555_5555;

/// A fixed-width bitset holding `2 * taxon_count` bits.
///
/// Internally stores bits in `Vec<u64>` words to support arbitrarily large trees.
/// Equality and hashing cover the full word vector, so clades never collide
/// through a derived summary.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// Creates a new bitset with all bits set to 0.
    ///
    /// # Parameters
    /// - `words`: Number of u64 words needed. Use [`Bitset::words_for_taxa`].
    ///
    /// # Example
    /// ```
    /// # use rust_python_tree_annotator::bitset::Bitset;
    /// // 40 taxa need 80 bits, i.e. 2 words
    /// let bs = Bitset::zeros(Bitset::words_for_taxa(40));
    /// assert_eq!(bs.0.len(), 2);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Number of words needed for `taxon_count` taxa (two bits per taxon).
    pub fn words_for_taxa(taxon_count: usize) -> usize {
        (2 * taxon_count).div_ceil(64).max(1)
    }

    /// Sets the bit at the given index to 1.
    ///
    /// # Example
    /// ```
    /// # use rust_python_tree_annotator::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);
    /// bs.set(5);
    /// assert_eq!(bs.0[0], 0b00100001);
    /// ```
    #[inline]
    pub fn set(&mut self, idx: usize) {
        let word = idx >> 6;     // Equivalent to idx / 64
        let bit = idx & 63;      // Equivalent to idx % 64
        self.0[word] |= 1u64 << bit;
    }

    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        let word = idx >> 6;
        word < self.0.len() && (self.0[word] >> (idx & 63)) & 1 == 1
    }

    /// Marks taxon `i` as a descendant (bit `2*i`).
    #[inline]
    pub fn set_taxon(&mut self, taxon: usize) {
        self.set(2 * taxon);
    }

    /// Marks the node as the attachment point of sampled ancestor `i` (bit `2*i+1`).
    #[inline]
    pub fn set_sampled_ancestor(&mut self, taxon: usize) {
        self.set(2 * taxon + 1);
    }

    /// Performs bitwise OR with another bitset (union operation).
    ///
    /// # Example
    /// ```
    /// # use rust_python_tree_annotator::bitset::Bitset;
    /// let mut left = Bitset::zeros(1);
    /// left.set_taxon(0);
    ///
    /// let mut right = Bitset::zeros(1);
    /// right.set_taxon(1);
    ///
    /// left.or_assign(&right);
    /// assert_eq!(left.0[0], 0b0101);
    /// ```
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// Clears every sampled-ancestor marker, keeping only descendant bits.
    #[inline]
    pub fn clear_odd_bits(&mut self) {
        for w in self.0.iter_mut() {
            *w &= EVEN_BITS;
        }
    }

    /// Returns true when every bit of `other` is also set in `self`.
    ///
    /// A posterior node whose bitset is a superset of a target clade contains
    /// all of that clade's taxa.
    #[inline]
    pub fn is_superset_of(&self, other: &Bitset) -> bool {
        self.0
            .iter()
            .zip(&other.0)
            .all(|(a, b)| a & b == *b)
    }

    /// Counts the number of set bits (population count).
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Number of taxa in the clade (marker bits are not counted).
    #[inline]
    pub fn taxon_count(&self) -> usize {
        self.0.iter().map(|w| (w & EVEN_BITS).count_ones() as usize).sum()
    }

    /// Taxon indices contained in the clade, in increasing order.
    pub fn taxa(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(wi, &w)| {
            (0..32).filter_map(move |k| {
                let bit = 2 * k;
                if (w >> bit) & 1 == 1 { Some((wi * 64 + bit) / 2) } else { None }
            })
        })
    }

    /// Taxon indices flagged as sampled ancestors on this node.
    pub fn sampled_ancestors(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(wi, &w)| {
            (0..32).filter_map(move |k| {
                let bit = 2 * k + 1;
                if (w >> bit) & 1 == 1 { Some((wi * 64 + bit) / 2) } else { None }
            })
        })
    }
}

/// Renders as `{0,2,5}`; sampled-ancestor markers are suffixed with `*`.
impl fmt::Display for Bitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let markers: Vec<usize> = self.sampled_ancestors().collect();
        write!(f, "{{")?;
        for (k, taxon) in self.taxa().enumerate() {
            if k > 0 {
                write!(f, ",")?;
            }
            write!(f, "{taxon}")?;
            if markers.contains(&taxon) {
                write!(f, "*")?;
            }
        }
        write!(f, "}}")
    }
}
