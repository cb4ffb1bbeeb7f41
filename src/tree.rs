//! Annotatable rooted trees.
//!
//! # Overview
//! Posterior trees and the summary (target) tree share one representation:
//! an arena of [`Node`]s addressed by [`NodeId`]. Each node carries a height
//! (0 = most recent tip), an optional taxon index for leaves and a free-form
//! metadata map that the annotator writes its statistics into.
//!
//! # Sampled ancestors
//! A sampled ancestor is a leaf sitting on a zero-length branch. Its parent is
//! the "fake" node that attaches it to the lineage it is ancestral to:
//! ```text
//!        fake (h = 2.0)
//!       /    \
//!  A (h = 2.0)  subtree
//! ```

use crate::error::{Result, SummaryError};
use phylotree::tree::Tree as PhyloTree;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub type NodeId = usize;

/// A metadata value attached to a node.
#[derive(Clone, Debug, PartialEq)]
pub enum MetaValue {
    Number(f64),
    Bool(bool),
    Text(String),
    Array(Vec<MetaValue>),
}

impl MetaValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetaValue::Number(x) => Some(*x),
            _ => None,
        }
    }

    /// Returns the components when this is an array made only of numbers.
    pub fn as_numeric_array(&self) -> Option<Vec<f64>> {
        match self {
            MetaValue::Array(items) => items.iter().map(MetaValue::as_number).collect(),
            _ => None,
        }
    }

    /// Builds an array value from plain numbers.
    pub fn numbers(values: &[f64]) -> Self {
        MetaValue::Array(values.iter().copied().map(MetaValue::Number).collect())
    }

    pub fn texts<S: AsRef<str>>(values: &[S]) -> Self {
        MetaValue::Array(values.iter().map(|s| MetaValue::Text(s.as_ref().to_string())).collect())
    }

    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            MetaValue::Number(_) => "number",
            MetaValue::Bool(_) => "boolean",
            MetaValue::Text(_) => "string",
            MetaValue::Array(_) => "array",
        }
    }
}

/// Plain rendering without quoting; used as the label of discrete values.
impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Number(x) => write!(f, "{x}"),
            MetaValue::Bool(b) => write!(f, "{b}"),
            MetaValue::Text(s) => write!(f, "{s}"),
            MetaValue::Array(items) => {
                write!(f, "{{")?;
                for (k, item) in items.iter().enumerate() {
                    if k > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub label: Option<String>,
    /// Taxon index for leaves, assigned by the [`TaxonSet`].
    pub taxon: Option<usize>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub height: f64,
    pub metadata: BTreeMap<String, MetaValue>,
    /// Set when the node's posterior support falls below the requested limit.
    pub filtered: bool,
}

impl Node {
    fn new(id: NodeId) -> Self {
        Node {
            id,
            label: None,
            taxon: None,
            parent: None,
            children: Vec::new(),
            height: 0.0,
            metadata: BTreeMap::new(),
            filtered: false,
        }
    }
}

/// A rooted tree stored as a node arena.
#[derive(Clone, Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
    taxon_count: usize,
}

impl Tree {
    /// Starts building a tree over `taxon_count` taxa.
    pub fn builder(taxon_count: usize) -> TreeBuilder {
        TreeBuilder { nodes: Vec::new(), lengths: Vec::new(), taxon_count }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn taxon_count(&self) -> usize {
        self.taxon_count
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id].children.is_empty()
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        id == self.root
    }

    /// A tree has a trunk when its root carries a single child lineage.
    pub fn has_trunk(&self) -> bool {
        self.nodes[self.root].children.len() == 1
    }

    pub fn height(&self, id: NodeId) -> f64 {
        self.nodes[id].height
    }

    pub fn set_height(&mut self, id: NodeId, height: f64) {
        self.nodes[id].height = height;
    }

    /// Length of the branch above `id`; `None` for the root.
    pub fn branch_length(&self, id: NodeId) -> Option<f64> {
        self.nodes[id].parent.map(|p| self.nodes[p].height - self.nodes[id].height)
    }

    /// A leaf on a zero-length branch, i.e. a sampled ancestor.
    pub fn is_direct_ancestor(&self, id: NodeId) -> bool {
        match self.nodes[id].parent {
            Some(p) => self.is_leaf(id) && self.nodes[p].height == self.nodes[id].height,
            None => false,
        }
    }

    /// The zero-length attachment node of a sampled ancestor.
    pub fn is_fake(&self, id: NodeId) -> bool {
        self.direct_ancestor_child(id).is_some()
    }

    pub fn direct_ancestor_child(&self, id: NodeId) -> Option<NodeId> {
        let node = &self.nodes[id];
        if node.children.len() != 2 {
            return None;
        }
        node.children.iter().copied().find(|&c| self.is_direct_ancestor(c))
    }

    /// Children before parents, children in stored order.
    pub fn postorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for &child in self.nodes[id].children.iter().rev() {
                stack.push((child, false));
            }
        }
        order
    }

    /// Parents before children, children in stored order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().filter(|n| n.children.is_empty())
    }

    /// Clears all metadata and filter flags, e.g. on a user-supplied target tree.
    pub fn clear_annotations(&mut self) {
        for node in self.nodes.iter_mut() {
            node.metadata.clear();
            node.filtered = false;
        }
    }

    /// Converts a `phylotree` tree, using node names as taxon labels.
    ///
    /// Heights are derived from branch lengths; missing lengths count as 0.0.
    pub fn from_phylotree(tree: &PhyloTree, taxa: &TaxonSet) -> Result<Tree> {
        let root_id = tree.get_root().map_err(|e| SummaryError::InvalidTree(e.to_string()))?;
        let mut builder = Tree::builder(taxa.len());
        let root = Self::convert_phylo_node(tree, root_id, None, taxa, &mut builder)?;
        builder.build(root)
    }

    fn convert_phylo_node(
        tree: &PhyloTree,
        node_id: usize,
        parent: Option<NodeId>,
        taxa: &TaxonSet,
        builder: &mut TreeBuilder,
    ) -> Result<NodeId> {
        let node = tree.get(&node_id).map_err(|e| SummaryError::InvalidTree(e.to_string()))?;
        let length = if parent.is_some() { node.parent_edge.unwrap_or(0.0) } else { 0.0 };
        let id = builder.add_node(parent, length);
        if node.children.is_empty() {
            let name = node
                .name
                .clone()
                .ok_or_else(|| SummaryError::InvalidTree(format!("leaf {node_id} has no name")))?;
            builder.set_taxon(id, taxa.require(&name)?, name);
        } else {
            if let Some(name) = &node.name {
                builder.set_label(id, name.clone());
            }
            for &child in &node.children {
                Self::convert_phylo_node(tree, child, Some(id), taxa, builder)?;
            }
        }
        Ok(id)
    }
}

/// Incremental construction from branch lengths.
///
/// Nodes are added parent-first; heights are computed on [`TreeBuilder::build`]
/// so that the deepest tip sits at height 0.
pub struct TreeBuilder {
    nodes: Vec<Node>,
    lengths: Vec<f64>,
    taxon_count: usize,
}

impl TreeBuilder {
    /// Adds a node below `parent` with the given branch length.
    pub fn add_node(&mut self, parent: Option<NodeId>, branch_length: f64) -> NodeId {
        let id = self.nodes.len();
        let mut node = Node::new(id);
        node.parent = parent;
        self.nodes.push(node);
        self.lengths.push(branch_length);
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        id
    }

    pub fn set_taxon(&mut self, id: NodeId, taxon: usize, label: String) {
        self.nodes[id].taxon = Some(taxon);
        self.nodes[id].label = Some(label);
    }

    pub fn set_label(&mut self, id: NodeId, label: String) {
        self.nodes[id].label = Some(label);
    }

    pub fn set_branch_length(&mut self, id: NodeId, branch_length: f64) {
        self.lengths[id] = branch_length;
    }

    pub fn insert_metadata(&mut self, id: NodeId, key: String, value: MetaValue) {
        self.nodes[id].metadata.insert(key, value);
    }

    pub fn build(mut self, root: NodeId) -> Result<Tree> {
        if self.nodes.is_empty() {
            return Err(SummaryError::InvalidTree("tree has no nodes".to_string()));
        }
        if self.nodes[root].parent.is_some() {
            return Err(SummaryError::InvalidTree(format!("node {root} is not a root")));
        }

        // Parents are always added before their children, so one forward
        // sweep accumulates root-to-node distances.
        let mut depth = vec![0.0f64; self.nodes.len()];
        for id in 0..self.nodes.len() {
            if let Some(p) = self.nodes[id].parent {
                depth[id] = depth[p] + self.lengths[id];
            }
        }
        let max_depth = depth.iter().copied().fold(0.0f64, f64::max);
        for (node, d) in self.nodes.iter_mut().zip(&depth) {
            node.height = max_depth - d;
        }

        let mut seen = vec![false; self.taxon_count];
        for node in self.nodes.iter().filter(|n| n.children.is_empty()) {
            let taxon = node.taxon.ok_or_else(|| {
                SummaryError::InvalidTree(format!("leaf {} has no taxon", node.id))
            })?;
            if taxon >= self.taxon_count {
                return Err(SummaryError::TaxonCountMismatch {
                    expected: self.taxon_count,
                    found: taxon + 1,
                });
            }
            if seen[taxon] {
                return Err(SummaryError::InvalidTree(format!("taxon {taxon} appears twice")));
            }
            seen[taxon] = true;
        }

        Ok(Tree { nodes: self.nodes, root, taxon_count: self.taxon_count })
    }
}

/// Stable assignment of taxon labels to indices `0..T`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaxonSet {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl TaxonSet {
    /// Keeps the given order (e.g. a NEXUS `TAXLABELS` block).
    pub fn new(labels: Vec<String>) -> Self {
        let index = labels.iter().enumerate().map(|(i, l)| (l.clone(), i)).collect();
        TaxonSet { labels, index }
    }

    /// Sorts labels alphabetically so identical taxa always map to the same index.
    pub fn sorted(mut labels: Vec<String>) -> Self {
        labels.sort();
        labels.dedup();
        Self::new(labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn require(&self, label: &str) -> Result<usize> {
        self.index_of(label).ok_or_else(|| SummaryError::UnknownTaxon(label.to_string()))
    }

    pub fn label(&self, taxon: usize) -> Option<&str> {
        self.labels.get(taxon).map(String::as_str)
    }
}
