//! Typed model of a reconciled gene tree.
//!
//! A [`GeneTree`] is a rooted directed tree whose nodes are genes annotated
//! with a species and the evolutionary event at which the gene ended
//! (duplication or speciation), and whose edges carry the branch length of
//! the gene's lifetime. Trees are assembled through a [`GeneTreeBuilder`]
//! and validated and time-labelled on [`GeneTreeBuilder::build`]; after
//! that they are immutable.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::clock;
use crate::{Error, Result};

/// Identifier of a gene within a [`GeneTree`].
pub type GeneId = NodeIndex;

/// The evolutionary event at which a gene node branched.
///
/// Maps from the NHX reconciliation tag `D=Y` (duplication) and `D=N`
/// (speciation). Leaf genes carry [`Event::Speciation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    /// The gene was copied within its species.
    #[serde(alias = "Y")]
    Duplication,
    /// The gene's species split into descendant species.
    #[serde(alias = "N")]
    Speciation,
}

/// A gene node of a [`GeneTree`].
#[derive(Debug, Clone)]
pub struct Gene {
    /// Unique name of the gene.
    pub name: String,
    /// Species the gene belongs to.
    pub species: String,
    /// Event at which the gene ended.
    pub event: Event,
    pub(crate) t_birth: f64,
    pub(crate) t_death: f64,
}

impl Gene {
    /// Time at which this gene came into existence.
    pub fn t_birth(&self) -> f64 {
        self.t_birth
    }

    /// Time at which this gene branched (or the present, for leaves).
    pub fn t_death(&self) -> f64 {
        self.t_death
    }

    /// Whether this gene marks a lost lineage.
    ///
    /// Reconciliation tools emit placeholder leaves whose names contain a
    /// `lost` marker; these take part in the time scale but never in
    /// interactions.
    pub fn is_lost(&self) -> bool {
        self.name.to_ascii_lowercase().contains("lost")
    }
}

/// The branch leading into a gene, i.e. the gene's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct Branch {
    /// Original branch length from the input tree.
    pub distance: f64,
    /// Branch length rescaled so that the species subtree has unit depth.
    pub(crate) length: f64,
}

/// Incrementally assembles a [`GeneTree`].
#[derive(Debug, Default)]
pub struct GeneTreeBuilder {
    graph: DiGraph<Gene, Branch>,
}

impl GeneTreeBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a gene node and return its identifier.
    pub fn add_gene(
        &mut self,
        name: impl Into<String>,
        species: impl Into<String>,
        event: Event,
    ) -> GeneId {
        self.graph.add_node(Gene {
            name: name.into(),
            species: species.into(),
            event,
            t_birth: 0.0,
            t_death: 0.0,
        })
    }

    /// Connect `parent` to `child` with the given branch length.
    pub fn add_branch(&mut self, parent: GeneId, child: GeneId, distance: f64) {
        self.graph.add_edge(
            parent,
            child,
            Branch {
                distance,
                length: 0.0,
            },
        );
    }

    /// Validate the tree shape, rescale branch lengths per species and
    /// label every gene with its birth and death time.
    ///
    /// Fails with [`Error::InvalidGeneTree`] on duplicate gene names,
    /// negative branch lengths, zero or multiple roots, nodes with more
    /// than one parent, or species subtrees whose total path length is
    /// zero.
    pub fn build(self) -> Result<GeneTree> {
        let mut graph = self.graph;
        let root = validate(&graph)?;
        clock::annotate(&mut graph, root)?;
        Ok(GeneTree { graph, root })
    }
}

fn validate(graph: &DiGraph<Gene, Branch>) -> Result<GeneId> {
    if graph.node_count() == 0 {
        return Err(Error::InvalidGeneTree("tree has no genes".into()));
    }

    let mut seen = FxHashSet::default();
    for gene in graph.node_weights() {
        if !seen.insert(gene.name.as_str()) {
            return Err(Error::InvalidGeneTree(format!(
                "duplicate gene name `{}`",
                gene.name
            )));
        }
    }

    for edge in graph.edge_references() {
        if edge.weight().distance < 0.0 {
            return Err(Error::InvalidGeneTree(format!(
                "negative branch length into `{}`",
                graph[edge.target()].name
            )));
        }
    }

    let mut roots = graph
        .node_indices()
        .filter(|&n| graph.neighbors_directed(n, Direction::Incoming).count() == 0);
    let root = roots
        .next()
        .ok_or_else(|| Error::InvalidGeneTree("tree has no root".into()))?;
    if roots.next().is_some() {
        return Err(Error::InvalidGeneTree("tree has multiple roots".into()));
    }

    for n in graph.node_indices() {
        let in_degree = graph.neighbors_directed(n, Direction::Incoming).count();
        if n != root && in_degree != 1 {
            return Err(Error::InvalidGeneTree(format!(
                "gene `{}` has {} parents",
                graph[n].name, in_degree
            )));
        }
    }

    if petgraph::algo::toposort(graph, None).is_err() {
        return Err(Error::InvalidGeneTree("tree contains a cycle".into()));
    }

    Ok(root)
}

/// A validated, time-labelled gene tree.
///
/// Immutable once built; construction goes through [`GeneTreeBuilder`].
#[derive(Debug, Clone)]
pub struct GeneTree {
    graph: DiGraph<Gene, Branch>,
    root: GeneId,
}

impl GeneTree {
    /// The root gene of the tree.
    pub fn root(&self) -> GeneId {
        self.root
    }

    /// The gene data behind an identifier.
    ///
    /// Panics if the identifier does not belong to this tree.
    pub fn gene(&self, id: GeneId) -> &Gene {
        &self.graph[id]
    }

    /// Iterate over all gene identifiers.
    pub fn genes(&self) -> impl Iterator<Item = GeneId> + '_ {
        self.graph.node_indices()
    }

    /// Number of genes in the tree.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the tree is empty. Always false for a built tree.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// The parent of a gene, if it has one.
    pub fn parent(&self, id: GeneId) -> Option<GeneId> {
        self.graph.neighbors_directed(id, Direction::Incoming).next()
    }

    /// Iterate over the children of a gene.
    pub fn children(&self, id: GeneId) -> impl Iterator<Item = GeneId> + '_ {
        self.graph.neighbors_directed(id, Direction::Outgoing)
    }

    /// Whether a gene is a leaf, i.e. an extant present-day gene.
    pub fn is_leaf(&self, id: GeneId) -> bool {
        self.graph
            .neighbors_directed(id, Direction::Outgoing)
            .next()
            .is_none()
    }

    /// The branch leading into a gene, if it is not the root.
    pub fn branch(&self, id: GeneId) -> Option<&Branch> {
        self.graph
            .edges_directed(id, Direction::Incoming)
            .next()
            .map(|e| e.weight())
    }

    /// Sum of original branch lengths from `from` up to `ancestor`.
    ///
    /// Returns `None` if `ancestor` is not on the parent chain of `from`.
    pub(crate) fn distance_to_ancestor(&self, from: GeneId, ancestor: GeneId) -> Option<f64> {
        let mut current = from;
        let mut distance = 0.0;
        while current != ancestor {
            distance += self.branch(current)?.distance;
            current = self.parent(current)?;
        }
        Some(distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_leaf_tree() -> GeneTreeBuilder {
        let mut builder = GeneTreeBuilder::new();
        let root = builder.add_gene("r", "Anc", Event::Duplication);
        let a = builder.add_gene("a", "Anc", Event::Speciation);
        let b = builder.add_gene("b", "Anc", Event::Speciation);
        builder.add_branch(root, a, 1.0);
        builder.add_branch(root, b, 2.0);
        builder
    }

    #[test]
    fn build_and_query() {
        let tree = two_leaf_tree().build().unwrap();
        assert_eq!(tree.len(), 3);
        let root = tree.root();
        assert_eq!(tree.gene(root).name, "r");
        assert!(tree.parent(root).is_none());
        assert_eq!(tree.children(root).count(), 2);
        assert!(!tree.is_leaf(root));
        let leaves: Vec<_> = tree.genes().filter(|&g| tree.is_leaf(g)).collect();
        assert_eq!(leaves.len(), 2);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut builder = GeneTreeBuilder::new();
        let a = builder.add_gene("g", "S", Event::Speciation);
        let b = builder.add_gene("g", "S", Event::Speciation);
        builder.add_branch(a, b, 1.0);
        assert!(matches!(builder.build(), Err(Error::InvalidGeneTree(_))));
    }

    #[test]
    fn multiple_roots_rejected() {
        let mut builder = GeneTreeBuilder::new();
        builder.add_gene("a", "S", Event::Speciation);
        builder.add_gene("b", "S", Event::Speciation);
        assert!(matches!(builder.build(), Err(Error::InvalidGeneTree(_))));
    }

    #[test]
    fn negative_branch_rejected() {
        let mut builder = GeneTreeBuilder::new();
        let a = builder.add_gene("a", "S", Event::Duplication);
        let b = builder.add_gene("b", "S", Event::Speciation);
        builder.add_branch(a, b, -0.5);
        assert!(matches!(builder.build(), Err(Error::InvalidGeneTree(_))));
    }

    #[test]
    fn empty_tree_rejected() {
        assert!(matches!(
            GeneTreeBuilder::new().build(),
            Err(Error::InvalidGeneTree(_))
        ));
    }

    #[test]
    fn distance_to_ancestor_sums_branches() {
        let mut builder = GeneTreeBuilder::new();
        let r = builder.add_gene("r", "S", Event::Duplication);
        let m = builder.add_gene("m", "S", Event::Duplication);
        let l = builder.add_gene("l", "S", Event::Speciation);
        let sibling = builder.add_gene("l2", "S", Event::Speciation);
        builder.add_branch(r, m, 0.5);
        builder.add_branch(m, l, 0.25);
        builder.add_branch(m, sibling, 0.25);
        let tree = builder.build().unwrap();
        assert_eq!(tree.distance_to_ancestor(l, r), Some(0.75));
        assert_eq!(tree.distance_to_ancestor(l, m), Some(0.25));
        assert_eq!(tree.distance_to_ancestor(l, l), Some(0.0));
        assert_eq!(tree.distance_to_ancestor(m, l), None);
    }

    #[test]
    fn lost_marker_is_case_insensitive() {
        let mut builder = GeneTreeBuilder::new();
        let r = builder.add_gene("r", "S", Event::Duplication);
        let l = builder.add_gene("g1-LOST", "S", Event::Speciation);
        let k = builder.add_gene("g2", "S", Event::Speciation);
        builder.add_branch(r, l, 1.0);
        builder.add_branch(r, k, 1.0);
        let tree = builder.build().unwrap();
        let lost = tree.genes().filter(|&g| tree.gene(g).is_lost()).count();
        assert_eq!(lost, 1);
    }
}
