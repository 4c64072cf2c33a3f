//! Species-relative time scale for gene trees.
//!
//! Branch lengths of the input tree are comparable only within a species:
//! every species subtree is rescaled to unit depth, after which each gene
//! can be labelled with the interval `[t_birth, t_death)` during which it
//! existed. All genes of one species then live inside the same unit
//! window, and every speciation out of a species happens at the same
//! horizon, which is what makes interactions between co-existing genes
//! well defined.

use std::collections::BTreeSet;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rustc_hash::FxHashSet;

use crate::gene::{Branch, Gene};
use crate::{Error, Result};

/// Rescale branch lengths per species and label birth/death times.
///
/// The root gene is given a unit stem lifetime (`t_birth = 0`,
/// `t_death = 1`), so the root species occupies the window `(1, 2]` and
/// every species entered by `k` speciations occupies `(k + 1, k + 2]`.
pub(crate) fn annotate(graph: &mut DiGraph<Gene, Branch>, root: NodeIndex) -> Result<()> {
    normalise(graph)?;
    label(graph, root);
    Ok(())
}

/// Assign to every edge a `length` such that, within each species
/// subtree, every root-to-leaf path sums to one.
///
/// The subtree induced by a species consists of its member genes plus
/// their immediate parents; parents belonging to another species act as
/// roots of the induced forest and contribute no incoming length.
fn normalise(graph: &mut DiGraph<Gene, Branch>) -> Result<()> {
    let species: BTreeSet<String> = graph
        .node_weights()
        .map(|gene| gene.species.clone())
        .collect();

    for name in &species {
        let members: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&n| graph[n].species == *name)
            .collect();

        let mut induced: FxHashSet<NodeIndex> = members.iter().copied().collect();
        for &member in &members {
            if let Some(parent) = graph.neighbors_directed(member, Direction::Incoming).next() {
                induced.insert(parent);
            }
        }

        let roots: Vec<NodeIndex> = induced
            .iter()
            .copied()
            .filter(|&n| {
                graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .map_or(true, |p| !induced.contains(&p))
            })
            .collect();

        for root in roots {
            distribute(graph, &induced, root, 1.0)?;
        }
    }

    Ok(())
}

/// Recursively split `budget` over the outgoing edges of `node`,
/// proportionally to the original branch lengths, so that every leaf of
/// the induced subtree ends up at depth exactly `budget` below `node`.
fn distribute(
    graph: &mut DiGraph<Gene, Branch>,
    induced: &FxHashSet<NodeIndex>,
    node: NodeIndex,
    budget: f64,
) -> Result<()> {
    let edges: Vec<(NodeIndex, petgraph::graph::EdgeIndex, f64)> = graph
        .edges_directed(node, Direction::Outgoing)
        .filter(|e| induced.contains(&e.target()))
        .map(|e| (e.target(), e.id(), e.weight().distance))
        .collect();

    for (child, edge, distance) in edges {
        let deepest = distance + max_descendant_distance(graph, induced, child);
        if deepest <= 0.0 {
            return Err(Error::InvalidGeneTree(format!(
                "zero-length paths below `{}` in species `{}`",
                graph[node].name, graph[child].species
            )));
        }
        let length = budget * distance / deepest;
        graph[edge].length = length;
        distribute(graph, induced, child, budget - length)?;
    }

    Ok(())
}

/// Longest original-length path from `node` to any of its descendants
/// within the induced subtree.
fn max_descendant_distance(
    graph: &DiGraph<Gene, Branch>,
    induced: &FxHashSet<NodeIndex>,
    node: NodeIndex,
) -> f64 {
    graph
        .edges_directed(node, Direction::Outgoing)
        .filter(|e| induced.contains(&e.target()))
        .map(|e| e.weight().distance + max_descendant_distance(graph, induced, e.target()))
        .fold(0.0, f64::max)
}

/// Chain normalised lengths into birth/death labels.
///
/// A gene is born when its parent branches and dies at its own event:
/// `t_birth(child) = t_death(parent)` and
/// `t_death(child) = t_birth(child) + length(parent, child)`.
fn label(graph: &mut DiGraph<Gene, Branch>, root: NodeIndex) {
    graph[root].t_birth = 0.0;
    graph[root].t_death = 1.0;

    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let t_death = graph[node].t_death;
        let children: Vec<(NodeIndex, f64)> = graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (e.target(), e.weight().length))
            .collect();
        for (child, length) in children {
            graph[child].t_birth = t_death;
            graph[child].t_death = t_death + length;
            stack.push(child);
        }
    }
}
