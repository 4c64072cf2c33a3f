//! Exact inference on binary polytrees by Pearl-style message passing.
//!
//! The engine keeps, for every variable, a causal support `π` (evidence
//! flowing from ancestors) and a diagnostic support `λ` (evidence flowing
//! from descendants and local observations), and on every edge a causal
//! message from parent to child and a diagnostic message from child to
//! parent. New evidence is incorporated with the two-pass scheme of
//! Peot & Shachter: messages are first propagated inwards from the
//! observed nodes to a pivot, then broadcast back outwards, after which
//! every belief is exact.
//!
//! The underlying undirected graph must be acyclic; inputs with
//! undirected cycles are rejected with [`Error::NotAPolytree`].

use std::collections::{BTreeMap, VecDeque};

use itertools::Itertools;
use log::debug;
use petgraph::algo::{is_cyclic_undirected, toposort};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cpt::Cpt;
use crate::{Error, Result};

/// Identifier of a variable within a [`Polytree`].
pub type VariableId = NodeIndex;

const ONES: [f64; 2] = [1.0, 1.0];
const ROW_TOLERANCE: f64 = 1e-9;

fn mul(a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    [a[0] * b[0], a[1] * b[1]]
}

/// A binary variable of the network.
#[derive(Debug, Clone)]
struct Variable {
    name: String,
    /// Distribution over the variable's values; roots only.
    prior: Option<[f64; 2]>,
    /// Conditional probability table; non-roots only.
    cpt: Option<Cpt>,
    pi: [f64; 2],
    lambda: [f64; 2],
    belief: [f64; 2],
    /// Hard likelihood vector attached by an observation.
    evidence: Option<[f64; 2]>,
    /// Observed since the last propagation.
    pending: bool,
}

/// Message state of an edge.
#[derive(Debug, Clone, Copy)]
struct Link {
    pi_msg: [f64; 2],
    lambda_msg: [f64; 2],
}

impl Default for Link {
    fn default() -> Self {
        Self {
            pi_msg: ONES,
            lambda_msg: ONES,
        }
    }
}

/// A discrete Bayesian network over binary variables whose underlying
/// undirected graph is a polytree, together with its inference state.
///
/// Build the network with [`Polytree::add_root`] and
/// [`Polytree::add_child`], then call [`Polytree::propagate`] with each
/// batch of observations; evidence accumulates across calls.
#[derive(Debug, Default)]
pub struct Polytree {
    graph: DiGraph<Variable, Link>,
    names: BTreeMap<String, VariableId>,
    initialised: bool,
}

impl Polytree {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root variable with the given prior distribution.
    pub fn add_root(&mut self, name: impl Into<String>, prior: [f64; 2]) -> Result<VariableId> {
        let name = name.into();
        if prior[0] < 0.0 || prior[1] < 0.0 || (prior[0] + prior[1] - 1.0).abs() > ROW_TOLERANCE {
            return Err(Error::InvariantViolated {
                node: name,
                reason: "prior is not a distribution".into(),
            });
        }
        self.insert(name, Some(prior), None, &[])
    }

    /// Add a variable conditioned on `parents`.
    ///
    /// The CPT's parent axes follow the parents sorted by name, whatever
    /// the order of the `parents` slice. Fails with
    /// [`Error::InvariantViolated`] if the CPT rank does not match the
    /// parent count or a CPT row does not sum to one.
    pub fn add_child(
        &mut self,
        name: impl Into<String>,
        parents: &[VariableId],
        cpt: Cpt,
    ) -> Result<VariableId> {
        let name = name.into();
        if parents.is_empty() {
            return Err(Error::InvariantViolated {
                node: name,
                reason: "non-root variables need at least one parent".into(),
            });
        }
        if cpt.parents() != parents.len() {
            return Err(Error::InvariantViolated {
                node: name,
                reason: format!(
                    "CPT has {} parent axes but {} parents were given",
                    cpt.parents(),
                    parents.len()
                ),
            });
        }
        if !cpt.rows_normalised(ROW_TOLERANCE) {
            return Err(Error::InvariantViolated {
                node: name,
                reason: "a CPT row does not sum to one".into(),
            });
        }
        self.insert(name, None, Some(cpt), parents)
    }

    fn insert(
        &mut self,
        name: String,
        prior: Option<[f64; 2]>,
        cpt: Option<Cpt>,
        parents: &[VariableId],
    ) -> Result<VariableId> {
        if self.initialised {
            return Err(Error::InvariantViolated {
                node: name,
                reason: "network is already initialised".into(),
            });
        }
        if self.names.contains_key(&name) {
            return Err(Error::InvariantViolated {
                node: name,
                reason: "duplicate variable name".into(),
            });
        }
        let id = self.graph.add_node(Variable {
            name: name.clone(),
            prior,
            cpt,
            pi: ONES,
            lambda: ONES,
            belief: ONES,
            evidence: None,
            pending: false,
        });
        for &parent in parents {
            self.graph.add_edge(parent, id, Link::default());
        }
        self.names.insert(name, id);
        Ok(id)
    }

    /// Look up a variable by name.
    pub fn id(&self, name: &str) -> Option<VariableId> {
        self.names.get(name).copied()
    }

    /// The name of a variable.
    ///
    /// Panics if the identifier does not belong to this network.
    pub fn name(&self, id: VariableId) -> &str {
        &self.graph[id].name
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the network has no variables.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// The current belief of a variable as `[P(absent), P(present)]`.
    ///
    /// Meaningful after the first [`Polytree::propagate`] call.
    pub fn belief(&self, name: &str) -> Option<[f64; 2]> {
        self.id(name).map(|id| self.graph[id].belief)
    }

    /// Scalar convenience for [`Polytree::belief`]: `P(present)`.
    pub fn posterior(&self, name: &str) -> Option<f64> {
        self.belief(name).map(|b| b[1])
    }

    /// All beliefs, keyed by variable name.
    pub fn beliefs(&self) -> BTreeMap<String, [f64; 2]> {
        self.names
            .iter()
            .map(|(name, &id)| (name.clone(), self.graph[id].belief))
            .collect()
    }

    /// Incorporate a batch of observations and update every belief.
    ///
    /// Each observation attaches hard evidence `[1, 0]` (absent) or
    /// `[0, 1]` (present) to a variable; anything else is rejected with
    /// [`Error::InvalidObservation`]. Evidence accumulates: nodes
    /// observed in earlier calls keep their evidence. An empty batch
    /// leaves beliefs at the exact marginals given all evidence so far
    /// (the prior marginals, if there is none).
    pub fn propagate(&mut self, observations: &BTreeMap<String, [f64; 2]>) -> Result<()> {
        if !self.initialised {
            self.initialise()?;
        }

        for (key, &vector) in observations {
            let id = self.id(key).ok_or_else(|| Error::InvalidObservation {
                node: key.clone(),
                reason: "unknown node".into(),
            })?;
            if vector != [1.0, 0.0] && vector != [0.0, 1.0] {
                return Err(Error::InvalidObservation {
                    node: key.clone(),
                    reason: format!("expected [1, 0] or [0, 1], got {vector:?}"),
                });
            }
            let variable = &mut self.graph[id];
            variable.evidence = Some(vector);
            variable.lambda = vector;
            variable.pending = true;
        }

        let observed: Vec<VariableId> = self
            .graph
            .node_indices()
            .filter(|&n| self.graph[n].pending)
            .collect();
        if observed.is_empty() {
            return Ok(());
        }

        // the change set spans the observed nodes: the union of the
        // undirected paths between every pair of them
        let mut change: FxHashSet<VariableId> = FxHashSet::default();
        for (&a, &b) in observed.iter().tuple_combinations() {
            if let Some(path) = self.undirected_path(a, b) {
                change.extend(path);
            }
        }
        if change.is_empty() {
            change.extend(observed.iter().copied());
        }

        let topo = toposort(&self.graph, None).map_err(|_| Error::NotAPolytree)?;
        let pivot = topo
            .into_iter()
            .find(|n| change.contains(n))
            .expect("change set is non-empty");
        change.remove(&pivot);
        debug!(
            "propagating {} observations through {} nodes around pivot {}",
            observed.len(),
            change.len() + 1,
            self.graph[pivot].name
        );

        let distances = self.undirected_distances(pivot);
        let mut ordered: Vec<VariableId> = self.graph.node_indices().collect();
        ordered.sort_by(|&x, &y| {
            let dx = distances.get(&x).copied().unwrap_or(usize::MAX);
            let dy = distances.get(&y).copied().unwrap_or(usize::MAX);
            dx.cmp(&dy)
                .then_with(|| self.graph[x].name.cmp(&self.graph[y].name))
        });

        // inward pass: farthest first, change set only
        for &node in ordered.iter().rev() {
            if change.contains(&node) {
                self.update_node(node)?;
            }
        }
        // outward pass: from the pivot back out to every node
        for &node in &ordered {
            self.update_node(node)?;
        }

        for node in self.graph.node_weights_mut() {
            node.pending = false;
        }
        Ok(())
    }

    /// Check the polytree property, reset supports and messages, and
    /// compute prior marginals in topological order.
    fn initialise(&mut self) -> Result<()> {
        if is_cyclic_undirected(&self.graph) {
            return Err(Error::NotAPolytree);
        }
        for node in self.graph.node_weights_mut() {
            node.lambda = ONES;
            node.belief = ONES;
            node.evidence = None;
            node.pending = false;
        }
        for link in self.graph.edge_weights_mut() {
            *link = Link::default();
        }
        let order = toposort(&self.graph, None).map_err(|_| Error::NotAPolytree)?;
        for node in order {
            self.update_node(node)?;
        }
        self.initialised = true;
        Ok(())
    }

    /// Recompute the supports, outgoing messages and belief of one node
    /// from its current incoming messages.
    fn update_node(&mut self, node: VariableId) -> Result<()> {
        let parents = self.sorted_neighbours(node, Direction::Incoming);
        let children = self.sorted_neighbours(node, Direction::Outgoing);

        // causal support
        let pi = if parents.is_empty() {
            self.graph[node].prior.expect("root variables carry a prior")
        } else {
            let messages: Vec<[f64; 2]> =
                parents.iter().map(|&(_, e)| self.graph[e].pi_msg).collect();
            let cpt = self.graph[node]
                .cpt
                .as_ref()
                .expect("non-root variables carry a CPT");
            cpt.causal(&messages)
        };
        self.graph[node].pi = pi;

        // diagnostic support
        if !children.is_empty() {
            let mut lambda = self.graph[node].evidence.unwrap_or(ONES);
            for &(_, edge) in &children {
                lambda = mul(lambda, self.graph[edge].lambda_msg);
            }
            self.graph[node].lambda = lambda;
        }

        // outgoing causal messages
        let evidence = self.graph[node].evidence.unwrap_or(ONES);
        for &(_, edge) in &children {
            let mut message = mul(pi, evidence);
            for &(_, other) in &children {
                if other != edge {
                    message = mul(message, self.graph[other].lambda_msg);
                }
            }
            self.graph[edge].pi_msg = message;
        }

        // outgoing diagnostic messages
        if !parents.is_empty() {
            let messages: Vec<[f64; 2]> =
                parents.iter().map(|&(_, e)| self.graph[e].pi_msg).collect();
            let lambda = self.graph[node].lambda;
            let outgoing: Vec<[f64; 2]> = {
                let cpt = self.graph[node]
                    .cpt
                    .as_ref()
                    .expect("non-root variables carry a CPT");
                (0..parents.len())
                    .map(|target| cpt.diagnostic(target, &messages, &lambda))
                    .collect()
            };
            for (&(_, edge), message) in parents.iter().zip(outgoing) {
                self.graph[edge].lambda_msg = message;
            }
        }

        // belief
        let product = mul(pi, self.graph[node].lambda);
        let total = product[0] + product[1];
        if total == 0.0 {
            return Err(Error::InconsistentEvidence(self.graph[node].name.clone()));
        }
        self.graph[node].belief = [product[0] / total, product[1] / total];
        Ok(())
    }

    /// Neighbours in one direction with their connecting edge, sorted by
    /// name. Sorted parent order defines the CPT axes; sorting children
    /// as well keeps traversal platform-independent.
    fn sorted_neighbours(
        &self,
        node: VariableId,
        direction: Direction,
    ) -> Vec<(VariableId, EdgeIndex)> {
        let mut neighbours: Vec<(VariableId, EdgeIndex)> = self
            .graph
            .edges_directed(node, direction)
            .map(|e| match direction {
                Direction::Incoming => (e.source(), e.id()),
                Direction::Outgoing => (e.target(), e.id()),
            })
            .collect();
        neighbours.sort_by(|&(x, _), &(y, _)| self.graph[x].name.cmp(&self.graph[y].name));
        neighbours
    }

    /// The unique undirected path between two nodes, if they are
    /// connected.
    fn undirected_path(&self, from: VariableId, to: VariableId) -> Option<Vec<VariableId>> {
        let mut previous: FxHashMap<VariableId, VariableId> = FxHashMap::default();
        let mut queue = VecDeque::from([from]);
        previous.insert(from, from);
        while let Some(node) = queue.pop_front() {
            if node == to {
                let mut path = vec![to];
                let mut current = to;
                while current != from {
                    current = previous[&current];
                    path.push(current);
                }
                return Some(path);
            }
            for next in self.graph.neighbors_undirected(node) {
                if !previous.contains_key(&next) {
                    previous.insert(next, node);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Undirected hop distance from `from` to every reachable node.
    fn undirected_distances(&self, from: VariableId) -> FxHashMap<VariableId, usize> {
        let mut distances: FxHashMap<VariableId, usize> = FxHashMap::default();
        let mut queue = VecDeque::from([from]);
        distances.insert(from, 0);
        while let Some(node) = queue.pop_front() {
            let next_distance = distances[&node] + 1;
            for next in self.graph.neighbors_undirected(node) {
                if !distances.contains_key(&next) {
                    distances.insert(next, next_distance);
                    queue.push_back(next);
                }
            }
        }
        distances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: [f64; 2], expected: [f64; 2]) {
        assert!(
            (actual[0] - expected[0]).abs() < 1e-8 && (actual[1] - expected[1]).abs() < 1e-8,
            "expected {expected:?}, got {actual:?}"
        );
    }

    fn observe(key: &str, vector: [f64; 2]) -> BTreeMap<String, [f64; 2]> {
        BTreeMap::from([(key.to_string(), vector)])
    }

    /// The canonical rain/sprinkler network: wet grass `W` depends on
    /// rain `R`, wet hair `H` on rain and sprinkler `S`.
    fn sprinkler() -> Polytree {
        let mut network = Polytree::new();
        let r = network.add_root("R", [0.8, 0.2]).unwrap();
        let s = network.add_root("S", [0.9, 0.1]).unwrap();
        network
            .add_child("W", &[r], Cpt::one_parent([[0.8, 0.2], [0.0, 1.0]]))
            .unwrap();
        network
            .add_child(
                "H",
                &[r, s],
                Cpt::two_parents([
                    [[1.0, 0.0], [0.1, 0.9]],
                    [[0.0, 1.0], [0.0, 1.0]],
                ]),
            )
            .unwrap();
        network
    }

    #[test]
    fn prior_marginals_without_evidence() {
        let mut network = sprinkler();
        network.propagate(&BTreeMap::new()).unwrap();
        assert_close(network.belief("R").unwrap(), [0.8, 0.2]);
        assert_close(network.belief("S").unwrap(), [0.9, 0.1]);
        assert_close(network.belief("W").unwrap(), [0.64, 0.36]);
        assert_close(network.belief("H").unwrap(), [0.728, 0.272]);
    }

    #[test]
    fn evidence_updates_all_marginals() {
        let mut network = sprinkler();
        network.propagate(&observe("H", [0.0, 1.0])).unwrap();
        assert_close(network.belief("R").unwrap(), [0.26470588, 0.73529412]);
        assert_close(network.belief("S").unwrap(), [0.66176471, 0.33823529]);
        assert_close(network.belief("W").unwrap(), [0.21176471, 0.78823529]);
        assert_close(network.belief("H").unwrap(), [0.0, 1.0]);
    }

    #[test]
    fn evidence_accumulates_incrementally() {
        let mut network = sprinkler();
        network.propagate(&observe("H", [0.0, 1.0])).unwrap();
        network.propagate(&observe("W", [0.0, 1.0])).unwrap();
        assert_close(network.belief("R").unwrap(), [0.06716418, 0.93283582]);
        assert_close(network.belief("S").unwrap(), [0.83955224, 0.16044776]);
        assert_close(network.belief("W").unwrap(), [0.0, 1.0]);
        assert_close(network.belief("H").unwrap(), [0.0, 1.0]);
    }

    #[test]
    fn joint_evidence_matches_incremental_evidence() {
        let mut incremental = sprinkler();
        incremental.propagate(&observe("H", [0.0, 1.0])).unwrap();
        incremental.propagate(&observe("W", [0.0, 1.0])).unwrap();

        let mut joint = sprinkler();
        let mut observations = observe("H", [0.0, 1.0]);
        observations.insert("W".into(), [0.0, 1.0]);
        joint.propagate(&observations).unwrap();

        for name in ["R", "S", "W", "H"] {
            assert_close(joint.belief(name).unwrap(), incremental.belief(name).unwrap());
        }
    }

    #[test]
    fn propagation_is_idempotent() {
        let mut network = sprinkler();
        let observations = observe("H", [0.0, 1.0]);
        network.propagate(&observations).unwrap();
        let first = network.beliefs();
        network.propagate(&observations).unwrap();
        assert_eq!(first, network.beliefs());
    }

    #[test]
    fn fork_with_one_observed_branch() {
        let mut network = Polytree::new();
        let root = network.add_root("0", [0.5, 0.5]).unwrap();
        network
            .add_child("1", &[root], Cpt::one_parent([[0.5, 0.5], [0.1, 0.9]]))
            .unwrap();
        network
            .add_child("2", &[root], Cpt::one_parent([[0.5, 0.5], [0.2, 0.8]]))
            .unwrap();

        network.propagate(&observe("1", [1.0, 0.0])).unwrap();
        let p0 = network.posterior("0").unwrap();
        let p1 = network.posterior("1").unwrap();
        let p2 = network.posterior("2").unwrap();
        assert!((p0 - 1.0 / 6.0).abs() < 1e-10);
        assert!(p1.abs() < 1e-10);
        assert!((p2 - 0.55).abs() < 1e-10);
    }

    #[test]
    fn undirected_cycles_are_rejected() {
        let mut network = Polytree::new();
        let r = network.add_root("r", [0.5, 0.5]).unwrap();
        let a = network
            .add_child("a", &[r], Cpt::one_parent([[0.5, 0.5], [0.5, 0.5]]))
            .unwrap();
        let b = network
            .add_child("b", &[r], Cpt::one_parent([[0.5, 0.5], [0.5, 0.5]]))
            .unwrap();
        network
            .add_child(
                "c",
                &[a, b],
                Cpt::two_parents([
                    [[0.5, 0.5], [0.5, 0.5]],
                    [[0.5, 0.5], [0.5, 0.5]],
                ]),
            )
            .unwrap();
        assert_eq!(
            network.propagate(&BTreeMap::new()),
            Err(Error::NotAPolytree)
        );
    }

    #[test]
    fn bad_observation_vectors_are_rejected() {
        let mut network = sprinkler();
        let result = network.propagate(&observe("H", [0.4, 0.6]));
        assert!(matches!(result, Err(Error::InvalidObservation { .. })));
        let result = network.propagate(&observe("nope", [0.0, 1.0]));
        assert!(matches!(result, Err(Error::InvalidObservation { .. })));
    }

    #[test]
    fn unnormalised_cpt_rows_are_rejected() {
        let mut network = Polytree::new();
        let r = network.add_root("r", [0.5, 0.5]).unwrap();
        let result = network.add_child("c", &[r], Cpt::one_parent([[0.6, 0.6], [0.5, 0.5]]));
        assert!(matches!(result, Err(Error::InvariantViolated { .. })));
    }

    #[test]
    fn mismatched_cpt_rank_is_rejected() {
        let mut network = Polytree::new();
        let r = network.add_root("r", [0.5, 0.5]).unwrap();
        let two_axis = Cpt::two_parents([
            [[0.5, 0.5], [0.5, 0.5]],
            [[0.5, 0.5], [0.5, 0.5]],
        ]);
        let result = network.add_child("c", &[r], two_axis);
        assert!(matches!(result, Err(Error::InvariantViolated { .. })));
    }

    #[test]
    fn contradictory_evidence_has_zero_mass() {
        let mut network = Polytree::new();
        let r = network.add_root("r", [1.0, 0.0]).unwrap();
        network
            .add_child("c", &[r], Cpt::one_parent([[1.0, 0.0], [0.0, 1.0]]))
            .unwrap();
        let result = network.propagate(&observe("c", [0.0, 1.0]));
        assert_eq!(result, Err(Error::InconsistentEvidence("c".into())));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut network = Polytree::new();
        network.add_root("r", [0.5, 0.5]).unwrap();
        assert!(matches!(
            network.add_root("r", [0.5, 0.5]),
            Err(Error::InvariantViolated { .. })
        ));
    }

    #[test]
    fn structural_edits_after_initialisation_are_rejected() {
        let mut network = sprinkler();
        network.propagate(&BTreeMap::new()).unwrap();
        assert!(matches!(
            network.add_root("X", [0.5, 0.5]),
            Err(Error::InvariantViolated { .. })
        ));
    }

    #[test]
    fn chain_evidence_flows_through_intermediate_nodes() {
        // r -> m -> l, observe the far leaf
        let mut network = Polytree::new();
        let r = network.add_root("r", [0.8, 0.2]).unwrap();
        let m = network
            .add_child("m", &[r], Cpt::one_parent([[0.9, 0.1], [0.2, 0.8]]))
            .unwrap();
        network
            .add_child("l", &[m], Cpt::one_parent([[0.9, 0.1], [0.2, 0.8]]))
            .unwrap();

        network.propagate(&observe("l", [0.0, 1.0])).unwrap();
        // P(m=1) = 0.1*0.8 + 0.8*0.2 = 0.24;
        // P(l=1) = 0.76*0.1 + 0.24*0.8 = 0.268
        // P(m=1 | l=1) = 0.24*0.8/0.268
        let expected_m = 0.24 * 0.8 / 0.268;
        assert!((network.posterior("m").unwrap() - expected_m).abs() < 1e-10);
        // P(r=1 | l=1) = 0.2 * (0.1*0.2 + 0.8*0.8) / 0.268
        let expected_r = 0.2 * (0.1 * 0.2 + 0.8 * 0.8) / 0.268;
        assert!((network.posterior("r").unwrap() - expected_r).abs() < 1e-10);
    }

    #[test]
    fn evidence_on_internal_nodes_screens_off_descendants() {
        let mut network = Polytree::new();
        let r = network.add_root("r", [0.8, 0.2]).unwrap();
        let m = network
            .add_child("m", &[r], Cpt::one_parent([[0.9, 0.1], [0.2, 0.8]]))
            .unwrap();
        network
            .add_child("l", &[m], Cpt::one_parent([[0.9, 0.1], [0.2, 0.8]]))
            .unwrap();

        network.propagate(&observe("m", [1.0, 0.0])).unwrap();
        assert_close(network.belief("m").unwrap(), [1.0, 0.0]);
        // l depends on r only through m, so its belief is the CPT row
        assert_close(network.belief("l").unwrap(), [0.9, 0.1]);
        // P(r=1 | m=0) = 0.2*0.2 / (0.8*0.9 + 0.2*0.2)
        let expected_r = 0.2 * 0.2 / 0.76;
        assert!((network.posterior("r").unwrap() - expected_r).abs() < 1e-10);
    }
}
