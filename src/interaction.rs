//! Interaction graphs: the evolutionary polytree of binary interactions.
//!
//! An [`InteractionGraph`] holds one node per potential binary interaction
//! between a pair of genes that co-existed within one species, keyed by
//! the sorted pair of gene names. Directed edges record evolutionary
//! descent between interactions: when a gene duplicates or speciates, the
//! interactions of its children descend from the interactions it took
//! part in. Every interaction except the ancestral self-interaction of
//! the gene-tree root has exactly one parent, so the graph is a tree.

use std::collections::BTreeMap;

use derive_more::Display;
use log::debug;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rustc_hash::FxHashMap;

use crate::gene::{GeneId, GeneTree};
use crate::{Error, Result};

/// Identifier of an interaction within an [`InteractionGraph`].
pub type InteractionId = petgraph::graph::NodeIndex;

/// Canonical key of an interaction: the unordered pair of gene names,
/// stored sorted. The canonical string form joins them with `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display(fmt = "{}_{}", a, b)]
pub struct InteractionKey {
    a: String,
    b: String,
}

impl InteractionKey {
    /// Build the key for a pair of genes; the order of arguments is
    /// irrelevant.
    pub fn new(x: &str, y: &str) -> Self {
        if x <= y {
            Self {
                a: x.into(),
                b: y.into(),
            }
        } else {
            Self {
                a: y.into(),
                b: x.into(),
            }
        }
    }

    /// The two gene names, in sorted order.
    pub fn genes(&self) -> (&str, &str) {
        (&self.a, &self.b)
    }

    /// Whether this is a self-interaction (homodimer).
    pub fn is_self(&self) -> bool {
        self.a == self.b
    }
}

/// A potential binary interaction between two co-existing genes.
#[derive(Debug, Clone)]
pub struct Interaction {
    key: InteractionKey,
    species: String,
    extant: bool,
}

impl Interaction {
    /// The canonical key of the interaction.
    pub fn key(&self) -> &InteractionKey {
        &self.key
    }

    /// The species both participating genes belong to.
    pub fn species(&self) -> &str {
        &self.species
    }

    /// Whether both participating genes are present-day leaves, making
    /// the interaction observable.
    pub fn is_extant(&self) -> bool {
        self.extant
    }
}

/// Evolutionary descent between two interactions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Descent {
    /// Total branch length evolved by the participating genes since the
    /// parent interaction.
    pub evol_dist: f64,
}

/// The evolutionary polytree of interactions derived from a gene tree.
#[derive(Debug, Clone)]
pub struct InteractionGraph {
    graph: StableDiGraph<Interaction, Descent>,
    index: BTreeMap<InteractionKey, InteractionId>,
    root: InteractionId,
}

impl InteractionGraph {
    /// Construct the interaction graph of a gene tree.
    pub fn build(tree: &GeneTree) -> Result<Self> {
        Builder::new(tree).build()
    }

    /// The ancestral self-interaction of the gene-tree root.
    pub fn root(&self) -> InteractionId {
        self.root
    }

    /// Look up an interaction by key.
    pub fn get(&self, key: &InteractionKey) -> Option<InteractionId> {
        self.index.get(key).copied()
    }

    /// The interaction data behind an identifier.
    ///
    /// Panics if the identifier does not belong to this graph.
    pub fn interaction(&self, id: InteractionId) -> &Interaction {
        &self.graph[id]
    }

    /// Iterate over all interactions in key order.
    pub fn ids(&self) -> impl Iterator<Item = InteractionId> + '_ {
        self.index.values().copied()
    }

    /// Iterate over the extant interactions in key order.
    pub fn extant(&self) -> impl Iterator<Item = InteractionId> + '_ {
        self.ids().filter(|&id| self.graph[id].extant)
    }

    /// The evolutionary parent of an interaction, with the evolutionary
    /// distance covered since it. `None` for the root.
    pub fn parent(&self, id: InteractionId) -> Option<(InteractionId, f64)> {
        self.graph
            .edges_directed(id, Direction::Incoming)
            .next()
            .map(|e| (e.source(), e.weight().evol_dist))
    }

    /// Iterate over the evolutionary children of an interaction.
    pub fn children(&self, id: InteractionId) -> impl Iterator<Item = InteractionId> + '_ {
        self.graph.neighbors_directed(id, Direction::Outgoing)
    }

    /// Number of interactions.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no interactions. Always false once built.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

/// Transient construction state.
///
/// Genes never enter the interaction graph itself: the incidence relation
/// (which genes take part in which interactions) lives in side tables and
/// is dropped once construction finishes, which is also what makes the
/// final bulk removal of gene nodes implicit.
struct Builder<'t> {
    tree: &'t GeneTree,
    graph: StableDiGraph<Interaction, Descent>,
    index: BTreeMap<InteractionKey, InteractionId>,
    /// Interactions each gene takes part in.
    incidence: FxHashMap<GeneId, Vec<InteractionId>>,
}

impl<'t> Builder<'t> {
    fn new(tree: &'t GeneTree) -> Self {
        Self {
            tree,
            graph: StableDiGraph::default(),
            index: BTreeMap::new(),
            incidence: FxHashMap::default(),
        }
    }

    fn build(mut self) -> Result<InteractionGraph> {
        let mut order: Vec<GeneId> = self.tree.genes().collect();
        order.sort_by(|&x, &y| {
            let (gx, gy) = (self.tree.gene(x), self.tree.gene(y));
            gx.t_birth
                .total_cmp(&gy.t_birth)
                .then_with(|| gx.name.cmp(&gy.name))
        });

        for &gene in &order {
            if self.tree.gene(gene).is_lost() {
                continue;
            }
            for fellow in self.fellow_extants(gene) {
                let key = InteractionKey::new(
                    &self.tree.gene(gene).name,
                    &self.tree.gene(fellow).name,
                );
                if self.index.contains_key(&key) {
                    continue;
                }
                self.add_interaction(key, gene, fellow)?;
            }
        }

        self.prune_lost();

        let root = self.resolve_root()?;
        debug!(
            "built interaction graph: {} interactions, {} extant",
            self.graph.node_count(),
            self.index
                .values()
                .filter(|&&id| self.graph[id].extant)
                .count()
        );

        Ok(InteractionGraph {
            graph: self.graph,
            index: self.index,
            root,
        })
    }

    /// All genes of the same species whose lifetime covers the birth of
    /// `gene`, including `gene` itself. Lost lineages never interact.
    fn fellow_extants(&self, gene: GeneId) -> Vec<GeneId> {
        let born = self.tree.gene(gene).t_birth;
        let species = &self.tree.gene(gene).species;
        let mut fellows: Vec<GeneId> = self
            .tree
            .genes()
            .filter(|&f| {
                let fellow = self.tree.gene(f);
                fellow.species == *species
                    && fellow.t_birth <= born
                    && born < fellow.t_death
                    && !fellow.is_lost()
            })
            .collect();
        fellows.sort_by(|&x, &y| self.tree.gene(x).name.cmp(&self.tree.gene(y).name));
        fellows
    }

    fn add_interaction(&mut self, key: InteractionKey, gene: GeneId, fellow: GeneId) -> Result<()> {
        // order incidence genes to match the sorted key
        let (a, b) = if self.tree.gene(gene).name <= self.tree.gene(fellow).name {
            (gene, fellow)
        } else {
            (fellow, gene)
        };

        let extant = self.tree.is_leaf(a) && self.tree.is_leaf(b);
        let id = self.graph.add_node(Interaction {
            key: key.clone(),
            species: self.tree.gene(gene).species.clone(),
            extant,
        });
        self.index.insert(key, id);
        self.incidence.entry(a).or_default().push(id);
        if b != a {
            self.incidence.entry(b).or_default().push(id);
        }

        if let Some((parent, evol_dist)) = self.resolve_parent(id, a, b)? {
            self.graph.add_edge(parent, id, Descent { evol_dist });
        }
        Ok(())
    }

    /// Walk the ancestor chains of the two participating genes until they
    /// meet at an interaction that already exists; that interaction is
    /// the evolutionary parent of the new one.
    ///
    /// Starting from the participating genes, the younger of the current
    /// ancestor pair (the one with the larger `t_birth`, preferring the
    /// second on ties) is repeatedly replaced by its gene-tree parent.
    /// If both chains arrive at the same gene the parent is that gene's
    /// self-interaction; otherwise the parent is the unique interaction
    /// shared by the two ancestors' incidence sets.
    fn resolve_parent(
        &self,
        new: InteractionId,
        gene_a: GeneId,
        gene_b: GeneId,
    ) -> Result<Option<(InteractionId, f64)>> {
        let born = |g: GeneId| self.tree.gene(g).t_birth;

        let (mut anc_a, mut anc_b) = (gene_a, gene_b);
        if born(anc_a) > born(anc_b) {
            match self.tree.parent(anc_a) {
                Some(p) => anc_a = p,
                None => return Ok(None),
            }
        } else {
            match self.tree.parent(anc_b) {
                Some(p) => anc_b = p,
                None => return Ok(None),
            }
        }

        let parent = loop {
            if anc_a == anc_b {
                let name = &self.tree.gene(anc_a).name;
                let key = InteractionKey::new(name, name);
                break *self.index.get(&key).ok_or_else(|| Error::InvariantViolated {
                    node: self.graph[new].key.to_string(),
                    reason: format!("ancestral self-interaction `{key}` was never built"),
                })?;
            }

            let common = self.common_interaction(anc_a, anc_b, new)?;
            if let Some(found) = common {
                break found;
            }

            let advance = if born(anc_a) > born(anc_b) {
                &mut anc_a
            } else {
                &mut anc_b
            };
            *advance = self.tree.parent(*advance).ok_or_else(|| {
                Error::ConstructionFailure(self.graph[new].key.to_string())
            })?;
        };

        let missing_chain = || Error::InvariantViolated {
            node: self.graph[new].key.to_string(),
            reason: "resolved ancestor is not on the participant's lineage".into(),
        };
        let evolved_a = self
            .tree
            .distance_to_ancestor(gene_a, anc_a)
            .ok_or_else(missing_chain)?;
        let evolved_b = self
            .tree
            .distance_to_ancestor(gene_b, anc_b)
            .ok_or_else(missing_chain)?;

        Ok(Some((parent, evolved_a + evolved_b)))
    }

    /// The single interaction both genes take part in, if any.
    fn common_interaction(
        &self,
        anc_a: GeneId,
        anc_b: GeneId,
        new: InteractionId,
    ) -> Result<Option<InteractionId>> {
        let empty: &[InteractionId] = &[];
        let of_a = self.incidence.get(&anc_a).map_or(empty, Vec::as_slice);
        let of_b = self.incidence.get(&anc_b).map_or(empty, Vec::as_slice);
        let mut shared = of_a.iter().filter(|&&id| of_b.contains(&id));

        let found = shared.next().copied();
        if shared.next().is_some() {
            return Err(Error::InvariantViolated {
                node: self.graph[new].key.to_string(),
                reason: format!(
                    "genes `{}` and `{}` share more than one interaction",
                    self.tree.gene(anc_a).name,
                    self.tree.gene(anc_b).name
                ),
            });
        }
        Ok(found)
    }

    /// Remove any interaction whose key mentions a lost lineage. A
    /// no-op when interactions were built from the gene tree, since lost
    /// genes are already excluded during the sweep, but kept as the final
    /// word on what the graph may contain.
    fn prune_lost(&mut self) {
        let doomed: Vec<(InteractionKey, InteractionId)> = self
            .index
            .iter()
            .filter(|(key, _)| key.to_string().to_ascii_lowercase().contains("lost"))
            .map(|(key, &id)| (key.clone(), id))
            .collect();
        for (key, id) in doomed {
            self.graph.remove_node(id);
            self.index.remove(&key);
        }
    }

    fn resolve_root(&self) -> Result<InteractionId> {
        let mut roots = self.graph.node_indices().filter(|&n| {
            self.graph
                .neighbors_directed(n, Direction::Incoming)
                .next()
                .is_none()
        });
        let root = roots.next().ok_or_else(|| Error::InvariantViolated {
            node: "interaction graph".into(),
            reason: "no root interaction".into(),
        })?;
        if let Some(extra) = roots.next() {
            return Err(Error::InvariantViolated {
                node: self.graph[extra].key.to_string(),
                reason: "more than one parentless interaction".into(),
            });
        }

        let root_gene = &self.tree.gene(self.tree.root()).name;
        let expected = InteractionKey::new(root_gene, root_gene);
        if self.graph[root].key != expected {
            return Err(Error::InvariantViolated {
                node: self.graph[root].key.to_string(),
                reason: format!("root is not the ancestral self-interaction `{expected}`"),
            });
        }
        Ok(root)
    }
}
