//! End-to-end analysis: gene tree in, posterior beliefs out.
//!
//! [`Analysis`] wires the phylogenetic layers to the inference engine:
//! it builds the interaction graph of a gene tree, turns every
//! evolutionary edge into a conditional probability table using a
//! [`TransitionModel`], and exposes repeated observation rounds over the
//! resulting polytree.

use std::collections::{BTreeMap, VecDeque};

use log::info;
use rustc_hash::FxHashMap;

use crate::cpt::Cpt;
use crate::gene::GeneTree;
use crate::interaction::{InteractionGraph, InteractionId};
use crate::polytree::{Polytree, VariableId};
use crate::Result;

/// Prior placed on the ancestral self-interaction: even odds on the root
/// interaction existing.
pub const ROOT_PRIOR: [f64; 2] = [0.5, 0.5];

/// Two-state Markov model of interaction evolution along an evolutionary
/// distance.
///
/// An interaction is gained at rate `gain` and lost at rate `loss` per
/// unit of evolved branch length; the transition matrix over a distance
/// `d` is the matrix exponential of the rate matrix, giving
/// `P(absent to present) = gain/(gain+loss) * (1 - exp(-(gain+loss)*d))`
/// and `P(present to present) = (gain + loss*exp(-(gain+loss)*d))/(gain+loss)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionModel {
    /// Rate at which an absent interaction appears.
    pub gain: f64,
    /// Rate at which a present interaction disappears.
    pub loss: f64,
}

impl Default for TransitionModel {
    fn default() -> Self {
        Self {
            gain: 0.2,
            loss: 1.0,
        }
    }
}

impl TransitionModel {
    /// A model with the given gain and loss rates.
    pub fn new(gain: f64, loss: f64) -> Self {
        Self { gain, loss }
    }

    /// The transition CPT over an evolutionary distance.
    ///
    /// Rows are `[P(absent | parent), P(present | parent)]` for the
    /// parent interaction being absent and present respectively. A zero
    /// total rate degenerates to the identity.
    pub fn cpt(&self, evol_dist: f64) -> Cpt {
        let rate = self.gain + self.loss;
        if rate == 0.0 {
            return Cpt::one_parent([[1.0, 0.0], [0.0, 1.0]]);
        }
        let decay = (-rate * evol_dist).exp();
        let gained = self.gain / rate * (1.0 - decay);
        let kept = (self.gain + self.loss * decay) / rate;
        Cpt::one_parent([[1.0 - gained, gained], [1.0 - kept, kept]])
    }
}

/// A ready-to-query analysis of one gene tree.
///
/// The engine state is kept between calls, so observations accumulate:
/// feeding the same observations twice is a no-op, feeding new ones
/// refines the current posterior.
#[derive(Debug)]
pub struct Analysis {
    interactions: InteractionGraph,
    engine: Polytree,
}

impl Analysis {
    /// Analyse a gene tree with the default transition model and root
    /// prior.
    pub fn new(tree: &GeneTree) -> Result<Self> {
        Self::with_model(tree, TransitionModel::default(), ROOT_PRIOR)
    }

    /// Analyse a gene tree with an explicit transition model and root
    /// prior.
    pub fn with_model(
        tree: &GeneTree,
        model: TransitionModel,
        root_prior: [f64; 2],
    ) -> Result<Self> {
        let interactions = InteractionGraph::build(tree)?;
        let mut engine = Polytree::new();
        let mut variables: FxHashMap<InteractionId, VariableId> = FxHashMap::default();

        let mut queue = VecDeque::from([interactions.root()]);
        while let Some(id) = queue.pop_front() {
            let name = interactions.interaction(id).key().to_string();
            let variable = match interactions.parent(id) {
                None => engine.add_root(name, root_prior)?,
                Some((parent, evol_dist)) => {
                    engine.add_child(name, &[variables[&parent]], model.cpt(evol_dist))?
                }
            };
            variables.insert(id, variable);
            queue.extend(interactions.children(id));
        }

        info!(
            "analysis over {} interactions ({} extant)",
            interactions.len(),
            interactions.extant().count()
        );
        Ok(Self {
            interactions,
            engine,
        })
    }

    /// The interaction graph under analysis.
    pub fn interactions(&self) -> &InteractionGraph {
        &self.interactions
    }

    /// The inference engine, e.g. for direct belief queries.
    pub fn engine(&self) -> &Polytree {
        &self.engine
    }

    /// Incorporate observations and return the posterior belief
    /// `[P(absent), P(present)]` of every interaction, keyed by the
    /// canonical interaction string.
    pub fn analyse(
        &mut self,
        observations: &BTreeMap<String, [f64; 2]>,
    ) -> Result<BTreeMap<String, [f64; 2]>> {
        self.engine.propagate(observations)?;
        Ok(self.engine.beliefs())
    }
}
