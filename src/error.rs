//! Error kinds surfaced by the crate.

use thiserror::Error;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building trees or running inference.
///
/// All errors are terminal for the current analysis call: nothing is
/// retried, and the state of a partially built graph is discarded by the
/// caller. Each variant names the offending node key where one exists.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The input gene tree is malformed: missing or duplicate genes,
    /// multiple roots, or branch lengths under which the per-species
    /// normalisation is undefined.
    #[error("invalid gene tree: {0}")]
    InvalidGeneTree(String),

    /// The inference input contains an undirected cycle.
    #[error("inference graph is not a polytree (undirected cycle)")]
    NotAPolytree,

    /// An observation vector is not one of the two allowed indicator
    /// vectors, or it is keyed on an unknown node.
    #[error("invalid observation on `{node}`: {reason}")]
    InvalidObservation {
        /// Key of the observed node.
        node: String,
        /// What was wrong with the observation.
        reason: String,
    },

    /// A structural invariant did not hold: parent resolution found more
    /// than one common child, or a CPT row does not sum to one.
    #[error("invariant violated at `{node}`: {reason}")]
    InvariantViolated {
        /// Key of the node at which the invariant failed.
        node: String,
        /// The invariant that failed.
        reason: String,
    },

    /// A belief normalised to zero mass: the evidence contradicts the
    /// model with probability one.
    #[error("inconsistent evidence: belief at `{0}` has zero mass")]
    InconsistentEvidence(String),

    /// Parent resolution exhausted the ancestor chain without finding an
    /// ancestral interaction.
    #[error("no ancestral interaction found for `{0}`")]
    ConstructionFailure(String),
}
