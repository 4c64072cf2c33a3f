//! JSON schemas for gene trees, observations and beliefs.
//!
//! The crate does not parse NHX itself; an external parser is expected
//! to reduce a reconciled tree to the records here. Observations map
//! canonical interaction keys to `[1, 0]` (absent) or `[0, 1]` (present);
//! emitted beliefs use the same keys.

use std::collections::BTreeMap;
use std::io::Read;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::gene::{Event, GeneTree, GeneTreeBuilder};
use crate::{Error, Result};

/// One gene of the input tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneRecord {
    /// Unique gene name.
    pub name: String,
    /// Species annotation (NHX `S`).
    pub species: String,
    /// Event annotation (NHX `D`): `duplication` or `speciation`.
    pub event: Event,
}

/// One branch of the input tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRecord {
    /// Name of the parent gene.
    pub parent: String,
    /// Name of the child gene.
    pub child: String,
    /// Non-negative branch length.
    pub distance: f64,
}

/// A gene tree as serialised by an external parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneTreeRecord {
    /// All genes, in any order.
    pub nodes: Vec<GeneRecord>,
    /// All parent-child branches.
    pub branches: Vec<BranchRecord>,
}

impl GeneTreeRecord {
    /// Assemble and validate the gene tree described by this record.
    pub fn into_tree(self) -> Result<GeneTree> {
        let mut builder = GeneTreeBuilder::new();
        let mut ids = FxHashMap::default();
        for node in self.nodes {
            let id = builder.add_gene(node.name.as_str(), node.species.as_str(), node.event);
            if ids.insert(node.name.clone(), id).is_some() {
                return Err(Error::InvalidGeneTree(format!(
                    "duplicate gene name `{}`",
                    node.name
                )));
            }
        }
        for branch in self.branches {
            let unknown = |name: &str| {
                Error::InvalidGeneTree(format!("branch references unknown gene `{name}`"))
            };
            let parent = *ids.get(&branch.parent).ok_or_else(|| unknown(&branch.parent))?;
            let child = *ids.get(&branch.child).ok_or_else(|| unknown(&branch.child))?;
            builder.add_branch(parent, child, branch.distance);
        }
        builder.build()
    }
}

/// Read a gene tree from its JSON representation.
pub fn gene_tree_from_json(reader: impl Read) -> Result<GeneTree> {
    let record: GeneTreeRecord =
        serde_json::from_reader(reader).map_err(|e| Error::InvalidGeneTree(e.to_string()))?;
    record.into_tree()
}

/// Read an observation map from its JSON representation.
///
/// Vector contents are validated against the two allowed indicator
/// vectors when the observations are fed to the engine, not here.
pub fn observations_from_json(reader: impl Read) -> Result<BTreeMap<String, [f64; 2]>> {
    serde_json::from_reader(reader).map_err(|e| Error::InvalidObservation {
        node: "<observations>".into(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = r#"{
        "nodes": [
            {"name": "r", "species": "Anc", "event": "speciation"},
            {"name": "a", "species": "X", "event": "speciation"},
            {"name": "b", "species": "Y", "event": "speciation"}
        ],
        "branches": [
            {"parent": "r", "child": "a", "distance": 1.0},
            {"parent": "r", "child": "b", "distance": 2.0}
        ]
    }"#;

    #[test]
    fn parse_gene_tree() {
        let tree = gene_tree_from_json(TREE.as_bytes()).unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.gene(tree.root()).name, "r");
    }

    #[test]
    fn nhx_style_event_tags_are_accepted() {
        let json = r#"{
            "nodes": [
                {"name": "r", "species": "S", "event": "Y"},
                {"name": "a", "species": "S", "event": "N"},
                {"name": "b", "species": "S", "event": "N"}
            ],
            "branches": [
                {"parent": "r", "child": "a", "distance": 1.0},
                {"parent": "r", "child": "b", "distance": 1.0}
            ]
        }"#;
        let tree = gene_tree_from_json(json.as_bytes()).unwrap();
        assert_eq!(tree.gene(tree.root()).event, Event::Duplication);
    }

    #[test]
    fn unknown_branch_endpoint_is_rejected() {
        let json = r#"{
            "nodes": [{"name": "r", "species": "S", "event": "speciation"}],
            "branches": [{"parent": "r", "child": "ghost", "distance": 1.0}]
        }"#;
        assert!(matches!(
            gene_tree_from_json(json.as_bytes()),
            Err(Error::InvalidGeneTree(_))
        ));
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        assert!(matches!(
            gene_tree_from_json("{".as_bytes()),
            Err(Error::InvalidGeneTree(_))
        ));
        assert!(matches!(
            observations_from_json(r#"{"a_a": [1.0]}"#.as_bytes()),
            Err(Error::InvalidObservation { .. })
        ));
    }

    #[test]
    fn parse_observations() {
        let json = r#"{"a_a": [0.0, 1.0], "b_b": [1.0, 0.0]}"#;
        let observations = observations_from_json(json.as_bytes()).unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations["a_a"], [0.0, 1.0]);
    }
}
