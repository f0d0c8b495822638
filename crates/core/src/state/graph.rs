//! # Component Coverage Graph
//!
//! Tracks blueprint components as nodes and links each node to the
//! milestones whose text mentions it. Links only accumulate; a fresh graph is
//! built when the summary is regenerated.

use std::collections::BTreeMap;

use super::blueprint::{GraphCoverageSnapshot, GraphNode, Milestone};
use crate::skills::sanitize::slugify;

/// Slug used when a component name has no slug-able characters
const FALLBACK_SLUG: &str = "node";

#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    run_id: String,
    nodes: BTreeMap<String, GraphNode>,
}

impl GraphStore {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Seed nodes from summary components. Blank names and repeated slugs are skipped.
    pub fn load_components<I, S>(&mut self, components: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for raw in components {
            let name = raw.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            let slug = slugify(name, FALLBACK_SLUG);
            if self.nodes.contains_key(&slug) {
                continue;
            }
            tracing::debug!(
                event = "orchestrator.graph.node_registered",
                run_id = %self.run_id,
                node = %slug,
                name = %name,
                "Graph node registered"
            );
            self.nodes.insert(slug.clone(), GraphNode::new(slug, name));
        }
    }

    /// Insert or return the node for `name`. Blank names are ignored.
    ///
    /// An existing node only gains a description if it had none.
    pub fn upsert_node(&mut self, name: &str, description: Option<&str>) -> Option<&GraphNode> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let slug = slugify(name, FALLBACK_SLUG);
        let run_id = &self.run_id;
        let node = self.nodes.entry(slug.clone()).or_insert_with(|| {
            tracing::debug!(
                event = "orchestrator.graph.node_upserted",
                run_id = %run_id,
                node = %slug,
                "Graph node upserted"
            );
            GraphNode::new(slug.clone(), name)
        });
        if node.description.is_none() {
            node.description = description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string);
        }
        Some(node)
    }

    /// Link every node whose name appears (case-insensitively) in a milestone's
    /// details or context. Re-applying the same milestones changes nothing.
    pub fn assign_milestones(&mut self, milestones: &[Milestone]) {
        for milestone in milestones {
            let text = format!("{} {}", milestone.details, milestone.context).to_lowercase();
            for node in self.nodes.values_mut() {
                if !text.contains(&node.name.to_lowercase()) {
                    continue;
                }
                if link(node, milestone.milestone_id) {
                    tracing::debug!(
                        event = "orchestrator.graph.node_linked",
                        run_id = %self.run_id,
                        node = %node.id,
                        milestone_id = milestone.milestone_id,
                        "Graph node linked to milestone"
                    );
                }
            }
        }
    }

    /// Manually link a node to a milestone. Returns `false` for an unknown node.
    pub fn set_assignment(&mut self, node_id: &str, milestone_id: u32) -> bool {
        let Some(node) = self.nodes.get_mut(node_id) else {
            tracing::warn!(
                event = "orchestrator.graph.missing_node",
                run_id = %self.run_id,
                node = %node_id,
                milestone_id,
                "Attempted to assign missing node"
            );
            return false;
        };
        link(node, milestone_id);
        true
    }

    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.get(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Covered and uncovered node names, each sorted.
    pub fn coverage(&self) -> (Vec<String>, Vec<String>) {
        let (mut covered, mut uncovered): (Vec<String>, Vec<String>) = (Vec::new(), Vec::new());
        for node in self.nodes.values() {
            if node.milestone_ids.is_empty() {
                uncovered.push(node.name.clone());
            } else {
                covered.push(node.name.clone());
            }
        }
        covered.sort();
        uncovered.sort();
        (covered, uncovered)
    }

    pub fn snapshot(&self, notes: Option<String>) -> GraphCoverageSnapshot {
        let (covered_nodes, uncovered_nodes) = self.coverage();
        GraphCoverageSnapshot {
            run_id: self.run_id.clone(),
            covered_nodes,
            uncovered_nodes,
            notes,
        }
    }
}

impl GraphNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            milestone_ids: Vec::new(),
        }
    }
}

/// Insert keeping `milestone_ids` sorted and unique.
fn link(node: &mut GraphNode, milestone_id: u32) -> bool {
    match node.milestone_ids.binary_search(&milestone_id) {
        Ok(_) => false,
        Err(position) => {
            node.milestone_ids.insert(position, milestone_id);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn milestone(id: u32, details: &str, context: &str) -> Milestone {
        Milestone {
            milestone_id: id,
            details: details.to_string(),
            context: context.to_string(),
        }
    }

    #[test]
    fn test_case_insensitive_coverage() {
        let mut graph = GraphStore::new("orch-1");
        graph.load_components(["Billing Service", "Auth"]);
        graph.assign_milestones(&[milestone(1, "Set up AUTH flows", "login and tokens")]);

        assert_eq!(graph.node("auth").unwrap().milestone_ids, vec![1]);
        assert!(graph.node("billing-service").unwrap().milestone_ids.is_empty());

        let snapshot = graph.snapshot(None);
        assert_eq!(snapshot.covered_nodes, vec!["Auth"]);
        assert_eq!(snapshot.uncovered_nodes, vec!["Billing Service"]);
    }

    #[test]
    fn test_assignment_is_idempotent() {
        let mut graph = GraphStore::new("orch-1");
        graph.load_components(["API"]);
        let milestones = vec![
            milestone(3, "Harden the api", ""),
            milestone(1, "Draft API contracts", ""),
        ];
        graph.assign_milestones(&milestones);
        let first = graph.node("api").unwrap().milestone_ids.clone();
        graph.assign_milestones(&milestones);
        assert_eq!(graph.node("api").unwrap().milestone_ids, first);
        assert_eq!(first, vec![1, 3]);
    }

    #[test]
    fn test_load_components_skips_blank_and_duplicate_slugs() {
        let mut graph = GraphStore::new("orch-1");
        graph.load_components(["Auth", "  ", "auth!", "???"]);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.node("auth").unwrap().name, "Auth");
        assert_eq!(graph.node("node").unwrap().name, "???");
    }

    #[test]
    fn test_upsert_sets_description_once() {
        let mut graph = GraphStore::new("orch-1");
        graph.upsert_node("Search Index", None);
        graph.upsert_node("search index", Some("Full text search"));
        let node = graph.upsert_node("Search-Index", Some("Replaced?")).unwrap();
        assert_eq!(node.description.as_deref(), Some("Full text search"));
        assert_eq!(node.name, "Search Index");
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_blank_upsert_never_matches_milestones() {
        let mut graph = GraphStore::new("orch-1");
        assert!(graph.upsert_node("   ", Some("whitespace")).is_none());
        assert!(graph.upsert_node("", None).is_none());
        assert!(graph.is_empty());

        graph.upsert_node("Auth", None);
        graph.assign_milestones(&[milestone(1, "Build the frontend", "")]);
        let snapshot = graph.snapshot(None);
        assert!(snapshot.covered_nodes.is_empty());
        assert_eq!(snapshot.uncovered_nodes, vec!["Auth"]);
    }

    #[test]
    fn test_set_assignment() {
        let mut graph = GraphStore::new("orch-1");
        graph.load_components(["Auth"]);
        assert!(graph.set_assignment("auth", 2));
        assert!(graph.set_assignment("auth", 2));
        assert!(!graph.set_assignment("ghost", 1));
        assert_eq!(graph.node("auth").unwrap().milestone_ids, vec![2]);
    }
}
