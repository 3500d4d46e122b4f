use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::EngineError;
use crate::types::Route;

/// Name of the review stage node.
pub const REVIEW_NODE: &str = "colleagues";
/// Name of the terminal node.
pub const FINISH_NODE: &str = "finish";

/// Declarative description of the nodes and edges a run will execute.
///
/// Immutable once validated. The first node is the entry point; the
/// reserved names `colleagues` (review stage) and `finish` (terminal) get
/// dedicated handlers, names present in `node_tools` become tool nodes and
/// anything else is a pass-through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub nodes: Vec<String>,

    #[serde(default)]
    pub edges: Vec<(String, String)>,

    /// Ordered, non-empty tool list per tool node.
    #[serde(default)]
    pub node_tools: HashMap<String, Vec<String>>,

    /// `node → route label → target` for conditional routing.
    #[serde(default)]
    pub conditional_edges: HashMap<String, HashMap<String, String>>,
}

impl Blueprint {
    /// The entry node.
    pub fn entry(&self) -> Option<&str> {
        self.nodes.first().map(String::as_str)
    }

    /// First unconditional successor of `node`, if any.
    pub fn direct_successor(&self, node: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|(from, _)| from == node)
            .map(|(_, to)| to.as_str())
    }

    fn has_outgoing(&self, node: &str) -> bool {
        self.direct_successor(node).is_some() || self.conditional_edges.contains_key(node)
    }

    /// Checks every structural invariant. Tool availability in the live
    /// session is deliberately not checked here; the engine records a
    /// missing tool as a step result at execution time.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::BlueprintInvalid(msg));

        if self.nodes.is_empty() {
            return invalid("blueprint declares no nodes".into());
        }

        let mut declared: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            if !declared.insert(node.as_str()) {
                return invalid(format!("duplicate node '{node}'"));
            }
        }

        for (from, to) in &self.edges {
            if !declared.contains(from.as_str()) {
                return invalid(format!("edge source '{from}' is not a declared node"));
            }
            if !declared.contains(to.as_str()) {
                return invalid(format!("edge target '{to}' is not a declared node"));
            }
        }

        for (from, routes) in &self.conditional_edges {
            if !declared.contains(from.as_str()) {
                return invalid(format!("conditional edge source '{from}' is not a declared node"));
            }
            for (label, target) in routes {
                if !declared.contains(target.as_str()) {
                    return invalid(format!(
                        "conditional target '{target}' (route '{label}' from '{from}') is not a declared node"
                    ));
                }
            }
        }

        for (node, tools) in &self.node_tools {
            if !declared.contains(node.as_str()) {
                return invalid(format!("node_tools entry '{node}' is not a declared node"));
            }
            if tools.is_empty() {
                return invalid(format!("tool node '{node}' has an empty tool list"));
            }
            if !self.has_outgoing(node) {
                return invalid(format!("tool node '{node}' has no outgoing edge"));
            }
        }

        // Reserved names are matched case-insensitively, like the engine
        // matches them when it assigns handlers.
        if let Some(finish) = self.nodes.iter().find(|n| n.eq_ignore_ascii_case(FINISH_NODE)) {
            if self.has_outgoing(finish) {
                return invalid(format!("'{finish}' must have no outgoing edges"));
            }
        }

        if let Some(review) = self.nodes.iter().find(|n| n.eq_ignore_ascii_case(REVIEW_NODE)) {
            let routes = self.conditional_edges.get(review).ok_or_else(|| {
                EngineError::BlueprintInvalid(format!(
                    "'{review}' must declare conditional edges for {:?}",
                    Route::LABELS
                ))
            })?;
            let labels: HashSet<&str> = routes.keys().map(String::as_str).collect();
            let expected: HashSet<&str> = Route::LABELS.into_iter().collect();
            if labels != expected {
                return invalid(format!(
                    "'{review}' routes must be exactly {:?}, got {:?}",
                    Route::LABELS, labels
                ));
            }
        }

        Ok(())
    }
}
