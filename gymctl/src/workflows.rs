//! Structural validation of automation workflow graphs.
//!
//! Workflows are stored, not executed. Validation makes sure a stored graph could be run
//! by an executor: one trigger, known node types, well-formed edges, every node reachable
//! and no cycles.

use crate::api::models::workflows::{NodeKind, WorkflowDefinition};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

pub const TRIGGER_TYPES: &[&str] = &[
    "member_created",
    "member_status_changed",
    "booking_created",
    "booking_cancelled",
    "subscription_cancelled",
    "payment_failed",
    "class_starting",
];

pub const ACTION_TYPES: &[&str] = &["send_email", "send_discord", "add_member_note", "update_member_status"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyWorkflow,
    DuplicateNodeId { node_id: String },
    MissingTrigger,
    MultipleTriggers { node_ids: Vec<String> },
    UnknownTriggerType { node_id: String, node_type: String },
    UnknownActionType { node_id: String, node_type: String },
    MissingConditionType { node_id: String },
    UnknownEdgeEndpoint { source: String, target: String, missing: String },
    EdgeIntoTrigger { source: String, target: String },
    MissingBranchLabel { source: String, target: String },
    UnreachableNode { node_id: String },
    Cycle { node_id: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyWorkflow => write!(f, "Workflow has no nodes"),
            ValidationError::DuplicateNodeId { node_id } => write!(f, "Node id '{node_id}' is used more than once"),
            ValidationError::MissingTrigger => write!(f, "Workflow must have exactly one trigger node, found none"),
            ValidationError::MultipleTriggers { node_ids } => {
                write!(f, "Workflow must have exactly one trigger node, found: {}", node_ids.join(", "))
            }
            ValidationError::UnknownTriggerType { node_id, node_type } => write!(
                f,
                "Trigger '{node_id}' has unknown type '{node_type}'. Expected one of: {}",
                TRIGGER_TYPES.join(", ")
            ),
            ValidationError::UnknownActionType { node_id, node_type } => write!(
                f,
                "Action '{node_id}' has unknown type '{node_type}'. Expected one of: {}",
                ACTION_TYPES.join(", ")
            ),
            ValidationError::MissingConditionType { node_id } => write!(f, "Condition '{node_id}' has no type"),
            ValidationError::UnknownEdgeEndpoint { source, target, missing } => {
                write!(f, "Edge {source} -> {target} references unknown node '{missing}'")
            }
            ValidationError::EdgeIntoTrigger { source, target } => {
                write!(f, "Edge {source} -> {target} points into the trigger")
            }
            ValidationError::MissingBranchLabel { source, target } => {
                write!(f, "Edge {source} -> {target} leaves a condition and must be labelled 'true' or 'false'")
            }
            ValidationError::UnreachableNode { node_id } => write!(f, "Node '{node_id}' is unreachable from the trigger"),
            ValidationError::Cycle { node_id } => write!(f, "Workflow contains a cycle through node '{node_id}'"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

pub fn validate(definition: &WorkflowDefinition) -> ValidationResult {
    let mut result = ValidationResult::default();

    if definition.nodes.is_empty() {
        result.errors.push(ValidationError::EmptyWorkflow);
        return result;
    }

    let mut kinds: HashMap<&str, NodeKind> = HashMap::new();
    for node in &definition.nodes {
        if kinds.insert(node.id.as_str(), node.kind).is_some() {
            result.errors.push(ValidationError::DuplicateNodeId { node_id: node.id.clone() });
        }
    }

    validate_node_types(definition, &mut result);

    let triggers: Vec<&str> = definition
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Trigger)
        .map(|n| n.id.as_str())
        .collect();
    match triggers.len() {
        0 => result.errors.push(ValidationError::MissingTrigger),
        1 => {}
        _ => result.errors.push(ValidationError::MultipleTriggers {
            node_ids: triggers.iter().map(|s| s.to_string()).collect(),
        }),
    }

    let edges_ok = validate_edges(definition, &kinds, &mut result);

    // Graph-level checks only make sense once every edge resolves
    if edges_ok && triggers.len() == 1 {
        let adjacency = adjacency(definition);
        validate_reachability(definition, triggers[0], &adjacency, &mut result);
        validate_acyclic(definition, &adjacency, &mut result);
    }

    result
}

fn validate_node_types(definition: &WorkflowDefinition, result: &mut ValidationResult) {
    for node in &definition.nodes {
        match node.kind {
            NodeKind::Trigger if !TRIGGER_TYPES.contains(&node.node_type.as_str()) => {
                result.errors.push(ValidationError::UnknownTriggerType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                });
            }
            NodeKind::Action if !ACTION_TYPES.contains(&node.node_type.as_str()) => {
                result.errors.push(ValidationError::UnknownActionType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                });
            }
            NodeKind::Condition if node.node_type.trim().is_empty() => {
                result.errors.push(ValidationError::MissingConditionType { node_id: node.id.clone() });
            }
            _ => {}
        }
    }
}

/// Returns false when any edge references a node that does not exist
fn validate_edges(definition: &WorkflowDefinition, kinds: &HashMap<&str, NodeKind>, result: &mut ValidationResult) -> bool {
    let mut all_resolved = true;
    for edge in &definition.edges {
        let source_kind = kinds.get(edge.source.as_str());
        let target_kind = kinds.get(edge.target.as_str());

        for (endpoint, kind) in [(&edge.source, source_kind), (&edge.target, target_kind)] {
            if kind.is_none() {
                all_resolved = false;
                result.errors.push(ValidationError::UnknownEdgeEndpoint {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    missing: endpoint.clone(),
                });
            }
        }

        if target_kind == Some(&NodeKind::Trigger) {
            result.errors.push(ValidationError::EdgeIntoTrigger {
                source: edge.source.clone(),
                target: edge.target.clone(),
            });
        }

        if source_kind == Some(&NodeKind::Condition) && !matches!(edge.branch.as_deref(), Some("true") | Some("false")) {
            result.errors.push(ValidationError::MissingBranchLabel {
                source: edge.source.clone(),
                target: edge.target.clone(),
            });
        }
    }
    all_resolved
}

fn adjacency(definition: &WorkflowDefinition) -> HashMap<&str, Vec<&str>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &definition.edges {
        adjacency.entry(edge.source.as_str()).or_default().push(edge.target.as_str());
    }
    adjacency
}

fn validate_reachability(
    definition: &WorkflowDefinition,
    trigger: &str,
    adjacency: &HashMap<&str, Vec<&str>>,
    result: &mut ValidationResult,
) {
    let mut reachable: HashSet<&str> = HashSet::from([trigger]);
    let mut queue = VecDeque::from([trigger]);
    while let Some(node) = queue.pop_front() {
        for &next in adjacency.get(node).into_iter().flatten() {
            if reachable.insert(next) {
                queue.push_back(next);
            }
        }
    }

    let mut reported = HashSet::new();
    for node in &definition.nodes {
        if !reachable.contains(node.id.as_str()) && reported.insert(node.id.as_str()) {
            result.errors.push(ValidationError::UnreachableNode { node_id: node.id.clone() });
        }
    }
}

fn validate_acyclic(definition: &WorkflowDefinition, adjacency: &HashMap<&str, Vec<&str>>, result: &mut ValidationResult) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    // Iterative DFS; a back edge to a node still being visited closes a cycle
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    for start in definition.nodes.iter().map(|n| n.id.as_str()) {
        if marks.contains_key(start) {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        marks.insert(start, Mark::Visiting);

        while let Some((node, child_index)) = stack.pop() {
            let children = adjacency.get(node).map(Vec::as_slice).unwrap_or_default();
            if let Some(&child) = children.get(child_index) {
                stack.push((node, child_index + 1));
                match marks.get(child) {
                    Some(Mark::Visiting) => {
                        result.errors.push(ValidationError::Cycle { node_id: child.to_string() });
                        return;
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(child, Mark::Visiting);
                        stack.push((child, 0));
                    }
                }
            } else {
                marks.insert(node, Mark::Done);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::workflows::{WorkflowEdge, WorkflowNode};
    use serde_json::json;

    fn node(id: &str, kind: NodeKind, node_type: &str) -> WorkflowNode {
        WorkflowNode {
            id: id.to_string(),
            kind,
            node_type: node_type.to_string(),
            config: json!({}),
        }
    }

    fn edge(source: &str, target: &str, branch: Option<&str>) -> WorkflowEdge {
        WorkflowEdge {
            source: source.to_string(),
            target: target.to_string(),
            branch: branch.map(str::to_string),
        }
    }

    fn welcome_flow() -> WorkflowDefinition {
        WorkflowDefinition {
            nodes: vec![
                node("start", NodeKind::Trigger, "member_created"),
                node("has_email", NodeKind::Condition, "member_has_email"),
                node("email", NodeKind::Action, "send_email"),
                node("note", NodeKind::Action, "add_member_note"),
            ],
            edges: vec![
                edge("start", "has_email", None),
                edge("has_email", "email", Some("true")),
                edge("has_email", "note", Some("false")),
            ],
        }
    }

    #[test]
    fn test_valid_graph() {
        let result = validate(&welcome_flow());
        assert!(result.is_ok(), "{:?}", result.messages());
    }

    #[test]
    fn test_empty_graph() {
        let result = validate(&WorkflowDefinition::default());
        assert_eq!(result.errors, vec![ValidationError::EmptyWorkflow]);
    }

    #[test]
    fn test_trigger_count() {
        let mut def = welcome_flow();
        def.nodes[0].kind = NodeKind::Action;
        def.nodes[0].node_type = "send_discord".to_string();
        assert!(validate(&def).errors.contains(&ValidationError::MissingTrigger));

        let mut def = welcome_flow();
        def.nodes.push(node("second", NodeKind::Trigger, "booking_created"));
        def.edges.push(edge("second", "email", None));
        assert!(
            validate(&def)
                .errors
                .iter()
                .any(|e| matches!(e, ValidationError::MultipleTriggers { .. }))
        );
    }

    #[test]
    fn test_unknown_types_and_duplicate_ids() {
        let mut def = welcome_flow();
        def.nodes[0].node_type = "member_deleted".to_string();
        def.nodes[2].node_type = "send_fax".to_string();
        def.nodes[3].id = "email".to_string();
        def.edges.pop();

        let errors = validate(&def).errors;
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownTriggerType { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownActionType { .. })));
        assert!(errors.contains(&ValidationError::DuplicateNodeId {
            node_id: "email".to_string()
        }));
    }

    #[test]
    fn test_edge_rules() {
        let mut def = welcome_flow();
        def.edges.push(edge("email", "ghost", None));
        def.edges.push(edge("note", "start", None));
        def.edges[2].branch = None;

        let errors = validate(&def).errors;
        assert!(errors.contains(&ValidationError::UnknownEdgeEndpoint {
            source: "email".to_string(),
            target: "ghost".to_string(),
            missing: "ghost".to_string(),
        }));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::EdgeIntoTrigger { .. })));
        assert!(errors.contains(&ValidationError::MissingBranchLabel {
            source: "has_email".to_string(),
            target: "note".to_string(),
        }));
    }

    #[test]
    fn test_unreachable_node() {
        let mut def = welcome_flow();
        def.nodes.push(node("orphan", NodeKind::Action, "send_discord"));
        assert_eq!(
            validate(&def).errors,
            vec![ValidationError::UnreachableNode {
                node_id: "orphan".to_string()
            }]
        );
    }

    #[test]
    fn test_cycle() {
        let mut def = welcome_flow();
        def.nodes.push(node("status", NodeKind::Action, "update_member_status"));
        def.edges.push(edge("email", "status", None));
        def.edges.push(edge("status", "email", None));

        let errors = validate(&def).errors;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::Cycle { .. }));
    }

    #[test]
    fn test_definition_wire_format() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [
                {"id": "t", "kind": "trigger", "type": "payment_failed"},
                {"id": "a", "kind": "action", "type": "send_discord", "config": {"message": "Payment failed"}}
            ],
            "edges": [{"source": "t", "target": "a"}]
        }))
        .unwrap();
        assert!(validate(&def).is_ok());
        assert_eq!(def.nodes[1].config["message"], "Payment failed");
    }
}
