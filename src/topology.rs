//! Connection rules, graph validation and structural analysis.
//!
//! Everything here classifies a graph without mutating it. The same rules back
//! inline editing feedback and the pre-flight check both engines run.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::ValidationError;
use crate::models::{ComponentType, Graph, Protocol};
use crate::state::{Diagnostic, DiagnosticKind, Severity};

use ComponentType::*;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Legal downstream types per source type.
pub fn allowed_targets(source: ComponentType) -> &'static [ComponentType] {
    match source {
        Client => &[Cdn, LoadBalancer, ApiGateway, AppServer],
        Cdn => &[LoadBalancer, ApiGateway, AppServer, ObjectStore],
        LoadBalancer => &[AppServer],
        ApiGateway => &[LoadBalancer, AppServer],
        AppServer => &[
            AppServer,
            Cache,
            DatabaseSql,
            DatabaseNosql,
            ObjectStore,
            MessageQueue,
        ],
        Cache => &[DatabaseSql, DatabaseNosql],
        DatabaseSql => &[DatabaseSql],
        DatabaseNosql => &[DatabaseNosql],
        MessageQueue => &[AppServer],
        ObjectStore => &[],
    }
}

pub fn validate_connection(source: ComponentType, target: ComponentType) -> ConnectionCheck {
    let allowed = allowed_targets(source);
    if allowed.contains(&target) {
        return ConnectionCheck {
            valid: true,
            message: None,
            suggestion: None,
        };
    }

    let suggestion = if allowed.is_empty() {
        format!("{} is terminal and accepts no outgoing connections", source)
    } else {
        let names = allowed
            .iter()
            .map(|ty| ty.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} can connect to: {}", source, names)
    };

    ConnectionCheck {
        valid: false,
        message: Some(format!("{} cannot connect to {}", source, target)),
        suggestion: Some(suggestion),
    }
}

pub fn default_protocol(source: ComponentType, target: ComponentType) -> Protocol {
    match (source, target) {
        (_, DatabaseSql | DatabaseNosql | Cache | MessageQueue) => Protocol::Tcp,
        (AppServer, AppServer) => Protocol::Grpc,
        _ => Protocol::Http,
    }
}

/// Soft advice about a protocol choice. Never blocks a connection.
pub fn protocol_warning(
    source: ComponentType,
    target: ComponentType,
    protocol: Protocol,
) -> Option<String> {
    match (target, protocol) {
        (DatabaseSql | DatabaseNosql, Protocol::Tcp) | (Cache, Protocol::Tcp) => None,
        (DatabaseSql | DatabaseNosql, _) => Some(format!(
            "databases should use tcp (got {} from {})",
            protocol, source
        )),
        (Cache, _) => Some(format!("caches should use tcp (got {})", protocol)),
        (_, Protocol::Udp) => Some(format!(
            "udp drops packets; {} -> {} request traffic should use a tcp-based protocol",
            source, target
        )),
        (ObjectStore, Protocol::Websocket) => {
            Some("object stores are accessed over http, not websocket".to_string())
        }
        (MessageQueue, Protocol::Websocket) => {
            Some("message queues usually speak tcp, not websocket".to_string())
        }
        (_, Protocol::Custom) => Some(format!(
            "custom protocol between {} and {} is costed with generic estimates",
            source, target
        )),
        _ => None,
    }
}

/// Dense, index-based view of a validated graph.
///
/// Building the view is the hard validation step: duplicate ids, dangling
/// edges and a missing entry node are rejected here.
#[derive(Clone, Debug)]
pub struct GraphView {
    pub ids: Vec<String>,
    pub types: Vec<ComponentType>,
    pub index: HashMap<String, usize>,
    pub edge_ids: Vec<String>,
    pub edge_source: Vec<usize>,
    pub edge_target: Vec<usize>,
    /// Edge indices leaving each node that carry request flow.
    pub outgoing: Vec<Vec<usize>>,
    pub incoming: Vec<Vec<usize>>,
    pub entries: Vec<usize>,
}

impl GraphView {
    pub fn build(graph: &Graph) -> Result<Self, ValidationError> {
        let mut index = HashMap::with_capacity(graph.nodes.len());
        let mut ids = Vec::with_capacity(graph.nodes.len());
        let mut types = Vec::with_capacity(graph.nodes.len());
        for (idx, node) in graph.nodes.iter().enumerate() {
            if node.id.trim().is_empty() {
                return Err(ValidationError::EmptyNodeId);
            }
            if index.insert(node.id.clone(), idx).is_some() {
                return Err(ValidationError::DuplicateNodeId(node.id.clone()));
            }
            ids.push(node.id.clone());
            types.push(node.component_type());
        }

        let mut seen_edges = HashSet::with_capacity(graph.edges.len());
        let mut edge_ids = Vec::with_capacity(graph.edges.len());
        let mut edge_source = Vec::with_capacity(graph.edges.len());
        let mut edge_target = Vec::with_capacity(graph.edges.len());
        let mut outgoing = vec![Vec::new(); ids.len()];
        let mut incoming = vec![Vec::new(); ids.len()];
        for (edge_idx, edge) in graph.edges.iter().enumerate() {
            if !seen_edges.insert(edge.id.as_str()) {
                return Err(ValidationError::DuplicateEdgeId(edge.id.clone()));
            }
            let source = *index
                .get(&edge.source_id)
                .ok_or_else(|| ValidationError::DanglingEdge {
                    edge: edge.id.clone(),
                    node: edge.source_id.clone(),
                })?;
            let target = *index
                .get(&edge.target_id)
                .ok_or_else(|| ValidationError::DanglingEdge {
                    edge: edge.id.clone(),
                    node: edge.target_id.clone(),
                })?;
            edge_ids.push(edge.id.clone());
            edge_source.push(source);
            edge_target.push(target);
            if !types[source].is_terminal() {
                outgoing[source].push(edge_idx);
                incoming[target].push(edge_idx);
            }
        }

        let entries: Vec<usize> = (0..ids.len()).filter(|&idx| types[idx].is_entry()).collect();
        if entries.is_empty() {
            return Err(ValidationError::NoEntryNodes);
        }

        Ok(Self {
            ids,
            types,
            index,
            edge_ids,
            edge_source,
            edge_target,
            outgoing,
            incoming,
            entries,
        })
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Nodes on the longest request path from any entry, counting the entry.
    /// Cycles saturate at the node count.
    pub fn request_depth(&self) -> usize {
        let count = self.node_count();
        let mut depth = vec![0usize; count];
        for &entry in &self.entries {
            depth[entry] = 1;
        }

        for _ in 0..count {
            let mut changed = false;
            for source in 0..count {
                if depth[source] == 0 {
                    continue;
                }
                let next = (depth[source] + 1).min(count);
                for &edge in &self.outgoing[source] {
                    let target = self.edge_target[edge];
                    if next > depth[target] {
                        depth[target] = next;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        depth.into_iter().max().unwrap_or(0)
    }

    /// Terminal nodes reachable from `start` over request-flow edges, optionally
    /// with one node removed from the graph.
    pub fn reachable_terminals(&self, start: usize, removed: Option<usize>) -> BTreeSet<usize> {
        let mut blocked = vec![false; self.node_count()];
        if let Some(idx) = removed {
            blocked[idx] = true;
        }
        self.reachable_terminals_avoiding(start, &blocked)
    }

    /// Same walk as [`GraphView::reachable_terminals`] with any set of nodes
    /// taken out.
    pub fn reachable_terminals_avoiding(&self, start: usize, blocked: &[bool]) -> BTreeSet<usize> {
        let mut terminals = BTreeSet::new();
        if blocked[start] {
            return terminals;
        }
        let mut visited = vec![false; self.node_count()];
        let mut queue = VecDeque::new();
        visited[start] = true;
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            if self.types[current].is_terminal() {
                terminals.insert(current);
                continue;
            }
            for &edge in &self.outgoing[current] {
                let next = self.edge_target[edge];
                if blocked[next] || visited[next] {
                    continue;
                }
                visited[next] = true;
                queue.push_back(next);
            }
        }

        terminals
    }
}

pub fn validate_graph(graph: &Graph) -> Result<(), ValidationError> {
    GraphView::build(graph).map(|_| ())
}

/// Soft findings for a structurally valid graph: illegal connections, protocol
/// warnings and entry nodes that cannot reach any storage.
pub fn preflight(graph: &Graph, view: &GraphView) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for (edge_idx, edge) in graph.edges.iter().enumerate() {
        let source = view.types[view.edge_source[edge_idx]];
        let target = view.types[view.edge_target[edge_idx]];
        let check = validate_connection(source, target);
        if !check.valid {
            let mut diagnostic = Diagnostic::for_edge(
                edge.id.clone(),
                DiagnosticKind::IllegalConnection,
                Severity::Warning,
                check.message.unwrap_or_default(),
            );
            diagnostic.suggestion = check.suggestion;
            diagnostics.push(diagnostic);
            continue;
        }
        if let Some(warning) = protocol_warning(source, target, edge.protocol) {
            diagnostics.push(
                Diagnostic::for_edge(
                    edge.id.clone(),
                    DiagnosticKind::ProtocolMismatch,
                    Severity::Info,
                    warning,
                )
                .with_suggestion(format!(
                    "use {}",
                    default_protocol(source, target)
                )),
            );
        }
    }

    for &entry in &view.entries {
        if view.reachable_terminals(entry, None).is_empty() {
            diagnostics.push(
                Diagnostic::for_node(
                    view.ids[entry].clone(),
                    DiagnosticKind::Unreachable,
                    Severity::Critical,
                    format!("entry '{}' cannot reach any storage node", view.ids[entry]),
                )
                .with_suggestion("connect the request path to a database or object store"),
            );
        }
    }

    diagnostics
}

/// Structural single points of failure, independent of load.
///
/// A node is flagged when removing it makes some entry lose reachability to a
/// terminal it could previously reach. Results are sorted by node id so input
/// order never changes the outcome.
pub fn find_spofs(view: &GraphView) -> Vec<Diagnostic> {
    let baseline: Vec<(usize, BTreeSet<usize>)> = view
        .entries
        .iter()
        .map(|&entry| (entry, view.reachable_terminals(entry, None)))
        .collect();

    let mut candidates: Vec<usize> = (0..view.node_count())
        .filter(|&idx| !view.types[idx].is_entry() && !view.types[idx].is_terminal())
        .collect();
    candidates.sort_by(|a, b| view.ids[*a].cmp(&view.ids[*b]));

    candidates
        .into_iter()
        .filter(|&candidate| {
            baseline.iter().any(|(entry, reached)| {
                !reached.is_empty() && view.reachable_terminals(*entry, Some(candidate)) != *reached
            })
        })
        .map(|idx| {
            let id = &view.ids[idx];
            Diagnostic::for_node(
                id.clone(),
                DiagnosticKind::SinglePointOfFailure,
                Severity::Warning,
                format!(
                    "{} '{}' is a single point of failure: removing it cuts clients off from storage",
                    view.types[idx], id
                ),
            )
            .with_suggestion(format!(
                "add a redundant {} on a parallel path",
                view.types[idx]
            ))
        })
        .collect()
}
