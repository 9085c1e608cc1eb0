use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::ComponentType;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Overloaded,
    HighUtilization,
    RateLimited,
    PacketLoss,
    EdgeSaturated,
    DeadEnd,
    Offline,
    Unreachable,
    SinglePointOfFailure,
    IllegalConnection,
    ProtocolMismatch,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Diagnostic {
    pub fn for_node(
        node_id: impl Into<String>,
        kind: DiagnosticKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node_id: Some(node_id.into()),
            edge_id: None,
            kind,
            severity,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn for_edge(
        edge_id: impl Into<String>,
        kind: DiagnosticKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node_id: None,
            edge_id: Some(edge_id.into()),
            kind,
            severity,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioMetrics {
    pub rps: f64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub response_time_ms: f64,
    pub ttfb_ms: f64,
    pub error_rate: f64,
    pub estimated_cost_monthly: f64,
    pub bottlenecks: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeUtilization {
    pub node_id: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub incoming_rps: f64,
    pub effective_capacity_rps: Option<f64>,
    pub utilization_pct: f64,
    pub dropped_rps: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub name: String,
    pub metrics: ScenarioMetrics,
    pub nodes: Vec<NodeUtilization>,
    pub diagnostics: Vec<Diagnostic>,
    pub passed: bool,
    pub score: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_thresholds: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulationOutput {
    pub scenarios: Vec<ScenarioResult>,
    pub spof_diagnostics: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preflight: Vec<Diagnostic>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSimSummary {
    pub utilization_pct: f64,
    pub queue_depth: u64,
    pub error_count: u64,
    pub overloaded: bool,
    pub circuit_open: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveMetrics {
    /// Completed requests per simulated second over the metrics window.
    pub rps: f64,
    /// Arrivals per simulated second over the same window, load factor
    /// included.
    pub offered_rps: f64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub estimated_cost_monthly: f64,
    pub nodes: BTreeMap<String, NodeSimSummary>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open { remaining_ticks: u32 },
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetailMetrics {
    pub node_id: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub effective_capacity_rps: Option<f64>,
    pub utilization_pct: f64,
    pub queue_depth: u64,
    pub admitted_total: u64,
    pub dropped_total: u64,
    pub completed_total: u64,
    pub throughput_rps: f64,
    pub avg_hop_latency_ms: f64,
    pub circuit: CircuitState,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestParticle {
    pub id: u64,
    pub edge_id: String,
    pub source_id: String,
    pub target_id: String,
    pub t: f64,
    pub count: u32,
    pub health: Health,
    pub traced: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TickFrame {
    pub epoch: u64,
    pub tick: u64,
    pub particles: Vec<RequestParticle>,
    pub metrics: LiveMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<NodeDetailMetrics>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HopStatus {
    Forwarded,
    Completed,
    Dropped { reason: String },
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraceHop {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    pub arrival_ms: f64,
    pub processing_ms: f64,
    pub departure_ms: f64,
    #[serde(flatten)]
    pub status: HopStatus,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TracedRequest {
    pub request_id: u64,
    pub entry_id: String,
    pub hops: Vec<TraceHop>,
    #[serde(flatten)]
    pub status: HopStatus,
    pub total_ms: f64,
}
