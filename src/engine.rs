//! Batch scenario engine.
//!
//! Each scenario is propagated as a tick wavefront: on every tick a node sees
//! the entry offer plus whatever its upstream forwarded on the previous tick,
//! admits up to its capacity and forwards the rest along its routing split.
//! A scenario runs at least as many ticks as its longest request path so the
//! wavefront reaches storage. Metrics are read from the final tick, latency
//! from the enumerated request paths.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::algorithms::{build_strategy, Downstream};
use crate::capacity::{
    absorb_fraction, admission_ratio, classify, congestion_utilization, edge_capacity, edge_loss,
    effective_capacity, estimate_graph_cost, forwards_async, is_rate_limited, processing_ms,
    protocol_profile, retry_load_factor, round_to, utilization, LoadClass,
};
use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::models::{ArrivalRate, Graph, Protocol, Scenario, Thresholds};
use crate::state::{
    Diagnostic, DiagnosticKind, NodeUtilization, ScenarioMetrics, ScenarioResult, Severity,
    SimulationOutput,
};
use crate::topology::{find_spofs, preflight, GraphView};

/// Reported utilization is capped so a zero-capacity node still serializes to
/// a finite number.
const MAX_REPORTED_UTILIZATION_PCT: f64 = 10_000.0;

pub struct BatchEngine<'a> {
    graph: &'a Graph,
    view: GraphView,
    settings: EngineSettings,
}

struct NodeModel {
    capacity: Option<f64>,
    absorb: f64,
    processing_ms: f64,
    forwards_async: bool,
    terminal: bool,
    /// Fractions over the node's request-flow edges, in `GraphView::outgoing`
    /// order.
    split: Vec<f64>,
}

struct EdgeModel {
    protocol: Protocol,
    loss: f64,
    load_per_request: f64,
    capacity: Option<f64>,
}

/// Per-tick rates. Only the final tick is kept.
struct FlowSnapshot {
    requests: Vec<f64>,
    load: Vec<f64>,
    utilization: Vec<f64>,
    admission: Vec<f64>,
    dropped: Vec<f64>,
    dead_end: Vec<f64>,
    edge_lost: Vec<f64>,
    edge_excess: Vec<f64>,
    completed: f64,
}

impl FlowSnapshot {
    fn new(nodes: usize, edges: usize) -> Self {
        Self {
            requests: vec![0.0; nodes],
            load: vec![0.0; nodes],
            utilization: vec![0.0; nodes],
            admission: vec![1.0; nodes],
            dropped: vec![0.0; nodes],
            dead_end: vec![0.0; nodes],
            edge_lost: vec![0.0; edges],
            edge_excess: vec![0.0; edges],
            completed: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
struct LatencyPath {
    weight: f64,
    fixed_ms: f64,
    jitter_means_ms: Vec<f64>,
    overhead_ms: f64,
    transfer_ms: f64,
}

struct PathCursor {
    node: usize,
    depth: usize,
    path: LatencyPath,
}

#[derive(Default)]
struct LatencyStats {
    avg_ms: f64,
    p50_ms: f64,
    p95_ms: f64,
    p99_ms: f64,
    ttfb_ms: f64,
    response_ms: f64,
}

impl<'a> BatchEngine<'a> {
    /// Validates the graph. A malformed graph never yields a result.
    pub fn new(graph: &'a Graph, settings: EngineSettings) -> Result<Self> {
        let view = GraphView::build(graph)?;
        Ok(Self {
            graph,
            view,
            settings,
        })
    }

    pub fn run(&self, scenarios: &[Scenario]) -> Result<SimulationOutput> {
        for scenario in scenarios {
            self.validate_scenario(scenario)?;
        }

        info!(
            nodes = self.view.node_count(),
            edges = self.view.edge_ids.len(),
            scenarios = scenarios.len(),
            "batch run starting"
        );

        let preflight = preflight(self.graph, &self.view);
        let cost = estimate_graph_cost(self.graph);
        let results = scenarios
            .iter()
            .map(|scenario| self.run_scenario(scenario, cost))
            .collect::<Vec<_>>();
        let spof_diagnostics = find_spofs(&self.view);
        if !spof_diagnostics.is_empty() {
            warn!(count = spof_diagnostics.len(), "single points of failure found");
        }

        Ok(SimulationOutput {
            scenarios: results,
            spof_diagnostics,
            preflight,
        })
    }

    fn validate_scenario(&self, scenario: &Scenario) -> Result<()> {
        if scenario.name.trim().is_empty() {
            return Err(Error::EmptyScenarioName);
        }
        if scenario.duration_ticks == 0 {
            return Err(Error::ZeroDuration(scenario.name.clone()));
        }

        let invalid_rate = |rate: f64| !rate.is_finite() || rate < 0.0;
        match &scenario.arrival {
            ArrivalRate::Aggregate(rate) => {
                if invalid_rate(*rate) {
                    return Err(Error::InvalidArrivalRate {
                        scenario: scenario.name.clone(),
                        rate: *rate,
                    });
                }
            }
            ArrivalRate::PerEntry(rates) => {
                for (id, rate) in rates {
                    match self.view.index.get(id) {
                        Some(&idx) if self.view.types[idx].is_entry() => {}
                        _ => {
                            return Err(Error::UnknownScenarioEntry {
                                scenario: scenario.name.clone(),
                                node: id.clone(),
                            })
                        }
                    }
                    if invalid_rate(*rate) {
                        return Err(Error::InvalidArrivalRate {
                            scenario: scenario.name.clone(),
                            rate: *rate,
                        });
                    }
                }
            }
        }

        for id in &scenario.offline {
            if !self.view.index.contains_key(id) {
                return Err(Error::UnknownNode(id.clone()));
            }
        }

        Ok(())
    }

    fn offered_load(&self, scenario: &Scenario) -> Vec<f64> {
        let mut offer = vec![0.0; self.view.node_count()];
        match &scenario.arrival {
            ArrivalRate::Aggregate(rate) => {
                let share = rate / self.view.entries.len() as f64;
                for &entry in &self.view.entries {
                    offer[entry] = share;
                }
            }
            ArrivalRate::PerEntry(rates) => {
                for (id, rate) in rates {
                    if let Some(&idx) = self.view.index.get(id) {
                        offer[idx] += rate;
                    }
                }
            }
        }
        offer
    }

    fn build_models(&self, offline: &[bool]) -> (Vec<NodeModel>, Vec<EdgeModel>) {
        let nodes = &self.graph.nodes;
        let capacities: Vec<Option<f64>> = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| {
                if offline[idx] {
                    Some(0.0)
                } else {
                    effective_capacity(&node.config)
                }
            })
            .collect();

        let edges: Vec<EdgeModel> = self
            .graph
            .edges
            .iter()
            .enumerate()
            .map(|(idx, edge)| {
                let target = &nodes[self.view.edge_target[idx]].config;
                let profile = protocol_profile(edge.protocol);
                EdgeModel {
                    protocol: edge.protocol,
                    loss: edge_loss(edge.protocol, target),
                    load_per_request: retry_load_factor(edge.protocol, target)
                        / profile.capacity_multiplier,
                    capacity: edge_capacity(edge.throughput_qps, edge.protocol),
                }
            })
            .collect();

        let models = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| {
                let downstream: Vec<Downstream> = self.view.outgoing[idx]
                    .iter()
                    .map(|&edge| {
                        let target = self.view.edge_target[edge];
                        let mut candidate = Downstream::new(edge, capacities[target]);
                        candidate.latency_ms = protocol_profile(edges[edge].protocol).overhead_ms
                            + processing_ms(&nodes[target].config);
                        candidate
                    })
                    .collect();
                NodeModel {
                    capacity: capacities[idx],
                    absorb: absorb_fraction(&node.config),
                    processing_ms: processing_ms(&node.config),
                    forwards_async: forwards_async(&node.config),
                    terminal: self.view.types[idx].is_terminal(),
                    split: build_strategy(&node.config).split(&downstream),
                }
            })
            .collect();

        (models, edges)
    }

    fn propagate(
        &self,
        models: &[NodeModel],
        edges: &[EdgeModel],
        offer: &[f64],
        ticks: u32,
    ) -> FlowSnapshot {
        let node_count = models.len();
        let edge_count = edges.len();
        let mut sync_prev = vec![0.0; edge_count];
        let mut async_prev = vec![0.0; edge_count];
        let mut last = FlowSnapshot::new(node_count, edge_count);

        for _ in 0..ticks {
            let mut snap = FlowSnapshot::new(node_count, edge_count);
            let mut sync_in = offer.to_vec();
            let mut async_in = vec![0.0; node_count];
            let mut load = offer.to_vec();

            for edge in 0..edge_count {
                let arriving = sync_prev[edge] + async_prev[edge];
                if arriving <= 0.0 {
                    continue;
                }
                let target = self.view.edge_target[edge];
                sync_in[target] += sync_prev[edge];
                async_in[target] += async_prev[edge];
                load[target] += arriving * edges[edge].load_per_request;
            }

            let mut sync_next = vec![0.0; edge_count];
            let mut async_next = vec![0.0; edge_count];

            for (idx, model) in models.iter().enumerate() {
                let ratio = admission_ratio(load[idx], model.capacity);
                let requests = sync_in[idx] + async_in[idx];
                snap.requests[idx] = requests;
                snap.load[idx] = load[idx];
                snap.utilization[idx] = utilization(load[idx], model.capacity);
                snap.admission[idx] = ratio;

                let admitted_sync = sync_in[idx] * ratio;
                let admitted_async = async_in[idx] * ratio;
                snap.dropped[idx] = requests - admitted_sync - admitted_async;

                let (forward_sync, forward_async) = if model.terminal {
                    snap.completed += admitted_sync;
                    (0.0, 0.0)
                } else if model.forwards_async {
                    // Producers are acknowledged on enqueue.
                    snap.completed += admitted_sync;
                    (0.0, admitted_sync + admitted_async)
                } else {
                    snap.completed += admitted_sync * model.absorb;
                    let keep = 1.0 - model.absorb;
                    (admitted_sync * keep, admitted_async * keep)
                };

                if forward_sync + forward_async <= 0.0 {
                    continue;
                }
                let outgoing = &self.view.outgoing[idx];
                if outgoing.is_empty() {
                    snap.dead_end[idx] = forward_sync + forward_async;
                    continue;
                }

                for (slot, &edge) in outgoing.iter().enumerate() {
                    let fraction = model.split.get(slot).copied().unwrap_or(0.0);
                    let mut sync_flow = forward_sync * fraction;
                    let mut async_flow = forward_async * fraction;
                    let total = sync_flow + async_flow;
                    if total <= 0.0 {
                        continue;
                    }
                    if let Some(limit) = edges[edge].capacity {
                        if total > limit {
                            let keep = limit / total;
                            snap.edge_excess[edge] = total - limit;
                            sync_flow *= keep;
                            async_flow *= keep;
                        }
                    }
                    let loss = edges[edge].loss;
                    snap.edge_lost[edge] = (sync_flow + async_flow) * loss;
                    sync_next[edge] = sync_flow * (1.0 - loss);
                    async_next[edge] = async_flow * (1.0 - loss);
                }
            }

            sync_prev = sync_next;
            async_prev = async_next;
            last = snap;
        }

        last
    }

    fn enumerate_paths(
        &self,
        models: &[NodeModel],
        edges: &[EdgeModel],
        flow: &FlowSnapshot,
        offer: &[f64],
    ) -> Vec<LatencyPath> {
        let mut paths = Vec::new();
        let total: f64 = offer.iter().sum();
        if total <= 0.0 {
            return paths;
        }

        let floor = self.settings.path_probability_floor;
        let mut stack = Vec::new();
        for &entry in &self.view.entries {
            if offer[entry] <= 0.0 {
                continue;
            }
            stack.push(PathCursor {
                node: entry,
                depth: 0,
                path: LatencyPath {
                    weight: offer[entry] / total * flow.admission[entry],
                    fixed_ms: models[entry].processing_ms,
                    jitter_means_ms: Vec::new(),
                    overhead_ms: 0.0,
                    transfer_ms: 0.0,
                },
            });
        }

        while let Some(cursor) = stack.pop() {
            if paths.len() >= self.settings.max_paths {
                debug!(max_paths = self.settings.max_paths, "path enumeration truncated");
                break;
            }
            let model = &models[cursor.node];
            let mut path = cursor.path;
            if model.terminal || model.forwards_async {
                paths.push(path);
                continue;
            }
            if model.absorb > 0.0 {
                let mut hit = path.clone();
                hit.weight *= model.absorb;
                if hit.weight >= floor {
                    paths.push(hit);
                }
                path.weight *= 1.0 - model.absorb;
            }
            if cursor.depth >= self.settings.max_path_depth {
                continue;
            }

            let congestion = self.settings.congestion_factor_ms
                * congestion_utilization(
                    &self.graph.nodes[cursor.node].config,
                    flow.utilization[cursor.node],
                );
            for (slot, &edge) in self.view.outgoing[cursor.node].iter().enumerate() {
                let target = self.view.edge_target[edge];
                let fraction = model.split.get(slot).copied().unwrap_or(0.0);
                let weight =
                    path.weight * fraction * (1.0 - edges[edge].loss) * flow.admission[target];
                if weight < floor {
                    continue;
                }
                let profile = protocol_profile(edges[edge].protocol);
                let mut next = path.clone();
                next.weight = weight;
                next.fixed_ms += profile.overhead_ms + models[target].processing_ms;
                next.jitter_means_ms.push(congestion);
                next.overhead_ms += profile.overhead_ms;
                next.transfer_ms += profile.transfer_ms;
                stack.push(PathCursor {
                    node: target,
                    depth: cursor.depth + 1,
                    path: next,
                });
            }
        }

        paths
    }

    fn latency_stats(&self, paths: &[LatencyPath], rng: &mut StdRng) -> LatencyStats {
        let total_weight: f64 = paths.iter().map(|path| path.weight).sum();
        if paths.is_empty() || total_weight <= 0.0 {
            return LatencyStats::default();
        }

        let avg_ms = weighted_mean(paths, total_weight, |path| {
            path.fixed_ms + path.jitter_means_ms.iter().sum::<f64>()
        });
        let return_ms = weighted_mean(paths, total_weight, |path| path.overhead_ms);
        let transfer_ms = weighted_mean(paths, total_weight, |path| path.transfer_ms);

        let mut cumulative = Vec::with_capacity(paths.len());
        let mut running = 0.0;
        for path in paths {
            running += path.weight;
            cumulative.push(running);
        }

        let mut samples = Vec::with_capacity(self.settings.latency_samples);
        for _ in 0..self.settings.latency_samples {
            let roll = rng.gen::<f64>() * total_weight;
            let idx = cumulative
                .partition_point(|bound| *bound <= roll)
                .min(paths.len() - 1);
            let path = &paths[idx];
            let mut latency = path.fixed_ms;
            for &mean in &path.jitter_means_ms {
                if mean > 0.0 {
                    latency += -mean * (1.0 - rng.gen::<f64>()).ln();
                }
            }
            samples.push(latency);
        }
        samples.sort_by(|a, b| a.total_cmp(b));

        let ttfb_ms = avg_ms + return_ms;
        LatencyStats {
            avg_ms,
            p50_ms: nearest_rank_percentile(&samples, 50.0),
            p95_ms: nearest_rank_percentile(&samples, 95.0),
            p99_ms: nearest_rank_percentile(&samples, 99.0),
            ttfb_ms,
            response_ms: ttfb_ms + transfer_ms,
        }
    }

    fn run_scenario(&self, scenario: &Scenario, cost: f64) -> ScenarioResult {
        let mut offline = vec![false; self.view.node_count()];
        for id in &scenario.offline {
            if let Some(&idx) = self.view.index.get(id) {
                offline[idx] = true;
            }
        }

        let offer = self.offered_load(scenario);
        let (models, edges) = self.build_models(&offline);
        let ticks = scenario
            .duration_ticks
            .max(u32::try_from(self.view.request_depth()).unwrap_or(u32::MAX));
        let flow = self.propagate(&models, &edges, &offer, ticks);
        let paths = self.enumerate_paths(&models, &edges, &flow, &offer);
        let mut rng = StdRng::seed_from_u64(scenario_seed(self.settings.seed, &scenario.name));
        let latency = self.latency_stats(&paths, &mut rng);

        let offered: f64 = offer.iter().sum();
        let error_rate = if offered <= 0.0 {
            0.0
        } else {
            (1.0 - flow.completed / offered).clamp(0.0, 1.0)
        };

        let thresholds = &self.settings.thresholds;
        let bottlenecks = (0..self.view.node_count())
            .filter(|&idx| {
                !offline[idx]
                    && classify(flow.utilization[idx], thresholds) == LoadClass::Overloaded
            })
            .map(|idx| self.view.ids[idx].clone())
            .collect::<Vec<_>>();

        let metrics = ScenarioMetrics {
            rps: round_to(flow.completed, 2),
            avg_latency_ms: round_to(latency.avg_ms, 2),
            p50_latency_ms: round_to(latency.p50_ms, 2),
            p95_latency_ms: round_to(latency.p95_ms, 2),
            p99_latency_ms: round_to(latency.p99_ms, 2),
            response_time_ms: round_to(latency.response_ms, 2),
            ttfb_ms: round_to(latency.ttfb_ms, 2),
            error_rate: round_to(error_rate, 6),
            estimated_cost_monthly: cost,
            bottlenecks,
        };

        let nodes = (0..self.view.node_count())
            .map(|idx| NodeUtilization {
                node_id: self.view.ids[idx].clone(),
                component_type: self.view.types[idx],
                incoming_rps: round_to(flow.requests[idx], 2),
                effective_capacity_rps: models[idx].capacity,
                utilization_pct: round_to(
                    (flow.utilization[idx] * 100.0).min(MAX_REPORTED_UTILIZATION_PCT),
                    2,
                ),
                dropped_rps: round_to(flow.dropped[idx] + flow.dead_end[idx], 2),
            })
            .collect();

        let diagnostics = self.scenario_diagnostics(&models, &edges, &flow, &offline, &offer);
        let failed_thresholds = failed_thresholds(&scenario.thresholds, &metrics);
        let score = score(failed_thresholds.len(), &diagnostics);

        debug!(
            scenario = %scenario.name,
            ticks,
            rps = metrics.rps,
            error_rate = metrics.error_rate,
            p99_ms = metrics.p99_latency_ms,
            paths = paths.len(),
            "scenario evaluated"
        );

        ScenarioResult {
            name: scenario.name.clone(),
            metrics,
            nodes,
            diagnostics,
            passed: failed_thresholds.is_empty(),
            score,
            failed_thresholds,
        }
    }

    fn scenario_diagnostics(
        &self,
        models: &[NodeModel],
        edges: &[EdgeModel],
        flow: &FlowSnapshot,
        offline: &[bool],
        offer: &[f64],
    ) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let thresholds = &self.settings.thresholds;

        for (idx, node) in self.graph.nodes.iter().enumerate() {
            let ty = self.view.types[idx];
            if offline[idx] {
                diagnostics.push(Diagnostic::for_node(
                    node.id.clone(),
                    DiagnosticKind::Offline,
                    Severity::Info,
                    format!("{} '{}' is offline for this scenario", ty, node.id),
                ));
                continue;
            }

            let capacity = models[idx].capacity.unwrap_or(0.0);
            match classify(flow.utilization[idx], thresholds) {
                LoadClass::Overloaded => {
                    let suggestion = if node.config.scaling().is_some() {
                        "add instances or raise per-instance capacity"
                    } else {
                        "reduce the traffic routed to this component"
                    };
                    diagnostics.push(
                        Diagnostic::for_node(
                            node.id.clone(),
                            DiagnosticKind::Overloaded,
                            Severity::Critical,
                            format!(
                                "{} '{}' is overloaded: {:.0} rps offered against {:.0} rps capacity",
                                ty, node.id, flow.load[idx], capacity
                            ),
                        )
                        .with_suggestion(suggestion),
                    );
                    if is_rate_limited(&node.config) {
                        diagnostics.push(
                            Diagnostic::for_node(
                                node.id.clone(),
                                DiagnosticKind::RateLimited,
                                Severity::Info,
                                format!(
                                    "rate limit of {:.0} rps is the ceiling for '{}'",
                                    capacity, node.id
                                ),
                            )
                            .with_suggestion("raise the rate limit if the backend can take it"),
                        );
                    }
                }
                LoadClass::High => diagnostics.push(
                    Diagnostic::for_node(
                        node.id.clone(),
                        DiagnosticKind::HighUtilization,
                        Severity::Warning,
                        format!(
                            "{} '{}' is running at {:.0}% utilization",
                            ty,
                            node.id,
                            flow.utilization[idx] * 100.0
                        ),
                    )
                    .with_suggestion("leave headroom for bursts by adding capacity"),
                ),
                LoadClass::Normal => {}
            }

            if flow.dead_end[idx] > 0.0 {
                diagnostics.push(
                    Diagnostic::for_node(
                        node.id.clone(),
                        DiagnosticKind::DeadEnd,
                        Severity::Warning,
                        format!(
                            "{} '{}' has no downstream connection; {:.2} rps stop here",
                            ty, node.id, flow.dead_end[idx]
                        ),
                    )
                    .with_suggestion(format!(
                        "connect '{}' to a component that can serve the request",
                        node.id
                    )),
                );
            }
        }

        for (idx, edge) in self.graph.edges.iter().enumerate() {
            if flow.edge_excess[idx] > 0.0 {
                diagnostics.push(
                    Diagnostic::for_edge(
                        edge.id.clone(),
                        DiagnosticKind::EdgeSaturated,
                        Severity::Warning,
                        format!(
                            "edge '{}' carries {:.0} qps over its {:.0} qps limit",
                            edge.id,
                            flow.edge_excess[idx],
                            edges[idx].capacity.unwrap_or(0.0)
                        ),
                    )
                    .with_suggestion("raise throughputQps or use a protocol with more headroom"),
                );
            }
            if flow.edge_lost[idx] > 0.0 {
                diagnostics.push(
                    Diagnostic::for_edge(
                        edge.id.clone(),
                        DiagnosticKind::PacketLoss,
                        Severity::Warning,
                        format!(
                            "edge '{}' ({}) loses {:.2} rps to packet loss",
                            edge.id, edges[idx].protocol, flow.edge_lost[idx]
                        ),
                    )
                    .with_suggestion(
                        "enable automatic retries on the target or use a tcp-based protocol",
                    ),
                );
            }
        }

        for &entry in &self.view.entries {
            if offer[entry] <= 0.0 {
                continue;
            }
            if self
                .view
                .reachable_terminals_avoiding(entry, offline)
                .is_empty()
            {
                diagnostics.push(
                    Diagnostic::for_node(
                        self.view.ids[entry].clone(),
                        DiagnosticKind::Unreachable,
                        Severity::Critical,
                        format!(
                            "traffic from '{}' cannot reach any storage node",
                            self.view.ids[entry]
                        ),
                    )
                    .with_suggestion("connect the request path to a database or object store"),
                );
            }
        }

        diagnostics
    }
}

/// Runs every scenario against the graph.
///
/// Fails only on malformed input: an invalid graph or an invalid scenario.
/// Overload and structural risk are reported as diagnostics.
pub fn run_batch(
    graph: &Graph,
    scenarios: &[Scenario],
    settings: &EngineSettings,
) -> Result<SimulationOutput> {
    let engine = BatchEngine::new(graph, settings.clone())?;
    engine.run(scenarios)
}

pub fn run_batch_default(graph: &Graph, scenarios: &[Scenario]) -> Result<SimulationOutput> {
    run_batch(graph, scenarios, &EngineSettings::default())
}

/// Names of violated thresholds. Absent thresholds never fail.
pub fn failed_thresholds(thresholds: &Thresholds, metrics: &ScenarioMetrics) -> Vec<String> {
    let availability = 1.0 - metrics.error_rate;
    let checks = [
        (
            "maxP99LatencyMs",
            thresholds
                .max_p99_latency_ms
                .map(|max| metrics.p99_latency_ms > max),
        ),
        (
            "maxAvgLatencyMs",
            thresholds
                .max_avg_latency_ms
                .map(|max| metrics.avg_latency_ms > max),
        ),
        (
            "maxErrorRate",
            thresholds.max_error_rate.map(|max| metrics.error_rate > max),
        ),
        (
            "minAvailability",
            thresholds.min_availability.map(|min| availability < min),
        ),
        ("minRps", thresholds.min_rps.map(|min| metrics.rps < min)),
        (
            "maxCostMonthly",
            thresholds
                .max_cost_monthly
                .map(|max| metrics.estimated_cost_monthly > max),
        ),
    ];

    checks
        .into_iter()
        .filter(|(_, violated)| *violated == Some(true))
        .map(|(name, _)| name.to_string())
        .collect()
}

pub fn score(failed_thresholds: usize, diagnostics: &[Diagnostic]) -> u32 {
    let critical = diagnostics
        .iter()
        .filter(|diag| diag.severity == Severity::Critical)
        .count();
    let warnings = diagnostics
        .iter()
        .filter(|diag| diag.severity == Severity::Warning)
        .count();
    let penalty = 20 * failed_thresholds + 10 * critical + 3 * warnings;
    100_usize.saturating_sub(penalty) as u32
}

fn weighted_mean(
    paths: &[LatencyPath],
    total_weight: f64,
    value: impl Fn(&LatencyPath) -> f64,
) -> f64 {
    paths
        .iter()
        .map(|path| path.weight * value(path))
        .sum::<f64>()
        / total_weight
}

/// Mixes the run seed with an FNV-1a hash of the scenario name, so a
/// scenario's samples do not depend on which scenarios ran alongside it.
fn scenario_seed(seed: u64, name: &str) -> u64 {
    let hash = name.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    });
    seed ^ hash
}

fn nearest_rank_percentile(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}
