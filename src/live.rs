//! Live tick engine.
//!
//! One owned struct holds every piece of mutable simulation state. Callers
//! drive it tick by tick; the worker in [`crate::protocol`] does so on a
//! wall-clock cadence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info};

use crate::algorithms::{build_strategy, Downstream, RoutingStrategy, SelectionContext};
use crate::capacity::{
    absorb_fraction, circuit_breaker_enabled, classify, congestion_utilization, edge_latency_ms,
    edge_loss, effective_capacity, estimate_graph_cost, forwards_async, processing_ms,
    protocol_profile, retry_load_factor, round_to, LoadClass, LoadThresholds,
};
use crate::config::{EngineSettings, LiveSettings};
use crate::error::{Error, Result};
use crate::models::{ComponentConfig, Edge, Graph, Node, Protocol, RateLimitStrategy};
use crate::state::{
    CircuitState, Health, HopStatus, LiveMetrics, NodeDetailMetrics, NodeSimSummary,
    RequestParticle, TickFrame, TraceHop, TracedRequest,
};
use crate::topology::GraphView;

/// Demand ratios above this are treated as fully saturated.
const MAX_DEMAND_RATIO: f64 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LivePhase {
    Idle,
    Running,
    Paused,
}

/// Everything one tick produces.
#[derive(Clone, Debug, PartialEq)]
pub struct TickOutput {
    pub frame: TickFrame,
    pub traces: Vec<TracedRequest>,
}

struct LiveNode {
    node: Node,
    outgoing: Vec<usize>,
    terminal: bool,
    strategy: Box<dyn RoutingStrategy>,
    ema: f64,
    circuit_remaining: u32,
    budget: f64,
    carry: f64,
    demand: f64,
    arrival_accum: f64,
    admitted_total: u64,
    dropped_total: u64,
    completed_total: u64,
    tick_admitted: u64,
    hop_latency_sum_ms: f64,
    hop_count: u64,
}

impl LiveNode {
    fn new(node: Node) -> Self {
        let strategy = build_strategy(&node.config);
        let terminal = node.component_type().is_terminal();
        Self {
            node,
            outgoing: Vec::new(),
            terminal,
            strategy,
            ema: 0.0,
            circuit_remaining: 0,
            budget: 0.0,
            carry: 0.0,
            demand: 0.0,
            arrival_accum: 0.0,
            admitted_total: 0,
            dropped_total: 0,
            completed_total: 0,
            tick_admitted: 0,
            hop_latency_sum_ms: 0.0,
            hop_count: 0,
        }
    }

    /// Keeps runtime state, swaps configuration. The routing policy is rebuilt
    /// only when the configured algorithm changes so round-robin cursors
    /// survive unrelated edits.
    fn reconfigure(mut self, node: Node) -> Self {
        let same_policy = self.node.component_type() == node.component_type()
            && self.node.config.algorithm() == node.config.algorithm();
        if !same_policy {
            self.strategy = build_strategy(&node.config);
        }
        self.terminal = node.component_type().is_terminal();
        self.node = node;
        self.outgoing.clear();
        self
    }

    fn capacity(&self) -> Option<f64> {
        if self.circuit_remaining > 0 {
            Some(0.0)
        } else {
            effective_capacity(&self.node.config)
        }
    }

    fn circuit(&self) -> CircuitState {
        if self.circuit_remaining > 0 {
            CircuitState::Open {
                remaining_ticks: self.circuit_remaining,
            }
        } else {
            CircuitState::Closed
        }
    }

    fn carries_budget(&self) -> bool {
        self.node.config.traffic_control().map_or(false, |control| {
            control.rate_limiting && control.strategy == RateLimitStrategy::TokenBucket
        })
    }
}

struct LiveEdge {
    id: String,
    source: usize,
    target: usize,
    protocol: Protocol,
}

struct TraceState {
    request_id: u64,
    entry_id: String,
    hops: Vec<TraceHop>,
}

impl TraceState {
    fn push(
        &mut self,
        node_id: &str,
        edge_id: Option<&str>,
        arrival_ms: f64,
        processing_ms: f64,
        status: HopStatus,
    ) {
        self.hops.push(TraceHop {
            node_id: node_id.to_string(),
            edge_id: edge_id.map(str::to_string),
            arrival_ms: round_to(arrival_ms, 3),
            processing_ms: round_to(processing_ms, 3),
            departure_ms: round_to(arrival_ms + processing_ms, 3),
            status,
        });
    }

    fn finish(self, status: HopStatus) -> TracedRequest {
        let total_ms = self.hops.last().map_or(0.0, |hop| hop.departure_ms);
        TracedRequest {
            request_id: self.request_id,
            entry_id: self.entry_id,
            hops: self.hops,
            status,
            total_ms,
        }
    }
}

struct Particle {
    id: u64,
    edge: usize,
    t: f64,
    count: u32,
    elapsed_ms: f64,
    async_flow: bool,
    trace: Option<TraceState>,
}

#[derive(Default)]
struct TickSample {
    offered: u64,
    completed: u64,
    failed: u64,
    latency_ms_sum: f64,
    seconds: f64,
}

struct TickContext {
    next: Vec<Particle>,
    inbound: Vec<u64>,
    sample: TickSample,
    traces: Vec<TracedRequest>,
}

pub struct LiveEngine {
    settings: LiveSettings,
    thresholds: LoadThresholds,
    congestion_factor_ms: f64,
    seed: u64,
    rng: StdRng,
    phase: LivePhase,
    initialized: bool,
    epoch: u64,
    tick: u64,
    speed: f64,
    load_factor: f64,
    graph: Graph,
    nodes: Vec<LiveNode>,
    edges: Vec<LiveEdge>,
    entries: Vec<usize>,
    index: HashMap<String, usize>,
    particles: Vec<Particle>,
    next_particle_id: u64,
    pending_injections: Vec<usize>,
    selected: Option<String>,
    window: VecDeque<TickSample>,
    cost: f64,
}

impl LiveEngine {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            settings: settings.live.clone(),
            thresholds: settings.thresholds,
            congestion_factor_ms: settings.congestion_factor_ms,
            seed: settings.seed,
            rng: StdRng::seed_from_u64(settings.seed),
            phase: LivePhase::Idle,
            initialized: false,
            epoch: 0,
            tick: 0,
            speed: 1.0,
            load_factor: 1.0,
            graph: Graph::default(),
            nodes: Vec::new(),
            edges: Vec::new(),
            entries: Vec::new(),
            index: HashMap::new(),
            particles: Vec::new(),
            next_particle_id: 1,
            pending_injections: Vec::new(),
            selected: None,
            window: VecDeque::new(),
            cost: 0.0,
        }
    }

    pub fn phase(&self) -> LivePhase {
        self.phase
    }

    /// Number of `init`/`reset` calls seen, stamped on every frame.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn load_factor(&self) -> f64 {
        self.load_factor
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Starts a clean run on `graph`. The epoch advances even when the
    /// graph is rejected so both sides of the channel keep counting alike.
    pub fn init(&mut self, graph: Graph, speed: f64, load_factor: f64) -> Result<()> {
        self.epoch += 1;
        self.clear();
        validate_speed(speed)?;
        validate_load_factor(load_factor)?;

        let view = GraphView::build(&graph)?;
        self.speed = speed;
        self.load_factor = load_factor;
        self.nodes = graph
            .nodes
            .iter()
            .cloned()
            .map(LiveNode::new)
            .collect();
        self.install(graph, &view);
        self.initialized = true;

        info!(
            epoch = self.epoch,
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            speed,
            load_factor,
            "live engine initialized"
        );
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.require_initialized()?;
        self.phase = LivePhase::Running;
        debug!(tick = self.tick, "live engine running");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.require_initialized()?;
        self.phase = LivePhase::Paused;
        debug!(tick = self.tick, "live engine paused");
        Ok(())
    }

    /// Exactly one tick. Stepping leaves the engine paused.
    pub fn step(&mut self) -> Result<TickOutput> {
        self.require_initialized()?;
        self.phase = LivePhase::Paused;
        Ok(self.advance())
    }

    /// Advances only while running.
    pub fn tick(&mut self) -> Option<TickOutput> {
        if self.phase == LivePhase::Running && self.initialized {
            Some(self.advance())
        } else {
            None
        }
    }

    /// Queues one traced request at `entry_id`, or at the first entry node.
    pub fn inject_request(&mut self, entry_id: Option<&str>) -> Result<()> {
        self.require_initialized()?;
        let entry = match entry_id {
            Some(id) => match self.index.get(id) {
                Some(&idx) if self.entries.contains(&idx) => idx,
                _ => return Err(Error::UnknownEntryNode(id.to_string())),
            },
            None => *self.entries.first().ok_or(Error::EngineNotInitialized)?,
        };
        self.pending_injections.push(entry);
        Ok(())
    }

    pub fn set_speed(&mut self, value: f64) -> Result<()> {
        validate_speed(value)?;
        self.speed = value;
        Ok(())
    }

    pub fn set_load_factor(&mut self, value: f64) -> Result<()> {
        validate_load_factor(value)?;
        self.load_factor = value;
        Ok(())
    }

    /// Replaces node configuration mid-run.
    ///
    /// `nodes` is the complete node list. Edges whose endpoints both survive
    /// are kept, particles on dropped edges are discarded, and runtime state
    /// of surviving nodes carries over. A list that fails validation is
    /// rejected and the current graph stays in place.
    pub fn update_nodes(&mut self, nodes: Vec<Node>) -> Result<()> {
        self.require_initialized()?;
        let ids: std::collections::HashSet<&str> =
            nodes.iter().map(|node| node.id.as_str()).collect();
        let edges: Vec<Edge> = self
            .graph
            .edges
            .iter()
            .filter(|edge| {
                ids.contains(edge.source_id.as_str()) && ids.contains(edge.target_id.as_str())
            })
            .cloned()
            .collect();
        let graph = Graph::new(nodes, edges);
        let view = GraphView::build(&graph)?;

        let mut previous: HashMap<String, LiveNode> = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(|live| (live.node.id.clone(), live))
            .collect();
        let old_edge_ids: Vec<String> = self.edges.iter().map(|edge| edge.id.clone()).collect();
        let old_entry_ids: Vec<String> = self
            .pending_injections
            .iter()
            .map(|&idx| self.graph.nodes[idx].id.clone())
            .collect();

        self.nodes = graph
            .nodes
            .iter()
            .cloned()
            .map(|node| match previous.remove(&node.id) {
                Some(live) => live.reconfigure(node),
                None => LiveNode::new(node),
            })
            .collect();
        self.install(graph, &view);

        let before = self.particles.len();
        let edge_index: HashMap<&str, usize> = self
            .edges
            .iter()
            .enumerate()
            .map(|(idx, edge)| (edge.id.as_str(), idx))
            .collect();
        self.particles = std::mem::take(&mut self.particles)
            .into_iter()
            .filter_map(|mut particle| {
                let id = old_edge_ids.get(particle.edge)?;
                particle.edge = *edge_index.get(id.as_str())?;
                Some(particle)
            })
            .collect();
        self.pending_injections = old_entry_ids
            .iter()
            .filter_map(|id| self.index.get(id).copied())
            .filter(|idx| self.entries.contains(idx))
            .collect();
        if let Some(selected) = &self.selected {
            if !self.index.contains_key(selected) {
                self.selected = None;
            }
        }

        info!(
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            discarded_particles = before - self.particles.len(),
            "live graph updated"
        );
        Ok(())
    }

    /// Attaches detail metrics for `node_id` to subsequent frames.
    pub fn select_node(&mut self, node_id: Option<String>) -> Result<()> {
        if let Some(id) = &node_id {
            self.require_initialized()?;
            if !self.index.contains_key(id) {
                return Err(Error::UnknownNode(id.clone()));
            }
        }
        self.selected = node_id;
        Ok(())
    }

    pub fn node_detail(&self, node_id: &str) -> Result<NodeDetailMetrics> {
        self.require_initialized()?;
        let idx = *self
            .index
            .get(node_id)
            .ok_or_else(|| Error::UnknownNode(node_id.to_string()))?;
        Ok(self.detail_for(idx, &self.inbound_counts()))
    }

    /// Discards all state. A new `init` is needed before the next tick.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.clear();
        info!(epoch = self.epoch, "live engine reset");
    }

    fn clear(&mut self) {
        self.phase = LivePhase::Idle;
        self.initialized = false;
        self.tick = 0;
        self.rng = StdRng::seed_from_u64(self.seed);
        self.graph = Graph::default();
        self.nodes.clear();
        self.edges.clear();
        self.entries.clear();
        self.index.clear();
        self.particles.clear();
        self.next_particle_id = 1;
        self.pending_injections.clear();
        self.selected = None;
        self.window.clear();
        self.cost = 0.0;
    }

    fn install(&mut self, graph: Graph, view: &GraphView) {
        self.edges = graph
            .edges
            .iter()
            .enumerate()
            .map(|(idx, edge)| LiveEdge {
                id: edge.id.clone(),
                source: view.edge_source[idx],
                target: view.edge_target[idx],
                protocol: edge.protocol,
            })
            .collect();
        for (idx, live) in self.nodes.iter_mut().enumerate() {
            live.outgoing = view.outgoing[idx].clone();
        }
        self.entries = view.entries.clone();
        self.index = view.index.clone();
        self.cost = estimate_graph_cost(&graph);
        self.graph = graph;
    }

    fn require_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::EngineNotInitialized)
        }
    }

    fn simulated_seconds(&self) -> f64 {
        self.settings.simulated_seconds(self.speed)
    }

    fn travel_ms(&self, edge: usize) -> f64 {
        let link = &self.edges[edge];
        let source = &self.nodes[link.source];
        edge_latency_ms(
            link.protocol,
            congestion_utilization(&source.node.config, source.ema),
            self.congestion_factor_ms,
        )
    }

    fn hop_latency_ms(&self, edge: usize) -> f64 {
        self.travel_ms(edge) + processing_ms(&self.nodes[self.edges[edge].target].node.config)
    }

    fn inbound_counts(&self) -> Vec<u64> {
        let mut inbound = vec![0u64; self.nodes.len()];
        for particle in &self.particles {
            inbound[self.edges[particle.edge].target] += u64::from(particle.count);
        }
        inbound
    }

    fn advance(&mut self) -> TickOutput {
        self.tick += 1;
        let seconds = self.simulated_seconds();

        for live in &mut self.nodes {
            live.budget = match live.capacity() {
                None => f64::INFINITY,
                Some(capacity) => capacity * seconds + live.carry,
            };
            live.demand = 0.0;
            live.tick_admitted = 0;
        }

        let mut ctx = TickContext {
            next: Vec::with_capacity(self.particles.len()),
            inbound: self.inbound_counts(),
            sample: TickSample {
                seconds,
                ..TickSample::default()
            },
            traces: Vec::new(),
        };

        for mut particle in std::mem::take(&mut self.particles) {
            let hop_ms = self.hop_latency_ms(particle.edge).max(f64::EPSILON);
            particle.t += self.speed * self.settings.travel_rate_ms / hop_ms;
            if particle.t < 1.0 {
                ctx.next.push(particle);
                continue;
            }
            let target = self.edges[particle.edge].target;
            ctx.inbound[target] = ctx.inbound[target].saturating_sub(u64::from(particle.count));
            self.arrive(particle, &mut ctx);
        }

        self.spawn_arrivals(&mut ctx);
        self.particles = std::mem::take(&mut ctx.next);
        self.settle_nodes(seconds);

        self.window.push_back(ctx.sample);
        while self.window.len() > self.settings.metrics_window_ticks.max(1) {
            self.window.pop_front();
        }

        let frame = self.build_frame(&ctx.inbound);
        TickOutput {
            frame,
            traces: ctx.traces,
        }
    }

    fn arrive(&mut self, mut particle: Particle, ctx: &mut TickContext) {
        let edge = particle.edge;
        let target = self.edges[edge].target;
        let protocol = self.edges[edge].protocol;
        let arrival_ms = particle.elapsed_ms + self.travel_ms(edge);
        let (loss, cost, processing, absorb, queue, terminal) = {
            let config = &self.nodes[target].node.config;
            (
                edge_loss(protocol, config),
                retry_load_factor(protocol, config) / protocol_profile(protocol).capacity_multiplier,
                processing_ms(config),
                absorb_fraction(config),
                forwards_async(config),
                self.nodes[target].terminal,
            )
        };
        let departure_ms = arrival_ms + processing;
        let counted = !particle.async_flow;

        let lost = sample_count(particle.count, loss, &mut self.rng);
        if lost > 0 {
            self.record_drop(target, lost, counted, ctx);
            particle.count -= lost;
            if particle.count == 0 {
                self.finish_dropped(particle, target, arrival_ms, "packet_loss", ctx);
                return;
            }
        }

        if self.nodes[target].circuit_remaining > 0 {
            self.record_drop(target, particle.count, counted, ctx);
            self.finish_dropped(particle, target, arrival_ms, "circuit_open", ctx);
            return;
        }

        let live = &mut self.nodes[target];
        live.demand += f64::from(particle.count) * cost;
        let admitted = if live.budget.is_infinite() {
            particle.count
        } else {
            let fit = (live.budget / cost + 1e-9).floor().max(0.0);
            fit.min(f64::from(particle.count)) as u32
        };
        live.budget -= f64::from(admitted) * cost;
        live.admitted_total += u64::from(admitted);
        live.tick_admitted += u64::from(admitted);
        live.hop_latency_sum_ms += (departure_ms - particle.elapsed_ms) * f64::from(admitted);
        live.hop_count += u64::from(admitted);

        let rejected = particle.count - admitted;
        if rejected > 0 {
            self.record_drop(target, rejected, counted, ctx);
        }
        if admitted == 0 {
            self.finish_dropped(particle, target, arrival_ms, "overloaded", ctx);
            return;
        }
        particle.count = admitted;

        if terminal {
            self.complete(target, admitted, departure_ms, counted, ctx);
            self.finish_completed(particle, target, arrival_ms, processing, ctx);
            return;
        }

        if queue {
            self.complete(target, admitted, departure_ms, counted, ctx);
            let handoff = Particle {
                id: particle.id,
                edge,
                t: 0.0,
                count: admitted,
                elapsed_ms: departure_ms,
                async_flow: true,
                trace: None,
            };
            self.finish_completed(particle, target, arrival_ms, processing, ctx);
            self.forward(target, handoff, ctx);
            return;
        }

        let absorbed = sample_count(admitted, absorb, &mut self.rng);
        if absorbed > 0 {
            self.complete(target, absorbed, departure_ms, counted, ctx);
        }
        let remaining = admitted - absorbed;
        if remaining == 0 {
            self.finish_completed(particle, target, arrival_ms, processing, ctx);
            return;
        }

        if let Some(trace) = particle.trace.as_mut() {
            trace.push(
                &self.nodes[target].node.id,
                Some(&self.edges[edge].id),
                arrival_ms,
                processing,
                HopStatus::Forwarded,
            );
        }
        particle.count = remaining;
        particle.elapsed_ms = departure_ms;
        self.forward(target, particle, ctx);
    }

    /// Puts `particle` on an outgoing edge of `node`, or fails it when the
    /// node has nowhere to send it.
    fn forward(&mut self, node: usize, mut particle: Particle, ctx: &mut TickContext) {
        match self.route(node, particle.id, &ctx.inbound) {
            Some(edge) => {
                particle.edge = edge;
                particle.t = 0.0;
                ctx.inbound[self.edges[edge].target] += u64::from(particle.count);
                ctx.next.push(particle);
            }
            None => {
                self.record_drop(node, particle.count, !particle.async_flow, ctx);
                if let Some(mut trace) = particle.trace.take() {
                    let status = HopStatus::Dropped {
                        reason: "dead_end".to_string(),
                    };
                    if let Some(last) = trace.hops.last_mut() {
                        last.status = status.clone();
                    }
                    ctx.traces.push(trace.finish(status));
                }
            }
        }
    }

    fn route(&mut self, node: usize, request_id: u64, inbound: &[u64]) -> Option<usize> {
        if self.nodes[node].outgoing.is_empty() {
            return None;
        }
        let downstream: Vec<Downstream> = self.nodes[node]
            .outgoing
            .iter()
            .map(|&edge| {
                let target = &self.nodes[self.edges[edge].target];
                let mut candidate = Downstream::new(edge, target.capacity());
                candidate.utilization = target.ema;
                candidate.in_flight = inbound[self.edges[edge].target];
                candidate.latency_ms = self.hop_latency_ms(edge);
                candidate
            })
            .collect();

        let mut ctx = SelectionContext {
            downstream: &downstream,
            request_id,
            rng: &mut self.rng,
        };
        let selection = self.nodes[node].strategy.select(&mut ctx);
        let slot = selection.index.min(downstream.len() - 1);
        Some(downstream[slot].edge)
    }

    fn spawn_arrivals(&mut self, ctx: &mut TickContext) {
        let seconds = ctx.sample.seconds;
        for entry in self.entries.clone() {
            let rps = match &self.nodes[entry].node.config {
                ComponentConfig::Client(cfg) => cfg
                    .requests_per_second
                    .unwrap_or(self.settings.default_client_rps),
                _ => 0.0,
            };
            let rps = if rps.is_finite() && rps > 0.0 { rps } else { 0.0 };

            let live = &mut self.nodes[entry];
            live.arrival_accum += rps * self.load_factor * seconds;
            let whole = live.arrival_accum.floor();
            live.arrival_accum -= whole;
            let total = whole.min(f64::from(u32::MAX)) as u32;
            if total == 0 {
                continue;
            }

            ctx.sample.offered += u64::from(total);
            let parts = total.min(self.settings.max_particles_per_spawn.max(1));
            let base = total / parts;
            let extra = total % parts;
            for part in 0..parts {
                let count = base + u32::from(part < extra);
                self.emit(entry, count, false, ctx);
            }
        }

        for entry in std::mem::take(&mut self.pending_injections) {
            ctx.sample.offered += 1;
            self.emit(entry, 1, true, ctx);
        }
    }

    fn emit(&mut self, entry: usize, count: u32, traced: bool, ctx: &mut TickContext) {
        let id = self.next_particle_id;
        self.next_particle_id += 1;
        let processing = processing_ms(&self.nodes[entry].node.config);
        let trace = traced.then(|| {
            let entry_id = self.nodes[entry].node.id.clone();
            let mut trace = TraceState {
                request_id: id,
                entry_id: entry_id.clone(),
                hops: Vec::new(),
            };
            trace.push(&entry_id, None, 0.0, processing, HopStatus::Forwarded);
            trace
        });
        let particle = Particle {
            id,
            edge: 0,
            t: 0.0,
            count,
            elapsed_ms: processing,
            async_flow: false,
            trace,
        };
        self.forward(entry, particle, ctx);
    }

    fn complete(
        &mut self,
        node: usize,
        count: u32,
        departure_ms: f64,
        counted: bool,
        ctx: &mut TickContext,
    ) {
        self.nodes[node].completed_total += u64::from(count);
        if counted {
            ctx.sample.completed += u64::from(count);
            ctx.sample.latency_ms_sum += departure_ms * f64::from(count);
        }
    }

    fn record_drop(&mut self, node: usize, count: u32, counted: bool, ctx: &mut TickContext) {
        self.nodes[node].dropped_total += u64::from(count);
        if counted {
            ctx.sample.failed += u64::from(count);
        }
    }

    fn finish_dropped(
        &self,
        particle: Particle,
        node: usize,
        arrival_ms: f64,
        reason: &str,
        ctx: &mut TickContext,
    ) {
        if let Some(mut trace) = particle.trace {
            let status = HopStatus::Dropped {
                reason: reason.to_string(),
            };
            trace.push(
                &self.nodes[node].node.id,
                Some(&self.edges[particle.edge].id),
                arrival_ms,
                0.0,
                status.clone(),
            );
            ctx.traces.push(trace.finish(status));
        }
    }

    fn finish_completed(
        &self,
        particle: Particle,
        node: usize,
        arrival_ms: f64,
        processing: f64,
        ctx: &mut TickContext,
    ) {
        if let Some(mut trace) = particle.trace {
            trace.push(
                &self.nodes[node].node.id,
                Some(&self.edges[particle.edge].id),
                arrival_ms,
                processing,
                HopStatus::Completed,
            );
            ctx.traces.push(trace.finish(HopStatus::Completed));
        }
    }

    /// End-of-tick bookkeeping: utilization EMA, circuit breakers and token
    /// carry-over.
    fn settle_nodes(&mut self, seconds: f64) {
        let alpha = self.settings.ema_alpha.clamp(0.0, 1.0);
        let cooldown = self.settings.circuit_cooldown_ticks;
        let tick = self.tick;
        for live in &mut self.nodes {
            let nominal = effective_capacity(&live.node.config);
            let ratio = match nominal {
                None => 0.0,
                Some(capacity) if capacity * seconds <= 0.0 => {
                    if live.demand > 0.0 {
                        MAX_DEMAND_RATIO
                    } else {
                        0.0
                    }
                }
                Some(capacity) => (live.demand / (capacity * seconds)).min(MAX_DEMAND_RATIO),
            };
            live.ema = alpha * ratio + (1.0 - alpha) * live.ema;

            if live.circuit_remaining > 0 {
                live.circuit_remaining -= 1;
            } else if ratio > 1.0 && circuit_breaker_enabled(&live.node.config) && cooldown > 0 {
                live.circuit_remaining = cooldown;
                debug!(node = %live.node.id, tick, cooldown, "circuit opened");
            }

            live.carry = match nominal {
                Some(capacity) if live.carries_budget() && live.budget.is_finite() => {
                    live.budget.clamp(0.0, capacity * seconds)
                }
                _ => 0.0,
            };
        }
    }

    fn health(&self, node: usize) -> Health {
        match classify(self.nodes[node].ema, &self.thresholds) {
            LoadClass::Normal => Health::Healthy,
            LoadClass::High => Health::Degraded,
            LoadClass::Overloaded => Health::Critical,
        }
    }

    fn build_frame(&self, inbound: &[u64]) -> TickFrame {
        let particles = self
            .particles
            .iter()
            .map(|particle| {
                let edge = &self.edges[particle.edge];
                RequestParticle {
                    id: particle.id,
                    edge_id: edge.id.clone(),
                    source_id: self.nodes[edge.source].node.id.clone(),
                    target_id: self.nodes[edge.target].node.id.clone(),
                    t: particle.t,
                    count: particle.count,
                    health: self.health(edge.target),
                    traced: particle.trace.is_some(),
                }
            })
            .collect();

        let detail = self
            .selected
            .as_ref()
            .and_then(|id| self.index.get(id))
            .map(|&idx| self.detail_for(idx, inbound));

        TickFrame {
            epoch: self.epoch,
            tick: self.tick,
            particles,
            metrics: self.metrics(inbound),
            detail,
        }
    }

    fn metrics(&self, inbound: &[u64]) -> LiveMetrics {
        let (offered, completed, failed, latency_sum, seconds) = self.window.iter().fold(
            (0u64, 0u64, 0u64, 0.0, 0.0),
            |(offered, completed, failed, latency, seconds), sample| {
                (
                    offered + sample.offered,
                    completed + sample.completed,
                    failed + sample.failed,
                    latency + sample.latency_ms_sum,
                    seconds + sample.seconds,
                )
            },
        );
        let per_second = |count: u64| {
            if seconds > 0.0 {
                round_to(count as f64 / seconds, 2)
            } else {
                0.0
            }
        };
        let finished = completed + failed;

        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, live)| {
                (
                    live.node.id.clone(),
                    NodeSimSummary {
                        utilization_pct: round_to(live.ema * 100.0, 2),
                        queue_depth: inbound[idx],
                        error_count: live.dropped_total,
                        overloaded: classify(live.ema, &self.thresholds) == LoadClass::Overloaded,
                        circuit_open: live.circuit_remaining > 0,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        LiveMetrics {
            rps: per_second(completed),
            offered_rps: per_second(offered),
            avg_latency_ms: if completed > 0 {
                round_to(latency_sum / completed as f64, 2)
            } else {
                0.0
            },
            error_rate: if finished > 0 {
                round_to((failed as f64 / finished as f64).clamp(0.0, 1.0), 4)
            } else {
                0.0
            },
            estimated_cost_monthly: self.cost,
            nodes,
        }
    }

    fn detail_for(&self, idx: usize, inbound: &[u64]) -> NodeDetailMetrics {
        let live = &self.nodes[idx];
        let seconds = self.simulated_seconds();
        NodeDetailMetrics {
            node_id: live.node.id.clone(),
            component_type: live.node.component_type(),
            effective_capacity_rps: live.capacity(),
            utilization_pct: round_to(live.ema * 100.0, 2),
            queue_depth: inbound.get(idx).copied().unwrap_or(0),
            admitted_total: live.admitted_total,
            dropped_total: live.dropped_total,
            completed_total: live.completed_total,
            throughput_rps: if seconds > 0.0 {
                round_to(live.tick_admitted as f64 / seconds, 2)
            } else {
                0.0
            },
            avg_hop_latency_ms: if live.hop_count > 0 {
                round_to(live.hop_latency_sum_ms / live.hop_count as f64, 2)
            } else {
                0.0
            },
            circuit: live.circuit(),
        }
    }
}

fn validate_speed(value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidSpeed(value))
    }
}

fn validate_load_factor(value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidLoadFactor(value))
    }
}

/// How many of `count` requests an event with probability `p` hits. The
/// whole part is exact; only the fractional remainder consumes randomness.
fn sample_count(count: u32, p: f64, rng: &mut StdRng) -> u32 {
    if count == 0 || p.is_nan() || p <= 0.0 {
        return 0;
    }
    if p >= 1.0 {
        return count;
    }
    let expected = f64::from(count) * p;
    let whole = expected.floor();
    let hit = u32::from(rng.gen::<f64>() < expected - whole);
    (whole as u32 + hit).min(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentType, Edge, Node};

    fn stack() -> Graph {
        Graph::new(
            vec![
                Node::of_type("client", ComponentType::Client),
                Node::of_type("lb", ComponentType::LoadBalancer),
                Node::of_type("app", ComponentType::AppServer),
                Node::of_type("db", ComponentType::DatabaseSql),
            ],
            vec![
                Edge::new("e1", "client", "lb"),
                Edge::new("e2", "lb", "app"),
                Edge::new("e3", "app", "db").with_protocol(Protocol::Tcp),
            ],
        )
    }

    fn engine() -> LiveEngine {
        LiveEngine::new(&EngineSettings::default())
    }

    #[test]
    fn tick_does_nothing_until_started() {
        let mut live = engine();
        assert!(live.tick().is_none());
        live.init(stack(), 1.0, 1.0).unwrap();
        assert_eq!(live.phase(), LivePhase::Idle);
        assert!(live.tick().is_none());
        live.start().unwrap();
        assert_eq!(live.tick().unwrap().frame.tick, 1);
    }

    #[test]
    fn commands_before_init_are_rejected() {
        let mut live = engine();
        assert!(matches!(live.start(), Err(Error::EngineNotInitialized)));
        assert!(matches!(live.step(), Err(Error::EngineNotInitialized)));
        assert!(matches!(
            live.inject_request(None),
            Err(Error::EngineNotInitialized)
        ));
    }

    #[test]
    fn invalid_init_keeps_engine_uninitialized() {
        let mut live = engine();
        let err = live.init(stack(), 0.0, 1.0).unwrap_err();
        assert!(matches!(err, Error::InvalidSpeed(_)));
        assert!(!live.is_initialized());
        assert_eq!(live.epoch(), 1);

        let lonely = Graph::new(vec![Node::of_type("app", ComponentType::AppServer)], vec![]);
        assert!(matches!(
            live.init(lonely, 1.0, 1.0),
            Err(Error::Validation(_))
        ));
        assert_eq!(live.epoch(), 2);
    }

    #[test]
    fn arrivals_are_batched_into_counted_particles() {
        let mut graph = stack();
        if let ComponentConfig::Client(cfg) = &mut graph.nodes[0].config {
            cfg.requests_per_second = Some(1000.0);
        }
        let mut live = engine();
        live.init(graph, 1.0, 1.0).unwrap();
        let output = live.step().unwrap();

        let counts: Vec<u32> = output.frame.particles.iter().map(|p| p.count).collect();
        assert_eq!(counts, vec![13, 13, 12, 12]);
        assert!(output.frame.particles.iter().all(|p| p.t == 0.0));
        assert!(output.frame.particles.iter().all(|p| p.edge_id == "e1"));
    }

    #[test]
    fn fractional_arrivals_accumulate() {
        let mut graph = stack();
        if let ComponentConfig::Client(cfg) = &mut graph.nodes[0].config {
            cfg.requests_per_second = Some(30.0);
        }
        let mut live = engine();
        live.init(graph, 1.0, 1.0).unwrap();
        let spawned: Vec<u32> = (0..4)
            .map(|_| {
                let output = live.step().unwrap();
                output
                    .frame
                    .particles
                    .iter()
                    .filter(|p| p.edge_id == "e1" && p.t == 0.0)
                    .map(|p| p.count)
                    .sum()
            })
            .collect();
        assert_eq!(spawned, vec![1, 2, 1, 2]);
    }

    #[test]
    fn injected_request_is_traced_to_completion() {
        let mut live = engine();
        live.init(stack(), 1.0, 0.0).unwrap();
        live.start().unwrap();
        live.inject_request(None).unwrap();

        let first = live.tick().unwrap();
        assert_eq!(first.frame.particles.len(), 1);
        assert!(first.frame.particles[0].traced);

        let mut trace = None;
        for _ in 0..200 {
            let output = live.tick().unwrap();
            if let Some(done) = output.traces.into_iter().next() {
                trace = Some(done);
                break;
            }
        }
        let trace = trace.expect("trace should complete");
        assert_eq!(trace.status, HopStatus::Completed);
        let path: Vec<&str> = trace.hops.iter().map(|hop| hop.node_id.as_str()).collect();
        assert_eq!(path, vec!["client", "lb", "app", "db"]);
        assert!(trace.total_ms > 0.0);
        for pair in trace.hops.windows(2) {
            assert!(pair[1].arrival_ms >= pair[0].departure_ms);
        }
    }

    #[test]
    fn unknown_entry_is_rejected() {
        let mut live = engine();
        live.init(stack(), 1.0, 1.0).unwrap();
        let err = live.inject_request(Some("app")).unwrap_err();
        assert_eq!(err.to_string(), "unknown entry node 'app'");
    }

    #[test]
    fn overloaded_node_drops_instead_of_queueing() {
        let mut graph = stack();
        graph.nodes[2] = Node::of_type("app", ComponentType::AppServer).with_scaling(1, 100.0);
        if let ComponentConfig::Client(cfg) = &mut graph.nodes[0].config {
            cfg.requests_per_second = Some(1000.0);
        }
        let mut live = engine();
        live.init(graph, 1.0, 1.0).unwrap();
        live.start().unwrap();
        let mut last = None;
        for _ in 0..80 {
            last = live.tick();
        }
        let metrics = last.unwrap().frame.metrics;
        assert!(metrics.error_rate > 0.5);
        assert!(metrics.nodes["app"].overloaded);
        assert!(metrics.nodes["app"].error_count > 0);
        assert!(!metrics.nodes["lb"].overloaded);
    }

    #[test]
    fn circuit_breaker_opens_under_overload() {
        let mut graph = stack();
        let mut app = Node::of_type("app", ComponentType::AppServer).with_scaling(1, 100.0);
        app.config.resilience_mut().unwrap().circuit_breaker = true;
        graph.nodes[2] = app;
        if let ComponentConfig::Client(cfg) = &mut graph.nodes[0].config {
            cfg.requests_per_second = Some(1000.0);
        }
        let mut live = engine();
        live.init(graph, 1.0, 1.0).unwrap();
        live.start().unwrap();
        let opened = (0..60).any(|_| {
            live.tick()
                .map_or(false, |output| output.frame.metrics.nodes["app"].circuit_open)
        });
        assert!(opened);
        let detail = live.node_detail("app").unwrap();
        assert_eq!(detail.component_type, ComponentType::AppServer);
    }

    #[test]
    fn update_nodes_drops_particles_on_removed_edges() {
        let mut graph = stack();
        if let ComponentConfig::Client(cfg) = &mut graph.nodes[0].config {
            cfg.requests_per_second = Some(200.0);
        }
        let mut live = engine();
        live.init(graph.clone(), 1.0, 1.0).unwrap();
        live.start().unwrap();
        for _ in 0..30 {
            live.tick();
        }

        let mut nodes = graph.nodes.clone();
        nodes.retain(|node| node.id != "db");
        nodes[2] = Node::of_type("app", ComponentType::AppServer).with_scaling(4, 500.0);
        live.update_nodes(nodes).unwrap();
        assert_eq!(live.graph().edges.len(), 2);
        assert_eq!(live.tick_count(), 30);

        let output = live.tick().unwrap();
        assert!(output.frame.particles.iter().all(|p| p.edge_id != "e3"));
        let detail = live.node_detail("app").unwrap();
        assert_eq!(detail.effective_capacity_rps, Some(2000.0));
    }

    #[test]
    fn invalid_update_keeps_previous_graph() {
        let mut live = engine();
        live.init(stack(), 1.0, 1.0).unwrap();
        let nodes = vec![Node::of_type("app", ComponentType::AppServer)];
        assert!(live.update_nodes(nodes).is_err());
        assert_eq!(live.graph().nodes.len(), 4);
        assert!(live.step().is_ok());
    }

    #[test]
    fn selected_node_detail_rides_on_frames() {
        let mut live = engine();
        live.init(stack(), 1.0, 1.0).unwrap();
        assert!(live.select_node(Some("ghost".to_string())).is_err());
        live.select_node(Some("app".to_string())).unwrap();
        let output = live.step().unwrap();
        assert_eq!(output.frame.detail.unwrap().node_id, "app");
        live.select_node(None).unwrap();
        assert!(live.step().unwrap().frame.detail.is_none());
    }

    #[test]
    fn reset_discards_state_and_bumps_epoch() {
        let mut live = engine();
        live.init(stack(), 1.0, 1.0).unwrap();
        live.step().unwrap();
        live.reset();
        assert_eq!(live.epoch(), 2);
        assert_eq!(live.tick_count(), 0);
        assert!(!live.is_initialized());
        assert!(live.step().is_err());
    }

    #[test]
    fn speed_and_load_factor_are_validated() {
        let mut live = engine();
        assert!(live.set_speed(-1.0).is_err());
        assert!(live.set_speed(f64::NAN).is_err());
        assert!(live.set_load_factor(-0.5).is_err());
        live.set_speed(2.0).unwrap();
        live.set_load_factor(0.0).unwrap();
        assert_eq!(live.speed(), 2.0);
        assert_eq!(live.load_factor(), 0.0);
    }

    fn in_flight(live: &LiveEngine) -> Vec<(u64, String, f64, u32)> {
        live.particles
            .iter()
            .map(|p| (p.id, live.edges[p.edge].id.clone(), p.t, p.count))
            .collect()
    }

    fn moving(frame: &TickFrame) -> Vec<(u64, String, f64, u32)> {
        frame
            .particles
            .iter()
            .filter(|p| !(p.edge_id == "e1" && p.t == 0.0))
            .map(|p| (p.id, p.edge_id.clone(), p.t, p.count))
            .collect()
    }

    fn spawned(frame: &TickFrame) -> u32 {
        frame
            .particles
            .iter()
            .filter(|p| p.edge_id == "e1" && p.t == 0.0)
            .map(|p| p.count)
            .sum()
    }

    #[test]
    fn load_factor_changes_only_later_arrivals() {
        let mut graph = stack();
        if let ComponentConfig::Client(cfg) = &mut graph.nodes[0].config {
            cfg.requests_per_second = Some(1000.0);
        }
        let mut steady = engine();
        steady.init(graph.clone(), 1.0, 1.0).unwrap();
        let mut doubled = engine();
        doubled.init(graph, 1.0, 1.0).unwrap();

        let steady_first = steady.step().unwrap().frame;
        let doubled_first = doubled.step().unwrap().frame;
        assert_eq!(steady_first, doubled_first);
        assert_eq!(spawned(&doubled_first), 50);
        assert_eq!(doubled_first.metrics.offered_rps, 1000.0);

        let before = in_flight(&doubled);
        doubled.set_load_factor(2.0).unwrap();
        assert_eq!(in_flight(&doubled), before);
        assert_eq!(doubled.tick_count(), 1);

        let steady_second = steady.step().unwrap().frame;
        let doubled_second = doubled.step().unwrap().frame;
        assert_eq!(spawned(&steady_second), 50);
        assert_eq!(spawned(&doubled_second), 100);
        assert_eq!(moving(&steady_second), moving(&doubled_second));
        assert_eq!(doubled_second.metrics.offered_rps, 1500.0);
    }

    #[test]
    fn update_nodes_keeps_particles_in_flight() {
        let mut graph = stack();
        if let ComponentConfig::Client(cfg) = &mut graph.nodes[0].config {
            cfg.requests_per_second = Some(200.0);
        }
        let mut live = engine();
        live.init(graph.clone(), 1.0, 1.0).unwrap();
        live.start().unwrap();
        for _ in 0..30 {
            live.tick();
        }

        let before = in_flight(&live);
        assert!(!before.is_empty());
        let mut nodes = graph.nodes.clone();
        nodes[2] = Node::of_type("app", ComponentType::AppServer).with_scaling(4, 500.0);
        live.update_nodes(nodes.clone()).unwrap();
        assert_eq!(in_flight(&live), before);

        let surviving: Vec<_> = before
            .into_iter()
            .filter(|(_, edge, _, _)| edge != "e3")
            .collect();
        nodes.retain(|node| node.id != "db");
        live.update_nodes(nodes).unwrap();
        assert_eq!(in_flight(&live), surviving);
    }

    #[test]
    fn sample_count_is_exact_for_whole_expectations() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_count(10, 0.0, &mut rng), 0);
        assert_eq!(sample_count(10, 1.0, &mut rng), 10);
        assert_eq!(sample_count(10, 0.5, &mut rng), 5);
        let hits = sample_count(3, 0.5, &mut rng);
        assert!(hits == 1 || hits == 2);
    }
}
