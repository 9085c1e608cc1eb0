//! Static capacity, protocol and cost model.
//!
//! Converts node and edge configuration into effective throughput, added
//! latency, loss and monthly cost. Both engines and any cost display read the
//! same functions so one design never shows two different numbers.

use serde::{Deserialize, Serialize};

use crate::models::{
    ComponentConfig, ComponentType, EvictionPolicy, Graph, Node, Protocol, ReplicationStrategy,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProtocolProfile {
    pub overhead_ms: f64,
    pub capacity_multiplier: f64,
    pub packet_loss: f64,
    pub transfer_ms: f64,
}

pub fn protocol_profile(protocol: Protocol) -> ProtocolProfile {
    let (overhead_ms, capacity_multiplier, packet_loss, transfer_ms) = match protocol {
        Protocol::Http => (2.0, 1.0, 0.0, 1.0),
        Protocol::Grpc => (1.0, 1.3, 0.0, 0.5),
        Protocol::Websocket => (1.0, 1.2, 0.0, 0.2),
        Protocol::Tcp => (0.5, 1.1, 0.0, 0.3),
        Protocol::Udp => (0.2, 1.5, 0.01, 0.1),
        Protocol::Custom => (1.5, 1.0, 0.001, 0.5),
    };
    ProtocolProfile {
        overhead_ms,
        capacity_multiplier,
        packet_loss,
        transfer_ms,
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadThresholds {
    pub high_utilization: f64,
    pub overload: f64,
}

impl Default for LoadThresholds {
    fn default() -> Self {
        Self {
            high_utilization: 0.8,
            overload: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadClass {
    Normal,
    High,
    Overloaded,
}

pub fn classify(utilization: f64, thresholds: &LoadThresholds) -> LoadClass {
    if utilization >= thresholds.overload {
        LoadClass::Overloaded
    } else if utilization >= thresholds.high_utilization {
        LoadClass::High
    } else {
        LoadClass::Normal
    }
}

/// Per-instance capacity when the scaling layer leaves it unset.
pub fn default_instance_capacity_rps(ty: ComponentType) -> f64 {
    match ty {
        ComponentType::Client => 0.0,
        ComponentType::Cdn => 50_000.0,
        ComponentType::LoadBalancer => 10_000.0,
        ComponentType::ApiGateway => 5_000.0,
        ComponentType::AppServer => 1_000.0,
        ComponentType::Cache => 20_000.0,
        ComponentType::DatabaseSql => 2_000.0,
        ComponentType::DatabaseNosql => 5_000.0,
        ComponentType::ObjectStore => 20_000.0,
        ComponentType::MessageQueue => 10_000.0,
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Effective capacity in requests per second. `None` means unbounded (entry
/// nodes). Misconfigured values collapse to zero, which reads as immediate
/// overload rather than an error.
pub fn effective_capacity(config: &ComponentConfig) -> Option<f64> {
    let ty = config.component_type();
    if ty.is_entry() {
        return None;
    }

    let base = match config.scaling() {
        Some(scaling) => {
            let per_instance = sanitize(
                scaling
                    .per_instance_capacity_rps
                    .unwrap_or_else(|| default_instance_capacity_rps(ty)),
            );
            let instances = scaling.instances as f64;
            let is_database = matches!(ty, ComponentType::DatabaseSql | ComponentType::DatabaseNosql);
            if is_database && !scaling.sharding_enabled && scaling.instances > 1 {
                // Without sharding extra instances only serve reads.
                per_instance * (1.0 + 0.5 * (instances - 1.0))
            } else {
                per_instance * instances
            }
        }
        None => default_instance_capacity_rps(ty),
    };

    let limited = match config.traffic_control() {
        Some(control) if control.rate_limiting => match control.rate_limit {
            Some(limit) => base.min(sanitize(limit)),
            None => base,
        },
        _ => base,
    };

    Some(limited)
}

/// Whether rate limiting, rather than raw instance capacity, sets the ceiling.
pub fn is_rate_limited(config: &ComponentConfig) -> bool {
    match config.traffic_control() {
        Some(control) if control.rate_limiting => match control.rate_limit {
            Some(limit) => {
                let mut unlimited = config.clone();
                if let Some(control) = unlimited.traffic_control_mut() {
                    control.rate_limiting = false;
                }
                effective_capacity(&unlimited).map_or(false, |raw| sanitize(limit) < raw)
            }
            None => false,
        },
        _ => false,
    }
}

/// Load divided by capacity. Zero capacity with any load is infinitely
/// overloaded; unbounded nodes are never loaded.
pub fn utilization(load: f64, capacity: Option<f64>) -> f64 {
    match capacity {
        None => 0.0,
        Some(_) if load <= 0.0 => 0.0,
        Some(capacity) if capacity <= 0.0 => f64::INFINITY,
        Some(capacity) => load / capacity,
    }
}

/// Fraction of accepted load that may pass given capacity. Zero capacity admits
/// nothing.
pub fn admission_ratio(load: f64, capacity: Option<f64>) -> f64 {
    match capacity {
        None => 1.0,
        Some(_) if load <= 0.0 => 1.0,
        Some(capacity) => (capacity / load).clamp(0.0, 1.0),
    }
}

pub fn processing_ms(config: &ComponentConfig) -> f64 {
    let base = match config {
        ComponentConfig::Client(_) => 0.0,
        ComponentConfig::Cdn(_) => 5.0,
        ComponentConfig::LoadBalancer(_) => 1.0,
        ComponentConfig::ApiGateway(_) => 3.0,
        ComponentConfig::AppServer(cfg) => cfg.processing_ms.map(sanitize).unwrap_or(20.0),
        ComponentConfig::Cache(_) => 1.0,
        ComponentConfig::DatabaseSql(_) => 10.0,
        ComponentConfig::DatabaseNosql(_) => 5.0,
        ComponentConfig::ObjectStore(_) => 30.0,
        ComponentConfig::MessageQueue(_) => 2.0,
    };

    let replication = match config.consistency() {
        Some(consistency)
            if consistency.replication_strategy == ReplicationStrategy::Synchronous =>
        {
            2.0 * consistency.replication_factor.saturating_sub(1) as f64
        }
        _ => 0.0,
    };

    base + replication
}

/// Fraction of accepted requests that complete at this node instead of moving
/// downstream.
pub fn absorb_fraction(config: &ComponentConfig) -> f64 {
    match config {
        ComponentConfig::Cdn(cfg) => cfg.hit_rate.unwrap_or(0.8).clamp(0.0, 1.0),
        ComponentConfig::Cache(cfg) => {
            let factor = match cfg.eviction_policy {
                EvictionPolicy::Lru => 1.0,
                EvictionPolicy::Lfu => 1.05,
                EvictionPolicy::Fifo => 0.9,
                EvictionPolicy::Ttl => 0.95,
            };
            (cfg.hit_rate.unwrap_or(0.8) * factor).clamp(0.0, 1.0)
        }
        ComponentConfig::DatabaseSql(_)
        | ComponentConfig::DatabaseNosql(_)
        | ComponentConfig::ObjectStore(_)
        | ComponentConfig::MessageQueue(_) => 1.0,
        ComponentConfig::Client(_)
        | ComponentConfig::LoadBalancer(_)
        | ComponentConfig::ApiGateway(_)
        | ComponentConfig::AppServer(_) => 0.0,
    }
}

/// Message queues acknowledge producers and hand work to consumers
/// asynchronously.
pub fn forwards_async(config: &ComponentConfig) -> bool {
    matches!(config, ComponentConfig::MessageQueue(_))
}

pub fn retries_enabled(config: &ComponentConfig) -> bool {
    config.resilience().map_or(false, |r| r.automatic_retries)
}

pub fn circuit_breaker_enabled(config: &ComponentConfig) -> bool {
    config.resilience().map_or(false, |r| r.circuit_breaker)
}

/// Loss on an edge into `target`, after one automatic retry if enabled.
pub fn edge_loss(protocol: Protocol, target: &ComponentConfig) -> f64 {
    let loss = protocol_profile(protocol).packet_loss;
    if retries_enabled(target) {
        loss * loss
    } else {
        loss
    }
}

/// Extra load generated by retries of lost packets.
pub fn retry_load_factor(protocol: Protocol, target: &ComponentConfig) -> f64 {
    if retries_enabled(target) {
        1.0 + protocol_profile(protocol).packet_loss
    } else {
        1.0
    }
}

/// Utilization used for congestion. A circuit breaker sheds excess load fast,
/// so congestion never amplifies past saturation.
pub fn congestion_utilization(config: &ComponentConfig, utilization: f64) -> f64 {
    let utilization = if utilization.is_finite() {
        utilization.max(0.0)
    } else {
        MAX_CONGESTION_UTILIZATION
    };
    if circuit_breaker_enabled(config) {
        utilization.min(1.0)
    } else {
        utilization.min(MAX_CONGESTION_UTILIZATION)
    }
}

const MAX_CONGESTION_UTILIZATION: f64 = 10.0;

/// Fixed overhead plus congestion proportional to the source's utilization.
pub fn edge_latency_ms(
    protocol: Protocol,
    source_congestion_utilization: f64,
    congestion_factor_ms: f64,
) -> f64 {
    protocol_profile(protocol).overhead_ms + congestion_factor_ms * source_congestion_utilization
}

pub fn edge_capacity(throughput_qps: Option<f64>, protocol: Protocol) -> Option<f64> {
    throughput_qps.map(|qps| sanitize(qps) * protocol_profile(protocol).capacity_multiplier)
}

/// Monthly cost of one node. The single source of truth for cost figures.
pub fn estimate_node_cost(node: &Node) -> f64 {
    let instances = |cfg: &ComponentConfig| cfg.scaling().map_or(1.0, |s| s.instances as f64);
    let replication = |cfg: &ComponentConfig| {
        cfg.consistency()
            .map_or(1.0, |c| c.replication_factor.max(1) as f64)
    };

    let config = &node.config;
    let cost = match config {
        ComponentConfig::Client(_) => 0.0,
        ComponentConfig::Cdn(_) => 50.0,
        ComponentConfig::LoadBalancer(_) => 18.0 * instances(config),
        ComponentConfig::ApiGateway(_) => 35.0 * instances(config),
        ComponentConfig::AppServer(_) => 70.0 * instances(config),
        ComponentConfig::Cache(cfg) => 50.0 * instances(config) + 10.0 * sanitize(cfg.memory_gb),
        ComponentConfig::DatabaseSql(cfg) => {
            150.0 * instances(config) + 0.115 * sanitize(cfg.storage_gb) * replication(config)
        }
        ComponentConfig::DatabaseNosql(cfg) => {
            120.0 * instances(config) + 0.25 * sanitize(cfg.storage_gb) * replication(config)
        }
        ComponentConfig::ObjectStore(cfg) => {
            1.0 + 0.023 * sanitize(cfg.storage_gb) * replication(config)
        }
        ComponentConfig::MessageQueue(cfg) => {
            40.0 * instances(config) + 0.1 * sanitize(cfg.retention_hours)
        }
    };

    round_to(cost, 2)
}

pub fn estimate_graph_cost(graph: &Graph) -> f64 {
    round_to(graph.nodes.iter().map(estimate_node_cost).sum(), 2)
}

pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    if decimals == 0 {
        return value.round();
    }
    let factor = 10_f64.powi(decimals as i32);
    (value * factor).round() / factor
}
