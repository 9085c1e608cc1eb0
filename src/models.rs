use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Client,
    Cdn,
    LoadBalancer,
    ApiGateway,
    AppServer,
    Cache,
    DatabaseSql,
    DatabaseNosql,
    ObjectStore,
    MessageQueue,
}

impl ComponentType {
    pub const ALL: [ComponentType; 10] = [
        ComponentType::Client,
        ComponentType::Cdn,
        ComponentType::LoadBalancer,
        ComponentType::ApiGateway,
        ComponentType::AppServer,
        ComponentType::Cache,
        ComponentType::DatabaseSql,
        ComponentType::DatabaseNosql,
        ComponentType::ObjectStore,
        ComponentType::MessageQueue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Client => "client",
            ComponentType::Cdn => "cdn",
            ComponentType::LoadBalancer => "load_balancer",
            ComponentType::ApiGateway => "api_gateway",
            ComponentType::AppServer => "app_server",
            ComponentType::Cache => "cache",
            ComponentType::DatabaseSql => "database_sql",
            ComponentType::DatabaseNosql => "database_nosql",
            ComponentType::ObjectStore => "object_store",
            ComponentType::MessageQueue => "message_queue",
        }
    }

    /// Entry nodes originate load and have no simulated upstream.
    pub fn is_entry(&self) -> bool {
        matches!(self, ComponentType::Client)
    }

    /// Request flow ends here. Outgoing edges of a terminal (replication) never
    /// carry requests.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ComponentType::DatabaseSql | ComponentType::DatabaseNosql | ComponentType::ObjectStore
        )
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ComponentType::ALL
            .iter()
            .copied()
            .find(|ty| ty.as_str() == value)
            .ok_or_else(|| format!("unknown component type '{}'", value))
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Grpc,
    Websocket,
    Tcp,
    Udp,
    Custom,
}

impl Protocol {
    pub const ALL: [Protocol; 6] = [
        Protocol::Http,
        Protocol::Grpc,
        Protocol::Websocket,
        Protocol::Tcp,
        Protocol::Udp,
        Protocol::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Grpc => "grpc",
            Protocol::Websocket => "websocket",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Custom => "custom",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LbAlgorithm {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    LeastResponseTime,
    IpHash,
}

impl fmt::Display for LbAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LbAlgorithm::RoundRobin => "round-robin",
            LbAlgorithm::WeightedRoundRobin => "weighted-round-robin",
            LbAlgorithm::LeastConnections => "least-connections",
            LbAlgorithm::LeastResponseTime => "least-response-time",
            LbAlgorithm::IpHash => "ip-hash",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStrategy {
    #[default]
    None,
    Synchronous,
    Asynchronous,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    #[default]
    TokenBucket,
    LeakyBucket,
    FixedWindow,
    SlidingWindow,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Lfu,
    Fifo,
    Ttl,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Scaling {
    pub instances: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_instance_capacity_rps: Option<f64>,
    pub sharding_enabled: bool,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            instances: 1,
            per_instance_capacity_rps: None,
            sharding_enabled: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Consistency {
    pub replication_strategy: ReplicationStrategy,
    pub replication_factor: u32,
}

impl Default for Consistency {
    fn default() -> Self {
        Self {
            replication_strategy: ReplicationStrategy::None,
            replication_factor: 1,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Resilience {
    pub circuit_breaker: bool,
    pub automatic_retries: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrafficControl {
    pub rate_limiting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<f64>,
    pub strategy: RateLimitStrategy,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CdnConfig {
    pub traffic_control: TrafficControl,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_rate: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadBalancerConfig {
    pub scaling: Scaling,
    pub resilience: Resilience,
    pub traffic_control: TrafficControl,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<LbAlgorithm>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiGatewayConfig {
    pub scaling: Scaling,
    pub resilience: Resilience,
    pub traffic_control: TrafficControl,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppServerConfig {
    pub scaling: Scaling,
    pub resilience: Resilience,
    pub traffic_control: TrafficControl,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_ms: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub scaling: Scaling,
    pub consistency: Consistency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_rate: Option<f64>,
    pub eviction_policy: EvictionPolicy,
    pub memory_gb: f64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    pub scaling: Scaling,
    pub consistency: Consistency,
    pub resilience: Resilience,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    pub storage_gb: f64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectStoreConfig {
    pub consistency: Consistency,
    pub storage_gb: f64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageQueueConfig {
    pub scaling: Scaling,
    pub consistency: Consistency,
    pub retention_hours: f64,
}

/// Per-type configuration. Each variant only carries the layers its component
/// type supports.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComponentConfig {
    Client(ClientConfig),
    Cdn(CdnConfig),
    LoadBalancer(LoadBalancerConfig),
    ApiGateway(ApiGatewayConfig),
    AppServer(AppServerConfig),
    Cache(CacheConfig),
    DatabaseSql(DatabaseConfig),
    DatabaseNosql(DatabaseConfig),
    ObjectStore(ObjectStoreConfig),
    MessageQueue(MessageQueueConfig),
}

impl ComponentConfig {
    pub fn for_type(ty: ComponentType) -> Self {
        match ty {
            ComponentType::Client => ComponentConfig::Client(ClientConfig::default()),
            ComponentType::Cdn => ComponentConfig::Cdn(CdnConfig::default()),
            ComponentType::LoadBalancer => {
                ComponentConfig::LoadBalancer(LoadBalancerConfig::default())
            }
            ComponentType::ApiGateway => ComponentConfig::ApiGateway(ApiGatewayConfig::default()),
            ComponentType::AppServer => ComponentConfig::AppServer(AppServerConfig::default()),
            ComponentType::Cache => ComponentConfig::Cache(CacheConfig::default()),
            ComponentType::DatabaseSql => ComponentConfig::DatabaseSql(DatabaseConfig::default()),
            ComponentType::DatabaseNosql => {
                ComponentConfig::DatabaseNosql(DatabaseConfig::default())
            }
            ComponentType::ObjectStore => {
                ComponentConfig::ObjectStore(ObjectStoreConfig::default())
            }
            ComponentType::MessageQueue => {
                ComponentConfig::MessageQueue(MessageQueueConfig::default())
            }
        }
    }

    pub fn component_type(&self) -> ComponentType {
        match self {
            ComponentConfig::Client(_) => ComponentType::Client,
            ComponentConfig::Cdn(_) => ComponentType::Cdn,
            ComponentConfig::LoadBalancer(_) => ComponentType::LoadBalancer,
            ComponentConfig::ApiGateway(_) => ComponentType::ApiGateway,
            ComponentConfig::AppServer(_) => ComponentType::AppServer,
            ComponentConfig::Cache(_) => ComponentType::Cache,
            ComponentConfig::DatabaseSql(_) => ComponentType::DatabaseSql,
            ComponentConfig::DatabaseNosql(_) => ComponentType::DatabaseNosql,
            ComponentConfig::ObjectStore(_) => ComponentType::ObjectStore,
            ComponentConfig::MessageQueue(_) => ComponentType::MessageQueue,
        }
    }

    pub fn scaling(&self) -> Option<&Scaling> {
        match self {
            ComponentConfig::LoadBalancer(cfg) => Some(&cfg.scaling),
            ComponentConfig::ApiGateway(cfg) => Some(&cfg.scaling),
            ComponentConfig::AppServer(cfg) => Some(&cfg.scaling),
            ComponentConfig::Cache(cfg) => Some(&cfg.scaling),
            ComponentConfig::DatabaseSql(cfg) | ComponentConfig::DatabaseNosql(cfg) => {
                Some(&cfg.scaling)
            }
            ComponentConfig::MessageQueue(cfg) => Some(&cfg.scaling),
            ComponentConfig::Client(_) | ComponentConfig::Cdn(_) | ComponentConfig::ObjectStore(_) => {
                None
            }
        }
    }

    pub fn scaling_mut(&mut self) -> Option<&mut Scaling> {
        match self {
            ComponentConfig::LoadBalancer(cfg) => Some(&mut cfg.scaling),
            ComponentConfig::ApiGateway(cfg) => Some(&mut cfg.scaling),
            ComponentConfig::AppServer(cfg) => Some(&mut cfg.scaling),
            ComponentConfig::Cache(cfg) => Some(&mut cfg.scaling),
            ComponentConfig::DatabaseSql(cfg) | ComponentConfig::DatabaseNosql(cfg) => {
                Some(&mut cfg.scaling)
            }
            ComponentConfig::MessageQueue(cfg) => Some(&mut cfg.scaling),
            ComponentConfig::Client(_) | ComponentConfig::Cdn(_) | ComponentConfig::ObjectStore(_) => {
                None
            }
        }
    }

    pub fn consistency(&self) -> Option<&Consistency> {
        match self {
            ComponentConfig::Cache(cfg) => Some(&cfg.consistency),
            ComponentConfig::DatabaseSql(cfg) | ComponentConfig::DatabaseNosql(cfg) => {
                Some(&cfg.consistency)
            }
            ComponentConfig::ObjectStore(cfg) => Some(&cfg.consistency),
            ComponentConfig::MessageQueue(cfg) => Some(&cfg.consistency),
            ComponentConfig::Client(_)
            | ComponentConfig::Cdn(_)
            | ComponentConfig::LoadBalancer(_)
            | ComponentConfig::ApiGateway(_)
            | ComponentConfig::AppServer(_) => None,
        }
    }

    pub fn resilience(&self) -> Option<&Resilience> {
        match self {
            ComponentConfig::LoadBalancer(cfg) => Some(&cfg.resilience),
            ComponentConfig::ApiGateway(cfg) => Some(&cfg.resilience),
            ComponentConfig::AppServer(cfg) => Some(&cfg.resilience),
            ComponentConfig::DatabaseSql(cfg) | ComponentConfig::DatabaseNosql(cfg) => {
                Some(&cfg.resilience)
            }
            ComponentConfig::Client(_)
            | ComponentConfig::Cdn(_)
            | ComponentConfig::Cache(_)
            | ComponentConfig::ObjectStore(_)
            | ComponentConfig::MessageQueue(_) => None,
        }
    }

    pub fn resilience_mut(&mut self) -> Option<&mut Resilience> {
        match self {
            ComponentConfig::LoadBalancer(cfg) => Some(&mut cfg.resilience),
            ComponentConfig::ApiGateway(cfg) => Some(&mut cfg.resilience),
            ComponentConfig::AppServer(cfg) => Some(&mut cfg.resilience),
            ComponentConfig::DatabaseSql(cfg) | ComponentConfig::DatabaseNosql(cfg) => {
                Some(&mut cfg.resilience)
            }
            ComponentConfig::Client(_)
            | ComponentConfig::Cdn(_)
            | ComponentConfig::Cache(_)
            | ComponentConfig::ObjectStore(_)
            | ComponentConfig::MessageQueue(_) => None,
        }
    }

    pub fn traffic_control(&self) -> Option<&TrafficControl> {
        match self {
            ComponentConfig::Cdn(cfg) => Some(&cfg.traffic_control),
            ComponentConfig::LoadBalancer(cfg) => Some(&cfg.traffic_control),
            ComponentConfig::ApiGateway(cfg) => Some(&cfg.traffic_control),
            ComponentConfig::AppServer(cfg) => Some(&cfg.traffic_control),
            ComponentConfig::Client(_)
            | ComponentConfig::Cache(_)
            | ComponentConfig::DatabaseSql(_)
            | ComponentConfig::DatabaseNosql(_)
            | ComponentConfig::ObjectStore(_)
            | ComponentConfig::MessageQueue(_) => None,
        }
    }

    pub fn traffic_control_mut(&mut self) -> Option<&mut TrafficControl> {
        match self {
            ComponentConfig::Cdn(cfg) => Some(&mut cfg.traffic_control),
            ComponentConfig::LoadBalancer(cfg) => Some(&mut cfg.traffic_control),
            ComponentConfig::ApiGateway(cfg) => Some(&mut cfg.traffic_control),
            ComponentConfig::AppServer(cfg) => Some(&mut cfg.traffic_control),
            ComponentConfig::Client(_)
            | ComponentConfig::Cache(_)
            | ComponentConfig::DatabaseSql(_)
            | ComponentConfig::DatabaseNosql(_)
            | ComponentConfig::ObjectStore(_)
            | ComponentConfig::MessageQueue(_) => None,
        }
    }

    /// Configured load-balancing algorithm; only load balancers carry one.
    pub fn algorithm(&self) -> Option<LbAlgorithm> {
        match self {
            ComponentConfig::LoadBalancer(cfg) => cfg.algorithm,
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Node {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(flatten)]
    pub config: ComponentConfig,
}

impl Node {
    pub fn new(id: impl Into<String>, config: ComponentConfig) -> Self {
        Self {
            id: id.into(),
            label: None,
            position: None,
            config,
        }
    }

    pub fn of_type(id: impl Into<String>, ty: ComponentType) -> Self {
        Self::new(id, ComponentConfig::for_type(ty))
    }

    pub fn component_type(&self) -> ComponentType {
        self.config.component_type()
    }

    /// Sets instance count and per-instance capacity. Types without a scaling
    /// layer are returned unchanged.
    pub fn with_scaling(mut self, instances: u32, per_instance_capacity_rps: f64) -> Self {
        if let Some(scaling) = self.config.scaling_mut() {
            scaling.instances = instances;
            scaling.per_instance_capacity_rps = Some(per_instance_capacity_rps);
        }
        self
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput_qps: Option<f64>,
    #[serde(default)]
    pub bidirectional: bool,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            protocol: Protocol::Http,
            throughput_qps: None,
            bidirectional: false,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn entry_ids(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|node| node.component_type().is_entry())
            .map(|node| node.id.as_str())
            .collect()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ArrivalRate {
    Aggregate(f64),
    PerEntry(BTreeMap<String, f64>),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Thresholds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_p99_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_avg_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_error_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_availability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_rps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cost_monthly: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub arrival: ArrivalRate,
    #[serde(default = "default_duration_ticks")]
    pub duration_ticks: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offline: Vec<String>,
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Scenario {
    pub fn aggregate(name: impl Into<String>, rps: f64) -> Self {
        Self {
            name: name.into(),
            arrival: ArrivalRate::Aggregate(rps),
            duration_ticks: default_duration_ticks(),
            offline: Vec::new(),
            thresholds: Thresholds::default(),
        }
    }
}

fn default_duration_ticks() -> u32 {
    60
}
