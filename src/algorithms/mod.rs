mod even_split;
mod ip_hash;
mod least_connections;
mod least_response_time;
mod proportional;
mod round_robin;
mod weighted_round_robin;

use rand::{Rng, RngCore};

use crate::models::{ComponentConfig, LbAlgorithm};

pub use even_split::EvenSplitStrategy;
pub use ip_hash::IpHashStrategy;
pub use least_connections::LeastConnectionsStrategy;
pub use least_response_time::LeastResponseTimeStrategy;
pub use proportional::ProportionalStrategy;
pub use round_robin::RoundRobinStrategy;
pub use weighted_round_robin::WeightedRoundRobinStrategy;

/// Fan-out policy at a node with several outgoing edges.
///
/// `split` answers the aggregate question for the batch engine (what fraction
/// of flow takes each edge) and `select` makes one discrete pick for the live
/// engine.
pub trait RoutingStrategy: Send {
    fn split(&self, downstream: &[Downstream]) -> Vec<f64>;
    fn select(&mut self, ctx: &mut SelectionContext) -> Selection;
}

/// One outgoing edge as seen by a routing policy.
#[derive(Clone, Debug, PartialEq)]
pub struct Downstream {
    pub edge: usize,
    /// Effective capacity of the edge's target; `None` is unbounded.
    pub capacity: Option<f64>,
    pub utilization: f64,
    pub in_flight: u64,
    pub latency_ms: f64,
}

impl Downstream {
    pub fn new(edge: usize, capacity: Option<f64>) -> Self {
        Self {
            edge,
            capacity,
            utilization: 0.0,
            in_flight: 0,
            latency_ms: 0.0,
        }
    }
}

pub struct SelectionContext<'a> {
    pub downstream: &'a [Downstream],
    pub request_id: u64,
    pub rng: &'a mut dyn RngCore,
}

/// Index into the downstream slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
}

pub fn build_strategy(config: &ComponentConfig) -> Box<dyn RoutingStrategy> {
    match config {
        ComponentConfig::LoadBalancer(cfg) => match cfg.algorithm {
            Some(LbAlgorithm::RoundRobin) => Box::new(RoundRobinStrategy::default()),
            Some(LbAlgorithm::WeightedRoundRobin) => {
                Box::new(WeightedRoundRobinStrategy::default())
            }
            Some(LbAlgorithm::LeastConnections) => Box::new(LeastConnectionsStrategy),
            Some(LbAlgorithm::LeastResponseTime) => Box::new(LeastResponseTimeStrategy),
            Some(LbAlgorithm::IpHash) => Box::new(IpHashStrategy),
            None => Box::new(ProportionalStrategy),
        },
        _ => Box::new(EvenSplitStrategy),
    }
}

pub(crate) fn even_fractions(len: usize) -> Vec<f64> {
    if len == 0 {
        return Vec::new();
    }
    vec![1.0 / len as f64; len]
}

/// Normalizes weights into fractions, falling back to an even split when no
/// weight is positive.
pub(crate) fn normalize(weights: Vec<f64>) -> Vec<f64> {
    let total: f64 = weights
        .iter()
        .filter(|w| w.is_finite() && **w > 0.0)
        .sum();
    if total <= 0.0 {
        return even_fractions(weights.len());
    }
    weights
        .into_iter()
        .map(|w| if w.is_finite() && w > 0.0 { w / total } else { 0.0 })
        .collect()
}

/// Capacity weights; an unbounded target weighs as much as the largest
/// bounded one.
pub(crate) fn capacity_weights(downstream: &[Downstream]) -> Vec<f64> {
    let max_bounded = downstream
        .iter()
        .filter_map(|d| d.capacity)
        .fold(0.0_f64, f64::max);
    let unbounded = if max_bounded > 0.0 { max_bounded } else { 1.0 };
    downstream
        .iter()
        .map(|d| d.capacity.unwrap_or(unbounded))
        .collect()
}

pub(crate) fn pick_weighted(fractions: &[f64], rng: &mut dyn RngCore) -> usize {
    let roll = rng.gen::<f64>();
    let mut cursor = 0.0;
    for (idx, fraction) in fractions.iter().enumerate() {
        cursor += fraction;
        if roll < cursor {
            return idx;
        }
    }
    fractions
        .iter()
        .rposition(|fraction| *fraction > 0.0)
        .unwrap_or(0)
}

/// Lowest-score candidates, with a seeded pick among ties.
pub(crate) fn pick_lowest(scores: &[f64], rng: &mut dyn RngCore) -> usize {
    let mut min_score = f64::INFINITY;
    let mut candidates = Vec::new();

    for (idx, score) in scores.iter().copied().enumerate() {
        if score < min_score {
            min_score = score;
            candidates.clear();
            candidates.push(idx);
        } else if score == min_score {
            candidates.push(idx);
        }
    }

    match candidates.len() {
        0 => 0,
        1 => candidates[0],
        len => candidates[rng.gen_range(0..len)],
    }
}

#[cfg(test)]
pub(crate) fn downstream_with_capacities(capacities: &[Option<f64>]) -> Vec<Downstream> {
    capacities
        .iter()
        .enumerate()
        .map(|(edge, capacity)| Downstream::new(edge, *capacity))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentType, LoadBalancerConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn normalize_falls_back_to_even_split() {
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.5, 0.5]);
        assert_eq!(normalize(vec![3.0, 1.0]), vec![0.75, 0.25]);
    }

    #[test]
    fn unbounded_targets_weigh_like_the_largest() {
        let downstream = downstream_with_capacities(&[Some(100.0), None, Some(300.0)]);
        assert_eq!(capacity_weights(&downstream), vec![100.0, 300.0, 300.0]);
    }

    #[test]
    fn pick_weighted_skips_zero_fractions() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            assert_eq!(pick_weighted(&[0.0, 1.0, 0.0], &mut rng), 1);
        }
    }

    #[test]
    fn pick_lowest_uses_seeded_tiebreak() {
        let scores = [2.0, 1.0, 1.0];
        let candidates = [1usize, 2];
        let mut rng = StdRng::seed_from_u64(42);
        let expected = candidates[rng.gen_range(0..candidates.len())];
        let mut rng = StdRng::seed_from_u64(42);
        assert_eq!(pick_lowest(&scores, &mut rng), expected);
    }

    #[test]
    fn load_balancer_without_algorithm_splits_by_capacity() {
        let config = ComponentConfig::LoadBalancer(LoadBalancerConfig::default());
        let strategy = build_strategy(&config);
        let downstream = downstream_with_capacities(&[Some(100.0), Some(300.0)]);
        assert_eq!(strategy.split(&downstream), vec![0.25, 0.75]);
    }

    #[test]
    fn non_balancers_split_evenly() {
        let config = ComponentConfig::for_type(ComponentType::AppServer);
        let strategy = build_strategy(&config);
        let downstream = downstream_with_capacities(&[Some(100.0), Some(300.0)]);
        assert_eq!(strategy.split(&downstream), vec![0.5, 0.5]);
    }
}
