use crate::algorithms::{
    capacity_weights, normalize, Downstream, RoutingStrategy, Selection, SelectionContext,
};

const MAX_WEIGHT: u64 = 1_000;

/// Round robin where each edge gets turns in proportion to its target's
/// capacity, relative to the smallest bounded target.
#[derive(Default)]
pub struct WeightedRoundRobinStrategy {
    cursor: u64,
    total_weight: u64,
    prefix_sums: Vec<u64>,
    cached_weights: Vec<u64>,
}

impl WeightedRoundRobinStrategy {
    fn weights(downstream: &[Downstream]) -> Vec<u64> {
        let raw = capacity_weights(downstream);
        let min_positive = raw
            .iter()
            .copied()
            .filter(|w| w.is_finite() && *w > 0.0)
            .fold(f64::INFINITY, f64::min);
        raw.into_iter()
            .map(|w| {
                if !min_positive.is_finite() || !w.is_finite() || w <= 0.0 {
                    1
                } else {
                    ((w / min_positive).round() as u64).clamp(1, MAX_WEIGHT)
                }
            })
            .collect()
    }

    fn rebuild_cache(&mut self, weights: Vec<u64>) {
        self.total_weight = 0;
        self.prefix_sums.clear();
        self.prefix_sums.reserve(weights.len());

        for weight in &weights {
            self.total_weight += weight;
            self.prefix_sums.push(self.total_weight);
        }

        self.cached_weights = weights;
        self.cursor %= self.total_weight.max(1);
    }
}

impl RoutingStrategy for WeightedRoundRobinStrategy {
    fn split(&self, downstream: &[Downstream]) -> Vec<f64> {
        normalize(capacity_weights(downstream))
    }

    fn select(&mut self, ctx: &mut SelectionContext) -> Selection {
        let weights = Self::weights(ctx.downstream);
        if self.prefix_sums.is_empty() || self.cached_weights != weights {
            self.rebuild_cache(weights);
        }
        if self.total_weight == 0 {
            return Selection { index: 0 };
        }

        let target = self.cursor % self.total_weight;
        self.cursor = (self.cursor + 1) % self.total_weight;

        let selected = self
            .prefix_sums
            .binary_search_by(|sum| {
                if *sum > target {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Less
                }
            })
            .unwrap_or_else(|idx| idx);

        Selection { index: selected }
    }
}
