use crate::algorithms::{
    capacity_weights, normalize, Downstream, RoutingStrategy, Selection, SelectionContext,
};

/// Cycles through edges in order. In aggregate it reduces to a split
/// proportional to downstream capacity.
#[derive(Default)]
pub struct RoundRobinStrategy {
    next_idx: usize,
}

impl RoutingStrategy for RoundRobinStrategy {
    fn split(&self, downstream: &[Downstream]) -> Vec<f64> {
        normalize(capacity_weights(downstream))
    }

    fn select(&mut self, ctx: &mut SelectionContext) -> Selection {
        let len = ctx.downstream.len().max(1);
        let idx = self.next_idx % len;
        self.next_idx = (self.next_idx + 1) % len;
        Selection { index: idx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::downstream_with_capacities;
    use rand::SeedableRng;

    #[test]
    fn round_robin_cycles_indices() {
        let downstream = downstream_with_capacities(&[Some(10.0), Some(10.0), Some(10.0)]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut strategy = RoundRobinStrategy::default();
        let mut ctx = SelectionContext {
            downstream: &downstream,
            request_id: 0,
            rng: &mut rng,
        };

        assert_eq!(strategy.select(&mut ctx).index, 0);
        assert_eq!(strategy.select(&mut ctx).index, 1);
        assert_eq!(strategy.select(&mut ctx).index, 2);
        assert_eq!(strategy.select(&mut ctx).index, 0);
    }

    #[test]
    fn round_robin_aggregate_follows_capacity() {
        let downstream = downstream_with_capacities(&[Some(500.0), Some(1500.0)]);
        let strategy = RoundRobinStrategy::default();
        assert_eq!(strategy.split(&downstream), vec![0.25, 0.75]);
    }
}
