use crate::algorithms::{
    capacity_weights, normalize, pick_weighted, Downstream, RoutingStrategy, Selection,
    SelectionContext,
};

/// Default load-balancer policy: flow follows downstream effective capacity.
#[derive(Default)]
pub struct ProportionalStrategy;

impl RoutingStrategy for ProportionalStrategy {
    fn split(&self, downstream: &[Downstream]) -> Vec<f64> {
        normalize(capacity_weights(downstream))
    }

    fn select(&mut self, ctx: &mut SelectionContext) -> Selection {
        let fractions = self.split(ctx.downstream);
        Selection {
            index: pick_weighted(&fractions, ctx.rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::downstream_with_capacities;
    use rand::SeedableRng;

    #[test]
    fn zero_capacity_targets_are_never_picked() {
        let downstream = downstream_with_capacities(&[Some(0.0), Some(50.0)]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let mut strategy = ProportionalStrategy;
        let mut ctx = SelectionContext {
            downstream: &downstream,
            request_id: 0,
            rng: &mut rng,
        };
        for _ in 0..20 {
            assert_eq!(strategy.select(&mut ctx).index, 1);
        }
    }
}
