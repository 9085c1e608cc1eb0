use crate::algorithms::{
    capacity_weights, normalize, pick_lowest, Downstream, RoutingStrategy, Selection,
    SelectionContext,
};

/// Prefers the edge with the lowest expected hop latency under current load.
#[derive(Default)]
pub struct LeastResponseTimeStrategy;

fn score(downstream: &Downstream) -> f64 {
    let utilization = if downstream.utilization.is_finite() {
        downstream.utilization.max(0.0)
    } else {
        f64::MAX
    };
    downstream.latency_ms.max(0.0) * (1.0 + utilization)
}

impl RoutingStrategy for LeastResponseTimeStrategy {
    fn split(&self, downstream: &[Downstream]) -> Vec<f64> {
        let weights = capacity_weights(downstream)
            .into_iter()
            .zip(downstream)
            .map(|(weight, d)| {
                if d.latency_ms > 0.0 {
                    weight / d.latency_ms
                } else {
                    weight
                }
            })
            .collect();
        normalize(weights)
    }

    fn select(&mut self, ctx: &mut SelectionContext) -> Selection {
        let scores: Vec<f64> = ctx.downstream.iter().map(score).collect();
        Selection {
            index: pick_lowest(&scores, ctx.rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::downstream_with_capacities;
    use rand::{Rng, SeedableRng};

    #[test]
    fn least_response_time_prefers_lowest_score() {
        let mut downstream = downstream_with_capacities(&[Some(10.0), Some(10.0), Some(10.0)]);
        downstream[0].latency_ms = 30.0;
        downstream[1].latency_ms = 10.0;
        downstream[1].utilization = 2.0;
        downstream[2].latency_ms = 20.0;
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut strategy = LeastResponseTimeStrategy;
        let mut ctx = SelectionContext {
            downstream: &downstream,
            request_id: 0,
            rng: &mut rng,
        };

        let selection = strategy.select(&mut ctx);
        assert_eq!(selection.index, 2);
    }

    #[test]
    fn least_response_time_uses_seeded_tiebreak() {
        let mut downstream = downstream_with_capacities(&[Some(10.0), Some(10.0), Some(10.0)]);
        downstream[0].latency_ms = 10.0;
        downstream[1].latency_ms = 5.0;
        downstream[1].utilization = 1.0;
        downstream[2].latency_ms = 20.0;
        let candidates = [0usize, 1];
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        let expected = candidates[rng.gen_range(0..candidates.len())];

        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        let mut ctx = SelectionContext {
            downstream: &downstream,
            request_id: 0,
            rng: &mut rng,
        };

        let selection = LeastResponseTimeStrategy.select(&mut ctx);
        assert_eq!(selection.index, expected);
    }

    #[test]
    fn faster_targets_take_more_aggregate_flow() {
        let mut downstream = downstream_with_capacities(&[Some(100.0), Some(100.0)]);
        downstream[0].latency_ms = 30.0;
        downstream[1].latency_ms = 10.0;
        let split = LeastResponseTimeStrategy.split(&downstream);
        assert!(split[1] > split[0]);
        assert!((split[0] + split[1] - 1.0).abs() < 1e-12);
    }
}
