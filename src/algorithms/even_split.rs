use rand::Rng;

use crate::algorithms::{even_fractions, Downstream, RoutingStrategy, Selection, SelectionContext};

/// Fan-out at nodes that are not load balancers: every edge gets an equal
/// share.
#[derive(Default)]
pub struct EvenSplitStrategy;

impl RoutingStrategy for EvenSplitStrategy {
    fn split(&self, downstream: &[Downstream]) -> Vec<f64> {
        even_fractions(downstream.len())
    }

    fn select(&mut self, ctx: &mut SelectionContext) -> Selection {
        let index = if ctx.downstream.len() <= 1 {
            0
        } else {
            ctx.rng.gen_range(0..ctx.downstream.len())
        };
        Selection { index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::downstream_with_capacities;
    use rand::SeedableRng;

    #[test]
    fn even_split_ignores_capacity() {
        let downstream = downstream_with_capacities(&[Some(1.0), Some(10.0), Some(100.0), None]);
        assert_eq!(EvenSplitStrategy.split(&downstream), vec![0.25; 4]);
    }

    #[test]
    fn even_split_pick_is_seeded() {
        let downstream = downstream_with_capacities(&[Some(1.0), Some(1.0), Some(1.0)]);
        let picks = |seed: u64| {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let mut strategy = EvenSplitStrategy;
            let mut ctx = SelectionContext {
                downstream: &downstream,
                request_id: 0,
                rng: &mut rng,
            };
            (0..10)
                .map(|_| strategy.select(&mut ctx).index)
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(11), picks(11));
    }
}
