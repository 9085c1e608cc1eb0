use crate::algorithms::{
    capacity_weights, normalize, pick_lowest, Downstream, RoutingStrategy, Selection,
    SelectionContext,
};

/// Picks the edge whose target has the fewest in-flight requests per unit of
/// capacity.
#[derive(Default)]
pub struct LeastConnectionsStrategy;

impl RoutingStrategy for LeastConnectionsStrategy {
    fn split(&self, downstream: &[Downstream]) -> Vec<f64> {
        normalize(capacity_weights(downstream))
    }

    fn select(&mut self, ctx: &mut SelectionContext) -> Selection {
        let weights = capacity_weights(ctx.downstream);
        let scores: Vec<f64> = ctx
            .downstream
            .iter()
            .zip(weights)
            .map(|(d, weight)| {
                if weight > 0.0 {
                    d.in_flight as f64 / weight
                } else {
                    f64::MAX
                }
            })
            .collect();
        Selection {
            index: pick_lowest(&scores, ctx.rng),
        }
    }
}
