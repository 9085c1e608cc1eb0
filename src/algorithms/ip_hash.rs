use crate::algorithms::{even_fractions, Downstream, RoutingStrategy, Selection, SelectionContext};

/// Sticky routing keyed on the request id. Hashing spreads keys evenly, so the
/// aggregate split ignores capacity.
#[derive(Default)]
pub struct IpHashStrategy;

fn mix(mut key: u64) -> u64 {
    key = key.wrapping_add(0x9E37_79B9_7F4A_7C15);
    key = (key ^ (key >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    key = (key ^ (key >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    key ^ (key >> 31)
}

impl RoutingStrategy for IpHashStrategy {
    fn split(&self, downstream: &[Downstream]) -> Vec<f64> {
        even_fractions(downstream.len())
    }

    fn select(&mut self, ctx: &mut SelectionContext) -> Selection {
        let len = ctx.downstream.len().max(1) as u64;
        Selection { index: (mix(ctx.request_id) % len) as usize }
    }
}
