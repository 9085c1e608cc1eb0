//! Playback of completed request traces.
//!
//! Replay never touches an engine: a state is a pure function of the traces,
//! the playback speed and the wall time fed to [`TraceReplay::advance`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::{HopStatus, TracedRequest};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ReplayPhase {
    Pending,
    Traveling { progress: f64 },
    Processing { progress: f64 },
    Finished { status: HopStatus },
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplayState {
    pub request_id: u64,
    pub hop_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(flatten)]
    pub phase: ReplayPhase,
}

#[derive(Clone, Debug)]
pub struct TraceReplay {
    traces: Vec<TracedRequest>,
    speed: f64,
    clock_ms: f64,
}

impl TraceReplay {
    pub fn new(traces: Vec<TracedRequest>, speed: f64) -> Result<Self> {
        validate_speed(speed)?;
        Ok(Self {
            traces,
            speed,
            clock_ms: 0.0,
        })
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Virtual milliseconds elapsed in trace time.
    pub fn clock_ms(&self) -> f64 {
        self.clock_ms
    }

    /// Trace time at which the slowest request finishes.
    pub fn duration_ms(&self) -> f64 {
        self.traces
            .iter()
            .filter_map(|trace| trace.hops.last())
            .map(|hop| hop.departure_ms)
            .fold(0.0, f64::max)
    }

    /// Moves the clock forward by `wall_ms` of real time.
    pub fn advance(&mut self, wall_ms: f64) {
        if wall_ms.is_finite() && wall_ms > 0.0 {
            self.clock_ms += wall_ms * self.speed;
        }
    }

    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        validate_speed(speed)?;
        self.speed = speed;
        Ok(())
    }

    /// Jumps to `clock_ms` of trace time.
    pub fn seek(&mut self, clock_ms: f64) {
        self.clock_ms = if clock_ms.is_finite() {
            clock_ms.max(0.0)
        } else {
            0.0
        };
    }

    pub fn reset(&mut self) {
        self.clock_ms = 0.0;
    }

    pub fn is_finished(&self) -> bool {
        self.clock_ms >= self.duration_ms()
    }

    pub fn states(&self) -> Vec<ReplayState> {
        self.traces
            .iter()
            .map(|trace| state_at(trace, self.clock_ms))
            .collect()
    }
}

fn validate_speed(speed: f64) -> Result<()> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidPlaybackSpeed(speed))
    }
}

fn fraction(elapsed: f64, span: f64) -> f64 {
    if span > 0.0 {
        (elapsed / span).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

fn state_at(trace: &TracedRequest, clock: f64) -> ReplayState {
    let state = |hop_index: usize, phase: ReplayPhase| ReplayState {
        request_id: trace.request_id,
        hop_index,
        node_id: trace.hops.get(hop_index).map(|hop| hop.node_id.clone()),
        phase,
    };

    for (idx, hop) in trace.hops.iter().enumerate() {
        if clock < hop.arrival_ms {
            let phase = match idx.checked_sub(1).map(|prev| &trace.hops[prev]) {
                None => ReplayPhase::Pending,
                Some(prev) => ReplayPhase::Traveling {
                    progress: fraction(clock - prev.departure_ms, hop.arrival_ms - prev.departure_ms),
                },
            };
            return state(idx, phase);
        }
        if clock < hop.departure_ms {
            return state(
                idx,
                ReplayPhase::Processing {
                    progress: fraction(clock - hop.arrival_ms, hop.departure_ms - hop.arrival_ms),
                },
            );
        }
    }

    state(
        trace.hops.len().saturating_sub(1),
        ReplayPhase::Finished {
            status: trace.status.clone(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TraceHop;

    fn hop(node: &str, arrival: f64, processing: f64) -> TraceHop {
        TraceHop {
            node_id: node.to_string(),
            edge_id: None,
            arrival_ms: arrival,
            processing_ms: processing,
            departure_ms: arrival + processing,
            status: HopStatus::Forwarded,
        }
    }

    fn trace() -> TracedRequest {
        TracedRequest {
            request_id: 7,
            entry_id: "client".to_string(),
            hops: vec![
                hop("client", 0.0, 0.0),
                hop("lb", 10.0, 2.0),
                hop("app", 22.0, 20.0),
            ],
            status: HopStatus::Completed,
            total_ms: 42.0,
        }
    }

    #[test]
    fn phases_follow_the_clock() {
        let mut replay = TraceReplay::new(vec![trace()], 1.0).unwrap();
        let at = |replay: &TraceReplay| replay.states().remove(0);

        replay.seek(5.0);
        let state = at(&replay);
        assert_eq!(state.hop_index, 1);
        assert_eq!(state.node_id.as_deref(), Some("lb"));
        assert_eq!(state.phase, ReplayPhase::Traveling { progress: 0.5 });

        replay.seek(11.0);
        assert_eq!(at(&replay).phase, ReplayPhase::Processing { progress: 0.5 });

        replay.seek(32.0);
        let state = at(&replay);
        assert_eq!(state.node_id.as_deref(), Some("app"));
        assert_eq!(state.phase, ReplayPhase::Processing { progress: 0.5 });

        replay.seek(50.0);
        assert_eq!(
            at(&replay).phase,
            ReplayPhase::Finished {
                status: HopStatus::Completed
            }
        );
        assert!(replay.is_finished());
    }

    #[test]
    fn speed_scales_wall_time() {
        let mut slow = TraceReplay::new(vec![trace()], 0.5).unwrap();
        let mut fast = TraceReplay::new(vec![trace()], 2.0).unwrap();
        slow.advance(20.0);
        fast.advance(5.0);
        assert_eq!(slow.clock_ms(), 10.0);
        assert_eq!(slow.states(), fast.states());
    }

    #[test]
    fn replay_is_deterministic_across_resets() {
        let mut replay = TraceReplay::new(vec![trace()], 1.5).unwrap();
        replay.advance(9.0);
        let first = replay.states();
        replay.reset();
        assert_eq!(replay.clock_ms(), 0.0);
        replay.advance(4.0);
        replay.advance(5.0);
        assert_eq!(replay.states(), first);
    }

    #[test]
    fn invalid_speed_is_rejected() {
        assert!(matches!(
            TraceReplay::new(vec![], 0.0),
            Err(Error::InvalidPlaybackSpeed(_))
        ));
        let mut replay = TraceReplay::new(vec![trace()], 1.0).unwrap();
        assert!(replay.set_speed(f64::INFINITY).is_err());
        assert_eq!(replay.speed(), 1.0);
    }

    #[test]
    fn pending_before_first_hop() {
        let mut delayed = trace();
        for hop in &mut delayed.hops {
            hop.arrival_ms += 100.0;
            hop.departure_ms += 100.0;
        }
        let replay = TraceReplay::new(vec![delayed], 1.0).unwrap();
        let state = replay.states().remove(0);
        assert_eq!(state.phase, ReplayPhase::Pending);
        assert_eq!(state.hop_index, 0);
    }

    #[test]
    fn state_serializes_with_phase_tag() {
        let mut replay = TraceReplay::new(vec![trace()], 1.0).unwrap();
        replay.seek(11.0);
        let json = serde_json::to_value(replay.states()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "requestId": 7,
                "hopIndex": 1,
                "nodeId": "lb",
                "phase": "processing",
                "progress": 0.5
            }])
        );
    }
}
