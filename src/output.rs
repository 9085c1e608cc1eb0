use serde::Serialize;
use std::fmt::Write;

use crate::error::{Error, Result};
use crate::models::{ComponentType, Protocol};
use crate::protocol::Frame;
use crate::state::{Diagnostic, HopStatus, ScenarioResult, SimulationOutput, TracedRequest};
use crate::topology::ConnectionCheck;

/// Structural overview printed by `validate`.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphReport {
    pub nodes: usize,
    pub edges: usize,
    pub entries: Vec<String>,
    pub estimated_cost_monthly: f64,
    pub diagnostics: Vec<Diagnostic>,
    pub spof_diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    pub source: ComponentType,
    pub target: ComponentType,
    pub protocol: Protocol,
    pub default_protocol: Protocol,
    #[serde(flatten)]
    pub check: ConnectionCheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_warning: Option<String>,
}

pub trait Formatter {
    fn simulation(&self, output: &SimulationOutput) -> Result<String>;
    fn graph_report(&self, report: &GraphReport) -> Result<String>;
    fn connection(&self, report: &ConnectionReport) -> Result<String>;
    /// Renders live frames; tick frames are sampled every `every` ticks and
    /// the final tick is always shown.
    fn live(&self, frames: &[Frame], every: u64) -> Result<String>;
}

pub struct HumanFormatter;
pub struct SummaryFormatter;
pub struct JsonFormatter;

fn fmt_err(err: std::fmt::Error) -> Error {
    Error::Output(err.to_string())
}

fn percent(fraction: f64) -> String {
    format!("{:.2}%", fraction * 100.0)
}

fn diagnostic_line(diagnostic: &Diagnostic) -> String {
    let target = diagnostic
        .node_id
        .as_deref()
        .or(diagnostic.edge_id.as_deref())
        .unwrap_or("-");
    let severity = diagnostic.severity.as_str();
    match &diagnostic.suggestion {
        Some(suggestion) => format!(
            "[{}] {}: {} ({})",
            severity, target, diagnostic.message, suggestion
        ),
        None => format!("[{}] {}: {}", severity, target, diagnostic.message),
    }
}

fn trace_line(trace: &TracedRequest) -> String {
    let path = trace
        .hops
        .iter()
        .map(|hop| hop.node_id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ");
    match &trace.status {
        HopStatus::Dropped { reason } => format!(
            "trace #{} dropped ({}) after {:.2}ms: {}",
            trace.request_id, reason, trace.total_ms, path
        ),
        _ => format!(
            "trace #{} completed in {:.2}ms: {}",
            trace.request_id, trace.total_ms, path
        ),
    }
}

fn last_tick(frames: &[Frame]) -> Option<u64> {
    frames.iter().rev().find_map(|frame| match frame {
        Frame::Tick(tick) => Some(tick.tick),
        _ => None,
    })
}

fn sampled(tick: u64, every: u64, last: Option<u64>) -> bool {
    Some(tick) == last || (every > 0 && tick % every == 0)
}

fn write_scenario(out: &mut String, result: &ScenarioResult) -> std::fmt::Result {
    let metrics = &result.metrics;
    writeln!(
        out,
        "Scenario: {} ({}, score {})",
        result.name,
        if result.passed { "passed" } else { "failed" },
        result.score
    )?;
    writeln!(
        out,
        "  rps: {:.2}  error rate: {}  cost: ${:.2}/month",
        metrics.rps,
        percent(metrics.error_rate),
        metrics.estimated_cost_monthly
    )?;
    writeln!(
        out,
        "  latency: avg {:.2}ms  p50 {:.2}ms  p95 {:.2}ms  p99 {:.2}ms",
        metrics.avg_latency_ms, metrics.p50_latency_ms, metrics.p95_latency_ms, metrics.p99_latency_ms
    )?;
    writeln!(
        out,
        "  ttfb: {:.2}ms  response: {:.2}ms",
        metrics.ttfb_ms, metrics.response_time_ms
    )?;
    if !metrics.bottlenecks.is_empty() {
        writeln!(out, "  bottlenecks: {}", metrics.bottlenecks.join(", "))?;
    }
    writeln!(out, "  nodes:")?;
    for node in &result.nodes {
        match node.effective_capacity_rps {
            Some(capacity) => writeln!(
                out,
                "  - {} ({}): {:.2}/{:.2} rps, {:.2}% utilization",
                node.node_id, node.component_type, node.incoming_rps, capacity, node.utilization_pct
            )?,
            None => writeln!(
                out,
                "  - {} ({}): {:.2} rps, unbounded",
                node.node_id, node.component_type, node.incoming_rps
            )?,
        }
    }
    if !result.diagnostics.is_empty() {
        writeln!(out, "  diagnostics:")?;
        for diagnostic in &result.diagnostics {
            writeln!(out, "  - {}", diagnostic_line(diagnostic))?;
        }
    }
    if !result.failed_thresholds.is_empty() {
        writeln!(
            out,
            "  failed thresholds: {}",
            result.failed_thresholds.join(", ")
        )?;
    }
    Ok(())
}

fn write_graph_report(out: &mut String, report: &GraphReport) -> std::fmt::Result {
    writeln!(
        out,
        "Graph: {} nodes, {} edges, entries: {}",
        report.nodes,
        report.edges,
        report.entries.join(", ")
    )?;
    writeln!(
        out,
        "Estimated cost: ${:.2}/month",
        report.estimated_cost_monthly
    )?;
    if report.diagnostics.is_empty() {
        writeln!(out, "Diagnostics: none")?;
    } else {
        writeln!(out, "Diagnostics:")?;
        for diagnostic in &report.diagnostics {
            writeln!(out, "- {}", diagnostic_line(diagnostic))?;
        }
    }
    if report.spof_diagnostics.is_empty() {
        writeln!(out, "Single points of failure: none")?;
    } else {
        writeln!(out, "Single points of failure:")?;
        for diagnostic in &report.spof_diagnostics {
            writeln!(out, "- {}", diagnostic_line(diagnostic))?;
        }
    }
    Ok(())
}

impl Formatter for HumanFormatter {
    fn simulation(&self, output: &SimulationOutput) -> Result<String> {
        let mut out = String::new();
        if !output.preflight.is_empty() {
            writeln!(out, "Preflight:").map_err(fmt_err)?;
            for diagnostic in &output.preflight {
                writeln!(out, "- {}", diagnostic_line(diagnostic)).map_err(fmt_err)?;
            }
        }
        for result in &output.scenarios {
            write_scenario(&mut out, result).map_err(fmt_err)?;
        }
        if output.spof_diagnostics.is_empty() {
            writeln!(out, "Single points of failure: none").map_err(fmt_err)?;
        } else {
            writeln!(out, "Single points of failure:").map_err(fmt_err)?;
            for diagnostic in &output.spof_diagnostics {
                writeln!(out, "- {}", diagnostic_line(diagnostic)).map_err(fmt_err)?;
            }
        }
        Ok(out)
    }

    fn graph_report(&self, report: &GraphReport) -> Result<String> {
        let mut out = String::new();
        write_graph_report(&mut out, report).map_err(fmt_err)?;
        Ok(out)
    }

    fn connection(&self, report: &ConnectionReport) -> Result<String> {
        let mut out = String::new();
        if report.check.valid {
            writeln!(
                out,
                "valid: {} -> {} (default protocol: {})",
                report.source, report.target, report.default_protocol
            )
            .map_err(fmt_err)?;
        } else {
            writeln!(
                out,
                "invalid: {}",
                report.check.message.as_deref().unwrap_or_default()
            )
            .map_err(fmt_err)?;
            if let Some(suggestion) = &report.check.suggestion {
                writeln!(out, "suggestion: {}", suggestion).map_err(fmt_err)?;
            }
        }
        if let Some(warning) = &report.protocol_warning {
            writeln!(out, "warning: {}", warning).map_err(fmt_err)?;
        }
        Ok(out)
    }

    fn live(&self, frames: &[Frame], every: u64) -> Result<String> {
        let last = last_tick(frames);
        let mut out = String::new();
        for frame in frames {
            let written = match frame {
                Frame::Tick(tick) if sampled(tick.tick, every, last) => writeln!(
                    out,
                    "tick {}: {} particles, rps {:.2}, avg latency {:.2}ms, errors {}",
                    tick.tick,
                    tick.particles.len(),
                    tick.metrics.rps,
                    tick.metrics.avg_latency_ms,
                    percent(tick.metrics.error_rate)
                ),
                Frame::Tick(_) => Ok(()),
                Frame::Trace { trace, .. } => writeln!(out, "{}", trace_line(trace)),
                Frame::Rejected { message, .. } => writeln!(out, "rejected: {}", message),
            };
            written.map_err(fmt_err)?;
        }
        Ok(out)
    }
}

impl Formatter for SummaryFormatter {
    fn simulation(&self, output: &SimulationOutput) -> Result<String> {
        let mut out = String::new();
        for result in &output.scenarios {
            writeln!(
                out,
                "{}: {} score={} rps={:.2} p99={:.2}ms errors={}",
                result.name,
                if result.passed { "PASS" } else { "FAIL" },
                result.score,
                result.metrics.rps,
                result.metrics.p99_latency_ms,
                percent(result.metrics.error_rate)
            )
            .map_err(fmt_err)?;
        }
        let spofs = output
            .spof_diagnostics
            .iter()
            .filter_map(|diagnostic| diagnostic.node_id.as_deref())
            .collect::<Vec<_>>();
        writeln!(
            out,
            "spofs: {}",
            if spofs.is_empty() {
                "none".to_string()
            } else {
                spofs.join(", ")
            }
        )
        .map_err(fmt_err)?;
        Ok(out)
    }

    fn graph_report(&self, report: &GraphReport) -> Result<String> {
        Ok(format!(
            "nodes={} edges={} diagnostics={} spofs={} cost={:.2}\n",
            report.nodes,
            report.edges,
            report.diagnostics.len(),
            report.spof_diagnostics.len(),
            report.estimated_cost_monthly
        ))
    }

    fn connection(&self, report: &ConnectionReport) -> Result<String> {
        Ok(format!(
            "{}\n",
            if report.check.valid { "valid" } else { "invalid" }
        ))
    }

    fn live(&self, frames: &[Frame], _every: u64) -> Result<String> {
        let traces = frames
            .iter()
            .filter(|frame| matches!(frame, Frame::Trace { .. }))
            .count();
        let rejected = frames
            .iter()
            .filter(|frame| matches!(frame, Frame::Rejected { .. }))
            .count();
        let last = frames.iter().rev().find_map(|frame| match frame {
            Frame::Tick(tick) => Some(tick),
            _ => None,
        });
        Ok(match last {
            Some(tick) => format!(
                "ticks={} rps={:.2} avg_latency={:.2}ms errors={} traces={} rejected={}\n",
                tick.tick,
                tick.metrics.rps,
                tick.metrics.avg_latency_ms,
                percent(tick.metrics.error_rate),
                traces,
                rejected
            ),
            None => format!("ticks=0 traces={} rejected={}\n", traces, rejected),
        })
    }
}

fn pretty<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map(|json| json + "\n")
        .map_err(|err| Error::Output(err.to_string()))
}

impl Formatter for JsonFormatter {
    fn simulation(&self, output: &SimulationOutput) -> Result<String> {
        pretty(output)
    }

    fn graph_report(&self, report: &GraphReport) -> Result<String> {
        pretty(report)
    }

    fn connection(&self, report: &ConnectionReport) -> Result<String> {
        pretty(report)
    }

    /// One frame per line.
    fn live(&self, frames: &[Frame], every: u64) -> Result<String> {
        let last = last_tick(frames);
        let mut out = String::new();
        for frame in frames {
            if let Frame::Tick(tick) = frame {
                if !sampled(tick.tick, every, last) {
                    continue;
                }
            }
            let line =
                serde_json::to_string(frame).map_err(|err| Error::Output(err.to_string()))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DiagnosticKind, Severity};

    fn report() -> GraphReport {
        GraphReport {
            nodes: 3,
            edges: 2,
            entries: vec!["web".to_string()],
            estimated_cost_monthly: 120.0,
            diagnostics: vec![],
            spof_diagnostics: vec![Diagnostic::for_node(
                "api",
                DiagnosticKind::SinglePointOfFailure,
                Severity::Warning,
                "api is a single point of failure",
            )],
        }
    }

    #[test]
    fn human_graph_report_lists_spofs() {
        let out = HumanFormatter.graph_report(&report()).unwrap();
        assert_eq!(
            out,
            concat!(
                "Graph: 3 nodes, 2 edges, entries: web\n",
                "Estimated cost: $120.00/month\n",
                "Diagnostics: none\n",
                "Single points of failure:\n",
                "- [warning] api: api is a single point of failure\n",
            )
        );
    }

    #[test]
    fn summary_graph_report_is_one_line() {
        let out = SummaryFormatter.graph_report(&report()).unwrap();
        assert_eq!(out, "nodes=3 edges=2 diagnostics=0 spofs=1 cost=120.00\n");
    }

    #[test]
    fn sampling_always_keeps_the_last_tick() {
        assert!(sampled(7, 10, Some(7)));
        assert!(sampled(10, 10, Some(12)));
        assert!(!sampled(3, 10, Some(12)));
        assert!(!sampled(3, 0, Some(12)));
    }

    #[test]
    fn dropped_trace_names_the_reason() {
        let trace = TracedRequest {
            request_id: 4,
            entry_id: "web".to_string(),
            hops: vec![],
            status: HopStatus::Dropped {
                reason: "overloaded".to_string(),
            },
            total_ms: 12.5,
        };
        assert_eq!(trace_line(&trace), "trace #4 dropped (overloaded) after 12.50ms: ");
    }
}
