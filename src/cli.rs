use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::capacity::estimate_graph_cost;
use crate::config::{load_config, SimFile};
use crate::engine::run_batch;
use crate::error::{Error, Result};
use crate::live::LiveEngine;
use crate::models::{ComponentType, Protocol, Scenario};
use crate::output::{
    ConnectionReport, Formatter, GraphReport, HumanFormatter, JsonFormatter, SummaryFormatter,
};
use crate::protocol::{apply_command, Command};
use crate::topology::{
    allowed_targets, default_protocol, find_spofs, preflight, protocol_warning,
    validate_connection, GraphView,
};

#[derive(Parser, Debug)]
#[command(name = "infra-sim", version, about = "Capacity and latency simulator for service topologies")]
pub struct Cli {
    /// Log engine progress to stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every scenario in a config file through the batch engine
    Run {
        config: PathBuf,
        #[arg(long, value_enum, default_value_t = FormatArg::Human)]
        format: FormatArg,
        #[arg(long, help = "Override the seed from the config file")]
        seed: Option<u64>,
        #[arg(long = "scenario", help = "Only run the named scenario (repeatable)")]
        scenarios: Vec<String>,
        #[arg(long, help = "Run a single ad-hoc scenario at this aggregate rate")]
        rps: Option<f64>,
    },
    /// Check a graph and print structural diagnostics
    Validate {
        config: PathBuf,
        #[arg(long, value_enum, default_value_t = FormatArg::Human)]
        format: FormatArg,
    },
    /// Check whether one component type may connect to another
    CheckConnection {
        source: ComponentType,
        target: ComponentType,
        #[arg(long, value_enum)]
        protocol: Option<ProtocolArg>,
        #[arg(long, value_enum, default_value_t = FormatArg::Human)]
        format: FormatArg,
    },
    /// Drive the live engine for a fixed number of ticks
    Live {
        config: PathBuf,
        #[arg(long, default_value_t = 100)]
        ticks: u64,
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
        #[arg(long, default_value_t = 1.0)]
        load_factor: f64,
        #[arg(long, default_value_t = 0, help = "Traced requests injected on the first tick")]
        inject: usize,
        #[arg(long, default_value_t = 10, help = "Print every Nth tick")]
        every: u64,
        #[arg(long, value_enum, default_value_t = FormatArg::Human)]
        format: FormatArg,
    },
    /// List component types and their legal downstream types
    ListComponents,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatArg {
    Human,
    Summary,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ProtocolArg {
    Http,
    Grpc,
    Websocket,
    Tcp,
    Udp,
    Custom,
}

impl From<ProtocolArg> for Protocol {
    fn from(value: ProtocolArg) -> Self {
        match value {
            ProtocolArg::Http => Protocol::Http,
            ProtocolArg::Grpc => Protocol::Grpc,
            ProtocolArg::Websocket => Protocol::Websocket,
            ProtocolArg::Tcp => Protocol::Tcp,
            ProtocolArg::Udp => Protocol::Udp,
            ProtocolArg::Custom => Protocol::Custom,
        }
    }
}

pub fn formatter_for(format: FormatArg) -> Box<dyn Formatter> {
    match format {
        FormatArg::Human => Box::new(HumanFormatter),
        FormatArg::Summary => Box::new(SummaryFormatter),
        FormatArg::Json => Box::new(JsonFormatter),
    }
}

/// Executes a parsed command line and returns what should be printed.
pub fn execute(cli: &Cli) -> Result<String> {
    match &cli.command {
        Commands::Run {
            config,
            format,
            seed,
            scenarios,
            rps,
        } => {
            let mut file = load_config(config)?;
            if let Some(seed) = seed {
                file.settings.seed = *seed;
            }
            let selected = select_scenarios(&file, scenarios, *rps)?;
            let output = run_batch(&file.graph, &selected, &file.settings)?;
            formatter_for(*format).simulation(&output)
        }
        Commands::Validate { config, format } => {
            let file = load_config(config)?;
            let report = graph_report(&file)?;
            formatter_for(*format).graph_report(&report)
        }
        Commands::CheckConnection {
            source,
            target,
            protocol,
            format,
        } => {
            let report = connection_report(*source, *target, protocol.map(Protocol::from));
            formatter_for(*format).connection(&report)
        }
        Commands::Live {
            config,
            ticks,
            speed,
            load_factor,
            inject,
            every,
            format,
        } => {
            let file = load_config(config)?;
            let mut engine = LiveEngine::new(&file.settings);
            let mut commands = vec![Command::Init {
                graph: file.graph,
                speed: *speed,
                load_factor: *load_factor,
            }];
            commands.extend((0..*inject).map(|_| Command::InjectRequest { entry_id: None }));
            commands.extend((0..*ticks).map(|_| Command::Step));

            let mut frames = Vec::new();
            for command in commands {
                frames.extend(apply_command(&mut engine, command));
            }
            formatter_for(*format).live(&frames, *every)
        }
        Commands::ListComponents => Ok(list_components()),
    }
}

fn select_scenarios(file: &SimFile, names: &[String], rps: Option<f64>) -> Result<Vec<Scenario>> {
    if let Some(rps) = rps {
        return Ok(vec![Scenario::aggregate("ad-hoc", rps)]);
    }
    if file.scenarios.is_empty() {
        return Err(Error::Cli(
            "no scenarios to run: add [[scenarios]] to the config or pass --rps".to_string(),
        ));
    }
    if names.is_empty() {
        return Ok(file.scenarios.clone());
    }
    names
        .iter()
        .map(|name| {
            file.scenarios
                .iter()
                .find(|scenario| &scenario.name == name)
                .cloned()
                .ok_or_else(|| Error::Cli(format!("unknown scenario '{}'", name)))
        })
        .collect()
}

pub fn graph_report(file: &SimFile) -> Result<GraphReport> {
    let view = GraphView::build(&file.graph)?;
    Ok(GraphReport {
        nodes: file.graph.nodes.len(),
        edges: file.graph.edges.len(),
        entries: view
            .entries
            .iter()
            .map(|&idx| view.ids[idx].clone())
            .collect(),
        estimated_cost_monthly: estimate_graph_cost(&file.graph),
        diagnostics: preflight(&file.graph, &view),
        spof_diagnostics: find_spofs(&view),
    })
}

pub fn connection_report(
    source: ComponentType,
    target: ComponentType,
    protocol: Option<Protocol>,
) -> ConnectionReport {
    let check = validate_connection(source, target);
    let default = default_protocol(source, target);
    let protocol = protocol.unwrap_or(default);
    let protocol_warning = if check.valid {
        protocol_warning(source, target, protocol)
    } else {
        None
    };
    ConnectionReport {
        source,
        target,
        protocol,
        default_protocol: default,
        check,
        protocol_warning,
    }
}

fn list_components() -> String {
    ComponentType::ALL
        .iter()
        .map(|ty| {
            let targets = allowed_targets(*ty);
            if targets.is_empty() {
                format!("{}: terminal\n", ty)
            } else {
                let names = targets
                    .iter()
                    .map(|target| target.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} -> {}\n", ty, names)
            }
        })
        .collect()
}
