//! Execution boundary for the live engine.
//!
//! The engine runs on a dedicated worker thread. The surface talks to it only
//! through two FIFO crossbeam channels: [`Command`]s in, [`Frame`]s out. While
//! running, the worker ticks on a fixed wall-clock cadence and blocks on
//! `crossbeam::select!` between ticks:
//!
//! ```text
//! shutdown > commands > tick deadline
//! ```
//!
//! Missed ticks are never replayed; after a pause the cadence restarts from
//! the resume time.

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::live::{LiveEngine, LivePhase, TickOutput};
use crate::models::{Graph, Node};
use crate::state::{TickFrame, TracedRequest};

/// How long an idle worker blocks before re-checking its schedule.
const IDLE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    Init {
        graph: Graph,
        #[serde(default = "unit_rate")]
        speed: f64,
        #[serde(default = "unit_rate")]
        load_factor: f64,
    },
    Start,
    Pause,
    Step,
    InjectRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entry_id: Option<String>,
    },
    SetSpeed {
        value: f64,
    },
    SetLoadFactor {
        value: f64,
    },
    UpdateNodes {
        nodes: Vec<Node>,
    },
    SelectNode {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
    },
    Reset,
}

impl Command {
    /// Commands that start a new engine instance on the worker.
    pub fn bumps_epoch(&self) -> bool {
        matches!(self, Command::Init { .. } | Command::Reset)
    }
}

fn unit_rate() -> f64 {
    1.0
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    Tick(TickFrame),
    Trace { epoch: u64, trace: TracedRequest },
    Rejected { epoch: u64, message: String },
}

impl Frame {
    pub fn epoch(&self) -> u64 {
        match self {
            Frame::Tick(frame) => frame.epoch,
            Frame::Trace { epoch, .. } | Frame::Rejected { epoch, .. } => *epoch,
        }
    }
}

/// Applies one command and returns the frames it produced.
pub fn apply_command(engine: &mut LiveEngine, command: Command) -> Vec<Frame> {
    debug!(?command, "applying command");
    let outcome = match command {
        Command::Init {
            graph,
            speed,
            load_factor,
        } => engine.init(graph, speed, load_factor).map(|_| None),
        Command::Start => engine.start().map(|_| None),
        Command::Pause => engine.pause().map(|_| None),
        Command::Step => engine.step().map(Some),
        Command::InjectRequest { entry_id } => {
            engine.inject_request(entry_id.as_deref()).map(|_| None)
        }
        Command::SetSpeed { value } => engine.set_speed(value).map(|_| None),
        Command::SetLoadFactor { value } => engine.set_load_factor(value).map(|_| None),
        Command::UpdateNodes { nodes } => engine.update_nodes(nodes).map(|_| None),
        Command::SelectNode { node_id } => engine.select_node(node_id).map(|_| None),
        Command::Reset => {
            engine.reset();
            Ok(None)
        }
    };

    match outcome {
        Ok(Some(output)) => frames_from(output),
        Ok(None) => Vec::new(),
        Err(err) => {
            warn!(epoch = engine.epoch(), error = %err, "command rejected");
            vec![Frame::Rejected {
                epoch: engine.epoch(),
                message: err.to_string(),
            }]
        }
    }
}

fn frames_from(output: TickOutput) -> Vec<Frame> {
    let epoch = output.frame.epoch;
    let mut frames = Vec::with_capacity(1 + output.traces.len());
    frames.push(Frame::Tick(output.frame));
    frames.extend(
        output
            .traces
            .into_iter()
            .map(|trace| Frame::Trace { epoch, trace }),
    );
    frames
}

/// Surface side of a running worker. Dropping the handle stops the worker.
pub struct EngineHandle {
    commands: Option<Sender<Command>>,
    frames: Receiver<Frame>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    epoch: u64,
}

impl EngineHandle {
    pub fn send(&mut self, command: Command) -> Result<()> {
        if command.bumps_epoch() {
            self.epoch += 1;
        }
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| Error::EngineUnavailable("worker stopped".to_string()))?;
        commands
            .send(command)
            .map_err(|_| Error::EngineUnavailable("worker exited".to_string()))
    }

    /// Epoch the surface expects on fresh frames.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// False for frames produced by an engine instance a later `init` or
    /// `reset` superseded.
    pub fn is_current(&self, frame: &Frame) -> bool {
        frame.epoch() == self.epoch
    }

    pub fn try_recv(&self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Frame> {
        self.frames.recv_timeout(timeout).ok()
    }

    /// Next frame of the current epoch, discarding stale ones.
    pub fn recv_current(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = self.frames.recv_timeout(remaining).ok()?;
            if self.is_current(&frame) {
                return Some(frame);
            }
            debug!(frame_epoch = frame.epoch(), epoch = self.epoch, "stale frame dropped");
        }
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.commands.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("live worker panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts a live engine on its own worker thread.
pub fn spawn_engine(settings: EngineSettings) -> Result<EngineHandle> {
    let (command_tx, command_rx) = unbounded();
    let (frame_tx, frame_rx) = unbounded();
    let (shutdown_tx, shutdown_rx) = bounded(1);
    let interval = Duration::from_millis(settings.live.tick_interval_ms.max(1));
    let engine = LiveEngine::new(&settings);

    let worker = thread::Builder::new()
        .name("infra-sim-live".to_string())
        .spawn(move || run_worker(engine, interval, command_rx, frame_tx, shutdown_rx))
        .map_err(|err| Error::EngineUnavailable(err.to_string()))?;

    Ok(EngineHandle {
        commands: Some(command_tx),
        frames: frame_rx,
        shutdown: Some(shutdown_tx),
        worker: Some(worker),
        epoch: 0,
    })
}

fn run_worker(
    mut engine: LiveEngine,
    interval: Duration,
    commands: Receiver<Command>,
    frames: Sender<Frame>,
    shutdown: Receiver<()>,
) {
    info!(interval_ms = interval.as_millis() as u64, "live worker starting");
    let mut next_tick: Option<Instant> = None;

    loop {
        if shutdown.try_recv().is_ok() {
            break;
        }

        let timeout = next_tick
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_TIMEOUT);

        let produced = crossbeam::channel::select! {
            recv(shutdown) -> _ => break,
            recv(commands) -> command => match command {
                Ok(command) => apply_command(&mut engine, command),
                Err(_) => {
                    debug!("command channel closed");
                    break;
                }
            },
            default(timeout) => Vec::new(),
        };
        if !publish(&frames, produced) {
            break;
        }

        if engine.phase() != LivePhase::Running {
            next_tick = None;
            continue;
        }
        let now = Instant::now();
        let deadline = *next_tick.get_or_insert(now + interval);
        if now >= deadline {
            let produced = engine.tick().map(frames_from).unwrap_or_default();
            if !publish(&frames, produced) {
                break;
            }
            next_tick = Some(now + interval);
        }
    }

    info!(ticks = engine.tick_count(), "live worker exiting");
}

fn publish(frames: &Sender<Frame>, produced: Vec<Frame>) -> bool {
    for frame in produced {
        if frames.send(frame).is_err() {
            debug!("frame receiver dropped");
            return false;
        }
    }
    true
}
