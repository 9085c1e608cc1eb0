use thiserror::Error;

/// Malformed graph input. Blocks both engines and is never repaired.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("graph has no entry nodes: add at least one client")]
    NoEntryNodes,
    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),
    #[error("duplicate edge id '{0}'")]
    DuplicateEdgeId(String),
    #[error("edge '{edge}' references missing node '{node}'")]
    DanglingEdge { edge: String, node: String },
    #[error("node id must not be empty")]
    EmptyNodeId,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("scenario name must not be empty")]
    EmptyScenarioName,
    #[error("scenario '{scenario}' references unknown entry node '{node}'")]
    UnknownScenarioEntry { scenario: String, node: String },
    #[error("scenario '{scenario}' has invalid arrival rate {rate}")]
    InvalidArrivalRate { scenario: String, rate: f64 },
    #[error("scenario '{0}' must run for at least one tick")]
    ZeroDuration(String),
    #[error("speed must be > 0 (got {0})")]
    InvalidSpeed(f64),
    #[error("load factor must be >= 0 (got {0})")]
    InvalidLoadFactor(f64),
    #[error("playback speed must be > 0 (got {0})")]
    InvalidPlaybackSpeed(f64),
    #[error("live engine is not initialized")]
    EngineNotInitialized,
    #[error("unknown entry node '{0}'")]
    UnknownEntryNode(String),
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error("live engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("{0}")]
    ConfigIo(String),
    #[error("{0}")]
    ConfigParse(String),
    #[error("unsupported config format '{0}'")]
    UnsupportedConfigFormat(String),
    #[error("{0}")]
    Cli(String),
    #[error("failed to render output: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, Error>;
