use crate::ast::Value;
use crate::engine::RunStatus;
use crate::flow::SpecVersion;
use thiserror::Error;
use uuid::Uuid;

/// A syntax error inside an operand, field value or rule threshold.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid expression '{expression}' at offset {offset}: {message}")]
pub struct ExpressionError {
    pub expression: String,
    pub offset: usize,
    pub message: String,
}

/// Structural or format defects that make a flow definition unusable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("Failed to parse flow JSON: {0}")]
    JsonParseError(String),

    #[error("Flow definition is missing required field '{0}'")]
    MissingField(String),

    #[error("Spec version '{0}' is not a valid version")]
    InvalidVersion(String),

    #[error("Flow type '{0}' cannot be executed, only surveys are supported")]
    UnsupportedFlowType(String),

    #[error("Entry node '{0}' does not exist")]
    EntryNotFound(String),

    #[error("Node id '{0}' is used by more than one node")]
    DuplicateNodeId(String),

    #[error("Node '{node_id}' points to destination '{destination}', which does not exist")]
    DanglingDestination { node_id: String, destination: String },

    #[error("Ruleset '{0}' must end in a catch-all rule but has none")]
    MissingCatchAll(String),

    #[error("Ruleset '{ruleset_id}' has {count} catch-all rules, expected exactly one")]
    MultipleCatchAll { ruleset_id: String, count: usize },

    #[error("Node '{node_id}' has an unregistered or invalid {kind} type: '{type_name}'")]
    InvalidType {
        node_id: String,
        kind: &'static str,
        type_name: String,
    },

    #[error("Node '{node_id}' contains an invalid expression: {source}")]
    InvalidExpression {
        node_id: String,
        source: ExpressionError,
    },

    #[error("Node '{node_id}' has an invalid regex '{pattern}': {message}")]
    InvalidRegex {
        node_id: String,
        pattern: String,
        message: String,
    },

    #[error("Node '{node_id}' is invalid: {message}")]
    InvalidNode { node_id: String, message: String },
}

/// Errors raised while loading a flow, before any run exists.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("Flow spec version {version} is outside the supported major range [{min}, {max}]")]
    UnsupportedVersion {
        version: SpecVersion,
        min: u32,
        max: u32,
    },

    #[error(transparent)]
    InvalidDefinition(#[from] DefinitionError),
}

/// Errors that can occur while evaluating expressions and rule tests during a step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error(
        "Type mismatch during operation '{operation}': expected {expected}, but found {} value '{found}'",
        .found.type_name()
    )]
    TypeMismatch {
        operation: String,
        expected: String,
        found: Value,
    },

    #[error("Division by zero in '{0}'")]
    DivisionByZero(String),

    #[error("Date arithmetic out of range in '{0}'")]
    DateOutOfRange(String),

    #[error("Arithmetic in '{0}' has no finite result")]
    NonFiniteResult(String),

    #[error("No rule of ruleset '{0}' matched and it has no catch-all")]
    NoMatchingRule(String),

    #[error("Node '{0}' does not exist in the pinned flow revision")]
    NodeNotFound(String),

    #[error("Run advanced through {0} nodes without reaching input or an end")]
    StepLimitExceeded(usize),
}

/// Errors raised by a submission store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Run {0} was not found in the store")]
    NotFound(Uuid),

    #[error("Run {0} is already being stepped by another caller")]
    Busy(Uuid),

    #[error("Run {0} is completed and can no longer be modified")]
    Immutable(Uuid),

    #[error("Run {run_uuid} cannot be finalized while it is {status}")]
    NotCompleted { run_uuid: Uuid, status: RunStatus },

    #[error("I/O failure on '{path}': {message}")]
    Io { path: String, message: String },

    #[error("Record encoding failed: {0}")]
    Encode(String),

    #[error("Record decoding failed for '{path}': {message}")]
    Decode { path: String, message: String },
}

/// Errors surfaced by the engine's public operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Flow spec version {version} is outside the supported major range [{min}, {max}]")]
    UnsupportedVersion {
        version: SpecVersion,
        min: u32,
        max: u32,
    },

    #[error("Invalid flow definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),

    #[error("Evaluation failed, run abandoned: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Persistence failed, the step was not applied: {0}")]
    Persistence(StoreError),

    #[error("Run {0} was not found")]
    RunNotFound(Uuid),

    #[error("Run {0} is already being stepped by another caller")]
    RunBusy(Uuid),

    #[error("Flow '{0}' is not available from the flow source")]
    FlowUnavailable(String),

    #[error("Revision {revision} of flow '{flow_uuid}' is not available from the flow source")]
    RevisionUnavailable { flow_uuid: String, revision: u32 },

    #[error("Run {run_uuid} is {status}, expected {expected}")]
    InvalidState {
        run_uuid: Uuid,
        status: RunStatus,
        expected: RunStatus,
    },

    #[error("Run {0} is completed")]
    RunFinished(Uuid),

    #[error(transparent)]
    Legacy(#[from] LegacyError),
}

impl From<LoadError> for EngineError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::UnsupportedVersion { version, min, max } => {
                EngineError::UnsupportedVersion { version, min, max }
            }
            LoadError::InvalidDefinition(e) => EngineError::InvalidDefinition(e),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(uuid) => EngineError::RunNotFound(uuid),
            StoreError::Busy(uuid) => EngineError::RunBusy(uuid),
            other => EngineError::Persistence(other),
        }
    }
}

/// Errors raised while reading the legacy submission archive.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LegacyError {
    #[error("Could not read legacy archive '{path}': {message}")]
    Io { path: String, message: String },

    #[error("Legacy submission '{path}' is malformed: {message}")]
    Malformed { path: String, message: String },
}

/// Errors raised while loading configuration or context files.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Could not read '{path}': {message}")]
    Io { path: String, message: String },

    #[error("Could not parse '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
