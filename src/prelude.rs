//! Prelude module for convenient imports
//!
//! This module re-exports the most commonly used types and traits from the chousa crate.
//! Import this module to get access to the core functionality without having to import
//! each type individually.
//!
//! # Example
//!
//! ```rust,no_run
//! use chousa::prelude::*;
//!
//! # fn run_example() -> Result<()> {
//! let flow = load(&std::fs::read_to_string("path/to/flow.json")?)?;
//! println!("{} has {} questions", flow.name(), flow.question_count());
//! # Ok(())
//! # }
//! ```

// Engine and run state
pub use crate::config::EngineConfig;
pub use crate::engine::{
    AsyncOutcome, Clock, Engine, FlowSource, FlowSummary, ManualClock, MemoryFlowSource, Run,
    RunStatus, Step, SystemClock,
};

// Flow model and loading
pub use crate::flow::{
    Action, ActionSet, ContactCreation, Flow, FlowDefinition, FlowType, IntoFlow, LocalizedText,
    Rule, RuleSet, RuleTest, RulesetType, SpecVersion, VersionGate,
};
pub use crate::loader::{FlowLoader, load};

// Expressions and values
pub use crate::ast::{Expression, Value, parse_expression};
pub use crate::data::{ContactContext, Locale, OrgContext};
pub use crate::evaluator::{EvaluationContext, evaluate, render};

// Persistence
pub use crate::legacy::LegacyArchive;
pub use crate::store::{FileStore, MemoryStore, Submission, SubmissionStore};

// Error types
pub use crate::error::{DefinitionError, EngineError, EvaluationError, LoadError, StoreError};

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;
