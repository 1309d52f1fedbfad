//! # Chousa - Offline Flow Execution Engine
//!
//! **Chousa** runs branching questionnaires ("flows") on a device that may be offline for
//! days. A run advances one node at a time, suspends while it waits for a response, and is
//! persisted after every transition so it survives a crash or a restart. Completed runs are
//! frozen into submissions that an upload layer sends to the server later.
//!
//! ## Core Workflow
//!
//! 1.  **Provide Flows**: Implement [`FlowSource`](engine::FlowSource) over your flow cache,
//!     or use [`MemoryFlowSource`](engine::MemoryFlowSource).
//! 2.  **Pick a Store**: [`MemoryStore`](store::MemoryStore) for tests,
//!     [`FileStore`](store::FileStore) for durable, crash-resumable runs.
//! 3.  **Build an Engine**: `Engine::builder(org, store, flows)` with an optional
//!     [`EngineConfig`](config::EngineConfig).
//! 4.  **Drive Runs**: `start_run`, then `advance` until the run waits, then `resume` with
//!     each response. Completed runs show up in `list_pending`.
//!
//! Flows are loaded in a fixed order: the declared spec version is checked against the
//! version gate before anything else in the document is looked at, then the document is
//! converted and validated. Custom formats can skip the JSON layer by implementing
//! [`IntoFlow`](flow::IntoFlow).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chousa::prelude::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let flows = Arc::new(MemoryFlowSource::new());
//!     flows.insert(&std::fs::read_to_string("flows/age.json")?)?;
//!
//!     let org = OrgContext::new("org-1", "Field Office");
//!     let store = Arc::new(FileStore::open("runs")?);
//!     let engine = Engine::builder(org, store, flows).build();
//!
//!     let contact = ContactContext::new(Some("contact-1".to_string())).with_language("eng");
//!     let run = engine.start_run("age-flow", contact)?;
//!
//!     // Executes the greeting and stops at the first question.
//!     let run = engine.advance(run.run_uuid)?;
//!     for step in &run.steps {
//!         for message in &step.messages {
//!             println!("{}", message);
//!         }
//!     }
//!
//!     let run = engine.resume(run.run_uuid, "15")?;
//!     println!("Status: {}", run.status);
//!     println!("Category: {:?}", run.steps.last().and_then(|s| s.category.clone()));
//!
//!     for submission in engine.list_pending()? {
//!         println!("{}", submission.to_payload());
//!     }
//!     Ok(())
//! }
//! ```

pub mod ast;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod flow;
pub mod legacy;
pub mod loader;
pub mod matcher;
pub mod prelude;
pub mod store;
