#![cfg_attr(docsrs, feature(doc_cfg))]
//! Laios is a local-first autonomous agent runtime.
//!
//! A goal submitted to the [`agent::AgentController`] is decomposed by the
//! [`planner::Planner`] into a task DAG, scheduled by the
//! [`execution::Executor`] against the [`tool::ToolRegistry`] (guarded by
//! the [`hardening`] layer and intercepted by [`plugin`] hooks), evaluated
//! by the [`reflector::Reflector`], optionally replanned, and persisted to
//! [`memory`] as an episode. Chat messages bypass planning and stream
//! straight from the [`llm`] router.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use laios::prelude::*;
//!
//! let controller = AgentController::new(Config::default())?;
//! let session = controller.create_session("user-1").await;
//! let reply = controller.process_message(&session.id, "Hello!").await?;
//! let outcome = controller
//!     .execute_goal(&session.id, Goal::new("summarize ./notes.txt"))
//!     .await?;
//! ```

// Core data model and services
pub mod config;
pub mod error;
pub mod types;

// Tooling
pub mod tool;
pub mod tools;

// Extension substrate
pub mod events;
pub mod plugin;

// LLM access
pub mod llm;

// Hardening
pub mod hardening;

// Execution spine
pub mod execution;
pub mod planner;
pub mod reflector;

// Persistence and the public surface
pub mod agent;
pub mod memory;
pub mod prelude;

// Re-export commonly used types
pub use agent::{AgentController, GoalOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use types::{Goal, Plan, Task, TaskResult, TaskStatus};
