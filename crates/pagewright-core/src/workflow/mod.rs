//! Workflow engine core: document validation, graph execution, and node
//! dispatch.
//!
//! This module contains the "brain" of the execution engine:
//! - `validate` -- JSON parsing, schema validation, structural lint
//! - `graph` -- graph index, successor resolution, cycle detection
//! - `context` -- scoped execution context with template rendering
//! - `expression` -- sandboxed JEXL evaluator for routes, transforms, exits
//! - `retry` -- bounded retry schedule and the loop circuit breaker
//! - `node_runner` -- per-kind node handlers over the provider ports
//! - `engine` -- the sequential graph walk, abort, and the run ceiling

pub mod context;
pub mod engine;
pub mod expression;
pub mod graph;
pub mod node_runner;
pub mod retry;
pub mod validate;
