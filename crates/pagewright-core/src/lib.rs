//! Execution engine and collaborator ports for Pagewright.
//!
//! This crate defines the "ports" (provider traits) that the infrastructure
//! layer implements and the engine that drives them. It depends only on
//! `pagewright-types` -- never on `pagewright-infra` or any database/IO
//! crate, so the whole engine is testable against in-memory stubs.

pub mod credential;
pub mod memory;
pub mod provider;
pub mod resolver;
pub mod selector;
pub mod workflow;
