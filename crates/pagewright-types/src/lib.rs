//! Shared domain types for Pagewright.
//!
//! This crate contains the wire and domain types used across the engine:
//! workflow documents, actions, selector cache entries, memory artifacts,
//! run outcomes, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod action;
pub mod artifact;
pub mod config;
pub mod error;
pub mod run;
pub mod selector;
pub mod workflow;
