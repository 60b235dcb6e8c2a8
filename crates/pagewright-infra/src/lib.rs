//! Infrastructure adapters for Pagewright.
//!
//! Implements the `pagewright-core` provider ports against real backends:
//! SQLite artifact storage, environment/file secret resolution, filesystem
//! workflow sources, a static session provider, and scripted replay
//! providers for offline runs.

pub mod config;
pub mod replay;
pub mod secret;
pub mod session;
pub mod source;
pub mod sqlite;
