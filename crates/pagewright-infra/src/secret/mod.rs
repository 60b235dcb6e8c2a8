//! Secret resolver implementations.
//!
//! - `env`: Environment variable resolver (read-only, highest priority)
//! - `file`: `credentials.toml` resolver loaded from the data directory
//! - `chain`: Chain wiring the resolvers together in priority order

pub mod chain;
pub mod env;
pub mod file;

pub use chain::{build_secret_chain, SecretChain};
pub use env::EnvSecretResolver;
pub use file::FileSecretResolver;
