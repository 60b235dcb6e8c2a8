//! Collaborator ports.
//!
//! Everything the engine consumes from the outside world -- browser
//! primitives, cognition, secrets, artifact storage, sessions, workflow
//! sources -- is a trait defined here and implemented in `pagewright-infra`
//! (or by test doubles). Traits use RPITIT async methods; the ones the engine
//! holds behind `Arc` get an object-safe `*Dyn` twin with boxed futures and a
//! blanket implementation.

pub mod artifacts;
pub mod browser;
pub mod cognition;
pub mod secrets;
pub mod session;
pub mod source;

pub use artifacts::ArtifactStore;
pub use browser::{BrowserProvider, BrowserProviderDyn, DynBrowserProvider};
pub use cognition::{CognitionProvider, CognitionProviderDyn, DynCognitionProvider};
pub use secrets::{DynSecretResolver, SecretResolver, SecretResolverDyn};
pub use session::{DynSessionProvider, SessionHandle, SessionProvider, SessionProviderDyn};
pub use source::WorkflowSource;
