// Public modules
pub mod conflict;
pub mod context;
pub mod environment;
pub mod error;
pub mod executor;
pub mod git;
pub mod jenkins;
pub mod notify;
pub mod orchestrator;
pub mod policy;
pub mod poll;
pub mod record;
pub mod revision;
pub mod store;

// Internal modules - not part of public API
pub(crate) mod keychain;
pub(crate) mod paths;

// Public modules for CLI access
pub mod config;
pub mod defaults;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
