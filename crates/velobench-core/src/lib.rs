//! VeloBench core types and contracts
//!
//! This crate provides the fundamental types shared by every VeloBench
//! service:
//!
//! - [`types`]: the benchmark data model (conversations, credits, records)
//! - [`error`]: error kinds and the crate-wide `Result` alias
//! - [`config`]: the validated profile configuration assembled by the CLI
//! - [`context`]: run context with seeded sub-RNG derivation
//! - [`clock`]: monotonic timing anchor shared by all services
//! - [`tokenizer`]: the tokenizer contract plus the reference implementation

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod tokenizer;
pub mod types;

pub use clock::MonoClock;
pub use config::ProfileConfig;
pub use context::RunContext;
pub use error::{Error, Result};
