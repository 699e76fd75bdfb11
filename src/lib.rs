//! Human-like memory for concurrent client agents ("CIs").
//!
//! ESR stores discrete thoughts in a fast bounded cache, makes the ones that
//! get used repeatedly durable by writing them to every configured backend,
//! and forgets the ones nobody touches. Thoughts are linked into a
//! bidirectional association graph, so recalling one brings related thoughts
//! to mind.
//!
//! | Tier | Role | Lifetime |
//! |------|------|----------|
//! | **Cache** | Every new thought; LRU-bounded | Until evicted or forgotten |
//! | **Backends** | Promoted thoughts, replicated everywhere | Durable |
//! | **Graph** | Associations between thought keys | Until either end is forgotten |
//!
//! # Architecture
//!
//! - **Cache**: content-addressed entries, LRU eviction, promotion after
//!   `promotion_threshold` retrievals
//! - **Fan-out**: one concurrent call per backend, each with its own timeout;
//!   partial failure shrinks the result instead of failing it
//! - **Synthesis**: per-backend answers reconciled by summed confidence, then speed
//! - **Metabolism**: one background task that promotes candidates and forgets
//!   stale entries each interval
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`error`]: Library error type
//! - [`backend`]: Backend adapter trait, fan-out, and response synthesis
//! - [`memory`]: Cache, association graph, cognitive operations, and metabolism
//! - [`system`]: [`EsrMemorySystem`], the assembled engine

pub mod backend;
pub mod config;
pub mod error;
pub mod memory;
pub mod system;

pub use backend::{BackendAdapter, BackendKind, MemoryResponse};
pub use config::EsrConfig;
pub use error::{Error, Result};
pub use memory::types::{Thought, ThoughtInput, ThoughtType};
pub use system::EsrMemorySystem;
