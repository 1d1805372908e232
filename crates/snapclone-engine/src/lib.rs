//! Clone/recover orchestration engine: admits clone and recover
//! requests against a volume, drives each through its per-task step
//! machine to completion, and cleans up after ones that fail.
//!
//! Everything this crate calls out to — the volume service, snapshot
//! catalog and data, task persistence, id minting — is a trait in
//! [`ports`]; no concrete backend, RPC transport, or worker scheduler
//! lives here. [`memory`] ships fakes for exactly that reason: to let
//! the engine itself be exercised with nothing external running.

pub mod admission;
pub mod cleanup;
pub mod clock;
pub mod engine;
pub mod executor;
pub mod memory;
pub mod plan;
pub mod ports;
pub mod ref_counter;

pub use admission::CloneRequest;
pub use engine::{Engine, EngineError, TaskGuard, TaskLocks};
pub use ref_counter::SnapshotRefCounter;
