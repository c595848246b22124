//! Simulation kernel: named deterministic random streams, phased scheduling
//! of entities, and snapshot/restore of the kernel state.
//!
//! # Invariants
//! - Same seed, phases and registration history produce the same entity
//!   invocations and the same stream draws.
//! - Phases run in declared order; entities run in registration order
//!   within a phase, at most once per tick.
//! - A snapshot restored into any kernel resumes bit-identically.

pub mod config;
pub mod entity;
pub mod error;
pub mod rng;
pub mod scheduler;
pub mod snapshot;
pub mod streams;

pub use config::{KernelConfig, DEFAULT_PHASES};
pub use entity::{Entity, EntityHandle, PhasedEntity};
pub use error::KernelError;
pub use rng::{RandomStream, StreamState};
pub use scheduler::Kernel;
pub use snapshot::KernelState;
pub use streams::{StreamManager, StreamManagerState};
