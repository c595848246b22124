//! Experiment layer on top of the kernel: agents, a message-queue network
//! stub, an event logger, and a runner that checkpoints kernel and agent
//! state together.

pub mod agent;
mod error;
pub mod logger;
pub mod network;
pub mod runner;

pub use agent::{Agent, CounterAgent};
pub use error::LabError;
pub use logger::{LogEvent, SimLogger};
pub use network::{Message, Network};
pub use runner::Experiment;
