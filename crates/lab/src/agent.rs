use agentsim_kernel::{Kernel, PhasedEntity};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::LabError;

/// An agent driven by the kernel.
///
/// Agents that draw randomness must do so through `kernel.get_stream`, by
/// convention with their own id as the stream name.
pub trait Agent {
    fn id(&self) -> &str;

    /// Called once before the first tick of an experiment.
    fn on_start(&mut self, _kernel: &mut Kernel) -> anyhow::Result<()> {
        Ok(())
    }

    fn observe(&mut self, _obs: &Value) {}

    fn act(&mut self, kernel: &mut Kernel) -> anyhow::Result<()>;

    /// Per-phase hook. Acts in every phase unless overridden.
    fn step_phase(&mut self, kernel: &mut Kernel, _phase: &str) -> anyhow::Result<()> {
        self.act(kernel)
    }

    fn snapshot(&self) -> Value {
        json!({ "agent_id": self.id() })
    }

    /// Load state produced by [`snapshot`](Agent::snapshot). The agent id is
    /// fixed at registration and must not change here.
    fn restore(&mut self, data: &Value) -> Result<(), LabError>;
}

/// Registers an [`Agent`] with the kernel as a phase-aware entity.
pub(crate) struct AgentEntity {
    agent: Rc<RefCell<dyn Agent>>,
}

impl AgentEntity {
    pub(crate) fn new(agent: Rc<RefCell<dyn Agent>>) -> Self {
        Self { agent }
    }
}

impl PhasedEntity for AgentEntity {
    fn step_phase(&mut self, kernel: &mut Kernel, phase: &str) -> anyhow::Result<()> {
        self.agent.borrow_mut().step_phase(kernel, phase)
    }
}

/// Adds one uniform draw from its own stream to a running total per act.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterAgent {
    agent_id: String,
    counter: f64,
}

impl CounterAgent {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            counter: 0.0,
        }
    }

    pub fn shared(agent_id: impl Into<String>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(agent_id)))
    }

    pub fn counter(&self) -> f64 {
        self.counter
    }
}

impl Agent for CounterAgent {
    fn id(&self) -> &str {
        &self.agent_id
    }

    fn act(&mut self, kernel: &mut Kernel) -> anyhow::Result<()> {
        self.counter += kernel.get_stream(&self.agent_id)?.draw_float();
        Ok(())
    }

    fn snapshot(&self) -> Value {
        json!({ "agent_id": self.agent_id, "counter": self.counter })
    }

    /// A missing counter resets to zero; a non-numeric one is rejected, as
    /// is state saved under a different agent id.
    fn restore(&mut self, data: &Value) -> Result<(), LabError> {
        match data.get("agent_id") {
            Some(id) if id.as_str() != Some(self.agent_id.as_str()) => {
                return Err(LabError::AgentState {
                    agent: self.agent_id.clone(),
                    reason: format!("state belongs to agent {id}"),
                });
            }
            _ => {}
        }
        let counter = match data.get("counter") {
            None => 0.0,
            Some(v) => v.as_f64().ok_or_else(|| LabError::AgentState {
                agent: self.agent_id.clone(),
                reason: format!("counter is not a number: {v}"),
            })?,
        };
        self.counter = counter;
        Ok(())
    }
}
