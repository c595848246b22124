use agentsim_kernel::{EntityHandle, Kernel, KernelConfig};
use agentsim_persist::Checkpoint;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::agent::{Agent, AgentEntity};
use crate::error::LabError;
use crate::logger::SimLogger;

struct AgentSlot {
    agent: Rc<RefCell<dyn Agent>>,
    handle: EntityHandle,
}

/// A kernel together with the agents registered on it.
///
/// Agents are registered under their own id. Checkpoints pair the kernel
/// snapshot with each agent's own state so a run can be resumed exactly.
pub struct Experiment {
    kernel: Kernel,
    agents: Vec<AgentSlot>,
    logger: Option<SimLogger>,
    started: bool,
}

impl Experiment {
    /// Kernel with `seed` and the given phases (default phases if `None`).
    pub fn new(seed: u64, phases: Option<Vec<String>>) -> Result<Self, LabError> {
        let kernel = match phases {
            Some(phases) => Kernel::with_phases(seed, phases)?,
            None => Kernel::new(seed),
        };
        Ok(Self::with_kernel(kernel))
    }

    pub fn from_config(config: &KernelConfig) -> Result<Self, LabError> {
        Ok(Self::with_kernel(Kernel::from_config(config)?))
    }

    fn with_kernel(kernel: Kernel) -> Self {
        Self {
            kernel,
            agents: Vec::new(),
            logger: None,
            started: false,
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    /// Record a `"run"` event for every subsequent [`run`](Experiment::run).
    pub fn attach_logger(&mut self, logger: SimLogger) {
        self.logger = Some(logger);
    }

    pub fn logger(&self) -> Option<&SimLogger> {
        self.logger.as_ref()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents
            .iter()
            .map(|slot| slot.agent.borrow().id().to_string())
            .collect()
    }

    /// Register `agent` under its id in `phase` (first phase if `None`).
    /// Adding the same agent twice is a no-op.
    pub fn add_agent<A: Agent + 'static>(
        &mut self,
        agent: Rc<RefCell<A>>,
        phase: Option<&str>,
    ) -> Result<(), LabError> {
        let agent: Rc<RefCell<dyn Agent>> = agent;
        if self.agents.iter().any(|slot| Rc::ptr_eq(&slot.agent, &agent)) {
            return Ok(());
        }
        let id = agent.borrow().id().to_string();
        let handle = EntityHandle::phased(Rc::new(RefCell::new(AgentEntity::new(agent.clone()))));
        self.kernel.register(&id, handle.clone(), phase)?;
        self.agents.push(AgentSlot { agent, handle });
        Ok(())
    }

    /// Unregister and forget the agent with `id`. Returns whether it existed.
    pub fn remove_agent(&mut self, id: &str) -> bool {
        let Some(pos) = self
            .agents
            .iter()
            .position(|slot| slot.agent.borrow().id() == id)
        else {
            return false;
        };
        let slot = self.agents.remove(pos);
        self.kernel.unregister(&slot.handle);
        true
    }

    /// Run `steps` ticks. Agents' `on_start` hooks run before the first run.
    pub fn run(&mut self, steps: u64) -> anyhow::Result<()> {
        let _span = tracing::info_span!("experiment_run", steps).entered();
        if !self.started {
            for slot in &self.agents {
                slot.agent.borrow_mut().on_start(&mut self.kernel)?;
            }
            self.started = true;
        }
        let start = self.kernel.time();
        self.kernel.run(steps)?;
        if let Some(logger) = self.logger.as_mut() {
            logger.log(
                "run",
                "experiment",
                json!({ "start": start, "steps": steps, "time": self.kernel.time() }),
            );
        }
        Ok(())
    }

    /// Kernel snapshot plus every agent's own state.
    pub fn snapshot(&self) -> Result<Checkpoint, LabError> {
        let agent_states: BTreeMap<String, Value> = self
            .agents
            .iter()
            .map(|slot| {
                let agent = slot.agent.borrow();
                (agent.id().to_string(), agent.snapshot())
            })
            .collect();
        Ok(Checkpoint::new(self.kernel.snapshot()?, agent_states))
    }

    /// Restore kernel state, then every agent from its entry (an agent with
    /// no entry is restored from `{}`).
    ///
    /// A bad kernel blob changes nothing. An agent that rejects its state
    /// stops the restore after the kernel and earlier agents were restored.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<(), LabError> {
        self.kernel.restore(&checkpoint.kernel_blob)?;
        let empty = json!({});
        for slot in &self.agents {
            let mut agent = slot.agent.borrow_mut();
            let state = checkpoint.agent_states.get(agent.id()).unwrap_or(&empty);
            agent.restore(state)?;
        }
        self.started = true;
        tracing::debug!(time = self.kernel.time(), "restored experiment");
        Ok(())
    }
}
