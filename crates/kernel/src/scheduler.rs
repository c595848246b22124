use std::collections::BTreeMap;

use crate::config::{default_phases, validate_phases, KernelConfig};
use crate::entity::EntityHandle;
use crate::error::KernelError;
use crate::rng::RandomStream;
use crate::snapshot::KernelState;
use crate::streams::StreamManager;

#[derive(Debug, Clone)]
struct Registration {
    id: String,
    handle: EntityHandle,
}

/// The simulation kernel: logical time, named random streams, and a phased
/// registry of entities.
///
/// A tick runs every declared phase in order and, within a phase, every
/// entity in registration order, then advances time by one. Given the same
/// seed, phases and registration history, two kernels produce the same
/// sequence of entity invocations and the same stream draws.
#[derive(Debug)]
pub struct Kernel {
    time: u64,
    phases: Vec<String>,
    /// Phase name -> registrations in insertion order. May hold phases that
    /// are no longer declared after an import; those do not execute.
    registry: BTreeMap<String, Vec<Registration>>,
    streams: StreamManager,
}

impl Kernel {
    /// Create a kernel with the default phases.
    pub fn new(seed: u64) -> Self {
        Self {
            time: 0,
            phases: default_phases(),
            registry: BTreeMap::new(),
            streams: StreamManager::new(seed),
        }
    }

    /// Create a kernel with an explicit, non-empty and duplicate-free phase list.
    pub fn with_phases<S: Into<String>>(
        seed: u64,
        phases: impl IntoIterator<Item = S>,
    ) -> Result<Self, KernelError> {
        let phases: Vec<String> = phases.into_iter().map(Into::into).collect();
        validate_phases(&phases)?;
        Ok(Self {
            phases,
            ..Self::new(seed)
        })
    }

    pub fn from_config(config: &KernelConfig) -> Result<Self, KernelError> {
        Self::with_phases(config.seed, config.phases.iter().cloned())
    }

    /// Current logical time (number of completed ticks).
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn phases(&self) -> &[String] {
        &self.phases
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    /// Register `entity` under `id` in `phase` (first declared phase if `None`).
    ///
    /// Registering a handle that is already registered is a no-op. A
    /// different handle reusing an id that is already taken is rejected.
    pub fn register(
        &mut self,
        id: &str,
        entity: EntityHandle,
        phase: Option<&str>,
    ) -> Result<(), KernelError> {
        let phase = match phase {
            Some(p) => p.to_string(),
            None => self.phases[0].clone(),
        };
        if !self.phases.contains(&phase) {
            return Err(KernelError::UnknownPhase(phase));
        }
        if self.is_registered(&entity) {
            tracing::debug!(id, "entity already registered, ignoring");
            return Ok(());
        }
        if self.phase_of(id).is_some() {
            return Err(KernelError::DuplicateId(id.to_string()));
        }
        tracing::debug!(id, phase = %phase, "registered entity");
        self.registry.entry(phase).or_default().push(Registration {
            id: id.to_string(),
            handle: entity,
        });
        Ok(())
    }

    /// Remove `entity` from whichever phase holds it. Returns whether it was
    /// registered.
    pub fn unregister(&mut self, entity: &EntityHandle) -> bool {
        let mut removed = false;
        for regs in self.registry.values_mut() {
            let before = regs.len();
            regs.retain(|r| !r.handle.same_entity(entity));
            removed |= regs.len() != before;
        }
        if removed {
            tracing::debug!(?entity, "unregistered entity");
        }
        removed
    }

    pub fn is_registered(&self, entity: &EntityHandle) -> bool {
        self.registrations().any(|r| r.handle.same_entity(entity))
    }

    /// Phase holding the entity registered under `id`.
    pub fn phase_of(&self, id: &str) -> Option<&str> {
        self.registry
            .iter()
            .find(|(_, regs)| regs.iter().any(|r| r.id == id))
            .map(|(phase, _)| phase.as_str())
    }

    /// Ids registered in `phase`, in execution order.
    pub fn ids_in_phase(&self, phase: &str) -> Vec<&str> {
        self.registry
            .get(phase)
            .map(|regs| regs.iter().map(|r| r.id.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn entity_count(&self) -> usize {
        self.registrations().count()
    }

    fn registrations(&self) -> impl Iterator<Item = &Registration> {
        self.registry.values().flatten()
    }

    /// Stream for `name`, derived from the master stream on first use.
    pub fn get_stream(&mut self, name: &str) -> Result<&mut RandomStream, KernelError> {
        self.streams.get_stream(name)
    }

    /// Execute one tick.
    ///
    /// Each phase iterates over the registrations present when the phase
    /// starts; changes made by entities during the phase apply from the
    /// next phase on. An entity never runs twice in one tick. An entity
    /// error is returned as-is, time is not advanced and the effects of the
    /// entities that already ran are kept.
    pub fn tick(&mut self) -> anyhow::Result<()> {
        let phases = self.phases.clone();
        // Holds a strong handle to every entity that ran, so no allocation
        // is freed and reused by a new entity before the tick ends.
        let mut executed: Vec<EntityHandle> = Vec::new();
        for phase in &phases {
            let batch = self.registry.get(phase).cloned().unwrap_or_default();
            for reg in batch {
                if executed.iter().any(|h| h.same_entity(&reg.handle)) {
                    continue;
                }
                executed.push(reg.handle.clone());
                tracing::trace!(time = self.time, phase = %phase, id = %reg.id, "step");
                reg.handle.invoke(self, phase)?;
            }
        }
        self.time += 1;
        Ok(())
    }

    /// Execute `ticks` ticks, stopping at the first error.
    pub fn run(&mut self, ticks: u64) -> anyhow::Result<()> {
        let _span = tracing::info_span!("kernel_run", ticks, start = self.time).entered();
        for _ in 0..ticks {
            self.tick()?;
        }
        Ok(())
    }

    /// Capture time, phases and stream positions. Entities are not included.
    pub fn export_state(&self) -> KernelState {
        KernelState {
            time: self.time,
            phases: self.phases.clone(),
            streams: self.streams.export_state(),
        }
    }

    /// Overwrite time, phases and stream positions from `state`.
    ///
    /// The entity registry is left alone. The state is validated in full
    /// before anything is applied.
    pub fn import_state(&mut self, state: &KernelState) -> Result<(), KernelError> {
        state.validate()?;
        self.streams.import_state(&state.streams)?;
        self.time = state.time;
        self.phases = state.phases.clone();
        tracing::debug!(time = self.time, "restored kernel state");
        Ok(())
    }

    /// [`export_state`](Kernel::export_state) encoded as a snapshot blob.
    pub fn snapshot(&self) -> Result<Vec<u8>, KernelError> {
        self.export_state().to_bytes()
    }

    /// Decode a snapshot blob and [`import_state`](Kernel::import_state) it.
    pub fn restore(&mut self, blob: &[u8]) -> Result<(), KernelError> {
        let state = KernelState::from_bytes(blob)?;
        self.import_state(&state)
    }
}
