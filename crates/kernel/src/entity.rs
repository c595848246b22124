use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::scheduler::Kernel;

/// Generic per-tick behaviour. Called once per tick in whichever phase the
/// entity is registered.
pub trait Entity {
    fn step(&mut self, kernel: &mut Kernel) -> anyhow::Result<()>;
}

/// Phase-aware behaviour. Receives the name of the phase being executed.
pub trait PhasedEntity {
    fn step_phase(&mut self, kernel: &mut Kernel, phase: &str) -> anyhow::Result<()>;
}

/// A registered entity, tagged with the capability it was registered with.
///
/// The caller keeps its own `Rc` to the entity to inspect or snapshot it;
/// the kernel holds a second one. Handles compare by pointer identity.
#[derive(Clone)]
pub enum EntityHandle {
    Generic(Rc<RefCell<dyn Entity>>),
    Phased(Rc<RefCell<dyn PhasedEntity>>),
}

impl EntityHandle {
    pub fn generic<E: Entity + 'static>(entity: Rc<RefCell<E>>) -> Self {
        Self::Generic(entity)
    }

    pub fn phased<E: PhasedEntity + 'static>(entity: Rc<RefCell<E>>) -> Self {
        Self::Phased(entity)
    }

    /// Whether both handles refer to the same entity allocation.
    pub fn same_entity(&self, other: &EntityHandle) -> bool {
        self.addr() == other.addr()
    }

    fn addr(&self) -> *const () {
        match self {
            Self::Generic(e) => Rc::as_ptr(e) as *const (),
            Self::Phased(e) => Rc::as_ptr(e) as *const (),
        }
    }

    pub(crate) fn invoke(&self, kernel: &mut Kernel, phase: &str) -> anyhow::Result<()> {
        // A re-entrant tick from inside a step would alias the entity.
        match self {
            Self::Generic(e) => e
                .try_borrow_mut()
                .map_err(|_| anyhow::anyhow!("entity is already executing"))?
                .step(kernel),
            Self::Phased(e) => e
                .try_borrow_mut()
                .map_err(|_| anyhow::anyhow!("entity is already executing"))?
                .step_phase(kernel, phase),
        }
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Generic(_) => "Generic",
            Self::Phased(_) => "Phased",
        };
        write!(f, "EntityHandle::{kind}({:p})", self.addr())
    }
}
