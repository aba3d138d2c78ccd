use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use super::world::Simulation;

static REGISTRY_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_registry_lock_poison_once() {
    if REGISTRY_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!("tick step waiter lock poisoned; recovered inner value");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepCompletion {
    pub requested_steps: u32,
    pub completed_steps: u32,
}

pub type StepWaiter = Box<dyn FnOnce(StepCompletion) + Send + 'static>;

struct PendingStep {
    requested_steps: u32,
    waiter: StepWaiter,
}

#[derive(Default)]
struct WaiterRegistry {
    pending: Option<PendingStep>,
    requests: u64,
    deliveries: u64,
    peak_outstanding: u32,
}

#[derive(Clone, Default)]
pub struct TickStepCoordinator {
    registry: Arc<Mutex<WaiterRegistry>>,
}

impl std::fmt::Debug for TickStepCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        f.debug_struct("TickStepCoordinator")
            .field("outstanding", &registry.pending.is_some())
            .field("requests", &registry.requests)
            .field("deliveries", &registry.deliveries)
            .finish()
    }
}

impl TickStepCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `waiter` and asks `simulation` for `steps` steps.
    ///
    /// The caller checks [`Simulation::is_steppable`] first and never has two
    /// requests outstanding. A waiter still pending from an earlier request is
    /// replaced with a warning.
    pub fn request_step<F>(&self, simulation: &mut dyn Simulation, steps: u32, waiter: F)
    where
        F: FnOnce(StepCompletion) + Send + 'static,
    {
        {
            let mut registry = self.lock();
            let outstanding = u32::from(registry.pending.is_some()) + 1;
            if outstanding > 1 {
                warn!(steps, "tick_step_waiter_replaced");
            }
            registry.peak_outstanding = registry.peak_outstanding.max(outstanding);
            registry.pending = Some(PendingStep {
                requested_steps: steps,
                waiter: Box::new(waiter),
            });
            registry.requests = registry.requests.saturating_add(1);
        }
        debug!(steps, "tick_step_requested");
        // The lock is released first: simulations may complete synchronously.
        simulation.request_step(steps);
    }

    pub fn notify_step_completed(&self, completed_steps: u32) -> bool {
        let pending = {
            let mut registry = self.lock();
            let pending = registry.pending.take();
            if pending.is_some() {
                registry.deliveries = registry.deliveries.saturating_add(1);
            }
            pending
        };

        match pending {
            Some(PendingStep {
                requested_steps,
                waiter,
            }) => {
                debug!(requested_steps, completed_steps, "tick_step_completed");
                waiter(StepCompletion {
                    requested_steps,
                    completed_steps,
                });
                true
            }
            None => {
                debug!(completed_steps, "tick_step_completion_without_waiter");
                false
            }
        }
    }

    pub fn cancel(&self) -> bool {
        let cancelled = self.lock().pending.take().is_some();
        if cancelled {
            debug!("tick_step_waiter_cancelled");
        }
        cancelled
    }

    pub fn outstanding(&self) -> u32 {
        u32::from(self.lock().pending.is_some())
    }

    pub fn peak_outstanding(&self) -> u32 {
        self.lock().peak_outstanding
    }

    pub fn requests(&self) -> u64 {
        self.lock().requests
    }

    pub fn deliveries(&self) -> u64 {
        self.lock().deliveries
    }

    fn lock(&self) -> MutexGuard<'_, WaiterRegistry> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_registry_lock_poison_once();
                poisoned.into_inner()
            }
        }
    }
}
