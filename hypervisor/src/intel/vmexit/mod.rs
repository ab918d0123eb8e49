//! Routing of VM-exits to the handlers registered for their basic exit reason.

use {
    crate::{
        error::HypervisorError,
        intel::{vcpu::Vcpu, vmerror::VmxBasicExitReason},
    },
    alloc::{rc::Rc, vec::Vec},
    core::cell::RefCell,
};

pub mod ept;

/// A handler for one kind of VM-exit.
pub trait VmExitHandler<V> {
    /// Handles the exit.
    ///
    /// `Ok(true)` resolves the exit. `Ok(false)` passes it to the next handler registered for the
    /// same reason, and is the dispatch result if no later handler resolves it. Errors stop the
    /// dispatch and must reach the caller of [`VmExit::handle_vmexit`].
    fn handle(&mut self, vcpu: &mut V) -> Result<bool, HypervisorError>;
}

/// A handler shared between the dispatcher and whoever configures it.
pub type SharedVmExitHandler<V> = Rc<RefCell<dyn VmExitHandler<V>>>;

/// Per-vCPU table of VM-exit handlers.
///
/// The table is not `Send`. Each vCPU owns its own.
pub struct VmExit<V> {
    handlers: Vec<(VmxBasicExitReason, SharedVmExitHandler<V>)>,
}

impl<V: Vcpu> VmExit<V> {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Registers `handler` for `reason`. Handlers for the same reason are tried in registration order.
    pub fn add_handler(&mut self, reason: VmxBasicExitReason, handler: SharedVmExitHandler<V>) {
        log::trace!("Adding VM exit handler for {}", reason);
        self.handlers.push((reason, handler));
    }

    /// Number of handlers registered for `reason`.
    pub fn handler_count(&self, reason: VmxBasicExitReason) -> usize {
        self.handlers.iter().filter(|(r, _)| *r == reason).count()
    }

    /// Handles the VM-exit `vcpu` has just taken.
    ///
    /// Returns the result of the last handler consulted. `UnhandledVmExit` is reserved for exit
    /// reasons nothing is registered for.
    ///
    /// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 25.9 VM-EXIT INFORMATION FIELDS
    pub fn handle_vmexit(&self, vcpu: &mut V) -> Result<bool, HypervisorError> {
        let exit_reason = vcpu.exit_reason();

        let Some(basic_exit_reason) = VmxBasicExitReason::from_u32(exit_reason) else {
            log::error!("Unknown exit reason: {:#x}", exit_reason);
            return Err(HypervisorError::UnknownVmExitReason(exit_reason));
        };
        log::trace!("Basic Exit Reason: {}", basic_exit_reason);

        let mut result = None;
        for (_, handler) in self.handlers.iter().filter(|(r, _)| *r == basic_exit_reason) {
            if handler.borrow_mut().handle(vcpu)? {
                return Ok(true);
            }
            result = Some(false);
        }

        result.ok_or_else(|| {
            log::error!("Unhandled VM exit: {}", basic_exit_reason);
            HypervisorError::UnhandledVmExit(basic_exit_reason)
        })
    }
}

impl<V: Vcpu> Default for VmExit<V> {
    fn default() -> Self {
        Self::new()
    }
}
