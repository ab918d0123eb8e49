//! EPT violation dispatch.
//!
//! Every EPT violation is routed to one of three handler chains, selected by the kind of access that
//! faulted (data read, data write or instruction fetch). Guest memory virtualization policies such as
//! MMIO emulation, shadow pages or lazy mapping plug in here as chained handlers.
//!
//! 29.3.3.2 EPT Violations
//! Table 28-7. Exit Qualification for EPT Violations

use {
    crate::{
        error::HypervisorError,
        intel::{
            vcpu::Vcpu,
            vmerror::{EptAccess, EptViolationExitQualification, VmxBasicExitReason},
            vmexit::{VmExit, VmExitHandler},
        },
    },
    alloc::{boxed::Box, collections::VecDeque, rc::Rc},
    core::cell::RefCell,
};

/// Describes the EPT violation being handled. Lives for a single VM-exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EptViolationInfo {
    /// Guest linear address. Only meaningful when the qualification says it is valid.
    pub linear_address: u64,

    /// Guest physical address that faulted.
    pub physical_address: u64,

    /// Raw exit qualification.
    pub qualification: u64,

    /// Starts out `true`. A handler that resolves the fault clears it to have the guest instruction
    /// pointer advanced past the faulting instruction once the chain returns. Handlers that already
    /// moved the guest state themselves leave it set.
    pub suppress_advance: bool,
}

impl EptViolationInfo {
    pub fn exit_qualification(&self) -> EptViolationExitQualification {
        EptViolationExitQualification::from_exit_qualification(self.qualification)
    }
}

/// A chained EPT violation handler. Returns `true` if it fully resolved the fault.
pub trait EptViolationDelegate<V> {
    fn handle(&mut self, vcpu: &mut V, info: &mut EptViolationInfo) -> bool;
}

impl<V, F> EptViolationDelegate<V> for F
where
    F: FnMut(&mut V, &mut EptViolationInfo) -> bool,
{
    fn handle(&mut self, vcpu: &mut V, info: &mut EptViolationInfo) -> bool {
        self(vcpu, info)
    }
}

/// The catch-all handler of an access type, consulted only after its whole chain declined.
pub trait DefaultDelegate<V> {
    fn handle(&mut self, vcpu: &mut V) -> bool;
}

impl<V, F> DefaultDelegate<V> for F
where
    F: FnMut(&mut V) -> bool,
{
    fn handle(&mut self, vcpu: &mut V) -> bool {
        self(vcpu)
    }
}

/// The handlers of one access type, most recently registered first.
struct HandlerChain<V> {
    access: EptAccess,
    handlers: VecDeque<Box<dyn EptViolationDelegate<V>>>,
    default: Option<Box<dyn DefaultDelegate<V>>>,
}

impl<V: Vcpu> HandlerChain<V> {
    fn new(access: EptAccess) -> Self {
        Self { access, handlers: VecDeque::new(), default: None }
    }

    /// Tries each handler in order until one resolves the fault, then applies the resumption policy.
    fn walk(&mut self, vcpu: &mut V, info: &mut EptViolationInfo) -> Result<bool, HypervisorError> {
        for handler in self.handlers.iter_mut() {
            if handler.handle(vcpu, info) {
                if !info.suppress_advance {
                    return Ok(vcpu.advance());
                }

                return Ok(true);
            }
        }

        if let Some(default) = self.default.as_mut() {
            return Ok(default.handle(vcpu));
        }

        log::error!(
            "Unhandled EPT {} violation, guest linear: {:#x}, guest physical: {:#x}, qualification: {:#x}",
            self.access,
            info.linear_address,
            info.physical_address,
            info.qualification
        );

        Err(match self.access {
            EptAccess::Read => HypervisorError::UnhandledEptReadViolation(info.physical_address),
            EptAccess::Write => HypervisorError::UnhandledEptWriteViolation(info.physical_address),
            EptAccess::Execute => HypervisorError::UnhandledEptExecuteViolation(info.physical_address),
        })
    }
}

/// The EPT violation handler of one vCPU.
///
/// Handlers may be added at any time except from inside a handler of the same vCPU: the registry is
/// borrowed for the whole dispatch. Late registration from another thread needs a lock around the
/// vCPU, which this type does not provide.
pub struct EptViolationHandler<V> {
    read: HandlerChain<V>,
    write: HandlerChain<V>,
    execute: HandlerChain<V>,
}

impl<V: Vcpu + 'static> EptViolationHandler<V> {
    /// Creates an empty handler and registers it for EPT violation exits of `vmexit`.
    pub fn new(vmexit: &mut VmExit<V>) -> Rc<RefCell<Self>> {
        let handler = Rc::new(RefCell::new(Self::default()));
        vmexit.add_handler(VmxBasicExitReason::EptViolation, handler.clone());
        handler
    }
}

impl<V: Vcpu> EptViolationHandler<V> {
    fn chain_mut(&mut self, access: EptAccess) -> &mut HandlerChain<V> {
        match access {
            EptAccess::Read => &mut self.read,
            EptAccess::Write => &mut self.write,
            EptAccess::Execute => &mut self.execute,
        }
    }

    fn chain(&self, access: EptAccess) -> &HandlerChain<V> {
        match access {
            EptAccess::Read => &self.read,
            EptAccess::Write => &self.write,
            EptAccess::Execute => &self.execute,
        }
    }

    /// Adds `delegate` in front of the chain for `access`, so it is tried before every handler
    /// registered earlier.
    pub fn add_handler<D>(&mut self, access: EptAccess, delegate: D)
    where
        D: EptViolationDelegate<V> + 'static,
    {
        log::trace!("Adding EPT {} violation handler", access);
        self.chain_mut(access).handlers.push_front(Box::new(delegate));
    }

    pub fn add_read_handler<D: EptViolationDelegate<V> + 'static>(&mut self, delegate: D) {
        self.add_handler(EptAccess::Read, delegate);
    }

    pub fn add_write_handler<D: EptViolationDelegate<V> + 'static>(&mut self, delegate: D) {
        self.add_handler(EptAccess::Write, delegate);
    }

    pub fn add_execute_handler<D: EptViolationDelegate<V> + 'static>(&mut self, delegate: D) {
        self.add_handler(EptAccess::Execute, delegate);
    }

    /// Replaces the default handler for `access`.
    pub fn set_default_handler<D>(&mut self, access: EptAccess, delegate: D)
    where
        D: DefaultDelegate<V> + 'static,
    {
        log::trace!("Setting default EPT {} violation handler", access);
        self.chain_mut(access).default = Some(Box::new(delegate));
    }

    pub fn set_default_read_handler<D: DefaultDelegate<V> + 'static>(&mut self, delegate: D) {
        self.set_default_handler(EptAccess::Read, delegate);
    }

    pub fn set_default_write_handler<D: DefaultDelegate<V> + 'static>(&mut self, delegate: D) {
        self.set_default_handler(EptAccess::Write, delegate);
    }

    pub fn set_default_execute_handler<D: DefaultDelegate<V> + 'static>(&mut self, delegate: D) {
        self.set_default_handler(EptAccess::Execute, delegate);
    }

    /// Number of chained handlers registered for `access`.
    pub fn handler_count(&self, access: EptAccess) -> usize {
        self.chain(access).handlers.len()
    }

    pub fn has_default_handler(&self, access: EptAccess) -> bool {
        self.chain(access).default.is_some()
    }

    /// Handles an EPT violation exit of `vcpu`.
    ///
    /// Returns the result of the handler that resolved the fault, or of the guest RIP advance it
    /// requested. A fault nobody resolves is a fatal error; diagnostics for it have already been
    /// logged when it is returned.
    pub fn handle(&mut self, vcpu: &mut V) -> Result<bool, HypervisorError> {
        let mut info = EptViolationInfo {
            linear_address: vcpu.guest_linear_address(),
            physical_address: vcpu.guest_physical_address(),
            qualification: vcpu.exit_qualification(),
            suppress_advance: true,
        };
        let qualification = info.exit_qualification();

        log::debug!(
            "EPT violation, guest linear: {:#x}, guest physical: {:#x}, qualification: {:#x} [ {} ]",
            info.linear_address,
            info.physical_address,
            info.qualification,
            qualification.summary()
        );

        vcpu.dump("Guest CPU state");
        vcpu.dump_ept_entry(info.physical_address);

        let Some(access) = qualification.access() else {
            log::error!(
                "Unknown EPT violation type, guest physical: {:#x}, qualification: {:#x}",
                info.physical_address,
                info.qualification
            );
            return Err(HypervisorError::UnknownEptViolationType(info.qualification));
        };

        self.chain_mut(access).walk(vcpu, &mut info)
    }
}

impl<V: Vcpu> Default for EptViolationHandler<V> {
    fn default() -> Self {
        Self {
            read: HandlerChain::new(EptAccess::Read),
            write: HandlerChain::new(EptAccess::Write),
            execute: HandlerChain::new(EptAccess::Execute),
        }
    }
}

impl<V: Vcpu> VmExitHandler<V> for EptViolationHandler<V> {
    fn handle(&mut self, vcpu: &mut V) -> Result<bool, HypervisorError> {
        EptViolationHandler::handle(self, vcpu)
    }
}
