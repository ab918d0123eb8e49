//! A vCPU backed by the current VMCS of the logical processor that took the VM-exit.

use {
    crate::{
        error::HypervisorError,
        intel::{
            ept::Entry,
            registers::GuestRegisters,
            support::{vmread, vmwrite},
            vcpu::Vcpu,
        },
    },
    alloc::boxed::Box,
    bitflags::bitflags,
    x86::vmx::vmcs::{guest, ro},
};

bitflags! {
    /// Guest interruptibility state.
    ///
    /// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: Table 25-3. Format of Interruptibility State
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterruptibilityState: u32 {
        const BLOCKING_BY_STI = 1 << 0;
        const BLOCKING_BY_MOV_SS = 1 << 1;
        const BLOCKING_BY_SMI = 1 << 2;
        const BLOCKING_BY_NMI = 1 << 3;
        const ENCLAVE_INTERRUPTION = 1 << 4;
    }
}

/// Looks up the leaf EPT entry that maps a guest-physical address.
pub type EptLookup = Box<dyn Fn(u64) -> Option<Entry>>;

/// VM-exit information fields captured for one exit.
///
/// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 25.9 VM-EXIT INFORMATION FIELDS
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExitInformation {
    pub exit_reason: u32,
    pub exit_qualification: u64,
    pub guest_linear_address: u64,
    pub guest_physical_address: u64,
    pub instruction_length: u64,
}

impl ExitInformation {
    /// Reads the exit information fields of the current VMCS.
    pub fn from_vmcs() -> Result<Self, HypervisorError> {
        Ok(Self {
            exit_reason: vmread(ro::EXIT_REASON)? as u32,
            exit_qualification: vmread(ro::EXIT_QUALIFICATION)?,
            guest_linear_address: vmread(ro::GUEST_LINEAR_ADDR)?,
            guest_physical_address: vmread(ro::GUEST_PHYSICAL_ADDR_FULL)?,
            instruction_length: vmread(ro::VMEXIT_INSTRUCTION_LEN)?,
        })
    }
}

/// RIP of the instruction following one of `instruction_length` bytes at `rip`.
fn next_rip(rip: u64, instruction_length: u64) -> u64 {
    rip.wrapping_add(instruction_length)
}

/// STI and MOV SS blocking only cover the instruction that was skipped.
fn unblocked(state: InterruptibilityState) -> InterruptibilityState {
    state - (InterruptibilityState::BLOCKING_BY_STI | InterruptibilityState::BLOCKING_BY_MOV_SS)
}

/// The exit-state of a VMX vCPU, captured once per VM-exit.
pub struct VmxVcpu {
    /// The index of the processor.
    index: u32,

    /// Guest general purpose registers saved by the VM-exit stub.
    pub guest_registers: GuestRegisters,

    exit: ExitInformation,

    /// Walks the EPT of this vCPU for the EPT violation dump. Without it the dump reports the
    /// entry as unavailable.
    ept_lookup: Option<EptLookup>,
}

impl VmxVcpu {
    pub fn new(index: u32, guest_registers: GuestRegisters, exit: ExitInformation) -> Self {
        Self { index, guest_registers, exit, ept_lookup: None }
    }

    /// Captures the guest RIP, RSP, RFLAGS and the VM-exit information fields of the current VMCS.
    ///
    /// Must be called in VMX root operation, after a VM-exit and before the next VM-entry.
    pub fn from_vmexit(index: u32, mut guest_registers: GuestRegisters) -> Result<Self, HypervisorError> {
        guest_registers.rip = vmread(guest::RIP)?;
        guest_registers.rsp = vmread(guest::RSP)?;
        guest_registers.rflags = vmread(guest::RFLAGS)?;

        Ok(Self::new(index, guest_registers, ExitInformation::from_vmcs()?))
    }

    /// Installs the EPT walker used to resolve [`Vcpu::ept_entry`].
    pub fn with_ept_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(u64) -> Option<Entry> + 'static,
    {
        self.ept_lookup = Some(Box::new(lookup));
        self
    }

    /// Advances guest RIP by the length of the exiting instruction and drops STI/MOV SS blocking.
    fn advance_guest_rip(&mut self) -> Result<(), HypervisorError> {
        self.guest_registers.rip = next_rip(self.guest_registers.rip, self.exit.instruction_length);
        vmwrite(guest::RIP, self.guest_registers.rip)?;

        let old = InterruptibilityState::from_bits_retain(vmread(guest::INTERRUPTIBILITY_STATE)? as u32);
        let new = unblocked(old);
        if new != old {
            vmwrite(guest::INTERRUPTIBILITY_STATE, new.bits())?;
        }

        Ok(())
    }
}

impl Vcpu for VmxVcpu {
    fn id(&self) -> u32 {
        self.index
    }

    fn exit_reason(&self) -> u32 {
        self.exit.exit_reason
    }

    fn exit_qualification(&self) -> u64 {
        self.exit.exit_qualification
    }

    fn guest_linear_address(&self) -> u64 {
        self.exit.guest_linear_address
    }

    fn guest_physical_address(&self) -> u64 {
        self.exit.guest_physical_address
    }

    fn guest_registers(&self) -> &GuestRegisters {
        &self.guest_registers
    }

    fn ept_entry(&self, guest_pa: u64) -> Option<Entry> {
        self.ept_lookup.as_ref().and_then(|lookup| lookup(guest_pa))
    }

    fn advance(&mut self) -> bool {
        match self.advance_guest_rip() {
            Ok(()) => {
                log::trace!("Guest RIP advanced to: {:#x}", self.guest_registers.rip);
                true
            }
            Err(error) => {
                log::error!("Failed to advance guest RIP: {}", error);
                false
            }
        }
    }
}
