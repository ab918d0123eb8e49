//! The view of a virtual processor that VM-exit handlers work against.

use crate::intel::{ept::Entry, registers::GuestRegisters};

/// A virtual processor that has taken a VM-exit.
///
/// Exit-state accessors return the values captured for the exit currently being handled. Handlers
/// receive the vCPU as `&mut` for the duration of a single exit and never keep it.
pub trait Vcpu {
    /// The index of the logical processor backing this vCPU.
    fn id(&self) -> u32;

    /// The raw 32-bit VM exit reason field.
    fn exit_reason(&self) -> u32;

    fn exit_qualification(&self) -> u64;

    fn guest_linear_address(&self) -> u64;

    fn guest_physical_address(&self) -> u64;

    fn guest_registers(&self) -> &GuestRegisters;

    /// Moves the guest instruction pointer past the instruction that caused the exit.
    ///
    /// Returns `false` if the guest state could not be updated.
    fn advance(&mut self) -> bool;

    /// Looks up the leaf EPT entry mapping `guest_pa`, if the vCPU has access to its EPT.
    ///
    /// Implementations that own or can reach the EPT override this. Otherwise the EPT dump reports
    /// the entry as unavailable.
    fn ept_entry(&self, _guest_pa: u64) -> Option<Entry> {
        None
    }

    /// Logs the guest register state under `title`.
    fn dump(&self, title: &str) {
        log::debug!("[vcpu {}] {}:\n{}", self.id(), title, self.guest_registers());
    }

    /// Logs the EPT entry covering `guest_pa`.
    fn dump_ept_entry(&self, guest_pa: u64) {
        match self.ept_entry(guest_pa) {
            Some(entry) => log::debug!("[vcpu {}] EPT entry for {:#x}: {}", self.id(), guest_pa, entry),
            None => log::debug!("[vcpu {}] EPT entry for {:#x}: unavailable", self.id(), guest_pa),
        }
    }
}
