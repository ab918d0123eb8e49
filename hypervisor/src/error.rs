use {crate::intel::vmerror::VmxBasicExitReason, thiserror_no_std::Error};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HypervisorError {
    #[error("Unknown VM exit reason: {0:#x}")]
    UnknownVmExitReason(u32),
    #[error("No handler resolved VM exit: {0}")]
    UnhandledVmExit(VmxBasicExitReason),
    #[error("Failed to read VMCS field {0:#x}")]
    VmreadFailed(u32),
    #[error("Failed to write VMCS field {0:#x}")]
    VmwriteFailed(u32),
    #[error("Unknown EPT violation type, qualification: {0:#x}")]
    UnknownEptViolationType(u64),
    #[error("Unhandled EPT read violation, guest physical: {0:#x}")]
    UnhandledEptReadViolation(u64),
    #[error("Unhandled EPT write violation, guest physical: {0:#x}")]
    UnhandledEptWriteViolation(u64),
    #[error("Unhandled EPT execute violation, guest physical: {0:#x}")]
    UnhandledEptExecuteViolation(u64),
}

impl HypervisorError {
    /// Returns `true` if the guest can no longer be resumed safely.
    ///
    /// Fatal errors must be propagated to whatever halts the vCPU. They are never retried and
    /// never turned into a successful exit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HypervisorError::UnknownEptViolationType(_)
                | HypervisorError::UnhandledEptReadViolation(_)
                | HypervisorError::UnhandledEptWriteViolation(_)
                | HypervisorError::UnhandledEptExecuteViolation(_)
        )
    }
}
