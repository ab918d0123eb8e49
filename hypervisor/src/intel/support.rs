use crate::error::HypervisorError;

/// Read a specified field from the current VMCS.
pub fn vmread(field: u32) -> Result<u64, HypervisorError> {
    unsafe { x86::bits64::vmx::vmread(field) }.map_err(|_| HypervisorError::VmreadFailed(field))
}

/// Write to a specified field in the current VMCS.
pub fn vmwrite<T: Into<u64>>(field: u32, val: T) -> Result<(), HypervisorError> {
    unsafe { x86::bits64::vmx::vmwrite(field, val.into()) }
        .map_err(|_| HypervisorError::VmwriteFailed(field))
}
