pub mod ept;
pub mod registers;
#[cfg(target_arch = "x86_64")]
pub mod support;
pub mod vcpu;
pub mod vmerror;
pub mod vmexit;
#[cfg(target_arch = "x86_64")]
pub mod vmx;
