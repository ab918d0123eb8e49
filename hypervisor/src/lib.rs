//! EPT violation handling for an Intel VT-x hypervisor.
//!
//! An EPT violation exit is decoded, logged and passed to a chain of pluggable handlers selected by
//! the access that faulted. See [`intel::vmexit::ept::EptViolationHandler`].

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate static_assertions;

extern crate alloc;

pub mod error;
pub mod intel;
