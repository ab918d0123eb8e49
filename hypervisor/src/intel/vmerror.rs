//! Decoding of the VM-exit information fields: the basic exit reason and the exit qualification
//! that accompanies an EPT violation.

use {
    crate::intel::ept::AccessType,
    bitfield::{bitfield, Bit},
    core::fmt,
};

/// Declares `VmxBasicExitReason` together with its decoder and description table.
macro_rules! basic_exit_reasons {
    ($($reason:ident = $value:literal => $description:literal,)*) => {
        /// Represents the basic VM exit reasons.
        ///
        /// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: Table C-1. Basic Exit Reasons
        #[repr(u16)]
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        pub enum VmxBasicExitReason {
            $($reason = $value,)*
        }

        impl VmxBasicExitReason {
            /// Converts the 32-bit VM exit reason field to its basic exit reason (bits 15:0).
            ///
            /// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 25.9.1 Basic VM-Exit Information
            pub fn from_u32(value: u32) -> Option<Self> {
                match (value & 0xFFFF) as u16 {
                    $($value => Some(Self::$reason),)*
                    _ => None,
                }
            }

            /// Human-readable description of the exit reason.
            pub fn description(&self) -> &'static str {
                match self {
                    $(Self::$reason => $description,)*
                }
            }
        }
    };
}

basic_exit_reasons! {
    ExceptionOrNmi = 0 => "Exception or NMI",
    ExternalInterrupt = 1 => "External interrupt",
    TripleFault = 2 => "Triple fault",
    InitSignal = 3 => "INIT signal",
    StartupIpi = 4 => "Start-up IPI",
    IoSystemManagementInterrupt = 5 => "I/O SMI",
    OtherSmi = 6 => "Other SMI",
    InterruptWindow = 7 => "Interrupt window",
    NmiWindow = 8 => "NMI window",
    TaskSwitch = 9 => "Task switch",
    Cpuid = 10 => "CPUID",
    Getsec = 11 => "GETSEC",
    Hlt = 12 => "HLT",
    Invd = 13 => "INVD",
    Invlpg = 14 => "INVLPG",
    Rdpmc = 15 => "RDPMC",
    Rdtsc = 16 => "RDTSC",
    Rsm = 17 => "RSM",
    Vmcall = 18 => "VMCALL",
    Vmclear = 19 => "VMCLEAR",
    Vmlaunch = 20 => "VMLAUNCH",
    Vmptrld = 21 => "VMPTRLD",
    Vmptrst = 22 => "VMPTRST",
    Vmread = 23 => "VMREAD",
    Vmresume = 24 => "VMRESUME",
    Vmwrite = 25 => "VMWRITE",
    Vmxoff = 26 => "VMXOFF",
    Vmxon = 27 => "VMXON",
    ControlRegisterAccesses = 28 => "Control-register access",
    MovDr = 29 => "MOV DR",
    IoInstruction = 30 => "I/O instruction",
    Rdmsr = 31 => "RDMSR",
    Wrmsr = 32 => "WRMSR",
    VmEntryFailureInvalidGuestState = 33 => "VM-entry failure due to invalid guest state",
    VmEntryFailureMsrLoading = 34 => "VM-entry failure due to MSR loading",
    Mwait = 36 => "MWAIT",
    MonitorTrapFlag = 37 => "Monitor trap flag",
    Monitor = 39 => "MONITOR",
    Pause = 40 => "PAUSE",
    VmEntryFailureMachineCheckEvent = 41 => "VM-entry failure due to machine-check event",
    TprBelowThreshold = 43 => "TPR below threshold",
    ApicAccess = 44 => "APIC access",
    VirtualizedEoi = 45 => "Virtualized EOI",
    AccessToGdtrOrIdtr = 46 => "Access to GDTR or IDTR",
    AccessToLdtrOrTr = 47 => "Access to LDTR or TR",
    EptViolation = 48 => "EPT violation",
    EptMisconfiguration = 49 => "EPT misconfiguration",
    Invept = 50 => "INVEPT",
    Rdtscp = 51 => "RDTSCP",
    VmxPreemptionTimerExpired = 52 => "VMX-preemption timer expired",
    Invvpid = 53 => "INVVPID",
    WbinvdOrWbnoinvd = 54 => "WBINVD or WBNOINVD",
    Xsetbv = 55 => "XSETBV",
    ApicWrite = 56 => "APIC write",
    Rdrand = 57 => "RDRAND",
    Invpcid = 58 => "INVPCID",
    Vmfunc = 59 => "VMFUNC",
    Encls = 60 => "ENCLS",
    Rdseed = 61 => "RDSEED",
    PageModificationLogFull = 62 => "Page-modification log full",
    Xsaves = 63 => "XSAVES",
    Xrstors = 64 => "XRSTORS",
    Pconfig = 65 => "PCONFIG",
    SppRelatedEvent = 66 => "SPP-related event",
    Umwait = 67 => "UMWAIT",
    Tpause = 68 => "TPAUSE",
    Loadiwkey = 69 => "LOADIWKEY",
    Enclv = 70 => "ENCLV",
    EnqcmdPasidTranslationFailure = 72 => "ENQCMD PASID translation failure",
    EnqcmdsPasidTranslationFailure = 73 => "ENQCMDS PASID translation failure",
    BusLock = 74 => "Bus lock",
    InstructionTimeout = 75 => "Instruction timeout",
}

impl fmt::Display for VmxBasicExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", *self as u16, self.description())
    }
}

/// The kind of guest memory access that caused an EPT violation.
///
/// Each access type has its own handler chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EptAccess {
    Read,
    Write,
    Execute,
}

impl fmt::Display for EptAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EptAccess::Read => "read",
            EptAccess::Write => "write",
            EptAccess::Execute => "execute",
        })
    }
}

bitfield! {
    /// Exit qualification for EPT violations.
    ///
    /// Any bit pattern is accepted. Decoding never fails.
    ///
    /// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: Table 28-7. Exit Qualification for EPT Violations
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct EptViolationExitQualification(u64);
    impl Debug;

    /// The access causing the EPT violation was a data read.
    pub data_read, set_data_read: 0;
    /// The access causing the EPT violation was a data write.
    pub data_write, set_data_write: 1;
    /// The access causing the EPT violation was an instruction fetch.
    pub instruction_fetch, set_instruction_fetch: 2;
    /// The guest-physical address was readable. Reported as "read access violation" in the summary.
    pub readable, set_readable: 3;
    /// The guest-physical address was writable. Reported as "write access violation".
    pub writable, set_writable: 4;
    /// The guest-physical address was executable. Reported as "execute access violation".
    pub executable, set_executable: 5;
    /// The guest linear-address field is valid.
    pub guest_linear_address_valid, set_guest_linear_address_valid: 7;
    /// The access was to the linear address itself rather than to a paging-structure entry.
    pub linear_address_translation, set_linear_address_translation: 8;
    pub user_mode_linear_address, _: 9;
    pub writable_linear_address, _: 10;
    pub execute_disable_linear_address, _: 11;
    pub nmi_unblocking_due_to_iret, _: 12;
}

/// Facet names in bit order, as they appear in the diagnostic summary.
const FACET_NAMES: [(usize, &str); 12] = [
    (0, "data read"),
    (1, "data write"),
    (2, "ifetch"),
    (3, "read access violation"),
    (4, "write access violation"),
    (5, "execute access violation"),
    (7, "guest linear addr valid"),
    (8, "linear addr translation"),
    (9, "user-mode linear addr"),
    (10, "writable linear addr"),
    (11, "execute-disable linear addr"),
    (12, "NMI unblocking due to IRET"),
];

impl EptViolationExitQualification {
    pub fn from_exit_qualification(value: u64) -> Self {
        Self(value)
    }

    /// The raw qualification value.
    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Selects the handler chain for this violation.
    ///
    /// Data read takes priority over data write, which takes priority over instruction fetch.
    /// Returns `None` when none of the three access bits are set.
    pub fn access(&self) -> Option<EptAccess> {
        if self.data_read() {
            Some(EptAccess::Read)
        } else if self.data_write() {
            Some(EptAccess::Write)
        } else if self.instruction_fetch() {
            Some(EptAccess::Execute)
        } else {
            None
        }
    }

    /// The permissions the EPT granted the guest-physical address at the time of the fault (bits 5:3).
    pub fn permissions(&self) -> AccessType {
        AccessType::from_bits_truncate(((self.0 >> 3) & 0b111) as u8)
    }

    /// Lists the name of every set facet, for diagnostics only.
    pub fn summary(&self) -> QualificationSummary {
        QualificationSummary(*self)
    }
}

/// Comma separated names of the facets set in a qualification.
#[derive(Clone, Copy)]
pub struct QualificationSummary(EptViolationExitQualification);

impl fmt::Display for QualificationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut separator = "";
        for (bit, name) in FACET_NAMES {
            if self.0 .0.bit(bit) {
                write!(f, "{}{}", separator, name)?;
                separator = ", ";
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_reason_uses_low_sixteen_bits() {
        assert_eq!(VmxBasicExitReason::from_u32(48), Some(VmxBasicExitReason::EptViolation));
        assert_eq!(VmxBasicExitReason::from_u32(0x8000_0030), Some(VmxBasicExitReason::EptViolation));
        assert_eq!(VmxBasicExitReason::from_u32(35), None);
        assert_eq!(VmxBasicExitReason::EptViolation.to_string(), "48: EPT violation");
    }

    #[test]
    fn access_priority_is_read_write_execute() {
        let q = EptViolationExitQualification::from_exit_qualification;
        assert_eq!(q(0b001).access(), Some(EptAccess::Read));
        assert_eq!(q(0b010).access(), Some(EptAccess::Write));
        assert_eq!(q(0b100).access(), Some(EptAccess::Execute));
        assert_eq!(q(0b111).access(), Some(EptAccess::Read));
        assert_eq!(q(0b110).access(), Some(EptAccess::Write));
        assert_eq!(q(0b1111_1000).access(), None);
    }

    #[test]
    fn summary_names_ifetch_and_linear_address() {
        let qualification = EptViolationExitQualification::from_exit_qualification(0x84);
        assert!(qualification.instruction_fetch());
        assert!(qualification.guest_linear_address_valid());
        assert_eq!(qualification.summary().to_string(), "ifetch, guest linear addr valid");
    }

    #[test]
    fn summary_of_empty_qualification_is_empty() {
        let qualification = EptViolationExitQualification::default();
        assert_eq!(qualification.summary().to_string(), "");
    }

    #[test]
    fn summary_skips_bit_six() {
        let qualification = EptViolationExitQualification::from_exit_qualification(0x1FF);
        assert_eq!(
            qualification.summary().to_string(),
            "data read, data write, ifetch, read access violation, write access violation, \
             execute access violation, guest linear addr valid, linear addr translation"
        );
    }

    #[test]
    fn permission_bits_share_their_summary_names() {
        let q = EptViolationExitQualification::from_exit_qualification;
        assert!(q(1 << 3).readable());
        assert_eq!(q(1 << 3).summary().to_string(), "read access violation");
        assert!(q(1 << 4).writable());
        assert_eq!(q(1 << 4).summary().to_string(), "write access violation");
        assert!(q(1 << 5).executable());
        assert_eq!(q(1 << 5).summary().to_string(), "execute access violation");
    }

    #[test]
    fn permissions_come_from_bits_three_to_five() {
        let qualification = EptViolationExitQualification::from_exit_qualification(0b01_1001);
        assert_eq!(qualification.permissions(), AccessType::READ | AccessType::WRITE);
        assert!(!qualification.executable());
    }
}
