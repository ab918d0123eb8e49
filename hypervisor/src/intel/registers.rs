use core::fmt;

/// The collection of the guest general purpose register values.
///
/// The field order matches the frame the VM-exit stub pushes, followed by the registers that are
/// only available through the VMCS.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct GuestRegisters {
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rsp: u64,
    pub rflags: u64,
}

const_assert_eq!(core::mem::size_of::<GuestRegisters>(), 18 * 8);

impl fmt::Display for GuestRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RIP={:#018x} RSP={:#018x} RFLAGS={:#x}", self.rip, self.rsp, self.rflags)?;
        writeln!(f, "RAX={:#018x} RBX={:#018x} RCX={:#018x} RDX={:#018x}", self.rax, self.rbx, self.rcx, self.rdx)?;
        writeln!(f, "RSI={:#018x} RDI={:#018x} RBP={:#018x}", self.rsi, self.rdi, self.rbp)?;
        writeln!(f, "R8 ={:#018x} R9 ={:#018x} R10={:#018x} R11={:#018x}", self.r8, self.r9, self.r10, self.r11)?;
        write!(f, "R12={:#018x} R13={:#018x} R14={:#018x} R15={:#018x}", self.r12, self.r13, self.r14, self.r15)
    }
}
