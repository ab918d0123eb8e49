//! Intel® 64 and IA-32 Architectures Software Developer's Manual: 29.3 THE EXTENDED PAGE TABLE MECHANISM (EPT)
//!
//! The paging structures themselves are owned elsewhere. This module only describes the layout of a
//! single entry so that the entry covering a faulting guest-physical address can be decoded and
//! logged when an EPT violation is dumped.

use {
    bitfield::bitfield,
    bitflags::bitflags,
    core::fmt,
    x86::current::paging::BASE_PAGE_SHIFT,
};

bitflags! {
    /// Read, write and execute permissions of a guest-physical page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessType: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const READ_WRITE_EXECUTE = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(self.contains(AccessType::READ), 'R'),
            flag(self.contains(AccessType::WRITE), 'W'),
            flag(self.contains(AccessType::EXECUTE), 'X')
        )
    }
}

/// EPT memory types as encoded in bits 5:3 of a leaf entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// Uncacheable (UC)
    Uncacheable = 0,
    /// Write-combining (WC)
    WriteCombining = 1,
    /// Write-through (WT)
    WriteThrough = 4,
    /// Write-protected (WP)
    WriteProtected = 5,
    /// Write-back (WB)
    WriteBack = 6,
}

impl MemoryType {
    pub fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            0 => Some(MemoryType::Uncacheable),
            1 => Some(MemoryType::WriteCombining),
            4 => Some(MemoryType::WriteThrough),
            5 => Some(MemoryType::WriteProtected),
            6 => Some(MemoryType::WriteBack),
            _ => None,
        }
    }
}

bitfield! {
    /// Represents an Extended Page Table Entry (EPT Entry).
    ///
    /// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: Table 29-6. Format of an EPT Page-Table Entry that Maps a 4-KByte Page
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct Entry(u64);
    impl Debug;
    u64;

    pub readable, set_readable: 0;
    pub writable, set_writable: 1;
    pub executable, set_executable: 2;
    pub memory_type, set_memory_type: 5, 3;
    pub ignore_pat, set_ignore_pat: 6;
    pub large, set_large: 7;
    pub accessed, set_accessed: 8;
    pub dirty, set_dirty: 9;
    pub user_mode_execute, set_user_mode_execute: 10;
    pub pfn, set_pfn: 51, 12;
    pub verify_guest_paging, set_verify_guest_paging: 57;
    pub paging_write_access, set_paging_write_access: 58;
    pub suppress_ve, set_suppress_ve: 63;
}

impl Entry {
    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn permissions(&self) -> AccessType {
        AccessType::from_bits_truncate((self.0 & 0b111) as u8)
    }

    /// Host-physical address this entry points at.
    pub fn address(&self) -> u64 {
        self.pfn() << BASE_PAGE_SHIFT
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x} {} ", self.0, self.permissions())?;
        match MemoryType::from_bits(self.memory_type()) {
            Some(memory_type) => write!(f, "{:?}", memory_type)?,
            None => write!(f, "reserved memory type {}", self.memory_type())?,
        }
        write!(f, " {} hpa: {:#x}", if self.large() { "large" } else { "4kb" }, self.address())
    }
}
