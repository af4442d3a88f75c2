//! Core Mach-O types and constants

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::address::{StaticFilePointer, VirtualMemoryPointer};
use crate::core::binary::CpuType;
use crate::io::error::IoError;

/// Mach-O parsing errors
#[derive(Debug, Error)]
pub enum MachoError {
    #[error("Invalid Mach-O magic {0:#010x}")]
    InvalidMagic(u32),
    #[error("Unsupported Mach-O format (magic {0:#010x}); only 64-bit slices are parsed")]
    UnsupportedFormat(u32),
    #[error("Malformed {structure} at {offset:#x}: {reason}")]
    MalformedStructure {
        structure: &'static str,
        offset: u64,
        reason: String,
    },
    #[error("Read of {length} bytes at {offset:#x} is outside the binary ({size:#x} bytes)")]
    OutOfRange { offset: u64, length: u64, size: u64 },
    #[error("Segment {0} not found")]
    SegmentMissing(String),
    #[error("Section {0} not found")]
    SectionMissing(String),
    #[error("Virtual address {0} is not mapped by any segment")]
    UnmappedAddress(VirtualMemoryPointer),
    #[error("File offset {0} is not mapped by any segment")]
    UnmappedOffset(StaticFilePointer),
    #[error("Range {offset:#x}+{length:#x} lies in the encrypted region")]
    EncryptedRange { offset: u64, length: u64 },
    #[error("No valid string at {0}")]
    InvalidString(VirtualMemoryPointer),
    #[error(transparent)]
    Io(#[from] IoError),
}

impl MachoError {
    pub(crate) fn truncated(structure: &'static str, offset: u64, needed: usize) -> Self {
        MachoError::MalformedStructure {
            structure,
            offset,
            reason: format!("needs {} bytes past the end of the data", needed),
        }
    }
}

pub type Result<T> = std::result::Result<T, MachoError>;

// Magic numbers, as read little-endian from the first four bytes.
pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;
// Fat headers are always big-endian on disk.
pub const FAT_MAGIC: u32 = 0xcafe_babe;
pub const FAT_CIGAM: u32 = 0xbeba_feca;

// Load command kinds
pub const LC_REQ_DYLD: u32 = 0x8000_0000;
pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_DYSYMTAB: u32 = 0xb;
pub const LC_LOAD_DYLIB: u32 = 0xc;
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_ENCRYPTION_INFO: u32 = 0x21;
pub const LC_ENCRYPTION_INFO_64: u32 = 0x2c;

// Record sizes
pub const MACH_HEADER_64_SIZE: usize = 32;
pub const LOAD_COMMAND_SIZE: usize = 8;
pub const SEGMENT_COMMAND_64_SIZE: usize = 72;
pub const SECTION_64_SIZE: usize = 80;
pub const SYMTAB_COMMAND_SIZE: usize = 24;
pub const DYSYMTAB_COMMAND_SIZE: usize = 80;
pub const ENCRYPTION_INFO_64_SIZE: usize = 24;
pub const DYLIB_COMMAND_SIZE: usize = 24;
pub const NLIST_64_SIZE: usize = 16;
pub const FAT_HEADER_SIZE: usize = 8;
pub const FAT_ARCH_SIZE: usize = 20;
pub const CFSTRING_64_SIZE: usize = 32;

/// Byte order selector passed to every record decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

bitflags::bitflags! {
    /// `mach_header.flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeaderFlags: u32 {
        const NOUNDEFS = 0x1;
        const INCRLINK = 0x2;
        const DYLDLINK = 0x4;
        const BINDATLOAD = 0x8;
        const PREBOUND = 0x10;
        const SPLIT_SEGS = 0x20;
        const LAZY_INIT = 0x40;
        const TWOLEVEL = 0x80;
        const FORCE_FLAT = 0x100;
        const NOMULTIDEFS = 0x200;
        const NOFIXPREBINDING = 0x400;
        const PREBINDABLE = 0x800;
        const ALLMODSBOUND = 0x1000;
        const SUBSECTIONS_VIA_SYMBOLS = 0x2000;
        const CANONICAL = 0x4000;
        const WEAK_DEFINES = 0x8000;
        const BINDS_TO_WEAK = 0x1_0000;
        const ALLOW_STACK_EXECUTION = 0x2_0000;
        const ROOT_SAFE = 0x4_0000;
        const SETUID_SAFE = 0x8_0000;
        const NO_REEXPORTED_DYLIBS = 0x10_0000;
        const PIE = 0x20_0000;
        const DEAD_STRIPPABLE_DYLIB = 0x40_0000;
        const HAS_TLV_DESCRIPTORS = 0x80_0000;
        const NO_HEAP_EXECUTION = 0x100_0000;
        const APP_EXTENSION_SAFE = 0x200_0000;
    }
}

/// Mach-O file types (`mach_header.filetype`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Object,
    Execute,
    Dylib,
    Dylinker,
    Bundle,
    Dsym,
    Other(u32),
}

impl FileType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x1 => FileType::Object,
            0x2 => FileType::Execute,
            0x6 => FileType::Dylib,
            0x7 => FileType::Dylinker,
            0x8 => FileType::Bundle,
            0xa => FileType::Dsym,
            other => FileType::Other(other),
        }
    }
}

/// `mach_header_64`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachHeader64 {
    pub magic: u32,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    pub reserved: u32,
}

impl MachHeader64 {
    pub fn cpu_type(&self) -> CpuType {
        CpuType::from_raw(self.cputype)
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_raw(self.filetype)
    }

    pub fn header_flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(self.flags)
    }
}

/// Generic load command prefix plus where it was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    /// Offset of the command from the start of the slice.
    pub offset: u64,
}

/// `segment_command_64` with its sections attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub nsects: u32,
    pub flags: u32,
    pub sections: Vec<Section>,
}

impl Segment {
    pub fn contains_address(&self, va: VirtualMemoryPointer) -> bool {
        va.value() >= self.vmaddr && va.value() - self.vmaddr < self.vmsize
    }

    pub fn contains_file_offset(&self, offset: u64) -> bool {
        offset >= self.fileoff && offset - self.fileoff < self.filesize
    }
}

/// `section_64`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub segment_name: String,
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
}

impl Section {
    pub fn contains_address(&self, va: VirtualMemoryPointer) -> bool {
        va.value() >= self.addr && va.value() - self.addr < self.size
    }

    /// Section type (low byte of `flags`).
    pub fn section_type(&self) -> u8 {
        (self.flags & 0xff) as u8
    }
}

/// `symtab_command`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymtabCommand {
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

/// `dysymtab_command`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DysymtabCommand {
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    pub tocoff: u32,
    pub ntoc: u32,
    pub modtaboff: u32,
    pub nmodtab: u32,
    pub extrefsymoff: u32,
    pub nextrefsyms: u32,
    pub indirectsymoff: u32,
    pub nindirectsyms: u32,
    pub extreloff: u32,
    pub nextrel: u32,
    pub locreloff: u32,
    pub nlocrel: u32,
}

/// `encryption_info_command_64`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInfoCommand64 {
    pub cryptoff: u32,
    pub cryptsize: u32,
    pub cryptid: u32,
    pub pad: u32,
}

impl EncryptionInfoCommand64 {
    pub fn is_encrypted(&self) -> bool {
        self.cryptid != 0
    }
}

/// `dylib_command` with its install name resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DylibCommand {
    pub cmd: u32,
    pub name: String,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
}

impl DylibCommand {
    pub fn is_weak(&self) -> bool {
        self.cmd == LC_LOAD_WEAK_DYLIB
    }
}

/// `nlist_64`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nlist64 {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

pub const N_STAB: u8 = 0xe0;
pub const N_PEXT: u8 = 0x10;
pub const N_TYPE: u8 = 0x0e;
pub const N_EXT: u8 = 0x01;
pub const N_UNDF: u8 = 0x0;
pub const N_SECT: u8 = 0xe;

impl Nlist64 {
    pub fn is_debug(&self) -> bool {
        self.n_type & N_STAB != 0
    }

    pub fn is_external(&self) -> bool {
        self.n_type & N_EXT != 0
    }

    pub fn is_undefined(&self) -> bool {
        !self.is_debug() && self.n_type & N_TYPE == N_UNDF
    }

    pub fn is_defined_in_section(&self) -> bool {
        !self.is_debug() && self.n_type & N_TYPE == N_SECT
    }
}

/// `fat_arch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatArch {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
}

impl FatArch {
    pub fn cpu_type(&self) -> CpuType {
        CpuType::from_raw(self.cputype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_flags_decode() {
        let flags = HeaderFlags::from_bits_truncate(0x0020_0085);
        assert!(flags.contains(HeaderFlags::NOUNDEFS));
        assert!(flags.contains(HeaderFlags::DYLDLINK));
        assert!(flags.contains(HeaderFlags::TWOLEVEL));
        assert!(flags.contains(HeaderFlags::PIE));
        assert!(!flags.contains(HeaderFlags::BINDATLOAD));
    }

    #[test]
    fn test_segment_contains() {
        let seg = Segment {
            name: "__TEXT".into(),
            vmaddr: 0x1_0000_0000,
            vmsize: 0x4000,
            fileoff: 0,
            filesize: 0x4000,
            maxprot: 5,
            initprot: 5,
            nsects: 0,
            flags: 0,
            sections: Vec::new(),
        };
        assert!(seg.contains_address(VirtualMemoryPointer(0x1_0000_0000)));
        assert!(seg.contains_address(VirtualMemoryPointer(0x1_0000_3fff)));
        assert!(!seg.contains_address(VirtualMemoryPointer(0x1_0000_4000)));
        assert!(!seg.contains_address(VirtualMemoryPointer(0xffff_ffff)));
        assert!(seg.contains_file_offset(0x3fff));
        assert!(!seg.contains_file_offset(0x4000));
    }

    #[test]
    fn test_nlist_classification() {
        let undef = Nlist64 {
            n_strx: 1,
            n_type: N_EXT,
            n_sect: 0,
            n_desc: 0,
            n_value: 0,
        };
        assert!(undef.is_undefined());
        assert!(undef.is_external());
        let debug = Nlist64 {
            n_type: 0x24,
            ..undef
        };
        assert!(debug.is_debug());
        assert!(!debug.is_undefined());
        let defined = Nlist64 {
            n_type: N_SECT | N_EXT,
            n_sect: 1,
            ..undef
        };
        assert!(defined.is_defined_in_section());
    }

    #[test]
    fn test_error_display() {
        let err = MachoError::InvalidMagic(0xdeadbeef);
        assert_eq!(err.to_string(), "Invalid Mach-O magic 0xdeadbeef");
        let err = MachoError::truncated("section_64", 0x48, 80);
        assert!(err.to_string().starts_with("Malformed section_64 at 0x48"));
    }
}
