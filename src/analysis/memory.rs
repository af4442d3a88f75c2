//! MemoryView: bounded reads by virtual address.
//!
//! Analysis code reads the loaded image through this trait instead of
//! doing its own address translation. [`MachoBinary`] implements it through
//! its segment map; the helpers below layer C strings, CFStrings and pointer
//! sections on top.

use std::collections::HashMap;

use crate::core::address::VirtualMemoryPointer;
use crate::formats::macho::utils::read_cstring;
use crate::formats::macho::{MachoBinary, MachoError, CFSTRING_64_SIZE};

/// Errors that can occur during memory reads.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("address {0} is not backed by file contents")]
    Unmapped(VirtualMemoryPointer),
    #[error("read of {length} bytes at {address} runs past mapped contents")]
    OutOfRange {
        address: VirtualMemoryPointer,
        length: u64,
    },
    #[error("address {0} lies in the encrypted region")]
    Encrypted(VirtualMemoryPointer),
    #[error("no valid string at {0}")]
    InvalidString(VirtualMemoryPointer),
    #[error("section {0} not found")]
    SectionMissing(String),
}

/// Bounded memory reads by virtual address.
pub trait MemoryView {
    /// Borrow everything readable from `address` to the end of the mapping
    /// that contains it.
    fn readable_from(&self, address: VirtualMemoryPointer) -> Result<&[u8], MemoryError>;

    /// Borrow exactly `len` bytes at `address`.
    fn read_bytes(&self, address: VirtualMemoryPointer, len: usize) -> Result<&[u8], MemoryError> {
        self.readable_from(address)?
            .get(..len)
            .ok_or(MemoryError::OutOfRange {
                address,
                length: len as u64,
            })
    }

    /// Read a little-endian u64.
    fn read_u64(&self, address: VirtualMemoryPointer) -> Result<u64, MemoryError> {
        let b = self.read_bytes(address, 8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(b);
        Ok(u64::from_le_bytes(word))
    }

    /// Read a pointer-sized word as an address.
    fn read_pointer(&self, address: VirtualMemoryPointer) -> Result<VirtualMemoryPointer, MemoryError> {
        self.read_u64(address).map(VirtualMemoryPointer)
    }

    /// Read a NUL-terminated UTF-8 string of at most `max_len` bytes.
    fn read_c_string(
        &self,
        address: VirtualMemoryPointer,
        max_len: usize,
    ) -> Result<String, MemoryError> {
        let bytes = self.readable_from(address)?;
        read_cstring(bytes, 0, max_len)
            .map(str::to_string)
            .ok_or(MemoryError::InvalidString(address))
    }

    /// Follow a 64-bit CFString (`isa, flags, literal, length`) to its
    /// literal and read it.
    fn read_cfstring(
        &self,
        address: VirtualMemoryPointer,
        max_len: usize,
    ) -> Result<String, MemoryError> {
        let record = self.read_bytes(address, CFSTRING_64_SIZE)?;
        let mut literal = [0u8; 8];
        literal.copy_from_slice(&record[16..24]);
        self.read_c_string(VirtualMemoryPointer(u64::from_le_bytes(literal)), max_len)
    }
}

impl MemoryView for MachoBinary {
    fn readable_from(&self, address: VirtualMemoryPointer) -> Result<&[u8], MemoryError> {
        let segment = self
            .segment_for_address(address)
            .ok_or(MemoryError::Unmapped(address))?;
        let offset = self
            .file_offset_for_virtual_address(address)
            .map_err(|_| MemoryError::Unmapped(address))?;
        let remaining = segment.filesize - (address.value() - segment.vmaddr);
        if self.is_range_encrypted(offset, remaining) {
            return Err(MemoryError::Encrypted(address));
        }
        // Tolerate segments whose declared file size runs past the file.
        let available = self.data().len() as u64;
        let end = offset.value().saturating_add(remaining).min(available);
        let start = offset.value().min(end);
        self.bytes_at(offset, end - start).map_err(|e| match e {
            MachoError::OutOfRange { .. } => MemoryError::OutOfRange {
                address,
                length: remaining,
            },
            _ => MemoryError::Unmapped(address),
        })
    }
}

/// Read the string a reference points at: CFStrings (inside
/// `cfstring_section`) are dereferenced to their literal, anything else is
/// read as a C string.
pub fn read_string_at_address(
    binary: &MachoBinary,
    address: VirtualMemoryPointer,
    cfstring_section: &str,
    max_len: usize,
) -> Result<String, MemoryError> {
    match binary.section_for_address(address) {
        Some(section) if section.name == cfstring_section => {
            binary.read_cfstring(address, max_len)
        }
        _ => binary.read_c_string(address, max_len),
    }
}

/// One slot of a pointer section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEntry {
    /// Where the slot lives.
    pub address: VirtualMemoryPointer,
    /// What the slot points at.
    pub value: VirtualMemoryPointer,
}

/// A section interpreted as an array of 64-bit pointers, indexed by slot
/// address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointerSection {
    entries: Vec<PointerEntry>,
    index: HashMap<VirtualMemoryPointer, usize>,
}

impl PointerSection {
    pub fn new(entries: Vec<PointerEntry>) -> Self {
        let mut section = Self::default();
        for entry in entries {
            section.push(entry);
        }
        section
    }

    /// Append a slot. A slot already present keeps its first value.
    pub fn push(&mut self, entry: PointerEntry) {
        if self.index.contains_key(&entry.address) {
            return;
        }
        self.index.insert(entry.address, self.entries.len());
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[PointerEntry] {
        &self.entries
    }

    pub fn addresses(&self) -> impl Iterator<Item = VirtualMemoryPointer> + '_ {
        self.entries.iter().map(|e| e.address)
    }

    pub fn contains(&self, address: VirtualMemoryPointer) -> bool {
        self.index.contains_key(&address)
    }

    pub fn value_at(&self, address: VirtualMemoryPointer) -> Option<VirtualMemoryPointer> {
        self.index.get(&address).map(|&i| self.entries[i].value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read the named section as an array of pointers: slot `i` lives at
/// `addr + 8 * i`. A trailing partial word is ignored.
pub fn read_pointer_section(binary: &MachoBinary, name: &str) -> Result<PointerSection, MemoryError> {
    let section = binary
        .section_named(name)
        .ok_or_else(|| MemoryError::SectionMissing(name.to_string()))?;
    let base = VirtualMemoryPointer(section.addr);
    let content = binary.section_content(name).map_err(|e| match e {
        MachoError::EncryptedRange { .. } => MemoryError::Encrypted(base),
        _ => MemoryError::OutOfRange {
            address: base,
            length: section.size,
        },
    })?;
    let mut pointers = PointerSection::default();
    for (i, chunk) in content.chunks_exact(8).enumerate() {
        // Slots past the top of the address space are not addressable.
        let Some(address) = base.checked_add(8 * i as u64) else {
            break;
        };
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        pointers.push(PointerEntry {
            address,
            value: VirtualMemoryPointer(u64::from_le_bytes(word)),
        });
    }
    Ok(pointers)
}
