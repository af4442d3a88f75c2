//! Mach-O (64-bit) slice parser
//!
//! [`MachoBinary::parse`] validates the header, walks exactly `ncmds` load
//! commands and builds name-keyed segment and section maps. The result is
//! immutable and keeps the [`ByteSource`] alive so that later content reads
//! borrow straight from the mapping.

pub mod commands;
pub mod fat;
pub mod headers;
pub mod symbols;
pub mod types;
pub mod utils;

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace, warn};

use crate::core::address::{StaticFilePointer, VirtualMemoryPointer};
use crate::core::binary::CpuType;
use crate::io::error::IoError;
use crate::io::ByteSource;
use commands::*;
use headers::parse_header;
use symbols::{indirect_slot_names, parse_indirect_symbols, SymbolTable};
pub use fat::MachoContainer;
pub use types::*;

// Section types whose contents are not backed by file bytes.
const S_ZEROFILL: u8 = 0x1;
const S_GB_ZEROFILL: u8 = 0xc;
const S_THREAD_LOCAL_ZEROFILL: u8 = 0x12;

/// One parsed 64-bit Mach-O slice.
#[derive(Debug, Clone)]
pub struct MachoBinary {
    source: ByteSource,
    offset_within_container: u64,
    header: MachHeader64,
    load_commands: Vec<LoadCommand>,
    segments: BTreeMap<String, Segment>,
    sections: BTreeMap<String, Section>,
    symtab: Option<SymtabCommand>,
    dysymtab: Option<DysymtabCommand>,
    encryption_info: Option<EncryptionInfoCommand64>,
    dylibs: Vec<DylibCommand>,
}

impl MachoBinary {
    /// Parse the slice that starts `offset_within_container` bytes into
    /// `source`.
    pub fn parse(source: ByteSource, offset_within_container: u64) -> Result<Self> {
        let data = source
            .tail_from(offset_within_container)
            .map_err(|e| io_to_range(e, offset_within_container))?;
        let header = parse_header(data)?;
        // Swapped slices are recognised but decoded as little-endian.
        let order = ByteOrder::Little;
        if header.is_swapped() {
            warn!(
                magic = format_args!("{:#x}", header.magic),
                "Byte-swapped slice; fields are read little-endian"
            );
        }

        debug!(
            offset = offset_within_container,
            cpu = %header.cpu_type(),
            ncmds = header.ncmds,
            sizeofcmds = header.sizeofcmds,
            "Parsing Mach-O slice"
        );

        let mut binary = Self {
            source: source.clone(),
            offset_within_container,
            header,
            load_commands: Vec::new(),
            segments: BTreeMap::new(),
            sections: BTreeMap::new(),
            symtab: None,
            dysymtab: None,
            encryption_info: None,
            dylibs: Vec::new(),
        };

        let table_end = MACH_HEADER_64_SIZE as u64 + u64::from(binary.header.sizeofcmds);
        let mut cursor = MACH_HEADER_64_SIZE as u64;
        for index in 0..binary.header.ncmds {
            let command = parse_load_command(data, cursor as usize, order)?;
            if (command.cmdsize as usize) < LOAD_COMMAND_SIZE {
                return Err(MachoError::MalformedStructure {
                    structure: "load_command",
                    offset: cursor,
                    reason: format!("command {} has size {}", index, command.cmdsize),
                });
            }
            let next = cursor + u64::from(command.cmdsize);
            if next > table_end {
                return Err(MachoError::MalformedStructure {
                    structure: "load_command",
                    offset: cursor,
                    reason: format!(
                        "command {} ends at {:#x}, past the command table end {:#x}",
                        index, next, table_end
                    ),
                });
            }
            binary.apply_command(data, &command, order)?;
            binary.load_commands.push(command);
            cursor = next;
        }

        Ok(binary)
    }

    fn apply_command(&mut self, data: &[u8], command: &LoadCommand, order: ByteOrder) -> Result<()> {
        trace!(cmd = command.cmd, cmdsize = command.cmdsize, offset = command.offset, "load command");
        match command.cmd {
            LC_SEGMENT_64 => {
                let segment = parse_segment_64(data, command, order)?;
                for section in &segment.sections {
                    if self
                        .sections
                        .insert(section.name.clone(), section.clone())
                        .is_some()
                    {
                        warn!(section = %section.name, "Duplicate section name; keeping the later one");
                    }
                }
                let name = segment.name.clone();
                if self.segments.insert(name.clone(), segment).is_some() {
                    warn!(segment = %name, "Duplicate segment name; keeping the later one");
                }
            }
            LC_SYMTAB => self.symtab = Some(parse_symtab(data, command, order)?),
            LC_DYSYMTAB => self.dysymtab = Some(parse_dysymtab(data, command, order)?),
            LC_ENCRYPTION_INFO_64 => {
                self.encryption_info = Some(parse_encryption_info_64(data, command, order)?)
            }
            LC_LOAD_DYLIB | LC_LOAD_WEAK_DYLIB => {
                self.dylibs.push(parse_dylib(data, command, order)?)
            }
            LC_SEGMENT | LC_ENCRYPTION_INFO => {
                debug!(cmd = command.cmd, "Skipping 32-bit load command");
            }
            _ => {}
        }
        Ok(())
    }

    pub fn header(&self) -> &MachHeader64 {
        &self.header
    }

    pub fn cpu_type(&self) -> CpuType {
        self.header.cpu_type()
    }

    /// Always true for a successfully parsed slice.
    pub fn is_64bit(&self) -> bool {
        self.header.magic == MH_MAGIC_64 || self.header.magic == MH_CIGAM_64
    }

    pub fn is_swapped(&self) -> bool {
        self.header.is_swapped()
    }

    pub fn header_flags(&self) -> HeaderFlags {
        self.header.header_flags()
    }

    pub fn offset_within_container(&self) -> u64 {
        self.offset_within_container
    }

    pub fn source(&self) -> &ByteSource {
        &self.source
    }

    /// Load commands in file order.
    pub fn load_commands(&self) -> &[LoadCommand] {
        &self.load_commands
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.values()
    }

    pub fn segment_named(&self, name: &str) -> Option<&Segment> {
        self.segments.get(name)
    }

    pub fn section_named(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn symtab(&self) -> Option<&SymtabCommand> {
        self.symtab.as_ref()
    }

    pub fn dysymtab(&self) -> Option<&DysymtabCommand> {
        self.dysymtab.as_ref()
    }

    pub fn encryption_info(&self) -> Option<&EncryptionInfoCommand64> {
        self.encryption_info.as_ref()
    }

    pub fn dylib_commands(&self) -> &[DylibCommand] {
        &self.dylibs
    }

    /// Load address of `__TEXT`.
    pub fn virtual_base(&self) -> Result<VirtualMemoryPointer> {
        self.segment_named("__TEXT")
            .map(|s| VirtualMemoryPointer(s.vmaddr))
            .ok_or_else(|| MachoError::SegmentMissing("__TEXT".to_string()))
    }

    /// The slice's bytes, from its header to the end of the source.
    pub fn data(&self) -> &[u8] {
        self.source
            .as_slice()
            .get(self.offset_within_container as usize..)
            .unwrap_or(&[])
    }

    /// Borrow `length` bytes at a slice-relative file offset.
    pub fn bytes_at(&self, offset: StaticFilePointer, length: u64) -> Result<&[u8]> {
        let absolute = offset
            .value()
            .checked_add(self.offset_within_container)
            .ok_or(MachoError::OutOfRange {
                offset: offset.value(),
                length,
                size: self.source.len(),
            })?;
        self.source
            .read_at(absolute, length)
            .map_err(|e| io_to_range(e, offset.value()))
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption_info
            .as_ref()
            .map(EncryptionInfoCommand64::is_encrypted)
            .unwrap_or(false)
    }

    /// Whether `[offset, offset + length)` overlaps the encrypted range.
    pub fn is_range_encrypted(&self, offset: StaticFilePointer, length: u64) -> bool {
        let Some(info) = self.encryption_info.filter(|i| i.is_encrypted()) else {
            return false;
        };
        let start = offset.value();
        let end = start.saturating_add(length);
        let crypt_start = u64::from(info.cryptoff);
        let crypt_end = crypt_start.saturating_add(u64::from(info.cryptsize));
        start < crypt_end && crypt_start < end
    }

    /// Section whose `[addr, addr + size)` contains `address`.
    pub fn section_for_address(&self, address: VirtualMemoryPointer) -> Option<&Section> {
        self.sections.values().find(|s| s.contains_address(address))
    }

    pub fn segment_for_address(&self, address: VirtualMemoryPointer) -> Option<&Segment> {
        self.segments.values().find(|s| s.contains_address(address))
    }

    /// Translate a virtual address to a slice-relative file offset through
    /// the segment that maps it.
    pub fn file_offset_for_virtual_address(
        &self,
        address: VirtualMemoryPointer,
    ) -> Result<StaticFilePointer> {
        let segment = self
            .segment_for_address(address)
            .ok_or(MachoError::UnmappedAddress(address))?;
        let delta = address.value() - segment.vmaddr;
        if delta >= segment.filesize {
            // Zero-fill tail of the segment; no file bytes behind it.
            return Err(MachoError::UnmappedAddress(address));
        }
        StaticFilePointer(segment.fileoff)
            .checked_add(delta)
            .ok_or(MachoError::UnmappedAddress(address))
    }

    /// Translate a slice-relative file offset back to a virtual address.
    pub fn virtual_address_for_file_offset(
        &self,
        offset: StaticFilePointer,
    ) -> Result<VirtualMemoryPointer> {
        self.segments
            .values()
            .find(|s| s.contains_file_offset(offset.value()))
            .and_then(|s| VirtualMemoryPointer(s.vmaddr).checked_add(offset.value() - s.fileoff))
            .ok_or(MachoError::UnmappedOffset(offset))
    }

    /// Borrow file-backed bytes at a virtual address. Refuses ranges that
    /// overlap the encrypted region.
    pub fn content_at_virtual_address(
        &self,
        address: VirtualMemoryPointer,
        length: u64,
    ) -> Result<&[u8]> {
        let offset = self.file_offset_for_virtual_address(address)?;
        if self.is_range_encrypted(offset, length) {
            return Err(MachoError::EncryptedRange {
                offset: offset.value(),
                length,
            });
        }
        self.bytes_at(offset, length)
    }

    /// Raw contents of the named section; empty for zero-fill sections.
    pub fn section_content(&self, name: &str) -> Result<&[u8]> {
        let section = self
            .section_named(name)
            .ok_or_else(|| MachoError::SectionMissing(name.to_string()))?;
        if matches!(
            section.section_type(),
            S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
        ) {
            return Ok(&[]);
        }
        let offset = StaticFilePointer(u64::from(section.offset));
        if self.is_range_encrypted(offset, section.size) {
            return Err(MachoError::EncryptedRange {
                offset: offset.value(),
                length: section.size,
            });
        }
        self.bytes_at(offset, section.size)
    }

    /// `nlist_64` table and string table, if the slice has `LC_SYMTAB`.
    pub fn symbol_table(&self) -> Result<Option<SymbolTable<'_>>> {
        match &self.symtab {
            Some(symtab) => SymbolTable::parse(self.data(), symtab, ByteOrder::Little).map(Some),
            None => Ok(None),
        }
    }

    /// Indirect symbol indices, empty without `LC_DYSYMTAB`.
    pub fn indirect_symbol_table(&self) -> Result<Vec<u32>> {
        match &self.dysymtab {
            Some(dysymtab) => parse_indirect_symbols(self.data(), dysymtab, ByteOrder::Little),
            None => Ok(Vec::new()),
        }
    }

    /// Symbol name bound to each stub and each lazy/non-lazy pointer slot.
    ///
    /// This is the table branch classification and imported-pointer
    /// resolution are built from.
    pub fn imported_symbol_slots(&self) -> Result<HashMap<VirtualMemoryPointer, String>> {
        let Some(symbols) = self.symbol_table()? else {
            return Ok(HashMap::new());
        };
        let indirect = self.indirect_symbol_table()?;
        let sections: Vec<&Section> = self
            .segments
            .values()
            .flat_map(|s| s.sections.iter())
            .collect();
        Ok(indirect_slot_names(&sections, &indirect, &symbols))
    }
}

fn io_to_range(err: IoError, offset: u64) -> MachoError {
    match err {
        IoError::OutOfRange { length, size, .. } => MachoError::OutOfRange {
            offset,
            length,
            size,
        },
        other => MachoError::Io(other),
    }
}
