//! Load command record decoders.
//!
//! Each decoder takes the slice's bytes, the offset of the record within the
//! slice and the byte order, and returns a typed record or
//! [`MachoError::MalformedStructure`]. Offsets in errors are slice-relative.

use crate::formats::macho::types::*;
use crate::formats::macho::utils::{fixed_name, read_cstring, record, EndianRead};

/// Decode the `cmd`/`cmdsize` prefix shared by every load command.
pub fn parse_load_command(data: &[u8], offset: usize, order: ByteOrder) -> Result<LoadCommand> {
    let raw = record(data, offset, LOAD_COMMAND_SIZE, "load_command")?;
    Ok(LoadCommand {
        cmd: raw.read_u32(0, order, "load_command")?,
        cmdsize: raw.read_u32(4, order, "load_command")?,
        offset: offset as u64,
    })
}

/// Decode `segment_command_64` and the `nsects` sections that follow it.
///
/// The sections must fit inside the command's declared size.
pub fn parse_segment_64(data: &[u8], command: &LoadCommand, order: ByteOrder) -> Result<Segment> {
    const WHAT: &str = "segment_command_64";
    let offset = command.offset as usize;
    let raw = record(data, offset, SEGMENT_COMMAND_64_SIZE, WHAT)?;
    let mut segment = Segment {
        name: fixed_name(raw, 8, WHAT)?,
        vmaddr: raw.read_u64(24, order, WHAT)?,
        vmsize: raw.read_u64(32, order, WHAT)?,
        fileoff: raw.read_u64(40, order, WHAT)?,
        filesize: raw.read_u64(48, order, WHAT)?,
        maxprot: raw.read_u32(56, order, WHAT)?,
        initprot: raw.read_u32(60, order, WHAT)?,
        nsects: raw.read_u32(64, order, WHAT)?,
        flags: raw.read_u32(68, order, WHAT)?,
        sections: Vec::new(),
    };

    let sections_len = (segment.nsects as u64) * SECTION_64_SIZE as u64;
    let available = u64::from(command.cmdsize).saturating_sub(SEGMENT_COMMAND_64_SIZE as u64);
    if sections_len > available {
        return Err(MachoError::MalformedStructure {
            structure: WHAT,
            offset: command.offset,
            reason: format!(
                "{} sections need {:#x} bytes, command leaves {:#x}",
                segment.nsects, sections_len, available
            ),
        });
    }

    let mut cursor = offset + SEGMENT_COMMAND_64_SIZE;
    for _ in 0..segment.nsects {
        segment.sections.push(parse_section_64(data, cursor, order)?);
        cursor += SECTION_64_SIZE;
    }
    Ok(segment)
}

/// Decode one `section_64` record.
pub fn parse_section_64(data: &[u8], offset: usize, order: ByteOrder) -> Result<Section> {
    const WHAT: &str = "section_64";
    let raw = record(data, offset, SECTION_64_SIZE, WHAT)?;
    Ok(Section {
        name: fixed_name(raw, 0, WHAT)?,
        segment_name: fixed_name(raw, 16, WHAT)?,
        addr: raw.read_u64(32, order, WHAT)?,
        size: raw.read_u64(40, order, WHAT)?,
        offset: raw.read_u32(48, order, WHAT)?,
        align: raw.read_u32(52, order, WHAT)?,
        reloff: raw.read_u32(56, order, WHAT)?,
        nreloc: raw.read_u32(60, order, WHAT)?,
        flags: raw.read_u32(64, order, WHAT)?,
        reserved1: raw.read_u32(68, order, WHAT)?,
        reserved2: raw.read_u32(72, order, WHAT)?,
        reserved3: raw.read_u32(76, order, WHAT)?,
    })
}

pub fn parse_symtab(data: &[u8], command: &LoadCommand, order: ByteOrder) -> Result<SymtabCommand> {
    const WHAT: &str = "symtab_command";
    let raw = record(data, command.offset as usize, SYMTAB_COMMAND_SIZE, WHAT)?;
    Ok(SymtabCommand {
        symoff: raw.read_u32(8, order, WHAT)?,
        nsyms: raw.read_u32(12, order, WHAT)?,
        stroff: raw.read_u32(16, order, WHAT)?,
        strsize: raw.read_u32(20, order, WHAT)?,
    })
}

pub fn parse_dysymtab(
    data: &[u8],
    command: &LoadCommand,
    order: ByteOrder,
) -> Result<DysymtabCommand> {
    const WHAT: &str = "dysymtab_command";
    let raw = record(data, command.offset as usize, DYSYMTAB_COMMAND_SIZE, WHAT)?;
    let mut fields = [0u32; 18];
    for (i, slot) in fields.iter_mut().enumerate() {
        *slot = raw.read_u32(8 + i * 4, order, WHAT)?;
    }
    let [ilocalsym, nlocalsym, iextdefsym, nextdefsym, iundefsym, nundefsym, tocoff, ntoc, modtaboff, nmodtab, extrefsymoff, nextrefsyms, indirectsymoff, nindirectsyms, extreloff, nextrel, locreloff, nlocrel] =
        fields;
    Ok(DysymtabCommand {
        ilocalsym,
        nlocalsym,
        iextdefsym,
        nextdefsym,
        iundefsym,
        nundefsym,
        tocoff,
        ntoc,
        modtaboff,
        nmodtab,
        extrefsymoff,
        nextrefsyms,
        indirectsymoff,
        nindirectsyms,
        extreloff,
        nextrel,
        locreloff,
        nlocrel,
    })
}

pub fn parse_encryption_info_64(
    data: &[u8],
    command: &LoadCommand,
    order: ByteOrder,
) -> Result<EncryptionInfoCommand64> {
    const WHAT: &str = "encryption_info_command_64";
    let raw = record(data, command.offset as usize, ENCRYPTION_INFO_64_SIZE, WHAT)?;
    Ok(EncryptionInfoCommand64 {
        cryptoff: raw.read_u32(8, order, WHAT)?,
        cryptsize: raw.read_u32(12, order, WHAT)?,
        cryptid: raw.read_u32(16, order, WHAT)?,
        pad: raw.read_u32(20, order, WHAT)?,
    })
}

/// Decode a `dylib_command`. The install name lives inside the command at
/// `name.offset` and must not run past `cmdsize`.
pub fn parse_dylib(data: &[u8], command: &LoadCommand, order: ByteOrder) -> Result<DylibCommand> {
    const WHAT: &str = "dylib_command";
    let whole = record(data, command.offset as usize, command.cmdsize as usize, WHAT)?;
    let raw = record(whole, 0, DYLIB_COMMAND_SIZE, WHAT)?;
    let name_offset = raw.read_u32(8, order, WHAT)? as usize;
    let name = read_cstring(whole, name_offset, whole.len())
        .ok_or_else(|| MachoError::MalformedStructure {
            structure: WHAT,
            offset: command.offset,
            reason: format!("install name at +{:#x} is not a valid string", name_offset),
        })?
        .to_string();
    Ok(DylibCommand {
        cmd: command.cmd,
        name,
        timestamp: raw.read_u32(12, order, WHAT)?,
        current_version: raw.read_u32(16, order, WHAT)?,
        compatibility_version: raw.read_u32(20, order, WHAT)?,
    })
}
