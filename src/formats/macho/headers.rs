//! Mach-O header parsing

use crate::formats::macho::types::*;
use crate::formats::macho::utils::{record, EndianRead};

/// What the first four bytes of a file say it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicKind {
    /// 64-bit slice; `swapped` when the magic was byte-reversed.
    Macho64 { swapped: bool },
    /// 32-bit slice (recognised, not parsed).
    Macho32 { swapped: bool },
    /// Multi-architecture container.
    Fat,
}

/// Classify a magic read little-endian from offset 0.
pub fn classify_magic(magic: u32) -> Option<MagicKind> {
    match magic {
        MH_MAGIC_64 => Some(MagicKind::Macho64 { swapped: false }),
        MH_CIGAM_64 => Some(MagicKind::Macho64 { swapped: true }),
        MH_MAGIC => Some(MagicKind::Macho32 { swapped: false }),
        MH_CIGAM => Some(MagicKind::Macho32 { swapped: true }),
        // The fat magic is stored big-endian, so a little-endian read of a
        // fat file yields FAT_CIGAM.
        FAT_CIGAM | FAT_MAGIC => Some(MagicKind::Fat),
        _ => None,
    }
}

impl MachHeader64 {
    /// True when the magic says the slice was written with the opposite
    /// byte order. Fields are still decoded little-endian.
    pub fn is_swapped(&self) -> bool {
        self.magic == MH_CIGAM_64
    }
}

/// Validate the magic and decode `mach_header_64` from the start of `data`.
///
/// 32-bit magics fail with [`MachoError::UnsupportedFormat`]; anything that
/// is not a thin Mach-O magic fails with [`MachoError::InvalidMagic`].
pub fn parse_header(data: &[u8]) -> Result<MachHeader64> {
    let magic = data.read_u32(0, ByteOrder::Little, "mach_header_64")?;
    match classify_magic(magic) {
        Some(MagicKind::Macho64 { .. }) => {}
        Some(MagicKind::Macho32 { .. }) => return Err(MachoError::UnsupportedFormat(magic)),
        Some(MagicKind::Fat) | None => return Err(MachoError::InvalidMagic(magic)),
    }

    // Byte-reversed slices are flagged but their fields are not swapped.
    let order = ByteOrder::Little;
    let raw = record(data, 0, MACH_HEADER_64_SIZE, "mach_header_64")?;
    let word = |offset: usize| raw.read_u32(offset, order, "mach_header_64");

    Ok(MachHeader64 {
        magic,
        cputype: word(4)?,
        cpusubtype: word(8)?,
        filetype: word(12)?,
        ncmds: word(16)?,
        sizeofcmds: word(20)?,
        flags: word(24)?,
        reserved: word(28)?,
    })
}
