//! Symbol table, string table and indirect symbol table access.
//!
//! All offsets in `LC_SYMTAB`/`LC_DYSYMTAB` are slice-relative, so every
//! function here takes the slice's bytes.

use std::collections::HashMap;

use crate::core::address::VirtualMemoryPointer;
use crate::formats::macho::types::*;
use crate::formats::macho::utils::{read_cstring, record, EndianRead};

/// Marks an indirect symbol slot that refers to a local (stripped) symbol.
pub const INDIRECT_SYMBOL_LOCAL: u32 = 0x8000_0000;
/// Marks an indirect symbol slot that refers to an absolute symbol.
pub const INDIRECT_SYMBOL_ABS: u32 = 0x4000_0000;

// Section types that index into the indirect symbol table.
pub const S_NON_LAZY_SYMBOL_POINTERS: u8 = 0x6;
pub const S_LAZY_SYMBOL_POINTERS: u8 = 0x7;
pub const S_SYMBOL_STUBS: u8 = 0x8;

// Longest name read out of the string table.
const MAX_SYMBOL_NAME: usize = 4096;

/// `nlist_64` entries paired with the string table they index into.
#[derive(Debug, Clone)]
pub struct SymbolTable<'data> {
    entries: Vec<Nlist64>,
    strings: &'data [u8],
}

impl<'data> SymbolTable<'data> {
    pub fn parse(data: &'data [u8], symtab: &SymtabCommand, order: ByteOrder) -> Result<Self> {
        let base = symtab.symoff as usize;
        let table_len = (symtab.nsyms as usize).saturating_mul(NLIST_64_SIZE);
        let table = record(data, base, table_len, "symbol table")?;

        let mut entries = Vec::with_capacity(symtab.nsyms as usize);
        for chunk in table.chunks_exact(NLIST_64_SIZE) {
            entries.push(Nlist64 {
                n_strx: chunk.read_u32(0, order, "nlist_64")?,
                n_type: chunk.read_u8(4, "nlist_64")?,
                n_sect: chunk.read_u8(5, "nlist_64")?,
                n_desc: chunk.read_u16(6, order, "nlist_64")?,
                n_value: chunk.read_u64(8, order, "nlist_64")?,
            });
        }

        let strings = record(
            data,
            symtab.stroff as usize,
            symtab.strsize as usize,
            "string table",
        )?;
        Ok(Self { entries, strings })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Nlist64] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&Nlist64> {
        self.entries.get(index)
    }

    /// Raw string table bytes.
    pub fn strings(&self) -> &'data [u8] {
        self.strings
    }

    /// Name of `entry`, or `None` for an empty or out-of-range string index.
    pub fn name(&self, entry: &Nlist64) -> Option<&'data str> {
        if entry.n_strx == 0 {
            return None;
        }
        read_cstring(self.strings, entry.n_strx as usize, MAX_SYMBOL_NAME)
            .filter(|s| !s.is_empty())
    }

    /// Name of the symbol at `index`.
    pub fn name_at(&self, index: usize) -> Option<&'data str> {
        self.get(index).and_then(|e| self.name(e))
    }

    /// Named, non-debug, undefined symbols (imports).
    pub fn undefined(&self) -> impl Iterator<Item = &'data str> + '_ {
        self.entries
            .iter()
            .filter(|e| e.is_undefined())
            .filter_map(|e| self.name(e))
    }
}

/// Decode the indirect symbol table (`u32` symbol indices).
pub fn parse_indirect_symbols(
    data: &[u8],
    dysymtab: &DysymtabCommand,
    order: ByteOrder,
) -> Result<Vec<u32>> {
    let len = (dysymtab.nindirectsyms as usize).saturating_mul(4);
    let table = record(data, dysymtab.indirectsymoff as usize, len, "indirect symbol table")?;
    table
        .chunks_exact(4)
        .map(|c| c.read_u32(0, order, "indirect symbol"))
        .collect()
}

/// Map each slot of every stub and symbol-pointer section to the symbol it
/// binds, using `reserved1` as the first indirect index and the section's
/// stride (`reserved2` for stubs, 8 for pointers).
///
/// Slots naming local or absolute symbols are skipped.
pub fn indirect_slot_names(
    sections: &[&Section],
    indirect: &[u32],
    symbols: &SymbolTable<'_>,
) -> HashMap<VirtualMemoryPointer, String> {
    let mut out = HashMap::new();
    for section in sections {
        let stride = match section.section_type() {
            S_SYMBOL_STUBS => u64::from(section.reserved2),
            S_LAZY_SYMBOL_POINTERS | S_NON_LAZY_SYMBOL_POINTERS => 8,
            _ => continue,
        };
        if stride == 0 {
            continue;
        }
        for slot in 0..section.size / stride {
            let Some(&symbol_index) = indirect.get(section.reserved1 as usize + slot as usize)
            else {
                break;
            };
            if symbol_index & (INDIRECT_SYMBOL_LOCAL | INDIRECT_SYMBOL_ABS) != 0 {
                continue;
            }
            let Some(address) = slot
                .checked_mul(stride)
                .and_then(|delta| VirtualMemoryPointer(section.addr).checked_add(delta))
            else {
                break;
            };
            if let Some(name) = symbols.name_at(symbol_index as usize) {
                out.insert(address, name.to_string());
            }
        }
    }
    out
}
