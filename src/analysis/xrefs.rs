//! Cross-reference classification.
//!
//! An address seen in a register is only meaningful once we know what it
//! points at. [`resolve_xref`] asks an [`XRefResolver`] a fixed sequence of
//! questions (string literal, class reference, selector reference, imported
//! symbol) and reports the first that answers. The resolver itself is
//! supplied by whoever owns the binary's metadata: [`XRefTable`] is a plain
//! in-memory table, [`MachoXRefResolver`] reads what it can straight from a
//! parsed slice and falls back to a table for the rest.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::analysis::memory::{
    read_pointer_section, read_string_at_address, MemoryView, PointerEntry, PointerSection,
};
use crate::config::{MachoConfig, XRefConfig};
use crate::core::address::VirtualMemoryPointer;
use crate::formats::macho::{MachoBinary, MachoError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XRefError {
    #[error("nothing resolves {0}")]
    Unresolved(VirtualMemoryPointer),
}

/// What an address refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum XRefKind {
    /// A literal in a string-bearing section.
    String,
    /// A class reference slot.
    ClassRef,
    /// A selector reference slot.
    SelRef,
    /// A pointer bound to an imported symbol.
    ImportedSymbol,
}

impl fmt::Display for XRefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XRefKind::String => write!(f, "string"),
            XRefKind::ClassRef => write!(f, "classref"),
            XRefKind::SelRef => write!(f, "selref"),
            XRefKind::ImportedSymbol => write!(f, "import"),
        }
    }
}

/// A classified reference: the address, its kind and the name or literal
/// it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XRef {
    pub address: VirtualMemoryPointer,
    pub kind: XRefKind,
    pub value: String,
}

/// Questions the classifier needs answered about a binary.
pub trait XRefResolver {
    /// The literal at `address`, only if it lies in a string-bearing section.
    fn string_at(&self, address: VirtualMemoryPointer) -> Option<String>;

    /// Class name for a class reference slot.
    fn class_name_for_classref(&self, address: VirtualMemoryPointer) -> Option<String>;

    /// Slot addresses and pointed-to values of a pointer section.
    fn pointer_section(&self, name: &str) -> Option<Cow<'_, PointerSection>>;

    /// Selector name for a selector reference slot.
    fn selector_for_selref(&self, address: VirtualMemoryPointer) -> Option<String>;

    /// Symbol bound to an imported-symbol pointer.
    fn imported_symbol_for_pointer(&self, address: VirtualMemoryPointer) -> Option<String>;
}

/// Classify `address`: string, then class reference, then selector
/// reference (the address must be a slot of the selector-reference pointer
/// section), then imported symbol.
pub fn resolve_xref<R: XRefResolver + ?Sized>(
    resolver: &R,
    config: &XRefConfig,
    address: VirtualMemoryPointer,
) -> Result<XRef, XRefError> {
    let found = |kind, value| {
        trace!(%address, %kind, "resolved xref");
        Ok(XRef {
            address,
            kind,
            value,
        })
    };

    if let Some(s) = resolver.string_at(address) {
        return found(XRefKind::String, s);
    }
    if let Some(class) = resolver.class_name_for_classref(address) {
        return found(XRefKind::ClassRef, class);
    }
    let is_selref_slot = resolver
        .pointer_section(&config.selref_section)
        .map(|section| section.contains(address))
        .unwrap_or(false);
    if is_selref_slot {
        if let Some(selector) = resolver.selector_for_selref(address) {
            return found(XRefKind::SelRef, selector);
        }
    }
    if let Some(symbol) = resolver.imported_symbol_for_pointer(address) {
        return found(XRefKind::ImportedSymbol, symbol);
    }
    Err(XRefError::Unresolved(address))
}

/// In-memory reference tables, filled by the caller's metadata parser.
#[derive(Debug, Clone, Default)]
pub struct XRefTable {
    strings: HashMap<VirtualMemoryPointer, String>,
    classrefs: HashMap<VirtualMemoryPointer, String>,
    selrefs: HashMap<VirtualMemoryPointer, String>,
    imports: HashMap<VirtualMemoryPointer, String>,
    pointer_sections: HashMap<String, PointerSection>,
}

impl XRefTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string(mut self, address: u64, literal: impl Into<String>) -> Self {
        self.strings.insert(VirtualMemoryPointer(address), literal.into());
        self
    }

    pub fn with_classref(mut self, address: u64, class: impl Into<String>) -> Self {
        self.classrefs.insert(VirtualMemoryPointer(address), class.into());
        self
    }

    /// Register a selector reference and add its slot to the pointer
    /// section named `section`. The slot's pointed-to value is not tracked
    /// and reads as zero.
    pub fn with_selref(mut self, section: &str, address: u64, selector: impl Into<String>) -> Self {
        let address = VirtualMemoryPointer(address);
        self.selrefs.insert(address, selector.into());
        self.pointer_sections
            .entry(section.to_string())
            .or_default()
            .push(PointerEntry {
                address,
                value: VirtualMemoryPointer(0),
            });
        self
    }

    pub fn with_import(mut self, address: u64, symbol: impl Into<String>) -> Self {
        self.imports.insert(VirtualMemoryPointer(address), symbol.into());
        self
    }

    pub fn with_pointer_section(mut self, name: impl Into<String>, section: PointerSection) -> Self {
        self.pointer_sections.insert(name.into(), section);
        self
    }
}

impl XRefResolver for XRefTable {
    fn string_at(&self, address: VirtualMemoryPointer) -> Option<String> {
        self.strings.get(&address).cloned()
    }

    fn class_name_for_classref(&self, address: VirtualMemoryPointer) -> Option<String> {
        self.classrefs.get(&address).cloned()
    }

    fn pointer_section(&self, name: &str) -> Option<Cow<'_, PointerSection>> {
        self.pointer_sections.get(name).map(Cow::Borrowed)
    }

    fn selector_for_selref(&self, address: VirtualMemoryPointer) -> Option<String> {
        self.selrefs.get(&address).cloned()
    }

    fn imported_symbol_for_pointer(&self, address: VirtualMemoryPointer) -> Option<String> {
        self.imports.get(&address).cloned()
    }
}

/// Resolver backed by a parsed slice.
///
/// Strings, pointer sections, selector names and imported-symbol pointers
/// are read from the binary; class references (which need Objective-C
/// runtime metadata) come from `metadata`, which is also consulted first
/// for everything else.
pub struct MachoXRefResolver<'a> {
    binary: &'a MachoBinary,
    metadata: XRefTable,
    imports: HashMap<VirtualMemoryPointer, String>,
    /// The configured selector reference section, read once.
    selrefs: Option<PointerSection>,
    xrefs: XRefConfig,
    max_string_length: usize,
}

impl<'a> MachoXRefResolver<'a> {
    pub fn new(
        binary: &'a MachoBinary,
        xrefs: &XRefConfig,
        macho: &MachoConfig,
    ) -> Result<Self, MachoError> {
        Ok(Self {
            binary,
            metadata: XRefTable::default(),
            imports: binary.imported_symbol_slots()?,
            selrefs: read_pointer_section(binary, &xrefs.selref_section).ok(),
            xrefs: xrefs.clone(),
            max_string_length: macho.max_string_length,
        })
    }

    pub fn with_metadata(mut self, metadata: XRefTable) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn binary(&self) -> &MachoBinary {
        self.binary
    }
}

impl XRefResolver for MachoXRefResolver<'_> {
    fn string_at(&self, address: VirtualMemoryPointer) -> Option<String> {
        if let Some(s) = self.metadata.string_at(address) {
            return Some(s);
        }
        let section = self.binary.section_for_address(address)?;
        if !self.xrefs.string_sections.iter().any(|s| *s == section.name) {
            return None;
        }
        read_string_at_address(
            self.binary,
            address,
            &self.xrefs.cfstring_section,
            self.max_string_length,
        )
        .ok()
    }

    fn class_name_for_classref(&self, address: VirtualMemoryPointer) -> Option<String> {
        self.metadata.class_name_for_classref(address)
    }

    fn pointer_section(&self, name: &str) -> Option<Cow<'_, PointerSection>> {
        if let Some(section) = self.metadata.pointer_section(name) {
            return Some(section);
        }
        if name == self.xrefs.selref_section {
            return self.selrefs.as_ref().map(Cow::Borrowed);
        }
        read_pointer_section(self.binary, name).ok().map(Cow::Owned)
    }

    fn selector_for_selref(&self, address: VirtualMemoryPointer) -> Option<String> {
        if let Some(selector) = self.metadata.selector_for_selref(address) {
            return Some(selector);
        }
        // Selector references point at the selector's name.
        let target = self.binary.read_pointer(address).ok()?;
        self.binary
            .read_c_string(target, self.max_string_length)
            .ok()
    }

    fn imported_symbol_for_pointer(&self, address: VirtualMemoryPointer) -> Option<String> {
        self.metadata
            .imported_symbol_for_pointer(address)
            .or_else(|| self.imports.get(&address).cloned())
    }
}
