//! Crate-level error type.
//!
//! Each layer has its own `thiserror` enum; [`MachscopeError`] wraps them so
//! callers driving the whole pipeline can use a single `?`.

use thiserror::Error;

use crate::analysis::interpreter::InterpretError;
use crate::analysis::memory::MemoryError;
use crate::analysis::xrefs::XRefError;
use crate::core::disassembler::DisassemblerError;
use crate::formats::macho::MachoError;
use crate::io::error::IoError;

/// Main error type for machscope operations.
#[derive(Debug, Error)]
pub enum MachscopeError {
    /// Malformed or unsupported Mach-O input
    #[error("Mach-O error: {0}")]
    Macho(#[from] MachoError),

    /// Reading the backing file failed
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("memory read error: {0}")]
    Memory(#[from] MemoryError),

    #[error("cross-reference error: {0}")]
    XRef(#[from] XRefError),

    #[error("interpretation error: {0}")]
    Interpret(#[from] InterpretError),

    #[error("disassembly error: {0}")]
    Disassembler(#[from] DisassemblerError),

    /// Configuration could not be parsed or serialized
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type alias for machscope operations
pub type Result<T> = std::result::Result<T, MachscopeError>;
