//! Disassembler trait and error types for instruction decoding.
//!
//! The interpreter does not care where its instructions come from; this
//! trait is the seam a decoding backend plugs into.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::address::VirtualMemoryPointer;
use crate::core::binary::Endianness;
use crate::core::instruction::Instruction;

/// Errors that can occur during disassembly operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisassemblerError {
    #[error("invalid instruction at {0}")]
    InvalidInstruction(VirtualMemoryPointer),
    #[error("insufficient bytes at {0}")]
    InsufficientBytes(VirtualMemoryPointer),
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(Architecture),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for disassembly operations
pub type DisassemblerResult<T> = Result<T, DisassemblerError>;

/// Architecture types supported by disassemblers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    /// ARM (32-bit)
    ARM,
    /// ARM64/AArch64 (64-bit)
    ARM64,
    /// Unknown/unsupported architecture
    Unknown,
}

impl Architecture {
    pub fn address_bits(&self) -> u8 {
        match self {
            Architecture::ARM => 32,
            Architecture::ARM64 | Architecture::Unknown => 64,
        }
    }
}

impl From<crate::core::binary::CpuType> for Architecture {
    fn from(cpu: crate::core::binary::CpuType) -> Self {
        use crate::core::binary::CpuType;
        match cpu {
            CpuType::ArmV7 => Architecture::ARM,
            CpuType::Arm64 => Architecture::ARM64,
            CpuType::Unknown(_) => Architecture::Unknown,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::ARM => write!(f, "arm"),
            Architecture::ARM64 => write!(f, "arm64"),
            Architecture::Unknown => write!(f, "unknown"),
        }
    }
}

/// Core disassembler trait that provides a common interface for instruction decoding
pub trait Disassembler {
    /// Disassemble a single instruction located at `address`.
    fn disassemble_instruction(
        &self,
        address: VirtualMemoryPointer,
        bytes: &[u8],
    ) -> DisassemblerResult<Instruction>;

    /// Get the maximum instruction length for this architecture in bytes
    fn max_instruction_length(&self) -> usize;

    fn architecture(&self) -> Architecture;

    fn endianness(&self) -> Endianness;

    /// Decode a contiguous run of instructions starting at `address`.
    ///
    /// Stops at the end of `bytes`; trailing bytes too short for an
    /// instruction are ignored.
    fn disassemble_range(
        &self,
        address: VirtualMemoryPointer,
        bytes: &[u8],
    ) -> DisassemblerResult<Vec<Instruction>> {
        let mut out = Vec::new();
        let mut offset = 0usize;
        while offset < bytes.len() {
            let at = address
                .checked_add(offset as u64)
                .ok_or(DisassemblerError::InvalidInstruction(address))?;
            let ins = match self.disassemble_instruction(at, &bytes[offset..]) {
                Ok(ins) => ins,
                Err(DisassemblerError::InsufficientBytes(_)) => break,
                Err(e) => return Err(e),
            };
            let len = usize::from(ins.length).max(1);
            out.push(ins);
            offset += len;
        }
        Ok(out)
    }

    /// Get a human-readable name for this disassembler
    fn name(&self) -> &str {
        "Generic Disassembler"
    }
}
