//! Instruction and Operand types for decoded assembly instructions.
//!
//! Instruction represents a decoded ARM64 instruction at a specific virtual
//! address. It is the input currency of the function interpreter; the
//! interpreter only looks at the mnemonic and the structured operands, never
//! at the textual rendering.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::address::VirtualMemoryPointer;

/// Types of operands that can appear in instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandKind {
    /// Register operand
    Register,
    /// Immediate value operand
    Immediate,
    /// Memory reference operand (`[base, #disp]`)
    Memory,
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandKind::Register => write!(f, "Register"),
            OperandKind::Immediate => write!(f, "Immediate"),
            OperandKind::Memory => write!(f, "Memory"),
        }
    }
}

/// Access types for operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    /// Read access
    Read,
    /// Write access
    Write,
    /// Read and write access
    ReadWrite,
}

/// Structured operand representation for instructions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    /// Type of operand
    pub kind: OperandKind,
    /// Access type
    pub access: Access,
    /// String representation of the operand
    pub text: String,
    /// Register name (for Register operands)
    pub register: Option<String>,
    /// Immediate value (for Immediate operands)
    pub immediate: Option<i64>,
    /// Memory displacement (for Memory operands)
    pub displacement: Option<i64>,
    /// Memory base register (for Memory operands)
    pub base: Option<String>,
    /// Memory index register (for Memory operands)
    pub index: Option<String>,
}

impl Operand {
    /// Create a new register operand
    pub fn register(name: impl Into<String>, access: Access) -> Self {
        let name = name.into();
        Self {
            kind: OperandKind::Register,
            access,
            text: name.clone(),
            register: Some(name),
            immediate: None,
            displacement: None,
            base: None,
            index: None,
        }
    }

    /// Create a new immediate operand
    pub fn immediate(value: i64) -> Self {
        Self {
            kind: OperandKind::Immediate,
            access: Access::Read,
            text: if value < 0 {
                format!("#-0x{:x}", value.unsigned_abs())
            } else {
                format!("#0x{:x}", value)
            },
            register: None,
            immediate: Some(value),
            displacement: None,
            base: None,
            index: None,
        }
    }

    /// Create a new memory operand
    pub fn memory(
        access: Access,
        displacement: Option<i64>,
        base: Option<String>,
        index: Option<String>,
    ) -> Self {
        let mut parts: Vec<String> = Vec::new();
        if let Some(base) = &base {
            parts.push(base.clone());
        }
        if let Some(index) = &index {
            parts.push(index.clone());
        }
        match displacement {
            Some(d) if d < 0 => parts.push(format!("#-0x{:x}", d.unsigned_abs())),
            Some(d) if d > 0 => parts.push(format!("#0x{:x}", d)),
            _ => {}
        }
        Self {
            kind: OperandKind::Memory,
            access,
            text: format!("[{}]", parts.join(", ")),
            register: None,
            immediate: None,
            displacement,
            base,
            index,
        }
    }

    /// Check if this operand is a register
    pub fn is_register(&self) -> bool {
        self.kind == OperandKind::Register
    }

    /// Check if this operand is an immediate
    pub fn is_immediate(&self) -> bool {
        self.kind == OperandKind::Immediate
    }

    /// Check if this operand is a memory reference
    pub fn is_memory(&self) -> bool {
        self.kind == OperandKind::Memory
    }

    /// Register name with a leading `x`/`w`/`r` width prefix stripped, so
    /// `wsp`, `xsp` and `sp` compare equal.
    pub fn trimmed_register(&self) -> Option<&str> {
        self.register.as_deref().map(trim_register_prefix)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Strip an ARM width prefix (`x`, `w`, `r`) from a register name.
///
/// Only the prefix is removed; `sp` stays `sp` and `x29` becomes `29`.
pub fn trim_register_prefix(name: &str) -> &str {
    match name.as_bytes().first() {
        Some(b'x' | b'w' | b'r') if name.len() > 1 => &name[1..],
        _ => name,
    }
}

/// Decoded instruction at a specific address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Address where this instruction is located
    pub address: VirtualMemoryPointer,
    /// Raw bytes of the instruction
    pub bytes: Vec<u8>,
    /// Instruction mnemonic (e.g., "mov", "adr", "bl")
    pub mnemonic: String,
    /// Structured operands
    pub operands: Vec<Operand>,
    /// Length of the instruction in bytes
    pub length: u16,
    /// Optional instruction groups/categories reported by the decoder
    pub groups: Option<Vec<String>>,
}

impl Instruction {
    pub fn new(
        address: VirtualMemoryPointer,
        bytes: Vec<u8>,
        mnemonic: impl Into<String>,
        operands: Vec<Operand>,
    ) -> Self {
        let length = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
        Self {
            address,
            bytes,
            mnemonic: mnemonic.into(),
            operands,
            length,
            groups: None,
        }
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }

    /// Register name of operand `index`, if that operand is a register.
    pub fn register_at(&self, index: usize) -> Option<&str> {
        self.operand(index).and_then(|op| op.register.as_deref())
    }

    /// Immediate value of operand `index`, if that operand is an immediate.
    pub fn immediate_at(&self, index: usize) -> Option<i64> {
        self.operand(index).and_then(|op| op.immediate)
    }

    pub fn is_nop(&self) -> bool {
        self.mnemonic == "nop"
    }

    /// Unconditional direct branch (`b`) or branch-with-link (`bl`).
    pub fn is_direct_branch(&self) -> bool {
        matches!(self.mnemonic.as_str(), "b" | "bl")
    }

    /// Identity comparison: same location and same encoding.
    ///
    /// Two decodes of the same bytes at the same address are the same
    /// instruction even if the decoder rendered operands differently.
    pub fn same_instruction(&self, other: &Instruction) -> bool {
        self.address == other.address && self.bytes == other.bytes
    }

    /// Address one past the last byte of this instruction.
    pub fn end_address(&self) -> Option<VirtualMemoryPointer> {
        self.address.checked_add(u64::from(self.length))
    }

    /// Get a human-readable disassembly string
    pub fn disassembly(&self) -> String {
        let mut result = format!("{:08x}: ", self.address.value());
        let hex: Vec<String> = self.bytes.iter().map(|b| format!("{:02x}", b)).collect();
        result.push_str(&hex.join(" "));
        while result.len() < 24 {
            result.push(' ');
        }
        result.push_str(&self.to_string());
        result
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operands.is_empty() {
            return write!(f, "{}", self.mnemonic);
        }
        let ops: Vec<String> = self.operands.iter().map(|op| op.to_string()).collect();
        write!(f, "{} {}", self.mnemonic, ops.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_x29_sp() -> Instruction {
        Instruction::new(
            VirtualMemoryPointer(0x1000),
            vec![0xfd, 0x43, 0x00, 0x91],
            "add",
            vec![
                Operand::register("x29", Access::Write),
                Operand::register("sp", Access::Read),
                Operand::immediate(0x10),
            ],
        )
    }

    #[test]
    fn test_operand_creation() {
        let reg = Operand::register("x0", Access::Read);
        assert!(reg.is_register());
        assert_eq!(reg.text, "x0");

        let imm = Operand::immediate(0x20);
        assert!(imm.is_immediate());
        assert_eq!(imm.text, "#0x20");

        let mem = Operand::memory(Access::Write, Some(8), Some("sp".into()), None);
        assert!(mem.is_memory());
        assert_eq!(mem.text, "[sp, #0x8]");

        let neg = Operand::memory(Access::Read, Some(-16), Some("x29".into()), None);
        assert_eq!(neg.text, "[x29, #-0x10]");
    }

    #[test]
    fn test_trim_register_prefix() {
        assert_eq!(trim_register_prefix("sp"), "sp");
        assert_eq!(trim_register_prefix("wsp"), "sp");
        assert_eq!(trim_register_prefix("x29"), "29");
        assert_eq!(trim_register_prefix("x"), "x");
        assert_eq!(
            Operand::register("wsp", Access::Read).trimmed_register(),
            Some("sp")
        );
    }

    #[test]
    fn test_instruction_accessors() {
        let ins = add_x29_sp();
        assert_eq!(ins.length, 4);
        assert_eq!(ins.register_at(1), Some("sp"));
        assert_eq!(ins.immediate_at(2), Some(0x10));
        assert_eq!(ins.immediate_at(0), None);
        assert_eq!(ins.end_address(), Some(VirtualMemoryPointer(0x1004)));
        assert!(!ins.is_nop());
        assert!(!ins.is_direct_branch());
        assert_eq!(ins.to_string(), "add x29, sp, #0x10");
        assert!(ins.disassembly().starts_with("00001000: fd 43 00 91"));
    }

    #[test]
    fn test_same_instruction_ignores_rendering() {
        let a = add_x29_sp();
        let mut b = add_x29_sp();
        b.mnemonic = "ADD".into();
        assert!(a.same_instruction(&b));

        let mut moved = add_x29_sp();
        moved.address = VirtualMemoryPointer(0x2000);
        assert!(!a.same_instruction(&moved));
    }
}
