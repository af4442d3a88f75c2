use capstone::arch::arm64::Arm64OperandType;
use capstone::prelude::*;
use capstone::{Arch, Capstone, Endian, Mode, RegId, NO_EXTRA_MODE};
use tracing::trace;

use crate::core::address::VirtualMemoryPointer;
use crate::core::binary::Endianness;
use crate::core::disassembler::{
    Architecture, Disassembler, DisassemblerError, DisassemblerResult,
};
use crate::core::instruction::{Access, Instruction, Operand};

/// Fixed AArch64 instruction width.
const ARM64_INSTRUCTION_SIZE: usize = 4;

pub struct CapstoneDisassembler {
    cs: capstone::Capstone,
    arch: Architecture,
    endianness: Endianness,
}

impl CapstoneDisassembler {
    pub fn new(arch: Architecture, endianness: Endianness) -> DisassemblerResult<Self> {
        if arch != Architecture::ARM64 {
            return Err(DisassemblerError::UnsupportedArchitecture(arch));
        }
        let endian = match endianness {
            Endianness::Big => Endian::Big,
            Endianness::Little => Endian::Little,
        };
        let mut cs = Capstone::new_raw(Arch::ARM64, Mode::Arm, NO_EXTRA_MODE, Some(endian))
            .map_err(|e| DisassemblerError::Backend(e.to_string()))?;
        // Details carry the structured operands the interpreter reads.
        cs.set_detail(true)
            .map_err(|e| DisassemblerError::Backend(e.to_string()))?;
        Ok(Self {
            cs,
            arch,
            endianness,
        })
    }

    /// Little-endian AArch64, as found in every arm64 Mach-O slice.
    pub fn arm64() -> DisassemblerResult<Self> {
        Self::new(Architecture::ARM64, Endianness::Little)
    }

    fn reg_name(&self, reg: RegId) -> Option<String> {
        if reg.0 == 0 {
            None
        } else {
            self.cs.reg_name(reg)
        }
    }

    /// Text fallback for instructions the detail API reports no operands
    /// for: `reg`, `#imm` and `[base, #disp]` tokens.
    fn parse_operands_simple(op_str: &str) -> Vec<Operand> {
        let mut out = Vec::new();
        let mut rest = op_str.trim();
        while !rest.is_empty() {
            let (token, tail) = if rest.starts_with('[') {
                match rest.find(']') {
                    Some(end) => (&rest[..=end], &rest[end + 1..]),
                    None => (rest, ""),
                }
            } else {
                match rest.find(',') {
                    Some(end) => (&rest[..end], &rest[end..]),
                    None => (rest, ""),
                }
            };
            rest = tail.trim_start_matches([',', '!']).trim();
            let token = token.trim().to_ascii_lowercase();

            if let Some(inside) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                let mut parts = inside.split(',').map(str::trim).filter(|p| !p.is_empty());
                let base = parts.next().map(str::to_string);
                let disp = parts.next().and_then(parse_immediate);
                out.push(Operand::memory(Access::Read, disp.or(Some(0)), base, None));
            } else if let Some(value) = parse_immediate(&token) {
                out.push(Operand::immediate(value));
            } else if !token.is_empty() {
                out.push(Operand::register(token, Access::Read));
            }
        }
        out
    }
}

fn parse_immediate(token: &str) -> Option<i64> {
    let s = token.trim_start_matches('#');
    let (negative, s) = match s.strip_prefix('-') {
        Some(s) => (true, s),
        None => (false, s),
    };
    let value = match s.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None if token.starts_with('#') => s.parse::<i64>().ok()?,
        None => return None,
    };
    Some(if negative { -value } else { value })
}

impl Disassembler for CapstoneDisassembler {
    fn disassemble_instruction(
        &self,
        address: VirtualMemoryPointer,
        bytes: &[u8],
    ) -> DisassemblerResult<Instruction> {
        if bytes.len() < ARM64_INSTRUCTION_SIZE {
            return Err(DisassemblerError::InsufficientBytes(address));
        }
        let insns = self
            .cs
            .disasm_count(&bytes[..ARM64_INSTRUCTION_SIZE], address.value(), 1)
            .map_err(|e| DisassemblerError::Backend(e.to_string()))?;
        let insn = insns
            .iter()
            .next()
            .ok_or(DisassemblerError::InvalidInstruction(address))?;
        let mnemonic = insn.mnemonic().unwrap_or("").to_string();

        let mut operands: Vec<Operand> = Vec::new();
        if let Ok(detail) = self.cs.insn_detail(insn) {
            if let Some(ad) = detail.arch_detail().arm64() {
                for op in ad.operands() {
                    match op.op_type {
                        Arm64OperandType::Reg(r) => {
                            if let Some(name) = self.reg_name(r) {
                                operands.push(Operand::register(name, Access::Read));
                            }
                        }
                        Arm64OperandType::Imm(i) => {
                            operands.push(Operand::immediate(i));
                        }
                        Arm64OperandType::Mem(m) => {
                            operands.push(Operand::memory(
                                Access::Read,
                                Some(i64::from(m.disp())),
                                self.reg_name(m.base()),
                                self.reg_name(m.index()),
                            ));
                        }
                        _ => {}
                    }
                }
            }
        }
        if operands.is_empty() {
            let ops = insn.op_str().unwrap_or("");
            if !ops.is_empty() {
                operands = Self::parse_operands_simple(ops);
            }
        }

        let ins = Instruction::new(address, insn.bytes().to_vec(), mnemonic, operands);
        trace!(address = %address, instruction = %ins, "decoded");
        Ok(ins)
    }

    fn max_instruction_length(&self) -> usize {
        ARM64_INSTRUCTION_SIZE
    }

    fn architecture(&self) -> Architecture {
        self.arch
    }

    fn endianness(&self) -> Endianness {
        self.endianness
    }

    fn name(&self) -> &str {
        "capstone"
    }
}
