//! Byte order and CPU identification shared by the format parsers and the
//! disassembler adapter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte order of multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Endianness {
    /// Little-endian byte order
    #[default]
    Little,
    /// Big-endian byte order
    Big,
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Little => write!(f, "little"),
            Endianness::Big => write!(f, "big"),
        }
    }
}

/// Mach-O CPU type field, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuType {
    /// 32-bit ARM (`CPU_TYPE_ARM`)
    ArmV7,
    /// 64-bit ARM (`CPU_TYPE_ARM | CPU_ARCH_ABI64`)
    Arm64,
    /// Anything else, with the raw value kept for diagnostics.
    Unknown(u32),
}

impl CpuType {
    pub const ARCH_ABI64: u32 = 0x0100_0000;
    pub const ARM: u32 = 12;
    pub const ARM64: u32 = Self::ARM | Self::ARCH_ABI64;

    pub fn from_raw(raw: u32) -> Self {
        match raw {
            Self::ARM => CpuType::ArmV7,
            Self::ARM64 => CpuType::Arm64,
            other => CpuType::Unknown(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            CpuType::ArmV7 => Self::ARM,
            CpuType::Arm64 => Self::ARM64,
            CpuType::Unknown(v) => v,
        }
    }

    pub fn is_64_bit(self) -> bool {
        self.raw() & Self::ARCH_ABI64 != 0
    }
}

impl fmt::Display for CpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuType::ArmV7 => write!(f, "armv7"),
            CpuType::Arm64 => write!(f, "arm64"),
            CpuType::Unknown(v) => write!(f, "unknown({:#x})", v),
        }
    }
}
