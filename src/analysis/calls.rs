//! Branch classification.
//!
//! The interpreter only needs to know, for each `b`/`bl`, whether it is an
//! Objective-C message send, a call to some other function, or a jump
//! inside the function being interpreted.

use std::collections::HashMap;
use std::ops::Range;

use crate::config::InterpreterConfig;
use crate::core::address::VirtualMemoryPointer;
use crate::core::instruction::Instruction;
use crate::formats::macho::{MachoBinary, MachoError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchTarget {
    /// Call through the message dispatch import.
    MessageSend,
    /// Call to anything else. `symbol` is `None` when the destination has
    /// no known name.
    FunctionCall { symbol: Option<String> },
    /// Branch that stays inside the current function.
    Local,
}

pub trait BranchClassifier {
    fn classify_branch(&self, instruction: &Instruction) -> BranchTarget;
}

/// Classifies branches by destination: import stubs are looked up by
/// address, destinations inside `function_range` are local.
#[derive(Debug, Clone, Default)]
pub struct StubBranchClassifier {
    stubs: HashMap<VirtualMemoryPointer, String>,
    msgsend_symbol: String,
    function_range: Option<Range<u64>>,
}

impl StubBranchClassifier {
    pub fn new(stubs: HashMap<VirtualMemoryPointer, String>, msgsend_symbol: impl Into<String>) -> Self {
        Self {
            stubs,
            msgsend_symbol: msgsend_symbol.into(),
            function_range: None,
        }
    }

    /// Build from the slice's stub and pointer sections.
    pub fn from_binary(binary: &MachoBinary, config: &InterpreterConfig) -> Result<Self, MachoError> {
        Ok(Self::new(binary.imported_symbol_slots()?, config.msgsend_symbol.as_str()))
    }

    pub fn with_stub(mut self, address: u64, symbol: impl Into<String>) -> Self {
        self.stubs.insert(VirtualMemoryPointer(address), symbol.into());
        self
    }

    /// Treat branches into `[start, end)` as local.
    pub fn with_function_range(mut self, start: u64, end: u64) -> Self {
        self.function_range = Some(start..end);
        self
    }

    pub fn symbol_at(&self, address: VirtualMemoryPointer) -> Option<&str> {
        self.stubs.get(&address).map(String::as_str)
    }
}

impl BranchClassifier for StubBranchClassifier {
    fn classify_branch(&self, instruction: &Instruction) -> BranchTarget {
        let Some(dest) = instruction.immediate_at(0).map(|d| d as u64) else {
            return BranchTarget::FunctionCall { symbol: None };
        };
        if self
            .function_range
            .as_ref()
            .is_some_and(|range| range.contains(&dest))
        {
            return BranchTarget::Local;
        }
        match self.symbol_at(VirtualMemoryPointer(dest)) {
            Some(symbol) if symbol == self.msgsend_symbol => BranchTarget::MessageSend,
            Some(symbol) => BranchTarget::FunctionCall {
                symbol: Some(symbol.to_string()),
            },
            None => BranchTarget::FunctionCall { symbol: None },
        }
    }
}
