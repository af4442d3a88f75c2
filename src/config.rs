//! Configuration for parsing and interpretation.
//!
//! Every knob has a default matching arm64 Objective-C binaries as produced
//! by Apple's toolchain; a JSON document only needs to name what it
//! overrides.

use serde::{Deserialize, Serialize};

use crate::io::IOLimits;

/// Master configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// File size limits applied when opening binaries.
    pub io: IOLimits,
    /// Content reading limits.
    pub macho: MachoConfig,
    /// Which sections back string and selector references.
    pub xrefs: XRefConfig,
    /// Register conventions and symbol names used by the interpreter.
    pub interpreter: InterpreterConfig,
}

impl AnalysisConfig {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachoConfig {
    /// Longest C string read from the binary (default: 4096).
    pub max_string_length: usize,
}

impl Default for MachoConfig {
    fn default() -> Self {
        Self {
            max_string_length: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XRefConfig {
    /// Sections whose contents are string literals.
    pub string_sections: Vec<String>,
    /// Section holding CFString structures (dereferenced to their literal).
    pub cfstring_section: String,
    /// Pointer section holding selector references.
    pub selref_section: String,
}

impl Default for XRefConfig {
    fn default() -> Self {
        Self {
            string_sections: vec!["__cstring".into(), "__cfstring".into()],
            cfstring_section: "__cfstring".into(),
            selref_section: "__objc_selrefs".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Register holding the message receiver and call results.
    pub receiver_register: String,
    /// Register holding the selector reference.
    pub selector_register: String,
    pub stack_pointer: String,
    /// Width of one variadic argument slot on the stack.
    pub stack_slot_size: u64,
    /// Import that performs Objective-C message dispatch.
    pub msgsend_symbol: String,
    /// Import whose format string determines how many stack slots it reads.
    pub logging_symbol: String,
    /// Selectors that return their receiver.
    pub self_returning_selectors: Vec<String>,
    /// Selector prefixes that return their receiver.
    pub self_returning_prefixes: Vec<String>,
    /// Mnemonics that materialise an address from an immediate.
    pub address_mnemonics: Vec<String>,
    /// Class name given to results of selectors with unknown return type.
    pub unknown_class: String,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            receiver_register: "x0".into(),
            selector_register: "x1".into(),
            stack_pointer: "sp".into(),
            stack_slot_size: 8,
            msgsend_symbol: "_objc_msgSend".into(),
            logging_symbol: "_NSLog".into(),
            self_returning_selectors: vec!["alloc".into(), "init".into()],
            self_returning_prefixes: vec!["initWith".into()],
            address_mnemonics: vec!["adr".into(), "ldr".into()],
            unknown_class: "_Unknown".into(),
        }
    }
}

impl InterpreterConfig {
    /// Whether sending `selector` hands back the receiver itself.
    pub fn returns_receiver(&self, selector: &str) -> bool {
        self.self_returning_selectors.iter().any(|s| s == selector)
            || self
                .self_returning_prefixes
                .iter()
                .any(|p| selector.starts_with(p.as_str()))
    }
}
