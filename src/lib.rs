//! machscope: Mach-O (arm64) slice parsing and Objective-C message-send
//! chain recovery.
//!
//! The pipeline has three stages:
//!
//! 1. [`formats::macho`] parses a thin or fat Mach-O file into
//!    [`formats::macho::MachoBinary`] slices, borrowing from a memory-mapped
//!    [`io::ByteSource`].
//! 2. [`disasm`] decodes a function's bytes into
//!    [`core::instruction::Instruction`]s.
//! 3. [`analysis::interpreter::FunctionInterpreter`] walks those
//!    instructions, resolving addresses through an
//!    [`analysis::xrefs::XRefResolver`], and reports which object receives
//!    the message at a chosen call site together with a trace of every
//!    message send along the way.
//!
//! ```no_run
//! use machscope::analysis::{FunctionInterpreter, MachoXRefResolver, StubBranchClassifier};
//! use machscope::config::AnalysisConfig;
//! use machscope::core::binary::CpuType;
//! use machscope::formats::macho::MachoContainer;
//! use machscope::io::ByteSource;
//!
//! # fn main() -> machscope::Result<()> {
//! # let instructions: Vec<machscope::core::instruction::Instruction> = Vec::new();
//! let config = AnalysisConfig::default();
//! let source = ByteSource::open("Example.app/Example", &config.io)?;
//! let container = MachoContainer::parse(source)?;
//! if let Some(binary) = container.slice_for_cpu(CpuType::Arm64) {
//!     let resolver = MachoXRefResolver::new(binary, &config.xrefs, &config.macho)?;
//!     let classifier = StubBranchClassifier::from_binary(binary, &config.interpreter)?;
//!     let interpreter =
//!         FunctionInterpreter::new(&instructions, &resolver, &classifier, &config);
//!     let result = interpreter.receiver_at(&instructions[instructions.len() - 1])?;
//!     for line in result.lines() {
//!         println!("{}", line);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Core data types module
pub mod core;

pub mod analysis;
pub mod config;
#[cfg(feature = "disasm")]
pub mod disasm;
pub mod error;
pub mod formats;
pub mod io;
pub mod logging;

pub use error::{MachscopeError, Result};
