//! Instruction decoding backends.
//!
//! Only AArch64 is decoded; the interpreter consumes the resulting
//! [`crate::core::instruction::Instruction`]s and never sees the backend.

pub mod capstone;

pub use self::capstone::CapstoneDisassembler;
