//! Core data types shared by the parser, the disassembler adapter and the
//! interpreter.
//!
//! Addresses come first: nearly every other type carries a
//! [`address::VirtualMemoryPointer`] or [`address::StaticFilePointer`].

pub mod address;
pub mod binary;
pub mod disassembler;
pub mod instruction;
