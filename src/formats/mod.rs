//! Executable container formats.

pub mod macho;
