//! Address types for binary analysis.
//!
//! Mach-O analysis juggles two address spaces: where bytes live in the file
//! and where they land once the loader maps them. Keeping them as distinct
//! newtypes means one cannot be passed where the other is expected; moving
//! between them always goes through the segment map
//! (see [`crate::formats::macho::MachoBinary::file_offset_for_virtual_address`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// An address in the loaded image's virtual memory.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VirtualMemoryPointer(pub u64);

/// An offset into the on-disk file (or container slice).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StaticFilePointer(pub u64);

macro_rules! pointer_common {
    ($ty:ident) => {
        impl $ty {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn value(self) -> u64 {
                self.0
            }

            /// Add a byte delta, returning `None` on overflow.
            pub fn checked_add(self, delta: u64) -> Option<Self> {
                self.0.checked_add(delta).map(Self)
            }

            /// Distance from `base` to `self`, or `None` if `self` precedes `base`.
            pub fn offset_from(self, base: Self) -> Option<u64> {
                self.0.checked_sub(base.0)
            }
        }

        impl From<u64> for $ty {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl fmt::LowerHex for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

pointer_common!(VirtualMemoryPointer);
pointer_common!(StaticFilePointer);
