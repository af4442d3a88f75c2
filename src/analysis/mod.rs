//! Analysis over a parsed slice: memory reads, reference resolution and the
//! per-function message-send interpreter.

pub mod calls;
pub mod interpreter;
pub mod memory;
pub mod state;
pub mod xrefs;

pub use calls::{BranchClassifier, BranchTarget, StubBranchClassifier};
pub use interpreter::{FunctionInterpreter, InterpretError, Interpretation, TraceEvent};
pub use memory::{MemoryError, MemoryView, PointerSection};
pub use state::{AbstractValue, Location, Lookup, ObjectId, RegisterState, TracedObject};
pub use xrefs::{resolve_xref, MachoXRefResolver, XRef, XRefError, XRefKind, XRefResolver, XRefTable};
