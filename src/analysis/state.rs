//! Abstract machine state for one interpreter run.
//!
//! Registers and stack slots map to [`AbstractValue`]s. Objects created by
//! message sends live in an arena owned by the run and are referred to by
//! [`ObjectId`]; ids come from an [`IdentityGenerator`] that is created
//! fresh for every run, so two runs over the same input agree on every id.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::address::VirtualMemoryPointer;

/// Prefix the linker gives class symbols.
pub const CLASS_SYMBOL_PREFIX: &str = "_OBJC_CLASS_$_";

/// Identity of a traced object within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out object ids starting at 0.
#[derive(Debug, Default)]
pub struct IdentityGenerator {
    next: u64,
}

impl IdentityGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next);
        self.next += 1;
        id
    }
}

/// One message sent to a traced object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub receiver: ObjectId,
    pub selector: String,
}

/// Symbolic stand-in for a runtime Objective-C instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracedObject {
    pub id: ObjectId,
    /// Class as the reference named it, e.g. `_OBJC_CLASS_$_NSString`.
    pub class_name: String,
    /// True when the class is the unknown-return-type placeholder.
    pub placeholder: bool,
    /// Messages in the order they were sent. The first one produced the
    /// object.
    pub history: Vec<CallRecord>,
}

impl TracedObject {
    pub fn new(id: ObjectId, class_name: impl Into<String>, selector: impl Into<String>, placeholder: bool) -> Self {
        Self {
            id,
            class_name: class_name.into(),
            placeholder,
            history: vec![CallRecord {
                receiver: id,
                selector: selector.into(),
            }],
        }
    }

    /// Class name without the class symbol prefix.
    pub fn display_class(&self) -> &str {
        display_class(&self.class_name)
    }

    /// Name used for this object in trace lines: the lowercased class, with
    /// the id appended for placeholder objects since those are otherwise
    /// indistinguishable.
    pub fn var_name(&self) -> String {
        let name = self.display_class().to_lowercase();
        if self.placeholder {
            format!("{}{}", name, self.id.0)
        } else {
            name
        }
    }

    pub fn selectors(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(|c| c.selector.as_str())
    }

    /// `[[Class sel1] sel2]`, the full chain of messages, nested.
    pub fn call_chain(&self) -> String {
        let mut chain = "[".repeat(self.history.len());
        chain.push_str(self.display_class());
        for call in &self.history {
            chain.push(' ');
            chain.push_str(&call.selector);
            chain.push(']');
        }
        chain
    }
}

/// Strip the class symbol prefix, if present.
pub fn display_class(class_name: &str) -> &str {
    class_name
        .strip_prefix(CLASS_SYMBOL_PREFIX)
        .unwrap_or(class_name)
}

/// Contents of a register or stack slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbstractValue {
    /// A known address, typically of a reference slot or literal.
    Pointer(VirtualMemoryPointer),
    TracedObject(ObjectId),
    /// Nothing known.
    Opaque,
    /// A name standing in for a value, e.g. a method argument.
    RawString(String),
}

impl AbstractValue {
    pub fn as_pointer(&self) -> Option<VirtualMemoryPointer> {
        match self {
            AbstractValue::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            AbstractValue::TracedObject(id) => Some(*id),
            _ => None,
        }
    }
}

/// A register or a stack slot relative to the stack pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    Register(String),
    Stack(i64),
}

impl Location {
    pub fn register(name: impl Into<String>) -> Self {
        Location::Register(name.into())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Register(name) => write!(f, "{}", name),
            Location::Stack(d) if *d < 0 => write!(f, "sp-{:#x}", d.unsigned_abs()),
            Location::Stack(d) => write!(f, "sp+{:#x}", d),
        }
    }
}

/// Result of a state read: either a value that was written, or the
/// default handed out for a location nothing wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Present(AbstractValue),
    Defaulted(AbstractValue),
}

impl Lookup {
    pub fn value(&self) -> &AbstractValue {
        match self {
            Lookup::Present(v) | Lookup::Defaulted(v) => v,
        }
    }

    pub fn into_value(self) -> AbstractValue {
        match self {
            Lookup::Present(v) | Lookup::Defaulted(v) => v,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Lookup::Defaulted(_))
    }
}

/// Register and stack contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterState {
    values: HashMap<Location, AbstractValue>,
}

impl Default for RegisterState {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterState {
    /// Empty state with the zero registers reading as address 0.
    pub fn new() -> Self {
        let mut values = HashMap::new();
        for zero in ["xzr", "wzr"] {
            values.insert(
                Location::register(zero),
                AbstractValue::Pointer(VirtualMemoryPointer(0)),
            );
        }
        Self { values }
    }

    /// Read `location`. A location nothing wrote reads as `Opaque`, and
    /// that default is recorded so later reads see it as present.
    pub fn read(&mut self, location: &Location) -> Lookup {
        if let Some(value) = self.values.get(location) {
            return Lookup::Present(value.clone());
        }
        self.values.insert(location.clone(), AbstractValue::Opaque);
        Lookup::Defaulted(AbstractValue::Opaque)
    }

    /// Read without recording a default.
    pub fn peek(&self, location: &Location) -> Option<&AbstractValue> {
        self.values.get(location)
    }

    pub fn write(&mut self, location: Location, value: AbstractValue) {
        self.values.insert(location, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_generator_is_monotonic() {
        let mut ids = IdentityGenerator::new();
        assert_eq!(ids.next_id(), ObjectId(0));
        assert_eq!(ids.next_id(), ObjectId(1));
        assert_eq!(IdentityGenerator::new().next_id(), ObjectId(0));
    }

    #[test]
    fn test_zero_register_seeded() {
        let mut state = RegisterState::new();
        assert_eq!(
            state.read(&Location::register("xzr")),
            Lookup::Present(AbstractValue::Pointer(VirtualMemoryPointer(0)))
        );
    }

    #[test]
    fn test_defaulted_read_is_recorded() {
        let mut state = RegisterState::new();
        let x9 = Location::register("x9");
        assert!(state.peek(&x9).is_none());
        assert_eq!(state.read(&x9), Lookup::Defaulted(AbstractValue::Opaque));
        assert_eq!(state.read(&x9), Lookup::Present(AbstractValue::Opaque));

        state.write(Location::Stack(8), AbstractValue::RawString("ARG1".into()));
        assert_eq!(
            state.read(&Location::Stack(8)).into_value(),
            AbstractValue::RawString("ARG1".into())
        );
    }

    #[test]
    fn test_location_display() {
        assert_eq!(Location::Stack(0).to_string(), "sp+0x0");
        assert_eq!(Location::Stack(0x18).to_string(), "sp+0x18");
        assert_eq!(Location::Stack(-8).to_string(), "sp-0x8");
        assert_eq!(Location::register("x0").to_string(), "x0");
    }

    #[test]
    fn test_var_names() {
        let foo = TracedObject::new(ObjectId(3), "_OBJC_CLASS_$_NSString", "alloc", false);
        assert_eq!(foo.var_name(), "nsstring");
        assert_eq!(foo.call_chain(), "[NSString alloc]");

        let mut unknown = TracedObject::new(ObjectId(4), "_Unknown", "description", true);
        assert_eq!(unknown.var_name(), "_unknown4");
        unknown.history.push(CallRecord {
            receiver: ObjectId(4),
            selector: "length".into(),
        });
        assert_eq!(unknown.selectors().collect::<Vec<_>>(), ["description", "length"]);
    }
}
