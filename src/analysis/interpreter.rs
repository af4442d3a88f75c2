//! Per-function symbolic interpretation.
//!
//! [`FunctionInterpreter`] walks one function's instructions from the end of
//! its prologue up to a target instruction, tracking what each register and
//! stack slot holds. Message sends through `_objc_msgSend` produce or extend
//! [`TracedObject`]s; every send and every plain call is recorded as a
//! [`TraceEvent`]. The value of the receiver register at the target is the
//! answer.
//!
//! Modelled instructions:
//!
//! | mnemonic        | effect                                                  |
//! |-----------------|---------------------------------------------------------|
//! | `nop`           | skipped                                                 |
//! | `adr`, `ldr`    | `dst = Pointer(imm)`; `ldr` from `[sp, #d]` reads the slot; other loads make `dst` opaque |
//! | `mov`           | copies a register, or `dst = Pointer(imm)`              |
//! | `str`           | `[sp, #d] = src`; stores through other bases are ignored |
//! | `b`, `bl`       | message send, plain call, or local branch (ignored)      |
//!
//! Everything else leaves the state untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::analysis::calls::{BranchClassifier, BranchTarget};
use crate::analysis::state::{
    display_class, AbstractValue, CallRecord, IdentityGenerator, Location, ObjectId,
    RegisterState, TracedObject,
};
use crate::analysis::xrefs::{resolve_xref, XRefKind, XRefResolver};
use crate::config::{AnalysisConfig, InterpreterConfig, XRefConfig};
use crate::core::address::VirtualMemoryPointer;
use crate::core::instruction::{trim_register_prefix, Instruction, Operand, OperandKind};

/// Target every trace line is logged under.
pub const TRACE_TARGET: &str = "machscope::trace";

/// Registers seeded with placeholder names when a method context is given.
const ARGUMENT_REGISTERS: [&str; 4] = ["x2", "x3", "x4", "x5"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpretError {
    #[error("no `add` from the stack pointer ends a prologue")]
    PrologueNotFound,
    #[error("target instruction at {0} was not reached")]
    TargetInstructionNotFound(VirtualMemoryPointer),
    #[error("message send at {address}: selector register holds {value}, not a selector reference")]
    InvalidSelectorXRef {
        address: VirtualMemoryPointer,
        value: String,
    },
    #[error("message send at {address}: cannot model receiver {receiver}")]
    UnknownReceiverKind {
        address: VirtualMemoryPointer,
        receiver: String,
    },
    #[error("call at {address}: format string is not a static literal")]
    NonStaticFormatString { address: VirtualMemoryPointer },
    #[error("unexpected operands in `{instruction}` at {address}")]
    UnexpectedOperands {
        address: VirtualMemoryPointer,
        instruction: String,
    },
}

impl InterpretError {
    fn operands(instruction: &Instruction) -> Self {
        InterpretError::UnexpectedOperands {
            address: instruction.address,
            instruction: instruction.to_string(),
        }
    }
}

/// One argument of a recorded plain call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallArgument {
    pub location: Location,
    pub value: AbstractValue,
    /// Rendering used in the trace line.
    pub text: String,
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// `result = [receiver selector]`
    MessageSend {
        address: VirtualMemoryPointer,
        receiver: String,
        /// Set when the receiver was a traced object rather than a class.
        receiver_object: Option<ObjectId>,
        selector: String,
        result: ObjectId,
        result_name: String,
    },
    /// `x0 = symbol(args)`, with the format literal first for the logging
    /// function.
    FunctionCall {
        address: VirtualMemoryPointer,
        result_register: String,
        symbol: String,
        format: Option<String>,
        arguments: Vec<CallArgument>,
    },
}

impl TraceEvent {
    pub fn address(&self) -> VirtualMemoryPointer {
        match self {
            TraceEvent::MessageSend { address, .. } | TraceEvent::FunctionCall { address, .. } => {
                *address
            }
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::MessageSend {
                receiver,
                selector,
                result_name,
                ..
            } => write!(f, "{} = [{} {}]", result_name, receiver, selector),
            TraceEvent::FunctionCall {
                result_register,
                symbol,
                format,
                arguments,
                ..
            } => {
                let mut args: Vec<String> = Vec::with_capacity(arguments.len() + 1);
                if let Some(format) = format {
                    args.push(format!("\"{}\"", format));
                }
                args.extend(arguments.iter().map(|a| a.text.clone()));
                write!(f, "{} = {}({})", result_register, symbol, args.join(", "))
            }
        }
    }
}

/// Everything one run produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpretation {
    /// Receiver register contents at the target instruction.
    pub receiver: AbstractValue,
    pub trace: Vec<TraceEvent>,
    /// Every object the run created, in creation order.
    pub objects: Vec<TracedObject>,
}

impl Interpretation {
    pub fn object(&self, id: ObjectId) -> Option<&TracedObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    /// The receiver as a traced object, if it is one.
    pub fn receiver_object(&self) -> Option<&TracedObject> {
        self.receiver.as_object().and_then(|id| self.object(id))
    }

    /// Rendered trace lines.
    pub fn lines(&self) -> Vec<String> {
        self.trace.iter().map(ToString::to_string).collect()
    }
}

/// Interprets one function against a resolver and a branch classifier.
pub struct FunctionInterpreter<'a, R: ?Sized, C: ?Sized> {
    instructions: &'a [Instruction],
    resolver: &'a R,
    classifier: &'a C,
    xrefs: XRefConfig,
    config: InterpreterConfig,
    method: Option<(String, String)>,
}

impl<'a, R, C> FunctionInterpreter<'a, R, C>
where
    R: XRefResolver + ?Sized,
    C: BranchClassifier + ?Sized,
{
    pub fn new(
        instructions: &'a [Instruction],
        resolver: &'a R,
        classifier: &'a C,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            instructions,
            resolver,
            classifier,
            xrefs: config.xrefs.clone(),
            config: config.interpreter.clone(),
            method: None,
        }
    }

    /// Interpret as the body of `-[class selector]`: the receiver register
    /// starts as a traced `self`, the selector register as the selector name
    /// and the next four argument registers as `ARG1`..`ARG4`.
    pub fn with_method(mut self, class: impl Into<String>, selector: impl Into<String>) -> Self {
        self.method = Some((class.into(), selector.into()));
        self
    }

    /// Index of the first instruction after the prologue.
    pub fn prologue_end(&self) -> Result<usize, InterpretError> {
        self.instructions
            .iter()
            .position(|ins| {
                ins.mnemonic == "add"
                    && ins
                        .operand(1)
                        .and_then(Operand::trimmed_register)
                        .is_some_and(|r| r == self.config.stack_pointer)
            })
            .map(|i| i + 1)
            .ok_or(InterpretError::PrologueNotFound)
    }

    /// Interpret up to `target` and report what the receiver register holds
    /// there. Each call starts from fresh state.
    pub fn receiver_at(&self, target: &Instruction) -> Result<Interpretation, InterpretError> {
        let span = crate::span_trace!("receiver_at", target = %target.address);
        let _guard = span.enter();

        let start = self.prologue_end()?;
        debug!(
            prologue_end = %self.instructions[start - 1].address,
            count = self.instructions.len() - start,
            "Interpreting function body"
        );

        let mut execution = Execution::new(self.resolver, self.classifier, &self.xrefs, &self.config);
        if let Some((class, selector)) = &self.method {
            execution.seed_method(class, selector);
        }

        for instruction in &self.instructions[start..] {
            if instruction.is_nop() {
                continue;
            }
            if instruction.same_instruction(target) {
                let receiver = execution
                    .state
                    .read(&Location::register(&self.config.receiver_register))
                    .into_value();
                debug!(address = %instruction.address, receiver = ?receiver, "Reached target");
                return Ok(execution.finish(receiver));
            }
            execution.step(instruction)?;
        }
        Err(InterpretError::TargetInstructionNotFound(target.address))
    }
}

/// State of one run.
struct Execution<'r, R: ?Sized, C: ?Sized> {
    resolver: &'r R,
    classifier: &'r C,
    xrefs: &'r XRefConfig,
    config: &'r InterpreterConfig,
    state: RegisterState,
    ids: IdentityGenerator,
    objects: Vec<TracedObject>,
    trace: Vec<TraceEvent>,
}

impl<'r, R, C> Execution<'r, R, C>
where
    R: XRefResolver + ?Sized,
    C: BranchClassifier + ?Sized,
{
    fn new(
        resolver: &'r R,
        classifier: &'r C,
        xrefs: &'r XRefConfig,
        config: &'r InterpreterConfig,
    ) -> Self {
        Self {
            resolver,
            classifier,
            xrefs,
            config,
            state: RegisterState::new(),
            ids: IdentityGenerator::new(),
            objects: Vec::new(),
            trace: Vec::new(),
        }
    }

    fn finish(self, receiver: AbstractValue) -> Interpretation {
        Interpretation {
            receiver,
            trace: self.trace,
            objects: self.objects,
        }
    }

    fn receiver_location(&self) -> Location {
        Location::register(&self.config.receiver_register)
    }

    fn seed_method(&mut self, class: &str, selector: &str) {
        let this = self.new_object(class, selector);
        self.state
            .write(self.receiver_location(), AbstractValue::TracedObject(this));
        self.state.write(
            Location::register(&self.config.selector_register),
            AbstractValue::RawString(selector.to_string()),
        );
        for (i, reg) in ARGUMENT_REGISTERS.iter().enumerate() {
            self.state.write(
                Location::register(*reg),
                AbstractValue::RawString(format!("ARG{}", i + 1)),
            );
        }
    }

    fn new_object(&mut self, class: &str, selector: &str) -> ObjectId {
        let id = self.ids.next_id();
        let placeholder = class == self.config.unknown_class;
        self.objects
            .push(TracedObject::new(id, class, selector, placeholder));
        id
    }

    fn object(&self, id: ObjectId) -> Option<&TracedObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    fn record(&mut self, event: TraceEvent) {
        debug!(target: TRACE_TARGET, address = %event.address(), "{}", event);
        self.trace.push(event);
    }

    fn step(&mut self, instruction: &Instruction) -> Result<(), InterpretError> {
        trace!(address = %instruction.address, instruction = %instruction, "step");
        let mnemonic = instruction.mnemonic.as_str();
        if self.config.address_mnemonics.iter().any(|m| m == mnemonic) {
            return self.load(instruction);
        }
        match mnemonic {
            "mov" => self.mov(instruction),
            "str" => self.store(instruction),
            _ if instruction.is_direct_branch() => self.branch(instruction),
            _ => Ok(()),
        }
    }

    fn destination(&self, instruction: &Instruction) -> Result<String, InterpretError> {
        instruction
            .register_at(0)
            .map(str::to_string)
            .ok_or_else(|| InterpretError::operands(instruction))
    }

    /// `[sp, #d]` with no index register.
    fn stack_slot(&self, operand: &Operand) -> Option<Location> {
        let base = operand.base.as_deref().map(trim_register_prefix)?;
        if base != self.config.stack_pointer || operand.index.is_some() {
            return None;
        }
        Some(Location::Stack(operand.displacement.unwrap_or(0)))
    }

    fn load(&mut self, instruction: &Instruction) -> Result<(), InterpretError> {
        let dst = self.destination(instruction)?;
        let src = instruction
            .operand(1)
            .ok_or_else(|| InterpretError::operands(instruction))?;
        let value = match (src.kind, src.immediate) {
            (OperandKind::Immediate, Some(imm)) => AbstractValue::Pointer(VirtualMemoryPointer(imm as u64)),
            (OperandKind::Memory, _) => match self.stack_slot(src) {
                Some(slot) => self.state.read(&slot).into_value(),
                None => AbstractValue::Opaque,
            },
            _ => return Err(InterpretError::operands(instruction)),
        };
        self.state.write(Location::Register(dst), value);
        Ok(())
    }

    fn mov(&mut self, instruction: &Instruction) -> Result<(), InterpretError> {
        let dst = self.destination(instruction)?;
        let src = instruction
            .operand(1)
            .ok_or_else(|| InterpretError::operands(instruction))?;
        let value = match (src.kind, src.register.as_deref(), src.immediate) {
            (OperandKind::Register, Some(reg), _) if reg == dst => return Ok(()),
            (OperandKind::Register, Some(reg), _) => {
                self.state.read(&Location::register(reg)).into_value()
            }
            (OperandKind::Immediate, _, Some(imm)) => {
                AbstractValue::Pointer(VirtualMemoryPointer(imm as u64))
            }
            _ => return Err(InterpretError::operands(instruction)),
        };
        self.state.write(Location::Register(dst), value);
        Ok(())
    }

    fn store(&mut self, instruction: &Instruction) -> Result<(), InterpretError> {
        let src = instruction
            .register_at(0)
            .ok_or_else(|| InterpretError::operands(instruction))?;
        let dst = instruction
            .operand(1)
            .filter(|op| op.is_memory())
            .ok_or_else(|| InterpretError::operands(instruction))?;
        let Some(slot) = self.stack_slot(dst) else {
            trace!(address = %instruction.address, "store through non-stack base ignored");
            return Ok(());
        };
        let value = self.state.read(&Location::register(src)).into_value();
        self.state.write(slot, value);
        Ok(())
    }

    fn branch(&mut self, instruction: &Instruction) -> Result<(), InterpretError> {
        match self.classifier.classify_branch(instruction) {
            BranchTarget::MessageSend => self.message_send(instruction),
            BranchTarget::FunctionCall { symbol } => self.function_call(instruction, symbol),
            BranchTarget::Local => {
                trace!(address = %instruction.address, "local branch not followed");
                Ok(())
            }
        }
    }

    /// Resolve `value` as a pointer of the given reference kind.
    fn resolve_as(&self, value: &AbstractValue, kind: XRefKind) -> Option<String> {
        let pointer = value.as_pointer()?;
        resolve_xref(self.resolver, self.xrefs, pointer)
            .ok()
            .filter(|x| x.kind == kind)
            .map(|x| x.value)
    }

    fn message_send(&mut self, instruction: &Instruction) -> Result<(), InterpretError> {
        let address = instruction.address;
        let receiver_location = self.receiver_location();
        let receiver = self.state.read(&receiver_location).into_value();
        let selector_value = self
            .state
            .read(&Location::register(&self.config.selector_register))
            .into_value();

        let selector = self
            .resolve_as(&selector_value, XRefKind::SelRef)
            .ok_or_else(|| InterpretError::InvalidSelectorXRef {
                address,
                value: self.describe(&selector_value),
            })?;

        let (receiver_text, receiver_object, result) = match &receiver {
            AbstractValue::Pointer(_) => {
                let class = self
                    .resolve_as(&receiver, XRefKind::ClassRef)
                    .ok_or_else(|| InterpretError::UnknownReceiverKind {
                        address,
                        receiver: self.describe(&receiver),
                    })?;
                let result = self.new_object(&class, &selector);
                (display_class(&class).to_string(), None, result)
            }
            AbstractValue::TracedObject(id) => {
                let id = *id;
                let object = self
                    .objects
                    .iter_mut()
                    .find(|o| o.id == id)
                    .ok_or_else(|| InterpretError::UnknownReceiverKind {
                        address,
                        receiver: id.to_string(),
                    })?;
                object.history.push(CallRecord {
                    receiver: id,
                    selector: selector.clone(),
                });
                let text = object.var_name();
                let result = if self.config.returns_receiver(&selector) {
                    id
                } else {
                    let unknown = self.config.unknown_class.clone();
                    self.new_object(&unknown, &selector)
                };
                (text, Some(id), result)
            }
            AbstractValue::Opaque | AbstractValue::RawString(_) => {
                return Err(InterpretError::UnknownReceiverKind {
                    address,
                    receiver: self.describe(&receiver),
                })
            }
        };

        self.state
            .write(receiver_location, AbstractValue::TracedObject(result));
        let result_name = self
            .object(result)
            .map(TracedObject::var_name)
            .unwrap_or_else(|| result.to_string());
        self.record(TraceEvent::MessageSend {
            address,
            receiver: receiver_text,
            receiver_object,
            selector,
            result,
            result_name,
        });
        Ok(())
    }

    fn function_call(
        &mut self,
        instruction: &Instruction,
        symbol: Option<String>,
    ) -> Result<(), InterpretError> {
        let address = instruction.address;
        let symbol = match symbol {
            Some(symbol) => symbol,
            None => {
                let dest = instruction
                    .immediate_at(0)
                    .ok_or_else(|| InterpretError::operands(instruction))?;
                format!("sub_{:x}", dest)
            }
        };
        let first = self.receiver_location();

        let (format, arguments) = if symbol == self.config.logging_symbol {
            let value = self.state.read(&first).into_value();
            let format = value
                .as_pointer()
                .and_then(|p| self.resolver.string_at(p))
                .ok_or(InterpretError::NonStaticFormatString { address })?;
            // Variadic arguments are passed on the stack, one slot each.
            let slot = self.config.stack_slot_size as i64;
            let arguments = (0..format.matches('%').count() as i64)
                .map(|i| self.argument(Location::Stack(i * slot)))
                .collect();
            (Some(format), arguments)
        } else {
            (None, vec![self.argument(first)])
        };

        self.record(TraceEvent::FunctionCall {
            address,
            result_register: self.config.receiver_register.clone(),
            symbol,
            format,
            arguments,
        });
        Ok(())
    }

    fn argument(&mut self, location: Location) -> CallArgument {
        let value = self.state.read(&location).into_value();
        let text = self.describe(&value);
        CallArgument {
            location,
            value,
            text,
        }
    }

    /// Human-readable rendering of a value for trace lines and errors.
    fn describe(&self, value: &AbstractValue) -> String {
        match value {
            AbstractValue::Pointer(p) => match resolve_xref(self.resolver, self.xrefs, *p) {
                Ok(x) => match x.kind {
                    XRefKind::String => format!("@\"{}\"", x.value),
                    XRefKind::ClassRef => display_class(&x.value).to_string(),
                    XRefKind::SelRef => format!("@selector({})", x.value),
                    XRefKind::ImportedSymbol => x.value,
                },
                Err(_) => p.to_string(),
            },
            AbstractValue::TracedObject(id) => self
                .object(*id)
                .map(TracedObject::var_name)
                .unwrap_or_else(|| id.to_string()),
            AbstractValue::Opaque => "<unknown>".to_string(),
            AbstractValue::RawString(s) => s.clone(),
        }
    }
}
