//! JVM runtime module responsible for creating a new runtime
//! environment and running programs.
use crate::config::RuntimeConfig;
use crate::frame::Locals;
use crate::heap::Heap;
use crate::interpreter::Interpreter;
use crate::jvm::ClassFormatError;
use crate::program::{Method, Program};

use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, info};

/// Name of the method invoked to run a class file.
pub const MAIN_METHOD: &str = "main";
/// Descriptor of `public static void main(String[] args)`.
pub const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

/// `RuntimeErrorKind` classifies execution failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RuntimeErrorKind {
    /// Integer division or remainder by zero.
    Arithmetic,
    /// Array or local variable index out of range, negative array size.
    Index,
    /// Operand stack overflow or underflow, call depth exceeded.
    Stack,
    /// Invalid heap reference or failed allocation.
    Heap,
    /// Unknown opcode, truncated instruction or bad branch target.
    Decode,
    /// Unresolvable method or constant.
    Linkage,
    /// Writing program output failed.
    Output,
    /// Configured step limit reached.
    Limit,
}

/// What went wrong while executing an instruction.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("division by zero")]
    DivisionByZero,
    #[error("negative array size {0}")]
    NegativeArraySize(i32),
    #[error("array index {index} out of bounds for length {length}")]
    ArrayIndexOutOfBounds { index: i32, length: i32 },
    #[error("local variable {index} out of bounds for {max_locals} locals")]
    LocalIndexOutOfBounds { index: usize, max_locals: usize },
    #[error("operand stack overflow (capacity {capacity})")]
    StackOverflow { capacity: usize },
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("call depth exceeded {limit} frames")]
    CallDepthExceeded { limit: usize },
    #[error("invalid heap reference {0}")]
    InvalidReference(i32),
    #[error("cannot allocate array of {requested} elements")]
    OutOfMemory { requested: usize },
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("pc {pc} is outside of the method's {len} bytes of code")]
    PcOutOfBounds { pc: usize, len: usize },
    #[error("branch target {target} is outside of the method's {len} bytes of code")]
    InvalidBranchTarget { target: i64, len: usize },
    #[error("method {method} has no code")]
    MissingCode { method: String },
    #[error("method {method} is not static")]
    NotStatic { method: String },
    #[error(transparent)]
    Linkage(#[from] ClassFormatError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
    #[error("step limit of {limit} instructions exceeded")]
    StepLimitExceeded { limit: u64 },
}

impl Fault {
    pub const fn kind(&self) -> RuntimeErrorKind {
        match self {
            Fault::DivisionByZero => RuntimeErrorKind::Arithmetic,
            Fault::NegativeArraySize(_)
            | Fault::ArrayIndexOutOfBounds { .. }
            | Fault::LocalIndexOutOfBounds { .. } => RuntimeErrorKind::Index,
            Fault::StackOverflow { .. }
            | Fault::StackUnderflow
            | Fault::CallDepthExceeded { .. } => RuntimeErrorKind::Stack,
            Fault::InvalidReference(_) | Fault::OutOfMemory { .. } => RuntimeErrorKind::Heap,
            Fault::UnknownOpcode(_)
            | Fault::PcOutOfBounds { .. }
            | Fault::InvalidBranchTarget { .. } => RuntimeErrorKind::Decode,
            Fault::MissingCode { .. } | Fault::NotStatic { .. } | Fault::Linkage(_) => {
                RuntimeErrorKind::Linkage
            }
            Fault::Output(_) => RuntimeErrorKind::Output,
            Fault::StepLimitExceeded { .. } => RuntimeErrorKind::Limit,
        }
    }
}

/// `RuntimeError` is a fault together with where it happened.
#[derive(Debug, Error)]
#[error("{fault} in {method} at pc {pc}")]
pub struct RuntimeError {
    pub fault: Fault,
    /// Name and descriptor of the executing method.
    pub method: String,
    pub pc: usize,
    /// Number of live frames when the fault was raised.
    pub depth: usize,
}

impl RuntimeError {
    pub const fn kind(&self) -> RuntimeErrorKind {
        self.fault.kind()
    }
}

/// Failures of a whole run, from method lookup to execution.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("missing {name}{descriptor} method")]
    MissingMethod { name: String, descriptor: String },
    #[error("{name}{descriptor} expects {expected} argument slots, got {actual}")]
    ArgumentCount {
        name: String,
        descriptor: String,
        expected: usize,
        actual: usize,
    },
    #[error("{name}{descriptor} should return void but returned {value}")]
    UnexpectedReturn {
        name: String,
        descriptor: String,
        value: i32,
    },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Finds a static method to start a run from.
fn lookup<'p>(
    program: &'p Program,
    name: &str,
    descriptor: &str,
) -> Result<&'p Method, RunError> {
    let method = program
        .find_method(name, descriptor)
        .ok_or_else(|| RunError::MissingMethod {
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        })?;
    if !method.is_static() {
        let signature = format!("{name}{descriptor}");
        return Err(RunError::Runtime(RuntimeError {
            fault: Fault::NotStatic {
                method: signature.clone(),
            },
            method: signature,
            pc: 0,
            depth: 0,
        }));
    }
    Ok(method)
}

/// `Runtime` owns a loaded program and its heap, and runs methods of the
/// program to completion.
pub struct Runtime {
    program: Program,
    heap: Heap,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(program: Program) -> Self {
        Self::with_config(program, RuntimeConfig::default())
    }

    pub fn with_config(program: Program, config: RuntimeConfig) -> Self {
        Self {
            program,
            heap: Heap::new(),
            config,
        }
    }

    pub const fn program(&self) -> &Program {
        &self.program
    }

    pub const fn heap(&self) -> &Heap {
        &self.heap
    }

    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Runs `public static void main(String[])`.
    pub fn run<W: Write>(&mut self, out: W) -> Result<(), RunError> {
        self.run_entry(MAIN_METHOD, MAIN_DESCRIPTOR, out)
    }

    /// Runs a void entry method with zeroed locals. The `String[]`
    /// parameter of `main` is left as 0 since there are no objects.
    pub fn run_entry<W: Write>(
        &mut self,
        name: &str,
        descriptor: &str,
        out: W,
    ) -> Result<(), RunError> {
        let method = lookup(&self.program, name, descriptor)?;
        info!(class = %self.program.class_name(), method = %name, "running entry method");

        let locals = Locals::new(method.max_locals() as usize);
        let mut interpreter =
            Interpreter::with_config(&self.program, &mut self.heap, out, self.config.clone());
        match interpreter.execute(method, locals)? {
            None => Ok(()),
            Some(value) => Err(RunError::UnexpectedReturn {
                name: name.to_owned(),
                descriptor: descriptor.to_owned(),
                value,
            }),
        }
    }

    /// Invokes a static method with explicit arguments and returns its
    /// result, `None` for void methods.
    pub fn invoke<W: Write>(
        &mut self,
        name: &str,
        descriptor: &str,
        args: &[i32],
        out: W,
    ) -> Result<Option<i32>, RunError> {
        let method = lookup(&self.program, name, descriptor)?;
        let expected = method.parameter_slots();
        if args.len() != expected {
            return Err(RunError::ArgumentCount {
                name: name.to_owned(),
                descriptor: descriptor.to_owned(),
                expected,
                actual: args.len(),
            });
        }

        let mut locals = Locals::new(method.max_locals() as usize);
        for (slot, &arg) in args.iter().enumerate() {
            locals.store(slot, arg).map_err(|fault| RuntimeError {
                fault,
                method: format!("{name}{descriptor}"),
                pc: 0,
                depth: 0,
            })?;
        }
        debug!(method = %name, ?args, "invoking method");

        let mut interpreter =
            Interpreter::with_config(&self.program, &mut self.heap, out, self.config.clone());
        Ok(interpreter.execute(method, locals)?)
    }
}
