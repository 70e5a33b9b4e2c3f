//! `microbrew` is a small interpreter for the integer subset of JVM
//! bytecode. It loads a single class file and runs one of its static
//! methods, following `invokestatic` calls within the same class.
//!
//! ```no_run
//! use microbrew::jvm::{read_class_file, JVMParser};
//! use microbrew::program::Program;
//! use microbrew::runtime::Runtime;
//! use std::path::Path;
//!
//! let bytes = read_class_file(Path::new("Factorial.class"))?;
//! let class_file = JVMParser::parse(&bytes)?;
//! let mut runtime = Runtime::new(Program::new(&class_file)?);
//! runtime.run(std::io::stdout())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub mod bytecode;
pub mod config;
pub mod disasm;
pub mod frame;
pub mod heap;
pub mod interpreter;
pub mod jvm;
pub mod program;
pub mod runtime;

pub use config::RuntimeConfig;
pub use runtime::{RunError, Runtime, RuntimeError, RuntimeErrorKind};
