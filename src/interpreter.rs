//! Interpreter for JVM bytecode.
//!
//! Every invocation gets its own [`Frame`] with a bounded operand stack and
//! its own locals. Static calls push a callee frame on an explicit call
//! stack instead of recursing on the native stack, so call depth is
//! limited by [`RuntimeConfig::max_call_depth`] rather than by the host.
use std::io::Write;

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace};

use crate::bytecode::{Comparison, OPCode};
use crate::config::RuntimeConfig;
use crate::frame::{Frame, Locals, OperandStack};
use crate::heap::{Heap, HeapRef};
use crate::program::{Method, Program};
use crate::runtime::{Fault, RuntimeError};

/// Outcome of a single instruction.
enum Control<'a> {
    Continue,
    /// `invokestatic`: run `callee` with the given locals, then resume the
    /// caller after the call instruction.
    Invoke(&'a Method, Locals),
    /// The current method returned, with a value for `ireturn`/`areturn`.
    Return(Option<i32>),
}

/// Resolves the absolute target of the branch instruction at `pc` from its
/// signed big-endian 16-bit offset.
fn branch_target(code: &[u8], pc: usize) -> Result<usize, Fault> {
    let operand = code.get(pc + 1..pc + 3).ok_or(Fault::PcOutOfBounds {
        pc: pc + 1,
        len: code.len(),
    })?;
    let target = pc as i64 + i64::from(BigEndian::read_i16(operand));
    if target < 0 || target as usize >= code.len() {
        return Err(Fault::InvalidBranchTarget {
            target,
            len: code.len(),
        });
    }
    Ok(target as usize)
}

/// Next pc of an `if<cond>` branch at `pc`: the branch target when the top
/// of the stack satisfies `cond` against zero, `pc + 3` otherwise.
///
/// The operand is peeked, not popped.
pub fn jump_one(
    cond: Comparison,
    code: &[u8],
    stack: &OperandStack,
    pc: usize,
) -> Result<usize, Fault> {
    let value = stack.peek(0)?;
    if cond.holds(value, 0) {
        branch_target(code, pc)
    } else {
        Ok(pc + 3)
    }
}

/// Next pc of an `if_icmp<cond>` branch at `pc`, comparing the second value
/// from the top against the top value. Neither operand is popped.
pub fn jump_two(
    cond: Comparison,
    code: &[u8],
    stack: &OperandStack,
    pc: usize,
) -> Result<usize, Fault> {
    let rhs = stack.peek(0)?;
    let lhs = stack.peek(1)?;
    if cond.holds(lhs, rhs) {
        branch_target(code, pc)
    } else {
        Ok(pc + 3)
    }
}

fn branch_one(frame: &mut Frame, cond: Comparison) -> Result<usize, Fault> {
    let next = jump_one(cond, frame.code, &frame.stack, frame.pc)?;
    frame.stack.discard(1)?;
    Ok(next)
}

fn branch_two(frame: &mut Frame, cond: Comparison) -> Result<usize, Fault> {
    let next = jump_two(cond, frame.code, &frame.stack, frame.pc)?;
    frame.stack.discard(2)?;
    Ok(next)
}

/// Pops `rhs` then `lhs` and pushes `op(lhs, rhs)`.
fn binary<F>(stack: &mut OperandStack, op: F) -> Result<(), Fault>
where
    F: FnOnce(i32, i32) -> Result<i32, Fault>,
{
    let rhs = stack.pop()?;
    let lhs = stack.pop()?;
    stack.push(op(lhs, rhs)?)
}

fn locate(fault: Fault, frame: &Frame, depth: usize) -> RuntimeError {
    RuntimeError {
        fault,
        method: format!("{}{}", frame.method.name(), frame.method.descriptor()),
        pc: frame.pc,
        depth,
    }
}

/// `Interpreter` for a stack based virtual machine for JVM bytecode.
pub struct Interpreter<'a, W: Write> {
    program: &'a Program,
    heap: &'a mut Heap,
    // Sink for `System.out.println`.
    out: W,
    config: RuntimeConfig,
}

impl<'a, W: Write> Interpreter<'a, W> {
    pub fn new(program: &'a Program, heap: &'a mut Heap, out: W) -> Self {
        Self::with_config(program, heap, out, RuntimeConfig::default())
    }

    pub fn with_config(
        program: &'a Program,
        heap: &'a mut Heap,
        out: W,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            program,
            heap,
            out,
            config,
        }
    }

    /// Runs `method` until it returns and yields its return value, `None`
    /// for void methods. `locals` must already hold the arguments.
    pub fn execute(
        &mut self,
        method: &'a Method,
        locals: Locals,
    ) -> Result<Option<i32>, RuntimeError> {
        let entry_error = |fault| RuntimeError {
            fault,
            method: format!("{}{}", method.name(), method.descriptor()),
            pc: 0,
            depth: 1,
        };
        if self.config.max_call_depth == 0 {
            return Err(entry_error(Fault::CallDepthExceeded { limit: 0 }));
        }
        let mut frame = Frame::new(method, locals).map_err(entry_error)?;
        let mut callers: Vec<Frame<'a>> = Vec::new();
        let mut steps: u64 = 0;
        debug!(method = %method.name(), descriptor = %method.descriptor(), "executing method");

        loop {
            if let Some(limit) = self.config.max_steps {
                if steps >= limit {
                    return Err(locate(
                        Fault::StepLimitExceeded { limit },
                        &frame,
                        callers.len() + 1,
                    ));
                }
            }
            steps += 1;

            let control = self
                .step(&mut frame)
                .map_err(|fault| locate(fault, &frame, callers.len() + 1))?;
            match control {
                Control::Continue => {}
                Control::Invoke(callee, locals) => {
                    let depth = callers.len() + 2;
                    if depth > self.config.max_call_depth {
                        let limit = self.config.max_call_depth;
                        return Err(locate(
                            Fault::CallDepthExceeded { limit },
                            &frame,
                            depth - 1,
                        ));
                    }
                    let callee_frame = Frame::new(callee, locals)
                        .map_err(|fault| locate(fault, &frame, depth - 1))?;
                    debug!(
                        caller = %frame.method.name(),
                        callee = %callee.name(),
                        depth,
                        "invokestatic"
                    );
                    callers.push(std::mem::replace(&mut frame, callee_frame));
                }
                Control::Return(value) => {
                    debug!(method = %frame.method.name(), ?value, "method returned");
                    let Some(caller) = callers.pop() else {
                        return Ok(value);
                    };
                    frame = caller;
                    if let Some(value) = value {
                        frame
                            .stack
                            .push(value)
                            .map_err(|fault| locate(fault, &frame, callers.len() + 1))?;
                    }
                    frame.pc += OPCode::InvokeStatic.width();
                }
            }
        }
    }

    /// Executes the instruction at `frame.pc`.
    fn step(&mut self, frame: &mut Frame<'a>) -> Result<Control<'a>, Fault> {
        let byte = *frame.code.get(frame.pc).ok_or(Fault::PcOutOfBounds {
            pc: frame.pc,
            len: frame.code.len(),
        })?;
        let opcode = OPCode::try_from(byte).map_err(Fault::UnknownOpcode)?;
        trace!(
            method = %frame.method.name(),
            pc = frame.pc,
            %opcode,
            height = frame.stack.len(),
            "dispatch"
        );

        let mut next_pc = frame.pc + opcode.width();
        match opcode {
            OPCode::NOP => {}
            OPCode::IconstM1
            | OPCode::Iconst0
            | OPCode::Iconst1
            | OPCode::Iconst2
            | OPCode::Iconst3
            | OPCode::Iconst4
            | OPCode::Iconst5 => {
                let value = i32::from(byte) - i32::from(u8::from(OPCode::Iconst0));
                frame.stack.push(value)?;
            }
            OPCode::BiPush => {
                let value = frame.i1(1)?;
                frame.stack.push(i32::from(value))?;
            }
            OPCode::SiPush => {
                let value = frame.i2(1)?;
                frame.stack.push(i32::from(value))?;
            }
            OPCode::Ldc => {
                let index = frame.u1(1)?;
                let value = self.program.integer_constant(u16::from(index))?;
                frame.stack.push(value)?;
            }

            OPCode::ILoad | OPCode::ALoad => {
                let index = frame.u1(1)? as usize;
                let value = frame.locals.load(index)?;
                frame.stack.push(value)?;
            }
            OPCode::ILoad0 | OPCode::ILoad1 | OPCode::ILoad2 | OPCode::ILoad3 => {
                let index = (byte - u8::from(OPCode::ILoad0)) as usize;
                let value = frame.locals.load(index)?;
                frame.stack.push(value)?;
            }
            OPCode::ALoad0 | OPCode::ALoad1 | OPCode::ALoad2 | OPCode::ALoad3 => {
                let index = (byte - u8::from(OPCode::ALoad0)) as usize;
                let value = frame.locals.load(index)?;
                frame.stack.push(value)?;
            }
            OPCode::IStore | OPCode::AStore => {
                let index = frame.u1(1)? as usize;
                let value = frame.stack.pop()?;
                frame.locals.store(index, value)?;
            }
            OPCode::IStore0 | OPCode::IStore1 | OPCode::IStore2 | OPCode::IStore3 => {
                let index = (byte - u8::from(OPCode::IStore0)) as usize;
                let value = frame.stack.pop()?;
                frame.locals.store(index, value)?;
            }
            OPCode::AStore0 | OPCode::AStore1 | OPCode::AStore2 | OPCode::AStore3 => {
                let index = (byte - u8::from(OPCode::AStore0)) as usize;
                let value = frame.stack.pop()?;
                frame.locals.store(index, value)?;
            }
            OPCode::IInc => {
                let index = frame.u1(1)? as usize;
                let delta = frame.i1(2)?;
                frame.locals.increment(index, i32::from(delta))?;
            }

            OPCode::Dup => {
                let value = frame.stack.peek(0)?;
                frame.stack.push(value)?;
            }

            OPCode::IAdd => binary(&mut frame.stack, |a, b| Ok(a.wrapping_add(b)))?,
            OPCode::ISub => binary(&mut frame.stack, |a, b| Ok(a.wrapping_sub(b)))?,
            OPCode::IMul => binary(&mut frame.stack, |a, b| Ok(a.wrapping_mul(b)))?,
            OPCode::IDiv => binary(&mut frame.stack, |a, b| match b {
                0 => Err(Fault::DivisionByZero),
                _ => Ok(a.wrapping_div(b)),
            })?,
            OPCode::IRem => binary(&mut frame.stack, |a, b| match b {
                0 => Err(Fault::DivisionByZero),
                _ => Ok(a.wrapping_rem(b)),
            })?,
            OPCode::INeg => {
                let value = frame.stack.pop()?;
                frame.stack.push(value.wrapping_neg())?;
            }
            // Shift distances are masked to their low five bits.
            OPCode::IShl => binary(&mut frame.stack, |a, b| Ok(a.wrapping_shl(b as u32)))?,
            OPCode::IShr => binary(&mut frame.stack, |a, b| Ok(a.wrapping_shr(b as u32)))?,
            OPCode::IUShr => binary(&mut frame.stack, |a, b| {
                Ok((a as u32).wrapping_shr(b as u32) as i32)
            })?,
            OPCode::IAnd => binary(&mut frame.stack, |a, b| Ok(a & b))?,
            OPCode::IOr => binary(&mut frame.stack, |a, b| Ok(a | b))?,
            OPCode::IXor => binary(&mut frame.stack, |a, b| Ok(a ^ b))?,

            OPCode::IfEq => next_pc = branch_one(frame, Comparison::Eq)?,
            OPCode::IfNe => next_pc = branch_one(frame, Comparison::Ne)?,
            OPCode::IfLt => next_pc = branch_one(frame, Comparison::Lt)?,
            OPCode::IfGe => next_pc = branch_one(frame, Comparison::Ge)?,
            OPCode::IfGt => next_pc = branch_one(frame, Comparison::Gt)?,
            OPCode::IfLe => next_pc = branch_one(frame, Comparison::Le)?,
            OPCode::IfICmpEq => next_pc = branch_two(frame, Comparison::Eq)?,
            OPCode::IfICmpNe => next_pc = branch_two(frame, Comparison::Ne)?,
            OPCode::IfICmpLt => next_pc = branch_two(frame, Comparison::Lt)?,
            OPCode::IfICmpGe => next_pc = branch_two(frame, Comparison::Ge)?,
            OPCode::IfICmpGt => next_pc = branch_two(frame, Comparison::Gt)?,
            OPCode::IfICmpLe => next_pc = branch_two(frame, Comparison::Le)?,
            OPCode::Goto => next_pc = branch_target(frame.code, frame.pc)?,

            OPCode::IReturn | OPCode::AReturn => {
                let value = frame.stack.pop()?;
                return Ok(Control::Return(Some(value)));
            }
            OPCode::Return => return Ok(Control::Return(None)),

            // There are no static fields, `getstatic System.out` only has
            // to be stepped over.
            OPCode::GetStatic => {}
            // `System.out.println(int)` is the only virtual method.
            OPCode::InvokeVirtual => {
                let value = frame.stack.pop()?;
                writeln!(self.out, "{value}")?;
            }
            OPCode::InvokeStatic => {
                let index = frame.u2(1)?;
                let program = self.program;
                let callee = program.method_from_ref(index)?;
                if !callee.is_static() {
                    return Err(Fault::NotStatic {
                        method: format!("{}{}", callee.name(), callee.descriptor()),
                    });
                }
                let mut locals = Locals::new(callee.max_locals() as usize);
                // The last argument pushed goes to the highest slot.
                for slot in (0..callee.parameter_slots()).rev() {
                    let arg = frame.stack.pop()?;
                    locals.store(slot, arg)?;
                }
                // pc moves past the call once the callee returns.
                return Ok(Control::Invoke(callee, locals));
            }

            OPCode::NewArray => {
                let count = frame.stack.pop()?;
                let reference = self.heap.alloc(count)?;
                frame.stack.push(reference.as_i32())?;
            }
            OPCode::ArrayLength => {
                let reference = HeapRef::from(frame.stack.pop()?);
                let length = self.heap.get(reference)?.length();
                frame.stack.push(length)?;
            }
            OPCode::IAStore => {
                let value = frame.stack.pop()?;
                let index = frame.stack.pop()?;
                let reference = HeapRef::from(frame.stack.pop()?);
                self.heap.get_mut(reference)?.store(index, value)?;
            }
            OPCode::IALoad => {
                let index = frame.stack.pop()?;
                let reference = HeapRef::from(frame.stack.pop()?);
                let value = self.heap.get(reference)?.load(index)?;
                frame.stack.push(value)?;
            }
        }

        frame.pc = next_pc;
        Ok(Control::Continue)
    }
}
