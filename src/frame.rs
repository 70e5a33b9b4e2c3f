//! Per-invocation execution state.
use crate::program::Method;
use crate::runtime::Fault;

use byteorder::{BigEndian, ByteOrder};

/// Bounded operand stack of a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandStack {
    values: Vec<i32>,
    capacity: usize,
}

impl OperandStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: i32) -> Result<(), Fault> {
        if self.values.len() >= self.capacity {
            return Err(Fault::StackOverflow {
                capacity: self.capacity,
            });
        }
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<i32, Fault> {
        self.values.pop().ok_or(Fault::StackUnderflow)
    }

    /// Returns the value `depth` entries below the top without removing it.
    pub fn peek(&self, depth: usize) -> Result<i32, Fault> {
        self.values
            .len()
            .checked_sub(depth + 1)
            .map(|i| self.values[i])
            .ok_or(Fault::StackUnderflow)
    }

    /// Drops the top `count` values.
    pub fn discard(&mut self, count: usize) -> Result<(), Fault> {
        let height = self
            .values
            .len()
            .checked_sub(count)
            .ok_or(Fault::StackUnderflow)?;
        self.values.truncate(height);
        Ok(())
    }
}

/// Local variable slots of a single frame. Integers and references share
/// the same slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locals {
    slots: Vec<i32>,
}

impl Locals {
    /// Zeroed locals for a method with `max_locals` slots.
    pub fn new(max_locals: usize) -> Self {
        Self {
            slots: vec![0; max_locals],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&mut self, index: usize) -> Result<&mut i32, Fault> {
        let max_locals = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or(Fault::LocalIndexOutOfBounds { index, max_locals })
    }

    pub fn load(&self, index: usize) -> Result<i32, Fault> {
        self.slots
            .get(index)
            .copied()
            .ok_or(Fault::LocalIndexOutOfBounds {
                index,
                max_locals: self.slots.len(),
            })
    }

    pub fn store(&mut self, index: usize, value: i32) -> Result<(), Fault> {
        *self.slot(index)? = value;
        Ok(())
    }

    /// `iinc`: wrapping add of `delta` into a slot.
    pub fn increment(&mut self, index: usize, delta: i32) -> Result<(), Fault> {
        let slot = self.slot(index)?;
        *slot = slot.wrapping_add(delta);
        Ok(())
    }
}

/// Activation record of one method invocation.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    pub method: &'a Method,
    pub code: &'a [u8],
    pub pc: usize,
    pub locals: Locals,
    pub stack: OperandStack,
}

impl<'a> Frame<'a> {
    /// Creates a frame positioned at the first instruction of `method`.
    pub fn new(method: &'a Method, locals: Locals) -> Result<Self, Fault> {
        let code = method.code().ok_or_else(|| Fault::MissingCode {
            method: format!("{}{}", method.name(), method.descriptor()),
        })?;
        Ok(Self {
            method,
            code,
            pc: 0,
            locals,
            stack: OperandStack::new(method.max_stack() as usize),
        })
    }

    fn operand(&self, offset: usize, width: usize) -> Result<&'a [u8], Fault> {
        let start = self.pc + offset;
        self.code
            .get(start..start + width)
            .ok_or(Fault::PcOutOfBounds {
                pc: start,
                len: self.code.len(),
            })
    }

    /// Unsigned byte operand at `pc + offset`.
    pub fn u1(&self, offset: usize) -> Result<u8, Fault> {
        Ok(self.operand(offset, 1)?[0])
    }

    /// Sign-extended byte operand at `pc + offset`.
    pub fn i1(&self, offset: usize) -> Result<i8, Fault> {
        Ok(self.u1(offset)? as i8)
    }

    /// Big-endian unsigned short operand at `pc + offset`.
    pub fn u2(&self, offset: usize) -> Result<u16, Fault> {
        Ok(BigEndian::read_u16(self.operand(offset, 2)?))
    }

    /// Big-endian signed short operand at `pc + offset`.
    pub fn i2(&self, offset: usize) -> Result<i16, Fault> {
        Ok(BigEndian::read_i16(self.operand(offset, 2)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_respects_capacity() {
        let mut stack = OperandStack::new(2);
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        assert!(matches!(
            stack.push(3),
            Err(Fault::StackOverflow { capacity: 2 })
        ));
        assert_eq!(stack.peek(0).unwrap(), 2);
        assert_eq!(stack.peek(1).unwrap(), 1);
        assert!(matches!(stack.peek(2), Err(Fault::StackUnderflow)));
        assert_eq!(stack.pop().unwrap(), 2);
        stack.discard(1).unwrap();
        assert!(stack.is_empty());
        assert!(matches!(stack.pop(), Err(Fault::StackUnderflow)));
        assert!(matches!(stack.discard(1), Err(Fault::StackUnderflow)));
    }

    #[test]
    fn locals_round_trip_and_increment() {
        let mut locals = Locals::new(3);
        locals.store(2, i32::MAX).unwrap();
        assert_eq!(locals.load(2).unwrap(), i32::MAX);
        locals.increment(2, 1).unwrap();
        assert_eq!(locals.load(2).unwrap(), i32::MIN);
        locals.increment(0, -128).unwrap();
        let slots: Vec<i32> = (0..3).map(|i| locals.load(i).unwrap()).collect();
        assert_eq!(slots, [-128, 0, i32::MIN]);
        assert!(matches!(
            locals.load(3),
            Err(Fault::LocalIndexOutOfBounds {
                index: 3,
                max_locals: 3
            })
        ));
    }

    #[test]
    fn operands_decode_big_endian() {
        let method = Method::new("f", "()V", 0, 0, vec![0xa7, 0xff, 0xfd, 0x10, 0x80]).unwrap();
        let mut frame = Frame::new(&method, Locals::new(0)).unwrap();
        assert_eq!(frame.i2(1).unwrap(), -3);
        assert_eq!(frame.u2(1).unwrap(), 0xfffd);
        frame.pc = 3;
        assert_eq!(frame.i1(1).unwrap(), -128);
        assert_eq!(frame.u1(1).unwrap(), 0x80);
        assert!(matches!(
            frame.u2(1),
            Err(Fault::PcOutOfBounds { pc: 4, len: 5 })
        ));
    }
}
